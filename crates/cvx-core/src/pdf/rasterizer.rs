//! Page contents of PDFs: scans from embedded image XObjects, with the text
//! layer as fallback for born-digital pages.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::text_layer::page_texts;
use super::{DocumentPages, PageContent, PageRasterizer};
use crate::error::PdfError;
use crate::models::config::PdfConfig;

/// Points per inch in PDF user space.
const POINTS_PER_INCH: f32 = 72.0;

/// Rasterizer for scanned PDFs, where each page is one embedded image.
///
/// When a page holds several images the largest one is taken as the scan.
/// Scans wider than the page at `render_dpi` are downscaled to it.
#[derive(Debug, Clone)]
pub struct EmbeddedImageRasterizer {
    render_dpi: u32,
    max_pages: u32,
}

impl EmbeddedImageRasterizer {
    /// `max_pages` of 0 means no limit.
    pub fn new(render_dpi: u32, max_pages: u32) -> Self {
        Self {
            render_dpi: render_dpi.max(1),
            max_pages: if max_pages == 0 { u32::MAX } else { max_pages },
        }
    }

    pub fn from_config(config: &PdfConfig) -> Self {
        Self::new(config.render_dpi, config.max_pages)
    }

    fn load(data: &[u8]) -> Result<Document, PdfError> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");
        }

        Ok(doc)
    }

    fn page_image(&self, doc: &Document, page_number: u32, page_id: ObjectId) -> Option<DynamicImage> {
        let resources = inherited_attribute(doc, page_id, b"Resources")?;
        let xobjects = resources.get(b"XObject").ok()?;
        let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
            return None;
        };

        let scan = xobjects
            .iter()
            .filter_map(|(_, reference)| doc.dereference(reference).ok())
            .filter_map(|(_, object)| decode_image_object(doc, object))
            .max_by_key(|image| u64::from(image.width()) * u64::from(image.height()))?;

        let Some(target_width) = self.target_width(doc, page_id) else {
            return Some(scan);
        };

        if scan.width() <= target_width {
            return Some(scan);
        }

        let target_height =
            ((scan.height() as f32 * target_width as f32 / scan.width() as f32) as u32).max(1);
        debug!(
            "Page {}: scaling {}x{} scan to {}x{} ({} dpi)",
            page_number,
            scan.width(),
            scan.height(),
            target_width,
            target_height,
            self.render_dpi
        );
        Some(scan.resize_exact(target_width, target_height, FilterType::Triangle))
    }

    /// Page width in pixels at the render resolution, from the MediaBox.
    fn target_width(&self, doc: &Document, page_id: ObjectId) -> Option<u32> {
        let media_box = inherited_object(doc, page_id, b"MediaBox")?;
        let Object::Array(bounds) = media_box else {
            return None;
        };
        if bounds.len() != 4 {
            return None;
        }

        let number = |o: &Object| match o {
            Object::Integer(i) => Some(*i as f32),
            Object::Real(r) => Some(*r as f32),
            _ => None,
        };
        let width_points = (number(&bounds[2])? - number(&bounds[0])?).abs();
        if width_points < 1.0 {
            return None;
        }

        Some((width_points / POINTS_PER_INCH * self.render_dpi as f32).round() as u32)
    }
}

impl Default for EmbeddedImageRasterizer {
    fn default() -> Self {
        Self::from_config(&PdfConfig::default())
    }
}

impl PageRasterizer for EmbeddedImageRasterizer {
    fn rasterize(&self, data: &[u8]) -> Result<DocumentPages, PdfError> {
        let doc = Self::load(data)?;

        let page_ids = doc.get_pages();
        if page_ids.is_empty() {
            return Err(PdfError::NoPages);
        }

        let total_pages = page_ids.len() as u32;
        if total_pages > self.max_pages {
            warn!(
                "PDF has {} pages, only the first {} are processed",
                total_pages, self.max_pages
            );
        }

        let images: Vec<(u32, Option<DynamicImage>)> = page_ids
            .iter()
            .take(self.max_pages as usize)
            .map(|(&number, &page_id)| (number, self.page_image(&doc, number, page_id)))
            .collect();

        // The text layer is only read when some page has no scan.
        let mut texts = if images.iter().any(|(_, image)| image.is_none()) {
            page_texts(data).unwrap_or_default()
        } else {
            Vec::new()
        };

        let pages: Vec<PageContent> = images
            .into_iter()
            .enumerate()
            .map(|(index, (number, image))| match image {
                Some(image) => PageContent::Image(image),
                None => {
                    let text = texts.get_mut(index).map(std::mem::take).unwrap_or_default();
                    if text.trim().is_empty() {
                        warn!("Page {}: no decodable scan image and no text layer", number);
                        PageContent::Missing
                    } else {
                        debug!("Page {}: using the text layer", number);
                        PageContent::Text(text)
                    }
                }
            })
            .collect();

        if pages.iter().all(PageContent::is_missing) {
            return Err(PdfError::NoContent);
        }

        debug!(
            "Read {} of {} pages ({} from the text layer)",
            pages.iter().filter(|p| !p.is_missing()).count(),
            pages.len(),
            pages.iter().filter(|p| matches!(p, PageContent::Text(_))).count()
        );

        Ok(DocumentPages { total_pages, pages })
    }
}

/// Dereferenced attribute of a page, walking up the page tree for inherited keys.
fn inherited_object<'a>(doc: &'a Document, node_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = node_id;
    // Page trees are shallow; the bound guards against reference cycles.
    for _ in 0..32 {
        let Ok(Object::Dictionary(dict)) = doc.get_object(current) else {
            return None;
        };

        if let Ok(value) = dict.get(key) {
            return doc.dereference(value).ok().map(|(_, object)| object);
        }

        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => return None,
        }
    }
    None
}

fn inherited_attribute<'a>(doc: &'a Document, node_id: ObjectId, key: &[u8]) -> Option<&'a Dictionary> {
    match inherited_object(doc, node_id, key)? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn decode_image_object(doc: &Document, object: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = object else {
        return None;
    };
    let dict = &stream.dict;

    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    trace!("Found image object: {}x{}", width, height);

    let filter = dict.get(b"Filter").ok().and_then(|filter| match filter {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(filters) => filters.last().and_then(|o| o.as_name().ok()),
        _ => None,
    });

    match filter {
        Some(b"DCTDecode") => {
            return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                .ok();
        }
        Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
            trace!(
                "Unsupported image filter {:?}",
                filter.map(String::from_utf8_lossy)
            );
            return None;
        }
        _ => {}
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(items) => items.first().and_then(|o| o.as_name().ok()),
            Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
            _ => None,
        })
        .unwrap_or(b"DeviceRGB");

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);

    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    decode_raw(&data, width, height, color_space)
}

fn decode_raw(data: &[u8], width: u32, height: u32, color_space: &[u8]) -> Option<DynamicImage> {
    let pixels = (width as usize).checked_mul(height as usize)?;

    match color_space {
        b"DeviceRGB" | b"RGB" => {
            let len = pixels.checked_mul(3)?;
            let bytes = data.get(..len)?.to_vec();
            RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" => {
            let bytes = data.get(..pixels)?.to_vec();
            GrayImage::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8)
        }
        other => {
            trace!("Unsupported color space {}", String::from_utf8_lossy(other));
            None
        }
    }
}
