//! PDF page source.

mod rasterizer;
mod text_layer;

pub use rasterizer::EmbeddedImageRasterizer;
pub(crate) use text_layer::text_lines;

#[cfg(test)]
pub(crate) use rasterizer::tests::{TestPage, build_pdf};

use image::DynamicImage;

use crate::error::PdfError;

/// What a page yields for OCR.
#[derive(Debug, Clone)]
pub enum PageContent {
    /// Scanned page image, read by the OCR engine.
    Image(DynamicImage),
    /// Text layer of a born-digital page, used as is.
    Text(String),
    /// Neither a decodable image nor any text.
    Missing,
}

impl PageContent {
    pub fn is_missing(&self) -> bool {
        matches!(self, PageContent::Missing)
    }
}

/// Pages of one document.
#[derive(Debug, Clone)]
pub struct DocumentPages {
    /// Page count of the document, including pages past the processing limit.
    pub total_pages: u32,
    /// One entry per processed page in page order.
    pub pages: Vec<PageContent>,
}

impl DocumentPages {
    /// Pages of an image-only source, such as decoded image files.
    pub fn from_images(images: Vec<DynamicImage>) -> Self {
        Self {
            total_pages: images.len() as u32,
            pages: images.into_iter().map(PageContent::Image).collect(),
        }
    }

    /// 1-indexed numbers of the pages without content.
    pub fn skipped_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.is_missing())
            .map(|(index, _)| index as u32 + 1)
            .collect()
    }
}

/// Turns PDF bytes into page contents.
pub trait PageRasterizer {
    /// Read every page.
    ///
    /// Fails only when the document as a whole is unusable; pages with
    /// neither a scan nor text are returned as [`PageContent::Missing`].
    fn rasterize(&self, data: &[u8]) -> Result<DocumentPages, PdfError>;
}

/// Check for the `%PDF-` signature.
pub fn is_pdf(data: &[u8]) -> bool {
    data.starts_with(b"%PDF-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_signature() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"\x89PNG\r\n"));
        assert!(!is_pdf(b""));
    }

    #[test]
    fn test_skipped_pages_are_the_missing_ones() {
        let pages = DocumentPages {
            total_pages: 3,
            pages: vec![
                PageContent::Text("Nom".into()),
                PageContent::Missing,
                PageContent::Image(DynamicImage::new_luma8(4, 4)),
            ],
        };
        assert_eq!(pages.skipped_pages(), vec![2]);
    }
}
