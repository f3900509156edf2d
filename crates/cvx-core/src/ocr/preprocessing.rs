//! Page image normalization for OCR.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::filter::median_filter;
use tracing::debug;

use crate::error::PreprocessError;
use crate::models::config::PreprocessConfig;

/// Image preprocessor for the OCR pipeline.
///
/// Produces a single-channel page: grayscale, locally equalized (CLAHE),
/// median-denoised and downscaled to a bounded width.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Maximum page width after preprocessing.
    max_width: u32,
    /// CLAHE clip limit relative to the mean bin height.
    clip_limit: f32,
    /// CLAHE tiles per side.
    grid: u32,
    /// Median filter radius.
    denoise_radius: u32,
}

impl ImagePreprocessor {
    /// Create a new preprocessor with default settings.
    pub fn new() -> Self {
        Self::from_config(&PreprocessConfig::default())
    }

    /// Create a preprocessor from configuration.
    pub fn from_config(config: &PreprocessConfig) -> Self {
        Self {
            max_width: config.max_width.max(1),
            clip_limit: config.clahe_clip_limit.max(1.0),
            grid: config.clahe_grid.max(1),
            denoise_radius: config.denoise_radius,
        }
    }

    /// Set maximum page width.
    pub fn with_max_width(mut self, width: u32) -> Self {
        self.max_width = width.max(1);
        self
    }

    /// Decode raw page bytes and preprocess them.
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<GrayImage, PreprocessError> {
        let image = image::load_from_memory(bytes)?;
        self.preprocess(&image)
    }

    /// Normalize a rasterized page for OCR.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<GrayImage, PreprocessError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PreprocessError::EmptyImage { width, height });
        }

        debug!("Preprocessing page image: {}x{}", width, height);

        let gray = image.to_luma8();
        let equalized = self.clahe(&gray);
        let denoised = if self.denoise_radius > 0 {
            median_filter(&equalized, self.denoise_radius, self.denoise_radius)
        } else {
            equalized
        };

        let (new_width, new_height) = self.calculate_resize_dimensions(width, height);
        if (new_width, new_height) == (width, height) {
            return Ok(denoised);
        }

        debug!("Downscaling page to {}x{}", new_width, new_height);
        Ok(image::imageops::resize(
            &denoised,
            new_width,
            new_height,
            FilterType::Triangle,
        ))
    }

    fn calculate_resize_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if width <= self.max_width {
            return (width, height);
        }

        let scale = self.max_width as f64 / width as f64;
        let new_height = (height as f64 * scale) as u32;

        (self.max_width, new_height.max(1))
    }

    /// Contrast-limited adaptive histogram equalization.
    ///
    /// Each tile gets a clipped-histogram lookup table; pixels are mapped by
    /// bilinear interpolation between the four nearest tile centers.
    fn clahe(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();

        let tile_w = width.div_ceil(self.grid.min(width));
        let tile_h = height.div_ceil(self.grid.min(height));
        let tiles_x = width.div_ceil(tile_w);
        let tiles_y = height.div_ceil(tile_h);

        let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(width);
                let y1 = (y0 + tile_h).min(height);
                luts.push(self.tile_lut(image, x0, y0, x1, y1));
            }
        }

        let lut = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

        let mut result = GrayImage::new(width, height);
        for y in 0..height {
            let (ty0, ty1, wy) = interpolation_cell(y, tile_h, tiles_y);
            for x in 0..width {
                let (tx0, tx1, wx) = interpolation_cell(x, tile_w, tiles_x);
                let value = image.get_pixel(x, y)[0] as usize;

                let top = lut(tx0, ty0)[value] as f32 * (1.0 - wx) + lut(tx1, ty0)[value] as f32 * wx;
                let bottom =
                    lut(tx0, ty1)[value] as f32 * (1.0 - wx) + lut(tx1, ty1)[value] as f32 * wx;
                let mapped = top * (1.0 - wy) + bottom * wy;

                result.put_pixel(x, y, Luma([mapped.round().clamp(0.0, 255.0) as u8]));
            }
        }

        result
    }

    fn tile_lut(&self, image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> [u8; 256] {
        let mut histogram = [0u32; 256];
        for y in y0..y1 {
            for x in x0..x1 {
                histogram[image.get_pixel(x, y)[0] as usize] += 1;
            }
        }

        let area = (x1 - x0) * (y1 - y0);
        let clip = ((self.clip_limit * area as f32 / 256.0) as u32).max(1);

        let mut excess = 0u32;
        for bin in histogram.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }

        let bonus = excess / 256;
        let residual = (excess % 256) as usize;
        for (i, bin) in histogram.iter_mut().enumerate() {
            *bin += bonus + u32::from(i < residual);
        }

        let scale = 255.0 / area as f32;
        let mut lut = [0u8; 256];
        let mut cumulative = 0u32;
        for (i, bin) in histogram.iter().enumerate() {
            cumulative += bin;
            lut[i] = (cumulative as f32 * scale).round().min(255.0) as u8;
        }
        lut
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Neighbouring tile indices and the weight of the second one for a coordinate.
fn interpolation_cell(coord: u32, tile_size: u32, tiles: u32) -> (u32, u32, f32) {
    let position = (coord as f32 + 0.5) / tile_size as f32 - 0.5;
    let first = (position.floor().max(0.0) as u32).min(tiles - 1);
    let second = (first + 1).min(tiles - 1);
    let weight = if first == second {
        0.0
    } else {
        (position - first as f32).clamp(0.0, 1.0)
    };
    (first, second, weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_resize_dimensions() {
        let preprocessor = ImagePreprocessor::new();

        // Narrower than the cap
        assert_eq!(preprocessor.calculate_resize_dimensions(1500, 2100), (1500, 2100));

        // Wider than the cap, aspect ratio kept
        assert_eq!(preprocessor.calculate_resize_dimensions(4000, 1000), (2000, 500));
        assert_eq!(preprocessor.calculate_resize_dimensions(2480, 3508), (2000, 2829));
    }

    #[test]
    fn test_preprocess_outputs_bounded_grayscale() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2400, 600, Rgb([200, 180, 160])));
        let gray = ImagePreprocessor::new().preprocess(&image).unwrap();
        assert_eq!(gray.dimensions(), (2000, 500));
    }

    #[test]
    fn test_small_page_keeps_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 400, Rgb([10, 10, 10])));
        let gray = ImagePreprocessor::new().preprocess(&image).unwrap();
        assert_eq!(gray.dimensions(), (300, 400));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = DynamicImage::new_rgb8(0, 10);
        assert!(matches!(
            ImagePreprocessor::new().preprocess(&image),
            Err(PreprocessError::EmptyImage { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_undecodable_bytes_are_rejected() {
        let result = ImagePreprocessor::new().preprocess_bytes(&[0x00, 0x01, 0x02]);
        assert!(matches!(result, Err(PreprocessError::Decode(_))));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let preprocessor = ImagePreprocessor::from_config(&PreprocessConfig {
            clahe_grid: 2,
            ..Default::default()
        });

        // Every tile holds the same 100/110 stripe pattern, so all tables agree.
        let image = GrayImage::from_fn(64, 64, |x, _| Luma([if x % 2 == 0 { 100 } else { 110 }]));
        let equalized = preprocessor.clahe(&image);

        assert_eq!(equalized.dimensions(), (64, 64));
        let low = equalized.get_pixel(0, 0)[0];
        let high = equalized.get_pixel(1, 0)[0];
        assert!(high > low);
        assert!(high - low >= 10, "contrast shrank: {low} -> {high}");
    }

    #[test]
    fn test_clahe_is_monotonic_within_a_tile() {
        let preprocessor = ImagePreprocessor::from_config(&PreprocessConfig {
            clahe_grid: 1,
            ..Default::default()
        });
        let image = GrayImage::from_fn(32, 8, |x, _| Luma([(x * 8) as u8]));
        let equalized = preprocessor.clahe(&image);

        for x in 1..32 {
            assert!(equalized.get_pixel(x, 0)[0] >= equalized.get_pixel(x - 1, 0)[0]);
        }
    }
}
