//! Confidence-filtered text extraction over an OCR backend.

use std::sync::Mutex;
use std::time::Instant;

use image::{DynamicImage, GenericImageView, GrayImage};
use tracing::{debug, info, warn};

use crate::models::document::{PageResult, TextSegment};

use super::engine::OcrBackend;

/// Runs OCR on preprocessed pages and keeps confident detections.
///
/// The backend sits behind a mutex: one engine instance serves at most one
/// OCR call at a time.
pub struct TextExtractor<B: OcrBackend> {
    backend: Mutex<B>,
    confidence_threshold: f32,
}

/// Segments split by the confidence filter.
#[derive(Debug, Default)]
struct Extraction {
    retained: Vec<TextSegment>,
    rejected: Vec<TextSegment>,
}

impl<B: OcrBackend> TextExtractor<B> {
    /// Create an extractor with the default threshold (0.5).
    pub fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
            confidence_threshold: 0.5,
        }
    }

    /// Set the confidence threshold; detections at or below it are dropped.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Extract confident segments from an image, in engine order.
    ///
    /// Engine failures yield an empty sequence.
    pub fn extract(&self, image: &DynamicImage) -> Vec<TextSegment> {
        self.run(image).retained
    }

    /// Extract one preprocessed page into a [`PageResult`].
    pub fn extract_page(&self, page: u32, image: &GrayImage) -> PageResult {
        let start = Instant::now();
        let image = DynamicImage::ImageLuma8(image.clone());
        let extraction = self.run(&image);

        let result = PageResult::new(page, extraction.retained, extraction.rejected);

        info!(
            "Page {}: {} segments kept, {} rejected in {}ms",
            page,
            result.segment_count,
            result.rejected.len(),
            start.elapsed().as_millis()
        );

        result
    }

    fn run(&self, image: &DynamicImage) -> Extraction {
        let (width, height) = image.dimensions();

        let detections = {
            let backend = match self.backend.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("OCR engine lock was poisoned, reusing engine");
                    poisoned.into_inner()
                }
            };

            match backend.read_text(image) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!("OCR failed on {}x{} image ({}): {}", width, height, backend.name(), e);
                    return Extraction::default();
                }
            }
        };

        let mut extraction = Extraction::default();
        for detection in detections {
            let segment = TextSegment::new(detection.text, detection.confidence, detection.bbox);
            if segment.confidence > self.confidence_threshold {
                extraction.retained.push(segment);
            } else {
                extraction.rejected.push(segment);
            }
        }

        debug!(
            "Confidence filter (> {}): {} kept, {} rejected",
            self.confidence_threshold,
            extraction.retained.len(),
            extraction.rejected.len()
        );

        extraction
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::ocr::engine::RawDetection;

    /// Backend returning a fixed list of detections.
    pub(crate) struct FixedBackend {
        pub detections: Vec<(&'static str, f32)>,
        pub fail: bool,
    }

    impl FixedBackend {
        pub(crate) fn new(detections: Vec<(&'static str, f32)>) -> Self {
            Self { detections, fail: false }
        }

        pub(crate) fn failing() -> Self {
            Self { detections: vec![], fail: true }
        }
    }

    impl OcrBackend for FixedBackend {
        fn read_text(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, OcrError> {
            if self.fail {
                return Err(OcrError::Recognition("unreadable buffer".to_string()));
            }
            Ok(self
                .detections
                .iter()
                .enumerate()
                .map(|(i, (text, confidence))| {
                    let y = i as f32 * 20.0;
                    RawDetection {
                        bbox: [[0.0, y], [100.0, y], [100.0, y + 15.0], [0.0, y + 15.0]],
                        text: text.to_string(),
                        confidence: *confidence,
                    }
                })
                .collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn blank() -> DynamicImage {
        DynamicImage::new_luma8(10, 10)
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let extractor = TextExtractor::new(FixedBackend::new(vec![
            ("Expérience", 0.9),
            ("noise", 0.5),
            ("Formation", 0.51),
            ("smudge", 0.1),
        ]));

        let texts: Vec<String> = extractor.extract(&blank()).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["Expérience", "Formation"]);
    }

    #[test]
    fn test_survivors_exceed_any_threshold() {
        let detections = vec![("a", 0.0), ("b", 0.25), ("c", 0.5), ("d", 0.75), ("e", 1.0)];
        for threshold in [0.0, 0.2, 0.5, 0.74, 0.99] {
            let extractor = TextExtractor::new(FixedBackend::new(detections.clone()))
                .with_confidence_threshold(threshold);
            for segment in extractor.extract(&blank()) {
                assert!(segment.confidence > threshold);
            }
        }
    }

    #[test]
    fn test_engine_order_is_preserved() {
        let extractor = TextExtractor::new(FixedBackend::new(vec![
            ("third", 0.9),
            ("first", 0.9),
            ("second", 0.9),
        ]));
        let texts: Vec<String> = extractor.extract(&blank()).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["third", "first", "second"]);
    }

    #[test]
    fn test_engine_failure_yields_empty_page() {
        let extractor = TextExtractor::new(FixedBackend::failing());
        assert!(extractor.extract(&blank()).is_empty());

        let page = extractor.extract_page(2, &GrayImage::new(4, 4));
        assert_eq!(page.page, 2);
        assert_eq!(page.segment_count, 0);
        assert_eq!(page.text, "");
    }

    #[test]
    fn test_page_keeps_rejected_for_diagnostics() {
        let extractor = TextExtractor::new(FixedBackend::new(vec![("Nom", 0.95), ("~", 0.2)]));
        let page = extractor.extract_page(1, &GrayImage::new(4, 4));
        assert_eq!(page.text, "Nom");
        assert_eq!(page.rejected.len(), 1);
        assert_eq!(page.rejected[0].text, "~");
    }
}
