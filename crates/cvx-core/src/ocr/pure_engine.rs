//! Pure Rust OCR backend using `pure-onnx-ocr`.

use std::path::Path;
use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::{ModelConfig, OcrConfig};

use super::engine::{OcrBackend, RawDetection, RecognitionScript};

/// OCR backend backed by `pure-onnx-ocr` (pure Rust, no external ONNX Runtime).
pub struct PureOcrBackend {
    engine: pure_onnx_ocr::engine::OcrEngine,
    keep_unk: bool,
}

impl PureOcrBackend {
    /// Load the detection and recognition models for the configured languages.
    pub fn from_config(models: &ModelConfig, ocr: &OcrConfig) -> Result<Self, OcrError> {
        let script = RecognitionScript::for_languages(&ocr.languages)?;
        debug!("OCR languages {:?} use the {:?} recognizer", ocr.languages, script);

        Self::from_dir(
            &models.model_dir,
            &models.detection_model,
            &models.recognition_model,
            &models.dictionary,
            ocr.keep_unk,
        )
    }

    /// Create a backend from model files in a directory.
    pub fn from_dir(
        model_dir: &Path,
        detection_model: &str,
        recognition_model: &str,
        dictionary: &str,
        keep_unk: bool,
    ) -> Result<Self, OcrError> {
        let det_path = model_dir.join(detection_model);
        let rec_path = model_dir.join(recognition_model);
        let dict_path = model_dir.join(dictionary);

        for path in [&det_path, &rec_path, &dict_path] {
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(&det_path)
            .rec_model_path(&rec_path)
            .dictionary_path(&dict_path)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

        info!("Loaded pure-onnx-ocr engine from {}", model_dir.display());

        Ok(Self { engine, keep_unk })
    }
}

impl OcrBackend for PureOcrBackend {
    fn read_text(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, OcrError> {
        let start = Instant::now();
        let (width, height) = image.dimensions();

        let results = self
            .engine
            .run_from_image(image)
            .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

        debug!(
            "pure-onnx-ocr returned {} text regions for {}x{} in {}ms",
            results.len(),
            width,
            height,
            start.elapsed().as_millis()
        );

        Ok(results
            .iter()
            .map(|r| RawDetection {
                bbox: polygon_to_quad(&r.bounding_box),
                text: if self.keep_unk {
                    r.text.clone()
                } else {
                    r.text.replace("[UNK]", " ").trim().to_string()
                },
                confidence: r.confidence,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "pure-onnx-ocr"
    }
}

/// Convert a `Polygon<f64>` to four `[x, y]` corners.
fn polygon_to_quad(polygon: &pure_onnx_ocr::Polygon<f64>) -> [[f32; 2]; 4] {
    let mut quad = [[0.0f32; 2]; 4];
    for (i, coord) in polygon.exterior().coords().take(4).enumerate() {
        quad[i] = [coord.x as f32, coord.y as f32];
    }
    quad
}
