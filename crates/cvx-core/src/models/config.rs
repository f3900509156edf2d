//! Configuration structures for the résumé pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Main configuration for the cvx pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvxConfig {
    /// Page image preprocessing configuration.
    pub preprocess: PreprocessConfig,

    /// OCR configuration.
    pub ocr: OcrConfig,

    /// PDF processing configuration.
    pub pdf: PdfConfig,

    /// LLM structuring configuration.
    pub structuring: StructuringConfig,

    /// Model configuration.
    pub models: ModelConfig,
}

/// Page normalization applied before OCR.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Pages wider than this are downscaled to this width.
    pub max_width: u32,

    /// CLAHE clip limit, relative to the mean histogram bin height.
    pub clahe_clip_limit: f32,

    /// CLAHE tile grid size (tiles per side).
    pub clahe_grid: u32,

    /// Median filter radius used for denoising (0 disables).
    pub denoise_radius: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_width: 2000,
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
            denoise_radius: 1,
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Detections at or below this confidence are dropped (0.0 - 1.0).
    pub confidence_threshold: f32,

    /// Expected document languages (ISO 639-1 codes).
    pub languages: Vec<String>,

    /// Keep `[UNK]` tokens emitted by the recognizer instead of blanking them.
    pub keep_unk: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            languages: vec!["en".to_string(), "fr".to_string()],
            keep_unk: false,
        }
    }
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// DPI requested from the rasterizer.
    pub render_dpi: u32,

    /// Maximum pages to process (0 = unlimited).
    pub max_pages: u32,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            render_dpi: 300,
            max_pages: 10,
        }
    }
}

/// Upper bound accepted for `retry_delay_secs`.
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

/// LLM structuring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuringConfig {
    /// Model tried first.
    pub primary_model: String,

    /// Models tried in order once the primary exhausts its attempts.
    pub fallback_models: Vec<String>,

    /// Attempts per model.
    pub max_retries: u32,

    /// Per-attempt request timeouts in seconds; the last stage repeats.
    pub timeout_stages_secs: Vec<u64>,

    /// Base delay for the linear backoff between attempts, in seconds.
    pub retry_delay_secs: f64,

    /// Sampling temperature.
    pub temperature: f32,

    /// Top-k sampling.
    pub top_k: u32,

    /// Nucleus sampling.
    pub top_p: f32,

    /// Hard cap on generated tokens.
    pub max_output_tokens: u32,

    /// Stop sequences passed to the model.
    pub stop_sequences: Vec<String>,

    /// Safety threshold applied to every harm category.
    pub safety_threshold: String,

    /// Base URL of the generative language API.
    pub api_base_url: String,

    /// Name of the environment variable holding the API key.
    pub api_key_env: String,

    /// Length of the input excerpt attached to degraded results.
    pub excerpt_chars: usize,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            primary_model: "gemini-2.0-flash".to_string(),
            fallback_models: vec![
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
            max_retries: 3,
            timeout_stages_secs: vec![60, 90, 120],
            retry_delay_secs: 2.0,
            temperature: 0.1,
            top_k: 1,
            top_p: 0.8,
            max_output_tokens: 8192,
            stop_sequences: Vec::new(),
            safety_threshold: "BLOCK_ONLY_HIGH".to_string(),
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            excerpt_chars: 1000,
        }
    }
}

impl StructuringConfig {
    /// Check value ranges that would make the attempt loop meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "structuring.max_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.timeout_stages_secs.is_empty() || self.timeout_stages_secs.contains(&0) {
            return Err(ConfigError::Invalid {
                field: "structuring.timeout_stages_secs",
                reason: "must contain at least one non-zero stage".to_string(),
            });
        }
        if !(0.0..=MAX_RETRY_DELAY_SECS).contains(&self.retry_delay_secs) {
            return Err(ConfigError::Invalid {
                field: "structuring.retry_delay_secs",
                reason: format!(
                    "{} is not a delay between 0 and {} seconds",
                    self.retry_delay_secs, MAX_RETRY_DELAY_SECS
                ),
            });
        }
        if self.primary_model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "structuring.primary_model",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Timeout for the zero-indexed attempt `attempt`.
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let last = self.timeout_stages_secs.len().saturating_sub(1);
        let stage = (attempt as usize).min(last);
        Duration::from_secs(self.timeout_stages_secs.get(stage).copied().unwrap_or(60))
    }

    /// Backoff before the attempt following the 1-based `attempt_number`.
    ///
    /// Negative or NaN delays give no backoff; overflowing ones saturate.
    pub fn backoff_after(&self, attempt_number: u32, rate_limited: bool) -> Duration {
        let factor = if rate_limited { 2.0 } else { 1.0 };
        let secs = self.retry_delay_secs * attempt_number as f64 * factor;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Primary model followed by the fallbacks, in order.
    pub fn model_chain(&self) -> Vec<String> {
        std::iter::once(self.primary_model.clone())
            .chain(self.fallback_models.iter().cloned())
            .collect()
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }
}

/// Model file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing model files.
    pub model_dir: PathBuf,

    /// Text detection model file name.
    pub detection_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Character dictionary file name.
    pub dictionary: String,

    /// Base URL `cvx models download` fetches the model files from.
    ///
    /// Each file is requested as `<download_url>/<file name>`, so the
    /// host must serve them under the names configured above.
    pub download_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detection_model: "det.onnx".to_string(),
            recognition_model: "latin_rec.onnx".to_string(),
            dictionary: "latin_dict.txt".to_string(),
            download_url: None,
        }
    }
}

impl CvxConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.structuring.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get full path to a model file.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.models.model_dir.join(model_name)
    }
}
