//! Error types for the cvx-core library.

use std::time::Duration;

use thiserror::Error;

/// Main error type for the cvx library.
#[derive(Error, Debug)]
pub enum CvxError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Page preprocessing error.
    #[error("preprocessing error: {0}")]
    Preprocess(#[from] PreprocessError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// No page of the PDF carried a decodable scan or a text layer.
    #[error("no page images or text found in PDF")]
    NoContent,
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// None of the configured languages maps to a recognition model.
    #[error("unsupported OCR language: {0}")]
    UnsupportedLanguage(String),

    /// The engine failed while reading an image.
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Errors raised while normalizing a page image. Always page-local.
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// The page bytes could not be decoded as an image.
    #[error("failed to decode page image: {0}")]
    Decode(#[from] image::ImageError),

    /// The image has a zero dimension.
    #[error("invalid image dimensions {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
}

/// Configuration loading or validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or written.
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for the config schema.
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The LLM API key environment variable is not set.
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Failure causes of the structuring step.
///
/// These never propagate past [`crate::structuring::StructuringClient`]; they
/// are carried inside [`crate::structuring::ParseOutcome::Failure`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuringError {
    /// The request did not complete within its attempt deadline.
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Connection could not be established or was dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The endpoint answered HTTP 429.
    #[error("rate limited by the LLM endpoint: {body}")]
    RateLimited { body: String },

    /// The endpoint answered with a 5xx status.
    #[error("LLM endpoint server error (status {status}): {body}")]
    Server { status: u16, body: String },

    /// The remote safety filter suppressed generation.
    #[error("generation blocked by content filter: {reason}")]
    ContentFiltered { reason: String },

    /// The endpoint rejected the request with a non-retryable status.
    #[error("LLM endpoint rejected the request (status {status}): {body}")]
    ClientHttp { status: u16, body: String },

    /// The model answer did not contain a parseable JSON object.
    #[error("malformed model output: {reason}")]
    MalformedOutput { reason: String },

    /// The run was cancelled by the caller.
    #[error("structuring cancelled")]
    Cancelled,

    /// There was no text to structure.
    #[error("no text to structure")]
    EmptyInput,

    /// Every model failed; carries the last model's cause.
    #[error("all models failed ({models}); last error: {last}")]
    Exhausted {
        models: String,
        last: Box<StructuringError>,
    },
}

impl StructuringError {
    /// Check if a new attempt against the same model may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StructuringError::Timeout { .. }
                | StructuringError::Connection(_)
                | StructuringError::RateLimited { .. }
                | StructuringError::Server { .. }
                | StructuringError::MalformedOutput { .. }
        )
    }

    /// Stable snake_case tag for the cause, used in serialized envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            StructuringError::Timeout { .. } => "timeout",
            StructuringError::Connection(_) => "connection",
            StructuringError::RateLimited { .. } => "rate_limited",
            StructuringError::Server { .. } => "server_error",
            StructuringError::ContentFiltered { .. } => "content_filtered",
            StructuringError::ClientHttp { .. } => "client_http_error",
            StructuringError::MalformedOutput { .. } => "malformed_output",
            StructuringError::Cancelled => "cancelled",
            StructuringError::EmptyInput => "empty_input",
            StructuringError::Exhausted { .. } => "exhausted",
        }
    }
}

/// Result type for the cvx library.
pub type Result<T> = std::result::Result<T, CvxError>;
