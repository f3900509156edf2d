//! Core library for résumé OCR and LLM structuring.
//!
//! This crate provides:
//! - Page sources (scanned PDF page images, image files)
//! - Page preprocessing (grayscale, CLAHE, denoise, bounded resize)
//! - Confidence-filtered OCR over a pluggable engine
//! - Page aggregation into one document text
//! - LLM structuring with progressive timeouts, retries and model fallback

pub mod document;
pub mod error;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod structuring;

pub use document::aggregate;
pub use error::{CvxError, Result, StructuringError};
pub use models::config::CvxConfig;
pub use models::document::{DocumentReport, DocumentSummary, DocumentText, PageResult, TextSegment};
pub use models::record::StructuredRecord;
pub use ocr::{ImagePreprocessor, OcrBackend, TextExtractor};
#[cfg(feature = "native")]
pub use ocr::PureOcrBackend;
pub use pdf::{DocumentPages, EmbeddedImageRasterizer, PageContent, PageRasterizer};
pub use pipeline::Pipeline;
pub use structuring::{GeminiTransport, LlmTransport, ParseOutcome, StructuringClient};
