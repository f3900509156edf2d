//! Data models: configuration, OCR document data, and the structured record.

pub mod config;
pub mod document;
pub mod record;

pub use config::{CvxConfig, ModelConfig, OcrConfig, PdfConfig, PreprocessConfig, StructuringConfig};
pub use document::{DocumentReport, DocumentSummary, DocumentText, PageResult, TextSegment};
pub use record::{Competencies, Education, Experience, ExperienceDetail, Mission, StructuredRecord};
