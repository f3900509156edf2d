//! OCR pipeline: page preprocessing and confidence-filtered text extraction.

mod engine;
mod extractor;
mod preprocessing;
#[cfg(feature = "native")]
mod pure_engine;

pub use engine::{OcrBackend, RawDetection, RecognitionScript};
pub use extractor::TextExtractor;
pub use preprocessing::ImagePreprocessor;

#[cfg(feature = "native")]
pub use pure_engine::PureOcrBackend;

#[cfg(test)]
pub(crate) use extractor::tests::FixedBackend;
