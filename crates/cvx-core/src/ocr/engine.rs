//! OCR engine abstraction.

use image::DynamicImage;

use crate::error::OcrError;

/// A raw detection as reported by an OCR engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Quadrilateral corners `[x, y]`.
    pub bbox: [[f32; 2]; 4],
    /// Recognized text.
    pub text: String,
    /// Engine confidence; not guaranteed to be within `[0, 1]`.
    pub confidence: f32,
}

/// Trait for OCR engine implementations.
///
/// Languages are bound when the engine is constructed. Detections are
/// returned in the engine's reading order.
pub trait OcrBackend: Send {
    /// Read every text region of an image.
    fn read_text(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, OcrError>;

    /// Short engine name for logs and reports.
    fn name(&self) -> &str;
}

impl<B: OcrBackend + ?Sized> OcrBackend for Box<B> {
    fn read_text(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, OcrError> {
        (**self).read_text(image)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Scripts the recognition models cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionScript {
    Latin,
}

impl RecognitionScript {
    /// Pick the recognition script covering every configured language.
    pub fn for_languages<S: AsRef<str>>(languages: &[S]) -> Result<Self, OcrError> {
        if languages.is_empty() {
            return Err(OcrError::UnsupportedLanguage("no language configured".to_string()));
        }

        for language in languages {
            let code = language.as_ref().trim().to_lowercase();
            if !LATIN_LANGUAGES.contains(&code.as_str()) {
                return Err(OcrError::UnsupportedLanguage(code));
            }
        }

        Ok(RecognitionScript::Latin)
    }
}

const LATIN_LANGUAGES: &[&str] = &[
    "en", "fr", "de", "es", "it", "pt", "nl", "pl", "ro", "ca", "da", "sv", "no", "fi", "cs",
    "sk", "sl", "hr", "hu", "tr", "id", "ms", "la", "ga", "cy", "is", "et", "lv", "lt", "sq",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_languages_resolve() {
        assert_eq!(
            RecognitionScript::for_languages(&["en", "fr"]).unwrap(),
            RecognitionScript::Latin
        );
        assert_eq!(
            RecognitionScript::for_languages(&[" FR "]).unwrap(),
            RecognitionScript::Latin
        );
    }

    #[test]
    fn test_unsupported_language_is_reported() {
        let err = RecognitionScript::for_languages(&["en", "ja"]).unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedLanguage(code) if code == "ja"));

        let empty: [&str; 0] = [];
        assert!(RecognitionScript::for_languages(&empty).is_err());
    }
}
