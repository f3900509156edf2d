//! OCR-side document data: segments, pages, aggregated text and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::structuring::ParseOutcome;

/// One OCR detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    /// Recognized text content.
    pub text: String,

    /// Recognition confidence, always within 0.0 - 1.0.
    pub confidence: f32,

    /// Quadrilateral corners `[x, y]`, clockwise from top-left.
    pub bbox: [[f32; 2]; 4],
}

impl TextSegment {
    /// Create a segment, clamping the confidence into `[0, 1]` (NaN becomes 0).
    pub fn new(text: impl Into<String>, confidence: f32, bbox: [[f32; 2]; 4]) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }
}

/// OCR result for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Page number (1-indexed).
    pub page: u32,

    /// Segments above the confidence threshold, in engine order.
    pub segments: Vec<TextSegment>,

    /// Segments dropped by the confidence filter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<TextSegment>,

    /// Space-joined text of the retained segments.
    pub text: String,

    pub segment_count: usize,
    pub character_count: usize,
    pub word_count: usize,
}

impl PageResult {
    /// Build a page result and derive its text and counts.
    pub fn new(page: u32, segments: Vec<TextSegment>, rejected: Vec<TextSegment>) -> Self {
        let text = join_segments(&segments);

        Self {
            page,
            segment_count: segments.len(),
            character_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            segments,
            rejected,
            text,
        }
    }
}

/// Text of every retained segment across the document.
///
/// Only the page aggregator builds one; there is no mutating API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DocumentText(String);

impl DocumentText {
    pub(crate) fn new(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }

    /// First `max_chars` characters, with `...` appended when truncated.
    pub fn excerpt(&self, max_chars: usize) -> String {
        match self.0.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &self.0[..cut]),
            None => self.0.clone(),
        }
    }
}

impl AsRef<str> for DocumentText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document-wide OCR statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Pages handed to the pipeline, including skipped ones.
    pub total_pages: u32,

    /// Pages that produced a [`PageResult`].
    pub processed_pages: u32,

    /// 1-indexed pages skipped because they could not be decoded or preprocessed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_pages: Vec<u32>,

    pub total_segments: usize,
    pub total_characters: usize,
    pub total_words: usize,
}

/// Everything the pipeline learned about one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    /// Per-page OCR output.
    pub pages: Vec<PageResult>,

    /// Document statistics.
    pub summary: DocumentSummary,

    /// Aggregated text sent to the structuring step.
    pub full_text: DocumentText,

    /// Structuring outcome, absent when structuring was not requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structuring: Option<ParseOutcome>,

    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,

    pub processed_at: DateTime<Utc>,
}

pub(crate) fn join_segments(segments: &[TextSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: [[f32; 2]; 4] = [[0.0, 0.0], [10.0, 0.0], [10.0, 5.0], [0.0, 5.0]];

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(TextSegment::new("a", 1.7, BOX).confidence, 1.0);
        assert_eq!(TextSegment::new("a", -0.2, BOX).confidence, 0.0);
        assert_eq!(TextSegment::new("a", f32::NAN, BOX).confidence, 0.0);
        assert_eq!(TextSegment::new("a", 0.42, BOX).confidence, 0.42);
    }

    #[test]
    fn test_page_counts() {
        let page = PageResult::new(
            1,
            vec![
                TextSegment::new("Jean Dupont", 0.9, BOX),
                TextSegment::new("Ingénieur", 0.8, BOX),
            ],
            vec![],
        );
        assert_eq!(page.text, "Jean Dupont Ingénieur");
        assert_eq!(page.segment_count, 2);
        assert_eq!(page.word_count, 3);
        assert_eq!(page.character_count, 21);
    }

    #[test]
    fn test_excerpt_truncation() {
        let text = DocumentText::new("é".repeat(1200));
        let excerpt = text.excerpt(1000);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.chars().count(), 1003);

        let short = DocumentText::new("short text".into());
        assert_eq!(short.excerpt(1000), "short text");
    }
}
