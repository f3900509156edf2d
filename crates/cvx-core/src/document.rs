//! Page aggregation: per-page OCR output into one document text.

use tracing::debug;

use crate::models::document::{DocumentSummary, DocumentText, PageResult};

/// Merge page results into the document text and its statistics.
///
/// The retained segments of every page, in page order, are joined with single
/// spaces. Segment text is kept as is; a page without retained segments
/// contributes nothing. `total_pages` and `processed_pages` both equal the
/// number of results; the pipeline adds skipped pages afterwards.
pub fn aggregate(pages: &[PageResult]) -> (DocumentText, DocumentSummary) {
    let mut ordered: Vec<&PageResult> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page);

    let text = ordered
        .iter()
        .flat_map(|p| p.segments.iter().map(|s| s.text.as_str()))
        .collect::<Vec<_>>()
        .join(" ");

    let text = DocumentText::new(text);

    let summary = DocumentSummary {
        total_pages: pages.len() as u32,
        processed_pages: pages.len() as u32,
        skipped_pages: Vec::new(),
        total_segments: pages.iter().map(|p| p.segment_count).sum(),
        total_characters: text.char_count(),
        total_words: text.word_count(),
    };

    debug!(
        "Aggregated {} pages: {} segments, {} words",
        summary.processed_pages, summary.total_segments, summary.total_words
    );

    (text, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::TextSegment;
    use pretty_assertions::assert_eq;

    const BOX: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

    fn page(number: u32, texts: &[&str]) -> PageResult {
        let segments = texts.iter().map(|t| TextSegment::new(*t, 0.9, BOX)).collect();
        PageResult::new(number, segments, vec![])
    }

    #[test]
    fn test_pages_joined_in_order() {
        let pages = vec![
            page(1, &["Jean Dupont", "Développeur"]),
            page(2, &["Formation", "INSA Lyon"]),
        ];
        let (text, summary) = aggregate(&pages);

        assert_eq!(text.as_str(), "Jean Dupont Développeur Formation INSA Lyon");
        assert_eq!(
            summary,
            DocumentSummary {
                total_pages: 2,
                processed_pages: 2,
                skipped_pages: vec![],
                total_segments: 4,
                total_characters: 43,
                total_words: 6,
            }
        );
    }

    #[test]
    fn test_out_of_order_input_is_sorted_by_page() {
        let pages = vec![page(2, &["second"]), page(1, &["first"])];
        let (text, _) = aggregate(&pages);
        assert_eq!(text.as_str(), "first second");
    }

    #[test]
    fn test_empty_pages_add_no_spaces() {
        let pages = vec![page(1, &["Nom"]), page(2, &[]), page(3, &["Langues"])];
        let (text, summary) = aggregate(&pages);
        assert_eq!(text.as_str(), "Nom Langues");
        assert_eq!(summary.total_segments, 2);
        assert_eq!(summary.processed_pages, 3);
    }

    #[test]
    fn test_empty_segments_at_page_edges_are_kept() {
        let pages = vec![page(1, &["A", ""]), page(2, &["", "B"]), page(3, &["C", "", "D"])];
        let (text, summary) = aggregate(&pages);
        assert_eq!(text.as_str(), "A   B C  D");
        assert_eq!(summary.total_segments, 7);
        assert_eq!(summary.total_words, 4);
    }

    #[test]
    fn test_segment_whitespace_is_not_trimmed() {
        let pages = vec![page(1, &[" Nom "]), page(2, &["Titre"])];
        let (text, _) = aggregate(&pages);
        assert_eq!(text.as_str(), " Nom  Titre");
    }

    #[test]
    fn test_no_pages() {
        let (text, summary) = aggregate(&[]);
        assert!(text.is_blank());
        assert_eq!(summary, DocumentSummary::default());
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let pages = vec![page(1, &["a", "b"]), page(2, &["c"])];
        assert_eq!(aggregate(&pages), aggregate(&pages));
    }
}
