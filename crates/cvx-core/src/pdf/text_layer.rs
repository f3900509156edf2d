//! Text layer of born-digital PDFs.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

/// Extract the text of every page, in page order.
///
/// Returns `None` when the text layer cannot be read. `pdf-extract` panics
/// on some malformed fonts; that is treated the same way.
pub(super) fn page_texts(data: &[u8]) -> Option<Vec<String>> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(data)
    }));

    match result {
        Ok(Ok(pages)) => {
            debug!("Read text layer of {} pages", pages.len());
            Some(pages)
        }
        Ok(Err(e)) => {
            warn!("Could not read PDF text layer: {}", e);
            None
        }
        Err(_) => {
            warn!("PDF text layer extraction panicked");
            None
        }
    }
}

/// Text-layer lines of a page, trimmed, blank lines dropped.
pub(crate) fn text_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}
