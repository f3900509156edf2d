//! End-to-end document processing: pages → OCR → text → structured record.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use image::DynamicImage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::document::aggregate;
use crate::error::{PreprocessError, Result};
use crate::models::document::{DocumentReport, PageResult, TextSegment};
use crate::ocr::{ImagePreprocessor, OcrBackend, TextExtractor};
use crate::pdf::{DocumentPages, EmbeddedImageRasterizer, PageContent, PageRasterizer, is_pdf, text_lines};
use crate::structuring::{LlmTransport, StructuringClient};

/// Processing context built once and shared by reference.
///
/// Holds the preprocessor, the OCR extractor (one engine instance) and the
/// optional structuring client. One call processes one document; pages are
/// handled sequentially, each on tokio's blocking pool.
pub struct Pipeline<B: OcrBackend, T: LlmTransport> {
    preprocessor: Arc<ImagePreprocessor>,
    extractor: Arc<TextExtractor<B>>,
    rasterizer: Box<dyn PageRasterizer + Send + Sync>,
    structuring: Option<StructuringClient<T>>,
}

impl<B: OcrBackend + 'static, T: LlmTransport> Pipeline<B, T> {
    /// Create an OCR-only pipeline.
    pub fn new(preprocessor: ImagePreprocessor, extractor: TextExtractor<B>) -> Self {
        Self {
            preprocessor: Arc::new(preprocessor),
            extractor: Arc::new(extractor),
            rasterizer: Box::new(EmbeddedImageRasterizer::default()),
            structuring: None,
        }
    }

    /// Structure the document text after OCR.
    pub fn with_structuring(mut self, client: StructuringClient<T>) -> Self {
        self.structuring = Some(client);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: impl PageRasterizer + Send + Sync + 'static) -> Self {
        self.rasterizer = Box::new(rasterizer);
        self
    }

    pub fn structures(&self) -> bool {
        self.structuring.is_some()
    }

    /// Process a PDF or image file.
    pub async fn process_file(
        &self,
        path: &Path,
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentReport> {
        info!("Processing {}", path.display());
        let data = tokio::fs::read(path).await?;
        self.process_bytes(&data, cancel).await
    }

    /// Process PDF or image bytes.
    pub async fn process_bytes(
        &self,
        data: &[u8],
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentReport> {
        let document = if is_pdf(data) {
            self.rasterizer.rasterize(data)?
        } else {
            let image = image::load_from_memory(data).map_err(PreprocessError::Decode)?;
            DocumentPages::from_images(vec![image])
        };

        Ok(self.process_document(document, cancel).await)
    }

    /// Process already decoded page images, in page order.
    pub async fn process_images(
        &self,
        images: Vec<DynamicImage>,
        cancel: Option<&CancellationToken>,
    ) -> DocumentReport {
        self.process_document(DocumentPages::from_images(images), cancel)
            .await
    }

    /// Run OCR on every page, aggregate, then structure.
    ///
    /// Text-layer pages skip OCR. Missing pages and pages failing
    /// preprocessing are skipped and listed in the summary.
    pub async fn process_document(
        &self,
        document: DocumentPages,
        cancel: Option<&CancellationToken>,
    ) -> DocumentReport {
        let start = Instant::now();
        let DocumentPages { total_pages, pages } = document;

        let mut results = Vec::with_capacity(pages.len());
        let mut skipped_pages = Vec::new();

        for (index, page) in pages.into_iter().enumerate() {
            let number = index as u32 + 1;

            match page {
                PageContent::Image(image) => match self.ocr_page(number, image).await {
                    Some(result) => results.push(result),
                    None => skipped_pages.push(number),
                },
                PageContent::Text(text) => results.push(text_page(number, &text)),
                PageContent::Missing => skipped_pages.push(number),
            }
        }

        let (full_text, mut summary) = aggregate(&results);
        summary.total_pages = total_pages;
        summary.skipped_pages = skipped_pages;

        info!(
            "OCR done: {}/{} pages, {} words",
            summary.processed_pages, summary.total_pages, summary.total_words
        );

        let structuring = match &self.structuring {
            Some(client) => Some(client.structure(&full_text, cancel).await),
            None => {
                debug!("Structuring disabled");
                None
            }
        };

        DocumentReport {
            pages: results,
            summary,
            full_text,
            structuring,
            processing_time_ms: start.elapsed().as_millis() as u64,
            processed_at: Utc::now(),
        }
    }

    /// Preprocess and OCR one page off the async runtime.
    async fn ocr_page(&self, number: u32, image: DynamicImage) -> Option<PageResult> {
        let preprocessor = Arc::clone(&self.preprocessor);
        let extractor = Arc::clone(&self.extractor);

        let result = tokio::task::spawn_blocking(move || {
            preprocessor
                .preprocess(&image)
                .map(|gray| extractor.extract_page(number, &gray))
        })
        .await;

        match result {
            Ok(Ok(page)) => Some(page),
            Ok(Err(e)) => {
                warn!("Skipping page {}: {}", number, e);
                None
            }
            Err(e) => {
                warn!("Skipping page {}: OCR task failed: {}", number, e);
                None
            }
        }
    }
}

/// Page result for a text-layer page: one full-confidence segment per line.
fn text_page(number: u32, text: &str) -> PageResult {
    let segments = text_lines(text)
        .map(|line| TextSegment::new(line, 1.0, [[0.0; 2]; 4]))
        .collect();
    PageResult::new(number, segments, Vec::new())
}

#[cfg(feature = "native")]
mod native {
    use super::*;
    use crate::models::config::CvxConfig;
    use crate::ocr::PureOcrBackend;
    use crate::structuring::GeminiTransport;

    impl Pipeline<PureOcrBackend, GeminiTransport> {
        /// Build the production pipeline.
        ///
        /// Loads the OCR models; with `structure`, also reads the API key.
        pub fn from_config(config: &CvxConfig, structure: bool) -> Result<Self> {
            let preprocessor = ImagePreprocessor::from_config(&config.preprocess);
            let backend = PureOcrBackend::from_config(&config.models, &config.ocr)?;
            let extractor = TextExtractor::new(backend)
                .with_confidence_threshold(config.ocr.confidence_threshold);

            let pipeline = Self::new(preprocessor, extractor)
                .with_rasterizer(EmbeddedImageRasterizer::from_config(&config.pdf));

            if !structure {
                return Ok(pipeline);
            }

            config.structuring.validate()?;
            let transport = GeminiTransport::from_config(&config.structuring)?;
            Ok(pipeline.with_structuring(StructuringClient::new(
                transport,
                config.structuring.clone(),
            )))
        }
    }
}
