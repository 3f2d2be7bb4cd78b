use crate::chunker;
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of text extraction.
///
/// Extraction never errors: anything the parser cannot read comes back as
/// `Unreadable` with a human-readable diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Page-marked text, one `--- Page n ---` marker before each page
    Text { text: String, page_count: usize },
    Unreadable { diagnostic: String },
}

/// Turns a binary source document into page-marked plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, source: Arc<[u8]>) -> Extraction;
}

/// PDF text-layer extractor backed by `pdf-extract`
pub struct PdfTextExtractor {
    max_pages: usize,
}

impl PdfTextExtractor {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, source: Arc<[u8]>) -> Extraction {
        let max_pages = self.max_pages;

        // pdf-extract is CPU bound and may panic on malformed input
        match tokio::task::spawn_blocking(move || extract_text_from_pdf(&source, max_pages)).await {
            Ok(extraction) => extraction,
            Err(e) => {
                log::error!("PDF extraction task failed: {}", e);
                Extraction::Unreadable {
                    diagnostic: format!("PDF parser aborted: {}", e),
                }
            }
        }
    }
}

/// Extract text from PDF bytes, at most `max_pages` pages
pub fn extract_text_from_pdf(bytes: &[u8], max_pages: usize) -> Extraction {
    log::info!("Extracting text from PDF ({} bytes)", bytes.len());

    let parsed = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    let pages = match parsed {
        Ok(Ok(pages)) => pages,
        Err(_) => {
            log::error!("PDF parser panicked on malformed input");
            return Extraction::Unreadable {
                diagnostic: "Error extracting text from PDF (malformed document).".to_string(),
            };
        }
        Ok(Err(e)) => {
            log::error!("PDF extraction failed: {}", e);
            return Extraction::Unreadable {
                diagnostic: format!(
                    "Error extracting text from PDF ({}). Please ensure it is a valid text-based PDF.",
                    e
                ),
            };
        }
    };

    pages_to_extraction(&pages, max_pages)
}

/// Cap parsed pages and mark them up. Sparse text passes through; only a
/// source with no text at all is unreadable.
fn pages_to_extraction(pages: &[String], max_pages: usize) -> Extraction {
    let kept: Vec<&str> = pages.iter().take(max_pages).map(|p| p.as_str()).collect();
    if kept.len() < pages.len() {
        log::info!("Capped extraction at {} of {} pages", kept.len(), pages.len());
    }

    if kept.iter().all(|p| p.trim().is_empty()) {
        log::warn!("PDF has no text layer, {} pages", kept.len());
        return Extraction::Unreadable {
            diagnostic: "PDF has no text layer (scanned document?)".to_string(),
        };
    }

    let text = chunker::mark_pages(kept.iter().copied());

    log::info!(
        "Successfully extracted {} chars from PDF with {} pages",
        text.len(),
        kept.len()
    );

    Extraction::Text {
        text,
        page_count: kept.len(),
    }
}

/// Estimate page count from PDF bytes
/// This is a rough heuristic based on "/Type /Page" occurrences
pub fn estimate_page_count(bytes: &[u8]) -> usize {
    let content = String::from_utf8_lossy(bytes);
    let page_markers = content.matches("/Type /Page").count();

    // "/Type /Pages" also matches "/Type /Page"
    let pages_object = content.matches("/Type /Pages").count();

    (page_markers.saturating_sub(pages_object)).max(1)
}
