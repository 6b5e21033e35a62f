//! Page-level text extraction.
//!
//! A document is run through an ordered chain of [`PageExtractor`]
//! strategies. The first strategy that yields at least one page wins; a
//! failure moves on to the next one. If the chain is exhausted the document
//! fails with [`ExtractionError::Exhausted`], which the ingestion pass
//! records without aborting other documents.
//!
//! The default chain for PDFs is `pdf-extract` (fast, strict about
//! structure) followed by `lopdf` (slower, tolerates broken pages by
//! skipping them).

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::models::{Document, Page};

/// A single extraction strategy.
pub trait PageExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns one string per physical page, in page order.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// Strict strategy backed by `pdf-extract`.
pub struct PdfExtractStrategy;

impl PageExtractor for PdfExtractStrategy {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // pdf-extract panics on some malformed inputs
        let result = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }))
        .map_err(|_| self.fail("parser panicked"))?;

        result.map_err(|e| self.fail(e.to_string()))
    }
}

impl PdfExtractStrategy {
    fn fail(&self, message: impl Into<String>) -> ExtractionError {
        ExtractionError::Strategy {
            strategy: self.name(),
            message: message.into(),
        }
    }
}

/// Tolerant strategy backed by `lopdf`. Pages whose content streams cannot
/// be decoded come back empty instead of failing the whole document.
pub struct LopdfStrategy;

impl PageExtractor for LopdfStrategy {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractionError::Strategy {
            strategy: self.name(),
            message: e.to_string(),
        })?;

        let pages = doc.get_pages();
        let mut out = Vec::with_capacity(pages.len());
        for number in pages.keys() {
            let text = catch_unwind(AssertUnwindSafe(|| doc.extract_text(&[*number])))
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_else(|| {
                    debug!(page = number, "lopdf could not decode page, leaving it empty");
                    String::new()
                });
            out.push(text);
        }
        Ok(out)
    }
}

/// Ordered list of strategies tried until one succeeds.
pub struct ExtractorChain {
    strategies: Vec<Box<dyn PageExtractor>>,
}

impl ExtractorChain {
    pub fn new(strategies: Vec<Box<dyn PageExtractor>>) -> Self {
        Self { strategies }
    }

    pub fn pdf_default() -> Self {
        Self::new(vec![Box::new(PdfExtractStrategy), Box::new(LopdfStrategy)])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extract pages, numbering them from 1 in physical order.
    pub fn extract(&self, document: &Document) -> Result<Vec<Page>, ExtractionError> {
        let mut attempts = Vec::new();

        for (i, strategy) in self.strategies.iter().enumerate() {
            match strategy.extract(&document.bytes) {
                Ok(texts) if !texts.is_empty() => {
                    if i > 0 {
                        debug!(
                            document = %document.id,
                            strategy = strategy.name(),
                            "fallback strategy succeeded"
                        );
                    }
                    return Ok(texts
                        .into_iter()
                        .enumerate()
                        .map(|(idx, text)| Page {
                            document_id: document.id.clone(),
                            number: idx as u32 + 1,
                            text,
                        })
                        .collect());
                }
                Ok(_) => {
                    warn!(document = %document.id, strategy = strategy.name(), "no pages found");
                    attempts.push(format!("{}: no pages found", strategy.name()));
                }
                Err(e) => {
                    warn!(document = %document.id, error = %e, "extraction strategy failed");
                    attempts.push(e.to_string());
                }
            }
        }

        Err(ExtractionError::Exhausted {
            document: document.id.clone(),
            attempts,
        })
    }
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::pdf_default()
    }
}
