//! Query-time retrieval.
//!
//! Embeds the query with the same [`Embedder`] used at build time, searches
//! whatever index is current, and maps row ids back to chunk metadata.
//! Results are raw per-chunk hits in descending score order; grouping them
//! into user-facing sources happens downstream (see [`crate::chat`]).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::index::IndexHandle;
use crate::models::QueryResult;

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    handle: Arc<IndexHandle>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn Embedder>, handle: Arc<IndexHandle>) -> Self {
        Self { embedder, handle }
    }

    /// Top `k` chunks for `text`. No index yet, a blank query, or `k == 0`
    /// all yield an empty result rather than an error.
    pub async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<QueryResult>, RetrievalError> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let Some(index) = self.handle.current() else {
            debug!("no index loaded, returning no results");
            return Ok(Vec::new());
        };

        let query = self.embedder.embed_query(text).await?;
        if query.len() != index.dims() {
            return Err(RetrievalError::DimensionMismatch {
                expected: index.dims(),
                found: query.len(),
            });
        }

        let results = index
            .search(&query, k)
            .into_iter()
            .filter_map(|(row, score)| {
                index.entry(row).map(|meta| QueryResult {
                    text: meta.text.clone(),
                    document_id: meta.document_id.clone(),
                    page: meta.page,
                    score,
                })
            })
            .collect();

        Ok(results)
    }

    /// Like [`retrieve`](Self::retrieve), but failures degrade to an empty
    /// result with a logged diagnostic.
    pub async fn query(&self, text: &str, k: usize) -> Vec<QueryResult> {
        match self.retrieve(text, k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "retrieval failed, returning no results");
                Vec::new()
            }
        }
    }
}
