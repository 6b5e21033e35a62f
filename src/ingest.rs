//! Ingestion pipeline orchestration.
//!
//! Coordinates a full rebuild: enumerate → extract → chunk → embed → build →
//! persist → swap. Every rebuild starts from scratch; there is no per-document
//! upsert or delete.
//!
//! Failure containment:
//! - a corpus that cannot be listed fails the run with its location in
//!   `failed`;
//! - a document that fails extraction is recorded in `failed` and skipped;
//! - an empty corpus, or one with no indexable text, returns a failure report
//!   and leaves the current index alone;
//! - an embedding, build or persistence error aborts the rebuild and leaves
//!   the current index queryable.
//!
//! Only one rebuild runs at a time. The gate is held for the whole run, but
//! readers never take it: they only touch the [`IndexHandle`], which is
//! locked just long enough to swap the pointer.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chunk::Chunker;
use crate::embedding::Embedder;
use crate::error::ExtractionError;
use crate::extract::ExtractorChain;
use crate::index::{ChunkMeta, IndexHandle, VectorIndex};
use crate::models::{Chunk, Document, IngestionReport, Page};
use crate::source::DocumentSource;
use crate::watcher::Rebuilder;

pub const MSG_EMPTY_CORPUS: &str = "No documents found in corpus";
pub const MSG_NOTHING_LOADED: &str = "No documents were successfully loaded";
pub const MSG_NO_TEXT: &str = "No indexable text found";
pub const MSG_COMPLETE: &str = "Ingestion complete";

pub struct IngestionCoordinator {
    source: Arc<dyn DocumentSource>,
    extractor: Arc<ExtractorChain>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    handle: Arc<IndexHandle>,
    index_path: PathBuf,
    gate: Mutex<()>,
}

impl IngestionCoordinator {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        extractor: Arc<ExtractorChain>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        handle: Arc<IndexHandle>,
        index_path: PathBuf,
    ) -> Self {
        Self {
            source,
            extractor,
            chunker,
            embedder,
            handle,
            index_path,
            gate: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    /// Run a full rebuild. Concurrent callers queue on the gate and each get
    /// their own report.
    pub async fn run(&self) -> IngestionReport {
        let _guard = self.gate.lock().await;
        info!("running ingestion");

        let ids = match self.source.list() {
            Ok(ids) => ids,
            Err(e) => {
                let location = self.source.location();
                error!(error = %e, corpus = %location, "failed to enumerate corpus");
                return IngestionReport::failure(
                    format!("Failed to enumerate corpus: {:#}", e),
                    Vec::new(),
                    vec![location],
                );
            }
        };

        if ids.is_empty() {
            warn!("no documents in corpus, skipping rebuild");
            return IngestionReport::failure(MSG_EMPTY_CORPUS, Vec::new(), Vec::new());
        }

        let mut pages: Vec<Page> = Vec::new();
        let mut loaded = Vec::new();
        let mut failed = Vec::new();

        for id in ids {
            match self.extract_one(&id).await {
                Ok(doc_pages) => {
                    info!(document = %id, pages = doc_pages.len(), "loaded document");
                    pages.extend(doc_pages);
                    loaded.push(id);
                }
                Err(e) => {
                    warn!(document = %id, error = %e, "failed to load document");
                    failed.push(id);
                }
            }
        }

        if loaded.is_empty() {
            return IngestionReport::failure(MSG_NOTHING_LOADED, loaded, failed);
        }

        let chunks = self.chunker.chunk_pages(&pages);
        drop(pages);
        info!(chunks = chunks.len(), documents = loaded.len(), "split documents");

        if chunks.is_empty() {
            warn!("documents produced no indexable chunks, keeping current index");
            return IngestionReport::failure(MSG_NO_TEXT, loaded, failed);
        }

        let chunk_count = chunks.len();
        match self.build_and_swap(chunks).await {
            Ok(()) => {
                info!(chunks = chunk_count, "ingestion complete");
                IngestionReport {
                    success: true,
                    message: MSG_COMPLETE.to_string(),
                    loaded,
                    failed,
                    chunks: chunk_count,
                }
            }
            Err(diagnostic) => {
                error!(error = %diagnostic, "rebuild aborted, previous index kept");
                IngestionReport::failure(
                    format!("Rebuild aborted: {}", diagnostic),
                    loaded,
                    failed,
                )
            }
        }
    }

    async fn extract_one(&self, id: &str) -> Result<Vec<Page>, ExtractionError> {
        let bytes = self.source.read(id).map_err(|e| ExtractionError::Read {
            document: id.to_string(),
            message: format!("{:#}", e),
        })?;
        let document = Document {
            id: id.to_string(),
            bytes,
        };

        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&document))
            .await
            .map_err(|e| ExtractionError::Read {
                document: id.to_string(),
                message: format!("extraction task failed: {}", e),
            })?
    }

    async fn build_and_swap(&self, chunks: Vec<Chunk>) -> Result<(), String> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| e.to_string())?;

        let metadata = chunks
            .into_iter()
            .map(|c| ChunkMeta {
                document_id: c.document_id,
                page: c.page,
                text: c.text,
            })
            .collect();

        let index = VectorIndex::build(self.embedder.model_name(), vectors, metadata)
            .map_err(|e| e.to_string())?;
        let index = Arc::new(index);

        let path = self.index_path.clone();
        let to_save = index.clone();
        tokio::task::spawn_blocking(move || to_save.save(&path))
            .await
            .map_err(|e| format!("persist task failed: {}", e))?
            .map_err(|e| format!("failed to persist index: {}", e))?;

        self.handle.replace(index);
        Ok(())
    }
}

#[async_trait]
impl Rebuilder for IngestionCoordinator {
    async fn rebuild(&self) -> IngestionReport {
        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;

    struct UnlistableSource;

    impl DocumentSource for UnlistableSource {
        fn list(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("permission denied")
        }

        fn read(&self, id: &str) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("unexpected read of {}", id)
        }

        fn location(&self) -> String {
            "/srv/papers".to_string()
        }
    }

    #[tokio::test]
    async fn unlistable_corpus_names_its_location() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Arc::new(IndexHandle::empty());
        let coordinator = IngestionCoordinator::new(
            Arc::new(UnlistableSource),
            Arc::new(ExtractorChain::pdf_default()),
            Chunker::new(500, 80, 20).unwrap(),
            Arc::new(DisabledEmbedder),
            handle.clone(),
            dir.path().join("index"),
        );

        let report = coordinator.run().await;
        assert!(!report.success);
        assert!(
            report.message.starts_with("Failed to enumerate corpus"),
            "{}",
            report.message
        );
        assert!(report.message.contains("permission denied"));
        assert!(report.loaded.is_empty());
        assert_eq!(report.failed, vec!["/srv/papers"]);
        assert_ne!(report.message, MSG_EMPTY_CORPUS);
        assert!(handle.current().is_none());
    }
}
