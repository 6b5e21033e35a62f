//! Process-wide state.
//!
//! [`RagContext`] owns everything that lives for the whole process: the
//! provider adapters, the shared [`IndexHandle`], the ingestion coordinator
//! and the rebuild scheduler. It is built once at startup (the index is
//! loaded if one exists, otherwise the handle starts empty) and torn down
//! with [`RagContext::shutdown`], which lets any pending rebuild finish.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::chat::{ChatService, Generator, OllamaGenerator};
use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::ExtractorChain;
use crate::index::IndexHandle;
use crate::ingest::IngestionCoordinator;
use crate::retrieve::RetrievalEngine;
use crate::source::{DirectorySource, DocumentSource};
use crate::watcher::{CorpusWatcher, RebuildScheduler};

pub struct RagContext {
    pub config: Arc<Config>,
    pub source: Arc<DirectorySource>,
    pub handle: Arc<IndexHandle>,
    pub coordinator: Arc<IngestionCoordinator>,
    pub engine: Arc<RetrievalEngine>,
    pub chat: Arc<ChatService>,
    pub scheduler: Arc<RebuildScheduler>,
    watcher: Option<CorpusWatcher>,
}

impl RagContext {
    /// Build the context with the providers named in `config`.
    pub fn init(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(&config.generation)?);
        Self::with_providers(config, embedder, generator, ExtractorChain::pdf_default())
    }

    /// Build the context around caller-supplied providers and extractor.
    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        extractor: ExtractorChain,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::from_config(&config.chunking)?;
        let source = Arc::new(DirectorySource::new(&config.corpus)?);

        let handle = Arc::new(IndexHandle::load_or_empty(
            &config.index.path,
            embedder.model_name(),
            config.embedding.dims.or(embedder.dims()),
        ));

        let document_source: Arc<dyn DocumentSource> = source.clone();
        let coordinator = Arc::new(IngestionCoordinator::new(
            document_source,
            Arc::new(extractor),
            chunker,
            embedder.clone(),
            handle.clone(),
            config.index.path.clone(),
        ));
        let engine = Arc::new(RetrievalEngine::new(embedder, handle.clone()));
        let chat = Arc::new(ChatService::new(engine.clone(), generator));
        let scheduler = Arc::new(RebuildScheduler::new(coordinator.clone()));

        Ok(Self {
            config: Arc::new(config),
            source,
            handle,
            coordinator,
            engine,
            chat,
            scheduler,
            watcher: None,
        })
    }

    /// Number of chunks in the current index, 0 when nothing is loaded.
    pub fn indexed_chunks(&self) -> usize {
        self.handle.current().map(|index| index.len()).unwrap_or(0)
    }

    /// Start watching the corpus directory. A no-op if already watching.
    pub fn start_watcher(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let watcher = CorpusWatcher::start(self.source.clone(), self.scheduler.clone())?;
        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop the watcher (if any) and wait for in-flight or pending rebuilds.
    pub async fn shutdown(self) {
        match self.watcher {
            Some(watcher) => watcher.shutdown().await,
            None => self.scheduler.wait_idle().await,
        }
        info!("context shut down");
    }
}
