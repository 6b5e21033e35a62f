//! Corpus watcher and rebuild coalescing.
//!
//! [`RebuildScheduler`] is a two-state machine (`Idle` / `Rebuilding`) with a
//! single `dirty` flag. A request while idle starts a rebuild; a request
//! while rebuilding only sets `dirty`. When a rebuild finishes with `dirty`
//! set, exactly one more rebuild runs. A burst of N events during a rebuild
//! therefore costs one extra rebuild, not N, and the final corpus state is
//! always picked up.
//!
//! [`CorpusWatcher`] feeds file-system events from `notify` into the
//! scheduler. Event kinds are not distinguished: any change to a
//! document-like path triggers the same full rebuild.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::IngestionReport;
use crate::source::DirectorySource;

/// Something that can rebuild the index from the current corpus.
#[async_trait]
pub trait Rebuilder: Send + Sync + 'static {
    async fn rebuild(&self) -> IngestionReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl ChangeEvent {
    /// Translate a `notify` event. A rename yields one event per path.
    /// Access and metadata-only noise yields nothing.
    pub fn from_notify(event: &notify::Event) -> Vec<ChangeEvent> {
        use notify::event::ModifyKind;

        let kind = match &event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Moved,
            EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
            EventKind::Modify(_) => ChangeKind::Modified,
            EventKind::Remove(_) => ChangeKind::Deleted,
            _ => return Vec::new(),
        };

        event
            .paths
            .iter()
            .map(|path| ChangeEvent {
                kind,
                path: path.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Rebuilding,
}

struct SchedulerInner {
    state: WatcherState,
    dirty: bool,
    completed: u64,
    last_report: Option<IngestionReport>,
    worker: Option<JoinHandle<()>>,
}

/// Serializes rebuilds and coalesces requests that arrive mid-rebuild.
pub struct RebuildScheduler {
    rebuilder: Arc<dyn Rebuilder>,
    inner: Arc<Mutex<SchedulerInner>>,
}

fn lock(inner: &Mutex<SchedulerInner>) -> MutexGuard<'_, SchedulerInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RebuildScheduler {
    pub fn new(rebuilder: Arc<dyn Rebuilder>) -> Self {
        Self {
            rebuilder,
            inner: Arc::new(Mutex::new(SchedulerInner {
                state: WatcherState::Idle,
                dirty: false,
                completed: 0,
                last_report: None,
                worker: None,
            })),
        }
    }

    /// Ask for a rebuild. Returns `true` if one was started, `false` if one
    /// is already running and the request was folded into it. Must be
    /// called from within a tokio runtime.
    pub fn request(&self) -> bool {
        let mut inner = lock(&self.inner);
        match inner.state {
            WatcherState::Rebuilding => {
                if !inner.dirty {
                    debug!("rebuild in progress, marking dirty");
                }
                inner.dirty = true;
                false
            }
            WatcherState::Idle => {
                inner.state = WatcherState::Rebuilding;
                let worker = tokio::spawn(drive(self.rebuilder.clone(), self.inner.clone()));
                inner.worker = Some(worker);
                true
            }
        }
    }

    pub fn state(&self) -> WatcherState {
        lock(&self.inner).state
    }

    /// Number of rebuilds that have run to completion.
    pub fn completed_runs(&self) -> u64 {
        lock(&self.inner).completed
    }

    pub fn last_report(&self) -> Option<IngestionReport> {
        lock(&self.inner).last_report.clone()
    }

    /// Wait until no rebuild is running or pending.
    pub async fn wait_idle(&self) {
        loop {
            let worker = lock(&self.inner).worker.take();
            match worker {
                Some(handle) => {
                    if let Err(e) = handle.await {
                        error!(error = %e, "rebuild worker failed");
                    }
                }
                None => break,
            }
        }
    }
}

async fn drive(rebuilder: Arc<dyn Rebuilder>, inner: Arc<Mutex<SchedulerInner>>) {
    loop {
        let run = rebuilder.clone();
        let report = match tokio::spawn(async move { run.rebuild().await }).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "rebuild panicked");
                IngestionReport::failure(format!("Rebuild panicked: {}", e), Vec::new(), Vec::new())
            }
        };

        if report.success {
            info!(chunks = report.chunks, "rebuild finished");
        } else {
            warn!(message = %report.message, "rebuild did not produce a new index");
        }

        let mut state = lock(&inner);
        state.completed += 1;
        state.last_report = Some(report);
        if state.dirty {
            state.dirty = false;
            info!("corpus changed during rebuild, rebuilding again");
            continue;
        }
        state.state = WatcherState::Idle;
        break;
    }
}

/// Watches the corpus directory and requests rebuilds on relevant changes.
pub struct CorpusWatcher {
    watcher: RecommendedWatcher,
    listener: JoinHandle<()>,
    scheduler: Arc<RebuildScheduler>,
}

impl CorpusWatcher {
    pub fn start(source: Arc<DirectorySource>, scheduler: Arc<RebuildScheduler>) -> Result<Self> {
        let root = source.root().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let (tx, mut rx) = mpsc::channel::<ChangeEvent>(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for change in ChangeEvent::from_notify(&event) {
                        // notify calls back on its own thread, outside the runtime
                        if tx.blocking_send(change).is_err() {
                            warn!("watch event channel closed");
                            return;
                        }
                    }
                }
                Err(e) => error!(error = %e, "watch error"),
            }
        })?;

        let mode = if source.is_recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&root, mode)?;
        info!(path = %root.display(), "watching corpus");

        let listener_scheduler = scheduler.clone();
        let listener = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                if !source.is_document_path(&change.path) {
                    continue;
                }
                info!(kind = ?change.kind, path = %change.path.display(), "change detected");
                listener_scheduler.request();
            }
        });

        Ok(Self {
            watcher,
            listener,
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &Arc<RebuildScheduler> {
        &self.scheduler
    }

    /// Stop watching and wait for any in-flight or pending rebuild.
    pub async fn shutdown(self) {
        drop(self.watcher);
        self.listener.abort();
        self.scheduler.wait_idle().await;
        info!("watcher stopped");
    }
}
