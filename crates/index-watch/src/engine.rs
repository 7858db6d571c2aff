use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::warn;

use crate::{
    types::{StatusInner, WatchConfig, WatchError, WatchSink, WatchState, WatchStatus},
    worker::{run_worker, WorkerMessage},
};

/// One collection root to subscribe to.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    pub collection: String,
    pub path: PathBuf,
}

pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    worker_tx: Option<UnboundedSender<WorkerMessage>>,
    worker_task: Option<tokio::task::JoinHandle<()>>,
    status: Arc<StatusInner>,
    stopped: bool,
}

impl WatchHandle {
    pub fn status(&self) -> WatchStatus {
        self.status.snapshot()
    }

    /// Cancel all pending debounce timers and the scheduled scan, then wait
    /// for the worker to exit. Idempotent.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.watcher.take();
        if let Some(tx) = self.worker_tx.take() {
            let _ = tx.send(WorkerMessage::Stop);
        }
        if let Some(task) = self.worker_task.take() {
            let _ = task.await;
        }

        self.status.set_state(WatchState::Stopped);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        // Dropping the notify watcher and the channel sender is enough for
        // the worker to wind down on its own.
        self.watcher.take();
        self.worker_tx.take();
        if let Some(task) = self.worker_task.take() {
            task.abort();
        }
        self.status.set_state(WatchState::Stopped);
    }
}

/// Subscribe to every collection root and spawn the debounce/scan worker.
pub async fn start_watch(
    roots: Vec<WatchRoot>,
    config: WatchConfig,
    sink: Arc<dyn WatchSink>,
) -> Result<WatchHandle, WatchError> {
    let config = config.normalized();

    let mut canonical_roots = Vec::with_capacity(roots.len());
    for root in roots {
        canonical_roots.push(WatchRoot {
            collection: root.collection,
            path: canonicalize_root(&root.path)?,
        });
    }

    let (worker_tx, worker_rx) = mpsc::unbounded_channel();
    let rescan_flag = Arc::new(AtomicBool::new(false));
    let status = StatusInner::new();

    let worker_task = tokio::spawn(run_worker(
        config,
        canonical_roots.clone(),
        worker_rx,
        Arc::clone(&rescan_flag),
        Arc::clone(&status),
        sink,
    ));

    let callback_tx = worker_tx.clone();
    let callback_roots = canonical_roots.clone();
    let callback_rescan = Arc::clone(&rescan_flag);
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<notify::Event, notify::Error>| match result {
            Ok(event) => {
                for (collection, rel_path) in map_event_paths(&callback_roots, &event) {
                    if callback_tx
                        .send(WorkerMessage::PathEvent {
                            collection,
                            rel_path,
                        })
                        .is_err()
                    {
                        callback_rescan.store(true, Ordering::SeqCst);
                    }
                }
            }
            Err(error) => {
                warn!(%error, "watch event error, scheduling rescan");
                callback_rescan.store(true, Ordering::SeqCst);
            }
        },
        Config::default(),
    )?;

    for root in &canonical_roots {
        if let Err(source) = watcher.watch(&root.path, RecursiveMode::Recursive) {
            let _ = worker_tx.send(WorkerMessage::Stop);
            return Err(WatchError::WatchPath {
                path: root.path.display().to_string(),
                source,
            });
        }
    }

    status.set_state(WatchState::Watching);

    Ok(WatchHandle {
        watcher: Some(watcher),
        worker_tx: Some(worker_tx),
        worker_task: Some(worker_task),
        status,
        stopped: false,
    })
}

/// Resolve an event's paths to `(collection, rel_path)` pairs, keeping only
/// Markdown files under a watched root.
fn map_event_paths(roots: &[WatchRoot], event: &notify::Event) -> Vec<(String, String)> {
    let mut mapped = Vec::new();
    for path in &event.paths {
        if !is_markdown(path) {
            continue;
        }
        for root in roots {
            if let Ok(rel) = path.strip_prefix(&root.path) {
                mapped.push((
                    root.collection.clone(),
                    rel.to_string_lossy().replace('\\', "/"),
                ));
                break;
            }
        }
    }
    mapped
}

fn is_markdown(path: &Path) -> bool {
    matches!(path.extension().and_then(OsStr::to_str), Some(ext) if ext.eq_ignore_ascii_case("md"))
}

fn canonicalize_root(root: &Path) -> Result<PathBuf, WatchError> {
    if !root.exists() {
        return Err(WatchError::RootNotFound(root.display().to_string()));
    }
    if !root.is_dir() {
        return Err(WatchError::RootNotDirectory(root.display().to_string()));
    }

    std::fs::canonicalize(root).map_err(|source| WatchError::CanonicalizeRoot {
        path: root.display().to_string(),
        source,
    })
}
