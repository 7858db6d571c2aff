use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Per-path debounce window; a new event on the same path replaces the
    /// pending timer.
    pub debounce_ms: u64,
    /// A flush is postponed while the file's mtime is younger than this, so
    /// a slow writer settles before reindexing.
    pub settle_ms: u64,
    /// Interval between embed-pass scans. The next scan is armed after the
    /// previous pass completes, never at a fixed rate.
    pub scan_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            settle_ms: 1_000,
            scan_interval_ms: 60_000,
        }
    }
}

impl WatchConfig {
    pub(crate) fn normalized(&self) -> Self {
        Self {
            debounce_ms: self.debounce_ms.max(1),
            settle_ms: self.settle_ms.max(1),
            scan_interval_ms: self.scan_interval_ms.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Scanning,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchStatus {
    pub state: WatchState,
    pub events_seen: u64,
    pub flushes: u64,
    pub scans: u64,
}

#[derive(Debug)]
pub(crate) struct StatusInner {
    pub(crate) state: Mutex<WatchState>,
    pub(crate) events_seen: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) scans: AtomicU64,
}

impl StatusInner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WatchState::Idle),
            events_seen: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            scans: AtomicU64::new(0),
        })
    }

    pub(crate) fn set_state(&self, state: WatchState) {
        *self.state.lock().expect("watch state lock poisoned") = state;
    }

    pub(crate) fn snapshot(&self) -> WatchStatus {
        WatchStatus {
            state: *self.state.lock().expect("watch state lock poisoned"),
            events_seen: self.events_seen.load(Ordering::SeqCst),
            flushes: self.flushes.load(Ordering::SeqCst),
            scans: self.scans.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch root does not exist: {0}")]
    RootNotFound(String),
    #[error("watch root is not a directory: {0}")]
    RootNotDirectory(String),
    #[error("failed to canonicalize watch root {path}: {source}")]
    CanonicalizeRoot {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to initialize watcher: {0}")]
    WatcherInit(#[from] notify::Error),
    #[error("failed to watch path {path}: {source}")]
    WatchPath { path: String, source: notify::Error },
}

/// Receiver for watch activity. Implementations must log-and-continue; the
/// watcher task never lets an error escape its boundary.
#[async_trait]
pub trait WatchSink: Send + Sync {
    /// A settled change (create or modify) under a collection root.
    async fn path_changed(&self, collection: &str, rel_path: &str);
    /// A path disappeared from a collection root.
    async fn path_removed(&self, collection: &str, rel_path: &str);
    /// Event delivery overflowed or errored; a full reconcile is required.
    async fn rescan(&self);
    /// Periodic back-pressured embed pass.
    async fn embed_pass(&self);
}
