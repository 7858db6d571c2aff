use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use tokio::{
    sync::mpsc::UnboundedReceiver,
    time::{sleep_until, Instant},
};
use tracing::debug;

use crate::{
    engine::WatchRoot,
    types::{StatusInner, WatchConfig, WatchSink, WatchState},
};

pub(crate) enum WorkerMessage {
    PathEvent { collection: String, rel_path: String },
    Stop,
}

/// Debounce and scan loop. Each `(collection, rel_path)` key holds a single
/// deadline; a new event replaces it, so bursts coalesce and no timer leaks.
/// The scan deadline re-arms only after the embed pass finishes, which keeps
/// a long pass from overlapping itself.
pub(crate) async fn run_worker(
    config: WatchConfig,
    roots: Vec<WatchRoot>,
    mut rx: UnboundedReceiver<WorkerMessage>,
    rescan_flag: Arc<AtomicBool>,
    status: Arc<StatusInner>,
    sink: Arc<dyn WatchSink>,
) {
    let debounce = Duration::from_millis(config.debounce_ms);
    let settle = Duration::from_millis(config.settle_ms);
    let scan_interval = Duration::from_millis(config.scan_interval_ms);

    let mut pending: HashMap<(String, String), Instant> = HashMap::new();
    let mut next_scan = Instant::now() + scan_interval;

    loop {
        let next_deadline = pending.values().min().copied();
        let wake_at = match next_deadline {
            Some(deadline) => deadline.min(next_scan),
            None => next_scan,
        };

        tokio::select! {
            message = rx.recv() => match message {
                Some(WorkerMessage::PathEvent { collection, rel_path }) => {
                    status.events_seen.fetch_add(1, Ordering::SeqCst);
                    // Replaces any pending deadline for the same key.
                    pending.insert((collection, rel_path), Instant::now() + debounce);
                }
                Some(WorkerMessage::Stop) | None => break,
            },
            _ = sleep_until(wake_at) => {
                let now = Instant::now();

                if rescan_flag.swap(false, Ordering::SeqCst) {
                    pending.clear();
                    sink.rescan().await;
                }

                flush_due(&roots, &mut pending, &status, &sink, now, settle, debounce).await;

                if now >= next_scan {
                    status.set_state(WatchState::Scanning);
                    status.scans.fetch_add(1, Ordering::SeqCst);
                    sink.embed_pass().await;
                    status.set_state(WatchState::Watching);
                    // Re-armed after the pass completes, not at a fixed rate.
                    next_scan = Instant::now() + scan_interval;
                }
            }
        }
    }

    debug!("watch worker stopped");
}

#[allow(clippy::too_many_arguments)]
async fn flush_due(
    roots: &[WatchRoot],
    pending: &mut HashMap<(String, String), Instant>,
    status: &Arc<StatusInner>,
    sink: &Arc<dyn WatchSink>,
    now: Instant,
    settle: Duration,
    debounce: Duration,
) {
    let due: Vec<(String, String)> = pending
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(key, _)| key.clone())
        .collect();

    for key in due {
        let (collection, rel_path) = &key;
        let abs_path = roots
            .iter()
            .find(|root| &root.collection == collection)
            .map(|root| root.path.join(rel_path));

        let exists = abs_path.as_deref().map(Path::exists).unwrap_or(false);

        if exists {
            // Write-settle: a file still being written pushes its own
            // deadline out instead of flushing half a write.
            if let Some(abs_path) = &abs_path {
                if modified_within(abs_path, settle) {
                    pending.insert(key, Instant::now() + debounce);
                    continue;
                }
            }
        }

        pending.remove(&key);
        status.flushes.fetch_add(1, Ordering::SeqCst);
        if exists {
            sink.path_changed(collection, rel_path).await;
        } else {
            sink.path_removed(collection, rel_path).await;
        }
    }
}

fn modified_within(path: &Path, window: Duration) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age < window)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::PathBuf,
        sync::{Arc, Mutex},
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use async_trait::async_trait;

    use crate::{
        start_watch,
        types::{WatchConfig, WatchSink, WatchState},
        WatchRoot,
    };

    #[derive(Default)]
    struct RecordingSink {
        changed: Mutex<Vec<(String, String)>>,
        removed: Mutex<Vec<(String, String)>>,
        embed_passes: Mutex<usize>,
    }

    #[async_trait]
    impl WatchSink for RecordingSink {
        async fn path_changed(&self, collection: &str, rel_path: &str) {
            self.changed
                .lock()
                .expect("lock poisoned")
                .push((collection.to_string(), rel_path.to_string()));
        }

        async fn path_removed(&self, collection: &str, rel_path: &str) {
            self.removed
                .lock()
                .expect("lock poisoned")
                .push((collection.to_string(), rel_path.to_string()));
        }

        async fn rescan(&self) {}

        async fn embed_pass(&self) {
            *self.embed_passes.lock().expect("lock poisoned") += 1;
        }
    }

    fn temp_root(prefix: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or_default();
        dir.push(format!("{prefix}-{nanos}"));
        fs::create_dir_all(&dir).expect("temp root should be created");
        dir
    }

    fn fast_config() -> WatchConfig {
        WatchConfig {
            debounce_ms: 50,
            settle_ms: 1,
            scan_interval_ms: 150,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn change_events_are_debounced_and_delivered_relative() {
        let root = temp_root("watch-change");
        let sink = Arc::new(RecordingSink::default());
        let mut handle = start_watch(
            vec![WatchRoot {
                collection: "notes".to_string(),
                path: root.clone(),
            }],
            fast_config(),
            Arc::clone(&sink) as Arc<dyn WatchSink>,
        )
        .await
        .expect("watch should start");

        fs::write(root.join("note.md"), "# note").expect("file should be written");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        while std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let changed = sink.changed.lock().expect("lock poisoned").clone();
            if changed
                .iter()
                .any(|(collection, rel)| collection == "notes" && rel == "note.md")
            {
                seen = true;
                break;
            }
        }

        handle.stop().await;
        let _ = fs::remove_dir_all(&root);
        assert!(seen, "should observe notes/note.md change");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scan_loop_runs_embed_passes_until_stopped() {
        let root = temp_root("watch-scan");
        let sink = Arc::new(RecordingSink::default());
        let mut handle = start_watch(
            vec![WatchRoot {
                collection: "notes".to_string(),
                path: root.clone(),
            }],
            fast_config(),
            Arc::clone(&sink) as Arc<dyn WatchSink>,
        )
        .await
        .expect("watch should start");

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.stop().await;

        let passes = *sink.embed_passes.lock().expect("lock poisoned");
        assert!(passes >= 1, "expected at least one embed pass, got {passes}");
        assert_eq!(handle.status().state, WatchState::Stopped);

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_is_idempotent_and_cancels_pending_work() {
        let root = temp_root("watch-stop");
        let sink = Arc::new(RecordingSink::default());
        let mut handle = start_watch(
            vec![WatchRoot {
                collection: "notes".to_string(),
                path: root.clone(),
            }],
            WatchConfig {
                debounce_ms: 5_000,
                ..fast_config()
            },
            Arc::clone(&sink) as Arc<dyn WatchSink>,
        )
        .await
        .expect("watch should start");

        fs::write(root.join("pending.md"), "never flushed").expect("file should be written");
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.stop().await;
        handle.stop().await;

        assert!(sink.changed.lock().expect("lock poisoned").is_empty());
        let _ = fs::remove_dir_all(&root);
    }
}
