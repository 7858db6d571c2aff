use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key write serialization: writers on the same key queue in arrival
/// order, writers on different keys proceed independently. Entries are
/// removed once the last holder releases them, so the map never grows past
/// the set of in-flight keys.
#[derive(Default)]
pub(crate) struct KeyedLock {
    entries: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

pub(crate) struct KeyedGuard {
    key: String,
    entries: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLock {
    pub(crate) async fn acquire(&self, key: &str) -> KeyedGuard {
        let entry = {
            let mut entries = self.entries.lock().expect("keyed lock map poisoned");
            Arc::clone(
                entries
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = entry.lock_owned().await;

        KeyedGuard {
            key: key.to_string(),
            entries: Arc::clone(&self.entries),
            _guard: guard,
        }
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().expect("keyed lock map poisoned");
        if let Some(entry) = entries.get(&self.key) {
            // Map + this guard's Arc are the only holders left: no waiter.
            if Arc::strong_count(entry) <= 2 {
                entries.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::KeyedLock;

    #[tokio::test]
    async fn writers_on_one_key_are_totally_ordered() {
        let lock = Arc::new(KeyedLock::default());
        let running = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = Arc::clone(&lock);
            let running = Arc::clone(&running);
            let max_concurrent = Arc::clone(&max_concurrent);
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("same-key").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let lock = Arc::new(KeyedLock::default());
        let _a = lock.acquire("a").await;

        // Must complete immediately while "a" is still held.
        let done = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            lock.acquire("b"),
        )
        .await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_removed_from_the_map() {
        let lock = KeyedLock::default();
        {
            let _guard = lock.acquire("transient").await;
        }
        let entries = lock.entries.lock().expect("lock poisoned");
        assert!(entries.is_empty());
    }
}
