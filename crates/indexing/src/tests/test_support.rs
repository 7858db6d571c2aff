use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use doc_store::{Collection, Store, StoreConfig};

pub(crate) struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub(crate) fn new(prefix: &str) -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("{prefix}-{}", unique_id()));
        fs::create_dir_all(&path).expect("failed to create temp dir");
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn unique_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock error")
        .as_nanos()
}

pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) store: Arc<Store>,
}

impl Harness {
    pub(crate) fn new(prefix: &str) -> Self {
        let dir = TempDir::new(prefix);
        let store = Store::open(StoreConfig {
            data_dir: dir.path().join("data"),
            dimension: 4,
        })
        .expect("failed to open store");

        Self {
            dir,
            store: Arc::new(store),
        }
    }

    /// Create a collection directory, write the given `(rel_path, content)`
    /// files into it, and register it with the store.
    pub(crate) fn collection_with_files(
        &self,
        name: &str,
        files: &[(&str, &str)],
    ) -> Collection {
        let root = self.dir.path().join(name);
        fs::create_dir_all(&root).expect("failed to create collection root");
        for (rel_path, content) in files {
            self.write_file(name, rel_path, content);
        }

        self.store
            .add_collection(name, &root, None)
            .expect("failed to add collection")
    }

    pub(crate) fn write_file(&self, collection: &str, rel_path: &str, content: &str) {
        let abs = self.dir.path().join(collection).join(rel_path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        fs::write(abs, content).expect("failed to write file");
    }

    pub(crate) fn remove_file(&self, collection: &str, rel_path: &str) {
        let abs = self.dir.path().join(collection).join(rel_path);
        fs::remove_file(abs).expect("failed to remove file");
    }
}
