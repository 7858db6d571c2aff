use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use embedding::{EmbedError, EmbeddingModel, EmbeddingRuntime, ModelSpec};

use crate::{config::MemoirConfig, engine::Engine, memoir::Memoir, EngineConfig};

pub(crate) const TEST_DIMENSION: usize = 4;

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

/// Deterministic embedding runtime so tests never need a live model daemon.
pub(crate) struct StubRuntime;

struct StubModel;

#[async_trait]
impl EmbeddingModel for StubModel {
    fn name(&self) -> &str {
        "stub-model"
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; TEST_DIMENSION];
        for (index, byte) in text.bytes().enumerate() {
            vector[index % TEST_DIMENSION] += byte as f32 / 255.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        for value in &mut vector {
            *value /= norm;
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingRuntime for StubRuntime {
    async fn load(&self, _spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
        Ok(Arc::new(StubModel))
    }
}

pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) engine: Arc<Engine>,
}

impl Harness {
    pub(crate) async fn new(prefix: &str) -> Self {
        let dir = TempDir::new(prefix);
        let engine = Arc::new(Engine::with_runtimes(
            EngineConfig {
                data_dir: dir.path().join("data"),
                embedding_model: "stub-model".to_string(),
                dimension: TEST_DIMENSION,
                ..EngineConfig::default()
            },
            Arc::new(StubRuntime),
            None,
        ));
        engine.initialize().await.expect("initialize failed");

        Self { dir, engine }
    }

    pub(crate) async fn memoir(&self) -> Memoir {
        Memoir::attach(
            Arc::clone(&self.engine),
            MemoirConfig::new(self.dir.path().join("memory")),
        )
        .await
        .expect("memoir attach failed")
    }

    pub(crate) fn collection_with_files(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.dir.path().join(name);
        fs::create_dir_all(&root).expect("failed to create collection root");
        for (rel_path, content) in files {
            let abs = root.join(rel_path);
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent).expect("failed to create parent");
            }
            fs::write(abs, content).expect("failed to write file");
        }
        root
    }
}
