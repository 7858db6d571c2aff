use std::sync::Arc;

use async_trait::async_trait;
use ollama_rs::{generation::embeddings::request::GenerateEmbeddingsRequest, Ollama};
use tracing::debug;

use crate::model::{EmbedError, EmbeddingModel, EmbeddingRuntime, ModelSpec};

/// Default embedding runtime backed by a local Ollama daemon.
pub struct OllamaRuntime {
    client: Ollama,
}

impl OllamaRuntime {
    pub fn new(client: Ollama) -> Self {
        Self { client }
    }
}

impl Default for OllamaRuntime {
    fn default() -> Self {
        Self::new(Ollama::default())
    }
}

#[async_trait]
impl EmbeddingRuntime for OllamaRuntime {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
        let model_name = spec.runtime_name().to_string();

        // Probe with a test embedding: confirms the model is pullable and
        // pins the dimension the vector table must match.
        let request = GenerateEmbeddingsRequest::new(model_name.clone(), "test".to_string().into());
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|error| {
                EmbedError::ModelUnavailable(format!("{}: {error}", spec.display_name()))
            })?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Backend("empty embeddings response".to_string()))?;
        if vector.is_empty() {
            return Err(EmbedError::Backend(format!(
                "model '{model_name}' returned a zero-dimension embedding"
            )));
        }

        debug!(model = %model_name, dimension = vector.len(), "embedding model loaded");

        Ok(Arc::new(OllamaModel {
            client: self.client.clone(),
            name: model_name,
            dimension: vector.len(),
        }))
    }
}

struct OllamaModel {
    client: Ollama,
    name: String,
    dimension: usize,
}

#[async_trait]
impl EmbeddingModel for OllamaModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = GenerateEmbeddingsRequest::new(self.name.clone(), text.to_string().into());
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|error| EmbedError::Backend(error.to_string()))?;

        let mut vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Backend("empty embeddings response".to_string()))?;

        l2_normalize(&mut vector)?;
        Ok(vector)
    }
}

fn l2_normalize(values: &mut [f32]) -> Result<(), EmbedError> {
    let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(EmbedError::Backend(
            "embedding vector norm must be finite and non-zero".to_string(),
        ));
    }

    for value in values {
        *value /= norm;
    }

    Ok(())
}
