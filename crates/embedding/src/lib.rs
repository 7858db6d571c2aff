//! Embedding and rerank model lifecycle: lazy single-flight loading with a
//! timeout, the bit-reproducible text formatting contract, sequential batch
//! embedding, and the Ollama-backed default runtime.

mod embedder;
mod format;
mod model;
mod ollama;
mod single_flight;

pub use embedder::{Embedder, EmbedderConfig};
pub use format::{format_document, format_query};
pub use model::{
    EmbedError, EmbeddingModel, EmbeddingRuntime, ModelSpec, RerankModel, RerankRuntime,
};
pub use ollama::OllamaRuntime;
