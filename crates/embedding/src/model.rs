use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the model lifecycle. Clone-able so a failed load can
/// be observed by every caller sharing the in-flight future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("model load timed out after {0:?}")]
    LoadTimeout(Duration),
    #[error("embedding context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("embedding backend error: {0}")]
    Backend(String),
}

/// How a model is referenced: a bare runtime name, or a `hf:owner/repo/file`
/// URI a resolver can fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSpec {
    Name(String),
    HuggingFace {
        owner: String,
        repo: String,
        file: String,
    },
}

impl ModelSpec {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("hf:") {
            let mut parts = rest.splitn(3, '/');
            if let (Some(owner), Some(repo), Some(file)) =
                (parts.next(), parts.next(), parts.next())
            {
                if !owner.is_empty() && !repo.is_empty() && !file.is_empty() {
                    return Self::HuggingFace {
                        owner: owner.to_string(),
                        repo: repo.to_string(),
                        file: file.to_string(),
                    };
                }
            }
        }

        Self::Name(raw.to_string())
    }

    /// The name handed to a runtime: the bare name, or the URI's file stem.
    pub fn runtime_name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::HuggingFace { file, .. } => {
                file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::HuggingFace { owner, repo, file } => format!("hf:{owner}/{repo}/{file}"),
        }
    }
}

/// Resolver that turns a model spec into a live embedding context.
#[async_trait]
pub trait EmbeddingRuntime: Send + Sync {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, EmbedError>;
}

/// A loaded embedding context. Callers must serialize context calls; the
/// underlying runtimes are not safe for concurrent use of a single context.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Resolver for cross-encoder rerank models.
#[async_trait]
pub trait RerankRuntime: Send + Sync {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn RerankModel>, EmbedError>;
}

/// A loaded cross-encoder: scores each document against the query.
#[async_trait]
pub trait RerankModel: Send + Sync {
    fn name(&self) -> &str;
    async fn rank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EmbedError>;
}
