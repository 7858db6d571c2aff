use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use doc_store::Store;
use embedding::RerankModel;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, warn};

/// Which retrieval source produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Bm25,
    Vec,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub collection: String,
    pub path: String,
    pub title: String,
    pub score: f64,
    pub source: SearchSource,
    pub content_hash: String,
    /// Plain-text preview truncated to the configured byte budget.
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub collection: Option<String>,
    pub limit: usize,
    pub min_score: f64,
    pub preview_bytes: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            collection: None,
            limit: 10,
            min_score: 0.0,
            preview_bytes: 500,
        }
    }
}

/// Async scorer supplied by the caller; receives the query and candidate
/// bodies, returns one score per candidate.
pub type RerankCallback =
    Arc<dyn Fn(String, Vec<String>) -> BoxFuture<'static, Result<Vec<f32>>> + Send + Sync>;

/// Everything the hybrid pipeline may use beyond the lexical index.
#[derive(Clone, Default)]
pub struct HybridContext {
    pub query_embedding: Option<Vec<f32>>,
    pub reranker: Option<Arc<dyn RerankModel>>,
    pub rerank_callback: Option<RerankCallback>,
    pub rrf_k: Option<f64>,
    pub weight_bm25: Option<f64>,
    pub weight_vec: Option<f64>,
}

const DEFAULT_RRF_K: f64 = 60.0;
/// Both retrieval arms and the rerank stage over-fetch by this factor.
const OVERFETCH: usize = 4;
const CALLBACK_RRF_WEIGHT: f64 = 0.4;
const CALLBACK_RERANK_WEIGHT: f64 = 0.6;
const KEYWORD_ORIGINAL_WEIGHT: f64 = 0.3;
const KEYWORD_MATCH_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone)]
struct Candidate {
    collection: String,
    path: String,
    title: String,
    content_hash: String,
    score: f64,
}

/// BM25-only query.
pub async fn lexical_search(
    store: &Arc<Store>,
    query: &str,
    opts: &QueryOptions,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let hits = {
        let store = Arc::clone(store);
        let query = query.to_string();
        let collection = opts.collection.clone();
        let limit = opts.limit;
        tokio::task::spawn_blocking(move || store.bm25_search(&query, collection.as_deref(), limit))
            .await
            .context("BM25 task failed")??
    };

    let candidates = hits
        .into_iter()
        .map(|hit| Candidate {
            collection: hit.collection,
            path: hit.path,
            title: hit.title,
            content_hash: hit.content_hash,
            score: hit.score,
        })
        .collect();

    finalize(store, candidates, SearchSource::Bm25, opts).await
}

/// ANN-only query over a caller-supplied embedding.
pub async fn vector_only_search(
    store: &Arc<Store>,
    embedding: Vec<f32>,
    opts: &QueryOptions,
) -> Result<Vec<SearchResult>> {
    let hits = {
        let store = Arc::clone(store);
        let collection = opts.collection.clone();
        let limit = opts.limit;
        tokio::task::spawn_blocking(move || {
            store.vector_search(&embedding, collection.as_deref(), limit)
        })
        .await
        .context("vector task failed")??
    };

    let candidates = hits
        .into_iter()
        .map(|hit| Candidate {
            collection: hit.collection,
            path: hit.path,
            title: hit.title,
            content_hash: hit.content_hash,
            score: hit.score,
        })
        .collect();

    finalize(store, candidates, SearchSource::Vec, opts).await
}

/// Full hybrid pipeline: parallel BM25 + ANN, reciprocal-rank fusion, then
/// the first applicable rerank strategy (cross-encoder, external callback,
/// query-embedding cosine, keyword overlap).
pub async fn hybrid_search(
    store: &Arc<Store>,
    query: &str,
    ctx: &HybridContext,
    opts: &QueryOptions,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let overfetch = opts.limit * OVERFETCH;

    let bm25_task = {
        let store = Arc::clone(store);
        let query = query.to_string();
        let collection = opts.collection.clone();
        tokio::task::spawn_blocking(move || {
            store.bm25_search(&query, collection.as_deref(), overfetch)
        })
    };
    let vec_task = {
        let store = Arc::clone(store);
        let embedding = ctx.query_embedding.clone();
        let collection = opts.collection.clone();
        tokio::task::spawn_blocking(move || match embedding {
            Some(embedding) => store.vector_search(&embedding, collection.as_deref(), overfetch),
            None => Ok(Vec::new()),
        })
    };

    let (bm25_hits, vec_hits) = tokio::join!(bm25_task, vec_task);
    let bm25_hits = bm25_hits.context("BM25 task failed")??;
    // ANN failures never propagate; the pipeline degrades to lexical-only.
    let vec_hits = match vec_hits.context("vector task failed")? {
        Ok(hits) => hits,
        Err(error) => {
            warn!(%error, "vector retrieval failed, continuing with BM25 only");
            Vec::new()
        }
    };

    // One-sided retrieval needs no fusion.
    if vec_hits.is_empty() && !bm25_hits.is_empty() {
        let candidates = bm25_hits
            .into_iter()
            .take(opts.limit)
            .map(|hit| Candidate {
                collection: hit.collection,
                path: hit.path,
                title: hit.title,
                content_hash: hit.content_hash,
                score: hit.score,
            })
            .collect();
        return finalize(store, candidates, SearchSource::Bm25, opts).await;
    }
    if bm25_hits.is_empty() && !vec_hits.is_empty() {
        let candidates = vec_hits
            .into_iter()
            .take(opts.limit)
            .map(|hit| Candidate {
                collection: hit.collection,
                path: hit.path,
                title: hit.title,
                content_hash: hit.content_hash,
                score: hit.score,
            })
            .collect();
        return finalize(store, candidates, SearchSource::Vec, opts).await;
    }
    if bm25_hits.is_empty() && vec_hits.is_empty() {
        return Ok(Vec::new());
    }

    let rrf_k = ctx.rrf_k.unwrap_or(DEFAULT_RRF_K);
    let weight_bm25 = ctx.weight_bm25.unwrap_or(1.0);
    let weight_vec = ctx.weight_vec.unwrap_or(1.0);

    let mut fused: HashMap<(String, String), Candidate> = HashMap::new();
    let mut accumulate = |rank: usize,
                          weight: f64,
                          collection: String,
                          path: String,
                          title: String,
                          content_hash: String| {
        let rrf = weight / (rrf_k + (rank + 1) as f64);
        fused
            .entry((collection.clone(), path.clone()))
            .and_modify(|candidate| candidate.score += rrf)
            .or_insert(Candidate {
                collection,
                path,
                title,
                content_hash,
                score: rrf,
            });
    };

    for (rank, hit) in bm25_hits.into_iter().enumerate() {
        accumulate(
            rank,
            weight_bm25,
            hit.collection,
            hit.path,
            hit.title,
            hit.content_hash,
        );
    }
    for (rank, hit) in vec_hits.into_iter().enumerate() {
        accumulate(
            rank,
            weight_vec,
            hit.collection,
            hit.path,
            hit.title,
            hit.content_hash,
        );
    }

    let mut candidates: Vec<Candidate> = fused.into_values().collect();
    sort_by_score(&mut candidates);

    // Normalize so the top fused result scores 1.0.
    if let Some(max) = candidates.first().map(|candidate| candidate.score) {
        if max > 0.0 {
            for candidate in &mut candidates {
                candidate.score /= max;
            }
        }
    }

    candidates.truncate(opts.limit * OVERFETCH);
    let candidates = rerank(store, query, ctx, candidates).await?;

    finalize(store, candidates, SearchSource::Hybrid, opts).await
}

async fn rerank(
    store: &Arc<Store>,
    query: &str,
    ctx: &HybridContext,
    mut candidates: Vec<Candidate>,
) -> Result<Vec<Candidate>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let bodies = fetch_bodies(store, &candidates).await?;

    if let Some(reranker) = &ctx.reranker {
        match reranker.rank(query, &bodies).await {
            Ok(scores) if scores.len() == candidates.len() => {
                for (candidate, score) in candidates.iter_mut().zip(scores) {
                    candidate.score = score as f64;
                }
                sort_by_score(&mut candidates);
                return Ok(candidates);
            }
            Ok(scores) => {
                warn!(
                    expected = candidates.len(),
                    got = scores.len(),
                    "reranker returned wrong score count, keeping fused order"
                );
                return Ok(candidates);
            }
            Err(error) => {
                warn!(%error, "cross-encoder rerank failed, keeping fused order");
                return Ok(candidates);
            }
        }
    }

    if let Some(callback) = &ctx.rerank_callback {
        match callback(query.to_string(), bodies.clone()).await {
            Ok(scores) if scores.len() == candidates.len() => {
                for (candidate, score) in candidates.iter_mut().zip(scores) {
                    candidate.score = CALLBACK_RRF_WEIGHT * candidate.score
                        + CALLBACK_RERANK_WEIGHT * score as f64;
                }
                sort_by_score(&mut candidates);
                return Ok(candidates);
            }
            Ok(_) | Err(_) => {
                debug!("external rerank callback unusable, keeping fused order");
                return Ok(candidates);
            }
        }
    }

    if let Some(query_embedding) = &ctx.query_embedding {
        let vectors = {
            let store = Arc::clone(store);
            let hashes: Vec<String> = candidates
                .iter()
                .map(|candidate| candidate.content_hash.clone())
                .collect();
            tokio::task::spawn_blocking(move || {
                hashes
                    .iter()
                    .map(|hash| store.seq0_vector(hash).unwrap_or(None))
                    .collect::<Vec<Option<Vec<f32>>>>()
            })
            .await
            .context("vector fetch task failed")?
        };

        // Cosine scores and fused scores are not comparable, so this
        // strategy only applies when every candidate has a stored vector;
        // partial coverage falls through to the keyword rerank.
        if vectors.iter().all(Option::is_some) {
            for (candidate, vector) in candidates.iter_mut().zip(vectors) {
                if let Some(vector) = vector {
                    candidate.score = cosine_similarity(query_embedding, &vector);
                }
            }
            sort_by_score(&mut candidates);
            return Ok(candidates);
        }
        debug!("candidates missing stored vectors, using keyword rerank");
    }

    keyword_rerank(query, &mut candidates, &bodies);
    sort_by_score(&mut candidates);
    Ok(candidates)
}

/// Lexical fallback rerank: per-term occurrence counting over title + body
/// with a token-boundary bonus, blended against the fused score.
fn keyword_rerank(query: &str, candidates: &mut [Candidate], bodies: &[String]) {
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|term| term.len() > 1)
        .map(|term| term.to_string())
        .collect();
    if terms.is_empty() {
        return;
    }

    for (candidate, body) in candidates.iter_mut().zip(bodies) {
        let haystack = format!("{} {}", candidate.title, body).to_lowercase();
        let mut matches = 0.0f64;
        for term in &terms {
            let occurrences = haystack.matches(term.as_str()).count();
            matches += occurrences as f64;
            if occurrences > 0 && has_token_boundary_match(&haystack, term) {
                matches += 0.5;
            }
        }

        candidate.score = KEYWORD_ORIGINAL_WEIGHT * candidate.score
            + KEYWORD_MATCH_WEIGHT * (matches / terms.len() as f64);
    }
}

fn has_token_boundary_match(haystack: &str, term: &str) -> bool {
    let mut start = 0;
    while let Some(found) = haystack[start..].find(term) {
        let begin = start + found;
        let end = begin + term.len();
        let before_ok = begin == 0
            || haystack[..begin]
                .chars()
                .next_back()
                .map(|ch| !ch.is_alphanumeric())
                .unwrap_or(true);
        let after_ok = end >= haystack.len()
            || haystack[end..]
                .chars()
                .next()
                .map(|ch| !ch.is_alphanumeric())
                .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        start = begin + term.len().max(1);
    }
    false
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Apply limit/min-score and attach plain-text previews.
async fn finalize(
    store: &Arc<Store>,
    mut candidates: Vec<Candidate>,
    source: SearchSource,
    opts: &QueryOptions,
) -> Result<Vec<SearchResult>> {
    sort_by_score(&mut candidates);
    candidates.truncate(opts.limit);
    candidates.retain(|candidate| candidate.score >= opts.min_score);

    let bodies = fetch_bodies(store, &candidates).await?;

    Ok(candidates
        .into_iter()
        .zip(bodies)
        .map(|(candidate, body)| {
            let preview = note::truncate_preview(
                &note::format_preview_text(&body),
                opts.preview_bytes,
            );
            SearchResult {
                collection: candidate.collection,
                path: candidate.path,
                title: candidate.title,
                score: candidate.score,
                source,
                content_hash: candidate.content_hash,
                content: if preview.is_empty() {
                    None
                } else {
                    Some(preview)
                },
            }
        })
        .collect())
}

async fn fetch_bodies(store: &Arc<Store>, candidates: &[Candidate]) -> Result<Vec<String>> {
    let store = Arc::clone(store);
    let hashes: Vec<String> = candidates
        .iter()
        .map(|candidate| candidate.content_hash.clone())
        .collect();

    tokio::task::spawn_blocking(move || {
        hashes
            .iter()
            .map(|hash| {
                store
                    .content_for_hash(hash)
                    .ok()
                    .flatten()
                    .map(|(_, body)| body)
                    .unwrap_or_default()
            })
            .collect()
    })
    .await
    .context("content fetch task failed")
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, has_token_boundary_match, keyword_rerank, Candidate};

    fn candidate(path: &str, score: f64) -> Candidate {
        Candidate {
            collection: "notes".to_string(),
            path: path.to_string(),
            title: path.trim_end_matches(".md").to_string(),
            content_hash: format!("hash-{path}"),
            score,
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn token_boundary_detection() {
        assert!(has_token_boundary_match("the rust book", "rust"));
        assert!(!has_token_boundary_match("trusty tools", "rust"));
        assert!(has_token_boundary_match("rust", "rust"));
    }

    #[test]
    fn keyword_rerank_prefers_matching_candidates() {
        let mut candidates = vec![candidate("a.md", 0.5), candidate("b.md", 0.5)];
        let bodies = vec![
            "this mentions quantum twice: quantum".to_string(),
            "nothing relevant here".to_string(),
        ];

        keyword_rerank("quantum", &mut candidates, &bodies);

        assert!(candidates[0].score > candidates[1].score);
        // 0.3 * 0.5 + 0.7 * (2 occurrences + 0.5 boundary bonus) / 1 term
        assert!((candidates[0].score - (0.15 + 0.7 * 2.5)).abs() < 1e-9);
    }

    #[test]
    fn keyword_rerank_ignores_single_char_terms() {
        let mut candidates = vec![candidate("a.md", 0.8)];
        let bodies = vec!["a b c".to_string()];

        keyword_rerank("a b c", &mut candidates, &bodies);

        // No terms longer than one char, scores untouched.
        assert_eq!(candidates[0].score, 0.8);
    }
}
