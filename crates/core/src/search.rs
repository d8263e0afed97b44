//! The pure hybrid-search algorithm: keyword, semantic, and hybrid
//! candidate fusion over a [`Store`] backend.
//!
//! This module has no knowledge of query rewriting, HyDE, reranking, or
//! caching — those live in the retrieval engine in the application
//! crate, which calls [`search`] as its candidate-generation step for
//! the `semantic`/`keyword`/`hybrid` modes.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `candidate_k_keyword` keyword candidates (BM25 rank).
//! 2. Fetch `candidate_k_vector` vector candidates (cosine similarity).
//! 3. Min-max normalize both sets to `[0, 1]`.
//! 4. Merge: `score = (1 - α) × keyword + α × semantic`.
//! 5. Sort by score (desc), then `updated_at` (desc), then `chunk_id` (asc).
//! 6. Truncate to `final_limit`.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashMap;

use crate::store::{ChunkCandidate, Filter, Store};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Weight for semantic vs keyword: `hybrid = (1-α)*keyword + α*semantic`.
    pub hybrid_alpha: f64,
    pub candidate_k_keyword: i64,
    pub candidate_k_vector: i64,
    pub final_limit: i64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.7,
            candidate_k_keyword: 30,
            candidate_k_vector: 30,
            final_limit: 10,
        }
    }
}

/// Bundles all inputs for one candidate-generation call.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding; required for `semantic`/`hybrid`.
    pub query_vec: Option<&'a [f32]>,
    /// `"keyword"`, `"semantic"`, or `"hybrid"`.
    pub mode: &'a str,
    pub filter: Option<&'a Filter>,
    pub params: SearchParams,
    pub explain: bool,
}

/// A single search result at chunk granularity.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub section: String,
    pub chunk_index: i64,
    /// Relevance score in `[0.0, 1.0]`.
    pub score: f64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// Scoring breakdown for a search result, populated when `explain` is set.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreExplanation {
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub alpha: f64,
    pub keyword_candidates: usize,
    pub vector_candidates: usize,
}

/// Run keyword, semantic, or hybrid search against a [`Store`] backend.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<SearchResultItem>> {
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    match req.mode {
        "keyword" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            req.mode
        ),
    }

    let keyword_candidates = if req.mode == "keyword" || req.mode == "hybrid" {
        store
            .bm25_search(req.query, req.params.candidate_k_keyword, req.filter)
            .await?
    } else {
        Vec::new()
    };

    let vector_candidates = if req.mode == "semantic" || req.mode == "hybrid" {
        match req.query_vec {
            Some(qv) => {
                store
                    .vector_search(qv, req.params.candidate_k_vector, req.filter)
                    .await?
            }
            None => bail!("query_vec is required for semantic/hybrid mode"),
        }
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let norm_keyword = normalize_scores(&keyword_candidates);
    let norm_vector = normalize_scores(&vector_candidates);

    let kw_map: HashMap<&str, f64> = norm_keyword.iter().map(|(c, s)| (c.chunk_id.as_str(), *s)).collect();
    let vec_map: HashMap<&str, f64> = norm_vector.iter().map(|(c, s)| (c.chunk_id.as_str(), *s)).collect();

    let mut all_chunks: HashMap<String, &ChunkCandidate> = HashMap::new();
    for c in keyword_candidates.iter().chain(vector_candidates.iter()) {
        all_chunks.entry(c.chunk_id.clone()).or_insert(c);
    }

    let effective_alpha = match req.mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => req.params.hybrid_alpha,
    };

    let kw_count = keyword_candidates.len();
    let vec_count = vector_candidates.len();

    let mut results: Vec<SearchResultItem> = all_chunks
        .values()
        .map(|cand| {
            let k = kw_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            let v = vec_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            let score = (1.0 - effective_alpha) * k + effective_alpha * v;
            let explain = req.explain.then(|| ScoreExplanation {
                keyword_score: k,
                semantic_score: v,
                alpha: effective_alpha,
                keyword_candidates: kw_count,
                vector_candidates: vec_count,
            });
            SearchResultItem {
                chunk_id: cand.chunk_id.clone(),
                text: cand.snippet.clone(),
                source: cand.source.clone(),
                section: cand.section.clone(),
                chunk_index: cand.chunk_index,
                score,
                updated_at: cand.updated_at,
                explain,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });

    results.truncate(req.params.final_limit as usize);
    Ok(results)
}

/// Min-max normalize raw scores to `[0.0, 1.0]`. Equal scores normalize to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates.iter().map(|c| c.raw_score).fold(f64::INFINITY, f64::min);
    let s_max = candidates.iter().map(|c| c.raw_score).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Deduplicate results by the `(source, chunk_index)` fingerprint,
/// keeping the first (highest-scoring, given pre-sorted input) occurrence.
pub fn dedup_by_fingerprint(results: Vec<SearchResultItem>) -> Vec<SearchResultItem> {
    let mut seen = std::collections::HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert((r.source.clone(), r.chunk_index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::models::{Chunk, DocumentType};
    use std::collections::BTreeSet;

    fn chunk(id: &str, source: &str, idx: i64, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            section: "S".into(),
            doc_type: DocumentType::Documentation,
            tags: BTreeSet::new(),
            chunk_index: idx,
            total_chunks: 1,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_query_returns_no_results() {
        let store = InMemoryStore::new();
        let req = SearchRequest {
            query: "   ",
            query_vec: None,
            mode: "keyword",
            filter: None,
            params: SearchParams::default(),
            explain: false,
        };
        let results = search(&store, &req).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn hybrid_alpha_zero_equals_keyword_ordering() {
        let store = InMemoryStore::new();
        store.upsert(&chunk("c1", "d1", 0, "rust rust rust ocean"), &[0.1, 0.0]).await.unwrap();
        store.upsert(&chunk("c2", "d2", 0, "rust ocean"), &[0.9, 0.1]).await.unwrap();

        let params = SearchParams { hybrid_alpha: 0.0, ..SearchParams::default() };
        let keyword_req = SearchRequest {
            query: "rust",
            query_vec: Some(&[1.0, 0.0]),
            mode: "keyword",
            filter: None,
            params: params.clone(),
            explain: false,
        };
        let hybrid_req = SearchRequest { mode: "hybrid", ..keyword_req.clone() };

        let keyword_only = search(&store, &keyword_req).await.unwrap();
        let hybrid = search(&store, &hybrid_req).await.unwrap();

        let k_order: Vec<&str> = keyword_only.iter().map(|r| r.chunk_id.as_str()).collect();
        let h_order: Vec<&str> = hybrid.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(k_order, h_order);
    }

    #[tokio::test]
    async fn hybrid_alpha_one_equals_vector_ordering() {
        let store = InMemoryStore::new();
        store.upsert(&chunk("c1", "d1", 0, "rust"), &[0.1, 0.0]).await.unwrap();
        store.upsert(&chunk("c2", "d2", 0, "rust rust"), &[0.9, 0.1]).await.unwrap();

        let params = SearchParams { hybrid_alpha: 1.0, ..SearchParams::default() };
        let semantic_req = SearchRequest {
            query: "rust",
            query_vec: Some(&[1.0, 0.0]),
            mode: "semantic",
            filter: None,
            params: params.clone(),
            explain: false,
        };
        let hybrid_req = SearchRequest { mode: "hybrid", ..semantic_req.clone() };

        let semantic_only = search(&store, &semantic_req).await.unwrap();
        let hybrid = search(&store, &hybrid_req).await.unwrap();

        let s_order: Vec<&str> = semantic_only.iter().map(|r| r.chunk_id.as_str()).collect();
        let h_order: Vec<&str> = hybrid.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(s_order, h_order);
    }

    #[test]
    fn dedup_keeps_first_occurrence_per_fingerprint() {
        let a = SearchResultItem {
            chunk_id: "a".into(), text: "x".into(), source: "doc".into(), section: "S".into(),
            chunk_index: 0, score: 0.9, updated_at: 0, explain: None,
        };
        let b = SearchResultItem {
            chunk_id: "b".into(), text: "y".into(), source: "doc".into(), section: "S".into(),
            chunk_index: 0, score: 0.5, updated_at: 0, explain: None,
        };
        let deduped = dedup_by_fingerprint(vec![a, b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].chunk_id, "a");
    }

    #[test]
    fn normalize_all_equal_scores_to_one() {
        let candidates = vec![
            ChunkCandidate { chunk_id: "1".into(), source: "d".into(), chunk_index: 0, raw_score: 3.0, snippet: String::new(), section: "s".into(), updated_at: 0 },
            ChunkCandidate { chunk_id: "2".into(), source: "d".into(), chunk_index: 1, raw_score: 3.0, snippet: String::new(), section: "s".into(), updated_at: 0 },
        ];
        let result = normalize_scores(&candidates);
        for (_, score) in result {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }
}
