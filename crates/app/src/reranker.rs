//! Reranker client: reorders a candidate set using a cross-encoder
//! model. On provider error, results are returned unchanged — a failed
//! rerank call never fails the enclosing request.

use async_trait::async_trait;
use ragctl_core::search::SearchResultItem;
use serde::{Deserialize, Serialize};

use crate::config::env_or;

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResultItem>,
        top_n: Option<usize>,
    ) -> Vec<SearchResultItem>;
}

/// No-op reranker: returns candidates unchanged. Used as the default
/// when no reranker endpoint is configured, and as the fallback when a
/// configured reranker fails.
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<SearchResultItem>,
        top_n: Option<usize>,
    ) -> Vec<SearchResultItem> {
        if let Some(n) = top_n {
            candidates.truncate(n);
        }
        candidates
    }
}

pub struct HttpReranker {
    http: reqwest::Client,
}

impl Default for HttpReranker {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpReranker {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> String {
        env_or("RERANK_BASE_URL", "http://localhost:8090")
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f64>,
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<SearchResultItem>,
        top_n: Option<usize>,
    ) -> Vec<SearchResultItem> {
        if candidates.is_empty() {
            return candidates;
        }

        let documents: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let result = self
            .http
            .post(format!("{}/rerank", self.base_url()))
            .json(&RerankRequest { query, documents })
            .send()
            .await;

        let scores = match result {
            Ok(resp) if resp.status().is_success() => resp.json::<RerankResponse>().await.ok(),
            _ => None,
        };

        match scores {
            Some(body) if body.scores.len() == candidates.len() => {
                for (c, score) in candidates.iter_mut().zip(body.scores) {
                    c.score = score.clamp(0.0, 1.0);
                }
                candidates.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            _ => {
                // Provider error or shape mismatch: fall back to the
                // unmodified candidate order rather than failing the turn.
            }
        }

        if let Some(n) = top_n {
            candidates.truncate(n);
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, score: f64) -> SearchResultItem {
        SearchResultItem {
            chunk_id: id.into(),
            text: "x".into(),
            source: "s".into(),
            section: "S".into(),
            chunk_index: 0,
            score,
            updated_at: 0,
            explain: None,
        }
    }

    #[tokio::test]
    async fn no_op_reranker_truncates_to_top_n() {
        let candidates = vec![item("a", 0.9), item("b", 0.5), item("c", 0.1)];
        let result = NoOpReranker.rerank("q", candidates, Some(2)).await;
        assert_eq!(result.len(), 2);
    }
}
