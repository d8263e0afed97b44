//! Retrieval engine: wraps the pure hybrid-search algorithm with query
//! rewriting (HyDE, multi-query), graph-guided candidate generation,
//! reranking, deduplication, and result caching.

use anyhow::Result;
use ragctl_core::models::{Message, NodeType, Role};
use ragctl_core::search::{self, SearchParams, SearchRequest, SearchResultItem};
use ragctl_core::store::{CacheStore, Filter, GraphStore, Store};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::embedding::HttpEmbeddingClient;
use crate::llm::{extract_json, LlmClient};
use crate::reranker::Reranker;

/// How long a final (post-rerank) result set stays cached for an
/// identical request.
const RESULT_TTL: Duration = Duration::from_secs(5 * 60);

/// How long a query rewrite stays cached.
const REWRITE_TTL: Duration = Duration::from_secs(60 * 60);

/// How many documents to pull in via the knowledge graph before turning
/// them into a chunk-level filter, in graph mode.
const GRAPH_DOCUMENT_FANOUT: i64 = 5;

pub struct RetrievalEngine {
    pub store: Arc<dyn Store>,
    pub graph: Arc<dyn GraphStore>,
    pub cache: Arc<dyn CacheStore>,
    pub embedder: Arc<HttpEmbeddingClient>,
    pub llm: Arc<LlmClient>,
    pub reranker: Arc<dyn Reranker>,
    pub params: SearchParams,
    pub overfetch_factor: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    /// `"keyword"`, `"semantic"`, `"hybrid"`, or `"graph"`.
    pub mode: String,
    pub filter: Option<Filter>,
    pub top_n: Option<usize>,
    pub use_hyde: bool,
    pub use_multi_query: bool,
    /// Rerank candidates before returning, but only when there are more
    /// candidates than the requested limit.
    pub rerank: bool,
}

/// A query in two forms: the text used for keyword/BM25 matching and the
/// text used to produce the embedding vector. These diverge for the plain
/// rewrite path, where hybrid search matches keywords against a rewritten,
/// keyword-rich query but embeds the user's original wording.
struct QueryVariant {
    text: String,
    embed_text: String,
}

#[derive(Deserialize, Default)]
struct MultiQueryResult {
    #[serde(default)]
    queries: Vec<String>,
}

impl RetrievalEngine {
    pub async fn retrieve(&self, req: &RetrievalRequest) -> Result<Vec<SearchResultItem>> {
        if req.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let cache_key = self.cache_key(req);
        if let Some(cached) = self.cache.get(&cache_key).await.ok().flatten() {
            if let Ok(items) = serde_json::from_value::<Vec<SearchResultItem>>(cached) {
                return Ok(items);
            }
        }

        let mut results = if req.mode == "graph" {
            self.retrieve_via_graph(req).await?
        } else {
            self.retrieve_via_search(req).await?
        };

        let limit = req.top_n.unwrap_or(results.len());
        if req.rerank && results.len() > limit {
            results = self.reranker.rerank(&req.query, results, req.top_n).await;
        }
        results = search::dedup_by_fingerprint(results);

        if let Ok(value) = serde_json::to_value(&results) {
            let _ = self.cache.put(&cache_key, value, RESULT_TTL).await;
        }

        Ok(results)
    }

    fn cache_key(&self, req: &RetrievalRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(req.mode.as_bytes());
        hasher.update(b"\0");
        hasher.update(req.query.as_bytes());
        hasher.update(b"\0");
        if let Ok(filter_json) = serde_json::to_string(&req.filter) {
            hasher.update(filter_json.as_bytes());
        }
        hasher.update([req.use_hyde as u8, req.use_multi_query as u8]);
        format!("retrieval:{:x}", hasher.finalize())
    }

    async fn retrieve_via_search(&self, req: &RetrievalRequest) -> Result<Vec<SearchResultItem>> {
        let variants = self.expand_queries(req).await?;
        let needs_vector = req.mode == "semantic" || req.mode == "hybrid";

        let mut params = self.params.clone();
        params.candidate_k_keyword *= self.overfetch_factor.max(1);
        params.candidate_k_vector *= self.overfetch_factor.max(1);
        if let Some(n) = req.top_n {
            params.final_limit = (n as i64).max(1);
        }

        let mut merged: Vec<SearchResultItem> = Vec::new();
        for variant in &variants {
            let query_vec = if needs_vector {
                Some(self.embedder.embed(&variant.embed_text).await?)
            } else {
                None
            };

            let search_req = SearchRequest {
                query: &variant.text,
                query_vec: query_vec.as_deref(),
                mode: &req.mode,
                filter: req.filter.as_ref(),
                params: params.clone(),
                explain: false,
            };
            let mut hits = search::search(self.store.as_ref(), &search_req).await?;
            merged.append(&mut hits);
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(merged)
    }

    /// Graph-guided retrieval: extract entity mentions from the query,
    /// expand each to nearby `Document` nodes, then search only within
    /// those documents — pushed down as a single `Or` filter when the
    /// backend supports it, or as one batched search per document
    /// otherwise.
    async fn retrieve_via_graph(&self, req: &RetrievalRequest) -> Result<Vec<SearchResultItem>> {
        let entities = self.extract_query_entities(&req.query).await;
        let mut documents = Vec::new();
        for entity in &entities {
            let docs = self.graph.documents_for(entity, GRAPH_DOCUMENT_FANOUT).await?;
            documents.extend(docs);
        }
        documents.sort();
        documents.dedup();

        if documents.is_empty() {
            return self.retrieve_via_search(req).await;
        }

        let mut params = self.params.clone();
        if let Some(n) = req.top_n {
            params.final_limit = (n as i64).max(1);
        }
        let query_vec = self.embedder.embed(&req.query).await?;

        if self.store.supports_or_filter() {
            let filter = Filter::Or(
                documents
                    .iter()
                    .map(|d| Filter::Equal {
                        path: "source".to_string(),
                        value: d.clone(),
                    })
                    .collect(),
            );
            let search_req = SearchRequest {
                query: &req.query,
                query_vec: Some(&query_vec),
                mode: "hybrid",
                filter: Some(&filter),
                params,
                explain: false,
            };
            search::search(self.store.as_ref(), &search_req).await
        } else {
            let mut merged = Vec::new();
            for doc in &documents {
                let filter = Filter::Equal {
                    path: "source".to_string(),
                    value: doc.clone(),
                };
                let search_req = SearchRequest {
                    query: &req.query,
                    query_vec: Some(&query_vec),
                    mode: "hybrid",
                    filter: Some(&filter),
                    params: params.clone(),
                    explain: false,
                };
                merged.extend(search::search(self.store.as_ref(), &search_req).await?);
            }
            merged.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            Ok(merged)
        }
    }

    async fn extract_query_entities(&self, query: &str) -> Vec<String> {
        let nodes = match self.graph.nodes_of_type(NodeType::Concept, 500).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "failed to list graph nodes for entity matching");
                return Vec::new();
            }
        };
        let lower = query.to_lowercase();
        nodes
            .into_iter()
            .filter(|n| lower.contains(&n.name.to_lowercase()))
            .map(|n| n.name)
            .collect()
    }

    /// Expand one query into the variants actually searched. HyDE (a
    /// hypothetical answer passage, embedded in place of the raw query)
    /// and multi-query fan-out (several paraphrases) search and embed
    /// their own generated text; HyDE takes precedence if both are set.
    /// Otherwise, for keyword/hybrid modes, the query is rewritten for
    /// keyword richness before matching, while the embedding side (for
    /// hybrid) still uses the user's original wording.
    async fn expand_queries(&self, req: &RetrievalRequest) -> Result<Vec<QueryVariant>> {
        if req.use_hyde {
            let passage = self.hyde_passage(&req.query).await?;
            return Ok(vec![QueryVariant {
                text: passage.clone(),
                embed_text: passage,
            }]);
        }
        if req.use_multi_query {
            let queries = self.multi_query_variants(&req.query).await?;
            return Ok(queries
                .into_iter()
                .map(|q| QueryVariant {
                    text: q.clone(),
                    embed_text: q,
                })
                .collect());
        }
        if req.mode == "keyword" || req.mode == "hybrid" {
            let rewritten = self.rewrite_query(&req.query).await?;
            return Ok(vec![QueryVariant {
                text: rewritten,
                embed_text: req.query.clone(),
            }]);
        }
        Ok(vec![QueryVariant {
            text: req.query.clone(),
            embed_text: req.query.clone(),
        }])
    }

    /// Ask the LLM to rewrite the query for keyword richness while
    /// preserving intent, consulting and populating the
    /// `query-rewrite:<hash(query)>` cache. Falls back to the original
    /// query text on any cache miss that the LLM also fails to fill.
    async fn rewrite_query(&self, query: &str) -> Result<String> {
        let key = Self::rewrite_cache_key(query);
        if let Some(cached) = self.cache.get(&key).await.ok().flatten() {
            if let Some(rewritten) = cached.as_str() {
                return Ok(rewritten.to_string());
            }
        }

        let messages = [Message {
            role: Role::User,
            content: format!(
                "Rewrite this search query to be richer in the keywords a search engine would match, preserving its original intent. Reply with only the rewritten query on a single line, no more than 200 tokens: {query}"
            ),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        }];

        let rewritten = match self.llm.complete(&messages, None).await {
            Ok(reply) if !reply.content.trim().is_empty() => {
                reply.content.lines().next().unwrap_or(query).trim().to_string()
            }
            _ => query.to_string(),
        };

        let _ = self
            .cache
            .put(&key, serde_json::Value::String(rewritten.clone()), REWRITE_TTL)
            .await;

        Ok(rewritten)
    }

    fn rewrite_cache_key(query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        format!("query-rewrite:{:x}", hasher.finalize())
    }

    async fn hyde_passage(&self, query: &str) -> Result<String> {
        let messages = [Message {
            role: Role::User,
            content: format!(
                "Write a short hypothetical passage that would directly answer this question, in two or three sentences: {query}"
            ),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        }];
        match self.llm.complete(&messages, None).await {
            Ok(reply) if !reply.content.trim().is_empty() => Ok(reply.content),
            _ => Ok(query.to_string()),
        }
    }

    async fn multi_query_variants(&self, query: &str) -> Result<Vec<String>> {
        let messages = [Message {
            role: Role::User,
            content: format!(
                "Generate 3 different phrasings of this search query, as a JSON object {{\"queries\": [...]}}. Query: {query}"
            ),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        }];

        let reply = match self.llm.complete(&messages, None).await {
            Ok(r) => r,
            Err(_) => return Ok(vec![query.to_string()]),
        };

        let variants = extract_json(&reply.content)
            .and_then(|v| serde_json::from_value::<MultiQueryResult>(v).ok())
            .map(|r| r.queries)
            .unwrap_or_default();

        let mut queries = vec![query.to_string()];
        queries.extend(variants.into_iter().filter(|q| !q.trim().is_empty()));
        queries.truncate(4);
        Ok(queries)
    }
}
