//! Storage abstractions for the vector store, graph store, and cache.
//!
//! These traits are the seam between the pure retrieval algorithm in
//! [`crate::search`] and a concrete backend. Implementations live in the
//! application crate (SQLite-backed) or in [`memory`] (in-process fakes
//! used by tests and by any deployment that accepts non-durable state).

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Chunk, GraphEdge, GraphNode, NodeType};

/// A structured filter predicate pushed down to the vector store.
///
/// The adapter must evaluate these at the storage layer rather than
/// fetching unfiltered candidates and filtering in the retrieval engine,
/// except to enforce the final `limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Equal { path: String, value: String },
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

/// A candidate chunk returned from keyword or vector search, carrying
/// enough information to normalize, merge, and deduplicate without
/// another round-trip to the store.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub source: String,
    pub chunk_index: i64,
    /// Raw score from the backend: BM25 rank for keyword search, cosine
    /// similarity (already folded from distance via `1 - distance`) for
    /// vector search.
    pub raw_score: f64,
    pub snippet: String,
    pub section: String,
    pub updated_at: i64,
}

/// Per-type chunk counts and totals, returned by [`Store::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct VectorStoreStats {
    pub total_chunks: u64,
    pub by_type: std::collections::BTreeMap<String, u64>,
}

/// Abstract vector store backend.
///
/// All operations are async to accommodate native I/O (SQLite, a remote
/// vector database) uniformly. Implementations must push [`Filter`]s
/// down to the backend rather than filtering post-hoc.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a chunk and its embedding vector.
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()>;

    /// Cosine-similarity search against `query_vec`.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        k: i64,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkCandidate>>;

    /// BM25 full-text search against `query_text`.
    async fn bm25_search(
        &self,
        query_text: &str,
        k: i64,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Whether this backend can push a compound [`Filter::Or`] down to
    /// storage. When `false`, callers must batch one query per branch
    /// and merge results themselves rather than assume native support.
    fn supports_or_filter(&self) -> bool {
        true
    }

    /// Delete every chunk belonging to `source` (used for re-ingesting a
    /// single file).
    async fn delete_by_source(&self, source: &str) -> Result<()>;

    /// Destroy and recreate the collection.
    async fn reset_collection(&self) -> Result<()>;

    /// Total chunk count and per-type breakdown.
    async fn stats(&self) -> Result<VectorStoreStats>;
}

/// A node sequence and the interleaved edge-type sequence forming a path.
#[derive(Debug, Clone, Serialize)]
pub struct GraphPath {
    pub nodes: Vec<String>,
    pub edge_types: Vec<String>,
}

/// Totals and per-label distribution, returned by [`GraphStore::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStoreStats {
    pub total_nodes: u64,
    pub total_edges: u64,
    pub by_label: std::collections::BTreeMap<String, u64>,
}

/// Abstract knowledge-graph backend.
///
/// Uniqueness is on `(label, name)`; `merge_node`/`merge_edge` are
/// idempotent upserts so retries after a partial failure are safe.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn merge_node(&self, node: &GraphNode) -> Result<()>;

    async fn merge_edge(&self, edge: &GraphEdge) -> Result<()>;

    /// Distinct nodes reachable within `depth` edges of `name`, ordered
    /// by path length. `depth` is capped at 3.
    async fn neighbors(&self, name: &str, depth: u8) -> Result<Vec<GraphNode>>;

    /// Node sequence and interleaved edge-type sequence between `a` and
    /// `b`. `shortest_path(a, a)` returns a zero-edge path containing
    /// only `a`.
    async fn shortest_path(&self, a: &str, b: &str) -> Result<Option<GraphPath>>;

    /// Distinct `Document` nodes within two hops of `name`.
    async fn documents_for(&self, name: &str, k: i64) -> Result<Vec<String>>;

    async fn nodes_of_type(&self, node_type: NodeType, k: i64) -> Result<Vec<GraphNode>>;

    async fn reset(&self) -> Result<()>;

    async fn stats(&self) -> Result<GraphStoreStats>;
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: i64,
}

/// Abstract key-value cache with TTL, used for embedding memoization,
/// query rewrites, search result sets, and rate limiting.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a cached JSON value, or `None` on miss or past-expiry.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store a JSON value under `key` with a time-to-live.
    async fn put(&self, key: &str, value: serde_json::Value, ttl: std::time::Duration)
        -> Result<()>;

    /// Increment the counter at `rate-limit:<identifier>`, setting an
    /// expiry on first increment, and report whether `limit` was
    /// exceeded within `window`.
    async fn rate_limit(
        &self,
        identifier: &str,
        limit: i64,
        window: std::time::Duration,
    ) -> Result<RateLimitResult>;

    async fn reset(&self) -> Result<()>;

    /// Total live (non-expired) keys, for admin stats.
    async fn total_keys(&self) -> Result<u64>;
}
