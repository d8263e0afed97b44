//! In-process fakes for [`Store`], [`GraphStore`], and [`CacheStore`].
//!
//! Uses `HashMap`/`Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; keyword search is substring counting
//! rather than real BM25 — good enough for deterministic unit tests, not
//! meant to be a production backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, GraphEdge, GraphNode, NodeType};

use super::{
    CacheStore, ChunkCandidate, Filter, GraphPath, GraphStore, GraphStoreStats, RateLimitResult,
    Store, VectorStoreStats,
};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(chunk: &Chunk, filter: &Filter) -> bool {
    match filter {
        Filter::Equal { path, value } => match path.as_str() {
            "source" => &chunk.source == value,
            "doc_type" => chunk.doc_type.as_str() == value,
            "section" => &chunk.section == value,
            _ => true,
        },
        Filter::Or(inner) => inner.iter().any(|f| matches_filter(chunk, f)),
        Filter::And(inner) => inner.iter().all(|f| matches_filter(chunk, f)),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap();
        chunks.retain(|c| c.chunk.id != chunk.id);
        chunks.push(StoredChunk {
            chunk: chunk.clone(),
            vector: vector.to_vec(),
        });
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        k: i64,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkCandidate>> {
        let chunks = self.chunks.read().unwrap();
        let mut candidates: Vec<ChunkCandidate> = chunks
            .iter()
            .filter(|sc| filter.map_or(true, |f| matches_filter(&sc.chunk, f)))
            .map(|sc| ChunkCandidate {
                chunk_id: sc.chunk.id.clone(),
                source: sc.chunk.source.clone(),
                chunk_index: sc.chunk.chunk_index,
                raw_score: cosine_similarity(query_vec, &sc.vector) as f64,
                snippet: sc.chunk.text.chars().take(240).collect(),
                section: sc.chunk.section.clone(),
                updated_at: sc.chunk.created_at.timestamp(),
            })
            .collect();
        candidates.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap());
        candidates.truncate(k as usize);
        Ok(candidates)
    }

    async fn bm25_search(
        &self,
        query_text: &str,
        k: i64,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkCandidate>> {
        let terms: Vec<String> = query_text.to_lowercase().split_whitespace().map(String::from).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = self.chunks.read().unwrap();
        let mut candidates: Vec<ChunkCandidate> = chunks
            .iter()
            .filter(|sc| filter.map_or(true, |f| matches_filter(&sc.chunk, f)))
            .filter_map(|sc| {
                let lower = sc.chunk.text.to_lowercase();
                let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                if hits == 0 {
                    return None;
                }
                Some(ChunkCandidate {
                    chunk_id: sc.chunk.id.clone(),
                    source: sc.chunk.source.clone(),
                    chunk_index: sc.chunk.chunk_index,
                    raw_score: hits as f64,
                    snippet: sc.chunk.text.chars().take(240).collect(),
                    section: sc.chunk.section.clone(),
                    updated_at: sc.chunk.created_at.timestamp(),
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap());
        candidates.truncate(k as usize);
        Ok(candidates)
    }

    async fn delete_by_source(&self, source: &str) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap();
        chunks.retain(|c| c.chunk.source != source);
        Ok(())
    }

    async fn reset_collection(&self) -> Result<()> {
        self.chunks.write().unwrap().clear();
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let chunks = self.chunks.read().unwrap();
        let mut by_type = BTreeMap::new();
        for c in chunks.iter() {
            *by_type.entry(c.chunk.doc_type.as_str().to_string()).or_insert(0u64) += 1;
        }
        Ok(VectorStoreStats {
            total_chunks: chunks.len() as u64,
            by_type,
        })
    }
}

/// In-memory knowledge graph.
#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: RwLock<HashMap<(String, String), GraphNode>>,
    edges: RwLock<Vec<GraphEdge>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn merge_node(&self, node: &GraphNode) -> Result<()> {
        let key = (node.label.as_str().to_string(), node.name.clone());
        self.nodes.write().unwrap().insert(key, node.clone());
        Ok(())
    }

    async fn merge_edge(&self, edge: &GraphEdge) -> Result<()> {
        let mut edges = self.edges.write().unwrap();
        if !edges.iter().any(|e| {
            e.from_name == edge.from_name && e.to_name == edge.to_name && e.edge_type == edge.edge_type
        }) {
            edges.push(edge.clone());
        }
        Ok(())
    }

    async fn neighbors(&self, name: &str, depth: u8) -> Result<Vec<GraphNode>> {
        let depth = depth.min(3);
        let edges = self.edges.read().unwrap();
        let nodes = self.nodes.read().unwrap();

        let mut frontier = vec![name.to_string()];
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        seen.insert(name.to_string());
        let mut result_names: Vec<String> = Vec::new();

        for _ in 0..depth {
            let mut next = Vec::new();
            for n in &frontier {
                for e in edges.iter() {
                    let other = if e.from_name == *n {
                        Some(e.to_name.clone())
                    } else if e.to_name == *n {
                        Some(e.from_name.clone())
                    } else {
                        None
                    };
                    if let Some(o) = other {
                        if seen.insert(o.clone()) {
                            result_names.push(o.clone());
                            next.push(o);
                        }
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(result_names
            .into_iter()
            .filter_map(|n| nodes.values().find(|node| node.name == n).cloned())
            .collect())
    }

    async fn shortest_path(&self, a: &str, b: &str) -> Result<Option<GraphPath>> {
        if a == b {
            return Ok(Some(GraphPath {
                nodes: vec![a.to_string()],
                edge_types: vec![],
            }));
        }

        let edges = self.edges.read().unwrap();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(a.to_string());
        let mut prev: HashMap<String, (String, String)> = HashMap::new();
        let mut visited = std::collections::HashSet::new();
        visited.insert(a.to_string());

        while let Some(cur) = queue.pop_front() {
            if cur == b {
                let mut nodes = vec![cur.clone()];
                let mut edge_types = Vec::new();
                let mut walk = cur;
                while let Some((p, et)) = prev.get(&walk) {
                    nodes.push(p.clone());
                    edge_types.push(et.clone());
                    walk = p.clone();
                }
                nodes.reverse();
                edge_types.reverse();
                return Ok(Some(GraphPath { nodes, edge_types }));
            }
            for e in edges.iter() {
                let next = if e.from_name == cur {
                    Some((e.to_name.clone(), e.edge_type.as_str().to_string()))
                } else if e.to_name == cur {
                    Some((e.from_name.clone(), e.edge_type.as_str().to_string()))
                } else {
                    None
                };
                if let Some((n, et)) = next {
                    if visited.insert(n.clone()) {
                        prev.insert(n.clone(), (cur.clone(), et));
                        queue.push_back(n);
                    }
                }
            }
        }

        Ok(None)
    }

    async fn documents_for(&self, name: &str, k: i64) -> Result<Vec<String>> {
        let within_two_hops = self.neighbors(name, 2).await?;
        Ok(within_two_hops
            .into_iter()
            .filter(|n| n.label == NodeType::Document)
            .take(k.max(0) as usize)
            .map(|n| n.name)
            .collect())
    }

    async fn nodes_of_type(&self, node_type: NodeType, k: i64) -> Result<Vec<GraphNode>> {
        let nodes = self.nodes.read().unwrap();
        Ok(nodes
            .values()
            .filter(|n| n.label == node_type)
            .take(k.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        self.nodes.write().unwrap().clear();
        self.edges.write().unwrap().clear();
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStoreStats> {
        let nodes = self.nodes.read().unwrap();
        let edges = self.edges.read().unwrap();
        let mut by_label = BTreeMap::new();
        for n in nodes.values() {
            *by_label.entry(n.label.as_str().to_string()).or_insert(0u64) += 1;
        }
        Ok(GraphStoreStats {
            total_nodes: nodes.len() as u64,
            total_edges: edges.len() as u64,
            by_label,
        })
    }
}

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

struct RateEntry {
    count: i64,
    expires_at: Instant,
}

/// In-memory TTL cache and rate limiter.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    rate_limits: RwLock<HashMap<String, RateEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<()> {
        self.entries.write().unwrap().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn rate_limit(
        &self,
        identifier: &str,
        limit: i64,
        window: Duration,
    ) -> Result<RateLimitResult> {
        let mut limits = self.rate_limits.write().unwrap();
        let now = Instant::now();
        let entry = limits.entry(identifier.to_string()).or_insert_with(|| RateEntry {
            count: 0,
            expires_at: now + window,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;
        let allowed = entry.count <= limit;
        Ok(RateLimitResult {
            allowed,
            remaining: (limit - entry.count).max(0),
        })
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        self.rate_limits.write().unwrap().clear();
        Ok(())
    }

    async fn total_keys(&self) -> Result<u64> {
        let entries = self.entries.read().unwrap();
        let now = Instant::now();
        Ok(entries.values().filter(|e| e.expires_at > now).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;
    use std::collections::BTreeSet;

    fn chunk(id: &str, source: &str, index: i64) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: format!("text for {id}"),
            source: source.to_string(),
            section: "S".to_string(),
            doc_type: DocumentType::Documentation,
            tags: BTreeSet::new(),
            chunk_index: index,
            total_chunks: 1,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let store = InMemoryStore::new();
        store.upsert(&chunk("c1", "a.md", 0), &[1.0, 0.0]).await.unwrap();
        store.upsert(&chunk("c2", "a.md", 1), &[0.0, 1.0]).await.unwrap();
        let results = store.vector_search(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn merge_node_twice_is_idempotent() {
        let graph = InMemoryGraphStore::new();
        let node = GraphNode {
            label: NodeType::Concept,
            name: "Flow".into(),
            description: None,
            source: None,
        };
        graph.merge_node(&node).await.unwrap();
        graph.merge_node(&node).await.unwrap();
        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 1);
    }

    #[tokio::test]
    async fn shortest_path_self_is_zero_edges() {
        let graph = InMemoryGraphStore::new();
        let path = graph.shortest_path("x", "x").await.unwrap().unwrap();
        assert!(path.edge_types.is_empty());
        assert_eq!(path.nodes, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn rate_limit_blocks_past_limit() {
        let cache = InMemoryCacheStore::new();
        let window = Duration::from_secs(60);
        let r1 = cache.rate_limit("ip:1", 2, window).await.unwrap();
        let r2 = cache.rate_limit("ip:1", 2, window).await.unwrap();
        let r3 = cache.rate_limit("ip:1", 2, window).await.unwrap();
        assert!(r1.allowed && r2.allowed);
        assert!(!r3.allowed);
    }
}
