//! SQLite-backed [`GraphStore`] implementation.
//!
//! `neighbors`/`shortest_path` load the node and edge tables per call and
//! perform an in-process BFS — the corpus-scale graphs this targets fit
//! comfortably in memory per request.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet, VecDeque};

use ragctl_core::models::{GraphEdge, GraphNode, NodeType};
use ragctl_core::store::{GraphPath, GraphStore, GraphStoreStats};

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_edges(&self) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query("SELECT from_name, to_name, edge_type FROM graph_edges")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("from_name"), r.get("to_name"), r.get("edge_type")))
            .collect())
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn merge_node(&self, node: &GraphNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_nodes (label, name, description, source)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(label, name) DO UPDATE SET
                description = excluded.description,
                source = excluded.source
            "#,
        )
        .bind(node.label.as_str())
        .bind(&node.name)
        .bind(&node.description)
        .bind(&node.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge_edge(&self, edge: &GraphEdge) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_edges (from_name, to_name, edge_type, description)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(from_name, to_name, edge_type) DO UPDATE SET
                description = excluded.description
            "#,
        )
        .bind(&edge.from_name)
        .bind(&edge.to_name)
        .bind(edge.edge_type.as_str())
        .bind(&edge.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn neighbors(&self, name: &str, depth: u8) -> Result<Vec<GraphNode>> {
        let depth = depth.min(3);
        let edges = self.load_edges().await?;
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to, _) in &edges {
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
            adjacency.entry(to.as_str()).or_default().push(from.as_str());
        }

        let mut visited = HashSet::new();
        visited.insert(name.to_string());
        let mut frontier = vec![name.to_string()];
        let mut ordered_names = Vec::new();

        for _ in 0..depth {
            let mut next = Vec::new();
            for node in &frontier {
                if let Some(adj) = adjacency.get(node.as_str()) {
                    for &n in adj {
                        if visited.insert(n.to_string()) {
                            ordered_names.push(n.to_string());
                            next.push(n.to_string());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        if ordered_names.is_empty() {
            return Ok(Vec::new());
        }

        // SQLite has no array-bind support: build an IN-list with one
        // placeholder per name instead.
        let placeholders = ordered_names.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT label, name, description, source FROM graph_nodes WHERE name IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql);
        for n in &ordered_names {
            q = q.bind(n);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut by_name: HashMap<String, GraphNode> = rows
            .into_iter()
            .map(|row| {
                let label: String = row.get("label");
                let node = GraphNode {
                    label: label.parse::<NodeType>().unwrap_or(NodeType::Concept),
                    name: row.get("name"),
                    description: row.get("description"),
                    source: row.get("source"),
                };
                (node.name.clone(), node)
            })
            .collect();

        Ok(ordered_names
            .into_iter()
            .filter_map(|n| by_name.remove(&n))
            .collect())
    }

    async fn shortest_path(&self, a: &str, b: &str) -> Result<Option<GraphPath>> {
        if a == b {
            return Ok(Some(GraphPath {
                nodes: vec![a.to_string()],
                edge_types: Vec::new(),
            }));
        }

        let edges = self.load_edges().await?;
        let mut adjacency: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
        for (from, to, edge_type) in &edges {
            adjacency
                .entry(from.as_str())
                .or_default()
                .push((to.as_str(), edge_type.as_str()));
            adjacency
                .entry(to.as_str())
                .or_default()
                .push((from.as_str(), edge_type.as_str()));
        }

        let mut visited = HashSet::new();
        visited.insert(a.to_string());
        let mut queue = VecDeque::new();
        queue.push_back(vec![a.to_string()]);
        let mut edge_queue = VecDeque::new();
        edge_queue.push_back(Vec::<String>::new());

        while let Some(path) = queue.pop_front() {
            let edge_path = edge_queue.pop_front().unwrap();
            let last = path.last().unwrap().as_str();
            if let Some(adj) = adjacency.get(last) {
                for &(next, edge_type) in adj {
                    if next == b {
                        let mut nodes = path.clone();
                        nodes.push(next.to_string());
                        let mut types = edge_path.clone();
                        types.push(edge_type.to_string());
                        return Ok(Some(GraphPath {
                            nodes,
                            edge_types: types,
                        }));
                    }
                    if visited.insert(next.to_string()) {
                        let mut nodes = path.clone();
                        nodes.push(next.to_string());
                        let mut types = edge_path.clone();
                        types.push(edge_type.to_string());
                        queue.push_back(nodes);
                        edge_queue.push_back(types);
                    }
                }
            }
        }

        Ok(None)
    }

    async fn documents_for(&self, name: &str, k: i64) -> Result<Vec<String>> {
        let neighbors = self.neighbors(name, 2).await?;
        Ok(neighbors
            .into_iter()
            .filter(|n| n.label == NodeType::Document)
            .take(k as usize)
            .map(|n| n.name)
            .collect())
    }

    async fn nodes_of_type(&self, node_type: NodeType, k: i64) -> Result<Vec<GraphNode>> {
        let rows = sqlx::query(
            "SELECT label, name, description, source FROM graph_nodes WHERE label = ? LIMIT ?",
        )
        .bind(node_type.as_str())
        .bind(k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| GraphNode {
                label: node_type,
                name: row.get("name"),
                description: row.get("description"),
                source: row.get("source"),
            })
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM graph_edges").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM graph_nodes").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStoreStats> {
        let total_nodes: i64 = sqlx::query("SELECT COUNT(*) AS n FROM graph_nodes")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        let total_edges: i64 = sqlx::query("SELECT COUNT(*) AS n FROM graph_edges")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        let rows = sqlx::query("SELECT label, COUNT(*) AS n FROM graph_nodes GROUP BY label")
            .fetch_all(&self.pool)
            .await?;
        let by_label = rows
            .iter()
            .map(|r| (r.get::<String, _>("label"), r.get::<i64, _>("n") as u64))
            .collect();

        Ok(GraphStoreStats {
            total_nodes: total_nodes as u64,
            total_edges: total_edges as u64,
            by_label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteGraphStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::migrate(&pool).await.unwrap();
        SqliteGraphStore::new(pool)
    }

    fn node(label: NodeType, name: &str) -> GraphNode {
        GraphNode {
            label,
            name: name.to_string(),
            description: None,
            source: None,
        }
    }

    fn edge(from: &str, to: &str, edge_type: ragctl_core::models::RelationType) -> GraphEdge {
        GraphEdge {
            from_name: from.to_string(),
            to_name: to.to_string(),
            edge_type,
            description: None,
        }
    }

    #[tokio::test]
    async fn merge_node_is_idempotent() {
        let store = memory_store().await;
        store.merge_node(&node(NodeType::Concept, "Rust")).await.unwrap();
        store.merge_node(&node(NodeType::Concept, "Rust")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 1);
    }

    #[tokio::test]
    async fn shortest_path_finds_direct_edge() {
        use ragctl_core::models::RelationType;
        let store = memory_store().await;
        store.merge_node(&node(NodeType::Concept, "A")).await.unwrap();
        store.merge_node(&node(NodeType::Concept, "B")).await.unwrap();
        store
            .merge_edge(&edge("A", "B", RelationType::RelatesTo))
            .await
            .unwrap();

        let path = store.shortest_path("A", "B").await.unwrap().unwrap();
        assert_eq!(path.nodes, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(path.edge_types, vec!["RELATES_TO".to_string()]);
    }

    #[tokio::test]
    async fn shortest_path_returns_none_when_disconnected() {
        let store = memory_store().await;
        store.merge_node(&node(NodeType::Concept, "A")).await.unwrap();
        store.merge_node(&node(NodeType::Concept, "B")).await.unwrap();
        assert!(store.shortest_path("A", "B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn documents_for_returns_two_hop_documents() {
        use ragctl_core::models::RelationType;
        let store = memory_store().await;
        store.merge_node(&node(NodeType::Concept, "Rust")).await.unwrap();
        store.merge_node(&node(NodeType::Document, "guide.md")).await.unwrap();
        store
            .merge_edge(&edge("Rust", "guide.md", RelationType::DocumentedIn))
            .await
            .unwrap();

        let docs = store.documents_for("Rust", 10).await.unwrap();
        assert_eq!(docs, vec!["guide.md".to_string()]);
    }
}
