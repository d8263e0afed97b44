//! Core data models shared by the ingestion, retrieval, and chat layers.
//!
//! These types represent the documents, chunks, graph elements, and chat
//! messages that flow through the gateway. They carry no I/O: constructing
//! one never touches a database, the filesystem, or the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The inferred category of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Documentation,
    Project,
    Philosophy,
    Research,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Documentation => "documentation",
            DocumentType::Project => "project",
            DocumentType::Philosophy => "philosophy",
            DocumentType::Research => "research",
        }
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Documentation
    }
}

impl std::str::FromStr for DocumentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "documentation" => Ok(DocumentType::Documentation),
            "project" => Ok(DocumentType::Project),
            "philosophy" => Ok(DocumentType::Philosophy),
            "research" => Ok(DocumentType::Research),
            _ => Err(()),
        }
    }
}

/// One heading-delimited section of a parsed Markdown document.
///
/// Order-significant: sections appear in document order. `heading_level`
/// is 1-6; a document with no headings produces a single section titled
/// `"Main Content"` at level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub heading_level: u8,
    pub body: String,
}

/// A parsed Markdown document, immutable once constructed by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub title: String,
    pub doc_type: DocumentType,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub raw_content: String,
    pub sections: Vec<Section>,
}

/// The atomic retrieval unit produced by the chunker.
///
/// Invariants upheld by the chunker: `text` is non-empty; `(source,
/// chunk_index)` is unique; `chunk_index` values for one `source` are a
/// dense permutation of `[0, total_chunks)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub section: String,
    pub doc_type: DocumentType,
    pub tags: BTreeSet<String>,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub created_at: DateTime<Utc>,
}

/// A node label in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NodeType {
    Concept,
    Project,
    Person,
    Tool,
    Document,
    Technique,
    Theory,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Concept => "Concept",
            NodeType::Project => "Project",
            NodeType::Person => "Person",
            NodeType::Tool => "Tool",
            NodeType::Document => "Document",
            NodeType::Technique => "Technique",
            NodeType::Theory => "Theory",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Concept" => Ok(NodeType::Concept),
            "Project" => Ok(NodeType::Project),
            "Person" => Ok(NodeType::Person),
            "Tool" => Ok(NodeType::Tool),
            "Document" => Ok(NodeType::Document),
            "Technique" => Ok(NodeType::Technique),
            "Theory" => Ok(NodeType::Theory),
            _ => Err(()),
        }
    }
}

/// A directed relation type between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    RelatesTo,
    Enables,
    Requires,
    PartOf,
    DocumentedIn,
    Uses,
    Implements,
    Analyzes,
    DerivesFrom,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::RelatesTo => "RELATES_TO",
            RelationType::Enables => "ENABLES",
            RelationType::Requires => "REQUIRES",
            RelationType::PartOf => "PART_OF",
            RelationType::DocumentedIn => "DOCUMENTED_IN",
            RelationType::Uses => "USES",
            RelationType::Implements => "IMPLEMENTS",
            RelationType::Analyzes => "ANALYZES",
            RelationType::DerivesFrom => "DERIVES_FROM",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RELATES_TO" => Ok(RelationType::RelatesTo),
            "ENABLES" => Ok(RelationType::Enables),
            "REQUIRES" => Ok(RelationType::Requires),
            "PART_OF" => Ok(RelationType::PartOf),
            "DOCUMENTED_IN" => Ok(RelationType::DocumentedIn),
            "USES" => Ok(RelationType::Uses),
            "IMPLEMENTS" => Ok(RelationType::Implements),
            "ANALYZES" => Ok(RelationType::Analyzes),
            "DERIVES_FROM" => Ok(RelationType::DerivesFrom),
            _ => Err(()),
        }
    }
}

/// A node in the knowledge graph, keyed by `(label, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub label: NodeType,
    pub name: String,
    pub description: Option<String>,
    pub source: Option<String>,
}

/// A directed edge in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_name: String,
    pub to_name: String,
    pub edge_type: RelationType,
    pub description: Option<String>,
}

/// A citation attached to an assistant message, pointing back to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub section: String,
    pub score: f64,
}

/// The outcome of one tool invocation, attached to a chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub data: serde_json::Value,
    pub success: bool,
    pub error: Option<String>,
}

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub created_at: DateTime<Utc>,
}
