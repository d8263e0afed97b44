//! LLM-assisted knowledge graph extraction.
//!
//! One call per document: the model is asked for a JSON object naming
//! entities and the relationships between them, grounded in roughly the
//! first 3000 characters of the document's content. A `Document` node is
//! always merged for the source file, with a `DOCUMENTED_IN` edge from
//! every extracted entity back to it.

use anyhow::Result;
use ragctl_core::models::{Document, GraphEdge, GraphNode, Message, NodeType, RelationType, Role};
use ragctl_core::store::GraphStore;
use serde::Deserialize;
use std::str::FromStr;

use crate::llm::{extract_json, LlmClient};

const CONTENT_PREVIEW_CHARS: usize = 3000;

const EXTRACTION_PROMPT: &str = r#"You extract a knowledge graph from a document. Read the content below and reply with ONLY a JSON object of the form:

{"entities": [{"name": "...", "type": "Concept|Project|Person|Tool|Technique|Theory", "description": "..."}],
 "relationships": [{"from": "...", "to": "...", "type": "RELATES_TO|ENABLES|REQUIRES|PART_OF|USES|IMPLEMENTS|ANALYZES|DERIVES_FROM", "description": "..."}]}

Only name entities that are substantively discussed. Keep descriptions to one sentence."#;

#[derive(Debug, Deserialize, Default)]
struct ExtractionResult {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelationship {
    from: String,
    to: String,
    #[serde(rename = "type", default = "default_relation_type")]
    type_: String,
    #[serde(default)]
    description: Option<String>,
}

fn default_relation_type() -> String {
    "RELATES_TO".to_string()
}

#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub nodes_merged: u64,
    pub edges_merged: u64,
}

pub async fn extract_and_merge(
    llm: &LlmClient,
    graph: &dyn GraphStore,
    doc: &Document,
) -> Result<ExtractOutcome> {
    let preview: String = doc.raw_content.chars().take(CONTENT_PREVIEW_CHARS).collect();
    let messages = [
        Message {
            role: Role::System,
            content: EXTRACTION_PROMPT.to_string(),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        },
        Message {
            role: Role::User,
            content: format!("# {}\n\n{}", doc.title, preview),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        },
    ];

    let reply = llm.complete(&messages, None).await?;
    let extraction = match extract_json(&reply.content) {
        Some(value) => serde_json::from_value::<ExtractionResult>(value).unwrap_or_default(),
        None => ExtractionResult::default(),
    };

    let mut outcome = ExtractOutcome::default();

    let doc_node = GraphNode {
        label: NodeType::Document,
        name: doc.path.clone(),
        description: Some(doc.title.clone()),
        source: Some(doc.path.clone()),
    };
    graph.merge_node(&doc_node).await?;
    outcome.nodes_merged += 1;

    for entity in &extraction.entities {
        let Ok(label) = entity.type_.parse::<NodeType>() else {
            continue;
        };
        let node = GraphNode {
            label,
            name: entity.name.clone(),
            description: entity.description.clone(),
            source: Some(doc.path.clone()),
        };
        graph.merge_node(&node).await?;
        outcome.nodes_merged += 1;

        graph
            .merge_edge(&GraphEdge {
                from_name: entity.name.clone(),
                to_name: doc.path.clone(),
                edge_type: RelationType::DocumentedIn,
                description: None,
            })
            .await?;
        outcome.edges_merged += 1;
    }

    for rel in &extraction.relationships {
        let edge_type = RelationType::from_str(&rel.type_).unwrap_or(RelationType::RelatesTo);
        graph
            .merge_edge(&GraphEdge {
                from_name: rel.from.clone(),
                to_name: rel.to.clone(),
                edge_type,
                description: rel.description.clone(),
            })
            .await?;
        outcome.edges_merged += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_result_defaults_on_malformed_json() {
        let value = extract_json("not json at all");
        assert!(value.is_none());
    }

    #[test]
    fn parses_well_formed_extraction_payload() {
        let raw = r#"{"entities":[{"name":"Rust","type":"Tool","description":"a language"}],"relationships":[]}"#;
        let parsed: ExtractionResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.entities[0].name, "Rust");
    }
}
