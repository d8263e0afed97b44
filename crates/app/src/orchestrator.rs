//! Chat orchestrator: classifies intent, invokes retrieval, dispatches
//! any slash-command tools, assembles the system prompt, and streams the
//! model's reply.
//!
//! Turn order is fixed: intent classification, then retrieval (if
//! needed), then tool dispatch (if a command prefix is present), then
//! prompt assembly, then token streaming. Retrieval never fails a turn —
//! a retrieval error is logged and the turn proceeds without context.

use anyhow::Result;
use ragctl_core::models::{Citation, Message, Role};
use ragctl_core::search::SearchResultItem;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::OrchestratorConfig;
use crate::llm::{extract_json, LlmClient, TokenChunk};
use crate::retrieval::{RetrievalEngine, RetrievalRequest};
use crate::tools::{parse_command, DispatchOutcome, ToolRegistry};

const INTENT_PROMPT: &str = r#"Classify the user's latest message. Reply with ONLY a JSON object:
{"intent": "search" | "tool" | "conversational" | "command", "needsSearch": true|false, "searchMode": "keyword"|"semantic"|"hybrid"|"graph", "suggestedTools": ["..."], "confidence": 0.0-1.0}"#;

const RETRIEVAL_LIMIT: usize = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentClassification {
    pub intent: String,
    pub needs_search: bool,
    pub search_mode: String,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    pub confidence: f64,
}

impl Default for IntentClassification {
    fn default() -> Self {
        Self {
            intent: "search".to_string(),
            needs_search: true,
            search_mode: "hybrid".to_string(),
            suggested_tools: Vec::new(),
            confidence: 0.5,
        }
    }
}

pub struct ChatOrchestrator {
    pub llm: std::sync::Arc<LlmClient>,
    pub retrieval: std::sync::Arc<RetrievalEngine>,
    pub tools: std::sync::Arc<ToolRegistry>,
    pub config: OrchestratorConfig,
}

/// Everything assembled ahead of the final streamed completion.
pub struct TurnContext {
    pub intent: IntentClassification,
    pub search_results: Vec<SearchResultItem>,
    pub tool_outcomes: Vec<DispatchOutcome>,
    pub citations: Vec<Citation>,
}

impl ChatOrchestrator {
    /// Run everything up to (but not including) the streamed completion:
    /// intent classification, retrieval, and tool dispatch.
    pub async fn prepare_turn(&self, history: &[Message], user_message: &str) -> TurnContext {
        let intent = self.classify_intent(history, user_message).await;

        let search_results = if intent.needs_search {
            let req = RetrievalRequest {
                query: user_message.to_string(),
                mode: intent.search_mode.clone(),
                filter: None,
                top_n: Some(RETRIEVAL_LIMIT),
                use_hyde: false,
                use_multi_query: false,
                rerank: true,
            };
            match self.retrieval.retrieve(&req).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(error = %e, "retrieval failed, proceeding without context");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let citations = search_results
            .iter()
            .map(|r| Citation {
                source: r.source.clone(),
                section: r.section.clone(),
                score: r.score,
            })
            .collect();

        let tool_outcomes = self.dispatch_commands(user_message).await;

        TurnContext {
            intent,
            search_results,
            tool_outcomes,
            citations,
        }
    }

    async fn classify_intent(&self, history: &[Message], user_message: &str) -> IntentClassification {
        let mut messages = vec![Message {
            role: Role::System,
            content: INTENT_PROMPT.to_string(),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        }];
        messages.extend(history.iter().cloned());
        messages.push(Message {
            role: Role::User,
            content: user_message.to_string(),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        });

        match self.llm.complete(&messages, None).await {
            Ok(reply) => extract_json(&reply.content)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "intent classification failed, defaulting to search");
                IntentClassification::default()
            }
        }
    }

    /// Parse and dispatch every slash command present in the message. A
    /// message with no leading `/` yields no tool outcomes.
    async fn dispatch_commands(&self, user_message: &str) -> Vec<DispatchOutcome> {
        let Some(invocation) = parse_command(user_message) else {
            return Vec::new();
        };
        let Some(descriptor) = self.tools.get(&invocation.command) else {
            return Vec::new();
        };

        match self.tools.dispatch(descriptor, &invocation).await {
            Ok(outcome) => vec![outcome],
            Err(e) => vec![DispatchOutcome {
                tool: descriptor.name.clone(),
                state: ragctl_core::tool::DispatchState::Failed,
                data: serde_json::Value::Null,
                success: false,
                error: Some(e.to_string()),
            }],
        }
    }

    /// Build the system prompt: persona, cite-sources instruction,
    /// retrieved context, and any tool results, then stream the reply.
    pub async fn stream_reply(
        &self,
        history: &[Message],
        user_message: &str,
        turn: &TurnContext,
    ) -> Result<mpsc::Receiver<TokenChunk>, crate::error::GatewayError> {
        let persona = self
            .config
            .resolve_system_prompt()
            .unwrap_or_else(|_| "You are a helpful assistant.".to_string());

        let mut system_prompt = persona;
        system_prompt.push_str(
            "\n\nWhen you use retrieved context, cite sources inline as [source:section].",
        );

        if !turn.search_results.is_empty() {
            system_prompt.push_str("\n\n## Context\n\n");
            for r in &turn.search_results {
                system_prompt.push_str(&format!(
                    "### [{}:{}]\n{}\n\n",
                    r.source, r.section, r.text
                ));
            }
        }

        if !turn.tool_outcomes.is_empty() {
            system_prompt.push_str("\n\n## Tool Results\n\n");
            for outcome in &turn.tool_outcomes {
                system_prompt.push_str(&outcome.to_markdown());
                system_prompt.push_str("\n\n");
            }
        }

        let mut messages = vec![Message {
            role: Role::System,
            content: system_prompt,
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        }];
        messages.extend(history.iter().cloned());
        messages.push(Message {
            role: Role::User,
            content: user_message.to_string(),
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        });

        self.llm.stream_complete(&messages, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intent_is_hybrid_search_with_half_confidence() {
        let default = IntentClassification::default();
        assert_eq!(default.intent, "search");
        assert!(default.needs_search);
        assert_eq!(default.search_mode, "hybrid");
        assert_eq!(default.confidence, 0.5);
    }

    #[test]
    fn parses_well_formed_intent_payload() {
        let raw = r#"{"intent":"tool","needsSearch":false,"searchMode":"keyword","suggestedTools":["search_knowledge"],"confidence":0.9}"#;
        let parsed: IntentClassification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.intent, "tool");
        assert!(!parsed.needs_search);
        assert_eq!(parsed.suggested_tools, vec!["search_knowledge".to_string()]);
    }
}
