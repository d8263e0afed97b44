//! LLM client: one-shot completion and SSE-streamed completion, with
//! lazily resolved provider credentials and a reusable pooled
//! `reqwest::Client`.

use futures::StreamExt;
use ragctl_core::models::{Message, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{env_or, require_env};
use crate::error::GatewayError;

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool/function declaration surfaced to the model for function-calling.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One token/delta chunk of a streamed completion.
#[derive(Debug, Clone)]
pub struct TokenChunk {
    pub delta: String,
    pub done: bool,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> String {
        env_or("LLM_BASE_URL", "http://localhost:11434")
    }

    fn model(&self) -> String {
        env_or("LLM_MODEL", "llama3")
    }

    fn api_key(&self) -> Result<String, GatewayError> {
        require_env("LLM_API_KEY")
    }

    /// One-shot completion; returns the assistant's reply as a [`Message`].
    pub async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<Message, GatewayError> {
        let api_key = self.api_key();
        let mut req_builder = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url()))
            .json(&ChatRequest {
                model: self.model(),
                messages: messages.iter().map(to_wire_message).collect(),
                tools: tools.map(|t| t.to_vec()),
                stream: false,
            });
        if let Ok(key) = &api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let resp = req_builder.send().await.map_err(|e| GatewayError::RemoteUnavailable {
            message: format!("LLM endpoint unreachable: {e}"),
        })?;

        if !resp.status().is_success() {
            return Err(GatewayError::RemoteBadResponse {
                message: format!("LLM endpoint returned {}", resp.status()),
            });
        }

        let body: ChatResponse = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(Message {
            role: Role::Assistant,
            content,
            citations: Vec::new(),
            tool_results: Vec::new(),
            created_at: chrono::Utc::now(),
        })
    }

    /// Streamed completion: forwards SSE `data: {...}` frames as
    /// [`TokenChunk`]s through a bounded channel, terminated by
    /// `data: [DONE]` or the channel's consumer being dropped.
    pub async fn stream_complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<mpsc::Receiver<TokenChunk>, GatewayError> {
        let (tx, rx) = mpsc::channel(32);
        let api_key = self.api_key();

        let mut req_builder = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url()))
            .json(&ChatRequest {
                model: self.model(),
                messages: messages.iter().map(to_wire_message).collect(),
                tools: tools.map(|t| t.to_vec()),
                stream: true,
            });
        if let Ok(key) = &api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let resp = req_builder.send().await.map_err(|e| GatewayError::RemoteUnavailable {
            message: format!("LLM endpoint unreachable: {e}"),
        })?;

        if !resp.status().is_success() {
            return Err(GatewayError::RemoteBadResponse {
                message: format!("LLM endpoint returned {}", resp.status()),
            });
        }

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(next) = stream.next().await {
                let Ok(bytes) = next else { break };
                buf.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(idx) = buf.find("\n\n") {
                    let frame = buf[..idx].to_string();
                    buf.drain(..idx + 2);
                    let Some(data) = frame.strip_prefix("data: ") else {
                        continue;
                    };
                    if data.trim() == "[DONE]" {
                        let _ = tx.send(TokenChunk { delta: String::new(), done: true }).await;
                        return;
                    }
                    if let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) {
                        if let Some(choice) = parsed.choices.into_iter().next() {
                            if let Some(delta) = choice.delta.content {
                                if tx
                                    .send(TokenChunk { delta, done: false })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn to_wire_message(m: &Message) -> WireMessage {
    WireMessage {
        role: match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
        .to_string(),
        content: m.content.clone(),
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclaration>>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Best-effort JSON extraction: tolerates a fenced code block or
/// leading/trailing prose around a JSON object or array by scanning for
/// the first balanced `{`/`[` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }
        let open = b;
        let close = if open == b'{' { b'}' } else { b']' };
        let mut depth = 0i32;
        for (j, &c) in bytes[i..].iter().enumerate() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[i..i + j + 1];
                    if let Ok(v) = serde_json::from_str(candidate) {
                        return Some(v);
                    }
                    break;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_object_from_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"a\": 1}\n```\nHope that helps.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extracts_json_array_with_leading_sentence() {
        let text = "Entities found: [{\"name\": \"Rust\"}]";
        let value = extract_json(text).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn returns_none_for_non_json_text() {
        assert!(extract_json("no json here at all").is_none());
    }
}
