//! Tool registry & dispatcher.
//!
//! Parses a slash-prefixed command string into a named argument map,
//! validates it against a registered [`ToolDescriptor`], and dispatches
//! to either an in-process handler or a remote endpoint.

use anyhow::Result;
use ragctl_core::tool::{DispatchState, ParamType, ToolDescriptor, ToolHandler, ToolParameter};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, RemoteToolConfig};
use crate::error::GatewayError;
use crate::retrieval::{RetrievalEngine, RetrievalRequest};

/// Timeout applied to every remote tool dispatch.
const REMOTE_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed invocation before validation: command token plus named
/// arguments, folded per the slash-command grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedInvocation {
    pub command: String,
    pub arguments: BTreeMap<String, String>,
}

/// Parse a slash-prefixed command string.
///
/// Token 0 is the command. Subsequent `--flag=value` or `--flag value`
/// pairs become named arguments. Contiguous positional tokens fold into
/// an `input` argument, or `query` if `input` is already set.
pub fn parse_command(raw: &str) -> Option<ParsedInvocation> {
    let raw = raw.trim();
    let command = raw.split_whitespace().next()?;
    if !command.starts_with('/') {
        return None;
    }

    let rest = raw[command.len()..].trim_start();
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut arguments = BTreeMap::new();
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];
        if let Some(flag) = tok.strip_prefix("--") {
            if let Some((name, value)) = flag.split_once('=') {
                arguments.insert(name.to_string(), value.to_string());
                i += 1;
            } else if i + 1 < tokens.len() && !tokens[i + 1].starts_with("--") {
                arguments.insert(flag.to_string(), tokens[i + 1].to_string());
                i += 2;
            } else {
                arguments.insert(flag.to_string(), "true".to_string());
                i += 1;
            }
        } else {
            positional.push(tok.to_string());
            i += 1;
        }
    }

    if !positional.is_empty() {
        let key = if arguments.contains_key("input") {
            "query"
        } else {
            "input"
        };
        arguments.insert(key.to_string(), positional.join(" "));
    }

    Some(ParsedInvocation {
        command: command.to_string(),
        arguments,
    })
}

/// The outcome of one tool dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub tool: String,
    pub state: DispatchState,
    pub data: Value,
    pub success: bool,
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Render as a Markdown block for inclusion in an assistant turn.
    pub fn to_markdown(&self) -> String {
        if self.success {
            format!(
                "**{}**\n\n```json\n{}\n```",
                self.tool,
                serde_json::to_string_pretty(&self.data).unwrap_or_default()
            )
        } else {
            format!(
                "**{}** failed: {}",
                self.tool,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

pub struct ToolRegistry {
    descriptors: BTreeMap<String, ToolDescriptor>,
    retrieval: Arc<RetrievalEngine>,
    http: reqwest::Client,
    remote_tools: BTreeMap<String, RemoteToolConfig>,
}

impl ToolRegistry {
    pub fn new(config: &Config, retrieval: Arc<RetrievalEngine>) -> Self {
        let mut descriptors = BTreeMap::new();

        descriptors.insert("/search".to_string(), search_knowledge_descriptor());
        descriptors.insert("/hyde".to_string(), hyde_search_descriptor());
        descriptors.insert("/mqsearch".to_string(), multi_query_search_descriptor());

        for (name, remote) in &config.tools.remote {
            let command = format!("/{name}");
            descriptors.insert(
                command.clone(),
                ToolDescriptor {
                    name: name.clone(),
                    command,
                    description: remote.description.clone(),
                    parameters: vec![ToolParameter {
                        name: "input".to_string(),
                        param_type: ParamType::String,
                        description: "free-form input passed through to the remote tool".to_string(),
                        required: false,
                    }],
                    handler: ToolHandler::Remote {
                        endpoint: remote.endpoint.clone(),
                    },
                    examples: Vec::new(),
                },
            );
        }

        Self {
            descriptors,
            retrieval,
            http: reqwest::Client::new(),
            remote_tools: config.tools.remote.clone(),
        }
    }

    pub fn get(&self, command: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(command)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.values()
    }

    /// Validate a parsed invocation against its descriptor's required
    /// parameters, returning the first missing one.
    pub fn validate(
        descriptor: &ToolDescriptor,
        invocation: &ParsedInvocation,
    ) -> Result<(), GatewayError> {
        for required in descriptor.required_params() {
            if !invocation.arguments.contains_key(required) {
                return Err(GatewayError::Validation {
                    message: format!("Missing required parameter: {required}"),
                });
            }
        }
        Ok(())
    }

    /// Dispatch a single invocation by tool name (not the `/command`
    /// form), used by `/api/tools/execute` and model-directed function
    /// calls. `parameters` are the already-named arguments.
    pub async fn dispatch_by_name(
        &self,
        name: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<DispatchOutcome, GatewayError> {
        let descriptor = self
            .descriptors
            .values()
            .find(|d| d.name == name)
            .ok_or_else(|| GatewayError::NotFound {
                message: format!("unknown tool: {name}"),
            })?
            .clone();

        let invocation = ParsedInvocation {
            command: descriptor.command.clone(),
            arguments: parameters,
        };

        self.dispatch(&descriptor, &invocation).await
    }

    /// Run one invocation through `Parsed → Validated → Executing →
    /// {Success|Failed}`. `Failed` is terminal: callers do not retry
    /// within the same turn.
    pub async fn dispatch(
        &self,
        descriptor: &ToolDescriptor,
        invocation: &ParsedInvocation,
    ) -> Result<DispatchOutcome, GatewayError> {
        // Parsed -> Validated
        Self::validate(descriptor, invocation)?;

        // Validated -> Executing
        let result = match &descriptor.handler {
            ToolHandler::Local => self.dispatch_local(descriptor, invocation).await,
            ToolHandler::Remote { endpoint } => {
                self.dispatch_remote(descriptor, invocation, endpoint).await
            }
        };

        // Executing -> {Success|Failed}
        let (state, success, data, error) = match result {
            Ok(data) => (DispatchState::Success, true, data, None),
            Err(e) => (DispatchState::Failed, false, Value::Null, Some(e.to_string())),
        };

        Ok(DispatchOutcome {
            tool: descriptor.name.clone(),
            state,
            data,
            success,
            error,
        })
    }

    async fn dispatch_local(
        &self,
        descriptor: &ToolDescriptor,
        invocation: &ParsedInvocation,
    ) -> Result<Value> {
        let query = invocation
            .arguments
            .get("query")
            .or_else(|| invocation.arguments.get("input"))
            .cloned()
            .unwrap_or_default();
        let mode = invocation
            .arguments
            .get("mode")
            .cloned()
            .unwrap_or_else(|| "hybrid".to_string());
        let limit = invocation
            .arguments
            .get("limit")
            .and_then(|v| v.parse::<usize>().ok());

        let req = RetrievalRequest {
            query,
            mode,
            filter: None,
            top_n: limit,
            use_hyde: descriptor.name == "hyde_search",
            use_multi_query: descriptor.name == "multi_query_search",
            rerank: true,
        };

        let results = self.retrieval.retrieve(&req).await?;
        Ok(json!({ "results": results }))
    }

    async fn dispatch_remote(
        &self,
        _descriptor: &ToolDescriptor,
        invocation: &ParsedInvocation,
        endpoint: &str,
    ) -> Result<Value> {
        let payload: BTreeMap<&str, &str> = invocation
            .arguments
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut req = self.http.post(endpoint).json(&payload).timeout(REMOTE_TOOL_TIMEOUT);
        if let Some(name) = endpoint_tool_name(&self.remote_tools, endpoint) {
            if let Ok(token) = std::env::var(format!("TOOL_{}_TOKEN", name.to_uppercase())) {
                req = req.bearer_auth(token);
            }
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("remote tool returned {}", resp.status());
        }
        Ok(resp.json::<Value>().await?)
    }
}

fn endpoint_tool_name<'a>(
    remote_tools: &'a BTreeMap<String, RemoteToolConfig>,
    endpoint: &str,
) -> Option<&'a str> {
    remote_tools
        .iter()
        .find(|(_, cfg)| cfg.endpoint == endpoint)
        .map(|(name, _)| name.as_str())
}

fn search_knowledge_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "search_knowledge".to_string(),
        command: "/search".to_string(),
        description: "Search the knowledge base (keyword, semantic, or hybrid).".to_string(),
        parameters: vec![
            ToolParameter {
                name: "query".to_string(),
                param_type: ParamType::String,
                description: "the search query".to_string(),
                required: true,
            },
            ToolParameter {
                name: "mode".to_string(),
                param_type: ParamType::String,
                description: "keyword, semantic, or hybrid".to_string(),
                required: false,
            },
        ],
        handler: ToolHandler::Local,
        examples: vec!["/search --mode=semantic deployment checklist".to_string()],
    }
}

fn hyde_search_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "hyde_search".to_string(),
        command: "/hyde".to_string(),
        description: "Search using a hypothetical-answer embedding (HyDE).".to_string(),
        parameters: vec![ToolParameter {
            name: "query".to_string(),
            param_type: ParamType::String,
            description: "the search query".to_string(),
            required: true,
        }],
        handler: ToolHandler::Local,
        examples: vec!["/hyde what is the deploy rollback procedure".to_string()],
    }
}

fn multi_query_search_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "multi_query_search".to_string(),
        command: "/mqsearch".to_string(),
        description: "Search using several LLM-generated paraphrases of the query.".to_string(),
        parameters: vec![ToolParameter {
            name: "query".to_string(),
            param_type: ParamType::String,
            description: "the search query".to_string(),
            required: true,
        }],
        handler: ToolHandler::Local,
        examples: vec!["/mqsearch onboarding steps for new engineers".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flag_value_pairs() {
        let parsed = parse_command("/search --mode=semantic hello world").unwrap();
        assert_eq!(parsed.command, "/search");
        assert_eq!(parsed.arguments.get("mode").unwrap(), "semantic");
        assert_eq!(parsed.arguments.get("input").unwrap(), "hello world");
    }

    #[test]
    fn parses_space_separated_flag() {
        let parsed = parse_command("/search --mode semantic hello").unwrap();
        assert_eq!(parsed.arguments.get("mode").unwrap(), "semantic");
        assert_eq!(parsed.arguments.get("input").unwrap(), "hello");
    }

    #[test]
    fn non_slash_input_is_not_a_command() {
        assert!(parse_command("just chatting").is_none());
    }

    #[test]
    fn missing_required_parameter_fails_validation() {
        let descriptor = search_knowledge_descriptor();
        let invocation = ParsedInvocation {
            command: "/search".to_string(),
            arguments: BTreeMap::new(),
        };
        let err = ToolRegistry::validate(&descriptor, &invocation).unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn excess_parameters_are_not_errors() {
        let descriptor = search_knowledge_descriptor();
        let mut arguments = BTreeMap::new();
        arguments.insert("query".to_string(), "x".to_string());
        arguments.insert("unexpected".to_string(), "y".to_string());
        let invocation = ParsedInvocation {
            command: "/search".to_string(),
            arguments,
        };
        assert!(ToolRegistry::validate(&descriptor, &invocation).is_ok());
    }
}
