//! MCP JSON-RPC protocol bridge.
//!
//! Adapts the [`ToolRegistry`] into a proper MCP Streamable HTTP
//! endpoint that Cursor and other MCP clients can connect to using the
//! standard JSON-RPC protocol.
//!
//! Tools are exposed as MCP tools via `list_tools` / `call_tool`. There
//! are no prompts: personas are out of scope for this bridge.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use ragctl_core::tool::{ParamType, ToolDescriptor};

use crate::tools::ToolRegistry;

/// Bridges the tool registry to the MCP JSON-RPC protocol.
///
/// Each MCP session receives a clone of this struct (everything is
/// behind `Arc`), so all sessions share the same tool set.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Convert a tool descriptor into an rmcp `Tool`, building a JSON
    /// Schema object from its declared parameters.
    fn to_mcp_tool(descriptor: &ToolDescriptor) -> Tool {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &descriptor.parameters {
            let type_name = match param.param_type {
                ParamType::String => "string",
                ParamType::Number => "number",
                ParamType::Array => "array",
            };
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": type_name,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(param.name.clone());
            }
        }

        let mut schema = serde_json::Map::new();
        schema.insert("type".to_string(), serde_json::json!("object"));
        schema.insert("properties".to_string(), serde_json::Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), serde_json::json!(required));
        }

        Tool {
            name: Cow::Owned(descriptor.name.clone()),
            title: None,
            description: Some(Cow::Owned(descriptor.description.clone())),
            input_schema: Arc::new(schema),
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ragctl".to_string(),
                title: Some("ragctl".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Retrieval over a local Markdown knowledge corpus. Use search_knowledge for \
                 standard hybrid search, hyde_search when the query is vague and a hypothetical \
                 answer passage would retrieve better, and multi_query_search to fan a query out \
                 across several phrasings."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self.tools.descriptors().map(Self::to_mcp_tool).collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools
            .descriptors()
            .find(|d| d.name == name)
            .map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let parameters: BTreeMap<String, String> = request
            .arguments
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, s)
            })
            .collect();

        match self.tools.dispatch_by_name(&request.name, parameters).await {
            Ok(outcome) if outcome.success => {
                let text = serde_json::to_string_pretty(&outcome.data).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Ok(outcome) => Ok(CallToolResult::error(vec![Content::text(
                outcome.error.unwrap_or_else(|| "tool dispatch failed".to_string()),
            )])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}
