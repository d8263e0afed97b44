//! Tool descriptor types for the registry and dispatcher.
//!
//! These types describe *what* a tool looks like (name, command token,
//! parameters) independent of *how* it is invoked (local handler vs.
//! remote endpoint) or *who* is asking (HTTP route, slash command, or
//! model function-call) — those concerns live in the app crate.

use serde::{Deserialize, Serialize};

/// The scalar/array type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Array,
}

/// One parameter in a [`ToolDescriptor`]'s declared schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

/// Where a dispatched tool call is executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolHandler {
    /// Invoked in-process (e.g. the built-in retrieval tools).
    Local,
    /// POSTed to a remote endpoint with bearer credentials from configuration.
    Remote { endpoint: String },
}

/// The immutable, declarative description of an invokable tool.
///
/// Invariant: the parameter set implied by an invocation must be a
/// subset of `parameters`; every parameter with `required: true` must be
/// present in the invocation before dispatch proceeds to `EXECUTING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub command: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub handler: ToolHandler,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl ToolDescriptor {
    /// Names of parameters declared `required: true`.
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

/// Dispatch lifecycle state for one tool invocation.
///
/// `Failed` is terminal and non-retrying within a single user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Parsed,
    Validated,
    Executing,
    Success,
    Failed,
}
