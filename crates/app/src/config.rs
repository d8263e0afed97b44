//! Layered configuration: a TOML file for static settings, environment
//! variables for remote endpoints and credentials.
//!
//! Static settings (corpus root, chunking parameters, server bind
//! address, system prompt) are loaded once at startup from a TOML file
//! (default: `ctx.toml`). Endpoint URLs and credentials are resolved
//! lazily from the environment the first time a client actually needs
//! them, so the process stays bootable even when a downstream service
//! isn't configured yet — only the call that needs it fails.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::GatewayError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    600
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            overfetch_factor: default_overfetch(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.7
}
fn default_candidate_k() -> i64 {
    30
}
fn default_final_limit() -> i64 {
    10
}
fn default_overfetch() -> i64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Persona/system-prompt source: a plain string, or `@path/to/file`.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { system_prompt: None }
    }
}

impl OrchestratorConfig {
    /// Default instruction-following persona, used when no `system_prompt`
    /// is configured.
    const DEFAULT_PROMPT: &'static str =
        "You are a helpful assistant. Answer using the provided context when \
         relevant, and cite sources as [source:section].";

    /// Resolve the configured persona, reading `@file` references from disk.
    pub fn resolve_system_prompt(&self) -> Result<String> {
        match &self.system_prompt {
            None => Ok(Self::DEFAULT_PROMPT.to_string()),
            Some(value) => match value.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read system_prompt file: {path}")),
                None => Ok(value.clone()),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub remote: std::collections::BTreeMap<String, RemoteToolConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteToolConfig {
    pub endpoint: String,
    #[serde(default)]
    pub description: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    Ok(config)
}

/// Resolve a required environment variable, surfacing a [`GatewayError::ConfigMissing`]
/// only at the point of use rather than at process startup.
pub fn require_env(name: &str) -> Result<String, GatewayError> {
    std::env::var(name).map_err(|_| GatewayError::ConfigMissing {
        message: format!("required environment variable {name} is not set"),
    })
}

/// Resolve an optional environment variable with a default.
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
