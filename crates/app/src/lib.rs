//! # ragctl
//!
//! **A local-first retrieval-augmented conversational gateway over a
//! Markdown knowledge corpus.**
//!
//! `ragctl` ingests a directory of Markdown documents, chunks and embeds
//! them, builds a lightweight knowledge graph from their content, and
//! exposes hybrid search and a tool-using chat orchestrator via a CLI,
//! an HTTP API, and an MCP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ Markdown  │──▶│  Ingestion   │──▶│  SQLite    │
//! │  corpus   │   │ Chunk+Embed  │   │ FTS5+Vec   │
//! └───────────┘   │ +GraphBuild  │   │ +Graph     │
//!                 └──────────────┘   └─────┬──────┘
//!                                          │
//!                      ┌───────────────────┼───────────────┐
//!                      ▼                   ▼               ▼
//!                 ┌──────────┐       ┌──────────┐    ┌──────────┐
//!                 │   CLI    │       │   HTTP   │    │   MCP    │
//!                 │ (ragctl) │       │ (Axum)   │    │ (rmcp)   │
//!                 └──────────┘       └──────────┘    └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`markdown`] discovers and parses front-matter + sections out of
//!    each file into a [`ragctl_core::models::Document`].
//! 2. [`ingest`] chunks each document ([`ragctl_core::chunk`]), embeds
//!    the chunks ([`embedding`]), upserts them into the vector store
//!    ([`sqlite_store`]), and extracts a knowledge graph
//!    ([`graph_builder`]) into the graph store ([`sqlite_graph`]).
//! 3. [`retrieval`] layers query rewriting (HyDE, multi-query),
//!    graph-guided candidate generation, reranking ([`reranker`]),
//!    deduplication, and result caching ([`sqlite_cache`]) on top of the
//!    pure hybrid-search algorithm in [`ragctl_core::search`].
//! 4. [`tools`] parses slash commands and dispatches local or remote
//!    tools. [`orchestrator`] classifies intent, invokes retrieval and
//!    tools, and streams a cited reply from the configured LLM
//!    ([`llm`]).
//! 5. Results are exposed via the CLI, [`server`] (HTTP), and [`mcp`].
//!
//! ## Search Modes
//!
//! | Mode | Engine | Requires Embeddings |
//! |------|--------|---------------------|
//! | `keyword` | SQLite FTS5 (BM25) | No |
//! | `semantic` | Cosine similarity over vectors | Yes |
//! | `hybrid` | Weighted merge (configurable α) | Yes |
//! | `graph` | Entity lookup → document fan-out → filtered search | Yes |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`markdown`] | Front-matter + section parsing for the corpus |
//! | [`embedding`] | HTTP embedding client with retry/backoff |
//! | [`llm`] | Chat-completion client, streaming and one-shot |
//! | [`graph_builder`] | LLM-assisted knowledge graph extraction |
//! | [`ingest`] | Ingestion pipeline: discover → parse → chunk → embed → store |
//! | [`retrieval`] | Query rewriting, graph-guided search, reranking, caching |
//! | [`reranker`] | Cross-encoder / LLM reranking of candidate results |
//! | [`tools`] | Slash-command parsing, validation, local/remote dispatch |
//! | [`orchestrator`] | Intent classification, retrieval, tool dispatch, streaming |
//! | [`sqlite_store`] | SQLite-backed vector store (FTS5 + BLOB vectors) |
//! | [`sqlite_graph`] | SQLite-backed knowledge graph store |
//! | [`sqlite_cache`] | SQLite-backed cache + rate limiter |
//! | [`server`] | HTTP gateway (Axum) with CORS and SSE chat streaming |
//! | [`mcp`] | MCP JSON-RPC bridge over the tool registry |
//! | [`progress`] | Ingestion progress reporting (human, JSON, channel) |
//! | [`db`] | SQLite connection pool with WAL mode, schema migrations |
//! | [`error`] | Typed error taxonomy and its HTTP mapping |
//!
//! ## Configuration
//!
//! `ragctl` is configured via a TOML file (default: `ragctl.toml`). See
//! [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod graph_builder;
pub mod ingest;
pub mod llm;
pub mod markdown;
pub mod mcp;
pub mod orchestrator;
pub mod progress;
pub mod reranker;
pub mod retrieval;
pub mod server;
pub mod sqlite_cache;
pub mod sqlite_graph;
pub mod sqlite_store;
pub mod tools;

pub use error::GatewayError;
pub use ragctl_core::{chunk, models, search, store, tool};
