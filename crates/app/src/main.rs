//! `ragctl` CLI: initialize the database, ingest a Markdown corpus,
//! search it from the command line, or start the HTTP / MCP servers.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ragctl_core::search::SearchParams;
use ragctl_core::store::{CacheStore, GraphStore, Store};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragctl::config::{self, Config};
use ragctl::db;
use ragctl::embedding::HttpEmbeddingClient;
use ragctl::llm::LlmClient;
use ragctl::mcp::McpBridge;
use ragctl::orchestrator::ChatOrchestrator;
use ragctl::progress::ProgressMode;
use ragctl::reranker::{HttpReranker, NoOpReranker, Reranker};
use ragctl::retrieval::{RetrievalEngine, RetrievalRequest};
use ragctl::server::{self, AppState};
use ragctl::sqlite_cache::SqliteCacheStore;
use ragctl::sqlite_graph::SqliteGraphStore;
use ragctl::sqlite_store::SqliteStore;
use ragctl::ingest;
use ragctl::tools::ToolRegistry;

#[derive(Parser)]
#[command(
    name = "ragctl",
    about = "A local-first retrieval-augmented conversational gateway over a Markdown knowledge corpus",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./ragctl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and run schema migrations
    Init,

    /// Ingest the configured Markdown corpus
    Ingest {
        /// Ignore existing chunks, reingest everything from scratch
        #[arg(long)]
        full: bool,

        /// Show file/chunk counts without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Only process files modified on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Only process files modified on or before this date (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of files to process
        #[arg(long)]
        limit: Option<usize>,

        /// Skip knowledge graph extraction
        #[arg(long)]
        skip_graph: bool,
    },

    /// Search the indexed corpus
    Search {
        /// Search query
        query: String,

        /// Search mode: keyword, semantic, hybrid, or graph
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Query-rewrite method: standard, hyde, or multi
        #[arg(long, default_value = "standard")]
        method: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start a server
    Serve {
        #[command(subcommand)]
        target: ServeTarget,
    },

    /// Print vector store, graph, and cache totals
    Stats,

    /// Generate shell completion scripts
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ServeTarget {
    /// Start the HTTP gateway (chat, search, tools, admin)
    Http,
    /// Start the MCP JSON-RPC bridge
    Mcp,
}

/// Everything wired up from configuration, shared by ingest/search/serve/stats.
struct Bootstrap {
    config: Config,
    store: Arc<dyn Store>,
    graph: Arc<dyn GraphStore>,
    cache: Arc<dyn CacheStore>,
    embedder: Arc<HttpEmbeddingClient>,
    llm: Arc<LlmClient>,
    reranker: Arc<dyn Reranker>,
}

async fn bootstrap(config_path: &PathBuf) -> Result<Bootstrap> {
    let config = config::load_config(config_path)?;
    let pool = db::connect(&config).await?;

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));
    let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()));
    let cache: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(pool));

    let embedding_model = config::env_or("EMBEDDING_MODEL", "text-embedding-3-small");
    let embedding_dims: usize = config::env_or("EMBEDDING_DIMS", "1536")
        .parse()
        .unwrap_or(1536);
    let embedder = Arc::new(HttpEmbeddingClient::new(
        embedding_model,
        embedding_dims,
        cache.clone(),
    ));

    let llm = Arc::new(LlmClient::new());

    let reranker: Arc<dyn Reranker> = if std::env::var("RERANK_BASE_URL").is_ok() {
        Arc::new(HttpReranker::new())
    } else {
        Arc::new(NoOpReranker)
    };

    Ok(Bootstrap {
        config,
        store,
        graph,
        cache,
        embedder,
        llm,
        reranker,
    })
}

fn retrieval_engine(b: &Bootstrap) -> RetrievalEngine {
    let r = &b.config.retrieval;
    RetrievalEngine {
        store: b.store.clone(),
        graph: b.graph.clone(),
        cache: b.cache.clone(),
        embedder: b.embedder.clone(),
        llm: b.llm.clone(),
        reranker: b.reranker.clone(),
        params: SearchParams {
            hybrid_alpha: r.hybrid_alpha,
            candidate_k_keyword: r.candidate_k_keyword,
            candidate_k_vector: r.candidate_k_vector,
            final_limit: r.final_limit,
        },
        overfetch_factor: r.overfetch_factor,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init => {
            let config = config::load_config(&cli.config)?;
            db::connect(&config).await?;
            println!("Database initialized.");
        }

        Commands::Ingest {
            full,
            dry_run,
            since,
            until,
            limit,
            skip_graph,
        } => {
            let b = bootstrap(&cli.config).await?;
            let reporter = ProgressMode::default_for_tty().reporter();
            let opts = ingest::IngestOptions {
                full: *full,
                dry_run: *dry_run,
                since: since.clone(),
                until: until.clone(),
                limit: *limit,
                skip_graph: *skip_graph,
            };
            let summary = ingest::run_ingest(
                &b.config,
                b.store.as_ref(),
                b.graph.as_ref(),
                &b.embedder,
                &b.llm,
                reporter.as_ref(),
                &opts,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Search {
            query,
            mode,
            method,
            limit,
        } => {
            let b = bootstrap(&cli.config).await?;
            let engine = retrieval_engine(&b);
            let req = RetrievalRequest {
                query: query.clone(),
                mode: mode.clone(),
                filter: None,
                top_n: *limit,
                use_hyde: method == "hyde",
                use_multi_query: method == "multi",
                rerank: true,
            };
            let results = engine.retrieve(&req).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Serve { target } => {
            let b = bootstrap(&cli.config).await?;
            let retrieval = Arc::new(retrieval_engine(&b));
            let tools = Arc::new(ToolRegistry::new(&b.config, retrieval.clone()));

            match target {
                ServeTarget::Http => {
                    let orchestrator = Arc::new(ChatOrchestrator {
                        llm: b.llm.clone(),
                        retrieval: retrieval.clone(),
                        tools: tools.clone(),
                        config: b.config.orchestrator.clone(),
                    });
                    let state = AppState {
                        config: Arc::new(b.config.clone()),
                        store: b.store.clone(),
                        graph: b.graph.clone(),
                        cache: b.cache.clone(),
                        retrieval,
                        tools,
                        orchestrator,
                    };
                    server::run_server(state).await?;
                }
                ServeTarget::Mcp => {
                    run_mcp_server(&b.config.server.bind, McpBridge::new(tools)).await?;
                }
            }
        }

        Commands::Stats => {
            let b = bootstrap(&cli.config).await?;
            let vector = b.store.stats().await?;
            let graph = b.graph.stats().await?;
            let cache_keys = b.cache.total_keys().await?;
            println!(
                "{}",
                serde_json::json!({
                    "vectorDatabase": vector,
                    "knowledgeGraph": graph,
                    "cache": { "totalKeys": cache_keys },
                })
            );
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, name, &mut io::stdout());
        }
    }

    Ok(())
}

/// Serve the MCP bridge over Streamable HTTP at `/mcp`.
async fn run_mcp_server(bind: &str, bridge: McpBridge) -> Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    };

    let service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let app = axum::Router::new().nest_service("/mcp", service);
    tracing::info!(bind = %bind, "MCP bridge listening");

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
