//! Ingestion pipeline: discover → parse → chunk → embed → store, with a
//! throttled per-document graph-extraction pass.
//!
//! Per-file parse failures are logged and skipped rather than aborting
//! the whole run — one malformed document should not block the rest of
//! the corpus from becoming searchable.

use anyhow::Result;
use chrono::NaiveDate;
use ragctl_core::chunk::chunk_document;
use ragctl_core::models::Document;
use ragctl_core::store::{GraphStore, Store};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::HttpEmbeddingClient;
use crate::graph_builder;
use crate::llm::LlmClient;
use crate::markdown;
use crate::progress::{ProgressEvent, ProgressReporter, Stage};

/// Minimum spacing between graph-extraction LLM calls, to stay polite to
/// a locally hosted model and keep ingestion throughput predictable.
const GRAPH_THROTTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct IngestOptions {
    pub full: bool,
    pub dry_run: bool,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub skip_graph: bool,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IngestSummary {
    pub files_discovered: u64,
    pub files_parsed: u64,
    pub files_failed: u64,
    pub chunks_written: u64,
    pub graph_nodes: u64,
    pub graph_edges: u64,
}

pub async fn run_ingest(
    config: &Config,
    store: &dyn Store,
    graph: &dyn GraphStore,
    embedder: &HttpEmbeddingClient,
    llm: &LlmClient,
    reporter: &dyn ProgressReporter,
    opts: &IngestOptions,
) -> Result<IngestSummary> {
    let mut files = markdown::discover_files(&config.corpus.root);
    let mut summary = IngestSummary {
        files_discovered: files.len() as u64,
        ..Default::default()
    };

    filter_by_date(&mut files, opts.since.as_deref(), opts.until.as_deref())?;
    if let Some(limit) = opts.limit {
        files.truncate(limit);
    }

    reporter.report(&ProgressEvent {
        stage: Stage::Discovering,
        files_processed: 0,
        total_files: files.len() as u64,
        chunks_processed: 0,
        total_chunks: 0,
        message: format!("found {} markdown files", files.len()),
    });

    if opts.dry_run {
        let mut total_chunks = 0u64;
        for path in &files {
            match markdown::parse_file(path, &config.corpus.root) {
                Ok(doc) => {
                    total_chunks += chunk_document(
                        &doc,
                        config.chunking.max_tokens,
                        config.chunking.overlap_tokens,
                    )
                    .len() as u64;
                    summary.files_parsed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dry-run parse failed");
                    summary.files_failed += 1;
                }
            }
        }
        summary.chunks_written = total_chunks;
        return Ok(summary);
    }

    if opts.full {
        store.reset_collection().await?;
    }

    let mut documents: Vec<Document> = Vec::with_capacity(files.len());
    for (i, path) in files.iter().enumerate() {
        match markdown::parse_file(path, &config.corpus.root) {
            Ok(doc) => {
                summary.files_parsed += 1;
                documents.push(doc);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unparsable file");
                summary.files_failed += 1;
            }
        }
        reporter.report(&ProgressEvent {
            stage: Stage::Parsing,
            files_processed: i as u64 + 1,
            total_files: files.len() as u64,
            chunks_processed: 0,
            total_chunks: 0,
            message: String::new(),
        });
    }

    let mut all_chunks = Vec::new();
    for doc in &documents {
        store.delete_by_source(&doc.path).await?;
        let chunks = chunk_document(doc, config.chunking.max_tokens, config.chunking.overlap_tokens);
        all_chunks.extend(chunks);
    }

    let total_chunks = all_chunks.len() as u64;
    reporter.report(&ProgressEvent {
        stage: Stage::Chunking,
        files_processed: documents.len() as u64,
        total_files: files.len() as u64,
        chunks_processed: 0,
        total_chunks,
        message: format!("{total_chunks} chunks"),
    });

    let texts: Vec<String> = all_chunks.iter().map(|c| c.text.clone()).collect();
    let mut embedded = 0usize;
    let vectors = embedder
        .embed_documents(&texts, |done, total| {
            embedded = done;
            reporter.report(&ProgressEvent {
                stage: Stage::Embedding,
                files_processed: documents.len() as u64,
                total_files: files.len() as u64,
                chunks_processed: done as u64,
                total_chunks: total as u64,
                message: String::new(),
            });
        })
        .await?;

    for (chunk, vector) in all_chunks.iter().zip(vectors.iter()) {
        store.upsert(chunk, vector).await?;
    }
    summary.chunks_written = total_chunks;

    if !opts.skip_graph {
        for (i, doc) in documents.iter().enumerate() {
            match graph_builder::extract_and_merge(llm, graph, doc).await {
                Ok(outcome) => {
                    summary.graph_nodes += outcome.nodes_merged;
                    summary.graph_edges += outcome.edges_merged;
                }
                Err(e) => {
                    warn!(path = %doc.path, error = %e, "graph extraction failed, continuing");
                }
            }
            reporter.report(&ProgressEvent {
                stage: Stage::GraphBuilding,
                files_processed: i as u64 + 1,
                total_files: documents.len() as u64,
                chunks_processed: total_chunks,
                total_chunks,
                message: String::new(),
            });
            if i + 1 < documents.len() {
                tokio::time::sleep(GRAPH_THROTTLE).await;
            }
        }
    }

    reporter.report(&ProgressEvent {
        stage: Stage::Done,
        files_processed: documents.len() as u64,
        total_files: files.len() as u64,
        chunks_processed: total_chunks,
        total_chunks,
        message: "ingest complete".to_string(),
    });

    info!(
        files_parsed = summary.files_parsed,
        files_failed = summary.files_failed,
        chunks_written = summary.chunks_written,
        "ingest finished"
    );

    Ok(summary)
}

/// Re-ingest a single file: delete its existing chunks and re-run the
/// chunk → embed → upsert steps for it alone.
pub async fn reingest_file(
    config: &Config,
    store: &dyn Store,
    embedder: &HttpEmbeddingClient,
    path: &Path,
) -> Result<u64> {
    let doc = markdown::parse_file(path, &config.corpus.root)?;
    store.delete_by_source(&doc.path).await?;

    let chunks = chunk_document(&doc, config.chunking.max_tokens, config.chunking.overlap_tokens);
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await?;

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        store.upsert(chunk, vector).await?;
    }

    Ok(chunks.len() as u64)
}

fn filter_by_date(
    files: &mut Vec<std::path::PathBuf>,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<()> {
    if since.is_none() && until.is_none() {
        return Ok(());
    }
    let since_date = since
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?;
    let until_date = until
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?;

    files.retain(|path| {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from);
        let Some(modified) = modified else { return true };
        let date = modified.date_naive();
        if let Some(since) = since_date {
            if date < since {
                return false;
            }
        }
        if let Some(until) = until_date {
            if date > until {
                return false;
            }
        }
        true
    });

    Ok(())
}
