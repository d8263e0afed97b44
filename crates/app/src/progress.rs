//! Ingestion progress reporting.
//!
//! Progress is emitted on **stderr** (human or JSON) so stdout stays
//! parseable for scripts, and optionally fanned out over a channel for
//! async consumers (the HTTP admin-rebuild endpoint).

use std::io::{IsTerminal, Write};

/// Stage of the ingestion pipeline a [`ProgressEvent`] belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Discovering,
    Parsing,
    Chunking,
    Embedding,
    GraphBuilding,
    Done,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovering => "discovering",
            Stage::Parsing => "parsing",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::GraphBuilding => "graph_building",
            Stage::Done => "done",
        }
    }
}

/// One progress event emitted during `ragctl ingest`.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub files_processed: u64,
    pub total_files: u64,
    pub chunks_processed: u64,
    pub total_chunks: u64,
    pub message: String,
}

/// Reports ingestion progress. Implementations write to stderr (human or
/// JSON) or forward to an async consumer.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = format!(
            "ingest  {}  {} / {} files  {} / {} chunks  {}\n",
            event.stage.as_str(),
            format_number(event.files_processed),
            format_number(event.total_files),
            format_number(event.chunks_processed),
            format_number(event.total_chunks),
            event.message,
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage.as_str(),
            "filesProcessed": event.files_processed,
            "totalFiles": event.total_files,
            "chunksProcessed": event.chunks_processed,
            "totalChunks": event.total_chunks,
            "message": event.message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Forwards every event over an unbounded channel; used when ingestion is
/// triggered over HTTP and progress is streamed back to the caller.
pub struct ChannelProgress(pub tokio::sync::mpsc::UnboundedSender<ProgressEvent>);

impl ProgressReporter for ChannelProgress {
    fn report(&self, event: &ProgressEvent) {
        let _ = self.0.send(event.clone());
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
