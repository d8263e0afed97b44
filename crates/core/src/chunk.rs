//! Token-budgeted, overlap-aware chunker.
//!
//! Splits a [`Document`]'s sections into [`Chunk`]s that respect a
//! configurable token budget, carrying overlap from the tail of one
//! chunk into the head of the next so that retrieval keeps nearby
//! context together. Fenced code blocks and list items are treated as
//! atomic: a block never splits across two chunks unless it alone
//! exceeds the budget.
//!
//! # Algorithm (per section)
//!
//! 1. Split the section body on blank-line boundaries into blocks.
//! 2. Accumulate blocks into a running chunk. Before appending a block,
//!    if the running total would exceed `max_tokens` and the chunk is
//!    non-empty, emit the chunk and seed the next one with a suffix of
//!    the previous chunk's text bounded by `overlap` tokens.
//! 3. A fenced code block or list item is never split internally; if a
//!    single block alone exceeds the budget, it is emitted as its own
//!    chunk.
//! 4. Every emitted chunk's text is prefixed with its section heading.
//!
//! Token count is approximated as `ceil(chars / 4)`, matching the
//! estimation the rest of the pipeline (embedding batching, LLM context
//! budgeting) uses.

use uuid::Uuid;

use crate::models::{Chunk, Document, DocumentType, Section};
use std::collections::BTreeSet;

/// Approximate characters-per-token ratio used throughout the pipeline.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default token budget per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 600;

/// Default overlap, in tokens, carried from one chunk into the next.
pub const DEFAULT_OVERLAP: usize = 100;

fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Whether a block is a fenced code block (must never be split).
fn is_fenced_code_block(block: &str) -> bool {
    let trimmed = block.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Whether a block is a list (bullet or numbered) and should stay atomic.
fn is_list_block(block: &str) -> bool {
    block.lines().next().is_some_and(|first| {
        let t = first.trim_start();
        t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") || {
            let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
            !digits.is_empty() && t[digits.len()..].starts_with(". ")
        }
    })
}

/// Chunk a full [`Document`] across all of its sections.
///
/// `total_chunks` is backfilled across the whole document once every
/// section has been processed, per the chunker's "atomic unit per
/// source" invariant.
pub fn chunk_document(doc: &Document, max_tokens: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in &doc.sections {
        chunks.extend(chunk_section(
            &doc.path,
            section,
            doc.doc_type,
            &doc.tags,
            max_tokens,
            overlap,
        ));
    }

    let total = chunks.len() as i64;
    for (i, c) in chunks.iter_mut().enumerate() {
        c.chunk_index = i as i64;
        c.total_chunks = total;
    }

    chunks
}

/// Chunk a single [`Section`], producing chunks prefixed with its heading.
///
/// `chunk_index`/`total_chunks` are placeholders (`0`) here; callers that
/// chunk a whole document backfill them via [`chunk_document`].
pub fn chunk_section(
    source: &str,
    section: &Section,
    doc_type: DocumentType,
    tags: &BTreeSet<String>,
    max_tokens: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let body = section.body.trim();
    if body.is_empty() {
        return Vec::new();
    }

    let blocks: Vec<&str> = body.split("\n\n").filter(|b| !b.trim().is_empty()).collect();
    if blocks.is_empty() {
        return Vec::new();
    }

    let mut emitted: Vec<String> = Vec::new();
    let mut current = String::new();

    let mut flush = |buf: &mut String, emitted: &mut Vec<String>| {
        if !buf.trim().is_empty() {
            emitted.push(std::mem::take(buf));
        } else {
            buf.clear();
        }
    };

    for block in &blocks {
        let atomic = is_fenced_code_block(block) || is_list_block(block);
        let block_tokens = estimate_tokens(block);
        let current_tokens = estimate_tokens(&current);

        if !current.is_empty() && current_tokens + block_tokens > max_tokens {
            let carried_overlap = take_overlap_suffix(&current, overlap);
            flush(&mut current, &mut emitted);
            current = carried_overlap;
        }

        if block_tokens > max_tokens {
            // Oversized atomic or plain block: flush whatever is pending,
            // then emit the block alone (never split code/list content).
            if !current.is_empty() {
                flush(&mut current, &mut emitted);
            }
            if atomic || block_tokens > max_tokens {
                emitted.push((*block).to_string());
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(block);
    }

    if !current.trim().is_empty() {
        emitted.push(current);
    }

    emitted
        .into_iter()
        .map(|text| make_chunk(source, section, doc_type, tags, &text))
        .collect()
}

/// Take a suffix of `text` whose length is bounded by `overlap` tokens,
/// snapped to the nearest preceding blank-line boundary where possible.
fn take_overlap_suffix(text: &str, overlap: usize) -> String {
    if overlap == 0 || text.is_empty() {
        return String::new();
    }
    let max_chars = overlap * CHARS_PER_TOKEN;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let byte_len = text.len();
    let mut start = byte_len.saturating_sub(max_chars);
    while start < byte_len && !text.is_char_boundary(start) {
        start += 1;
    }
    let suffix = &text[start..];
    // Prefer to start the overlap at a blank-line or paragraph boundary.
    if let Some(pos) = suffix.find("\n\n") {
        suffix[pos + 2..].to_string()
    } else {
        suffix.to_string()
    }
}

fn make_chunk(
    source: &str,
    section: &Section,
    doc_type: DocumentType,
    tags: &BTreeSet<String>,
    body: &str,
) -> Chunk {
    let text = format!("{}\n\n{}", section.heading, body.trim());

    Chunk {
        id: Uuid::new_v4().to_string(),
        text,
        source: source.to_string(),
        section: section.heading.clone(),
        doc_type,
        tags: tags.clone(),
        chunk_index: 0,
        total_chunks: 0,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(sections: Vec<Section>) -> Document {
        Document {
            id: "doc-1".into(),
            path: "a.md".into(),
            title: "A".into(),
            doc_type: DocumentType::Documentation,
            tags: BTreeSet::new(),
            created_at: chrono::Utc::now(),
            raw_content: String::new(),
            sections,
        }
    }

    fn section(heading: &str, body: &str) -> Section {
        Section {
            heading: heading.to_string(),
            heading_level: 1,
            body: body.to_string(),
        }
    }

    #[test]
    fn small_section_yields_one_chunk() {
        let d = doc(vec![section("A", "para1\n\npara2")]);
        let chunks = chunk_document(&d, 600, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert!(chunks[0].text.contains("para1"));
        assert!(chunks[0].text.contains("para2"));
    }

    #[test]
    fn empty_section_is_skipped() {
        let d = doc(vec![section("Empty", "   \n\n  "), section("B", "content")]);
        let chunks = chunk_document(&d, 600, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "B");
    }

    #[test]
    fn chunk_indices_are_dense_permutation() {
        let body = (0..30)
            .map(|i| format!("Paragraph number {i} with some extra words to pad length."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let d = doc(vec![section("Big", &body)]);
        let chunks = chunk_document(&d, 20, 5);
        assert!(chunks.len() > 1);
        let mut seen: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        seen.sort();
        let expected: Vec<i64> = (0..chunks.len() as i64).collect();
        assert_eq!(seen, expected);
        for c in &chunks {
            assert_eq!(c.total_chunks, chunks.len() as i64);
        }
    }

    #[test]
    fn code_block_stays_atomic_even_if_oversized() {
        let code = format!("```\n{}\n```", "x".repeat(500));
        let d = doc(vec![section("Code", &code)]);
        let chunks = chunk_document(&d, 10, 2);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("```"));
    }

    #[test]
    fn token_budget_respected_within_overlap_tolerance() {
        let body = (0..50)
            .map(|i| format!("Sentence {i} goes here with filler text padding words."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let d = doc(vec![section("S", &body)]);
        let max_tokens = 30;
        let overlap = 10;
        let chunks = chunk_document(&d, max_tokens, overlap);
        for c in &chunks {
            assert!(estimate_tokens(&c.text) <= max_tokens + overlap + 20);
        }
    }

    #[test]
    fn heading_prefix_present_on_every_chunk() {
        let d = doc(vec![section("My Heading", "short body")]);
        let chunks = chunk_document(&d, 600, 100);
        assert!(chunks[0].text.starts_with("My Heading"));
    }
}
