//! Markdown parser: file discovery, front-matter extraction, section
//! tree construction, and type/tag inference.
//!
//! Front matter is YAML delimited by `---` lines at the head of the
//! file. Unknown keys are preserved in a side map but not interpreted.
//! The body is walked with a CommonMark-compliant event parser
//! (`pulldown-cmark`); every heading closes the current section and
//! opens a new one.

use anyhow::Result;
use pulldown_cmark::{CowStr, Event, HeadingLevel, Parser, Tag, TagEnd};
use ragctl_core::models::{Document, DocumentType, Section};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Deserialize, Default)]
struct FrontMatter {
    title: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: std::collections::BTreeMap<String, serde_yaml::Value>,
}

/// Directory-prefix → [`DocumentType`] table, per the documented mapping.
const TYPE_PREFIXES: &[(&[&str], DocumentType)] = &[
    (
        &["CORE", "BIO", "EXPERTISE", "COMMUNICATION"],
        DocumentType::Documentation,
    ),
    (
        &["PROJECTS", "CELAYA_SOLUTIONS", "MUSIC"],
        DocumentType::Project,
    ),
    (&["PHILOSOPHY"], DocumentType::Philosophy),
    (
        &["COGNITIVE_PATTERNS", "RESEARCH", "MENTAL_ARTIFACTS"],
        DocumentType::Research,
    ),
];

/// Closed keyword list used for tag inference from body content.
const TAG_KEYWORDS: &[&str] = &[
    "clos", "neural", "cognitive", "ai", "research", "flow", "optimization",
    "architecture", "agent", "chess", "artifact", "music", "production",
];

/// Recursively discover `.md` files under `root`.
pub fn discover_files(root: &Path) -> Vec<std::path::PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Parse one Markdown file into a [`Document`]. A malformed front-matter
/// block is a recoverable per-file failure: callers should continue with
/// the remaining files rather than abort the whole discovery pass.
pub fn parse_file(path: &Path, root: &Path) -> Result<Document> {
    let raw = std::fs::read_to_string(path)?;
    let (front_matter, body) = split_front_matter(&raw)?;

    let rel_path = path.strip_prefix(root).unwrap_or(path);
    let inferred_type = infer_type(rel_path);
    let doc_type = front_matter
        .type_
        .as_deref()
        .and_then(|t| t.parse::<DocumentType>().ok())
        .unwrap_or(inferred_type);

    let mut tags: BTreeSet<String> = front_matter.tags.iter().cloned().collect();
    tags.extend(folder_tags(rel_path));
    tags.extend(keyword_tags(&body));

    let title = front_matter
        .title
        .clone()
        .unwrap_or_else(|| default_title(path));

    let created_at = front_matter
        .date
        .as_deref()
        .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);

    let sections = walk_sections(&body);

    Ok(Document {
        id: uuid::Uuid::new_v4().to_string(),
        path: rel_path.to_string_lossy().to_string(),
        title,
        doc_type,
        tags,
        created_at,
        raw_content: raw,
        sections,
    })
}

fn default_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "untitled".to_string())
}

fn split_front_matter(raw: &str) -> Result<(FrontMatter, String)> {
    let trimmed = raw.trim_start_matches('\u{feff}');
    if let Some(rest) = trimmed.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---") {
            let yaml = &rest[..end];
            let after = &rest[end + 4..];
            let body = after.strip_prefix('\n').unwrap_or(after);
            let fm: FrontMatter = serde_yaml::from_str(yaml)
                .map_err(|e| anyhow::anyhow!("malformed front matter: {e}"))?;
            return Ok((fm, body.to_string()));
        }
    }
    Ok((FrontMatter::default(), trimmed.to_string()))
}

fn infer_type(rel_path: &Path) -> DocumentType {
    let first_component = rel_path
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_uppercase())
        .unwrap_or_default();

    for (prefixes, ty) in TYPE_PREFIXES {
        if prefixes.iter().any(|p| *p == first_component) {
            return *ty;
        }
    }
    DocumentType::Documentation
}

fn folder_tags(rel_path: &Path) -> BTreeSet<String> {
    rel_path
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .map(|c| {
            c.as_os_str()
                .to_string_lossy()
                .to_lowercase()
                .replace(['_', '-'], " ")
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn keyword_tags(body: &str) -> BTreeSet<String> {
    let lower = body.to_lowercase();
    TAG_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
        .collect()
}

/// Walk the Markdown AST and split the body into [`Section`]s on every
/// heading boundary. A document with no headings yields a single
/// "Main Content" section.
fn walk_sections(body: &str) -> Vec<Section> {
    let parser = Parser::new(body);

    let mut sections = Vec::new();
    let mut current_heading = "Main Content".to_string();
    let mut current_level: u8 = 0;
    let mut current_body = String::new();
    let mut heading_buf = String::new();
    let mut in_heading = false;
    let mut list_stack: Vec<Option<u64>> = Vec::new();

    let flush = |heading: &str, level: u8, body: &str, out: &mut Vec<Section>| {
        if !body.trim().is_empty() || !out.is_empty() {
            out.push(Section {
                heading: heading.to_string(),
                heading_level: level.max(1),
                body: body.trim().to_string(),
            });
        }
    };

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                flush(
                    &current_heading,
                    current_level,
                    &current_body,
                    &mut sections,
                );
                current_body.clear();
                heading_buf.clear();
                in_heading = true;
                current_level = heading_level_to_u8(level);
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                current_heading = heading_buf.trim().to_string();
                if current_heading.is_empty() {
                    current_heading = "Untitled Section".to_string();
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if in_heading {
                    push_heading_text(&mut heading_buf, &event, &text);
                } else {
                    current_body.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if !in_heading {
                    current_body.push('\n');
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                current_body.push_str(&code_fence_open(&kind));
            }
            Event::End(TagEnd::CodeBlock) => {
                current_body.push_str("```\n");
            }
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                if !in_heading {
                    current_body.push_str("\n\n");
                }
            }
            Event::Start(Tag::List(start)) => {
                list_stack.push(start);
            }
            Event::End(TagEnd::List(_)) => {
                list_stack.pop();
            }
            Event::Start(Tag::Item) => {
                if !in_heading {
                    match list_stack.last_mut() {
                        Some(Some(n)) => {
                            current_body.push_str(&format!("{n}. "));
                            *n += 1;
                        }
                        _ => current_body.push_str("- "),
                    }
                }
            }
            Event::End(TagEnd::Item) => {
                if !in_heading {
                    current_body.push('\n');
                }
            }
            _ => {}
        }
    }

    // No sections were ever flushed (no headings encountered): treat the
    // whole body as one section.
    if sections.is_empty() && !current_body.trim().is_empty() {
        sections.push(Section {
            heading: "Main Content".to_string(),
            heading_level: 1,
            body: current_body.trim().to_string(),
        });
    } else {
        flush(&current_heading, current_level, &current_body, &mut sections);
    }

    sections
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn push_heading_text(buf: &mut String, event: &Event, text: &CowStr) {
    if matches!(event, Event::Code(_)) {
        buf.push('`');
        buf.push_str(text);
        buf.push('`');
    } else {
        buf.push_str(text);
    }
}

fn code_fence_open(kind: &pulldown_cmark::CodeBlockKind) -> String {
    match kind {
        pulldown_cmark::CodeBlockKind::Fenced(lang) => format!("```{lang}\n"),
        pulldown_cmark::CodeBlockKind::Indented => "```\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn front_matter_and_headings_produce_sections() {
        let raw = "---\ntitle: Test\ntags: [foo]\n---\n# A\n\npara1\n\n# B\n\npara2\n";
        let (fm, body) = split_front_matter(raw).unwrap();
        assert_eq!(fm.title.as_deref(), Some("Test"));
        let sections = walk_sections(&body);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "A");
        assert_eq!(sections[1].heading, "B");
    }

    #[test]
    fn no_headings_yields_main_content_section() {
        let sections = walk_sections("just a paragraph, no headings");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "Main Content");
    }

    #[test]
    fn unknown_directory_prefix_yields_documentation() {
        let ty = infer_type(&PathBuf::from("RANDOM/file.md"));
        assert_eq!(ty, DocumentType::Documentation);
    }

    #[test]
    fn known_prefix_maps_to_project_type() {
        let ty = infer_type(&PathBuf::from("PROJECTS/thing.md"));
        assert_eq!(ty, DocumentType::Project);
    }

    #[test]
    fn malformed_front_matter_errors_without_panicking() {
        let raw = "---\ntitle: [unterminated\n---\nbody";
        let result = split_front_matter(raw);
        assert!(result.is_err());
    }

    #[test]
    fn bullet_list_markers_are_reconstructed() {
        let sections = walk_sections("# A\n\n- one\n- two\n- three\n");
        assert!(sections[0].body.contains("- one"));
        assert!(sections[0].body.contains("- two"));
    }

    #[test]
    fn numbered_list_markers_are_reconstructed() {
        let sections = walk_sections("# A\n\n1. first\n2. second\n");
        assert!(sections[0].body.contains("1. first"));
        assert!(sections[0].body.contains("2. second"));
    }

    #[test]
    fn section_order_matches_document_order() {
        let sections = walk_sections("# One\n\na\n\n# Two\n\nb\n\n# Three\n\nc\n");
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["One", "Two", "Three"]);
    }
}
