//! Markdown documentation parser.
//!
//! Documents are split on level-2 headings: everything from one `## ` line
//! up to (but excluding) the next is a single chunk, including nested
//! deeper headings and fenced code blocks. Heading markers inside fences
//! are not headings. Content above the first level-2 heading contributes
//! only the document title, recorded as metadata on every chunk.
//!
//! The `item_type` is a document type chosen by keyword match on the file
//! path: architecture, api, authentication, deployment, development,
//! integration, or `documentation` when nothing matches.

use crate::chunk::Chunk;
use crate::config::Language;

use super::{base_chunk, decode_utf8, ParseOutcome, Parser};

pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn language(&self) -> Language {
        Language::Documentation
    }

    fn parse(&self, relative_path: &str, bytes: &[u8], repo_id: &str) -> ParseOutcome {
        let source = match decode_utf8(relative_path, bytes) {
            Ok(text) => text,
            Err(outcome) => return outcome,
        };
        let lines: Vec<&str> = source.lines().collect();
        let total_lines = lines.len();
        if source.trim().is_empty() {
            return ParseOutcome::ok(Vec::new(), total_lines);
        }

        let doc_type = doc_type_for_path(relative_path);
        let title = document_title(&lines);

        let mut sections: Vec<Section> = Vec::new();
        let mut in_fence = false;
        let mut fence_marker = "";

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if in_fence {
                if trimmed.starts_with(fence_marker) {
                    in_fence = false;
                }
                continue;
            }
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = true;
                fence_marker = if trimmed.starts_with("```") { "```" } else { "~~~" };
                continue;
            }
            if is_level_two_heading(line) {
                if let Some(open) = sections.last_mut() {
                    open.end = idx;
                }
                sections.push(Section {
                    heading: line[2..].trim().to_string(),
                    start: idx,
                    end: total_lines,
                });
            }
        }

        let chunks = sections
            .into_iter()
            .map(|section| {
                let mut end = section.end;
                while end > section.start + 1 && lines[end - 1].trim().is_empty() {
                    end -= 1;
                }
                let content = lines[section.start..end].join("\n");
                let item_name = if section.heading.is_empty() {
                    Chunk::anonymous_name(section.start + 1)
                } else {
                    section.heading.clone()
                };
                let mut chunk = base_chunk(
                    Language::Documentation,
                    relative_path,
                    repo_id,
                    doc_type,
                    item_name,
                    content,
                    section.start + 1,
                    end,
                );
                chunk
                    .metadata
                    .insert("doc_type".into(), serde_json::Value::String(doc_type.into()));
                chunk.metadata.insert(
                    "section_level".into(),
                    serde_json::Value::Number(2.into()),
                );
                if let Some(title) = &title {
                    chunk
                        .metadata
                        .insert("title".into(), serde_json::Value::String(title.clone()));
                }
                chunk
            })
            .collect();

        ParseOutcome::ok(chunks, total_lines)
    }
}

struct Section {
    heading: String,
    start: usize,
    end: usize,
}

/// `## ` exactly — deeper headings stay inside their parent section.
fn is_level_two_heading(line: &str) -> bool {
    line.starts_with("## ") || line.trim_end() == "##"
}

/// First `# ` line is the document title.
fn document_title(lines: &[&str]) -> Option<String> {
    let mut in_fence = false;
    for line in lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && line.starts_with("# ") {
            return Some(line[2..].trim().to_string());
        }
    }
    None
}

/// Document type by ordered keyword match on the lowercased path.
fn doc_type_for_path(path: &str) -> &'static str {
    let path = path.to_lowercase();
    const RULES: [(&[&str], &str); 6] = [
        (&["architecture", "arch", "design", "overview"], "architecture"),
        (&["api", "swagger", "endpoint"], "api"),
        (&["auth"], "authentication"),
        (&["deploy", "install", "setup"], "deployment"),
        (&["dev", "contributing"], "development"),
        (&["integration", "guide", "tutorial"], "integration"),
    ];
    for (keywords, doc_type) in RULES {
        if keywords.iter().any(|k| path.contains(k)) {
            return doc_type;
        }
    }
    "documentation"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, source: &str) -> ParseOutcome {
        MarkdownParser.parse(path, source.as_bytes(), "docs")
    }

    #[test]
    fn splits_on_level_two_headings() {
        let source = "# Title\n## Auth\ntext A\n## Deployment\ntext B\n";
        let outcome = parse("docs/ARCH.md", source);
        assert!(outcome.success);
        assert_eq!(outcome.chunks.len(), 2);
        assert_eq!(outcome.chunks[0].item_name, "Auth");
        assert_eq!(outcome.chunks[1].item_name, "Deployment");
        assert!(outcome.chunks[0].content.starts_with("## Auth"));
        assert!(!outcome.chunks[0].content.contains("## Deployment"));
    }

    #[test]
    fn path_keyword_selects_doc_type() {
        let source = "## Section\nbody\n";
        assert_eq!(parse("docs/ARCH.md", source).chunks[0].item_type, "architecture");
        assert_eq!(parse("docs/api/README.md", source).chunks[0].item_type, "api");
        assert_eq!(parse("docs/auth-flow.md", source).chunks[0].item_type, "authentication");
        assert_eq!(parse("notes/random.md", source).chunks[0].item_type, "documentation");
    }

    #[test]
    fn content_above_first_section_is_title_only() {
        let source = "# The Manual\npreamble text\n\n## Usage\nrun it\n";
        let outcome = parse("manual.md", source);
        assert_eq!(outcome.chunks.len(), 1);
        assert!(!outcome.chunks[0].content.contains("preamble"));
        assert_eq!(outcome.chunks[0].metadata["title"], "The Manual");
    }

    #[test]
    fn deeper_headings_stay_in_their_section() {
        let source = "## Top\n### Nested\ndetail\n## Next\n";
        let outcome = parse("doc.md", source);
        assert_eq!(outcome.chunks.len(), 2);
        assert!(outcome.chunks[0].content.contains("### Nested"));
    }

    #[test]
    fn fenced_heading_markers_are_not_headings() {
        let source = "## Real\n```md\n## Not a heading\n```\nafter\n## Second\n";
        let outcome = parse("doc.md", source);
        assert_eq!(outcome.chunks.len(), 2);
        assert!(outcome.chunks[0].content.contains("## Not a heading"));
    }

    #[test]
    fn line_spans_cover_the_section() {
        let source = "## One\na\nb\n\n## Two\nc\n";
        let outcome = parse("doc.md", source);
        let first = &outcome.chunks[0];
        assert_eq!(first.start_line, 1);
        assert_eq!(first.end_line, 3);
        let second = &outcome.chunks[1];
        assert_eq!(second.start_line, 5);
        assert_eq!(second.end_line, 6);
    }

    #[test]
    fn document_without_sections_yields_no_chunks() {
        let outcome = parse("doc.md", "# Only a title\n\njust prose\n");
        assert!(outcome.success);
        assert!(outcome.chunks.is_empty());
    }
}
