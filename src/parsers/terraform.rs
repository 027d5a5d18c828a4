//! Terraform / HCL parser.
//!
//! Files are parsed with `hcl-rs` first; only after the body parses are
//! source spans assigned, by a brace-depth scan paired with the parsed
//! structures in order. Each top-level block becomes a chunk named
//! `<type>.<labels…>` (e.g. `resource` blocks are named by their two
//! labels); top-level attributes — the whole content of `.tfvars` files —
//! become `attribute` chunks. Nesting is never guessed: if the scan cannot
//! be paired with the parse, the file collapses to a single chunk.

use hcl::Structure;

use crate::config::Language;

use super::{base_chunk, decode_utf8, ParseOutcome, Parser};

pub struct TerraformParser;

impl Parser for TerraformParser {
    fn language(&self) -> Language {
        Language::Terraform
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

        let body = match hcl::parse(&source) {
            Ok(body) => body,
            Err(err) => {
                return ParseOutcome::failed(
                    format!("HCL parse failed for {relative_path}: {err}"),
                    total_lines,
                );
            }
        };

        let spans = top_level_spans(&lines);
        let structures: Vec<&Structure> = body.iter().collect();

        if spans.len() != structures.len() {
            // Layout the scanner cannot attribute (single-line blocks mixed
            // with heredocs, etc.): keep the file as one chunk.
            let content = source.trim_end().to_string();
            let stem = relative_path
                .rsplit('/')
                .next()
                .unwrap_or(relative_path)
                .trim_end_matches(".tf")
                .trim_end_matches(".tfvars");
            let chunk = base_chunk(
                Language::Terraform,
                relative_path,
                repo_id,
                "document",
                stem.to_string(),
                content,
                1,
                total_lines.max(1),
            );
            return ParseOutcome::ok(vec![chunk], total_lines);
        }

        let mut chunks = Vec::with_capacity(structures.len());
        for (span, structure) in spans.iter().zip(structures.iter()) {
            let mut end = span.end;
            while end > span.start + 1 && lines[end - 1].trim().is_empty() {
                end -= 1;
            }
            let content = lines[span.start..end].join("\n");

            let (item_type, item_name, labels) = match structure {
                Structure::Block(block) => {
                    let labels: Vec<String> = block
                        .labels()
                        .iter()
                        .map(|l| l.as_str().to_string())
                        .collect();
                    let name = if labels.is_empty() {
                        block.identifier().to_string()
                    } else {
                        labels.join(".")
                    };
                    (block.identifier().to_string(), name, labels)
                }
                Structure::Attribute(attr) => {
                    ("attribute".to_string(), attr.key().to_string(), Vec::new())
                }
            };

            let mut chunk = base_chunk(
                Language::Terraform,
                relative_path,
                repo_id,
                &item_type,
                item_name,
                content,
                span.start + 1,
                end,
            );
            if !labels.is_empty() {
                chunk.metadata.insert(
                    "labels".into(),
                    serde_json::Value::Array(
                        labels.into_iter().map(serde_json::Value::String).collect(),
                    ),
                );
            }
            chunks.push(chunk);
        }

        ParseOutcome::ok(chunks, total_lines)
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    /// Inclusive start line index.
    start: usize,
    /// Exclusive end line index.
    end: usize,
}

/// Line spans of top-level constructs, by brace/bracket depth tracking.
/// Comments and string contents are ignored for depth purposes.
fn top_level_spans(lines: &[&str]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut depth: i64 = 0;
    let mut current: Option<usize> = None;

    for (idx, line) in lines.iter().enumerate() {
        let (opens, closes) = brace_delta(line);
        let significant = !line.trim().is_empty() && !is_comment_line(line);

        if depth == 0 && significant && current.is_none() {
            current = Some(idx);
        }

        depth += opens - closes;

        // A construct ends when depth returns to zero and the line closes
        // it (a block's `}`) or it never opened a brace (plain attribute).
        if depth == 0 {
            if let Some(start) = current {
                let construct_continues = opens == 0
                    && closes == 0
                    && line.trim_end().ends_with(['=', ',', '('])
                    && idx + 1 < lines.len();
                if !construct_continues {
                    spans.push(Span {
                        start,
                        end: idx + 1,
                    });
                    current = None;
                }
            }
        }
    }
    if let Some(start) = current {
        spans.push(Span {
            start,
            end: lines.len(),
        });
    }
    spans
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') || trimmed.starts_with("//")
}

/// Count `{`/`[` and `}`/`]` outside string literals and comments.
fn brace_delta(line: &str) -> (i64, i64) {
    let mut opens = 0i64;
    let mut closes = 0i64;
    let mut in_string = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_string = !in_string,
            '\\' if in_string => {
                chars.next();
            }
            '#' if !in_string => break,
            '/' if !in_string && chars.peek() == Some(&'/') => break,
            '{' | '[' if !in_string => opens += 1,
            '}' | ']' if !in_string => closes += 1,
            _ => {}
        }
    }
    (opens, closes)
}
