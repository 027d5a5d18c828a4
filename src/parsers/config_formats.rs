//! YAML configuration and CI/CD workflow parser.
//!
//! Files are parsed with `serde_yaml` into a value tree first — nesting is
//! never guessed from indentation. Each top-level mapping key of each
//! document becomes one chunk spanning that key's source lines. When the
//! scanned key lines cannot be paired one-to-one with the parsed keys
//! (flow-style mappings collapse onto one line), the whole document
//! becomes a single chunk instead.
//!
//! The same parser serves two language tags: plain `yaml`, and `cicd` for
//! workflow files, which additionally records the workflow name and job
//! names from the parsed tree.

use serde_yaml::Value;

use crate::chunk::Chunk;
use crate::config::Language;

use super::{base_chunk, decode_utf8, ParseOutcome, Parser};

pub struct YamlParser {
    language: Language,
}

impl YamlParser {
    pub fn new(language: Language) -> Self {
        debug_assert!(matches!(language, Language::Yaml | Language::Cicd));
        Self { language }
    }

    fn block_item_type(&self) -> &'static str {
        match self.language {
            Language::Cicd => "workflow_section",
            _ => "config_block",
        }
    }

    fn document_item_type(&self) -> &'static str {
        match self.language {
            Language::Cicd => "workflow",
            _ => "document",
        }
    }
}

impl Parser for YamlParser {
    fn language(&self) -> Language {
        self.language
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

        let mut chunks = Vec::new();
        for document in split_documents(&lines) {
            let text = lines[document.start..document.end].join("\n");
            let value: Value = match serde_yaml::from_str(&text) {
                Ok(value) => value,
                Err(err) => {
                    return ParseOutcome::failed(
                        format!("YAML parse failed for {relative_path}: {err}"),
                        total_lines,
                    );
                }
            };
            self.extract_document(
                &value,
                &lines,
                document,
                relative_path,
                repo_id,
                &mut chunks,
            );
        }

        ParseOutcome::ok(chunks, total_lines)
    }
}

impl YamlParser {
    fn extract_document(
        &self,
        value: &Value,
        lines: &[&str],
        document: DocumentSpan,
        relative_path: &str,
        repo_id: &str,
        chunks: &mut Vec<Chunk>,
    ) {
        let mapping = match value {
            Value::Mapping(mapping) if !mapping.is_empty() => mapping,
            Value::Null => return,
            // Sequences and scalars at document level become one chunk.
            _ => {
                self.push_document_chunk(value, lines, document, relative_path, repo_id, chunks);
                return;
            }
        };

        let keys: Vec<String> = mapping.keys().filter_map(key_as_string).collect();
        let key_lines = top_level_key_lines(lines, document);

        // Flow-style or otherwise unscannable layout: one chunk per doc.
        if keys.len() != key_lines.len() {
            self.push_document_chunk(value, lines, document, relative_path, repo_id, chunks);
            return;
        }

        let workflow_name = workflow_name(mapping);
        let resource_kind = mapping
            .get("kind")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        for (idx, key) in keys.iter().enumerate() {
            let start = key_lines[idx];
            let mut end = key_lines
                .get(idx + 1)
                .copied()
                .unwrap_or(document.end);
            while end > start + 1 && lines[end - 1].trim().is_empty() {
                end -= 1;
            }
            let content = lines[start..end].join("\n");

            let mut chunk = base_chunk(
                self.language,
                relative_path,
                repo_id,
                self.block_item_type(),
                key.clone(),
                content,
                start + 1,
                end,
            );
            if let Some(kind) = &resource_kind {
                chunk.metadata.insert(
                    "k8s_resource_type".into(),
                    serde_json::Value::String(kind.clone()),
                );
            }
            if self.language == Language::Cicd {
                if let Some(name) = &workflow_name {
                    chunk.metadata.insert(
                        "workflow_name".into(),
                        serde_json::Value::String(name.clone()),
                    );
                }
                if key == "jobs" {
                    let job_names = job_names(mapping);
                    if !job_names.is_empty() {
                        chunk.metadata.insert(
                            "job_names".into(),
                            serde_json::Value::Array(
                                job_names.into_iter().map(serde_json::Value::String).collect(),
                            ),
                        );
                    }
                }
            }
            chunks.push(chunk);
        }
    }

    fn push_document_chunk(
        &self,
        value: &Value,
        lines: &[&str],
        document: DocumentSpan,
        relative_path: &str,
        repo_id: &str,
        chunks: &mut Vec<Chunk>,
    ) {
        let mut end = document.end;
        while end > document.start + 1 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        let content = lines[document.start..end].join("\n");
        if content.trim().is_empty() {
            return;
        }
        let item_name = match value {
            Value::Mapping(mapping) => workflow_name(mapping)
                .unwrap_or_else(|| Chunk::anonymous_name(document.start + 1)),
            _ => Chunk::anonymous_name(document.start + 1),
        };
        chunks.push(base_chunk(
            self.language,
            relative_path,
            repo_id,
            self.document_item_type(),
            item_name,
            content,
            document.start + 1,
            end,
        ));
    }
}

#[derive(Debug, Clone, Copy)]
struct DocumentSpan {
    /// Inclusive first line index.
    start: usize,
    /// Exclusive end line index.
    end: usize,
}

/// Split on `---` separators at column zero. Separator lines belong to no
/// document.
fn split_documents(lines: &[&str]) -> Vec<DocumentSpan> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    for (idx, line) in lines.iter().enumerate() {
        if line.trim_end() == "---" {
            if idx > start {
                spans.push(DocumentSpan { start, end: idx });
            }
            start = idx + 1;
        }
    }
    if lines.len() > start {
        spans.push(DocumentSpan {
            start,
            end: lines.len(),
        });
    }
    spans
        .into_iter()
        .filter(|s| lines[s.start..s.end].iter().any(|l| !l.trim().is_empty()))
        .collect()
}

/// Line indices (within the whole file) of top-level keys in one document:
/// column-zero lines of the form `key:` or `"key":`.
fn top_level_key_lines(lines: &[&str], document: DocumentSpan) -> Vec<usize> {
    let mut found = Vec::new();
    for idx in document.start..document.end {
        let line = lines[idx];
        if line.is_empty() || line.starts_with([' ', '\t', '#', '-']) {
            continue;
        }
        if let Some(colon) = line.find(':') {
            let key = line[..colon].trim();
            if !key.is_empty() {
                found.push(idx);
            }
        }
    }
    found
}

fn key_as_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn workflow_name(mapping: &serde_yaml::Mapping) -> Option<String> {
    mapping
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn job_names(mapping: &serde_yaml::Mapping) -> Vec<String> {
    mapping
        .get("jobs")
        .and_then(|v| v.as_mapping())
        .map(|jobs| jobs.keys().filter_map(key_as_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_yaml(source: &str) -> ParseOutcome {
        YamlParser::new(Language::Yaml).parse("deploy/values.yaml", source.as_bytes(), "infra")
    }

    fn parse_cicd(source: &str) -> ParseOutcome {
        YamlParser::new(Language::Cicd).parse(
            ".github/workflows/ci.yml",
            source.as_bytes(),
            "infra",
        )
    }

    #[test]
    fn top_level_keys_become_chunks() {
        let source = "replicas: 3\nimage:\n  repository: registry/app\n  tag: latest\nresources:\n  limits:\n    cpu: 500m\n";
        let outcome = parse_yaml(source);
        assert!(outcome.success);
        let names: Vec<&str> = outcome.chunks.iter().map(|c| c.item_name.as_str()).collect();
        assert_eq!(names, vec!["replicas", "image", "resources"]);
        assert!(outcome.chunks[1].content.contains("repository"));
        assert_eq!(outcome.chunks[1].start_line, 2);
        assert_eq!(outcome.chunks[1].end_line, 4);
    }

    #[test]
    fn multi_document_files_split_per_document() {
        let source = "kind: Service\nmetadata:\n  name: web\n---\nkind: Deployment\nmetadata:\n  name: web\n";
        let outcome = parse_yaml(source);
        assert!(outcome.success);
        let kinds: Vec<&str> = outcome
            .chunks
            .iter()
            .filter_map(|c| c.metadata.get("k8s_resource_type"))
            .filter_map(|v| v.as_str())
            .collect();
        assert!(kinds.contains(&"Service"));
        assert!(kinds.contains(&"Deployment"));
    }

    #[test]
    fn invalid_yaml_reports_failure() {
        let outcome = parse_yaml("key: [unterminated\n");
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("values.yaml"));
    }

    #[test]
    fn workflow_metadata_recorded_for_cicd() {
        let source = "name: CI\non:\n  push: {}\njobs:\n  build:\n    runs-on: ubuntu-latest\n  test:\n    runs-on: ubuntu-latest\n";
        let outcome = parse_cicd(source);
        assert!(outcome.success);
        let jobs = outcome.chunks.iter().find(|c| c.item_name == "jobs").unwrap();
        assert_eq!(jobs.item_type, "workflow_section");
        assert_eq!(jobs.metadata["workflow_name"], "CI");
        let names = jobs.metadata["job_names"].as_array().unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn flow_style_document_collapses_to_one_chunk() {
        let outcome = parse_yaml("{a: 1, b: 2}\n");
        assert!(outcome.success);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].item_type, "document");
    }

    #[test]
    fn sequence_document_is_one_chunk() {
        let outcome = parse_yaml("- one\n- two\n");
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].item_type, "document");
    }

    #[test]
    fn comment_only_file_has_no_chunks() {
        let outcome = parse_yaml("# nothing here\n");
        assert!(outcome.success);
        assert!(outcome.chunks.is_empty());
    }
}
