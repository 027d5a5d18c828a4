//! The chunk data model: the unit of embedding.
//!
//! A [`Chunk`] is a syntactically coherent span of source text produced by
//! a language parser, carrying enough provenance and classification
//! metadata to be self-describing once stored. Identity is content-based:
//!
//! - `chunk_hash` — SHA-256 over `language | file_path | item_type |
//!   item_name | content`, lowercase hex. Two chunks with the same hash
//!   denote the same unit.
//! - `point_id` — a UUIDv5 derived from the hash, so re-ingesting the same
//!   chunk always overwrites the same vector point, never duplicates it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{DomainPattern, Language};

/// Domain tag used when no configured pattern matches.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// A syntactically coherent unit of source text, ready for embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Exact source text spanning the chunk, UTF-8.
    pub content: String,
    /// Language tag; must map to a configured collection.
    pub language: Language,
    /// Language-specific category (function, struct, contract, section, …).
    pub item_type: String,
    /// Declared name, or a synthesized `<anonymous:line>` stand-in.
    pub item_name: String,
    /// Path relative to the repository root.
    pub file_path: String,
    /// 1-based inclusive start line.
    pub start_line: usize,
    /// 1-based inclusive end line.
    pub end_line: usize,
    /// Repository identity.
    pub repo_id: String,
    /// Component within the repository (first path segment heuristic).
    pub repo_component: String,
    /// Business domain tag from the ordered keyword classifier.
    pub business_domain: String,
    /// Structural complexity in `[0, 1]`.
    pub complexity_score: f64,
    /// Content-derived identity, lowercase hex SHA-256.
    pub chunk_hash: String,
    /// Language-specific extras (visibility, async-ness, doc_type, …).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Chunk {
    /// Compute the identity hash for the canonical chunk fields.
    pub fn compute_hash(
        language: Language,
        file_path: &str,
        item_type: &str,
        item_name: &str,
        content: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(language.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(file_path.as_bytes());
        hasher.update(b"|");
        hasher.update(item_type.as_bytes());
        hasher.update(b"|");
        hasher.update(item_name.as_bytes());
        hasher.update(b"|");
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Recompute and set `chunk_hash` from the canonical fields.
    pub fn seal(&mut self) {
        self.chunk_hash = Self::compute_hash(
            self.language,
            &self.file_path,
            &self.item_type,
            &self.item_name,
            &self.content,
        );
    }

    /// Deterministic vector point id: UUIDv5 of the chunk hash.
    ///
    /// Same content always maps to the same point, making upserts
    /// last-writer-wins rather than append-only.
    pub fn point_id(&self) -> Uuid {
        point_id_for_hash(&self.chunk_hash)
    }

    /// Number of source lines spanned.
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    /// Synthesized name for items without a declared identifier.
    pub fn anonymous_name(line: usize) -> String {
        format!("<anonymous:{line}>")
    }
}

/// UUIDv5 derivation used for vector point ids.
pub fn point_id_for_hash(chunk_hash: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_hash.as_bytes())
}

/// Classify the business domain of a chunk.
///
/// First match wins, iterating patterns in declaration order; within a
/// pattern the path is searched before the content, both lowercased. The
/// same `(file_path, content, patterns)` always yields the same tag.
pub fn classify_domain(patterns: &[DomainPattern], file_path: &str, content: &str) -> String {
    let path = file_path.to_lowercase();
    let body = content.to_lowercase();
    for pattern in patterns {
        for keyword in &pattern.keywords {
            if path.contains(keyword) || body.contains(keyword) {
                return pattern.domain.clone();
            }
        }
    }
    UNKNOWN_DOMAIN.to_string()
}

/// Structural complexity estimate in `[0, 1]`:
/// `0.4·lines/200 + 0.3·max_indent/5 + 0.3·branches/10`, each term clamped.
pub fn complexity_score(content: &str) -> f64 {
    let lines = content.lines().count() as f64;

    let max_indent = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(indent_level)
        .max()
        .unwrap_or(0) as f64;

    let branches = count_branch_keywords(content) as f64;

    let norm_lines = (lines / 200.0).min(1.0);
    let norm_indent = (max_indent / 5.0).min(1.0);
    let norm_branches = (branches / 10.0).min(1.0);

    0.4 * norm_lines + 0.3 * norm_indent + 0.3 * norm_branches
}

/// Indentation depth of a line: leading whitespace divided by 4, tabs
/// counting as a full level.
fn indent_level(line: &str) -> usize {
    let mut width = 0usize;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += 4,
            _ => break,
        }
    }
    width / 4
}

const BRANCH_KEYWORDS: [&str; 11] = [
    "if", "else", "for", "while", "match", "loop", "case", "catch", "when", "require", "assert",
];

/// Count branch keywords as whole words.
fn count_branch_keywords(content: &str) -> usize {
    let mut count = 0usize;
    for token in content.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if BRANCH_KEYWORDS.contains(&token) {
            count += 1;
        }
    }
    count
}

/// Infer which repository component a file belongs to.
///
/// Recognizes common monorepo layouts first (apps/*, packages/*), then
/// falls back to well-known top-level directory names, then `core`.
pub fn infer_repo_component(relative_path: &str) -> String {
    let path = relative_path.replace('\\', "/");

    if let Some(rest) = path.strip_prefix("apps/") {
        if let Some(app) = rest.split('/').next() {
            return app.to_string();
        }
    }
    if path.starts_with("packages/ui/") {
        return "shared-ui".to_string();
    }
    if path.starts_with("packages/") {
        return "shared-packages".to_string();
    }

    let first = path.split('/').next().unwrap_or("");
    match first {
        "api" | "apis" => "api".to_string(),
        "contracts" | "contract" => "contracts".to_string(),
        "cli" | "commands" => "cli".to_string(),
        "docs" | "documentation" => "documentation".to_string(),
        "frontend" | "ui" | "app" => "frontend".to_string(),
        "backend" | "server" => "backend".to_string(),
        "db" | "database" => "database".to_string(),
        _ => "core".to_string(),
    }
}
