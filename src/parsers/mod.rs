//! Language parsers: bytes in, ordered chunks out.
//!
//! Every parser implements the same [`Parser`] contract and is a pure
//! function of its inputs. A [`ParserRegistry`] built once at startup maps
//! each [`Language`] tag to its parser instance; adding a language means
//! implementing the trait and registering it.
//!
//! Contract highlights:
//!
//! - Malformed UTF-8 never aborts the run: the input is decoded lossily and
//!   the outcome reports `success = false` with a descriptive error.
//! - An empty file parses successfully to zero chunks.
//! - Chunks are emitted in source order with 1-based inclusive line spans.
//! - There is no regex fallback for any language: either the structural
//!   parser (tree-sitter, YAML tree, HCL body) produces a tree, or the file
//!   is reported as failed.
//!
//! | Language | Module | Backing parser |
//! |----------|--------|----------------|
//! | rust | [`rust`] | tree-sitter-rust |
//! | typescript / tsx / javascript / jsx | [`typescript`] | tree-sitter-typescript / -javascript |
//! | solidity | [`solidity`] | tree-sitter-solidity |
//! | documentation | [`markdown`] | heading splitter (fence-aware) |
//! | yaml / cicd | [`config_formats`] | serde_yaml value tree |
//! | terraform | [`terraform`] | hcl-rs body |

pub mod config_formats;
pub mod markdown;
pub mod rust;
pub mod solidity;
pub mod terraform;
pub mod typescript;

use std::collections::BTreeMap;

use crate::chunk::Chunk;
use crate::config::Language;

/// Result of parsing one file.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// Whether a structural parse succeeded. A failed parse still reports
    /// `total_lines` so statistics stay meaningful.
    pub success: bool,
    /// Chunks in source order. Empty on failure, and legitimately empty for
    /// files with no extractable items.
    pub chunks: Vec<Chunk>,
    /// Total line count of the (possibly lossily decoded) input.
    pub total_lines: usize,
    /// Human-readable failure description when `success` is false.
    pub error: Option<String>,
}

impl ParseOutcome {
    pub fn ok(chunks: Vec<Chunk>, total_lines: usize) -> Self {
        Self {
            success: true,
            chunks,
            total_lines,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, total_lines: usize) -> Self {
        Self {
            success: false,
            chunks: Vec::new(),
            total_lines,
            error: Some(message.into()),
        }
    }
}

/// The common parser capability. Implementations are stateless and pure:
/// the same inputs always produce the same outcome.
pub trait Parser: Send + Sync {
    /// The language tag this parser handles.
    fn language(&self) -> Language;

    /// Parse one file into chunks.
    ///
    /// `relative_path` is relative to the repository root and is recorded
    /// verbatim on every chunk.
    fn parse(&self, relative_path: &str, bytes: &[u8], repo_id: &str) -> ParseOutcome;
}

/// Decode file bytes, distinguishing clean UTF-8 from lossy input.
///
/// Returns `Err` with a failure outcome for malformed input — the lossy
/// text is still used to count lines so the report stays accurate.
pub(crate) fn decode_utf8(relative_path: &str, bytes: &[u8]) -> Result<String, ParseOutcome> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            let lossy = String::from_utf8_lossy(bytes);
            let total_lines = lossy.lines().count();
            Err(ParseOutcome::failed(
                format!("{relative_path} is not valid UTF-8 (decoded lossily, skipped)"),
                total_lines,
            ))
        }
    }
}

/// Construct a chunk with parser-level fields populated; provenance and
/// classification fields (`repo_component`, `business_domain`,
/// `complexity_score`, `chunk_hash`) are finalized by the file processor.
#[allow(clippy::too_many_arguments)]
pub(crate) fn base_chunk(
    language: Language,
    relative_path: &str,
    repo_id: &str,
    item_type: &str,
    item_name: String,
    content: String,
    start_line: usize,
    end_line: usize,
) -> Chunk {
    Chunk {
        content,
        language,
        item_type: item_type.to_string(),
        item_name,
        file_path: relative_path.to_string(),
        start_line,
        end_line,
        repo_id: repo_id.to_string(),
        repo_component: String::new(),
        business_domain: String::new(),
        complexity_score: 0.0,
        chunk_hash: String::new(),
        metadata: BTreeMap::new(),
    }
}

/// Registry mapping language tags to parser instances. Built once at
/// pipeline startup; lookup is the language-dispatch step of the file
/// processor.
pub struct ParserRegistry {
    parsers: BTreeMap<Language, Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Registry with every built-in parser registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(rust::RustParser));
        registry.register(Box::new(typescript::TypeScriptParser::new(
            Language::TypeScript,
        )));
        registry.register(Box::new(typescript::TypeScriptParser::new(Language::Tsx)));
        registry.register(Box::new(typescript::TypeScriptParser::new(
            Language::JavaScript,
        )));
        registry.register(Box::new(typescript::TypeScriptParser::new(Language::Jsx)));
        registry.register(Box::new(solidity::SolidityParser));
        registry.register(Box::new(markdown::MarkdownParser));
        registry.register(Box::new(config_formats::YamlParser::new(Language::Yaml)));
        registry.register(Box::new(config_formats::YamlParser::new(Language::Cicd)));
        registry.register(Box::new(terraform::TerraformParser));
        registry
    }

    /// Register a parser under its language tag, replacing any previous one.
    pub fn register(&mut self, parser: Box<dyn Parser>) {
        self.parsers.insert(parser.language(), parser);
    }

    pub fn get(&self, language: Language) -> Option<&dyn Parser> {
        self.parsers.get(&language).map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
