//! Resolved, validated pipeline configuration.
//!
//! All options are gathered into a single immutable [`IngestConfig`] value
//! handed to each component at construction; nothing reads the environment
//! after startup. Credentials are resolved here and validation fails fast
//! with an error naming the missing field.
//!
//! Static enumerations live here too: the supported [`Language`] tags with
//! their extension mapping and group emission order, repository types,
//! priorities, skip directories, and the ordered business-domain patterns.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::collections::CollectionMap;
use crate::error::IngestError;

/// Supported language tags.
///
/// `ALL` fixes the order in which language groups are emitted by the file
/// processor, which in turn is what makes checkpoint resume deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Solidity,
    #[serde(rename = "documentation", alias = "markdown")]
    Documentation,
    Yaml,
    Cicd,
    Terraform,
}

impl Language {
    /// Group emission order for the file processor.
    pub const ALL: [Language; 10] = [
        Language::Rust,
        Language::TypeScript,
        Language::Tsx,
        Language::JavaScript,
        Language::Jsx,
        Language::Solidity,
        Language::Documentation,
        Language::Yaml,
        Language::Cicd,
        Language::Terraform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Jsx => "jsx",
            Language::Solidity => "solidity",
            Language::Documentation => "documentation",
            Language::Yaml => "yaml",
            Language::Cicd => "cicd",
            Language::Terraform => "terraform",
        }
    }

    pub fn parse(tag: &str) -> Option<Language> {
        match tag {
            "rust" => Some(Language::Rust),
            "typescript" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "javascript" => Some(Language::JavaScript),
            "jsx" => Some(Language::Jsx),
            "solidity" => Some(Language::Solidity),
            "documentation" | "markdown" => Some(Language::Documentation),
            "yaml" | "helm" => Some(Language::Yaml),
            "cicd" => Some(Language::Cicd),
            "terraform" => Some(Language::Terraform),
            _ => None,
        }
    }

    /// Map a file extension to its language tag.
    ///
    /// CI/CD workflow files share YAML extensions and are reclassified by
    /// path in the file processor, not here.
    pub fn from_extension(ext: &str) -> Option<Language> {
        match ext {
            "rs" => Some(Language::Rust),
            "ts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "jsx" => Some(Language::Jsx),
            "sol" => Some(Language::Solidity),
            "md" | "markdown" => Some(Language::Documentation),
            "yaml" | "yml" => Some(Language::Yaml),
            "tf" | "tfvars" => Some(Language::Terraform),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository type classification, used for service-collection routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoType {
    Frontend,
    Backend,
    Middleware,
    McpServer,
    Infrastructure,
    Tool,
    Documentation,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Frontend => "frontend",
            RepoType::Backend => "backend",
            RepoType::Middleware => "middleware",
            RepoType::McpServer => "mcp_server",
            RepoType::Infrastructure => "infrastructure",
            RepoType::Tool => "tool",
            RepoType::Documentation => "documentation",
        }
    }
}

/// Repository priority class. Ordering is high > medium > low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Rank for threshold filtering; lower rank means higher priority.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// One ordered business-domain pattern entry.
///
/// Classification is first-match-wins over this list in declaration order,
/// so the list type matters: a map would lose the ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPattern {
    pub domain: String,
    pub keywords: Vec<String>,
}

/// Default domain patterns, in the fixed iteration order used by the
/// classifier.
pub fn default_domain_patterns() -> Vec<DomainPattern> {
    let entries: [(&str, &[&str]); 7] = [
        (
            "finance",
            &[
                "balance",
                "transaction",
                "payment",
                "credit",
                "loan",
                "pool",
                "financial",
            ],
        ),
        (
            "auth",
            &["auth", "login", "session", "magic_link", "token", "verification"],
        ),
        (
            "ui",
            &["component", "modal", "form", "button", "layout", "page", "view"],
        ),
        (
            "contracts",
            &["contract", "solidity", "ethereum", "blockchain", "verifier"],
        ),
        (
            "trading",
            &["trading", "marketplace", "deal", "investment", "portfolio"],
        ),
        (
            "kyc",
            &["kyc", "identity", "verification", "compliance", "investor"],
        ),
        ("notifications", &["notification", "email", "alert", "message"]),
    ];
    entries
        .iter()
        .map(|(domain, keywords)| DomainPattern {
            domain: (*domain).to_string(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
        })
        .collect()
}

/// Directory names excluded during the repository walk, at any depth.
pub fn default_skip_dirs() -> Vec<String> {
    [
        "target",
        ".git",
        "node_modules",
        "__pycache__",
        ".pytest_cache",
        "dist",
        "build",
        "public",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Checkpoint cadence for a language group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointCadence {
    /// Save after every N fully persisted files.
    EveryFiles(usize),
    /// Save after every completed batch.
    EveryBatch,
}

/// Embedding service settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL; the client appends `/embeddings`.
    pub base_url: String,
    /// Bearer token, resolved from `EMBEDDING_API_KEY`.
    pub api_key: String,
    /// Model name sent in every request.
    pub model: String,
    /// Expected vector dimension D.
    pub dimension: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Warmup probe timeout in seconds.
    pub warmup_timeout_secs: u64,
}

/// Vector backend selector (`VECTOR_BACKEND` env var).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Remote managed store (Qdrant).
    Managed,
    /// Local self-hosted store (SurrealDB).
    #[default]
    Local,
}

/// The single immutable configuration value shared by all components.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Base directory under which repository checkouts live.
    pub repos_base_dir: PathBuf,
    /// Embedding service settings.
    pub embedding: EmbeddingConfig,
    /// Which vector backend to construct.
    pub backend: BackendKind,
    /// Chunks per embedding request.
    pub batch_size: usize,
    /// Maximum concurrent embedding requests (process-wide).
    pub rate_limit: usize,
    /// Retry budget for transient embedding failures.
    pub max_retries: usize,
    /// Files larger than this many bytes are skipped.
    pub max_file_size: u64,
    /// Directory names excluded at any depth.
    pub skip_dirs: Vec<String>,
    /// Additional exclude globs applied to repo-relative paths.
    pub exclude_globs: Vec<String>,
    /// Ordered business-domain patterns; first match wins.
    pub domain_patterns: Vec<DomainPattern>,
    /// Checkpoint file location.
    pub checkpoint_path: PathBuf,
    /// Per-language checkpoint cadence overrides.
    pub checkpoint_cadence: BTreeMap<Language, CheckpointCadence>,
    /// Default cadence when no override exists.
    pub default_cadence: CheckpointCadence,
    /// Collection name resolution (language / service / concern).
    pub collections: CollectionMap,
}

impl IngestConfig {
    /// Build a config from collection mappings plus environment credentials.
    ///
    /// Does not validate; call [`IngestConfig::validate`] before handing the
    /// value to the pipeline.
    pub fn new(collections: CollectionMap) -> Self {
        let backend = match std::env::var("VECTOR_BACKEND").as_deref() {
            Ok("managed") => BackendKind::Managed,
            _ => BackendKind::Local,
        };
        let base_url = std::env::var("EMBEDDING_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("EMBEDDING_API_KEY").unwrap_or_default();
        let model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "Qwen/Qwen3-Embedding-8B".to_string());

        // Solidity chunks arrive in file batches, so its progress is durable
        // per batch rather than per file count.
        let mut cadence = BTreeMap::new();
        cadence.insert(Language::Solidity, CheckpointCadence::EveryBatch);

        Self {
            repos_base_dir: PathBuf::from("./repos"),
            embedding: EmbeddingConfig {
                base_url,
                api_key,
                model,
                dimension: 4096,
                timeout_secs: 120,
                warmup_timeout_secs: 60,
            },
            backend,
            batch_size: 50,
            rate_limit: 4,
            max_retries: 3,
            max_file_size: 500_000,
            skip_dirs: default_skip_dirs(),
            exclude_globs: Vec::new(),
            domain_patterns: default_domain_patterns(),
            checkpoint_path: PathBuf::from("./ingestion_checkpoint.json"),
            checkpoint_cadence: cadence,
            default_cadence: CheckpointCadence::EveryFiles(10),
            collections,
        }
    }

    /// Checkpoint cadence for a language.
    pub fn cadence_for(&self, language: Language) -> CheckpointCadence {
        self.checkpoint_cadence
            .get(&language)
            .copied()
            .unwrap_or(self.default_cadence)
    }

    /// Validate credentials and numeric bounds, naming the offending field.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.embedding.api_key.trim().is_empty() {
            return Err(IngestError::config(
                "EMBEDDING_API_KEY",
                "environment variable not set",
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(IngestError::config("embedding.dimension", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(IngestError::config("batch_size", "must be > 0"));
        }
        if self.rate_limit == 0 {
            return Err(IngestError::config("rate_limit", "must be > 0"));
        }
        match self.backend {
            BackendKind::Managed => {
                if std::env::var("QDRANT_URL").unwrap_or_default().is_empty() {
                    return Err(IngestError::config(
                        "QDRANT_URL",
                        "required for the managed backend",
                    ));
                }
                if std::env::var("QDRANT_API_KEY").unwrap_or_default().is_empty() {
                    return Err(IngestError::config(
                        "QDRANT_API_KEY",
                        "required for the managed backend",
                    ));
                }
            }
            BackendKind::Local => {
                // SURREALDB_* all have workable localhost defaults.
            }
        }
        for language in Language::ALL {
            if self.collections.language_collection(language).is_none() {
                return Err(IngestError::config(
                    "collections.language_collections",
                    format!("no collection mapped for language `{language}`"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::CollectionMap;

    #[test]
    fn extension_mapping_covers_the_supported_set() {
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("tsx"), Some(Language::Tsx));
        assert_eq!(Language::from_extension("sol"), Some(Language::Solidity));
        assert_eq!(Language::from_extension("md"), Some(Language::Documentation));
        assert_eq!(Language::from_extension("yml"), Some(Language::Yaml));
        assert_eq!(Language::from_extension("tfvars"), Some(Language::Terraform));
        assert_eq!(Language::from_extension("exe"), None);
    }

    #[test]
    fn domain_patterns_keep_declaration_order() {
        let patterns = default_domain_patterns();
        assert_eq!(patterns[0].domain, "finance");
        assert_eq!(patterns[1].domain, "auth");
        assert_eq!(patterns.last().unwrap().domain, "notifications");
    }

    #[test]
    fn priority_ranks_order_high_first() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn missing_api_key_names_the_field() {
        let mut config = IngestConfig::new(CollectionMap::default_map());
        config.embedding.api_key = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_API_KEY"));
    }

    #[test]
    fn solidity_checkpoints_every_batch() {
        let config = IngestConfig::new(CollectionMap::default_map());
        assert_eq!(
            config.cadence_for(Language::Solidity),
            CheckpointCadence::EveryBatch
        );
        assert_eq!(
            config.cadence_for(Language::Rust),
            CheckpointCadence::EveryFiles(10)
        );
    }
}
