//! Repository descriptor loading.
//!
//! Repositories to ingest are declared in `repositories.yaml` (path
//! overridable via the `REPOSITORIES_CONFIG` environment variable). Only
//! `github_url` is strictly required; everything else has defaults. Unknown
//! enum values (repo type, language, priority) are configuration errors
//! that name the offending repository, surfaced before any work starts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{Language, Priority, RepoType};
use crate::error::IngestError;

/// Raw shape of one entry in `repositories.yaml`.
#[derive(Debug, Clone, Deserialize)]
struct RawRepo {
    #[serde(default)]
    id: Option<String>,
    github_url: String,
    #[serde(default)]
    repo_type: Option<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    service_dependencies: Vec<String>,
    #[serde(default)]
    has_helm: bool,
    #[serde(default)]
    helm_path: Option<String>,
    #[serde(default)]
    exposes_apis: bool,
    #[serde(default)]
    api_base_path: Option<String>,
}

/// Raw shape of `repositories.yaml`.
#[derive(Debug, Clone, Deserialize)]
struct RawReposFile {
    #[serde(default)]
    repos_base_dir: Option<PathBuf>,
    #[serde(default)]
    repositories: Vec<RawRepo>,
}

/// Validated descriptor for one repository. Immutable for the duration of
/// a run.
#[derive(Debug, Clone)]
pub struct RepoSpec {
    /// Stable identity; defaults to the last path segment of `github_url`.
    pub id: String,
    pub github_url: String,
    pub repo_type: RepoType,
    /// Declared languages; informational, the walk discovers the real set.
    pub languages: Vec<Language>,
    /// Subdirectories of interest within the repository.
    pub components: Vec<String>,
    pub priority: Priority,
    pub service_dependencies: Vec<String>,
    pub has_helm: bool,
    pub helm_path: Option<String>,
    pub exposes_apis: bool,
    pub api_base_path: Option<String>,
}

impl RepoSpec {
    /// On-disk location under the configured base directory.
    pub fn local_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.id)
    }
}

/// Result of loading `repositories.yaml`: the descriptors plus the base
/// directory declared in the file (if any).
#[derive(Debug, Clone)]
pub struct RepoCatalog {
    pub repos_base_dir: Option<PathBuf>,
    pub repos: Vec<RepoSpec>,
}

/// Resolve the repositories config path: explicit argument, then the
/// `REPOSITORIES_CONFIG` env var, then `config/repositories.yaml`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(env_path) = std::env::var("REPOSITORIES_CONFIG") {
        return PathBuf::from(env_path);
    }
    PathBuf::from("config/repositories.yaml")
}

/// Load and validate the repository catalog.
pub fn load_catalog(path: &Path) -> Result<RepoCatalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read repositories config: {}", path.display()))?;
    parse_catalog(&raw)
}

pub fn parse_catalog(raw: &str) -> Result<RepoCatalog> {
    let file: RawReposFile =
        serde_yaml::from_str(raw).context("failed to parse repositories config")?;
    let mut repos = Vec::with_capacity(file.repositories.len());
    for entry in file.repositories {
        repos.push(validate_repo(entry)?);
    }
    Ok(RepoCatalog {
        repos_base_dir: file.repos_base_dir,
        repos,
    })
}

fn validate_repo(raw: RawRepo) -> Result<RepoSpec> {
    let id = raw.id.clone().unwrap_or_else(|| {
        raw.github_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&raw.github_url)
            .trim_end_matches(".git")
            .to_string()
    });

    let repo_type = match raw.repo_type.as_deref() {
        None => RepoType::Backend,
        Some(s) => parse_repo_type(s).ok_or_else(|| {
            IngestError::config(
                "repositories.repo_type",
                format!("invalid repo_type `{s}` for repository `{id}`"),
            )
        })?,
    };

    let mut languages = Vec::with_capacity(raw.languages.len());
    for tag in &raw.languages {
        let language = Language::parse(tag).ok_or_else(|| {
            IngestError::config(
                "repositories.languages",
                format!("invalid language `{tag}` for repository `{id}`"),
            )
        })?;
        if !languages.contains(&language) {
            languages.push(language);
        }
    }

    let priority = match raw.priority.as_deref() {
        None => Priority::Medium,
        Some(s) => Priority::parse(s).ok_or_else(|| {
            IngestError::config(
                "repositories.priority",
                format!("invalid priority `{s}` for repository `{id}`"),
            )
        })?,
    };

    Ok(RepoSpec {
        id,
        github_url: raw.github_url,
        repo_type,
        languages,
        components: raw.components,
        priority,
        service_dependencies: raw.service_dependencies,
        has_helm: raw.has_helm,
        helm_path: raw.helm_path,
        exposes_apis: raw.exposes_apis,
        api_base_path: raw.api_base_path,
    })
}

fn parse_repo_type(s: &str) -> Option<RepoType> {
    match s {
        "frontend" => Some(RepoType::Frontend),
        "backend" => Some(RepoType::Backend),
        "middleware" => Some(RepoType::Middleware),
        "mcp_server" => Some(RepoType::McpServer),
        "infrastructure" => Some(RepoType::Infrastructure),
        "tool" => Some(RepoType::Tool),
        "documentation" => Some(RepoType::Documentation),
        _ => None,
    }
}

/// Keep repositories at or above the given priority class.
pub fn filter_by_priority(repos: Vec<RepoSpec>, min: Priority) -> Vec<RepoSpec> {
    repos
        .into_iter()
        .filter(|r| r.priority.rank() <= min.rank())
        .collect()
}
