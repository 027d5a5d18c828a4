//! File discovery and language dispatch.
//!
//! Walks a repository tree, filters out skip directories (matched by name
//! at any depth) and oversized files, classifies the rest by extension,
//! and groups them by language. Groups are emitted in the fixed
//! [`Language::ALL`] order with files sorted by relative path, so the
//! chunk stream downstream is deterministic — which is what makes
//! checkpoints meaningful.
//!
//! Parsing is per file: [`FileProcessor::parse_file`] reads the bytes,
//! dispatches to the registry, then finalizes each chunk with provenance
//! (`repo_component`, service metadata), business-domain classification,
//! complexity score and the content hash.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::chunk::{classify_domain, complexity_score, infer_repo_component, Chunk};
use crate::config::{IngestConfig, Language};
use crate::error::{ErrorRecord, IngestError};
use crate::parsers::ParserRegistry;
use crate::repos::RepoSpec;

/// A discovered file, classified and within the size budget.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub language: Language,
    pub size: u64,
}

/// All files of one language within a repository, sorted by path.
#[derive(Debug, Clone)]
pub struct LanguageGroup {
    pub language: Language,
    pub files: Vec<SourceFile>,
}

/// Outcome of a repository walk.
#[derive(Debug)]
pub struct ScanReport {
    /// Non-empty groups in [`Language::ALL`] order.
    pub groups: Vec<LanguageGroup>,
    /// Files skipped with a recorded reason (oversize, unreadable).
    pub skipped: Vec<ErrorRecord>,
}

pub struct FileProcessor {
    config: IngestConfig,
    registry: ParserRegistry,
    exclude: Option<GlobSet>,
}

impl FileProcessor {
    pub fn new(config: IngestConfig, registry: ParserRegistry) -> Result<Self> {
        let exclude = if config.exclude_globs.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.exclude_globs {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };
        Ok(Self {
            config,
            registry,
            exclude,
        })
    }

    /// Walk a repository root and classify every eligible file.
    pub fn scan(&self, repo_root: &Path) -> Result<ScanReport> {
        let mut by_language: std::collections::BTreeMap<Language, Vec<SourceFile>> =
            std::collections::BTreeMap::new();
        let mut skipped = Vec::new();

        let skip_dirs = &self.config.skip_dirs;
        let walker = WalkDir::new(repo_root).into_iter().filter_entry(|entry| {
            // Prune skip directories by name, at any depth. The root is
            // exempt so a repository checkout named e.g. `build` still
            // gets walked.
            if entry.depth() > 0 && entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                return !skip_dirs.iter().any(|d| d.as_str() == name);
            }
            true
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    skipped.push(ErrorRecord::new(
                        err.path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        format!("walk error: {err}"),
                    ));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(repo_root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if let Some(exclude) = &self.exclude {
                if exclude.is_match(&relative) {
                    continue;
                }
            }

            let Some(language) = classify_language(&relative) else {
                continue;
            };

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    skipped.push(ErrorRecord::new(relative, format!("stat failed: {err}")));
                    continue;
                }
            };
            if size > self.config.max_file_size {
                tracing::warn!(file = %relative, size, limit = self.config.max_file_size, "skipping oversized file");
                skipped.push(ErrorRecord::from(&IngestError::FileTooLarge {
                    path: relative,
                    size,
                    limit: self.config.max_file_size,
                }));
                continue;
            }

            by_language.entry(language).or_default().push(SourceFile {
                relative_path: relative,
                absolute_path: path.to_path_buf(),
                language,
                size,
            });
        }

        let mut groups = Vec::new();
        for language in Language::ALL {
            if let Some(mut files) = by_language.remove(&language) {
                files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
                groups.push(LanguageGroup { language, files });
            }
        }

        Ok(ScanReport { groups, skipped })
    }

    /// Read, parse, and finalize one file into its chunks.
    ///
    /// Parser failures and read errors are surfaced as classified errors;
    /// the caller records them and moves on — a single bad file never
    /// stops the repository.
    pub fn parse_file(&self, repo: &RepoSpec, file: &SourceFile) -> Result<Vec<Chunk>, IngestError> {
        let bytes =
            std::fs::read(&file.absolute_path).map_err(|source| IngestError::FileRead {
                path: file.relative_path.clone(),
                source,
            })?;

        let parser = self
            .registry
            .get(file.language)
            .ok_or_else(|| IngestError::Parse {
                path: file.relative_path.clone(),
                message: format!("no parser registered for {}", file.language),
            })?;

        let outcome = parser.parse(&file.relative_path, &bytes, &repo.id);
        if !outcome.success {
            return Err(IngestError::Parse {
                path: file.relative_path.clone(),
                message: outcome
                    .error
                    .unwrap_or_else(|| "unknown parser error".to_string()),
            });
        }

        let mut chunks = outcome.chunks;
        for chunk in &mut chunks {
            self.finalize_chunk(repo, chunk);
        }
        Ok(chunks)
    }

    /// Stamp provenance and classification onto a parsed chunk and seal
    /// its identity hash.
    fn finalize_chunk(&self, repo: &RepoSpec, chunk: &mut Chunk) {
        chunk.repo_component = infer_repo_component(&chunk.file_path);
        chunk.business_domain = classify_domain(
            &self.config.domain_patterns,
            &chunk.file_path,
            &chunk.content,
        );
        chunk.complexity_score = complexity_score(&chunk.content);

        chunk.metadata.insert(
            "service_type".into(),
            serde_json::Value::String(repo.repo_type.as_str().to_string()),
        );
        if !repo.service_dependencies.is_empty() {
            chunk.metadata.insert(
                "depends_on_services".into(),
                serde_json::Value::Array(
                    repo.service_dependencies
                        .iter()
                        .map(|s| serde_json::Value::String(s.clone()))
                        .collect(),
                ),
            );
        }
        if repo.has_helm {
            if let Some(helm_path) = &repo.helm_path {
                chunk.metadata.insert(
                    "helm_chart_name".into(),
                    serde_json::Value::String(helm_path.clone()),
                );
            }
        }
        chunk.metadata.insert(
            "line_count".into(),
            serde_json::Value::Number(chunk.line_count().into()),
        );
        chunk.seal();
    }
}

/// Extension classification, with workflow files carved out of YAML.
fn classify_language(relative_path: &str) -> Option<Language> {
    let ext = relative_path.rsplit('.').next().unwrap_or("");
    let language = Language::from_extension(ext)?;
    if language == Language::Yaml && is_workflow_path(relative_path) {
        return Some(Language::Cicd);
    }
    Some(language)
}

fn is_workflow_path(relative_path: &str) -> bool {
    relative_path.contains(".github/workflows/")
        || relative_path.contains(".circleci/")
        || relative_path.ends_with(".gitlab-ci.yml")
}
