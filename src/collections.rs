//! Collection name resolution and multi-collection assignment.
//!
//! Collections come in three families:
//!
//! 1. **By language** — every chunk lands in its language's collection
//!    (e.g. `code_rust`). This mapping is required: a language with no
//!    collection is a configuration error.
//! 2. **By service** — routed from the repository type (frontend, backend…).
//! 3. **By concern** — architectural concerns detected from path and
//!    content (api_contracts, database_schemas, config, deployment).
//!
//! Mappings are loaded from `collections.yaml`; full collection names are
//! `{prefix}_{suffix}` when a prefix is configured, else the bare suffix.
//! The `mixed` collection is reserved for chunks explicitly tagged for
//! cross-language storage and is never populated implicitly.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{Language, RepoType};
use crate::repos::RepoSpec;

/// Raw shape of `collections.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionsFile {
    #[serde(default)]
    pub collection_prefix: String,
    #[serde(default)]
    pub language_collections: BTreeMap<String, String>,
    #[serde(default)]
    pub service_collections: BTreeMap<String, String>,
    #[serde(default)]
    pub concern_collections: BTreeMap<String, String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub default_collection: Option<String>,
}

/// Resolved collection mappings with the prefix already applied.
#[derive(Debug, Clone)]
pub struct CollectionMap {
    prefix: String,
    languages: BTreeMap<String, String>,
    services: BTreeMap<String, String>,
    concerns: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
    default_collection: Option<String>,
}

impl CollectionMap {
    /// Load and resolve `collections.yaml`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read collections config: {}", path.display()))?;
        let file: CollectionsFile =
            serde_yaml::from_str(&raw).context("failed to parse collections config")?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: CollectionsFile) -> Self {
        Self {
            prefix: file.collection_prefix,
            languages: file.language_collections,
            services: file.service_collections,
            concerns: file.concern_collections,
            aliases: file.aliases,
            default_collection: file.default_collection,
        }
    }

    /// Built-in mapping mirroring the stock `collections.yaml`, used when no
    /// config file is present and by tests.
    pub fn default_map() -> Self {
        let languages = [
            ("rust", "code_rust"),
            ("typescript", "code_typescript"),
            ("tsx", "code_typescript"),
            ("javascript", "code_typescript"),
            ("jsx", "code_typescript"),
            ("solidity", "code_solidity"),
            ("documentation", "documentation"),
            ("yaml", "code_yaml"),
            ("cicd", "cicd"),
            ("terraform", "code_terraform"),
            ("mixed", "code_mixed"),
        ];
        let services = [
            ("frontend", "frontend"),
            ("backend", "backend"),
            ("middleware", "middleware"),
            ("mcp_server", "middleware"),
            ("infrastructure", "infrastructure"),
            ("tool", "infrastructure"),
            ("documentation", "documentation"),
        ];
        let concerns = [
            ("api_contracts", "api_contracts"),
            ("database_schemas", "database_schemas"),
            ("config", "config"),
            ("deployment", "deployment"),
        ];
        let to_map = |entries: &[(&str, &str)]| {
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            prefix: String::new(),
            languages: to_map(&languages),
            services: to_map(&services),
            concerns: to_map(&concerns),
            aliases: BTreeMap::new(),
            default_collection: None,
        }
    }

    fn full_name(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}_{}", self.prefix, suffix)
        }
    }

    /// The BY_LANGUAGE collection for a language tag, if mapped.
    pub fn language_collection(&self, language: Language) -> Option<String> {
        self.languages
            .get(language.as_str())
            .map(|s| self.full_name(s))
    }

    /// The reserved cross-language collection, if configured.
    pub fn mixed_collection(&self) -> Option<String> {
        self.languages.get("mixed").map(|s| self.full_name(s))
    }

    /// The BY_SERVICE collection for a repository type, if mapped.
    pub fn service_collection(&self, repo_type: RepoType) -> Option<String> {
        self.services
            .get(repo_type.as_str())
            .map(|s| self.full_name(s))
    }

    fn concern(&self, key: &str) -> Option<String> {
        self.concerns.get(key).map(|s| self.full_name(s))
    }

    /// Resolve an alias to its full collection name.
    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.get(alias).map(|s| self.full_name(s))
    }

    /// Fallback collection for unmapped content, if configured.
    pub fn default_collection(&self) -> Option<String> {
        self.default_collection.as_deref().map(|s| self.full_name(s))
    }

    /// Every distinct collection name, sorted. This is the warm-up set.
    pub fn all_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .languages
            .values()
            .chain(self.services.values())
            .chain(self.concerns.values())
            .map(|s| self.full_name(s))
            .collect();
        if let Some(default) = self.default_collection() {
            names.push(default);
        }
        names.sort();
        names.dedup();
        names
    }

    /// All target collections for one chunk: language collection first,
    /// then service, then any matched concerns, deduplicated in order.
    pub fn target_collections(
        &self,
        language: Language,
        repo: &RepoSpec,
        file_path: &str,
        content: &str,
    ) -> Vec<String> {
        let mut targets = Vec::new();
        if let Some(lang) = self.language_collection(language) {
            targets.push(lang);
        }
        if let Some(service) = self.service_collection(repo.repo_type) {
            if !targets.contains(&service) {
                targets.push(service);
            }
        }
        for concern in self.concern_collections(language, repo, file_path, content) {
            if !targets.contains(&concern) {
                targets.push(concern);
            }
        }
        targets
    }

    /// BY_CONCERN collections matched by path/content heuristics.
    fn concern_collections(
        &self,
        language: Language,
        repo: &RepoSpec,
        file_path: &str,
        content: &str,
    ) -> Vec<String> {
        let path = file_path.to_lowercase();
        let body = content.to_lowercase();
        let mut matched = Vec::new();

        let mut push = |name: Option<String>| {
            if let Some(name) = name {
                if !matched.contains(&name) {
                    matched.push(name);
                }
            }
        };

        // API contracts: spec files by name, or route handlers by content.
        let api_path = ["openapi", "swagger", "api.yaml", "api.yml"]
            .iter()
            .any(|p| path.contains(p));
        let api_content = matches!(
            language,
            Language::Rust | Language::TypeScript | Language::Tsx | Language::JavaScript | Language::Jsx
        ) && ["router.", "app.get", "app.post", "#[get", "#[post", "axum", "express"]
            .iter()
            .any(|p| body.contains(p));
        let api_repo = repo.exposes_apis
            && repo.api_base_path.is_some()
            && (path.contains("api") || path.contains("route"));
        if api_path || api_content || api_repo {
            push(self.concern("api_contracts"));
        }

        // Database schemas: migrations, models, or DDL.
        let db_path = ["schema", "migration", "models.", "entities.", ".sql"]
            .iter()
            .any(|p| path.contains(p));
        let db_content = ["create table", "alter table", "prisma", "diesel", "sqlx"]
            .iter()
            .any(|p| body.contains(p));
        if db_path || db_content {
            push(self.concern("database_schemas"));
        }

        // Configuration files by name.
        if ["config", "settings", ".env", "values.yaml"]
            .iter()
            .any(|p| path.contains(p))
        {
            push(self.concern("config"));
        }

        // Deployment: manifests, charts, IaC.
        let deploy_path = [
            "helm",
            "k8s",
            "kubernetes",
            "deployment",
            "service.yaml",
            "dockerfile",
            "docker-compose",
            ".tf",
        ]
        .iter()
        .any(|p| path.contains(p));
        let deploy_lang = matches!(language, Language::Yaml | Language::Terraform | Language::Cicd);
        let helm_repo = repo.has_helm
            && ["helm", "chart", "values"].iter().any(|p| path.contains(p));
        if deploy_path || deploy_lang || helm_repo {
            push(self.concern("deployment"));
        }

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Priority;

    fn sample_repo(repo_type: RepoType) -> RepoSpec {
        RepoSpec {
            id: "svc".into(),
            github_url: "https://github.com/example/svc".into(),
            repo_type,
            languages: vec![Language::Rust],
            components: vec![],
            priority: Priority::Medium,
            service_dependencies: vec![],
            has_helm: false,
            helm_path: None,
            exposes_apis: false,
            api_base_path: None,
        }
    }

    #[test]
    fn prefix_applies_to_every_family() {
        let map = CollectionMap::from_file(CollectionsFile {
            collection_prefix: "acme".into(),
            language_collections: BTreeMap::from([("rust".into(), "code_rust".into())]),
            service_collections: BTreeMap::from([("backend".into(), "backend".into())]),
            ..Default::default()
        });
        assert_eq!(
            map.language_collection(Language::Rust).as_deref(),
            Some("acme_code_rust")
        );
        assert_eq!(
            map.service_collection(RepoType::Backend).as_deref(),
            Some("acme_backend")
        );
    }

    #[test]
    fn typescript_family_shares_one_collection() {
        let map = CollectionMap::default_map();
        let ts = map.language_collection(Language::TypeScript);
        assert_eq!(map.language_collection(Language::Tsx), ts);
        assert_eq!(map.language_collection(Language::Jsx), ts);
        assert_eq!(map.language_collection(Language::JavaScript), ts);
    }

    #[test]
    fn language_collection_is_always_first_target() {
        let map = CollectionMap::default_map();
        let repo = sample_repo(RepoType::Backend);
        let targets = map.target_collections(Language::Rust, &repo, "src/lib.rs", "pub fn x() {}");
        assert_eq!(targets[0], "code_rust");
        assert!(targets.contains(&"backend".to_string()));
    }

    #[test]
    fn route_handler_content_lands_in_api_contracts() {
        let map = CollectionMap::default_map();
        let repo = sample_repo(RepoType::Backend);
        let targets = map.target_collections(
            Language::Rust,
            &repo,
            "src/api/users.rs",
            "async fn list() {} // axum router",
        );
        assert!(targets.contains(&"api_contracts".to_string()));
    }

    #[test]
    fn terraform_always_maps_to_deployment_concern() {
        let map = CollectionMap::default_map();
        let repo = sample_repo(RepoType::Infrastructure);
        let targets =
            map.target_collections(Language::Terraform, &repo, "infra/main.tf", "resource {}");
        assert!(targets.contains(&"deployment".to_string()));
    }

    #[test]
    fn all_names_are_unique_and_sorted() {
        let names = CollectionMap::default_map().all_collection_names();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
        assert!(names.contains(&"code_mixed".to_string()));
    }

    #[test]
    fn mixed_is_reserved_not_a_default_target() {
        let map = CollectionMap::default_map();
        let repo = sample_repo(RepoType::Backend);
        let targets = map.target_collections(Language::Rust, &repo, "src/lib.rs", "fn f() {}");
        assert!(!targets.contains(&"code_mixed".to_string()));
    }
}
