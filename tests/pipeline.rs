//! End-to-end pipeline tests over a temp repository tree, a recording
//! stub embedder, and the in-memory vector backend.
//!
//! Covers the load-bearing guarantees: batch failure isolation (a failed
//! batch stores zero chunks and the run continues), checkpoint resume
//! (the union of two runs equals one uninterrupted run), idempotent
//! re-ingestion (content-derived point ids overwrite in place), and the
//! oversize-file skip policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use semdex::backend::memory::MemoryBackend;
use semdex::backend::VectorBackend;
use semdex::checkpoint::{CheckpointRecord, CheckpointStore};
use semdex::collections::CollectionMap;
use semdex::config::{IngestConfig, Language, Priority, RepoType};
use semdex::embedding::Embedder;
use semdex::error::IngestError;
use semdex::pipeline::Pipeline;
use semdex::repos::RepoSpec;

const DIM: usize = 4;

/// Stub embedder: deterministic vectors, records every embedded text, and
/// can be told to fail specific calls (1-based indices).
struct RecordingEmbedder {
    calls: AtomicUsize,
    fail_on: Vec<usize>,
    texts: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Vec::new(),
            texts: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            ..Self::new()
        }
    }

    fn embedded_texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(IngestError::EmbedTransient("HTTP 500: stub".into()));
        }
        self.texts.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|_| vec![0.5; DIM]).collect())
    }
}

struct TestEnv {
    dir: TempDir,
    repo: RepoSpec,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("repos/svc")).unwrap();
        let repo = RepoSpec {
            id: "svc".into(),
            github_url: "https://github.com/example/svc".into(),
            repo_type: RepoType::Backend,
            languages: vec![Language::Rust],
            components: vec![],
            priority: Priority::Medium,
            service_dependencies: vec![],
            has_helm: false,
            helm_path: None,
            exposes_apis: false,
            api_base_path: None,
        };
        Self { dir, repo }
    }

    fn repo_root(&self) -> std::path::PathBuf {
        self.dir.path().join("repos/svc")
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.repo_root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// One single-function Rust file per index, sorted by name.
    fn write_rust_files(&self, count: usize) {
        for i in 0..count {
            self.write(
                &format!("src/f{i:02}.rs"),
                &format!("pub fn handler_{i:02}() -> u32 {{ {i} }}\n"),
            );
        }
    }

    fn config(&self, batch_size: usize) -> IngestConfig {
        let mut config = IngestConfig::new(CollectionMap::default_map());
        config.embedding.api_key = "test-key".into();
        config.embedding.dimension = DIM;
        config.batch_size = batch_size;
        config.repos_base_dir = self.dir.path().join("repos");
        config.checkpoint_path = self.dir.path().join("checkpoint.json");
        config
    }

    fn pipeline(
        &self,
        batch_size: usize,
        embedder: Arc<RecordingEmbedder>,
        backend: Arc<MemoryBackend>,
    ) -> Pipeline {
        Pipeline::with_components(self.config(batch_size), embedder, backend).unwrap()
    }
}

#[tokio::test]
async fn clean_run_stores_all_chunks_and_clears_checkpoint() {
    let env = TestEnv::new();
    env.write_rust_files(6);
    let embedder = Arc::new(RecordingEmbedder::new());
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(4, embedder.clone(), backend.clone());

    let stats = pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    assert_eq!(stats.repositories_processed, 1);
    assert_eq!(stats.files_by_language["rust"], 6);
    assert_eq!(backend.points_in("code_rust"), 6);
    // Service collection receives the same points.
    assert_eq!(backend.points_in("backend"), 6);
    assert!(pipeline.checkpoint_store().load().is_none());
}

#[tokio::test]
async fn failed_batch_stores_zero_and_run_continues() {
    // batch_size=2, four chunks in: batch 2 fails all attempts.
    let env = TestEnv::new();
    env.write_rust_files(4);
    let embedder = Arc::new(RecordingEmbedder::failing_on(vec![2]));
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(2, embedder, backend.clone());

    let stats = pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    assert_eq!(backend.points_in("code_rust"), 2);
    let batch_errors = stats
        .errors
        .iter()
        .filter(|e| e.cause.contains("batch"))
        .count();
    assert_eq!(batch_errors, 1);
    // The failure never aborts the repository.
    assert_eq!(stats.repositories_processed, 1);
}

#[tokio::test]
async fn resume_skips_persisted_prefix_and_union_matches_single_run() {
    let env = TestEnv::new();
    env.write_rust_files(10);

    // Uninterrupted baseline run.
    let baseline_backend = Arc::new(MemoryBackend::new());
    let baseline = env.pipeline(3, Arc::new(RecordingEmbedder::new()), baseline_backend.clone());
    baseline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();
    let expected = baseline_backend.points_in("code_rust");
    assert_eq!(expected, 10);

    // Simulate a run killed after five files were fully persisted.
    let backend = Arc::new(MemoryBackend::new());
    let first_embedder = Arc::new(RecordingEmbedder::new());
    {
        let pipeline = env.pipeline(3, first_embedder.clone(), backend.clone());
        pipeline
            .ingest(std::slice::from_ref(&env.repo), true)
            .await
            .unwrap();
    }
    // Keep only the first five files' points, as if the process died
    // before the rest were stored, then restore the matching checkpoint.
    let store = CheckpointStore::new(env.dir.path().join("checkpoint.json"));
    store
        .save(&CheckpointRecord {
            repo_id: "svc".into(),
            language: Language::Rust,
            last_processed_file: "src/f04.rs".into(),
            files_processed: 5,
            chunks_processed: 5,
            completed_repos: vec![],
            timestamp: Utc::now(),
        })
        .unwrap();

    let second_embedder = Arc::new(RecordingEmbedder::new());
    let pipeline = env.pipeline(3, second_embedder.clone(), backend.clone());
    pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    // Only the suffix was re-embedded.
    let embedded = second_embedder.embedded_texts();
    assert_eq!(embedded.len(), 5);
    assert!(embedded.iter().all(|t| !t.contains("handler_04")));
    assert!(embedded.iter().any(|t| t.contains("handler_09")));

    // Union across runs equals the uninterrupted-run set.
    assert_eq!(backend.points_in("code_rust"), expected);
    assert!(pipeline.checkpoint_store().load().is_none());
}

#[tokio::test]
async fn completed_repos_are_skipped_on_resume() {
    let env = TestEnv::new();
    env.write_rust_files(3);
    let store = CheckpointStore::new(env.dir.path().join("checkpoint.json"));
    store
        .save(&CheckpointRecord {
            repo_id: "svc".into(),
            language: Language::Rust,
            last_processed_file: String::new(),
            files_processed: 0,
            chunks_processed: 0,
            completed_repos: vec!["svc".into()],
            timestamp: Utc::now(),
        })
        .unwrap();

    let embedder = Arc::new(RecordingEmbedder::new());
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(2, embedder.clone(), backend.clone());
    let stats = pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    assert_eq!(stats.repositories_processed, 0);
    assert_eq!(backend.total_points(), 0);
    assert!(embedder.embedded_texts().is_empty());
}

#[tokio::test]
async fn reingestion_is_idempotent_per_collection() {
    let env = TestEnv::new();
    env.write_rust_files(5);
    env.write("docs/ARCH.md", "# Title\n## Auth\ntext A\n## Deployment\ntext B\n");

    let backend = Arc::new(MemoryBackend::new());
    let first = env.pipeline(3, Arc::new(RecordingEmbedder::new()), backend.clone());
    first
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();
    let rust_after_first = backend.points_in("code_rust");
    let docs_after_first = backend.points_in("documentation");
    assert_eq!(rust_after_first, 5);
    assert_eq!(docs_after_first, 2);

    let second = env.pipeline(3, Arc::new(RecordingEmbedder::new()), backend.clone());
    second
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    assert_eq!(backend.points_in("code_rust"), rust_after_first);
    assert_eq!(backend.points_in("documentation"), docs_after_first);
}

#[tokio::test]
async fn oversize_file_is_skipped_with_warning_others_processed() {
    let env = TestEnv::new();
    env.write_rust_files(2);
    let big_body = format!("// {}\npub fn big() {{}}\n", "x".repeat(600_000));
    env.write("src/huge.rs", &big_body);

    let embedder = Arc::new(RecordingEmbedder::new());
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(4, embedder.clone(), backend.clone());
    let stats = pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    assert_eq!(backend.points_in("code_rust"), 2);
    assert!(stats.errors.iter().any(|e| e.path == "src/huge.rs"));
    assert!(embedder
        .embedded_texts()
        .iter()
        .all(|t| !t.contains("fn big")));
}

#[tokio::test]
async fn missing_repository_is_recorded_and_run_continues() {
    let env = TestEnv::new();
    env.write_rust_files(2);
    let ghost = RepoSpec {
        id: "ghost".into(),
        ..env.repo.clone()
    };

    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(4, Arc::new(RecordingEmbedder::new()), backend.clone());
    let stats = pipeline
        .ingest(&[ghost, env.repo.clone()], true)
        .await
        .unwrap();

    assert_eq!(stats.repositories_processed, 1);
    assert!(stats
        .errors
        .iter()
        .any(|e| e.cause.contains("repository not found")));
    assert_eq!(backend.points_in("code_rust"), 2);
}

#[tokio::test]
async fn documentation_chunks_follow_scenario_shape() {
    let env = TestEnv::new();
    env.write("docs/ARCH.md", "# Title\n## Auth\ntext A\n## Deployment\ntext B\n");

    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(4, Arc::new(RecordingEmbedder::new()), backend.clone());
    pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    let hits = backend
        .search("documentation", &[0.5; DIM], 10, 0.0, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    let names: Vec<&str> = hits
        .iter()
        .filter_map(|h| h.payload["item_name"].as_str())
        .collect();
    assert!(names.contains(&"Auth"));
    assert!(names.contains(&"Deployment"));
    // Path keyword "arch" selects the architecture doc type.
    assert!(hits
        .iter()
        .all(|h| h.payload["item_type"] == "architecture"));
}

#[tokio::test]
async fn single_function_scenario_payload() {
    let env = TestEnv::new();
    env.write("svc/auth.rs", "pub fn verify_token(t: &str) -> bool { !t.is_empty() }");

    let backend = Arc::new(MemoryBackend::new());
    let pipeline = env.pipeline(4, Arc::new(RecordingEmbedder::new()), backend.clone());
    pipeline
        .ingest(std::slice::from_ref(&env.repo), true)
        .await
        .unwrap();

    let hits = backend
        .search("code_rust", &[0.5; DIM], 1, 0.0, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    let payload = &hits[0].payload;
    assert_eq!(payload["item_type"], "function");
    assert_eq!(payload["item_name"], "verify_token");
    assert_eq!(payload["start_line"], 1);
    assert_eq!(payload["end_line"], 1);
    assert_eq!(payload["business_domain"], "auth");
    assert!(payload["complexity_score"].as_f64().unwrap() > 0.0);
    assert_eq!(payload["chunk_hash"].as_str().unwrap().len(), 64);
}
