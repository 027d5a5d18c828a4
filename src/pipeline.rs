//! Pipeline orchestrator: repositories in, statistics out.
//!
//! The orchestrator is the only component that sees repositories as a
//! sequence. Per repository it runs discovery, feeds each language group
//! through the batch processor, aggregates statistics, and owns the
//! checkpoint store (all saves funnel through it, so there is exactly one
//! writer).
//!
//! Repository lifecycle: PENDING → RUNNING → COMPLETED | FAILED. The
//! COMPLETED transition is the checkpoint save that lists the repository
//! in `completed_repos`. On clean completion of the whole run the
//! checkpoint is cleared; on cancellation it is left behind, describing a
//! true prefix of persisted work for the next `--resume` run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::backend::{create_backend, VectorBackend};
use crate::batch::{BatchProcessor, GroupContext};
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::{IngestConfig, Language};
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::{ErrorRecord, IngestError};
use crate::files::FileProcessor;
use crate::parsers::ParserRegistry;
use crate::repos::RepoSpec;
use crate::stats::RunStats;
use crate::storage::StorageManager;

pub struct Pipeline {
    config: IngestConfig,
    file_processor: FileProcessor,
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn VectorBackend>,
    storage: Arc<StorageManager>,
    batch: BatchProcessor,
    checkpoint: CheckpointStore,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Construct with production components: HTTP embedding client and
    /// the backend selected by `VECTOR_BACKEND`. Cheap apart from backend
    /// connection; no bulk work happens until [`Pipeline::ingest`].
    pub async fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        let embedder = Arc::new(EmbeddingClient::new(
            &config.embedding,
            config.batch_size,
            config.max_retries,
            config.rate_limit,
        )?);
        let backend = create_backend(&config).await?;
        Ok(Self::assemble(config, embedder, backend)?)
    }

    /// Construct with injected components; used by tests and dry runs.
    pub fn with_components(
        config: IngestConfig,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn VectorBackend>,
    ) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, embedder, backend)
    }

    fn assemble(
        config: IngestConfig,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn VectorBackend>,
    ) -> Result<Self> {
        let storage = Arc::new(StorageManager::new(
            backend.clone(),
            config.embedding.dimension,
            config.embedding.model.clone(),
        ));
        let batch = BatchProcessor::new(
            embedder.clone(),
            storage.clone(),
            config.batch_size,
            config.rate_limit,
            Duration::from_secs(config.embedding.timeout_secs),
        );
        let file_processor =
            FileProcessor::new(config.clone(), ParserRegistry::with_builtins())?;
        let checkpoint = CheckpointStore::new(config.checkpoint_path.clone());
        Ok(Self {
            config,
            file_processor,
            embedder,
            backend,
            storage,
            batch,
            checkpoint,
            cancel: CancellationToken::new(),
        })
    }

    /// Token to wire to a signal handler; cancelling it stops new batches
    /// while in-flight work drains.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn backend(&self) -> Arc<dyn VectorBackend> {
        self.backend.clone()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Surface auth, connectivity, and collection problems before bulk
    /// work: one embedding probe plus idempotent collection setup.
    pub async fn warmup(&self) -> Result<()> {
        self.embedder.warmup().await?;
        let names = self.config.collections.all_collection_names();
        self.storage.setup_collections(&names).await?;
        Ok(())
    }

    /// Ingest repositories sequentially, resuming from the durable
    /// checkpoint when `resume` is set.
    pub async fn ingest(&self, repos: &[RepoSpec], resume: bool) -> Result<RunStats> {
        self.warmup().await?;

        let restored = if resume {
            self.checkpoint.load()
        } else {
            self.checkpoint.clear().ok();
            None
        };
        let mut completed_repos: Vec<String> = restored
            .as_ref()
            .map(|r| r.completed_repos.clone())
            .unwrap_or_default();
        if let Some(record) = &restored {
            tracing::info!(
                repo = %record.repo_id,
                language = %record.language,
                files = record.files_processed,
                "resuming from checkpoint"
            );
        }

        let mut stats = RunStats::default();
        let mut cancelled = false;

        for repo in repos {
            if completed_repos.iter().any(|done| done == &repo.id) {
                tracing::info!(repo = %repo.id, "already completed, skipping");
                continue;
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let repo_path = repo.local_path(&self.config.repos_base_dir);
            if !repo_path.exists() {
                let err = IngestError::RepoNotFound {
                    path: repo_path.display().to_string(),
                };
                tracing::warn!(repo = %repo.id, "{err}");
                stats.errors.push(ErrorRecord::from(&err));
                continue;
            }

            tracing::info!(repo = %repo.id, "repository running");
            match self
                .ingest_repository(repo, &repo_path, restored.as_ref(), &completed_repos, &mut stats)
                .await
            {
                Ok(false) => {
                    cancelled = true;
                    break;
                }
                Ok(true) => {
                    completed_repos.push(repo.id.clone());
                    stats.repositories_processed += 1;
                    // COMPLETED is atomic with this checkpoint write.
                    self.save_checkpoint(&CheckpointRecord {
                        repo_id: repo.id.clone(),
                        language: repo
                            .languages
                            .first()
                            .copied()
                            .unwrap_or(Language::Documentation),
                        last_processed_file: String::new(),
                        files_processed: 0,
                        chunks_processed: 0,
                        completed_repos: completed_repos.clone(),
                        timestamp: Utc::now(),
                    });
                    tracing::info!(repo = %repo.id, "repository completed");
                }
                Err(err) => {
                    tracing::warn!(repo = %repo.id, error = %err, "repository failed, continuing");
                    stats
                        .errors
                        .push(ErrorRecord::new(repo.id.clone(), err.to_string()));
                }
            }

            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            tracing::info!("run cancelled; checkpoint retained for resume");
        } else if let Err(err) = self.checkpoint.clear() {
            tracing::warn!(error = %err, "failed to clear checkpoint after clean completion");
        }

        Ok(stats)
    }

    /// Returns `Ok(true)` when the repository completed, `Ok(false)` when
    /// cancellation interrupted it (leaving the checkpoint authoritative).
    async fn ingest_repository(
        &self,
        repo: &RepoSpec,
        repo_path: &std::path::Path,
        restored: Option<&CheckpointRecord>,
        completed_repos: &[String],
        stats: &mut RunStats,
    ) -> Result<bool> {
        let report = self.file_processor.scan(repo_path)?;
        stats.errors.extend(report.skipped);

        for group in &report.groups {
            if self.cancel.is_cancelled() {
                break;
            }

            // Resume position applies only to the checkpointed group.
            let resume_after = restored
                .filter(|r| r.repo_id == repo.id && r.language == group.language)
                .map(|r| r.last_processed_file.clone())
                .filter(|f| !f.is_empty());

            let sample_path = group
                .files
                .first()
                .map(|f| f.relative_path.clone())
                .unwrap_or_default();
            let targets =
                self.config
                    .collections
                    .target_collections(group.language, repo, &sample_path, "");
            if targets.is_empty() {
                stats.errors.push(ErrorRecord::new(
                    repo.id.clone(),
                    format!("no collection configured for {}", group.language),
                ));
                continue;
            }

            let ctx = GroupContext {
                repo,
                language: group.language,
                targets,
                cadence: self.config.cadence_for(group.language),
                resume_after,
            };

            let repo_id = repo.id.clone();
            let language = group.language;
            let completed = completed_repos.to_vec();
            let checkpoint = &self.checkpoint;
            let mut on_checkpoint = move |progress: crate::batch::GroupProgress| {
                let record = CheckpointRecord {
                    repo_id: repo_id.clone(),
                    language,
                    last_processed_file: progress.last_processed_file,
                    files_processed: progress.files_processed,
                    chunks_processed: progress.chunks_processed,
                    completed_repos: completed.clone(),
                    timestamp: Utc::now(),
                };
                if let Err(err) = checkpoint.save(&record) {
                    // Checkpoint failures degrade resumability, never the run.
                    tracing::warn!("{}", IngestError::CheckpointWrite(err.to_string()));
                }
            };

            let group_stats = self
                .batch
                .process_group(
                    &group.files,
                    &self.file_processor,
                    &ctx,
                    &self.cancel,
                    &mut on_checkpoint,
                )
                .await;
            stats.absorb(group.language.as_str(), group_stats);
        }

        Ok(!self.cancel.is_cancelled())
    }

    fn save_checkpoint(&self, record: &CheckpointRecord) {
        if let Err(err) = self.checkpoint.save(record) {
            tracing::warn!("{}", IngestError::CheckpointWrite(err.to_string()));
        }
    }
}
