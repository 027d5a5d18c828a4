//! Batch processor: drives embedding and storage for one language group.
//!
//! Files arrive in sorted order; their chunks accumulate into batches of
//! exactly `batch_size` (the final partial batch is flushed at the end).
//! Batches are dispatched onto a `JoinSet` with at most `rate_limit` in
//! flight and may complete out of order; within a batch, chunk-to-vector
//! pairing is strictly positional.
//!
//! **Partial-failure isolation**: when the embedding call fails (after
//! retries, or with a length mismatch) the batch contributes zero stored
//! chunks, one error descriptor naming the file range is recorded, and
//! storage is never called for it.
//!
//! **Checkpoint tracking**: a per-file tracker counts how many in-flight
//! batches still hold each file's chunks. The durable `last_processed_file`
//! only ever advances along the contiguous prefix of files whose batches
//! have all completed, so a checkpoint always describes a true prefix of
//! finished work even while later batches are still in the air.
//!
//! **Cancellation** is cooperative: once the token fires no new batch
//! starts; in-flight batches get a grace period bounded by the embed
//! timeout, then are abandoned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunk::Chunk;
use crate::config::{CheckpointCadence, Language};
use crate::embedding::Embedder;
use crate::error::{ErrorRecord, IngestError};
use crate::files::{FileProcessor, SourceFile};
use crate::repos::RepoSpec;
use crate::stats::LanguageStats;
use crate::storage::StorageManager;

/// Chunks longer than this cannot be embedded in one request and are
/// dropped with a recorded error before batch formation.
const MAX_EMBED_CHARS: usize = 131_000;

/// Durable progress reported to the checkpoint hook.
#[derive(Debug, Clone)]
pub struct GroupProgress {
    pub last_processed_file: String,
    pub files_processed: usize,
    pub chunks_processed: usize,
}

/// Everything `process_group` needs to know about its surroundings.
pub struct GroupContext<'a> {
    pub repo: &'a RepoSpec,
    pub language: Language,
    /// Target collections, primary (language) collection first.
    pub targets: Vec<String>,
    pub cadence: CheckpointCadence,
    /// Skip files whose relative path sorts at or before this (resume).
    pub resume_after: Option<String>,
}

pub struct BatchProcessor {
    embedder: Arc<dyn Embedder>,
    storage: Arc<StorageManager>,
    batch_size: usize,
    rate_limit: usize,
    embed_timeout: Duration,
}

impl BatchProcessor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        storage: Arc<StorageManager>,
        batch_size: usize,
        rate_limit: usize,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            storage,
            batch_size: batch_size.max(1),
            rate_limit: rate_limit.max(1),
            embed_timeout,
        }
    }

    /// Stream one language group's chunks through embedding into storage.
    ///
    /// `on_checkpoint` is invoked at the configured cadence with progress
    /// that reflects only fully persisted files; the orchestrator wires it
    /// to the checkpoint store.
    pub async fn process_group(
        &self,
        files: &[SourceFile],
        file_processor: &FileProcessor,
        ctx: &GroupContext<'_>,
        cancel: &CancellationToken,
        on_checkpoint: &mut dyn FnMut(GroupProgress),
    ) -> LanguageStats {
        let eligible: Vec<&SourceFile> = files
            .iter()
            .filter(|f| match &ctx.resume_after {
                Some(last) => f.relative_path.as_str() > last.as_str(),
                None => true,
            })
            .collect();

        tracing::info!(
            language = %ctx.language,
            repo = %ctx.repo.id,
            files = eligible.len(),
            "processing language group"
        );

        let mut state = GroupState::new(&eligible);
        let mut stats = LanguageStats::default();
        let mut in_flight: JoinSet<BatchOutcome> = JoinSet::new();
        let mut pending: Vec<Chunk> = Vec::with_capacity(self.batch_size);
        let mut next_batch_id = 1usize;

        for file in &eligible {
            if cancel.is_cancelled() {
                break;
            }

            match file_processor.parse_file(ctx.repo, file) {
                Ok(chunks) => {
                    for chunk in &chunks {
                        *stats
                            .business_domains
                            .entry(chunk.business_domain.clone())
                            .or_default() += 1;
                    }
                    for chunk in chunks {
                        if chunk.content.len() > MAX_EMBED_CHARS {
                            stats.record_error(ErrorRecord::new(
                                chunk.file_path.clone(),
                                format!(
                                    "chunk `{}` exceeds {MAX_EMBED_CHARS} chars, not embedded",
                                    chunk.item_name
                                ),
                            ));
                            continue;
                        }
                        state.mark_buffered(&chunk.file_path);
                        pending.push(chunk);
                        if pending.len() == self.batch_size {
                            let batch = std::mem::take(&mut pending);
                            self.dispatch(
                                batch,
                                next_batch_id,
                                ctx,
                                &mut state,
                                &mut in_flight,
                                &mut stats,
                            )
                            .await;
                            next_batch_id += 1;
                        }
                    }
                    state.mark_parsed(&file.relative_path);
                }
                Err(err) => {
                    tracing::warn!(file = %file.relative_path, error = %err, "file skipped");
                    stats.record_error(ErrorRecord::from(&err));
                    state.mark_parsed(&file.relative_path);
                }
            }
            stats.files_processed += 1;

            self.drain_ready(&mut in_flight, &mut state, &mut stats).await;
            self.maybe_checkpoint(ctx.cadence, false, &mut state, &stats, on_checkpoint);
        }

        // Flush the final partial batch unless cancellation arrived first.
        if !pending.is_empty() && !cancel.is_cancelled() {
            let batch = std::mem::take(&mut pending);
            self.dispatch(batch, next_batch_id, ctx, &mut state, &mut in_flight, &mut stats)
                .await;
        }

        if cancel.is_cancelled() {
            self.drain_with_grace(&mut in_flight, &mut state, &mut stats)
                .await;
        } else {
            while let Some(joined) = in_flight.join_next().await {
                Self::absorb(joined, &mut state, &mut stats);
                self.maybe_checkpoint(ctx.cadence, false, &mut state, &stats, on_checkpoint);
            }
        }

        // Final durable position for this group.
        self.maybe_checkpoint(ctx.cadence, true, &mut state, &stats, on_checkpoint);
        stats
    }

    /// Seal a batch and put it in the air, waiting for a slot when the
    /// rate limit's worth of batches is already in flight.
    async fn dispatch(
        &self,
        batch: Vec<Chunk>,
        batch_id: usize,
        ctx: &GroupContext<'_>,
        state: &mut GroupState,
        in_flight: &mut JoinSet<BatchOutcome>,
        stats: &mut LanguageStats,
    ) {
        while in_flight.len() >= self.rate_limit {
            if let Some(joined) = in_flight.join_next().await {
                Self::absorb(joined, state, stats);
            }
        }

        let mut batch_files: Vec<String> = Vec::new();
        for chunk in &batch {
            if batch_files.last() != Some(&chunk.file_path) {
                batch_files.push(chunk.file_path.clone());
            }
        }
        // The buffer becomes this batch wholesale: buffered marks convert
        // into an in-flight batch count.
        state.clear_buffered();
        state.add_pending(&batch_files);

        let embedder = self.embedder.clone();
        let storage = self.storage.clone();
        let targets = ctx.targets.clone();
        let primary = ctx.targets.first().cloned().unwrap_or_default();
        tracing::debug!(batch_id, chunks = batch.len(), "dispatching batch");

        in_flight.spawn(async move {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            match embedder.embed(&texts).await {
                Ok(vectors) => {
                    let report = storage.store_batch(&batch, &vectors, &targets).await;
                    let stored = report.stored_in(&primary);
                    BatchOutcome {
                        files: batch_files,
                        stored,
                        stored_by_collection: report.stored_by_collection,
                        errors: report.errors,
                    }
                }
                Err(err) => {
                    let file_range = match (batch_files.first(), batch_files.last()) {
                        (Some(first), Some(last)) if first != last => {
                            format!("{first}..{last}")
                        }
                        (Some(first), _) => first.clone(),
                        _ => String::new(),
                    };
                    let failure = IngestError::BatchFailed {
                        batch_id,
                        file_range,
                        cause: err.to_string(),
                    };
                    tracing::warn!(batch_id, error = %failure, "batch failed, zero chunks stored");
                    BatchOutcome {
                        files: batch_files,
                        stored: 0,
                        stored_by_collection: Default::default(),
                        errors: vec![ErrorRecord::from(&failure)],
                    }
                }
            }
        });
    }

    /// Absorb already-finished batches without blocking on the rest.
    async fn drain_ready(
        &self,
        in_flight: &mut JoinSet<BatchOutcome>,
        state: &mut GroupState,
        stats: &mut LanguageStats,
    ) {
        while let Some(joined) = in_flight.try_join_next() {
            Self::absorb(joined, state, stats);
        }
    }

    /// Cancellation path: give in-flight batches one embed-timeout of
    /// grace, then abandon them.
    async fn drain_with_grace(
        &self,
        in_flight: &mut JoinSet<BatchOutcome>,
        state: &mut GroupState,
        stats: &mut LanguageStats,
    ) {
        let drained = tokio::time::timeout(self.embed_timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                Self::absorb(joined, state, stats);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                abandoned = in_flight.len(),
                "cancellation grace period elapsed, abandoning in-flight batches"
            );
            in_flight.abort_all();
        }
    }

    fn absorb(
        joined: Result<BatchOutcome, tokio::task::JoinError>,
        state: &mut GroupState,
        stats: &mut LanguageStats,
    ) {
        match joined {
            Ok(outcome) => {
                stats.chunks_stored += outcome.stored;
                for (collection, count) in outcome.stored_by_collection {
                    *stats.chunks_by_collection.entry(collection).or_default() += count;
                }
                stats.errors.extend(outcome.errors);
                state.complete_batch(&outcome.files);
            }
            Err(err) => {
                stats.record_error(ErrorRecord::new(String::new(), format!("batch task: {err}")));
            }
        }
    }

    fn maybe_checkpoint(
        &self,
        cadence: CheckpointCadence,
        force: bool,
        state: &mut GroupState,
        stats: &LanguageStats,
        on_checkpoint: &mut dyn FnMut(GroupProgress),
    ) {
        let completed = state.completed_prefix();
        let due = match cadence {
            _ if force => completed > state.last_checkpointed,
            CheckpointCadence::EveryFiles(n) => completed >= state.last_checkpointed + n.max(1),
            CheckpointCadence::EveryBatch => completed > state.last_checkpointed,
        };
        if !due {
            return;
        }
        let Some(last_file) = state.last_completed_file() else {
            return;
        };
        state.last_checkpointed = completed;
        on_checkpoint(GroupProgress {
            last_processed_file: last_file,
            files_processed: completed,
            chunks_processed: stats.chunks_stored,
        });
    }
}

struct BatchOutcome {
    /// Distinct relative paths whose chunks were in the batch.
    files: Vec<String>,
    /// Chunks stored in the primary collection.
    stored: usize,
    stored_by_collection: std::collections::BTreeMap<String, usize>,
    errors: Vec<ErrorRecord>,
}

/// Tracks, per file in processing order, whether parsing finished and how
/// many in-flight batches still hold its chunks. Files whose chunks sit in
/// the not-yet-sealed buffer are pinned too, so the completed prefix is
/// always a durable frontier.
struct GroupState {
    order: Vec<String>,
    states: HashMap<String, FileState>,
    prefix: usize,
    last_checkpointed: usize,
}

#[derive(Default)]
struct FileState {
    parsed: bool,
    pending_batches: usize,
    buffered: bool,
}

impl GroupState {
    fn new(files: &[&SourceFile]) -> Self {
        let order: Vec<String> = files.iter().map(|f| f.relative_path.clone()).collect();
        let states = order
            .iter()
            .map(|path| (path.clone(), FileState::default()))
            .collect();
        Self {
            order,
            states,
            prefix: 0,
            last_checkpointed: 0,
        }
    }

    fn mark_parsed(&mut self, path: &str) {
        if let Some(state) = self.states.get_mut(path) {
            state.parsed = true;
        }
        self.advance();
    }

    /// Pin a file while its chunks wait in the unsealed batch buffer.
    fn mark_buffered(&mut self, path: &str) {
        if let Some(state) = self.states.get_mut(path) {
            state.buffered = true;
        }
    }

    /// The buffer was sealed into a batch; its pin converts to a pending
    /// batch count via [`GroupState::add_pending`].
    fn clear_buffered(&mut self) {
        for state in self.states.values_mut() {
            state.buffered = false;
        }
    }

    fn add_pending(&mut self, files: &[String]) {
        for path in files {
            if let Some(state) = self.states.get_mut(path) {
                state.pending_batches += 1;
            }
        }
    }

    fn complete_batch(&mut self, files: &[String]) {
        for path in files {
            if let Some(state) = self.states.get_mut(path) {
                state.pending_batches = state.pending_batches.saturating_sub(1);
            }
        }
        self.advance();
    }

    fn advance(&mut self) {
        while self.prefix < self.order.len() {
            let state = &self.states[&self.order[self.prefix]];
            if state.parsed && state.pending_batches == 0 && !state.buffered {
                self.prefix += 1;
            } else {
                break;
            }
        }
    }

    fn completed_prefix(&self) -> usize {
        self.prefix
    }

    fn last_completed_file(&self) -> Option<String> {
        self.prefix
            .checked_sub(1)
            .map(|idx| self.order[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::VectorBackend;
    use crate::collections::CollectionMap;
    use crate::config::{IngestConfig, Priority, RepoType};
    use crate::parsers::ParserRegistry;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Deterministic embedder: unit vectors, optionally failing on chosen
    /// call indices (1-based).
    struct StubEmbedder {
        dimension: usize,
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl StubEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail_on: Vec::new(),
            }
        }

        fn failing_on(dimension: usize, fail_on: Vec<usize>) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                return Err(IngestError::EmbedTransient("HTTP 500: stub".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dimension]).collect())
        }
    }

    fn repo() -> RepoSpec {
        RepoSpec {
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
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    struct Harness {
        _dir: TempDir,
        files: Vec<SourceFile>,
        file_processor: FileProcessor,
        backend: Arc<MemoryBackend>,
        embedder: Arc<StubEmbedder>,
    }

    /// One single-function Rust file per entry, so chunks == files.
    async fn harness(file_count: usize, embedder: StubEmbedder) -> Harness {
        let dir = TempDir::new().unwrap();
        for i in 0..file_count {
            write(
                dir.path(),
                &format!("src/f{i:02}.rs"),
                &format!("pub fn handler_{i:02}() -> u32 {{ {i} }}\n"),
            );
        }
        let mut config = IngestConfig::new(CollectionMap::default_map());
        config.embedding.api_key = "test".into();
        config.embedding.dimension = 4;
        let file_processor =
            FileProcessor::new(config, ParserRegistry::with_builtins()).unwrap();
        let report = file_processor.scan(dir.path()).unwrap();
        let files = report.groups.into_iter().next().map(|g| g.files).unwrap_or_default();

        let backend = Arc::new(MemoryBackend::new());
        backend.ensure_collection("code_rust", 4).await.unwrap();
        backend.ensure_collection("backend", 4).await.unwrap();

        Harness {
            _dir: dir,
            files,
            file_processor,
            backend,
            embedder: Arc::new(embedder),
        }
    }

    fn processor(h: &Harness, batch_size: usize) -> BatchProcessor {
        let storage = Arc::new(StorageManager::new(
            h.backend.clone(),
            4,
            "stub-model".into(),
        ));
        BatchProcessor::new(
            h.embedder.clone(),
            storage,
            batch_size,
            2,
            Duration::from_secs(5),
        )
    }

    fn group_ctx(repo: &RepoSpec, cadence: CheckpointCadence) -> GroupContext<'_> {
        GroupContext {
            repo,
            language: Language::Rust,
            targets: vec!["code_rust".into(), "backend".into()],
            cadence,
            resume_after: None,
        }
    }

    #[tokio::test]
    async fn exact_batch_size_means_one_embed_call() {
        let h = harness(4, StubEmbedder::new(4)).await;
        let processor = processor(&h, 4);
        let repo = repo();
        let ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(10));
        let cancel = CancellationToken::new();
        let stats = processor
            .process_group(&h.files, &h.file_processor, &ctx, &cancel, &mut |_| {})
            .await;
        assert_eq!(stats.chunks_stored, 4);
        assert_eq!(h.embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn batch_size_plus_one_means_two_calls() {
        let h = harness(5, StubEmbedder::new(4)).await;
        let processor = processor(&h, 4);
        let repo = repo();
        let ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(10));
        let cancel = CancellationToken::new();
        let stats = processor
            .process_group(&h.files, &h.file_processor, &ctx, &cancel, &mut |_| {})
            .await;
        assert_eq!(stats.chunks_stored, 5);
        assert_eq!(h.embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn failed_batch_contributes_zero_and_records_one_error() {
        // batch_size 2, four chunks: batch 2 fails every attempt.
        let h = harness(4, StubEmbedder::failing_on(4, vec![2])).await;
        let processor = processor(&h, 2);
        let repo = repo();
        let ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(10));
        let cancel = CancellationToken::new();
        let stats = processor
            .process_group(&h.files, &h.file_processor, &ctx, &cancel, &mut |_| {})
            .await;
        assert_eq!(stats.chunks_stored, 2);
        assert_eq!(h.backend.points_in("code_rust"), 2);
        let batch_errors: Vec<_> = stats
            .errors
            .iter()
            .filter(|e| e.cause.contains("batch"))
            .collect();
        assert_eq!(batch_errors.len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_prefix_is_monotonic_and_respects_cadence() {
        let h = harness(10, StubEmbedder::new(4)).await;
        let processor = processor(&h, 3);
        let repo = repo();
        let ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(4));
        let cancel = CancellationToken::new();
        let mut seen: Vec<GroupProgress> = Vec::new();
        let stats = processor
            .process_group(&h.files, &h.file_processor, &ctx, &cancel, &mut |p| {
                seen.push(p)
            })
            .await;
        assert_eq!(stats.chunks_stored, 10);
        assert!(!seen.is_empty());
        let mut last = 0;
        for progress in &seen {
            assert!(progress.files_processed >= last, "prefix went backwards");
            last = progress.files_processed;
        }
        // Final checkpoint covers the whole group.
        assert_eq!(seen.last().unwrap().files_processed, 10);
        assert_eq!(seen.last().unwrap().last_processed_file, "src/f09.rs");
    }

    #[tokio::test]
    async fn resume_skips_files_at_or_before_the_marker() {
        let h = harness(6, StubEmbedder::new(4)).await;
        let processor = processor(&h, 2);
        let repo = repo();
        let mut ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(10));
        ctx.resume_after = Some("src/f02.rs".into());
        let cancel = CancellationToken::new();
        let stats = processor
            .process_group(&h.files, &h.file_processor, &ctx, &cancel, &mut |_| {})
            .await;
        // Files f03, f04, f05 remain.
        assert_eq!(stats.files_processed, 3);
        assert_eq!(stats.chunks_stored, 3);
    }

    #[tokio::test]
    async fn cancellation_stops_new_batches() {
        let h = harness(8, StubEmbedder::new(4)).await;
        let processor = processor(&h, 2);
        let repo = repo();
        let ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = processor
            .process_group(&h.files, &h.file_processor, &ctx, &cancel, &mut |_| {})
            .await;
        assert_eq!(stats.files_processed, 0);
        assert_eq!(stats.chunks_stored, 0);
        assert_eq!(h.embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn parse_errors_do_not_stop_the_group() {
        let h = harness(3, StubEmbedder::new(4)).await;
        write(h._dir.path(), "src/broken.rs", "fn broken( {\n");
        let report = h.file_processor.scan(h._dir.path()).unwrap();
        let files = report.groups.into_iter().next().unwrap().files;
        let processor = processor(&h, 2);
        let repo = repo();
        let ctx = group_ctx(&repo, CheckpointCadence::EveryFiles(10));
        let cancel = CancellationToken::new();
        let stats = processor
            .process_group(&files, &h.file_processor, &ctx, &cancel, &mut |_| {})
            .await;
        assert_eq!(stats.files_processed, 4);
        assert_eq!(stats.chunks_stored, 3);
        assert!(stats.errors.iter().any(|e| e.path == "src/broken.rs"));
    }
}
