//! Durable ingestion checkpoints for crash recovery and resume.
//!
//! Exactly one checkpoint file exists at a time. It records the last fully
//! persisted position — `(repo_id, language, last_processed_file)` plus
//! counters and the set of completed repositories — so a restarted run can
//! skip everything already in the store. Saves are atomic: the record is
//! written to a temp file in the same directory, flushed, then renamed over
//! the target. The pipeline owns the only writer and serializes saves.
//!
//! A failed save is a warning, never an abort: losing a checkpoint costs
//! re-doing at most one cadence window of idempotent work.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Language;

/// The persisted progress record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    /// Repository currently being ingested.
    pub repo_id: String,
    /// Language group currently being ingested.
    pub language: Language,
    /// Relative path of the last fully persisted file; files sorting at or
    /// before this are skipped on resume.
    pub last_processed_file: String,
    /// Files fully persisted in the current (repo, language) group.
    pub files_processed: usize,
    /// Chunks stored so far in the current group.
    pub chunks_processed: usize,
    /// Repositories whose ingestion completed cleanly this run.
    #[serde(default)]
    pub completed_repos: Vec<String>,
    /// Wall-clock time of the save.
    pub timestamp: DateTime<Utc>,
}

/// Lightweight view for reporting, without cloning the whole record.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointInfo {
    pub repo_id: String,
    pub language: Language,
    pub files_processed: usize,
    pub chunks_processed: usize,
    pub completed_repos: usize,
    pub timestamp: DateTime<Utc>,
}

/// File-backed checkpoint store. At most one writer at any time.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Return the last persisted record, or `None` when no checkpoint
    /// exists or the file is unreadable (a stale or corrupt checkpoint is
    /// treated as absent, not fatal).
    pub fn load(&self) -> Option<CheckpointRecord> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "ignoring unreadable checkpoint");
                None
            }
        }
    }

    /// Atomically persist the record: temp file in the same directory,
    /// flush + fsync, rename over the target.
    pub fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .context("failed to create checkpoint temp file")?;
        let json = serde_json::to_string_pretty(record)?;
        tmp.write_all(json.as_bytes())
            .context("failed to write checkpoint")?;
        tmp.as_file().sync_all().context("failed to flush checkpoint")?;
        tmp.persist(&self.path)
            .map_err(|err| anyhow::anyhow!("failed to replace checkpoint file: {err}"))?;
        tracing::debug!(
            repo = %record.repo_id,
            language = %record.language,
            files = record.files_processed,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Remove the checkpoint file. Idempotent.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("failed to remove checkpoint file"),
        }
    }

    /// Lightweight read of counters for reporting.
    pub fn info(&self) -> Option<CheckpointInfo> {
        let record = self.load()?;
        Some(CheckpointInfo {
            repo_id: record.repo_id,
            language: record.language,
            files_processed: record.files_processed,
            chunks_processed: record.chunks_processed,
            completed_repos: record.completed_repos.len(),
            timestamp: record.timestamp,
        })
    }
}
