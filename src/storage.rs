//! Storage manager: chunks + embeddings → validated points → collections.
//!
//! For each `(chunk, vector)` pair this builds a vector point whose id is
//! the chunk's deterministic UUID and whose payload is the chunk's fields
//! verbatim (content included — neither backend stores text as a
//! distinguished field), then upserts the points into every target
//! collection in backend-sized sub-batches.
//!
//! Validation happens here, per point: a vector with the wrong dimension
//! or any non-finite component is dropped with a recorded error while the
//! rest of the batch proceeds. A failed upsert is retried once; a second
//! failure records the batch as failed for that collection and the other
//! collections proceed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::backend::{VectorBackend, VectorPoint};
use crate::chunk::Chunk;
use crate::error::{ErrorRecord, IngestError};

/// Points per upsert request.
const UPSERT_BATCH: usize = 128;

/// Characters of content kept in the preview payload field.
const PREVIEW_CHARS: usize = 200;

/// Result of storing one batch.
#[derive(Debug, Default)]
pub struct StoreReport {
    /// Successfully stored points per collection.
    pub stored_by_collection: BTreeMap<String, usize>,
    /// Dropped points and failed upserts.
    pub errors: Vec<ErrorRecord>,
}

impl StoreReport {
    /// Points stored in one collection; run statistics count the primary
    /// (language) collection's figure as "chunks stored".
    pub fn stored_in(&self, collection: &str) -> usize {
        self.stored_by_collection
            .get(collection)
            .copied()
            .unwrap_or(0)
    }
}

pub struct StorageManager {
    backend: Arc<dyn VectorBackend>,
    dimension: usize,
    model: String,
}

impl StorageManager {
    pub fn new(backend: Arc<dyn VectorBackend>, dimension: usize, model: String) -> Self {
        Self {
            backend,
            dimension,
            model,
        }
    }

    /// Idempotently create every configured collection. Part of warm-up;
    /// a failure here is fatal for the run before any work starts.
    pub async fn setup_collections(&self, names: &[String]) -> anyhow::Result<()> {
        for name in names {
            self.backend.ensure_collection(name, self.dimension).await?;
        }
        tracing::info!(count = names.len(), "collections ready");
        Ok(())
    }

    /// Build, validate, and upsert points for one embedded batch.
    ///
    /// `chunks` and `vectors` must pair positionally; a length mismatch
    /// stores nothing (the caller should have failed the batch upstream).
    pub async fn store_batch(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        targets: &[String],
    ) -> StoreReport {
        let mut report = StoreReport::default();

        if chunks.len() != vectors.len() {
            report.errors.push(ErrorRecord::new(
                chunks
                    .first()
                    .map(|c| c.file_path.clone())
                    .unwrap_or_default(),
                format!(
                    "chunk/vector count mismatch: {} chunks vs {} vectors",
                    chunks.len(),
                    vectors.len()
                ),
            ));
            return report;
        }
        if targets.is_empty() {
            report.errors.push(ErrorRecord::new(
                String::new(),
                "no target collections configured".to_string(),
            ));
            return report;
        }

        let indexed_at = Utc::now().to_rfc3339();
        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            match self.validate_vector(vector) {
                Ok(()) => points.push(VectorPoint {
                    id: chunk.point_id(),
                    vector: vector.clone(),
                    payload: self.payload_for(chunk, &indexed_at),
                }),
                Err(reason) => {
                    tracing::warn!(
                        chunk = %chunk.item_name,
                        file = %chunk.file_path,
                        %reason,
                        "dropping invalid vector"
                    );
                    report.errors.push(ErrorRecord::from(&IngestError::VectorInvalid {
                        chunk: format!("{}:{}", chunk.file_path, chunk.item_name),
                        reason,
                    }));
                }
            }
        }

        if points.is_empty() {
            return report;
        }

        for collection in targets {
            let mut stored = 0usize;
            for window in points.chunks(UPSERT_BATCH) {
                match self.upsert_with_retry(collection, window).await {
                    Ok(()) => stored += window.len(),
                    Err(err) => {
                        report.errors.push(ErrorRecord::from(&IngestError::UpsertFailed {
                            collection: collection.clone(),
                            message: err.to_string(),
                        }));
                    }
                }
            }
            report
                .stored_by_collection
                .insert(collection.clone(), stored);
        }

        report
    }

    /// One retry, matching the upsert policy of the failure taxonomy.
    async fn upsert_with_retry(
        &self,
        collection: &str,
        points: &[VectorPoint],
    ) -> anyhow::Result<()> {
        match self.backend.upsert(collection, points.to_vec()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(collection, error = %first, "upsert failed, retrying once");
                self.backend.upsert(collection, points.to_vec()).await
            }
        }
    }

    fn validate_vector(&self, vector: &[f32]) -> Result<(), String> {
        if vector.len() != self.dimension {
            return Err(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            ));
        }
        if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
            return Err(format!("non-finite component at index {position}"));
        }
        Ok(())
    }

    /// The chunk's fields verbatim, plus embedding provenance.
    fn payload_for(&self, chunk: &Chunk, indexed_at: &str) -> serde_json::Value {
        let mut payload = serde_json::to_value(chunk)
            .unwrap_or_else(|_| serde_json::json!({}));
        if let Some(object) = payload.as_object_mut() {
            let preview: String = chunk.content.chars().take(PREVIEW_CHARS).collect();
            object.insert("content_preview".into(), serde_json::Value::String(preview));
            object.insert(
                "embedding_model".into(),
                serde_json::Value::String(self.model.clone()),
            );
            object.insert(
                "embedding_dimensions".into(),
                serde_json::Value::Number(self.dimension.into()),
            );
            object.insert(
                "indexed_at".into(),
                serde_json::Value::String(indexed_at.to_string()),
            );
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::config::Language;

    fn chunk(name: &str) -> Chunk {
        let mut chunk = Chunk {
            content: format!("pub fn {name}() {{}}"),
            language: Language::Rust,
            item_type: "function".into(),
            item_name: name.into(),
            file_path: "src/lib.rs".into(),
            start_line: 1,
            end_line: 1,
            repo_id: "svc".into(),
            repo_component: "core".into(),
            business_domain: "unknown".into(),
            complexity_score: 0.1,
            chunk_hash: String::new(),
            metadata: Default::default(),
        };
        chunk.seal();
        chunk
    }

    async fn manager_with_memory(dim: usize) -> (StorageManager, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.ensure_collection("code_rust", dim).await.unwrap();
        backend.ensure_collection("backend", dim).await.unwrap();
        let manager = StorageManager::new(backend.clone(), dim, "test-model".into());
        (manager, backend)
    }

    #[tokio::test]
    async fn stores_into_every_target_collection() {
        let (manager, backend) = manager_with_memory(3).await;
        let chunks = vec![chunk("a"), chunk("b")];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let targets = vec!["code_rust".to_string(), "backend".to_string()];
        let report = manager.store_batch(&chunks, &vectors, &targets).await;
        assert!(report.errors.is_empty());
        assert_eq!(report.stored_by_collection["code_rust"], 2);
        assert_eq!(report.stored_by_collection["backend"], 2);
        assert_eq!(backend.points_in("code_rust"), 2);
    }

    #[tokio::test]
    async fn nan_point_is_dropped_others_stored() {
        let (manager, backend) = manager_with_memory(3).await;
        let chunks = vec![chunk("good"), chunk("bad"), chunk("fine")];
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, f32::NAN, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let targets = vec!["code_rust".to_string()];
        let report = manager.store_batch(&chunks, &vectors, &targets).await;
        assert_eq!(report.stored_by_collection["code_rust"], 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].cause.contains("non-finite"));
        assert_eq!(backend.points_in("code_rust"), 2);
    }

    #[tokio::test]
    async fn wrong_dimension_is_dropped_with_error() {
        let (manager, _backend) = manager_with_memory(3).await;
        let chunks = vec![chunk("short")];
        let vectors = vec![vec![1.0, 0.0]];
        let report = manager
            .store_batch(&chunks, &vectors, &["code_rust".to_string()])
            .await;
        assert_eq!(report.stored_by_collection["code_rust"], 0);
        assert!(report.errors[0].cause.contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn length_mismatch_stores_nothing() {
        let (manager, backend) = manager_with_memory(3).await;
        let chunks = vec![chunk("a"), chunk("b")];
        let vectors = vec![vec![1.0, 0.0, 0.0]];
        let report = manager
            .store_batch(&chunks, &vectors, &["code_rust".to_string()])
            .await;
        assert!(report.stored_by_collection.is_empty());
        assert_eq!(backend.total_points(), 0);
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn restore_of_same_chunk_overwrites_in_place() {
        let (manager, backend) = manager_with_memory(3).await;
        let chunks = vec![chunk("same")];
        let vectors = vec![vec![1.0, 0.0, 0.0]];
        let targets = vec!["code_rust".to_string()];
        manager.store_batch(&chunks, &vectors, &targets).await;
        manager.store_batch(&chunks, &vectors, &targets).await;
        assert_eq!(backend.points_in("code_rust"), 1);
    }

    #[tokio::test]
    async fn payload_carries_chunk_fields_and_provenance() {
        let (manager, backend) = manager_with_memory(3).await;
        let chunks = vec![chunk("inspect")];
        let vectors = vec![vec![1.0, 0.0, 0.0]];
        manager
            .store_batch(&chunks, &vectors, &["code_rust".to_string()])
            .await;
        let hits = backend
            .search("code_rust", &[1.0, 0.0, 0.0], 1, 0.0, None)
            .await
            .unwrap();
        let payload = &hits[0].payload;
        assert_eq!(payload["item_name"], "inspect");
        assert_eq!(payload["language"], "rust");
        assert_eq!(payload["embedding_model"], "test-model");
        assert_eq!(payload["embedding_dimensions"], 3);
        assert!(payload["content"].as_str().unwrap().contains("inspect"));
    }
}
