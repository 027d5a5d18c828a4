//! Vector store abstraction.
//!
//! The [`VectorBackend`] trait defines the capability surface the pipeline
//! needs from a vector database: idempotent collection creation, point
//! upsert, similarity search, and stats. Two production implementations
//! are provided — a remote managed store ([`qdrant`]) and a local
//! self-hosted one ([`surreal`]) — plus an in-memory brute-force backend
//! ([`memory`]) used by the integration tests.
//!
//! All backends use cosine distance over fixed-dimension `f32` vectors.
//! Point ids are content-derived UUIDs, so upserts are last-writer-wins
//! and re-ingestion overwrites in place.

pub mod memory;
pub mod qdrant;
pub mod surreal;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{BackendKind, IngestConfig};

/// A vector plus its payload, addressed by a deterministic UUID.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    /// Chunk metadata, stored verbatim. Always a JSON object.
    pub payload: serde_json::Value,
}

/// A search hit, ordered by descending score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Collection health summary.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub points_count: u64,
    pub indexed: bool,
    pub status: String,
}

/// Equality filters on payload fields, ANDed together.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub must: Vec<(String, String)>,
}

/// Capability interface for collection create / upsert / search.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Create the collection if missing; validate dimension and distance
    /// if present. Idempotent.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Insert-or-replace points keyed by id.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Top-k cosine similarity search, descending score, thresholded.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats>;

    async fn list_collections(&self) -> Result<Vec<String>>;
}

/// Construct the backend selected by `VECTOR_BACKEND`.
pub async fn create_backend(config: &IngestConfig) -> Result<Arc<dyn VectorBackend>> {
    match config.backend {
        BackendKind::Managed => {
            let backend = qdrant::QdrantBackend::connect_from_env(
                config.embedding.timeout_secs,
            )?;
            Ok(Arc::new(backend))
        }
        BackendKind::Local => {
            let backend = surreal::SurrealBackend::connect_from_env().await?;
            Ok(Arc::new(backend))
        }
    }
}
