//! In-memory [`VectorBackend`] for tests.
//!
//! Brute-force cosine similarity over `HashMap`s behind an `RwLock`.
//! Mirrors the production contract closely enough to exercise the full
//! pipeline without a running vector store: dimension validation on
//! ensure, last-writer-wins upserts, thresholded descending-score search.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::{CollectionStats, SearchFilter, SearchHit, VectorBackend, VectorPoint};

#[derive(Default)]
struct Collection {
    dimension: usize,
    points: HashMap<Uuid, (Vec<f32>, serde_json::Value)>,
}

/// Test backend; also handy for dry runs.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point count across all collections (test helper).
    pub fn total_points(&self) -> usize {
        self.collections
            .read()
            .unwrap()
            .values()
            .map(|c| c.points.len())
            .sum()
    }

    /// Point count in one collection (test helper).
    pub fn points_in(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

fn matches_filter(payload: &serde_json::Value, filter: Option<&SearchFilter>) -> bool {
    let Some(filter) = filter else { return true };
    filter.must.iter().all(|(key, value)| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|v| v == value)
            .unwrap_or(false)
    })
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => {
                bail!(
                    "collection `{name}` exists with dimension {}, requested {dimension}",
                    existing.dimension
                );
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dimension,
                        points: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection `{collection}`"))?;
        for point in points {
            target.points.insert(point.id, (point.vector, point.payload));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read().unwrap();
        let target = collections
            .get(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection `{collection}`"))?;
        let mut hits: Vec<SearchHit> = target
            .points
            .iter()
            .filter(|(_, (_, payload))| matches_filter(payload, filter))
            .map(|(id, (vector, payload))| SearchHit {
                id: id.to_string(),
                score: cosine(query, vector),
                payload: payload.clone(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let collections = self.collections.read().unwrap();
        let target = collections
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown collection `{name}`"))?;
        Ok(CollectionStats {
            points_count: target.points.len() as u64,
            indexed: true,
            status: "green".to_string(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
