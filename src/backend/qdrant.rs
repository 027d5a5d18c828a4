//! Managed remote backend over Qdrant.
//!
//! Addressed by `QDRANT_URL` / `QDRANT_API_KEY`. Collections are created
//! with cosine distance; an existing collection with a different vector
//! dimension or distance is a hard error rather than a silent mismatch.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};

use super::{CollectionStats, SearchFilter, SearchHit, VectorBackend, VectorPoint};

pub struct QdrantBackend {
    client: Qdrant,
}

impl QdrantBackend {
    /// Connect using `QDRANT_URL` and `QDRANT_API_KEY`.
    pub fn connect_from_env(timeout_secs: u64) -> Result<Self> {
        let url = std::env::var("QDRANT_URL").context("QDRANT_URL not set")?;
        let api_key = std::env::var("QDRANT_API_KEY").context("QDRANT_API_KEY not set")?;
        let client = Qdrant::from_url(&url)
            .api_key(api_key)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build Qdrant client")?;
        tracing::info!(url = %url, "connected to Qdrant");
        Ok(Self { client })
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        if self.client.collection_exists(name).await? {
            // Validate the existing collection's geometry.
            let info = self.client.collection_info(name).await?;
            let params = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config);
            if let Some(VectorsConfigKind::Params(params)) = params {
                if params.size != dimension as u64 {
                    bail!(
                        "collection `{name}` exists with dimension {}, requested {dimension}",
                        params.size
                    );
                }
                if params.distance != Distance::Cosine as i32 {
                    bail!("collection `{name}` exists with a non-cosine distance");
                }
            }
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    dimension as u64,
                    Distance::Cosine,
                )),
            )
            .await
            .with_context(|| format!("failed to create collection `{name}`"))?;
        tracing::info!(collection = name, dimension, "created collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            let payload = Payload::try_from(point.payload)
                .context("chunk payload was not a JSON object")?;
            structs.push(PointStruct::new(
                point.id.to_string(),
                point.vector,
                payload,
            ));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, structs).wait(true))
            .await
            .with_context(|| format!("upsert to `{collection}` failed"))?;
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
        let mut builder = SearchPointsBuilder::new(collection, query.to_vec(), top_k as u64)
            .score_threshold(score_threshold)
            .with_payload(true);
        if let Some(filter) = filter {
            let conditions: Vec<Condition> = filter
                .must
                .iter()
                .map(|(field, value)| Condition::matches(field.clone(), value.clone()))
                .collect();
            builder = builder.filter(Filter::must(conditions));
        }

        let response = self.client.search_points(builder).await?;
        let hits = response
            .result
            .into_iter()
            .map(|point| SearchHit {
                id: point
                    .id
                    .and_then(|id| id.point_id_options)
                    .map(point_id_string)
                    .unwrap_or_default(),
                score: point.score,
                payload: payload_to_json(point.payload),
            })
            .collect();
        Ok(hits)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let info = self.client.collection_info(name).await?;
        let result = info
            .result
            .ok_or_else(|| anyhow::anyhow!("collection `{name}` not found"))?;
        Ok(CollectionStats {
            points_count: result.points_count.unwrap_or(0),
            indexed: result.indexed_vectors_count.unwrap_or(0) > 0,
            status: format!("{:?}", result.status()),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self.client.list_collections().await?;
        let mut names: Vec<String> = response
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

fn point_id_string(options: qdrant_client::qdrant::point_id::PointIdOptions) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match options {
        PointIdOptions::Uuid(uuid) => uuid,
        PointIdOptions::Num(num) => num.to_string(),
    }
}

fn payload_to_json(payload: HashMap<String, qdrant_client::qdrant::Value>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = payload
        .into_iter()
        .map(|(key, value)| (key, qdrant_value_to_json(value)))
        .collect();
    serde_json::Value::Object(map)
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => serde_json::Value::Array(
            list.values.into_iter().map(qdrant_value_to_json).collect(),
        ),
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(
            fields
                .fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}
