//! Bounded-concurrency client for the batch embedding endpoint.
//!
//! Speaks the OpenAI-compatible shape: `POST {base_url}/embeddings` with
//! `{"input": [...], "model": ...}` and a bearer token, answering
//! `{"data": [{"embedding": [...], "index": n}, ...]}`. Entries are
//! re-sorted by `index` defensively, and a response whose length differs
//! from the input length is always a failure — the client never silently
//! returns fewer (or more) vectors than it was asked for.
//!
//! Retry policy: 429, 5xx, timeouts and connection errors back off
//! exponentially (1s base, doubling, capped at 30s, ±20% jitter) up to the
//! configured retry budget; any other 4xx is fatal immediately. A
//! process-wide semaphore caps in-flight requests at `rate_limit`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::IngestError;

/// Embedding capability as seen by the batch processor: a batch of texts
/// in, one vector per text out, or a classified failure.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;

    /// Surface auth/connectivity problems before bulk work. Default: no-op.
    async fn warmup(&self) -> Result<(), IngestError> {
        Ok(())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        EmbeddingClient::embed(self, texts).await
    }

    async fn warmup(&self) -> Result<(), IngestError> {
        EmbeddingClient::warmup(self).await
    }
}

/// Shared, cloneable embedding client. All clones share one rate-limit
/// semaphore.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    batch_cap: usize,
    max_retries: usize,
    timeout: Duration,
    warmup_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl EmbeddingClient {
    /// Cheap constructor: builds the HTTP client, performs no network I/O.
    pub fn new(
        config: &EmbeddingConfig,
        batch_cap: usize,
        max_retries: usize,
        rate_limit: usize,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            batch_cap,
            max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            warmup_timeout: Duration::from_secs(config.warmup_timeout_secs),
            semaphore: Arc::new(Semaphore::new(rate_limit.max(1))),
        })
    }

    /// One minimal call to surface auth/connectivity problems before bulk
    /// work begins.
    pub async fn warmup(&self) -> Result<(), IngestError> {
        let probe = vec!["embedding warmup probe".to_string()];
        self.embed_with_timeout(&probe, self.warmup_timeout).await?;
        tracing::info!(model = %self.model, "embedding service ready");
        Ok(())
    }

    /// Embed a batch of texts, returning exactly `texts.len()` vectors in
    /// input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        self.embed_with_timeout(texts, self.timeout).await
    }

    async fn embed_with_timeout(
        &self,
        texts: &[String],
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Err(IngestError::EmbedFatal("empty batch".into()));
        }
        if texts.len() > self.batch_cap {
            return Err(IngestError::EmbedFatal(format!(
                "batch of {} exceeds configured maximum {}",
                texts.len(),
                self.batch_cap
            )));
        }

        // Process-wide rate limit, held for the full call including retries.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestError::Cancelled)?;

        let body = serde_json::json!({
            "input": texts,
            "model": self.model,
        });

        let mut last_err: Option<IngestError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt, jitter_factor())).await;
                tracing::debug!(attempt, "retrying embedding request");
            }

            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .timeout(timeout)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: EmbeddingResponse =
                            response.json().await.map_err(|err| {
                                IngestError::EmbedFatal(format!("malformed response: {err}"))
                            })?;
                        return vectors_from_response(payload, texts.len());
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(IngestError::EmbedTransient(format!(
                            "HTTP {status}: {body_text}"
                        )));
                        continue;
                    }
                    return Err(IngestError::EmbedFatal(format!(
                        "HTTP {status}: {body_text}"
                    )));
                }
                Err(err) if err.is_timeout() || err.is_connect() || err.is_request() => {
                    last_err = Some(IngestError::EmbedTransient(err.to_string()));
                    continue;
                }
                Err(err) => {
                    return Err(IngestError::EmbedFatal(err.to_string()));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| IngestError::EmbedTransient("retries exhausted".into())))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Order entries by their declared index and enforce the one-vector-per-
/// input contract.
fn vectors_from_response(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    let mut entries = response.data;
    if entries.len() != expected {
        return Err(IngestError::EmbedTransient(format!(
            "embedding service returned {} vectors for {} inputs",
            entries.len(),
            expected
        )));
    }
    entries.sort_by_key(|e| e.index.unwrap_or(0));
    Ok(entries.into_iter().map(|e| e.embedding).collect())
}

/// Exponential backoff with multiplicative jitter: `1s · 2^(attempt-1)`,
/// capped at 30s, scaled by the jitter factor.
fn backoff_delay(attempt: usize, jitter: f64) -> Duration {
    let exponent = (attempt.saturating_sub(1)).min(5) as u32;
    let base = Duration::from_secs(1u64 << exponent).min(Duration::from_secs(30));
    base.mul_f64(jitter)
}

/// Uniform jitter in `[0.8, 1.2]`.
fn jitter_factor() -> f64 {
    rand::thread_rng().gen_range(0.8..=1.2)
}
