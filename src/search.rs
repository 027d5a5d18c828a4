//! Query-time search across language collections.
//!
//! Embeds the query once, then searches each requested language's
//! collection, returning per-language hits ordered by descending score.
//! Thresholded at 0.3 — semantic similarity for code typically peaks well
//! below 1.0, so a high cutoff would hide useful matches.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::backend::{SearchHit, VectorBackend};
use crate::collections::CollectionMap;
use crate::config::Language;
use crate::embedding::Embedder;

/// Minimum similarity score for a hit to be returned.
pub const SCORE_THRESHOLD: f32 = 0.3;

/// Languages searched when the caller does not narrow the set.
pub const DEFAULT_LANGUAGES: [Language; 4] = [
    Language::Rust,
    Language::TypeScript,
    Language::Solidity,
    Language::Documentation,
];

/// Search one or more language collections for a natural-language query.
pub async fn search_across_languages(
    embedder: &dyn Embedder,
    backend: &dyn VectorBackend,
    collections: &CollectionMap,
    query: &str,
    languages: &[Language],
    limit: usize,
) -> Result<BTreeMap<Language, Vec<SearchHit>>> {
    let query_vectors = embedder.embed(&[query.to_string()]).await?;
    let query_vector = query_vectors
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

    let mut results = BTreeMap::new();
    let mut searched = Vec::new();
    for &language in languages {
        let Some(collection) = collections.language_collection(language) else {
            continue;
        };
        // TypeScript-family tags share one collection; search it once.
        if searched.contains(&collection) {
            continue;
        }
        searched.push(collection.clone());

        let hits = backend
            .search(&collection, query_vector, limit, SCORE_THRESHOLD, None)
            .await?;
        if !hits.is_empty() {
            tracing::info!(language = %language, hits = hits.len(), "search results");
            results.insert(language, hits);
        }
    }
    Ok(results)
}

/// Render results for the CLI.
pub fn print_results(results: &BTreeMap<Language, Vec<SearchHit>>) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (language, hits) in results {
        println!("{language} ({} hits)", hits.len());
        for hit in hits {
            let file = hit
                .payload
                .get("file_path")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let name = hit
                .payload
                .get("item_name")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let lines = match (
                hit.payload.get("start_line").and_then(|v| v.as_u64()),
                hit.payload.get("end_line").and_then(|v| v.as_u64()),
            ) {
                (Some(start), Some(end)) => format!("{start}-{end}"),
                _ => String::new(),
            };
            println!("  {:.3}  {file}:{lines}  {name}", hit.score);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::VectorPoint;
    use crate::error::IngestError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use uuid::Uuid;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[tokio::test]
    async fn searches_only_requested_languages_and_dedups_collections() {
        let backend = Arc::new(MemoryBackend::new());
        let collections = CollectionMap::default_map();
        backend.ensure_collection("code_rust", 2).await.unwrap();
        backend.ensure_collection("code_typescript", 2).await.unwrap();
        backend
            .upsert(
                "code_rust",
                vec![VectorPoint {
                    id: Uuid::new_v4(),
                    vector: vec![1.0, 0.0],
                    payload: serde_json::json!({
                        "file_path": "src/auth.rs",
                        "item_name": "verify",
                        "start_line": 1,
                        "end_line": 3,
                    }),
                }],
            )
            .await
            .unwrap();

        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let results = search_across_languages(
            &embedder,
            backend.as_ref(),
            &collections,
            "token verification",
            &[
                Language::Rust,
                Language::TypeScript,
                Language::Tsx,
                Language::JavaScript,
            ],
            5,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        let hits = &results[&Language::Rust];
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.9);
    }
}
