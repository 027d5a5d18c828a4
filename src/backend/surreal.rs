//! Local self-hosted backend over SurrealDB.
//!
//! Each collection maps to a SCHEMAFULL table holding a `vector` array and
//! a `payload` object, with an HNSW cosine index on the vector field.
//! Collection names are sanitized to valid table names (alphanumeric and
//! underscore; a leading digit gets a `tbl_` prefix).
//!
//! Configuration comes from `SURREALDB_URL`, `SURREALDB_NS`,
//! `SURREALDB_DB`, `SURREALDB_USER`, `SURREALDB_PASS`, all with local
//! development defaults.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::{connect, Any};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

use super::{CollectionStats, SearchFilter, SearchHit, VectorBackend, VectorPoint};

pub struct SurrealBackend {
    db: Surreal<Any>,
}

impl SurrealBackend {
    /// Connect and authenticate using the `SURREALDB_*` environment.
    pub async fn connect_from_env() -> Result<Self> {
        let url =
            std::env::var("SURREALDB_URL").unwrap_or_else(|_| "ws://127.0.0.1:8000".to_string());
        let namespace = std::env::var("SURREALDB_NS").unwrap_or_else(|_| "code_ingest".to_string());
        let database = std::env::var("SURREALDB_DB").unwrap_or_else(|_| "vectors".to_string());
        let username = std::env::var("SURREALDB_USER").unwrap_or_else(|_| "root".to_string());
        let password = std::env::var("SURREALDB_PASS").unwrap_or_else(|_| "root".to_string());

        let db = connect(&url)
            .await
            .with_context(|| format!("failed to connect to SurrealDB at {url}"))?;
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await
        .context("SurrealDB authentication failed")?;
        db.use_ns(&namespace)
            .use_db(&database)
            .await
            .context("failed to select SurrealDB namespace/database")?;
        tracing::info!(url = %url, ns = %namespace, db = %database, "connected to SurrealDB");
        Ok(Self { db })
    }
}

/// Sanitize a collection name into a valid table name.
fn table_name(collection: &str) -> String {
    let mut sanitized: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        sanitized = format!("tbl_{sanitized}");
    }
    sanitized
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    id: String,
    score: f32,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

#[async_trait]
impl VectorBackend for SurrealBackend {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let table = table_name(name);

        // Geometry check for pre-existing tables: the index definition
        // records the dimension it was built with. INFO FOR TABLE takes a
        // bare identifier, so the sanitized name is interpolated directly;
        // a failed introspection just means the table does not exist yet.
        let existing: Option<serde_json::Value> = match self
            .db
            .query(format!("INFO FOR TABLE {table};"))
            .await
            .and_then(|resp| resp.check())
        {
            Ok(mut resp) => resp.take(0).unwrap_or(None),
            Err(_) => None,
        };
        if let Some(indexes) = existing
            .as_ref()
            .and_then(|v| v.get("indexes"))
            .and_then(|v| v.as_object())
        {
            if let Some(definition) = indexes.get("vector_idx").and_then(|v| v.as_str()) {
                if !definition.contains(&format!("DIMENSION {dimension}")) {
                    bail!(
                        "table `{table}` has an HNSW index with a different dimension \
                         (wanted {dimension}): {definition}"
                    );
                }
                return Ok(());
            }
        }

        self.db
            .query(format!(
                "DEFINE TABLE IF NOT EXISTS {table} SCHEMAFULL;
                 DEFINE FIELD IF NOT EXISTS vector ON TABLE {table} TYPE array<float>;
                 DEFINE FIELD IF NOT EXISTS payload ON TABLE {table} FLEXIBLE TYPE object;
                 DEFINE INDEX IF NOT EXISTS vector_idx ON TABLE {table} \
                 FIELDS vector HNSW DIMENSION {dimension} DIST COSINE;"
            ))
            .await?
            .check()
            .with_context(|| format!("failed to define table `{table}`"))?;
        tracing::info!(table = %table, dimension, "collection table ready");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let table = table_name(collection);
        for point in points {
            self.db
                .query("UPSERT type::thing($tb, $id) CONTENT { vector: $vector, payload: $payload };")
                .bind(("tb", table.clone()))
                .bind(("id", point.id.to_string()))
                .bind(("vector", point.vector))
                .bind(("payload", point.payload))
                .await?
                .check()
                .with_context(|| format!("upsert into `{table}` failed"))?;
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
        let table = table_name(collection);

        let mut conditions =
            String::from("vector::similarity::cosine(vector, $query) >= $threshold");
        let filters: Vec<(String, String)> =
            filter.map(|f| f.must.clone()).unwrap_or_default();
        for (idx, _) in filters.iter().enumerate() {
            conditions.push_str(&format!(" AND payload[$fk{idx}] = $fv{idx}"));
        }

        let statement = format!(
            "SELECT meta::id(id) AS id, payload, \
             vector::similarity::cosine(vector, $query) AS score \
             FROM type::table($tb) WHERE {conditions} \
             ORDER BY score DESC LIMIT $limit;"
        );

        let mut request = self
            .db
            .query(statement)
            .bind(("tb", table))
            .bind(("query", query.to_vec()))
            .bind(("threshold", score_threshold))
            .bind(("limit", top_k as i64));
        for (idx, (key, value)) in filters.into_iter().enumerate() {
            request = request
                .bind((format!("fk{idx}"), key))
                .bind((format!("fv{idx}"), value));
        }

        let rows: Vec<SearchRow> = request.await?.check()?.take(0)?;
        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                id: row.id,
                score: row.score,
                payload: row.payload,
            })
            .collect())
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let table = table_name(name);
        let rows: Vec<CountRow> = self
            .db
            .query("SELECT count() AS count FROM type::table($tb) GROUP ALL;")
            .bind(("tb", table))
            .await?
            .check()?
            .take(0)?;
        let points_count = rows.first().map(|r| r.count).unwrap_or(0);
        Ok(CollectionStats {
            points_count,
            // SurrealDB indexes at write time.
            indexed: true,
            status: "ready".to_string(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut response = self.db.query("INFO FOR DB;").await?.check()?;
        let info: Option<serde_json::Value> = response.take(0)?;
        let mut names: Vec<String> = info
            .as_ref()
            .and_then(|v| v.get("tables"))
            .and_then(|v| v.as_object())
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(table_name("code_rust"), "code_rust");
        assert_eq!(table_name("acme-code-rust"), "acme_code_rust");
        assert_eq!(table_name("1st"), "tbl_1st");
        assert_eq!(table_name("a.b/c"), "a_b_c");
    }
}
