//! # semdex
//!
//! **A multi-language repository ingestion pipeline for semantic code search.**
//!
//! semdex walks a curated set of local repository checkouts, parses each
//! file into syntactically coherent chunks (functions, types, contracts,
//! documentation sections), embeds the chunks through an OpenAI-compatible
//! batch endpoint, and upserts content-addressed vectors into a pluggable
//! vector store. Progress is checkpointed so a crash or cancellation loses
//! at most a small bounded window of idempotent work.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ FileProcessor │──▶│ BatchProcessor│──▶│ StorageManager │
//! │ walk+dispatch │   │ embed (pool) │   │ validate+upsert│
//! └───────┬───────┘   └──────┬───────┘   └───────┬───────┘
//!         │ parsers           │ EmbeddingClient   │ VectorBackend
//!         ▼                   ▼                   ▼
//!   tree-sitter / YAML   POST /embeddings    Qdrant | SurrealDB
//! ```
//!
//! ## Data flow
//!
//! 1. The **pipeline** ([`pipeline::Pipeline`]) iterates repositories
//!    sequentially and owns the [`checkpoint`] store.
//! 2. The **file processor** ([`files`]) walks each tree, filters and
//!    groups files by language in a fixed order, and dispatches each file
//!    to its [`parsers`] implementation.
//! 3. Parsed [`chunk::Chunk`]s carry provenance, a business-domain tag,
//!    a complexity score, and a SHA-256 identity hash; the hash derives
//!    the vector point UUID, so re-ingestion overwrites in place.
//! 4. The **batch processor** ([`batch`]) forms fixed-size batches and
//!    embeds them on a bounded worker pool ([`embedding`]); a failed batch
//!    stores nothing and the run continues.
//! 5. The **storage manager** ([`storage`]) validates vectors and upserts
//!    points into every target collection ([`collections`]) of the
//!    selected [`backend`].
//!
//! ## Chunk identity
//!
//! | Derivation | Value |
//! |------------|-------|
//! | `chunk_hash` | SHA-256 of `language \| file_path \| item_type \| item_name \| content` |
//! | point id | UUIDv5 (URL namespace) of `chunk_hash` |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Resolved immutable configuration and static enumerations |
//! | [`repos`] | `repositories.yaml` loading and validation |
//! | [`collections`] | Collection naming and multi-collection assignment |
//! | [`chunk`] | Chunk model, hashing, complexity, domain classification |
//! | [`parsers`] | Per-language structural parsers and the registry |
//! | [`files`] | Repository walking, filtering, language dispatch |
//! | [`embedding`] | Rate-limited embedding client with retry/backoff |
//! | [`backend`] | Vector store trait with Qdrant, SurrealDB, memory impls |
//! | [`storage`] | Point construction, validation, batched upserts |
//! | [`batch`] | Bounded-concurrency batch driver with checkpoint tracking |
//! | [`pipeline`] | Orchestrator: repositories, resume, statistics |
//! | [`checkpoint`] | Atomic durable progress records |
//! | [`search`] | Query-time search across language collections |
//! | [`stats`] | Run statistics and the end-of-run summary |
//! | [`error`] | Failure taxonomy: what retries, what skips, what aborts |

pub mod backend;
pub mod batch;
pub mod checkpoint;
pub mod chunk;
pub mod collections;
pub mod config;
pub mod embedding;
pub mod error;
pub mod files;
pub mod parsers;
pub mod pipeline;
pub mod repos;
pub mod search;
pub mod stats;
pub mod storage;
