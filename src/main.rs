//! # semdex CLI
//!
//! Commands:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `semdex ingest` | Ingest all configured repositories into the vector store |
//! | `semdex search "<query>"` | Search indexed code across language collections |
//! | `semdex collections` | List collections with point counts |
//! | `semdex checkpoint` | Show the current checkpoint, if any |
//! | `semdex warmup` | Probe the embedding service and create collections |
//!
//! Configuration comes from `config/repositories.yaml` and
//! `config/collections.yaml` (paths overridable via flags or
//! `REPOSITORIES_CONFIG`), with credentials from the environment:
//! `EMBEDDING_API_KEY`, `VECTOR_BACKEND` (managed | local), and the
//! matching `QDRANT_*` / `SURREALDB_*` variables.
//!
//! Exit code is non-zero only for configuration and credential failures;
//! file- and batch-level problems are reported in the summary and never
//! abort the process.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use semdex::collections::CollectionMap;
use semdex::config::{IngestConfig, Language, Priority};
use semdex::pipeline::Pipeline;
use semdex::repos::{self, RepoSpec};
use semdex::search::{print_results, search_across_languages, DEFAULT_LANGUAGES};

#[derive(Parser)]
#[command(name = "semdex", version, about = "Repository ingestion for semantic code search")]
struct Cli {
    /// Path to repositories.yaml (default: config/repositories.yaml or
    /// $REPOSITORIES_CONFIG).
    #[arg(long, global = true)]
    repositories: Option<PathBuf>,

    /// Path to collections.yaml; built-in mapping when omitted.
    #[arg(long, global = true)]
    collections: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest configured repositories into the vector store.
    Ingest {
        /// Start fresh instead of resuming from the checkpoint.
        #[arg(long)]
        no_resume: bool,
        /// Only ingest repositories at or above this priority.
        #[arg(long)]
        priority: Option<String>,
    },
    /// Search indexed code.
    Search {
        query: String,
        /// Restrict to one language tag.
        #[arg(long)]
        language: Option<String>,
        /// Maximum hits per language.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List collections and their point counts.
    Collections,
    /// Show checkpoint status.
    Checkpoint,
    /// Probe the embedding service and create all collections.
    Warmup,
}

fn load_config(collections_path: Option<&PathBuf>) -> Result<IngestConfig> {
    let collections = match collections_path {
        Some(path) => CollectionMap::load(path)?,
        None => CollectionMap::default_map(),
    };
    Ok(IngestConfig::new(collections))
}

fn load_repos(
    repositories_path: Option<PathBuf>,
    config: &mut IngestConfig,
) -> Result<Vec<RepoSpec>> {
    let path = repos::resolve_config_path(repositories_path);
    let catalog = repos::load_catalog(&path)?;
    if let Some(base_dir) = catalog.repos_base_dir {
        config.repos_base_dir = base_dir;
    }
    Ok(catalog.repos)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "semdex=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.collections.as_ref())?;

    match cli.command {
        Command::Ingest { no_resume, priority } => {
            let mut repo_list = load_repos(cli.repositories, &mut config)?;
            if let Some(priority) = priority {
                let min = Priority::parse(&priority).ok_or_else(|| {
                    anyhow::anyhow!("invalid priority `{priority}` (high|medium|low)")
                })?;
                repo_list = repos::filter_by_priority(repo_list, min);
            }

            let pipeline = Pipeline::new(config).await?;
            let cancel = pipeline.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, finishing in-flight batches");
                    cancel.cancel();
                }
            });

            let stats = pipeline.ingest(&repo_list, !no_resume).await?;
            stats.print_summary();
        }
        Command::Search {
            query,
            language,
            limit,
        } => {
            let languages: Vec<Language> = match language {
                Some(tag) => vec![Language::parse(&tag)
                    .ok_or_else(|| anyhow::anyhow!("unknown language `{tag}`"))?],
                None => DEFAULT_LANGUAGES.to_vec(),
            };
            let pipeline = Pipeline::new(config).await?;
            let results = search_across_languages(
                pipeline.embedder().as_ref(),
                pipeline.backend().as_ref(),
                &pipeline.config().collections,
                &query,
                &languages,
                limit,
            )
            .await?;
            print_results(&results);
        }
        Command::Collections => {
            let pipeline = Pipeline::new(config).await?;
            let backend = pipeline.backend();
            let names = backend.list_collections().await?;
            if names.is_empty() {
                println!("No collections.");
            }
            for name in names {
                match backend.collection_stats(&name).await {
                    Ok(stats) => println!(
                        "{name:<28} {:>10} points  {}",
                        stats.points_count, stats.status
                    ),
                    Err(_) => println!("{name:<28}          ? points"),
                }
            }
        }
        Command::Checkpoint => {
            let store = semdex::checkpoint::CheckpointStore::new(config.checkpoint_path.clone());
            match store.info() {
                Some(info) => {
                    println!("Checkpoint at {}", store.path().display());
                    println!("  repository:       {}", info.repo_id);
                    println!("  language:         {}", info.language);
                    println!("  files processed:  {}", info.files_processed);
                    println!("  chunks processed: {}", info.chunks_processed);
                    println!("  completed repos:  {}", info.completed_repos);
                    println!("  saved at:         {}", info.timestamp);
                }
                None => println!("No checkpoint."),
            }
        }
        Command::Warmup => {
            let pipeline = Pipeline::new(config).await?;
            pipeline.warmup().await?;
            println!("Embedding service and collections ready.");
        }
    }

    Ok(())
}
