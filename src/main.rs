//! # Luminary CLI (`luminary`)
//!
//! Operator interface to the document index: ingest files, ask questions
//! of one document or the whole corpus, compare documents, and maintain
//! the index.
//!
//! ## Usage
//!
//! ```bash
//! luminary --config ./config/luminary.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `luminary init` | Create the index and catalog databases |
//! | `luminary add <path>` | Ingest one file |
//! | `luminary ingest <dir>` | Ingest every matching file under a directory |
//! | `luminary query <id> "<question>"` | Rank one document's chunks |
//! | `luminary search "<question>"` | Rank chunks across the corpus |
//! | `luminary compare <a> <b>` | Similarity and unique passages of two documents |
//! | `luminary delete <id>` | Remove a document |
//! | `luminary list` / `get <id>` | Inspect the catalog |
//! | `luminary stats` | Corpus counts and index health |
//! | `luminary rebuild` | Re-embed every document from retained text |
//! | `luminary reset --yes` | Remove everything |
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); results go to stdout.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use luminary_index::config::{self, Config};
use luminary_index::coordinator::RetrievalCoordinator;
use luminary_index::{get, ingest, search, stats};

/// Luminary: document indexing and retrieval for legal documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, databases are kept under `./data`.
#[derive(Parser)]
#[command(
    name = "luminary",
    about = "Luminary: document indexing and retrieval for legal documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/luminary.toml`. If the file does not exist,
    /// built-in defaults are used with storage under `./data`.
    #[arg(long, global = true, default_value = "./config/luminary.toml")]
    config: PathBuf,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and catalog databases.
    ///
    /// Idempotent; running it on an existing setup only verifies it.
    Init,

    /// Ingest a single file.
    Add {
        path: PathBuf,

        /// Document id. Defaults to the file name.
        #[arg(long)]
        id: Option<String>,

        /// Declared content type (MIME or extension). Defaults to the file extension.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Ingest every matching file under a directory.
    ///
    /// Document ids are paths relative to the directory. Filters come from
    /// the `[ingest]` config section. Failures are reported per file.
    Ingest { dir: PathBuf },

    /// Ask a question of one document.
    Query {
        id: String,
        question: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Search the whole corpus.
    Search {
        question: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Group hits by document (best chunk score per document).
        #[arg(long)]
        group: bool,
    },

    /// Compare two documents.
    Compare { a: String, b: String },

    /// Delete a document and its index entries.
    Delete { id: String },

    /// Show corpus statistics and index health.
    Stats,

    /// List cataloged documents.
    List,

    /// Show a document's record and retained text.
    Get { id: String },

    /// Rebuild the index from the catalog's retained text.
    ///
    /// Use after the index was recovered from corruption or after changing
    /// the embedding model.
    Rebuild,

    /// Remove every document from the index and the catalog.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(
            "config {} not found, using defaults under ./data",
            path.display()
        );
        Ok(Config::minimal(Path::new("./data")))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load(&cli.config)?;
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            let coordinator = RetrievalCoordinator::open(&cfg).await?;
            coordinator.close().await;
            println!(
                "Initialized index at {} and catalog at {}.",
                cfg.storage.index_path.display(),
                cfg.storage.catalog_path.display()
            );
        }
        Commands::Add {
            path,
            id,
            content_type,
        } => {
            ingest::run_add(&cfg, &path, id, content_type, json).await?;
        }
        Commands::Ingest { dir } => {
            ingest::run_ingest_dir(&cfg, &dir, json).await?;
        }
        Commands::Query {
            id,
            question,
            top_k,
        } => {
            search::run_query(&cfg, &id, &question, top_k, json).await?;
        }
        Commands::Search {
            question,
            top_k,
            group,
        } => {
            search::run_search(&cfg, &question, top_k, group, json).await?;
        }
        Commands::Compare { a, b } => {
            search::run_compare(&cfg, &a, &b, json).await?;
        }
        Commands::Delete { id } => {
            ingest::run_delete(&cfg, &id, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::List => {
            get::run_list(&cfg, json).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Rebuild => {
            ingest::run_rebuild(&cfg, json).await?;
        }
        Commands::Reset { yes } => {
            ingest::run_reset(&cfg, yes).await?;
        }
    }

    Ok(())
}
