//! # ragbase CLI
//!
//! The `ragbase` binary drives the whole pipeline: knowledge base management,
//! file upload, indexing, retrieval, chat, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! ragbase --config ./config/ragbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbase init` | Create data directories and the vector index schema |
//! | `ragbase kb create\|list\|show\|delete` | Knowledge base lifecycle |
//! | `ragbase file upload\|list\|delete` | Manage stored files |
//! | `ragbase index <kb> [filename]` | Chunk, embed and store one file or all files |
//! | `ragbase retrieve <kb> "<query>"` | Print the top-K contexts as JSON |
//! | `ragbase chat <kb> "<query>"` | Print a grounded answer and its contexts as JSON |
//! | `ragbase reconcile [kb]` | Remove orphaned chunks and collections |
//! | `ragbase serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! ragbase kb create Docs
//! ragbase file upload Docs ./notes/a.txt
//! ragbase index Docs
//! ragbase retrieve Docs "What color is the sky?" --top-k 3
//! ragbase chat Docs "What color is the sky?" --history ./history.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use ragbase::config;
use ragbase::logging::init_logging;
use ragbase::server::run_server;
use ragbase::services::{init_storage, Services};
use ragbase_core::chunk::ChunkingConfig;
use ragbase_core::models::ChatMessage;

/// ragbase: document indexing, retrieval and retrieval-augmented chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Logs go to stderr; command output goes to stdout.
#[derive(Parser)]
#[command(
    name = "ragbase",
    about = "ragbase: document indexing, retrieval and retrieval-augmented chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directories and vector index schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Manage files stored in a knowledge base.
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Chunk, embed and store a knowledge base's files.
    ///
    /// Re-indexing a file replaces all of its previous chunks.
    Index {
        kb: String,
        /// Index only this file; all files when omitted.
        filename: Option<String>,
        /// Override `[chunking].chunk_size` for this run.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Override `[chunking].overlap` for this run.
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Print the most similar chunks for a query as JSON.
    Retrieve {
        kb: String,
        query: String,
        /// Number of contexts; defaults to `[retrieval].top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a query from a knowledge base and print the response as JSON.
    Chat {
        kb: String,
        query: String,
        /// JSON file holding prior turns: `[{"role": "user", "content": "..."}, ...]`.
        #[arg(long)]
        history: Option<PathBuf>,
        /// Number of contexts; defaults to `[generation].top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Remove chunks whose files are gone.
    ///
    /// With no knowledge base, reconciles every knowledge base and drops
    /// vector collections that have no knowledge base.
    Reconcile { kb: Option<String> },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum KbAction {
    Create { name: String },
    /// Print `name<TAB>doc_count` per knowledge base.
    List,
    Show { name: String },
    /// Delete a knowledge base with all of its files and chunks.
    Delete { name: String },
}

#[derive(Subcommand)]
enum FileAction {
    /// Upload a local file, overwriting any file of the same name.
    Upload {
        kb: String,
        path: PathBuf,
        /// Store under this filename instead of the local file's name.
        #[arg(long)]
        name: Option<String>,
    },
    List { kb: String },
    Delete { kb: String, filename: String },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging);

    if matches!(cli.command, Commands::Init) {
        init_storage(&cfg).await?;
        println!("Initialized data directory {}", cfg.storage.data_dir.display());
        return Ok(());
    }

    let services = Services::from_config(&cfg).await?;

    match cli.command {
        // Handled before services are built.
        Commands::Init => {}
        Commands::Kb { action } => match action {
            KbAction::Create { name } => {
                services.registry.create(&name).await?;
                println!("Created knowledge base {}", name);
            }
            KbAction::List => {
                for kb in services.registry.list().await? {
                    println!("{}\t{}", kb.name, kb.doc_count);
                }
            }
            KbAction::Show { name } => {
                print_json(&services.registry.get(&name).await?)?;
            }
            KbAction::Delete { name } => {
                let report = services.registry.delete(&name).await?;
                for warning in &report.warnings {
                    eprintln!("warning: {}", warning.message);
                }
                println!("Deleted knowledge base {}", name);
            }
        },
        Commands::File { action } => match action {
            FileAction::Upload { kb, path, name } => {
                let filename = match name {
                    Some(name) => name,
                    None => match path.file_name() {
                        Some(n) => n.to_string_lossy().into_owned(),
                        None => bail!("cannot derive a filename from {}", path.display()),
                    },
                };
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let report = services.registry.upload_file(&kb, &filename, &bytes).await?;
                let verb = if report.replaced { "Replaced" } else { "Uploaded" };
                println!(
                    "{} {} ({} bytes) in {}",
                    verb, filename, report.file.size_bytes, kb
                );
            }
            FileAction::List { kb } => {
                let listing = services.registry.list_files(&kb).await?;
                for entry in &listing.files {
                    let status = if entry.indexed { "indexed" } else { "not indexed" };
                    println!(
                        "{}\t{}\t{}",
                        entry.file.filename, entry.file.size_bytes, status
                    );
                }
                for orphan in &listing.orphaned_vectors {
                    println!("{}\t-\torphaned vectors", orphan);
                }
            }
            FileAction::Delete { kb, filename } => {
                let report = services.registry.delete_file(&kb, &filename).await?;
                for warning in &report.warnings {
                    eprintln!("warning: {}", warning.message);
                }
                println!(
                    "Deleted {} from {} ({} chunks removed)",
                    filename, kb, report.purged_chunks
                );
            }
        },
        Commands::Index {
            kb,
            filename,
            chunk_size,
            overlap,
        } => {
            let chunking = if chunk_size.is_some() || overlap.is_some() {
                let base = cfg.chunking.to_chunking();
                Some(ChunkingConfig::new(
                    chunk_size.unwrap_or(base.chunk_size),
                    overlap.unwrap_or(base.overlap),
                )?)
            } else {
                None
            };

            match filename {
                Some(filename) => {
                    let report = services
                        .indexer
                        .index_file(&kb, &filename, chunking.as_ref())
                        .await?;
                    println!("Indexed {}: {} chunks", report.filename, report.chunks);
                }
                None => {
                    let report = services.indexer.index_all(&kb, chunking.as_ref()).await?;
                    for r in &report.indexed {
                        println!("Indexed {}: {} chunks", r.filename, r.chunks);
                    }
                    for f in &report.failed {
                        eprintln!("Failed {}: {}", f.filename, f.message);
                    }
                    if !report.failed.is_empty() {
                        bail!("{} file(s) failed to index", report.failed.len());
                    }
                }
            }
        }
        Commands::Retrieve { kb, query, top_k } => {
            let contexts = services.retrieval.retrieve(&kb, &query, top_k).await?;
            print_json(&serde_json::json!({ "contexts": contexts }))?;
        }
        Commands::Chat {
            kb,
            query,
            history,
            top_k,
        } => {
            let history: Vec<ChatMessage> = match history {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    serde_json::from_str(&raw)
                        .with_context(|| format!("invalid chat history in {}", path.display()))?
                }
                None => Vec::new(),
            };
            let response = services.chat.chat(&kb, &query, &history, top_k).await?;
            print_json(&response)?;
        }
        Commands::Reconcile { kb } => {
            let names = match kb {
                Some(kb) => vec![kb],
                None => {
                    for name in services.registry.prune_orphan_collections().await? {
                        println!("Removed orphaned collection {}", name);
                    }
                    services
                        .registry
                        .list()
                        .await?
                        .into_iter()
                        .map(|kb| kb.name)
                        .collect()
                }
            };
            for name in names {
                let report = services.registry.reconcile(&name).await?;
                println!(
                    "{}: removed {} chunks from {} files",
                    name,
                    report.removed_chunks,
                    report.removed_filenames.len()
                );
            }
        }
        Commands::Serve => {
            run_server(Arc::new(services)).await?;
        }
    }

    Ok(())
}
