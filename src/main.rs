//! # docqa CLI
//!
//! Upload documents, index them in a vector store, and ask questions about
//! them, either through the HTTP server or directly from the command line.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Start the HTTP server |
//! | `docqa extract <file>` | Print the cleaned sentences of a document |
//! | `docqa ingest <file>` | Index a document and print its collection name |
//! | `docqa query "<text>" --collection <name>` | Ask a question against an existing collection |
//! | `docqa ask <file> "<question>"` | Index a document and ask one question about it |
//! | `docqa check` | Validate configuration and provider settings |
//!
//! Log verbosity follows `RUST_LOG` (default `docqa=info`); logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use docqa::config::{self, Config};
use docqa::ingest::{IngestMode, IngestOptions};
use docqa::models::Document;
use docqa::registry::DEFAULT_SESSION;
use docqa::server;
use docqa::service::RagService;

/// docqa: ask questions about your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults (in-memory store, local
/// hashed embeddings, extractive answers).
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Document question answering over a vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Extract, clean, and split a document; print one sentence per line.
    ///
    /// Nothing is stored.
    Extract {
        file: PathBuf,
    },

    /// Index a document into a fresh collection.
    ///
    /// Only useful with a persistent store (`[store] provider = "chroma"`);
    /// the in-memory store is discarded when the command exits.
    Ingest {
        file: PathBuf,

        /// Identifier used to name the collection (`doc_<file_id>_...`).
        #[arg(long)]
        file_id: Option<String>,
    },

    /// Ask a question against a named collection.
    Query {
        /// The question.
        text: String,

        /// Collection name printed by `docqa ingest`.
        #[arg(long)]
        collection: String,

        /// Also print the retrieved passages with their similarity.
        #[arg(long)]
        show_sources: bool,
    },

    /// Index a document and ask one question about it in a single run.
    Ask {
        file: PathBuf,
        question: String,

        #[arg(long)]
        show_sources: bool,
    },

    /// Validate configuration and construct every provider.
    Check,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docqa=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_document(path: &Path) -> Result<Document> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Document::new(filename, bytes))
}

fn print_answer(answer: &docqa::service::Answer, show_sources: bool) {
    println!("{}", answer.text);
    if show_sources {
        println!();
        println!("sources ({}):", answer.collection_id);
        for (i, source) in answer.sources.iter().enumerate() {
            let page = source
                .metadata
                .as_ref()
                .map(|m| m.page_number.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{}. [{:.3}] (page {}) {}",
                i + 1,
                source.similarity,
                page,
                source.text
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let cfg: Config = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Extract { file } => {
            let service = RagService::from_config(&cfg)?;
            let preview = service.preview(read_document(&file)?).await?;
            for sentence in &preview.sentences {
                println!("{}", sentence);
            }
            eprintln!("{} sentences", preview.sentence_count);
        }
        Commands::Ingest { file, file_id } => {
            let service = RagService::from_config(&cfg)?;
            let options = IngestOptions {
                file_id,
                ..IngestOptions::default()
            };
            let summary = service.ingest(read_document(&file)?, &options).await?;
            println!("collection: {}", summary.collection_id);
            println!("filename: {}", summary.filename);
            println!("pages: {}", summary.pages);
            println!("chunks: {}", summary.documents_processed);
        }
        Commands::Query {
            text,
            collection,
            show_sources,
        } => {
            let service = RagService::from_config(&cfg)?;
            let answer = service
                .query(&text, Some(&collection), DEFAULT_SESSION)
                .await?;
            print_answer(&answer, show_sources);
        }
        Commands::Ask {
            file,
            question,
            show_sources,
        } => {
            let service = RagService::from_config(&cfg)?;
            let options = IngestOptions {
                mode: IngestMode::Fresh,
                ..IngestOptions::default()
            };
            let summary = service.ingest(read_document(&file)?, &options).await?;
            eprintln!(
                "indexed {} chunks into {}",
                summary.documents_processed, summary.collection_id
            );
            let answer = service.query(&question, None, DEFAULT_SESSION).await?;
            print_answer(&answer, show_sources);
        }
        Commands::Check => {
            RagService::from_config(&cfg)?;
            println!("config: {}", cli.config.display());
            println!("store: {}", cfg.store.provider);
            println!("embedding: {}", cfg.embedding.provider);
            println!("generation: {}", cfg.generation.provider);
            println!(
                "chunking: window {} / overlap {}",
                cfg.chunking.window_size, cfg.chunking.window_overlap
            );
            println!("ok");
        }
    }

    Ok(())
}
