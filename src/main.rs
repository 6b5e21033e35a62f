//! # PDF RAG CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag ingest` | Rebuild the vector index from the corpus directory |
//! | `rag query "<text>"` | Print the nearest chunks for a query |
//! | `rag chat "<question>"` | Answer a question from the indexed documents |
//! | `rag list` | List the documents in the corpus |
//! | `rag watch` | Rebuild whenever the corpus changes |
//! | `rag serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pdf_rag::config;
use pdf_rag::context::RagContext;
use pdf_rag::server;
use pdf_rag::source::DocumentSource;

/// Retrieval-augmented question answering over a directory of PDFs.
#[derive(Parser)]
#[command(name = "rag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from every document in the corpus.
    Ingest,

    /// Retrieve the chunks most similar to a query.
    Query {
        text: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question grounded in the indexed documents.
    Chat {
        question: String,

        /// Override the generation model.
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List documents currently in the corpus.
    List,

    /// Watch the corpus and rebuild on change until Ctrl-C.
    Watch {
        /// Skip the initial rebuild on startup.
        #[arg(long)]
        no_initial: bool,
    },

    /// Start the HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let top_k_default = cfg.retrieval.top_k;

    match cli.command {
        Commands::Ingest => {
            let ctx = RagContext::init(cfg)?;
            let report = ctx.coordinator.run().await;
            print_report(&report);
            ctx.shutdown().await;
            if !report.success {
                std::process::exit(1);
            }
        }
        Commands::Query { text, top_k } => {
            let ctx = RagContext::init(cfg)?;
            let results = ctx.engine.query(&text, top_k.unwrap_or(top_k_default)).await;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} (page {})",
                    i + 1,
                    r.score,
                    r.document_id,
                    r.page
                );
                println!("   {}", snippet(&r.text, 200));
            }
        }
        Commands::Chat {
            question,
            model,
            top_k,
        } => {
            let ctx = RagContext::init(cfg)?;
            let response = ctx
                .chat
                .answer(&question, top_k.unwrap_or(top_k_default), model.as_deref())
                .await;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for s in &response.sources {
                    println!("  - {} (page {}, score {:.4})", s.document_id, s.page, s.score);
                }
            }
        }
        Commands::List => {
            let ctx = RagContext::init(cfg)?;
            let pdfs = ctx.source.list()?;
            println!("{} document(s) in {}", pdfs.len(), ctx.source.root().display());
            for pdf in pdfs {
                println!("  {}", pdf);
            }
        }
        Commands::Watch { no_initial } => {
            let mut ctx = RagContext::init(cfg)?;
            ctx.start_watcher()?;
            if !no_initial {
                ctx.scheduler.request();
            }
            println!(
                "Watching {} for changes (Ctrl-C to stop)",
                ctx.source.root().display()
            );
            tokio::signal::ctrl_c().await?;
            ctx.shutdown().await;
        }
        Commands::Serve => {
            let mut ctx = RagContext::init(cfg)?;
            if ctx.config.watcher.enabled {
                ctx.start_watcher()?;
                ctx.scheduler.request();
            }
            server::run_server(&ctx).await?;
            ctx.shutdown().await;
        }
    }

    Ok(())
}

fn print_report(report: &pdf_rag::models::IngestionReport) {
    println!("{}", report.message);
    println!("  loaded: {}", report.loaded.len());
    for id in &report.loaded {
        println!("    {}", id);
    }
    if !report.failed.is_empty() {
        println!("  failed: {}", report.failed.len());
        for id in &report.failed {
            println!("    {}", id);
        }
    }
    println!("  chunks: {}", report.chunks);
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
