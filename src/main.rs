use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jsonrag::commands;
use jsonrag::config::Config;

#[derive(Parser)]
#[command(name = "jsonrag")]
#[command(about = "Chunk JSON documents into a vector store and serve similarity search")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the embedded vector store
    #[arg(long, global = true, env = "JSONRAG_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and upload every JSON document in a folder
    Ingest {
        /// Folder to read; defaults to `ingest.input_dir`
        folder: Option<PathBuf>,
    },
    /// Ask one question against the collection
    Search {
        /// Question text; prompted for when omitted
        question: Option<String>,
        /// Number of results to return
        #[arg(long)]
        top_k: Option<NonZeroUsize>,
    },
    /// Start the HTTP search service
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_dir()?,
    };
    let config = Config::resolve(&config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))?;

    match cli.command {
        Commands::Ingest { folder } => {
            commands::ingest(&config, folder).await?;
        }
        Commands::Search { question, top_k } => {
            commands::search(&config, question, top_k.map(NonZeroUsize::get)).await?;
        }
        Commands::Serve { bind } => {
            commands::serve(&config, bind).await?;
        }
        Commands::Config => {
            commands::config(&config)?;
        }
    }

    Ok(())
}
