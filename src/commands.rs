use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, show_config};
use crate::database::{VectorStore, open_store};
use crate::embeddings::Embedder;
use crate::embeddings::openai::OpenAiClient;
use crate::indexer::Indexer;
use crate::query::QueryService;
use crate::server::{self, AppState};

/// Adapters built once from the configuration and shared by every command
struct Services {
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
}

impl Services {
    async fn connect(config: &Config) -> Result<Self> {
        config
            .require_credentials()
            .context("Missing credentials; set them in the environment")?;

        let client = OpenAiClient::new(&config.embedding)
            .context("Failed to configure the embedding client")?;
        info!(
            "Embedding with {} via {}",
            config.embedding.model,
            client.endpoint()
        );
        let embedder = Embedder::new(Arc::new(client), config.embedding.batch_size);

        let store = open_store(config)
            .await
            .context("Failed to open the vector store")?;

        Ok(Self { embedder, store })
    }

    fn query_service(self, config: &Config) -> QueryService {
        QueryService::new(self.embedder, self.store, config.store.collection.clone())
    }
}

/// Chunk, embed and upload every JSON document in `folder`
#[inline]
pub async fn ingest(config: &Config, folder: Option<PathBuf>) -> Result<()> {
    let folder = folder.unwrap_or_else(|| config.ingest.input_dir.clone());
    let services = Services::connect(config).await?;

    let indexer = Indexer::new(
        services.embedder,
        services.store,
        config.collection_spec(),
        config.chunking,
        config.ingest.clone(),
    );

    let report = indexer
        .run(&folder)
        .await
        .with_context(|| format!("Ingestion of {} failed", folder.display()))?;

    println!(
        "{} Ingested {} into collection {}",
        style("✅").green(),
        style(folder.display()).cyan(),
        style(&config.store.collection).cyan()
    );
    println!("   Files:    {}", report.files);
    println!("   Chunks:   {}", report.chunks);
    println!("   Embedded: {}", report.embedded);
    println!(
        "   Upserted: {} in {} batches",
        report.upserted, report.batches
    );

    Ok(())
}

fn prompt_question() -> Result<String> {
    let question: String = Input::new()
        .with_prompt("Question")
        .interact_text()
        .context("Failed to read the question")?;
    Ok(question)
}

/// Run one query and print the ranked hits
#[inline]
pub async fn search(config: &Config, question: Option<String>, top_k: Option<usize>) -> Result<()> {
    let question = match question {
        Some(question) => question,
        None => prompt_question()?,
    };
    let top_k = top_k.unwrap_or(config.server.default_top_k);

    let query = Services::connect(config).await?.query_service(config);
    let hits = query
        .search_query(&question, top_k)
        .await
        .context("Search failed")?;

    if hits.is_empty() {
        println!("No results in collection {}", style(query.collection()).cyan());
        return Ok(());
    }

    println!("{}", style("Results:").bold());
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "\n{}. Score: {}",
            rank + 1,
            style(format!("{:.4}", hit.score)).yellow()
        );
        println!("{}", hit.text);
    }

    Ok(())
}

/// Serve `POST /search` until Ctrl-C
#[inline]
pub async fn serve(config: &Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let query = Services::connect(config).await?.query_service(config);

    let listener = server::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    eprintln!(
        "{} Serving collection {} on http://{}",
        style("🚀").green(),
        style(query.collection()).cyan(),
        style(&bind).cyan()
    );

    server::serve(
        listener,
        AppState::new(query, config.server.default_top_k),
        server::shutdown_signal(),
    )
    .await
    .context("HTTP server failed")
}

/// Print the resolved configuration
#[inline]
pub fn config(config: &Config) -> Result<()> {
    show_config(config).context("Failed to display configuration")
}
