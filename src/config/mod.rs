// Configuration management module
// One struct loaded once from TOML plus the environment, then passed down

pub mod settings;

use console::style;

pub use settings::{
    Config, ConfigError, EmbeddingConfig, IngestConfig, ServerConfig, StoreBackend, StoreConfig,
};

/// Print the resolved configuration with secrets masked
#[inline]
pub fn show_config(config: &Config) -> Result<(), ConfigError> {
    let mask = |value: &Option<String>| match value.as_deref() {
        Some(v) if !v.trim().is_empty() => style("set").green(),
        _ => style("missing").red(),
    };

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!();
    eprintln!("{}", config.to_toml()?);

    eprintln!("{}", style("Credentials:").bold().yellow());
    eprintln!(
        "  {}: {}",
        settings::OPENAI_API_KEY_VAR,
        mask(&config.embedding.api_key)
    );
    if config.store.backend == StoreBackend::Qdrant {
        eprintln!(
            "  {}: {}",
            settings::QDRANT_URL_VAR,
            mask(&config.store.url)
        );
        eprintln!(
            "  {}: {}",
            settings::QDRANT_API_KEY_VAR,
            mask(&config.store.api_key)
        );
    } else {
        eprintln!(
            "  Vector directory: {}",
            style(config.vector_database_path().display()).cyan()
        );
    }

    Ok(())
}
