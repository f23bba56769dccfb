//! semsearch binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Initialise logging
//! 3. Build the embedding provider and the search engine (once)
//! 4. Ingest the data directory if the index is empty
//! 5. Serve the HTTP API, or run a one-shot `ingest` / `search`

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use semsearch_api::state::AppState;
use semsearch_core::config::EmbeddingProvider;
use semsearch_core::{Result, SemsearchConfig};
use semsearch_vector::{DynEmbeddingService, HashEmbedding, OnnxEmbeddingService, SearchEngine};
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command};

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_embedder(config: &SemsearchConfig) -> Result<Arc<dyn DynEmbeddingService>> {
    match config.embedding.provider {
        EmbeddingProvider::Onnx => {
            let dir = semsearch_core::config::expand_home(&config.embedding.model_dir);
            let service = OnnxEmbeddingService::from_directory(&dir, config.embedding.max_tokens)?;
            Ok(Arc::new(service))
        }
        EmbeddingProvider::Hash => {
            tracing::warn!("Using hash embeddings; results are not semantic");
            Ok(Arc::new(HashEmbedding::new(config.embedding.dimensions)))
        }
    }
}

/// Ingest every matching file in the data directory when the index is empty.
/// Failures are logged, never fatal.
async fn startup_ingest(engine: &SearchEngine, data_dir: &Path) {
    if !engine.is_empty().await {
        tracing::debug!("Index already populated, skipping startup ingest");
        return;
    }
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        tracing::warn!(path = %data_dir.display(), error = %e, "Cannot create data directory");
        return;
    }

    let sources = vec![data_dir.display().to_string()];
    match engine.ingest(&sources).await {
        Ok(report) if report.chunks > 0 => {
            tracing::info!(chunks = report.chunks, documents = report.documents, "Startup ingest complete");
            if let Err(e) = engine.persist().await {
                tracing::warn!(error = %e, "Failed to persist index after startup ingest");
            }
        }
        Ok(_) => tracing::info!(path = %data_dir.display(), "No documents in data directory"),
        Err(e) => tracing::warn!(error = %e, "Startup ingest failed"),
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match SemsearchConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (SemsearchConfig::default(), Some(e)),
    };
    args.apply(&mut config);

    init_tracing(&args.resolve_log_level(&config));
    tracing::info!("Starting semsearch v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(_) if !config_file.exists() => {
            tracing::info!(path = %config_file.display(), "No configuration file, using defaults")
        }
        Some(e) => tracing::warn!(path = %config_file.display(), error = %e, "Invalid configuration file, using defaults"),
    }
    config.validate()?;

    let embedder = build_embedder(&config)?;
    let engine = Arc::new(SearchEngine::from_config(&config, embedder).await?);

    match args.command() {
        Command::Ingest { sources } => {
            let report = engine.ingest(&sources).await?;
            engine.persist().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search { query, .. } => {
            if config.ingest.startup_ingest {
                startup_ingest(&engine, &config.data_dir()).await;
            }
            let result = engine.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Serve => {
            if config.ingest.startup_ingest {
                startup_ingest(&engine, &config.data_dir()).await;
            }
            let state = AppState::new(config.clone(), Arc::clone(&engine))?;
            if let Err(e) = semsearch_api::start_server(&config, state).await {
                tracing::error!(
                    addr = %format!("{}:{}", config.api.host, config.api.port),
                    error = %e,
                    "Server failed; is another instance running?"
                );
                return Err(e.into());
            }
        }
    }

    Ok(())
}
