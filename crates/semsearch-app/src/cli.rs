//! Command line arguments.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use semsearch_core::config::{expand_home, BackendKind};
use semsearch_core::SemsearchConfig;

/// semsearch - semantic search over local files and web pages.
#[derive(Parser, Debug)]
#[command(name = "semsearch", version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for uploads and the persisted index.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Vector backend: embedded or remote.
    #[arg(short = 'b', long = "backend", global = true)]
    pub backend: Option<BackendKind>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Ingest files, directories or URLs and persist the index.
    Ingest {
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Run one query and print the result as JSON.
    Search {
        query: String,
        /// Number of results (overrides retrieval.top_k).
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
    },
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SEMSEARCH_CONFIG env var > ~/.semsearch/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SEMSEARCH_CONFIG") {
            return PathBuf::from(p);
        }
        expand_home("~/.semsearch/config.toml")
    }

    /// Log filter directive when `RUST_LOG` is unset.
    pub fn resolve_log_level(&self, config: &SemsearchConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }

    /// Apply flag overrides to `config`.
    pub fn apply(&self, config: &mut SemsearchConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(backend) = self.backend {
            config.index.backend = backend;
        }
        if let Some(Command::Search {
            top_k: Some(top_k), ..
        }) = &self.command
        {
            config.retrieval.top_k = *top_k;
        }
    }
}
