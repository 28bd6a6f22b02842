//! CLI argument definitions for the jobmatch binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// jobmatch: semantic matching between candidates and job offers.
#[derive(Parser, Debug)]
#[command(name = "jobmatch", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Batch-index entities from a JSON file (`[{"id": .., "entity": {..}}]`).
    Index {
        file: PathBuf,
    },
    /// Match one entity (JSON file) against the opposite collection.
    Match {
        file: PathBuf,
        #[arg(short = 'k', long = "top-k", default_value_t = 10)]
        top_k: usize,
        /// Search this collection instead of the opposite one.
        #[arg(long)]
        collection: Option<String>,
    },
    /// Free-text query over job offers or candidates.
    Ask {
        query: String,
        #[arg(short = 's', long)]
        session: Option<String>,
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
        /// "jobs" or "candidates"; detected from the query when omitted.
        #[arg(short = 't', long)]
        target: Option<String>,
        #[arg(long)]
        context: Option<String>,
    },
    /// Remove an entity from a collection.
    Delete {
        id: String,
        collection: String,
    },
    /// Show collection and embedding statistics.
    Stats,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > JOBMATCH_CONFIG env var > ~/.jobmatch/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("JOBMATCH_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level: --log-level flag, else the config value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".jobmatch").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".jobmatch").join("config.toml");
    }
    PathBuf::from("config.toml")
}
