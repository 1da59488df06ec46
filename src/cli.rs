//! Command-line surface (§6): `server`, `search`, `index`, `watch add|remove|list`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hybrid-doc-search", about = "Local hybrid keyword + vector document search engine", version)]
pub struct Cli {
    /// Path to a YAML configuration file; defaults are used when omitted.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Server,

    /// Run a one-shot search and print the results.
    Search {
        query: String,

        #[arg(short = 'l', long = "limit", default_value_t = 10)]
        limit: usize,

        #[arg(long = "min-keyword-score")]
        min_keyword_score: Option<f64>,

        #[arg(long = "min-semantic-score")]
        min_semantic_score: Option<f64>,

        #[arg(long = "keyword", default_value_t = true)]
        keyword: bool,

        #[arg(long = "semantic", default_value_t = true)]
        semantic: bool,

        #[arg(long = "fuzzy", default_value_t = false)]
        fuzzy: bool,
    },

    /// Index a single file or recursively index a directory.
    Index { path: PathBuf },

    /// Manage the watched-directory list.
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },
}

#[derive(Subcommand)]
pub enum WatchAction {
    /// Add a directory to the configured watch roots (persisted to the config file).
    Add {
        path: PathBuf,

        /// Index existing files under the directory immediately.
        #[arg(long, default_value_t = false)]
        sync: bool,
    },

    /// Remove a directory from the configured watch roots.
    Remove { path: PathBuf },

    /// List the configured watch roots.
    List,
}
