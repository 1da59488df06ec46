pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod embeddings;
pub mod fileid;
pub mod indexer;
pub mod keyword_index;
pub mod processing;
pub mod query_analyzer;
pub mod ranker;
pub mod search;
pub mod server;
pub mod spellcheck;
pub mod storage;
pub mod types;
pub mod vector_index;
pub mod watcher;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use indexer::Indexer;
pub use search::HybridSearchEngine;
pub use types::{Document, DocumentInput, SearchQuery, SearchResponse, SearchResult};
