use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A metadata value as stored on a [`Document`]. Untyped scalars and string
/// lists round-trip through JSON without losing the string/number/array
/// distinction the metadata store is required to preserve (see §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Bool(bool),
    StringList(Vec<String>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to a single string for scoring purposes, joining list values
    /// with a space — used by the metadata scorer (§4.8).
    pub fn to_scoring_string(&self) -> String {
        match self {
            MetadataValue::String(s) => s.clone(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::StringList(items) => items.join(" "),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

pub type Metadata = HashMap<String, MetadataValue>;

pub const META_SOURCE_PATH: &str = "source_path";
pub const META_SOURCE_MTIME: &str = "source_mtime";
pub const META_SOURCE_SIZE: &str = "source_size";

/// Internal metadata keys the ranker and indexer reserve; the metadata scorer
/// skips these when scanning arbitrary document metadata (§4.8).
pub fn is_internal_metadata_key(key: &str) -> bool {
    matches!(key, META_SOURCE_PATH | META_SOURCE_MTIME | META_SOURCE_SIZE)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: u32,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: i64,
}

/// Input payload for indexing a fresh document (§4.5 `index_document`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DocumentInput {
    pub id: String,
    pub title: String,
    pub content: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub query: String,
    pub limit: usize,
    pub offset: usize,
    pub keyword_enabled: bool,
    pub semantic_enabled: bool,
    pub fuzzy_enabled: bool,
    pub min_score: Option<f64>,
    pub min_keyword_score: Option<f64>,
    pub min_semantic_score: Option<f64>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 10,
            offset: 0,
            keyword_enabled: true,
            semantic_enabled: true,
            fuzzy_enabled: false,
            min_score: None,
            min_keyword_score: None,
            min_semantic_score: None,
        }
    }
}

impl SearchQuery {
    pub const MAX_LIMIT: usize = 100;

    /// Validate and normalize per §3: empty query fails, limit is clamped,
    /// and both channels are forced on if the caller disabled both.
    pub fn normalize(mut self) -> crate::error::Result<Self> {
        if self.query.trim().is_empty() {
            return Err(crate::error::Error::invalid("query must not be empty"));
        }
        if self.limit == 0 {
            self.limit = 10;
        }
        self.limit = self.limit.min(Self::MAX_LIMIT);
        if !self.keyword_enabled && !self.semantic_enabled {
            self.keyword_enabled = true;
            self.semantic_enabled = true;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpellSuggestions {
    pub original: String,
    pub corrected: String,
    pub has_corrections: bool,
    pub misspelled_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub non_semantic_results: Vec<SearchResult>,
    pub semantic_results: Vec<SearchResult>,
    pub non_semantic_total: usize,
    pub semantic_total: usize,
    pub elapsed_ms: u64,
    pub auto_fuzzy: bool,
    pub suggestions: Option<SpellSuggestions>,
}
