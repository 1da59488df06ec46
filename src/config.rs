use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level engine configuration, loaded from nested YAML sections
/// (`server`, `storage`, `embedding`, `search`, `watch`, `ranking`) per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub watch: WatchConfig,
    pub ranking: RankingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request deadline enforced by the HTTP transport's timeout layer (§5).
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub keyword_index_dir: PathBuf,
    pub vector_index_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hybrid-doc-search");
        Self {
            keyword_index_dir: data_dir.join("keyword_index"),
            vector_index_path: data_dir.join("vectors.bin"),
            data_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_path: Option<PathBuf>,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            dimension: 384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k_candidates: usize,
    pub title_boost: f64,
    pub phrase_boost: f64,
    pub fuzzy_enabled: bool,
    pub fuzziness: u8,
    pub default_min_keyword_score: f64,
    pub default_min_semantic_score: f64,
    pub auto_fuzzy: bool,
    pub tfidf_enabled: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            chunk_overlap: 50,
            top_k_candidates: 50,
            title_boost: 1.0,
            phrase_boost: 1.0,
            fuzzy_enabled: false,
            fuzziness: 2,
            default_min_keyword_score: 0.0,
            default_min_semantic_score: 0.0,
            auto_fuzzy: true,
            tfidf_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub roots: Vec<PathBuf>,
    pub allowed_extensions: Vec<String>,
    pub debounce_ms: u64,
    pub recursive: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            roots: Vec::new(),
            allowed_extensions: vec![
                "txt".into(),
                "md".into(),
                "pdf".into(),
                "docx".into(),
                "pptx".into(),
                "xlsx".into(),
            ],
            debounce_ms: 400,
            recursive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weight_filename: f64,
    pub weight_content: f64,
    pub weight_path: f64,
    pub weight_metadata: f64,
    pub recency_enabled: bool,
    pub query_quality_enabled: bool,
    pub file_size_enabled: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weight_filename: 1.5,
            weight_content: 1.0,
            weight_path: 0.3,
            weight_metadata: 0.4,
            recency_enabled: true,
            query_quality_enabled: true,
            file_size_enabled: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            watch: WatchConfig::default(),
            ranking: RankingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.search.chunk_size == 0 {
            return Err("search.chunk_size must be > 0".into());
        }
        if self.search.chunk_overlap >= self.search.chunk_size {
            return Err("search.chunk_overlap must be < chunk_size".into());
        }
        if self.search.top_k_candidates == 0 {
            return Err("search.top_k_candidates must be > 0".into());
        }
        if self.search.title_boost < 1.0 || self.search.phrase_boost < 1.0 {
            return Err("search.title_boost and phrase_boost must be >= 1.0".into());
        }
        if self.server.request_timeout_secs == 0 {
            return Err("server.request_timeout_secs must be > 0".into());
        }
        Ok(())
    }

    /// Load from a YAML file. Relative paths beginning with `./` resolve
    /// against the config file's directory; other relatives resolve against
    /// the user home directory (§6).
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {e}"))?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|e| format!("failed to parse config: {e}"))?;
        config.validate()?;

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.storage.data_dir = resolve_path(&config.storage.data_dir, config_dir);
        config.storage.keyword_index_dir =
            resolve_path(&config.storage.keyword_index_dir, config_dir);
        config.storage.vector_index_path =
            resolve_path(&config.storage.vector_index_path, config_dir);
        if let Some(model_path) = &config.embedding.model_path {
            config.embedding.model_path = Some(resolve_path(model_path, config_dir));
        }

        Ok(config)
    }

    /// Serialize back to YAML at `path`. Paths previously resolved by
    /// [`EngineConfig::from_file`] are written out absolute; this is a
    /// round-trip convenience for CLI subcommands that mutate a loaded
    /// config (e.g. `watch add`/`watch remove`), not a general config editor.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        let yaml = serde_yaml::to_string(self).map_err(|e| format!("failed to serialize config: {e}"))?;
        std::fs::write(path, yaml).map_err(|e| format!("failed to write config file: {e}"))
    }
}

/// Relative paths beginning with `./` resolve against `base_dir` (the config
/// file's directory); other relative paths resolve against the user home
/// directory; absolute paths pass through unchanged.
fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let raw = path.to_string_lossy();
    if raw.starts_with("./") || raw.starts_with(".\\") {
        base_dir.join(path)
    } else {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let mut cfg = EngineConfig::default();
        cfg.search.chunk_overlap = cfg.search.chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_yaml_and_resolves_dot_slash_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            r#"
storage:
  data_dir: "./data"
"#,
        )
        .unwrap();

        let cfg = EngineConfig::from_file(&config_path).unwrap();
        assert_eq!(cfg.storage.data_dir, dir.path().join("data"));
    }
}
