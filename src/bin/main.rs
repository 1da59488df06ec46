//! Binary entry point: wires the concrete Storage/Keyword/Vector/Embedder
//! backends together per the loaded [`EngineConfig`] and dispatches to the
//! requested subcommand (§6).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use hybrid_doc_search::cli::{Cli, Command, WatchAction};
use hybrid_doc_search::config::EngineConfig;
use hybrid_doc_search::embeddings::{Embedder, HashEmbedder};
use hybrid_doc_search::error::Result;
use hybrid_doc_search::extract::PlainTextExtractor;
use hybrid_doc_search::indexer::Indexer;
use hybrid_doc_search::keyword_index::{KeywordIndex, TantivyKeywordIndex};
use hybrid_doc_search::ranker::Ranker;
use hybrid_doc_search::search::HybridSearchEngine;
use hybrid_doc_search::server::{self, AppState};
use hybrid_doc_search::storage::{SqliteStorage, Storage};
use hybrid_doc_search::types::SearchQuery;
use hybrid_doc_search::vector_index::{create_vector_index, VectorIndex};
use hybrid_doc_search::watcher::Watcher;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> EngineConfig {
    match path {
        Some(p) => EngineConfig::from_file(p).unwrap_or_else(|e| {
            eprintln!("failed to load config {}: {e}", p.display());
            std::process::exit(1);
        }),
        None => EngineConfig::default(),
    }
}

struct Backends {
    storage: Arc<dyn Storage>,
    keyword_index: Arc<dyn KeywordIndex>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

fn build_backends(config: &EngineConfig) -> Result<Backends> {
    std::fs::create_dir_all(&config.storage.data_dir)?;

    let storage = Arc::new(SqliteStorage::open(&config.storage.data_dir.join("documents.db"))?);
    let keyword_index = Arc::new(TantivyKeywordIndex::open(&config.storage.keyword_index_dir)?);

    let vector_index = create_vector_index("brute_force", config.embedding.dimension)?;
    let vector_index: Arc<dyn VectorIndex> = Arc::from(vector_index);
    if config.storage.vector_index_path.exists() {
        vector_index.load(&config.storage.vector_index_path)?;
    }

    let embedder: Arc<dyn Embedder> = match &config.embedding.model_path {
        #[cfg(feature = "onnx-embeddings")]
        Some(model_dir) => Arc::new(hybrid_doc_search::embeddings::onnx::OnnxEmbedder::load(
            model_dir,
            config.embedding.dimension,
        )?),
        _ => Arc::new(HashEmbedder::new(config.embedding.dimension)),
    };

    Ok(Backends { storage, keyword_index, vector_index, embedder })
}

fn build_indexer(config: &EngineConfig, backends: &Backends) -> Arc<Indexer> {
    Arc::new(Indexer::new(
        backends.storage.clone(),
        backends.vector_index.clone(),
        backends.keyword_index.clone(),
        backends.embedder.clone(),
        Arc::new(PlainTextExtractor),
        config.search.chunk_size,
        config.search.chunk_overlap,
    ))
}

fn build_engine(config: &EngineConfig, backends: &Backends) -> Result<Arc<HybridSearchEngine>> {
    let mut engine = HybridSearchEngine::new(
        backends.storage.clone(),
        backends.keyword_index.clone(),
        backends.vector_index.clone(),
        backends.embedder.clone(),
        config.search.clone(),
    )
    .with_ranker(Ranker::new(config.ranking.clone()));
    engine = engine.with_spell_checker()?;
    Ok(Arc::new(engine))
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }

    let result = run(cli.command, config, cli.config).await;
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: EngineConfig, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        Command::Server => run_server(config).await,
        Command::Search { query, limit, min_keyword_score, min_semantic_score, keyword, semantic, fuzzy } => {
            run_search(config, query, limit, min_keyword_score, min_semantic_score, keyword, semantic, fuzzy).await
        }
        Command::Index { path } => run_index(config, path),
        Command::Watch { action } => run_watch(config, config_path, action),
    }
}

async fn run_server(mut config: EngineConfig) -> Result<()> {
    let backends = build_backends(&config)?;
    let indexer = build_indexer(&config, &backends);
    let engine = build_engine(&config, &backends)?;

    let watcher = if config.watch.enabled {
        let watcher = Arc::new(Watcher::new(
            indexer.clone(),
            config.watch.allowed_extensions.clone(),
            config.watch.debounce_ms,
            config.watch.recursive,
        )?);
        for root in std::mem::take(&mut config.watch.roots) {
            if let Err(e) = watcher.add_directory(&root, true) {
                tracing::warn!(path = %root.display(), error = %e, "failed to mount configured watch root");
            }
        }
        Some(watcher)
    } else {
        None
    };

    let state = AppState {
        engine,
        indexer,
        storage: backends.storage.clone(),
        vector_index: backends.vector_index.clone(),
        watcher: watcher.clone(),
    };

    let vector_index = backends.vector_index.clone();
    let vector_index_path = config.storage.vector_index_path.clone();
    let serve_result = tokio::select! {
        res = server::serve(
            state,
            &config.server.host,
            config.server.port,
            config.server.request_timeout_secs,
        ) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    if let Some(watcher) = &watcher {
        watcher.stop()?;
    }
    vector_index.save(&vector_index_path)?;
    serve_result
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    config: EngineConfig,
    query: String,
    limit: usize,
    min_keyword_score: Option<f64>,
    min_semantic_score: Option<f64>,
    keyword: bool,
    semantic: bool,
    fuzzy: bool,
) -> Result<()> {
    let backends = build_backends(&config)?;
    let engine = build_engine(&config, &backends)?;

    let response = engine
        .search(SearchQuery {
            query,
            limit,
            offset: 0,
            keyword_enabled: keyword,
            semantic_enabled: semantic,
            fuzzy_enabled: fuzzy,
            min_score: None,
            min_keyword_score,
            min_semantic_score,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&response).unwrap_or_else(|_| format!("{:?}", response)));
    Ok(())
}

fn run_index(config: EngineConfig, path: PathBuf) -> Result<()> {
    let backends = build_backends(&config)?;
    let indexer = build_indexer(&config, &backends);

    let meta = std::fs::metadata(&path)?;
    if meta.is_dir() {
        indexer.index_directory(&path, Some(&config.watch.allowed_extensions))?;
    } else {
        indexer.index_file(&path, None)?;
    }

    backends.vector_index.save(&config.storage.vector_index_path)?;
    println!("indexed {}", path.display());
    Ok(())
}

/// `watch add|remove|list` mutate the persisted configuration's watch roots
/// directly; the Watcher itself is a live component owned by a running
/// `server` process, so a one-shot CLI invocation cannot reach into it.
/// `list` works against whatever config is loaded; `add`/`remove` require an
/// explicit `--config` file to write the change back to.
fn run_watch(mut config: EngineConfig, config_path: Option<PathBuf>, action: WatchAction) -> Result<()> {
    if matches!(action, WatchAction::List) {
        for root in &config.watch.roots {
            println!("{}", root.display());
        }
        return Ok(());
    }

    let config_path = config_path.ok_or_else(|| {
        hybrid_doc_search::error::Error::invalid("watch add/remove requires --config <file>")
    })?;

    match action {
        WatchAction::Add { path, sync } => {
            let canonical = path.canonicalize().unwrap_or(path);
            if !config.watch.roots.contains(&canonical) {
                config.watch.roots.push(canonical.clone());
            }
            config.watch.enabled = true;
            if sync {
                let backends = build_backends(&config)?;
                let indexer = build_indexer(&config, &backends);
                indexer.index_directory(&canonical, Some(&config.watch.allowed_extensions))?;
                backends.vector_index.save(&config.storage.vector_index_path)?;
            }
            println!("added {} (sync={sync})", canonical.display());
        }
        WatchAction::Remove { path } => {
            let canonical = path.canonicalize().unwrap_or(path);
            config.watch.roots.retain(|r| r != &canonical);
            println!("removed {}", canonical.display());
        }
        WatchAction::List => unreachable!(),
    }

    config
        .save_to_file(&config_path)
        .map_err(hybrid_doc_search::error::Error::backend)?;
    Ok(())
}
