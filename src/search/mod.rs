//! Parallel keyword + vector query evaluation, result fusion, optional
//! content-aware rescoring, and auto-fuzzy fallback (§4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::keyword_index::{KeywordIndex, KeywordSearchOptions};
use crate::query_analyzer;
use crate::ranker::Ranker;
use crate::spellcheck::SpellChecker;
use crate::storage::Storage;
use crate::types::{SearchQuery, SearchResponse, SearchResult};
use crate::vector_index::VectorIndex;

pub struct HybridSearchEngine {
    storage: Arc<dyn Storage>,
    keyword_index: Arc<dyn KeywordIndex>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
    ranker: Option<Ranker>,
    spell_checker: RwLock<Option<Arc<SpellChecker>>>,
}

impl HybridSearchEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        keyword_index: Arc<dyn KeywordIndex>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            storage,
            keyword_index,
            vector_index,
            embedder,
            config,
            ranker: None,
            spell_checker: RwLock::new(None),
        }
    }

    pub fn with_ranker(mut self, ranker: Ranker) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Build a spell checker from the Keyword Index's current term
    /// dictionary (§4.9). Use [`Self::refresh_spell_checker`] after bulk
    /// indexing to reload the snapshot.
    pub fn with_spell_checker(self) -> Result<Self> {
        self.refresh_spell_checker()?;
        Ok(self)
    }

    pub fn refresh_spell_checker(&self) -> Result<()> {
        let terms = self.keyword_index.all_terms()?;
        let mut frequency = HashMap::with_capacity(terms.len());
        for term in terms {
            let freq = self.keyword_index.term_doc_frequency(&term).unwrap_or(0);
            frequency.insert(term, freq);
        }
        *self.spell_checker.write() = Some(Arc::new(SpellChecker::new(frequency)));
        Ok(())
    }

    /// Run a search with no cancellation source (§4.9 default path); callers
    /// that need to abort an in-flight search use
    /// [`Self::search_with_cancellation`].
    pub async fn search(&self, query: SearchQuery) -> Result<SearchResponse> {
        self.search_with_cancellation(query, CancellationToken::new()).await
    }

    /// Run a search that aborts the outstanding keyword/semantic tasks and
    /// returns [`Error::Cancelled`] instead of partial results if
    /// `cancellation` fires before both complete (§5).
    pub async fn search_with_cancellation(
        &self,
        query: SearchQuery,
        cancellation: CancellationToken,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let query = query.normalize()?;

        let mut response = self.search_once(&query, query.fuzzy_enabled, &cancellation).await?;
        let mut auto_fuzzy = false;

        if self.config.auto_fuzzy
            && !query.fuzzy_enabled
            && response.0.is_empty()
            && response.1.is_empty()
        {
            auto_fuzzy = true;
            response = self.search_once(&query, true, &cancellation).await?;
        }

        let (non_semantic_total, semantic_total, non_semantic_results, semantic_results) = (
            response.2,
            response.3,
            std::mem::take(&mut response.0),
            std::mem::take(&mut response.1),
        );

        let suggestions = if auto_fuzzy {
            self.spell_checker.read().as_ref().and_then(|checker| {
                let analyzed = query_analyzer::analyze(&query.query);
                let any_unknown = analyzed.terms.iter().any(|t| !checker.contains(t));
                any_unknown.then(|| checker.check(&query.query))
            })
        } else {
            None
        };

        Ok(SearchResponse {
            query: query.query.clone(),
            non_semantic_results,
            semantic_results,
            non_semantic_total,
            semantic_total,
            elapsed_ms: started.elapsed().as_millis() as u64,
            auto_fuzzy,
            suggestions,
        })
    }

    /// Execute one full fan-out/fuse/page pass. Returns
    /// `(non_semantic, semantic, non_semantic_total, semantic_total)`.
    async fn search_once(
        &self,
        query: &SearchQuery,
        fuzzy_enabled: bool,
        cancellation: &CancellationToken,
    ) -> Result<(Vec<SearchResult>, Vec<SearchResult>, usize, usize)> {
        let keyword_task = query.keyword_enabled.then(|| {
            let keyword_index = self.keyword_index.clone();
            let query_text = query.query.clone();
            let top_k = self.config.top_k_candidates;
            let opts = KeywordSearchOptions {
                title_boost: self.config.title_boost,
                phrase_boost: self.config.phrase_boost,
                fuzzy_enabled,
                fuzziness: self.config.fuzziness,
            };
            tokio::task::spawn_blocking(move || keyword_index.search(&query_text, top_k, &opts))
        });

        let semantic_task = query.semantic_enabled.then(|| {
            let embedder = self.embedder.clone();
            let vector_index = self.vector_index.clone();
            let query_text = query.query.clone();
            let top_k = self.config.top_k_candidates;
            tokio::task::spawn_blocking(move || -> Result<Vec<(String, f64)>> {
                let vector = embedder.embed(&query_text)?;
                vector_index.search(&vector, top_k)
            })
        });

        // Any sub-task error fails the whole search (§7, §9). Cancellation
        // aborts whichever of the two is still outstanding and returns
        // `Error::Cancelled` rather than the partial results already in hand
        // (§5: "partial results are not returned").
        let keyword_abort = keyword_task.as_ref().map(|t| t.abort_handle());
        let semantic_abort = semantic_task.as_ref().map(|t| t.abort_handle());

        let joined = async {
            let keyword_hits = match keyword_task {
                Some(task) => task
                    .await
                    .map_err(|e| Error::backend(format!("keyword search task: {e}")))??,
                None => Vec::new(),
            };
            let semantic_hits = match semantic_task {
                Some(task) => task
                    .await
                    .map_err(|e| Error::backend(format!("semantic search task: {e}")))??,
                None => Vec::new(),
            };
            Ok::<_, Error>((keyword_hits, semantic_hits))
        };

        let (keyword_hits, semantic_hits) = tokio::select! {
            result = joined => result?,
            _ = cancellation.cancelled() => {
                if let Some(handle) = keyword_abort {
                    handle.abort();
                }
                if let Some(handle) = semantic_abort {
                    handle.abort();
                }
                return Err(Error::cancelled("search"));
            }
        };

        let keyword_map: HashMap<String, f64> = keyword_hits.into_iter().collect();
        let semantic_by_doc = self.aggregate_semantic_by_document(semantic_hits)?;

        let min_keyword_score = query
            .min_keyword_score
            .or(query.min_score)
            .unwrap_or(self.config.default_min_keyword_score);
        let min_semantic_score = query
            .min_semantic_score
            .or(query.min_score)
            .unwrap_or(self.config.default_min_semantic_score);

        let mut non_semantic: Vec<(String, f64)> = keyword_map
            .iter()
            .filter(|(_, &score)| score >= min_keyword_score)
            .map(|(id, &score)| (id.clone(), score))
            .collect();
        non_semantic.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut semantic: Vec<(String, f64)> = semantic_by_doc
            .iter()
            .filter(|(doc_id, &score)| !keyword_map.contains_key(*doc_id) && score >= min_semantic_score)
            .map(|(id, &score)| (id.clone(), score))
            .collect();
        semantic.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let non_semantic_total = non_semantic.len();
        let semantic_total = semantic.len();

        let non_semantic_page = page(&non_semantic, query.offset, query.limit);
        let semantic_page = page(&semantic, query.offset, query.limit);

        let mut non_semantic_results = self.hydrate(non_semantic_page, true)?;
        let mut semantic_results = self.hydrate(semantic_page, false)?;

        if let Some(ranker) = &self.ranker {
            let analyzed = query_analyzer::analyze(&query.query);
            let corpus_stats = if self.config.tfidf_enabled {
                Some(self.keyword_index.corpus_stats(&analyzed.terms)?)
            } else {
                None
            };
            let stats_ref = corpus_stats.as_ref().map(|(total, per_term)| (*total, per_term));
            ranker.rescore(&analyzed, &mut non_semantic_results, stats_ref, self.config.tfidf_enabled);
            ranker.rescore(&analyzed, &mut semantic_results, stats_ref, self.config.tfidf_enabled);
        }

        Ok((non_semantic_results, semantic_results, non_semantic_total, semantic_total))
    }

    /// Group chunk-level semantic hits by document (via
    /// `Storage.get_chunk(chunk_id) -> document_id`), taking the max score
    /// per document (§4.9).
    fn aggregate_semantic_by_document(&self, hits: Vec<(String, f64)>) -> Result<HashMap<String, f64>> {
        let mut by_doc: HashMap<String, f64> = HashMap::new();
        for (chunk_id, score) in hits {
            let document_id = match self.storage.get_chunk(&chunk_id) {
                Ok(chunk) => chunk.document_id,
                Err(_) => continue,
            };
            let entry = by_doc.entry(document_id).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }
        Ok(by_doc)
    }

    fn hydrate(&self, page: Vec<(String, f64)>, is_keyword: bool) -> Result<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(page.len());
        for (rank, (doc_id, score)) in page.into_iter().enumerate() {
            let document = match self.storage.get_document(&doc_id) {
                Ok(doc) => doc,
                Err(_) => continue,
            };
            results.push(SearchResult {
                document,
                keyword_score: if is_keyword { score } else { 0.0 },
                semantic_score: if is_keyword { 0.0 } else { score },
                rank: rank + 1,
            });
        }
        Ok(results)
    }
}

fn page(items: &[(String, f64)], offset: usize, limit: usize) -> Vec<(String, f64)> {
    items.iter().skip(offset).take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::indexer::Indexer;
    use crate::extract::PlainTextExtractor;
    use crate::keyword_index::TantivyKeywordIndex;
    use crate::storage::SqliteStorage;
    use crate::types::{DocumentInput, Metadata};
    use crate::vector_index::BruteForceIndex;

    const DIM: usize = 16;

    fn build_engine() -> (tempfile::TempDir, Arc<Indexer>, HybridSearchEngine) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let vector_index = Arc::new(BruteForceIndex::new(DIM));
        let keyword_index = Arc::new(TantivyKeywordIndex::open(&dir.path().join("kw")).unwrap());
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let extractor = Arc::new(PlainTextExtractor);

        let indexer = Arc::new(Indexer::new(
            storage.clone(),
            vector_index.clone(),
            keyword_index.clone(),
            embedder.clone(),
            extractor,
            200,
            50,
        ));

        let engine = HybridSearchEngine::new(
            storage,
            keyword_index,
            vector_index,
            embedder,
            SearchConfig::default(),
        );
        (dir, indexer, engine)
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (_dir, _indexer, engine) = build_engine();
        let err = engine
            .search(SearchQuery {
                query: "   ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn non_semantic_and_semantic_results_are_disjoint() {
        let (_dir, indexer, engine) = build_engine();
        indexer
            .index_document(DocumentInput {
                id: "doc1".to_string(),
                title: "revenue report".to_string(),
                content: "revenue grew substantially this quarter".to_string(),
                metadata: Metadata::new(),
            })
            .unwrap();

        let response = engine
            .search(SearchQuery {
                query: "revenue".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let non_semantic_ids: std::collections::HashSet<_> =
            response.non_semantic_results.iter().map(|r| r.document.id.clone()).collect();
        let semantic_ids: std::collections::HashSet<_> =
            response.semantic_results.iter().map(|r| r.document.id.clone()).collect();
        assert!(non_semantic_ids.is_disjoint(&semantic_ids));
        assert!(non_semantic_ids.contains("doc1"));
    }

    #[tokio::test]
    async fn pagination_prefix_extends_with_limit() {
        let (_dir, indexer, engine) = build_engine();
        for i in 0..5 {
            indexer
                .index_document(DocumentInput {
                    id: format!("doc{i}"),
                    title: format!("alpha document {i}"),
                    content: "alpha alpha alpha".to_string(),
                    metadata: Metadata::new(),
                })
                .unwrap();
        }

        let small = engine
            .search(SearchQuery {
                query: "alpha".to_string(),
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        let large = engine
            .search(SearchQuery {
                query: "alpha".to_string(),
                limit: 4,
                ..Default::default()
            })
            .await
            .unwrap();

        let small_ids: Vec<_> = small.non_semantic_results.iter().map(|r| r.document.id.clone()).collect();
        let large_ids: Vec<_> = large.non_semantic_results.iter().map(|r| r.document.id.clone()).collect();
        assert_eq!(&large_ids[..small_ids.len()], &small_ids[..]);
    }

    #[tokio::test]
    async fn equal_score_ties_break_deterministically_on_doc_id() {
        let (_dir, indexer, engine) = build_engine();
        // Every document has identical title/content, so keyword scores tie.
        for id in ["doc-c", "doc-a", "doc-b"] {
            indexer
                .index_document(DocumentInput {
                    id: id.to_string(),
                    title: "alpha".to_string(),
                    content: "alpha".to_string(),
                    metadata: Metadata::new(),
                })
                .unwrap();
        }

        let query = SearchQuery { query: "alpha".to_string(), ..Default::default() };
        let first = engine.search(query.clone()).await.unwrap();
        let second = engine.search(query).await.unwrap();

        let ids = |r: &crate::types::SearchResponse| {
            r.non_semantic_results.iter().map(|r| r.document.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), vec!["doc-a", "doc-b", "doc-c"]);
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn increasing_min_keyword_score_only_shrinks_results() {
        let (_dir, indexer, engine) = build_engine();
        indexer
            .index_document(DocumentInput {
                id: "doc1".to_string(),
                title: "alpha".to_string(),
                content: "alpha beta".to_string(),
                metadata: Metadata::new(),
            })
            .unwrap();

        let loose = engine
            .search(SearchQuery {
                query: "alpha".to_string(),
                min_keyword_score: Some(0.0),
                ..Default::default()
            })
            .await
            .unwrap();
        let strict = engine
            .search(SearchQuery {
                query: "alpha".to_string(),
                min_keyword_score: Some(1_000_000.0),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(strict.non_semantic_results.len() <= loose.non_semantic_results.len());
        assert!(strict.non_semantic_results.is_empty());
    }

    #[tokio::test]
    async fn auto_fuzzy_fires_when_exact_pass_is_empty() {
        let (_dir, indexer, engine) = build_engine();
        let engine = engine.with_spell_checker().unwrap();
        indexer
            .index_document(DocumentInput {
                id: "doc1".to_string(),
                title: "proposal".to_string(),
                content: "this proposal outlines the project scope".to_string(),
                metadata: Metadata::new(),
            })
            .unwrap();
        engine.refresh_spell_checker().unwrap();

        let response = engine
            .search(SearchQuery {
                query: "propodal".to_string(),
                semantic_enabled: false,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(response.auto_fuzzy);
    }

    #[tokio::test]
    async fn pre_cancelled_token_fails_search_with_cancelled_error() {
        let (_dir, indexer, engine) = build_engine();
        indexer
            .index_document(DocumentInput {
                id: "doc1".to_string(),
                title: "alpha".to_string(),
                content: "alpha beta".to_string(),
                metadata: Metadata::new(),
            })
            .unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();

        let err = engine
            .search_with_cancellation(
                SearchQuery { query: "alpha".to_string(), ..Default::default() },
                token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
