//! Per-document inverted index over `title` and `content` (§4.2).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::schema::{self, IndexRecordOption, Schema, Value as _, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, Term};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct KeywordSearchOptions {
    pub title_boost: f64,
    pub phrase_boost: f64,
    pub fuzzy_enabled: bool,
    pub fuzziness: u8,
}

impl Default for KeywordSearchOptions {
    fn default() -> Self {
        Self {
            title_boost: 1.0,
            phrase_boost: 1.0,
            fuzzy_enabled: false,
            fuzziness: 2,
        }
    }
}

/// Capability set for the lexical index (§9: trait object, not inheritance).
pub trait KeywordIndex: Send + Sync {
    /// Idempotent upsert of `title`/`content` under `doc_id`.
    fn index(&self, doc_id: &str, title: &str, content: &str) -> Result<()>;
    /// No-op if `doc_id` is absent.
    fn delete(&self, doc_id: &str) -> Result<()>;
    fn search(
        &self,
        query: &str,
        limit: usize,
        opts: &KeywordSearchOptions,
    ) -> Result<Vec<(String, f64)>>;
    fn doc_count(&self) -> Result<u64>;
    fn term_doc_frequency(&self, term: &str) -> Result<u64>;
    fn corpus_stats(&self, terms: &[String]) -> Result<(u64, HashMap<String, u64>)>;
    fn all_terms(&self) -> Result<Vec<String>>;
}

/// Simple whitespace/punctuation tokenizer for the coverage/phrase probes the
/// search algorithm needs internally — deliberately independent of the
/// higher-level query analyzer, which classifies queries for the ranker.
fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

pub struct TantivyKeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: schema::Field,
    title_field: schema::Field,
    content_field: schema::Field,
}

impl TantivyKeywordIndex {
    fn build_schema() -> (Schema, schema::Field, schema::Field, schema::Field) {
        let mut builder = Schema::builder();
        let id_field = builder.add_text_field("id", STRING | STORED);
        let title_field = builder.add_text_field("title", TEXT | STORED);
        let content_field = builder.add_text_field("content", TEXT | STORED);
        (builder.build(), id_field, title_field, content_field)
    }

    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let (schema, id_field, title_field, content_field) = Self::build_schema();

        let dir = tantivy::directory::MmapDirectory::open(path)?;
        let index = if Index::exists(&dir)? {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, schema)?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            title_field,
            content_field,
        })
    }

    fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    fn id_term(&self, doc_id: &str) -> Term {
        Term::from_field_text(self.id_field, doc_id)
    }

    fn doc_id_filter(&self, doc_id: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(self.id_term(doc_id), IndexRecordOption::Basic))
    }

    fn term_clause(&self, field: schema::Field, term_text: &str, opts: &KeywordSearchOptions) -> Box<dyn Query> {
        let term = Term::from_field_text(field, term_text);
        if opts.fuzzy_enabled {
            Box::new(FuzzyTermQuery::new(term, opts.fuzziness, true))
        } else {
            Box::new(TermQuery::new(term, IndexRecordOption::WithFreqsAndPositions))
        }
    }

    fn disjunctive_query(
        &self,
        terms: &[String],
        fields: &[schema::Field],
        opts: &KeywordSearchOptions,
    ) -> BooleanQuery {
        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .flat_map(|term| fields.iter().map(move |&field| (term, field)))
            .map(|(term, field)| (Occur::Should, self.term_clause(field, term, opts)))
            .collect();
        BooleanQuery::new(clauses)
    }

    fn doc_id_at(&self, searcher: &Searcher, addr: tantivy::DocAddress) -> Result<Option<String>> {
        let doc: tantivy::TantivyDocument = searcher.doc(addr)?;
        Ok(doc
            .get_first(self.id_field)
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    /// Count of distinct query terms matching `doc_id` in either field. A
    /// per-term probe failure contributes zero matches rather than failing
    /// the whole coverage computation (§4.2 failure semantics).
    fn matched_term_count(&self, searcher: &Searcher, doc_id: &str, terms: &[String], opts: &KeywordSearchOptions) -> usize {
        let mut matched = 0;
        for term in terms {
            let probe = BooleanQuery::new(vec![
                (Occur::Must, self.doc_id_filter(doc_id)),
                (
                    Occur::Must,
                    Box::new(self.disjunctive_query(
                        std::slice::from_ref(term),
                        &[self.title_field, self.content_field],
                        opts,
                    )),
                ),
            ]);
            if searcher.search(&probe, &Count).unwrap_or(0) > 0 {
                matched += 1;
            }
        }
        matched
    }

    /// Whether `terms` appear as an ordered phrase (small slop) in either field.
    fn contains_phrase(&self, searcher: &Searcher, doc_id: &str, terms: &[String]) -> bool {
        const SLOP: u32 = 2;
        for field in [self.title_field, self.content_field] {
            let field_terms: Vec<Term> = terms
                .iter()
                .map(|t| Term::from_field_text(field, t))
                .collect();
            if field_terms.len() < 2 {
                continue;
            }
            let phrase = PhraseQuery::new(field_terms);
            let mut phrase = phrase;
            phrase.set_slop(SLOP);
            let probe = BooleanQuery::new(vec![
                (Occur::Must, self.doc_id_filter(doc_id)),
                (Occur::Must, Box::new(phrase)),
            ]);
            if searcher.search(&probe, &Count).unwrap_or(0) > 0 {
                return true;
            }
        }
        false
    }
}

impl KeywordIndex for TantivyKeywordIndex {
    fn index(&self, doc_id: &str, title: &str, content: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(self.id_term(doc_id));
        writer.add_document(doc!(
            self.id_field => doc_id,
            self.title_field => title,
            self.content_field => content,
        ))?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    fn delete(&self, doc_id: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(self.id_term(doc_id));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    fn search(
        &self,
        query: &str,
        limit: usize,
        opts: &KeywordSearchOptions,
    ) -> Result<Vec<(String, f64)>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.searcher();

        if opts.title_boost <= 1.0 && opts.phrase_boost <= 1.0 {
            let bq = self.disjunctive_query(&terms, &[self.title_field, self.content_field], opts);
            let top = searcher.search(&bq, &TopDocs::with_limit(limit))?;
            let mut results = Vec::with_capacity(top.len());
            for (score, addr) in top {
                if let Some(id) = self.doc_id_at(&searcher, addr)? {
                    results.push((id, score as f64));
                }
            }
            return Ok(results);
        }

        let req = (2 * limit).max(50);
        let title_query = self.disjunctive_query(&terms, &[self.title_field], opts);
        let content_query = self.disjunctive_query(&terms, &[self.content_field], opts);

        let mut per_doc: HashMap<String, (f64, f64)> = HashMap::new();
        for (score, addr) in searcher.search(&title_query, &TopDocs::with_limit(req))? {
            if let Some(id) = self.doc_id_at(&searcher, addr)? {
                per_doc.entry(id).or_insert((0.0, 0.0)).0 = score as f64;
            }
        }
        for (score, addr) in searcher.search(&content_query, &TopDocs::with_limit(req))? {
            if let Some(id) = self.doc_id_at(&searcher, addr)? {
                per_doc.entry(id).or_insert((0.0, 0.0)).1 = score as f64;
            }
        }

        let mut results = Vec::with_capacity(per_doc.len());
        for (doc_id, (title_score, content_score)) in per_doc {
            let mut base = title_score * opts.title_boost + content_score;
            if terms.len() > 1 {
                let matched = self.matched_term_count(&searcher, &doc_id, &terms, opts);
                let coverage = matched as f64 / terms.len() as f64;
                base *= coverage * coverage;
            }
            if opts.phrase_boost > 1.0 && terms.len() > 1 && self.contains_phrase(&searcher, &doc_id, &terms) {
                base *= opts.phrase_boost;
            }
            results.push((doc_id, base));
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    fn doc_count(&self) -> Result<u64> {
        Ok(self.searcher().num_docs())
    }

    fn term_doc_frequency(&self, term: &str) -> Result<u64> {
        let searcher = self.searcher();
        let title_df = searcher.doc_freq(&Term::from_field_text(self.title_field, term))?;
        let content_df = searcher.doc_freq(&Term::from_field_text(self.content_field, term))?;
        Ok(title_df + content_df)
    }

    fn corpus_stats(&self, terms: &[String]) -> Result<(u64, HashMap<String, u64>)> {
        let total_docs = self.doc_count()?;
        let mut per_term = HashMap::with_capacity(terms.len());
        for term in terms {
            per_term.insert(term.clone(), self.term_doc_frequency(term).unwrap_or(0));
        }
        Ok((total_docs, per_term))
    }

    fn all_terms(&self) -> Result<Vec<String>> {
        let searcher = self.searcher();
        let mut seen = HashSet::new();
        for field in [self.title_field, self.content_field] {
            for segment_reader in searcher.segment_readers() {
                let inverted = segment_reader.inverted_index(field)?;
                let term_dict = inverted.terms();
                let mut stream = term_dict.stream()?;
                while let Some((term_bytes, _)) = stream.next() {
                    if let Ok(term) = std::str::from_utf8(term_bytes) {
                        seen.insert(term.to_string());
                    }
                }
            }
        }
        Ok(seen.into_iter().collect())
    }
}

impl std::fmt::Debug for TantivyKeywordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyKeywordIndex").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, TantivyKeywordIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = TantivyKeywordIndex::open(dir.path()).unwrap();
        (dir, index)
    }

    #[test]
    fn index_then_search_finds_document() {
        let (_dir, index) = open_tmp();
        index.index("doc1", "Quarterly Report", "revenue grew substantially").unwrap();
        let results = index
            .search("revenue", 10, &KeywordSearchOptions::default())
            .unwrap();
        assert!(results.iter().any(|(id, _)| id == "doc1"));
    }

    #[test]
    fn delete_removes_document_from_results() {
        let (_dir, index) = open_tmp();
        index.index("doc1", "Report", "alpha beta").unwrap();
        index.delete("doc1").unwrap();
        let results = index
            .search("alpha", 10, &KeywordSearchOptions::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn delete_of_absent_document_is_noop() {
        let (_dir, index) = open_tmp();
        assert!(index.delete("never-indexed").is_ok());
    }

    #[test]
    fn reindex_is_idempotent_upsert() {
        let (_dir, index) = open_tmp();
        index.index("doc1", "Report", "alpha").unwrap();
        index.index("doc1", "Report", "beta").unwrap();
        let results = index
            .search("alpha", 10, &KeywordSearchOptions::default())
            .unwrap();
        assert!(!results.iter().any(|(id, _)| id == "doc1"));
    }

    #[test]
    fn title_boost_branch_favors_title_matches() {
        let (_dir, index) = open_tmp();
        index.index("title-match", "alpha report", "unrelated text").unwrap();
        index.index("content-match", "unrelated title", "alpha appears here").unwrap();
        let opts = KeywordSearchOptions {
            title_boost: 3.0,
            ..KeywordSearchOptions::default()
        };
        let results = index.search("alpha", 10, &opts).unwrap();
        let title_rank = results.iter().position(|(id, _)| id == "title-match");
        let content_rank = results.iter().position(|(id, _)| id == "content-match");
        assert!(title_rank < content_rank);
    }
}
