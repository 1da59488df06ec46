//! Content-aware rescoring: filename, content, path, metadata scorers plus
//! recency / query-quality / file-size multipliers (§4.8).

use std::collections::HashMap;

use crate::config::RankingConfig;
use crate::query_analyzer::AnalyzedQuery;
use crate::types::{is_internal_metadata_key, Document, SearchResult};

const EXACT_FILENAME_SCORE: f64 = 100.0;
const ALL_WORDS_IN_ORDER_SCORE: f64 = 80.0;
const ALL_WORDS_ANY_ORDER_SCORE: f64 = 60.0;
const SUBSTRING_MATCH_SCORE: f64 = 30.0;
const EXTENSION_MATCH_SCORE: f64 = 15.0;
const PREFIX_MATCH_SCORE: f64 = 20.0;
const MULTIPLE_OCCURRENCE_BONUS: f64 = 10.0;
const STRIPPED_SPACES_PENALTY: f64 = 0.95;

const PHRASE_MATCH_SCORE: f64 = 100.0;
const PHRASE_OCCURRENCE_BONUS_CAP: f64 = 20.0;
const HEADER_MATCH_SCORE: f64 = 50.0;
const ALL_WORDS_CONTENT_SCORE: f64 = 70.0;
const SCATTERED_WORDS_SCORE: f64 = 30.0;
const MAX_TFIDF_MULTIPLIER: f64 = 3.0;
const POSITION_BOOST_THRESHOLD: f64 = 0.1;
const POSITION_BOOST_MULTIPLIER: f64 = 1.15;

const PATH_EXACT_MATCH_SCORE: f64 = 40.0;
const PATH_PARTIAL_MATCH_SCORE: f64 = 20.0;
const PATH_COMPONENT_BONUS: f64 = 5.0;

const AUTHOR_MATCH_SCORE: f64 = 30.0;
const TAG_MATCH_SCORE: f64 = 25.0;
const OTHER_METADATA_SCORE: f64 = 10.0;

const RECENCY_24H: f64 = 1.2;
const RECENCY_WEEK: f64 = 1.1;
const RECENCY_MONTH: f64 = 1.05;

const PHRASE_MATCH_MULTIPLIER: f64 = 1.3;
const ALL_WORDS_MULTIPLIER: f64 = 1.15;
const PARTIAL_MATCH_MULTIPLIER: f64 = 1.05;

const FILE_SIZE_SMALL_BOOST_MAX: f64 = 1.10;
const FILE_SIZE_LARGE_PENALTY_MIN: f64 = 0.90;
const FILE_SIZE_SMALL_THRESHOLD: f64 = 1024.0;
const FILE_SIZE_LARGE_THRESHOLD: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchType {
    None,
    Partial,
    AllWords,
    Phrase,
}

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub final_score: f64,
    pub filename: f64,
    pub content: f64,
    pub path: f64,
    pub metadata: f64,
    pub multipliers: HashMap<String, f64>,
    pub match_type: MatchType,
}

pub struct Ranker {
    config: RankingConfig,
}

impl Ranker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn rank(&self, query: &AnalyzedQuery, doc: &Document, corpus_stats: Option<(u64, &HashMap<String, u64>)>, tfidf_enabled: bool) -> f64 {
        self.rank_with_breakdown(query, doc, corpus_stats, tfidf_enabled).final_score
    }

    pub fn rank_with_breakdown(
        &self,
        query: &AnalyzedQuery,
        doc: &Document,
        corpus_stats: Option<(u64, &HashMap<String, u64>)>,
        tfidf_enabled: bool,
    ) -> ScoreBreakdown {
        let filename_score = score_filename(query, &doc.title);
        let (content_score, content_match) = score_content(query, &doc.content, corpus_stats, tfidf_enabled);
        let source_path = doc
            .metadata
            .get(crate::types::META_SOURCE_PATH)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let path_score = score_path(query, source_path);
        let metadata_score = score_metadata(query, doc);

        let base = self.config.weight_filename * filename_score
            + self.config.weight_content * content_score
            + self.config.weight_path * path_score
            + self.config.weight_metadata * metadata_score;

        let filename_match = classify_filename_match(query, &doc.title);
        let match_type = filename_match.max(content_match);

        let mut multipliers = HashMap::new();
        let mut total_multiplier = 1.0;

        if self.config.recency_enabled {
            let m = recency_multiplier(doc);
            multipliers.insert("recency".to_string(), m);
            total_multiplier *= m;
        }
        if self.config.query_quality_enabled {
            let m = query_quality_multiplier(match_type);
            multipliers.insert("query_quality".to_string(), m);
            total_multiplier *= m;
        }
        if self.config.file_size_enabled {
            let m = file_size_multiplier(doc);
            multipliers.insert("file_size".to_string(), m);
            total_multiplier *= m;
        }

        ScoreBreakdown {
            final_score: base * total_multiplier,
            filename: filename_score,
            content: content_score,
            path: path_score,
            metadata: metadata_score,
            multipliers,
            match_type,
        }
    }

    /// Rescore an existing result list in place and renumber ranks.
    pub fn rescore(
        &self,
        query: &AnalyzedQuery,
        results: &mut [SearchResult],
        corpus_stats: Option<(u64, &HashMap<String, u64>)>,
        tfidf_enabled: bool,
    ) {
        for result in results.iter_mut() {
            let breakdown = self.rank_with_breakdown(query, &result.document, corpus_stats, tfidf_enabled);
            // final score folds back into the channel score it was derived from.
            if result.semantic_score > 0.0 {
                result.semantic_score = breakdown.final_score;
            } else {
                result.keyword_score = breakdown.final_score;
            }
        }
        results.sort_by(|a, b| {
            let sa = a.keyword_score.max(a.semantic_score);
            let sb = b.keyword_score.max(b.semantic_score);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
    }
}

fn normalize_filename(title: &str) -> (String, String) {
    let (stem, ext) = match title.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (title, ""),
    };
    let normalized = stem
        .chars()
        .map(|c| if c == '_' || c == '-' || c == '.' { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();
    (normalized, ext.to_lowercase())
}

fn score_filename(query: &AnalyzedQuery, title: &str) -> f64 {
    let (normalized_title, extension) = normalize_filename(title);
    let terms = &query.terms;

    let mut categorical = 0.0f64;

    for phrase in &query.phrases {
        if normalized_title.contains(phrase.as_str()) {
            categorical = categorical.max(ALL_WORDS_IN_ORDER_SCORE);
        }
    }

    if !terms.is_empty() {
        let joined_terms = terms.join(" ");
        let joined_no_space = terms.join("");
        let normalized_no_space = normalized_title.replace(' ', "");

        if normalized_title == joined_terms {
            categorical = categorical.max(EXACT_FILENAME_SCORE);
        } else if normalized_no_space == joined_no_space {
            categorical = categorical.max(EXACT_FILENAME_SCORE * STRIPPED_SPACES_PENALTY);
        } else if normalized_title.contains(&joined_terms) {
            categorical = categorical.max(ALL_WORDS_IN_ORDER_SCORE);
        } else if terms.iter().all(|t| normalized_title.contains(t.as_str())) {
            categorical = categorical.max(ALL_WORDS_ANY_ORDER_SCORE);
        } else {
            let matched = terms.iter().filter(|t| normalized_title.contains(t.as_str())).count();
            if matched > 0 {
                categorical = categorical.max(SUBSTRING_MATCH_SCORE * (matched as f64 / terms.len() as f64));
            }
        }

        if terms.iter().any(|t| {
            let t = t.trim_start_matches('.');
            t == extension
        }) {
            categorical = categorical.max(EXTENSION_MATCH_SCORE);
        }

        for term in terms {
            if normalized_title.starts_with(term.as_str()) {
                let bonus = 0.05 * (term.len().saturating_sub(3)) as f64;
                categorical = categorical.max(PREFIX_MATCH_SCORE * (1.0 + bonus));
            } else if normalized_title.contains(term.as_str()) {
                let bonus = 0.03 * (term.len().saturating_sub(3)) as f64;
                categorical = categorical.max(SUBSTRING_MATCH_SCORE * (1.0 + bonus));
            }
        }
    }

    let mut occurrence_bonus = 0.0;
    for term in terms {
        let count = normalized_title.matches(term.as_str()).count();
        if count > 1 {
            occurrence_bonus += MULTIPLE_OCCURRENCE_BONUS * (1.0 - 1.0 / count as f64);
        }
    }

    categorical + occurrence_bonus
}

fn classify_filename_match(query: &AnalyzedQuery, title: &str) -> MatchType {
    let (normalized_title, _) = normalize_filename(title);
    if !query.phrases.is_empty() && query.phrases.iter().any(|p| normalized_title.contains(p.as_str())) {
        return MatchType::Phrase;
    }
    if !query.terms.is_empty() && query.terms.iter().all(|t| normalized_title.contains(t.as_str())) {
        return MatchType::AllWords;
    }
    if query.terms.iter().any(|t| normalized_title.contains(t.as_str())) {
        return MatchType::Partial;
    }
    MatchType::None
}

fn detect_headers(content: &str) -> Vec<(usize, String)> {
    let mut headers = Vec::new();
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let mut level = 1;
            let mut rest = rest;
            while let Some(r) = rest.strip_prefix('#') {
                level += 1;
                rest = r;
            }
            if level <= 6 && rest.starts_with(' ') {
                headers.push((level, rest.trim().to_lowercase()));
                continue;
            }
        }
        if let Some(rest) = trimmed.strip_prefix("<h") {
            if let Some(digit) = rest.chars().next() {
                if let Some(level) = digit.to_digit(10) {
                    if (1..=6).contains(&level) {
                        let text = rest
                            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '>')
                            .trim_end_matches(|c: char| c != '<')
                            .trim_end_matches('<');
                        headers.push((level as usize, text.to_lowercase()));
                        continue;
                    }
                }
            }
        }
        // RST underline: a run of one repeated symbol under a non-empty previous line.
        if i > 0 && !trimmed.is_empty() {
            let mut chars = trimmed.chars();
            if let Some(first) = chars.next() {
                if matches!(first, '=' | '-' | '~' | '^') && trimmed.chars().all(|c| c == first) {
                    let prev = lines[i - 1].trim();
                    if !prev.is_empty() {
                        headers.push((1, prev.to_lowercase()));
                    }
                }
            }
        }
    }
    headers
}

fn score_content(
    query: &AnalyzedQuery,
    content: &str,
    corpus_stats: Option<(u64, &HashMap<String, u64>)>,
    tfidf_enabled: bool,
) -> (f64, MatchType) {
    let lower = content.to_lowercase();
    let terms = &query.terms;
    let mut categorical = 0.0f64;
    let mut match_type = MatchType::None;

    for phrase in &query.phrases {
        let occurrences = lower.matches(phrase.as_str()).count();
        if occurrences > 0 {
            let bonus = (PHRASE_OCCURRENCE_BONUS_CAP).min((occurrences - 1) as f64 * 4.0);
            categorical = categorical.max(PHRASE_MATCH_SCORE + bonus);
            match_type = MatchType::Phrase;
        }
    }

    if !terms.is_empty() {
        let total = terms.len() as f64;
        let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count() as f64;

        for (level, header_text) in detect_headers(content) {
            let header_matched = terms.iter().filter(|t| header_text.contains(t.as_str())).count() as f64;
            if header_matched > 0.0 {
                let score = HEADER_MATCH_SCORE * (1.0 + (5.0 - level as f64) * 0.1) * (header_matched / total);
                categorical = categorical.max(score);
            }
        }

        let joined = terms.join(" ");
        if lower.contains(&joined) {
            categorical = categorical.max(ALL_WORDS_CONTENT_SCORE);
            match_type = match_type.max(MatchType::AllWords);
        } else if matched == total {
            categorical = categorical.max(SCATTERED_WORDS_SCORE);
            match_type = match_type.max(MatchType::AllWords);
        } else if matched > 0.0 {
            categorical = categorical.max(SCATTERED_WORDS_SCORE * (matched / total));
            match_type = match_type.max(MatchType::Partial);
        }

        if tfidf_enabled {
            if let Some((total_docs, dfs)) = corpus_stats {
                let words = lower.split_whitespace().count().max(1) as f64;
                let mut avg_tfidf = 0.0;
                for term in terms {
                    let tf = lower.matches(term.as_str()).count() as f64 / words;
                    let df = dfs.get(term).copied().unwrap_or(0);
                    let idf = if df == 0 {
                        1.0 + total_docs as f64
                    } else {
                        1.0 + total_docs as f64 / df as f64
                    };
                    avg_tfidf += tf * idf;
                }
                avg_tfidf /= total;
                let multiplier = MAX_TFIDF_MULTIPLIER.min(1.0 + 10.0 * avg_tfidf);
                categorical *= multiplier;
            }
        }
    }

    let position_threshold = (100.0f64).max(content.len() as f64 * POSITION_BOOST_THRESHOLD) as usize;
    let boundary = floor_char_boundary(&lower, position_threshold.min(lower.len()));
    let prefix = &lower[..boundary];
    let early_hit = query.phrases.iter().any(|p| prefix.contains(p.as_str()))
        || terms.iter().any(|t| prefix.contains(t.as_str()));
    if early_hit {
        categorical *= POSITION_BOOST_MULTIPLIER;
    }

    (categorical, match_type)
}

/// Largest byte index <= `index` that lies on a UTF-8 char boundary of `s`.
/// `str::floor_char_boundary` is nightly-only as of this writing, so this is
/// the stable equivalent needed to safely slice a byte-offset prefix.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn score_path(query: &AnalyzedQuery, source_path: &str) -> f64 {
    let path = std::path::Path::new(source_path);
    let components: Vec<String> = path
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    if components.is_empty() || query.terms.is_empty() {
        return 0.0;
    }

    let mut total = 0.0;
    let mut matched_components = 0;
    for component in &components {
        let mut best = 0.0f64;
        for term in &query.terms {
            if component == term {
                best = best.max(PATH_EXACT_MATCH_SCORE);
            } else if component.starts_with(term.as_str()) {
                best = best.max(PATH_PARTIAL_MATCH_SCORE * 1.2);
            } else if component.contains(term.as_str()) {
                let coverage = term.len() as f64 / component.len().max(1) as f64;
                best = best.max(PATH_PARTIAL_MATCH_SCORE + (PATH_EXACT_MATCH_SCORE - PATH_PARTIAL_MATCH_SCORE) * coverage);
            }
        }
        if best > 0.0 {
            matched_components += 1;
        }
        total += best;
    }

    if matched_components > 1 {
        total += PATH_COMPONENT_BONUS * (matched_components - 1) as f64;
    }
    total
}

fn score_metadata(query: &AnalyzedQuery, doc: &Document) -> f64 {
    if query.terms.is_empty() {
        return 0.0;
    }
    let total = query.terms.len() as f64;
    let mut score = 0.0;
    for (key, value) in &doc.metadata {
        if is_internal_metadata_key(key) {
            continue;
        }
        let base = match key.to_lowercase().as_str() {
            "author" | "creator" | "by" | "created_by" => AUTHOR_MATCH_SCORE,
            "tags" | "keywords" | "categories" => TAG_MATCH_SCORE,
            _ => OTHER_METADATA_SCORE,
        };
        let value_str = value.to_scoring_string().to_lowercase();
        let matched = query.terms.iter().filter(|t| value_str.contains(t.as_str())).count() as f64;
        if matched > 0.0 {
            score += base * (matched / total);
        }
    }
    score
}

fn recency_multiplier(doc: &Document) -> f64 {
    let mtime_ns: i64 = doc
        .metadata
        .get(crate::types::META_SOURCE_MTIME)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if mtime_ns == 0 {
        return 1.0;
    }
    let now_ns = doc.updated_at.max(doc.created_at) * 1_000_000_000;
    let age_secs = ((now_ns - mtime_ns).max(0)) as f64 / 1_000_000_000.0;
    if age_secs < 86_400.0 {
        RECENCY_24H
    } else if age_secs < 7.0 * 86_400.0 {
        RECENCY_WEEK
    } else if age_secs < 30.0 * 86_400.0 {
        RECENCY_MONTH
    } else {
        1.0
    }
}

fn query_quality_multiplier(match_type: MatchType) -> f64 {
    match match_type {
        MatchType::Phrase => PHRASE_MATCH_MULTIPLIER,
        MatchType::AllWords => ALL_WORDS_MULTIPLIER,
        MatchType::Partial => PARTIAL_MATCH_MULTIPLIER,
        MatchType::None => 1.0,
    }
}

fn file_size_multiplier(doc: &Document) -> f64 {
    let size: f64 = doc
        .metadata
        .get(crate::types::META_SOURCE_SIZE)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|v| v as f64)
        .unwrap_or(0.0);
    if size <= 0.0 {
        return 1.0;
    }
    if size < FILE_SIZE_SMALL_THRESHOLD {
        let ratio = size / FILE_SIZE_SMALL_THRESHOLD;
        FILE_SIZE_SMALL_BOOST_MAX - (FILE_SIZE_SMALL_BOOST_MAX - 1.0) * ratio
    } else if size > FILE_SIZE_LARGE_THRESHOLD {
        let over = (size / FILE_SIZE_LARGE_THRESHOLD).log2().max(0.0);
        (1.0 - 0.02 * over).max(FILE_SIZE_LARGE_PENALTY_MIN)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_analyzer::analyze;
    use std::collections::HashMap as Map;

    fn doc(title: &str, content: &str) -> Document {
        Document {
            id: "d1".to_string(),
            title: title.to_string(),
            content: content.to_string(),
            metadata: Map::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn exact_filename_match_scores_highest() {
        let q = analyze("quarterly report");
        let exact = score_filename(&q, "quarterly_report.pdf");
        let partial = score_filename(&q, "annual_summary.pdf");
        assert!(exact > partial);
    }

    #[test]
    fn file_size_multiplier_is_one_in_normal_range() {
        let mut d = doc("x", "y");
        d.metadata.insert(
            crate::types::META_SOURCE_SIZE.to_string(),
            crate::types::MetadataValue::String((10 * 1024).to_string()),
        );
        assert_eq!(file_size_multiplier(&d), 1.0);
    }

    #[test]
    fn file_size_multiplier_boosts_small_files() {
        let mut d = doc("x", "y");
        d.metadata.insert(
            crate::types::META_SOURCE_SIZE.to_string(),
            crate::types::MetadataValue::String("10".to_string()),
        );
        assert!(file_size_multiplier(&d) > 1.0);
    }

    #[test]
    fn file_size_multiplier_penalizes_large_files() {
        let mut d = doc("x", "y");
        d.metadata.insert(
            crate::types::META_SOURCE_SIZE.to_string(),
            crate::types::MetadataValue::String((10 * 1024 * 1024).to_string()),
        );
        assert!(file_size_multiplier(&d) < 1.0);
    }

    #[test]
    fn file_size_multiplier_disabled_by_zero_size() {
        let d = doc("x", "y");
        assert_eq!(file_size_multiplier(&d), 1.0);
    }

    #[test]
    fn query_quality_monotonicity() {
        assert!(query_quality_multiplier(MatchType::Phrase) >= query_quality_multiplier(MatchType::AllWords));
        assert!(query_quality_multiplier(MatchType::AllWords) >= query_quality_multiplier(MatchType::Partial));
        assert!(query_quality_multiplier(MatchType::Partial) >= query_quality_multiplier(MatchType::None));
    }

    #[test]
    fn content_scoring_handles_multibyte_content_near_position_threshold() {
        let q = analyze("café");
        // Repeated multi-byte characters push the byte-offset position
        // threshold off a char boundary; this must not panic.
        let content: String = "é".repeat(200);
        let (_score, _match_type) = score_content(&q, &content, None, false);
    }

    #[test]
    fn additivity_breakdown_matches_base_times_multipliers() {
        let ranker = Ranker::new(RankingConfig::default());
        let q = analyze("quarterly report");
        let d = doc("quarterly_report.pdf", "the quarterly report shows growth");
        let breakdown = ranker.rank_with_breakdown(&q, &d, None, false);
        let base = ranker.config.weight_filename * breakdown.filename
            + ranker.config.weight_content * breakdown.content
            + ranker.config.weight_path * breakdown.path
            + ranker.config.weight_metadata * breakdown.metadata;
        let product: f64 = breakdown.multipliers.values().product();
        assert!((breakdown.final_score - base * product).abs() < 1e-9);
    }
}
