//! Edit-distance dictionary lookup ranked by frequency (§4.10).

use std::collections::{HashMap, HashSet};

use crate::types::SpellSuggestions;

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub term: String,
    pub distance: usize,
    pub frequency: u64,
    pub score: f64,
}

pub struct SpellChecker {
    terms: HashSet<String>,
    frequency: HashMap<String, u64>,
    max_distance: usize,
    min_frequency: u64,
    max_suggestions: usize,
    use_damerau: bool,
}

impl SpellChecker {
    /// Build from a term→frequency snapshot (the Keyword Index's term
    /// dictionary). `WithSpellChecker`/`RefreshSpellChecker` on the search
    /// engine call this after bulk indexing (§4.9).
    pub fn new(frequency: HashMap<String, u64>) -> Self {
        let terms = frequency.keys().cloned().collect();
        Self {
            terms,
            frequency,
            max_distance: 2,
            min_frequency: 1,
            max_suggestions: 5,
            use_damerau: false,
        }
    }

    pub fn with_damerau(mut self, enabled: bool) -> Self {
        self.use_damerau = enabled;
        self
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains(&term.to_lowercase())
    }

    fn distance(&self, a: &str, b: &str) -> usize {
        if self.use_damerau {
            strsim::damerau_levenshtein(a, b)
        } else {
            strsim::levenshtein(a, b)
        }
    }

    /// Suggestions for `term`, sorted by `(1/(distance+1)) * frequency`
    /// descending, capped at `max_suggestions`.
    pub fn suggest(&self, term: &str) -> Vec<Suggestion> {
        let term = term.to_lowercase();
        if self.terms.contains(&term) {
            return Vec::new();
        }

        let mut candidates: Vec<Suggestion> = self
            .terms
            .iter()
            .filter(|candidate| {
                (candidate.chars().count() as i64 - term.chars().count() as i64).unsigned_abs() as usize
                    <= self.max_distance
            })
            .filter_map(|candidate| {
                let distance = self.distance(&term, candidate);
                if distance == 0 || distance > self.max_distance {
                    return None;
                }
                let frequency = *self.frequency.get(candidate).unwrap_or(&0);
                if frequency < self.min_frequency {
                    return None;
                }
                Some(Suggestion {
                    term: candidate.clone(),
                    distance,
                    frequency,
                    score: (1.0 / (distance as f64 + 1.0)) * frequency as f64,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.max_suggestions);
        candidates
    }

    /// Tokenize, pass through known terms, substitute unknown terms with
    /// their top suggestion, and report which terms were misspelled.
    pub fn check(&self, query: &str) -> SpellSuggestions {
        let mut corrected_tokens = Vec::new();
        let mut misspelled = Vec::new();
        let mut has_corrections = false;

        for token in query.split_whitespace() {
            let lower = token.to_lowercase();
            if self.terms.contains(&lower) {
                corrected_tokens.push(token.to_string());
                continue;
            }
            misspelled.push(lower.clone());
            match self.suggest(&lower).into_iter().next() {
                Some(top) => {
                    has_corrections = true;
                    corrected_tokens.push(top.term);
                }
                None => corrected_tokens.push(token.to_string()),
            }
        }

        SpellSuggestions {
            original: query.to_string(),
            corrected: corrected_tokens.join(" "),
            has_corrections,
            misspelled_terms: misspelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> HashMap<String, u64> {
        [
            ("report".to_string(), 50u64),
            ("receipt".to_string(), 10),
            ("repost".to_string(), 2),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn known_term_has_no_suggestions() {
        let checker = SpellChecker::new(dictionary());
        assert!(checker.suggest("report").is_empty());
    }

    #[test]
    fn suggests_closest_by_score() {
        let checker = SpellChecker::new(dictionary());
        let suggestions = checker.suggest("reprot");
        assert_eq!(suggestions[0].term, "report");
    }

    #[test]
    fn drops_candidates_beyond_max_distance() {
        let checker = SpellChecker::new(dictionary());
        let suggestions = checker.suggest("zzzzzzzzzz");
        assert!(suggestions.is_empty());
    }

    #[test]
    fn check_corrects_unknown_tokens_and_lists_them() {
        let checker = SpellChecker::new(dictionary());
        let result = checker.check("reprot on revenue");
        assert!(result.has_corrections);
        assert!(result.misspelled_terms.contains(&"reprot".to_string()));
        assert!(result.corrected.contains("report"));
    }

    #[test]
    fn check_passes_through_known_query() {
        let checker = SpellChecker::new(dictionary());
        let result = checker.check("report receipt");
        assert!(!result.has_corrections);
        assert!(result.misspelled_terms.is_empty());
    }
}
