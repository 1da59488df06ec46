//! Query tokenization, phrase extraction, negation, and type classification (§4.7).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    SingleWord,
    MultiWord,
    Phrase,
    Wildcard,
    Boolean,
}

#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    pub original: String,
    pub terms: Vec<String>,
    pub phrases: Vec<String>,
    pub negated_terms: Vec<String>,
    pub query_type: QueryType,
    pub has_wildcard: bool,
}

/// Tokenize, extract quoted phrases, strip negation and boolean operators,
/// then classify per the precedence wildcard > boolean > phrase > multi_word
/// > single_word.
pub fn analyze(query: &str) -> AnalyzedQuery {
    let mut phrases = Vec::new();
    let mut negated_terms = Vec::new();
    let mut terms = Vec::new();
    let mut has_wildcard = false;

    for raw_token in split_respecting_quotes(query) {
        if let Some(phrase) = strip_quotes(&raw_token) {
            phrases.push(phrase.to_lowercase());
            continue;
        }

        if raw_token.contains('*') || raw_token.contains('?') {
            has_wildcard = true;
        }

        let upper = raw_token.to_uppercase();
        if upper == "AND" || upper == "OR" || upper == "NOT" {
            continue;
        }

        if let Some(stripped) = raw_token.strip_prefix('-') {
            if !stripped.is_empty() {
                negated_terms.push(normalize_token(stripped));
                continue;
            }
        }

        let normalized = normalize_token(&raw_token);
        if !normalized.is_empty() {
            terms.push(normalized);
        }
    }

    let query_type = if has_wildcard {
        QueryType::Wildcard
    } else if !negated_terms.is_empty() {
        QueryType::Boolean
    } else if !phrases.is_empty() {
        QueryType::Phrase
    } else if terms.len() >= 2 {
        QueryType::MultiWord
    } else {
        QueryType::SingleWord
    };

    AnalyzedQuery {
        original: query.to_string(),
        terms,
        phrases,
        negated_terms,
        query_type,
        has_wildcard,
    }
}

/// Split on whitespace, but keep `"..."`/`'...'` spans as single tokens.
fn split_respecting_quotes(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();
    let mut current = String::new();

    while let Some(&c) = chars.peek() {
        if c == '"' || c == '\'' {
            let quote = c;
            chars.next();
            current.push(quote);
            for c2 in chars.by_ref() {
                current.push(c2);
                if c2 == quote {
                    break;
                }
            }
            tokens.push(std::mem::take(&mut current));
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            chars.next();
        } else {
            current.push(c);
            chars.next();
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn strip_quotes(token: &str) -> Option<&str> {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&token[1..token.len() - 1]);
        }
    }
    None
}

/// Lowercase and trim leading/trailing punctuation, preserving internal
/// hyphens and underscores.
fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_single_word() {
        let q = analyze("invoice");
        assert_eq!(q.query_type, QueryType::SingleWord);
        assert_eq!(q.terms, vec!["invoice"]);
    }

    #[test]
    fn classifies_multi_word() {
        let q = analyze("quarterly revenue report");
        assert_eq!(q.query_type, QueryType::MultiWord);
        assert_eq!(q.terms.len(), 3);
    }

    #[test]
    fn extracts_quoted_phrase() {
        let q = analyze(r#"find "annual report" now"#);
        assert_eq!(q.phrases, vec!["annual report"]);
        assert_eq!(q.query_type, QueryType::Phrase);
    }

    #[test]
    fn negation_strips_dash_and_marks_boolean() {
        let q = analyze("report -draft");
        assert_eq!(q.negated_terms, vec!["draft"]);
        assert_eq!(q.query_type, QueryType::Boolean);
    }

    #[test]
    fn wildcard_takes_precedence_over_everything() {
        let q = analyze(r#"rep*rt -draft "exact phrase""#);
        assert!(q.has_wildcard);
        assert_eq!(q.query_type, QueryType::Wildcard);
    }

    #[test]
    fn bare_boolean_operators_are_discarded() {
        let q = analyze("cats AND dogs OR birds NOT fish");
        assert_eq!(q.terms, vec!["cats", "dogs", "birds", "fish"]);
    }

    #[test]
    fn precedence_boolean_over_phrase() {
        let q = analyze(r#""annual report" -draft"#);
        assert_eq!(q.query_type, QueryType::Boolean);
    }
}
