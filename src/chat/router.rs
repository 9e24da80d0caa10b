//! Cheap intent check run before retrieval.

use crate::retrieval::vocabulary::{
    contains_term, detect_markets, detect_units, normalize_for_match, DOMAIN_SIGNALS, STOPWORDS,
    THEMES, TOPIC_SYNONYMS,
};

pub const CLARIFYING_QUESTION: &str = "Quick clarifier: which topic, market or time frame should I focus on? For example: \"power constraints in Northern Virginia this month\" or \"recent hyperscale land deals in Phoenix\".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Retrieve,
    Clarify(String),
}

fn content_terms(query: &str) -> Vec<String> {
    normalize_for_match(query)
        .split_whitespace()
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn has_domain_hint(query: &str) -> bool {
    let normalized = normalize_for_match(query);
    let vocabulary_hit = TOPIC_SYNONYMS
        .iter()
        .map(|(key, _)| *key)
        .chain(DOMAIN_SIGNALS.iter().copied())
        .chain(THEMES.iter().flat_map(|(_, keywords)| keywords.iter().copied()))
        .any(|term| contains_term(&normalized, term));
    vocabulary_hit || !detect_markets(query).is_empty() || !detect_units(query).is_empty()
}

/// Asks one clarifying question when the query gives retrieval nothing to
/// work with. Short follow-ups are allowed once a conversation has history.
pub fn route(query: &str, has_history: bool) -> Route {
    let terms = content_terms(query);
    if terms.is_empty() {
        return Route::Clarify(CLARIFYING_QUESTION.to_string());
    }
    if terms.len() == 1 && !has_history && !has_domain_hint(query) {
        return Route::Clarify(CLARIFYING_QUESTION.to_string());
    }
    Route::Retrieve
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_filler_queries_get_a_clarifier() {
        assert!(matches!(route("What's new?", false), Route::Clarify(_)));
        assert!(matches!(route("hello", false), Route::Clarify(_)));
        assert!(matches!(route("?", true), Route::Clarify(_)));
    }

    #[test]
    fn domain_terms_go_straight_to_retrieval() {
        assert_eq!(route("cooling", false), Route::Retrieve);
        assert_eq!(route("Ashburn", false), Route::Retrieve);
        assert_eq!(route("300MW", false), Route::Retrieve);
        assert_eq!(route("Which operators bought land in Ohio?", false), Route::Retrieve);
    }

    #[test]
    fn follow_ups_rely_on_history() {
        assert!(matches!(route("Equinix?", false), Route::Clarify(_)));
        assert_eq!(route("Equinix?", true), Route::Retrieve);
    }
}
