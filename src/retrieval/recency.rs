//! Time-window and unit/location constraint narrowing.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;

use super::vocabulary::{contains_term, detect_markets, detect_units, normalize_for_match};
use super::Candidate;
use crate::core::config::settings::RetrievalSettings;

#[derive(Debug, Clone)]
pub struct RecencyPolicy {
    pub default_window_days: i64,
    pub widen_to_days: i64,
    pub min_viable_results: usize,
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        Self {
            default_window_days: 14,
            widen_to_days: 30,
            min_viable_results: 4,
        }
    }
}

impl From<&RetrievalSettings> for RecencyPolicy {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            default_window_days: settings.default_window_days,
            widen_to_days: settings.widen_to_days,
            min_viable_results: settings.min_viable_results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecencyOutcome {
    #[serde(skip)]
    pub kept: Vec<Candidate>,
    pub window_days: i64,
    pub coverage_thin: bool,
    pub widened_to_days: Option<i64>,
}

/// Candidates published within `[now - window_days, now]`. Undated documents are dropped.
pub fn filter_window(candidates: &[Candidate], window_days: i64, now: DateTime<Utc>) -> Vec<Candidate> {
    let start = now - Duration::days(window_days.max(0));
    candidates
        .iter()
        .filter(|c| match c.document.published_at {
            Some(published) => published >= start && published <= now,
            None => false,
        })
        .cloned()
        .collect()
}

impl RecencyPolicy {
    /// Applies the window; when it leaves too few results and the caller did
    /// not ask for a specific window, widens once and flags thin coverage.
    pub fn apply(
        &self,
        candidates: &[Candidate],
        requested_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> RecencyOutcome {
        let explicit = requested_days.is_some();
        let window_days = requested_days.unwrap_or(self.default_window_days).max(1);
        let kept = filter_window(candidates, window_days, now);

        if explicit || kept.len() >= self.min_viable_results {
            return RecencyOutcome {
                kept,
                window_days,
                coverage_thin: false,
                widened_to_days: None,
            };
        }

        let widened = self.widen_to_days.max(window_days);
        tracing::debug!(
            "Only {} candidates within {} days; widening to {}",
            kept.len(),
            window_days,
            widened
        );
        RecencyOutcome {
            kept: filter_window(candidates, widened, now),
            window_days: widened,
            coverage_thin: true,
            widened_to_days: Some(widened),
        }
    }
}

fn window_patterns() -> &'static [(Regex, i64)] {
    static PATTERNS: OnceLock<Vec<(Regex, i64)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"\b(today|todays|today's|last 24 hours|past 24 hours)\b", 1),
            (r"\byesterday\b", 2),
            (r"\b(this|past|last)\s+week\b", 7),
            (r"\b(this|past|last)\s+month\b", 30),
            (r"\b(this|past|last)\s+quarter\b", 90),
            (r"\b(this|past|last)\s+year\b", 365),
        ]
        .into_iter()
        .filter_map(|(pattern, days)| Regex::new(pattern).ok().map(|re| (re, days)))
        .collect()
    })
}

fn counted_window() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b(?:last|past|previous)\s+(\d{1,3})\s+(day|days|week|weeks|month|months)\b").ok())
        .as_ref()
}

/// Window the user asked for in words ("this week", "last 10 days"), if any.
pub fn detect_requested_window(query: &str) -> Option<i64> {
    let lowered = query.to_lowercase();

    if let Some(re) = counted_window() {
        if let Some(caps) = re.captures(&lowered) {
            let count: i64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str();
            let days = if unit.starts_with("week") {
                count * 7
            } else if unit.starts_with("month") {
                count * 30
            } else {
                count
            };
            return Some(days.clamp(1, 3_650));
        }
    }

    window_patterns()
        .iter()
        .find(|(re, _)| re.is_match(&lowered))
        .map(|(_, days)| *days)
}

/// Narrows to candidates mentioning the query's location and unit
/// constraints. A constraint that would remove everything is not applied.
pub fn apply_constraints(candidates: Vec<Candidate>, query: &str) -> Vec<Candidate> {
    let mut current = candidates;

    let location_terms: Vec<&str> = detect_markets(query)
        .iter()
        .flat_map(|market| market.terms.iter().copied())
        .collect();
    if !location_terms.is_empty() {
        current = narrow(current, &location_terms);
    }

    let unit_terms: Vec<&str> = detect_units(query)
        .iter()
        .flat_map(|group| group.iter().copied())
        .collect();
    if !unit_terms.is_empty() {
        current = narrow(current, &unit_terms);
    }

    current
}

fn narrow(candidates: Vec<Candidate>, terms: &[&str]) -> Vec<Candidate> {
    let matches = |c: &Candidate| {
        let text = normalize_for_match(&format!("{} {}", c.document.title, c.document.body));
        terms.iter().any(|t| contains_term(&text, t) || mentions_glued_unit(&text, t))
    };
    if candidates.iter().any(matches) {
        candidates.into_iter().filter(|c| matches(c)).collect()
    } else {
        candidates
    }
}

fn mentions_glued_unit(normalized: &str, unit: &str) -> bool {
    normalized.split_whitespace().any(|word| {
        word.len() > unit.len()
            && word.ends_with(unit)
            && word[..word.len() - unit.len()]
                .chars()
                .all(|c| c.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Relevance;
    use crate::store::Document;

    fn candidate(id: i64, title: &str, days_ago: Option<i64>, now: DateTime<Utc>) -> Candidate {
        Candidate {
            document: Document {
                id,
                title: title.to_string(),
                body: String::new(),
                url: format!("https://ex.com/{id}"),
                canonical_url: format!("https://ex.com/{id}"),
                url_hash: format!("h{id}"),
                source: "Test".to_string(),
                source_type: "rss".to_string(),
                published_at: days_ago.map(|d| now - Duration::days(d)),
                scraped_at: now,
                author: None,
                relevance_score: 6.0,
                tags: Vec::new(),
                has_embedding: false,
                embedding_id: None,
            },
            snippet: String::new(),
            relevance: Relevance::Keyword(1.0),
            cluster_id: None,
        }
    }

    #[test]
    fn window_keeps_only_recent_dated_documents() {
        let now = Utc::now();
        let candidates = vec![
            candidate(1, "a", Some(1), now),
            candidate(2, "b", Some(6), now),
            candidate(3, "c", Some(9), now),
            candidate(4, "d", None, now),
        ];
        let kept = filter_window(&candidates, 7, now);
        let ids: Vec<i64> = kept.iter().map(|c| c.document.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn sparse_default_window_widens_once() {
        let now = Utc::now();
        let policy = RecencyPolicy {
            default_window_days: 7,
            widen_to_days: 30,
            min_viable_results: 4,
        };
        let candidates = vec![
            candidate(1, "a", Some(1), now),
            candidate(2, "b", Some(20), now),
            candidate(3, "c", Some(25), now),
            candidate(4, "d", Some(90), now),
        ];

        let outcome = policy.apply(&candidates, None, now);
        assert!(outcome.coverage_thin);
        assert_eq!(outcome.widened_to_days, Some(30));
        assert_eq!(outcome.window_days, 30);
        assert_eq!(outcome.kept.len(), 3);
    }

    #[test]
    fn explicit_window_is_never_widened() {
        let now = Utc::now();
        let policy = RecencyPolicy::default();
        let candidates = vec![
            candidate(1, "a", Some(1), now),
            candidate(2, "b", Some(20), now),
        ];
        let outcome = policy.apply(&candidates, Some(7), now);
        assert!(!outcome.coverage_thin);
        assert_eq!(outcome.widened_to_days, None);
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn enough_results_do_not_widen() {
        let now = Utc::now();
        let policy = RecencyPolicy::default();
        let candidates: Vec<Candidate> =
            (1..=5).map(|i| candidate(i, "x", Some(i), now)).collect();
        let outcome = policy.apply(&candidates, None, now);
        assert!(!outcome.coverage_thin);
        assert_eq!(outcome.window_days, 14);
        assert_eq!(outcome.kept.len(), 5);
    }

    #[test]
    fn requested_windows_are_detected() {
        assert_eq!(detect_requested_window("What happened today?"), Some(1));
        assert_eq!(detect_requested_window("deals this week"), Some(7));
        assert_eq!(detect_requested_window("news from the last 10 days"), Some(10));
        assert_eq!(detect_requested_window("past 2 weeks of permits"), Some(14));
        assert_eq!(detect_requested_window("cooling over the past month"), Some(30));
        assert_eq!(detect_requested_window("liquid cooling trends"), None);
    }

    #[test]
    fn constraints_narrow_only_when_something_matches() {
        let now = Utc::now();
        let candidates = vec![
            candidate(1, "Ashburn campus adds 300MW", Some(1), now),
            candidate(2, "Ohio land deal", Some(1), now),
        ];
        let narrowed = apply_constraints(candidates.clone(), "MW projects in northern virginia");
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].document.id, 1);

        let untouched = apply_constraints(candidates, "projects in Phoenix");
        assert_eq!(untouched.len(), 2);
    }
}
