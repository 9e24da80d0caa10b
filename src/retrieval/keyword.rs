//! Keyword fallback ranking used when semantic search is unavailable.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::vocabulary::{
    contains_term, detect_markets, detect_units, normalize_for_match, DOMAIN_SIGNALS, STOPWORDS,
    TOPIC_SYNONYMS,
};
use crate::store::Document;

const TITLE_WEIGHT: f32 = 5.0;
const BODY_WEIGHT: f32 = 1.0;
const DOMAIN_TITLE_BONUS: f32 = 3.0;
const LOCATION_BONUS: f32 = 8.0;
const LOCATION_PENALTY: f32 = 4.0;

/// A query reduced to match terms plus any location constraint it carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordQuery {
    pub terms: Vec<String>,
    pub location_terms: Vec<String>,
}

impl KeywordQuery {
    pub fn parse(query: &str) -> Self {
        let normalized = normalize_for_match(query);
        let mut terms: BTreeSet<String> = BTreeSet::new();

        for token in normalized.split_whitespace() {
            if token.chars().count() < 2 || STOPWORDS.contains(&token) {
                continue;
            }
            terms.insert(token.to_string());
            if let Some((_, synonyms)) = TOPIC_SYNONYMS.iter().find(|(key, _)| *key == token) {
                terms.extend(synonyms.iter().map(|s| s.to_string()));
            }
        }

        for group in detect_units(query) {
            terms.extend(group.iter().map(|s| s.to_string()));
        }

        let mut location_terms: BTreeSet<String> = BTreeSet::new();
        for market in detect_markets(query) {
            location_terms.extend(market.terms.iter().map(|s| s.to_string()));
        }
        terms.extend(location_terms.iter().cloned());

        Self {
            terms: terms.into_iter().collect(),
            location_terms: location_terms.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn has_location_hint(&self) -> bool {
        !self.location_terms.is_empty()
    }

    pub fn score(&self, doc: &Document) -> f32 {
        let title = normalize_for_match(&doc.title);
        let body = normalize_for_match(&doc.body);

        let title_hits = self
            .terms
            .iter()
            .filter(|term| contains_term(&title, term))
            .count() as f32;
        let body_hits = self
            .terms
            .iter()
            .filter(|term| contains_term(&body, term))
            .count() as f32;

        let mut score = TITLE_WEIGHT * title_hits + BODY_WEIGHT * body_hits;
        if score <= 0.0 {
            return 0.0;
        }

        if DOMAIN_SIGNALS.iter().any(|signal| contains_term(&title, signal)) {
            score += DOMAIN_TITLE_BONUS;
        }

        if self.has_location_hint() {
            let mentions_location = self
                .location_terms
                .iter()
                .any(|term| contains_term(&title, term) || contains_term(&body, term));
            if mentions_location {
                score += LOCATION_BONUS;
            } else {
                score -= LOCATION_PENALTY;
            }
        }

        score
    }
}

/// Scores `docs` and returns the top `k` with positive scores,
/// ordered by score then recency.
pub fn rank(query: &KeywordQuery, docs: Vec<Document>, k: usize) -> Vec<(Document, f32)> {
    if query.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(Document, f32)> = docs
        .into_iter()
        .filter_map(|doc| {
            let score = query.score(&doc);
            (score > 0.0).then_some((doc, score))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.0.published_at.cmp(&a.0.published_at))
            .then_with(|| b.0.id.cmp(&a.0.id))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn doc(id: i64, title: &str, body: &str, days_ago: i64) -> Document {
        Document {
            id,
            title: title.to_string(),
            body: body.to_string(),
            url: format!("https://ex.com/{id}"),
            canonical_url: format!("https://ex.com/{id}"),
            url_hash: format!("hash-{id}"),
            source: "Test".to_string(),
            source_type: "rss".to_string(),
            published_at: Some(Utc::now() - Duration::days(days_ago)),
            scraped_at: Utc::now(),
            author: None,
            relevance_score: 6.0,
            tags: Vec::new(),
            has_embedding: false,
            embedding_id: None,
        }
    }

    #[test]
    fn parse_drops_stopwords_and_expands_synonyms() {
        let q = KeywordQuery::parse("What is the latest on cooling?");
        assert!(q.terms.contains(&"cooling".to_string()));
        assert!(q.terms.contains(&"immersion".to_string()));
        assert!(!q.terms.contains(&"what".to_string()));
        assert!(!q.has_location_hint());
    }

    #[test]
    fn parse_detects_location_and_units() {
        let q = KeywordQuery::parse("100 MW deals in Ashburn");
        assert!(q.has_location_hint());
        assert!(q.location_terms.contains(&"loudoun".to_string()));
        assert!(q.terms.contains(&"megawatt".to_string()));
    }

    #[test]
    fn title_hits_outweigh_body_hits() {
        let q = KeywordQuery::parse("substation");
        let in_title = doc(1, "Substation approved", "", 1);
        let in_body = doc(2, "County meeting", "A substation was approved.", 1);
        assert!(q.score(&in_title) > q.score(&in_body));
        assert!(q.score(&in_body) > 0.0);
    }

    #[test]
    fn location_hint_rewards_matching_documents() {
        let q = KeywordQuery::parse("power constraints in northern virginia");
        let local = doc(1, "Power constraints in Loudoun", "", 1);
        let elsewhere = doc(2, "Power constraints in Ohio", "", 1);
        assert!(q.score(&local) > q.score(&elsewhere) + 10.0);
    }

    #[test]
    fn rank_orders_by_score_then_recency_and_drops_misses() {
        let q = KeywordQuery::parse("liquid cooling");
        let docs = vec![
            doc(1, "Liquid cooling pilot", "", 10),
            doc(2, "Liquid cooling rollout", "", 1),
            doc(3, "Quarterly earnings", "nothing relevant", 1),
            doc(4, "Cooling", "", 1),
        ];
        let ranked = rank(&q, docs, 10);
        let ids: Vec<i64> = ranked.iter().map(|(d, _)| d.id).collect();
        assert_eq!(ids, vec![2, 1, 4]);
    }

    #[test]
    fn query_of_only_stopwords_matches_nothing() {
        let q = KeywordQuery::parse("what is the");
        assert!(q.is_empty());
        assert!(rank(&q, vec![doc(1, "What is the plan", "", 1)], 5).is_empty());
    }
}
