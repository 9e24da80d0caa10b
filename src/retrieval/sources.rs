//! URL deduplication and citation binding.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{Candidate, Cluster};
use crate::ingest::canonical::canonicalize;

/// Themes consulted when spreading picks across clusters.
const DIVERSIFY_THEMES: usize = 5;

/// A citable source. `index` is the 1-based marker the answer may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub publisher: String,
}

/// `items[i]` is the evidence behind `sources[i]`, cited as `[i + 1]`.
#[derive(Debug, Clone, Default)]
pub struct BoundSources {
    pub items: Vec<Candidate>,
    pub sources: Vec<Source>,
}

impl BoundSources {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn url_key(candidate: &Candidate) -> Option<String> {
    let url = candidate.url();
    if url.is_empty() {
        return None;
    }
    Some(canonicalize(url))
}

/// Picks up to `max_sources` candidates, taking a share from each of the
/// leading clusters before filling from the ranked list.
pub fn select_for_themes(
    candidates: &[Candidate],
    clusters: &[Cluster],
    max_sources: usize,
) -> Vec<Candidate> {
    if clusters.is_empty() {
        return candidates.iter().take(max_sources).cloned().collect();
    }

    let per_cluster = (max_sources / clusters.len().max(1)).max(2);
    let mut used: HashSet<String> = HashSet::new();
    let mut selected = Vec::with_capacity(max_sources);

    for cluster in clusters.iter().take(DIVERSIFY_THEMES) {
        let mut taken = 0;
        for &member in &cluster.members {
            if taken >= per_cluster || selected.len() >= max_sources {
                break;
            }
            let Some(candidate) = candidates.get(member) else {
                continue;
            };
            let Some(key) = url_key(candidate) else {
                continue;
            };
            if used.insert(key) {
                selected.push(candidate.clone());
                taken += 1;
            }
        }
    }

    for candidate in candidates {
        if selected.len() >= max_sources {
            break;
        }
        let Some(key) = url_key(candidate) else {
            continue;
        };
        if used.insert(key) {
            selected.push(candidate.clone());
        }
    }
    selected
}

/// Dedupes by canonical URL (first wins), caps at `cap`, and numbers the
/// survivors from 1.
pub fn bind_sources(candidates: &[Candidate], cap: usize) -> BoundSources {
    let mut seen: HashSet<String> = HashSet::new();
    let mut bound = BoundSources::default();

    for candidate in candidates {
        if bound.items.len() >= cap {
            break;
        }
        let Some(key) = url_key(candidate) else {
            continue;
        };
        if !seen.insert(key) {
            continue;
        }
        let doc = &candidate.document;
        bound.sources.push(Source {
            index: bound.items.len() + 1,
            title: doc.title.trim().to_string(),
            url: candidate.url().to_string(),
            publisher: doc.source.trim().to_string(),
        });
        bound.items.push(candidate.clone());
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Relevance;
    use crate::store::Document;
    use chrono::Utc;

    fn candidate(id: i64, url: &str) -> Candidate {
        Candidate {
            document: Document {
                id,
                title: format!("Story {id}"),
                body: String::new(),
                url: url.to_string(),
                canonical_url: url.to_string(),
                url_hash: format!("h{id}"),
                source: "DCD".to_string(),
                source_type: "rss".to_string(),
                published_at: Some(Utc::now()),
                scraped_at: Utc::now(),
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
    fn bind_dedupes_caps_and_numbers_contiguously() {
        let candidates = vec![
            candidate(1, "https://ex.com/a"),
            candidate(2, "https://EX.com/a?utm_source=feed"),
            candidate(3, ""),
            candidate(4, "https://ex.com/b"),
            candidate(5, "https://ex.com/c"),
            candidate(6, "https://ex.com/d"),
        ];
        let bound = bind_sources(&candidates, 3);

        assert_eq!(bound.len(), 3);
        assert_eq!(bound.items.len(), bound.sources.len());
        let ids: Vec<i64> = bound.items.iter().map(|c| c.document.id).collect();
        assert_eq!(ids, vec![1, 4, 5]);
        let indices: Vec<usize> = bound.sources.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(bound.sources[0].publisher, "DCD");

        let unique: HashSet<&str> = bound.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(unique.len(), bound.sources.len());
    }

    #[test]
    fn theme_selection_draws_from_each_cluster_first() {
        let candidates: Vec<Candidate> = (0..8)
            .map(|i| candidate(i, &format!("https://ex.com/{i}")))
            .collect();
        let clusters = vec![
            Cluster {
                label: "Cooling".into(),
                members: vec![0, 1, 2, 3, 4],
            },
            Cluster {
                label: "Power & grid".into(),
                members: vec![6, 7],
            },
        ];

        let selected = select_for_themes(&candidates, &clusters, 4);
        let ids: Vec<i64> = selected.iter().map(|c| c.document.id).collect();
        assert_eq!(ids, vec![0, 1, 6, 7]);
    }

    #[test]
    fn theme_selection_fills_from_ranked_list() {
        let candidates: Vec<Candidate> = (0..6)
            .map(|i| candidate(i, &format!("https://ex.com/{i}")))
            .collect();
        let clusters = vec![Cluster {
            label: "Demand".into(),
            members: vec![5, 99],
        }];
        let selected = select_for_themes(&candidates, &clusters, 4);
        let ids: Vec<i64> = selected.iter().map(|c| c.document.id).collect();
        assert_eq!(ids, vec![5, 0, 1, 2]);

        assert_eq!(select_for_themes(&candidates, &[], 2).len(), 2);
    }
}
