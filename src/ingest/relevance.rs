//! Keyword-tier relevance scoring for incoming documents.
//!
//! The vocabulary is plain data: it ships with built-in tiers and can be
//! replaced by a YAML file (`relevance.vocabulary_path`).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

pub const DATA_CENTER_TAG: &str = "data-center";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedPhrase {
    pub phrase: String,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTier {
    pub weight: f32,
    #[serde(default)]
    pub phrases: Vec<TaggedPhrase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceVocabulary {
    /// Phrases that on their own mark a document as on-topic.
    pub high: KeywordTier,
    /// Topic keywords; they add score and tags but never admit a document alone.
    pub medium: KeywordTier,
    /// Operators, developers and hyperscalers.
    pub company: KeywordTier,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default = "default_ceiling")]
    pub score_ceiling: f32,
}

fn default_ceiling() -> f32 {
    25.0
}

fn tagged(entries: &[(&str, &str)]) -> Vec<TaggedPhrase> {
    entries
        .iter()
        .map(|(phrase, tag)| TaggedPhrase {
            phrase: phrase.to_string(),
            tag: if tag.is_empty() {
                None
            } else {
                Some(tag.to_string())
            },
        })
        .collect()
}

impl Default for RelevanceVocabulary {
    fn default() -> Self {
        Self {
            high: KeywordTier {
                weight: 6.0,
                phrases: tagged(&[
                    ("data center", DATA_CENTER_TAG),
                    ("data centre", DATA_CENTER_TAG),
                    ("data-center", DATA_CENTER_TAG),
                    ("data-centre", DATA_CENTER_TAG),
                    ("datacenter", DATA_CENTER_TAG),
                    ("colocation", "colocation"),
                    ("colo facility", "colocation"),
                    ("hyperscale", "hyperscale"),
                    ("edge data center", "edge"),
                ]),
            },
            medium: KeywordTier {
                weight: 2.0,
                phrases: tagged(&[
                    ("substation", "power"),
                    ("transformer", "power"),
                    ("power grid", "power"),
                    ("megawatt", "power"),
                    ("power purchase agreement", "power"),
                    ("interconnection queue", "power"),
                    ("generator", "power"),
                    ("liquid cooling", "cooling"),
                    ("immersion cooling", "cooling"),
                    ("chiller", "cooling"),
                    ("cooling", "cooling"),
                    ("heat reuse", "cooling"),
                    ("tier iii", "design"),
                    ("tier iv", "design"),
                    ("uptime institute", "design"),
                    ("outage", "operations"),
                    ("downtime", "operations"),
                    ("pue", "sustainability"),
                    ("renewable", "sustainability"),
                    ("water usage", "sustainability"),
                    ("carbon", "sustainability"),
                    ("gpu", "hardware"),
                    ("nvidia", "hardware"),
                    ("server rack", "hardware"),
                    ("fiber", "networking"),
                    ("interconnect", "networking"),
                    ("campus", "real-estate"),
                    ("rezoning", "real-estate"),
                    ("zoning", "real-estate"),
                    ("permitting", "real-estate"),
                    ("acres", "real-estate"),
                    ("availability zone", "cloud"),
                    ("cloud region", "cloud"),
                ]),
            },
            company: KeywordTier {
                weight: 3.0,
                phrases: tagged(&[
                    ("equinix", "operators"),
                    ("digital realty", "operators"),
                    ("coreweave", "operators"),
                    ("cyrusone", "operators"),
                    ("qts data", "operators"),
                    ("vantage data centers", "operators"),
                    ("aligned data centers", "operators"),
                    ("stack infrastructure", "operators"),
                    ("iron mountain data", "operators"),
                    ("compass datacenters", "operators"),
                    ("edgeconnex", "operators"),
                    ("switch data", "operators"),
                    ("amazon web services", "hyperscalers"),
                    ("microsoft azure", "hyperscalers"),
                    ("google cloud", "hyperscalers"),
                    ("oracle cloud", "hyperscalers"),
                ]),
            },
            exclusions: vec![
                "recipe".to_string(),
                "horoscope".to_string(),
                "celebrity".to_string(),
                "fantasy football".to_string(),
                "box office".to_string(),
            ],
            score_ceiling: default_ceiling(),
        }
    }
}

impl RelevanceVocabulary {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path).map_err(ApiError::internal)?;
        serde_yaml::from_str(&contents).map_err(|e| {
            ApiError::Validation(format!(
                "Invalid relevance vocabulary {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Loads the override file when configured, otherwise the built-in tiers.
    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::from_yaml_file(path) {
                Ok(vocabulary) => vocabulary,
                Err(err) => {
                    tracing::warn!("Falling back to built-in relevance vocabulary: {}", err);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceOutcome {
    pub score: f32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelevanceGate {
    vocabulary: RelevanceVocabulary,
}

impl Default for RelevanceGate {
    fn default() -> Self {
        Self::new(RelevanceVocabulary::default())
    }
}

impl RelevanceGate {
    pub fn new(mut vocabulary: RelevanceVocabulary) -> Self {
        for tier in [
            &mut vocabulary.high,
            &mut vocabulary.medium,
            &mut vocabulary.company,
        ] {
            for entry in tier.phrases.iter_mut() {
                entry.phrase = normalize(&entry.phrase);
            }
            tier.phrases.retain(|entry| !entry.phrase.is_empty());
        }
        vocabulary.exclusions = vocabulary
            .exclusions
            .iter()
            .map(|e| normalize(e))
            .filter(|e| !e.is_empty())
            .collect();
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &RelevanceVocabulary {
        &self.vocabulary
    }

    /// Scores title+body and merges derived tags after `existing_tags`.
    pub fn score(&self, title: &str, body: &str, existing_tags: &[String]) -> RelevanceOutcome {
        let text = format!("{} {}", normalize(title), normalize(body));

        if self.is_excluded(&text) {
            return RelevanceOutcome {
                score: 0.0,
                tags: merge_tags(existing_tags, &[]),
            };
        }

        let mut score = 0.0f32;
        let mut derived: Vec<String> = Vec::new();
        let mut seen_phrases: HashSet<&str> = HashSet::new();

        for tier in [
            &self.vocabulary.high,
            &self.vocabulary.medium,
            &self.vocabulary.company,
        ] {
            for entry in &tier.phrases {
                if !seen_phrases.insert(entry.phrase.as_str()) {
                    continue;
                }
                if text.contains(entry.phrase.as_str()) {
                    score += tier.weight;
                    if let Some(tag) = &entry.tag {
                        derived.push(tag.clone());
                    }
                }
            }
        }

        RelevanceOutcome {
            score: score.min(self.vocabulary.score_ceiling),
            tags: merge_tags(existing_tags, &derived),
        }
    }

    /// Stricter query-time guardrail: needs a high or company match and no exclusion.
    pub fn is_allowed(&self, title: &str, body: &str) -> bool {
        let text = format!("{} {}", normalize(title), normalize(body));
        if self.is_excluded(&text) {
            return false;
        }
        self.vocabulary
            .high
            .phrases
            .iter()
            .chain(self.vocabulary.company.phrases.iter())
            .any(|entry| text.contains(entry.phrase.as_str()))
    }

    fn is_excluded(&self, text: &str) -> bool {
        self.vocabulary
            .exclusions
            .iter()
            .any(|exclusion| text.contains(exclusion.as_str()))
    }
}

/// Curated feeds are admitted regardless of score.
pub fn is_curated_source(source_type: &str) -> bool {
    matches!(
        source_type.trim().to_ascii_lowercase().as_str(),
        "rss" | "newsletter" | "web" | "manual"
    )
}

/// Ingestion threshold by source type.
pub fn passes_threshold(source_type: &str, score: f32, social_min_score: f32) -> bool {
    is_curated_source(source_type) || score >= social_min_score
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn merge_tags(existing: &[String], derived: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for tag in existing.iter().chain(derived.iter()) {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            merged.push(trimmed.to_string());
        }
    }
    merged
}
