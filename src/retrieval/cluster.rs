//! Advisory theme grouping over candidates.
//!
//! Embedding path: cosine k-means over unit-normalized vectors with
//! deterministic farthest-first seeding. Fallback path: bucket by overlap
//! with the fixed theme vocabulary. Either way failures collapse to
//! "no themes", never to an error.

use serde::Serialize;

use super::vector_math::{dot, normalize};
use super::vocabulary::{contains_term, normalize_for_match, GENERAL_THEME, THEMES};
use super::Candidate;
use crate::llm::EmbeddingProvider;

pub const MIN_EMBEDDINGS: usize = 6;
pub const KMEANS_ITERATIONS: usize = 7;
pub const MAX_THEMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub label: String,
    /// Indices into the candidate list the cluster was built from.
    pub members: Vec<usize>,
}

/// Groups candidate indices by cosine k-means. Returns no groups when fewer
/// than `MIN_EMBEDDINGS` usable vectors are present.
pub fn kmeans_groups(embeddings: &[Option<Vec<f32>>], max_themes: usize) -> Vec<Vec<usize>> {
    let dim = embeddings
        .iter()
        .flatten()
        .find(|v| !v.is_empty())
        .map(Vec::len)
        .unwrap_or(0);

    let points: Vec<(usize, Vec<f32>)> = embeddings
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            let v = v.as_ref()?;
            if v.len() != dim {
                return None;
            }
            normalize(v).map(|unit| (i, unit))
        })
        .collect();

    if points.len() < MIN_EMBEDDINGS {
        return Vec::new();
    }

    let k = (points.len() / 4)
        .max(2)
        .min(max_themes.clamp(1, MAX_THEMES))
        .min(points.len());

    let mut centers = farthest_first(&points, k);
    let mut assignment = vec![0usize; points.len()];

    for _ in 0..KMEANS_ITERATIONS {
        for (slot, (_, point)) in points.iter().enumerate() {
            assignment[slot] = nearest_center(point, &centers);
        }

        let mut sums = vec![vec![0.0f32; dim]; centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for (slot, (_, point)) in points.iter().enumerate() {
            let c = assignment[slot];
            counts[c] += 1;
            for (acc, x) in sums[c].iter_mut().zip(point) {
                *acc += x;
            }
        }
        for (c, sum) in sums.into_iter().enumerate() {
            if counts[c] == 0 {
                continue;
            }
            let mean: Vec<f32> = sum.iter().map(|x| x / counts[c] as f32).collect();
            if let Some(unit) = normalize(&mean) {
                centers[c] = unit;
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); centers.len()];
    for (slot, (index, _)) in points.iter().enumerate() {
        groups[assignment[slot]].push(*index);
    }
    groups.retain(|g| !g.is_empty());
    groups.sort_by(|a, b| b.len().cmp(&a.len()));
    groups
}

fn farthest_first(points: &[(usize, Vec<f32>)], k: usize) -> Vec<Vec<f32>> {
    let mut centers = vec![points[0].1.clone()];
    while centers.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (slot, (_, point)) in points.iter().enumerate() {
            let closest = centers
                .iter()
                .map(|c| 1.0 - dot(c, point))
                .fold(f32::INFINITY, f32::min);
            if best.map_or(true, |(_, d)| closest > d) {
                best = Some((slot, closest));
            }
        }
        match best {
            // Remaining points coincide with existing centers.
            Some((_, distance)) if distance <= 1e-6 => break,
            Some((slot, _)) => centers.push(points[slot].1.clone()),
            None => break,
        }
    }
    centers
}

fn nearest_center(point: &[f32], centers: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let sim = dot(center, point);
        if sim > best_sim {
            best_sim = sim;
            best = i;
        }
    }
    best
}

fn theme_hits(normalized: &str, keywords: &[&str]) -> usize {
    keywords
        .iter()
        .filter(|kw| contains_term(normalized, kw))
        .count()
}

/// Theme label with the most keyword hits across `titles`; "General" when none hit.
pub fn label_for<S: AsRef<str>>(titles: &[S]) -> String {
    let normalized: Vec<String> = titles
        .iter()
        .map(|t| normalize_for_match(t.as_ref()))
        .collect();

    let mut best: Option<(&str, usize)> = None;
    for (label, keywords) in THEMES {
        let hits: usize = normalized.iter().map(|t| theme_hits(t, keywords)).sum();
        if hits > 0 && best.map_or(true, |(_, h)| hits > h) {
            best = Some((label, hits));
        }
    }
    best.map(|(label, _)| label.to_string())
        .unwrap_or_else(|| GENERAL_THEME.to_string())
}

/// Buckets each text into the theme it overlaps most. Texts with no overlap
/// are left out. Buckets are ordered by size.
pub fn keyword_buckets<S: AsRef<str>>(texts: &[S], max_themes: usize) -> Vec<Cluster> {
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); THEMES.len()];
    for (index, text) in texts.iter().enumerate() {
        let normalized = normalize_for_match(text.as_ref());
        let mut best: Option<(usize, usize)> = None;
        for (theme, (_, keywords)) in THEMES.iter().enumerate() {
            let hits = theme_hits(&normalized, keywords);
            if hits > 0 && best.map_or(true, |(_, h)| hits > h) {
                best = Some((theme, hits));
            }
        }
        if let Some((theme, _)) = best {
            buckets[theme].push(index);
        }
    }

    let mut clusters: Vec<Cluster> = buckets
        .into_iter()
        .enumerate()
        .filter(|(_, members)| !members.is_empty())
        .map(|(theme, members)| Cluster {
            label: THEMES[theme].0.to_string(),
            members,
        })
        .collect();
    clusters.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
    clusters.truncate(max_themes.clamp(1, MAX_THEMES));
    clusters
}

/// Clusters `candidates` in place (sets `cluster_id`) and returns the themes.
pub async fn cluster_candidates(
    candidates: &mut [Candidate],
    embedder: &dyn EmbeddingProvider,
    max_themes: usize,
) -> Vec<Cluster> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let texts: Vec<String> = candidates
        .iter()
        .map(|c| format!("{}\n{}", c.document.title, c.snippet))
        .collect();

    let mut clusters = Vec::new();
    if embedder.is_available() && candidates.len() >= MIN_EMBEDDINGS {
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                clusters = kmeans_groups(&vectors, max_themes)
                    .into_iter()
                    .map(|members| {
                        let titles: Vec<&str> = members
                            .iter()
                            .map(|&i| candidates[i].document.title.as_str())
                            .collect();
                        Cluster {
                            label: label_for(&titles),
                            members,
                        }
                    })
                    .collect();
            }
            Err(err) => {
                tracing::warn!("Theme embeddings failed, using keyword buckets: {}", err);
            }
        }
    }

    if clusters.is_empty() {
        clusters = keyword_buckets(&texts, max_themes);
    }

    for candidate in candidates.iter_mut() {
        candidate.cluster_id = None;
    }
    for (cluster_id, cluster) in clusters.iter().enumerate() {
        for &member in &cluster.members {
            if let Some(candidate) = candidates.get_mut(member) {
                candidate.cluster_id = Some(cluster_id);
            }
        }
    }
    tracing::debug!("Grouped {} candidates into {} themes", candidates.len(), clusters.len());
    clusters
}
