//! Splits article bodies into overlapping, embedding-sized chunks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum chunk size in characters
    pub max_chars: usize,
    /// Characters shared between consecutive chunks
    pub overlap_chars: usize,
    /// Maximum chunks produced per document
    pub max_chunks: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap_chars: 200,
            max_chunks: 8,
        }
    }
}

impl ChunkConfig {
    fn normalized(&self) -> Self {
        let max_chars = self.max_chars.max(200);
        let overlap_chars = if self.overlap_chars >= max_chars {
            max_chars / 4
        } else {
            self.overlap_chars
        };
        Self {
            max_chars,
            overlap_chars,
            max_chunks: self.max_chunks.max(1),
        }
    }
}

/// Splits `text` into at most `max_chunks` chunks, cutting near a sentence
/// end or a space when one falls inside the tail of the window.
pub fn split_into_chunks(text: &str, config: &ChunkConfig) -> Vec<String> {
    let config = config.normalized();
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    let total_chars = chars.len();

    if total_chars == 0 {
        return Vec::new();
    }
    if total_chars <= config.max_chars {
        return vec![normalized];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total_chars && chunks.len() < config.max_chunks {
        let mut end = (start + config.max_chars).min(total_chars);

        if end < total_chars {
            end = find_cut(&chars, start, end);
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= total_chars {
            break;
        }

        let next = end.saturating_sub(config.overlap_chars);
        start = if next <= start { end } else { next };
    }

    chunks
}

/// Looks back over the last 250 chars of the window for ". " then " ".
fn find_cut(chars: &[char], start: usize, end: usize) -> usize {
    let window_start = (start + 200).max(end.saturating_sub(250)).min(end);
    let window = &chars[window_start..end];

    let last_period = window
        .windows(2)
        .rposition(|pair| pair[0] == '.' && pair[1] == ' ');
    if let Some(pos) = last_period {
        return window_start + pos + 2;
    }
    if let Some(pos) = window.iter().rposition(|c| *c == ' ') {
        if pos > 0 {
            return window_start + pos + 1;
        }
    }
    end
}
