//! Post-synthesis cleanup: citation markers must point into the bound
//! source list, and sources never appear inline as prose or raw links.

use std::sync::OnceLock;

use regex::{Captures, Regex};

struct Patterns {
    marker: Regex,
    markdown_link: Regex,
    raw_url: Regex,
    space_before_punct: Regex,
    inner_spaces: Regex,
    blank_lines: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                marker: Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").ok()?,
                markdown_link: Regex::new(r"\[([^\]]*)\]\(\s*https?://[^)]*\)").ok()?,
                raw_url: Regex::new(r"<?https?://[^\s)\]>]+>?").ok()?,
                space_before_punct: Regex::new(r"[ \t]+([.,;:!?])").ok()?,
                inner_spaces: Regex::new(r"(\S)[ \t]{2,}").ok()?,
                blank_lines: Regex::new(r"\n{3,}").ok()?,
            })
        })
        .as_ref()
}

/// Cleans synthesized text against a source list of `max_index` entries.
pub fn validate(text: &str, max_index: usize) -> String {
    let without_section = strip_sources_section(text);
    let Some(p) = patterns() else {
        return without_section.trim().to_string();
    };

    let delinked = p
        .markdown_link
        .replace_all(&without_section, |caps: &Captures| {
            let label = caps.get(1).map_or("", |m| m.as_str());
            if label.trim().chars().all(|c| c.is_ascii_digit()) && !label.trim().is_empty() {
                format!("[{}]", label.trim())
            } else {
                label.to_string()
            }
        });
    let no_urls = p.raw_url.replace_all(&delinked, "");

    let cited = p.marker.replace_all(&no_urls, |caps: &Captures| {
        let inner = caps.get(1).map_or("", |m| m.as_str());
        let valid: Vec<&str> = inner
            .split(',')
            .map(str::trim)
            .filter(|n| {
                n.parse::<usize>()
                    .map(|n| n >= 1 && n <= max_index)
                    .unwrap_or(false)
            })
            .collect();
        if valid.is_empty() {
            String::new()
        } else {
            valid
                .iter()
                .map(|n| format!("[{}]", n))
                .collect::<String>()
        }
    });

    let tidy = p.space_before_punct.replace_all(&cited, "$1");
    let tidy = p.inner_spaces.replace_all(&tidy, "$1 ");
    let tidy: String = tidy
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    p.blank_lines.replace_all(&tidy, "\n\n").trim().to_string()
}

fn is_sources_heading(line: &str) -> bool {
    let stripped = line
        .trim()
        .trim_start_matches(|c: char| c == '#' || c == '*' || c == '_' || c.is_whitespace())
        .to_lowercase();
    let head: String = stripped
        .chars()
        .take_while(|c| c.is_alphabetic() || *c == ' ')
        .collect();
    let head = head.trim();
    let rest = stripped[head.len()..]
        .trim_start_matches(|c: char| c == '*' || c == '_' || c.is_whitespace());
    let is_label = matches!(head, "sources" | "source list" | "references" | "citations");
    is_label && (rest.is_empty() || rest.starts_with(':'))
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Removes any "Sources:" / "References" block up to the next heading.
pub fn strip_sources_section(text: &str) -> String {
    let mut out = Vec::new();
    let mut skipping = false;
    for line in text.lines() {
        if is_sources_heading(line) {
            skipping = true;
            continue;
        }
        if skipping {
            if is_heading(line) {
                skipping = false;
            } else {
                continue;
            }
        }
        out.push(line);
    }
    out.join("\n")
}
