//! Prompt assembly for answer synthesis.

use std::sync::OnceLock;

use regex::Regex;

use crate::memory::MemoryContext;
use crate::retrieval::{Candidate, Cluster};
use crate::store::Role;

pub const CHAT_SYSTEM_PROMPT: &str = "You are an expert data center industry analyst. Answer using only the numbered sources provided. \
Cover construction and expansion, deals and capital, power and cooling, permitting and markets as relevant. \
Be specific with companies, locations, capacity (MW) and dates when the sources state them. \
Cite sources inline as [n] using only the numbers given. \
Do not include URLs and do not add a sources or references section. \
If the sources do not fully answer the question, say so and share what is available.";

pub const DEFAULT_AUDIENCE: &str = "DC_RE";

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https?://\S+").ok()).as_ref()
}

fn mask_links(text: &str) -> String {
    match url_pattern() {
        Some(re) => re.replace_all(text, "[link]").into_owned(),
        None => text.to_string(),
    }
}

/// Numbered evidence blocks; block `i` is cited as `[i]`.
pub fn build_context(items: &[Candidate], max_chars: usize) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let doc = &item.document;
            let published = doc
                .published_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let content = if item.snippet.trim().is_empty() {
                doc.body.as_str()
            } else {
                item.snippet.as_str()
            };
            let content: String = mask_links(content).chars().take(max_chars).collect();
            format!(
                "[Source {}]\nTitle: {}\nPublisher: {}\nPublished: {}\nContent: {}",
                i + 1,
                doc.title.trim(),
                doc.source.trim(),
                published,
                content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One line per theme listing the citation numbers that belong to it.
pub fn theme_hints(items: &[Candidate], clusters: &[Cluster]) -> String {
    clusters
        .iter()
        .enumerate()
        .filter_map(|(cluster_id, cluster)| {
            let cited: Vec<String> = items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.cluster_id == Some(cluster_id))
                .map(|(i, _)| format!("[{}]", i + 1))
                .collect();
            if cited.is_empty() {
                None
            } else {
                Some(format!("- {}: {}", cluster.label, cited.join(" ")))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ChatPromptInput<'a> {
    pub query: &'a str,
    pub audience: &'a str,
    pub memory: &'a MemoryContext,
    pub context: &'a str,
    pub themes: &'a str,
    pub window_days: i64,
    pub coverage_thin: bool,
}

pub fn chat_user_prompt(input: &ChatPromptInput<'_>) -> String {
    let mut sections = Vec::new();

    if !input.memory.summary.trim().is_empty() {
        sections.push(format!(
            "Conversation memory:\n{}",
            input.memory.summary.trim()
        ));
    }
    if !input.memory.recent.is_empty() {
        let recent = input
            .memory
            .recent
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", speaker, mask_links(m.content.trim()))
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Recent messages:\n{}", recent));
    }

    sections.push(format!("Audience: {}", input.audience));
    let mut window = format!("Coverage window: last {} days.", input.window_days);
    if input.coverage_thin {
        window.push_str(" Coverage was thin, so the window was widened; say that recent coverage is limited.");
    }
    sections.push(window);

    if !input.themes.trim().is_empty() {
        sections.push(format!("Themes:\n{}", input.themes.trim()));
    }
    sections.push(format!("Sources:\n{}", input.context));
    sections.push(format!(
        "Question: {}\n\nAnswer concisely and cite the supporting sources as [n].",
        input.query.trim()
    ));

    sections.join("\n\n")
}
