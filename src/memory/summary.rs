//! Transcript rendering and summary text shaping.

use crate::llm::CompletionRequest;
use crate::store::{Message, Role};

const SUMMARY_SYSTEM_PROMPT: &str = "You maintain the running memory of a conversation between a user and a data center industry analyst assistant. Reply with the updated memory only.";

pub const SUMMARY_MAX_TOKENS: u32 = 400;
pub const SUMMARY_TEMPERATURE: f32 = 0.2;

pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn summary_request(previous: &str, transcript: &str) -> CompletionRequest {
    let previous = if previous.trim().is_empty() {
        "(none)"
    } else {
        previous.trim()
    };
    let user_prompt = format!(
        "Existing memory:\n{previous}\n\nOlder turns to fold in:\n{transcript}\n\n\
         Rewrite the memory as short bullet points covering the user's goals, preferences, \
         entities (companies, markets, projects) and constraints. Keep facts from the existing \
         memory that still apply. Do not include URLs. Do not add anything that is not stated above."
    );
    CompletionRequest::new(SUMMARY_SYSTEM_PROMPT, user_prompt)
        .with_limits(SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE)
}

/// Drops URL-looking words and trims to `max_chars`.
pub fn clean_summary(text: &str, max_chars: usize) -> String {
    let cleaned = text
        .lines()
        .map(|line| {
            line.split(' ')
                .filter(|word| {
                    let w = word.trim_start_matches(['(', '<', '[']);
                    !(w.starts_with("http://") || w.starts_with("https://") || w.starts_with("www."))
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n");
    truncate_head(cleaned.trim(), max_chars)
}

/// Previous summary plus raw transcript, keeping the newest `max_chars`.
pub fn fallback_summary(previous: &str, transcript: &str, max_chars: usize) -> String {
    let combined = if previous.trim().is_empty() {
        transcript.trim().to_string()
    } else {
        format!("{}\n{}", previous.trim(), transcript.trim())
    };
    truncate_tail(&combined, max_chars)
}

fn truncate_head(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(role: Role, content: &str) -> Message {
        Message {
            id: 1,
            conversation_id: "c".to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            token_estimate: 1,
        }
    }

    #[test]
    fn transcript_labels_speakers() {
        let transcript = render_transcript(&[
            message(Role::User, " Ashburn power? "),
            message(Role::Assistant, "Constrained."),
        ]);
        assert_eq!(transcript, "User: Ashburn power?\nAssistant: Constrained.");
    }

    #[test]
    fn summaries_lose_urls_and_respect_budget() {
        let cleaned = clean_summary("- Tracks NoVA (https://ex.com/a) deals\n- Prefers MW figures", 200);
        assert_eq!(cleaned, "- Tracks NoVA deals\n- Prefers MW figures");
        assert_eq!(clean_summary("abcdef", 3), "abc");
    }

    #[test]
    fn fallback_keeps_the_newest_text() {
        let summary = fallback_summary("old notes", "User: latest question", 12);
        assert_eq!(summary, "est question");
        assert_eq!(fallback_summary("", "User: hi", 100), "User: hi");
    }
}
