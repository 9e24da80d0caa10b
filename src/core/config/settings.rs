//! Typed view over the merged YAML configuration.
//!
//! Every field has a default, so an empty config yields a working server.
//! Numeric values are clamped into safe ranges after validation.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub retrieval: RetrievalSettings,
    pub memory: MemorySettings,
    pub llm: LlmSettings,
    pub retry: RetrySettings,
    pub ingest: IngestSettings,
    pub budget: BudgetSettings,
    pub relevance: RelevanceSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSettings {
    pub pool_size: usize,
    pub semantic_overfetch: f32,
    pub keyword_scan_limit: usize,
    pub default_window_days: i64,
    pub widen_to_days: i64,
    pub min_viable_results: usize,
    pub max_sources: usize,
    pub max_themes: usize,
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySettings {
    pub max_messages: usize,
    pub keep_last: usize,
    pub max_tokens: usize,
    pub summary_char_budget: usize,
    pub recent_messages_for_prompt: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmSettings {
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSettings {
    pub social_min_score: f32,
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetSettings {
    /// Zero disables the ceiling.
    pub daily_token_limit: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RelevanceSettings {
    pub vocabulary_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_value(&Value::Object(Default::default()))
    }
}

impl Settings {
    pub fn from_value(config: &Value) -> Self {
        let server = config.get("server");
        let retrieval = config.get("retrieval");
        let memory = config.get("memory");
        let llm = config.get("llm");
        let retry = config.get("retry");
        let ingest = config.get("ingest");
        let budget = config.get("budget");
        let relevance = config.get("relevance");

        let max_messages = get_u64(memory, "max_messages").unwrap_or(20).clamp(6, 200) as usize;
        // keep_last must leave at least one message to summarize.
        let keep_last = get_u64(memory, "keep_last")
            .unwrap_or(12)
            .clamp(2, (max_messages - 1) as u64) as usize;

        let max_backoff_ms = get_u64(retry, "max_backoff_ms").unwrap_or(8_000).min(600_000);
        let initial_backoff_ms = get_u64(retry, "initial_backoff_ms")
            .unwrap_or(500)
            .min(max_backoff_ms);

        let default_window_days = get_u64(retrieval, "default_window_days")
            .unwrap_or(14)
            .clamp(1, 3_650) as i64;
        let widen_to_days = (get_u64(retrieval, "widen_to_days").unwrap_or(30).clamp(1, 3_650)
            as i64)
            .max(default_window_days);

        Settings {
            server: ServerSettings {
                host: get_str(server, "host").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: get_u64(server, "port").unwrap_or(8000).clamp(1, 65_535) as u16,
                cors_allowed_origins: server
                    .and_then(|v| v.get("cors_allowed_origins"))
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            retrieval: RetrievalSettings {
                pool_size: get_u64(retrieval, "pool_size").unwrap_or(24).clamp(4, 100) as usize,
                semantic_overfetch: get_f64(retrieval, "semantic_overfetch")
                    .unwrap_or(1.6)
                    .clamp(1.0, 10.0) as f32,
                keyword_scan_limit: get_u64(retrieval, "keyword_scan_limit")
                    .unwrap_or(400)
                    .clamp(10, 100_000) as usize,
                default_window_days,
                widen_to_days,
                min_viable_results: get_u64(retrieval, "min_viable_results")
                    .unwrap_or(4)
                    .min(1_000) as usize,
                max_sources: get_u64(retrieval, "max_sources").unwrap_or(10).clamp(1, 30) as usize,
                max_themes: get_u64(retrieval, "max_themes").unwrap_or(5).clamp(1, 5) as usize,
                snippet_chars: get_u64(retrieval, "snippet_chars")
                    .unwrap_or(600)
                    .clamp(40, 20_000) as usize,
            },
            memory: MemorySettings {
                max_messages,
                keep_last,
                max_tokens: get_u64(memory, "max_tokens")
                    .unwrap_or(8_000)
                    .clamp(1_000, 200_000) as usize,
                summary_char_budget: get_u64(memory, "summary_char_budget")
                    .unwrap_or(4_000)
                    .clamp(200, 100_000) as usize,
                recent_messages_for_prompt: get_u64(memory, "recent_messages_for_prompt")
                    .unwrap_or(8)
                    .min(200) as usize,
            },
            llm: LlmSettings {
                base_url: get_str(llm, "base_url").filter(|s| !s.trim().is_empty()),
                api_key: get_str(llm, "api_key").filter(|s| !s.trim().is_empty()),
                chat_model: get_str(llm, "chat_model").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                embedding_model: get_str(llm, "embedding_model")
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
                timeout_secs: get_u64(llm, "timeout_secs").unwrap_or(30).clamp(1, 600),
                max_tokens: get_u64(llm, "max_tokens").unwrap_or(700).clamp(16, 32_000) as u32,
                temperature: get_f64(llm, "temperature").unwrap_or(0.3).clamp(0.0, 2.0) as f32,
                requests_per_minute: get_u64(llm, "requests_per_minute")
                    .unwrap_or(60)
                    .clamp(1, 100_000) as u32,
            },
            retry: RetrySettings {
                max_attempts: get_u64(retry, "max_attempts").unwrap_or(3).clamp(1, 10) as u32,
                initial_backoff_ms,
                max_backoff_ms,
            },
            ingest: IngestSettings {
                social_min_score: get_f64(ingest, "social_min_score")
                    .unwrap_or(6.0)
                    .clamp(0.0, 25.0) as f32,
                retention_days: get_u64(ingest, "retention_days")
                    .unwrap_or(180)
                    .clamp(1, 36_500) as i64,
            },
            budget: BudgetSettings {
                daily_token_limit: get_u64(budget, "daily_token_limit").unwrap_or(2_000_000),
            },
            relevance: RelevanceSettings {
                vocabulary_path: get_str(relevance, "vocabulary_path").map(PathBuf::from),
            },
        }
    }
}

fn get_u64(section: Option<&Value>, key: &str) -> Option<u64> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_u64())
}

fn get_f64(section: Option<&Value>, key: &str) -> Option<f64> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_f64())
}

fn get_str(section: Option<&Value>, key: &str) -> Option<String> {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
