use serde_json::{Map, Value};

use crate::core::errors::ApiError;

/// Rejects type errors and out-of-range values before settings are built.
/// Values that pass here may still be clamped by `Settings::from_value`.
pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65_535)?;
        validate_string_array_field(server, "server.cors_allowed_origins", "cors_allowed_origins")?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.pool_size", "pool_size", 1, 1_000)?;
        validate_f64_field(
            retrieval,
            "retrieval.semantic_overfetch",
            "semantic_overfetch",
            1.0,
            10.0,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.keyword_scan_limit",
            "keyword_scan_limit",
            1,
            100_000,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.default_window_days",
            "default_window_days",
            1,
            3_650,
        )?;
        validate_u64_field(retrieval, "retrieval.widen_to_days", "widen_to_days", 1, 3_650)?;
        validate_u64_field(
            retrieval,
            "retrieval.min_viable_results",
            "min_viable_results",
            0,
            1_000,
        )?;
        validate_u64_field(retrieval, "retrieval.max_sources", "max_sources", 1, 100)?;
        validate_u64_field(retrieval, "retrieval.max_themes", "max_themes", 1, 20)?;
        validate_u64_field(retrieval, "retrieval.snippet_chars", "snippet_chars", 40, 20_000)?;
    }

    if let Some(memory) = expect_optional_object(root, "memory")? {
        validate_u64_field(memory, "memory.max_messages", "max_messages", 2, 10_000)?;
        validate_u64_field(memory, "memory.keep_last", "keep_last", 1, 10_000)?;
        validate_u64_field(memory, "memory.max_tokens", "max_tokens", 100, 10_000_000)?;
        validate_u64_field(
            memory,
            "memory.summary_char_budget",
            "summary_char_budget",
            100,
            1_000_000,
        )?;
        validate_u64_field(
            memory,
            "memory.recent_messages_for_prompt",
            "recent_messages_for_prompt",
            0,
            1_000,
        )?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.base_url", "base_url")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.chat_model", "chat_model")?;
        validate_optional_string_field(llm, "llm.embedding_model", "embedding_model")?;
        validate_u64_field(llm, "llm.timeout_secs", "timeout_secs", 1, 3_600)?;
        validate_u64_field(llm, "llm.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_f64_field(llm, "llm.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(
            llm,
            "llm.requests_per_minute",
            "requests_per_minute",
            1,
            100_000,
        )?;
    }

    if let Some(retry) = expect_optional_object(root, "retry")? {
        validate_u64_field(retry, "retry.max_attempts", "max_attempts", 1, 20)?;
        validate_u64_field(
            retry,
            "retry.initial_backoff_ms",
            "initial_backoff_ms",
            0,
            600_000,
        )?;
        validate_u64_field(retry, "retry.max_backoff_ms", "max_backoff_ms", 0, 3_600_000)?;
    }

    if let Some(ingest) = expect_optional_object(root, "ingest")? {
        validate_f64_field(ingest, "ingest.social_min_score", "social_min_score", 0.0, 100.0)?;
        validate_u64_field(ingest, "ingest.retention_days", "retention_days", 1, 36_500)?;
    }

    if let Some(budget) = expect_optional_object(root, "budget")? {
        validate_u64_field(
            budget,
            "budget.daily_token_limit",
            "daily_token_limit",
            0,
            u64::MAX,
        )?;
    }

    if let Some(relevance) = expect_optional_object(root, "relevance")? {
        validate_optional_string_field(relevance, "relevance.vocabulary_path", "vocabulary_path")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::Validation(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !number.is_finite() || number < min || number > max {
        return Err(ApiError::Validation(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::Validation(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::Validation(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_empty_config() {
        assert!(validate_config(&json!({})).is_ok());
    }

    #[test]
    fn rejects_wrong_types() {
        let err = validate_config(&json!({ "memory": { "max_messages": "twenty" } }))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg.contains("memory.max_messages")));

        let err = validate_config(&json!({ "retrieval": [1, 2] })).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = validate_config(&json!({ "llm": { "temperature": 5.0 } })).unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg.contains("between")));
    }
}
