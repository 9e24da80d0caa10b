use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

/// Estimated LLM token usage per UTC day.
#[derive(Clone)]
pub struct UsageStore {
    pool: SqlitePool,
}

impl UsageStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS usage_daily (
                day TEXT PRIMARY KEY,
                tokens INTEGER NOT NULL DEFAULT 0,
                calls INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    pub async fn tokens_on(&self, day: NaiveDate) -> Result<u64, ApiError> {
        let row = sqlx::query("SELECT tokens FROM usage_daily WHERE day = ?")
            .bind(day.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(row
            .map(|r| r.get::<i64, _>("tokens").max(0) as u64)
            .unwrap_or(0))
    }

    pub async fn record(&self, day: NaiveDate, tokens: u64) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO usage_daily (day, tokens, calls) VALUES (?1, ?2, 1)
             ON CONFLICT(day) DO UPDATE SET
                tokens = usage_daily.tokens + excluded.tokens,
                calls = usage_daily.calls + 1",
        )
        .bind(day.to_string())
        .bind(tokens.min(i64::MAX as u64) as i64)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }
}
