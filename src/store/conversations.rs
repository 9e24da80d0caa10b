use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::{format_timestamp, parse_timestamp};
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub audience: Option<String>,
    pub memory_summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub token_estimate: i64,
}

/// Message count and token total for one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageTotals {
    pub count: usize,
    pub tokens: usize,
}

/// Rough token estimate: one token per four bytes, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                audience TEXT,
                memory_summary TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                token_estimate INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConversationState>, ApiError> {
        let row = sqlx::query(
            "SELECT id, audience, memory_summary, created_at, updated_at
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_state).transpose()
    }

    /// Appends one message and bumps `updated_at`, creating the conversation if needed.
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        ensure_conversation(&mut tx, conversation_id, None).await?;
        let message = insert_message(&mut tx, conversation_id, role, content).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(message)
    }

    /// Writes a user/assistant pair atomically; either both rows land or neither.
    pub async fn record_turn(
        &self,
        conversation_id: &str,
        audience: Option<&str>,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<(Message, Message), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        ensure_conversation(&mut tx, conversation_id, audience).await?;
        let user = insert_message(&mut tx, conversation_id, Role::User, user_content).await?;
        let assistant =
            insert_message(&mut tx, conversation_id, Role::Assistant, assistant_content).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok((user, assistant))
    }

    /// All retained messages in append order.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at, token_estimate
             FROM messages WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(row_to_message).collect()
    }

    /// The last `limit` messages, oldest first.
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at, token_estimate
             FROM messages WHERE conversation_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut messages = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn totals(&self, conversation_id: &str) -> Result<MessageTotals, ApiError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, COALESCE(SUM(token_estimate), 0) AS tokens
             FROM messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(MessageTotals {
            count: row.get::<i64, _>("count").max(0) as usize,
            tokens: row.get::<i64, _>("tokens").max(0) as usize,
        })
    }

    /// Replaces the summary and deletes every message with `id <= through_id`
    /// in one transaction.
    pub async fn fold_into_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        through_id: i64,
    ) -> Result<u64, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("UPDATE conversations SET memory_summary = ?, updated_at = ? WHERE id = ?")
            .bind(summary)
            .bind(format_timestamp(Utc::now()))
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let deleted = sqlx::query("DELETE FROM messages WHERE conversation_id = ? AND id <= ?")
            .bind(conversation_id)
            .bind(through_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?
            .rows_affected();

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(deleted)
    }
}

async fn ensure_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    audience: Option<&str>,
) -> Result<(), ApiError> {
    let now = format_timestamp(Utc::now());
    sqlx::query(
        "INSERT INTO conversations (id, audience, memory_summary, created_at, updated_at)
         VALUES (?1, ?2, '', ?3, ?3)
         ON CONFLICT(id) DO UPDATE SET
            updated_at = excluded.updated_at,
            audience = COALESCE(excluded.audience, conversations.audience)",
    )
    .bind(id)
    .bind(audience)
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::internal)?;
    Ok(())
}

async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &str,
    role: Role,
    content: &str,
) -> Result<Message, ApiError> {
    let created_at = Utc::now();
    let token_estimate = estimate_tokens(content) as i64;
    let result = sqlx::query(
        "INSERT INTO messages (conversation_id, role, content, created_at, token_estimate)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .bind(format_timestamp(created_at))
    .bind(token_estimate)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::internal)?;

    Ok(Message {
        id: result.last_insert_rowid(),
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        created_at,
        token_estimate,
    })
}

fn row_to_state(row: &SqliteRow) -> Result<ConversationState, ApiError> {
    let created_at: String = row.try_get("created_at").map_err(ApiError::internal)?;
    let updated_at: String = row.try_get("updated_at").map_err(ApiError::internal)?;
    Ok(ConversationState {
        id: row.try_get("id").map_err(ApiError::internal)?,
        audience: row.try_get("audience").map_err(ApiError::internal)?,
        memory_summary: row.try_get("memory_summary").map_err(ApiError::internal)?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn row_to_message(row: &SqliteRow) -> Result<Message, ApiError> {
    let role: String = row.try_get("role").map_err(ApiError::internal)?;
    let created_at: String = row.try_get("created_at").map_err(ApiError::internal)?;
    Ok(Message {
        id: row.try_get("id").map_err(ApiError::internal)?,
        conversation_id: row.try_get("conversation_id").map_err(ApiError::internal)?,
        role: Role::parse(&role),
        content: row.try_get("content").map_err(ApiError::internal)?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        token_estimate: row.try_get("token_estimate").map_err(ApiError::internal)?,
    })
}
