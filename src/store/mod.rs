//! SQLite persistence shared by the corpus, the vector index, conversations
//! and generated digests/summaries.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::core::errors::ApiError;

pub mod conversations;
pub mod digests;
pub mod documents;
pub mod summaries;
pub mod usage;

pub use conversations::{ConversationState, ConversationStore, Message, Role};
pub use digests::{DigestRecord, DigestStore};
pub use documents::{Document, DocumentStore, NewDocument};
pub use summaries::{StorySummaryRecord, StorySummaryStore};
pub use usage::UsageStore;

/// Opens (creating if needed) a WAL-mode pool so readers never block on ingestion.
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool, ApiError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(ApiError::internal)
}

/// Second-precision RFC 3339 in UTC; sorts lexicographically.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
