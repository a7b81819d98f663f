//! # Measurement Store
//!
//! SQLite-backed buffer holding measurements until the submitter has
//! delivered them.
//!
//! ## Table Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        measurements Table                               │
//! │                                                                         │
//! │  seq | id   | topic        | key_json | value_json | size | created_ms │
//! │  ────┼──────┼──────────────┼──────────┼────────────┼──────┼────────────│
//! │  1   │ uuid │ android_acc  │ {...}    │ {...}      │ 120  │ 1718000000 │
//! │  2   │ uuid │ android_acc  │ {...}    │ {...}      │ 118  │ 1718000001 │
//! │  3   │ uuid │ battery      │ {...}    │ {...}      │  64  │ 1718000002 │
//! │                                                                         │
//! │  • seq orders records per topic (oldest first)                         │
//! │  • size feeds the per-topic byte cap (oldest dropped first)            │
//! │  • created_ms feeds the retention horizon                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use beacon_core::Record;

use crate::error::{CacheError, CacheResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS measurements (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT    NOT NULL UNIQUE,
    topic       TEXT    NOT NULL,
    key_json    TEXT    NOT NULL,
    value_json  TEXT    NOT NULL,
    size_bytes  INTEGER NOT NULL,
    created_ms  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_measurements_topic_seq ON measurements (topic, seq);
CREATE INDEX IF NOT EXISTS idx_measurements_created ON measurements (created_ms);
"#;

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = StoreConfig::new("/var/lib/beacon/cache.db").max_connections(2);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite file, `None` for an in-memory store.
    pub database_path: Option<PathBuf>,

    /// Maximum number of pooled connections.
    /// Default: 2 (one committer, one submitter)
    pub max_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: Some(path.into()),
            max_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// In-memory store (for testing).
    ///
    /// Uses a single connection that is never recycled, since the data lives
    /// only as long as that connection.
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: None,
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Stored Record
// =============================================================================

/// A record read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Insertion order.
    pub seq: i64,
    pub topic: String,
    pub key: Value,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StoredRow {
    seq: i64,
    topic: String,
    key_json: String,
    value_json: String,
    created_ms: i64,
}

impl TryFrom<StoredRow> for StoredRecord {
    type Error = CacheError;

    fn try_from(row: StoredRow) -> CacheResult<Self> {
        Ok(StoredRecord {
            seq: row.seq,
            topic: row.topic,
            key: serde_json::from_str(&row.key_json)?,
            value: serde_json::from_str(&row.value_json)?,
            created_at: DateTime::from_timestamp_millis(row.created_ms).unwrap_or_default(),
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the measurement buffer.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Opens (creating if needed) the store and ensures the schema exists.
    pub async fn open(config: StoreConfig) -> CacheResult<Self> {
        let options = match &config.database_path {
            Some(path) => {
                info!(path = %path.display(), "Opening measurement cache");
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
            }
            None => {
                debug!("Opening in-memory measurement cache");
                SqliteConnectOptions::new().in_memory(true)
            }
        };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout);
        if config.database_path.is_none() {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(CacheStore { pool })
    }

    /// Appends records in a single transaction.
    pub async fn insert_batch(&self, records: &[Record]) -> CacheResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let key_json = serde_json::to_string(&record.key)?;
            let value_json = serde_json::to_string(&record.value)?;
            let size = (key_json.len() + value_json.len()) as i64;

            sqlx::query(
                "INSERT INTO measurements (id, topic, key_json, value_json, size_bytes, created_ms)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&record.topic.name)
            .bind(key_json)
            .bind(value_json)
            .bind(size)
            .bind(record.received_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = records.len(), "Committed measurements");
        Ok(())
    }

    /// Topics that currently hold buffered records.
    pub async fn topics(&self) -> CacheResult<Vec<String>> {
        let topics = sqlx::query_scalar("SELECT DISTINCT topic FROM measurements ORDER BY topic")
            .fetch_all(&self.pool)
            .await?;
        Ok(topics)
    }

    /// Oldest `limit` records of a topic.
    pub async fn pending(&self, topic: &str, limit: usize) -> CacheResult<Vec<StoredRecord>> {
        let rows: Vec<StoredRow> = sqlx::query_as(
            "SELECT seq, topic, key_json, value_json, created_ms
             FROM measurements WHERE topic = ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(topic)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredRecord::try_from).collect()
    }

    /// Removes delivered records of `topic` up to and including `last_seq`.
    pub async fn remove_through(&self, topic: &str, last_seq: i64) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM measurements WHERE topic = ? AND seq <= ?")
            .bind(topic)
            .bind(last_seq)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drops the oldest records of `topic` until it fits in `max_bytes`.
    ///
    /// Returns the number of records dropped.
    pub async fn trim_topic(&self, topic: &str, max_bytes: u64) -> CacheResult<u64> {
        let sizes: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT seq, size_bytes FROM measurements WHERE topic = ? ORDER BY seq DESC",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        let mut total: u64 = 0;
        let cutoff = sizes.iter().find_map(|(seq, size)| {
            total += *size as u64;
            (total > max_bytes).then_some(*seq)
        });

        match cutoff {
            Some(seq) => {
                let dropped = self.remove_through(topic, seq).await?;
                info!(topic, dropped, max_bytes, "Cache full, dropped oldest records");
                Ok(dropped)
            }
            None => Ok(0),
        }
    }

    /// Deletes records created before `cutoff`.
    pub async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM measurements WHERE created_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of buffered records in `topic`.
    pub async fn count(&self, topic: &str) -> CacheResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM measurements WHERE topic = ?")
            .bind(topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Total number of buffered records.
    pub async fn total_count(&self) -> CacheResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        info!("Closing measurement cache");
        self.pool.close().await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
