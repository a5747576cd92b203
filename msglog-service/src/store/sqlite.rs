//! SQLite-backed message store.
//!
//! Duplicate detection relies entirely on the `message_id` primary key: an
//! insert either succeeds or trips the uniqueness constraint. There is no
//! read-before-write, so overlapping inserts of the same id cannot both win.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

use super::types::{
    InsertOutcome, Message, MessageFilter, MessagePage, Page, SenderCount, Stats, TOP_SENDERS,
};
use super::StoreError;
use crate::config::{database_path_from_url, IN_MEMORY_DATABASE_URL};

/// How long a writer waits for SQLite's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections kept for an on-disk database.
const FILE_POOL_SIZE: u32 = 8;

const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    message_id  TEXT PRIMARY KEY,
    from_msisdn TEXT NOT NULL,
    to_msisdn   TEXT NOT NULL,
    ts          TEXT NOT NULL,
    text        TEXT,
    created_at  TEXT NOT NULL
)"#;

const INSERT_MESSAGE: &str = r#"
INSERT INTO messages (message_id, from_msisdn, to_msisdn, ts, text, created_at)
VALUES (?, ?, ?, ?, ?, ?)"#;

/// Durable, append-only message log.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    from_msisdn: String,
    to_msisdn: String,
    ts: String,
    text: Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let ts = decode_ts(&row.ts).ok_or_else(|| StoreError::CorruptRow {
            key: row.message_id.clone(),
            reason: format!("unparseable ts {:?}", row.ts),
        })?;

        Ok(Message {
            message_id: row.message_id,
            from_msisdn: row.from_msisdn,
            to_msisdn: row.to_msisdn,
            ts,
            text: row.text,
        })
    }
}

impl MessageStore {
    /// Open the database at `database_url` and make sure the schema exists.
    ///
    /// For on-disk databases the file and its parent directories are created
    /// when missing.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = match database_path_from_url(database_url) {
            Some(path) => {
                prepare_parent_dir(&path)?;

                let options = SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(BUSY_TIMEOUT);

                info!(path = %path.display(), "sqlite_connecting");

                SqlitePoolOptions::new()
                    .max_connections(FILE_POOL_SIZE)
                    .connect_with(options)
                    .await?
            }
            None => {
                let options =
                    SqliteConnectOptions::from_str(IN_MEMORY_DATABASE_URL)?.busy_timeout(BUSY_TIMEOUT);

                info!("sqlite_connecting_in_memory");

                // Every connection to :memory: is its own database, so keep exactly one alive.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
        };

        let store = Self::from_pool(pool);
        store.init_schema().await?;

        info!("sqlite_ready");

        Ok(store)
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `messages` table if it does not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_MESSAGES_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Round-trip a trivial statement to prove the database is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a message unless one with the same id already exists.
    ///
    /// A uniqueness violation is reported as `InsertOutcome::Duplicate` and
    /// leaves the stored record untouched. Every other failure is an error.
    pub async fn insert(&self, message: &Message) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(INSERT_MESSAGE)
            .bind(&message.message_id)
            .bind(&message.from_msisdn)
            .bind(&message.to_msisdn)
            .bind(encode_ts(&message.ts))
            .bind(message.text.as_deref())
            .bind(encode_ts(&Utc::now()))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(message_id = %message.message_id, "message_insert_duplicate");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Return one page of messages ordered by `(ts, message_id)` ascending.
    ///
    /// `total` counts every message matching `filter`, ignoring the page window.
    pub async fn query(&self, filter: &MessageFilter, page: Page) -> Result<MessagePage, StoreError> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM messages");
        push_filters(&mut count_query, filter);
        let total = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut data_query = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, from_msisdn, to_msisdn, ts, text FROM messages",
        );
        push_filters(&mut data_query, filter);
        data_query
            .push(" ORDER BY ts ASC, message_id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = data_query
            .build_query_as::<MessageRow>()
            .fetch_all(&self.pool)
            .await?;

        let data = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MessagePage { data, total })
    }

    /// Aggregate statistics over every stored message.
    pub async fn stats(&self) -> Result<Stats, StoreError> {
        let (total_messages, senders_count, first_ts, last_ts): (i64, i64, Option<String>, Option<String>) =
            sqlx::query_as(
                "SELECT COUNT(*), COUNT(DISTINCT from_msisdn), MIN(ts), MAX(ts) FROM messages",
            )
            .fetch_one(&self.pool)
            .await?;

        if total_messages == 0 {
            return Ok(Stats::empty());
        }

        let senders: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT from_msisdn, COUNT(*) AS cnt
            FROM messages
            GROUP BY from_msisdn
            ORDER BY cnt DESC, from_msisdn ASC
            LIMIT ?"#,
        )
        .bind(TOP_SENDERS)
        .fetch_all(&self.pool)
        .await?;

        Ok(Stats {
            total_messages,
            senders_count,
            messages_per_sender: senders
                .into_iter()
                .map(|(from_msisdn, count)| SenderCount { from_msisdn, count })
                .collect(),
            first_message_ts: decode_optional_ts(first_ts, "MIN(ts)")?,
            last_message_ts: decode_optional_ts(last_ts, "MAX(ts)")?,
        })
    }

    /// Number of stored messages.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn prepare_parent_dir(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Append the optional WHERE clause shared by the count and data queries.
fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &MessageFilter) {
    let mut separator = " WHERE ";

    if let Some(from) = &filter.from {
        builder
            .push(separator)
            .push("from_msisdn = ")
            .push_bind(from.clone());
        separator = " AND ";
    }

    if let Some(since) = &filter.since {
        builder
            .push(separator)
            .push("ts >= ")
            .push_bind(encode_ts(&ceil_to_micros(since)));
        separator = " AND ";
    }

    // instr() instead of LIKE so '%' and '_' in the needle stay literal
    if let Some(q) = &filter.q {
        builder
            .push(separator)
            .push("instr(lower(text), lower(")
            .push_bind(q.clone())
            .push(")) > 0");
    }
}

/// Fixed-width UTC encoding; lexical order equals chronological order.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Round up to the stored precision so a lower bound never admits earlier rows.
fn ceil_to_micros(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let truncated = ts.trunc_subsecs(6);
    if truncated < *ts {
        truncated + chrono::Duration::microseconds(1)
    } else {
        truncated
    }
}

pub(crate) fn decode_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_optional_ts(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    match raw {
        None => Ok(None),
        Some(raw) => decode_ts(&raw).map(Some).ok_or_else(|| StoreError::CorruptRow {
            key: column.to_string(),
            reason: format!("unparseable ts {:?}", raw),
        }),
    }
}
