use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use uuid::Uuid;

use crate::store::{EventStore, RecentEvent};
use crate::{Error, Result};

const INIT_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_source ON events(source);
CREATE INDEX IF NOT EXISTS idx_events_expires ON events(expires_at);
";

/// SQLite-backed [`EventStore`]. One database can hold the events of many
/// checks; every query is scoped to the check name given at open time.
pub struct SqliteEventStore {
    pool: Pool<Sqlite>,
    source: String,
}

impl SqliteEventStore {
    pub async fn open(path: &str, source: impl Into<String>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            source: source.into(),
        })
    }

    pub async fn open_memory(source: impl Into<String>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            source: source.into(),
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE source = ?")
            .bind(&self.source)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn recent_events(&self, limit: usize) -> Result<Vec<RecentEvent>> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r"
            SELECT id, payload, created_at, expires_at
            FROM events
            WHERE source = ? AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY rowid DESC
            LIMIT ?
            ",
        )
        .bind(&self.source)
        .bind(timestamp(Utc::now()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_event_row).collect()
    }

    async fn create_event(
        &self,
        payload: Map<String, Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RecentEvent> {
        let event = RecentEvent::new(payload, expires_at);
        let payload_json = serde_json::to_string(&event.payload)?;

        sqlx::query(
            r"
            INSERT INTO events (id, source, payload, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(event.id.to_string())
        .bind(&self.source)
        .bind(payload_json)
        .bind(timestamp(event.created_at))
        .bind(event.expires_at.map(timestamp))
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %event.id, source = %self.source, "Stored event");
        Ok(event)
    }

    async fn refresh_expiration(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let result = sqlx::query("UPDATE events SET expires_at = ? WHERE id = ? AND source = ?")
            .bind(expires_at.map(timestamp))
            .bind(id.to_string())
            .bind(&self.source)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::EventNotFound(id));
        }

        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM events WHERE source = ? AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(&self.source)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn parse_event_row(row: (String, String, String, Option<String>)) -> Result<RecentEvent> {
    let (id, payload_json, created_at, expires_at) = row;

    Ok(RecentEvent {
        id: id
            .parse()
            .map_err(|_| Error::CorruptEvent(format!("invalid id {id:?}")))?,
        payload: serde_json::from_str(&payload_json)?,
        created_at: parse_timestamp(&created_at)?,
        expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| Error::CorruptEvent(format!("invalid timestamp {value:?}")))
}
