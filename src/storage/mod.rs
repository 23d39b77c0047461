pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::parser::Listing;

/// Severity of a persisted run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventLevel::Info => write!(f, "INFO"),
            EventLevel::Warning => write!(f, "WARNING"),
            EventLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for EventLevel {
    type Err = DispatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(EventLevel::Info),
            "WARNING" => Ok(EventLevel::Warning),
            "ERROR" => Ok(EventLevel::Error),
            other => Err(DispatchError::Parse(format!("Unknown event level: {}", other))),
        }
    }
}

/// Durable proof that an application attempt was made for a listing id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationRecord {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub size: f64,
    pub room_count: u32,
    pub city: String,
    pub url: String,
    pub provider_name: String,
    pub source_name: String,
    pub discovered_at: DateTime<Utc>,
    pub applied_at: DateTime<Utc>,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    pub listing_id: Option<String>,
}

/// Single source of truth for "already applied".
///
/// Implementations must not cache applied ids in process: every
/// `has_applied` call reflects all writes completed before it.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn has_applied(&self, listing_id: &str) -> Result<bool>;

    /// Upsert keyed by `listing.id`; the latest attempt wins.
    async fn record_application(
        &self,
        listing: &Listing,
        succeeded: bool,
    ) -> std::result::Result<(), DispatchError>;

    /// Append-only. Never fails the caller.
    async fn append_event(&self, level: EventLevel, message: &str, listing_id: Option<&str>);

    async fn get_application(&self, listing_id: &str) -> Result<Option<ApplicationRecord>>;
    async fn application_count(&self) -> Result<u64>;
    async fn recent_events(&self, limit: u32) -> Result<Vec<RunEvent>>;
}

/// Open a SQLite pool. In-memory databases are pinned to one connection
/// that never expires, otherwise every connection would see its own db.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| DispatchError::Config(format!("Invalid database url '{}': {}", database_url, e)))?
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(DispatchError::from)?;

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: String,
    title: String,
    price: f64,
    size: f64,
    room_count: i64,
    city: String,
    url: String,
    provider_name: String,
    source_name: String,
    discovered_at: DateTime<Utc>,
    applied_at: DateTime<Utc>,
    succeeded: bool,
}

impl ApplicationRow {
    fn into_record(self) -> ApplicationRecord {
        ApplicationRecord {
            id: self.id,
            title: self.title,
            price: self.price,
            size: self.size,
            room_count: u32::try_from(self.room_count).unwrap_or_default(),
            city: self.city,
            url: self.url,
            provider_name: self.provider_name,
            source_name: self.source_name,
            discovered_at: self.discovered_at,
            applied_at: self.applied_at,
            succeeded: self.succeeded,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    timestamp: DateTime<Utc>,
    level: String,
    message: String,
    listing_id: Option<String>,
}

pub struct SqliteApplicationStore {
    pool: SqlitePool,
}

impl SqliteApplicationStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        info!("Opening application store at {}", database_url);
        let pool = create_pool(database_url).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        schema::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ApplicationStore for SqliteApplicationStore {
    async fn has_applied(&self, listing_id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM applications WHERE id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DispatchError::from)?;
        Ok(found.is_some())
    }

    async fn record_application(
        &self,
        listing: &Listing,
        succeeded: bool,
    ) -> std::result::Result<(), DispatchError> {
        sqlx::query(
            r#"
            INSERT INTO applications (
                id, title, price, size, room_count, city, url,
                provider_name, source_name, discovered_at, applied_at, succeeded
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                price = excluded.price,
                size = excluded.size,
                room_count = excluded.room_count,
                city = excluded.city,
                url = excluded.url,
                provider_name = excluded.provider_name,
                source_name = excluded.source_name,
                discovered_at = excluded.discovered_at,
                applied_at = excluded.applied_at,
                succeeded = excluded.succeeded
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(listing.size)
        .bind(i64::from(listing.room_count))
        .bind(&listing.city)
        .bind(&listing.url)
        .bind(&listing.provider_name)
        .bind(&listing.source_name)
        .bind(listing.discovered_at)
        .bind(Utc::now())
        .bind(succeeded)
        .execute(&self.pool)
        .await?;

        debug!(listing_id = %listing.id, succeeded, "Recorded application");
        Ok(())
    }

    async fn append_event(&self, level: EventLevel, message: &str, listing_id: Option<&str>) {
        let result = sqlx::query(
            "INSERT INTO events (timestamp, level, message, listing_id) VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(level.to_string())
        .bind(message)
        .bind(listing_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("Failed to persist {} event '{}': {}", level, message, e);
        }
    }

    async fn get_application(&self, listing_id: &str) -> Result<Option<ApplicationRecord>> {
        let row = sqlx::query_as::<_, ApplicationRow>("SELECT * FROM applications WHERE id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DispatchError::from)?;
        Ok(row.map(ApplicationRow::into_record))
    }

    async fn application_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications")
            .fetch_one(&self.pool)
            .await
            .map_err(DispatchError::from)?;
        Ok(count.max(0) as u64)
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<RunEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, timestamp, level, message, listing_id FROM events ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(DispatchError::from)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(RunEvent {
                id: row.id,
                timestamp: row.timestamp,
                level: row.level.parse()?,
                message: row.message,
                listing_id: row.listing_id,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::sample_listing;
    use tempfile::tempdir;

    async fn file_store(dir: &tempfile::TempDir) -> SqliteApplicationStore {
        let url = format!("sqlite://{}", dir.path().join("bot.db").display());
        SqliteApplicationStore::open(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_record_then_has_applied() {
        let temp_dir = tempdir().unwrap();
        let store = file_store(&temp_dir).await;

        assert!(!store.has_applied("test123").await.unwrap());

        store
            .record_application(&sample_listing("test123", "immonet"), true)
            .await
            .unwrap();

        assert!(store.has_applied("test123").await.unwrap());
        assert!(!store.has_applied("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_upsert_keeps_latest() {
        let temp_dir = tempdir().unwrap();
        let store = file_store(&temp_dir).await;

        let listing = sample_listing("A", "immonet");
        store.record_application(&listing, true).await.unwrap();
        let first = store.get_application("A").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut rescraped = listing.clone();
        rescraped.price = 1234.0;
        store.record_application(&rescraped, false).await.unwrap();

        assert_eq!(store.application_count().await.unwrap(), 1);
        let latest = store.get_application("A").await.unwrap().unwrap();
        assert!(!latest.succeeded);
        assert_eq!(latest.price, 1234.0);
        assert!(latest.applied_at >= first.applied_at);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = tempdir().unwrap();
        {
            let store = file_store(&temp_dir).await;
            store
                .record_application(&sample_listing("persisted", "immonet"), true)
                .await
                .unwrap();
            store.close().await;
        }

        let reopened = file_store(&temp_dir).await;
        assert!(reopened.has_applied("persisted").await.unwrap());
    }

    #[tokio::test]
    async fn test_events_append_only() {
        let store = SqliteApplicationStore::open("sqlite::memory:").await.unwrap();

        store.append_event(EventLevel::Info, "Application succeeded", Some("A")).await;
        store.append_event(EventLevel::Warning, "Application failed", Some("B")).await;
        store.append_event(EventLevel::Error, "Cycle failed", None).await;

        let events = store.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 3);
        // newest first
        assert_eq!(events[0].level, EventLevel::Error);
        assert_eq!(events[0].listing_id, None);
        assert_eq!(events[2].message, "Application succeeded");
        assert_eq!(events[2].listing_id.as_deref(), Some("A"));
        assert!(events[0].id > events[1].id && events[1].id > events[2].id);

        let limited = store.recent_events(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_append_event_swallows_failures() {
        let store = SqliteApplicationStore::open("sqlite::memory:").await.unwrap();
        sqlx::query("DROP TABLE events").execute(&store.pool).await.unwrap();

        // must not panic or propagate
        store.append_event(EventLevel::Info, "lost", None).await;
    }

    #[tokio::test]
    async fn test_record_failure_surfaces_persistence_error() {
        let store = SqliteApplicationStore::open("sqlite::memory:").await.unwrap();
        sqlx::query("DROP TABLE applications").execute(&store.pool).await.unwrap();

        let err = store
            .record_application(&sample_listing("A", "immonet"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Persistence(_)));
    }

    #[test]
    fn test_event_level_round_trip_names() {
        assert_eq!("WARNING".parse::<EventLevel>().unwrap(), EventLevel::Warning);
        assert_eq!(EventLevel::Error.to_string(), "ERROR");
        assert!("DEBUG".parse::<EventLevel>().is_err());
    }
}
