use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DispatchError, Result};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        price REAL NOT NULL,
        size REAL NOT NULL,
        room_count INTEGER NOT NULL,
        city TEXT NOT NULL,
        url TEXT NOT NULL,
        provider_name TEXT NOT NULL,
        source_name TEXT NOT NULL,
        discovered_at TEXT NOT NULL,
        applied_at TEXT NOT NULL,
        succeeded INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        listing_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_listing ON events (listing_id)",
];

/// Create tables if missing. Safe to run on every start.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await.map_err(DispatchError::from)?;
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(DispatchError::from)?;
    }
    tx.commit().await.map_err(DispatchError::from)?;

    info!("Application store schema ready");
    Ok(())
}
