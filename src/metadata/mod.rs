//! Durable per-entry metadata: access counts, verification timestamps,
//! project ownership.
//!
//! SQLite in WAL mode behind a single-connection pool, so every
//! read-modify-write is serialized through one writer.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

/// One metadata row, keyed by entry id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub id: String,
    pub project_id: Option<String>,
    pub access_count: i64,
    pub accessed_at: Option<DateTime<Utc>>,
    pub last_verified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Aggregates for `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaStats {
    pub tracked_entries: i64,
    pub total_accesses: i64,
    pub most_accessed: Vec<(String, i64)>,
}

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Opens (creating if needed) the store and runs the schema.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entry_meta (
                id TEXT PRIMARY KEY,
                project_id TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                accessed_at TEXT,
                last_verified TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        info!("Metadata store ready at {:?}", db_path);
        Ok(Self { pool })
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Memory);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entry_meta (
                id TEXT PRIMARY KEY,
                project_id TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                accessed_at TEXT,
                last_verified TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Creates the row for a new entry. Idempotent on conflict.
    pub async fn init_entry(&self, id: &str, project_id: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO entry_meta (id, project_id, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(project_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bumps the access counter and timestamp; creates the row when a file
    /// exists without one (reconciliation after a failed meta write).
    pub async fn record_access(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO entry_meta (id, access_count, accessed_at, created_at)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET
                access_count = access_count + 1,
                accessed_at = excluded.accessed_at",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_verified(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO entry_meta (id, last_verified, created_at)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET last_verified = excluded.last_verified",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<EntryMeta>> {
        let row = sqlx::query(
            "SELECT id, project_id, access_count, accessed_at, last_verified, created_at
             FROM entry_meta WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(meta_from_row))
    }

    /// Removes the row; returns whether one existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entry_meta WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Entries neither accessed nor verified since the cutoff.
    pub async fn stale(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<EntryMeta>> {
        let cutoff = cutoff.to_rfc3339();
        let rows = sqlx::query(
            "SELECT id, project_id, access_count, accessed_at, last_verified, created_at
             FROM entry_meta
             WHERE COALESCE(MAX(COALESCE(accessed_at, ''), COALESCE(last_verified, ''), created_at), created_at) < ?1
             ORDER BY created_at ASC
             LIMIT ?2",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(meta_from_row).collect())
    }

    pub async fn stats(&self, top: usize) -> Result<MetaStats> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(SUM(access_count), 0) AS total FROM entry_meta",
        )
        .fetch_one(&self.pool)
        .await?;
        let most = sqlx::query(
            "SELECT id, access_count FROM entry_meta
             WHERE access_count > 0
             ORDER BY access_count DESC, id ASC
             LIMIT ?1",
        )
        .bind(top as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(MetaStats {
            tracked_entries: totals.get::<i64, _>("n"),
            total_accesses: totals.get::<i64, _>("total"),
            most_accessed: most
                .into_iter()
                .map(|r| (r.get::<String, _>("id"), r.get::<i64, _>("access_count")))
                .collect(),
        })
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn is_available(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

fn meta_from_row(row: sqlx::sqlite::SqliteRow) -> EntryMeta {
    let parse_ts = |value: Option<String>| {
        value
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    EntryMeta {
        id: row.get("id"),
        project_id: row.get("project_id"),
        access_count: row.get("access_count"),
        accessed_at: parse_ts(row.get("accessed_at")),
        last_verified: parse_ts(row.get("last_verified")),
        created_at: parse_ts(Some(row.get::<String, _>("created_at"))).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn access_counting_and_reconciliation() {
        let store = MetadataStore::open_in_memory().await.unwrap();

        // Row created implicitly on first access.
        store.record_access("aaaa1111").await.unwrap();
        store.record_access("aaaa1111").await.unwrap();
        let meta = store.get("aaaa1111").await.unwrap().unwrap();
        assert_eq!(meta.access_count, 2);
        assert!(meta.accessed_at.is_some());
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.init_entry("bbbb2222", Some("demo")).await.unwrap();
        store.init_entry("bbbb2222", Some("other")).await.unwrap();
        let meta = store.get("bbbb2222").await.unwrap().unwrap();
        assert_eq!(meta.project_id.as_deref(), Some("demo"));
        assert_eq!(meta.access_count, 0);
    }

    #[tokio::test]
    async fn verify_and_remove() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.init_entry("cccc3333", None).await.unwrap();
        store.mark_verified("cccc3333").await.unwrap();
        let meta = store.get("cccc3333").await.unwrap().unwrap();
        assert!(meta.last_verified.is_some());

        assert!(store.remove("cccc3333").await.unwrap());
        assert!(!store.remove("cccc3333").await.unwrap());
    }

    #[tokio::test]
    async fn stale_listing_excludes_recent() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.init_entry("dddd4444", None).await.unwrap();
        store.record_access("dddd4444").await.unwrap();

        let past_cutoff = Utc::now() - Duration::days(1);
        let stale = store.stale(past_cutoff, 10).await.unwrap();
        assert!(stale.is_empty());

        let future_cutoff = Utc::now() + Duration::days(1);
        let stale = store.stale(future_cutoff, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[tokio::test]
    async fn stats_aggregate() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.record_access("eeee5555").await.unwrap();
        store.record_access("eeee5555").await.unwrap();
        store.record_access("ffff6666").await.unwrap();
        let stats = store.stats(5).await.unwrap();
        assert_eq!(stats.tracked_entries, 2);
        assert_eq!(stats.total_accesses, 3);
        assert_eq!(stats.most_accessed[0], ("eeee5555".to_string(), 2));
    }
}
