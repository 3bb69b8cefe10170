use crate::config::SourceConfig;
use crate::error::{ComicSyncError, Result};
use crate::models::{ScanLog, TrackedSource};
use crate::traits::CursorStore;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct Database {
    pub pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct SourceRow {
    name: String,
    remote_path: String,
    last_completed_chapter: i64,
    last_check_time: Option<DateTime<Utc>>,
    download_limit: i64,
}

impl From<SourceRow> for TrackedSource {
    fn from(row: SourceRow) -> Self {
        Self {
            name: row.name,
            remote_path: row.remote_path,
            last_completed_chapter: row.last_completed_chapter.max(0) as u32,
            last_check_time: row.last_check_time,
            download_limit: row.download_limit.max(0) as u32,
        }
    }
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        // Extract directory path from database URL
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            let path = std::path::Path::new(path.trim_start_matches("//"));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    debug!("Creating directory: {:?}", parent);
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        info!("Database connected successfully");
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        info!("Initializing database schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_sources (
                name TEXT PRIMARY KEY,
                remote_path TEXT NOT NULL,
                last_completed_chapter INTEGER NOT NULL DEFAULT 0,
                last_check_time DATETIME,
                download_limit INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_logs (
                id TEXT PRIMARY KEY,
                source_name TEXT NOT NULL,
                status TEXT NOT NULL,
                remote_total INTEGER,
                cursor_before INTEGER NOT NULL,
                cursor_after INTEGER NOT NULL,
                chapters_attempted INTEGER NOT NULL DEFAULT 0,
                chapters_completed INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_logs_source_name ON scan_logs (source_name)")
            .execute(&self.pool)
            .await?;

        info!("Database schema initialized successfully");
        Ok(())
    }

    /// Inserts sources from the config file that the database does not know
    /// yet. Cursors already in the database win.
    pub async fn seed_sources(&self, sources: &[SourceConfig]) -> Result<u64> {
        let mut inserted = 0;
        for source in sources {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO tracked_sources
                    (name, remote_path, last_completed_chapter, last_check_time, download_limit, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&source.name)
            .bind(&source.path)
            .bind(source.last_chapter as i64)
            .bind(source.last_check_time)
            .bind(source.download_limit as i64)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        if inserted > 0 {
            info!("🌱 Seeded {} tracked source(s) from config", inserted);
        }
        Ok(inserted)
    }

    pub async fn upsert_source(&self, source: &TrackedSource) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tracked_sources
                (name, remote_path, last_completed_chapter, last_check_time, download_limit, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                remote_path = excluded.remote_path,
                last_completed_chapter = excluded.last_completed_chapter,
                last_check_time = excluded.last_check_time,
                download_limit = excluded.download_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&source.name)
        .bind(&source.remote_path)
        .bind(source.last_completed_chapter as i64)
        .bind(source.last_check_time)
        .bind(source.download_limit as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_source(&self, name: &str) -> Result<Option<TrackedSource>> {
        let row = sqlx::query_as::<_, SourceRow>(
            "SELECT name, remote_path, last_completed_chapter, last_check_time, download_limit FROM tracked_sources WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TrackedSource::from))
    }

    pub async fn create_scan_log(&self, scan_log: &ScanLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_logs (id, source_name, status, remote_total, cursor_before, cursor_after,
                                   chapters_attempted, chapters_completed, error_message, duration_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scan_log.id)
        .bind(&scan_log.source_name)
        .bind(scan_log.status)
        .bind(scan_log.remote_total)
        .bind(scan_log.cursor_before)
        .bind(scan_log.cursor_after)
        .bind(scan_log.chapters_attempted)
        .bind(scan_log.chapters_completed)
        .bind(&scan_log.error_message)
        .bind(scan_log.duration_ms)
        .bind(scan_log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent_scan_logs(&self, limit: u32) -> Result<Vec<ScanLog>> {
        let logs = sqlx::query_as::<_, ScanLog>(
            "SELECT * FROM scan_logs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}

#[async_trait::async_trait]
impl CursorStore for Database {
    async fn list(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM tracked_sources ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn load(&self, source_name: &str) -> Result<TrackedSource> {
        self.get_source(source_name)
            .await?
            .ok_or_else(|| ComicSyncError::source_not_tracked(source_name))
    }

    async fn save(&self, source_name: &str, cursor: &TrackedSource) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_sources
            SET remote_path = ?, last_completed_chapter = ?, last_check_time = ?, download_limit = ?, updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(&cursor.remote_path)
        .bind(cursor.last_completed_chapter as i64)
        .bind(cursor.last_check_time)
        .bind(cursor.download_limit as i64)
        .bind(Utc::now())
        .bind(source_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ComicSyncError::source_not_tracked(source_name));
        }
        Ok(())
    }

    async fn record_pass(&self, log: &ScanLog) -> Result<()> {
        self.create_scan_log(log).await
    }
}
