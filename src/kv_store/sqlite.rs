// SQLite key-value table: kv_store(key TEXT PRIMARY KEY, data BLOB, updated_at INTEGER).
// Uses sqlx for async + connection pooling. One row per (target, series) key.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use super::KvStore;

pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All rows whose key starts with `prefix` (every row when `None`), ordered by key.
    #[instrument(skip(self), fields(store = "sqlite", operation = "entries"))]
    pub async fn entries(&self, prefix: Option<&str>) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let escaped = prefix
            .unwrap_or("")
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let rows = sqlx::query(
            "SELECT key, data FROM kv_store WHERE key LIKE $1 ESCAPE '\\' ORDER BY key ASC",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let data: Vec<u8> = row.try_get("data")?;
            out.push((key, data));
        }
        Ok(out)
    }
}

impl KvStore for SqliteKvStore {
    #[instrument(skip(self), fields(store = "sqlite", operation = "get"))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT data FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: Vec<u8> = row.try_get("data")?;
        Ok(Some(data))
    }

    #[instrument(skip(self, value), fields(store = "sqlite", operation = "set", bytes = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_millis() as i64;
        sqlx::query(
            "INSERT INTO kv_store (key, data, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&value)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
