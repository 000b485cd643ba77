use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

use common::{PersistedSignal, Result, SignalStore};

/// Sqlite-backed adapter. The whole record travels as one JSON column and is
/// replaced in a single upsert statement, so readers see either the old or
/// the new record, never a mix.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the signals table if needed. Use a URL like
    /// `sqlite://sigil.db?mode=rwc` to create the file on first run.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                symbol     TEXT PRIMARY KEY,
                version    INTEGER NOT NULL,
                record     TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(url, "SqliteStore ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl SignalStore for SqliteStore {
    async fn write_signal_data(&self, symbol: &str, record: &PersistedSignal) -> Result<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO signals (symbol, version, record, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(symbol) DO UPDATE SET
                version = excluded.version,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(symbol)
        .bind(record.version as i64)
        .bind(json)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_signal_data(&self, symbol: &str) -> Result<Option<PersistedSignal>> {
        let row = sqlx::query("SELECT record FROM signals WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("record");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn clear_signal_data(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM signals WHERE symbol = ?1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
