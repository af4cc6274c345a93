use std::path::Path;

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use super::{GoldRow, GoldSink};

#[derive(Debug, thiserror::Error)]
pub enum SqliteGoldError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Gold table in a local SQLite database.
#[derive(Clone)]
pub struct SqliteGoldSink {
    pool: SqlitePool,
    table: String,
}

impl SqliteGoldSink {
    /// Open (creating if missing) the database at `path`.
    ///
    /// `table` must already be a validated identifier; it is interpolated
    /// into the DDL and insert statements.
    pub async fn new(path: impl AsRef<Path>, table: impl Into<String>) -> Result<Self, SqliteGoldError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Ok(Self {
            pool,
            table: table.into(),
        })
    }

    pub async fn new_in_memory(table: impl Into<String>) -> Result<Self, SqliteGoldError> {
        // Every connection to `sqlite::memory:` is a separate database, so
        // the pool must never open a second one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self {
            pool,
            table: table.into(),
        })
    }
}

#[async_trait]
impl GoldSink for SqliteGoldSink {
    type Error = SqliteGoldError;

    async fn ensure_table(&self) -> Result<(), Self::Error> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                patient_id TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                count INTEGER NOT NULL CHECK (count > 0),
                avg_heart_rate REAL NOT NULL,
                avg_spo2 REAL NOT NULL,
                avg_temperature REAL NOT NULL,
                avg_bp_systolic REAL NOT NULL,
                avg_bp_diastolic REAL NOT NULL,
                risk_level TEXT NOT NULL CHECK (risk_level IN ('Low', 'Medium', 'High'))
            )
            "#,
            table = self.table
        );

        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn append(&self, rows: &[GoldRow]) -> Result<(), Self::Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let insert = format!(
            r#"
            INSERT INTO {table} (patient_id, window_start, window_end, count, avg_heart_rate, avg_spo2, avg_temperature, avg_bp_systolic, avg_bp_diastolic, risk_level)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            table = self.table
        );

        let mut tx = self.pool.begin().await?;

        for row in rows {
            let summary = &row.summary;
            sqlx::query(&insert)
                .bind(summary.patient_id.as_str())
                .bind(row.window.start)
                .bind(row.window.end)
                .bind(summary.count as i64)
                .bind(summary.avg_heart_rate)
                .bind(summary.avg_spo2)
                .bind(summary.avg_temperature)
                .bind(summary.avg_bp_systolic)
                .bind(summary.avg_bp_diastolic)
                .bind(summary.risk_level.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
