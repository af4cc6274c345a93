use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

use super::{GoldRow, GoldSink};

#[derive(Debug, thiserror::Error)]
pub enum ClickHouseGoldError {
    #[error("clickhouse error: {0}")]
    Client(#[from] clickhouse::error::Error),
}

/// Creates a ClickHouse client configured for the given URL and database.
pub fn create_client(url: &str, database: &str) -> Client {
    Client::default().with_url(url).with_database(database)
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
struct GoldRecord {
    patient_id: String,
    window_start: i64,
    window_end: i64,
    count: u64,
    avg_heart_rate: f64,
    avg_spo2: f64,
    avg_temperature: f64,
    avg_bp_systolic: f64,
    avg_bp_diastolic: f64,
    risk_level: String,
}

impl From<&GoldRow> for GoldRecord {
    fn from(row: &GoldRow) -> Self {
        let summary = &row.summary;
        GoldRecord {
            patient_id: summary.patient_id.to_string(),
            window_start: row.window.start,
            window_end: row.window.end,
            count: summary.count,
            avg_heart_rate: summary.avg_heart_rate,
            avg_spo2: summary.avg_spo2,
            avg_temperature: summary.avg_temperature,
            avg_bp_systolic: summary.avg_bp_systolic,
            avg_bp_diastolic: summary.avg_bp_diastolic,
            risk_level: summary.risk_level.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ClickHouseGoldSink {
    client: Client,
    table: String,
}

impl ClickHouseGoldSink {
    pub fn new(url: &str, database: &str, table: impl Into<String>) -> Self {
        Self {
            client: create_client(url, database),
            table: table.into(),
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {} (
    patient_id String,
    window_start Int64,
    window_end Int64,
    count UInt64,
    avg_heart_rate Float64,
    avg_spo2 Float64,
    avg_temperature Float64,
    avg_bp_systolic Float64,
    avg_bp_diastolic Float64,
    risk_level LowCardinality(String)
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(toDateTime(window_start))
ORDER BY (patient_id, window_start)
"#,
            self.table
        )
    }
}

#[async_trait]
impl GoldSink for ClickHouseGoldSink {
    type Error = ClickHouseGoldError;

    async fn ensure_table(&self) -> Result<(), Self::Error> {
        self.client.query(&self.create_table_sql()).execute().await?;
        Ok(())
    }

    async fn append(&self, rows: &[GoldRow]) -> Result<(), Self::Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert(&self.table)?;
        for row in rows {
            insert.write(&GoldRecord::from(row)).await?;
        }
        insert.end().await?;
        Ok(())
    }
}
