pub mod clickhouse;
pub mod file;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use vitals_core::{AggregateSummary, Window};

/// Append-only, window-partitioned text output used by the bronze and silver
/// tiers. Every value is one line.
#[async_trait]
pub trait LineSink: Send + Sync + 'static {
    /// Error type specific to this sink implementation
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append one line to the partition of `window`.
    async fn append(&self, window: Window, line: String) -> Result<(), Self::Error>;

    /// Finalise every partition whose window ends at or before `cutoff`
    /// (seconds since the epoch). Returns the number of partitions finalised.
    async fn close_through(&self, cutoff: i64) -> Result<usize, Self::Error>;
}

/// One row of the gold table.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldRow {
    pub window: Window,
    pub summary: AggregateSummary,
}

/// Tabular destination for per-patient window summaries.
#[async_trait]
pub trait GoldSink: Send + Sync + 'static {
    /// Error type specific to this sink implementation
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create the destination table if it does not exist yet. Idempotent.
    async fn ensure_table(&self) -> Result<(), Self::Error>;

    /// Append rows to the destination table.
    async fn append(&self, rows: &[GoldRow]) -> Result<(), Self::Error>;
}
