use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

/// Counters describing what the pipeline has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Messages pulled from the source.
    pub received: u64,
    /// Payloads that could not be decoded.
    pub decode_failures: u64,
    /// Decoded readings rejected by validation.
    pub rejected: u64,
    /// Readings that passed validation and were scored.
    pub enriched: u64,
    /// Enriched readings whose window had already closed.
    pub late: u64,
    /// Per-patient summaries handed to the gold sink.
    pub aggregates_emitted: u64,
    /// Summaries dropped by the discard drain policy.
    pub aggregates_discarded: u64,
    /// Summaries dropped because the retry buffer was full.
    pub aggregates_dropped: u64,
    /// Summaries waiting to be retried against the gold sink.
    pub pending_rows: u64,
    pub bronze_write_failures: u64,
    pub silver_write_failures: u64,
    pub gold_write_failures: u64,
    /// Windows with at least one open accumulator.
    pub windows_open: u64,
    pub uptime_secs: u64,
}

/// Shared, cloneable handle on the pipeline counters.
pub struct PipelineState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    stats: PipelineStats,
    startup_time: Instant,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                stats: PipelineStats::default(),
                startup_time: Instant::now(),
            })),
        }
    }

    /// Apply `f` to the counters under the lock.
    pub async fn update(&self, f: impl FnOnce(&mut PipelineStats)) {
        let mut inner = self.inner.lock().await;
        f(&mut inner.stats);
    }

    /// Copy of the current counters, with uptime filled in.
    pub async fn snapshot(&self) -> PipelineStats {
        let inner = self.inner.lock().await;
        PipelineStats {
            uptime_secs: inner.startup_time.elapsed().as_secs(),
            ..inner.stats
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PipelineState {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
