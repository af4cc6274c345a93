//! The streaming transformation: raw message to bronze, silver and gold.
//!
//! ```text
//! RawMessage -> window -> bronze
//!            -> decode -> validate -> enrich -> window -> silver
//!                                                      -> accumulate -> (watermark) -> gold
//! ```

use std::time::Duration;

use jiff::Timestamp;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vitals_core::{FixedWindows, RawMessage, Window, decode, enrich, validate};

use crate::sink::{GoldRow, GoldSink, LineSink};
use crate::state::PipelineState;
use crate::store::WindowStore;
use crate::watermark::Watermark;

/// Default limit on gold rows held for retry while the warehouse is failing.
pub const DEFAULT_MAX_PENDING_ROWS: usize = 100_000;

/// Which timestamp a message is windowed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDomain {
    /// The transport's publish time. Every tier sees the same window.
    Publish,
    /// Wall-clock time when the pipeline handles the message.
    Processing,
}

/// What to do with windows that are still open at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainPolicy {
    /// Write partial aggregates to gold.
    Emit,
    /// Drop them.
    Discard,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub windows: FixedWindows,
    pub time_domain: TimeDomain,
    pub allowed_lateness: Duration,
    pub idle_timeout: Duration,
    pub tick_interval: Duration,
    pub drain: DrainPolicy,
    /// Gold rows kept for retry before the oldest are dropped.
    pub max_pending_rows: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            windows: FixedWindows::default(),
            time_domain: TimeDomain::Publish,
            allowed_lateness: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            tick_interval: Duration::from_secs(5),
            drain: DrainPolicy::Emit,
            max_pending_rows: DEFAULT_MAX_PENDING_ROWS,
        }
    }
}

pub struct Pipeline<B, S, G> {
    options: PipelineOptions,
    bronze: B,
    silver: S,
    gold: G,
    store: WindowStore,
    watermark: Watermark,
    /// Closed-window rows the gold sink has not accepted yet.
    pending: Vec<GoldRow>,
    state: PipelineState,
}

impl<B, S, G> Pipeline<B, S, G>
where
    B: LineSink,
    S: LineSink,
    G: GoldSink,
{
    pub fn new(options: PipelineOptions, bronze: B, silver: S, gold: G, state: PipelineState) -> Self {
        let watermark = Watermark::new(
            options.time_domain,
            options.allowed_lateness,
            options.idle_timeout,
        );

        Self {
            options,
            bronze,
            silver,
            gold,
            store: WindowStore::new(),
            watermark,
            pending: Vec::new(),
            state,
        }
    }

    fn window_for(&self, message: &RawMessage, now: Timestamp) -> Window {
        let at = match self.options.time_domain {
            TimeDomain::Publish => message.publish_time,
            TimeDomain::Processing => now,
        };
        self.options.windows.assign(at)
    }

    /// Run one message through every stage. `now` is the time it is handled.
    ///
    /// Nothing here fails: bad payloads and sink errors are logged, counted
    /// and confined to this message.
    pub async fn process(&mut self, message: RawMessage, now: Timestamp) {
        self.state.update(|s| s.received += 1).await;
        self.watermark.observe(message.publish_time, now);

        let raw_window = self.window_for(&message, now);
        if let Err(e) = self.bronze.append(raw_window, message.raw_line()).await {
            error!(error = %e, window = %raw_window, message_id = %message.id.0, "Failed to write raw record");
            self.state.update(|s| s.bronze_write_failures += 1).await;
        }

        let Some(reading) = decode(&message.payload) else {
            debug!(message_id = %message.id.0, "Dropping undecodable payload");
            self.state.update(|s| s.decode_failures += 1).await;
            return;
        };

        let Some(valid) = validate(reading) else {
            debug!(message_id = %message.id.0, "Dropping invalid reading");
            self.state.update(|s| s.rejected += 1).await;
            return;
        };

        let enriched = enrich(valid);
        self.state.update(|s| s.enriched += 1).await;

        let window = self.window_for(&message, now);
        match serde_json::to_string(&enriched) {
            Ok(line) => {
                if let Err(e) = self.silver.append(window, line).await {
                    error!(error = %e, %window, message_id = %message.id.0, "Failed to write clean record");
                    self.state.update(|s| s.silver_write_failures += 1).await;
                }
            }
            Err(e) => {
                error!(error = %e, message_id = %message.id.0, "Failed to encode clean record");
                self.state.update(|s| s.silver_write_failures += 1).await;
            }
        }

        if self.watermark.is_closed(window) {
            warn!(
                %window,
                patient_id = %enriched.reading.patient_id,
                watermark = self.watermark.current(),
                "Late reading excluded from aggregates"
            );
            self.state.update(|s| s.late += 1).await;
            return;
        }

        if self.store.accumulate(window, &enriched) {
            self.record_open_windows().await;
        }
    }

    /// Advance the watermark to `now`, write every newly closed window to
    /// gold and finalise its bronze and silver partitions.
    pub async fn advance(&mut self, now: Timestamp) {
        let cutoff = self.watermark.advance(now);

        let mut rows = std::mem::take(&mut self.pending);
        rows.extend(self.store.close_through(cutoff));
        self.write_gold(rows).await;

        self.close_partitions(cutoff).await;
        self.record_open_windows().await;
    }

    /// Apply the drain policy to open windows and finalise every partition.
    pub async fn shutdown(&mut self) {
        let mut rows = std::mem::take(&mut self.pending);

        match self.options.drain {
            DrainPolicy::Emit => {
                let partial = self.store.close_through(i64::MAX);
                info!(count = partial.len(), "Emitting partial aggregates");
                rows.extend(partial);
            }
            DrainPolicy::Discard => {
                let dropped = self.store.discard_through(i64::MAX);
                warn!(count = dropped, "Discarding partial aggregates");
                self.state
                    .update(|s| s.aggregates_discarded += dropped as u64)
                    .await;
            }
        }

        self.write_gold(rows).await;
        if !self.pending.is_empty() {
            error!(count = self.pending.len(), "Aggregates lost at shutdown");
            self.pending.clear();
            self.state.update(|s| s.pending_rows = 0).await;
        }

        self.close_partitions(i64::MAX).await;
        self.record_open_windows().await;
    }

    /// Consume `rx` until it closes or `cancel` fires, then drain what is
    /// already buffered and shut down.
    pub async fn run(mut self, mut rx: mpsc::Receiver<RawMessage>, cancel: CancellationToken) {
        info!(
            window_secs = self.options.windows.size_secs(),
            time_domain = ?self.options.time_domain,
            drain = ?self.options.drain,
            "Pipeline started"
        );

        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Pipeline shutting down");
                    break;
                }
                // Ticks come before messages so a saturated channel cannot
                // hold back window closure.
                _ = ticker.tick() => self.advance(Timestamp::now()).await,
                message = rx.recv() => match message {
                    Some(message) => self.process(message, Timestamp::now()).await,
                    None => {
                        info!("Source closed");
                        break;
                    }
                },
            }
        }

        // Everything already accepted from the source is still processed.
        rx.close();
        let mut drained = 0u64;
        while let Some(message) = rx.recv().await {
            self.process(message, Timestamp::now()).await;
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "Drained buffered messages");
        }

        self.shutdown().await;
        info!("Pipeline stopped");
    }

    async fn write_gold(&mut self, rows: Vec<GoldRow>) {
        if rows.is_empty() {
            return;
        }

        match self.gold.append(&rows).await {
            Ok(()) => {
                info!(rows = rows.len(), "Wrote aggregates");
                self.state
                    .update(|s| {
                        s.aggregates_emitted += rows.len() as u64;
                        s.pending_rows = 0;
                    })
                    .await;
            }
            Err(e) => {
                error!(error = %e, rows = rows.len(), "Failed to write aggregates, will retry");
                let mut rows = rows;
                let overflow = rows.len().saturating_sub(self.options.max_pending_rows);
                if overflow > 0 {
                    // Oldest windows go first.
                    rows.drain(..overflow);
                    error!(count = overflow, "Pending aggregates over limit, dropping oldest");
                }

                let pending = rows.len() as u64;
                self.state
                    .update(|s| {
                        s.gold_write_failures += 1;
                        s.aggregates_dropped += overflow as u64;
                        s.pending_rows = pending;
                    })
                    .await;
                self.pending = rows;
            }
        }
    }

    async fn close_partitions(&self, cutoff: i64) {
        match self.bronze.close_through(cutoff).await {
            Ok(0) => {}
            Ok(n) => debug!(partitions = n, "Closed raw partitions"),
            Err(e) => {
                error!(error = %e, cutoff, "Failed to close raw partitions");
                self.state.update(|s| s.bronze_write_failures += 1).await;
            }
        }

        match self.silver.close_through(cutoff).await {
            Ok(0) => {}
            Ok(n) => debug!(partitions = n, "Closed clean partitions"),
            Err(e) => {
                error!(error = %e, cutoff, "Failed to close clean partitions");
                self.state.update(|s| s.silver_write_failures += 1).await;
            }
        }
    }

    async fn record_open_windows(&self) {
        let open = self.store.open_windows().len() as u64;
        self.state.update(|s| s.windows_open = open).await;
    }
}
