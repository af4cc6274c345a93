use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vitals_core::{PatientId, RawMessage, RiskLevel, Window};
use vitals_stream::{
    DrainPolicy, GoldRow, GoldSink, LineSink, MemoryGoldSink, MemoryLineSink, Pipeline,
    PipelineOptions, PipelineState,
};

const FIRST: Window = Window { start: 0, end: 60 };
const SECOND: Window = Window { start: 60, end: 120 };

fn at(second: i64) -> Timestamp {
    Timestamp::from_second(second).unwrap()
}

fn reading(patient: &str, heart_rate: u32, spo2: u32, temperature: u32, bp: (u32, u32)) -> String {
    format!(
        r#"{{"patient_id":"{patient}","heart_rate":{heart_rate},"spo2":{spo2},"temperature":{temperature},"bp_systolic":{},"bp_diastolic":{}}}"#,
        bp.0, bp.1
    )
}

fn message(payload: &str, published: i64) -> RawMessage {
    RawMessage::new(payload.as_bytes().to_vec(), at(published))
}

struct Harness<G> {
    pipeline: Pipeline<MemoryLineSink, MemoryLineSink, G>,
    bronze: MemoryLineSink,
    silver: MemoryLineSink,
    state: PipelineState,
}

fn harness<G: GoldSink>(options: PipelineOptions, gold: G) -> Harness<G> {
    let bronze = MemoryLineSink::default();
    let silver = MemoryLineSink::default();
    let state = PipelineState::new();
    let pipeline = Pipeline::new(options, bronze.clone(), silver.clone(), gold, state.clone());

    Harness {
        pipeline,
        bronze,
        silver,
        state,
    }
}

#[tokio::test]
async fn closed_windows_produce_one_row_per_patient() {
    let gold = MemoryGoldSink::default();
    let mut h = harness(PipelineOptions::default(), gold.clone());

    h.pipeline
        .process(message(&reading("P1", 80, 96, 37, (120, 80)), 10), at(10))
        .await;
    h.pipeline
        .process(message(&reading("P1", 100, 98, 37, (130, 84)), 20), at(20))
        .await;
    h.pipeline
        .process(message(&reading("P2", 120, 50, 39, (110, 70)), 30), at(30))
        .await;
    h.pipeline
        .process(message(&reading("P1", 70, 97, 37, (120, 80)), 70), at(70))
        .await;

    // Watermark = 70 - 10, so only the first window is complete.
    h.pipeline.advance(at(71)).await;

    let rows = gold.rows();
    assert_eq!(rows.len(), 2);

    let p1 = &rows[0];
    assert_eq!(p1.window, FIRST);
    assert_eq!(p1.summary.patient_id, PatientId::new("P1"));
    assert_eq!(p1.summary.count, 2);
    assert_eq!(p1.summary.avg_heart_rate, 90.0);
    assert_eq!(p1.summary.avg_spo2, 97.0);
    assert_eq!(p1.summary.avg_temperature, 37.0);
    assert_eq!(p1.summary.avg_bp_systolic, 125.0);
    assert_eq!(p1.summary.avg_bp_diastolic, 82.0);
    assert_eq!(p1.summary.risk_level, RiskLevel::Medium);

    let p2 = &rows[1];
    assert_eq!(p2.summary.patient_id, PatientId::new("P2"));
    assert_eq!(p2.summary.count, 1);
    assert_eq!(p2.summary.risk_level, RiskLevel::High);

    assert!(h.bronze.is_closed(FIRST));
    assert!(h.silver.is_closed(FIRST));
    assert!(!h.bronze.is_closed(SECOND));

    h.pipeline.shutdown().await;

    let rows = gold.rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].window, SECOND);
    assert_eq!(rows[2].summary.avg_heart_rate, 70.0);
    assert!(h.bronze.is_closed(SECOND));
}

#[tokio::test]
async fn malformed_payloads_only_reach_bronze() {
    let gold = MemoryGoldSink::default();
    let mut h = harness(PipelineOptions::default(), gold.clone());

    h.pipeline.process(message("not json", 5), at(5)).await;
    h.pipeline
        .process(message(r#"{"patient_id": "P1", "heart_rate": 80"#, 6), at(6))
        .await;
    h.pipeline
        .process(message(&reading("P1", 121, 97, 37, (120, 80)), 7), at(7))
        .await;
    h.pipeline.shutdown().await;

    assert_eq!(h.bronze.lines(FIRST).len(), 3);
    assert_eq!(h.bronze.lines(FIRST)[0], "not json");
    assert!(h.silver.all_lines().is_empty());
    assert!(gold.rows().is_empty());

    let stats = h.state.snapshot().await;
    assert_eq!(stats.received, 3);
    assert_eq!(stats.decode_failures, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.enriched, 0);
}

#[tokio::test]
async fn late_readings_stay_out_of_gold() {
    let gold = MemoryGoldSink::default();
    let mut h = harness(PipelineOptions::default(), gold.clone());

    h.pipeline
        .process(message(&reading("P1", 80, 97, 37, (120, 80)), 75), at(75))
        .await;
    h.pipeline.advance(at(76)).await;

    // Published inside a window the watermark has already passed.
    h.pipeline
        .process(message(&reading("P1", 90, 97, 37, (120, 80)), 30), at(77))
        .await;
    h.pipeline.shutdown().await;

    assert_eq!(h.bronze.lines(FIRST).len(), 1);
    assert_eq!(h.silver.lines(FIRST).len(), 1);

    let rows = gold.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].window, SECOND);
    assert_eq!(rows[0].summary.avg_heart_rate, 80.0);

    assert_eq!(h.state.snapshot().await.late, 1);
}

#[tokio::test]
async fn discard_policy_drops_open_windows() {
    let gold = MemoryGoldSink::default();
    let options = PipelineOptions {
        drain: DrainPolicy::Discard,
        ..Default::default()
    };
    let mut h = harness(options, gold.clone());

    h.pipeline
        .process(message(&reading("P1", 80, 97, 37, (120, 80)), 10), at(10))
        .await;
    h.pipeline
        .process(message(&reading("P2", 80, 97, 37, (120, 80)), 70), at(70))
        .await;
    h.pipeline.shutdown().await;

    assert!(gold.rows().is_empty());
    assert!(h.bronze.is_closed(FIRST));
    assert!(h.silver.is_closed(SECOND));

    let stats = h.state.snapshot().await;
    assert_eq!(stats.aggregates_discarded, 2);
    assert_eq!(stats.windows_open, 0);
}

#[derive(Debug, thiserror::Error)]
#[error("warehouse unavailable")]
struct Unavailable;

/// Gold sink that rejects the first `failures` appends.
#[derive(Clone)]
struct FlakyGoldSink {
    failures: Arc<AtomicUsize>,
    inner: MemoryGoldSink,
}

#[async_trait]
impl GoldSink for FlakyGoldSink {
    type Error = Unavailable;

    async fn ensure_table(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn append(&self, rows: &[GoldRow]) -> Result<(), Self::Error> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Unavailable);
        }
        self.inner.append(rows).await.map_err(|_| Unavailable)
    }
}

#[tokio::test]
async fn failed_gold_writes_are_retried() {
    let inner = MemoryGoldSink::default();
    let gold = FlakyGoldSink {
        failures: Arc::new(AtomicUsize::new(1)),
        inner: inner.clone(),
    };
    let mut h = harness(PipelineOptions::default(), gold);

    h.pipeline
        .process(message(&reading("P1", 80, 97, 37, (120, 80)), 10), at(10))
        .await;
    h.pipeline
        .process(message(&reading("P1", 80, 97, 37, (120, 80)), 70), at(70))
        .await;

    h.pipeline.advance(at(71)).await;
    assert!(inner.rows().is_empty());
    let stats = h.state.snapshot().await;
    assert_eq!(stats.gold_write_failures, 1);
    assert_eq!(stats.pending_rows, 1);

    h.pipeline.advance(at(72)).await;
    let rows = inner.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].window, FIRST);
    assert_eq!(h.state.snapshot().await.pending_rows, 0);

    h.pipeline.shutdown().await;
    let rows = inner.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].window, SECOND);
    assert_eq!(h.state.snapshot().await.aggregates_emitted, 2);
}

#[tokio::test]
async fn retry_buffer_keeps_the_newest_rows() {
    let inner = MemoryGoldSink::default();
    let gold = FlakyGoldSink {
        failures: Arc::new(AtomicUsize::new(2)),
        inner: inner.clone(),
    };
    let options = PipelineOptions {
        max_pending_rows: 2,
        ..Default::default()
    };
    let mut h = harness(options, gold);

    for published in [10, 70, 130] {
        h.pipeline
            .process(message(&reading("P1", 80, 97, 37, (120, 80)), published), at(published))
            .await;
    }

    // Watermark 120: two windows close, the write fails and both are kept.
    h.pipeline.advance(at(131)).await;
    assert_eq!(h.state.snapshot().await.pending_rows, 2);

    // Watermark 180: a third window joins them and the oldest is dropped.
    h.pipeline
        .process(message(&reading("P1", 80, 97, 37, (120, 80)), 190), at(190))
        .await;
    h.pipeline.advance(at(191)).await;

    let stats = h.state.snapshot().await;
    assert_eq!(stats.pending_rows, 2);
    assert_eq!(stats.aggregates_dropped, 1);

    h.pipeline.advance(at(192)).await;
    let windows: Vec<Window> = inner.rows().iter().map(|row| row.window).collect();
    assert_eq!(
        windows,
        vec![SECOND, Window { start: 120, end: 180 }]
    );
}

/// Line sink that takes a while for every append.
#[derive(Clone, Default)]
struct SlowLineSink {
    inner: MemoryLineSink,
}

#[async_trait]
impl LineSink for SlowLineSink {
    type Error = <MemoryLineSink as LineSink>::Error;

    async fn append(&self, window: Window, line: String) -> Result<(), Self::Error> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.inner.append(window, line).await
    }

    async fn close_through(&self, cutoff: i64) -> Result<usize, Self::Error> {
        self.inner.close_through(cutoff).await
    }
}

#[tokio::test]
async fn windows_close_while_the_channel_is_backed_up() {
    let gold = MemoryGoldSink::default();
    let state = PipelineState::new();
    let options = PipelineOptions {
        tick_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        options,
        SlowLineSink::default(),
        SlowLineSink::default(),
        gold.clone(),
        state.clone(),
    );

    let (tx, rx) = mpsc::channel(400);
    for i in 0..400 {
        tx.send(message(&reading("P1", 80, 97, 37, (120, 80)), i * 60))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(pipeline.run(rx, cancel.clone()));

    let mut closed_early = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !gold.rows().is_empty() {
            closed_early = state.snapshot().await.received < 400;
            break;
        }
    }

    cancel.cancel();
    handle.await.unwrap();
    drop(tx);

    assert!(closed_early, "no aggregates were written while input was queued");
    assert_eq!(gold.rows().len(), 400);
}

#[tokio::test]
async fn run_processes_until_the_source_closes() {
    let gold = MemoryGoldSink::default();
    let options = PipelineOptions {
        tick_interval: Duration::from_secs(3600),
        ..Default::default()
    };
    let h = harness(options, gold.clone());
    let (tx, rx) = mpsc::channel(8);

    for published in [1, 2, 3] {
        tx.send(message(&reading("P1", 80, 97, 37, (120, 80)), published))
            .await
            .unwrap();
    }
    drop(tx);

    h.pipeline.run(rx, CancellationToken::new()).await;

    let rows = gold.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].summary.count, 3);
    assert!(h.bronze.is_closed(FIRST));
}

#[tokio::test]
async fn cancellation_still_drains_buffered_messages() {
    let gold = MemoryGoldSink::default();
    let h = harness(PipelineOptions::default(), gold.clone());
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    for published in [1, 2, 3, 4] {
        tx.send(message(&reading("P9", 100, 97, 37, (120, 80)), published))
            .await
            .unwrap();
    }
    cancel.cancel();

    h.pipeline.run(rx, cancel).await;

    let rows = gold.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].summary.count, 4);
    assert_eq!(h.state.snapshot().await.received, 4);
    // The sender is still alive; draining must not wait for it.
    drop(tx);
}
