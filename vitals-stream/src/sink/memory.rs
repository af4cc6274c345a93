use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use vitals_core::Window;

use super::{GoldRow, GoldSink, LineSink};

#[derive(Debug, thiserror::Error)]
pub enum MemorySinkError {
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(String),
}

impl<T> From<PoisonError<T>> for MemorySinkError {
    fn from(err: PoisonError<T>) -> Self {
        MemorySinkError::MutexPoisoned(err.to_string())
    }
}

#[derive(Default)]
struct Partitions {
    lines: BTreeMap<Window, Vec<String>>,
    closed: BTreeSet<Window>,
}

/// In-memory line sink.
/// This is primarily intended for testing and as a reference
/// implementation of the LineSink trait.
#[derive(Clone, Default)]
pub struct MemoryLineSink {
    partitions: Arc<Mutex<Partitions>>,
}

impl MemoryLineSink {
    /// Lines written to `window`, in arrival order.
    pub fn lines(&self, window: Window) -> Vec<String> {
        self.partitions
            .lock()
            .map(|p| p.lines.get(&window).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// All lines across all windows, ordered by window.
    pub fn all_lines(&self) -> Vec<String> {
        self.partitions
            .lock()
            .map(|p| p.lines.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn windows(&self) -> Vec<Window> {
        self.partitions
            .lock()
            .map(|p| p.lines.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, window: Window) -> bool {
        self.partitions
            .lock()
            .map(|p| p.closed.contains(&window))
            .unwrap_or(false)
    }
}

#[async_trait]
impl LineSink for MemoryLineSink {
    type Error = MemorySinkError;

    async fn append(&self, window: Window, line: String) -> Result<(), Self::Error> {
        let mut partitions = self.partitions.lock()?;
        partitions.lines.entry(window).or_default().push(line);
        Ok(())
    }

    async fn close_through(&self, cutoff: i64) -> Result<usize, Self::Error> {
        let mut partitions = self.partitions.lock()?;

        let closing: Vec<Window> = partitions
            .lines
            .keys()
            .filter(|w| w.end <= cutoff)
            .filter(|w| !partitions.closed.contains(*w))
            .copied()
            .collect();

        partitions.closed.extend(closing.iter().copied());
        Ok(closing.len())
    }
}

#[derive(Clone, Default)]
pub struct MemoryGoldSink {
    rows: Arc<Mutex<Vec<GoldRow>>>,
    table_created: Arc<Mutex<bool>>,
}

impl MemoryGoldSink {
    pub fn rows(&self) -> Vec<GoldRow> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn table_created(&self) -> bool {
        self.table_created.lock().map(|c| *c).unwrap_or(false)
    }
}

#[async_trait]
impl GoldSink for MemoryGoldSink {
    type Error = MemorySinkError;

    async fn ensure_table(&self) -> Result<(), Self::Error> {
        *self.table_created.lock()? = true;
        Ok(())
    }

    async fn append(&self, rows: &[GoldRow]) -> Result<(), Self::Error> {
        self.rows.lock()?.extend_from_slice(rows);
        Ok(())
    }
}
