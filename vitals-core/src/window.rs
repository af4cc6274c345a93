//! Fixed, epoch-aligned time windows.

use std::num::NonZeroU32;

use jiff::Timestamp;

use crate::Window;

pub const DEFAULT_WINDOW_SECS: u32 = 60;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Non-overlapping windows of a fixed length, aligned to the Unix epoch.
///
/// Window `n` covers `[size * n, size * (n + 1))` seconds. Assignment depends
/// only on the timestamp, so it can be repeated anywhere in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindows {
    size: NonZeroU32,
}

impl FixedWindows {
    pub fn new(size_secs: NonZeroU32) -> Self {
        Self { size: size_secs }
    }

    pub fn size_secs(&self) -> i64 {
        i64::from(self.size.get())
    }

    /// The window containing `timestamp`.
    pub fn assign(&self, timestamp: Timestamp) -> Window {
        // Floor division on the exact nanosecond count, so instants just
        // before a boundary (including pre-epoch ones) land in the earlier window.
        let size_nanos = i128::from(self.size.get()) * NANOS_PER_SEC;
        let index = timestamp.as_nanosecond().div_euclid(size_nanos);
        let start = (index * i128::from(self.size.get())) as i64;

        Window {
            start,
            end: start + self.size_secs(),
        }
    }
}

impl Default for FixedWindows {
    fn default() -> Self {
        Self {
            size: NonZeroU32::new(DEFAULT_WINDOW_SECS).unwrap_or(NonZeroU32::MIN),
        }
    }
}
