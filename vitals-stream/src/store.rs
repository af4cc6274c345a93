use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use vitals_core::{Accumulator, EnrichedReading, Window, WindowKey};

use crate::sink::GoldRow;

/// Open aggregation state keyed by `(window, patient)`.
///
/// Only the running [`Accumulator`] of each key is kept, never the readings
/// themselves.
#[derive(Clone, Default)]
pub struct WindowStore {
    groups: Arc<DashMap<WindowKey, Accumulator>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `reading` into its group. Returns `true` if the group is new.
    pub fn accumulate(&self, window: Window, reading: &EnrichedReading) -> bool {
        let key = WindowKey {
            window,
            patient_id: reading.reading.patient_id.clone(),
        };

        match self.groups.entry(key) {
            Entry::Occupied(mut group) => {
                group.get_mut().add(reading);
                false
            }
            Entry::Vacant(slot) => {
                let mut acc = Accumulator::default();
                acc.add(reading);
                slot.insert(acc);
                true
            }
        }
    }

    /// Remove every group whose window ends at or before `cutoff` and return
    /// its summary, ordered by window and then patient.
    pub fn close_through(&self, cutoff: i64) -> Vec<GoldRow> {
        let mut closing: Vec<WindowKey> = self
            .groups
            .iter()
            .filter(|entry| entry.key().window.end <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        closing.sort();

        closing
            .into_iter()
            .filter_map(|key| self.groups.remove(&key))
            .filter_map(|(key, acc)| {
                acc.finish(key.patient_id).map(|summary| GoldRow {
                    window: key.window,
                    summary,
                })
            })
            .collect()
    }

    /// Drop every group whose window ends at or before `cutoff`. Returns the
    /// number of groups dropped.
    pub fn discard_through(&self, cutoff: i64) -> usize {
        let before = self.groups.len();
        self.groups.retain(|key, _| key.window.end > cutoff);
        before - self.groups.len()
    }

    /// Number of open `(window, patient)` groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Distinct windows with at least one open group, in order.
    pub fn open_windows(&self) -> Vec<Window> {
        self.groups
            .iter()
            .map(|entry| entry.key().window)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
