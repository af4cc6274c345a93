use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use vitals_core::Window;

use crate::pipeline::TimeDomain;

/// Tracks how far the stream is known to be complete, in seconds since the
/// epoch. Never moves backwards.
#[derive(Debug, Clone)]
pub struct Watermark {
    domain: TimeDomain,
    lateness: i64,
    idle_timeout: i64,
    max_seen: Option<Timestamp>,
    last_input: Option<Timestamp>,
    current: i64,
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

impl Watermark {
    pub fn new(domain: TimeDomain, lateness: Duration, idle_timeout: Duration) -> Self {
        Self {
            domain,
            lateness: secs(lateness),
            idle_timeout: secs(idle_timeout),
            max_seen: None,
            last_input: None,
            current: i64::MIN,
        }
    }

    /// Record a message published at `publish_time` and received at `now`.
    ///
    /// Publish times later than `now` plus the allowed lateness are clamped
    /// to that bound.
    pub fn observe(&mut self, publish_time: Timestamp, now: Timestamp) {
        let horizon = now
            .checked_add(SignedDuration::from_secs(self.lateness))
            .unwrap_or(now);
        self.max_seen = self.max_seen.max(Some(publish_time.min(horizon)));
        self.last_input = Some(now);
    }

    /// Move the watermark forward as far as `now` allows and return it.
    pub fn advance(&mut self, now: Timestamp) -> i64 {
        let reference = match self.domain {
            TimeDomain::Processing => Some(now),
            TimeDomain::Publish => {
                let idle = self
                    .last_input
                    .is_some_and(|last| now.as_second().saturating_sub(last.as_second()) >= self.idle_timeout);
                if idle {
                    self.max_seen = self.max_seen.max(Some(now));
                }
                self.max_seen
            }
        };

        if let Some(reference) = reference {
            let candidate = reference.as_second().saturating_sub(self.lateness);
            self.current = self.current.max(candidate);
        }

        self.current
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    /// A window is closed once its end is at or before the watermark.
    pub fn is_closed(&self, window: Window) -> bool {
        window.end <= self.current
    }
}
