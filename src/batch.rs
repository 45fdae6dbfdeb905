use std::time::{Duration, Instant};

use crate::config::EngineConfig;

/// Coalesces requests and releases them at most once per interval.
///
/// Owned by whoever renders rows; nothing here is global. Time is passed in,
/// so callers drive it from their own event loop.
pub struct BatchQueue<T> {
    pending: Vec<T>,
    interval: Duration,
    last_flush: Option<Instant>,
}

impl<T> BatchQueue<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: Vec::new(),
            interval,
            last_flush: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Duration::from_millis(config.batch_interval_ms))
    }

    pub fn push(&mut self, item: T) {
        self.pending.push(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) {
        self.pending.extend(items);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The pending batch, if there is one and the interval has passed since
    /// the last release.
    pub fn flush_due(&mut self, now: Instant) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            return None;
        }
        let due = match self.last_flush {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if !due {
            return None;
        }
        self.last_flush = Some(now);
        Some(std::mem::take(&mut self.pending))
    }

    pub fn flush_now(&mut self) -> Vec<T> {
        self.last_flush = Some(Instant::now());
        std::mem::take(&mut self.pending)
    }
}
