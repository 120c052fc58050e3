//! Debounced progress snapshots.

use std::time::Duration;

use tokio::time::Instant;

use super::events::ProgressSnapshot;

/// Leading-edge debounce: the first update in a quiet period is delivered
/// at once, later ones coalesce into a single trailing flush at the end of
/// the window.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    window: Duration,
    last_flush: Option<Instant>,
    pending: Option<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_flush: None,
            pending: None,
        }
    }

    /// Offer a snapshot; returns it when it should be delivered now.
    pub fn update(&mut self, snapshot: ProgressSnapshot, now: Instant) -> Option<ProgressSnapshot> {
        let quiet = self
            .last_flush
            .map_or(true, |last| now.duration_since(last) >= self.window);
        if quiet && self.pending.is_none() {
            self.last_flush = Some(now);
            return Some(snapshot);
        }
        self.pending = Some(snapshot);
        if quiet {
            return self.poll(now);
        }
        None
    }

    /// When the pending trailing flush is due.
    pub fn deadline(&self) -> Option<Instant> {
        match (&self.pending, self.last_flush) {
            (Some(_), Some(last)) => Some(last + self.window),
            (Some(_), None) => Some(Instant::now()),
            _ => None,
        }
    }

    /// Deliver the trailing snapshot if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        let due = self.deadline().is_some_and(|deadline| now >= deadline);
        if !due {
            return None;
        }
        self.last_flush = Some(now);
        self.pending.take()
    }

    /// Deliver whatever is pending, ignoring the window.
    pub fn flush(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        let pending = self.pending.take()?;
        self.last_flush = Some(now);
        Some(pending)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
