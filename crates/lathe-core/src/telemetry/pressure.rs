//! Bounded event history with head/tail pruning.

use super::events::EventEnvelope;

/// Result of one pruning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureReport {
    pub before: usize,
    pub after: usize,
}

impl PressureReport {
    pub fn pruned(&self) -> usize {
        self.before - self.after
    }
}

/// Decides when a buffer is too large and what survives a prune.
#[derive(Debug, Clone, Copy)]
pub struct PressureMonitor {
    threshold: usize,
    keep_head: usize,
    keep_tail: usize,
}

impl PressureMonitor {
    pub fn new(threshold: usize, keep_head: usize, keep_tail: usize) -> Self {
        Self {
            threshold,
            keep_head,
            keep_tail,
        }
    }

    pub fn is_over(&self, len: usize) -> bool {
        len > self.threshold
    }

    /// Keep the first `keep_head` and last `keep_tail` items once over
    /// the threshold, discarding the middle.
    pub fn relieve<T>(&self, items: &mut Vec<T>) -> Option<PressureReport> {
        let before = items.len();
        if !self.is_over(before) || before <= self.keep_head + self.keep_tail {
            return None;
        }
        items.drain(self.keep_head..before - self.keep_tail);
        Some(PressureReport {
            before,
            after: items.len(),
        })
    }
}

/// In-memory history of delivered events.
#[derive(Debug, Clone)]
pub struct EventHistory {
    monitor: PressureMonitor,
    entries: Vec<EventEnvelope>,
    pruned_total: usize,
}

impl EventHistory {
    pub fn new(monitor: PressureMonitor) -> Self {
        Self {
            monitor,
            entries: Vec::new(),
            pruned_total: 0,
        }
    }

    /// Append and prune if the history crossed the threshold.
    pub fn push(&mut self, envelope: EventEnvelope) -> Option<PressureReport> {
        self.entries.push(envelope);
        let report = self.monitor.relieve(&mut self.entries)?;
        self.pruned_total += report.pruned();
        tracing::warn!(
            before = report.before,
            after = report.after,
            "event history over pressure threshold, pruned middle"
        );
        Some(report)
    }

    /// Append without checking the threshold.
    pub fn record(&mut self, envelope: EventEnvelope) {
        self.entries.push(envelope);
    }

    pub fn entries(&self) -> &[EventEnvelope] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pruned_total(&self) -> usize {
        self.pruned_total
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
