//! Event sinks.
//!
//! Sinks must return promptly; the pipeline calls them inline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::events::EventEnvelope;

/// Destination of delivered events.
pub trait TelemetrySink: Send + Sync {
    /// Lifecycle, tool, progress and diagnostic events.
    fn on_event(&self, envelope: &EventEnvelope);

    /// Content, reasoning and tool-argument deltas.
    fn on_stream(&self, envelope: &EventEnvelope) {
        self.on_event(envelope);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn on_event(&self, _envelope: &EventEnvelope) {}
}

/// Forwards to a closure.
#[derive(Clone)]
pub struct CallbackSink {
    callback: Arc<dyn Fn(&EventEnvelope) + Send + Sync>,
}

impl CallbackSink {
    pub fn new(callback: impl Fn(&EventEnvelope) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl TelemetrySink for CallbackSink {
    fn on_event(&self, envelope: &EventEnvelope) {
        (self.callback)(envelope);
    }
}

/// Bounded channel sink. Drops and counts events when the receiver lags.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<EventEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelSink {
    fn on_event(&self, envelope: &EventEnvelope) {
        if self.tx.try_send(envelope.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::events::StreamEvent;
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(seq: u64) -> EventEnvelope {
        EventEnvelope {
            run_id: Uuid::nil(),
            seq,
            timestamp: Utc::now(),
            event: StreamEvent::ContentDelta {
                text: seq.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelSink::new(2);
        for seq in 0..5 {
            sink.on_stream(&envelope(seq));
        }
        assert_eq!(sink.dropped(), 3);
        assert_eq!(rx.recv().await.map(|e| e.seq), Some(0));
        assert_eq!(rx.recv().await.map(|e| e.seq), Some(1));
    }

    #[test]
    fn callback_sink_sees_every_event() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let sink = CallbackSink::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.on_event(&envelope(0));
        sink.on_stream(&envelope(1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
