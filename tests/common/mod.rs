//! Shared helpers for the cross-crate tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use lathe::config::{RetryConfig, RuntimeConfig};
use lathe::provider::ScriptedTurn;
use lathe::telemetry::{CallbackSink, EventEnvelope, StreamEvent};
use lathe::types::{FinishReason, TransportEvent};

/// Events captured by [`recording_sink`].
pub type Recorded = Arc<Mutex<Vec<EventEnvelope>>>;

/// Retry quickly so failure paths finish fast.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig::builder()
        .retry(
            RetryConfig::builder()
                .base_delay_ms(5)
                .max_delay_ms(20)
                .build(),
        )
        .build()
}

/// A turn that streams one native tool call.
pub fn tool_turn(id: &str, name: &str, arguments: &str) -> ScriptedTurn {
    ScriptedTurn::events(vec![
        TransportEvent::tool_delta(id, Some(name), arguments),
        TransportEvent::completed(FinishReason::ToolCalls),
    ])
}

pub fn recording_sink() -> (Arc<CallbackSink>, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&recorded);
    let sink = CallbackSink::new(move |envelope: &EventEnvelope| {
        seen.lock().unwrap().push(envelope.clone());
    });
    (Arc::new(sink), recorded)
}

pub fn events(recorded: &Recorded) -> Vec<StreamEvent> {
    recorded
        .lock()
        .unwrap()
        .iter()
        .map(|envelope| envelope.event.clone())
        .collect()
}
