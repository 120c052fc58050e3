//! In-memory transport that replays scripted turns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{ModelTransport, TransportRequest};
use crate::error::{LatheError, Result};
use crate::types::{FinishReason, TransportEvent};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(TransportEvent),
    /// End the stream with a transport error.
    Fail(String),
    Pause(Duration),
    /// Never yield again.
    Hang,
}

/// The response to one `stream_message` call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// Fail before the stream opens.
    pub open_error: Option<String>,
    pub steps: Vec<ScriptStep>,
}

impl ScriptedTurn {
    pub fn events(events: Vec<TransportEvent>) -> Self {
        Self {
            open_error: None,
            steps: events.into_iter().map(ScriptStep::Event).collect(),
        }
    }

    /// Text streamed in chunks of `chunk_chars`, then `Completed(Stop)`.
    pub fn text(text: &str, chunk_chars: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut events: Vec<TransportEvent> = chars
            .chunks(chunk_chars.max(1))
            .map(|chunk| TransportEvent::content(chunk.iter().collect::<String>()))
            .collect();
        events.push(TransportEvent::completed(FinishReason::Stop));
        Self::events(events)
    }

    /// Fail when the stream is opened.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn pause(self, duration: Duration) -> Self {
        self.then(ScriptStep::Pause(duration))
    }

    pub fn hang(self) -> Self {
        self.then(ScriptStep::Hang)
    }

    pub fn fail_after(self, message: impl Into<String>) -> Self {
        self.then(ScriptStep::Fail(message.into()))
    }
}

#[derive(Default)]
struct ScriptState {
    turns: VecDeque<ScriptedTurn>,
    requests: Vec<TransportRequest>,
}

/// Transport that replays queued [`ScriptedTurn`]s in order.
///
/// Cloning shares the script. Every request is recorded.
#[derive(Clone)]
pub struct ScriptedTransport {
    name: String,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    pub fn with_turn(self, turn: ScriptedTurn) -> Self {
        self.push_turn(turn);
        self
    }

    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.lock().turns.push_back(turn);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.lock().requests.clone()
    }

    pub fn remaining_turns(&self) -> usize {
        self.lock().turns.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("name", &self.name)
            .field("remaining_turns", &self.remaining_turns())
            .finish()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn stream_message(
        &self,
        request: &TransportRequest,
    ) -> Result<BoxStream<'static, Result<TransportEvent>>> {
        let turn = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            state.turns.pop_front()
        };
        let Some(turn) = turn else {
            return Err(LatheError::InvalidState(format!(
                "{} has no scripted turns left",
                self.name
            )));
        };
        if let Some(message) = turn.open_error {
            return Err(LatheError::transport(&self.name, message));
        }

        let provider = self.name.clone();
        let stream = async_stream::stream! {
            for step in turn.steps {
                match step {
                    ScriptStep::Event(event) => yield Ok(event),
                    ScriptStep::Fail(message) => {
                        yield Err(LatheError::transport(&provider, message));
                        return;
                    }
                    ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn turns_replay_in_order_and_requests_are_recorded() {
        let transport = ScriptedTransport::new("a")
            .with_turn(ScriptedTurn::text("hello", 2))
            .with_turn(ScriptedTurn::fail("503 service unavailable"));

        let events: Vec<_> = transport
            .stream_message(&TransportRequest::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].as_ref().unwrap(), &TransportEvent::content("he"));

        let err = match transport.stream_message(&TransportRequest::default()).await {
            Err(err) => err,
            Ok(_) => panic!("expected open failure"),
        };
        assert!(err.is_retryable());
        assert_eq!(transport.requests().len(), 2);

        let exhausted = transport.stream_message(&TransportRequest::default()).await;
        assert!(matches!(exhausted, Err(LatheError::InvalidState(_))));
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_the_stream() {
        let transport = ScriptedTransport::new("a").with_turn(
            ScriptedTurn::events(vec![TransportEvent::content("x")]).fail_after("ECONNRESET"),
        );
        let events: Vec<_> = transport
            .stream_message(&TransportRequest::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }
}
