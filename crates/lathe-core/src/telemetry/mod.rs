//! Telemetry: events, sinks and the backpressure-aware pipeline.

pub mod budget;
pub mod event_log;
pub mod events;
pub mod limiter;
pub mod pipeline;
pub mod pressure;
pub mod progress;
pub mod sink;

pub use budget::{BudgetDecision, ReasoningBudget, TRUNCATION_MARKER};
pub use event_log::{EventLog, JsonlEventLog};
pub use events::{EventClass, EventEnvelope, ProgressSnapshot, RunId, SnapshotDecoder, StreamEvent};
pub use limiter::RateLimiter;
pub use pipeline::{PipelineStats, TelemetryPipeline};
pub use pressure::{EventHistory, PressureMonitor, PressureReport};
pub use progress::ProgressTracker;
pub use sink::{CallbackSink, ChannelSink, NullSink, TelemetrySink};
