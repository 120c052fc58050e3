use std::time::Duration;

use crate::config::RunnerConfig;

/// Run-loop bounds resolved from [`RunnerConfig`].
#[derive(Debug, Clone, Copy)]
pub(super) struct RunnerLimits {
    pub(super) max_iterations: u32,
    pub(super) max_failed_tool_turns: u32,
    pub(super) stream_idle_timeout: Duration,
    pub(super) tag_buffer_cap: usize,
    pub(super) max_failovers: Option<u32>,
}

impl RunnerLimits {
    pub(super) fn from_config(config: &RunnerConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            max_failed_tool_turns: config.max_consecutive_failed_tool_turns.max(1),
            stream_idle_timeout: config.stream_idle_timeout(),
            tag_buffer_cap: config.tag_buffer_cap,
            max_failovers: config.max_failovers,
        }
    }
}
