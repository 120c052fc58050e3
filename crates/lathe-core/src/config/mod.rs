//! Runtime configuration.
//!
//! Every threshold the kernel uses lives here and is passed in explicitly.
//! Durations are stored as milliseconds so the TOML form stays flat.

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{LatheError, Result};

/// Event pipeline thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    #[builder(default = 30)]
    pub max_events_per_second: u32,
    #[builder(default = 1_000)]
    pub rate_window_ms: u64,
    #[builder(default = 10)]
    pub max_reasoning_events: u32,
    #[builder(default = 5_000)]
    pub max_reasoning_chars: usize,
    #[builder(default = 150)]
    pub debounce_ms: u64,
    #[builder(default = 5_000)]
    pub pressure_threshold: usize,
    #[builder(default = 100)]
    pub prune_keep_head: usize,
    #[builder(default = 1_000)]
    pub prune_keep_tail: usize,
    /// Capacity of the bounded channel behind [`crate::telemetry::ChannelSink`].
    #[builder(default = 1_024)]
    pub channel_capacity: usize,
}

impl TelemetryConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Resource lock timings.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    #[builder(default = 30_000)]
    pub acquire_timeout_ms: u64,
    /// Upper bound between availability checks while suspended.
    #[builder(default = 50)]
    pub recheck_interval_ms: u64,
    #[builder(default = 5_000)]
    pub watchdog_ms: u64,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Transport retry settings.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    #[builder(default = 3)]
    pub max_attempts: u32,
    #[builder(default = 500)]
    pub base_delay_ms: u64,
    #[builder(default = 30_000)]
    pub max_delay_ms: u64,
    #[builder(default = 0.3)]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Run-loop limits.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    #[builder(default = 20)]
    pub max_iterations: u32,
    #[builder(default = 120_000)]
    pub stream_idle_timeout_ms: u64,
    #[builder(default = 8)]
    pub max_consecutive_failed_tool_turns: u32,
    #[builder(default = 100_000)]
    pub tag_buffer_cap: usize,
    /// Defaults to the provider pool size minus one.
    pub max_failovers: Option<u32>,
}

impl RunnerConfig {
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Default, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    #[builder(default)]
    pub telemetry: TelemetryConfig,
    #[builder(default)]
    pub locks: LockConfig,
    #[builder(default)]
    pub retry: RetryConfig,
    #[builder(default)]
    pub runner: RunnerConfig,
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would disable a safeguard outright.
    pub fn validate(&self) -> Result<()> {
        let t = &self.telemetry;
        require_nonzero("telemetry.max_events_per_second", t.max_events_per_second as u64)?;
        require_nonzero("telemetry.rate_window_ms", t.rate_window_ms)?;
        require_nonzero("telemetry.pressure_threshold", t.pressure_threshold as u64)?;
        require_nonzero("telemetry.channel_capacity", t.channel_capacity as u64)?;
        if t.prune_keep_head + t.prune_keep_tail >= t.pressure_threshold {
            return Err(LatheError::Configuration(format!(
                "telemetry.prune_keep_head + prune_keep_tail ({}) must be below pressure_threshold ({})",
                t.prune_keep_head + t.prune_keep_tail,
                t.pressure_threshold
            )));
        }

        let l = &self.locks;
        require_nonzero("locks.acquire_timeout_ms", l.acquire_timeout_ms)?;
        require_nonzero("locks.recheck_interval_ms", l.recheck_interval_ms)?;
        require_nonzero("locks.watchdog_ms", l.watchdog_ms)?;

        let r = &self.retry;
        require_nonzero("retry.max_attempts", r.max_attempts as u64)?;
        if r.max_delay_ms < r.base_delay_ms {
            return Err(LatheError::Configuration(
                "retry.max_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&r.jitter_ratio) {
            return Err(LatheError::Configuration(format!(
                "retry.jitter_ratio must be within [0, 1], got {}",
                r.jitter_ratio
            )));
        }

        let n = &self.runner;
        require_nonzero("runner.max_iterations", n.max_iterations as u64)?;
        require_nonzero("runner.stream_idle_timeout_ms", n.stream_idle_timeout_ms)?;
        require_nonzero("runner.tag_buffer_cap", n.tag_buffer_cap as u64)?;
        Ok(())
    }
}

fn require_nonzero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(LatheError::Configuration(format!("{field} must be greater than zero")));
    }
    Ok(())
}
