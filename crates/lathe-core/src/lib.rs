//! Lathe Core -- Provider-agnostic kernel of the Lathe coding-agent runtime
//!
//! This crate holds the pieces a run is built from: lenient JSON repair,
//! streaming tag detection, tool-call extraction, resource locks, retry and
//! provider failover, the telemetry pipeline and the run-loop orchestrator.
//!
//! Filesystem and process tools live in `lathe-tools`.
//! The `lathe` meta-crate re-exports both.

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod json;
pub mod locks;
pub mod prelude;
pub mod provider;
pub mod stream;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod util;
