//! Utility modules: retry and timeout.

pub mod retry;
pub mod timeout;

pub use retry::{error_class, RetryAttempt, RetryPolicy};
pub use timeout::{next_within, with_timeout};
