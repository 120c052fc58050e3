//! Timeout helpers.

use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::{LatheError, Result};

/// Wrap a future with a timeout.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(LatheError::Timeout(duration.as_millis() as u64)),
    }
}

/// Next item of a stream, failing if none arrives within `idle`.
pub async fn next_within<S, T>(stream: &mut S, idle: Duration) -> Result<Option<T>>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    match tokio::time::timeout(idle, stream.next()).await {
        Ok(Some(item)) => item.map(Some),
        Ok(None) => Ok(None),
        Err(_) => Err(LatheError::Stream(format!(
            "stream idle timeout after {}ms",
            idle.as_millis()
        ))),
    }
}
