//! Deadlines for I/O issued on behalf of a request.
//!
//! Store and network calls must give up promptly instead of pinning a task
//! per stuck call. Dropping the wrapped future cancels the underlying I/O.

use crate::PlatformError;
use std::future::Future;
use std::time::Duration;

/// Run `future` with an upper bound on its duration.
///
/// # Errors
///
/// Returns [`PlatformError::Timeout`] naming `operation` if the deadline
/// passes first.
pub async fn with_deadline<F, T>(
    operation: &str,
    deadline: Duration,
    future: F,
) -> Result<T, PlatformError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| PlatformError::timeout(format!("{operation} exceeded {deadline:?}")))
}
