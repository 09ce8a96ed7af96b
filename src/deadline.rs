//! Deadline helper for cluster calls.

use std::future::Future;
use std::time::Duration;

use crate::error::ClusterError;

/// Race `future` against `limit`.
///
/// On expiry the future is dropped and the caller sees
/// [`ClusterError::Timeout`] naming `operation`.
pub async fn with_deadline<T, F>(
    operation: &str,
    limit: Duration,
    future: F,
) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ClusterError::timeout(operation, limit))?
}
