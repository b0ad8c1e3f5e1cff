//! Bounds backend calls made while serving a request.
//!
//! Every store, storage and provider call runs under the configured request
//! timeout. An elapsed timer becomes [`AppError::DeadlineExceeded`] (504).
//! When the client disconnects, axum drops the handler future and the pending
//! call with it, so nothing runs past the request.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Runs `fut` under `limit`, handing back its raw output so callers can
/// inspect domain errors before mapping them.
pub async fn bounded<F>(limit: Duration, fut: F) -> Result<F::Output, AppError>
where
    F: Future,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        tracing::warn!(timeout_ms = limit.as_millis() as u64, "backend call timed out");
        AppError::DeadlineExceeded
    })
}

/// Runs a fallible `fut` under `limit` and converts its error into [`AppError`].
pub async fn with_deadline<F, T, E>(limit: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<AppError>,
{
    bounded(limit, fut).await?.map_err(Into::into)
}
