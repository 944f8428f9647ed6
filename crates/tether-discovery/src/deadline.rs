//! Bounded coordination calls.
//!
//! Every setup call runs under its own deadline and is abandoned early when
//! the caller's token is cancelled.

use std::future::Future;
use std::time::Duration;
use tether_core::{CoordinationError, DiscoveryError};
use tokio_util::sync::CancellationToken;

pub(crate) enum CallError {
    Cancelled,
    Failed(CoordinationError),
}

impl CallError {
    /// Map into a setup error, wrapping store failures with `wrap`.
    pub(crate) fn into_setup(
        self,
        wrap: impl FnOnce(CoordinationError) -> DiscoveryError,
    ) -> DiscoveryError {
        match self {
            Self::Cancelled => DiscoveryError::Cancelled,
            Self::Failed(e) => wrap(e),
        }
    }
}

pub(crate) async fn call_with_deadline<T, F>(
    ctx: &CancellationToken,
    deadline: Duration,
    call: F,
) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CoordinationError>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(CallError::Cancelled),
        result = tokio::time::timeout(deadline, call) => match result {
            Ok(outcome) => outcome.map_err(CallError::Failed),
            Err(_) => Err(CallError::Failed(CoordinationError::Timeout(deadline))),
        },
    }
}
