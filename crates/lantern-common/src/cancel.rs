//! Cooperative cancellation for store operations
//!
//! [`run_cancellable`] checks a [`CancellationToken`] before dispatching an
//! operation and races the dispatched operation against the token afterwards.
//! Cancellation never aborts work that has already been handed to the runtime:
//! when the token fires first, the wrapper waits for the operation to finish,
//! throws its result away and reports [`OpError::CompletedDespiteCancellation`]
//! so the caller knows the side effects happened.

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::debug;

pub use tokio_util::sync::CancellationToken;

/// Outcome of a wrapped operation that did not produce a value.
#[derive(Debug, Error)]
pub enum OpError<E> {
    /// The token was already cancelled; the operation was never invoked.
    #[error("operation canceled before it started")]
    CanceledBeforeStart,

    /// The token fired while the operation was running. The operation ran to
    /// completion and its side effects are in place.
    #[error("the operation completed despite the cancellation signal")]
    CompletedDespiteCancellation,

    /// The spawned task panicked or was torn down by the runtime.
    #[error("operation task failed: {0}")]
    TaskFailed(String),

    /// The operation itself returned an error.
    #[error("{0}")]
    Failed(E),
}

impl<E> OpError<E> {
    /// True for the two variants produced by the token rather than the operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CanceledBeforeStart | Self::CompletedDespiteCancellation)
    }

    /// Convert the inner operation error, keeping the cancellation variants.
    pub fn map_failed<F>(self, f: impl FnOnce(E) -> F) -> OpError<F> {
        match self {
            Self::CanceledBeforeStart => OpError::CanceledBeforeStart,
            Self::CompletedDespiteCancellation => OpError::CompletedDespiteCancellation,
            Self::TaskFailed(msg) => OpError::TaskFailed(msg),
            Self::Failed(e) => OpError::Failed(f(e)),
        }
    }
}

fn settle<T, E>(joined: Result<Result<T, E>, JoinError>) -> Result<T, OpError<E>> {
    match joined {
        Ok(result) => result.map_err(OpError::Failed),
        Err(err) => Err(OpError::TaskFailed(err.to_string())),
    }
}

/// Run `op` unless `cancel` has already fired, honouring cancellation
/// without preempting work in flight.
///
/// `op` is only called when the token is not cancelled at entry, so a
/// cancelled token guarantees zero interaction with whatever `op` touches.
/// When the operation and the token become ready together the operation's
/// result wins.
pub async fn run_cancellable<T, E, F, Fut>(
    cancel: &CancellationToken,
    op: F,
) -> Result<T, OpError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(OpError::CanceledBeforeStart);
    }

    let mut handle = tokio::spawn(op());

    tokio::select! {
        biased;
        joined = &mut handle => return settle(joined),
        _ = cancel.cancelled() => {}
    }

    match handle.await {
        Ok(Ok(_)) => debug!("Operation finished after cancellation; result discarded"),
        Ok(Err(_)) => debug!("Operation failed after cancellation; error discarded"),
        Err(err) => return Err(OpError::TaskFailed(err.to_string())),
    }

    Err(OpError::CompletedDespiteCancellation)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Boom;

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    #[tokio::test]
    async fn test_returns_operation_value() {
        let token = CancellationToken::new();
        let result = run_cancellable(&token, || async { Ok::<_, Boom>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_passes_operation_error_through() {
        let token = CancellationToken::new();
        let result = run_cancellable(&token, || async { Err::<(), _>(Boom) }).await;
        assert!(matches!(result, Err(OpError::Failed(Boom))));
    }

    #[tokio::test]
    async fn test_cancelled_token_never_invokes_operation() {
        let token = CancellationToken::new();
        token.cancel();

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let result = run_cancellable(&token, move || {
            flag.store(true, Ordering::SeqCst);
            async { Ok::<_, Boom>(()) }
        })
        .await;

        assert!(matches!(result, Err(OpError::CanceledBeforeStart)));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight_waits_for_completion() {
        let token = CancellationToken::new();
        let written = Arc::new(AtomicBool::new(false));

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let flag = written.clone();
        let result = run_cancellable(&token, move || async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, Boom>("stored")
        })
        .await;

        assert!(matches!(result, Err(OpError::CompletedDespiteCancellation)));
        assert!(written.load(Ordering::SeqCst), "in-flight write must finish");
    }

    #[tokio::test]
    async fn test_panicking_operation_reports_task_failure() {
        let token = CancellationToken::new();
        let result = run_cancellable(&token, || async {
            if true {
                panic!("store exploded");
            }
            Ok::<(), Boom>(())
        })
        .await;

        assert!(matches!(result, Err(OpError::TaskFailed(_))));
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(OpError::<Boom>::CanceledBeforeStart.is_cancellation());
        assert!(OpError::<Boom>::CompletedDespiteCancellation.is_cancellation());
        assert!(!OpError::Failed(Boom).is_cancellation());

        let mapped = OpError::Failed(Boom).map_failed(|e| e.to_string());
        assert!(matches!(mapped, OpError::Failed(ref s) if s == "boom"));
    }
}
