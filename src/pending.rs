//! Awaiting side of a pending request.

use std::time::Duration;

use log::debug;
use tokio::{sync::oneshot, time};

use crate::{io::deadline, Result, StreamError};

/// Runs the given closure when dropped, unless disarmed.
///
/// Held by the future awaiting a pending request so that dropping the
/// future removes the request from the stream.
pub(crate) struct CancelGuard<F: FnOnce()> {
    on_cancel: Option<F>,
}

impl<F: FnOnce()> CancelGuard<F> {
    pub(crate) fn new(on_cancel: F) -> Self {
        Self {
            on_cancel: Some(on_cancel),
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.on_cancel = None;
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl<F: FnOnce()> Drop for CancelGuard<F> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Result of an eagerly submitted operation.
pub(crate) enum Outcome<T, F: FnOnce()> {
    /// The operation completed (or failed) at submission.
    Settled(Result<T>),

    /// The operation waits on the stream.
    Pending(oneshot::Receiver<Result<T>>, CancelGuard<F>),
}

impl<T, F: FnOnce()> Outcome<T, F> {
    pub(crate) fn pending(rx: oneshot::Receiver<Result<T>>, on_cancel: F) -> Self {
        Self::Pending(rx, CancelGuard::new(on_cancel))
    }

    pub(crate) async fn wait(self, timeout: Option<Duration>) -> Result<T> {
        match self {
            Self::Settled(result) => result,
            Self::Pending(rx, guard) => settle(rx, timeout, guard).await,
        }
    }
}

/// Waits for a pending request to settle.
///
/// When the deadline elapses first, the request is discarded through
/// the guard and the wait fails with [`StreamError::Timeout`]. The
/// stream itself is left untouched. A request whose sender went away
/// without settling is reported as [`StreamError::Closed`].
pub(crate) async fn settle<T, F>(
    rx: oneshot::Receiver<Result<T>>,
    timeout: Option<Duration>,
    mut guard: CancelGuard<F>,
) -> Result<T>
where
    F: FnOnce(),
{
    let result = match deadline(timeout) {
        None => rx.await,
        Some(timeout) => match time::timeout(timeout, rx).await {
            Ok(result) => result,
            Err(_) => {
                debug!("pending request timed out after {timeout:?}");
                guard.cancel();
                return Err(StreamError::Timeout(timeout));
            }
        },
    };

    guard.disarm();
    result.unwrap_or(Err(StreamError::Closed))
}
