//! One-shot outcomes.
//!
//! Every asynchronous result the engine produces (connect, subscription
//! ready, unsubscribe acknowledgement, method result) is a [`Completion`].
//! It resolves exactly once; if the producing side is dropped first it
//! resolves to [`DdpError::Cancelled`].

use crate::error::{DdpError, DdpResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Sending half of a [`Completion`].
pub(crate) type Resolver<T> = oneshot::Sender<DdpResult<T>>;

/// A future for a single engine outcome.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion<T> {
    rx: oneshot::Receiver<DdpResult<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Creates a completion that is already resolved.
    pub(crate) fn ready(outcome: DdpResult<T>) -> Self {
        let (tx, completion) = Self::channel();
        let _ = tx.send(outcome);
        completion
    }

    /// Returns the outcome if it has already been produced.
    pub fn try_take(&mut self) -> Option<DdpResult<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DdpError::Cancelled)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = DdpResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DdpError::Cancelled)))
    }
}
