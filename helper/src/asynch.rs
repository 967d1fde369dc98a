//! Async helpers for one-shot rendezvous.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::channel::oneshot;

/// Wraps a [`oneshot::Receiver`] for a channel whose sender is never dropped without
/// first sending a value.
///
/// Using this instead of the bare receiver removes a `Result<T, Canceled>` layer from
/// every call site that already knows, by construction, that the sender side always
/// responds.
pub struct InfallibleOneshotReceiver<T>(oneshot::Receiver<T>);

impl<T> From<oneshot::Receiver<T>> for InfallibleOneshotReceiver<T> {
    fn from(receiver: oneshot::Receiver<T>) -> Self {
        Self(receiver)
    }
}

impl<T> Future for InfallibleOneshotReceiver<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|res| res.expect("sender dropped without responding"))
    }
}

/// A future that is immediately ready with a value, for call sites that need a
/// uniform `Future`-returning signature even on a path with no actual suspension.
pub struct InstaFuture<T>(Option<T>);

impl<T> InstaFuture<T> {
    pub const fn new(value: T) -> Self {
        Self(Some(value))
    }
}

impl<T: Unpin> Future for InstaFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(self.get_mut().0.take().expect("InstaFuture polled after completion"))
    }
}
