//! A coalescing timer: repeated pings postpone firing until the window elapses
//! with no further ping.
//!
//! Used in place of a `delay(1ms)` polling loop wherever a burst of closely spaced
//! updates should collapse into a single downstream notification.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use tokio::time::{sleep_until, Instant, Sleep};

pin_project! {
    pub struct Debounce {
        window: Duration,
        armed: bool,
        #[pin]
        sleep: Sleep,
    }
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed: false,
            sleep: sleep_until(Instant::now()),
        }
    }

    /// Postpone the next fire to `window` from now.
    pub fn ping(self: Pin<&mut Self>) {
        let this = self.project();
        this.sleep.reset(Instant::now() + *this.window);
        *this.armed = true;
    }

    /// Resolves once, `window` after the most recent [`Debounce::ping`]. Stays
    /// pending forever if never pinged, and goes back to pending after firing.
    pub fn poll_fire(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        if !*this.armed {
            return Poll::Pending;
        }
        match this.sleep.poll(cx) {
            Poll::Ready(()) => {
                *this.armed = false;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_window_from_last_ping() {
        let mut debounce = Box::pin(Debounce::new(Duration::from_millis(100)));
        debounce.as_mut().ping();

        tokio::time::advance(Duration::from_millis(50)).await;
        debounce.as_mut().ping();

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(
            poll_fn(|cx| Poll::Ready(debounce.as_mut().poll_fire(cx))).await,
            Poll::Pending
        );

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(
            poll_fn(|cx| Poll::Ready(debounce.as_mut().poll_fire(cx))).await,
            Poll::Ready(())
        );
    }

    #[tokio::test]
    async fn unpinged_never_fires() {
        let mut debounce = Box::pin(Debounce::new(Duration::from_millis(10)));
        assert_eq!(
            poll_fn(|cx| Poll::Ready(debounce.as_mut().poll_fire(cx))).await,
            Poll::Pending
        );
    }
}
