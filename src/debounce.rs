//! Trailing-edge debounce timer for event loops.
//!
//! A [`Debounce`] is owned by a single event loop and polled from a
//! `tokio::select!` branch. Every [`Debounce::trigger`] pushes the deadline
//! out by one window and replaces the pending payload; [`Debounce::elapsed`]
//! resolves once, with the latest payload, after the window passes with no
//! further triggers.
//!
//! ```ignore
//! let mut scan = Debounce::new(Duration::from_millis(15));
//! loop {
//!     tokio::select! {
//!         Some(event) = rx.recv() => scan.trigger(()),
//!         () = scan.elapsed() => controller.scan(),
//!     }
//! }
//! ```

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

// ============================================================================
// Debounce
// ============================================================================

/// Trailing-edge debounce carrying the most recent payload.
#[derive(Debug)]
pub struct Debounce<T = ()> {
    /// Quiet period required before firing.
    window: Duration,
    /// Pending deadline and payload.
    pending: Option<(Instant, T)>,
}

impl<T> Debounce<T> {
    /// Creates an idle debounce with the given window.
    #[inline]
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Returns the configured window.
    #[inline]
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Restarts the window, replacing any pending payload.
    pub fn trigger(&mut self, payload: T) {
        self.pending = Some((Instant::now() + self.window, payload));
    }

    /// Drops the pending payload without firing.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(_, payload)| payload)
    }

    /// Returns `true` while a payload is waiting to fire.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolves with the payload once the window has elapsed.
    ///
    /// Never resolves while idle. Cancel-safe: dropping the future before it
    /// completes leaves the pending payload in place.
    pub async fn elapsed(&mut self) -> T {
        let Some(deadline) = self.pending.as_ref().map(|(deadline, _)| *deadline) else {
            return pending().await;
        };

        sleep_until(deadline).await;

        match self.pending.take() {
            Some((_, payload)) => payload,
            None => pending().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
