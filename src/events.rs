//! Identity and event-subscription capabilities.
//!
//! Controllers are composed from these pieces by construction: each owns an
//! [`Identity`] and, where others need to observe it, an [`EventBus`].

use tokio::sync::broadcast;
use tracing::trace;

use crate::identifiers::FrameToken;

/// Default buffered events per subscriber before lagging.
const DEFAULT_BUS_CAPACITY: usize = 64;

// ============================================================================
// Identity
// ============================================================================

/// Identity capability: a per-instance session token plus its kind prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    kind: &'static str,
    token: FrameToken,
}

impl Identity {
    /// Generates a fresh identity of the given kind.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            token: FrameToken::generate(kind),
        }
    }

    /// Returns the kind prefix.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Returns the session token.
    #[inline]
    #[must_use]
    pub const fn token(&self) -> &FrameToken {
        &self.token
    }

    /// Returns `true` if `token` names this instance.
    #[inline]
    #[must_use]
    pub fn owns(&self, token: &FrameToken) -> bool {
        &self.token == token
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Event-subscription capability backed by a broadcast channel.
///
/// Emitting with no subscribers is not an error.
#[derive(Debug)]
pub struct EventBus<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Creates a bus buffering `capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Emits an event to all current subscribers.
    ///
    /// Returns the number of subscribers reached.
    pub fn emit(&self, event: E) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => {
                trace!("Event emitted with no subscribers");
                0
            }
        }
    }

    /// Returns the number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_owns_only_its_token() {
        let a = Identity::new("__bpfield_");
        let b = Identity::new("__bpfield_");
        assert!(a.owns(a.token()));
        assert!(!a.owns(b.token()));
        assert_eq!(a.kind(), "__bpfield_");
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(5u8), 1);
        assert_eq!(rx.recv().await.ok(), Some(5));
    }

    #[test]
    fn test_bus_without_subscribers() {
        let bus: EventBus<u8> = EventBus::new();
        assert_eq!(bus.emit(1), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
