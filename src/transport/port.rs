//! Transport port between two execution contexts.
//!
//! A [`Port`] is the host platform's raw bidirectional channel: JSON values
//! in order, no framing, and a disconnect that can happen at any moment
//! without a preceding message. Hosts adapt their native port object to this
//! type; [`Port::pair`] builds an in-process pair for embedding and tests.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::TabId;

// ============================================================================
// SenderInfo
// ============================================================================

/// What the host knows about the connecting side of a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderInfo {
    /// Tab the connecting document lives in.
    pub tab_id: Option<TabId>,
    /// Origin of the connecting document (Chrome).
    pub origin: Option<String>,
    /// URL of the connecting document (Firefox).
    pub url: Option<String>,
}

impl SenderInfo {
    /// Creates sender info for a document in `tab_id` at `url`.
    #[must_use]
    pub fn tab(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id: Some(tab_id),
            origin: None,
            url: Some(url.into()),
        }
    }

    /// Returns the origin, falling back to the URL.
    #[inline]
    #[must_use]
    pub fn origin_or_url(&self) -> Option<&str> {
        self.origin.as_deref().or(self.url.as_deref())
    }
}

// ============================================================================
// Port
// ============================================================================

/// Outbound half of a port.
#[derive(Debug, Clone)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl PortSender {
    /// Posts a value to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortDisconnected`] if the peer is gone.
    pub fn post(&self, value: Value) -> Result<()> {
        self.tx.send(value).map_err(|_| Error::PortDisconnected)
    }

    /// Returns `true` once the peer has gone away.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Inbound half of a port. Yields `None` once the peer disconnects.
pub type PortReceiver = mpsc::UnboundedReceiver<Value>;

/// One end of a host-provided channel.
#[derive(Debug)]
pub struct Port {
    /// Sender metadata supplied by the host.
    pub sender_info: SenderInfo,
    /// Outbound half.
    pub outbound: PortSender,
    /// Inbound half.
    pub inbound: PortReceiver,
}

impl Port {
    /// Wraps host channel halves.
    #[must_use]
    pub fn new(
        sender_info: SenderInfo,
        outbound: mpsc::UnboundedSender<Value>,
        inbound: PortReceiver,
    ) -> Self {
        Self {
            sender_info,
            outbound: PortSender { tx: outbound },
            inbound,
        }
    }

    /// Creates a connected pair.
    ///
    /// The first end is the one a listener (background) receives, carrying
    /// `sender_info`; the second end belongs to the connecting document.
    #[must_use]
    pub fn pair(sender_info: SenderInfo) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let listener = Self::new(sender_info, b_tx, a_rx);
        let connector = Self::new(SenderInfo::default(), a_tx, b_rx);
        (listener, connector)
    }

    /// Splits into halves.
    #[must_use]
    pub fn split(self) -> (SenderInfo, PortSender, PortReceiver) {
        (self.sender_info, self.outbound, self.inbound)
    }
}

// ============================================================================
// Tests
// ============================================================================
