//! In-page controllers: login-field detection and overlay placement.
//!
//! # Architecture
//!
//! ```text
//!   login frame                       top frame
//! ┌───────────────────┐  postMessage  ┌────────────────────┐
//! │  FieldController  │──────────────►│   TopController    │
//! │  (Dom, sizing)    │◄──────────────│   (OverlayElement) │
//! └─────────┬─────────┘ frame command └─────────┬──────────┘
//!           │ port                              │ port
//!           ▼                                   ▼
//!                        background
//! ```
//!
//! Both controllers are driven by an event channel and emit [`Outbound`]
//! messages; the host glue delivers them to the named [`Target`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `dom` | Document access and login-field lookup |
//! | `field` | Content-script field state machine |
//! | `overlay` | Top-frame overlay controller |
//! | `sizing` | Pure overlay sizing decision |

// ============================================================================
// Submodules
// ============================================================================

/// Document access and login-field lookup.
pub mod dom;

/// Content-script field state machine.
pub mod field;

/// Top-frame overlay controller.
pub mod overlay;

/// Overlay sizing decision.
pub mod sizing;

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::FrameMessage;

// ============================================================================
// Outbound
// ============================================================================

/// Where an outbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// `window.top`.
    Top,
    /// `window.parent`.
    Parent,
    /// The document's background connection.
    Background,
    /// The nested frame that reported the login form.
    LoginFrame,
}

/// Message emitted by a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Destination.
    pub target: Target,
    /// Payload.
    pub message: FrameMessage,
}

/// Sending half of a controller's outbound channel.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Receiving half of a controller's outbound channel.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Queues `message` for `target`. Returns `false` once the host stopped
/// listening.
pub(crate) fn post(tx: &OutboundSender, target: Target, message: FrameMessage) -> bool {
    match tx.send(Outbound { target, message }) {
        Ok(()) => true,
        Err(_) => {
            debug!(target = ?target, "Outbound channel closed, message dropped");
            false
        }
    }
}

// ============================================================================
// Re-exports
// ============================================================================

pub use dom::{Dom, FieldKind, FieldPair, NodeId, lookup_login_fields, search_upward};
pub use field::{FIELD_KIND, FieldController, FieldEvent, FieldLifecycle, FieldState};
pub use overlay::{
    LoginFrame, OverlayElement, OverlayEvent, TOP_KIND, TopController, TopEvent, absolute_rect,
};
pub use sizing::{ElemType, SizingDecision, SizingParams, SizingTag, SizingTrigger, decide};
