//! Geometry and frame-to-frame payloads.
//!
//! These travel between documents of the same tab (content frame, parent
//! frames, top frame) and never go through the background.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::FrameToken;

use super::state::ActiveField;

// ============================================================================
// DomRect
// ============================================================================

/// Serialized `getBoundingClientRect()` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomRect {
    /// Horizontal origin.
    pub x: f64,
    /// Vertical origin.
    pub y: f64,
    /// Rendered width.
    pub width: f64,
    /// Rendered height.
    pub height: f64,
    /// Top edge.
    pub top: f64,
    /// Right edge.
    pub right: f64,
    /// Bottom edge.
    pub bottom: f64,
    /// Left edge.
    pub left: f64,
}

impl DomRect {
    /// Builds a rect from origin and size.
    #[must_use]
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            x: left,
            y: top,
            width,
            height,
            top,
            right: left + width,
            bottom: top + height,
            left,
        }
    }

    /// Returns `true` if the element renders with zero width.
    ///
    /// Covers `display:none` ancestors and off-layout inputs.
    #[inline]
    #[must_use]
    pub fn is_collapsed(&self) -> bool {
        self.width <= 0.0
    }
}

// ============================================================================
// PositionMessage
// ============================================================================

/// Geometry of one field as seen from a given document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRect {
    /// Controller token that owns the field.
    pub uuid: FrameToken,
    /// Field geometry within `iframe_src`.
    pub dom_rect: DomRect,
    /// Document the rect is relative to.
    pub iframe_src: String,
    /// Which field of the pair this is.
    pub actived_field: ActiveField,
}

/// Position report posted from a field frame to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMessage {
    /// Controller that produced the report.
    pub poster_id: FrameToken,
    /// Extension id of the poster.
    pub extid: String,
    /// Document URL of the poster.
    pub node_root_href: String,
    /// Geometry chain, innermost first.
    pub dom_rects: Vec<FieldRect>,
}

impl PositionMessage {
    /// Returns the innermost rect.
    #[inline]
    #[must_use]
    pub fn primary(&self) -> Option<&FieldRect> {
        self.dom_rects.first()
    }
}

// ============================================================================
// FrameCommand
// ============================================================================

/// Viewport change relayed from the top frame into a nested login frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewportCommand {
    /// Top document resized.
    Resize,
    /// Top document scrolled.
    Scroll,
}

/// Timestamp payload on a [`FrameCommand`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStamp {
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
}

/// Session-tagged viewport relay.
///
/// Only the controller whose token matches acts on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCommand {
    /// Token of the login frame this relay targets.
    pub token: FrameToken,
    /// What changed.
    pub command: ViewportCommand,
    /// Token of the relaying top controller.
    pub from: FrameToken,
    /// Relay timestamp.
    #[serde(default)]
    pub data: CommandStamp,
}

// ============================================================================
// Selector payloads
// ============================================================================

/// Geometry and sizing for drawing the overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorBoxData {
    /// Field geometry.
    #[serde(flatten)]
    pub rect: DomRect,
    /// Field lives in a nested frame.
    #[serde(default)]
    pub is_inner: bool,
    /// Document URL of the field.
    #[serde(default)]
    pub at_href: String,
    /// Requested overlay height.
    pub ifr_height: u32,
}

/// Erase request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseRequest {
    /// Remove even a pinned overlay.
    #[serde(default)]
    pub force: bool,
    /// Where the request originated, for logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Height/pin update posted by the overlay itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightUpdate {
    /// New overlay height.
    pub ifr_height: u32,
    /// Pin the overlay (save/ignore affordance engaged).
    #[serde(default)]
    pub is_addor: bool,
}

/// Login form discovery notice sent to the top frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFound {
    /// Form lives in a nested frame.
    pub is_inner: bool,
    /// Token of the content controller.
    pub sender_id: FrameToken,
    /// Document URL of the form.
    pub href: String,
    /// Hostname of the form document.
    pub hostname: String,
}

/// Top-frame handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Hostname of the top document.
    pub hostname: String,
}

// ============================================================================
// Tests
// ============================================================================
