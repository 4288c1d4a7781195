//! Type-safe identifiers for connections and frames.
//!
//! Newtype wrappers keep tab ids, multiplexed stream ids and frame session
//! tokens from being mixed up at compile time.
//!
//! | Type | Wraps | Produced by |
//! |------|-------|-------------|
//! | [`TabId`] | `u32` | Host platform (sender tab) |
//! | [`MuxId`] | `String` | Background, one per accepted port |
//! | [`FrameToken`] | `String` | Content/top controllers, one per instance |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// TabId
// ============================================================================

/// Browser tab identifier assigned by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u32);

impl TabId {
    /// Creates a tab id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Creates a tab id from a host value.
    ///
    /// Hosts report `-1` (or any negative value) for senders that are not
    /// attached to a tab; those yield `None`.
    #[inline]
    #[must_use]
    pub fn from_host(id: i64) -> Option<Self> {
        u32::try_from(id).ok().map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MuxId
// ============================================================================

/// Name of the logical stream the background opened over one port.
///
/// Format: `{prefix}-{uuid}`, e.g. `BPTop-3f0c...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MuxId(String);

impl MuxId {
    /// Generates a fresh id with the given role prefix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::new_v4().simple()))
    }

    /// Wraps an existing stream name.
    #[inline]
    #[must_use]
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the stream name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the role prefix (the part before the first `-`).
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }
}

impl fmt::Display for MuxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// FrameToken
// ============================================================================

/// Session token identifying one controller instance inside a document.
///
/// Used as `senderId`/`posterId` on frame messages and as the `token` that
/// scroll/resize relays must carry to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameToken(String);

impl FrameToken {
    /// Generates a token with a kind prefix, e.g. `__bpfield_`.
    #[must_use]
    pub fn generate(kind: &str) -> Self {
        Self(format!("{kind}{}", Uuid::new_v4().simple()))
    }

    /// Wraps a token received from another frame.
    #[inline]
    #[must_use]
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_id_from_host() {
        assert_eq!(TabId::from_host(42), Some(TabId::new(42)));
        assert_eq!(TabId::from_host(-1), None);
    }

    #[test]
    fn test_mux_id_prefix() {
        let id = MuxId::generate("BPTop");
        assert!(id.as_str().starts_with("BPTop-"));
        assert_eq!(id.prefix(), "BPTop");
        assert_ne!(id, MuxId::generate("BPTop"));
    }

    #[test]
    fn test_frame_token_kind() {
        let token = FrameToken::generate("__bpfield_");
        assert!(token.as_str().starts_with("__bpfield_"));
        assert_eq!(FrameToken::from_string(token.as_str()), token);
    }

    #[test]
    fn test_tab_id_serializes_transparent() {
        let json = serde_json::to_string(&TabId::new(7)).expect("serialize");
        assert_eq!(json, "7");
    }
}
