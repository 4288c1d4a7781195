//! Message protocol shared by all contexts.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `state-init` | Background → trusted UI | Full aggregated state |
//! | `state-sync` | Background → top/field | Hostname-scoped slice |
//! | `leech-state` | Background → overlay | Active-tab overlay state |
//! | `identify` | Top → background | Handshake with hostname |
//! | `fill-fields` | Background → field | Fill credentials |
//! | `fields-valt-changed` | Field → background | Value snapshot |
//! | `valt-changed-notify` | Background → top/overlay | Forwarded snapshot |
//! | `field-found`, `selector-*` | Field → top | Overlay lifecycle |
//!
//! Stream names and multiplexing headers belong to [`crate::transport`] and
//! never appear in these types.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `api` | The `apiType` discriminator |
//! | `message` | Typed message union and decoding |
//! | `position` | Geometry and frame-to-frame payloads |
//! | `state` | Vault items, value snapshots and slices |

// ============================================================================
// Submodules
// ============================================================================

/// The `apiType` discriminator.
pub mod api;

/// Typed message union.
pub mod message;

/// Geometry and frame payloads.
pub mod position;

/// State payloads.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use api::ApiType;
pub use message::{FrameMessage, Message};
pub use position::{
    CommandStamp, DomRect, EraseRequest, FieldFound, FieldRect, FrameCommand, HeightUpdate,
    Identify, PositionMessage, SelectorBoxData, ViewportCommand,
};
pub use state::{ActiveField, LeechState, StateSlice, ValtState, VaultItem};
