//! bpass relay - cross-context state relay for a password manager extension.
//!
//! The extension runs in several isolated contexts: one privileged
//! background context and many page contexts (the top document of each tab,
//! the frame that holds the login form, the overlay frame). They talk over
//! host-provided ports. This crate is the logic on both ends of those ports.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────── background ─────────────────┐
//!  │  StateAggregator ──► BroadcastEngine         │
//!  │         ▲                   │                │
//!  │         │          Registries (top/field/    │
//!  │         │                   leech)           │
//!  │         │                   │                │
//!  │  BackgroundController ◄─────┘                │
//!  └────────────┬─────────────────────────────────┘
//!               │ Port + Multiplexer (one logical stream per role)
//!  ┌────────────┴───────────── tab ───────────────┐
//!  │  TopController  ◄──postMessage──  FieldController
//!  │  (overlay)                        (login form)
//!  └──────────────────────────────────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - At most one live connection per (role, tab); a newer one replaces the
//!   older, and the older one's close never evicts its replacement
//! - Every slice is computed fresh from the aggregator; nothing is cached
//! - A locked vault never leaks items, whatever the requester
//! - Debounced bursts are coalesced to a single trailing action
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use bpass_relay::{
//!     BackgroundController, BackgroundServices, HostTabs, Port, RelayOptions, Result,
//!     SenderInfo, TabId,
//! };
//!
//! struct Tabs;
//!
//! #[async_trait]
//! impl HostTabs for Tabs {
//!     async fn active_tab(&self) -> Result<Option<TabId>> {
//!         Ok(Some(TabId::new(1)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller =
//!         BackgroundController::new(RelayOptions::new(), BackgroundServices::new(Arc::new(Tabs)))?;
//!
//!     // The host hands every incoming connection to the matching setup call.
//!     let (listener, _page) = Port::pair(SenderInfo::tab(TabId::new(1), "https://example.com/"));
//!     controller.setup_field_connection(listener)?;
//!
//!     controller.unlock(b"key".to_vec()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`background`] | Registries, aggregator, broadcast engine, controller |
//! | [`inpage`] | Field detection, overlay sizing and placement |
//! | [`transport`] | Ports and stream multiplexing |
//! | [`protocol`] | Message types and wire format |
//! | [`options`] | Timing and behavior configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Background-context services.
///
/// [`BackgroundController`] wires the connection registries, the state
/// aggregator and the broadcast engine to incoming ports.
pub mod background;

/// Trailing-edge debounce timer.
pub mod debounce;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Controller identity and in-process event fan-out.
pub mod events;

/// Hostname extraction and site matching.
pub mod hostname;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing tab ids, stream ids and frame tokens.
pub mod identifiers;

/// Page-context controllers.
pub mod inpage;

/// Relay configuration.
pub mod options;

/// Message types exchanged between contexts.
pub mod protocol;

/// Port and multiplexer layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Background types
pub use background::{
    ActiveTabInfo, BackgroundController, BackgroundServices, BroadcastReport, ConnectionRegistry,
    ConnectionRole, HostTabs, InMemoryVaultStorage, LedgerService, OfflineLedger, PlainCodec,
    Registries, StateAggregator, StateChange, VaultCodec, VaultStorage,
};

// In-page types
pub use inpage::{
    FieldController, FieldEvent, FieldState, OverlayElement, OverlayEvent, Target, TopController,
    TopEvent,
};

// Options
pub use options::RelayOptions;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{FrameToken, MuxId, TabId};

// Transport types
pub use transport::{LogicalStream, Multiplexer, Port, SenderInfo};

// Protocol types
pub use protocol::{ApiType, FrameMessage, Message, StateSlice, ValtState, VaultItem};
