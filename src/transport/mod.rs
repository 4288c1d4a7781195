//! Port transport and stream multiplexing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌──────────────────┐
//! │  Content script  │          Port            │   Background     │
//! │  / top frame     │◄────────────────────────►│                  │
//! │                  │   { name, data } frames  │   Multiplexer    │
//! │  raw messages ───┼─────────────────────────►│   ├ BPinjet-…    │
//! │                  │                          │   └ unrouted     │
//! └──────────────────┘                          └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. Host hands the background a [`Port`] with its [`SenderInfo`]
//! 2. [`Multiplexer::new`] spawns the read loop
//! 3. [`Multiplexer::create_stream`] opens the named stream for the role
//! 4. Port disconnect closes every stream and runs close hooks once
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `mux` | Multiplexer and logical streams |
//! | `port` | Host port abstraction |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexer and logical streams.
pub mod mux;

/// Host port abstraction.
pub mod port;

// ============================================================================
// Re-exports
// ============================================================================

pub use mux::{CloseHook, LogicalStream, Multiplexer, StreamInbox, Unrouted, UnroutedInbox};
pub use port::{Port, PortReceiver, PortSender, SenderInfo};
