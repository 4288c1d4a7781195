//! Background process: connection registry, state and broadcast.
//!
//! # Architecture
//!
//! ```text
//!  top frames ──┐
//!  field frames ┼─► BackgroundController ─► Registries (top / field / leech)
//!  overlays ────┘          │                      ▲
//!                          ▼                      │
//!                   StateAggregator ──changes──► BroadcastEngine
//!                   (vault, network,             (debounced fan-out,
//!                    wallet, mobile)              immediate on lock)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `broadcast` | Debounced fan-out of state slices |
//! | `controller` | Connection setup and UI commands |
//! | `host` | Host tab, storage, codec and ledger traits |
//! | `registry` | Per-role tab to stream registries |
//! | `state` | Aggregated state and change notifications |
//! | `stores` | Sub-stores owned by the aggregator |

// ============================================================================
// Submodules
// ============================================================================

/// Debounced fan-out of state slices.
pub mod broadcast;

/// Connection setup and UI commands.
pub mod controller;

/// External collaborators.
pub mod host;

/// Per-role connection registries.
pub mod registry;

/// Aggregated state.
pub mod state;

/// Sub-stores.
pub mod stores;

// ============================================================================
// Re-exports
// ============================================================================

pub use broadcast::{ActivationClock, BroadcastEngine, BroadcastHandle, BroadcastReport};
pub use controller::{ActiveTabInfo, BackgroundController, BackgroundServices, STATE_INIT_STREAM};
pub use host::{
    HostTabs, InMemoryVaultStorage, LedgerService, OfflineLedger, PlainCodec, VaultCodec,
    VaultStorage,
};
pub use registry::{ConnectionEntry, ConnectionRegistry, ConnectionRole, Registries};
pub use state::{AggregatedState, StateAggregator, StateChange};
pub use stores::{
    AccountStore, MobileItem, MobileState, MobileStore, NetworkInfo, NetworkState, NetworkStore,
    WalletState, WalletStore, WebsiteState, WebsiteStore,
};
