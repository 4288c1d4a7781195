//! Error types for the relay.
//!
//! No error defined here is fatal to the background process. The worst case
//! is one tab losing synchronization until it reconnects.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::PortDisconnected`], [`Error::StreamClosed`], [`Error::ConnectionRefused`] |
//! | Protocol | [`Error::UnknownApiType`], [`Error::MalformedMessage`], [`Error::Protocol`] |
//! | Domain | [`Error::VaultLocked`], [`Error::ItemExists`], [`Error::ItemNotFound`], [`Error::Vault`] |
//! | Host | [`Error::Host`], [`Error::Timeout`], [`Error::Ledger`] |
//! | External | [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::{MuxId, TabId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The underlying transport port went away.
    #[error("Port disconnected")]
    PortDisconnected,

    /// Write attempted on a logical stream whose port is closed.
    #[error("Stream closed: {mux_id}")]
    StreamClosed {
        /// Name of the closed stream.
        mux_id: MuxId,
    },

    /// Incoming connection rejected during setup.
    ///
    /// Returned when the sender carries no tab or no usable origin.
    #[error("Connection refused: {message}")]
    ConnectionRefused {
        /// Why the connection was refused.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Message carried an `apiType` outside the known set.
    #[error("Unknown apiType: {api_type}")]
    UnknownApiType {
        /// The unrecognized value.
        api_type: String,
    },

    /// Message had a known `apiType` but an undecodable payload.
    #[error("Malformed {api_type} message: {message}")]
    MalformedMessage {
        /// The message kind.
        api_type: String,
        /// Decoder error text.
        message: String,
    },

    /// Protocol violation not covered by the variants above.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Domain Errors
    // ========================================================================
    /// Vault operation requires an unlocked vault.
    #[error("Vault is locked")]
    VaultLocked,

    /// An item with the same title already exists for the hostname.
    #[error("Item already exists: {title}@{hostname}")]
    ItemExists {
        /// Item hostname.
        hostname: String,
        /// Item title.
        title: String,
    },

    /// Update or delete targeted a missing item.
    #[error("Item not found: {title}@{hostname}")]
    ItemNotFound {
        /// Item hostname.
        hostname: String,
        /// Item title.
        title: String,
    },

    /// Vault storage or codec failure.
    #[error("Vault error: {message}")]
    Vault {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Host Errors
    // ========================================================================
    /// Host platform API failure.
    #[error("Host error: {message}")]
    Host {
        /// Description of the failure.
        message: String,
    },

    /// No field-injection stream exists for the tab.
    #[error("No connection for tab {tab_id}")]
    NoConnection {
        /// Tab that was targeted.
        tab_id: TabId,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Ledger service failure.
    #[error("Ledger error: {message}")]
    Ledger {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a stream closed error.
    #[inline]
    pub fn stream_closed(mux_id: MuxId) -> Self {
        Self::StreamClosed { mux_id }
    }

    /// Creates a connection refused error.
    #[inline]
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::ConnectionRefused {
            message: message.into(),
        }
    }

    /// Creates an unknown apiType error.
    #[inline]
    pub fn unknown_api_type(api_type: impl Into<String>) -> Self {
        Self::UnknownApiType {
            api_type: api_type.into(),
        }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(api_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            api_type: api_type.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an item exists error.
    #[inline]
    pub fn item_exists(hostname: impl Into<String>, title: impl Into<String>) -> Self {
        Self::ItemExists {
            hostname: hostname.into(),
            title: title.into(),
        }
    }

    /// Creates an item not found error.
    #[inline]
    pub fn item_not_found(hostname: impl Into<String>, title: impl Into<String>) -> Self {
        Self::ItemNotFound {
            hostname: hostname.into(),
            title: title.into(),
        }
    }

    /// Creates a vault error.
    #[inline]
    pub fn vault(message: impl Into<String>) -> Self {
        Self::Vault {
            message: message.into(),
        }
    }

    /// Creates a host error.
    #[inline]
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    /// Creates a no connection error.
    #[inline]
    pub fn no_connection(tab_id: TabId) -> Self {
        Self::NoConnection { tab_id }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a ledger error.
    #[inline]
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` for port/stream faults.
    ///
    /// These are recovered locally by dropping the registry entry.
    #[inline]
    #[must_use]
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::PortDisconnected | Self::StreamClosed { .. } | Self::ConnectionRefused { .. }
        )
    }

    /// Returns `true` for malformed or unexpected messages.
    ///
    /// The message is dropped; the connection stays alive.
    #[inline]
    #[must_use]
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownApiType { .. }
                | Self::MalformedMessage { .. }
                | Self::Protocol { .. }
                | Self::Json(_)
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry or after reconnection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PortDisconnected
                | Self::StreamClosed { .. }
                | Self::Timeout { .. }
                | Self::VaultLocked
                | Self::NoConnection { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection_refused("sender has no tab");
        assert_eq!(err.to_string(), "Connection refused: sender has no tab");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("broadcast debounce must be non-zero");
        assert_eq!(
            err.to_string(),
            "Configuration error: broadcast debounce must be non-zero"
        );
    }

    #[test]
    fn test_is_transport_fault() {
        let closed = Error::stream_closed(MuxId::from_name("BPTop-1"));
        let other = Error::unknown_api_type("bogus");

        assert!(closed.is_transport_fault());
        assert!(Error::PortDisconnected.is_transport_fault());
        assert!(!other.is_transport_fault());
    }

    #[test]
    fn test_is_protocol_fault() {
        assert!(Error::unknown_api_type("bogus").is_protocol_fault());
        assert!(Error::malformed("fill-fields", "missing field").is_protocol_fault());
        assert!(!Error::VaultLocked.is_protocol_fault());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("active tab query", 2000).is_recoverable());
        assert!(Error::no_connection(TabId::new(3)).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
