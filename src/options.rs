//! Relay timing and behavior options.
//!
//! Shared by the background, content-script and top-frame controllers.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bpass_relay::RelayOptions;
//!
//! let options = RelayOptions::new()
//!     .with_broadcast_debounce(Duration::from_millis(250))
//!     .with_erase_on_blur(false);
//!
//! assert!(options.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

// ============================================================================
// Defaults
// ============================================================================

const DEFAULT_BROADCAST_DEBOUNCE: Duration = Duration::from_millis(200);
const DEFAULT_MUTATION_DEBOUNCE: Duration = Duration::from_millis(15);
const DEFAULT_VALUE_CHANGE_DEBOUNCE: Duration = Duration::from_millis(800);
const DEFAULT_SCROLL_DEBOUNCE: Duration = Duration::from_millis(100);
const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);
const DEFAULT_ACTIVE_TAB_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_MAX_SEARCH_DEPTH: usize = 32;

// ============================================================================
// RelayOptions
// ============================================================================

/// Timings and switches for every relay context.
///
/// Durations deserialize from milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayOptions {
    /// Coalescing window for state broadcasts.
    #[serde(with = "millis")]
    pub broadcast_debounce: Duration,

    /// Coalescing window for DOM mutation scans.
    #[serde(with = "millis")]
    pub mutation_debounce: Duration,

    /// Coalescing window for field value changes.
    #[serde(with = "millis")]
    pub value_change_debounce: Duration,

    /// Coalescing window for scroll events.
    #[serde(with = "millis")]
    pub scroll_debounce: Duration,

    /// Coalescing window for resize events.
    #[serde(with = "millis")]
    pub resize_debounce: Duration,

    /// Upper bound on an active-tab query.
    #[serde(with = "millis")]
    pub active_tab_timeout: Duration,

    /// Erase the overlay and injected button when a field loses focus.
    pub erase_on_blur: bool,

    /// Maximum ancestor levels walked when searching for a username field.
    pub max_search_depth: usize,

    /// URL loaded by the overlay iframe.
    pub leech_src: String,

    /// Extension id stamped on position messages.
    pub extension_id: String,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RelayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            broadcast_debounce: DEFAULT_BROADCAST_DEBOUNCE,
            mutation_debounce: DEFAULT_MUTATION_DEBOUNCE,
            value_change_debounce: DEFAULT_VALUE_CHANGE_DEBOUNCE,
            scroll_debounce: DEFAULT_SCROLL_DEBOUNCE,
            resize_debounce: DEFAULT_RESIZE_DEBOUNCE,
            active_tab_timeout: DEFAULT_ACTIVE_TAB_TIMEOUT,
            erase_on_blur: true,
            max_search_depth: DEFAULT_MAX_SEARCH_DEPTH,
            leech_src: String::new(),
            extension_id: String::new(),
        }
    }

    /// Parses options from a JSON document, filling gaps with defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is not valid JSON
    /// - [`Error::Config`] if the parsed options fail validation
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayOptions {
    /// Sets the broadcast coalescing window.
    #[inline]
    #[must_use]
    pub fn with_broadcast_debounce(mut self, window: Duration) -> Self {
        self.broadcast_debounce = window;
        self
    }

    /// Sets the DOM mutation coalescing window.
    #[inline]
    #[must_use]
    pub fn with_mutation_debounce(mut self, window: Duration) -> Self {
        self.mutation_debounce = window;
        self
    }

    /// Sets the value change coalescing window.
    #[inline]
    #[must_use]
    pub fn with_value_change_debounce(mut self, window: Duration) -> Self {
        self.value_change_debounce = window;
        self
    }

    /// Sets the scroll and resize coalescing windows.
    #[inline]
    #[must_use]
    pub fn with_viewport_debounce(mut self, scroll: Duration, resize: Duration) -> Self {
        self.scroll_debounce = scroll;
        self.resize_debounce = resize;
        self
    }

    /// Sets the active-tab query timeout.
    #[inline]
    #[must_use]
    pub fn with_active_tab_timeout(mut self, timeout: Duration) -> Self {
        self.active_tab_timeout = timeout;
        self
    }

    /// Enables or disables erase-on-blur.
    #[inline]
    #[must_use]
    pub fn with_erase_on_blur(mut self, enabled: bool) -> Self {
        self.erase_on_blur = enabled;
        self
    }

    /// Sets the username search depth bound.
    #[inline]
    #[must_use]
    pub fn with_max_search_depth(mut self, depth: usize) -> Self {
        self.max_search_depth = depth;
        self
    }

    /// Sets the overlay iframe URL.
    #[inline]
    #[must_use]
    pub fn with_leech_src(mut self, src: impl Into<String>) -> Self {
        self.leech_src = src.into();
        self
    }

    /// Sets the extension id.
    #[inline]
    #[must_use]
    pub fn with_extension_id(mut self, id: impl Into<String>) -> Self {
        self.extension_id = id.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RelayOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a debounce window or the search depth
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("broadcastDebounce", self.broadcast_debounce),
            ("mutationDebounce", self.mutation_debounce),
            ("valueChangeDebounce", self.value_change_debounce),
            ("scrollDebounce", self.scroll_debounce),
            ("resizeDebounce", self.resize_debounce),
            ("activeTabTimeout", self.active_tab_timeout),
        ];

        if let Some((name, _)) = windows.iter().find(|(_, window)| window.is_zero()) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        if self.max_search_depth == 0 {
            return Err(Error::config("maxSearchDepth must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Duration Serde
// ============================================================================

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
