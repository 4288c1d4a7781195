//! The enumerated `apiType` discriminator.
//!
//! Every application message names its semantic operation with one of these
//! wire strings. Anything else is a protocol fault.

use std::fmt;

// ============================================================================
// ApiType
// ============================================================================

/// Semantic operation carried by a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiType {
    /// Full aggregated state for the trusted extension UI.
    StateInit,
    /// Hostname-scoped state slice for injected peers.
    StateSync,
    /// Leech/overlay state for the active tab.
    LeechState,
    /// Top-frame handshake carrying its hostname.
    Identify,
    /// Background asks the content script to fill the login fields.
    FillFields,
    /// Content script reports a new field-pair value snapshot.
    FieldsValtChanged,
    /// Background forwards a value snapshot to top/leech peers.
    ValtChangedNotify,
    /// Content script found a login form.
    FieldFound,
    /// Draw the overlay at a field.
    SelectorDraw,
    /// Toggle the overlay (injected button click).
    SelectorToggle,
    /// Erase the overlay unless pinned.
    SelectorErase,
    /// Erase the overlay unconditionally.
    SelectorEraseForce,
    /// Value snapshot for the overlay.
    SelectorUpValt,
    /// Draw the overlay, or only update its height if it exists.
    SelectorUpDraw,
    /// Overlay reports a new height and pin flag.
    SelectorUpHeight,
}

impl ApiType {
    /// All known message kinds.
    pub const ALL: [Self; 15] = [
        Self::StateInit,
        Self::StateSync,
        Self::LeechState,
        Self::Identify,
        Self::FillFields,
        Self::FieldsValtChanged,
        Self::ValtChangedNotify,
        Self::FieldFound,
        Self::SelectorDraw,
        Self::SelectorToggle,
        Self::SelectorErase,
        Self::SelectorEraseForce,
        Self::SelectorUpValt,
        Self::SelectorUpDraw,
        Self::SelectorUpHeight,
    ];

    /// Returns the wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StateInit => "state-init",
            Self::StateSync => "state-sync",
            Self::LeechState => "leech-state",
            Self::Identify => "identify",
            Self::FillFields => "fill-fields",
            Self::FieldsValtChanged => "fields-valt-changed",
            Self::ValtChangedNotify => "valt-changed-notify",
            Self::FieldFound => "field-found",
            Self::SelectorDraw => "selector-draw",
            Self::SelectorToggle => "selector-toggle",
            Self::SelectorErase => "selector-erase",
            Self::SelectorEraseForce => "selector-erase-force",
            Self::SelectorUpValt => "selector-up-valt",
            Self::SelectorUpDraw => "selector-up-draw",
            Self::SelectorUpHeight => "selector-up-height",
        }
    }

    /// Parses a wire string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|api| api.as_str() == value)
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
