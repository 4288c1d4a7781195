//! State payloads exchanged between contexts.
//!
//! Credential-bearing types redact secrets in their `Debug` output so that
//! `tracing` fields never leak a password.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hostname::is_within_site;

// ============================================================================
// VaultItem
// ============================================================================

/// One stored credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    /// Site the credential was saved for.
    pub hostname: String,
    /// Display title, unique per hostname.
    pub title: String,
    /// Stored username.
    pub username: String,
    /// Stored password.
    pub password: String,
}

impl VaultItem {
    /// Creates an item.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        title: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            title: title.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns `true` if this item serves `requested`.
    #[inline]
    #[must_use]
    pub fn serves(&self, requested: &str) -> bool {
        is_within_site(requested, &self.hostname)
    }
}

impl fmt::Debug for VaultItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultItem")
            .field("hostname", &self.hostname)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// ValtState
// ============================================================================

/// Which field of a pair holds focus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveField {
    /// The username/e-mail input.
    #[default]
    Username,
    /// The password input.
    Password,
}

/// Current values of one detected login form.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValtState {
    /// Field holding focus when the snapshot was taken.
    pub actived_field: ActiveField,
    /// Hostname of the document containing the form.
    pub hostname: String,
    /// Username field value.
    pub username: String,
    /// Password field value.
    pub password: String,
}

impl ValtState {
    /// Returns `true` when both fields are empty.
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for ValtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValtState")
            .field("actived_field", &self.actived_field)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password_len", &self.password.len())
            .finish()
    }
}

// ============================================================================
// StateSlice
// ============================================================================

/// Hostname-scoped state pushed to top-frame and field-injection peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSlice {
    /// Whether the vault is unlocked.
    pub is_unlocked: bool,
    /// Items serving the requested hostname. Always empty when locked.
    pub items: Vec<VaultItem>,
    /// Number of items in `items`.
    pub matched_num: usize,
    /// At least one item was saved for exactly the requested hostname.
    #[serde(default)]
    pub exact_matched: bool,
}

impl StateSlice {
    /// The slice every peer receives while the vault is locked.
    #[must_use]
    pub fn locked() -> Self {
        Self::default()
    }

    /// Builds a slice from the full item list for `hostname`.
    ///
    /// Returns [`StateSlice::locked`] when `is_unlocked` is `false`.
    #[must_use]
    pub fn for_hostname(is_unlocked: bool, items: &[VaultItem], hostname: &str) -> Self {
        if !is_unlocked {
            return Self::locked();
        }

        let items: Vec<VaultItem> = items
            .iter()
            .filter(|item| item.serves(hostname))
            .cloned()
            .collect();
        let exact_matched = items
            .iter()
            .any(|item| item.hostname.eq_ignore_ascii_case(hostname));

        Self {
            is_unlocked,
            matched_num: items.len(),
            items,
            exact_matched,
        }
    }
}

// ============================================================================
// LeechState
// ============================================================================

/// State pushed to the overlay ("leech") connection of the active tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeechState {
    /// Whether the vault is unlocked.
    pub is_unlocked: bool,
    /// Login hostname of the tab.
    pub hostname: String,
    /// Items serving `hostname`. Always empty when locked.
    pub items: Vec<VaultItem>,
    /// Latest value snapshot reported by the tab, if any.
    pub valt_state: Option<ValtState>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn items() -> Vec<VaultItem> {
        vec![
            VaultItem::new("example.com", "main", "alice", "pw1"),
            VaultItem::new("mail.example.com", "mail", "bob", "pw2"),
            VaultItem::new("other.org", "other", "carol", "pw3"),
        ]
    }

    #[test]
    fn test_slice_includes_parent_site_items() {
        let slice = StateSlice::for_hostname(true, &items(), "mail.example.com");
        assert_eq!(slice.matched_num, 2);
        assert!(slice.exact_matched);
        assert!(slice.items.iter().all(|it| it.hostname.ends_with("example.com")));
    }

    #[test]
    fn test_slice_excludes_subdomain_items_for_parent() {
        let slice = StateSlice::for_hostname(true, &items(), "example.com");
        assert_eq!(slice.matched_num, 1);
        assert_eq!(slice.items[0].title, "main");
    }

    #[test]
    fn test_locked_slice_is_empty() {
        let slice = StateSlice::for_hostname(false, &items(), "example.com");
        assert_eq!(slice, StateSlice::locked());
        assert!(!slice.is_unlocked);
    }

    #[test]
    fn test_slice_wire_format() {
        let slice = StateSlice::for_hostname(true, &items(), "other.org");
        let json = serde_json::to_value(&slice).expect("serialize");
        assert_eq!(json["isUnlocked"], true);
        assert_eq!(json["matchedNum"], 1);
        assert_eq!(json["items"][0]["username"], "carol");
    }

    #[test]
    fn test_debug_redacts_password() {
        let item = VaultItem::new("example.com", "main", "alice", "hunter2");
        assert!(!format!("{item:?}").contains("hunter2"));

        let valt = ValtState {
            password: "hunter2".into(),
            ..ValtState::default()
        };
        assert!(!format!("{valt:?}").contains("hunter2"));
    }

    #[test]
    fn test_active_field_wire() {
        let json = serde_json::to_string(&ActiveField::Password).expect("serialize");
        assert_eq!(json, "\"password\"");
    }

    proptest! {
        #[test]
        fn prop_locked_slice_always_empty(
            stored in "[a-z]{1,6}\\.(com|org)",
            sub in "[a-z]{1,6}",
        ) {
            let items = vec![VaultItem::new(stored.clone(), "t", "u", "p")];
            let requested = format!("{sub}.{stored}");
            prop_assert!(StateSlice::for_hostname(false, &items, &requested).items.is_empty());
            prop_assert_eq!(StateSlice::for_hostname(true, &items, &requested).matched_num, 1);
        }
    }
}
