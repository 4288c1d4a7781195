//! Sub-domain stores composed by the state aggregator.
//!
//! Stores are plain data with synchronous mutators. Anything that touches
//! storage or the ledger is driven by [`StateAggregator`], which performs the
//! I/O first and then applies the result here under its lock.
//!
//! [`StateAggregator`]: super::StateAggregator

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::{ValtState, VaultItem};

// ============================================================================
// AccountStore
// ============================================================================

/// Unlock flag and wallet identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStore {
    is_unlocked: bool,
    main_address: Option<String>,
}

impl AccountStore {
    /// Returns `true` while unlocked.
    #[inline]
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        self.is_unlocked
    }

    /// Returns `true` once a wallet exists.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.main_address.is_some()
    }

    /// Returns the wallet address.
    #[inline]
    #[must_use]
    pub fn main_address(&self) -> Option<&str> {
        self.main_address.as_deref()
    }

    pub(crate) fn set_unlocked(&mut self, unlocked: bool) {
        self.is_unlocked = unlocked;
    }

    pub(crate) fn set_main_address(&mut self, address: impl Into<String>) {
        self.main_address = Some(address.into());
    }
}

// ============================================================================
// NetworkStore
// ============================================================================

/// One selectable chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    /// Chain id.
    pub chain_id: u64,
    /// Display name.
    pub name: String,
    /// RPC endpoint.
    pub rpc_url: String,
}

/// Network section of the aggregated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    /// Selected chain.
    pub chain_id: u64,
    /// RPC endpoint of the selected chain.
    pub rpc_url: Option<String>,
    /// Known chains.
    pub networks: Vec<NetworkInfo>,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_url: None,
            networks: Vec::new(),
        }
    }
}

/// Selected chain and known networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStore {
    state: NetworkState,
}

impl NetworkStore {
    /// Returns the selected chain id.
    #[inline]
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.state.chain_id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> NetworkState {
        self.state.clone()
    }

    /// Registers or replaces a network.
    pub(crate) fn upsert(&mut self, info: NetworkInfo) {
        match self
            .state
            .networks
            .iter_mut()
            .find(|n| n.chain_id == info.chain_id)
        {
            Some(existing) => *existing = info,
            None => self.state.networks.push(info),
        }
    }

    /// Selects a known chain.
    pub(crate) fn select(&mut self, chain_id: u64) -> Result<()> {
        let info = self
            .state
            .networks
            .iter()
            .find(|n| n.chain_id == chain_id)
            .ok_or_else(|| Error::config(format!("unknown chain {chain_id}")))?;

        self.state.rpc_url = Some(info.rpc_url.clone());
        self.state.chain_id = chain_id;
        Ok(())
    }
}

// ============================================================================
// WebsiteStore
// ============================================================================

/// Website section of the aggregated state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteState {
    /// Decrypted items. Empty while locked.
    pub items: Vec<VaultItem>,
}

/// Website vault items and the latest value snapshot per tab.
#[derive(Debug, Clone, Default)]
pub struct WebsiteStore {
    items: Vec<VaultItem>,
    valt_states: FxHashMap<TabId, ValtState>,
}

impl WebsiteStore {
    /// Returns the decrypted items.
    #[inline]
    #[must_use]
    pub fn items(&self) -> &[VaultItem] {
        &self.items
    }

    /// Returns the public state.
    #[must_use]
    pub fn state(&self) -> WebsiteState {
        WebsiteState {
            items: self.items.clone(),
        }
    }

    pub(crate) fn load(&mut self, items: Vec<VaultItem>) {
        self.items = items;
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    /// Adds an item; titles are unique per hostname.
    pub(crate) fn add_item(&mut self, item: VaultItem) -> Result<()> {
        if self.position(&item.hostname, &item.title).is_some() {
            return Err(Error::item_exists(item.hostname, item.title));
        }
        self.items.push(item);
        Ok(())
    }

    /// Replaces the item with the same hostname and title.
    pub(crate) fn update_item(&mut self, item: VaultItem) -> Result<()> {
        let index = self
            .position(&item.hostname, &item.title)
            .ok_or_else(|| Error::item_not_found(&item.hostname, &item.title))?;
        self.items[index] = item;
        Ok(())
    }

    /// Removes the item with `hostname` and `title`.
    pub(crate) fn delete_item(&mut self, hostname: &str, title: &str) -> Result<VaultItem> {
        let index = self
            .position(hostname, title)
            .ok_or_else(|| Error::item_not_found(hostname, title))?;
        Ok(self.items.remove(index))
    }

    fn position(&self, hostname: &str, title: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|it| it.hostname.eq_ignore_ascii_case(hostname) && it.title == title)
    }

    /// Returns the latest snapshot reported by `tab_id`.
    #[must_use]
    pub fn valt_state(&self, tab_id: TabId) -> Option<&ValtState> {
        self.valt_states.get(&tab_id)
    }

    pub(crate) fn set_valt_state(&mut self, tab_id: TabId, valt: ValtState) {
        self.valt_states.insert(tab_id, valt);
    }

    pub(crate) fn remove_valt_state(&mut self, tab_id: TabId) -> Option<ValtState> {
        self.valt_states.remove(&tab_id)
    }
}

// ============================================================================
// MobileStore
// ============================================================================

/// One mobile passbook entry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileItem {
    /// Unique title.
    pub title: String,
    /// Stored username.
    pub username: String,
    /// Stored password.
    pub password: String,
}

impl std::fmt::Debug for MobileItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobileItem")
            .field("title", &self.title)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Mobile section of the aggregated state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileState {
    /// Decrypted items. Empty while locked.
    pub items: Vec<MobileItem>,
}

/// Mobile passbook items.
#[derive(Debug, Clone, Default)]
pub struct MobileStore {
    items: Vec<MobileItem>,
}

impl MobileStore {
    /// Returns the public state.
    #[must_use]
    pub fn state(&self) -> MobileState {
        MobileState {
            items: self.items.clone(),
        }
    }

    pub(crate) fn load(&mut self, items: Vec<MobileItem>) {
        self.items = items;
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    /// Adds an item; titles are unique.
    pub(crate) fn add_item(&mut self, item: MobileItem) -> Result<()> {
        if self.items.iter().any(|it| it.title == item.title) {
            return Err(Error::item_exists("mobile", item.title));
        }
        self.items.push(item);
        Ok(())
    }

    /// Removes the item titled `title`.
    pub(crate) fn delete_item(&mut self, title: &str) -> Result<MobileItem> {
        let index = self
            .items
            .iter()
            .position(|it| it.title == title)
            .ok_or_else(|| Error::item_not_found("mobile", title))?;
        Ok(self.items.remove(index))
    }
}

// ============================================================================
// WalletStore
// ============================================================================

/// Wallet section of the aggregated state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    /// Last balance state fetched per chain.
    pub balances: BTreeMap<u64, Value>,
}

/// Balance cache refreshed from the ledger.
#[derive(Debug, Clone, Default)]
pub struct WalletStore {
    balances: BTreeMap<u64, Value>,
}

impl WalletStore {
    /// Returns the public state.
    #[must_use]
    pub fn state(&self) -> WalletState {
        WalletState {
            balances: self.balances.clone(),
        }
    }

    /// Returns the cached balance state of `chain_id`.
    #[must_use]
    pub fn balance(&self, chain_id: u64) -> Option<&Value> {
        self.balances.get(&chain_id)
    }

    pub(crate) fn set_balance(&mut self, chain_id: u64, state: Value) {
        self.balances.insert(chain_id, state);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_website_duplicate_title_rejected() {
        let mut store = WebsiteStore::default();
        store
            .add_item(VaultItem::new("example.com", "main", "alice", "pw"))
            .expect("add");

        let err = store
            .add_item(VaultItem::new("example.com", "main", "bob", "pw2"))
            .unwrap_err();
        assert!(matches!(err, Error::ItemExists { .. }));

        store
            .add_item(VaultItem::new("other.org", "main", "bob", "pw2"))
            .expect("same title on another host");
        assert_eq!(store.items().len(), 2);
    }

    #[test]
    fn test_website_update_and_delete() {
        let mut store = WebsiteStore::default();
        store
            .add_item(VaultItem::new("example.com", "main", "alice", "pw"))
            .expect("add");
        store
            .update_item(VaultItem::new("example.com", "main", "alice", "new"))
            .expect("update");
        assert_eq!(store.items()[0].password, "new");

        let err = store
            .update_item(VaultItem::new("example.com", "nope", "a", "b"))
            .unwrap_err();
        assert!(matches!(err, Error::ItemNotFound { .. }));

        let removed = store.delete_item("example.com", "main").expect("delete");
        assert_eq!(removed.username, "alice");
        assert!(store.items().is_empty());
    }

    #[test]
    fn test_valt_state_per_tab() {
        let mut store = WebsiteStore::default();
        let valt = ValtState {
            hostname: "example.com".into(),
            username: "alice".into(),
            ..ValtState::default()
        };
        store.set_valt_state(TabId::new(1), valt.clone());
        assert_eq!(store.valt_state(TabId::new(1)), Some(&valt));
        assert!(store.valt_state(TabId::new(2)).is_none());
        assert!(store.remove_valt_state(TabId::new(1)).is_some());
        assert!(store.remove_valt_state(TabId::new(1)).is_none());
    }

    #[test]
    fn test_network_select_unknown_chain() {
        let mut store = NetworkStore::default();
        assert!(store.select(5).is_err());

        store.upsert(NetworkInfo {
            chain_id: 5,
            name: "goerli".into(),
            rpc_url: "https://rpc.example/5".into(),
        });
        store.select(5).expect("select");
        assert_eq!(store.chain_id(), 5);
        assert_eq!(store.state().rpc_url.as_deref(), Some("https://rpc.example/5"));
    }

    #[test]
    fn test_mobile_clear_on_lock() {
        let mut store = MobileStore::default();
        store
            .add_item(MobileItem {
                title: "phone".into(),
                username: "u".into(),
                password: "p".into(),
            })
            .expect("add");
        store.clear();
        assert!(store.state().items.is_empty());
    }

    #[test]
    fn test_account_initialized() {
        let mut account = AccountStore::default();
        assert!(!account.is_initialized());
        account.set_main_address("0xabc");
        assert!(account.is_initialized());
        assert_eq!(account.main_address(), Some("0xabc"));
    }
}
