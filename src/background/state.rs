//! State aggregation over the sub-domain stores.
//!
//! [`StateAggregator`] owns every sub-store and rebuilds
//! [`AggregatedState`] on each call to [`StateAggregator::snapshot`]; nothing
//! is cached between calls. Mutations that need storage or the ledger do the
//! I/O outside the store lock and publish a [`StateChange`] once committed.
//!
//! Vault commits are serialized: a commit holds the commit guard from its
//! snapshot through the storage write, so blobs reach storage in the order
//! their changes were applied in memory. A failed write reverts the change
//! only if the vault was not locked or re-unlocked in the meantime.
//!
//! # Locking rules
//!
//! While locked, no slice carries vault items regardless of requester, and
//! [`AggregatedState::website`] and [`AggregatedState::mobile`] are empty.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::future::try_join;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identifiers::TabId;
use crate::protocol::{LeechState, StateSlice, ValtState, VaultItem};

use super::host::{LedgerService, VaultCodec, VaultStorage};
use super::stores::{
    AccountStore, MobileItem, MobileState, MobileStore, NetworkInfo, NetworkState, NetworkStore,
    WalletState, WalletStore, WebsiteState, WebsiteStore,
};

// ============================================================================
// AggregatedState
// ============================================================================

/// Composed snapshot sent to the trusted UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedState {
    /// Whether the vault is unlocked.
    pub is_unlocked: bool,
    /// Whether a wallet has been created.
    pub is_initialized: bool,
    /// Network section.
    pub network: NetworkState,
    /// Wallet section.
    pub wallet: WalletState,
    /// Website vault section.
    pub website: WebsiteState,
    /// Mobile vault section.
    pub mobile: MobileState,
}

// ============================================================================
// StateChange
// ============================================================================

/// Committed state transition, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// Vault decrypted.
    Unlocked,
    /// Vault cleared.
    Locked,
    /// A website item stored for `hostname` was added, updated or deleted.
    ItemsChanged {
        /// Stored hostname of the changed item.
        hostname: String,
    },
    /// Mobile items changed.
    MobileChanged,
    /// Selected network or network list changed.
    NetworkChanged,
    /// Wallet identity changed.
    AccountChanged,
    /// Balances refreshed.
    WalletChanged,
}

impl StateChange {
    /// Returns `true` for lock and unlock transitions.
    #[inline]
    #[must_use]
    pub const fn is_lock_transition(&self) -> bool {
        matches!(self, Self::Unlocked | Self::Locked)
    }
}

// ============================================================================
// Storage keys
// ============================================================================

fn website_key(chain_id: u64) -> String {
    format!("website:{chain_id}")
}

fn mobile_key(chain_id: u64) -> String {
    format!("mobile:{chain_id}")
}

// ============================================================================
// StateAggregator
// ============================================================================

#[derive(Default)]
struct Stores {
    account: AccountStore,
    network: NetworkStore,
    website: WebsiteStore,
    mobile: MobileStore,
    wallet: WalletStore,
    /// Unlock key, held only while unlocked.
    key: Option<Vec<u8>>,
    /// Bumped on every lock and unlock.
    generation: u64,
}

impl Stores {
    fn unlocked_key(&self) -> Result<Vec<u8>> {
        self.key.clone().ok_or(Error::VaultLocked)
    }
}

/// Owns the sub-stores and composes them on demand.
pub struct StateAggregator {
    stores: RwLock<Stores>,
    commit: Mutex<()>,
    storage: Arc<dyn VaultStorage>,
    codec: Arc<dyn VaultCodec>,
    ledger: Arc<dyn LedgerService>,
    changes: EventBus<StateChange>,
}

impl fmt::Debug for StateAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateAggregator")
            .field("is_unlocked", &self.is_unlocked())
            .field("subscribers", &self.changes.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl StateAggregator {
    /// Creates a locked aggregator over the given collaborators.
    #[must_use]
    pub fn new(
        storage: Arc<dyn VaultStorage>,
        codec: Arc<dyn VaultCodec>,
        ledger: Arc<dyn LedgerService>,
    ) -> Self {
        Self {
            stores: RwLock::new(Stores::default()),
            commit: Mutex::new(()),
            storage,
            codec,
            ledger,
            changes: EventBus::new(),
        }
    }

    /// Subscribes to committed changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn changed(&self, change: StateChange) {
        debug!(?change, "State changed");
        self.changes.emit(change);
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns `true` while unlocked.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.stores.read().account.is_unlocked()
    }

    /// Composes the current state.
    #[must_use]
    pub fn snapshot(&self) -> AggregatedState {
        let stores = self.stores.read();
        let is_unlocked = stores.account.is_unlocked();

        AggregatedState {
            is_unlocked,
            is_initialized: stores.account.is_initialized(),
            network: stores.network.state(),
            wallet: stores.wallet.state(),
            website: if is_unlocked {
                stores.website.state()
            } else {
                WebsiteState::default()
            },
            mobile: if is_unlocked {
                stores.mobile.state()
            } else {
                MobileState::default()
            },
        }
    }

    /// Narrows the vault to the items serving `hostname`.
    #[must_use]
    pub fn slice_for(&self, hostname: &str) -> StateSlice {
        let stores = self.stores.read();
        StateSlice::for_hostname(
            stores.account.is_unlocked(),
            stores.website.items(),
            hostname,
        )
    }

    /// Builds the overlay state for `tab_id` logged in at `hostname`.
    #[must_use]
    pub fn leech_state(&self, tab_id: TabId, hostname: &str) -> LeechState {
        let stores = self.stores.read();
        let slice = StateSlice::for_hostname(
            stores.account.is_unlocked(),
            stores.website.items(),
            hostname,
        );

        LeechState {
            is_unlocked: slice.is_unlocked,
            hostname: hostname.to_owned(),
            items: slice.items,
            valt_state: stores.website.valt_state(tab_id).cloned(),
        }
    }

    /// Returns the latest value snapshot of `tab_id`.
    #[must_use]
    pub fn valt_state(&self, tab_id: TabId) -> Option<ValtState> {
        self.stores.read().website.valt_state(tab_id).cloned()
    }

    /// Returns the selected chain id.
    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.stores.read().network.chain_id()
    }

    // ========================================================================
    // Per-tab value snapshots
    // ========================================================================

    /// Records the latest value snapshot of `tab_id`.
    pub fn set_valt_state(&self, tab_id: TabId, valt: ValtState) {
        self.stores.write().website.set_valt_state(tab_id, valt);
    }

    /// Forgets the value snapshot of `tab_id`.
    pub fn remove_valt_state(&self, tab_id: TabId) -> Option<ValtState> {
        self.stores.write().website.remove_valt_state(tab_id)
    }

    // ========================================================================
    // Lock / unlock
    // ========================================================================

    /// Decrypts the website and mobile vaults of the selected chain.
    ///
    /// A chain with no stored blob unlocks to an empty vault.
    ///
    /// # Errors
    ///
    /// - [`Error::Vault`] if `key` is empty or does not open a stored blob
    /// - any error of the storage backend
    pub async fn unlock(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::vault("empty key"));
        }

        let chain_id = self.chain_id();
        let website_chain = website_key(chain_id);
        let mobile_chain = mobile_key(chain_id);
        let (website, mobile): (Vec<VaultItem>, Vec<MobileItem>) = try_join(
            self.load_blob(&website_chain, &key),
            self.load_blob(&mobile_chain, &key),
        )
        .await?;

        {
            let mut stores = self.stores.write();
            info!(
                chain_id,
                website_items = website.len(),
                mobile_items = mobile.len(),
                "Vault unlocked"
            );
            stores.website.load(website);
            stores.mobile.load(mobile);
            stores.account.set_unlocked(true);
            stores.key = Some(key);
            stores.generation += 1;
        }

        self.changed(StateChange::Unlocked);
        Ok(())
    }

    /// Clears decrypted items and the key.
    pub fn lock(&self) {
        {
            let mut stores = self.stores.write();
            stores.website.clear();
            stores.mobile.clear();
            stores.account.set_unlocked(false);
            stores.key = None;
            stores.generation += 1;
        }

        info!("Vault locked");
        self.changed(StateChange::Locked);
    }

    async fn load_blob<T: DeserializeOwned>(&self, chain_key: &str, key: &[u8]) -> Result<Vec<T>> {
        let Some(blob) = self.storage.get_encrypted_blob(chain_key).await? else {
            return Ok(Vec::new());
        };

        let plain = self.codec.open(key, &blob)?;
        serde_json::from_slice(&plain)
            .map_err(|e| Error::vault(format!("corrupt vault {chain_key}: {e}")))
    }

    async fn persist<T: Serialize>(&self, chain_key: &str, key: &[u8], items: &[T]) -> Result<()> {
        let plain = serde_json::to_vec(items)?;
        let blob = self.codec.seal(key, &plain)?;
        self.storage.put_encrypted_blob(chain_key, blob).await
    }

    // ========================================================================
    // Website items
    // ========================================================================

    /// Adds a website item.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultLocked`] while locked
    /// - [`Error::ItemExists`] if the title is taken for that hostname
    /// - any error of the storage backend; the in-memory change is reverted
    pub async fn add_item(&self, item: VaultItem) -> Result<()> {
        let hostname = item.hostname.clone();
        self.commit_website(|website| website.add_item(item))
            .await?;
        self.changed(StateChange::ItemsChanged { hostname });
        Ok(())
    }

    /// Replaces the website item with the same hostname and title.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultLocked`] while locked
    /// - [`Error::ItemNotFound`] if no such item exists
    /// - any error of the storage backend; the in-memory change is reverted
    pub async fn update_item(&self, item: VaultItem) -> Result<()> {
        let hostname = item.hostname.clone();
        self.commit_website(|website| website.update_item(item))
            .await?;
        self.changed(StateChange::ItemsChanged { hostname });
        Ok(())
    }

    /// Deletes a website item.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultLocked`] while locked
    /// - [`Error::ItemNotFound`] if no such item exists
    /// - any error of the storage backend; the in-memory change is reverted
    pub async fn delete_item(&self, hostname: &str, title: &str) -> Result<VaultItem> {
        let removed = self
            .commit_website(|website| website.delete_item(hostname, title))
            .await?;
        self.changed(StateChange::ItemsChanged {
            hostname: removed.hostname.clone(),
        });
        Ok(removed)
    }

    async fn commit_website<R>(
        &self,
        mutate: impl FnOnce(&mut WebsiteStore) -> Result<R>,
    ) -> Result<R> {
        let _commit = self.commit.lock().await;
        let (key, chain_id, generation, previous, items, out) = {
            let mut stores = self.stores.write();
            let key = stores.unlocked_key()?;
            let previous = stores.website.items().to_vec();
            let out = mutate(&mut stores.website)?;
            let items = stores.website.items().to_vec();
            let chain_id = stores.network.chain_id();
            (key, chain_id, stores.generation, previous, items, out)
        };

        if let Err(e) = self.persist(&website_key(chain_id), &key, &items).await {
            let mut stores = self.stores.write();
            if stores.generation == generation {
                warn!(error = %e, chain_id, "Website vault write failed, reverting");
                stores.website.load(previous);
            } else {
                warn!(error = %e, chain_id, "Website vault write failed after relock");
            }
            return Err(e);
        }
        Ok(out)
    }

    // ========================================================================
    // Mobile items
    // ========================================================================

    /// Adds a mobile item.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultLocked`] while locked
    /// - [`Error::ItemExists`] if the title is taken
    /// - any error of the storage backend; the in-memory change is reverted
    pub async fn add_mobile_item(&self, item: MobileItem) -> Result<()> {
        self.commit_mobile(|mobile| mobile.add_item(item)).await?;
        self.changed(StateChange::MobileChanged);
        Ok(())
    }

    /// Deletes a mobile item.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultLocked`] while locked
    /// - [`Error::ItemNotFound`] if no such item exists
    /// - any error of the storage backend; the in-memory change is reverted
    pub async fn delete_mobile_item(&self, title: &str) -> Result<MobileItem> {
        let removed = self
            .commit_mobile(|mobile| mobile.delete_item(title))
            .await?;
        self.changed(StateChange::MobileChanged);
        Ok(removed)
    }

    async fn commit_mobile<R>(
        &self,
        mutate: impl FnOnce(&mut MobileStore) -> Result<R>,
    ) -> Result<R> {
        let _commit = self.commit.lock().await;
        let (key, chain_id, generation, previous, items, out) = {
            let mut stores = self.stores.write();
            let key = stores.unlocked_key()?;
            let previous = stores.mobile.state().items;
            let out = mutate(&mut stores.mobile)?;
            let items = stores.mobile.state().items;
            let chain_id = stores.network.chain_id();
            (key, chain_id, stores.generation, previous, items, out)
        };

        if let Err(e) = self.persist(&mobile_key(chain_id), &key, &items).await {
            let mut stores = self.stores.write();
            if stores.generation == generation {
                warn!(error = %e, chain_id, "Mobile vault write failed, reverting");
                stores.mobile.load(previous);
            } else {
                warn!(error = %e, chain_id, "Mobile vault write failed after relock");
            }
            return Err(e);
        }
        Ok(out)
    }

    // ========================================================================
    // Account / network / wallet
    // ========================================================================

    /// Records the wallet address.
    pub fn set_main_address(&self, address: impl Into<String>) {
        self.stores.write().account.set_main_address(address);
        self.changed(StateChange::AccountChanged);
    }

    /// Registers or replaces a network.
    pub fn upsert_network(&self, info: NetworkInfo) {
        self.stores.write().network.upsert(info);
        self.changed(StateChange::NetworkChanged);
    }

    /// Selects a registered network.
    ///
    /// Switching chains locks the vault, since items are stored per chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the chain is not registered.
    pub fn select_network(&self, chain_id: u64) -> Result<()> {
        let was_unlocked = {
            let mut stores = self.stores.write();
            if stores.network.chain_id() == chain_id {
                return Ok(());
            }
            stores.network.select(chain_id)?;
            stores.account.is_unlocked()
        };

        self.changed(StateChange::NetworkChanged);
        if was_unlocked {
            self.lock();
        }
        Ok(())
    }

    /// Refreshes the balance state of the selected chain.
    ///
    /// # Errors
    ///
    /// - [`Error::Ledger`] if no wallet exists or the ledger fails
    pub async fn refresh_balances(&self) -> Result<()> {
        let (chain_id, address) = {
            let stores = self.stores.read();
            let address = stores
                .account
                .main_address()
                .map(str::to_owned)
                .ok_or_else(|| Error::ledger("no wallet address"))?;
            (stores.network.chain_id(), address)
        };

        let state = self.ledger.get_balance_state(chain_id, &address).await?;
        self.stores.write().wallet.set_balance(chain_id, state);
        self.changed(StateChange::WalletChanged);
        Ok(())
    }

    /// Signs and estimates a transaction through the ledger.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultLocked`] while locked
    /// - any error of the ledger
    pub async fn sign_and_estimate(&self, tx_params: Value) -> Result<Value> {
        if !self.is_unlocked() {
            return Err(Error::VaultLocked);
        }
        self.ledger.sign_and_estimate(tx_params).await
    }
}

// ============================================================================
// Tests
// ============================================================================
