//! External collaborators consumed by the background.
//!
//! | Trait | Provides |
//! |-------|----------|
//! | [`HostTabs`] | Active-tab query |
//! | [`VaultStorage`] | Encrypted blob get/set |
//! | [`VaultCodec`] | Blob sealing |
//! | [`LedgerService`] | Balances and transaction signing |
//!
//! All of them are opaque: the relay never inspects blobs, balances or
//! signed transactions, it only moves them between sub-stores.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::TabId;

// ============================================================================
// HostTabs
// ============================================================================

/// Host platform tab API.
#[async_trait]
pub trait HostTabs: Send + Sync {
    /// Returns the focused tab of the current window.
    ///
    /// May never resolve if the tab closes mid-query; callers bound it with
    /// a timeout.
    async fn active_tab(&self) -> Result<Option<TabId>>;
}

// ============================================================================
// VaultStorage
// ============================================================================

/// Opaque key/value store for encrypted vault blobs.
#[async_trait]
pub trait VaultStorage: Send + Sync {
    /// Reads the blob stored under `chain_key`.
    async fn get_encrypted_blob(&self, chain_key: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the blob stored under `chain_key`.
    async fn put_encrypted_blob(&self, chain_key: &str, blob: Vec<u8>) -> Result<()>;
}

/// Process-local [`VaultStorage`].
#[derive(Debug, Default)]
pub struct InMemoryVaultStorage {
    blobs: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl InMemoryVaultStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VaultStorage for InMemoryVaultStorage {
    async fn get_encrypted_blob(&self, chain_key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(chain_key).cloned())
    }

    async fn put_encrypted_blob(&self, chain_key: &str, blob: Vec<u8>) -> Result<()> {
        self.blobs.lock().insert(chain_key.to_owned(), blob);
        Ok(())
    }
}

// ============================================================================
// VaultCodec
// ============================================================================

/// Seals and opens stored blobs.
///
/// Encryption lives behind this trait; the relay only hands it the key it
/// was unlocked with and serializes items itself.
pub trait VaultCodec: Send + Sync {
    /// Opens `blob` with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Vault`] if `key` does not open `blob`.
    fn open(&self, key: &[u8], blob: &[u8]) -> Result<Vec<u8>>;

    /// Seals `plain` with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Vault`] if sealing fails.
    fn seal(&self, key: &[u8], plain: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through codec for unencrypted storage. Rejects an empty key so that
/// an unlock without credentials still fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl VaultCodec for PlainCodec {
    fn open(&self, key: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::vault("empty key"));
        }
        Ok(blob.to_vec())
    }

    fn seal(&self, key: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::vault("empty key"));
        }
        Ok(plain.to_vec())
    }
}

// ============================================================================
// LedgerService
// ============================================================================

/// Wallet/chain backend. Only the wallet sub-store calls it.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Returns the balance state of `address` on `chain_id`.
    async fn get_balance_state(&self, chain_id: u64, address: &str) -> Result<Value>;

    /// Signs and estimates a transaction.
    async fn sign_and_estimate(&self, tx_params: Value) -> Result<Value>;
}

/// Ledger for deployments without a chain backend. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineLedger;

#[async_trait]
impl LedgerService for OfflineLedger {
    async fn get_balance_state(&self, chain_id: u64, _address: &str) -> Result<Value> {
        Err(Error::ledger(format!("no ledger for chain {chain_id}")))
    }

    async fn sign_and_estimate(&self, _tx_params: Value) -> Result<Value> {
        Err(Error::ledger("no ledger configured"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryVaultStorage::new();
        assert!(storage.get_encrypted_blob("website:1").await.expect("get").is_none());

        storage
            .put_encrypted_blob("website:1", vec![1, 2, 3])
            .await
            .expect("put");
        assert_eq!(
            storage.get_encrypted_blob("website:1").await.expect("get"),
            Some(vec![1, 2, 3])
        );
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_plain_codec() {
        let blob = PlainCodec.seal(b"k", b"[]").expect("seal");
        assert_eq!(PlainCodec.open(b"k", &blob).expect("open"), b"[]".to_vec());

        let err = PlainCodec.open(b"", &blob).unwrap_err();
        assert!(matches!(err, Error::Vault { .. }));
    }

    #[tokio::test]
    async fn test_offline_ledger_fails() {
        let err = OfflineLedger
            .get_balance_state(1, "0xabc")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ledger { .. }));
    }
}
