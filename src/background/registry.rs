//! Per-role connection registries.
//!
//! Each registry maps a tab to at most one live [`ConnectionEntry`]. A new
//! connection for the same tab replaces the old entry outright, and an entry
//! without a hostname has not finished its handshake: hostname lookups skip
//! it, tab lookups do not.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Registries                                 │
//! │  top   : TabId → { BPTop-…,   stream, host? }│
//! │  field : TabId → { BPinjet-…, stream, host } │
//! │          host  → {TabId}   (exact index)   │
//! │  leech : TabId → { BPLeech-…, stream, host } │
//! └────────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::hostname::is_within_site;
use crate::identifiers::{MuxId, TabId};
use crate::transport::LogicalStream;

// ============================================================================
// ConnectionRole
// ============================================================================

/// The three roles a page-side peer can connect as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Top-frame controller.
    Top,
    /// Field-injection content script.
    Field,
    /// Overlay ("leech") iframe.
    Leech,
}

impl ConnectionRole {
    /// Every role, in broadcast order.
    pub const ALL: [Self; 3] = [Self::Field, Self::Top, Self::Leech];

    /// Stream name prefix for the role.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Top => "BPTop",
            Self::Field => "BPinjet",
            Self::Leech => "BPLeech",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Top => "top",
            Self::Field => "field",
            Self::Leech => "leech",
        })
    }
}

// ============================================================================
// ConnectionEntry
// ============================================================================

/// One live connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// Name of the stream the background opened.
    pub mux_id: MuxId,
    /// Writer for that stream.
    pub stream: LogicalStream,
    /// Identity, once the handshake completed.
    pub hostname: Option<String>,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

#[derive(Default)]
struct RegistryState {
    entries: FxHashMap<TabId, ConnectionEntry>,
    by_host: FxHashMap<String, FxHashSet<TabId>>,
}

impl RegistryState {
    fn index(&mut self, tab_id: TabId, hostname: &str) {
        self.by_host
            .entry(hostname.to_owned())
            .or_default()
            .insert(tab_id);
    }

    fn unindex(&mut self, tab_id: TabId, hostname: Option<&str>) {
        let Some(hostname) = hostname else {
            return;
        };
        if let Some(tabs) = self.by_host.get_mut(hostname) {
            tabs.remove(&tab_id);
            if tabs.is_empty() {
                self.by_host.remove(hostname);
            }
        }
    }
}

/// Tab-keyed registry for one connection role.
pub struct ConnectionRegistry {
    role: ConnectionRole,
    state: RwLock<RegistryState>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("role", &self.role)
            .field("len", &self.len())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(role: ConnectionRole) -> Self {
        Self {
            role,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Returns the role.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Inserts or replaces the entry for `tab_id`.
    ///
    /// Re-adding the stream already registered is a no-op that keeps its
    /// hostname. Replacing a different stream wipes the old hostname.
    /// Returns the replaced entry, if any.
    pub fn add(&self, tab_id: TabId, stream: LogicalStream) -> Option<ConnectionEntry> {
        self.insert(tab_id, stream, None)
    }

    /// Inserts or replaces the entry for `tab_id` with a known hostname.
    pub fn add_identified(
        &self,
        tab_id: TabId,
        stream: LogicalStream,
        hostname: impl Into<String>,
    ) -> Option<ConnectionEntry> {
        self.insert(tab_id, stream, Some(hostname.into()))
    }

    fn insert(
        &self,
        tab_id: TabId,
        stream: LogicalStream,
        hostname: Option<String>,
    ) -> Option<ConnectionEntry> {
        let mut state = self.state.write();

        if let Some(existing) = state.entries.get(&tab_id)
            && existing.mux_id == *stream.mux_id()
        {
            if let Some(hostname) = hostname {
                let previous = existing.hostname.clone();
                state.unindex(tab_id, previous.as_deref());
                state.index(tab_id, &hostname);
                if let Some(entry) = state.entries.get_mut(&tab_id) {
                    entry.hostname = Some(hostname);
                }
            }
            return None;
        }

        let entry = ConnectionEntry {
            mux_id: stream.mux_id().clone(),
            stream,
            hostname,
        };
        if let Some(ref hostname) = entry.hostname {
            state.index(tab_id, hostname);
        }

        debug!(role = %self.role, tab_id = %tab_id, mux_id = %entry.mux_id, "Connection added");

        let replaced = state.entries.insert(tab_id, entry);
        if let Some(ref old) = replaced {
            state.unindex(tab_id, old.hostname.as_deref());
            debug!(role = %self.role, tab_id = %tab_id, mux_id = %old.mux_id, "Connection replaced");
        }
        replaced
    }

    /// Attaches the hostname once the peer identifies itself.
    ///
    /// Returns `false` if no entry exists for `tab_id`.
    pub fn set_hostname(&self, tab_id: TabId, hostname: impl Into<String>) -> bool {
        let hostname = hostname.into();
        let mut state = self.state.write();

        let Some(previous) = state.entries.get(&tab_id).map(|e| e.hostname.clone()) else {
            return false;
        };

        state.unindex(tab_id, previous.as_deref());
        state.index(tab_id, &hostname);
        if let Some(entry) = state.entries.get_mut(&tab_id) {
            entry.hostname = Some(hostname);
        }
        true
    }

    /// Returns the entry for `tab_id`.
    #[must_use]
    pub fn get(&self, tab_id: TabId) -> Option<ConnectionEntry> {
        self.state.read().entries.get(&tab_id).cloned()
    }

    /// Returns the stream for `tab_id`.
    #[must_use]
    pub fn stream(&self, tab_id: TabId) -> Option<LogicalStream> {
        self.state
            .read()
            .entries
            .get(&tab_id)
            .map(|e| e.stream.clone())
    }

    /// Returns the identified hostname for `tab_id`.
    #[must_use]
    pub fn hostname(&self, tab_id: TabId) -> Option<String> {
        self.state
            .read()
            .entries
            .get(&tab_id)
            .and_then(|e| e.hostname.clone())
    }

    /// Entries whose hostname serves `hostname` (the requested host is the
    /// entry's host or a subdomain of it).
    ///
    /// Linear scan; entries without a hostname are skipped.
    #[must_use]
    pub fn get_by_hostname(&self, hostname: &str) -> Vec<(TabId, ConnectionEntry)> {
        self.scan(|entry_host| is_within_site(hostname, entry_host))
    }

    /// Entries whose hostname falls under `site` (the entry's host is `site`
    /// or a subdomain of it).
    ///
    /// Used to reach every page affected by a change to items stored for
    /// `site`.
    #[must_use]
    pub fn within_site(&self, site: &str) -> Vec<(TabId, ConnectionEntry)> {
        self.scan(|entry_host| is_within_site(entry_host, site))
    }

    /// Tabs identified with exactly `hostname`.
    #[must_use]
    pub fn tabs_for_exact_hostname(&self, hostname: &str) -> Vec<TabId> {
        let state = self.state.read();
        let mut tabs: Vec<TabId> = state
            .by_host
            .get(hostname)
            .map(|tabs| tabs.iter().copied().collect())
            .unwrap_or_default();
        tabs.sort_unstable();
        tabs
    }

    fn scan(&self, matches: impl Fn(&str) -> bool) -> Vec<(TabId, ConnectionEntry)> {
        let state = self.state.read();
        let mut found: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.hostname.as_deref().is_some_and(&matches))
            .map(|(tab_id, entry)| (*tab_id, entry.clone()))
            .collect();
        found.sort_unstable_by_key(|(tab_id, _)| *tab_id);
        found
    }

    /// Removes the entry for `tab_id`. Safe to call repeatedly.
    pub fn remove(&self, tab_id: TabId) -> Option<ConnectionEntry> {
        let mut state = self.state.write();
        let removed = state.entries.remove(&tab_id);
        if let Some(ref entry) = removed {
            state.unindex(tab_id, entry.hostname.as_deref());
            debug!(role = %self.role, tab_id = %tab_id, mux_id = %entry.mux_id, "Connection removed");
        }
        removed
    }

    /// Removes the entry for `tab_id` only if it is still `mux_id`.
    ///
    /// Disconnect hooks use this so that a late disconnect of a replaced
    /// port cannot evict its replacement.
    pub fn release(&self, tab_id: TabId, mux_id: &MuxId) -> bool {
        let mut state = self.state.write();
        let is_current = state
            .entries
            .get(&tab_id)
            .is_some_and(|entry| entry.mux_id == *mux_id);
        if !is_current {
            return false;
        }

        if let Some(entry) = state.entries.remove(&tab_id) {
            state.unindex(tab_id, entry.hostname.as_deref());
            debug!(role = %self.role, tab_id = %tab_id, mux_id = %mux_id, "Connection released");
        }
        true
    }

    /// Returns every live entry, ordered by tab.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TabId, ConnectionEntry)> {
        let state = self.state.read();
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .map(|(tab_id, entry)| (*tab_id, entry.clone()))
            .collect();
        entries.sort_unstable_by_key(|(tab_id, _)| *tab_id);
        entries
    }

    /// Returns the number of live entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns `true` if no entry is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Registries
// ============================================================================

/// The three role registries of one background process.
#[derive(Debug)]
pub struct Registries {
    /// Top-frame connections.
    pub top: ConnectionRegistry,
    /// Field-injection connections.
    pub field: ConnectionRegistry,
    /// Overlay connections.
    pub leech: ConnectionRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Creates empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            top: ConnectionRegistry::new(ConnectionRole::Top),
            field: ConnectionRegistry::new(ConnectionRole::Field),
            leech: ConnectionRegistry::new(ConnectionRole::Leech),
        }
    }

    /// Returns the registry for `role`.
    #[must_use]
    pub const fn for_role(&self, role: ConnectionRole) -> &ConnectionRegistry {
        match role {
            ConnectionRole::Top => &self.top,
            ConnectionRole::Field => &self.field,
            ConnectionRole::Leech => &self.leech,
        }
    }

    /// Total live connections across roles.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.top.len() + self.field.len() + self.leech.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::transport::{Multiplexer, Port, SenderInfo, StreamInbox};

    /// Opens a stream over a fresh port pair; keeps the far end alive.
    fn open(name: &str) -> (LogicalStream, StreamInbox, Port) {
        let (listener, connector) = Port::pair(SenderInfo::default());
        let (mux, _, _) = Multiplexer::new(listener);
        let (stream, inbox) = mux.create_stream(MuxId::from_name(name));
        (stream, inbox, connector)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = ConnectionRegistry::new(ConnectionRole::Top);
        let (stream, _inbox, _peer) = open("BPTop-1");

        assert!(registry.add(TabId::new(1), stream).is_none());
        let entry = registry.get(TabId::new(1)).expect("entry");
        assert_eq!(entry.mux_id.as_str(), "BPTop-1");
        assert_eq!(entry.hostname, None);
    }

    #[tokio::test]
    async fn test_replace_wipes_hostname() {
        let registry = ConnectionRegistry::new(ConnectionRole::Top);
        let (first, _i1, _p1) = open("BPTop-1");
        let (second, _i2, _p2) = open("BPTop-2");

        registry.add(TabId::new(1), first);
        registry.set_hostname(TabId::new(1), "example.com");

        let replaced = registry.add(TabId::new(1), second).expect("replaced");
        assert_eq!(replaced.mux_id.as_str(), "BPTop-1");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.hostname(TabId::new(1)), None);
        assert!(registry.tabs_for_exact_hostname("example.com").is_empty());
    }

    #[tokio::test]
    async fn test_add_same_mux_is_idempotent() {
        let registry = ConnectionRegistry::new(ConnectionRole::Top);
        let (stream, _inbox, _peer) = open("BPTop-1");

        registry.add(TabId::new(1), stream.clone());
        registry.set_hostname(TabId::new(1), "example.com");
        assert!(registry.add(TabId::new(1), stream).is_none());
        assert_eq!(registry.hostname(TabId::new(1)).as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_set_hostname_absent_is_noop() {
        let registry = ConnectionRegistry::new(ConnectionRole::Top);
        assert!(!registry.set_hostname(TabId::new(9), "example.com"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_hostname_skips_unidentified() {
        let registry = ConnectionRegistry::new(ConnectionRole::Field);
        let (a, _ia, _pa) = open("BPinjet-a");
        let (b, _ib, _pb) = open("BPinjet-b");

        registry.add_identified(TabId::new(42), a, "mail.example.com");
        registry.add(TabId::new(43), b);

        let found = registry.get_by_hostname("mail.example.com");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, TabId::new(42));
    }

    #[tokio::test]
    async fn test_get_by_hostname_parent_entry() {
        let registry = ConnectionRegistry::new(ConnectionRole::Top);
        let (a, _ia, _pa) = open("BPTop-a");
        registry.add_identified(TabId::new(1), a, "example.com");

        assert_eq!(registry.get_by_hostname("mail.example.com").len(), 1);
        assert!(registry.get_by_hostname("evil-example.com").is_empty());
    }

    #[tokio::test]
    async fn test_within_site() {
        let registry = ConnectionRegistry::new(ConnectionRole::Field);
        let (a, _ia, _pa) = open("BPinjet-a");
        let (b, _ib, _pb) = open("BPinjet-b");
        registry.add_identified(TabId::new(1), a, "mail.example.com");
        registry.add_identified(TabId::new(2), b, "other.org");

        let found = registry.within_site("example.com");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, TabId::new(1));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new(ConnectionRole::Leech);
        let (stream, _inbox, _peer) = open("BPLeech-1");
        registry.add_identified(TabId::new(3), stream, "example.com");

        assert!(registry.remove(TabId::new(3)).is_some());
        assert!(registry.remove(TabId::new(3)).is_none());
        assert!(registry.tabs_for_exact_hostname("example.com").is_empty());
    }

    #[tokio::test]
    async fn test_release_ignores_replaced_mux() {
        let registry = ConnectionRegistry::new(ConnectionRole::Field);
        let (first, _i1, _p1) = open("BPinjet-1");
        let (second, _i2, _p2) = open("BPinjet-2");

        registry.add_identified(TabId::new(5), first, "example.com");
        registry.add_identified(TabId::new(5), second, "example.com");

        assert!(!registry.release(TabId::new(5), &MuxId::from_name("BPinjet-1")));
        assert!(registry.get(TabId::new(5)).is_some());
        assert!(registry.release(TabId::new(5), &MuxId::from_name("BPinjet-2")));
        assert!(registry.get(TabId::new(5)).is_none());
    }

    #[test]
    fn test_role_prefixes() {
        assert_eq!(ConnectionRole::Top.prefix(), "BPTop");
        assert_eq!(ConnectionRole::Field.prefix(), "BPinjet");
        assert_eq!(ConnectionRole::Leech.prefix(), "BPLeech");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u32),
        Remove(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u32..6).prop_map(Op::Add), (0u32..6).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_tab(ops in proptest::collection::vec(op(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let _guard = runtime.enter();

            let registry = ConnectionRegistry::new(ConnectionRole::Top);
            let mut model = std::collections::BTreeMap::new();
            let mut peers = Vec::new();

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Add(tab) => {
                        let (stream, inbox, peer) = open(&format!("BPTop-{i}"));
                        peers.push((inbox, peer));
                        registry.add(TabId::new(tab), stream);
                        model.insert(tab, format!("BPTop-{i}"));
                    }
                    Op::Remove(tab) => {
                        registry.remove(TabId::new(tab));
                        model.remove(&tab);
                    }
                }

                prop_assert_eq!(registry.len(), model.len());
                for (tab, mux) in &model {
                    let entry = registry.get(TabId::new(*tab));
                    prop_assert_eq!(entry.map(|e| e.mux_id.as_str().to_owned()), Some(mux.clone()));
                }
            }
        }
    }
}
