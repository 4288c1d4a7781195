//! State broadcast to live connections.
//!
//! # Triggers
//!
//! | Event | Delivery |
//! |-------|----------|
//! | Item, network, account or wallet change | Debounced full broadcast |
//! | Connection event ([`BroadcastHandle::schedule`]) | Debounced full broadcast |
//! | Lock | Immediate locked slice to every top/field peer |
//! | Unlock | Immediate real slice to every identified top/field peer, once |
//!
//! Lock and unlock also push the overlay state to the active tab's leech
//! connection.
//!
//! # Delivery
//!
//! Each peer is written independently. A failed write is logged and counted
//! in the [`BroadcastReport`]; it never stops the cycle.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::debounce::Debounce;
use crate::error::Error;
use crate::identifiers::TabId;
use crate::protocol::{Message, StateSlice};

use super::host::HostTabs;
use super::registry::{ConnectionEntry, ConnectionRole, Registries};
use super::state::{StateAggregator, StateChange};

// ============================================================================
// ActivationClock
// ============================================================================

/// Generation counter bumped whenever the host reports a tab activation.
///
/// An active-tab query captures the generation before it starts and
/// discards its result if the generation moved meanwhile.
#[derive(Debug, Default)]
pub struct ActivationClock {
    generation: AtomicU64,
}

impl ActivationClock {
    /// Creates a clock at generation zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tab activation. Returns the new generation.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the current generation.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

// ============================================================================
// BroadcastReport
// ============================================================================

/// Outcome of one broadcast cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Writes accepted by the transport.
    pub delivered: usize,
    /// Entries skipped for lack of a hostname.
    pub skipped: usize,
    /// Writes that failed (peer gone).
    pub failed: usize,
}

impl BroadcastReport {
    /// Folds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

// ============================================================================
// BroadcastEngine
// ============================================================================

/// Computes per-peer state and writes it to live streams.
pub struct BroadcastEngine {
    registries: Arc<Registries>,
    aggregator: Arc<StateAggregator>,
    tabs: Arc<dyn HostTabs>,
    clock: Arc<ActivationClock>,
    active_tab_timeout: Duration,
}

impl fmt::Debug for BroadcastEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastEngine")
            .field("connections", &self.registries.connection_count())
            .field("active_tab_timeout", &self.active_tab_timeout)
            .finish_non_exhaustive()
    }
}

impl BroadcastEngine {
    /// Creates an engine over shared registries and state.
    #[must_use]
    pub fn new(
        registries: Arc<Registries>,
        aggregator: Arc<StateAggregator>,
        tabs: Arc<dyn HostTabs>,
        clock: Arc<ActivationClock>,
        active_tab_timeout: Duration,
    ) -> Self {
        Self {
            registries,
            aggregator,
            tabs,
            clock,
            active_tab_timeout,
        }
    }

    /// Writes fresh state to every identified peer of every role.
    ///
    /// Top and field peers get their hostname slice; leech peers get their
    /// tab's overlay state.
    pub fn broadcast_all(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for role in [ConnectionRole::Field, ConnectionRole::Top] {
            report.merge(self.broadcast_slices(role));
        }

        for (tab_id, entry) in self.registries.leech.snapshot() {
            let Some(hostname) = entry.hostname.as_deref() else {
                report.skipped += 1;
                continue;
            };
            let message = Message::LeechState {
                resp_data: self.aggregator.leech_state(tab_id, hostname),
            };
            deliver(ConnectionRole::Leech, tab_id, &entry, &message, &mut report);
        }

        debug!(
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast cycle complete"
        );
        report
    }

    /// Writes the locked slice to every top and field peer, identified or
    /// not.
    pub fn broadcast_locked(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let message = Message::state_sync(StateSlice::locked());

        for role in [ConnectionRole::Field, ConnectionRole::Top] {
            for (tab_id, entry) in self.registries.for_role(role).snapshot() {
                deliver(role, tab_id, &entry, &message, &mut report);
            }
        }

        debug!(delivered = report.delivered, failed = report.failed, "Locked slice broadcast");
        report
    }

    /// Writes the real slice to every identified top and field peer.
    pub fn broadcast_unlocked(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for role in [ConnectionRole::Field, ConnectionRole::Top] {
            report.merge(self.broadcast_slices(role));
        }

        debug!(delivered = report.delivered, failed = report.failed, "Unlocked slice broadcast");
        report
    }

    fn broadcast_slices(&self, role: ConnectionRole) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (tab_id, entry) in self.registries.for_role(role).snapshot() {
            let Some(hostname) = entry.hostname.as_deref() else {
                trace!(role = %role, tab_id = %tab_id, "Skipping unidentified connection");
                report.skipped += 1;
                continue;
            };
            let message = Message::state_sync(self.aggregator.slice_for(hostname));
            deliver(role, tab_id, &entry, &message, &mut report);
        }
        report
    }

    /// Pushes fresh slices to top and field peers whose hostname falls under
    /// `site`.
    pub fn notify_site(&self, site: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for role in [ConnectionRole::Top, ConnectionRole::Field] {
            for (tab_id, entry) in self.registries.for_role(role).within_site(site) {
                let Some(hostname) = entry.hostname.as_deref() else {
                    continue;
                };
                let message = Message::state_sync(self.aggregator.slice_for(hostname));
                deliver(role, tab_id, &entry, &message, &mut report);
            }
        }
        report
    }

    /// Queries the active tab.
    ///
    /// Returns `None` if the query fails, times out, or a tab activation was
    /// recorded while it was in flight.
    pub async fn active_tab(&self) -> Option<TabId> {
        let generation = self.clock.current();

        let tab_id = match timeout(self.active_tab_timeout, self.tabs.active_tab()).await {
            Ok(Ok(tab_id)) => tab_id?,
            Ok(Err(e)) => {
                debug!(error = %e, "Active tab query failed");
                return None;
            }
            Err(_) => {
                let e = Error::timeout(
                    "active tab query",
                    u64::try_from(self.active_tab_timeout.as_millis()).unwrap_or(u64::MAX),
                );
                debug!(error = %e, "Active tab query abandoned");
                return None;
            }
        };

        if self.clock.current() != generation {
            debug!(tab_id = %tab_id, "Active tab changed during query, result discarded");
            return None;
        }
        Some(tab_id)
    }

    fn spawn_leech_push(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let report = engine.push_active_leech().await;
            trace!(?report, "Active leech pushed");
        });
    }

    /// Pushes the overlay state to the active tab's leech connection.
    pub async fn push_active_leech(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(tab_id) = self.active_tab().await else {
            return report;
        };

        // Registries may have changed while the query was in flight.
        let Some(hostname) = self.registries.field.hostname(tab_id) else {
            return report;
        };
        let Some(entry) = self.registries.leech.get(tab_id) else {
            return report;
        };

        let message = Message::LeechState {
            resp_data: self.aggregator.leech_state(tab_id, &hostname),
        };
        deliver(ConnectionRole::Leech, tab_id, &entry, &message, &mut report);
        report
    }

    /// The leech push runs on its own task so a slow active-tab query does
    /// not hold up the loop.
    fn on_change(self: &Arc<Self>, change: StateChange, debounce: &mut Debounce) {
        match change {
            StateChange::Locked => {
                debounce.cancel();
                self.broadcast_locked();
                self.spawn_leech_push();
            }
            StateChange::Unlocked => {
                debounce.cancel();
                self.broadcast_unlocked();
                self.spawn_leech_push();
            }
            other => {
                trace!(change = ?other, "Scheduling broadcast");
                debounce.trigger(());
            }
        }
    }
}

/// Writes one message to one peer, recording the outcome.
fn deliver(
    role: ConnectionRole,
    tab_id: TabId,
    entry: &ConnectionEntry,
    message: &Message,
    report: &mut BroadcastReport,
) {
    match entry.stream.write(message) {
        Ok(()) => report.delivered += 1,
        Err(e) => {
            report.failed += 1;
            if e.is_transport_fault() {
                debug!(role = %role, tab_id = %tab_id, mux_id = %entry.mux_id, "Peer gone, write dropped");
            } else {
                warn!(role = %role, tab_id = %tab_id, error = %e, "Broadcast write failed");
            }
        }
    }
}

// ============================================================================
// Event loop
// ============================================================================

enum BroadcastCommand {
    Schedule,
    Shutdown,
}

/// Handle to a running broadcast loop.
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    tx: mpsc::UnboundedSender<BroadcastCommand>,
}

impl BroadcastHandle {
    /// Spawns the loop.
    ///
    /// The loop reacts to `changes` and to [`schedule`](Self::schedule)
    /// calls, coalescing bursts within `window`.
    #[must_use]
    pub fn spawn(
        engine: Arc<BroadcastEngine>,
        changes: broadcast::Receiver<StateChange>,
        window: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_event_loop(engine, changes, rx, Debounce::new(window)));
        Self { tx }
    }

    /// Requests a debounced full broadcast.
    pub fn schedule(&self) {
        if self.tx.send(BroadcastCommand::Schedule).is_err() {
            trace!("Broadcast loop stopped, schedule dropped");
        }
    }

    /// Stops the loop. Pending broadcasts are dropped.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BroadcastCommand::Shutdown);
    }

    /// Returns `true` once the loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn run_event_loop(
    engine: Arc<BroadcastEngine>,
    mut changes: broadcast::Receiver<StateChange>,
    mut commands: mpsc::UnboundedReceiver<BroadcastCommand>,
    mut debounce: Debounce,
) {
    debug!(
        window_ms = u64::try_from(debounce.window().as_millis()).unwrap_or(u64::MAX),
        "Broadcast loop started"
    );

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(BroadcastCommand::Schedule) => debounce.trigger(()),
                    Some(BroadcastCommand::Shutdown) | None => break,
                }
            }

            change = changes.recv() => {
                match change {
                    Ok(change) => engine.on_change(change, &mut debounce),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "State change subscriber lagged, scheduling full broadcast");
                        debounce.trigger(());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            () = debounce.elapsed() => {
                engine.broadcast_all();
            }
        }
    }

    debug!("Broadcast loop stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::background::host::{InMemoryVaultStorage, OfflineLedger, PlainCodec, VaultStorage};
    use crate::error::Result;
    use crate::identifiers::MuxId;
    use crate::protocol::VaultItem;
    use crate::transport::{Multiplexer, Port, SenderInfo, StreamInbox, mux::unwrap_frame};

    struct StaticTabs(Option<TabId>);

    #[async_trait]
    impl HostTabs for StaticTabs {
        async fn active_tab(&self) -> Result<Option<TabId>> {
            Ok(self.0)
        }
    }

    /// Reports `tab` but records an activation while doing so.
    struct SwitchingTabs {
        tab: TabId,
        clock: Arc<ActivationClock>,
    }

    #[async_trait]
    impl HostTabs for SwitchingTabs {
        async fn active_tab(&self) -> Result<Option<TabId>> {
            self.clock.bump();
            Ok(Some(self.tab))
        }
    }

    struct FailingTabs;

    #[async_trait]
    impl HostTabs for FailingTabs {
        async fn active_tab(&self) -> Result<Option<TabId>> {
            Err(Error::host("tabs.query rejected"))
        }
    }

    struct HangingTabs;

    #[async_trait]
    impl HostTabs for HangingTabs {
        async fn active_tab(&self) -> Result<Option<TabId>> {
            std::future::pending().await
        }
    }

    struct Peer {
        mux: Multiplexer,
        _inbox: StreamInbox,
        remote: Port,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.remote.inbound.try_recv() {
                let (_, data) = unwrap_frame(&frame).expect("named frame");
                frames.push(data.clone());
            }
            frames
        }
    }

    fn connect(
        registries: &Registries,
        role: ConnectionRole,
        tab: u32,
        hostname: Option<&str>,
    ) -> Peer {
        let (listener, remote) = Port::pair(SenderInfo::default());
        let (mux, _, _) = Multiplexer::new(listener);
        let (stream, inbox) = mux.create_stream(MuxId::generate(role.prefix()));
        let registry = registries.for_role(role);
        match hostname {
            Some(hostname) => registry.add_identified(TabId::new(tab), stream, hostname),
            None => registry.add(TabId::new(tab), stream),
        };
        Peer {
            mux,
            _inbox: inbox,
            remote,
        }
    }

    async fn unlocked_aggregator(items: &[VaultItem]) -> Arc<StateAggregator> {
        let storage = Arc::new(InMemoryVaultStorage::new());
        storage
            .put_encrypted_blob("website:1", serde_json::to_vec(items).expect("json"))
            .await
            .expect("put");
        let aggregator = Arc::new(StateAggregator::new(
            storage,
            Arc::new(PlainCodec),
            Arc::new(OfflineLedger),
        ));
        aggregator.unlock(b"key".to_vec()).await.expect("unlock");
        aggregator
    }

    fn engine(
        registries: &Arc<Registries>,
        aggregator: &Arc<StateAggregator>,
        tabs: Arc<dyn HostTabs>,
        clock: Arc<ActivationClock>,
    ) -> Arc<BroadcastEngine> {
        Arc::new(BroadcastEngine::new(
            Arc::clone(registries),
            Arc::clone(aggregator),
            tabs,
            clock,
            Duration::from_secs(2),
        ))
    }

    #[tokio::test]
    async fn test_dead_peer_does_not_block_others() {
        let registries = Arc::new(Registries::new());
        let aggregator =
            unlocked_aggregator(&[VaultItem::new("example.com", "main", "a", "p")]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );

        let mut a = connect(&registries, ConnectionRole::Field, 1, Some("example.com"));
        let dead = connect(&registries, ConnectionRole::Field, 2, Some("example.com"));
        let mut c = connect(&registries, ConnectionRole::Top, 3, Some("example.com"));
        dead.mux.shutdown();

        let report = engine.broadcast_all();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(a.drain().len(), 1);
        let frames = c.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["respData"]["matchedNum"], 1);
    }

    #[tokio::test]
    async fn test_unidentified_peers_are_skipped() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );

        let mut pending = connect(&registries, ConnectionRole::Top, 1, None);
        let report = engine.broadcast_all();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 0);
        assert!(pending.drain().is_empty());
    }

    #[tokio::test]
    async fn test_locked_slice_reaches_unidentified_peers() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );

        let mut pending = connect(&registries, ConnectionRole::Top, 1, None);
        let report = engine.broadcast_locked();

        assert_eq!(report.delivered, 1);
        let frames = pending.drain();
        assert_eq!(frames[0]["respData"]["isUnlocked"], false);
        assert_eq!(frames[0]["respData"]["items"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_notify_site_reaches_subdomains_only() {
        let registries = Arc::new(Registries::new());
        let aggregator =
            unlocked_aggregator(&[VaultItem::new("example.com", "main", "a", "p")]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );

        let mut mail = connect(&registries, ConnectionRole::Field, 1, Some("mail.example.com"));
        let mut other = connect(&registries, ConnectionRole::Field, 2, Some("evil-example.com"));

        let report = engine.notify_site("example.com");

        assert_eq!(report.delivered, 1);
        assert_eq!(mail.drain()[0]["respData"]["items"][0]["hostname"], "example.com");
        assert!(other.drain().is_empty());
    }

    #[tokio::test]
    async fn test_push_active_leech() {
        let registries = Arc::new(Registries::new());
        let aggregator =
            unlocked_aggregator(&[VaultItem::new("example.com", "main", "a", "p")]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(Some(TabId::new(4)))),
            Arc::new(ActivationClock::new()),
        );

        let _field = connect(&registries, ConnectionRole::Field, 4, Some("example.com"));
        let mut leech = connect(&registries, ConnectionRole::Leech, 4, Some("example.com"));

        let report = engine.push_active_leech().await;

        assert_eq!(report.delivered, 1);
        let frames = leech.drain();
        assert_eq!(frames[0]["apiType"], "leech-state");
        assert_eq!(frames[0]["respData"]["hostname"], "example.com");
    }

    #[tokio::test]
    async fn test_stale_active_tab_is_discarded() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let clock = Arc::new(ActivationClock::new());
        let tabs = Arc::new(SwitchingTabs {
            tab: TabId::new(4),
            clock: Arc::clone(&clock),
        });
        let engine = engine(&registries, &aggregator, tabs, clock);

        let _field = connect(&registries, ConnectionRole::Field, 4, Some("example.com"));
        let mut leech = connect(&registries, ConnectionRole::Leech, 4, Some("example.com"));

        assert_eq!(engine.active_tab().await, None);
        assert_eq!(engine.push_active_leech().await.delivered, 0);
        assert!(leech.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_active_tab_query_times_out() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(HangingTabs),
            Arc::new(ActivationClock::new()),
        );

        assert_eq!(engine.active_tab().await, None);
    }

    #[tokio::test]
    async fn test_failed_active_tab_query_yields_none() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(FailingTabs),
            Arc::new(ActivationClock::new()),
        );

        assert_eq!(engine.active_tab().await, None);
        assert_eq!(engine.push_active_leech().await.delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_coalesces_bursts() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );
        let mut peer = connect(&registries, ConnectionRole::Field, 1, Some("example.com"));

        let handle = BroadcastHandle::spawn(
            engine,
            aggregator.subscribe(),
            Duration::from_millis(200),
        );
        for _ in 0..5 {
            handle.schedule();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(peer.drain().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(peer.drain().len(), 1);

        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_is_immediate_and_cancels_pending() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );
        let mut peer = connect(&registries, ConnectionRole::Field, 1, Some("example.com"));

        let handle = BroadcastHandle::spawn(
            engine,
            aggregator.subscribe(),
            Duration::from_millis(200),
        );
        handle.schedule();
        tokio::time::sleep(Duration::from_millis(10)).await;
        aggregator.lock();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let frames = peer.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["respData"]["isUnlocked"], false);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(peer.drain().is_empty());

        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_leech_push_does_not_stall_loop() {
        let registries = Arc::new(Registries::new());
        let aggregator = unlocked_aggregator(&[]).await;
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(HangingTabs),
            Arc::new(ActivationClock::new()),
        );
        let mut peer = connect(&registries, ConnectionRole::Field, 1, Some("example.com"));

        let handle = BroadcastHandle::spawn(
            engine,
            aggregator.subscribe(),
            Duration::from_millis(200),
        );
        aggregator.lock();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(peer.drain().len(), 1);

        // The active-tab query hangs for its full two-second timeout.
        handle.schedule();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let frames = peer.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["respData"]["isUnlocked"], false);

        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_sends_exactly_once() {
        let registries = Arc::new(Registries::new());
        let storage = Arc::new(InMemoryVaultStorage::new());
        let aggregator = Arc::new(StateAggregator::new(
            storage,
            Arc::new(PlainCodec),
            Arc::new(OfflineLedger),
        ));
        let engine = engine(
            &registries,
            &aggregator,
            Arc::new(StaticTabs(None)),
            Arc::new(ActivationClock::new()),
        );
        let mut peer = connect(&registries, ConnectionRole::Top, 1, Some("example.com"));

        let handle = BroadcastHandle::spawn(
            engine,
            aggregator.subscribe(),
            Duration::from_millis(200),
        );
        aggregator.unlock(b"key".to_vec()).await.expect("unlock");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let frames = peer.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["respData"]["isUnlocked"], true);

        handle.shutdown();
    }
}
