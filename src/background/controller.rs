//! Background process entry point.
//!
//! [`BackgroundController`] accepts host ports for each connection role,
//! wires them into the registries, answers handshakes, dispatches inbound
//! messages and exposes the commands the trusted UI issues.
//!
//! # Handshakes
//!
//! | Role | Identity | On open |
//! |------|----------|---------|
//! | Top | First raw `{hostname}` or `identify` message | Slice sent after identify |
//! | Field | Sender origin/URL | Slice sent immediately |
//! | Leech | Tab's field hostname | Overlay state sent immediately |
//! | Trusted UI | None | Full state on `state-init` stream |
//!
//! Every registered connection is released when its port closes. Release is
//! tied to the stream that registered it, so a late close of a replaced port
//! leaves the replacement in place.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::hostname::hostname_of;
use crate::identifiers::{MuxId, TabId};
use crate::options::RelayOptions;
use crate::protocol::{ApiType, Message, ValtState, VaultItem};
use crate::transport::{LogicalStream, Multiplexer, Port, StreamInbox, UnroutedInbox};

use super::broadcast::{ActivationClock, BroadcastEngine, BroadcastHandle, BroadcastReport};
use super::host::{
    HostTabs, InMemoryVaultStorage, LedgerService, OfflineLedger, PlainCodec, VaultCodec,
    VaultStorage,
};
use super::registry::{ConnectionEntry, ConnectionRole, Registries};
use super::state::StateAggregator;

/// Stream name of the trusted UI snapshot.
pub const STATE_INIT_STREAM: &str = "state-init";

// ============================================================================
// BackgroundServices
// ============================================================================

/// External collaborators of the background process.
#[derive(Clone)]
pub struct BackgroundServices {
    /// Host tab API.
    pub tabs: Arc<dyn HostTabs>,
    /// Encrypted blob storage.
    pub storage: Arc<dyn VaultStorage>,
    /// Blob sealing.
    pub codec: Arc<dyn VaultCodec>,
    /// Wallet backend.
    pub ledger: Arc<dyn LedgerService>,
}

impl fmt::Debug for BackgroundServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundServices").finish_non_exhaustive()
    }
}

impl BackgroundServices {
    /// Creates services with in-memory storage, no encryption and no ledger.
    #[must_use]
    pub fn new(tabs: Arc<dyn HostTabs>) -> Self {
        Self {
            tabs,
            storage: Arc::new(InMemoryVaultStorage::new()),
            codec: Arc::new(PlainCodec),
            ledger: Arc::new(OfflineLedger),
        }
    }

    /// Replaces the blob storage.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn VaultStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Replaces the codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn VaultCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replaces the ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerService>) -> Self {
        self.ledger = ledger;
        self
    }
}

// ============================================================================
// ActiveTabInfo
// ============================================================================

/// The active tab and its login hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTabInfo {
    /// Focused tab.
    pub tab_id: TabId,
    /// Hostname of its field connection, if any.
    pub hostname: Option<String>,
}

// ============================================================================
// BackgroundController
// ============================================================================

/// Connection registries, state and broadcast of one background process.
pub struct BackgroundController {
    options: RelayOptions,
    registries: Arc<Registries>,
    aggregator: Arc<StateAggregator>,
    engine: Arc<BroadcastEngine>,
    broadcast: BroadcastHandle,
    clock: Arc<ActivationClock>,
}

impl fmt::Debug for BackgroundController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundController")
            .field("registries", &self.registries)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

impl BackgroundController {
    /// Creates the controller and spawns its broadcast loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` fail validation.
    pub fn new(options: RelayOptions, services: BackgroundServices) -> Result<Self> {
        options.validate()?;

        let registries = Arc::new(Registries::new());
        let aggregator = Arc::new(StateAggregator::new(
            services.storage,
            services.codec,
            services.ledger,
        ));
        let clock = Arc::new(ActivationClock::new());
        let engine = Arc::new(BroadcastEngine::new(
            Arc::clone(&registries),
            Arc::clone(&aggregator),
            services.tabs,
            Arc::clone(&clock),
            options.active_tab_timeout,
        ));
        let broadcast = BroadcastHandle::spawn(
            Arc::clone(&engine),
            aggregator.subscribe(),
            options.broadcast_debounce,
        );

        info!(
            broadcast_debounce_ms =
                u64::try_from(options.broadcast_debounce.as_millis()).unwrap_or(u64::MAX),
            "Background controller started"
        );

        Ok(Self {
            options,
            registries,
            aggregator,
            engine,
            broadcast,
            clock,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Returns the connection registries.
    #[inline]
    #[must_use]
    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Returns the state aggregator.
    #[inline]
    #[must_use]
    pub fn aggregator(&self) -> &Arc<StateAggregator> {
        &self.aggregator
    }

    // ========================================================================
    // Connection setup
    // ========================================================================

    /// Accepts a top-frame connection.
    ///
    /// The entry stays unidentified until the page sends its hostname.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] if the sender has no tab.
    pub fn setup_top_connection(&self, port: Port) -> Result<MuxId> {
        let tab_id = port
            .sender_info
            .tab_id
            .ok_or_else(|| Error::connection_refused("top connection without tab"))?;

        let (mux, _, unrouted) = Multiplexer::new(port);
        let mux_id = MuxId::generate(ConnectionRole::Top.prefix());
        let (stream, inbox) = mux.create_stream(mux_id.clone());

        if let Some(displaced) = self.registries.top.add(tab_id, stream.clone()) {
            retire(ConnectionRole::Top, tab_id, &displaced);
        }
        self.release_on_close(&mux, ConnectionRole::Top, tab_id, &mux_id);
        self.spawn_inbound(ConnectionRole::Top, tab_id, stream, inbox, unrouted);

        info!(tab_id = %tab_id, mux_id = %mux_id, "Top connection opened");
        Ok(mux_id)
    }

    /// Accepts a field-injection connection and sends its first slice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] if the sender has no tab or no
    /// parseable hostname.
    pub fn setup_field_connection(&self, port: Port) -> Result<MuxId> {
        let info = &port.sender_info;
        let tab_id = info
            .tab_id
            .ok_or_else(|| Error::connection_refused("field connection without tab"))?;
        let origin = info
            .origin_or_url()
            .ok_or_else(|| Error::connection_refused("field connection without origin"))?;
        let hostname = hostname_of(origin).map_err(|e| {
            Error::connection_refused(format!("field connection from {origin}: {e}"))
        })?;

        let (mux, _, unrouted) = Multiplexer::new(port);
        let mux_id = MuxId::generate(ConnectionRole::Field.prefix());
        let (stream, inbox) = mux.create_stream(mux_id.clone());

        if let Some(displaced) =
            self.registries
                .field
                .add_identified(tab_id, stream.clone(), hostname.as_str())
        {
            retire(ConnectionRole::Field, tab_id, &displaced);
        }
        self.release_on_close(&mux, ConnectionRole::Field, tab_id, &mux_id);

        send(
            &stream,
            &Message::state_sync(self.aggregator.slice_for(&hostname)),
        );
        self.spawn_inbound(ConnectionRole::Field, tab_id, stream, inbox, unrouted);

        info!(tab_id = %tab_id, mux_id = %mux_id, hostname = %hostname, "Field connection opened");
        Ok(mux_id)
    }

    /// Accepts an overlay connection and sends its state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] if the sender has no tab or the
    /// tab has no field connection.
    pub fn setup_leech_connection(&self, port: Port) -> Result<MuxId> {
        let tab_id = port
            .sender_info
            .tab_id
            .ok_or_else(|| Error::connection_refused("leech connection without tab"))?;
        let hostname = self.registries.field.hostname(tab_id).ok_or_else(|| {
            Error::connection_refused(format!("tab {tab_id} has no login hostname"))
        })?;

        let (mux, _, unrouted) = Multiplexer::new(port);
        let mux_id = MuxId::generate(ConnectionRole::Leech.prefix());
        let (stream, inbox) = mux.create_stream(mux_id.clone());

        if let Some(displaced) =
            self.registries
                .leech
                .add_identified(tab_id, stream.clone(), hostname.as_str())
        {
            retire(ConnectionRole::Leech, tab_id, &displaced);
        }
        self.release_on_close(&mux, ConnectionRole::Leech, tab_id, &mux_id);

        send(
            &stream,
            &Message::LeechState {
                resp_data: self.aggregator.leech_state(tab_id, &hostname),
            },
        );
        self.spawn_inbound(ConnectionRole::Leech, tab_id, stream, inbox, unrouted);

        info!(tab_id = %tab_id, mux_id = %mux_id, "Leech connection opened");
        Ok(mux_id)
    }

    /// Sends the full state to a trusted UI port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the port is already gone.
    pub fn setup_trusted_connection(&self, port: Port) -> Result<Multiplexer> {
        let (mux, _, _) = Multiplexer::new(port);
        let (stream, _) = mux.create_stream(MuxId::from_name(STATE_INIT_STREAM));

        stream.write(&Message::StateInit {
            resp_data: Box::new(self.aggregator.snapshot()),
        })?;

        debug!("Trusted UI connection initialized");
        Ok(mux)
    }

    fn release_on_close(&self, mux: &Multiplexer, role: ConnectionRole, tab_id: TabId, mux_id: &MuxId) {
        let registries = Arc::clone(&self.registries);
        let aggregator = Arc::clone(&self.aggregator);
        let mux_id = mux_id.clone();

        mux.on_close(Box::new(move || {
            if !registries.for_role(role).release(tab_id, &mux_id) {
                trace!(role = %role, tab_id = %tab_id, mux_id = %mux_id, "Closed connection already replaced");
                return;
            }
            if role == ConnectionRole::Field {
                aggregator.remove_valt_state(tab_id);
            }
            debug!(role = %role, tab_id = %tab_id, mux_id = %mux_id, "Connection closed");
        }));
    }

    fn spawn_inbound(
        &self,
        role: ConnectionRole,
        tab_id: TabId,
        stream: LogicalStream,
        inbox: StreamInbox,
        unrouted: UnroutedInbox,
    ) {
        let inbound = Inbound {
            role,
            tab_id,
            stream,
            registries: Arc::clone(&self.registries),
            aggregator: Arc::clone(&self.aggregator),
        };
        tokio::spawn(inbound.run(inbox, unrouted));
    }

    // ========================================================================
    // Lock / unlock
    // ========================================================================

    /// Unlocks the vault; every identified peer receives its slice once.
    ///
    /// # Errors
    ///
    /// See [`StateAggregator::unlock`].
    pub async fn unlock(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.aggregator.unlock(key).await
    }

    /// Locks the vault; every peer receives the locked slice immediately.
    pub fn lock(&self) {
        self.aggregator.lock();
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Requests a debounced broadcast.
    pub fn schedule_broadcast(&self) {
        self.broadcast.schedule();
    }

    /// Broadcasts immediately, bypassing the debounce.
    pub fn broadcast_now(&self) -> BroadcastReport {
        self.engine.broadcast_all()
    }

    /// Records a host tab activation, invalidating in-flight active-tab
    /// queries.
    pub fn note_tab_activated(&self, tab_id: TabId) {
        let generation = self.clock.bump();
        trace!(tab_id = %tab_id, generation, "Tab activated");
    }

    // ========================================================================
    // UI commands
    // ========================================================================

    /// Sends `item` to the field connection of `tab_id` for filling.
    ///
    /// # Errors
    ///
    /// - [`Error::NoConnection`] if the tab has no field connection
    /// - [`Error::StreamClosed`] if the connection went away
    pub fn fill_fields(&self, tab_id: TabId, item: VaultItem) -> Result<()> {
        let stream = self
            .registries
            .field
            .stream(tab_id)
            .ok_or_else(|| Error::no_connection(tab_id))?;
        stream.write(&Message::FillFields { resp_data: item })
    }

    /// Pushes fresh slices to every top and field peer under `hostname`.
    pub fn notify_hostname(&self, hostname: &str) -> BroadcastReport {
        self.engine.notify_site(hostname)
    }

    /// Forwards a value snapshot to the top and leech peers of `tab_id`.
    ///
    /// Returns the number of peers reached.
    pub fn notify_valt_changed(&self, tab_id: TabId, valt: ValtState) -> usize {
        let message = Message::ValtChangedNotify { resp_data: valt };

        [&self.registries.top, &self.registries.leech]
            .into_iter()
            .filter_map(|registry| registry.stream(tab_id))
            .filter(|stream| send(stream, &message))
            .count()
    }

    /// Returns the active tab and its login hostname.
    ///
    /// Returns `None` if the query fails, times out or went stale.
    pub async fn current_active_tab_info(&self) -> Option<ActiveTabInfo> {
        let tab_id = self.engine.active_tab().await?;
        Some(ActiveTabInfo {
            tab_id,
            hostname: self.registries.field.hostname(tab_id),
        })
    }

    /// Stops the broadcast loop.
    pub fn shutdown(&self) {
        self.broadcast.shutdown();
    }
}

impl Drop for BackgroundController {
    fn drop(&mut self) {
        self.broadcast.shutdown();
    }
}

/// Closes the connection a newer one for the same tab replaced.
///
/// Its close hook finds the registry entry already taken and leaves it alone.
fn retire(role: ConnectionRole, tab_id: TabId, displaced: &ConnectionEntry) {
    debug!(role = %role, tab_id = %tab_id, mux_id = %displaced.mux_id, "Closing replaced connection");
    displaced.stream.shutdown();
}

/// Writes one message, logging a failure. Returns `true` on success.
fn send(stream: &LogicalStream, message: &Message) -> bool {
    match stream.write(message) {
        Ok(()) => true,
        Err(e) => {
            debug!(mux_id = %stream.mux_id(), api_type = %message.api_type(), error = %e, "Write dropped");
            false
        }
    }
}

// ============================================================================
// Inbound dispatch
// ============================================================================

/// Per-connection inbound handler.
struct Inbound {
    role: ConnectionRole,
    tab_id: TabId,
    stream: LogicalStream,
    registries: Arc<Registries>,
    aggregator: Arc<StateAggregator>,
}

impl Inbound {
    async fn run(self, mut inbox: StreamInbox, mut unrouted: UnroutedInbox) {
        loop {
            let value = tokio::select! {
                value = inbox.recv() => match value {
                    Some(value) => value,
                    None => break,
                },
                frame = unrouted.recv() => match frame {
                    Some(frame) => frame.data,
                    None => break,
                },
            };
            self.dispatch(value);
        }

        trace!(role = %self.role, tab_id = %self.tab_id, "Inbound loop terminated");
    }

    fn dispatch(&self, value: Value) {
        // Top frames announce themselves with a bare `{hostname}` object.
        if self.role == ConnectionRole::Top
            && value.get("apiType").is_none()
            && let Some(hostname) = value.get("hostname").and_then(Value::as_str)
        {
            self.identify(hostname);
            return;
        }

        let message = match Message::decode(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(role = %self.role, tab_id = %self.tab_id, error = %e, "Dropping undecodable message");
                return;
            }
        };

        match (self.role, message) {
            (ConnectionRole::Top, Message::Identify { data }) => self.identify(&data.hostname),

            (ConnectionRole::Field, Message::FieldsValtChanged { data }) => {
                if !self.is_current() {
                    trace!(tab_id = %self.tab_id, "Value snapshot from replaced connection ignored");
                    return;
                }
                trace!(tab_id = %self.tab_id, valt = ?data, "Value snapshot received");
                self.aggregator.set_valt_state(self.tab_id, data);
            }

            (role, message) => {
                warn!(
                    role = %role,
                    tab_id = %self.tab_id,
                    api_type = %message.api_type(),
                    "Unexpected message for connection role"
                );
            }
        }
    }

    /// Whether this connection still owns its tab's registry entry.
    fn is_current(&self) -> bool {
        self.registries
            .for_role(self.role)
            .get(self.tab_id)
            .is_some_and(|entry| entry.mux_id == *self.stream.mux_id())
    }

    fn identify(&self, hostname: &str) {
        let hostname = hostname.trim().to_ascii_lowercase();
        if hostname.is_empty() {
            warn!(tab_id = %self.tab_id, "Ignoring empty hostname");
            return;
        }

        if !self.is_current() {
            trace!(tab_id = %self.tab_id, "Identify on replaced connection ignored");
            return;
        }

        self.registries.top.set_hostname(self.tab_id, hostname.as_str());
        debug!(tab_id = %self.tab_id, hostname = %hostname, api_type = %ApiType::Identify, "Top connection identified");
        send(
            &self.stream,
            &Message::state_sync(self.aggregator.slice_for(&hostname)),
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
