//! Stream multiplexer over one transport port.
//!
//! # Framing
//!
//! Named frames carry one logical stream's traffic:
//!
//! ```json
//! { "name": "BPinjet-3f0c...", "data": { "apiType": "state-sync", ... } }
//! ```
//!
//! Frames without a `name` are raw port messages. Raw frames and frames for
//! a stream this side never created are surfaced through the
//! [`UnroutedInbox`] instead of being dropped, since a connecting document
//! does not know the stream name the background picked.
//!
//! # Close semantics
//!
//! When the port disconnects, the read loop closes the multiplexer exactly
//! once: every stream inbox yields `None`, every [`LogicalStream`] reports
//! closed, and close hooks run synchronously in registration order.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::MuxId;
use crate::protocol::Message;

use super::port::{Port, PortReceiver, PortSender, SenderInfo};

// ============================================================================
// Types
// ============================================================================

/// Callback run once when the port closes.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Inbound messages of one logical stream. Yields `None` after close.
pub type StreamInbox = mpsc::UnboundedReceiver<Value>;

/// Raw or unrouted inbound traffic.
pub type UnroutedInbox = mpsc::UnboundedReceiver<Unrouted>;

/// A frame no local stream claimed.
#[derive(Debug, Clone, PartialEq)]
pub struct Unrouted {
    /// Stream name, or `None` for a raw port message.
    pub stream: Option<String>,
    /// Frame payload.
    pub data: Value,
}

// ============================================================================
// MuxInner
// ============================================================================

struct MuxInner {
    /// Outbound half of the port.
    outbound: PortSender,
    /// Inbox senders of the streams created on this side.
    streams: Mutex<FxHashMap<String, mpsc::UnboundedSender<Value>>>,
    /// Destination for raw and unclaimed frames.
    unrouted: Mutex<Option<mpsc::UnboundedSender<Unrouted>>>,
    /// Hooks to run on close.
    close_hooks: Mutex<Vec<CloseHook>>,
    /// Closed flag, observable by streams.
    closed: watch::Sender<bool>,
}

impl MuxInner {
    /// Routes one inbound frame.
    fn route(&self, frame: Value) {
        let named = frame
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let Some(name) = named else {
            self.forward_unrouted(None, frame);
            return;
        };

        let data = match frame {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };

        let inbox = self.streams.lock().get(&name).cloned();
        match inbox {
            Some(tx) => {
                if tx.send(data).is_err() {
                    trace!(stream = %name, "Stream inbox dropped, frame discarded");
                }
            }
            None => self.forward_unrouted(Some(name), data),
        }
    }

    fn forward_unrouted(&self, stream: Option<String>, data: Value) {
        let guard = self.unrouted.lock();
        if let Some(ref tx) = *guard
            && tx.send(Unrouted { stream, data }).is_ok()
        {
            return;
        }
        trace!("No unrouted listener, frame discarded");
    }

    /// Closes the multiplexer. Only the first call has any effect.
    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let streams: Vec<_> = self.streams.lock().drain().collect();
        let count = streams.len();
        drop(streams);

        self.unrouted.lock().take();

        let hooks: Vec<CloseHook> = self.close_hooks.lock().drain(..).collect();
        for hook in hooks {
            hook();
        }

        debug!(streams = count, "Multiplexer closed");
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Many named logical streams over one [`Port`].
///
/// Cloning yields another handle to the same multiplexer.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("streams", &self.inner.streams.lock().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    /// Wraps a port and spawns its read loop.
    ///
    /// Returns the multiplexer, the sender metadata of the port and the inbox
    /// for raw/unrouted frames.
    #[must_use]
    pub fn new(port: Port) -> (Self, SenderInfo, UnroutedInbox) {
        let (sender_info, outbound, inbound) = port.split();
        let (unrouted_tx, unrouted_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let inner = Arc::new(MuxInner {
            outbound,
            streams: Mutex::new(FxHashMap::default()),
            unrouted: Mutex::new(Some(unrouted_tx)),
            close_hooks: Mutex::new(Vec::new()),
            closed,
        });

        tokio::spawn(Self::run_read_loop(Arc::clone(&inner), inbound));

        (Self { inner }, sender_info, unrouted_rx)
    }

    /// Creates a logical stream with the given name.
    ///
    /// Creating a stream on a closed multiplexer yields a stream that is
    /// already closed and an inbox that is already finished.
    pub fn create_stream(&self, mux_id: MuxId) -> (LogicalStream, StreamInbox) {
        let (tx, rx) = mpsc::unbounded_channel();

        if !self.is_closed() {
            self.inner.streams.lock().insert(mux_id.as_str().to_owned(), tx);
        }

        let stream = LogicalStream {
            mux_id,
            inner: Arc::clone(&self.inner),
            closed: self.inner.closed.subscribe(),
        };
        (stream, rx)
    }

    /// Registers a hook to run once when the port closes.
    ///
    /// Runs immediately if the port is already closed.
    pub fn on_close(&self, hook: CloseHook) {
        {
            let mut hooks = self.inner.close_hooks.lock();
            if !*self.inner.closed.borrow() {
                hooks.push(hook);
                return;
            }
        }
        hook();
    }

    /// Posts a raw (unnamed) message on the port.
    ///
    /// # Errors
    ///
    /// - [`Error::PortDisconnected`] if the port is closed
    /// - [`Error::Json`] if the message does not serialize
    pub fn post_raw(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::PortDisconnected);
        }
        self.inner.outbound.post(message.encode()?)
    }

    /// Closes every stream from this side, as if the port had disconnected.
    pub fn shutdown(&self) {
        self.inner.close();
    }

    /// Returns `true` once the port has disconnected.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Returns the number of open streams.
    #[inline]
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.inner.streams.lock().len()
    }

    /// Read loop: routes frames until the port ends, then closes.
    async fn run_read_loop(inner: Arc<MuxInner>, mut inbound: PortReceiver) {
        let mut closed = inner.closed.subscribe();

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(frame) => inner.route(frame),
                        None => {
                            debug!("Port disconnected");
                            break;
                        }
                    }
                }

                _ = closed.wait_for(|closed| *closed) => {
                    break;
                }
            }
        }

        inner.close();
    }
}

// ============================================================================
// LogicalStream
// ============================================================================

/// Writer handle for one named stream.
///
/// Writes after close fail with [`Error::StreamClosed`]; callers log and drop
/// them since delivery is never guaranteed.
pub struct LogicalStream {
    mux_id: MuxId,
    inner: Arc<MuxInner>,
    closed: watch::Receiver<bool>,
}

impl Clone for LogicalStream {
    fn clone(&self) -> Self {
        Self {
            mux_id: self.mux_id.clone(),
            inner: Arc::clone(&self.inner),
            closed: self.closed.clone(),
        }
    }
}

impl fmt::Debug for LogicalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalStream")
            .field("mux_id", &self.mux_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LogicalStream {
    /// Returns the stream name.
    #[inline]
    #[must_use]
    pub fn mux_id(&self) -> &MuxId {
        &self.mux_id
    }

    /// Writes a message.
    ///
    /// # Errors
    ///
    /// - [`Error::StreamClosed`] if the port has closed
    /// - [`Error::Json`] if the message does not serialize
    pub fn write(&self, message: &Message) -> Result<()> {
        self.write_value(message.encode()?)
    }

    /// Writes a pre-encoded value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the port has closed.
    pub fn write_value(&self, data: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::stream_closed(self.mux_id.clone()));
        }

        let frame = json!({ "name": self.mux_id.as_str(), "data": data });
        self.inner.outbound.post(frame).map_err(|_| {
            warn!(mux_id = %self.mux_id, "Write after peer disconnect");
            Error::stream_closed(self.mux_id.clone())
        })
    }

    /// Returns `true` once the underlying port has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Closes the multiplexer this stream belongs to, with every sibling
    /// stream.
    pub fn shutdown(&self) {
        self.inner.close();
    }

    /// Resolves once the underlying port has closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

// ============================================================================
// Frame helpers
// ============================================================================

/// Splits a named frame into its stream name and payload.
#[must_use]
pub fn unwrap_frame(frame: &Value) -> Option<(&str, &Value)> {
    let name = frame.get("name")?.as_str()?;
    let data = frame.get("data")?;
    Some((name, data))
}

// ============================================================================
// Tests
// ============================================================================
