//! Top-frame overlay controller.
//!
//! The [`TopController`] owns at most one [`OverlayElement`] and reconciles
//! it from selector messages posted by field frames. Every change is
//! announced on its [`EventBus`] as an [`OverlayEvent`] for the renderer.
//!
//! | Message | Effect |
//! |---------|--------|
//! | `selector-draw` | Create, or update in place (pinned: timestamp only) |
//! | `selector-toggle` | Create if absent, erase if present |
//! | `selector-up-draw` | Create if absent, otherwise update height unless pinned |
//! | `selector-up-height` | Set height and pin flag |
//! | `selector-erase` | Remove unless pinned |
//! | `selector-erase-force` | Remove |
//! | position report | Move unless pinned |

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::debounce::Debounce;
use crate::events::{EventBus, Identity};
use crate::identifiers::FrameToken;
use crate::options::RelayOptions;
use crate::protocol::{
    CommandStamp, DomRect, FieldFound, FrameCommand, FrameMessage, HeightUpdate, Identify,
    Message, PositionMessage, SelectorBoxData, StateSlice, ValtState, ViewportCommand,
};

use super::{OutboundSender, Target, post};

/// Identity kind of top controllers.
pub const TOP_KIND: &str = "BPTopCtx_";

// ============================================================================
// Types
// ============================================================================

/// The overlay frame hosted by the top document.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayElement {
    /// Overlay document URL.
    pub src: String,
    /// Geometry of the field the overlay is attached to.
    pub rect: DomRect,
    /// Frame height.
    pub ifr_height: u32,
    /// Field lives in a nested frame.
    pub is_inner: bool,
    /// Document URL of the field.
    pub at_href: Option<String>,
    /// Save/ignore affordance engaged; geometry is frozen.
    pub pinned: bool,
    /// Last touch, milliseconds since the Unix epoch.
    pub updated_at: u64,
}

/// Overlay change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    /// The overlay was inserted.
    Created(OverlayElement),
    /// The overlay's attributes changed.
    Updated(OverlayElement),
    /// The overlay was removed.
    Removed,
}

/// The frame that reported the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFrame {
    /// Hostname of the login document.
    pub hostname: String,
    /// URL of the login document.
    pub href: String,
    /// Login document is a nested frame.
    pub is_inner: bool,
    /// Token of its field controller.
    pub sender_id: FrameToken,
}

/// Input to the top event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TopEvent {
    /// A `postMessage` value arrived.
    Window(Value),
    /// A message arrived on the background connection.
    Background(Value),
    /// The top document scrolled.
    Scroll,
    /// The top document resized.
    Resize,
}

/// Absolute geometry of a position report.
///
/// The innermost rect gives the size; every rect in the chain contributes
/// its offset.
#[must_use]
pub fn absolute_rect(message: &PositionMessage) -> Option<DomRect> {
    let primary = message.primary()?.dom_rect;
    let (left, top) = message
        .dom_rects
        .iter()
        .fold((0.0, 0.0), |(left, top), r| (left + r.dom_rect.left, top + r.dom_rect.top));
    Some(DomRect::new(left, top, primary.width, primary.height))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or_default()
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// TopController
// ============================================================================

/// Owns the overlay of one top document.
pub struct TopController {
    identity: Identity,
    options: RelayOptions,
    overlay: Option<OverlayElement>,
    backend: StateSlice,
    field_valt: ValtState,
    login: Option<LoginFrame>,
    identified: bool,
    outbound: OutboundSender,
    events: EventBus<OverlayEvent>,
}

impl std::fmt::Debug for TopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopController")
            .field("token", self.identity.token())
            .field("overlay", &self.overlay)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl TopController {
    /// Creates a controller with no overlay.
    #[must_use]
    pub fn new(options: RelayOptions, outbound: OutboundSender) -> Self {
        if options.leech_src.is_empty() {
            warn!("Top controller created without overlay source");
        }
        Self {
            identity: Identity::new(TOP_KIND),
            options,
            overlay: None,
            backend: StateSlice::locked(),
            field_valt: ValtState::default(),
            login: None,
            identified: false,
            outbound,
            events: EventBus::new(),
        }
    }

    /// Returns the identity.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the overlay, if drawn.
    #[inline]
    #[must_use]
    pub fn overlay(&self) -> Option<&OverlayElement> {
        self.overlay.as_ref()
    }

    /// Returns the last slice received from the background.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &StateSlice {
        &self.backend
    }

    /// Returns the last value snapshot of the login fields.
    #[inline]
    #[must_use]
    pub fn field_valt(&self) -> &ValtState {
        &self.field_valt
    }

    /// Returns the login frame, once reported.
    #[inline]
    #[must_use]
    pub fn login(&self) -> Option<&LoginFrame> {
        self.login.as_ref()
    }

    /// Subscribes to overlay changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Runs until `events` closes, then returns the controller.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<TopEvent>) -> Self {
        let mut scroll = Debounce::new(self.options.scroll_debounce);
        let mut resize = Debounce::new(self.options.resize_debounce);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TopEvent::Window(value)) => self.on_window_message(value),
                    Some(TopEvent::Background(value)) => self.on_background_message(value),
                    Some(TopEvent::Scroll) => scroll.trigger(()),
                    Some(TopEvent::Resize) => resize.trigger(()),
                    None => break,
                },

                () = scroll.elapsed() => self.relay(ViewportCommand::Scroll),

                () = resize.elapsed() => self.relay(ViewportCommand::Resize),
            }
        }

        debug!(token = %self.identity.token(), "Top controller stopped");
        self
    }

    // ========================================================================
    // Overlay lifecycle
    // ========================================================================

    /// Creates the overlay, or updates the existing one in place.
    ///
    /// A pinned overlay only has its timestamp refreshed.
    pub fn create(&mut self, data: &SelectorBoxData) {
        if data.ifr_height == 0 || data.rect.width <= 0.0 {
            warn!(ifr_height = data.ifr_height, width = data.rect.width, "Overlay drawn without size");
        }

        let now = now_millis();
        let event = match self.overlay.as_mut() {
            Some(overlay) if overlay.pinned => {
                overlay.updated_at = now;
                trace!("Pinned overlay left in place");
                OverlayEvent::Updated(overlay.clone())
            }
            Some(overlay) => {
                overlay.rect = data.rect;
                overlay.ifr_height = data.ifr_height;
                overlay.is_inner = data.is_inner;
                if !data.at_href.is_empty() {
                    overlay.at_href = Some(data.at_href.clone());
                }
                overlay.updated_at = now;
                OverlayEvent::Updated(overlay.clone())
            }
            None => {
                let overlay = OverlayElement {
                    src: self.options.leech_src.clone(),
                    rect: data.rect,
                    ifr_height: data.ifr_height,
                    is_inner: data.is_inner,
                    at_href: (!data.at_href.is_empty()).then(|| data.at_href.clone()),
                    pinned: false,
                    updated_at: now,
                };
                debug!(ifr_height = overlay.ifr_height, "Overlay created");
                self.overlay = Some(overlay.clone());
                OverlayEvent::Created(overlay)
            }
        };
        self.events.emit(event);
    }

    /// Sets the height and pin flag. Zero heights are ignored.
    pub fn update_height(&mut self, update: HeightUpdate) {
        if update.ifr_height == 0 {
            return;
        }
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        overlay.ifr_height = update.ifr_height;
        overlay.pinned = update.is_addor;
        overlay.updated_at = now_millis();
        let event = OverlayEvent::Updated(overlay.clone());
        self.events.emit(event);
    }

    /// Creates the overlay if absent, otherwise updates its height unless
    /// pinned.
    pub fn draw_or_update_height(&mut self, data: &SelectorBoxData) {
        match &self.overlay {
            None => self.create(data),
            Some(overlay) if overlay.pinned => {}
            Some(_) => self.update_height(HeightUpdate {
                ifr_height: data.ifr_height,
                is_addor: false,
            }),
        }
    }

    /// Creates the overlay if absent, otherwise erases it (unforced).
    pub fn toggle(&mut self, data: &SelectorBoxData) {
        if self.overlay.is_some() {
            self.remove(false);
        } else {
            self.create(data);
        }
    }

    /// Removes the overlay. Without `force`, a pinned overlay stays.
    ///
    /// Returns `true` if an overlay was removed.
    pub fn remove(&mut self, force: bool) -> bool {
        match &self.overlay {
            Some(overlay) if force || !overlay.pinned => {
                self.overlay = None;
                debug!(force, "Overlay removed");
                self.events.emit(OverlayEvent::Removed);
                true
            }
            _ => false,
        }
    }

    /// Moves the overlay to a reported field position unless pinned.
    ///
    /// Once a login frame is known, only its reports are applied.
    pub fn update_position(&mut self, message: &PositionMessage) {
        if let Some(login) = &self.login
            && login.sender_id != message.poster_id
        {
            trace!(poster = %message.poster_id, "Position from inactive field ignored");
            return;
        }
        let Some(rect) = absolute_rect(message) else {
            return;
        };
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        if overlay.pinned {
            return;
        }

        overlay.rect = rect;
        overlay.updated_at = now_millis();
        let event = OverlayEvent::Updated(overlay.clone());
        self.events.emit(event);
    }

    // ========================================================================
    // Login frame
    // ========================================================================

    /// Records the login frame and identifies this page to the background
    /// the first time.
    pub fn on_field_found(&mut self, found: FieldFound) {
        debug!(hostname = %found.hostname, is_inner = found.is_inner, "Login frame reported");

        if !self.identified {
            self.identified = true;
            post(
                &self.outbound,
                Target::Background,
                FrameMessage::Api(Message::Identify {
                    data: Identify {
                        hostname: found.hostname.clone(),
                    },
                }),
            );
        }

        self.login = Some(LoginFrame {
            hostname: found.hostname,
            href: found.href,
            is_inner: found.is_inner,
            sender_id: found.sender_id,
        });
    }

    /// Forwards a viewport change to a nested login frame.
    pub fn relay(&self, command: ViewportCommand) {
        let Some(login) = self.login.as_ref().filter(|login| login.is_inner) else {
            return;
        };
        let message = FrameCommand {
            token: login.sender_id.clone(),
            command,
            from: self.identity.token().clone(),
            data: CommandStamp { ts: now_millis() },
        };
        post(&self.outbound, Target::LoginFrame, FrameMessage::Command(message));
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handles a `postMessage` value.
    pub fn on_window_message(&mut self, value: Value) {
        match FrameMessage::decode(value) {
            Some(FrameMessage::Api(message)) => self.dispatch(message),
            Some(FrameMessage::Position(position)) => self.update_position(&position),
            Some(FrameMessage::Command(_)) | None => {}
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::FieldFound { data } => self.on_field_found(data),
            Message::SelectorDraw { data } => self.create(&data),
            Message::SelectorToggle { data } => self.toggle(&data),
            Message::SelectorUpDraw { data } => self.draw_or_update_height(&data),
            Message::SelectorUpHeight { data } => self.update_height(data),
            Message::SelectorErase { data } => {
                self.remove(data.force);
            }
            Message::SelectorEraseForce { .. } => {
                self.remove(true);
            }
            Message::SelectorUpValt { data } => self.field_valt = data,
            other => trace!(api_type = %other.api_type(), "Frame message ignored"),
        }
    }

    /// Handles a message from the background connection.
    pub fn on_background_message(&mut self, value: Value) {
        match Message::decode(value) {
            Ok(Message::StateSync { resp_data }) => self.backend = resp_data,
            Ok(Message::ValtChangedNotify { resp_data }) => self.field_valt = resp_data,
            Ok(other) => warn!(api_type = %other.api_type(), "Unexpected background message"),
            Err(e) => warn!(error = %e, "Dropping undecodable background message"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::time::sleep;

    use crate::inpage::{Outbound, OutboundReceiver};
    use crate::protocol::{ActiveField, FieldRect};

    fn controller() -> (TopController, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let options = RelayOptions::new().with_leech_src("moz-extension://x/leech.html");
        (TopController::new(options, tx), rx)
    }

    fn box_data(left: f64, ifr_height: u32) -> SelectorBoxData {
        SelectorBoxData {
            rect: DomRect::new(left, 100.0, 200.0, 24.0),
            is_inner: false,
            at_href: "https://example.com/login".into(),
            ifr_height,
        }
    }

    fn position(poster: &FrameToken, left: f64) -> PositionMessage {
        PositionMessage {
            poster_id: poster.clone(),
            extid: String::new(),
            node_root_href: "https://example.com/".into(),
            dom_rects: vec![FieldRect {
                uuid: poster.clone(),
                dom_rect: DomRect::new(left, 300.0, 180.0, 30.0),
                iframe_src: "https://example.com/".into(),
                actived_field: ActiveField::Username,
            }],
        }
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_create_is_idempotent() {
        let (mut top, _rx) = controller();
        let mut events = top.subscribe();

        top.create(&box_data(10.0, 180));
        top.create(&box_data(50.0, 220));

        let overlay = top.overlay().expect("overlay");
        assert_eq!(overlay.rect.left, 50.0);
        assert_eq!(overlay.ifr_height, 220);
        assert_eq!(overlay.src, "moz-extension://x/leech.html");

        assert!(matches!(events.try_recv(), Ok(OverlayEvent::Created(_))));
        assert!(matches!(events.try_recv(), Ok(OverlayEvent::Updated(_))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_pinned_overlay_keeps_geometry() {
        let (mut top, _rx) = controller();
        let token = FrameToken::from_string("__bpfield_a");
        top.create(&box_data(10.0, 180));
        top.update_height(HeightUpdate {
            ifr_height: 260,
            is_addor: true,
        });
        let before = top.overlay().cloned().expect("overlay");

        top.update_position(&position(&token, 400.0));
        top.create(&box_data(99.0, 100));
        top.draw_or_update_height(&box_data(99.0, 100));

        let after = top.overlay().expect("overlay");
        assert!(after.pinned);
        assert_eq!(after.rect, before.rect);
        assert_eq!(after.ifr_height, 260);
    }

    #[test]
    fn test_position_update_moves_unpinned_overlay() {
        let (mut top, _rx) = controller();
        let token = FrameToken::from_string("__bpfield_a");
        top.create(&box_data(10.0, 180));

        top.update_position(&position(&token, 400.0));

        let overlay = top.overlay().expect("overlay");
        assert_eq!(overlay.rect.left, 400.0);
        assert_eq!(overlay.rect.width, 180.0);
    }

    #[test]
    fn test_position_from_other_field_ignored() {
        let (mut top, _rx) = controller();
        top.on_field_found(FieldFound {
            is_inner: false,
            sender_id: FrameToken::from_string("__bpfield_login"),
            href: "https://example.com/".into(),
            hostname: "example.com".into(),
        });
        top.create(&box_data(10.0, 180));

        top.update_position(&position(&FrameToken::from_string("__bpfield_other"), 400.0));

        assert_eq!(top.overlay().expect("overlay").rect.left, 10.0);
    }

    #[test]
    fn test_absolute_rect_sums_offsets() {
        let token = FrameToken::from_string("__bpfield_a");
        let mut message = position(&token, 10.0);
        message.dom_rects.push(FieldRect {
            uuid: FrameToken::from_string("relay"),
            dom_rect: DomRect::new(100.0, 50.0, 800.0, 600.0),
            iframe_src: "https://example.com/".into(),
            actived_field: ActiveField::Username,
        });

        let rect = absolute_rect(&message).expect("rect");
        assert_eq!(rect.left, 110.0);
        assert_eq!(rect.top, 350.0);
        assert_eq!(rect.width, 180.0);
    }

    #[test]
    fn test_erase_respects_pin() {
        let (mut top, _rx) = controller();
        top.create(&box_data(10.0, 180));
        top.update_height(HeightUpdate {
            ifr_height: 200,
            is_addor: true,
        });

        assert!(!top.remove(false));
        assert!(top.overlay().is_some());
        assert!(top.remove(true));
        assert!(top.overlay().is_none());
        assert!(!top.remove(true));
    }

    #[test]
    fn test_toggle() {
        let (mut top, _rx) = controller();
        top.toggle(&box_data(10.0, 180));
        assert!(top.overlay().is_some());
        top.toggle(&box_data(10.0, 180));
        assert!(top.overlay().is_none());
    }

    #[test]
    fn test_up_draw_creates_then_updates_height_only() {
        let (mut top, _rx) = controller();
        top.draw_or_update_height(&box_data(10.0, 180));
        top.draw_or_update_height(&box_data(70.0, 300));

        let overlay = top.overlay().expect("overlay");
        assert_eq!(overlay.rect.left, 10.0);
        assert_eq!(overlay.ifr_height, 300);
    }

    #[test]
    fn test_zero_height_update_ignored() {
        let (mut top, _rx) = controller();
        top.create(&box_data(10.0, 180));
        top.update_height(HeightUpdate {
            ifr_height: 0,
            is_addor: true,
        });

        let overlay = top.overlay().expect("overlay");
        assert_eq!(overlay.ifr_height, 180);
        assert!(!overlay.pinned);
    }

    #[test]
    fn test_window_messages_dispatch() {
        let (mut top, _rx) = controller();
        let draw = Message::SelectorDraw {
            data: box_data(10.0, 180),
        };
        top.on_window_message(draw.encode().expect("encode"));
        assert!(top.overlay().is_some());

        top.on_window_message(json!({ "apiType": "selector-erase-force", "data": { "force": true } }));
        assert!(top.overlay().is_none());

        top.on_window_message(json!("unrelated page traffic"));
    }

    #[test]
    fn test_field_found_identifies_once() {
        let (mut top, mut rx) = controller();
        let found = FieldFound {
            is_inner: false,
            sender_id: FrameToken::from_string("__bpfield_a"),
            href: "https://example.com/".into(),
            hostname: "example.com".into(),
        };

        top.on_field_found(found.clone());
        top.on_field_found(found);

        let out = drain(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, Target::Background);
        let encoded = out[0].message.encode().expect("encode");
        assert_eq!(encoded["apiType"], "identify");
        assert_eq!(encoded["data"]["hostname"], "example.com");
    }

    #[test]
    fn test_millis_saturate() {
        assert_eq!(saturating_millis(Duration::from_secs(2)), 2_000);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
        assert!(now_millis() > 0);
    }

    #[test]
    fn test_relay_only_for_inner_login() {
        let (mut top, mut rx) = controller();
        top.relay(ViewportCommand::Scroll);
        assert!(drain(&mut rx).is_empty());

        top.on_field_found(FieldFound {
            is_inner: true,
            sender_id: FrameToken::from_string("__bpfield_inner"),
            href: "https://login.example.com/".into(),
            hostname: "login.example.com".into(),
        });
        drain(&mut rx);

        top.relay(ViewportCommand::Resize);
        let out = drain(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, Target::LoginFrame);
        let FrameMessage::Command(command) = &out[0].message else {
            panic!("expected frame command");
        };
        assert_eq!(command.token.as_str(), "__bpfield_inner");
        assert_eq!(&command.from, top.identity().token());
        assert_eq!(command.command, ViewportCommand::Resize);
    }

    #[test]
    fn test_background_state_stored() {
        let (mut top, _rx) = controller();
        let mut slice = StateSlice::locked();
        slice.is_unlocked = true;
        top.on_background_message(Message::state_sync(slice).encode().expect("encode"));
        assert!(top.backend().is_unlocked);

        let notify = Message::ValtChangedNotify {
            resp_data: ValtState {
                username: "alice".into(),
                ..ValtState::default()
            },
        };
        top.on_background_message(notify.encode().expect("encode"));
        assert_eq!(top.field_valt().username, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_burst_relays_once() {
        let (mut top, mut rx) = controller();
        top.on_field_found(FieldFound {
            is_inner: true,
            sender_id: FrameToken::from_string("__bpfield_inner"),
            href: "https://login.example.com/".into(),
            hostname: "login.example.com".into(),
        });
        drain(&mut rx);

        let (tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(top.run(events));
        for _ in 0..6 {
            tx.send(TopEvent::Scroll).expect("send");
            sleep(Duration::from_millis(20)).await;
        }
        sleep(Duration::from_millis(200)).await;

        let out = drain(&mut rx);
        assert_eq!(out.len(), 1);
        assert!(matches!(
            &out[0].message,
            FrameMessage::Command(FrameCommand {
                command: ViewportCommand::Scroll,
                ..
            })
        ));

        drop(tx);
        task.await.expect("join");
    }
}
