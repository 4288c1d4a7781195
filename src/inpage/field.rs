//! Content-script field state machine.
//!
//! ```text
//! Searching ──pair found──► Found ──focus──► Active ◄──focus── Idle
//!     ▲                                        │                ▲
//!     └────────── pair lost (any state) ◄──────┴──blur──────────┘
//! ```
//!
//! [`FieldController::run`] owns the debounces:
//!
//! | Source | Window | Action |
//! |--------|--------|--------|
//! | DOM mutation | `mutation_debounce` | [`FieldController::scan`] |
//! | Input in a pair field | `value_change_debounce` | [`FieldController::value_changed`] |
//! | Scroll / resize | `scroll_debounce` / `resize_debounce` | Re-send position |
//!
//! Field values leave the document only through `fields-valt-changed`
//! (background) and `selector-up-valt` (top frame).

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::debounce::Debounce;
use crate::events::{EventBus, Identity};
use crate::options::RelayOptions;
use crate::protocol::{
    ActiveField, DomRect, FieldFound, FieldRect, FrameCommand, FrameMessage, Message,
    PositionMessage, SelectorBoxData, StateSlice, ValtState, VaultItem,
};

use super::dom::{Dom, FieldPair, NodeId, lookup_login_fields};
use super::sizing::{ElemType, SizingDecision, SizingParams, SizingTrigger, decide};
use super::{OutboundSender, Target, post};

/// Identity kind of field controllers.
pub const FIELD_KIND: &str = "__bpfield_";

// ============================================================================
// Types
// ============================================================================

/// Input to the field event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEvent {
    /// The document mutated.
    Mutation,
    /// A node gained focus.
    FocusIn(NodeId),
    /// A node lost focus.
    FocusOut(NodeId),
    /// A node's value changed.
    Input(NodeId),
    /// The injected button was clicked.
    ButtonClicked,
    /// The document scrolled.
    Scroll,
    /// The document resized.
    Resize,
    /// A `postMessage` value arrived.
    Window(Value),
    /// A message arrived on the background connection.
    Background(Value),
}

/// Detection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// No login pair in the document.
    Searching,
    /// Pair found, never focused.
    Found,
    /// A pair field holds focus.
    Active(NodeId),
    /// Pair found, focus elsewhere.
    Idle,
}

/// Lifecycle notifications for the host glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLifecycle {
    /// A pair was found; the background connection should be opened.
    Found {
        /// Hostname of the document.
        hostname: String,
    },
    /// The pair disappeared.
    Lost,
    /// A pair field gained focus.
    Activated(ActiveField),
    /// The pair lost focus.
    Deactivated,
}

// ============================================================================
// FieldController
// ============================================================================

/// Detects the login pair of one document and reports on it.
pub struct FieldController<D> {
    identity: Identity,
    options: RelayOptions,
    dom: D,
    state: FieldState,
    pair: Option<FieldPair>,
    backend: StateSlice,
    button_anchor: Option<NodeId>,
    outbound: OutboundSender,
    events: EventBus<FieldLifecycle>,
}

impl<D> std::fmt::Debug for FieldController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldController")
            .field("token", self.identity.token())
            .field("state", &self.state)
            .field("pair", &self.pair)
            .finish_non_exhaustive()
    }
}

impl<D: Dom> FieldController<D> {
    /// Creates a controller in [`FieldState::Searching`].
    #[must_use]
    pub fn new(dom: D, options: RelayOptions, outbound: OutboundSender) -> Self {
        Self {
            identity: Identity::new(FIELD_KIND),
            options,
            dom,
            state: FieldState::Searching,
            pair: None,
            backend: StateSlice::locked(),
            button_anchor: None,
            outbound,
            events: EventBus::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the identity.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the detection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> FieldState {
        self.state
    }

    /// Returns the detected pair.
    #[inline]
    #[must_use]
    pub fn pair(&self) -> Option<FieldPair> {
        self.pair
    }

    /// Returns the last slice received from the background.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &StateSlice {
        &self.backend
    }

    /// Returns the document.
    #[inline]
    #[must_use]
    pub fn dom(&self) -> &D {
        &self.dom
    }

    /// Returns the document mutably.
    #[inline]
    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    /// Subscribes to lifecycle notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FieldLifecycle> {
        self.events.subscribe()
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Runs until `events` closes, then returns the controller.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<FieldEvent>) -> Self {
        let mut mutation = Debounce::new(self.options.mutation_debounce);
        let mut typing = Debounce::<NodeId>::new(self.options.value_change_debounce);
        let mut scroll = Debounce::new(self.options.scroll_debounce);
        let mut resize = Debounce::new(self.options.resize_debounce);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match event {
                        FieldEvent::Mutation => mutation.trigger(()),
                        FieldEvent::Input(node) => {
                            if self.pair.is_some_and(|pair| pair.contains(node)) {
                                typing.trigger(node);
                            }
                        }
                        FieldEvent::Scroll => scroll.trigger(()),
                        FieldEvent::Resize => resize.trigger(()),
                        FieldEvent::FocusIn(node) => self.focus_in(node),
                        FieldEvent::FocusOut(node) => self.focus_out(node),
                        FieldEvent::ButtonClicked => self.button_clicked(),
                        FieldEvent::Window(value) => self.on_window_message(value),
                        FieldEvent::Background(value) => self.on_background_message(value),
                    }
                }

                () = mutation.elapsed() => self.scan(),

                node = typing.elapsed() => self.value_changed(node),

                () = scroll.elapsed() => self.viewport_changed(),

                () = resize.elapsed() => self.viewport_changed(),
            }
        }

        debug!(token = %self.identity.token(), "Field controller stopped");
        self
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Confirms the current pair or looks for a new one.
    pub fn scan(&mut self) {
        let confirmed = self.pair.is_some_and(|pair| pair.is_confirmed(&self.dom));

        if !confirmed {
            match lookup_login_fields(&self.dom, self.options.max_search_depth) {
                Some(pair) => self.pair_found(pair),
                None => self.pair_lost(),
            }
        }

        if let Some(pair) = self.pair
            && self.dom.bounding_rect(pair.password).is_collapsed()
        {
            trace!(token = %self.identity.token(), "Password field collapsed");
            self.post(Target::Top, Message::erase(true, "mutation:collapsed"));
        }
    }

    fn pair_found(&mut self, pair: FieldPair) {
        self.pair = Some(pair);
        self.state = FieldState::Found;
        self.button_anchor = None;

        let hostname = self.dom.hostname();
        debug!(token = %self.identity.token(), hostname = %hostname, "Login fields found");

        self.post(
            Target::Top,
            Message::FieldFound {
                data: FieldFound {
                    is_inner: !self.dom.is_top(),
                    sender_id: self.identity.token().clone(),
                    href: self.dom.href(),
                    hostname: hostname.clone(),
                },
            },
        );
        self.events.emit(FieldLifecycle::Found { hostname });
    }

    fn pair_lost(&mut self) {
        if self.pair.take().is_none() {
            return;
        }
        debug!(token = %self.identity.token(), "Login fields lost");
        self.state = FieldState::Searching;
        if self.button_anchor.take().is_some() {
            self.dom.remove_button();
        }
        self.events.emit(FieldLifecycle::Lost);
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// Handles focus entering `node`.
    pub fn focus_in(&mut self, node: NodeId) {
        let Some(pair) = self.pair.filter(|pair| pair.contains(node)) else {
            return;
        };

        self.dom.set_attribute(node, "autocomplete", "off");
        self.state = FieldState::Active(node);
        let field = field_of(pair, node);
        self.events.emit(FieldLifecycle::Activated(field));

        self.send_target_position(node);
        let valt = self.valt_state(Some(node));
        self.post(Target::Background, Message::FieldsValtChanged { data: valt.clone() });

        let rect = self.dom.bounding_rect(node);
        self.dom.place_button(rect);
        self.button_anchor = Some(node);

        let decision = self.decide(&valt, SizingTrigger::Focus);
        trace!(token = %self.identity.token(), decision = ?decision, "Focus sizing");
        match decision.elem_type {
            ElemType::Drawing => {
                let data = self.box_data(decision.ifr_height, rect);
                self.post(Target::Top, Message::SelectorDraw { data });
            }
            ElemType::Erase => self.post(Target::Top, Message::erase(false, "focusin")),
            ElemType::None => {}
        }
    }

    /// Handles focus leaving `node`.
    pub fn focus_out(&mut self, node: NodeId) {
        if !self.pair.is_some_and(|pair| pair.contains(node)) {
            return;
        }

        if self.options.erase_on_blur {
            self.dom.remove_button();
            self.button_anchor = None;
            self.post(Target::Top, Message::erase(false, "focusout"));
        }

        self.state = FieldState::Idle;
        self.events.emit(FieldLifecycle::Deactivated);
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Reports the pair's values after typing in `node` settled.
    pub fn value_changed(&mut self, node: NodeId) {
        if !self.pair.is_some_and(|pair| pair.contains(node)) {
            return;
        }

        let valt = self.valt_state(Some(node));
        debug!(token = %self.identity.token(), valt = ?valt, "Field values changed");
        self.post(Target::Top, Message::SelectorUpValt { data: valt.clone() });
        self.post(Target::Background, Message::FieldsValtChanged { data: valt.clone() });

        let decision = self.decide(&valt, SizingTrigger::ValueChanged);
        match decision.elem_type {
            ElemType::Drawing => {
                let data = self.box_data(decision.ifr_height, self.dom.bounding_rect(node));
                self.post(Target::Top, Message::SelectorUpDraw { data });
            }
            ElemType::Erase => self.post(Target::Top, Message::erase(false, "input:fields:changed")),
            ElemType::None => {}
        }
    }

    /// Writes `item` into the pair.
    pub fn fill(&mut self, item: &VaultItem) {
        let Some(pair) = self.pair else {
            debug!(token = %self.identity.token(), "Fill without login fields");
            return;
        };
        self.dom.set_value(pair.username, &item.username);
        self.dom.set_value(pair.password, &item.password);
    }

    /// Current values of the pair, with `active` as the focused field.
    #[must_use]
    pub fn valt_state(&self, active: Option<NodeId>) -> ValtState {
        let pair = self.pair;
        ValtState {
            actived_field: match (pair, active) {
                (Some(pair), Some(node)) => field_of(pair, node),
                _ => ActiveField::Username,
            },
            hostname: self.dom.hostname(),
            username: pair.map(|p| self.dom.value(p.username)).unwrap_or_default(),
            password: pair.map(|p| self.dom.value(p.password)).unwrap_or_default(),
        }
    }

    // ========================================================================
    // Button and viewport
    // ========================================================================

    /// Toggles the overlay for the field the button is anchored to.
    pub fn button_clicked(&mut self) {
        let Some(node) = self.button_anchor else {
            trace!(token = %self.identity.token(), "Button click without anchor");
            return;
        };

        self.send_target_position(node);
        let valt = self.valt_state(Some(node));
        let decision = self.decide(&valt, SizingTrigger::Toggle);
        let data = self.box_data(decision.ifr_height, self.dom.bounding_rect(node));
        self.post(Target::Top, Message::SelectorToggle { data });
    }

    /// Re-sends position and moves the button after scroll or resize.
    pub fn viewport_changed(&mut self) {
        let Some(target) = self.current_target() else {
            return;
        };
        self.send_target_position(target);
        if self.button_anchor.is_some() {
            let rect = self.dom.bounding_rect(target);
            self.dom.place_button(rect);
        }
    }

    /// Posts the geometry of `node` to the parent document.
    ///
    /// Collapsed fields are not reported.
    pub fn send_target_position(&self, node: NodeId) {
        let Some(pair) = self.pair else {
            return;
        };
        let rect = self.dom.bounding_rect(node);
        if rect.is_collapsed() {
            return;
        }

        let href = self.dom.href();
        let token = self.identity.token().clone();
        let message = PositionMessage {
            poster_id: token.clone(),
            extid: self.options.extension_id.clone(),
            node_root_href: href.clone(),
            dom_rects: vec![FieldRect {
                uuid: token,
                dom_rect: rect,
                iframe_src: href,
                actived_field: field_of(pair, node),
            }],
        };
        post(&self.outbound, Target::Parent, FrameMessage::Position(message));
    }

    fn current_target(&self) -> Option<NodeId> {
        match self.state {
            FieldState::Active(node) => Some(node),
            _ => self.pair.map(|pair| pair.username),
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handles a `postMessage` value.
    ///
    /// Only viewport relays addressed to this controller's token are acted
    /// on, and only inside nested frames.
    pub fn on_window_message(&mut self, value: Value) {
        let Some(FrameMessage::Command(command)) = FrameMessage::decode(value) else {
            return;
        };
        self.on_frame_command(&command);
    }

    fn on_frame_command(&mut self, command: &FrameCommand) {
        if self.dom.is_top() || !self.identity.owns(&command.token) {
            trace!(token = %command.token, "Frame command for another controller");
            return;
        }
        trace!(command = ?command.command, from = %command.from, "Viewport relay");
        if let Some(target) = self.current_target() {
            self.send_target_position(target);
        }
    }

    /// Handles a message from the background connection.
    pub fn on_background_message(&mut self, value: Value) {
        let message = match Message::decode(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(token = %self.identity.token(), error = %e, "Dropping undecodable background message");
                return;
            }
        };

        match message {
            Message::StateSync { resp_data } => {
                trace!(matched = resp_data.matched_num, unlocked = resp_data.is_unlocked, "State slice received");
                self.backend = resp_data;
            }
            Message::FillFields { resp_data } => self.fill(&resp_data),
            other => {
                warn!(api_type = %other.api_type(), "Unexpected background message");
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn decide(&self, valt: &ValtState, trigger: SizingTrigger) -> SizingDecision {
        decide(&SizingParams {
            slice: &self.backend,
            valt,
            trigger,
        })
    }

    fn box_data(&self, ifr_height: u32, rect: DomRect) -> SelectorBoxData {
        SelectorBoxData {
            rect,
            is_inner: !self.dom.is_top(),
            at_href: self.dom.href(),
            ifr_height,
        }
    }

    fn post(&self, target: Target, message: Message) {
        post(&self.outbound, target, FrameMessage::Api(message));
    }
}

fn field_of(pair: FieldPair, node: NodeId) -> ActiveField {
    if node == pair.password {
        ActiveField::Password
    } else {
        ActiveField::Username
    }
}

// ============================================================================
// Tests
// ============================================================================
