//! Host document access and login-field lookup.
//!
//! The content script never owns the page; it reads and annotates the
//! document through the [`Dom`] trait. [`lookup_login_fields`] is the
//! discovery algorithm run on every debounced mutation.
//!
//! # Lookup
//!
//! 1. First visible password input wins.
//! 2. Its form's first username input is taken if rendered.
//! 3. Otherwise ancestors are searched upward, one level at a time, up to
//!    `max_depth` levels or `<body>`, whichever comes first.
//!
//! Candidates hidden with `display: none` or rendering with zero width are
//! never picked.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tracing::trace;

use crate::protocol::DomRect;

// ============================================================================
// NodeId
// ============================================================================

/// Handle to a node of the host document.
///
/// Handles are lookup-only: the page may detach the node at any time, which
/// [`Dom::is_attached`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Wraps a host node index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the host node index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

// ============================================================================
// FieldKind
// ============================================================================

/// Input classes the lookup searches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `input[type=password]`.
    Password,
    /// Text or mail inputs that may hold a username.
    Username,
}

impl FieldKind {
    /// CSS selector a browser host uses for this kind.
    #[must_use]
    pub const fn css(self) -> &'static str {
        match self {
            Self::Password => r#"input[type="password"][name],input[type="password"]"#,
            Self::Username => {
                r#"input[type="mail"][name],input[type="text"][name],input[type="text"][id],input[type="text"]"#
            }
        }
    }
}

// ============================================================================
// Dom
// ============================================================================

/// Read/annotate access to one document.
pub trait Dom {
    /// Inputs of `kind` in document order, inside `scope` when given.
    fn query_all(&self, scope: Option<NodeId>, kind: FieldKind) -> Vec<NodeId>;

    /// Parent element, `None` at the root.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Returns `true` for the `<body>` element.
    fn is_body(&self, node: NodeId) -> bool;

    /// Owning `<form>` of an input.
    fn form_of(&self, node: NodeId) -> Option<NodeId>;

    /// Returns `true` if the node's own style is `display: none`.
    fn is_display_none(&self, node: NodeId) -> bool;

    /// Returns `true` while the node is still in the document.
    fn is_attached(&self, node: NodeId) -> bool;

    /// Current `getBoundingClientRect()`.
    fn bounding_rect(&self, node: NodeId) -> DomRect;

    /// Current input value.
    fn value(&self, node: NodeId) -> String;

    /// Writes an input value.
    fn set_value(&mut self, node: NodeId, value: &str);

    /// Sets an attribute.
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

    /// Places (or moves) the injected button over `anchor`.
    fn place_button(&mut self, anchor: DomRect);

    /// Removes the injected button, if present.
    fn remove_button(&mut self);

    /// Document URL.
    fn href(&self) -> String;

    /// Document hostname.
    fn hostname(&self) -> String;

    /// Returns `true` in the top-level document.
    fn is_top(&self) -> bool;
}

// ============================================================================
// FieldPair
// ============================================================================

/// Password input and its companion username input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPair {
    /// Password input.
    pub password: NodeId,
    /// Username input.
    pub username: NodeId,
}

impl FieldPair {
    /// Returns `true` if `node` is one of the pair.
    #[inline]
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.password == node || self.username == node
    }

    /// Returns `true` while both inputs are attached and not hidden.
    #[must_use]
    pub fn is_confirmed(&self, dom: &impl Dom) -> bool {
        [self.password, self.username]
            .into_iter()
            .all(|node| dom.is_attached(node) && !dom.is_display_none(node))
    }
}

// ============================================================================
// Lookup
// ============================================================================

/// Finds the login field pair of `dom`.
///
/// Returns `None` unless both inputs resolve.
pub fn lookup_login_fields(dom: &impl Dom, max_depth: usize) -> Option<FieldPair> {
    let password = dom
        .query_all(None, FieldKind::Password)
        .into_iter()
        .find(|node| !dom.is_display_none(*node))?;

    let username = dom
        .form_of(password)
        .and_then(|form| dom.query_all(Some(form), FieldKind::Username).into_iter().next())
        .filter(|node| is_rendered(dom, *node))
        .or_else(|| search_upward(dom, password, FieldKind::Username, max_depth))?;

    trace!(password = %password, username = %username, "Login fields found");
    Some(FieldPair { password, username })
}

/// Searches the ancestors of `start` for an input of `kind`.
///
/// Walks at most `max_depth` levels and never enters `<body>`.
pub fn search_upward(
    dom: &impl Dom,
    start: NodeId,
    kind: FieldKind,
    max_depth: usize,
) -> Option<NodeId> {
    let mut current = start;

    for _ in 0..max_depth {
        let parent = dom.parent(current)?;
        if dom.is_body(parent) {
            return None;
        }

        if let Some(found) = pick_candidate(dom, dom.query_all(Some(parent), kind)) {
            return Some(found);
        }
        current = parent;
    }

    trace!(start = %start, max_depth, "Upward search exhausted");
    None
}

/// First candidate that is neither hidden nor collapsed.
fn pick_candidate(dom: &impl Dom, candidates: Vec<NodeId>) -> Option<NodeId> {
    candidates
        .into_iter()
        .find(|node| is_rendered(dom, *node))
}

fn is_rendered(dom: &impl Dom, node: NodeId) -> bool {
    !dom.is_display_none(node) && !dom.bounding_rect(node).is_collapsed()
}

// ============================================================================
// FakeDom
// ============================================================================

/// In-memory document for tests.
#[cfg(test)]
pub(crate) mod fake {
    use rustc_hash::FxHashMap;

    use super::{Dom, DomRect, FieldKind, NodeId};

    #[derive(Debug, Clone)]
    struct FakeNode {
        parent: Option<NodeId>,
        tag: &'static str,
        kind: Option<FieldKind>,
        display_none: bool,
        attached: bool,
        rect: DomRect,
        value: String,
        attributes: FxHashMap<String, String>,
    }

    /// Tree of nodes; index order is document order.
    #[derive(Debug, Clone)]
    pub(crate) struct FakeDom {
        nodes: Vec<FakeNode>,
        pub(crate) href: String,
        pub(crate) top: bool,
        pub(crate) button: Option<DomRect>,
    }

    impl FakeDom {
        /// Document with only `<body>` (node 0).
        pub(crate) fn new(href: &str) -> Self {
            let mut dom = Self {
                nodes: Vec::new(),
                href: href.to_owned(),
                top: true,
                button: None,
            };
            dom.push(None, "body", None);
            dom
        }

        pub(crate) fn body(&self) -> NodeId {
            NodeId::new(0)
        }

        fn push(&mut self, parent: Option<NodeId>, tag: &'static str, kind: Option<FieldKind>) -> NodeId {
            let id = NodeId::new(self.nodes.len() as u32);
            self.nodes.push(FakeNode {
                parent,
                tag,
                kind,
                display_none: false,
                attached: true,
                rect: DomRect::new(10.0, 10.0 * f64::from(id.index()), 200.0, 24.0),
                value: String::new(),
                attributes: FxHashMap::default(),
            });
            id
        }

        pub(crate) fn element(&mut self, parent: NodeId, tag: &'static str) -> NodeId {
            self.push(Some(parent), tag, None)
        }

        pub(crate) fn input(&mut self, parent: NodeId, kind: FieldKind) -> NodeId {
            self.push(Some(parent), "input", Some(kind))
        }

        /// Body > form > (username, password).
        pub(crate) fn login_form(href: &str) -> (Self, NodeId, NodeId) {
            let mut dom = Self::new(href);
            let form = dom.element(dom.body(), "form");
            let username = dom.input(form, FieldKind::Username);
            let password = dom.input(form, FieldKind::Password);
            (dom, username, password)
        }

        pub(crate) fn hide(&mut self, node: NodeId) {
            self.node_mut(node).display_none = true;
        }

        pub(crate) fn detach(&mut self, node: NodeId) {
            self.node_mut(node).attached = false;
        }

        pub(crate) fn set_rect(&mut self, node: NodeId, rect: DomRect) {
            self.node_mut(node).rect = rect;
        }

        pub(crate) fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
            self.node(node).attributes.get(name).map(String::as_str)
        }

        fn node(&self, node: NodeId) -> &FakeNode {
            &self.nodes[node.index() as usize]
        }

        fn node_mut(&mut self, node: NodeId) -> &mut FakeNode {
            &mut self.nodes[node.index() as usize]
        }

        fn is_inside(&self, node: NodeId, scope: NodeId) -> bool {
            let mut current = self.node(node).parent;
            while let Some(parent) = current {
                if parent == scope {
                    return true;
                }
                current = self.node(parent).parent;
            }
            false
        }
    }

    impl Dom for FakeDom {
        fn query_all(&self, scope: Option<NodeId>, kind: FieldKind) -> Vec<NodeId> {
            (0..self.nodes.len() as u32)
                .map(NodeId::new)
                .filter(|id| {
                    let node = self.node(*id);
                    node.attached && node.kind == Some(kind)
                })
                .filter(|id| scope.is_none_or(|scope| self.is_inside(*id, scope)))
                .collect()
        }

        fn parent(&self, node: NodeId) -> Option<NodeId> {
            self.node(node).parent
        }

        fn is_body(&self, node: NodeId) -> bool {
            self.node(node).tag == "body"
        }

        fn form_of(&self, node: NodeId) -> Option<NodeId> {
            let mut current = self.node(node).parent;
            while let Some(parent) = current {
                if self.node(parent).tag == "form" {
                    return Some(parent);
                }
                current = self.node(parent).parent;
            }
            None
        }

        fn is_display_none(&self, node: NodeId) -> bool {
            self.node(node).display_none
        }

        fn is_attached(&self, node: NodeId) -> bool {
            self.node(node).attached
        }

        fn bounding_rect(&self, node: NodeId) -> DomRect {
            let node = self.node(node);
            if node.display_none || !node.attached {
                DomRect::default()
            } else {
                node.rect
            }
        }

        fn value(&self, node: NodeId) -> String {
            self.node(node).value.clone()
        }

        fn set_value(&mut self, node: NodeId, value: &str) {
            self.node_mut(node).value = value.to_owned();
        }

        fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
            self.node_mut(node)
                .attributes
                .insert(name.to_owned(), value.to_owned());
        }

        fn place_button(&mut self, anchor: DomRect) {
            self.button = Some(anchor);
        }

        fn remove_button(&mut self) {
            self.button = None;
        }

        fn href(&self) -> String {
            self.href.clone()
        }

        fn hostname(&self) -> String {
            url::Url::parse(&self.href)
                .ok()
                .and_then(|url| url.host_str().map(str::to_owned))
                .unwrap_or_default()
        }

        fn is_top(&self) -> bool {
            self.top
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
