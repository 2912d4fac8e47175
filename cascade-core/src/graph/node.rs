//! Graph Nodes
//!
//! This module defines the node types that live in the propagation graph:
//! the [`Reactor`] leaf callback and the closed [`Node`] union over reactors
//! and controllers. The union is resolved once when an edge is created, so
//! the chain scheduler matches on a variant instead of inspecting types at
//! drain time.
//!
//! # Identity
//!
//! Every node carries a [`NodeId`] drawn from a global counter. All identity
//! comparison in the crate (edge de-duplication, unsubscription, re-entrancy
//! guards) goes through these ids, never through pointer or value equality.
//!
//! # Ownership
//!
//! Handles are cheap clones sharing one allocation. An edge holds its target
//! either strongly (a [`Node`]) or weakly (a [`WeakNode`] that stops
//! resolving once every strong handle is dropped); the per-edge choice is
//! captured by [`Subscription`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BoxError;
use crate::runtime::Runtime;
use super::controller::{Controller, WeakController};

/// Unique identifier for a node in the propagation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback signature stored by a [`Reactor`].
type ReactorFn = Box<dyn FnMut(&mut Runtime) -> Result<(), BoxError>>;

struct ReactorInner {
    id: NodeId,
    label: Option<&'static str>,
    callback: RefCell<ReactorFn>,
}

/// A leaf callback node.
///
/// A reactor has no downstream edges of its own: when the chain drains it,
/// the callback runs and that is the end of that branch. Cloning a `Reactor`
/// yields another handle to the same node.
///
/// # Example
///
/// ```rust,ignore
/// let hits = Rc::new(Cell::new(0));
/// let hits_in = hits.clone();
/// let reactor = Reactor::new(move |_rt| hits_in.set(hits_in.get() + 1));
/// controller.subscribe(&reactor);
/// ```
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<ReactorInner>,
}

impl Reactor {
    /// Create a reactor from an infallible callback.
    pub fn new(mut callback: impl FnMut(&mut Runtime) + 'static) -> Self {
        Self::build(None, move |rt| {
            callback(rt);
            Ok(())
        })
    }

    /// Create a reactor whose callback may fail.
    ///
    /// A returned error aborts the in-flight chain and surfaces from
    /// `Controller::activate` as a `PropagationError::Reactor`.
    pub fn fallible(
        callback: impl FnMut(&mut Runtime) -> Result<(), BoxError> + 'static,
    ) -> Self {
        Self::build(None, callback)
    }

    /// Create a labeled reactor; the label shows up in traces and errors.
    pub fn with_label(
        label: &'static str,
        mut callback: impl FnMut(&mut Runtime) + 'static,
    ) -> Self {
        Self::build(Some(label), move |rt| {
            callback(rt);
            Ok(())
        })
    }

    fn build(
        label: Option<&'static str>,
        callback: impl FnMut(&mut Runtime) -> Result<(), BoxError> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(ReactorInner {
                id: NodeId::new(),
                label,
                callback: RefCell::new(Box::new(callback)),
            }),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run the callback. Called by the chain drain loop only.
    pub(crate) fn invoke(&self, rt: &mut Runtime) -> Result<(), BoxError> {
        let mut callback = self.inner.callback.borrow_mut();
        (callback)(rt)
    }

    pub(crate) fn describe(&self) -> String {
        match self.inner.label {
            Some(label) => label.to_string(),
            None => format!("reactor#{}", self.inner.id.raw()),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakReactor {
        WeakReactor {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

/// Weak counterpart of [`Reactor`].
///
/// Keeps the id of its referent so a dead handle still identifies which edge
/// it was.
#[derive(Clone)]
pub(crate) struct WeakReactor {
    id: NodeId,
    inner: Weak<ReactorInner>,
}

impl WeakReactor {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn upgrade(&self) -> Option<Reactor> {
        self.inner.upgrade().map(|inner| Reactor { inner })
    }
}

/// A node in the propagation graph: a leaf [`Reactor`] or a [`Controller`]
/// with downstream edges of its own.
#[derive(Clone)]
pub enum Node {
    /// Leaf callback.
    Reactor(Reactor),
    /// Edge-owning node with an on-activate hook.
    Controller(Controller),
}

impl Node {
    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        match self {
            Node::Reactor(reactor) => reactor.id(),
            Node::Controller(controller) => controller.id(),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Node::Reactor(reactor) => reactor.describe(),
            Node::Controller(controller) => controller.describe(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakNode {
        match self {
            Node::Reactor(reactor) => WeakNode::Reactor(reactor.downgrade()),
            Node::Controller(controller) => WeakNode::Controller(controller.downgrade()),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Reactor(reactor) => reactor.fmt(f),
            Node::Controller(controller) => controller.fmt(f),
        }
    }
}

impl From<Reactor> for Node {
    fn from(reactor: Reactor) -> Self {
        Node::Reactor(reactor)
    }
}

impl From<&Reactor> for Node {
    fn from(reactor: &Reactor) -> Self {
        Node::Reactor(reactor.clone())
    }
}

impl From<Controller> for Node {
    fn from(controller: Controller) -> Self {
        Node::Controller(controller)
    }
}

/// Weak counterpart of [`Node`].
#[derive(Clone)]
pub(crate) enum WeakNode {
    Reactor(WeakReactor),
    Controller(WeakController),
}

impl WeakNode {
    pub(crate) fn id(&self) -> NodeId {
        match self {
            WeakNode::Reactor(reactor) => reactor.id(),
            WeakNode::Controller(controller) => controller.id(),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Node> {
        match self {
            WeakNode::Reactor(reactor) => reactor.upgrade().map(Node::Reactor),
            WeakNode::Controller(controller) => controller.upgrade().map(Node::Controller),
        }
    }
}

/// Per-edge ownership of a downstream node.
///
/// Strong entries keep their target alive; weak entries resolve at traversal
/// time, and a dead one means the edge no longer exists.
#[derive(Clone)]
pub(crate) enum Subscription {
    Strong(Node),
    Weak(WeakNode),
}

impl Subscription {
    pub(crate) fn id(&self) -> NodeId {
        match self {
            Subscription::Strong(node) => node.id(),
            Subscription::Weak(weak) => weak.id(),
        }
    }

    /// Resolve to a live node handle; `None` means the weak target is gone
    /// and the edge should be pruned.
    pub(crate) fn resolve(&self) -> Option<Node> {
        match self {
            Subscription::Strong(node) => Some(node.clone()),
            Subscription::Weak(weak) => weak.upgrade(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn reactor_invokes_callback() {
        let mut rt = Runtime::new();
        let hits = Rc::new(RefCell::new(0));
        let hits_in = hits.clone();
        let reactor = Reactor::new(move |_| *hits_in.borrow_mut() += 1);

        reactor.invoke(&mut rt).unwrap();
        reactor.invoke(&mut rt).unwrap();
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    fn fallible_reactor_surfaces_error() {
        let mut rt = Runtime::new();
        let reactor = Reactor::fallible(|_| Err("boom".into()));
        let err = reactor.invoke(&mut rt).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn clones_share_the_node() {
        let reactor = Reactor::new(|_| {});
        let clone = reactor.clone();
        assert_eq!(reactor.id(), clone.id());
    }

    #[test]
    fn weak_reactor_dies_with_its_target() {
        let reactor = Reactor::new(|_| {});
        let weak = reactor.downgrade();
        assert!(weak.upgrade().is_some());

        drop(reactor);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn labels_show_in_descriptions() {
        let plain = Reactor::new(|_| {});
        let labeled = Reactor::with_label("audit", |_| {});
        assert_eq!(plain.describe(), format!("reactor#{}", plain.id().raw()));
        assert_eq!(labeled.describe(), "audit");
    }

    #[test]
    fn node_conversions_preserve_identity() {
        let reactor = Reactor::new(|_| {});
        let controller = Controller::new();

        assert_eq!(Node::from(&reactor).id(), reactor.id());
        assert_eq!(Node::from(&controller).id(), controller.id());
    }

    #[test]
    fn weak_subscription_goes_dead() {
        let reactor = Reactor::new(|_| {});
        let subscription = Subscription::Weak(Node::from(&reactor).downgrade());
        let id = reactor.id();

        assert!(subscription.resolve().is_some());
        drop(reactor);
        assert!(subscription.resolve().is_none());
        // Identity survives for unsubscription by id.
        assert_eq!(subscription.id(), id);
    }

    #[test]
    fn strong_subscription_keeps_target_alive() {
        let reactor = Reactor::new(|_| {});
        let subscription = Subscription::Strong(Node::from(&reactor));

        drop(reactor);
        assert!(subscription.resolve().is_some());
    }
}
