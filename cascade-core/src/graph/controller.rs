//! Controllers
//!
//! A [`Controller`] is the edge-owning node of the propagation graph. It
//! keeps an ordered, de-duplicated downstream list (strong or weak per
//! entry), the upstream dependency list maintained by scope collection, and
//! an optional on-activate hook that runs when the node drains, before its
//! downstream does.
//!
//! # Edges are data, not callbacks
//!
//! Subscribing never wires a direct invocation path: `subscribe` records an
//! edge and nothing else. All execution happens in the chain scheduler;
//! that is what lets a node reached by several activation roots run once per
//! burst, at its topological position, instead of once per root.
//!
//! # Strong vs. weak edges
//!
//! A strong edge keeps its target alive. Auto-wired dependency edges use
//! [`Controller::subscribe_weak`] instead, because a dependency must not
//! keep its dependents alive merely because something once read it; a dead
//! weak edge is pruned the next time a traversal encounters it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::{BoxError, PropagationError};
use crate::runtime::Runtime;
use super::node::{Node, NodeId, Subscription};

/// Hook signature for [`Controller::set_on_activate`].
///
/// The hook receives a handle to its own controller, so it can re-subscribe
/// or re-activate without capturing a strong reference cycle.
type HookFn = Box<dyn FnMut(&Controller, &mut Runtime) -> Result<(), BoxError>>;

/// The hook lives behind its own shared cell so a running hook may replace
/// itself through [`Controller::set_on_activate`] without aliasing the slot.
type HookSlot = Rc<RefCell<HookFn>>;

struct ControllerInner {
    id: NodeId,
    label: Option<&'static str>,
    /// Downstream edges in insertion order, de-duplicated by node id.
    downstream: RefCell<Vec<Subscription>>,
    /// Upstream controllers subscribed to during the last evaluation;
    /// replaced wholesale by scope collection.
    dependencies: RefCell<Vec<Controller>>,
    on_activate: RefCell<Option<HookSlot>>,
}

/// A graph node owning downstream subscribers and upstream dependencies.
///
/// Cloning a `Controller` yields another handle to the same node.
///
/// # Example
///
/// ```rust,ignore
/// let mut rt = Runtime::new();
/// let counter = Controller::with_label("counter");
///
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let log_in = log.clone();
/// counter.subscribe(Reactor::new(move |_| log_in.borrow_mut().push("fired")));
///
/// counter.activate(&mut rt)?;
/// assert_eq!(*log.borrow(), vec!["fired"]);
/// ```
#[derive(Clone)]
pub struct Controller {
    inner: Rc<ControllerInner>,
}

impl Controller {
    /// Create a new controller with no edges and no hook.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a labeled controller; the label shows up in traces and errors.
    pub fn with_label(label: &'static str) -> Self {
        Self::build(Some(label))
    }

    fn build(label: Option<&'static str>) -> Self {
        Self {
            inner: Rc::new(ControllerInner {
                id: NodeId::new(),
                label,
                downstream: RefCell::new(Vec::new()),
                dependencies: RefCell::new(Vec::new()),
                on_activate: RefCell::new(None),
            }),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Propagate a state change from this node.
    ///
    /// Expands the subgraph reachable from here into an activation chain and
    /// drains it in topological order. A call made while a chain is already
    /// draining merges into that chain instead of starting a second one; a
    /// call made while the runtime is suspended is a no-op.
    ///
    /// Activation is not transactional: on error, nodes that already ran
    /// stay ran.
    pub fn activate(&self, rt: &mut Runtime) -> Result<(), PropagationError> {
        rt.trigger(self)
    }

    /// Append a strongly-held downstream edge, unless one to the same node
    /// already exists.
    ///
    /// The edge keeps `node` alive; prefer [`Controller::subscribe_weak`]
    /// for edges derived from dependency collection.
    pub fn subscribe(&self, node: impl Into<Node>) {
        let node = node.into();
        let mut downstream = self.inner.downstream.borrow_mut();
        if !Self::contains(&downstream, node.id()) {
            trace!(controller = %self.describe(), node = %node.describe(), "subscribe");
            downstream.push(Subscription::Strong(node));
        }
    }

    /// Append a weakly-held downstream edge, unless one to the same node
    /// already exists.
    ///
    /// The edge does not keep `node` alive; once every strong handle to it
    /// is dropped, the edge is treated as absent and pruned by the next
    /// traversal.
    pub fn subscribe_weak(&self, node: impl Into<Node>) {
        let node = node.into();
        let mut downstream = self.inner.downstream.borrow_mut();
        if !Self::contains(&downstream, node.id()) {
            trace!(controller = %self.describe(), node = %node.describe(), "subscribe weak");
            downstream.push(Subscription::Weak(node.downgrade()));
        }
    }

    /// Remove the downstream edge to `node`, if present.
    pub fn unsubscribe(&self, node: impl Into<Node>) {
        self.unsubscribe_id(node.into().id());
    }

    pub(crate) fn unsubscribe_id(&self, id: NodeId) {
        let mut downstream = self.inner.downstream.borrow_mut();
        if let Some(position) = downstream.iter().position(|entry| entry.id() == id) {
            trace!(controller = %self.describe(), node = id.raw(), "unsubscribe");
            downstream.remove(position);
        }
    }

    /// Remove every downstream edge.
    pub fn unsubscribe_all(&self) {
        self.inner.downstream.borrow_mut().clear();
    }

    /// Live downstream nodes in insertion order; dead weak edges are
    /// skipped.
    pub fn downstream(&self) -> Vec<Node> {
        self.inner
            .downstream
            .borrow()
            .iter()
            .filter_map(Subscription::resolve)
            .collect()
    }

    /// Upstream controllers recorded by the last scope collection.
    pub fn dependencies(&self) -> Vec<Controller> {
        self.inner.dependencies.borrow().clone()
    }

    pub(crate) fn take_dependencies(&self) -> Vec<Controller> {
        std::mem::take(&mut *self.inner.dependencies.borrow_mut())
    }

    pub(crate) fn set_dependencies(&self, dependencies: Vec<Controller>) {
        *self.inner.dependencies.borrow_mut() = dependencies;
    }

    /// Install the on-activate hook, replacing any previous one.
    ///
    /// The hook runs when this node drains, before its downstream nodes do.
    /// A returned error aborts the chain and surfaces from `activate` as a
    /// `PropagationError::Hook`.
    pub fn set_on_activate(
        &self,
        hook: impl FnMut(&Controller, &mut Runtime) -> Result<(), BoxError> + 'static,
    ) {
        *self.inner.on_activate.borrow_mut() = Some(Rc::new(RefCell::new(Box::new(hook))));
    }

    /// Run the hook if one is installed.
    ///
    /// The slot is cloned out before the call, so the hook may call
    /// `set_on_activate` on its own controller without hitting the borrow.
    pub(crate) fn run_on_activate(&self, rt: &mut Runtime) -> Result<(), BoxError> {
        let hook = self.inner.on_activate.borrow().clone();
        match hook {
            Some(slot) => (slot.borrow_mut())(self, rt),
            None => Ok(()),
        }
    }

    /// Resolve downstream edges for graph expansion, pruning entries whose
    /// weak target is gone.
    pub(crate) fn resolve_downstream(&self) -> Vec<Node> {
        let mut downstream = self.inner.downstream.borrow_mut();
        let before = downstream.len();
        let mut resolved = Vec::with_capacity(before);
        downstream.retain(|entry| match entry.resolve() {
            Some(node) => {
                resolved.push(node);
                true
            }
            None => false,
        });
        if downstream.len() < before {
            trace!(
                controller = %self.describe(),
                pruned = before - downstream.len(),
                "pruned dead weak edges"
            );
        }
        resolved
    }

    pub(crate) fn describe(&self) -> String {
        match self.inner.label {
            Some(label) => label.to_string(),
            None => format!("controller#{}", self.inner.id.raw()),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakController {
        WeakController {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn contains(downstream: &[Subscription], id: NodeId) -> bool {
        downstream.iter().any(|entry| entry.id() == id)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("downstream", &self.downstream().len())
            .field("dependencies", &self.inner.dependencies.borrow().len())
            .finish()
    }
}

/// Weak counterpart of [`Controller`].
#[derive(Clone)]
pub(crate) struct WeakController {
    id: NodeId,
    inner: Weak<ControllerInner>,
}

impl WeakController {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn upgrade(&self) -> Option<Controller> {
        self.inner.upgrade().map(|inner| Controller { inner })
    }
}

/// Anything that owns a [`Controller`] can be subscribed, collected, or
/// registered directly.
///
/// Adapter types (reactive functions, properties, containers) implement
/// this to plug into the core without exposing their internals.
pub trait Reactive {
    /// The controller backing this reactive unit.
    fn controller(&self) -> &Controller;
}

impl Reactive for Controller {
    fn controller(&self) -> &Controller {
        self
    }
}

/// Any reactive unit converts to a graph node through its controller, so
/// adapter types subscribe directly: `source.subscribe(&widget)`.
impl<T: Reactive> From<&T> for Node {
    fn from(reactive: &T) -> Self {
        Node::Controller(reactive.controller().clone())
    }
}
