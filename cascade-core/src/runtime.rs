//! Propagation Runtime
//!
//! [`Runtime`] is the context object every propagation-facing call threads
//! through: it owns the in-flight activation chain, the suspension depth,
//! and the scope collector stack. There are no process-wide singletons.
//! Isolated runtimes can coexist (one per test, say), and the `Rc`-based
//! node handles keep each one confined to a single thread.
//!
//! # Activation
//!
//! `Controller::activate` lands in `Runtime::trigger`. The first trigger
//! creates a chain, expands the root's subgraph into it, and drains it to
//! completion before returning. A trigger raised while draining, as when a
//! reactor itself mutates state, merges into the in-flight chain and returns
//! immediately, so a burst started inside a reactor joins the outer burst's
//! total order instead of racing or duplicating it.
//!
//! # Suspension
//!
//! [`Runtime::suspend`] makes activation a no-op for a closure's dynamic
//! extent. Suspension nests; it is how several mutations are batched
//! without intermediate notifications.

use std::fmt;

use tracing::{debug, trace};

use crate::error::PropagationError;
use crate::graph::{Chain, Controller, Node};

/// The propagation context: in-flight chain, suspension depth, and the
/// scope collector stack.
///
/// # Example
///
/// ```rust,ignore
/// let mut rt = Runtime::new();
/// let source = Controller::new();
/// source.subscribe(Reactor::new(|_| println!("notified")));
/// source.activate(&mut rt)?;
/// ```
pub struct Runtime {
    chain: Option<Chain>,
    suspended: u32,
    pub(crate) collectors: Vec<Option<Vec<Controller>>>,
}

impl Runtime {
    /// Create an idle runtime.
    pub fn new() -> Self {
        Self {
            chain: None,
            suspended: 0,
            collectors: Vec::new(),
        }
    }

    /// True while a [`Runtime::suspend`] closure is on the stack.
    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }

    /// True while an activation chain is draining.
    pub fn is_draining(&self) -> bool {
        self.chain.is_some()
    }

    /// Suppress activation for the extent of `f`.
    ///
    /// Nested calls stack; propagation resumes once the outermost suspend
    /// returns. Suppressed activations are dropped, not queued.
    pub fn suspend<T>(&mut self, f: impl FnOnce(&mut Runtime) -> T) -> T {
        self.suspended += 1;
        let guard = SuspendGuard { rt: self };
        f(guard.rt)
    }

    /// Activation entry point; `Controller::activate` delegates here.
    pub(crate) fn trigger(&mut self, root: &Controller) -> Result<(), PropagationError> {
        if self.suspended > 0 {
            trace!(root = %root.describe(), "activation suppressed");
            return Ok(());
        }

        if let Some(chain) = self.chain.as_mut() {
            // Re-entrant call: consolidate into the in-flight chain. When
            // the root is the node currently executing, only its downstream
            // merges, so a hook activating its own controller cannot loop.
            let include_root = chain.current_id() != Some(root.id());
            chain.merge(root, include_root);
            return Ok(());
        }

        debug!(root = %root.describe(), "activation chain started");
        let mut chain = Chain::new();
        chain.merge(root, true);
        self.chain = Some(chain);
        self.drain()
    }

    fn drain(&mut self) -> Result<(), PropagationError> {
        let mut guard = DrainGuard { rt: &mut *self };
        let result = guard.run();
        let drained = guard.rt.chain.as_ref().map_or(0, Chain::drained);
        drop(guard);
        debug!(drained, success = result.is_ok(), "activation chain finished");
        result
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("draining", &self.chain.is_some())
            .field("suspended", &self.suspended)
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

/// Clears the chain slot when the drain loop exits, on the error and panic
/// paths included, so the runtime stays usable afterward.
struct DrainGuard<'a> {
    rt: &'a mut Runtime,
}

impl DrainGuard<'_> {
    fn run(&mut self) -> Result<(), PropagationError> {
        loop {
            // The chain borrow ends before the node runs; callbacks get the
            // whole runtime and may trigger merges of their own.
            let next = match self.rt.chain.as_mut() {
                Some(chain) => chain.next_node()?,
                None => None,
            };
            let Some(node) = next else { return Ok(()) };
            match node {
                Node::Controller(controller) => {
                    controller
                        .run_on_activate(self.rt)
                        .map_err(|source| PropagationError::Hook {
                            node: controller.describe(),
                            source,
                        })?;
                }
                Node::Reactor(reactor) => {
                    reactor
                        .invoke(self.rt)
                        .map_err(|source| PropagationError::Reactor {
                            node: reactor.describe(),
                            source,
                        })?;
                }
            }
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.rt.chain = None;
    }
}

/// Decrements the suspension depth on drop.
struct SuspendGuard<'a> {
    rt: &'a mut Runtime,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.rt.suspended -= 1;
    }
}
