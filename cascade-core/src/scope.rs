//! Dependency Scopes
//!
//! Scope collection is how auto-wiring happens: a computation evaluates
//! inside [`Runtime::collect`], every reactive read inside reports itself
//! via [`Runtime::register`], and on the way out the dependent is weakly
//! subscribed to exactly the controllers it touched, after dropping
//! whatever it was subscribed to before. Each evaluation rebuilds the
//! subscription set from scratch, so a computation whose branching stops
//! reading a dependency loses that edge on its next run.
//!
//! # Nesting
//!
//! Frames nest, and attribution goes to the innermost active collector
//! only. The dependent itself registers one level up before its own frame
//! opens, so a computation evaluated inside another computation becomes a
//! dependency of the outer one. [`Runtime::untracked`] pushes a masking
//! frame for reads that must stay invisible to every enclosing scope.

use std::collections::HashSet;
use std::mem::ManuallyDrop;

use tracing::trace;

use crate::graph::{Controller, NodeId};
use crate::runtime::Runtime;

impl Runtime {
    /// Evaluate `evaluate` while collecting the controllers it reads, then
    /// rewire `dependent` to subscribe weakly to exactly that set.
    ///
    /// Repeated reads of one controller collapse to a single edge. The
    /// collected controllers are stored on `dependent` as its dependency
    /// list, replacing (and unsubscribing) the previous one.
    pub fn collect<T>(
        &mut self,
        dependent: &Controller,
        evaluate: impl FnOnce(&mut Runtime) -> T,
    ) -> T {
        for dependency in dependent.take_dependencies() {
            dependency.unsubscribe_id(dependent.id());
        }
        // Report the dependent to any enclosing scope before its own frame
        // opens, so nested computations chain outward.
        self.register(dependent);

        let frame = FrameGuard::push(self, Some(Vec::new()));
        let value = evaluate(frame.rt);
        let collected = frame.finish().unwrap_or_default();

        let mut seen: HashSet<NodeId> = HashSet::with_capacity(collected.len());
        let mut dependencies: Vec<Controller> = Vec::with_capacity(collected.len());
        for dependency in collected {
            if seen.insert(dependency.id()) {
                dependencies.push(dependency);
            }
        }
        for dependency in &dependencies {
            dependency.subscribe_weak(dependent);
        }
        trace!(
            dependent = %dependent.describe(),
            count = dependencies.len(),
            "dependencies collected"
        );
        dependent.set_dependencies(dependencies);
        value
    }

    /// Report `controller` as read to the innermost active collector.
    ///
    /// A no-op outside any [`Runtime::collect`] call and inside
    /// [`Runtime::untracked`].
    pub fn register(&mut self, controller: &Controller) {
        if let Some(Some(frame)) = self.collectors.last_mut() {
            frame.push(controller.clone());
        }
    }

    /// Evaluate `f` without attributing reads to any enclosing scope.
    pub fn untracked<T>(&mut self, f: impl FnOnce(&mut Runtime) -> T) -> T {
        let frame = FrameGuard::push(self, None);
        let value = f(frame.rt);
        frame.finish();
        value
    }
}

/// Pops its collector frame on drop, so a panicking evaluation cannot
/// leave the stack unbalanced.
struct FrameGuard<'a> {
    rt: &'a mut Runtime,
}

impl<'a> FrameGuard<'a> {
    fn push(rt: &'a mut Runtime, frame: Option<Vec<Controller>>) -> Self {
        rt.collectors.push(frame);
        Self { rt }
    }

    /// Pop the frame without running `Drop`, handing back its contents.
    fn finish(self) -> Option<Vec<Controller>> {
        let mut guard = ManuallyDrop::new(self);
        guard.rt.collectors.pop().flatten()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.rt.collectors.pop();
    }
}
