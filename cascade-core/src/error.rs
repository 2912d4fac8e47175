//! Error Types
//!
//! Two things can abort an activation: the expanded edge graph turns out to
//! be cyclic, or a user callback fails while the chain drains. Both surface
//! as [`PropagationError`] from `Controller::activate`. A dead weak edge is
//! never an error; it is pruned silently during traversal.
//!
//! Activation is not transactional: when a drain aborts, nodes that already
//! ran stay ran. No rollback is attempted.

use thiserror::Error;

/// Boxed error returned by reactor callbacks and on-activate hooks.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// The edge graph of an activation chain is not acyclic.
///
/// Raised before any node of the offending merge runs, so a cyclic
/// activation has no side effects.
#[derive(Error, Debug)]
#[error("dependency cycle detected, {} node(s) can never unblock: {}", .blocked.len(), .blocked.join(", "))]
pub struct CycleError {
    blocked: Vec<String>,
}

impl CycleError {
    pub(crate) fn new(blocked: Vec<String>) -> Self {
        Self { blocked }
    }

    /// Labels of the nodes that could not be scheduled.
    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }
}

/// Error surfaced by `Controller::activate` when a drain aborts.
#[derive(Error, Debug)]
pub enum PropagationError {
    /// The chain's edge graph contained a cycle.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A reactor callback failed; the rest of the chain did not run.
    #[error("reactor {node} failed during propagation: {source}")]
    Reactor {
        /// Label of the failing node.
        node: String,
        /// The callback's error.
        source: BoxError,
    },

    /// An on-activate hook failed; the rest of the chain did not run.
    #[error("on-activate hook of {node} failed during propagation: {source}")]
    Hook {
        /// Label of the failing node.
        node: String,
        /// The hook's error.
        source: BoxError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_blocked_nodes() {
        let err = CycleError::new(vec!["a".into(), "b".into()]);
        assert_eq!(err.blocked(), &["a".to_string(), "b".to_string()]);
        let message = err.to_string();
        assert!(message.contains("2 node(s)"));
        assert!(message.contains("a, b"));
    }

    #[test]
    fn propagation_error_wraps_cycle() {
        let err = PropagationError::from(CycleError::new(vec!["x".into()]));
        assert!(matches!(err, PropagationError::Cycle(_)));
    }

    #[test]
    fn reactor_error_names_the_node() {
        let source: BoxError = "boom".into();
        let err = PropagationError::Reactor {
            node: "counter".into(),
            source,
        };
        let message = err.to_string();
        assert!(message.contains("counter"));
        assert!(message.contains("boom"));
    }
}
