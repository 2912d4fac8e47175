//! Propagation Graph
//!
//! This module implements the dependency graph and its burst scheduler.
//!
//! # Concepts
//!
//! ## Nodes
//!
//! A [`Node`] is either a [`Reactor`] (a plain leaf callback) or a
//! [`Controller`], which owns downstream edges of its own plus an optional
//! on-activate hook. Nodes are cheap cloneable handles identified by
//! [`NodeId`].
//!
//! ## Edges
//!
//! A controller's downstream list is an ordered, de-duplicated edge list.
//! Each entry is held strongly or weakly; weak edges vanish once their
//! target is dropped. Edges are pure data; nothing invokes them directly.
//!
//! ## Chains
//!
//! Activating a controller expands its reachable subgraph into a `Chain`,
//! which drains nodes in topological order, one at a time, consolidating
//! any re-entrant activations raised along the way into the same order.

mod chain;
mod controller;
mod node;

pub(crate) use chain::Chain;
pub use controller::{Controller, Reactive};
pub use node::{Node, NodeId, Reactor};
