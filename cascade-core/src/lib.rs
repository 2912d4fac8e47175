//! Cascade Core
//!
//! This crate provides the core propagation engine for the Cascade
//! reactive runtime. It implements:
//!
//! - Reactive nodes (controllers and reactors) and their subscriptions
//! - Ordered activation chains with re-entrant merge consolidation
//! - Automatic dependency wiring through scoped collection
//! - Cycle detection ahead of execution
//!
//! State changes enter through [`Controller::activate`]; the runtime
//! expands everything downstream into a chain and drains it in dependency
//! order, running each node at most once per burst. Triggers raised while
//! a chain is draining merge into it, so nested activity stays inside one
//! consolidated, duplicate-free pass.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Nodes, subscriptions, and the activation chain scheduler
//! - `runtime`: The propagation context for triggering, draining, suspension
//! - `error`: Failure taxonomy for propagation
//! - `testing`: Reusable fixtures for downstream test suites
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::{Controller, Reactor, Runtime};
//!
//! let mut rt = Runtime::new();
//!
//! // A controller fronts a piece of state.
//! let celsius = Controller::with_label("celsius");
//!
//! // Reactors run whenever something upstream activates.
//! celsius.subscribe(Reactor::new(|_| println!("temperature changed")));
//!
//! // Announce a change; every subscriber downstream runs once.
//! celsius.activate(&mut rt)?;
//! ```

pub mod error;
pub mod graph;
pub mod runtime;
mod scope;
pub mod testing;

pub use error::{BoxError, CycleError, PropagationError};
pub use graph::{Controller, Node, NodeId, Reactive, Reactor};
pub use runtime::Runtime;
