//! Test Support
//!
//! Small fixtures shared by the crate's own tests and exported for
//! downstream ones. [`CountingReactor`] is the workhorse: a reactor that
//! does nothing but count how often it fired.

use std::cell::Cell;
use std::rc::Rc;

use crate::graph::{Node, Reactor};

/// A reactor that counts its activations.
///
/// Cloning shares the counter, so a handle kept by the test observes
/// invocations of the subscribed copy.
#[derive(Clone)]
pub struct CountingReactor {
    reactor: Reactor,
    count: Rc<Cell<u64>>,
}

impl CountingReactor {
    pub fn new() -> Self {
        let count = Rc::new(Cell::new(0));
        let tally = count.clone();
        let reactor = Reactor::new(move |_| tally.set(tally.get() + 1));
        Self { reactor, count }
    }

    pub fn with_label(label: &'static str) -> Self {
        let count = Rc::new(Cell::new(0));
        let tally = count.clone();
        let reactor = Reactor::with_label(label, move |_| tally.set(tally.get() + 1));
        Self { reactor, count }
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// How many times the reactor has fired.
    pub fn count(&self) -> u64 {
        self.count.get()
    }

    /// Assert the reactor fired exactly `expected` times.
    pub fn expect(&self, expected: u64) {
        assert_eq!(
            self.count(),
            expected,
            "{} fired {} time(s), expected {}",
            self.reactor.describe(),
            self.count(),
            expected,
        );
    }
}

impl Default for CountingReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&CountingReactor> for Node {
    fn from(counting: &CountingReactor) -> Self {
        Node::from(&counting.reactor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Controller;
    use crate::runtime::Runtime;

    #[test]
    fn counts_activations() {
        let mut rt = Runtime::new();
        let source = Controller::new();
        let counter = CountingReactor::new();
        source.subscribe(&counter);

        counter.expect(0);
        source.activate(&mut rt).unwrap();
        source.activate(&mut rt).unwrap();
        counter.expect(2);
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn clones_share_the_tally() {
        let mut rt = Runtime::new();
        let source = Controller::new();
        let counter = CountingReactor::with_label("shared");
        let observer = counter.clone();
        source.subscribe(&counter);

        source.activate(&mut rt).unwrap();
        observer.expect(1);
    }
}
