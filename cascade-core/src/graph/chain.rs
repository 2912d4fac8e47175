//! Activation Chains
//!
//! A chain is the ephemeral scheduling state for one activation burst: the
//! expanded edge graph (target → pending sources), a registry of scheduled
//! nodes, and a ready queue ordered by batch-path keys. It exists only
//! while the runtime drains it.
//!
//! # Expansion
//!
//! [`Chain::merge`] walks the subgraph reachable from the activation root
//! with an explicit stack in depth-first pre-order, registering every node
//! it reaches and recording one edge per (source, target) pair per pass.
//! Weak downstream edges are resolved during the walk; dead ones are pruned
//! on the spot and contribute nothing. A per-pass visited set keeps the
//! walk finite on cyclic subscription graphs while still recording the
//! closing edge, so the cycle is caught by the acyclicity check instead of
//! hanging the expansion.
//!
//! # Draining
//!
//! A node is ready once its pending source list is empty. [`Chain::next_node`]
//! pops the minimal ready key, removes the node from the graph (as a key and
//! as a source in every remaining adjacency list), and enqueues targets that
//! become unblocked. Consumed nodes leave the graph immediately, which keeps
//! later re-sorts bounded by the remaining subgraph.
//!
//! # Re-entrant merges
//!
//! `merge` may be called while a node is executing, as when a reactor
//! activates another controller mid-drain. The merged subgraph joins the
//! same chain under a batch key derived from the executing node's key, which
//! makes the nested burst drain to completion before the outer chain's
//! remaining nodes resume, and makes two merges from the same node drain in
//! call order. Within one batch, keys fall back to readiness ranks: the
//! classic FIFO tie-break of Kahn's algorithm.
//!
//! # Cycle detection
//!
//! Every merge marks the graph dirty; the next pop first runs a Kahn count
//! simulation over the remaining edges and fails with [`CycleError`] if some
//! node can never unblock. The check runs before anything from the offending
//! merge executes, so a cyclic burst aborts without side effects.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::error::CycleError;
use super::controller::Controller;
use super::node::{Node, NodeId};

/// Lexicographic sort key: a batch path with the node's readiness rank
/// appended. A prefix sorts before its extensions, so nested batches drain
/// before the rest of their parent batch.
type SortKey = SmallVec<[u64; 6]>;

/// Pending sources for one target. May hold duplicates when repeated merges
/// re-record an edge; draining the source removes every occurrence at once.
type Sources = SmallVec<[NodeId; 4]>;

/// A node registered in the chain, waiting to drain.
struct Scheduled {
    node: Node,
    /// Batch path of the merge generation that scheduled this node.
    batch: SortKey,
    /// Rank assigned when the node first becomes ready; kept across
    /// re-blocking so the order stays deterministic.
    rank: Option<u64>,
}

/// Scheduling state for one activation burst.
pub(crate) struct Chain {
    /// target → sources not yet drained. Keys are exactly the scheduled set.
    edges: IndexMap<NodeId, Sources>,
    scheduled: HashMap<NodeId, Scheduled>,
    /// Min-heap of (key, id). Entries go stale when their node drains or
    /// re-blocks; stale entries are skipped on pop.
    ready: BinaryHeap<Reverse<(SortKey, NodeId)>>,
    /// The node currently executing, with its sort key. Batch paths of
    /// re-entrant merges derive from it.
    current: Option<(NodeId, SortKey)>,
    /// Merges performed while `current` executes.
    merge_calls: u64,
    /// Readiness counter; FIFO tie-break within a batch.
    next_rank: u64,
    /// Edges changed since the last acyclicity check.
    dirty: bool,
    drained: u64,
}

impl Chain {
    pub(crate) fn new() -> Self {
        Self {
            edges: IndexMap::new(),
            scheduled: HashMap::new(),
            ready: BinaryHeap::new(),
            current: None,
            merge_calls: 0,
            next_rank: 0,
            dirty: false,
            drained: 0,
        }
    }

    /// Id of the node currently executing, if any.
    pub(crate) fn current_id(&self) -> Option<NodeId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    /// Nodes drained so far.
    pub(crate) fn drained(&self) -> u64 {
        self.drained
    }

    /// Expand the subgraph reachable from `root` into the chain.
    ///
    /// With `include_root` the root itself registers as a schedulable node
    /// with no inbound edge from this pass. Without it only the root's
    /// downstream joins, each as a batch root; that is the self-activation
    /// path, where the executing node's own hook must not re-run.
    pub(crate) fn merge(&mut self, root: &Controller, include_root: bool) {
        let batch: SortKey = match &self.current {
            Some((_, key)) => {
                self.merge_calls += 1;
                let mut batch = key.clone();
                batch.push(self.merge_calls);
                batch
            }
            None => SortKey::new(),
        };

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut added: Vec<NodeId> = Vec::new();
        let mut stack: Vec<(Option<NodeId>, Node)> = Vec::new();

        if include_root {
            stack.push((None, Node::Controller(root.clone())));
        } else {
            visited.insert(root.id());
            for child in root.resolve_downstream().into_iter().rev() {
                stack.push((None, child));
            }
        }

        while let Some((source, node)) = stack.pop() {
            let id = node.id();
            if !self.scheduled.contains_key(&id) {
                self.scheduled.insert(
                    id,
                    Scheduled {
                        node: node.clone(),
                        batch: batch.clone(),
                        rank: None,
                    },
                );
                self.edges.entry(id).or_default();
                added.push(id);
            }
            if let Some(source) = source {
                self.edges.entry(id).or_default().push(source);
            }
            if visited.insert(id) {
                if let Node::Controller(controller) = &node {
                    // Children pushed in reverse so they pop in insertion
                    // order: depth-first pre-order overall.
                    for child in controller.resolve_downstream().into_iter().rev() {
                        stack.push((Some(id), child));
                    }
                }
            }
        }

        // Nodes registered by this pass with no pending sources become
        // ready now, in discovery order.
        for id in added {
            if self.edges.get(&id).is_some_and(|sources| sources.is_empty()) {
                self.enqueue(id);
            }
        }

        self.dirty = true;
        trace!(
            root = %root.describe(),
            include_root,
            pending = self.scheduled.len(),
            "merged activation into chain"
        );
    }

    /// Pop the next node in order, removing it from the graph and marking it
    /// as the currently-executing node. Returns `None` once the chain is
    /// fully drained.
    pub(crate) fn next_node(&mut self) -> Result<Option<Node>, CycleError> {
        self.current = None;
        self.merge_calls = 0;

        if self.dirty {
            self.ensure_acyclic()?;
            self.dirty = false;
        }

        while let Some(Reverse((key, id))) = self.ready.pop() {
            let blocked = self
                .edges
                .get(&id)
                .is_some_and(|sources| !sources.is_empty());
            if blocked {
                // Re-blocked by a later merge; re-enqueued when its new
                // sources drain.
                continue;
            }
            let Some(entry) = self.scheduled.remove(&id) else {
                // Stale heap entry: the node already drained.
                continue;
            };

            self.edges.shift_remove(&id);

            // Unblock targets: drop this node from every remaining source
            // list. Targets whose list empties become ready.
            let mut unblocked: Vec<NodeId> = Vec::new();
            for (&target, sources) in self.edges.iter_mut() {
                if sources.is_empty() {
                    continue;
                }
                sources.retain(|source| *source != id);
                if sources.is_empty() {
                    unblocked.push(target);
                }
            }
            for target in unblocked {
                self.enqueue(target);
            }

            self.drained += 1;
            trace!(node = %entry.node.describe(), "drain");
            self.current = Some((id, key));
            return Ok(Some(entry.node));
        }

        // The ready queue is exhausted. Anything still scheduled can never
        // unblock, which the dirty-check should have caught already.
        if !self.scheduled.is_empty() {
            self.ensure_acyclic()?;
        }
        Ok(None)
    }

    fn enqueue(&mut self, id: NodeId) {
        if let Some(entry) = self.scheduled.get_mut(&id) {
            let rank = match entry.rank {
                Some(rank) => rank,
                None => {
                    self.next_rank += 1;
                    entry.rank = Some(self.next_rank);
                    self.next_rank
                }
            };
            let mut key = entry.batch.clone();
            key.push(rank);
            self.ready.push(Reverse((key, id)));
        }
    }

    /// Kahn count simulation over the remaining graph; errors if some node
    /// can never unblock.
    fn ensure_acyclic(&self) -> Result<(), CycleError> {
        let mut degree: HashMap<NodeId, usize> = HashMap::with_capacity(self.edges.len());
        let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        for (&target, sources) in self.edges.iter() {
            degree.insert(target, sources.len());
            if sources.is_empty() {
                queue.push_back(target);
            }
            for &source in sources {
                outgoing.entry(source).or_default().push(target);
            }
        }

        let mut remaining = self.edges.len();
        while let Some(id) = queue.pop_front() {
            remaining -= 1;
            if let Some(targets) = outgoing.get(&id) {
                for &target in targets {
                    if let Some(count) = degree.get_mut(&target) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(target);
                        }
                    }
                }
            }
        }

        if remaining > 0 {
            // Nodes whose simulated in-degree never reached zero are the
            // cycle members plus everything downstream of them.
            let blocked: Vec<String> = self
                .edges
                .iter()
                .filter(|(target, _)| degree.get(*target).is_some_and(|count| *count > 0))
                .filter_map(|(target, _)| {
                    self.scheduled.get(target).map(|entry| entry.node.describe())
                })
                .collect();
            warn!(blocked = blocked.len(), "cycle detected in activation chain");
            return Err(CycleError::new(blocked));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("pending", &self.scheduled.len())
            .field("drained", &self.drained)
            .field("current", &self.current_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::graph::node::Reactor;
    use crate::runtime::Runtime;

    /// Drain the chain to completion the way the runtime does, recording
    /// nothing; node callbacks and hooks do the observing.
    fn drain(chain: &mut Chain, rt: &mut Runtime) {
        loop {
            match chain.next_node().unwrap() {
                None => break,
                Some(Node::Controller(controller)) => {
                    controller.run_on_activate(rt).unwrap();
                }
                Some(Node::Reactor(reactor)) => {
                    reactor.invoke(rt).unwrap();
                }
            }
        }
    }

    fn logging_controller(label: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Controller {
        let controller = Controller::with_label(label);
        let log = log.clone();
        controller.set_on_activate(move |_, _| {
            log.borrow_mut().push(label);
            Ok(())
        });
        controller
    }

    #[test]
    fn linear_chain_drains_in_order() {
        let mut rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = logging_controller("a", &log);
        let b = logging_controller("b", &log);
        let c = logging_controller("c", &log);
        a.subscribe(&b);
        b.subscribe(&c);

        let mut chain = Chain::new();
        chain.merge(&a, true);
        drain(&mut chain, &mut rt);

        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_drains_shared_node_once_in_fifo_order() {
        let mut rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        // a fans out to b and c; b feeds ba, c feeds ca; both feed d.
        let a = logging_controller("a", &log);
        let b = logging_controller("b", &log);
        let c = logging_controller("c", &log);
        let ba = logging_controller("ba", &log);
        let ca = logging_controller("ca", &log);
        let d = logging_controller("d", &log);
        a.subscribe(&b);
        a.subscribe(&c);
        b.subscribe(&ba);
        c.subscribe(&ca);
        ba.subscribe(&d);
        ca.subscribe(&d);

        let mut chain = Chain::new();
        chain.merge(&a, true);
        drain(&mut chain, &mut rt);

        assert_eq!(*log.borrow(), vec!["a", "b", "c", "ba", "ca", "d"]);
    }

    #[test]
    fn merge_mid_drain_runs_nested_batch_first() {
        let mut rt = Runtime::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let a = logging_controller("a", &log);
        let log_ra = log.clone();
        let ra = Reactor::with_label("ra", move |_| log_ra.borrow_mut().push("ra"));
        let log_rb = log.clone();
        let rb = Reactor::with_label("rb", move |_| log_rb.borrow_mut().push("rb"));
        a.subscribe(&ra);
        a.subscribe(&rb);

        let d = logging_controller("d", &log);
        let log_rd = log.clone();
        d.subscribe(Reactor::new(move |_| log_rd.borrow_mut().push("rd")));

        let mut chain = Chain::new();
        chain.merge(&a, true);

        // Drive the drain by hand, merging d's subgraph while ra executes.
        loop {
            match chain.next_node().unwrap() {
                None => break,
                Some(Node::Controller(controller)) => {
                    controller.run_on_activate(&mut rt).unwrap();
                }
                Some(Node::Reactor(reactor)) => {
                    let is_ra = reactor.id() == ra.id();
                    reactor.invoke(&mut rt).unwrap();
                    if is_ra {
                        chain.merge(&d, true);
                    }
                }
            }
        }

        // The nested batch (d, rd) preempts rb, which was already ready.
        assert_eq!(*log.borrow(), vec!["a", "ra", "d", "rd", "rb"]);
    }

    #[test]
    fn sibling_merges_drain_in_call_order() {
        let mut rt = Runtime::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let a = logging_controller("a", &log);
        let first = logging_controller("first", &log);
        let second = logging_controller("second", &log);

        let mut chain = Chain::new();
        chain.merge(&a, true);

        loop {
            match chain.next_node().unwrap() {
                None => break,
                Some(Node::Controller(controller)) => {
                    let is_a = controller.id() == a.id();
                    controller.run_on_activate(&mut rt).unwrap();
                    if is_a {
                        chain.merge(&first, true);
                        chain.merge(&second, true);
                    }
                }
                Some(Node::Reactor(reactor)) => reactor.invoke(&mut rt).unwrap(),
            }
        }

        assert_eq!(*log.borrow(), vec!["a", "first", "second"]);
    }

    #[test]
    fn cycle_fails_before_any_node_runs() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = logging_controller("a", &log);
        let b = logging_controller("b", &log);
        a.subscribe(&b);
        b.subscribe(&a);

        let mut chain = Chain::new();
        chain.merge(&a, true);

        let err = chain.next_node().unwrap_err();
        assert_eq!(err.blocked().len(), 2);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn dead_weak_edge_contributes_nothing() {
        let mut rt = Runtime::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let a = logging_controller("a", &log);
        let log_keep = log.clone();
        let keep = Reactor::new(move |_| log_keep.borrow_mut().push("keep"));
        let lose = Reactor::new(|_| panic!("dead edge must not run"));
        a.subscribe_weak(&lose);
        a.subscribe(&keep);
        drop(lose);

        let mut chain = Chain::new();
        chain.merge(&a, true);
        drain(&mut chain, &mut rt);

        assert_eq!(*log.borrow(), vec!["a", "keep"]);
    }

    #[test]
    fn remerged_root_runs_again_after_draining() {
        let mut rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = logging_controller("a", &log);

        let mut chain = Chain::new();
        chain.merge(&a, true);
        drain(&mut chain, &mut rt);
        assert_eq!(*log.borrow(), vec!["a"]);

        // A fresh merge schedules the node anew.
        chain.merge(&a, true);
        drain(&mut chain, &mut rt);
        assert_eq!(*log.borrow(), vec!["a", "a"]);
    }

    #[test]
    fn merge_without_root_skips_the_roots_hook() {
        let mut rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = logging_controller("a", &log);
        let child = logging_controller("child", &log);
        a.subscribe(&child);

        let mut chain = Chain::new();
        chain.merge(&a, false);
        drain(&mut chain, &mut rt);

        assert_eq!(*log.borrow(), vec!["child"]);
    }
}
