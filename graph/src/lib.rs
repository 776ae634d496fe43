// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

mod entry;
mod node;

use crate::entry::Entry;

pub use crate::node::{EntryId, Level, Node};
pub use petgraph::Direction;

use fixedbitset::FixedBitSet;
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use log::{debug, info};
use parking_lot::Mutex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{VisitMap, Visitable};

// Edges point from a Node to the Nodes it depends on: a walk in the Outgoing direction
// visits dependencies, and a walk in the Incoming direction visits dependents.
type PGraph<N> = StableDiGraph<Entry<N>, (), u32>;

type Nodes<N> = HashMap<N, EntryId>;

struct InnerGraph<N: Node> {
    nodes: Nodes<N>,
    pg: PGraph<N>,
}

impl<N: Node> InnerGraph<N> {
    fn entry_id(&self, node: &N) -> Option<EntryId> {
        self.nodes.get(node).copied()
    }

    fn ensure_entry(&mut self, node: N) -> EntryId {
        if let Some(&id) = self.nodes.get(&node) {
            return id;
        }

        // New entry.
        let id = self.pg.add_node(Entry::new(node.clone()));
        self.nodes.insert(node, id);
        id
    }

    ///
    /// Records a completed state for the given Node, creating its Entry if it does not
    /// already exist. A Node may complete exactly once.
    ///
    fn complete(&mut self, node: &N, state: N::State) {
        let id = self.ensure_entry(node.clone());
        let entry = &mut self.pg[id];
        assert!(
            !entry.is_complete(),
            "Node {} is already completed:\n  {:?}\n  {:?}",
            node,
            entry.state(),
            state,
        );
        entry.set_state(state);
    }

    ///
    /// Adds dependency edges from the given src Node to the given dst Nodes, creating
    /// Entries which do not already exist.
    ///
    /// Executes cycle detection: a dependency which would create a cycle is recorded as a
    /// cyclic_dependency of the src instead, and no edge is introduced for it.
    ///
    fn add_dependencies(&mut self, node: &N, deps: Vec<N>) {
        let src_id = self.ensure_entry(node.clone());
        assert!(
            !self.pg[src_id].is_complete(),
            "Node {} is already completed, and may not have new dependencies added: {:?}",
            node,
            deps,
        );

        for dep in deps {
            let dst_id = self.ensure_entry(dep.clone());
            if self.pg.find_edge(src_id, dst_id).is_some() {
                continue;
            }
            let mut lifted = HashMap::default();
            if self.detect_cycle(src_id, dst_id, &mut lifted) {
                self.pg[src_id].add_cyclic_dependency(dep);
            } else {
                for (id, level) in lifted {
                    self.pg[id].set_level(level);
                }
                self.pg.add_edge(src_id, dst_id, ());
            }
        }
    }

    ///
    /// Detects whether adding an edge from src to dst would create a cycle, using the
    /// sparse-graph algorithm from:
    ///   "A New Approach to Incremental Cycle Detection and Related Problems"
    ///     - Bender, Fineman, Gilbert, Tarjan
    ///
    /// Level lifts computed during the check are recorded in `lifted`, and are committed by
    /// the caller only when the edge is accepted: a rejected edge leaves levels untouched.
    ///
    /// Returns true if a cycle would be created by adding an edge from src to dst.
    ///
    fn detect_cycle(&self, src: EntryId, dst: EntryId, lifted: &mut HashMap<EntryId, Level>) -> bool {
        // delta = min(m^(1/2), n^(2/3))
        let delta = (self.pg.edge_count() as f64)
            .sqrt()
            .min((self.pg.node_count() as f64).powf(2.0 / 3.0));

        let src_level = self.pg[src].level();
        if src_level < self.pg[dst].level() {
            // The levels already order dst after src: no cycle is possible.
            return false;
        }

        // Search backward from src, visiting only entries at src's level, traversing at
        // most delta entries.
        //   Case A: If dst is visited, the edge would create a cycle.
        //   Case B: If the search completes within the bound and the levels were equal, the
        //     levels remain a pseudo-topological ordering.
        //   Case C: If the search completes within the bound and dst was below src, lift
        //     dst to src's level.
        //   Case D: If the search exhausts the bound, lift dst above src's level and
        //     restrict the membership set to src itself.
        let mut b: HashSet<EntryId> = HashSet::default();
        let mut traversed = 0_usize;
        let mut exhausted = false;
        let mut walked = self.pg.visit_map();
        let mut stack = vec![src];
        while let Some(id) = stack.pop() {
            if !walked.visit(id) || self.pg[id].level() != src_level {
                continue;
            }
            if id == dst {
                // Case A.
                return true;
            }
            b.insert(id);
            traversed += 1;
            if (traversed as f64) >= delta {
                exhausted = true;
                break;
            }
            stack.extend(self.pg.neighbors_directed(id, Direction::Incoming));
        }
        if exhausted {
            // Case D.
            lifted.insert(dst, src_level + 1);
            b.clear();
            b.insert(src);
        } else if src_level == self.pg[dst].level() {
            // Case B.
            return false;
        } else {
            // Case C.
            lifted.insert(dst, src_level);
        }

        // Search forward from dst, lifting and traversing only edges that would otherwise
        // decrease in level.
        let level_of = |lifted: &HashMap<EntryId, Level>, id: EntryId| {
            lifted.get(&id).copied().unwrap_or_else(|| self.pg[id].level())
        };
        let mut stack = vec![dst];
        while let Some(x) = stack.pop() {
            let x_level = level_of(lifted, x);
            for y in self.pg.neighbors_directed(x, Direction::Outgoing) {
                if b.contains(&y) {
                    // An entry reached during the backward search was also reached during
                    // the forward search.
                    return true;
                }
                if x_level > level_of(lifted, y) {
                    lifted.insert(y, x_level);
                    stack.push(y);
                }
            }
        }
        false
    }

    ///
    /// Begins a Walk from the given roots. The Walk will iterate depth-first in pre-order
    /// over all entries that match the predicate, eliminating the subgraphs of entries
    /// which do not.
    ///
    fn walk<P: Fn(&Entry<N>) -> bool>(
        &self,
        roots: Vec<EntryId>,
        direction: Direction,
        predicate: P,
    ) -> Walk<'_, N, P> {
        Walk {
            graph: self,
            direction,
            stack: roots,
            walked: self.pg.visit_map(),
            predicate,
        }
    }

    ///
    /// Removes every Entry matching the predicate, plus the transitive closure of its
    /// dependents, severing all of their edges.
    ///
    fn invalidate<P: Fn(&N, Option<&N::State>) -> bool>(&mut self, predicate: P) -> usize {
        // Eagerly collect all matching roots and their transitive dependents before we
        // begin mutating anything.
        let root_ids: Vec<EntryId> = self
            .pg
            .node_indices()
            .filter(|&id| {
                let entry = &self.pg[id];
                predicate(entry.node(), entry.state())
            })
            .collect();
        let ids: Vec<EntryId> = self
            .walk(root_ids, Direction::Incoming, |_| true)
            .collect();

        for &id in &ids {
            if let Some(entry) = self.pg.remove_node(id) {
                debug!("invalidating node: {}", entry.node());
                self.nodes.remove(entry.node());
            }
        }

        if !ids.is_empty() {
            info!("invalidated {} nodes", ids.len());
        }
        ids.len()
    }
}

///
/// A DAG (enforced on mutation) of Entries, memoizing the completed state of each Node
/// ever requested.
///
pub struct Graph<N: Node> {
    inner: Mutex<InnerGraph<N>>,
}

impl<N: Node> Graph<N> {
    pub fn new() -> Graph<N> {
        Graph {
            inner: Mutex::new(InnerGraph {
                nodes: HashMap::default(),
                pg: StableDiGraph::default(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.nodes.len()
    }

    pub fn is_complete(&self, node: &N) -> bool {
        let inner = self.inner.lock();
        inner
            .entry_id(node)
            .map(|id| inner.pg[id].is_complete())
            .unwrap_or(false)
    }

    pub fn state(&self, node: &N) -> Option<N::State> {
        let inner = self.inner.lock();
        inner
            .entry_id(node)
            .and_then(|id| inner.pg[id].state().cloned())
    }

    pub fn level_of(&self, node: &N) -> Option<Level> {
        let inner = self.inner.lock();
        inner.entry_id(node).map(|id| inner.pg[id].level())
    }

    ///
    /// Records a completed state for the given Node. Panics if the Node has already
    /// completed: terminal states are never overwritten.
    ///
    pub fn complete(&self, node: &N, state: N::State) {
        let mut inner = self.inner.lock();
        inner.complete(node, state);
    }

    ///
    /// Declares dependency edges from the given Node, subject to cycle detection. Panics
    /// if the Node has already completed.
    ///
    pub fn add_dependencies(&self, node: &N, deps: Vec<N>) {
        let mut inner = self.inner.lock();
        inner.add_dependencies(node, deps);
    }

    pub fn dependencies_of(&self, node: &N) -> Vec<N> {
        self.neighbors(node, Direction::Outgoing)
    }

    pub fn dependents_of(&self, node: &N) -> Vec<N> {
        self.neighbors(node, Direction::Incoming)
    }

    pub fn cyclic_dependencies_of(&self, node: &N) -> Vec<N> {
        let inner = self.inner.lock();
        inner
            .entry_id(node)
            .map(|id| inner.pg[id].cyclic_dependencies().iter().cloned().collect())
            .unwrap_or_default()
    }

    fn neighbors(&self, node: &N, direction: Direction) -> Vec<N> {
        let inner = self.inner.lock();
        inner
            .entry_id(node)
            .map(|id| {
                inner
                    .pg
                    .neighbors_directed(id, direction)
                    .map(|neighbor_id| inner.pg[neighbor_id].node().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    ///
    /// Walks the graph depth-first in pre-order from the given roots, in the given
    /// direction, eliminating the subgraphs of entries which do not match the predicate.
    ///
    pub fn walk<P>(
        &self,
        roots: &[N],
        direction: Direction,
        predicate: P,
    ) -> Vec<(N, Option<N::State>)>
    where
        P: Fn(&N, Option<&N::State>) -> bool,
    {
        let inner = self.inner.lock();
        // Roots are pushed in reverse so that the depth-first visit sees them in order.
        let root_ids: Vec<EntryId> = roots
            .iter()
            .rev()
            .filter_map(|node| inner.entry_id(node))
            .collect();
        inner
            .walk(root_ids, direction, |entry| {
                predicate(entry.node(), entry.state())
            })
            .map(|id| {
                let entry = &inner.pg[id];
                (entry.node().clone(), entry.state().cloned())
            })
            .collect()
    }

    ///
    /// Deletes every Node matching the predicate, plus every Node reachable from one via
    /// dependents, and returns the number deleted. Invalidation never re-enqueues work:
    /// re-execution occurs lazily when a new request references a deleted Node.
    ///
    pub fn invalidate<P>(&self, predicate: P) -> usize
    where
        P: Fn(&N, Option<&N::State>) -> bool,
    {
        let mut inner = self.inner.lock();
        inner.invalidate(predicate)
    }
}

///
/// Represents the state of a particular walk through a Graph. Implements Iterator and has
/// the same lifetime as the Graph itself.
///
struct Walk<'a, N: Node, P: Fn(&Entry<N>) -> bool> {
    graph: &'a InnerGraph<N>,
    direction: Direction,
    stack: Vec<EntryId>,
    walked: FixedBitSet,
    predicate: P,
}

impl<'a, N: Node + 'a, P: Fn(&Entry<N>) -> bool> Iterator for Walk<'a, N, P> {
    type Item = EntryId;

    fn next(&mut self) -> Option<EntryId> {
        while let Some(id) = self.stack.pop() {
            if !self.walked.visit(id) {
                continue;
            }
            let entry = &self.graph.pg[id];
            if !(self.predicate)(entry) {
                continue;
            }
            self.stack
                .extend(self.graph.pg.neighbors_directed(id, self.direction));
            return Some(id);
        }
        None
    }
}
