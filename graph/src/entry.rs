// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use fnv::FnvHashSet as HashSet;

use crate::node::{Level, Node};

///
/// An Entry in the Graph.
///
/// Dependency and dependent edges are stored by the Graph itself: an Entry records the
/// completed state (if any), the cycle detection level, and any dependencies which were
/// declared but rejected because they would have created a cycle. Cyclic dependencies are
/// tracked independently in order to provide context specific error messages at the point
/// where they were introduced.
///
pub struct Entry<N: Node> {
    node: N,
    state: Option<N::State>,
    level: Level,
    cyclic_dependencies: HashSet<N>,
}

impl<N: Node> Entry<N> {
    pub(crate) fn new(node: N) -> Entry<N> {
        Entry {
            node,
            state: None,
            level: 1,
            cyclic_dependencies: HashSet::default(),
        }
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn state(&self) -> Option<&N::State> {
        self.state.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_some()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn cyclic_dependencies(&self) -> &HashSet<N> {
        &self.cyclic_dependencies
    }

    pub(crate) fn set_state(&mut self, state: N::State) {
        self.state = Some(state);
    }

    pub(crate) fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    pub(crate) fn add_cyclic_dependency(&mut self, node: N) {
        self.cyclic_dependencies.insert(node);
    }
}
