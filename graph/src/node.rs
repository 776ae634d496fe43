// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt::{Debug, Display};
use std::hash::Hash;

use petgraph::stable_graph;

// 2^32 Entries ought to be more than enough for anyone!
pub type EntryId = stable_graph::NodeIndex<u32>;

///
/// The level of an Entry: the pseudo-topological ordering maintained by the incremental
/// cycle detector. For every accepted dependency edge, the level of the depending Entry is
/// less than or equal to the level of its dependency.
///
pub type Level = u32;

///
/// The identity of a memoized computation in the Graph.
///
/// Nodes are immutable value keys with structural identity: the Graph owns all edges and
/// completed states, and a Node does not know its own adjacencies.
///
pub trait Node: Clone + Debug + Display + Eq + Hash + Send + 'static {
    ///
    /// The completed state stored for a Node. Once stored, it is never overwritten.
    ///
    type State: Clone + Debug + Send;
}
