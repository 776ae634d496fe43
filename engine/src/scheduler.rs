// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use graph::{Direction, Graph};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::address::{Address, Addresses, DescendantAddresses, SiblingAddresses, SingleAddress};
use crate::core::{Key, TypeId, Variants};
use crate::fs::{self, PathGlobs, ProjectTree};
use crate::nodes::{self, Complete, Node, Noop, State};
use crate::tasks::Tasks;
use crate::visualizer;

///
/// Holds the root Nodes for an execution, as requested by a user.
///
/// To create an ExecutionRequest, see `LocalScheduler::build_request` (which performs goal
/// translation) or `LocalScheduler::execution_request`.
///
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub roots: Vec<Node>,
}

///
/// The inputs needed to execute a single step for a Node. A StepRequest is self-contained
/// and immutable, and may be executed on any thread.
///
#[derive(Clone)]
pub struct StepRequest {
    step_id: u64,
    node: Node,
    deps: HashMap<Node, Complete>,
    tasks: Arc<Tasks>,
    project_tree: Arc<dyn ProjectTree>,
}

impl StepRequest {
    pub fn step_id(&self) -> u64 {
        self.step_id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    ///
    /// Executes this step, producing the next State for the Node.
    ///
    pub fn run(&self) -> StepResult {
        StepResult {
            state: self
                .node
                .step(&self.deps, &self.tasks, self.project_tree.as_ref()),
        }
    }
}

///
/// The result of running a step, passed back to the scheduler via its Promise.
///
#[derive(Clone, Debug)]
pub struct StepResult {
    pub state: State,
}

struct Signal {
    completed: Mutex<usize>,
    condvar: Condvar,
}

///
/// A single-shot result slot, fulfilled by the executor of a step. Fulfilment wakes the
/// scheduler if it is waiting between batches.
///
pub struct Promise {
    slot: Mutex<Option<StepResult>>,
    signal: Arc<Signal>,
}

impl Promise {
    fn new(signal: Arc<Signal>) -> Promise {
        Promise {
            slot: Mutex::new(None),
            signal,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slot.lock().is_some()
    }

    ///
    /// Fulfils the promise. A Promise may be completed exactly once.
    ///
    pub fn complete(&self, result: StepResult) {
        {
            let mut slot = self.slot.lock();
            assert!(slot.is_none(), "Promise was already completed.");
            *slot = Some(result);
        }
        let mut completed = self.signal.completed.lock();
        *completed += 1;
        self.signal.condvar.notify_one();
    }

    fn take(&self) -> Option<StepResult> {
        self.slot.lock().take()
    }
}

///
/// Statistics for an executed request.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutionStat {
    pub step_count: u64,
    pub scheduling_iterations: u64,
}

///
/// A scheduler that expands a product graph by executing user defined tasks.
///
pub struct LocalScheduler {
    products_by_goal: HashMap<String, TypeId>,
    tasks: Arc<Tasks>,
    project_tree: Arc<dyn ProjectTree>,
    graph: Graph<Node>,
    next_step_id: AtomicU64,
}

impl LocalScheduler {
    pub fn new(
        products_by_goal: HashMap<String, TypeId>,
        tasks: Tasks,
        project_tree: Arc<dyn ProjectTree>,
    ) -> LocalScheduler {
        LocalScheduler {
            products_by_goal,
            tasks: Arc::new(tasks),
            project_tree,
            graph: Graph::new(),
            next_step_id: AtomicU64::new(1),
        }
    }

    pub fn graph(&self) -> &Graph<Node> {
        &self.graph
    }

    ///
    /// Translates the given goal names into product types, and returns an
    /// ExecutionRequest.
    ///
    pub fn build_request(
        &self,
        goals: &[String],
        subjects: Vec<Key>,
    ) -> Result<ExecutionRequest, String> {
        let products = goals
            .iter()
            .map(|goal| {
                self.products_by_goal
                    .get(goal)
                    .copied()
                    .ok_or_else(|| format!("Unknown goal: {}", goal))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::execution_request(products, subjects)
    }

    ///
    /// Creates an ExecutionRequest for the given products and subjects.
    ///
    /// An ExecutionRequest for an Address represents exactly one product output, as does
    /// SingleAddress. But we differentiate between them here in order to normalize the
    /// output for all address spec types as "list of product".
    ///
    pub fn execution_request(
        products: Vec<TypeId>,
        subjects: Vec<Key>,
    ) -> Result<ExecutionRequest, String> {
        let mut roots = Vec::new();
        for subject in &subjects {
            for product in &products {
                roots.push(Self::root_for(subject, product)?);
            }
        }
        Ok(ExecutionRequest { roots })
    }

    fn root_for(subject: &Key, product: &TypeId) -> Result<Node, String> {
        let subject_type = *subject.type_id();
        if subject_type == TypeId::of::<Address>() {
            Ok(Node::Select(nodes::Select {
                subject: subject.clone(),
                product: *product,
                variants: Variants::new(),
                variant_key: None,
            }))
        } else if subject_type == TypeId::of::<SingleAddress>()
            || subject_type == TypeId::of::<SiblingAddresses>()
            || subject_type == TypeId::of::<DescendantAddresses>()
        {
            Ok(Node::Dependencies(nodes::Dependencies {
                subject: subject.clone(),
                product: *product,
                variants: Variants::new(),
                dep_product: TypeId::of::<Addresses>(),
                field: None,
            }))
        } else if let Some(globs) = subject.downcast_ref::<PathGlobs>() {
            Ok(Node::Dependencies(nodes::Dependencies {
                subject: subject.clone(),
                product: *product,
                variants: Variants::new(),
                dep_product: globs.ftype,
                field: None,
            }))
        } else {
            Err(format!("Unsupported root subject type: {}", subject_type))
        }
    }

    ///
    /// Returns the roots of the given ExecutionRequest with their current States.
    ///
    pub fn root_entries(&self, request: &ExecutionRequest) -> Vec<(Node, Option<Complete>)> {
        request
            .roots
            .iter()
            .map(|root| (root.clone(), self.graph.state(root)))
            .collect()
    }

    ///
    /// Updates the state of the given Node in the graph: a Waiting state adds dependency
    /// edges (subject to cycle detection), and a Complete state is terminal.
    ///
    fn update_state(&self, node: &Node, state: State) {
        match state {
            State::Waiting(deps) => self.graph.add_dependencies(node, deps),
            State::Complete(complete) => self.graph.complete(node, complete),
        }
    }

    ///
    /// Creates a step with the currently available dependencies of the given Node, or
    /// None if any dependency is incomplete.
    ///
    fn create_step(
        &self,
        node: &Node,
        signal: &Arc<Signal>,
    ) -> Option<(StepRequest, Arc<Promise>)> {
        // See whether all of the dependencies for the node are available.
        let mut deps = HashMap::new();
        for dep in self.graph.dependencies_of(node) {
            match self.graph.state(&dep) {
                Some(state) => {
                    deps.insert(dep, state);
                }
                None => return None,
            }
        }
        // Additionally, include Noops for any dependencies that were cyclic.
        for dep in self.graph.cyclic_dependencies_of(node) {
            let noop = Complete::Noop(Noop::Cycle {
                src: Box::new(node.clone()),
                dst: Box::new(dep.clone()),
            });
            deps.insert(dep, noop);
        }

        // Ready.
        let step_id = self.next_step_id.fetch_add(1, Ordering::SeqCst);
        Some((
            StepRequest {
                step_id,
                node: node.clone(),
                deps,
                tasks: self.tasks.clone(),
                project_tree: self.project_tree.clone(),
            },
            Arc::new(Promise::new(signal.clone())),
        ))
    }

    ///
    /// Begins an Execution of the given request: a pump which yields batches of
    /// StepRequests until the roots have completed.
    ///
    pub fn execution(&self, request: &ExecutionRequest) -> Execution<'_> {
        Execution {
            scheduler: self,
            candidates: request.roots.iter().cloned().collect(),
            outstanding: IndexMap::new(),
            signal: Arc::new(Signal {
                completed: Mutex::new(0),
                condvar: Condvar::new(),
            }),
            observed: 0,
            step_count: 0,
            scheduling_iterations: 0,
        }
    }

    ///
    /// Executes the given request to completion on the calling thread, and logs a
    /// summary.
    ///
    pub fn schedule(&self, request: &ExecutionRequest) -> ExecutionStat {
        let mut execution = self.execution(request);
        while let Some(batch) = execution.next_batch() {
            for (step, promise) in batch {
                promise.complete(step.run());
            }
        }
        let stat = execution.stat();

        let visited = self
            .graph
            .walk(&request.roots, Direction::Outgoing, |_, state| {
                !matches!(state, Some(&Complete::Noop(_)))
            })
            .len();
        info!(
            "visited {} nodes in {} scheduling iterations. there have been {} total steps for {} total nodes.",
            visited,
            stat.scheduling_iterations,
            self.next_step_id.load(Ordering::SeqCst) - 1,
            self.graph.len(),
        );
        stat
    }

    ///
    /// Invalidates the Filesystem Nodes (and their transitive dependents) affected by the
    /// given changed paths. May be called concurrently with scheduling.
    ///
    pub fn invalidate_files(&self, paths: &[PathBuf]) -> usize {
        let subjects = fs::generate_subjects(paths);
        debug!("generated invalidation subjects: {:?}", subjects);
        self.graph.invalidate(|node, _| match node {
            &Node::Filesystem(_) => subjects.contains(node.subject()),
            _ => false,
        })
    }

    ///
    /// Writes the subgraph reachable from the given roots as Graphviz dot output.
    ///
    pub fn visualize_graph_to_file(&self, roots: &[Node], path: &Path) -> io::Result<()> {
        visualizer::write(&self.graph, roots, path)
    }
}

///
/// The state of an in-progress execution of a request.
///
/// Maintains the set of candidate Nodes which might be ready to step, and the Nodes whose
/// steps have been emitted but not yet fulfilled. At most one step is outstanding per
/// Node at any time.
///
pub struct Execution<'s> {
    scheduler: &'s LocalScheduler,
    candidates: IndexSet<Node>,
    outstanding: IndexMap<Node, Arc<Promise>>,
    signal: Arc<Signal>,
    observed: usize,
    step_count: u64,
    scheduling_iterations: u64,
}

impl<'s> Execution<'s> {
    pub fn stat(&self) -> ExecutionStat {
        ExecutionStat {
            step_count: self.step_count,
            scheduling_iterations: self.scheduling_iterations,
        }
    }

    ///
    /// Returns the next batch of ready steps, or None when all requested roots have
    /// completed.
    ///
    /// The caller is expected to execute each step (possibly on other threads) and fulfil
    /// its promise. When nothing is currently ready, blocks to await the completion of
    /// outstanding promises.
    ///
    pub fn next_batch(&mut self) -> Option<Vec<(StepRequest, Arc<Promise>)>> {
        loop {
            // Create steps for candidates that are ready to run, and not already running.
            let mut ready = Vec::new();
            let candidates: Vec<Node> = self.candidates.drain(..).collect();
            for candidate in candidates {
                if self.outstanding.contains_key(&candidate) {
                    // Node is still a candidate, but is currently running.
                    self.candidates.insert(candidate);
                } else if self.scheduler.graph.is_complete(&candidate) {
                    // Node has already completed.
                } else if let Some(step) = self.scheduler.create_step(&candidate, &self.signal) {
                    ready.push(step);
                }
                // Otherwise, a dependency is incomplete: its completion will re-queue the
                // candidate.
            }

            if !ready.is_empty() {
                for &(ref step, ref promise) in &ready {
                    self.outstanding
                        .insert(step.node().clone(), promise.clone());
                }
                self.step_count += ready.len() as u64;
                self.scheduling_iterations += 1;
                return Some(ready);
            }
            if self.outstanding.is_empty() {
                // Finished.
                return None;
            }

            // Nothing is ready: await the completion of at least one outstanding step,
            // then apply the completed results.
            self.await_completions();
        }
    }

    ///
    /// Blocks until at least one outstanding promise has been fulfilled, then applies all
    /// fulfilled results to the graph, re-queueing candidates.
    ///
    fn await_completions(&mut self) {
        {
            let mut completed = self.signal.completed.lock();
            while *completed <= self.observed {
                self.signal.condvar.wait(&mut completed);
            }
        }

        let mut finished = Vec::new();
        self.outstanding.retain(|node, promise| {
            if let Some(result) = promise.take() {
                finished.push((node.clone(), result));
                false
            } else {
                true
            }
        });
        self.observed += finished.len();

        for (node, result) in finished {
            self.scheduler.update_state(&node, result.state);
            if self.scheduler.graph.is_complete(&node) {
                // The Node is completed: mark any of its dependents as candidates for
                // steps.
                self.candidates
                    .extend(self.scheduler.graph.dependents_of(&node));
            } else {
                // Waiting on dependencies: mark any incomplete deps as candidates; if all
                // deps are already complete, the Node can take another step immediately.
                let incomplete_deps: Vec<Node> = self
                    .scheduler
                    .graph
                    .dependencies_of(&node)
                    .into_iter()
                    .filter(|dep| !self.scheduler.graph.is_complete(dep))
                    .collect();
                if incomplete_deps.is_empty() {
                    self.candidates.insert(node);
                } else {
                    self.candidates.extend(incomplete_deps);
                }
            }
        }
    }
}
