// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::core::{Field, Key, TypeId, Variants};
use crate::fs;
use crate::selectors::Selector;
use crate::tasks::{self, Tasks};

///
/// The result of a single attempt to advance a Node.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum State {
    ///
    /// The Node requires the given Nodes to complete before it can advance further.
    ///
    Waiting(Vec<Node>),
    Complete(Complete),
}

///
/// A terminal state for a Node. Once recorded in the graph, never overwritten.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Complete {
    Noop(Noop),
    Return(Key),
    Throw(Failure),
}

///
/// A terminal, non-productive completion: no applicable production, rather than a failed
/// one.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Noop {
    /// No task was able to produce the requested product for the subject.
    NoMatch,
    /// The requested variant key was not configured in the subject's variants.
    NoVariant(String),
    /// A required input of the Node completed as a Noop.
    MissingInput(Box<Node>),
    /// A dependency declaration was dropped because it would have created a cycle.
    Cycle { src: Box<Node>, dst: Box<Node> },
}

impl fmt::Display for Noop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Noop::NoMatch => write!(f, "No task was available to compute the value."),
            &Noop::NoVariant(ref key) => {
                write!(f, "A matching variant key was not configured for {}.", key)
            }
            &Noop::MissingInput(ref node) => write!(f, "Was missing (at least) input {}.", node),
            &Noop::Cycle { ref src, ref dst } => {
                write!(f, "Dep from {} to {} would cause a cycle.", src, dst)
            }
        }
    }
}

///
/// A terminal failure of a Node.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Failure {
    /// More than one task produced a compatible value for the subject and product.
    Ambiguous { subject: Key, product: TypeId },
    /// An error raised while computing the value, captured verbatim.
    Throw(String),
}

fn throw(msg: String) -> State {
    State::Complete(Complete::Throw(Failure::Throw(msg)))
}

///
/// A read-only capability bundle passed into each step, so that a Node can compute
/// without global state.
///
pub struct StepContext<'g, 't> {
    deps: &'g HashMap<Node, Complete>,
    tasks: &'t Tasks,
    project_tree: &'t dyn fs::ProjectTree,
}

impl<'g, 't> StepContext<'g, 't> {
    ///
    /// Creates Nodes for each task that might be able to compute the given product for the
    /// given subject and variants. If the (subject kind, product) pair is handled natively
    /// by the filesystem, a Filesystem Node is created instead.
    ///
    fn gen_nodes(&self, subject: &Key, product: &TypeId, variants: &Variants) -> Vec<Node> {
        if fs::is_fs_pair(subject.type_id(), product) {
            vec![Node::Filesystem(Filesystem {
                subject: subject.clone(),
                product: *product,
                variants: variants.clone(),
            })]
        } else {
            self.tasks
                .gen_tasks(product)
                .iter()
                .map(|task| {
                    Node::Task(Task {
                        subject: subject.clone(),
                        product: *product,
                        variants: variants.clone(),
                        task: task.clone(),
                    })
                })
                .collect()
        }
    }

    fn get(&self, node: &Node) -> Option<&Complete> {
        self.deps.get(node)
    }

    fn project_tree(&self) -> &dyn fs::ProjectTree {
        self.project_tree
    }
}

///
/// Defines executing a single step for the given context.
///
trait Step {
    fn step(&self, context: &StepContext) -> State;
}

///
/// A Node that selects a product for a subject.
///
/// A Select can be satisfied by multiple sources, but fails if multiple sources produce a
/// value. The 'variants' field represents variant configuration that is propagated to
/// dependencies; a Select with a variant_key additionally restricts matched values by
/// name, using the value configured for the key in the subject's variants.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Select {
    pub(crate) subject: Key,
    pub(crate) product: TypeId,
    pub(crate) variants: Variants,
    pub(crate) variant_key: Option<String>,
}

impl Select {
    ///
    /// Checks whether the given candidate value is an instance of the requested product,
    /// restricted to the given variant value when one applies.
    ///
    fn select_literal(&self, candidate: &Key, variant_value: Option<&Key>) -> Option<Key> {
        if candidate.type_id() != &self.product {
            return None;
        }
        match variant_value {
            Some(vv) if candidate.value().project("name").as_ref() != Some(vv) => {
                // There is a variant value, and it doesn't match.
                None
            }
            _ => Some(candidate.clone()),
        }
    }
}

impl Step for Select {
    fn step(&self, context: &StepContext) -> State {
        // If there is a variant_key, see whether it has been configured; if not, no match.
        let variant_value: Option<Key> = match self.variant_key {
            Some(ref variant_key) => {
                let configured = self
                    .variants
                    .iter()
                    .find(|&&(ref k, _)| k == variant_key)
                    .map(|&(_, ref v)| Key::new(v.clone()));
                match configured {
                    Some(value) => Some(value),
                    None => {
                        return State::Complete(Complete::Noop(Noop::NoVariant(
                            variant_key.clone(),
                        )))
                    }
                }
            }
            None => None,
        };

        // If the Subject "is a" instance of the Product, then we're done.
        if let Some(literal_value) = self.select_literal(&self.subject, variant_value.as_ref()) {
            return State::Complete(Complete::Return(literal_value));
        }

        // Else, attempt to use the configured tasks to compute the value.
        let mut dependencies = Vec::new();
        let mut matches: Vec<Key> = Vec::new();
        for dep_node in context.gen_nodes(&self.subject, &self.product, &self.variants) {
            match context.get(&dep_node) {
                Some(&Complete::Return(ref value)) => {
                    if let Some(v) = self.select_literal(value, variant_value.as_ref()) {
                        matches.push(v);
                    }
                }
                Some(&Complete::Noop(_)) => {}
                Some(&Complete::Throw(ref failure)) => {
                    // NB: propagate thrown failures directly.
                    return State::Complete(Complete::Throw(failure.clone()));
                }
                None => dependencies.push(dep_node),
            }
        }

        // If any dependencies were unavailable, wait for them; otherwise determine whether
        // a value was successfully selected.
        if !dependencies.is_empty() {
            // A candidate has not run yet.
            return State::Waiting(dependencies);
        } else if matches.len() > 1 {
            return State::Complete(Complete::Throw(Failure::Ambiguous {
                subject: self.subject.clone(),
                product: self.product,
            }));
        }

        match matches.pop() {
            Some(matched) => State::Complete(Complete::Return(matched)),
            None => State::Complete(Complete::Noop(Noop::NoMatch)),
        }
    }
}

///
/// A Node that selects the given Product for each member of `field` on `dep_product`.
///
/// Begins by selecting the `dep_product` for the subject, and then selects a product for
/// each member of the collection named `field` on the dep_product. The value produced by
/// this Node guarantees that the order of the provided values matches the order of
/// declaration in the `field` collection.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Dependencies {
    pub(crate) subject: Key,
    pub(crate) product: TypeId,
    pub(crate) variants: Variants,
    pub(crate) dep_product: TypeId,
    pub(crate) field: Option<Field>,
}

impl Step for Dependencies {
    fn step(&self, context: &StepContext) -> State {
        // Request the product we need in order to request dependencies.
        let dep_product_node = Node::create(
            Selector::select(self.dep_product),
            self.subject.clone(),
            self.variants.clone(),
        );
        let dep_product = match context.get(&dep_product_node) {
            Some(&Complete::Return(ref value)) => value.clone(),
            Some(&Complete::Noop(_)) => {
                return State::Complete(Complete::Noop(Noop::MissingInput(Box::new(
                    dep_product_node,
                ))))
            }
            Some(&Complete::Throw(ref failure)) => {
                return State::Complete(Complete::Throw(failure.clone()))
            }
            None => return State::Waiting(vec![dep_product_node]),
        };

        // The product and its member collection are available.
        let dep_subjects = match dep_product.value().project_multi(self.field.as_deref()) {
            Some(subjects) => subjects,
            None => {
                return throw(format!(
                    "{} has no projectable collection for field {:?}",
                    dep_product, self.field,
                ))
            }
        };

        let mut dependencies = Vec::new();
        let mut dep_values: Vec<Key> = Vec::new();
        for dep_subject in dep_subjects {
            let dep_node = Node::create(
                Selector::select(self.product),
                dep_subject,
                self.variants.clone(),
            );
            match context.get(&dep_node) {
                Some(&Complete::Return(ref value)) => dep_values.push(value.clone()),
                Some(&Complete::Noop(_)) => {
                    return State::Complete(Complete::Noop(Noop::MissingInput(Box::new(dep_node))))
                }
                Some(&Complete::Throw(ref failure)) => {
                    // NB: propagate thrown failures directly.
                    return State::Complete(Complete::Throw(failure.clone()));
                }
                None => dependencies.push(dep_node),
            }
        }

        if dependencies.is_empty() {
            State::Complete(Complete::Return(Key::new(dep_values)))
        } else {
            State::Waiting(dependencies)
        }
    }
}

///
/// A Node that selects the given Product from a subject synthesised by projecting fields
/// out of an input product of the current subject.
///
/// Fields are projected in declaration order, each projected value becoming the subject
/// of the next projection; the final value must be an instance of the declared projected
/// subject type. The state of the select from the projected subject is mirrored.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Projection {
    pub(crate) subject: Key,
    pub(crate) product: TypeId,
    pub(crate) variants: Variants,
    pub(crate) projected_subject: TypeId,
    pub(crate) fields: Vec<Field>,
    pub(crate) input_product: TypeId,
}

impl Step for Projection {
    fn step(&self, context: &StepContext) -> State {
        // Request the input product for the current subject.
        let input_node = Node::create(
            Selector::select(self.input_product),
            self.subject.clone(),
            self.variants.clone(),
        );
        let input_value = match context.get(&input_node) {
            Some(&Complete::Return(ref value)) => value.clone(),
            Some(&Complete::Noop(_)) => {
                return State::Complete(Complete::Noop(Noop::MissingInput(Box::new(input_node))))
            }
            Some(&Complete::Throw(ref failure)) => {
                return State::Complete(Complete::Throw(failure.clone()))
            }
            None => return State::Waiting(vec![input_node]),
        };

        // The input product is available: use it to construct the new Subject.
        let mut projected = input_value;
        for field in &self.fields {
            projected = match projected.value().project(field) {
                Some(value) => value,
                None => {
                    return throw(format!(
                        "{} has no projectable field {:?}",
                        projected, field,
                    ))
                }
            };
        }
        if projected.type_id() != &self.projected_subject {
            return throw(format!(
                "Projected subject {} was a {} rather than a {}",
                projected,
                projected.type_id(),
                self.projected_subject,
            ));
        }

        // When the output product is available, mirror it.
        let output_node = Node::create(
            Selector::select(self.product),
            projected,
            self.variants.clone(),
        );
        match context.get(&output_node) {
            Some(&Complete::Return(ref value)) => State::Complete(Complete::Return(value.clone())),
            Some(&Complete::Noop(_)) => {
                State::Complete(Complete::Noop(Noop::MissingInput(Box::new(output_node))))
            }
            Some(&Complete::Throw(ref failure)) => {
                // NB: propagate thrown failures directly.
                State::Complete(Complete::Throw(failure.clone()))
            }
            None => State::Waiting(vec![output_node]),
        }
    }
}

///
/// A Node that computes its product by invoking a task with the values selected by the
/// task's clause, in clause declaration order.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Task {
    pub(crate) subject: Key,
    pub(crate) product: TypeId,
    pub(crate) variants: Variants,
    pub(crate) task: tasks::Task,
}

impl Step for Task {
    fn step(&self, context: &StepContext) -> State {
        // Compute dependencies for the Node, or determine whether it is a Noop.
        let mut dependencies = Vec::new();
        let mut dep_values: Vec<Key> = Vec::new();
        for selector in self.task.clause() {
            let dep_node = Node::create(
                selector.clone(),
                self.subject.clone(),
                self.variants.clone(),
            );
            match context.get(&dep_node) {
                Some(&Complete::Return(ref value)) => dep_values.push(value.clone()),
                Some(&Complete::Noop(_)) => {
                    return State::Complete(Complete::Noop(Noop::MissingInput(Box::new(dep_node))))
                }
                Some(&Complete::Throw(ref failure)) => {
                    // NB: propagate thrown failures directly.
                    return State::Complete(Complete::Throw(failure.clone()));
                }
                None => dependencies.push(dep_node),
            }
        }

        if !dependencies.is_empty() {
            // A clause selector was still waiting on dependencies.
            return State::Waiting(dependencies);
        }

        // Ready to run: invoke the task, and recover the declared product type.
        match self.task.invoke(dep_values) {
            Ok(value) => {
                if value.type_id() == &self.product {
                    State::Complete(Complete::Return(value))
                } else {
                    throw(format!(
                        "Task {} returned a {} rather than a {}",
                        self.task.name(),
                        value.type_id(),
                        self.product,
                    ))
                }
            }
            Err(failure) => State::Complete(Complete::Throw(Failure::Throw(failure))),
        }
    }
}

///
/// A Node handled natively by the filesystem collaborator, for the fixed set of
/// (subject kind, product) pairs it supports.
///
/// Results are deterministic functions of the on-disk state observed at step time.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Filesystem {
    pub(crate) subject: Key,
    pub(crate) product: TypeId,
    pub(crate) variants: Variants,
}

impl Step for Filesystem {
    fn step(&self, context: &StepContext) -> State {
        let result = if let Some(dir) = self.subject.downcast_ref::<fs::Dir>() {
            context
                .project_tree()
                .scandir(dir)
                .map(|stats| Key::new(fs::DirectoryListing(stats)))
        } else if let Some(file) = self.subject.downcast_ref::<fs::File>() {
            context
                .project_tree()
                .read_file(file)
                .map(|content| {
                    Key::new(fs::FileContent {
                        path: file.0.clone(),
                        content: content,
                    })
                })
        } else if let Some(globs) = self.subject.downcast_ref::<fs::PathGlobs>() {
            context
                .project_tree()
                .expand(globs)
                .map(|paths| Key::new(fs::Paths(paths)))
        } else {
            Err(format!(
                "{} is not a native filesystem subject",
                self.subject,
            ))
        };
        match result {
            Ok(value) => State::Complete(Complete::Return(value)),
            Err(failure) => State::Complete(Complete::Throw(Failure::Throw(failure))),
        }
    }
}

///
/// The memoization key for one concrete request: the full structural tuple.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Node {
    Select(Select),
    Dependencies(Dependencies),
    Projection(Projection),
    Task(Task),
    Filesystem(Filesystem),
}

impl Node {
    pub fn subject(&self) -> &Key {
        match self {
            &Node::Select(ref n) => &n.subject,
            &Node::Dependencies(ref n) => &n.subject,
            &Node::Projection(ref n) => &n.subject,
            &Node::Task(ref n) => &n.subject,
            &Node::Filesystem(ref n) => &n.subject,
        }
    }

    pub fn product(&self) -> &TypeId {
        match self {
            &Node::Select(ref n) => &n.product,
            &Node::Dependencies(ref n) => &n.product,
            &Node::Projection(ref n) => &n.product,
            &Node::Task(ref n) => &n.product,
            &Node::Filesystem(ref n) => &n.product,
        }
    }

    pub fn variants(&self) -> &Variants {
        match self {
            &Node::Select(ref n) => &n.variants,
            &Node::Dependencies(ref n) => &n.variants,
            &Node::Projection(ref n) => &n.variants,
            &Node::Task(ref n) => &n.variants,
            &Node::Filesystem(ref n) => &n.variants,
        }
    }

    ///
    /// Constructs the Node requested by the given Selector for the given subject and
    /// variants.
    ///
    pub fn create(selector: Selector, subject: Key, variants: Variants) -> Node {
        match selector {
            Selector::Select(s) => Node::Select(Select {
                subject: subject,
                product: s.product,
                variants: variants,
                variant_key: None,
            }),
            Selector::SelectVariant(s) => Node::Select(Select {
                subject: subject,
                product: s.product,
                variants: variants,
                variant_key: Some(s.variant_key),
            }),
            Selector::SelectDependencies(s) => Node::Dependencies(Dependencies {
                subject: subject,
                product: s.product,
                variants: variants,
                dep_product: s.dep_product,
                field: s.field,
            }),
            Selector::SelectProjection(s) => Node::Projection(Projection {
                subject: subject,
                product: s.product,
                variants: variants,
                projected_subject: s.projected_subject,
                fields: s.fields,
                input_product: s.input_product,
            }),
            // NB: Intentionally ignores the subject parameter to provide a literal subject.
            Selector::SelectLiteral(s) => Node::Select(Select {
                subject: s.subject,
                product: s.product,
                variants: variants,
                variant_key: None,
            }),
        }
    }

    ///
    /// Executes a single step for this Node: the given dependency states are the terminal
    /// states of the Nodes this Node has previously declared itself Waiting on.
    ///
    pub fn step(
        &self,
        deps: &HashMap<Node, Complete>,
        tasks: &Tasks,
        project_tree: &dyn fs::ProjectTree,
    ) -> State {
        let context = StepContext {
            deps: deps,
            tasks: tasks,
            project_tree: project_tree,
        };
        match self {
            &Node::Select(ref n) => n.step(&context),
            &Node::Dependencies(ref n) => n.step(&context),
            &Node::Projection(ref n) => n.step(&context),
            &Node::Task(ref n) => n.step(&context),
            &Node::Filesystem(ref n) => n.step(&context),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let subject = if self.variants().is_empty() {
            self.subject().to_string()
        } else {
            format!(
                "{}@{}",
                self.subject(),
                self.variants()
                    .iter()
                    .map(|&(ref k, ref v)| format!("{}={}", k, v))
                    .join(","),
            )
        };
        match self {
            &Node::Select(ref n) => match n.variant_key {
                Some(ref key) => write!(f, "Select({}@{} for {})", n.product, key, subject),
                None => write!(f, "Select({} for {})", n.product, subject),
            },
            &Node::Dependencies(ref n) => match n.field {
                Some(ref field) => write!(
                    f,
                    "Dependencies({} for each {}.{} of {})",
                    n.product, n.dep_product, field, subject,
                ),
                None => write!(
                    f,
                    "Dependencies({} for each {} of {})",
                    n.product, n.dep_product, subject,
                ),
            },
            &Node::Projection(ref n) => write!(
                f,
                "Projection({} via {}.{} of {})",
                n.product,
                n.input_product,
                n.fields.iter().join("."),
                subject,
            ),
            &Node::Task(ref n) => write!(f, "Task({} for {})", n.task.name(), subject),
            &Node::Filesystem(ref n) => write!(f, "Filesystem({} for {})", n.product, subject),
        }
    }
}

impl graph::Node for Node {
    type State = Complete;
}
