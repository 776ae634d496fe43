// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::core::{Key, TypeId};
use crate::selectors::Selector;

///
/// A callable registered to produce a product from the values selected by its clause.
/// Inputs arrive in clause declaration order; an Err is captured verbatim as a task
/// failure.
///
pub type TaskFn = Arc<dyn Fn(Vec<Key>) -> Result<Key, String> + Send + Sync>;

///
/// A registered task: an output product, an anded clause of input selectors, and the
/// callable which computes the product from the selected values.
///
#[derive(Clone)]
pub struct Task {
    id: u64,
    name: String,
    product: TypeId,
    clause: Vec<Selector>,
    func: TaskFn,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product(&self) -> &TypeId {
        &self.product
    }

    pub fn clause(&self) -> &[Selector] {
        &self.clause
    }

    pub fn invoke(&self, inputs: Vec<Key>) -> Result<Key, String> {
        (self.func)(inputs)
    }
}

// Task identity is its registration id: the callable is not comparable.
impl PartialEq for Task {
    fn eq(&self, other: &Task) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task({} for {})", self.name, self.product)
    }
}

///
/// Registry of the tasks able to produce each product type. Tasks are indexed by their
/// output product, and considered in registration order.
///
pub struct Tasks {
    tasks: HashMap<TypeId, Vec<Task>>,
    next_id: u64,
}

impl Tasks {
    pub fn new() -> Tasks {
        Tasks {
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    ///
    /// Registers a task able to produce the given product from the values selected by
    /// `clause`.
    ///
    pub fn add<F>(&mut self, name: &str, product: TypeId, clause: Vec<Selector>, func: F)
    where
        F: Fn(Vec<Key>) -> Result<Key, String> + Send + Sync + 'static,
    {
        let task = Task {
            id: self.next_id,
            name: name.to_owned(),
            product: product,
            clause: clause,
            func: Arc::new(func),
        };
        self.next_id += 1;
        self.tasks.entry(product).or_insert_with(Vec::new).push(task);
    }

    ///
    /// All tasks registered to produce the given product, in registration order.
    ///
    pub fn gen_tasks(&self, product: &TypeId) -> &[Task] {
        self.tasks
            .get(product)
            .map(|tasks| tasks.as_slice())
            .unwrap_or(&[])
    }
}
