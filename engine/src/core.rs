// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::{self, Any};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

///
/// An identifier for a category of computed values: the output type of a task, or the
/// runtime type of a subject.
///
/// Identity and hashing use only the underlying `any::TypeId`; the type name is carried
/// for display.
///
#[derive(Clone, Copy, Debug)]
pub struct TypeId {
    id: any::TypeId,
    name: &'static str,
}

impl TypeId {
    pub fn of<T: Any>() -> TypeId {
        TypeId {
            id: any::TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    ///
    /// The name of the underlying type, with its module path stripped.
    ///
    pub fn name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        let short = base.rsplit("::").next().unwrap_or(base);
        &self.name[base.len() - short.len()..]
    }
}

impl PartialEq for TypeId {
    fn eq(&self, other: &TypeId) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeId {}

impl Hash for TypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

///
/// Object-safe structural equality over type-erased values.
///
pub trait DynEq: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Any + Eq + Send + Sync> DynEq for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().map(|o| self == o).unwrap_or(false)
    }
}

///
/// Object-safe hashing over type-erased values.
///
pub trait DynHash: DynEq {
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: Any + Eq + Hash + Send + Sync> DynHash for T {
    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

///
/// A value which may enter the product graph: structurally comparable, hashable, and
/// printable.
///
/// Types which act as records or collections additionally expose their fields to the
/// engine via the projection methods; the defaults expose nothing.
///
pub trait Storable: DynHash + fmt::Debug {
    ///
    /// Projects the named scalar field of this value, if it has one.
    ///
    fn project(&self, field: &str) -> Option<Key> {
        let _ = field;
        None
    }

    ///
    /// Projects the named collection field of this value as an ordered sequence of member
    /// Keys. `None` selects the type's natural member collection, for types that have one.
    ///
    fn project_multi(&self, field: Option<&str>) -> Option<Vec<Key>> {
        let _ = field;
        None
    }
}

///
/// A handle to a stored value: the subject of a request, or a computed product.
///
/// Keys have cheap clones and structural identity, which makes them usable both as graph
/// keys and as values; the concrete type is recovered at task invocation via
/// `downcast_ref`.
///
#[derive(Clone)]
pub struct Key {
    value: Arc<dyn Storable>,
    type_id: TypeId,
}

impl Key {
    pub fn new<T: Storable>(value: T) -> Key {
        Key {
            type_id: TypeId::of::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn type_id(&self) -> &TypeId {
        &self.type_id
    }

    pub fn value(&self) -> &dyn Storable {
        self.value.as_ref()
    }

    ///
    /// Recovers the concrete type of the underlying value.
    ///
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        self.value.dyn_eq(other.value.as_any())
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.value.dyn_hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

///
/// The name of a projected field.
///
pub type Field = String;

///
/// Subject-local variant configuration: ordered (key, value) pairs, as configured.
///
pub type Variants = Vec<(String, String)>;

impl Storable for String {}

impl Storable for i64 {}

impl Storable for PathBuf {}

///
/// The generic ordered list value produced by dependency aggregation. Its natural member
/// collection is its contents.
///
impl Storable for Vec<Key> {
    fn project_multi(&self, field: Option<&str>) -> Option<Vec<Key>> {
        match field {
            None => Some(self.clone()),
            Some(_) => None,
        }
    }
}
