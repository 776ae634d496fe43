// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;

use crate::core::{Key, Storable};

///
/// The identity of an addressable object: a build directory and an object name within it.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Address {
    pub spec_path: PathBuf,
    pub name: String,
}

impl Storable for Address {
    fn project(&self, field: &str) -> Option<Key> {
        match field {
            "spec_path" => Some(Key::new(self.spec_path.clone())),
            "name" => Some(Key::new(self.name.clone())),
            _ => None,
        }
    }
}

///
/// A spec naming exactly one addressable object.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SingleAddress {
    pub directory: PathBuf,
    pub name: String,
}

impl Storable for SingleAddress {}

///
/// A spec naming every addressable object declared directly in a directory.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SiblingAddresses {
    pub directory: PathBuf,
}

impl Storable for SiblingAddresses {}

///
/// A spec naming every addressable object declared under a directory, recursively.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DescendantAddresses {
    pub directory: PathBuf,
}

impl Storable for DescendantAddresses {}

///
/// The product which aggregates the Addresses matched by an address spec, in match order.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Addresses(pub Vec<Address>);

impl Storable for Addresses {
    fn project_multi(&self, field: Option<&str>) -> Option<Vec<Key>> {
        match field {
            None | Some("dependencies") => {
                Some(self.0.iter().map(|a| Key::new(a.clone())).collect())
            }
            Some(_) => None,
        }
    }
}
