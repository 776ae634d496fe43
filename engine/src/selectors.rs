// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::core::{Field, Key, TypeId};

///
/// Selects the given Product for the current subject.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Select {
    pub product: TypeId,
}

///
/// Selects the given Product for the current subject, restricted to the value configured
/// for `variant_key` in the subject's variants.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectVariant {
    pub product: TypeId,
    pub variant_key: String,
}

///
/// Selects the given Product for each member of the collection `field` on the
/// `dep_product` of the current subject. A `field` of None selects the dep_product's
/// natural member collection.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectDependencies {
    pub product: TypeId,
    pub dep_product: TypeId,
    pub field: Option<Field>,
}

///
/// Selects the given Product for a subject synthesised by projecting `fields` out of the
/// `input_product` of the current subject.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectProjection {
    pub product: TypeId,
    pub projected_subject: TypeId,
    pub fields: Vec<Field>,
    pub input_product: TypeId,
}

///
/// Selects the given Product for a fixed literal subject, ignoring the current one.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectLiteral {
    pub subject: Key,
    pub product: TypeId,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Selector {
    Select(Select),
    SelectVariant(SelectVariant),
    SelectDependencies(SelectDependencies),
    SelectProjection(SelectProjection),
    SelectLiteral(SelectLiteral),
}

impl Selector {
    ///
    /// A bare Select for the given product.
    ///
    pub fn select(product: TypeId) -> Selector {
        Selector::Select(Select { product: product })
    }

    ///
    /// The product requested by this Selector.
    ///
    pub fn product(&self) -> &TypeId {
        match self {
            &Selector::Select(ref s) => &s.product,
            &Selector::SelectVariant(ref s) => &s.product,
            &Selector::SelectDependencies(ref s) => &s.product,
            &Selector::SelectProjection(ref s) => &s.product,
            &Selector::SelectLiteral(ref s) => &s.product,
        }
    }
}
