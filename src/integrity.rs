//! Referential integrity between inputs, base recipes and products
//!
//! The usage index is rebuilt in a single pass over the catalog on every
//! delete attempt instead of being maintained incrementally.

use std::collections::{BTreeSet, HashMap};

use crate::models::{BaseRecipe, CompositionItem, EntityKind, FinalProduct};

/// Who references what, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageIndex {
    /// input id -> names of base recipes and products using it
    pub inputs: HashMap<i64, BTreeSet<String>>,
    /// base recipe id -> names of products using it
    pub bases: HashMap<i64, BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteCheck {
    Allowed,
    Blocked { by: Vec<String> },
}

pub fn build_usage_index<'a, B, P>(bases: B, products: P) -> UsageIndex
where
    B: IntoIterator<Item = &'a BaseRecipe>,
    P: IntoIterator<Item = &'a FinalProduct>,
{
    let mut index = UsageIndex::default();

    for base in bases {
        for item in &base.composition {
            if let CompositionItem::Input { id, .. } = item {
                index.inputs.entry(*id).or_default().insert(base.name.clone());
            }
        }
    }

    for product in products {
        for item in &product.composition {
            let users = match item {
                CompositionItem::Input { id, .. } => index.inputs.entry(*id),
                CompositionItem::BaseRecipe { id, .. } => index.bases.entry(*id),
            };
            users.or_default().insert(product.name.clone());
        }
    }

    index
}

/// Whether `id` of `kind` can be removed without leaving dangling references.
pub fn can_delete(id: i64, kind: EntityKind, index: &UsageIndex) -> DeleteCheck {
    let users = match kind {
        EntityKind::Input => index.inputs.get(&id),
        EntityKind::BaseRecipe => index.bases.get(&id),
        EntityKind::Product => None,
    };

    match users {
        Some(names) if !names.is_empty() => DeleteCheck::Blocked {
            by: names.iter().cloned().collect(),
        },
        _ => DeleteCheck::Allowed,
    }
}
