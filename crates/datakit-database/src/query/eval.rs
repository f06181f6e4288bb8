//! In-process evaluation of composed queries over materialized rows.
//!
//! Predicates, global filters, and orderings are opaque closures, so every
//! session evaluates them here after loading candidate rows.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use datakit_core::traits::Entity;
use datakit_core::types::{Navigation, Query};

use crate::model::Model;

/// Rows matching the global filter (unless bypassed) and every predicate,
/// in query order.
pub fn select<T: Entity>(rows: Vec<T>, query: &Query<T>, model: &Model) -> Vec<T> {
    let policy = query.filter_policy();
    let mut matched: Vec<T> = rows
        .into_iter()
        .filter(|row| model.admits(policy, row) && query.matches(row))
        .collect();
    if let Some(order) = query.order() {
        order.sort(&mut matched);
    }
    matched
}

/// Number of rows `select` would return.
pub fn count<T: Entity>(rows: &[T], query: &Query<T>, model: &Model) -> u64 {
    let policy = query.filter_policy();
    rows.iter()
        .filter(|row| model.admits(policy, *row) && query.matches(row))
        .count() as u64
}

/// Related rows loaded for eager-load navigations, keyed by entity type.
#[derive(Default)]
pub struct RelatedRows {
    sets: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RelatedRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the `Vec<U>` loaded for `target`.
    pub fn insert(&mut self, target: TypeId, rows: Box<dyn Any + Send + Sync>) {
        self.sets.insert(target, rows);
    }

    pub fn contains(&self, target: TypeId) -> bool {
        self.sets.contains_key(&target)
    }

    /// Populate every navigation on every parent row.
    pub fn attach<T>(&self, parents: &mut [T], navigations: &[Arc<dyn Navigation<T>>]) {
        for navigation in navigations {
            let Some(related) = self.sets.get(&navigation.target()) else {
                continue;
            };
            let related: &(dyn Any + Send + Sync) = related.as_ref();
            for parent in parents.iter_mut() {
                navigation.attach(parent, related);
            }
        }
    }
}
