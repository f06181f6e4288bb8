//! Row filters: caller predicates and the global filter policy.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Whether globally configured row filters (soft-delete and the like) apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Apply every global filter configured for the entity.
    #[default]
    Apply,
    /// Bypass global filters; explicit predicates still apply.
    Ignore,
}

impl FilterPolicy {
    /// Whether global filters should be evaluated.
    pub fn applies(&self) -> bool {
        matches!(self, Self::Apply)
    }
}

/// A boolean filter over `T`.
///
/// Predicates are cheap to clone; several predicates on one query combine
/// with AND semantics.
pub struct Predicate<T>(Arc<dyn Fn(&T) -> bool + Send + Sync>);

impl<T: 'static> Predicate<T> {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Whether the row satisfies this predicate.
    pub fn matches(&self, row: &T) -> bool {
        (self.0)(row)
    }

    /// A predicate that holds when both hold.
    pub fn and(&self, other: &Predicate<T>) -> Predicate<T> {
        let (a, b) = (self.clone(), other.clone());
        Self::new(move |row| a.matches(row) && b.matches(row))
    }
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}
