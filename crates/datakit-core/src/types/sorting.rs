//! Ordering clauses for composed queries.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortDirection {
    /// Apply this direction to an ascending comparison result.
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A total ordering over `T` built from key extractors.
///
/// Keys are compared in the order they were added; rows that compare equal
/// on every key keep their source order.
pub struct OrderBy<T> {
    keys: Vec<(Comparator<T>, SortDirection)>,
}

impl<T: 'static> OrderBy<T> {
    /// Order ascending by the extracted key.
    pub fn asc<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self { keys: Vec::new() }.then_by(key, SortDirection::Asc)
    }

    /// Order descending by the extracted key.
    pub fn desc<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self { keys: Vec::new() }.then_by(key, SortDirection::Desc)
    }

    /// Break ties ascending by another key.
    pub fn then_asc<K, F>(self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.then_by(key, SortDirection::Asc)
    }

    /// Break ties descending by another key.
    pub fn then_desc<K, F>(self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.then_by(key, SortDirection::Desc)
    }

    /// Break ties by another key in the given direction.
    pub fn then_by<K, F>(mut self, key: F, direction: SortDirection) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.keys
            .push((Arc::new(move |a: &T, b: &T| key(a).cmp(&key(b))), direction));
        self
    }

    /// Compare two rows under this ordering.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        for (cmp, direction) in &self.keys {
            let ordering = direction.apply(cmp(a, b));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable-sort rows in place.
    pub fn sort(&self, rows: &mut [T]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }

    /// Number of sort keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key has been added.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<T> Clone for OrderBy<T> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<T> fmt::Debug for OrderBy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let directions: Vec<_> = self.keys.iter().map(|(_, d)| *d).collect();
        f.debug_struct("OrderBy").field("keys", &directions).finish()
    }
}
