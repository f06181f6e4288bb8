//! Query builder: folds a [`QuerySpec`] into a base [`Query`].

use datakit_core::types::{FilterPolicy, Query, QuerySpec, Tracking};

/// Compose `spec` onto `base`.
///
/// Clauses apply in a fixed order: tracking, include, predicate, filter
/// policy, ordering. An absent clause leaves the base untouched, and several
/// predicates combine with AND regardless of where they came from. Nothing
/// here executes; the result is an independent query value.
pub fn compose<T: 'static>(base: Query<T>, spec: &QuerySpec<T>) -> Query<T> {
    let mut query = base;

    if spec.tracking == Tracking::NoTracking {
        query = query.with_tracking(Tracking::NoTracking);
    }

    if let Some(include) = &spec.include {
        query = query.with_include(include);
    }

    if let Some(predicate) = &spec.predicate {
        query = query.with_predicate(predicate.clone());
    }

    if spec.filters == FilterPolicy::Ignore {
        query = query.with_filter_policy(FilterPolicy::Ignore);
    }

    if let Some(order) = &spec.order_by {
        query = query.with_order(order.clone());
    }

    query
}
