//! Query specifications and the composed, not-yet-executed query.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::traits::entity::Entity;
use crate::types::filter::{FilterPolicy, Predicate};
use crate::types::pagination::PageRequest;
use crate::types::sorting::OrderBy;

/// Whether rows returned by a query are registered with the change tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tracking {
    /// Rows are tracked; later updates and removals see them.
    #[default]
    Tracked,
    /// Rows are detached read-only snapshots.
    NoTracking,
}

/// A scalar bound into a raw SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<V: Into<SqlValue>> From<Option<V>> for SqlValue {
    fn from(v: Option<V>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Raw SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql {
    pub text: String,
    pub params: Vec<SqlValue>,
}

/// Where a query reads its rows from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// The entity's whole table.
    Table,
    /// Caller-supplied SQL; interpretation is up to the session.
    Sql(RawSql),
}

/// Skip/take bounds for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub skip: u64,
    /// `None` means unbounded.
    pub take: Option<u64>,
}

impl Window {
    /// Every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// The first `n` rows.
    pub fn first(n: u64) -> Self {
        Self {
            skip: 0,
            take: Some(n),
        }
    }

    /// The rows belonging to one page.
    pub fn page(request: &PageRequest) -> Self {
        Self {
            skip: request.skip(),
            take: Some(request.take()),
        }
    }

    /// Apply the window to an ordered row list.
    pub fn slice<T>(&self, rows: Vec<T>) -> Vec<T> {
        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let iter = rows.into_iter().skip(skip);
        match self.take {
            Some(take) => iter.take(usize::try_from(take).unwrap_or(usize::MAX)).collect(),
            None => iter.collect(),
        }
    }
}

/// A related entity loaded alongside `T`.
///
/// The session fetches every row of [`Navigation::target`] and hands the
/// list (a `Vec<U>` behind `&dyn Any`) to [`Navigation::attach`] once per
/// parent row.
pub trait Navigation<T>: Send + Sync {
    /// Type id of the related entity.
    fn target(&self) -> TypeId;

    /// Entity name of the related entity.
    fn target_name(&self) -> &'static str;

    /// Populate the navigation on one parent from the loaded related rows.
    fn attach(&self, parent: &mut T, related: &dyn Any);
}

struct Reference<U, K, A> {
    foreign_key: K,
    assign: A,
    _target: PhantomData<fn() -> U>,
}

impl<T, U, K, A> Navigation<T> for Reference<U, K, A>
where
    U: Entity,
    K: Fn(&T) -> Option<U::Key> + Send + Sync,
    A: Fn(&mut T, Option<U>) + Send + Sync,
{
    fn target(&self) -> TypeId {
        TypeId::of::<U>()
    }

    fn target_name(&self) -> &'static str {
        U::NAME
    }

    fn attach(&self, parent: &mut T, related: &dyn Any) {
        let Some(rows) = related.downcast_ref::<Vec<U>>() else {
            return;
        };
        let found = (self.foreign_key)(parent)
            .and_then(|key| rows.iter().find(|row| row.key() == key).cloned());
        (self.assign)(parent, found);
    }
}

struct Collection<U, B, A> {
    belongs: B,
    assign: A,
    _target: PhantomData<fn() -> U>,
}

impl<T, U, B, A> Navigation<T> for Collection<U, B, A>
where
    U: Entity,
    B: Fn(&T, &U) -> bool + Send + Sync,
    A: Fn(&mut T, Vec<U>) + Send + Sync,
{
    fn target(&self) -> TypeId {
        TypeId::of::<U>()
    }

    fn target_name(&self) -> &'static str {
        U::NAME
    }

    fn attach(&self, parent: &mut T, related: &dyn Any) {
        let Some(rows) = related.downcast_ref::<Vec<U>>() else {
            return;
        };
        let children: Vec<U> = rows
            .iter()
            .filter(|row| (self.belongs)(parent, row))
            .cloned()
            .collect();
        (self.assign)(parent, children);
    }
}

/// Eager-load directives: which related entities to populate.
pub struct Include<T> {
    navigations: Vec<Arc<dyn Navigation<T>>>,
}

impl<T: 'static> Include<T> {
    /// Load a single related `U` whose key is `foreign_key(parent)`.
    pub fn reference<U, K, A>(foreign_key: K, assign: A) -> Self
    where
        U: Entity,
        K: Fn(&T) -> Option<U::Key> + Send + Sync + 'static,
        A: Fn(&mut T, Option<U>) + Send + Sync + 'static,
    {
        Self {
            navigations: Vec::new(),
        }
        .and_reference(foreign_key, assign)
    }

    /// Load every related `U` for which `belongs(parent, child)` holds.
    pub fn collection<U, B, A>(belongs: B, assign: A) -> Self
    where
        U: Entity,
        B: Fn(&T, &U) -> bool + Send + Sync + 'static,
        A: Fn(&mut T, Vec<U>) + Send + Sync + 'static,
    {
        Self {
            navigations: Vec::new(),
        }
        .and_collection(belongs, assign)
    }

    /// Add another reference navigation.
    pub fn and_reference<U, K, A>(mut self, foreign_key: K, assign: A) -> Self
    where
        U: Entity,
        K: Fn(&T) -> Option<U::Key> + Send + Sync + 'static,
        A: Fn(&mut T, Option<U>) + Send + Sync + 'static,
    {
        self.navigations.push(Arc::new(Reference {
            foreign_key,
            assign,
            _target: PhantomData::<fn() -> U>,
        }));
        self
    }

    /// Add another collection navigation.
    pub fn and_collection<U, B, A>(mut self, belongs: B, assign: A) -> Self
    where
        U: Entity,
        B: Fn(&T, &U) -> bool + Send + Sync + 'static,
        A: Fn(&mut T, Vec<U>) + Send + Sync + 'static,
    {
        self.navigations.push(Arc::new(Collection {
            belongs,
            assign,
            _target: PhantomData::<fn() -> U>,
        }));
        self
    }

    /// The navigations to load.
    pub fn navigations(&self) -> &[Arc<dyn Navigation<T>>] {
        &self.navigations
    }
}

impl<T> Clone for Include<T> {
    fn clone(&self) -> Self {
        Self {
            navigations: self.navigations.clone(),
        }
    }
}

impl<T> fmt::Debug for Include<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<_> = self.navigations.iter().map(|n| n.target_name()).collect();
        f.debug_struct("Include").field("targets", &targets).finish()
    }
}

/// The caller-facing description of a query.
///
/// Every field is optional. Combining rules live in the query builder.
pub struct QuerySpec<T> {
    /// Row filter; several calls to [`QuerySpec::filter`] are AND-ed.
    pub predicate: Option<Predicate<T>>,
    /// Result ordering.
    pub order_by: Option<OrderBy<T>>,
    /// Related entities to load.
    pub include: Option<Include<T>>,
    pub tracking: Tracking,
    pub filters: FilterPolicy,
}

impl<T: 'static> QuerySpec<T> {
    /// An empty spec: tracked, global filters applied, no predicate.
    pub fn new() -> Self {
        Self {
            predicate: None,
            order_by: None,
            include: None,
            tracking: Tracking::Tracked,
            filters: FilterPolicy::Apply,
        }
    }

    /// Add a filter closure.
    pub fn filter<F>(self, f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.matching(Predicate::new(f))
    }

    /// Add a prebuilt predicate.
    pub fn matching(mut self, predicate: Predicate<T>) -> Self {
        self.predicate = Some(match self.predicate {
            Some(existing) => existing.and(&predicate),
            None => predicate,
        });
        self
    }

    /// Set the ordering, replacing any previous one.
    pub fn order_by(mut self, order: OrderBy<T>) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Set the eager-load directives.
    pub fn include(mut self, include: Include<T>) -> Self {
        self.include = Some(include);
        self
    }

    /// Return detached snapshots.
    pub fn no_tracking(mut self) -> Self {
        self.tracking = Tracking::NoTracking;
        self
    }

    /// Set the tracking mode explicitly.
    pub fn tracking(mut self, tracking: Tracking) -> Self {
        self.tracking = tracking;
        self
    }

    /// Bypass the entity's global filters.
    pub fn ignore_query_filters(mut self) -> Self {
        self.filters = FilterPolicy::Ignore;
        self
    }
}

impl<T: 'static> Default for QuerySpec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for QuerySpec<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            order_by: self.order_by.clone(),
            include: self.include.clone(),
            tracking: self.tracking,
            filters: self.filters,
        }
    }
}

impl<T> fmt::Debug for QuerySpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("predicate", &self.predicate.is_some())
            .field("order_by", &self.order_by)
            .field("include", &self.include)
            .field("tracking", &self.tracking)
            .field("filters", &self.filters)
            .finish()
    }
}

/// A composed, lazily evaluated query over `T`.
///
/// Building a query never touches storage. A session evaluates it when asked
/// to count or fetch.
pub struct Query<T> {
    source: Source,
    tracking: Tracking,
    navigations: Vec<Arc<dyn Navigation<T>>>,
    predicates: Vec<Predicate<T>>,
    filters: FilterPolicy,
    order: Option<OrderBy<T>>,
}

impl<T: 'static> Query<T> {
    /// Every row of the entity's table.
    pub fn table() -> Self {
        Self::from_source(Source::Table)
    }

    /// Rows produced by raw SQL.
    pub fn sql(text: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::from_source(Source::Sql(RawSql {
            text: text.into(),
            params,
        }))
    }

    fn from_source(source: Source) -> Self {
        Self {
            source,
            tracking: Tracking::Tracked,
            navigations: Vec::new(),
            predicates: Vec::new(),
            filters: FilterPolicy::Apply,
            order: None,
        }
    }

    pub fn with_tracking(mut self, tracking: Tracking) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn with_include(mut self, include: &Include<T>) -> Self {
        self.navigations.extend(include.navigations().iter().cloned());
        self
    }

    /// AND another predicate onto the query.
    pub fn with_predicate(mut self, predicate: Predicate<T>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_filter_policy(mut self, filters: FilterPolicy) -> Self {
        self.filters = filters;
        self
    }

    /// Replace the ordering.
    pub fn with_order(mut self, order: OrderBy<T>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn tracking(&self) -> Tracking {
        self.tracking
    }

    pub fn navigations(&self) -> &[Arc<dyn Navigation<T>>] {
        &self.navigations
    }

    pub fn predicates(&self) -> &[Predicate<T>] {
        &self.predicates
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        self.filters
    }

    pub fn order(&self) -> Option<&OrderBy<T>> {
        self.order.as_ref()
    }

    /// Whether a row satisfies every explicit predicate.
    pub fn matches(&self, row: &T) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            tracking: self.tracking,
            navigations: self.navigations.clone(),
            predicates: self.predicates.clone(),
            filters: self.filters,
            order: self.order.clone(),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("source", &self.source)
            .field("tracking", &self.tracking)
            .field("navigations", &self.navigations.len())
            .field("predicates", &self.predicates.len())
            .field("filters", &self.filters)
            .field("order", &self.order)
            .finish()
    }
}
