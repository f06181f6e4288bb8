//! The session capability: change tracking, query execution, and commit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::DataResult;
use crate::traits::entity::Entity;
use crate::types::filter::Predicate;
use crate::types::query::{Query, Window};

/// Options for flushing staged changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Write one audit history record per pending change in the same flush.
    #[serde(default)]
    pub auto_history: bool,
}

impl SaveOptions {
    /// Options with audit history enabled.
    pub fn with_history() -> Self {
        Self { auto_history: true }
    }
}

/// Handle to a tracked entry, stable across commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryTicket(pub u64);

/// An entity staged for insertion.
///
/// `entity` is the value as staged. Resolve `ticket` through
/// [`EntitySet::tracked`] after commit to observe the store-assigned key.
#[derive(Debug, Clone)]
pub struct Staged<T> {
    pub ticket: EntryTicket,
    pub entity: T,
}

/// Type-independent part of a session.
///
/// A session is owned by one logical caller at a time. Implementations
/// reject overlapping operations with `InvalidOperation` instead of
/// serializing them.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Flush every staged change atomically. Returns the number of affected rows.
    async fn save_changes(&self, options: SaveOptions) -> DataResult<u64>;

    /// Round-trip to the store.
    async fn ping(&self) -> DataResult<()>;

    /// Connection descriptor for diagnostics. Secrets are masked.
    fn connection_descriptor(&self) -> String;

    /// Number of staged, uncommitted changes across all entity types.
    async fn pending_changes(&self) -> DataResult<usize>;

    /// Close the session: staged changes are dropped and later operations
    /// fail. A storage pool supplied by the caller stays open.
    async fn close(&self) -> DataResult<()>;
}

/// Typed query source and mutation surface for one entity type.
#[async_trait]
pub trait EntitySet<T: Entity>: Session {
    /// Number of rows matching the query.
    async fn count(&self, query: &Query<T>) -> DataResult<u64>;

    /// Rows matching the query, ordered, then windowed.
    async fn fetch(&self, query: &Query<T>, window: Window) -> DataResult<Vec<T>>;

    /// Identity lookup, preferring tracked entries over a storage round-trip.
    async fn find(&self, key: &T::Key) -> DataResult<Option<T>>;

    /// Stage an insertion.
    async fn add(&self, entity: T) -> DataResult<Staged<T>>;

    /// Stage a modification of a tracked entity.
    async fn update(&self, entity: T) -> DataResult<()>;

    /// Stage a deletion.
    async fn remove(&self, entity: T) -> DataResult<()>;

    /// Delete matching rows immediately, outside the staged changes.
    async fn execute_delete(&self, predicate: &Predicate<T>) -> DataResult<u64>;

    /// Current tracked value for a ticket, if still tracked.
    async fn tracked(&self, ticket: EntryTicket) -> DataResult<Option<T>>;
}
