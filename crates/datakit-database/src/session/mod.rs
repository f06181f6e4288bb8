//! Session collaborators: an in-process store and a SQLite-backed store.
//!
//! Both sessions share the change tracker and the one-operation-at-a-time
//! guard defined here.

pub mod memory;
pub mod sqlite;

use std::any::TypeId;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use datakit_core::error::DataError;
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntryTicket};

use crate::tracking::{ChangeTracker, EntryState};

pub use memory::{MemorySession, MemoryStore};
pub use sqlite::{SqlEntity, SqliteSession, SqliteSessionBuilder};

/// Outcome of flushing one entity type.
#[derive(Debug, Default)]
pub(crate) struct Flushed {
    pub affected: u64,
    /// Store-generated keys, applied to the tracker after the commit lands.
    pub generated: Vec<(EntryTicket, i64)>,
}

impl Flushed {
    pub fn absorb(&mut self, other: Flushed) {
        self.affected += other.affected;
        self.generated.extend(other.generated);
    }
}

/// Write phases of a commit, in execution order.
pub(crate) const PHASES: [EntryState; 3] = [EntryState::Deleted, EntryState::Modified, EntryState::Added];

/// Binding indexes to visit during `phase`.
///
/// Deletes walk the entity types in reverse registration order and every
/// other phase walks them in registration order, so registering principals
/// before their dependents keeps foreign keys satisfied at each statement.
pub(crate) fn phase_order(phase: EntryState, bindings: usize) -> Vec<usize> {
    match phase {
        EntryState::Deleted => (0..bindings).rev().collect(),
        _ => (0..bindings).collect(),
    }
}

/// Mutable state behind a session's guard.
///
/// `B` is the session-specific, type-erased writer for one entity type.
pub(crate) struct SessionState<B: ?Sized> {
    pub tracker: ChangeTracker,
    bindings: Vec<(TypeId, Arc<B>)>,
    pub closed: bool,
}

impl<B: ?Sized> SessionState<B> {
    pub fn new() -> Self {
        Self {
            tracker: ChangeTracker::new(),
            bindings: Vec::new(),
            closed: false,
        }
    }

    /// Register the writer for `T` unless one exists.
    pub fn bind<T: Entity>(&mut self, make: impl FnOnce() -> Arc<B>) {
        let id = TypeId::of::<T>();
        if !self.bindings.iter().any(|(bound, _)| *bound == id) {
            self.bindings.push((id, make()));
        }
    }

    pub fn binding(&self, id: TypeId) -> Option<Arc<B>> {
        self.bindings
            .iter()
            .find(|(bound, _)| *bound == id)
            .map(|(_, binding)| Arc::clone(binding))
    }

    /// Writers in registration order.
    pub fn bindings(&self) -> Vec<Arc<B>> {
        self.bindings.iter().map(|(_, b)| Arc::clone(b)).collect()
    }
}

/// Take the session state for one operation.
///
/// Fails fast with `InvalidOperation` when another operation holds it or the
/// session is closed.
pub(crate) fn acquire<B: ?Sized>(
    state: &Mutex<SessionState<B>>,
) -> DataResult<MutexGuard<'_, SessionState<B>>> {
    let guard = state.try_lock().map_err(|_| {
        DataError::invalid_operation(
            "session is already in use; await the previous operation before starting another",
        )
    })?;
    if guard.closed {
        return Err(DataError::invalid_operation("session is closed"));
    }
    Ok(guard)
}
