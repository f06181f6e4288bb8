//! In-process session over a shared [`MemoryStore`].
//!
//! Several sessions opened over one store see each other's committed rows,
//! like connections to one named in-memory database. Every storage
//! round-trip yields to the scheduler before touching the store.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info};

use datakit_core::error::DataError;
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntitySet, EntryTicket, SaveOptions, Session, Staged};
use datakit_core::types::{FilterPolicy, Predicate, Query, Source, Tracking, Window};

use crate::history::{AutoHistory, HistoryDraft};
use crate::model::Model;
use crate::query::eval::{self, RelatedRows};
use crate::session::{Flushed, PHASES, SessionState, acquire, phase_order};
use crate::tracking::{ChangeTracker, EntryState};

/// Rows of one entity type, in insertion order.
#[derive(Debug, Clone)]
pub(crate) struct Table<T: Entity> {
    rows: Vec<T>,
}

impl<T: Entity> Default for Table<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T: Entity> Table<T> {
    fn position(&self, key: &T::Key) -> Option<usize> {
        self.rows.iter().position(|row| row.key() == *key)
    }

    fn next_id(&self) -> i64 {
        self.rows
            .iter()
            .filter_map(Entity::generated_key)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Insert a row, generating its key when transient.
    fn insert(&mut self, row: &mut T) -> DataResult<Option<i64>> {
        let generated = if row.has_transient_key() {
            let id = self.next_id();
            row.assign_key(id);
            Some(id)
        } else {
            None
        };
        let key = row.key();
        if self.position(&key).is_some() {
            return Err(DataError::storage(format!(
                "UNIQUE constraint failed: {} key {key:?}",
                T::NAME
            )));
        }
        self.rows.push(row.clone());
        Ok(generated)
    }

    fn replace(&mut self, row: T) -> DataResult<()> {
        let key = row.key();
        match self.position(&key) {
            Some(index) => {
                self.rows[index] = row;
                Ok(())
            }
            None => Err(DataError::concurrency_conflict(format!(
                "expected to update 1 {} row with key {key:?} but affected 0",
                T::NAME
            ))),
        }
    }

    fn delete(&mut self, key: &T::Key) -> DataResult<()> {
        match self.position(key) {
            Some(index) => {
                self.rows.remove(index);
                Ok(())
            }
            None => Err(DataError::concurrency_conflict(format!(
                "expected to delete 1 {} row with key {key:?} but affected 0",
                T::NAME
            ))),
        }
    }
}

trait AnyTable: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn clone_box(&self) -> Box<dyn AnyTable>;
    /// Every row admitted by the model, as a `Vec<T>`.
    fn related(&self, model: &Model, policy: FilterPolicy) -> Box<dyn Any + Send + Sync>;
}

impl<T: Entity> AnyTable for Table<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn AnyTable> {
        Box::new(self.clone())
    }

    fn related(&self, model: &Model, policy: FilterPolicy) -> Box<dyn Any + Send + Sync> {
        let rows: Vec<T> = self
            .rows
            .iter()
            .filter(|row| model.admits(policy, *row))
            .cloned()
            .collect();
        Box::new(rows)
    }
}

/// Every table of a store.
#[derive(Default)]
pub(crate) struct Tables {
    map: HashMap<TypeId, Box<dyn AnyTable>>,
}

impl Clone for Tables {
    fn clone(&self) -> Self {
        Self {
            map: self.map.iter().map(|(id, t)| (*id, t.clone_box())).collect(),
        }
    }
}

impl Tables {
    fn table<T: Entity>(&self) -> Option<&Table<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|t| t.as_any().downcast_ref::<Table<T>>())
    }

    fn table_mut<T: Entity>(&mut self) -> &mut Table<T> {
        let table = self
            .map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Table::<T>::default()));
        match table.as_any_mut().downcast_mut::<Table<T>>() {
            Some(table) => table,
            None => unreachable!("tables are keyed by their TypeId"),
        }
    }

    fn rows<T: Entity>(&self) -> Vec<T> {
        self.table::<T>().map(|t| t.rows.clone()).unwrap_or_default()
    }
}

struct StoreInner {
    tables: Tables,
    available: bool,
}

/// A named in-process database shared by any number of sessions.
pub struct MemoryStore {
    name: String,
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// A store named `default`.
    pub fn new() -> Arc<Self> {
        Self::named("default")
    }

    pub fn named(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(StoreInner {
                tables: Tables::default(),
                available: true,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> DataResult<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| DataError::storage(format!("memory store '{}' is poisoned", self.name)))
    }

    /// Lock the store for one round-trip, failing while unavailable.
    fn open(&self) -> DataResult<MutexGuard<'_, StoreInner>> {
        let inner = self.lock()?;
        if !inner.available {
            return Err(DataError::storage(format!(
                "unable to connect to memory store '{}'",
                self.name
            )));
        }
        Ok(inner)
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) -> DataResult<()> {
        self.lock()?.available = available;
        Ok(())
    }

    /// Insert rows directly, bypassing sessions. Returns them with keys assigned.
    pub fn seed<T: Entity>(&self, rows: impl IntoIterator<Item = T>) -> DataResult<Vec<T>> {
        let mut inner = self.lock()?;
        let table = inner.tables.table_mut::<T>();
        rows.into_iter()
            .map(|mut row| {
                table.insert(&mut row)?;
                Ok(row)
            })
            .collect()
    }

    /// Number of stored rows of `T`.
    pub fn len<T: Entity>(&self) -> DataResult<usize> {
        Ok(self.lock()?.tables.table::<T>().map_or(0, |t| t.rows.len()))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Type-erased writer for one entity type.
trait MemoryBinding: Send + Sync {
    /// Apply the pending entries of one phase.
    fn apply(
        &self,
        phase: EntryState,
        tracker: &ChangeTracker,
        tables: &mut Tables,
        history: Option<&mut Vec<HistoryDraft>>,
    ) -> DataResult<Flushed>;

    fn accept(&self, tracker: &mut ChangeTracker, generated: &[(EntryTicket, i64)]);
}

struct Bound<T>(PhantomData<fn() -> T>);

impl<T: Entity> MemoryBinding for Bound<T> {
    fn apply(
        &self,
        phase: EntryState,
        tracker: &ChangeTracker,
        tables: &mut Tables,
        mut history: Option<&mut Vec<HistoryDraft>>,
    ) -> DataResult<Flushed> {
        let table = tables.table_mut::<T>();
        let mut flushed = Flushed::default();

        for entry in tracker.pending::<T>().into_iter().filter(|e| e.state == phase) {
            let mut row = entry.current;
            match phase {
                EntryState::Deleted => table.delete(&row.key())?,
                EntryState::Modified => table.replace(row.clone())?,
                _ => {
                    if let Some(id) = table.insert(&mut row)? {
                        flushed.generated.push((entry.ticket, id));
                    }
                }
            }
            if let Some(drafts) = history.as_deref_mut() {
                drafts.push(HistoryDraft::capture(&row, phase)?);
            }
            flushed.affected += 1;
        }
        Ok(flushed)
    }

    fn accept(&self, tracker: &mut ChangeTracker, generated: &[(EntryTicket, i64)]) {
        tracker.accept::<T>(generated);
    }
}

/// A session over a [`MemoryStore`].
///
/// Raw SQL sources are not supported.
pub struct MemorySession {
    store: Arc<MemoryStore>,
    model: Arc<Model>,
    state: tokio::sync::Mutex<SessionState<dyn MemoryBinding>>,
}

impl MemorySession {
    /// Open a session with no global filters.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self::with_model(store, Model::empty())
    }

    pub fn with_model(store: Arc<MemoryStore>, model: Arc<Model>) -> Self {
        debug!(store = %store.name(), "Opening memory session");
        Self {
            store,
            model,
            state: tokio::sync::Mutex::new(SessionState::new()),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    async fn round_trip(&self) -> DataResult<()> {
        tokio::task::yield_now().await;
        self.store.open().map(drop)
    }

    fn reject_sql<T: 'static>(query: &Query<T>) -> DataResult<()> {
        match query.source() {
            Source::Table => Ok(()),
            Source::Sql(_) => Err(DataError::not_supported(
                "the memory session cannot execute raw SQL",
            )),
        }
    }

    /// Apply every binding to a working copy of the store, then swap it in.
    fn flush(
        &self,
        state: &mut SessionState<dyn MemoryBinding>,
        options: SaveOptions,
    ) -> DataResult<u64> {
        let bindings = state.bindings();
        let mut inner = self.store.open()?;
        let mut working = inner.tables.clone();
        let mut drafts = Vec::new();
        let mut outcomes: Vec<Flushed> = bindings.iter().map(|_| Flushed::default()).collect();
        let mut affected = 0;

        for phase in PHASES {
            for index in phase_order(phase, bindings.len()) {
                let history = options.auto_history.then_some(&mut drafts);
                let flushed = bindings[index].apply(phase, &state.tracker, &mut working, history)?;
                affected += flushed.affected;
                outcomes[index].absorb(flushed);
            }
        }

        let history = working.table_mut::<AutoHistory>();
        for draft in drafts {
            let mut record = draft.into_record();
            history.insert(&mut record)?;
            affected += 1;
        }

        inner.tables = working;
        drop(inner);

        for (binding, flushed) in bindings.iter().zip(outcomes) {
            binding.accept(&mut state.tracker, &flushed.generated);
        }
        Ok(affected)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn save_changes(&self, options: SaveOptions) -> DataResult<u64> {
        let mut state = acquire(&self.state)?;
        self.round_trip().await?;

        let pending = state.tracker.pending_changes();
        if pending == 0 {
            return Ok(0);
        }

        let start = Instant::now();
        let affected = self.flush(&mut state, options).inspect_err(|e| {
            error!(store = %self.store.name(), pending, error = %e, "Commit failed");
        })?;

        info!(
            store = %self.store.name(),
            affected,
            auto_history = options.auto_history,
            duration_ms = start.elapsed().as_millis() as u64,
            "Committed changes"
        );
        Ok(affected)
    }

    async fn ping(&self) -> DataResult<()> {
        let _state = acquire(&self.state)?;
        self.round_trip().await
    }

    fn connection_descriptor(&self) -> String {
        format!("memory://{}", self.store.name())
    }

    async fn pending_changes(&self) -> DataResult<usize> {
        Ok(acquire(&self.state)?.tracker.pending_changes())
    }

    async fn close(&self) -> DataResult<()> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| DataError::invalid_operation("cannot close a session while it is in use"))?;
        if !state.closed {
            state.closed = true;
            state.tracker.clear();
            info!(store = %self.store.name(), "Memory session closed");
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> EntitySet<T> for MemorySession {
    async fn count(&self, query: &Query<T>) -> DataResult<u64> {
        let _state = acquire(&self.state)?;
        self.round_trip().await?;
        Self::reject_sql(query)?;
        let rows = self.store.open()?.tables.rows::<T>();
        Ok(eval::count(&rows, query, &self.model))
    }

    async fn fetch(&self, query: &Query<T>, window: Window) -> DataResult<Vec<T>> {
        let mut state = acquire(&self.state)?;
        self.round_trip().await?;
        Self::reject_sql(query)?;

        let (rows, related) = {
            let inner = self.store.open()?;
            let mut related = RelatedRows::new();
            for navigation in query.navigations() {
                let target = navigation.target();
                if related.contains(target) {
                    continue;
                }
                if let Some(table) = inner.tables.map.get(&target) {
                    related.insert(target, table.related(&self.model, query.filter_policy()));
                }
            }
            (inner.tables.rows::<T>(), related)
        };

        let mut rows = window.slice(eval::select(rows, query, &self.model));
        if query.tracking() == Tracking::Tracked {
            rows = rows.into_iter().map(|row| state.tracker.attach(row)).collect();
        }
        related.attach(&mut rows, query.navigations());

        debug!(entity = T::NAME, rows = rows.len(), tracking = ?query.tracking(), "Fetched rows");
        Ok(rows)
    }

    async fn find(&self, key: &T::Key) -> DataResult<Option<T>> {
        let mut state = acquire(&self.state)?;
        if let Some(tracked) = state.tracker.find::<T>(key) {
            return Ok(tracked);
        }
        self.round_trip().await?;
        let row = self
            .store
            .open()?
            .tables
            .table::<T>()
            .and_then(|t| t.position(key).map(|i| t.rows[i].clone()));
        Ok(row.map(|row| state.tracker.attach(row)))
    }

    async fn add(&self, entity: T) -> DataResult<Staged<T>> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(|| Arc::new(Bound::<T>(PhantomData)));
        state.tracker.add(entity)
    }

    async fn update(&self, entity: T) -> DataResult<()> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(|| Arc::new(Bound::<T>(PhantomData)));
        state.tracker.update(entity)
    }

    async fn remove(&self, entity: T) -> DataResult<()> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(|| Arc::new(Bound::<T>(PhantomData)));
        state.tracker.remove(entity);
        Ok(())
    }

    async fn execute_delete(&self, predicate: &Predicate<T>) -> DataResult<u64> {
        let _state = acquire(&self.state)?;
        self.round_trip().await?;
        let mut inner = self.store.open()?;
        let table = inner.tables.table_mut::<T>();
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !(self.model.admits(FilterPolicy::Apply, row) && predicate.matches(row)));
        let deleted = (before - table.rows.len()) as u64;
        debug!(entity = T::NAME, deleted, "Executed bulk delete");
        Ok(deleted)
    }

    async fn tracked(&self, ticket: EntryTicket) -> DataResult<Option<T>> {
        Ok(acquire(&self.state)?.tracker.tracked::<T>(ticket))
    }
}
