//! SQLite-backed session built on sqlx.
//!
//! Rows are loaded with `query_as`; predicates, global filters, and
//! orderings then evaluate in process. Commits run inside one transaction.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::try_join_all;
use sqlx::query::QueryAs;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use datakit_core::error::{DataError, ErrorKind};
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntitySet, EntryTicket, SaveOptions, Session, Staged};
use datakit_core::types::{FilterPolicy, Predicate, Query, Source, SqlValue, Tracking, Window};

use crate::connection::DatabasePool;
use crate::history::{AutoHistory, HistoryDraft};
use crate::model::Model;
use crate::query::eval::{self, RelatedRows};
use crate::session::{Flushed, PHASES, SessionState, acquire, phase_order};
use crate::tracking::{ChangeTracker, EntryState};

/// An entity stored in a SQLite table named [`Entity::NAME`].
pub trait SqlEntity: Entity + for<'r> FromRow<'r, SqliteRow> + Unpin {
    /// Primary key column.
    const KEY_COLUMN: &'static str;

    /// Bind value for a key.
    fn key_param(key: &Self::Key) -> SqlValue;

    /// Every non-key column with its value, in insert order.
    fn values(&self) -> Vec<(&'static str, SqlValue)>;

    /// Bind value for this row's key.
    fn key_value(&self) -> SqlValue {
        Self::key_param(&self.key())
    }
}

fn storage_error(entity: &str, action: &str, e: sqlx::Error) -> DataError {
    DataError::with_source(
        ErrorKind::Storage,
        format!("Failed to {action} {entity}: {e}"),
        e,
    )
}

fn bind_as<'q, O>(
    query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    value: &SqlValue,
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    match value.clone() {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Integer(v) => query.bind(v),
        SqlValue::Real(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Boolean(v) => query.bind(v),
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: SqlValue) {
    match value {
        SqlValue::Null => builder.push_bind(None::<i64>),
        SqlValue::Integer(v) => builder.push_bind(v),
        SqlValue::Real(v) => builder.push_bind(v),
        SqlValue::Text(v) => builder.push_bind(v),
        SqlValue::Boolean(v) => builder.push_bind(v),
    };
}

async fn load_rows<T: SqlEntity>(pool: &SqlitePool, source: &Source) -> DataResult<Vec<T>> {
    let rows = match source {
        Source::Table => {
            let sql = format!("SELECT * FROM {} ORDER BY {}", T::NAME, T::KEY_COLUMN);
            sqlx::query_as::<_, T>(&sql).fetch_all(pool).await
        }
        Source::Sql(raw) => {
            let mut query = sqlx::query_as::<_, T>(&raw.text);
            for param in &raw.params {
                query = bind_as(query, param);
            }
            query.fetch_all(pool).await
        }
    };
    rows.map_err(|e| storage_error(T::NAME, "query", e))
}

async fn insert_row<T: SqlEntity>(conn: &mut SqliteConnection, row: &T) -> DataResult<i64> {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    if !row.has_transient_key() {
        columns.push(T::KEY_COLUMN);
        values.push(row.key_value());
    }
    for (column, value) in row.values() {
        columns.push(column);
        values.push(value);
    }

    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        T::NAME,
        columns.join(", ")
    ));
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        push_value(&mut builder, value);
    }
    builder.push(")");

    let result = builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| storage_error(T::NAME, "insert", e))?;
    Ok(result.last_insert_rowid())
}

async fn update_row<T: SqlEntity>(conn: &mut SqliteConnection, row: &T) -> DataResult<()> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", T::NAME));
    let values = row.values();
    if values.is_empty() {
        builder.push(format!("{0} = {0}", T::KEY_COLUMN));
    }
    for (i, (column, value)) in values.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(column).push(" = ");
        push_value(&mut builder, value);
    }
    builder.push(format!(" WHERE {} = ", T::KEY_COLUMN));
    push_value(&mut builder, row.key_value());

    let result = builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| storage_error(T::NAME, "update", e))?;
    if result.rows_affected() == 0 {
        return Err(DataError::concurrency_conflict(format!(
            "expected to update 1 {} row with key {:?} but affected 0",
            T::NAME,
            row.key()
        )));
    }
    Ok(())
}

async fn delete_row<T: SqlEntity>(conn: &mut SqliteConnection, key: SqlValue) -> DataResult<u64> {
    let mut builder =
        QueryBuilder::<Sqlite>::new(format!("DELETE FROM {} WHERE {} = ", T::NAME, T::KEY_COLUMN));
    push_value(&mut builder, key);
    let result = builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| storage_error(T::NAME, "delete", e))?;
    Ok(result.rows_affected())
}

/// Type-erased reader/writer for one entity type.
#[async_trait]
trait SqlBinding: Send + Sync {
    /// Every row admitted by the model, as a `Vec<T>`.
    async fn load_related(
        &self,
        pool: &SqlitePool,
        model: &Model,
        policy: FilterPolicy,
    ) -> DataResult<Box<dyn Any + Send + Sync>>;

    /// Write the pending entries of one phase.
    async fn flush(
        &self,
        phase: EntryState,
        tracker: &ChangeTracker,
        conn: &mut SqliteConnection,
        history: Option<&mut Vec<HistoryDraft>>,
    ) -> DataResult<Flushed>;

    fn accept(&self, tracker: &mut ChangeTracker, generated: &[(EntryTicket, i64)]);
}

struct Bound<T>(PhantomData<fn() -> T>);

impl<T: SqlEntity> Bound<T> {
    fn shared() -> Arc<dyn SqlBinding> {
        Arc::new(Self(PhantomData))
    }
}

#[async_trait]
impl<T: SqlEntity> SqlBinding for Bound<T> {
    async fn load_related(
        &self,
        pool: &SqlitePool,
        model: &Model,
        policy: FilterPolicy,
    ) -> DataResult<Box<dyn Any + Send + Sync>> {
        let rows: Vec<T> = load_rows::<T>(pool, &Source::Table)
            .await?
            .into_iter()
            .filter(|row| model.admits(policy, row))
            .collect();
        Ok(Box::new(rows))
    }

    async fn flush(
        &self,
        phase: EntryState,
        tracker: &ChangeTracker,
        conn: &mut SqliteConnection,
        mut history: Option<&mut Vec<HistoryDraft>>,
    ) -> DataResult<Flushed> {
        let mut flushed = Flushed::default();

        for entry in tracker.pending::<T>().into_iter().filter(|e| e.state == phase) {
            let mut row = entry.current;
            match phase {
                EntryState::Deleted => {
                    if delete_row::<T>(conn, row.key_value()).await? == 0 {
                        return Err(DataError::concurrency_conflict(format!(
                            "expected to delete 1 {} row with key {:?} but affected 0",
                            T::NAME,
                            row.key()
                        )));
                    }
                }
                EntryState::Modified => update_row(conn, &row).await?,
                _ => {
                    let id = insert_row(conn, &row).await?;
                    if row.has_transient_key() {
                        row.assign_key(id);
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

/// A session over a SQLite pool.
pub struct SqliteSession {
    pool: DatabasePool,
    model: Arc<Model>,
    state: Mutex<SessionState<dyn SqlBinding>>,
}

/// Builder for [`SqliteSession`].
pub struct SqliteSessionBuilder {
    pool: DatabasePool,
    model: Arc<Model>,
    state: SessionState<dyn SqlBinding>,
}

impl SqliteSessionBuilder {
    pub fn model(mut self, model: Arc<Model>) -> Self {
        self.model = model;
        self
    }

    /// Register an entity type up front.
    ///
    /// Types reached only through eager-load navigations must be registered
    /// here; every other type registers itself on first use.
    pub fn entity<T: SqlEntity>(mut self) -> Self {
        self.state.bind::<T>(Bound::<T>::shared);
        self
    }

    pub fn build(self) -> SqliteSession {
        debug!(url = %self.pool.descriptor(), "Opening SQLite session");
        SqliteSession {
            pool: self.pool,
            model: self.model,
            state: Mutex::new(self.state),
        }
    }
}

impl SqliteSession {
    pub fn builder(pool: DatabasePool) -> SqliteSessionBuilder {
        let mut state = SessionState::new();
        state.bind::<AutoHistory>(Bound::<AutoHistory>::shared);
        SqliteSessionBuilder {
            pool,
            model: Model::empty(),
            state,
        }
    }

    /// A session with no global filters.
    pub fn new(pool: DatabasePool) -> Self {
        Self::builder(pool).build()
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    async fn load_navigations<T: Entity>(
        &self,
        state: &SessionState<dyn SqlBinding>,
        query: &Query<T>,
    ) -> DataResult<RelatedRows> {
        let mut targets: Vec<TypeId> = Vec::new();
        let mut bindings = Vec::new();
        for navigation in query.navigations() {
            let target = navigation.target();
            if targets.contains(&target) {
                continue;
            }
            let binding = state.binding(target).ok_or_else(|| {
                DataError::not_supported(format!(
                    "entity {} is not registered with this session",
                    navigation.target_name()
                ))
            })?;
            targets.push(target);
            bindings.push(binding);
        }

        let pool = self.pool.pool();
        let policy = query.filter_policy();
        let loaded = try_join_all(
            bindings
                .iter()
                .map(|binding| binding.load_related(pool, &self.model, policy)),
        )
        .await?;

        let mut related = RelatedRows::new();
        for (target, rows) in targets.into_iter().zip(loaded) {
            related.insert(target, rows);
        }
        Ok(related)
    }

    async fn flush(
        &self,
        state: &SessionState<dyn SqlBinding>,
        options: SaveOptions,
    ) -> DataResult<(u64, Vec<Flushed>)> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| storage_error("transaction", "begin", e))?;

        let bindings = state.bindings();
        let mut drafts = Vec::new();
        let mut outcomes: Vec<Flushed> = bindings.iter().map(|_| Flushed::default()).collect();
        let mut affected = 0;
        for phase in PHASES {
            for index in phase_order(phase, bindings.len()) {
                let history = options.auto_history.then_some(&mut drafts);
                let flushed = bindings[index]
                    .flush(phase, &state.tracker, &mut tx, history)
                    .await?;
                affected += flushed.affected;
                outcomes[index].absorb(flushed);
            }
        }
        for draft in drafts {
            insert_row(&mut tx, &draft.into_record()).await?;
            affected += 1;
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("transaction", "commit", e))?;
        Ok((affected, outcomes))
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn save_changes(&self, options: SaveOptions) -> DataResult<u64> {
        let mut state = acquire(&self.state)?;
        let pending = state.tracker.pending_changes();
        if pending == 0 {
            return Ok(0);
        }

        let start = Instant::now();
        let (affected, outcomes) = self.flush(&state, options).await.inspect_err(|e| {
            error!(url = %self.pool.descriptor(), pending, error = %e, "Commit failed");
        })?;

        for (binding, flushed) in state.bindings().into_iter().zip(outcomes) {
            binding.accept(&mut state.tracker, &flushed.generated);
        }

        info!(
            url = %self.pool.descriptor(),
            affected,
            auto_history = options.auto_history,
            duration_ms = start.elapsed().as_millis() as u64,
            "Committed changes"
        );
        Ok(affected)
    }

    async fn ping(&self) -> DataResult<()> {
        let _state = acquire(&self.state)?;
        if self.pool.health_check().await? {
            Ok(())
        } else {
            Err(DataError::storage("health check returned an unexpected value"))
        }
    }

    fn connection_descriptor(&self) -> String {
        self.pool.descriptor().to_string()
    }

    async fn pending_changes(&self) -> DataResult<usize> {
        Ok(acquire(&self.state)?.tracker.pending_changes())
    }

    /// Mark the session closed and forget tracked entries.
    ///
    /// The pool belongs to the caller and may back other sessions, so it is
    /// left open; call [`DatabasePool::close`] to release its connections.
    async fn close(&self) -> DataResult<()> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| DataError::invalid_operation("cannot close a session while it is in use"))?;
        if !state.closed {
            state.closed = true;
            state.tracker.clear();
            info!(url = %self.pool.descriptor(), "SQLite session closed");
        }
        Ok(())
    }
}

#[async_trait]
impl<T: SqlEntity> EntitySet<T> for SqliteSession {
    async fn count(&self, query: &Query<T>) -> DataResult<u64> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(Bound::<T>::shared);

        let unfiltered = query.predicates().is_empty()
            && self.model.applicable_filter::<T>(query.filter_policy()).is_none();
        if unfiltered && matches!(query.source(), Source::Table) {
            let sql = format!("SELECT COUNT(*) FROM {}", T::NAME);
            let count = sqlx::query_scalar::<_, i64>(&sql)
                .fetch_one(self.pool.pool())
                .await
                .map_err(|e| storage_error(T::NAME, "count", e))?;
            return Ok(count.max(0) as u64);
        }

        let rows = load_rows::<T>(self.pool.pool(), query.source()).await?;
        Ok(eval::count(&rows, query, &self.model))
    }

    async fn fetch(&self, query: &Query<T>, window: Window) -> DataResult<Vec<T>> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(Bound::<T>::shared);

        let rows = load_rows::<T>(self.pool.pool(), query.source()).await?;
        let related = self.load_navigations(&state, query).await?;

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
        state.bind::<T>(Bound::<T>::shared);
        if let Some(tracked) = state.tracker.find::<T>(key) {
            return Ok(tracked);
        }

        let sql = format!("SELECT * FROM {} WHERE {} = ?", T::NAME, T::KEY_COLUMN);
        let row = bind_as(sqlx::query_as::<_, T>(&sql), &T::key_param(key))
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| storage_error(T::NAME, "find", e))?;
        Ok(row.map(|row| state.tracker.attach(row)))
    }

    async fn add(&self, entity: T) -> DataResult<Staged<T>> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(Bound::<T>::shared);
        state.tracker.add(entity)
    }

    async fn update(&self, entity: T) -> DataResult<()> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(Bound::<T>::shared);
        state.tracker.update(entity)
    }

    async fn remove(&self, entity: T) -> DataResult<()> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(Bound::<T>::shared);
        state.tracker.remove(entity);
        Ok(())
    }

    async fn execute_delete(&self, predicate: &Predicate<T>) -> DataResult<u64> {
        let mut state = acquire(&self.state)?;
        state.bind::<T>(Bound::<T>::shared);

        let doomed: Vec<SqlValue> = load_rows::<T>(self.pool.pool(), &Source::Table)
            .await?
            .iter()
            .filter(|row| self.model.admits(FilterPolicy::Apply, *row) && predicate.matches(row))
            .map(SqlEntity::key_value)
            .collect();

        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| storage_error(T::NAME, "begin delete of", e))?;
        let mut deleted = 0;
        for key in doomed {
            deleted += delete_row::<T>(&mut tx, key).await?;
        }
        tx.commit()
            .await
            .map_err(|e| storage_error(T::NAME, "commit delete of", e))?;

        debug!(entity = T::NAME, deleted, "Executed bulk delete");
        Ok(deleted)
    }

    async fn tracked(&self, ticket: EntryTicket) -> DataResult<Option<T>> {
        Ok(acquire(&self.state)?.tracker.tracked::<T>(ticket))
    }
}
