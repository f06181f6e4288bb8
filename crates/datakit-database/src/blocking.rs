//! Blocking counterparts of the unit of work and repository.
//!
//! Each [`BlockingUnitOfWork`] owns a current-thread Tokio runtime and drives
//! the async operations to completion on it. Do not call these from inside
//! an async context.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use datakit_core::error::{DataError, ErrorKind};
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntitySet, EntryTicket, Repository, SaveOptions, Session, Staged};
use datakit_core::types::{Page, PageRequest, Predicate, Query, QuerySpec, SqlValue};

use crate::repository::EntityRepository;
use crate::unit_of_work::UnitOfWork;

fn build_runtime() -> DataResult<Runtime> {
    Builder::new_current_thread().enable_all().build().map_err(|e| {
        DataError::with_source(
            ErrorKind::Configuration,
            format!("Failed to build blocking runtime: {e}"),
            e,
        )
    })
}

/// A unit of work driven by blocking calls.
pub struct BlockingUnitOfWork<S: Session> {
    runtime: Arc<Runtime>,
    inner: UnitOfWork<S>,
}

impl<S: Session> BlockingUnitOfWork<S> {
    /// Wrap a session that needs no runtime to construct.
    pub fn new(session: S) -> DataResult<Self> {
        Ok(Self {
            runtime: Arc::new(build_runtime()?),
            inner: UnitOfWork::new(session),
        })
    }

    /// Open a session on the owned runtime, e.g. one backed by a sqlx pool.
    pub fn open<F, Fut>(connect: F) -> DataResult<Self>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DataResult<S>>,
    {
        let runtime = build_runtime()?;
        let session = runtime.block_on(connect())?;
        Ok(Self {
            runtime: Arc::new(runtime),
            inner: UnitOfWork::new(session),
        })
    }

    pub fn repository<T: Entity>(&mut self) -> BlockingRepository<T, S>
    where
        S: EntitySet<T>,
    {
        BlockingRepository {
            runtime: Arc::clone(&self.runtime),
            inner: self.inner.repository::<T>(),
        }
    }

    pub fn commit(&self, options: SaveOptions) -> DataResult<u64> {
        self.runtime.block_on(self.inner.commit(options))
    }

    pub fn can_connect(&self) -> bool {
        self.runtime.block_on(self.inner.can_connect())
    }

    pub fn db_connection(&self) -> String {
        self.inner.db_connection()
    }

    /// Run any future on the owned runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn dispose(self) -> DataResult<()> {
        let Self { runtime, inner } = self;
        runtime.block_on(inner.dispose())
    }
}

/// Blocking view of a cached [`EntityRepository`].
pub struct BlockingRepository<T, S> {
    runtime: Arc<Runtime>,
    inner: Arc<EntityRepository<T, S>>,
}

impl<T, S> BlockingRepository<T, S>
where
    T: Entity,
    S: EntitySet<T>,
{
    /// The cached async repository behind this view.
    pub fn inner(&self) -> &Arc<EntityRepository<T, S>> {
        &self.inner
    }

    pub fn single_or_default(&self, spec: QuerySpec<T>) -> DataResult<Option<T>> {
        self.runtime.block_on(self.inner.single_or_default(spec))
    }

    pub fn first_or_default(&self, spec: QuerySpec<T>) -> DataResult<Option<T>> {
        self.runtime.block_on(self.inner.first_or_default(spec))
    }

    pub fn get(&self, key: &T::Key) -> DataResult<Option<T>> {
        self.runtime.block_on(self.inner.get(key))
    }

    pub fn count(&self) -> DataResult<u64> {
        self.runtime.block_on(self.inner.count())
    }

    pub fn count_where(&self, predicate: Predicate<T>) -> DataResult<u64> {
        self.runtime.block_on(self.inner.count_where(predicate))
    }

    pub fn get_field<R, F>(&self, predicate: Predicate<T>, selector: F) -> DataResult<Option<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.runtime.block_on(self.inner.get_field(predicate, selector))
    }

    pub fn get_all(&self, spec: QuerySpec<T>) -> DataResult<Vec<T>> {
        self.runtime.block_on(self.inner.get_all(spec))
    }

    pub fn get_list(&self, spec: QuerySpec<T>, page: PageRequest) -> DataResult<Page<T>> {
        self.runtime.block_on(self.inner.get_list(spec, page))
    }

    pub fn get_list_selected<R, F>(
        &self,
        spec: QuerySpec<T>,
        selector: F,
        page: PageRequest,
    ) -> DataResult<Page<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.runtime
            .block_on(self.inner.get_list_selected(spec, selector, page))
    }

    pub fn get_sql(&self, text: &str, params: Vec<SqlValue>) -> Query<T> {
        self.inner.get_sql(text, params)
    }

    pub fn fetch_query(&self, query: &Query<T>) -> DataResult<Vec<T>> {
        self.runtime.block_on(self.inner.fetch_query(query))
    }

    pub fn paginate_query(&self, query: &Query<T>, page: PageRequest) -> DataResult<Page<T>> {
        self.runtime.block_on(self.inner.paginate_query(query, page))
    }

    pub fn add(&self, entity: T) -> DataResult<Staged<T>> {
        self.runtime.block_on(self.inner.add(entity))
    }

    pub fn add_range(&self, entities: impl IntoIterator<Item = T>) -> DataResult<Vec<Staged<T>>> {
        let entities: Vec<T> = entities.into_iter().collect();
        self.runtime.block_on(self.inner.add_range(entities))
    }

    pub fn update(&self, entity: T) -> DataResult<()> {
        self.runtime.block_on(self.inner.update(entity))
    }

    pub fn update_range(&self, entities: impl IntoIterator<Item = T>) -> DataResult<()> {
        let entities: Vec<T> = entities.into_iter().collect();
        self.runtime.block_on(self.inner.update_range(entities))
    }

    pub fn remove(&self, entity: T) -> DataResult<()> {
        self.runtime.block_on(self.inner.remove(entity))
    }

    pub fn remove_range(&self, entities: impl IntoIterator<Item = T>) -> DataResult<()> {
        let entities: Vec<T> = entities.into_iter().collect();
        self.runtime.block_on(self.inner.remove_range(entities))
    }

    pub fn execute_delete(&self, predicate: Predicate<T>) -> DataResult<u64> {
        self.runtime.block_on(self.inner.execute_delete(predicate))
    }

    pub fn tracked(&self, ticket: EntryTicket) -> DataResult<Option<T>> {
        self.runtime.block_on(self.inner.tracked(ticket))
    }
}
