//! Generic repository over one entity type of a shared session.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use datakit_core::error::DataError;
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntitySet, EntryTicket, Repository, Staged};
use datakit_core::types::{Page, PageRequest, Predicate, Query, QuerySpec, SqlValue, Tracking, Window};

use crate::query::{compose, paginate, paginate_selected};
use crate::unit_of_work::Shared;

/// Read/write façade for `T` over the session owned by a unit of work.
///
/// Holds no state of its own beyond the shared session handle, so every
/// repository of one unit of work observes the same staged changes.
pub struct EntityRepository<T, S> {
    shared: Arc<Shared<S>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S> EntityRepository<T, S>
where
    T: Entity,
    S: EntitySet<T>,
{
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self {
            shared,
            _entity: PhantomData,
        }
    }

    fn session(&self) -> DataResult<&S> {
        self.shared.session()
    }

    fn compose(spec: &QuerySpec<T>) -> Query<T> {
        compose(Query::table(), spec)
    }
}

#[async_trait]
impl<T, S> Repository<T> for EntityRepository<T, S>
where
    T: Entity,
    S: EntitySet<T>,
{
    async fn single_or_default(&self, spec: QuerySpec<T>) -> DataResult<Option<T>> {
        let query = Self::compose(&spec);
        let mut rows = self.session()?.fetch(&query, Window::first(2)).await?;
        if rows.len() > 1 {
            return Err(DataError::ambiguous(format!(
                "more than one {} matched a single-row query",
                T::NAME
            )));
        }
        Ok(rows.pop())
    }

    async fn first_or_default(&self, spec: QuerySpec<T>) -> DataResult<Option<T>> {
        let query = Self::compose(&spec);
        let rows = self.session()?.fetch(&query, Window::first(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn get(&self, key: &T::Key) -> DataResult<Option<T>> {
        self.session()?.find(key).await
    }

    async fn count(&self) -> DataResult<u64> {
        self.session()?.count(&Query::table()).await
    }

    async fn count_where(&self, predicate: Predicate<T>) -> DataResult<u64> {
        let query = Query::table().with_predicate(predicate);
        self.session()?.count(&query).await
    }

    async fn get_field<R, F>(&self, predicate: Predicate<T>, selector: F) -> DataResult<Option<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let query = Query::table()
            .with_tracking(Tracking::NoTracking)
            .with_predicate(predicate);
        let rows = self.session()?.fetch(&query, Window::first(1)).await?;
        Ok(rows.first().map(selector))
    }

    async fn get_all(&self, spec: QuerySpec<T>) -> DataResult<Vec<T>> {
        let query = Self::compose(&spec);
        self.session()?.fetch(&query, Window::all()).await
    }

    async fn get_list(&self, spec: QuerySpec<T>, page: PageRequest) -> DataResult<Page<T>> {
        let query = Self::compose(&spec);
        paginate(self.session()?, &query, page, None).await
    }

    async fn get_list_cancellable(
        &self,
        spec: QuerySpec<T>,
        page: PageRequest,
        cancel: &CancellationToken,
    ) -> DataResult<Page<T>> {
        let query = Self::compose(&spec);
        paginate(self.session()?, &query, page, Some(cancel)).await
    }

    async fn get_list_selected<R, F>(
        &self,
        spec: QuerySpec<T>,
        selector: F,
        page: PageRequest,
    ) -> DataResult<Page<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let query = Self::compose(&spec);
        paginate_selected(self.session()?, &query, selector, page, None).await
    }

    async fn get_list_selected_cancellable<R, F>(
        &self,
        spec: QuerySpec<T>,
        selector: F,
        page: PageRequest,
        cancel: &CancellationToken,
    ) -> DataResult<Page<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let query = Self::compose(&spec);
        paginate_selected(self.session()?, &query, selector, page, Some(cancel)).await
    }

    fn get_sql(&self, text: &str, params: Vec<SqlValue>) -> Query<T> {
        Query::sql(text, params)
    }

    async fn fetch_query(&self, query: &Query<T>) -> DataResult<Vec<T>> {
        self.session()?.fetch(query, Window::all()).await
    }

    async fn paginate_query(&self, query: &Query<T>, page: PageRequest) -> DataResult<Page<T>> {
        paginate(self.session()?, query, page, None).await
    }

    async fn add(&self, entity: T) -> DataResult<Staged<T>> {
        let staged = self.session()?.add(entity).await?;
        debug!(entity = T::NAME, ticket = staged.ticket.0, "Staged insert");
        Ok(staged)
    }

    async fn add_async(&self, entity: T, cancel: &CancellationToken) -> DataResult<Staged<T>> {
        if cancel.is_cancelled() {
            return Err(DataError::cancelled(format!(
                "staging of {} cancelled",
                T::NAME
            )));
        }
        self.add(entity).await
    }

    async fn add_range<I>(&self, entities: I) -> DataResult<Vec<Staged<T>>>
    where
        I: IntoIterator<Item = T> + Send,
    {
        let entities: Vec<T> = entities.into_iter().collect();
        let session = self.session()?;
        let mut staged = Vec::with_capacity(entities.len());
        for entity in entities {
            staged.push(session.add(entity).await?);
        }
        debug!(entity = T::NAME, count = staged.len(), "Staged inserts");
        Ok(staged)
    }

    async fn add_range_async<I>(
        &self,
        entities: I,
        cancel: &CancellationToken,
    ) -> DataResult<Vec<Staged<T>>>
    where
        I: IntoIterator<Item = T> + Send,
    {
        let entities: Vec<T> = entities.into_iter().collect();
        let session = self.session()?;
        let mut staged = Vec::with_capacity(entities.len());
        for entity in entities {
            if cancel.is_cancelled() {
                return Err(DataError::cancelled(format!(
                    "staging of {} cancelled after {} rows",
                    T::NAME,
                    staged.len()
                )));
            }
            staged.push(session.add(entity).await?);
        }
        Ok(staged)
    }

    async fn update(&self, entity: T) -> DataResult<()> {
        self.session()?.update(entity).await
    }

    async fn update_range<I>(&self, entities: I) -> DataResult<()>
    where
        I: IntoIterator<Item = T> + Send,
    {
        let entities: Vec<T> = entities.into_iter().collect();
        let session = self.session()?;
        for entity in entities {
            session.update(entity).await?;
        }
        Ok(())
    }

    async fn remove(&self, entity: T) -> DataResult<()> {
        self.session()?.remove(entity).await
    }

    async fn remove_range<I>(&self, entities: I) -> DataResult<()>
    where
        I: IntoIterator<Item = T> + Send,
    {
        let entities: Vec<T> = entities.into_iter().collect();
        let session = self.session()?;
        for entity in entities {
            session.remove(entity).await?;
        }
        Ok(())
    }

    async fn execute_delete(&self, predicate: Predicate<T>) -> DataResult<u64> {
        self.session()?.execute_delete(&predicate).await
    }

    async fn tracked(&self, ticket: EntryTicket) -> DataResult<Option<T>> {
        self.session()?.tracked(ticket).await
    }
}
