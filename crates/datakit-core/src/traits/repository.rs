//! Generic repository trait for entity access.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::result::DataResult;
use crate::traits::entity::Entity;
use crate::traits::session::{EntryTicket, Staged};
use crate::types::filter::Predicate;
use crate::types::pagination::{Page, PageRequest};
use crate::types::query::{Query, QuerySpec, SqlValue};

/// Generic read/write repository for one entity type.
///
/// Reads compose a [`QuerySpec`] and execute it against the shared session.
/// Mutations are staged and only reach storage on commit, with the exception
/// of [`Repository::execute_delete`].
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// The only row matching the spec, `None` when nothing matches.
    ///
    /// Fails with `AmbiguousResult` when more than one row matches.
    async fn single_or_default(&self, spec: QuerySpec<T>) -> DataResult<Option<T>>;

    /// The first row matching the spec under its ordering.
    async fn first_or_default(&self, spec: QuerySpec<T>) -> DataResult<Option<T>>;

    /// Identity lookup.
    async fn get(&self, key: &T::Key) -> DataResult<Option<T>>;

    /// Number of stored rows.
    async fn count(&self) -> DataResult<u64>;

    /// Number of rows matching the predicate.
    async fn count_where(&self, predicate: Predicate<T>) -> DataResult<u64>;

    /// First projected value from rows matching the predicate.
    async fn get_field<R, F>(&self, predicate: Predicate<T>, selector: F) -> DataResult<Option<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static;

    /// Every row matching the spec, unpaged.
    async fn get_all(&self, spec: QuerySpec<T>) -> DataResult<Vec<T>>;

    /// One page of rows matching the spec.
    async fn get_list(&self, spec: QuerySpec<T>, page: PageRequest) -> DataResult<Page<T>>;

    /// [`Repository::get_list`] that aborts when `cancel` fires.
    async fn get_list_cancellable(
        &self,
        spec: QuerySpec<T>,
        page: PageRequest,
        cancel: &CancellationToken,
    ) -> DataResult<Page<T>>;

    /// One page of projected rows. Paging math uses the projected row count.
    async fn get_list_selected<R, F>(
        &self,
        spec: QuerySpec<T>,
        selector: F,
        page: PageRequest,
    ) -> DataResult<Page<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static;

    /// [`Repository::get_list_selected`] that aborts when `cancel` fires.
    async fn get_list_selected_cancellable<R, F>(
        &self,
        spec: QuerySpec<T>,
        selector: F,
        page: PageRequest,
        cancel: &CancellationToken,
    ) -> DataResult<Page<R>>
    where
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static;

    /// A composable query backed by raw SQL with positional parameters.
    fn get_sql(&self, text: &str, params: Vec<SqlValue>) -> Query<T>;

    /// Execute a composed query.
    async fn fetch_query(&self, query: &Query<T>) -> DataResult<Vec<T>>;

    /// Execute a composed query one page at a time.
    async fn paginate_query(&self, query: &Query<T>, page: PageRequest) -> DataResult<Page<T>>;

    /// Stage one entity for insertion.
    async fn add(&self, entity: T) -> DataResult<Staged<T>>;

    /// [`Repository::add`] that refuses to stage once `cancel` fires.
    async fn add_async(&self, entity: T, cancel: &CancellationToken) -> DataResult<Staged<T>>;

    /// Stage several entities for insertion.
    async fn add_range<I>(&self, entities: I) -> DataResult<Vec<Staged<T>>>
    where
        I: IntoIterator<Item = T> + Send;

    /// [`Repository::add_range`] that stops staging once `cancel` fires.
    async fn add_range_async<I>(
        &self,
        entities: I,
        cancel: &CancellationToken,
    ) -> DataResult<Vec<Staged<T>>>
    where
        I: IntoIterator<Item = T> + Send;

    /// Stage a modification. Fails with `InvalidOperation` for untracked entities.
    async fn update(&self, entity: T) -> DataResult<()>;

    async fn update_range<I>(&self, entities: I) -> DataResult<()>
    where
        I: IntoIterator<Item = T> + Send;

    /// Stage a deletion.
    async fn remove(&self, entity: T) -> DataResult<()>;

    async fn remove_range<I>(&self, entities: I) -> DataResult<()>
    where
        I: IntoIterator<Item = T> + Send;

    /// Delete matching rows immediately. Not undone by skipping commit.
    async fn execute_delete(&self, predicate: Predicate<T>) -> DataResult<u64>;

    /// Tracked value behind a staging ticket.
    async fn tracked(&self, ticket: EntryTicket) -> DataResult<Option<T>>;
}
