//! Pager: count plus bounded fetch, assembled into a [`Page`].

use std::future::Future;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use datakit_core::error::DataError;
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntitySet};
use datakit_core::types::{Page, PageRequest, Query, Tracking, Window};

/// Await a storage round-trip unless `cancel` fires first.
///
/// The token is checked before the round-trip starts, so an already
/// cancelled token never reaches storage.
pub(crate) async fn guarded<F, O>(cancel: Option<&CancellationToken>, round_trip: F) -> DataResult<O>
where
    F: Future<Output = DataResult<O>>,
{
    let Some(token) = cancel else {
        return round_trip.await;
    };
    if token.is_cancelled() {
        return Err(DataError::cancelled("operation cancelled before it started"));
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DataError::cancelled("operation cancelled")),
        result = round_trip => result,
    }
}

/// Execute `query` one page at a time.
///
/// Counts every matching row first, then fetches `skip = index * size`,
/// `take = size`.
pub async fn paginate<T, S>(
    session: &S,
    query: &Query<T>,
    request: PageRequest,
    cancel: Option<&CancellationToken>,
) -> DataResult<Page<T>>
where
    T: Entity,
    S: EntitySet<T> + ?Sized,
{
    let start = Instant::now();

    let count = guarded(cancel, session.count(query)).await?;
    let items = guarded(cancel, session.fetch(query, Window::page(&request))).await?;

    debug!(
        entity = T::NAME,
        index = request.index(),
        size = request.size(),
        count,
        duration_ms = start.elapsed().as_millis() as u64,
        "Fetched page"
    );

    Ok(Page::new(items, request, count))
}

/// Execute `query` one page at a time, projecting every row.
///
/// Projected rows are detached, so the query runs without tracking. The
/// projection does not change the row count.
pub async fn paginate_selected<T, S, R, F>(
    session: &S,
    query: &Query<T>,
    selector: F,
    request: PageRequest,
    cancel: Option<&CancellationToken>,
) -> DataResult<Page<R>>
where
    T: Entity,
    S: EntitySet<T> + ?Sized,
    F: Fn(&T) -> R,
{
    let detached = query.clone().with_tracking(Tracking::NoTracking);
    let page = paginate(session, &detached, request, cancel).await?;
    Ok(page.map(|row| selector(&row)))
}
