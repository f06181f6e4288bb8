//! Unit of work: one session plus the repositories sharing it.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use datakit_core::error::DataError;
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntitySet, SaveOptions, Session};

use crate::repository::EntityRepository;

/// Session handle shared by a unit of work and its repositories.
pub(crate) struct Shared<S> {
    session: S,
    disposed: AtomicBool,
}

impl<S: Session> Shared<S> {
    /// The session, unless the owning unit of work was disposed.
    pub(crate) fn session(&self) -> DataResult<&S> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DataError::invalid_operation(
                "the unit of work owning this repository has been disposed",
            ));
        }
        Ok(&self.session)
    }
}

/// A repository type the unit of work can build and cache.
///
/// Specialized repositories wrap the generic one; each concrete type gets
/// its own cache slot even when it targets the same entity.
pub trait RepositoryVariant<S: Session>: Send + Sync + Sized + 'static {
    type Entity: Entity;

    fn from_base(base: EntityRepository<Self::Entity, S>) -> Self;
}

impl<T, S> RepositoryVariant<S> for EntityRepository<T, S>
where
    T: Entity,
    S: EntitySet<T>,
{
    type Entity = T;

    fn from_base(base: EntityRepository<T, S>) -> Self {
        base
    }
}

/// Cache key: entity type plus concrete repository type name.
type RepositoryKey = (TypeId, &'static str);

/// Owns one session and memoizes one repository per entity/repository type.
///
/// A unit of work is single-owner: it is not meant to be shared between
/// concurrently running tasks. Open one per task instead.
pub struct UnitOfWork<S: Session> {
    shared: Arc<Shared<S>>,
    repositories: HashMap<RepositoryKey, Box<dyn Any + Send + Sync>>,
}

impl<S: Session> UnitOfWork<S> {
    pub fn new(session: S) -> Self {
        debug!(connection = %session.connection_descriptor(), "Opening unit of work");
        Self {
            shared: Arc::new(Shared {
                session,
                disposed: AtomicBool::new(false),
            }),
            repositories: HashMap::new(),
        }
    }

    /// The generic repository for `T`, created on first request.
    ///
    /// Repeated calls return the same instance.
    pub fn repository<T: Entity>(&mut self) -> Arc<EntityRepository<T, S>>
    where
        S: EntitySet<T>,
    {
        self.repository_of::<EntityRepository<T, S>>()
    }

    /// A specialized repository, created on first request.
    pub fn repository_of<R>(&mut self) -> Arc<R>
    where
        R: RepositoryVariant<S>,
        S: EntitySet<R::Entity>,
    {
        let key: RepositoryKey = (TypeId::of::<R::Entity>(), type_name::<R>());
        if let Some(cached) = self
            .repositories
            .get(&key)
            .and_then(|slot| slot.downcast_ref::<Arc<R>>())
        {
            return Arc::clone(cached);
        }

        let repository = Arc::new(R::from_base(EntityRepository::new(Arc::clone(&self.shared))));
        self.repositories
            .insert(key, Box::new(Arc::clone(&repository)));
        debug!(
            entity = <R::Entity as Entity>::NAME,
            repository = key.1,
            "Created repository"
        );
        repository
    }

    /// Number of cached repositories.
    pub fn repository_count(&self) -> usize {
        self.repositories.len()
    }

    /// Flush every staged change of every repository atomically.
    pub async fn commit(&self, options: SaveOptions) -> DataResult<u64> {
        let start = Instant::now();
        let affected = self.shared.session()?.save_changes(options).await?;
        info!(
            affected,
            auto_history = options.auto_history,
            duration_ms = start.elapsed().as_millis() as u64,
            "Unit of work committed"
        );
        Ok(affected)
    }

    /// Best-effort liveness probe. Never fails.
    pub async fn can_connect(&self) -> bool {
        let probe = match self.shared.session() {
            Ok(session) => session.ping().await,
            Err(e) => Err(e),
        };
        match probe {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    /// Connection descriptor for diagnostics.
    pub fn db_connection(&self) -> String {
        self.shared.session.connection_descriptor()
    }

    /// The shared session.
    pub fn session(&self) -> &S {
        &self.shared.session
    }

    /// Close the session and invalidate every cached repository.
    ///
    /// Staged changes are discarded. Closing does not close a connection
    /// pool handed to the session by the caller: other sessions may share
    /// it, so the caller closes it once they are done with it.
    pub async fn dispose(mut self) -> DataResult<()> {
        self.shared.disposed.store(true, Ordering::Release);
        self.repositories.clear();
        let closed = self.shared.session.close().await;
        info!("Unit of work disposed");
        closed
    }
}

impl<S: Session> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::Release);
    }
}
