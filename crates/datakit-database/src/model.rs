//! Entity model configuration: per-type global query filters.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use datakit_core::traits::Entity;
use datakit_core::types::{FilterPolicy, Predicate};

/// Model metadata consulted by every session.
#[derive(Default)]
pub struct Model {
    filters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: Vec<&'static str>,
}

impl Model {
    /// Start configuring a model.
    pub fn builder() -> ModelBuilder {
        ModelBuilder {
            model: Model::default(),
        }
    }

    /// A model with no global filters.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The global filter configured for `T`, if any.
    pub fn query_filter<T: Entity>(&self) -> Option<&Predicate<T>> {
        self.filters
            .get(&TypeId::of::<T>())
            .and_then(|f| f.downcast_ref::<Predicate<T>>())
    }

    /// The global filter for `T` when `policy` lets it apply.
    pub fn applicable_filter<T: Entity>(&self, policy: FilterPolicy) -> Option<&Predicate<T>> {
        if policy.applies() {
            self.query_filter::<T>()
        } else {
            None
        }
    }

    /// Whether a row passes the global filter under `policy`.
    pub fn admits<T: Entity>(&self, policy: FilterPolicy, row: &T) -> bool {
        self.applicable_filter::<T>(policy)
            .is_none_or(|filter| filter.matches(row))
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("filtered_entities", &self.names)
            .finish()
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    /// Configure one entity type.
    pub fn entity<T: Entity>(
        mut self,
        configure: impl FnOnce(EntityTypeBuilder<T>) -> EntityTypeBuilder<T>,
    ) -> Self {
        let built = configure(EntityTypeBuilder { filter: None });
        if let Some(filter) = built.filter {
            self.model.filters.insert(TypeId::of::<T>(), Box::new(filter));
            self.model.names.push(T::NAME);
        }
        self
    }

    pub fn build(self) -> Arc<Model> {
        Arc::new(self.model)
    }
}

/// Per-entity configuration.
pub struct EntityTypeBuilder<T> {
    filter: Option<Predicate<T>>,
}

impl<T: Entity> EntityTypeBuilder<T> {
    /// Register a row filter applied to every query over `T` unless bypassed.
    ///
    /// Calling this twice AND-s the filters.
    pub fn has_query_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let next = Predicate::new(f);
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(&next),
            None => next,
        });
        self
    }
}
