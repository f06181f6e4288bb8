//! # datakit
//!
//! A generic data-access layer: composable query specifications, paged
//! reads, a generic repository per entity type, and a unit of work that
//! shares one session between its repositories and commits their staged
//! changes atomically.
//!
//! Storage-independent pieces live in [`core`]; the sessions, repository,
//! and unit of work live in [`database`].

pub use datakit_core as core;
pub use datakit_database as database;

pub use datakit_core::config::{DataConfig, DatabaseConfig, LoggingConfig};
pub use datakit_core::logging::init_logging;
pub use datakit_core::traits::{Entity, EntitySet, Repository, SaveOptions, Session};
pub use datakit_core::types::{
    FETCH_ALL, Include, OrderBy, Page, PageRequest, Predicate, Query, QuerySpec, SqlValue,
};
pub use datakit_core::{DataError, DataResult, ErrorKind};
pub use datakit_database::{
    AutoHistory, BlockingRepository, BlockingUnitOfWork, DatabasePool, EntityRepository,
    MemorySession, MemoryStore, Model, SqlEntity, SqliteSession, UnitOfWork,
};
