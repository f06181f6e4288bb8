//! # datakit-database
//!
//! Query composition and paging, change tracking, the memory and SQLite
//! sessions, the generic repository, and the unit of work.

pub mod blocking;
pub mod connection;
pub mod history;
pub mod migration;
pub mod model;
pub mod query;
pub mod repository;
pub mod session;
pub mod tracking;
pub mod unit_of_work;

pub use blocking::{BlockingRepository, BlockingUnitOfWork};
pub use connection::DatabasePool;
pub use history::AutoHistory;
pub use model::Model;
pub use repository::EntityRepository;
pub use session::{MemorySession, MemoryStore, SqlEntity, SqliteSession};
pub use unit_of_work::{RepositoryVariant, UnitOfWork};
