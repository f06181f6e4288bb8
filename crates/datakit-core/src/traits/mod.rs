//! Capability traits implemented by sessions and repositories.

pub mod entity;
pub mod repository;
pub mod session;

pub use entity::Entity;
pub use repository::Repository;
pub use session::{EntitySet, EntryTicket, SaveOptions, Session, Staged};
