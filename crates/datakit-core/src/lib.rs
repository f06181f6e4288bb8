//! # datakit-core
//!
//! Core crate for datakit. Contains the entity, session, and repository
//! traits, configuration schemas, query and pagination types, logging
//! bootstrap, and the unified error system.
//!
//! This crate has **no** dependency on any storage engine.

pub mod config;
pub mod error;
pub mod logging;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{DataError, ErrorKind};
pub use result::DataResult;
