//! Convenience result type alias for datakit.

use crate::error::DataError;

/// A specialized `Result` type for data-access operations.
pub type DataResult<T> = Result<T, DataError>;
