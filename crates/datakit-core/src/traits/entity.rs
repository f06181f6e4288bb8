//! The entity contract every managed record type fulfils.

use std::fmt::Debug;
use std::hash::Hash;

use serde::Serialize;

/// A caller-defined record managed by a session.
///
/// The core only needs identity comparison; everything else about the shape
/// of `Self` stays opaque. `Serialize` is required so pending changes can be
/// written to the audit history.
///
/// Entities whose key is generated by the store (an auto-increment column)
/// override the three key-generation hooks; entities with natural keys keep
/// the defaults.
pub trait Entity: Clone + Serialize + Send + Sync + 'static {
    /// Primary key type.
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Entity set / table name.
    const NAME: &'static str;

    /// The primary key of this row.
    fn key(&self) -> Self::Key;

    /// Whether the key is a placeholder still waiting for a store-generated value.
    fn has_transient_key(&self) -> bool {
        false
    }

    /// Receive the key value generated by the store on insert.
    fn assign_key(&mut self, _generated: i64) {}

    /// The numeric value of a store-generated key, used to seed sequences.
    fn generated_key(&self) -> Option<i64> {
        None
    }
}
