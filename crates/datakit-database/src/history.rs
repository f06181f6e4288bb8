//! Automatic audit history written alongside committed changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use datakit_core::result::DataResult;
use datakit_core::traits::Entity;
use datakit_core::types::SqlValue;

use crate::session::sqlite::SqlEntity;
use crate::tracking::EntryState;

/// One audit record per committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AutoHistory {
    /// Store-generated identifier.
    pub id: i64,
    /// Debug rendering of the changed row's key.
    pub row_id: String,
    /// Entity name of the changed row.
    pub table_name: String,
    /// JSON snapshot of the row as written (or as last tracked, for deletions).
    pub changed: String,
    /// `Added`, `Modified`, or `Deleted`.
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl AutoHistory {
    /// Parse the JSON snapshot.
    pub fn changed_json(&self) -> DataResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.changed)?)
    }
}

impl Entity for AutoHistory {
    type Key = i64;
    const NAME: &'static str = "auto_history";

    fn key(&self) -> i64 {
        self.id
    }

    fn has_transient_key(&self) -> bool {
        self.id == 0
    }

    fn assign_key(&mut self, generated: i64) {
        self.id = generated;
    }

    fn generated_key(&self) -> Option<i64> {
        Some(self.id)
    }
}

impl SqlEntity for AutoHistory {
    const KEY_COLUMN: &'static str = "id";

    fn key_param(key: &i64) -> SqlValue {
        SqlValue::Integer(*key)
    }

    fn values(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("row_id", self.row_id.clone().into()),
            ("table_name", self.table_name.clone().into()),
            ("changed", self.changed.clone().into()),
            ("kind", self.kind.clone().into()),
            ("created_at", self.created_at.to_rfc3339().into()),
        ]
    }
}

/// A history record before the store assigns its id.
#[derive(Debug, Clone)]
pub(crate) struct HistoryDraft(AutoHistory);

impl HistoryDraft {
    /// Snapshot one change of `T`.
    pub(crate) fn capture<T: Entity>(entity: &T, state: EntryState) -> DataResult<Self> {
        Ok(Self(AutoHistory {
            id: 0,
            row_id: format!("{:?}", entity.key()),
            table_name: T::NAME.to_string(),
            changed: serde_json::to_string(entity)?,
            kind: state.as_str().to_string(),
            created_at: Utc::now(),
        }))
    }

    pub(crate) fn into_record(self) -> AutoHistory {
        self.0
    }
}
