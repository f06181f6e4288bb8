//! Database migration runner.

use sqlx::SqlitePool;
use tracing::info;

use datakit_core::error::{DataError, ErrorKind};

/// Run all pending database migrations.
///
/// Creates the tables the data layer itself owns (the audit history).
/// Application tables are the caller's business.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DataError> {
    info!("Running database migrations...");

    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            DataError::with_source(
                ErrorKind::Storage,
                format!("Failed to run migrations: {e}"),
                e,
            )
        })?;

    info!("Database migrations completed successfully");
    Ok(())
}
