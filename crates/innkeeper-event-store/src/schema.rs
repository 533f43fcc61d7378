//! Audit store database schema.
//!
//! The tables live in the workspace `migrations/` directory and are embedded
//! at compile time.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// Migrations creating the partitioned event log and its bookkeeping tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies pending migrations. Safe to run on every start.
///
/// # Errors
///
/// Returns the migration error if any migration fails or the applied history
/// diverges from the embedded one.
pub async fn install_schema(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
