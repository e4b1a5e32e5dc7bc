//! Database migration command.
//!
//! Applies the migrations embedded from `crates/server/migrations/`.
//!
//! # Environment Variables
//!
//! - `FLEXHUB_DATABASE_URL` - `PostgreSQL` connection string

use flexhub_server::db::MIGRATOR;

use super::{CliError, connect};

/// Run all pending migrations.
pub async fn run() -> Result<(), CliError> {
    let pool = connect().await?;

    tracing::info!("Running migrations...");
    MIGRATOR.run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
