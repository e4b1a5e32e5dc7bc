//! CLI command implementations.

pub mod emails;
pub mod migrate;
pub mod payouts;
pub mod users;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use thiserror::Error;

use flexhub_server::config::ConfigError;
use flexhub_server::db::RepositoryError;
use flexhub_server::error::AppError;

/// Environment variable holding the database URL.
pub const DATABASE_URL_VAR: &str = "FLEXHUB_DATABASE_URL";

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository error.
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Server configuration is incomplete.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A service call failed.
    #[error("{0}")]
    Service(#[from] AppError),

    /// Invalid argument.
    #[error("{0}")]
    InvalidArgument(String),
}

/// Connect to the back-office database named by `FLEXHUB_DATABASE_URL`.
pub async fn connect() -> Result<PgPool, CliError> {
    dotenvy::dotenv().ok();

    let url = std::env::var(DATABASE_URL_VAR)
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar(DATABASE_URL_VAR))?;

    tracing::info!("Connecting to database...");
    Ok(PgPool::connect(url.expose_secret()).await?)
}
