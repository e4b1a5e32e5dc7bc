//! Database operations for the back office `PostgreSQL`.
//!
//! ## Tables
//!
//! - `users` - Accounts, Stripe ids and ambassador balances
//! - `ambassador_codes` - Referral codes and their running totals
//! - `commission_transactions` - The commission ledger
//! - `payouts` - Weekly transfer attempts
//! - `applications` - Coach/affiliate/staff applications
//! - `support_tickets` / `support_ticket_messages` - Support inbox
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p flexhub-cli -- migrate
//! ```
//!
//! Queries are checked at runtime (`query_as::<_, Row>`), so the crate
//! builds without a live database.

pub mod ambassador_codes;
pub mod applications;
pub mod commissions;
pub mod payouts;
pub mod support_tickets;
pub mod users;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use ambassador_codes::{AmbassadorCodeRepository, CodeChanges, NewAmbassadorCode};
pub use applications::{ApplicationFilter, ApplicationRepository, NewApplication, SignedDocument};
pub use commissions::{ClawbackOutcome, CommissionRepository, NewCommission, PayoutClaim};
pub use payouts::PayoutRepository;
pub use support_tickets::{NewTicket, SupportTicketRepository, TicketChanges};
pub use users::{NewUser, UserRepository};

/// Embedded migrations from `crates/server/migrations`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate code).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map a unique violation to `Conflict`, leaving other errors as they are.
    pub(crate) fn conflict_on_unique(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Self::Conflict(message.into())
            }
            _ => Self::Database(err),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
