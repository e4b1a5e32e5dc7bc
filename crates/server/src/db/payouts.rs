//! Payout history repository.

use sqlx::PgPool;

use flexhub_core::UserId;

use super::RepositoryError;
use crate::models::Payout;

/// Repository for payout history.
pub struct PayoutRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PayoutRepository<'a> {
    /// Create a new payout repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Payout attempts for one ambassador, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_ambassador(
        &self,
        ambassador_id: UserId,
        limit: i64,
    ) -> Result<Vec<Payout>, RepositoryError> {
        let payouts = sqlx::query_as::<_, Payout>(
            r"
            SELECT id, ambassador_id, amount_cents, commission_count, status,
                   stripe_transfer_id, error, created_at, settled_at
            FROM payouts
            WHERE ambassador_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            ",
        )
        .bind(ambassador_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(payouts)
    }
}
