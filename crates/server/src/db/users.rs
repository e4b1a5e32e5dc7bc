//! User repository.

use sqlx::PgPool;

use flexhub_core::{Email, UserId, UserRole};

use super::RepositoryError;
use crate::models::User;

const SELECT_USER: &str = r"
    SELECT id, email, name, role, stripe_customer_id, stripe_account_id,
           payout_setup_complete, payouts_enabled,
           pending_amount_cents, total_earned_cents, created_at, updated_at
    FROM users
";

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Email,
    pub name: String,
    pub role: UserRole,
}

/// Repository for user database operations.
pub struct UserRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(user)
    }

    /// Get a user by exact (normalized) email.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE email = $1"))
            .bind(email.as_str())
            .fetch_optional(self.pool)
            .await?;

        Ok(user)
    }

    /// Find the first user whose email matches any of `variations`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_by_email_variations(
        &self,
        variations: &[String],
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "{SELECT_USER} WHERE LOWER(email) = ANY($1) ORDER BY id LIMIT 1"
        ))
        .bind(variations)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Create a new user.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the email is taken.
    pub async fn create(&self, new: &NewUser) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (email, name, role)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, role, stripe_customer_id, stripe_account_id,
                      payout_setup_complete, payouts_enabled,
                      pending_amount_cents, total_earned_cents, created_at, updated_at
            ",
        )
        .bind(new.email.as_str())
        .bind(&new.name)
        .bind(new.role)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::conflict_on_unique(e, format!("user {} already exists", new.email)))
    }

    /// Change a user's role.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the user does not exist.
    pub async fn set_role(&self, id: UserId, role: UserRole) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(role)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Store the Stripe Connect account created for an ambassador.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the user does not exist.
    pub async fn set_stripe_account(
        &self,
        id: UserId,
        account_id: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE users SET stripe_account_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(account_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Record the Connect account's onboarding state.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the user does not exist.
    pub async fn set_payout_setup(
        &self,
        id: UserId,
        setup_complete: bool,
        payouts_enabled: bool,
    ) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(
            r"
            UPDATE users
            SET payout_setup_complete = $2, payouts_enabled = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, name, role, stripe_customer_id, stripe_account_id,
                      payout_setup_complete, payouts_enabled,
                      pending_amount_cents, total_earned_cents, created_at, updated_at
            ",
        )
        .bind(id)
        .bind(setup_complete)
        .bind(payouts_enabled)
        .fetch_optional(self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)
    }

    /// Ambassadors that can receive a transfer and have something payable.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_payable_ambassadors(&self) -> Result<Vec<User>, RepositoryError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r"{SELECT_USER}
            WHERE payout_setup_complete
              AND stripe_account_id IS NOT NULL
              AND EXISTS (
                  SELECT 1 FROM commission_transactions c
                  WHERE c.ambassador_id = users.id
                    AND c.status IN ('pending', 'failed')
              )
            ORDER BY id"
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(users)
    }
}
