//! Ambassador code repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use flexhub_core::{AmbassadorCodeId, CodeValue, UserId};

use super::RepositoryError;
use crate::models::AmbassadorCode;

const RETURNING_CODE: &str = r"
    RETURNING id, code, ambassador_id, discount_percentage, times_used, usage_limit,
              total_revenue_cents, total_commission_cents, valid_from, valid_until,
              is_active, created_at, updated_at
";

const SELECT_CODE: &str = r"
    SELECT id, code, ambassador_id, discount_percentage, times_used, usage_limit,
           total_revenue_cents, total_commission_cents, valid_from, valid_until,
           is_active, created_at, updated_at
    FROM ambassador_codes
";

/// Input for creating a code.
#[derive(Debug, Clone)]
pub struct NewAmbassadorCode {
    pub code: CodeValue,
    pub ambassador_id: UserId,
    pub discount_percentage: Decimal,
    pub usage_limit: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Partial update of a code. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct CodeChanges {
    pub discount_percentage: Option<Decimal>,
    pub usage_limit: Option<Option<i32>>,
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
}

/// Repository for ambassador code database operations.
pub struct AmbassadorCodeRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> AmbassadorCodeRepository<'a> {
    /// Create a new ambassador code repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a code by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_id(
        &self,
        id: AmbassadorCodeId,
    ) -> Result<Option<AmbassadorCode>, RepositoryError> {
        let code = sqlx::query_as::<_, AmbassadorCode>(&format!("{SELECT_CODE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(code)
    }

    /// Get a code by its normalized value.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_code(
        &self,
        code: &CodeValue,
    ) -> Result<Option<AmbassadorCode>, RepositoryError> {
        let code = sqlx::query_as::<_, AmbassadorCode>(&format!("{SELECT_CODE} WHERE code = $1"))
            .bind(code.as_str())
            .fetch_optional(self.pool)
            .await?;

        Ok(code)
    }

    /// Returns true if the code is already taken.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn exists(&self, code: &CodeValue) -> Result<bool, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ambassador_codes WHERE code = $1)")
                .bind(code.as_str())
                .fetch_one(self.pool)
                .await?;

        Ok(exists)
    }

    /// List codes, optionally for one ambassador, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(
        &self,
        ambassador_id: Option<UserId>,
    ) -> Result<Vec<AmbassadorCode>, RepositoryError> {
        let codes = sqlx::query_as::<_, AmbassadorCode>(&format!(
            "{SELECT_CODE} WHERE ($1::INTEGER IS NULL OR ambassador_id = $1) ORDER BY created_at DESC"
        ))
        .bind(ambassador_id)
        .fetch_all(self.pool)
        .await?;

        Ok(codes)
    }

    /// Insert a new code.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the code already exists.
    pub async fn create(&self, new: &NewAmbassadorCode) -> Result<AmbassadorCode, RepositoryError> {
        sqlx::query_as::<_, AmbassadorCode>(&format!(
            r"
            INSERT INTO ambassador_codes
                (code, ambassador_id, discount_percentage, usage_limit, valid_from, valid_until)
            VALUES ($1, $2, $3, $4, $5, $6)
            {RETURNING_CODE}
            "
        ))
        .bind(new.code.as_str())
        .bind(new.ambassador_id)
        .bind(new.discount_percentage)
        .bind(new.usage_limit)
        .bind(new.valid_from)
        .bind(new.valid_until)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::conflict_on_unique(e, format!("code {} already exists", new.code)))
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the code does not exist.
    pub async fn update(
        &self,
        id: AmbassadorCodeId,
        changes: &CodeChanges,
    ) -> Result<AmbassadorCode, RepositoryError> {
        sqlx::query_as::<_, AmbassadorCode>(&format!(
            r"
            UPDATE ambassador_codes SET
                discount_percentage = COALESCE($2, discount_percentage),
                usage_limit = CASE WHEN $3 THEN $4 ELSE usage_limit END,
                valid_until = CASE WHEN $5 THEN $6 ELSE valid_until END,
                is_active = COALESCE($7, is_active),
                updated_at = NOW()
            WHERE id = $1
            {RETURNING_CODE}
            "
        ))
        .bind(id)
        .bind(changes.discount_percentage)
        .bind(changes.usage_limit.is_some())
        .bind(changes.usage_limit.flatten())
        .bind(changes.valid_until.is_some())
        .bind(changes.valid_until.flatten())
        .bind(changes.is_active)
        .fetch_optional(self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)
    }
}
