//! Commission ledger repository.
//!
//! Every write that touches more than one table runs in a single
//! transaction: the ledger row, the ambassador's balances and the code's
//! totals always move together.

use serde::Serialize;
use sqlx::PgPool;
use tracing::{instrument, warn};

use flexhub_core::commission::{CommissionDraft, PayoutPlan, plan_clawback, plan_payout};
use flexhub_core::{Cents, CommissionId, UserId};

use super::RepositoryError;
use crate::models::{Commission, Payout};

const SELECT_COMMISSION: &str = r"
    SELECT id, ambassador_id, code_id, customer_id, customer_email,
           original_amount_cents, discount_amount_cents, commission_amount_cents,
           commission_percentage, type, status, month_number,
           stripe_subscription_id, stripe_payment_id, stripe_transfer_id,
           payout_id, status_reason, created_at, paid_at
    FROM commission_transactions
";

/// A validated commission plus the context it was earned in.
#[derive(Debug, Clone)]
pub struct NewCommission {
    pub draft: CommissionDraft,
    pub customer_id: Option<UserId>,
    pub customer_email: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_payment_id: Option<String>,
}

/// Result of reversing a subscription's commissions.
#[derive(Debug, Clone, Serialize)]
pub struct ClawbackOutcome {
    pub subscription_id: String,
    pub reversed: Vec<CommissionId>,
    pub skipped_paid: Vec<CommissionId>,
    pub skipped_in_flight: Vec<CommissionId>,
    pub total_reversed_cents: Cents,
}

/// Result of claiming an ambassador's payable commissions for a run.
#[derive(Debug, Clone)]
pub enum PayoutClaim {
    /// Commissions moved to `processing` under a new `processing` payout.
    Claimed { plan: PayoutPlan, payout: Payout },
    /// Payable total is under the minimum; nothing was claimed.
    BelowMinimum(Cents),
    /// Nothing payable.
    Empty,
}

const PAYOUT_COLUMNS: &str =
    "id, ambassador_id, amount_cents, commission_count, status, stripe_transfer_id, error, created_at, settled_at";

/// Repository for the commission ledger.
pub struct CommissionRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CommissionRepository<'a> {
    /// Create a new commission repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find the coaching commission already recorded for a subscription month.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_for_subscription_month(
        &self,
        subscription_id: &str,
        month_number: i32,
    ) -> Result<Option<Commission>, RepositoryError> {
        let commission = sqlx::query_as::<_, Commission>(&format!(
            r"{SELECT_COMMISSION}
            WHERE stripe_subscription_id = $1
              AND month_number = $2
              AND type = 'coaching_monthly'"
        ))
        .bind(subscription_id)
        .bind(month_number)
        .fetch_optional(self.pool)
        .await?;

        Ok(commission)
    }

    /// Most recent commissions for an ambassador.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_recent(
        &self,
        ambassador_id: UserId,
        limit: i64,
    ) -> Result<Vec<Commission>, RepositoryError> {
        let rows = sqlx::query_as::<_, Commission>(&format!(
            r"{SELECT_COMMISSION}
            WHERE ambassador_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2"
        ))
        .bind(ambassador_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Insert a pending commission and update the running totals.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Conflict` if the subscription month is already
    ///   recorded or the code hit its usage limit in the meantime
    /// - `RepositoryError::Database` if any statement fails (nothing is written)
    #[instrument(skip(self, new), fields(ambassador_id = %new.draft.ambassador_id, code_id = %new.draft.code_id))]
    pub async fn record(&self, new: &NewCommission) -> Result<Commission, RepositoryError> {
        let draft = &new.draft;
        let mut tx = self.pool.begin().await?;

        let code_updated = sqlx::query(
            r"
            UPDATE ambassador_codes SET
                times_used = times_used + 1,
                total_revenue_cents = total_revenue_cents + $2,
                total_commission_cents = total_commission_cents + $3,
                updated_at = NOW()
            WHERE id = $1
              AND (usage_limit IS NULL OR times_used < usage_limit)
            ",
        )
        .bind(draft.code_id)
        .bind(draft.paid_amount())
        .bind(draft.commission_amount)
        .execute(&mut *tx)
        .await?;

        if code_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(
                "code reached its usage limit".to_string(),
            ));
        }

        let commission = sqlx::query_as::<_, Commission>(
            r"
            INSERT INTO commission_transactions (
                ambassador_id, code_id, customer_id, customer_email,
                original_amount_cents, discount_amount_cents, commission_amount_cents,
                commission_percentage, type, status, month_number,
                stripe_subscription_id, stripe_payment_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12)
            RETURNING id, ambassador_id, code_id, customer_id, customer_email,
                      original_amount_cents, discount_amount_cents, commission_amount_cents,
                      commission_percentage, type, status, month_number,
                      stripe_subscription_id, stripe_payment_id, stripe_transfer_id,
                      payout_id, status_reason, created_at, paid_at
            ",
        )
        .bind(draft.ambassador_id)
        .bind(draft.code_id)
        .bind(new.customer_id)
        .bind(new.customer_email.as_deref())
        .bind(draft.original_amount)
        .bind(draft.discount_amount)
        .bind(draft.commission_amount)
        .bind(draft.commission_percentage)
        .bind(draft.kind)
        .bind(draft.month_number)
        .bind(new.stripe_subscription_id.as_deref())
        .bind(new.stripe_payment_id.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            RepositoryError::conflict_on_unique(e, "commission already recorded for this month")
        })?;

        sqlx::query(
            r"
            UPDATE users
            SET pending_amount_cents = pending_amount_cents + $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(draft.ambassador_id)
        .bind(draft.commission_amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(commission)
    }

    /// Reverse the unpaid commissions of a cancelled subscription.
    ///
    /// Rows are locked for the duration of the transaction. Paid commissions
    /// are left alone and reported in `skipped_paid`; commissions claimed by
    /// a payout run are left alone and reported in `skipped_in_flight`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if any statement fails; the
    /// transaction is rolled back and nothing changes.
    #[instrument(skip(self, reason))]
    pub async fn clawback(
        &self,
        subscription_id: &str,
        reason: &str,
    ) -> Result<ClawbackOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, Commission>(&format!(
            r"{SELECT_COMMISSION}
            WHERE stripe_subscription_id = $1
            ORDER BY id
            FOR UPDATE"
        ))
        .bind(subscription_id)
        .fetch_all(&mut *tx)
        .await?;

        let entries: Vec<_> = rows.iter().map(Commission::ledger_entry).collect();
        let plan = plan_clawback(&entries);

        if !plan.is_empty() {
            let ids: Vec<i32> = plan.reversed.iter().map(CommissionId::as_i32).collect();
            sqlx::query(
                r"
                UPDATE commission_transactions
                SET status = 'reversed', status_reason = $2
                WHERE id = ANY($1)
                ",
            )
            .bind(&ids)
            .bind(reason)
            .execute(&mut *tx)
            .await?;

            for (ambassador_id, amount) in &plan.per_ambassador {
                sqlx::query(
                    r"
                    UPDATE users
                    SET pending_amount_cents = GREATEST(pending_amount_cents - $2, 0),
                        updated_at = NOW()
                    WHERE id = $1
                    ",
                )
                .bind(*ambassador_id)
                .bind(*amount)
                .execute(&mut *tx)
                .await?;
            }

            for (code_id, amount) in &plan.per_code {
                sqlx::query(
                    r"
                    UPDATE ambassador_codes
                    SET total_commission_cents = GREATEST(total_commission_cents - $2, 0),
                        updated_at = NOW()
                    WHERE id = $1
                    ",
                )
                .bind(*code_id)
                .bind(*amount)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(ClawbackOutcome {
            subscription_id: subscription_id.to_string(),
            reversed: plan.reversed,
            skipped_paid: plan.skipped_paid,
            skipped_in_flight: plan.skipped_in_flight,
            total_reversed_cents: plan.total,
        })
    }

    /// Claim an ambassador's payable commissions before any money moves.
    ///
    /// Under row locks, the pending and failed commissions are planned with
    /// `minimum`; when a payout is due they become `processing` and point at
    /// a new `processing` payout row. Claimed rows are no longer payable and
    /// clawback skips them, so the later settlement always matches the
    /// transfer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if any statement fails; nothing
    /// is claimed.
    #[instrument(skip(self))]
    pub async fn claim_payable(
        &self,
        ambassador_id: UserId,
        minimum: Cents,
    ) -> Result<PayoutClaim, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, Commission>(&format!(
            r"{SELECT_COMMISSION}
            WHERE ambassador_id = $1 AND status IN ('pending', 'failed')
            ORDER BY created_at, id
            FOR UPDATE"
        ))
        .bind(ambassador_id)
        .fetch_all(&mut *tx)
        .await?;

        let entries: Vec<_> = rows.iter().map(Commission::ledger_entry).collect();

        let Some(plan) = plan_payout(ambassador_id, &entries, minimum) else {
            tx.rollback().await?;
            let total: Cents = entries.iter().map(|e| e.commission_amount).sum();
            return Ok(if total.is_positive() {
                PayoutClaim::BelowMinimum(total)
            } else {
                PayoutClaim::Empty
            });
        };

        let count = i32::try_from(plan.commission_ids.len())
            .map_err(|_| RepositoryError::DataCorruption("too many commissions in payout".into()))?;

        let payout = sqlx::query_as::<_, Payout>(&format!(
            r"
            INSERT INTO payouts (ambassador_id, amount_cents, commission_count, status)
            VALUES ($1, $2, $3, 'processing')
            RETURNING {PAYOUT_COLUMNS}
            "
        ))
        .bind(plan.ambassador_id)
        .bind(plan.amount)
        .bind(count)
        .fetch_one(&mut *tx)
        .await?;

        let ids: Vec<i32> = plan.commission_ids.iter().map(CommissionId::as_i32).collect();
        sqlx::query(
            r"
            UPDATE commission_transactions
            SET status = 'processing', payout_id = $2
            WHERE id = ANY($1)
            ",
        )
        .bind(&ids)
        .bind(payout.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PayoutClaim::Claimed { plan, payout })
    }

    /// Settle a claimed payout whose transfer went through.
    ///
    /// The claimed commissions become `paid` and the amount moves from the
    /// ambassador's pending balance to total earned. Claimed rows cannot be
    /// reversed, so every one of them is settled; a count that differs from
    /// the payout row is logged and never rolls the settlement back.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Conflict` if the payout is no longer `processing`
    /// - `RepositoryError::Database` if any statement fails
    #[instrument(skip(self, payout), fields(payout_id = %payout.id, ambassador_id = %payout.ambassador_id))]
    pub async fn settle_paid(
        &self,
        payout: &Payout,
        transfer_id: &str,
    ) -> Result<Payout, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let settled = sqlx::query_as::<_, Payout>(&format!(
            r"
            UPDATE payouts
            SET status = 'paid', stripe_transfer_id = $2, error = NULL, settled_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {PAYOUT_COLUMNS}
            "
        ))
        .bind(payout.id)
        .bind(transfer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::Conflict(format!("payout {} already settled", payout.id)))?;

        let updated = sqlx::query(
            r"
            UPDATE commission_transactions
            SET status = 'paid', paid_at = NOW(), stripe_transfer_id = $2, status_reason = NULL
            WHERE payout_id = $1 AND status = 'processing'
            ",
        )
        .bind(payout.id)
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?;

        if i64::try_from(updated.rows_affected()).ok() != Some(i64::from(settled.commission_count)) {
            warn!(
                expected = settled.commission_count,
                settled = updated.rows_affected(),
                "Claimed commission count differs from payout"
            );
        }

        sqlx::query(
            r"
            UPDATE users
            SET pending_amount_cents = GREATEST(pending_amount_cents - $2, 0),
                total_earned_cents = total_earned_cents + $2,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(settled.ambassador_id)
        .bind(settled.amount_cents)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(settled)
    }

    /// Settle a claimed payout whose transfer Stripe refused.
    ///
    /// The claimed commissions become `failed`, which makes them payable on
    /// the next run. Balances are untouched.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Conflict` if the payout is no longer `processing`
    /// - `RepositoryError::Database` if any statement fails
    #[instrument(skip(self, payout), fields(payout_id = %payout.id))]
    pub async fn settle_failed(
        &self,
        payout: &Payout,
        error: &str,
    ) -> Result<Payout, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let settled = sqlx::query_as::<_, Payout>(&format!(
            r"
            UPDATE payouts
            SET status = 'failed', error = $2, settled_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {PAYOUT_COLUMNS}
            "
        ))
        .bind(payout.id)
        .bind(error)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::Conflict(format!("payout {} already settled", payout.id)))?;

        sqlx::query(
            r"
            UPDATE commission_transactions
            SET status = 'failed', status_reason = $2
            WHERE payout_id = $1 AND status = 'processing'
            ",
        )
        .bind(payout.id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(settled)
    }
}
