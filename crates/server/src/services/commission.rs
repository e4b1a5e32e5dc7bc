//! Ambassador commission ledger operations.
//!
//! The pure rules live in `flexhub_core::commission`; this service loads the
//! rows they need, applies them, and persists the result through the
//! repositories (each write is a single database transaction there).

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use flexhub_core::code::{validate_discount_percentage, validate_window};
use flexhub_core::commission::{CommissionRequest, draft_commission, is_commissionable_month};
use flexhub_core::{
    AmbassadorCodeId, Cents, CodeValue, CommissionError, CommissionType, UserId,
};

use crate::db::{
    AmbassadorCodeRepository, ClawbackOutcome, CodeChanges, CommissionRepository,
    NewAmbassadorCode, NewCommission, PayoutRepository, RepositoryError, UserRepository,
};
use crate::error::AppError;
use crate::models::{AmbassadorCode, Commission, EarningsSummary, User};
use crate::services::stripe::{AccountLink, StripeClient};

/// How many random suffixes to try before giving up on a generated code.
const CODE_GENERATION_ATTEMPTS: usize = 5;
const RECENT_COMMISSIONS: i64 = 25;
const RECENT_PAYOUTS: i64 = 12;

/// A sale or renewal attributed to an ambassador code.
#[derive(Debug, Clone, Deserialize)]
pub struct CommissionInput {
    pub ambassador_id: UserId,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: CommissionType,
    pub original_amount_cents: Cents,
    #[serde(default)]
    pub month_number: Option<i32>,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
    #[serde(default)]
    pub stripe_payment_id: Option<String>,
    /// When the purchase happened; defaults to now.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A paid month of a coaching subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalInput {
    pub ambassador_id: UserId,
    pub code: String,
    pub stripe_subscription_id: String,
    pub month_number: i32,
    pub amount_cents: Cents,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub stripe_payment_id: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// What a renewal produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenewalOutcome {
    Recorded { commission: Commission },
    AlreadyRecorded { commission: Commission },
    /// Month is past the commission window; nothing was written.
    NotCommissionable { month_number: i32 },
}

/// Input for creating a code. Without `code`, one is generated from the
/// ambassador's name.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCodeInput {
    pub ambassador_id: UserId,
    #[serde(default)]
    pub code: Option<String>,
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub usage_limit: Option<i32>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

/// Result of the public code check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CodeValidation {
    pub code: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CodeValidation {
    fn invalid(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            valid: false,
            discount_percentage: None,
            reason: Some(reason.into()),
        }
    }
}

/// Commission ledger service.
#[derive(Debug, Clone)]
pub struct CommissionService {
    pool: PgPool,
    stripe: StripeClient,
    base_url: String,
}

impl CommissionService {
    /// Create a new commission service.
    #[must_use]
    pub fn new(pool: PgPool, stripe: StripeClient, base_url: impl Into<String>) -> Self {
        Self {
            pool,
            stripe,
            base_url: base_url.into(),
        }
    }

    /// Record a commission for a purchase or coaching month.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the ambassador or code does not exist
    /// - `AppError::Commission` if the rules refuse the commission
    /// - `AppError::Database` if the write fails (nothing is written)
    #[instrument(skip(self, input), fields(ambassador_id = %input.ambassador_id, code = %input.code))]
    pub async fn process_commission(&self, input: CommissionInput) -> Result<Commission, AppError> {
        let ambassador = UserRepository::new(&self.pool)
            .get_by_id(input.ambassador_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ambassador {}", input.ambassador_id)))?;

        let code_value = CodeValue::parse(&input.code)?;
        let code = AmbassadorCodeRepository::new(&self.pool)
            .get_by_code(&code_value)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("code {code_value}")))?;

        let request = CommissionRequest {
            kind: input.kind,
            original_amount: input.original_amount_cents,
            month_number: input.month_number,
            occurred_at: input.occurred_at.unwrap_or_else(Utc::now),
        };

        let draft = draft_commission(&ambassador.ambassador_account(), &code.terms(), &request)?;

        let commission = CommissionRepository::new(&self.pool)
            .record(&NewCommission {
                draft,
                customer_id: input.customer_id,
                customer_email: input.customer_email,
                stripe_subscription_id: input.stripe_subscription_id,
                stripe_payment_id: input.stripe_payment_id,
            })
            .await?;

        info!(
            commission_id = %commission.id,
            amount = %commission.commission_amount_cents,
            "Commission recorded"
        );

        Ok(commission)
    }

    /// Record the commission for one month of a coaching subscription.
    ///
    /// Months past the window are acknowledged without writing anything.
    /// A month that is already on the ledger returns the existing row.
    ///
    /// # Errors
    ///
    /// Same as [`Self::process_commission`]; `month_number` below 1 is a
    /// `CommissionError::MissingMonth`.
    #[instrument(skip(self, input), fields(subscription = %input.stripe_subscription_id, month = input.month_number))]
    pub async fn handle_coaching_renewal(
        &self,
        input: RenewalInput,
    ) -> Result<RenewalOutcome, AppError> {
        if input.month_number < 1 {
            return Err(CommissionError::MissingMonth.into());
        }

        if !is_commissionable_month(input.month_number) {
            info!("Renewal past the commission window, skipping");
            return Ok(RenewalOutcome::NotCommissionable {
                month_number: input.month_number,
            });
        }

        let ledger = CommissionRepository::new(&self.pool);
        if let Some(commission) = ledger
            .get_for_subscription_month(&input.stripe_subscription_id, input.month_number)
            .await?
        {
            return Ok(RenewalOutcome::AlreadyRecorded { commission });
        }

        let subscription_id = input.stripe_subscription_id.clone();
        let month_number = input.month_number;

        let result = self
            .process_commission(CommissionInput {
                ambassador_id: input.ambassador_id,
                code: input.code,
                kind: CommissionType::CoachingMonthly,
                original_amount_cents: input.amount_cents,
                month_number: Some(input.month_number),
                customer_id: input.customer_id,
                customer_email: input.customer_email,
                stripe_subscription_id: Some(input.stripe_subscription_id),
                stripe_payment_id: input.stripe_payment_id,
                occurred_at: input.occurred_at,
            })
            .await;

        match result {
            Ok(commission) => Ok(RenewalOutcome::Recorded { commission }),
            // Lost a race with a concurrent delivery of the same renewal.
            Err(AppError::Database(RepositoryError::Conflict(msg))) => {
                match ledger
                    .get_for_subscription_month(&subscription_id, month_number)
                    .await?
                {
                    Some(commission) => Ok(RenewalOutcome::AlreadyRecorded { commission }),
                    None => Err(AppError::Database(RepositoryError::Conflict(msg))),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Reverse the unpaid commissions of a cancelled subscription.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the transaction fails; nothing changes.
    #[instrument(skip(self, reason))]
    pub async fn clawback(
        &self,
        subscription_id: &str,
        reason: &str,
    ) -> Result<ClawbackOutcome, AppError> {
        if subscription_id.trim().is_empty() {
            return Err(AppError::BadRequest("subscription id is required".to_string()));
        }

        let outcome = CommissionRepository::new(&self.pool)
            .clawback(subscription_id, reason)
            .await?;

        if outcome.skipped_paid.is_empty() && outcome.skipped_in_flight.is_empty() {
            info!(
                reversed = outcome.reversed.len(),
                total = %outcome.total_reversed_cents,
                "Commissions clawed back"
            );
        } else {
            warn!(
                reversed = outcome.reversed.len(),
                skipped_paid = outcome.skipped_paid.len(),
                skipped_in_flight = outcome.skipped_in_flight.len(),
                total = %outcome.total_reversed_cents,
                "Clawback left paid or in-flight commissions in place"
            );
        }

        Ok(outcome)
    }

    /// Create an ambassador code.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the ambassador does not exist
    /// - `AppError::BadRequest` if the user cannot hold a code or the code is taken
    /// - `AppError::Code` if the code, discount or window is invalid
    #[instrument(skip(self, input), fields(ambassador_id = %input.ambassador_id))]
    pub async fn create_code(&self, input: CreateCodeInput) -> Result<AmbassadorCode, AppError> {
        validate_discount_percentage(input.discount_percentage)?;
        let valid_from = input.valid_from.unwrap_or_else(Utc::now);
        validate_window(valid_from, input.valid_until)?;
        if input.usage_limit.is_some_and(|limit| limit < 1) {
            return Err(AppError::BadRequest(
                "usage_limit must be at least 1".to_string(),
            ));
        }

        let ambassador = self.require_user(input.ambassador_id).await?;
        if !ambassador.role.can_be_ambassador() {
            return Err(AppError::BadRequest(format!(
                "a {} cannot hold an ambassador code",
                ambassador.role
            )));
        }

        let codes = AmbassadorCodeRepository::new(&self.pool);
        let code = match input.code.as_deref() {
            Some(raw) => {
                let code = CodeValue::parse(raw)?;
                if codes.exists(&code).await? {
                    return Err(AppError::BadRequest(format!("code {code} already exists")));
                }
                code
            }
            None => self.generate_code(&ambassador.name).await?,
        };

        let created = codes
            .create(&NewAmbassadorCode {
                code,
                ambassador_id: ambassador.id,
                discount_percentage: input.discount_percentage,
                usage_limit: input.usage_limit,
                valid_from,
                valid_until: input.valid_until,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(msg) => AppError::BadRequest(msg),
                other => other.into(),
            })?;

        info!(code_id = %created.id, code = %created.code, "Ambassador code created");
        Ok(created)
    }

    async fn generate_code(&self, name: &str) -> Result<CodeValue, AppError> {
        let codes = AmbassadorCodeRepository::new(&self.pool);

        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let suffix: u16 = rand::rng().random_range(0..10_000);
            let candidate = CodeValue::suggest(name, suffix);
            if !codes.exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        Err(AppError::Conflict(
            "could not generate a free code, supply one explicitly".to_string(),
        ))
    }

    /// Update a code's terms.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the code does not exist or
    /// `AppError::Code` if the new terms are invalid.
    #[instrument(skip(self, changes))]
    pub async fn update_code(
        &self,
        id: AmbassadorCodeId,
        changes: CodeChanges,
    ) -> Result<AmbassadorCode, AppError> {
        let codes = AmbassadorCodeRepository::new(&self.pool);
        let current = codes
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("code {id}")))?;

        if let Some(percentage) = changes.discount_percentage {
            validate_discount_percentage(percentage)?;
        }
        if let Some(valid_until) = changes.valid_until {
            validate_window(current.valid_from, valid_until)?;
        }
        if changes.usage_limit.flatten().is_some_and(|limit| limit < 1) {
            return Err(AppError::BadRequest(
                "usage_limit must be at least 1".to_string(),
            ));
        }

        Ok(codes.update(id, &changes).await?)
    }

    /// List codes, optionally for one ambassador.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the query fails.
    pub async fn list_codes(
        &self,
        ambassador_id: Option<UserId>,
    ) -> Result<Vec<AmbassadorCode>, AppError> {
        Ok(AmbassadorCodeRepository::new(&self.pool)
            .list(ambassador_id)
            .await?)
    }

    /// Check whether a code can be redeemed right now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the lookup fails; unknown or unusable
    /// codes are reported in the result, not as errors.
    pub async fn validate_code(&self, raw: &str) -> Result<CodeValidation, AppError> {
        let code = match CodeValue::parse(raw) {
            Ok(code) => code,
            Err(e) => return Ok(CodeValidation::invalid(raw.trim(), e.to_string())),
        };

        let Some(stored) = AmbassadorCodeRepository::new(&self.pool)
            .get_by_code(&code)
            .await?
        else {
            return Ok(CodeValidation::invalid(code.as_str(), "code not found"));
        };

        Ok(match stored.terms().check_usable(Utc::now()) {
            Ok(()) => CodeValidation {
                code: stored.code,
                valid: true,
                discount_percentage: Some(stored.discount_percentage),
                reason: None,
            },
            Err(e) => CodeValidation::invalid(stored.code, e.to_string()),
        })
    }

    /// Balances, codes, recent commissions and payouts for an ambassador.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user does not exist.
    pub async fn earnings(&self, ambassador_id: UserId) -> Result<EarningsSummary, AppError> {
        let user = self.require_user(ambassador_id).await?;

        let codes = AmbassadorCodeRepository::new(&self.pool)
            .list(Some(ambassador_id))
            .await?;
        let recent_commissions = CommissionRepository::new(&self.pool)
            .list_recent(ambassador_id, RECENT_COMMISSIONS)
            .await?;
        let payouts = PayoutRepository::new(&self.pool)
            .list_for_ambassador(ambassador_id, RECENT_PAYOUTS)
            .await?;

        Ok(EarningsSummary {
            ambassador_id,
            pending_amount_cents: user.pending_amount_cents,
            total_earned_cents: user.total_earned_cents,
            payout_setup_complete: user.payout_setup_complete,
            codes,
            recent_commissions,
            payouts,
        })
    }

    /// Create (if needed) the ambassador's Express account and return a
    /// hosted onboarding link.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the user does not exist
    /// - `AppError::BadRequest` if the user cannot be an ambassador
    /// - `AppError::Stripe` if Stripe rejects a call
    #[instrument(skip(self))]
    pub async fn start_connect_onboarding(
        &self,
        ambassador_id: UserId,
    ) -> Result<AccountLink, AppError> {
        let user = self.require_user(ambassador_id).await?;
        if !user.role.can_be_ambassador() {
            return Err(AppError::BadRequest(format!(
                "a {} cannot receive payouts",
                user.role
            )));
        }

        let account_id = if let Some(id) = user.stripe_account_id {
            id
        } else {
            let account = self
                .stripe
                .create_express_account(user.email.as_str(), user.id)
                .await?;
            UserRepository::new(&self.pool)
                .set_stripe_account(user.id, &account.id)
                .await?;
            info!(account_id = %account.id, "Stripe Connect account created");
            account.id
        };

        let base = self.base_url.trim_end_matches('/');
        let link = self
            .stripe
            .create_account_link(
                &account_id,
                &format!("{base}/ambassador/payouts/refresh"),
                &format!("{base}/ambassador/payouts/complete"),
            )
            .await?;

        Ok(link)
    }

    /// Pull the Connect account's state from Stripe and store it.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the user does not exist
    /// - `AppError::BadRequest` if the user has no Connect account yet
    /// - `AppError::Stripe` if the lookup fails
    #[instrument(skip(self))]
    pub async fn refresh_payout_setup(&self, ambassador_id: UserId) -> Result<User, AppError> {
        let user = self.require_user(ambassador_id).await?;
        let account_id = user.stripe_account_id.ok_or_else(|| {
            AppError::BadRequest("ambassador has not started payout setup".to_string())
        })?;

        let account = self.stripe.retrieve_account(&account_id).await?;
        let updated = UserRepository::new(&self.pool)
            .set_payout_setup(user.id, account.payout_ready(), account.payouts_enabled)
            .await?;

        info!(
            payout_setup_complete = updated.payout_setup_complete,
            "Payout setup refreshed"
        );
        Ok(updated)
    }

    async fn require_user(&self, id: UserId) -> Result<User, AppError> {
        UserRepository::new(&self.pool)
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commission_input_from_json() {
        let input: CommissionInput = serde_json::from_str(
            r#"{
                "ambassador_id": 4,
                "code": "kimfit",
                "type": "coaching_monthly",
                "original_amount_cents": 9900,
                "month_number": 2,
                "stripe_subscription_id": "sub_123"
            }"#,
        )
        .unwrap_or_else(|e| panic!("invalid input: {e}"));

        assert_eq!(input.kind, CommissionType::CoachingMonthly);
        assert_eq!(input.original_amount_cents, Cents::new(9900));
        assert_eq!(input.month_number, Some(2));
        assert!(input.occurred_at.is_none());
    }

    #[test]
    fn test_renewal_outcome_is_tagged() {
        let json = serde_json::to_value(RenewalOutcome::NotCommissionable { month_number: 4 })
            .unwrap_or_default();
        assert_eq!(json["outcome"], "not_commissionable");
        assert_eq!(json["month_number"], 4);
    }

    #[test]
    fn test_invalid_code_validation_hides_discount() {
        let result = CodeValidation::invalid("NOPE", "code not found");
        let json = serde_json::to_value(&result).unwrap_or_default();
        assert_eq!(json["valid"], false);
        assert!(json.get("discount_percentage").is_none());
    }
}
