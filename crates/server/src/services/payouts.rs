//! Weekly ambassador payouts through Stripe Connect.
//!
//! A run walks every ambassador with payout setup complete and payable
//! commissions, transfers the total once it reaches the configured minimum,
//! and settles the ledger. One ambassador failing never stops the batch.
//!
//! Commissions are claimed (`processing`) before the transfer is created,
//! so a clawback running at the same time cannot change what is settled.
//! Stripe refusing the transfer releases the claim as `failed`; anything
//! else that leaves the outcome unknown keeps the claim for reconciliation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use flexhub_core::commission::PayoutPlan;
use flexhub_core::{Cents, PayoutId, UserId};

use crate::config::PayoutConfig;
use crate::db::{CommissionRepository, PayoutClaim, UserRepository};
use crate::error::AppError;
use crate::models::{Payout, User};
use crate::services::stripe::{StripeClient, StripeError, Transfer, payout_idempotency_key};

/// What happened to one ambassador in a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AmbassadorPayout {
    Paid {
        ambassador_id: UserId,
        payout_id: PayoutId,
        amount_cents: Cents,
        commission_count: usize,
        transfer_id: String,
    },
    Failed {
        ambassador_id: UserId,
        amount_cents: Cents,
        error: String,
    },
    /// The transfer may have gone through but the ledger could not be
    /// settled. The commissions stay claimed and need reconciling against
    /// Stripe before they can be paid or retried.
    Unsettled {
        ambassador_id: UserId,
        payout_id: PayoutId,
        amount_cents: Cents,
        error: String,
    },
    /// Payable balance is under the minimum and carries over.
    BelowMinimum {
        ambassador_id: UserId,
        amount_cents: Cents,
    },
}

/// Summary of a payout run.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutBatchSummary {
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub paid_count: usize,
    pub failed_count: usize,
    pub unsettled_count: usize,
    pub below_minimum_count: usize,
    pub total_paid_cents: Cents,
    pub results: Vec<AmbassadorPayout>,
}

impl PayoutBatchSummary {
    fn from_results(
        run_date: NaiveDate,
        started_at: DateTime<Utc>,
        results: Vec<AmbassadorPayout>,
    ) -> Self {
        let mut summary = Self {
            run_date,
            started_at,
            finished_at: Utc::now(),
            paid_count: 0,
            failed_count: 0,
            unsettled_count: 0,
            below_minimum_count: 0,
            total_paid_cents: Cents::ZERO,
            results: Vec::new(),
        };

        for result in &results {
            match result {
                AmbassadorPayout::Paid { amount_cents, .. } => {
                    summary.paid_count += 1;
                    summary.total_paid_cents += *amount_cents;
                }
                AmbassadorPayout::Failed { .. } => summary.failed_count += 1,
                AmbassadorPayout::Unsettled { .. } => summary.unsettled_count += 1,
                AmbassadorPayout::BelowMinimum { .. } => summary.below_minimum_count += 1,
            }
        }

        summary.results = results;
        summary
    }
}

/// Payout batch service.
#[derive(Debug, Clone)]
pub struct PayoutService {
    pool: PgPool,
    stripe: StripeClient,
    config: PayoutConfig,
}

impl PayoutService {
    /// Create a new payout service.
    #[must_use]
    pub const fn new(pool: PgPool, stripe: StripeClient, config: PayoutConfig) -> Self {
        Self {
            pool,
            stripe,
            config,
        }
    }

    /// Run payouts for every eligible ambassador.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` only if the list of ambassadors cannot be
    /// loaded; per-ambassador failures are reported in the summary.
    #[instrument(skip(self))]
    pub async fn process_weekly_payouts(&self) -> Result<PayoutBatchSummary, AppError> {
        let started_at = Utc::now();
        let run_date = started_at.date_naive();

        let ambassadors = UserRepository::new(&self.pool)
            .list_payable_ambassadors()
            .await?;

        info!(count = ambassadors.len(), "Starting payout run");

        let mut results = Vec::with_capacity(ambassadors.len());
        for ambassador in &ambassadors {
            match self.pay_ambassador(ambassador, run_date).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    error!(ambassador_id = %ambassador.id, error = %e, "Payout failed");
                    results.push(AmbassadorPayout::Failed {
                        ambassador_id: ambassador.id,
                        amount_cents: Cents::ZERO,
                        error: e.to_string(),
                    });
                }
            }
        }

        let summary = PayoutBatchSummary::from_results(run_date, started_at, results);
        info!(
            paid = summary.paid_count,
            failed = summary.failed_count,
            unsettled = summary.unsettled_count,
            below_minimum = summary.below_minimum_count,
            total = %summary.total_paid_cents,
            "Payout run finished"
        );

        Ok(summary)
    }

    #[instrument(skip(self, ambassador), fields(ambassador_id = %ambassador.id))]
    async fn pay_ambassador(
        &self,
        ambassador: &User,
        run_date: NaiveDate,
    ) -> Result<Option<AmbassadorPayout>, AppError> {
        let Some(destination) = ambassador.stripe_account_id.as_deref() else {
            return Ok(None);
        };

        let ledger = CommissionRepository::new(&self.pool);

        let (plan, payout) = match ledger
            .claim_payable(ambassador.id, self.config.minimum)
            .await?
        {
            PayoutClaim::Claimed { plan, payout } => (plan, payout),
            PayoutClaim::BelowMinimum(amount_cents) => {
                info!(amount = %amount_cents, "Balance below payout minimum, carrying over");
                return Ok(Some(AmbassadorPayout::BelowMinimum {
                    ambassador_id: ambassador.id,
                    amount_cents,
                }));
            }
            PayoutClaim::Empty => return Ok(None),
        };

        let key = payout_idempotency_key(ambassador.id, &plan.commission_ids, run_date);
        let transfer = self
            .stripe
            .create_transfer(plan.amount, destination, ambassador.id, &key)
            .await;

        let settlement = settle(&ledger, &payout, transfer).await;
        let result = settlement.into_result(&plan, payout.id);

        match &result {
            AmbassadorPayout::Paid { transfer_id, .. } => info!(
                payout_id = %payout.id,
                transfer_id = %transfer_id,
                amount = %plan.amount,
                "Ambassador paid"
            ),
            AmbassadorPayout::Failed { error, .. } => warn!(
                payout_id = %payout.id,
                error = %error,
                amount = %plan.amount,
                "Stripe transfer failed"
            ),
            AmbassadorPayout::Unsettled { error, .. } => error!(
                payout_id = %payout.id,
                error = %error,
                amount = %plan.amount,
                "Payout left processing, reconcile with Stripe"
            ),
            AmbassadorPayout::BelowMinimum { .. } => {}
        }

        Ok(Some(result))
    }

    /// Sleep until each scheduled run and process payouts, forever.
    pub async fn run_scheduler(self) {
        info!(
            weekday = %self.config.weekday,
            hour_utc = self.config.hour_utc,
            "Payout scheduler started"
        );

        loop {
            let now = Utc::now();
            let next = next_weekly_run(now, self.config.weekday, self.config.hour_utc);
            info!(next_run = %next, "Next payout run scheduled");

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = self.process_weekly_payouts().await {
                error!(error = %e, "Scheduled payout run failed");
            }
        }
    }
}

/// How a claimed payout ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Paid { transfer_id: String },
    Failed { error: String },
    Unsettled { error: String },
}

impl Settlement {
    /// Decide the settlement from the transfer result and, for transfers
    /// that went through or may have, whether the ledger write succeeded.
    fn decide(transfer: &Result<String, StripeError>, ledger: Result<(), String>) -> Self {
        match (transfer, ledger) {
            (Ok(transfer_id), Ok(())) => Self::Paid {
                transfer_id: transfer_id.clone(),
            },
            (Ok(transfer_id), Err(e)) => Self::Unsettled {
                error: format!("transfer {transfer_id} sent but ledger not settled: {e}"),
            },
            (Err(e), Ok(())) if e.is_rejection() => Self::Failed {
                error: e.to_string(),
            },
            (Err(e), Ok(())) => Self::Unsettled {
                error: format!("transfer outcome unknown: {e}"),
            },
            (Err(e), Err(ledger_error)) => Self::Unsettled {
                error: format!("{e}; ledger not settled: {ledger_error}"),
            },
        }
    }

    fn into_result(self, plan: &PayoutPlan, payout_id: PayoutId) -> AmbassadorPayout {
        let ambassador_id = plan.ambassador_id;
        let amount_cents = plan.amount;

        match self {
            Self::Paid { transfer_id } => AmbassadorPayout::Paid {
                ambassador_id,
                payout_id,
                amount_cents,
                commission_count: plan.commission_ids.len(),
                transfer_id,
            },
            Self::Failed { error } => AmbassadorPayout::Failed {
                ambassador_id,
                amount_cents,
                error,
            },
            Self::Unsettled { error } => AmbassadorPayout::Unsettled {
                ambassador_id,
                payout_id,
                amount_cents,
                error,
            },
        }
    }
}

/// Write the ledger side of a claimed payout.
///
/// A refused transfer releases the claim as `failed`. A transfer with an
/// unknown outcome keeps the claim so the same commissions are never sent
/// twice.
async fn settle(
    ledger: &CommissionRepository<'_>,
    payout: &Payout,
    transfer: Result<Transfer, StripeError>,
) -> Settlement {
    let transfer = transfer.map(|t| t.id);

    let written = match &transfer {
        Ok(transfer_id) => ledger
            .settle_paid(payout, transfer_id)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Err(e) if e.is_rejection() => ledger
            .settle_failed(payout, &e.to_string())
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Err(_) => Ok(()),
    };

    Settlement::decide(&transfer, written)
}

/// The next `weekday` at `hour_utc:00` strictly after `now`.
#[must_use]
pub fn next_weekly_run(now: DateTime<Utc>, weekday: Weekday, hour_utc: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour_utc.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let days_ahead = (7 + i64::from(weekday.num_days_from_monday())
        - i64::from(now.weekday().num_days_from_monday()))
        % 7;

    let candidate = (now.date_naive() + Duration::days(days_ahead))
        .and_time(time)
        .and_utc();

    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use flexhub_core::CommissionId;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn test_next_run_later_same_week() {
        // 2026-03-04 is a Wednesday
        let next = next_weekly_run(at(2026, 3, 4, 8, 0), Weekday::Fri, 10);
        assert_eq!(next, at(2026, 3, 6, 10, 0));
    }

    #[test]
    fn test_next_run_same_day_before_hour() {
        let next = next_weekly_run(at(2026, 3, 2, 9, 59), Weekday::Mon, 10);
        assert_eq!(next, at(2026, 3, 2, 10, 0));
    }

    #[test]
    fn test_next_run_same_day_at_or_after_hour_rolls_a_week() {
        assert_eq!(
            next_weekly_run(at(2026, 3, 2, 10, 0), Weekday::Mon, 10),
            at(2026, 3, 9, 10, 0)
        );
        assert_eq!(
            next_weekly_run(at(2026, 3, 2, 18, 30), Weekday::Mon, 10),
            at(2026, 3, 9, 10, 0)
        );
    }

    #[test]
    fn test_next_run_wraps_past_sunday() {
        // Saturday to Monday
        let next = next_weekly_run(at(2026, 3, 7, 12, 0), Weekday::Mon, 10);
        assert_eq!(next, at(2026, 3, 9, 10, 0));
    }

    #[test]
    fn test_summary_counts() {
        let started = at(2026, 3, 2, 10, 0);
        let summary = PayoutBatchSummary::from_results(
            started.date_naive(),
            started,
            vec![
                AmbassadorPayout::Paid {
                    ambassador_id: UserId::new(1),
                    payout_id: PayoutId::new(10),
                    amount_cents: Cents::new(2500),
                    commission_count: 3,
                    transfer_id: "tr_1".to_string(),
                },
                AmbassadorPayout::Paid {
                    ambassador_id: UserId::new(2),
                    payout_id: PayoutId::new(11),
                    amount_cents: Cents::new(1500),
                    commission_count: 1,
                    transfer_id: "tr_2".to_string(),
                },
                AmbassadorPayout::Failed {
                    ambassador_id: UserId::new(3),
                    amount_cents: Cents::new(4000),
                    error: "account restricted".to_string(),
                },
                AmbassadorPayout::BelowMinimum {
                    ambassador_id: UserId::new(4),
                    amount_cents: Cents::new(300),
                },
            ],
        );

        assert_eq!(summary.paid_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.below_minimum_count, 1);
        assert_eq!(summary.total_paid_cents, Cents::new(4000));
        assert_eq!(summary.results.len(), 4);
    }

    fn rejected() -> StripeError {
        StripeError::Api {
            status: 400,
            code: Some("account_invalid".to_string()),
            message: "Destination account is restricted".to_string(),
        }
    }

    fn timed_out() -> StripeError {
        StripeError::Api {
            status: 503,
            code: None,
            message: "upstream timeout".to_string(),
        }
    }

    #[test]
    fn test_sent_transfer_settles_paid() {
        let settlement = Settlement::decide(&Ok("tr_1".to_string()), Ok(()));
        assert_eq!(
            settlement,
            Settlement::Paid {
                transfer_id: "tr_1".to_string()
            }
        );
    }

    #[test]
    fn test_sent_transfer_with_failed_ledger_keeps_claim() {
        // Money moved: the commissions must not become payable again.
        let settlement = Settlement::decide(
            &Ok("tr_1".to_string()),
            Err("payout 4 already settled".to_string()),
        );
        assert!(matches!(settlement, Settlement::Unsettled { ref error } if error.contains("tr_1")));
    }

    #[test]
    fn test_refused_transfer_releases_claim() {
        let settlement = Settlement::decide(&Err(rejected()), Ok(()));
        assert!(matches!(settlement, Settlement::Failed { ref error } if error.contains("restricted")));
    }

    #[test]
    fn test_unknown_transfer_outcome_keeps_claim() {
        assert!(matches!(
            Settlement::decide(&Err(timed_out()), Ok(())),
            Settlement::Unsettled { .. }
        ));
        assert!(matches!(
            Settlement::decide(&Err(rejected()), Err("connection reset".to_string())),
            Settlement::Unsettled { .. }
        ));
    }

    #[test]
    fn test_settlement_result_carries_plan() {
        let plan = PayoutPlan {
            ambassador_id: UserId::new(7),
            commission_ids: vec![CommissionId::new(1), CommissionId::new(2)],
            amount: Cents::new(2_600),
        };

        let result = Settlement::Unsettled {
            error: "transfer outcome unknown".to_string(),
        }
        .into_result(&plan, PayoutId::new(9));

        assert!(matches!(
            result,
            AmbassadorPayout::Unsettled { ambassador_id, payout_id, amount_cents, .. }
                if ambassador_id == UserId::new(7)
                    && payout_id == PayoutId::new(9)
                    && amount_cents == Cents::new(2_600)
        ));

        let summary = PayoutBatchSummary::from_results(
            at(2026, 3, 2, 10, 0).date_naive(),
            at(2026, 3, 2, 10, 0),
            vec![result],
        );
        assert_eq!(summary.unsettled_count, 1);
        assert_eq!(summary.total_paid_cents, Cents::ZERO);
    }
}
