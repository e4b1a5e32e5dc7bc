//! Commission ledger rules.
//!
//! Everything here is pure: the server loads the ambassador, the code and the
//! existing ledger rows, asks these functions what to do, and then performs
//! the writes. Keeping the decisions here means "no row is written" is a
//! property of a return value rather than of a rollback.
//!
//! # Lifecycle
//!
//! ```text
//!            claimed by a run        transfer ok
//! pending ──────────────► processing ──────────► paid
//!   │   ▲                     │
//!   │   │ claimed again       │ transfer failed
//!   │   └──────── failed ◄────┘
//!   │               │
//!   └─► reversed ◄──┘   (clawback)
//! ```
//!
//! A `processing` commission belongs to a transfer that may already have
//! moved money, so clawback leaves it alone.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::code::{CodeError, CodeTerms};
use crate::types::{AmbassadorCodeId, Cents, CommissionId, CommissionType, UserId};

/// Coaching subscriptions earn commission for this many months.
pub const MAX_COACHING_COMMISSION_MONTHS: i32 = 3;

/// Commission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "commission_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    /// Earned, waiting for the weekly payout.
    #[default]
    Pending,
    /// Claimed by a payout run; the transfer is in flight.
    Processing,
    /// Transferred to the ambassador.
    Paid,
    /// The last payout attempt failed; retried on the next run.
    Failed,
    /// Clawed back before it was paid.
    Reversed,
}

impl CommissionStatus {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Reversed => "reversed",
        }
    }

    /// Returns true if money is still owed on a commission in this state.
    #[must_use]
    pub const fn is_payable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Reversed)
    }

    /// Returns true if `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Processing | Self::Paid | Self::Failed | Self::Reversed
            ) | (Self::Failed, Self::Processing | Self::Paid | Self::Reversed)
                | (Self::Processing, Self::Paid | Self::Failed)
        )
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `CommissionError::InvalidTransition` for illegal moves, e.g.
    /// reversing a commission that was already paid.
    pub const fn transition(self, next: Self) -> Result<Self, CommissionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CommissionError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while deciding on commissions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    #[error("ambassador {0} has not completed payout setup")]
    PayoutSetupIncomplete(UserId),
    #[error("code {code} does not belong to ambassador {ambassador_id}")]
    CodeOwnerMismatch { code: String, ambassador_id: UserId },
    #[error(transparent)]
    Code(#[from] CodeError),
    #[error("order amount must be positive")]
    InvalidAmount,
    #[error("coaching commissions need a month number of 1 or more")]
    MissingMonth,
    #[error("month {0} is past the 3-month commission window")]
    MonthNotCommissionable(i32),
    #[error("commission rounds to zero")]
    ZeroCommission,
    #[error("cannot move commission from {from} to {to}")]
    InvalidTransition {
        from: CommissionStatus,
        to: CommissionStatus,
    },
}

/// The parts of an ambassador's account that gate commission creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbassadorAccount {
    pub id: UserId,
    pub payout_setup_complete: bool,
}

/// A commission-earning event as reported by checkout or billing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionRequest {
    pub kind: CommissionType,
    /// Price before the ambassador discount.
    pub original_amount: Cents,
    /// Subscription month (coaching only, 1-based).
    pub month_number: Option<i32>,
    pub occurred_at: DateTime<Utc>,
}

/// A commission that passed every rule and is ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionDraft {
    pub ambassador_id: UserId,
    pub code_id: AmbassadorCodeId,
    pub kind: CommissionType,
    pub original_amount: Cents,
    pub discount_amount: Cents,
    pub commission_amount: Cents,
    pub commission_percentage: Decimal,
    pub month_number: Option<i32>,
}

impl CommissionDraft {
    /// Amount the customer actually paid.
    #[must_use]
    pub fn paid_amount(&self) -> Cents {
        self.original_amount - self.discount_amount
    }
}

/// Returns true if the given coaching month earns a commission.
#[must_use]
pub const fn is_commissionable_month(month_number: i32) -> bool {
    month_number >= 1 && month_number <= MAX_COACHING_COMMISSION_MONTHS
}

/// Decide whether a commission may be created and compute its amounts.
///
/// The discount is `discount_percentage`% of the original price; the
/// commission is the same percentage of what the customer paid after the
/// discount.
///
/// # Errors
///
/// - `PayoutSetupIncomplete` if the ambassador cannot be paid yet
/// - `CodeOwnerMismatch` / `Code(..)` if the code is not theirs or not usable
/// - `InvalidAmount`, `MissingMonth`, `MonthNotCommissionable`,
///   `ZeroCommission` for bad or non-earning requests
pub fn draft_commission(
    ambassador: &AmbassadorAccount,
    code: &CodeTerms,
    request: &CommissionRequest,
) -> Result<CommissionDraft, CommissionError> {
    if !ambassador.payout_setup_complete {
        return Err(CommissionError::PayoutSetupIncomplete(ambassador.id));
    }

    if code.ambassador_id != ambassador.id {
        return Err(CommissionError::CodeOwnerMismatch {
            code: code.code.clone(),
            ambassador_id: ambassador.id,
        });
    }

    code.check_usable(request.occurred_at)?;

    if !request.original_amount.is_positive() {
        return Err(CommissionError::InvalidAmount);
    }

    let month_number = match request.kind {
        CommissionType::CoachingMonthly => {
            let month = request
                .month_number
                .filter(|m| *m >= 1)
                .ok_or(CommissionError::MissingMonth)?;
            if !is_commissionable_month(month) {
                return Err(CommissionError::MonthNotCommissionable(month));
            }
            Some(month)
        }
        CommissionType::ProductPurchase => None,
    };

    let percentage = code.discount_percentage;
    let discount_amount = request.original_amount.percentage(percentage);
    let commission_amount = (request.original_amount - discount_amount).percentage(percentage);

    if !commission_amount.is_positive() {
        return Err(CommissionError::ZeroCommission);
    }

    Ok(CommissionDraft {
        ambassador_id: ambassador.id,
        code_id: code.id,
        kind: request.kind,
        original_amount: request.original_amount,
        discount_amount,
        commission_amount,
        commission_percentage: percentage,
        month_number,
    })
}

/// A ledger row as seen by clawback and payout planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: CommissionId,
    pub ambassador_id: UserId,
    pub code_id: AmbassadorCodeId,
    pub status: CommissionStatus,
    pub commission_amount: Cents,
}

/// What a clawback will change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClawbackPlan {
    /// Unpaid commissions to mark reversed.
    pub reversed: Vec<CommissionId>,
    /// Already-paid commissions left untouched.
    pub skipped_paid: Vec<CommissionId>,
    /// Commissions claimed by a payout run in progress, left untouched.
    pub skipped_in_flight: Vec<CommissionId>,
    /// Pending balance to remove per ambassador.
    pub per_ambassador: BTreeMap<UserId, Cents>,
    /// Commission total to remove per code.
    pub per_code: BTreeMap<AmbassadorCodeId, Cents>,
    /// Total reversed amount.
    pub total: Cents,
}

impl ClawbackPlan {
    /// Returns true if nothing will be reversed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reversed.is_empty()
    }
}

/// Plan the reversal of a cancelled subscription's commissions.
///
/// Only payable (pending or failed) entries are reversed. Paid entries are
/// reported in `skipped_paid`, entries claimed by a running payout in
/// `skipped_in_flight`; reversed entries are ignored.
#[must_use]
pub fn plan_clawback(entries: &[LedgerEntry]) -> ClawbackPlan {
    let mut plan = ClawbackPlan::default();

    for entry in entries {
        match entry.status {
            CommissionStatus::Pending | CommissionStatus::Failed => {
                plan.reversed.push(entry.id);
                *plan.per_ambassador.entry(entry.ambassador_id).or_default() +=
                    entry.commission_amount;
                *plan.per_code.entry(entry.code_id).or_default() += entry.commission_amount;
                plan.total += entry.commission_amount;
            }
            CommissionStatus::Paid => plan.skipped_paid.push(entry.id),
            CommissionStatus::Processing => plan.skipped_in_flight.push(entry.id),
            CommissionStatus::Reversed => {}
        }
    }

    plan
}

/// One ambassador's share of a payout run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPlan {
    pub ambassador_id: UserId,
    pub commission_ids: Vec<CommissionId>,
    pub amount: Cents,
}

/// Decide what to pay one ambassador.
///
/// Returns `None` when nothing is payable or the payable total is below
/// `minimum`; the balance then carries over to the next run.
#[must_use]
pub fn plan_payout(
    ambassador_id: UserId,
    entries: &[LedgerEntry],
    minimum: Cents,
) -> Option<PayoutPlan> {
    let payable: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|e| e.ambassador_id == ambassador_id && e.status.is_payable())
        .collect();

    let amount: Cents = payable.iter().map(|e| e.commission_amount).sum();

    if payable.is_empty() || !amount.is_positive() || amount < minimum {
        return None;
    }

    Some(PayoutPlan {
        ambassador_id,
        commission_ids: payable.iter().map(|e| e.id).collect(),
        amount,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn ambassador(setup: bool) -> AmbassadorAccount {
        AmbassadorAccount {
            id: UserId::new(5),
            payout_setup_complete: setup,
        }
    }

    fn code() -> CodeTerms {
        CodeTerms {
            id: AmbassadorCodeId::new(11),
            ambassador_id: UserId::new(5),
            code: "KIMFIT".to_owned(),
            discount_percentage: Decimal::TEN,
            is_active: true,
            valid_from: Utc::now() - Duration::days(1),
            valid_until: None,
            times_used: 3,
            usage_limit: None,
        }
    }

    fn purchase(amount: i64) -> CommissionRequest {
        CommissionRequest {
            kind: CommissionType::ProductPurchase,
            original_amount: Cents::new(amount),
            month_number: None,
            occurred_at: Utc::now(),
        }
    }

    fn coaching(month: i32) -> CommissionRequest {
        CommissionRequest {
            kind: CommissionType::CoachingMonthly,
            original_amount: Cents::new(20_000),
            month_number: Some(month),
            occurred_at: Utc::now(),
        }
    }

    fn entry(id: i32, status: CommissionStatus, amount: i64) -> LedgerEntry {
        LedgerEntry {
            id: CommissionId::new(id),
            ambassador_id: UserId::new(5),
            code_id: AmbassadorCodeId::new(11),
            status,
            commission_amount: Cents::new(amount),
        }
    }

    #[test]
    fn test_payout_setup_required() {
        let result = draft_commission(&ambassador(false), &code(), &purchase(10_000));
        assert_eq!(
            result,
            Err(CommissionError::PayoutSetupIncomplete(UserId::new(5)))
        );
    }

    #[test]
    fn test_product_purchase_amounts() {
        let draft = draft_commission(&ambassador(true), &code(), &purchase(10_000)).unwrap();

        assert_eq!(draft.discount_amount, Cents::new(1_000));
        assert_eq!(draft.paid_amount(), Cents::new(9_000));
        assert_eq!(draft.commission_amount, Cents::new(900));
        assert_eq!(draft.month_number, None);
    }

    #[test]
    fn test_code_must_belong_to_ambassador() {
        let other = CodeTerms {
            ambassador_id: UserId::new(6),
            ..code()
        };
        assert!(matches!(
            draft_commission(&ambassador(true), &other, &purchase(10_000)),
            Err(CommissionError::CodeOwnerMismatch { .. })
        ));
    }

    #[test]
    fn test_unusable_code_rejected() {
        let inactive = CodeTerms {
            is_active: false,
            ..code()
        };
        assert!(matches!(
            draft_commission(&ambassador(true), &inactive, &purchase(10_000)),
            Err(CommissionError::Code(CodeError::Inactive(_)))
        ));
    }

    #[test]
    fn test_amount_must_be_positive() {
        assert_eq!(
            draft_commission(&ambassador(true), &code(), &purchase(0)),
            Err(CommissionError::InvalidAmount)
        );
    }

    #[test]
    fn test_tiny_order_rounds_to_zero() {
        assert_eq!(
            draft_commission(&ambassador(true), &code(), &purchase(3)),
            Err(CommissionError::ZeroCommission)
        );
    }

    #[test]
    fn test_coaching_months_one_to_three_earn() {
        for month in 1..=3 {
            let draft = draft_commission(&ambassador(true), &code(), &coaching(month)).unwrap();
            assert_eq!(draft.month_number, Some(month));
            assert_eq!(draft.commission_amount, Cents::new(1_800));
        }
    }

    #[test]
    fn test_coaching_month_four_earns_nothing() {
        assert_eq!(
            draft_commission(&ambassador(true), &code(), &coaching(4)),
            Err(CommissionError::MonthNotCommissionable(4))
        );
        assert!(!is_commissionable_month(4));
        assert!(!is_commissionable_month(0));
    }

    #[test]
    fn test_coaching_requires_month() {
        let request = CommissionRequest {
            month_number: None,
            ..coaching(1)
        };
        assert_eq!(
            draft_commission(&ambassador(true), &code(), &request),
            Err(CommissionError::MissingMonth)
        );
    }

    #[test]
    fn test_status_transitions() {
        use CommissionStatus::{Failed, Paid, Pending, Reversed};

        assert_eq!(Pending.transition(Paid), Ok(Paid));
        assert_eq!(Pending.transition(Reversed), Ok(Reversed));
        assert_eq!(Failed.transition(Paid), Ok(Paid));
        assert!(Paid.transition(Reversed).is_err());
        assert!(Reversed.transition(Pending).is_err());
        assert!(Paid.is_terminal());
        assert!(Failed.is_payable());
    }

    #[test]
    fn test_claimed_commission_cannot_be_reversed() {
        use CommissionStatus::{Failed, Paid, Pending, Processing, Reversed};

        assert_eq!(Pending.transition(Processing), Ok(Processing));
        assert_eq!(Failed.transition(Processing), Ok(Processing));
        assert_eq!(Processing.transition(Paid), Ok(Paid));
        assert_eq!(Processing.transition(Failed), Ok(Failed));
        assert!(matches!(
            Processing.transition(Reversed),
            Err(CommissionError::InvalidTransition { .. })
        ));
        assert!(!Processing.is_payable());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn test_clawback_skips_claimed_commissions() {
        let entries = [
            entry(1, CommissionStatus::Processing, 1_800),
            entry(2, CommissionStatus::Pending, 700),
        ];

        let plan = plan_clawback(&entries);

        assert_eq!(plan.reversed, vec![CommissionId::new(2)]);
        assert_eq!(plan.skipped_in_flight, vec![CommissionId::new(1)]);
        assert!(plan.skipped_paid.is_empty());
        assert_eq!(plan.total, Cents::new(700));
    }

    #[test]
    fn test_clawback_skips_paid() {
        let entries = [
            entry(1, CommissionStatus::Paid, 1_800),
            entry(2, CommissionStatus::Pending, 1_800),
            entry(3, CommissionStatus::Failed, 500),
            entry(4, CommissionStatus::Reversed, 900),
        ];

        let plan = plan_clawback(&entries);

        assert_eq!(plan.reversed, vec![CommissionId::new(2), CommissionId::new(3)]);
        assert_eq!(plan.skipped_paid, vec![CommissionId::new(1)]);
        assert_eq!(plan.total, Cents::new(2_300));
        assert_eq!(
            plan.per_ambassador.get(&UserId::new(5)),
            Some(&Cents::new(2_300))
        );
        assert_eq!(
            plan.per_code.get(&AmbassadorCodeId::new(11)),
            Some(&Cents::new(2_300))
        );
    }

    #[test]
    fn test_clawback_of_fully_paid_subscription_is_empty() {
        let plan = plan_clawback(&[entry(1, CommissionStatus::Paid, 1_800)]);
        assert!(plan.is_empty());
        assert_eq!(plan.total, Cents::ZERO);
    }

    #[test]
    fn test_payout_plan_respects_minimum() {
        let entries = [
            entry(1, CommissionStatus::Pending, 600),
            entry(2, CommissionStatus::Failed, 400),
            entry(3, CommissionStatus::Paid, 5_000),
            entry(4, CommissionStatus::Processing, 2_000),
        ];

        let plan = plan_payout(UserId::new(5), &entries, Cents::new(1_000)).unwrap();
        assert_eq!(plan.amount, Cents::new(1_000));
        assert_eq!(plan.commission_ids.len(), 2);

        assert!(plan_payout(UserId::new(5), &entries, Cents::new(1_001)).is_none());
        assert!(plan_payout(UserId::new(6), &entries, Cents::ZERO).is_none());
    }
}
