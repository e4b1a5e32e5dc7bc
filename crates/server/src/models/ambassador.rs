//! Ambassador codes, commission transactions and payouts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use flexhub_core::code::CodeTerms;
use flexhub_core::commission::LedgerEntry;
use flexhub_core::{
    AmbassadorCodeId, Cents, CommissionId, CommissionStatus, CommissionType, PayoutId,
    PayoutStatus, UserId,
};

/// A referral code owned by an ambassador.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AmbassadorCode {
    pub id: AmbassadorCodeId,
    pub code: String,
    pub ambassador_id: UserId,
    pub discount_percentage: Decimal,
    pub times_used: i32,
    pub usage_limit: Option<i32>,
    pub total_revenue_cents: Cents,
    pub total_commission_cents: Cents,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AmbassadorCode {
    /// Redemption terms for the commission rules.
    #[must_use]
    pub fn terms(&self) -> CodeTerms {
        CodeTerms {
            id: self.id,
            ambassador_id: self.ambassador_id,
            code: self.code.clone(),
            discount_percentage: self.discount_percentage,
            is_active: self.is_active,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            times_used: self.times_used,
            usage_limit: self.usage_limit,
        }
    }
}

/// One row of the commission ledger.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Commission {
    pub id: CommissionId,
    pub ambassador_id: UserId,
    pub code_id: AmbassadorCodeId,
    pub customer_id: Option<UserId>,
    pub customer_email: Option<String>,
    pub original_amount_cents: Cents,
    pub discount_amount_cents: Cents,
    pub commission_amount_cents: Cents,
    pub commission_percentage: Decimal,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: CommissionType,
    pub status: CommissionStatus,
    pub month_number: Option<i32>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_payment_id: Option<String>,
    pub stripe_transfer_id: Option<String>,
    pub payout_id: Option<PayoutId>,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Commission {
    #[must_use]
    pub const fn ledger_entry(&self) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            ambassador_id: self.ambassador_id,
            code_id: self.code_id,
            status: self.status,
            commission_amount: self.commission_amount_cents,
        }
    }
}

/// A transfer attempt for one ambassador.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payout {
    pub id: PayoutId,
    pub ambassador_id: UserId,
    pub amount_cents: Cents,
    pub commission_count: i32,
    pub status: PayoutStatus,
    pub stripe_transfer_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Earnings overview for one ambassador.
#[derive(Debug, Clone, Serialize)]
pub struct EarningsSummary {
    pub ambassador_id: UserId,
    pub pending_amount_cents: Cents,
    pub total_earned_cents: Cents,
    pub payout_setup_complete: bool,
    pub codes: Vec<AmbassadorCode>,
    pub recent_commissions: Vec<Commission>,
    pub payouts: Vec<Payout>,
}
