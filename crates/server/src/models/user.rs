//! User accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;

use flexhub_core::commission::AmbassadorAccount;
use flexhub_core::{Cents, Email, UserId, UserRole};

/// A platform user. Ambassadors are users whose role can own a code.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub name: String,
    pub role: UserRole,
    pub stripe_customer_id: Option<String>,
    pub stripe_account_id: Option<String>,
    /// Stripe Connect onboarding finished and payouts enabled.
    pub payout_setup_complete: bool,
    pub payouts_enabled: bool,
    /// Commission earned but not yet transferred.
    pub pending_amount_cents: Cents,
    /// Commission transferred to date.
    pub total_earned_cents: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The parts of this account that gate commission creation.
    #[must_use]
    pub const fn ambassador_account(&self) -> AmbassadorAccount {
        AmbassadorAccount {
            id: self.id,
            payout_setup_complete: self.payout_setup_complete,
        }
    }
}
