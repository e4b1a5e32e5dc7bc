//! Status and classification enums shared by the server and CLI.
//!
//! With the `postgres` feature each enum maps onto a Postgres enum type of
//! the same snake_case name (see the server migrations).

use serde::{Deserialize, Serialize};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "user_role", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular shop/coaching customer.
    #[default]
    Customer,
    /// Coach on the marketplace; may hold an ambassador code.
    Coach,
    /// Affiliate promoting the shop; may hold an ambassador code.
    Affiliate,
    /// Internal staff with back-office access.
    Taskforce,
    /// Platform administrator.
    Admin,
}

impl UserRole {
    /// Returns the snake_case name used in storage and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Coach => "coach",
            Self::Affiliate => "affiliate",
            Self::Taskforce => "taskforce",
            Self::Admin => "admin",
        }
    }

    /// Returns true for roles that can own an ambassador code.
    #[must_use]
    pub const fn can_be_ambassador(&self) -> bool {
        matches!(self, Self::Coach | Self::Affiliate | Self::Taskforce)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "coach" => Ok(Self::Coach),
            "affiliate" => Ok(Self::Affiliate),
            "taskforce" => Ok(Self::Taskforce),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid user role: {s}")),
        }
    }
}

/// What someone is applying for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "application_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    Coach,
    Affiliate,
    General,
    Support,
    Taskforce,
}

impl ApplicationType {
    /// Human-readable label for emails.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Coach => "Coach",
            Self::Affiliate => "Affiliate",
            Self::General => "General",
            Self::Support => "Support",
            Self::Taskforce => "Taskforce",
        }
    }

    /// Role granted to the applicant's account when approved, if any.
    #[must_use]
    pub const fn granted_role(&self) -> Option<UserRole> {
        match self {
            Self::Coach => Some(UserRole::Coach),
            Self::Affiliate => Some(UserRole::Affiliate),
            Self::Taskforce => Some(UserRole::Taskforce),
            Self::General | Self::Support => None,
        }
    }
}

/// Where a signed document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "document_source", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    /// Attachment on an inbound email.
    Email,
    /// Uploaded by staff through the back office.
    Upload,
}

/// Kind of commission-earning event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "commission_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    /// One-off shop order.
    ProductPurchase,
    /// One month of a coaching subscription.
    CoachingMonthly,
}

/// Result of a payout attempt for one ambassador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payout_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Commissions claimed; the Stripe transfer has not been settled yet.
    Processing,
    Paid,
    Failed,
}

/// Support ticket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "ticket_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    WaitingOnCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Status after the customer writes back.
    ///
    /// A reply re-opens tickets that were waiting on the customer or already
    /// finished; tickets staff are actively working stay as they are.
    #[must_use]
    pub const fn after_customer_reply(self) -> Self {
        match self {
            Self::WaitingOnCustomer | Self::Resolved | Self::Closed => Self::Open,
            Self::Open | Self::InProgress => self,
        }
    }

    /// Status after staff reply to the customer.
    #[must_use]
    pub const fn after_staff_reply(self) -> Self {
        match self {
            Self::Closed => Self::Closed,
            _ => Self::WaitingOnCustomer,
        }
    }
}

/// Support ticket urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "ticket_priority", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Who wrote a ticket message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "message_author", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum MessageAuthor {
    Customer,
    Staff,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_parse_roundtrip() {
        for role in [
            UserRole::Customer,
            UserRole::Coach,
            UserRole::Affiliate,
            UserRole::Taskforce,
            UserRole::Admin,
        ] {
            assert_eq!(role.as_str().parse::<UserRole>(), Ok(role));
        }
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_ambassador_roles() {
        assert!(UserRole::Coach.can_be_ambassador());
        assert!(UserRole::Taskforce.can_be_ambassador());
        assert!(!UserRole::Customer.can_be_ambassador());
    }

    #[test]
    fn test_customer_reply_reopens_waiting_tickets() {
        assert_eq!(
            TicketStatus::WaitingOnCustomer.after_customer_reply(),
            TicketStatus::Open
        );
        assert_eq!(TicketStatus::Closed.after_customer_reply(), TicketStatus::Open);
        assert_eq!(
            TicketStatus::InProgress.after_customer_reply(),
            TicketStatus::InProgress
        );
    }

    #[test]
    fn test_staff_reply_waits_on_customer() {
        assert_eq!(
            TicketStatus::Open.after_staff_reply(),
            TicketStatus::WaitingOnCustomer
        );
        assert_eq!(TicketStatus::Closed.after_staff_reply(), TicketStatus::Closed);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&TicketStatus::WaitingOnCustomer).ok().as_deref(),
            Some("\"waiting_on_customer\"")
        );
        assert_eq!(
            serde_json::to_string(&CommissionType::CoachingMonthly).ok().as_deref(),
            Some("\"coaching_monthly\"")
        );
    }
}
