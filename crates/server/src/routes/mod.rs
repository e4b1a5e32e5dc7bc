//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                  - Liveness
//! GET  /health/ready                            - Database readiness
//!
//! # Ambassador commissions
//! GET   /api/ambassador/codes/{code}/validate   - Public code check
//! GET   /api/ambassador/codes                   - List codes
//! POST  /api/ambassador/codes                   - Create code
//! PATCH /api/ambassador/codes/{code}            - Update code (by id)
//! POST  /api/ambassador/commissions             - Record a commission
//! POST  /api/ambassador/renewals                - Coaching renewal
//! POST  /api/ambassador/subscriptions/{id}/clawback
//! GET   /api/ambassador/{user_id}/earnings
//! POST  /api/ambassador/{user_id}/connect       - Stripe onboarding link
//! POST  /api/ambassador/{user_id}/payout-setup/refresh
//! POST  /api/ambassador/payouts/run             - Manual payout run
//!
//! # Applications
//! POST /api/applications                        - Public submission
//! GET  /api/applications
//! GET  /api/applications/{id}
//! POST /api/applications/{id}/send-documents
//! POST /api/applications/{id}/signed-document   - Multipart upload
//! POST /api/applications/{id}/approve
//! POST /api/applications/{id}/reject
//!
//! # Support tickets
//! POST  /api/support-tickets                    - Public
//! GET   /api/support-tickets
//! GET   /api/support-tickets/{id}
//! POST  /api/support-tickets/{id}/replies
//! PATCH /api/support-tickets/{id}
//!
//! # Mailgun
//! GET|POST|PUT|PATCH /email-webhook
//! ```
//!
//! Everything except the public endpoints and the webhook requires the
//! taskforce bearer token.

use axum::Router;
use serde::{Deserialize, Deserializer};

use crate::state::AppState;

pub mod ambassador;
pub mod applications;
pub mod email_webhook;
pub mod health;
pub mod support_tickets;

/// Default page size for list endpoints.
pub const DEFAULT_LIMIT: i64 = 50;
/// Largest page a client may request.
pub const MAX_LIMIT: i64 = 200;

/// Build the API router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(ambassador::router())
        .merge(applications::router())
        .merge(support_tickets::router())
        .merge(email_webhook::router())
}

/// Clamp client-supplied paging to sane bounds.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH bodies. Use with `#[serde(default)]`.
pub(crate) fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        assignee: Option<Option<i32>>,
    }

    #[test]
    fn test_double_option() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.assignee, None);

        let cleared: Patch = serde_json::from_str(r#"{"assignee": null}"#).unwrap();
        assert_eq!(cleared.assignee, Some(None));

        let set: Patch = serde_json::from_str(r#"{"assignee": 4}"#).unwrap();
        assert_eq!(set.assignee, Some(Some(4)));
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page(None, None), (DEFAULT_LIMIT, 0));
        assert_eq!(page(Some(10_000), Some(-5)), (MAX_LIMIT, 0));
        assert_eq!(page(Some(0), Some(20)), (1, 20));
    }
}
