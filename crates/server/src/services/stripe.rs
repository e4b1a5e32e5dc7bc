//! Stripe Connect client for ambassador payouts.
//!
//! # API Reference
//!
//! - Base URL: `https://api.stripe.com/v1`
//! - Authentication: secret key as bearer token
//! - Request bodies are form-encoded; nested keys use `a[b]` syntax
//! - Mutating calls carry an `Idempotency-Key` header

use std::sync::Arc;

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

use flexhub_core::{Cents, CommissionId, UserId};

use crate::config::StripeConfig;

/// Errors that can occur when calling Stripe.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe returned an error object.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl StripeError {
    /// Returns true if Stripe answered and refused the request.
    ///
    /// Transport failures, unparseable bodies and 5xx answers leave it
    /// unknown whether the object was created.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    message: Option<String>,
    code: Option<String>,
}

/// A Connect transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub amount: i64,
    pub destination: Option<String>,
}

/// A Connect account, trimmed to the fields we read.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub charges_enabled: bool,
}

impl Account {
    /// Onboarding is done and Stripe will pay out to this account.
    #[must_use]
    pub const fn payout_ready(&self) -> bool {
        self.details_submitted && self.payouts_enabled
    }
}

/// A hosted onboarding link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLink {
    pub url: String,
    pub expires_at: i64,
}

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.inner.api_base)
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    /// Create a new Stripe client.
    #[must_use]
    pub fn new(config: &StripeConfig, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(StripeClientInner {
                client,
                secret_key: config.secret_key.clone(),
                api_base: config.api_base.trim_end_matches('/').to_string(),
            }),
        }
    }

    /// Transfer `amount` to a connected account.
    ///
    /// # Errors
    ///
    /// Returns `StripeError` if the request fails or Stripe rejects it.
    #[instrument(skip(self, idempotency_key), fields(amount = %amount))]
    pub async fn create_transfer(
        &self,
        amount: Cents,
        destination: &str,
        ambassador_id: UserId,
        idempotency_key: &str,
    ) -> Result<Transfer, StripeError> {
        let amount_str = amount.as_i64().to_string();
        let ambassador = ambassador_id.to_string();
        let form = [
            ("amount", amount_str.as_str()),
            ("currency", "usd"),
            ("destination", destination),
            ("description", "FlexHub ambassador commission payout"),
            ("metadata[ambassador_id]", ambassador.as_str()),
        ];

        let transfer: Transfer = self
            .post_form("/transfers", &form, Some(idempotency_key))
            .await?;

        debug!(transfer_id = %transfer.id, "Stripe transfer created");
        Ok(transfer)
    }

    /// Create an Express connected account for an ambassador.
    ///
    /// # Errors
    ///
    /// Returns `StripeError` if the request fails or Stripe rejects it.
    #[instrument(skip(self, email))]
    pub async fn create_express_account(
        &self,
        email: &str,
        ambassador_id: UserId,
    ) -> Result<Account, StripeError> {
        let ambassador = ambassador_id.to_string();
        let form = [
            ("type", "express"),
            ("email", email),
            ("capabilities[transfers][requested]", "true"),
            ("metadata[ambassador_id]", ambassador.as_str()),
        ];
        let key = format!("account-{ambassador_id}");

        self.post_form("/accounts", &form, Some(&key)).await
    }

    /// Create an account onboarding link.
    ///
    /// # Errors
    ///
    /// Returns `StripeError` if the request fails or Stripe rejects it.
    #[instrument(skip(self))]
    pub async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<AccountLink, StripeError> {
        let form = [
            ("account", account_id),
            ("refresh_url", refresh_url),
            ("return_url", return_url),
            ("type", "account_onboarding"),
        ];

        self.post_form("/account_links", &form, None).await
    }

    /// Fetch a connected account.
    ///
    /// # Errors
    ///
    /// Returns `StripeError` if the request fails or Stripe rejects it.
    #[instrument(skip(self))]
    pub async fn retrieve_account(&self, account_id: &str) -> Result<Account, StripeError> {
        let url = format!(
            "{}/accounts/{}",
            self.inner.api_base,
            urlencoding::encode(account_id)
        );
        let response = self
            .inner
            .client
            .get(&url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
        idempotency_key: Option<&str>,
    ) -> Result<T, StripeError> {
        let url = format!("{}{path}", self.inner.api_base);
        let mut request = self
            .inner
            .client
            .post(&url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(form);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| StripeError::Parse(format!("Failed to parse response: {e}")));
        }

        Err(parse_error(status.as_u16(), &body))
    }
}

fn parse_error(status: u16, body: &str) -> StripeError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => StripeError::Api {
            status,
            code: envelope.error.code,
            message: envelope
                .error
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        },
        Err(_) => StripeError::Api {
            status,
            code: None,
            message: body.chars().take(200).collect(),
        },
    }
}

/// Idempotency key for one ambassador's payout on a given day.
///
/// Deterministic in the commission set so a crashed and restarted run cannot
/// transfer the same commissions twice.
#[must_use]
pub fn payout_idempotency_key(
    ambassador_id: UserId,
    commission_ids: &[CommissionId],
    run_date: NaiveDate,
) -> String {
    let mut ids: Vec<i32> = commission_ids.iter().map(CommissionId::as_i32).collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.to_be_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    format!(
        "payout-{ambassador_id}-{run_date}-{}",
        digest.get(..16).unwrap_or(&digest)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_ignores_order() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap_or_default();
        let a = payout_idempotency_key(
            UserId::new(7),
            &[CommissionId::new(3), CommissionId::new(1)],
            date,
        );
        let b = payout_idempotency_key(
            UserId::new(7),
            &[CommissionId::new(1), CommissionId::new(3)],
            date,
        );

        assert_eq!(a, b);
        assert!(a.starts_with("payout-7-2026-03-02-"));
    }

    #[test]
    fn test_idempotency_key_changes_with_set() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap_or_default();
        let a = payout_idempotency_key(UserId::new(7), &[CommissionId::new(1)], date);
        let b = payout_idempotency_key(UserId::new(7), &[CommissionId::new(2)], date);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_stripe_error() {
        let body = r#"{"error":{"message":"Insufficient funds","code":"balance_insufficient","type":"invalid_request_error"}}"#;
        let err = parse_error(400, body);
        assert!(matches!(
            err,
            StripeError::Api { status: 400, ref code, .. } if code.as_deref() == Some("balance_insufficient")
        ));
        assert!(err.to_string().contains("Insufficient funds"));
    }

    #[test]
    fn test_parse_non_json_error() {
        let err = parse_error(502, "<html>bad gateway</html>");
        assert!(matches!(err, StripeError::Api { status: 502, code: None, .. }));
    }

    #[test]
    fn test_only_client_errors_are_rejections() {
        assert!(parse_error(400, r#"{"error":{"message":"No such destination"}}"#).is_rejection());
        assert!(!parse_error(502, "bad gateway").is_rejection());
        assert!(!StripeError::Parse("truncated".to_string()).is_rejection());
    }

    #[test]
    fn test_account_payout_ready() {
        let account: Account =
            serde_json::from_str(r#"{"id":"acct_1","details_submitted":true,"payouts_enabled":false}"#)
                .unwrap_or_else(|_| Account {
                    id: String::new(),
                    details_submitted: false,
                    payouts_enabled: false,
                    charges_enabled: false,
                });
        assert_eq!(account.id, "acct_1");
        assert!(!account.payout_ready());
    }
}
