//! Ambassador code, commission and payout handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use flexhub_core::{AmbassadorCodeId, UserId};

use super::double_option;
use crate::db::{ClawbackOutcome, CodeChanges};
use crate::error::AppError;
use crate::middleware::RequireTaskforce;
use crate::models::{AmbassadorCode, Commission, EarningsSummary, User};
use crate::services::stripe::AccountLink;
use crate::services::{
    CodeValidation, CommissionInput, CreateCodeInput, PayoutBatchSummary, RenewalInput,
    RenewalOutcome,
};
use crate::state::AppState;

/// Build the ambassador router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/ambassador/codes", get(list_codes).post(create_code))
        .route("/api/ambassador/codes/{code}", patch(update_code))
        .route("/api/ambassador/codes/{code}/validate", get(validate_code))
        .route("/api/ambassador/commissions", post(record_commission))
        .route("/api/ambassador/renewals", post(record_renewal))
        .route(
            "/api/ambassador/subscriptions/{id}/clawback",
            post(clawback),
        )
        .route("/api/ambassador/payouts/run", post(run_payouts))
        .route("/api/ambassador/{user_id}/earnings", get(earnings))
        .route("/api/ambassador/{user_id}/connect", post(connect))
        .route(
            "/api/ambassador/{user_id}/payout-setup/refresh",
            post(refresh_payout_setup),
        )
}

#[derive(Debug, Deserialize)]
pub struct CodesQuery {
    pub ambassador_id: Option<UserId>,
}

/// Body for `PATCH /api/ambassador/codes/{id}`. Nullable fields accept
/// `null` to clear the value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCodeRequest {
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl From<UpdateCodeRequest> for CodeChanges {
    fn from(req: UpdateCodeRequest) -> Self {
        Self {
            discount_percentage: req.discount_percentage,
            usage_limit: req.usage_limit,
            valid_until: req.valid_until,
            is_active: req.is_active,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClawbackRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

const DEFAULT_CLAWBACK_REASON: &str = "subscription cancelled";

/// Check a code at checkout. Unknown or unusable codes answer
/// `valid: false` rather than an error.
async fn validate_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CodeValidation>, AppError> {
    Ok(Json(state.commissions().validate_code(&code).await?))
}

async fn list_codes(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Query(query): Query<CodesQuery>,
) -> Result<Json<Vec<AmbassadorCode>>, AppError> {
    Ok(Json(state.commissions().list_codes(query.ambassador_id).await?))
}

async fn create_code(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Json(input): Json<CreateCodeInput>,
) -> Result<(StatusCode, Json<AmbassadorCode>), AppError> {
    let code = state.commissions().create_code(input).await?;
    info!(actor = %actor, code = %code.code, "Ambassador code created");
    Ok((StatusCode::CREATED, Json(code)))
}

async fn update_code(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<AmbassadorCodeId>,
    Json(body): Json<UpdateCodeRequest>,
) -> Result<Json<AmbassadorCode>, AppError> {
    let code = state.commissions().update_code(id, body.into()).await?;
    info!(actor = %actor, code = %code.code, "Ambassador code updated");
    Ok(Json(code))
}

async fn record_commission(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Json(input): Json<CommissionInput>,
) -> Result<(StatusCode, Json<Commission>), AppError> {
    let commission = state.commissions().process_commission(input).await?;
    Ok((StatusCode::CREATED, Json(commission)))
}

async fn record_renewal(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Json(input): Json<RenewalInput>,
) -> Result<Json<RenewalOutcome>, AppError> {
    Ok(Json(state.commissions().handle_coaching_renewal(input).await?))
}

async fn clawback(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    body: Option<Json<ClawbackRequest>>,
) -> Result<Json<ClawbackOutcome>, AppError> {
    let Json(body) = body.unwrap_or_default();
    let reason = body
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_CLAWBACK_REASON);

    let outcome = state
        .commissions()
        .clawback(&subscription_id, reason)
        .await?;
    info!(actor = %actor, subscription_id = %subscription_id, "Clawback requested");
    Ok(Json(outcome))
}

async fn earnings(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<EarningsSummary>, AppError> {
    Ok(Json(state.commissions().earnings(user_id).await?))
}

async fn connect(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<AccountLink>, AppError> {
    Ok(Json(
        state.commissions().start_connect_onboarding(user_id).await?,
    ))
}

async fn refresh_payout_setup(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.commissions().refresh_payout_setup(user_id).await?))
}

/// Run the weekly payout batch now.
async fn run_payouts(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
) -> Result<Json<PayoutBatchSummary>, AppError> {
    info!(actor = %actor, "Manual payout run");
    Ok(Json(state.payouts().process_weekly_payouts().await?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_update_code_request_nulls() {
        let body: UpdateCodeRequest =
            serde_json::from_str(r#"{"usage_limit": null, "is_active": false}"#).unwrap();
        let changes = CodeChanges::from(body);
        assert_eq!(changes.usage_limit, Some(None));
        assert_eq!(changes.valid_until, None);
        assert_eq!(changes.is_active, Some(false));
        assert_eq!(changes.discount_percentage, None);
    }
}
