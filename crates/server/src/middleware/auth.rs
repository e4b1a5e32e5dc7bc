//! Taskforce authentication.
//!
//! Back-office endpoints are called by internal tooling with a shared
//! bearer token. The caller may name the staff member acting through
//! `X-Actor-Email`, which ends up in audit columns and Sentry.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use secrecy::ExposeSecret;

use crate::error::{AppError, set_sentry_actor};
use crate::mailgun::constant_time_compare;
use crate::state::AppState;

/// Header naming the staff member behind a request.
pub const ACTOR_HEADER: &str = "x-actor-email";

/// Actor recorded when no `X-Actor-Email` is given.
pub const DEFAULT_ACTOR: &str = "taskforce";

/// Who performed a back-office action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extractor that requires the taskforce bearer token.
///
/// # Example
///
/// ```rust,ignore
/// async fn approve(
///     RequireTaskforce(actor): RequireTaskforce,
///     Path(id): Path<ApplicationId>,
/// ) -> Result<Json<Application>, AppError> {
///     // ...
/// }
/// ```
pub struct RequireTaskforce(pub Actor);

impl FromRequestParts<AppState> for RequireTaskforce {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let expected = state.config().taskforce_token.expose_secret();
        if !constant_time_compare(token, expected) {
            tracing::warn!(path = %parts.uri.path(), "Rejected taskforce token");
            return Err(AppError::Unauthorized("invalid token".to_string()));
        }

        let actor = actor_from_headers(&parts.headers);
        set_sentry_actor(actor.as_str());

        Ok(Self(actor))
    }
}

/// The token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(
            || Actor(DEFAULT_ACTOR.to_string()),
            |v| Actor(v.to_ascii_lowercase()),
        )
}
