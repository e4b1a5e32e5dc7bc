//! Mailgun inbound email webhook.
//!
//! Mailgun delivers the same message in one of three shapes depending on
//! how the route is configured: a JSON event, a `multipart/form-data`
//! post with `attachment-N` files, or a url-encoded form whose stored
//! attachments are given as URLs. All three become an `InboundEmail`.

use axum::{
    Json, Router,
    body::{Bytes, to_bytes},
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    routing::get,
};
use tracing::{debug, info, instrument, warn};

use crate::error::AppError;
use crate::mailgun::{
    AttachmentContent, InboundAttachment, ParsedWebhook, WebhookError, is_attachment_field,
    parse_event_json, parse_form_fields, parse_urlencoded,
};
use crate::services::WebhookOutcome;
use crate::services::storage::content_type_for;
use crate::state::AppState;

/// Mailgun accepts messages up to 25 MB; leave room for encoding overhead.
const WEBHOOK_BODY_LIMIT: usize = 40 * 1024 * 1024;

/// Build the webhook router.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/email-webhook",
        get(verify_endpoint)
            .post(receive)
            .put(receive)
            .patch(receive)
            .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
    )
}

/// Mailgun checks the route with a GET before enabling it.
async fn verify_endpoint() -> StatusCode {
    StatusCode::OK
}

/// How the payload is encoded, from the `Content-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json,
    Multipart,
    UrlEncoded,
}

impl PayloadKind {
    /// Sniff the payload kind. A missing or unknown content type is
    /// treated as a url-encoded form, which is what older routes send.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            Self::Json
        } else if content_type.starts_with("multipart/form-data") {
            Self::Multipart
        } else {
            Self::UrlEncoded
        }
    }
}

/// Receive an inbound email.
///
/// Business-level misses (unknown ticket, application in the wrong state)
/// answer 200 with an `ignored` outcome so Mailgun does not retry. A bad
/// signature answers 401; infrastructure failures answer 5xx, which
/// Mailgun retries.
#[instrument(skip(state, request))]
async fn receive(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<WebhookOutcome>, AppError> {
    let kind = PayloadKind::from_headers(request.headers());
    debug!(?kind, "Mailgun webhook received");

    let parsed = match kind {
        PayloadKind::Json => parse_event_json(&read_body(request).await?),
        PayloadKind::UrlEncoded => parse_urlencoded(&read_body(request).await?),
        PayloadKind::Multipart => {
            let multipart = Multipart::from_request(request, &state)
                .await
                .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?;
            let (fields, files) = read_multipart(multipart).await?;
            parse_form_fields(fields, files)
        }
    }
    .map_err(webhook_error)?;

    let (email, signature) = match parsed {
        ParsedWebhook::Email { email, signature } => (email, signature),
        ParsedWebhook::IgnoredEvent(event) => {
            debug!(event = %event, "Ignoring Mailgun event");
            return Ok(Json(WebhookOutcome::ignored(format!("event '{event}'"))));
        }
    };

    let inbound = state.inbound();
    inbound
        .mailgun()
        .verify(signature.as_ref())
        .map_err(webhook_error)?;

    match inbound.process(&email).await {
        Ok(outcome) => {
            info!(?outcome, "Inbound email processed");
            Ok(Json(outcome))
        }
        Err(e) if e.status().is_client_error() => {
            warn!(error = %e, "Inbound email not actionable");
            Ok(Json(WebhookOutcome::ignored(e.to_string())))
        }
        Err(e) => Err(e),
    }
}

async fn read_body(request: Request) -> Result<Bytes, AppError> {
    to_bytes(request.into_body(), WEBHOOK_BODY_LIMIT)
        .await
        .map_err(|e| AppError::BadRequest(format!("could not read body: {e}")))
}

/// Split a multipart post into text fields and `attachment-N` files.
async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(Vec<(String, String)>, Vec<InboundAttachment>), AppError> {
    let mut fields = Vec::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if is_attachment_field(&name) {
            let filename = field
                .file_name()
                .map_or_else(|| name.clone(), str::to_string);
            let content_type = field
                .content_type()
                .map_or_else(|| content_type_for(&filename).to_string(), str::to_string);
            let content = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("could not read {name}: {e}")))?;

            files.push(InboundAttachment {
                filename,
                content_type: Some(content_type),
                content: AttachmentContent::Inline(content.to_vec()),
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(format!("could not read {name}: {e}")))?;
            fields.push((name, value));
        }
    }

    Ok((fields, files))
}

fn webhook_error(err: WebhookError) -> AppError {
    match err {
        WebhookError::InvalidSignature(_) => {
            warn!(error = %err, "Rejected Mailgun webhook");
            AppError::Unauthorized(err.to_string())
        }
        WebhookError::InvalidPayload(_) => AppError::BadRequest(err.to_string()),
        WebhookError::Download(_) => AppError::Internal(err.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn with_content_type(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_payload_kind_sniffing() {
        assert_eq!(
            PayloadKind::from_headers(&with_content_type("application/json; charset=utf-8")),
            PayloadKind::Json
        );
        assert_eq!(
            PayloadKind::from_headers(&with_content_type(
                "multipart/form-data; boundary=----abc"
            )),
            PayloadKind::Multipart
        );
        assert_eq!(
            PayloadKind::from_headers(&with_content_type("application/x-www-form-urlencoded")),
            PayloadKind::UrlEncoded
        );
        assert_eq!(
            PayloadKind::from_headers(&HeaderMap::new()),
            PayloadKind::UrlEncoded
        );
    }

    #[test]
    fn test_webhook_error_status() {
        assert_eq!(
            webhook_error(WebhookError::InvalidSignature("stale".to_string())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            webhook_error(WebhookError::InvalidPayload("bad json".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            webhook_error(WebhookError::Download("timeout".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
