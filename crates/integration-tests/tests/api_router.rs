//! Integration tests for the HTTP router.
//!
//! Every request here is answered before the database is touched: auth
//! checks, input validation, webhook parsing and signature checks.

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use flexhub_integration_tests::{
    TEST_SIGNING_KEY, bearer, router_with, test_config, test_router,
};

async fn send(request: Request<Body>) -> Response {
    test_router().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_as_taskforce(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, bearer())
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let response = send(Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

// =============================================================================
// Taskforce authentication
// =============================================================================

#[tokio::test]
async fn test_taskforce_endpoint_requires_token() {
    let response = send(Request::get("/api/applications").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("Unauthorized"));
}

#[tokio::test]
async fn test_taskforce_endpoint_rejects_wrong_token() {
    let request = Request::get("/api/support-tickets")
        .header(header::AUTHORIZATION, "Bearer not-the-token")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_payout_run_requires_token() {
    let request = Request::post("/api/ambassador/payouts/run")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(request).await.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Validation before persistence
// =============================================================================

#[tokio::test]
async fn test_application_with_invalid_email_is_rejected() {
    let response = send(post_json(
        "/api/applications",
        &json!({
            "name": "Kim Lee",
            "email": "not-an-email",
            "type": "coach"
        }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_application_with_blank_name_is_rejected() {
    let response = send(post_json(
        "/api/applications",
        &json!({
            "name": "   ",
            "email": "kim@example.com",
            "type": "affiliate"
        }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("name is required"));
}

#[tokio::test]
async fn test_ticket_without_subject_is_rejected() {
    let response = send(post_json(
        "/api/support-tickets",
        &json!({
            "subject": "",
            "email": "kim@example.com",
            "body": "My order never arrived"
        }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_code_is_reported_invalid() {
    let response = send(
        Request::get("/api/ambassador/codes/x!/validate")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["valid"], false);
    assert!(body["reason"].is_string());
}

// =============================================================================
// Coaching renewals
// =============================================================================

fn renewal(month_number: i32) -> Value {
    json!({
        "ambassador_id": 7,
        "code": "COACHKIM",
        "stripe_subscription_id": "sub_123",
        "month_number": month_number,
        "amount_cents": 4_900
    })
}

#[tokio::test]
async fn test_renewal_past_window_is_not_commissionable() {
    let response = send(post_json_as_taskforce(
        "/api/ambassador/renewals",
        &renewal(4),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["outcome"], "not_commissionable");
    assert_eq!(body["month_number"], 4);
}

#[tokio::test]
async fn test_renewal_without_month_is_bad_request() {
    let response = send(post_json_as_taskforce(
        "/api/ambassador/renewals",
        &renewal(0),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Mailgun webhook
// =============================================================================

#[tokio::test]
async fn test_webhook_get_verifies_endpoint() {
    let response = send(Request::get("/email-webhook").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_ignores_non_delivery_events() {
    let response = send(post_json(
        "/email-webhook",
        &json!({ "event-data": { "event": "failed" } }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn test_webhook_rejects_malformed_json() {
    let request = Request::post("/email-webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    assert_eq!(send(request).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_multipart_empty_ticket_reply_is_ignored() {
    let boundary = "flexhubboundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"sender\"\r\n\r\n\
         kim@example.com\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"recipient\"\r\n\r\n\
         support@flexhub.fit\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"subject\"\r\n\r\n\
         Re: [Ticket #12] Refund\r\n\
         --{boundary}--\r\n"
    );

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/email-webhook")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["outcome"], "ignored");
    assert_eq!(body["reason"], "empty reply");
}

#[tokio::test]
async fn test_webhook_requires_signature_when_key_configured() {
    let mut config = test_config();
    config.mailgun.signing_key = Some(SecretString::from(TEST_SIGNING_KEY));
    let router = router_with(config);

    let unsigned = Request::post("/email-webhook")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "sender=kim%40example.com&recipient=support%40flexhub.fit&subject=Hi",
        ))
        .unwrap();
    let response = router.clone().oneshot(unsigned).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = Request::post("/email-webhook")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "sender=kim%40example.com&recipient=support%40flexhub.fit&subject=Hi\
             &timestamp=1760000000&token=abc&signature=deadbeef",
        ))
        .unwrap();
    let response = router.oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
