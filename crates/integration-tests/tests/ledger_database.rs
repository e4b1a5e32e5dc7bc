//! Database-backed tests for the commission ledger, applications and tickets.
//!
//! Each test gets a fresh database with every migration applied.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/flexhub_test \
//!     cargo test -p flexhub-integration-tests --test ledger_database -- --ignored
//! ```

use axum::http::StatusCode;
use rust_decimal::Decimal;
use sqlx::PgPool;

use flexhub_core::{
    ApplicationType, Cents, CommissionId, CommissionType, Email, SupportTicketId, UserId, UserRole,
};
use flexhub_integration_tests::test_config;
use flexhub_server::db::{CommissionRepository, NewUser, PayoutClaim, UserRepository};
use flexhub_server::error::AppError;
use flexhub_server::models::{Commission, Payout, User};
use flexhub_server::services::{CommissionInput, CreateCodeInput, CreateTicket, SubmitApplication};
use flexhub_server::state::AppState;

const SUBSCRIPTION: &str = "sub_1QfXk2Lz";

async fn ambassador(pool: &PgPool, email: &str, setup_complete: bool) -> User {
    let users = UserRepository::new(pool);
    let user = users
        .create(&NewUser {
            email: Email::parse(email).unwrap(),
            name: "Kim Lee".to_string(),
            role: UserRole::Coach,
        })
        .await
        .unwrap();
    users
        .set_payout_setup(user.id, setup_complete, setup_complete)
        .await
        .unwrap()
}

fn code_input(ambassador_id: UserId, code: &str) -> CreateCodeInput {
    CreateCodeInput {
        ambassador_id,
        code: Some(code.to_string()),
        discount_percentage: Decimal::new(10, 0),
        usage_limit: None,
        valid_from: None,
        valid_until: None,
    }
}

fn coaching_month(ambassador_id: UserId, code: &str, month: i32) -> CommissionInput {
    CommissionInput {
        ambassador_id,
        code: code.to_string(),
        kind: CommissionType::CoachingMonthly,
        original_amount_cents: Cents::new(10_000),
        month_number: Some(month),
        customer_id: None,
        customer_email: Some("client@example.com".to_string()),
        stripe_subscription_id: Some(SUBSCRIPTION.to_string()),
        stripe_payment_id: None,
        occurred_at: None,
    }
}

async fn status_of(pool: &PgPool, id: CommissionId) -> String {
    sqlx::query_scalar("SELECT status::text FROM commission_transactions WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn claim(pool: &PgPool, ambassador_id: UserId) -> Payout {
    match CommissionRepository::new(pool)
        .claim_payable(ambassador_id, Cents::new(1))
        .await
        .unwrap()
    {
        PayoutClaim::Claimed { payout, .. } => payout,
        other => panic!("expected a claim, got {other:?}"),
    }
}

async fn record_month(state: &AppState, ambassador_id: UserId, month: i32) -> Commission {
    state
        .commissions()
        .process_commission(coaching_month(ambassador_id, "KIMFIT10", month))
        .await
        .unwrap()
}

// =============================================================================
// Codes and commissions
// =============================================================================

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_duplicate_code_is_bad_request(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());
    let kim = ambassador(&pool, "kim@fitmail.io", true).await;

    state
        .commissions()
        .create_code(code_input(kim.id, "KIMFIT10"))
        .await
        .unwrap();

    let err = state
        .commissions()
        .create_code(code_input(kim.id, "kimfit10"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(err.to_string().contains("already exists"));
}

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_incomplete_payout_setup_writes_nothing(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());
    let kim = ambassador(&pool, "kim@fitmail.io", false).await;
    state
        .commissions()
        .create_code(code_input(kim.id, "KIMFIT10"))
        .await
        .unwrap();

    let err = state
        .commissions()
        .process_commission(coaching_month(kim.id, "KIMFIT10", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Commission(_)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commission_transactions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);

    let times_used: i32 = sqlx::query_scalar("SELECT times_used FROM ambassador_codes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(times_used, 0);

    let user = UserRepository::new(&pool).get_by_id(kim.id).await.unwrap().unwrap();
    assert_eq!(user.pending_amount_cents, Cents::new(0));
}

// =============================================================================
// Clawback and payout claims
// =============================================================================

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_clawback_leaves_paid_rows_untouched(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());
    let kim = ambassador(&pool, "kim@fitmail.io", true).await;
    state
        .commissions()
        .create_code(code_input(kim.id, "KIMFIT10"))
        .await
        .unwrap();

    let paid = record_month(&state, kim.id, 1).await;
    let payout = claim(&pool, kim.id).await;
    CommissionRepository::new(&pool)
        .settle_paid(&payout, "tr_1Paid")
        .await
        .unwrap();

    let unpaid = record_month(&state, kim.id, 2).await;

    let outcome = state
        .commissions()
        .clawback(SUBSCRIPTION, "subscription cancelled")
        .await
        .unwrap();

    assert_eq!(outcome.reversed, vec![unpaid.id]);
    assert_eq!(outcome.skipped_paid, vec![paid.id]);
    assert_eq!(outcome.total_reversed_cents, unpaid.commission_amount_cents);
    assert_eq!(status_of(&pool, paid.id).await, "paid");
    assert_eq!(status_of(&pool, unpaid.id).await, "reversed");

    let user = UserRepository::new(&pool).get_by_id(kim.id).await.unwrap().unwrap();
    assert_eq!(user.total_earned_cents, paid.commission_amount_cents);
    assert_eq!(user.pending_amount_cents, Cents::new(0));
}

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_clawback_during_transfer_cannot_strand_payment(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());
    let kim = ambassador(&pool, "kim@fitmail.io", true).await;
    state
        .commissions()
        .create_code(code_input(kim.id, "KIMFIT10"))
        .await
        .unwrap();

    let first = record_month(&state, kim.id, 1).await;
    let second = record_month(&state, kim.id, 2).await;
    let payout = claim(&pool, kim.id).await;
    assert_eq!(payout.commission_count, 2);

    // Cancellation lands while the transfer is in flight.
    let outcome = state
        .commissions()
        .clawback(SUBSCRIPTION, "subscription cancelled")
        .await
        .unwrap();
    assert!(outcome.reversed.is_empty());
    assert_eq!(outcome.skipped_in_flight, vec![first.id, second.id]);

    let settled = CommissionRepository::new(&pool)
        .settle_paid(&payout, "tr_1InFlight")
        .await
        .unwrap();
    assert_eq!(settled.stripe_transfer_id.as_deref(), Some("tr_1InFlight"));
    assert_eq!(status_of(&pool, first.id).await, "paid");
    assert_eq!(status_of(&pool, second.id).await, "paid");

    let user = UserRepository::new(&pool).get_by_id(kim.id).await.unwrap().unwrap();
    assert_eq!(user.total_earned_cents, payout.amount_cents);
    assert_eq!(user.pending_amount_cents, Cents::new(0));

    // A second settlement of the same payout is refused.
    assert!(
        CommissionRepository::new(&pool)
            .settle_paid(&payout, "tr_1InFlight")
            .await
            .is_err()
    );
}

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_refused_transfer_makes_commissions_payable_again(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());
    let kim = ambassador(&pool, "kim@fitmail.io", true).await;
    state
        .commissions()
        .create_code(code_input(kim.id, "KIMFIT10"))
        .await
        .unwrap();

    let commission = record_month(&state, kim.id, 1).await;
    let payout = claim(&pool, kim.id).await;
    CommissionRepository::new(&pool)
        .settle_failed(&payout, "No such destination")
        .await
        .unwrap();
    assert_eq!(status_of(&pool, commission.id).await, "failed");

    let retry = claim(&pool, kim.id).await;
    assert_ne!(retry.id, payout.id);
    assert_eq!(retry.amount_cents, commission.commission_amount_cents);
}

// =============================================================================
// Applications and tickets
// =============================================================================

fn application(email: &str) -> SubmitApplication {
    SubmitApplication {
        name: "First Last".to_string(),
        email: email.to_string(),
        phone: None,
        kind: ApplicationType::Coach,
        message: None,
        resume_url: None,
    }
}

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_duplicate_application_matches_stored_alias(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());

    state
        .applications()
        .submit(application("first.last@gmail.com"))
        .await
        .unwrap();

    let err = state
        .applications()
        .submit(application("FirstLast+coach@googlemail.com"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let open = state
        .applications()
        .find_open_for_sender(&Email::parse("firstlast@gmail.com").unwrap())
        .await
        .unwrap();
    assert!(open.is_some());
}

#[sqlx::test(migrator = "flexhub_server::db::MIGRATOR")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_ticket_reply_only_from_requester(pool: PgPool) {
    let state = AppState::new(test_config(), pool.clone());

    let thread = state
        .support()
        .create(CreateTicket {
            subject: "Billing question".to_string(),
            email: "kim.lee@gmail.com".to_string(),
            body: "I was charged twice.".to_string(),
            priority: None,
        })
        .await
        .unwrap();
    let id: SupportTicketId = thread.ticket.id;

    let foreign = state
        .support()
        .customer_reply(id, "mallory@attacker.example", "Close this ticket")
        .await
        .unwrap();
    assert!(foreign.is_none());

    let own = state
        .support()
        .customer_reply(id, "kimlee@googlemail.com", "Any update?")
        .await
        .unwrap();
    assert!(own.is_some());

    let thread = state.support().get(id).await.unwrap();
    assert_eq!(thread.messages.len(), 2);
}
