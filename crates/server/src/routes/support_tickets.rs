//! Support ticket handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use flexhub_core::{SupportTicketId, TicketPriority, TicketStatus, UserId};

use super::{double_option, page};
use crate::db::TicketChanges;
use crate::error::AppError;
use crate::middleware::RequireTaskforce;
use crate::models::{SupportTicket, TicketMessage, TicketThread};
use crate::services::CreateTicket;
use crate::state::AppState;

/// Build the support tickets router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/support-tickets", post(create_ticket).get(list_tickets))
        .route(
            "/api/support-tickets/{id}",
            get(get_ticket).patch(update_ticket),
        )
        .route("/api/support-tickets/{id}/replies", post(reply))
}

#[derive(Debug, Deserialize)]
pub struct TicketsQuery {
    pub status: Option<TicketStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub body: String,
}

/// Body for `PATCH /api/support-tickets/{id}`. `assignee_id: null`
/// unassigns the ticket.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketRequest {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<UserId>>,
}

impl From<UpdateTicketRequest> for TicketChanges {
    fn from(req: UpdateTicketRequest) -> Self {
        Self {
            status: req.status,
            priority: req.priority,
            assignee_id: req.assignee_id,
        }
    }
}

async fn create_ticket(
    State(state): State<AppState>,
    Json(form): Json<CreateTicket>,
) -> Result<(StatusCode, Json<TicketThread>), AppError> {
    let thread = state.support().create(form).await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

async fn list_tickets(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Query(query): Query<TicketsQuery>,
) -> Result<Json<Vec<SupportTicket>>, AppError> {
    let (limit, offset) = page(query.limit, query.offset);
    Ok(Json(state.support().list(query.status, limit, offset).await?))
}

async fn get_ticket(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<SupportTicketId>,
) -> Result<Json<TicketThread>, AppError> {
    Ok(Json(state.support().get(id).await?))
}

async fn reply(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<SupportTicketId>,
    Json(body): Json<ReplyRequest>,
) -> Result<(StatusCode, Json<TicketMessage>), AppError> {
    let message = state
        .support()
        .staff_reply(id, actor.as_str(), &body.body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn update_ticket(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<SupportTicketId>,
    Json(body): Json<UpdateTicketRequest>,
) -> Result<Json<SupportTicket>, AppError> {
    let ticket = state.support().update(id, body.into()).await?;
    tracing::info!(actor = %actor, ticket_id = %id, "Ticket updated");
    Ok(Json(ticket))
}
