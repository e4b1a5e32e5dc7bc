//! Support tickets and their message threads.

use chrono::{DateTime, Utc};
use serde::Serialize;

use flexhub_core::{
    MessageAuthor, SupportTicketId, TicketMessageId, TicketPriority, TicketStatus, UserId,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SupportTicket {
    pub id: SupportTicketId,
    pub subject: String,
    pub requester_email: String,
    pub requester_id: Option<UserId>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assignee_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TicketMessage {
    pub id: TicketMessageId,
    pub ticket_id: SupportTicketId,
    pub author_email: String,
    pub author_kind: MessageAuthor,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A ticket with its full message thread, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct TicketThread {
    #[serde(flatten)]
    pub ticket: SupportTicket,
    pub messages: Vec<TicketMessage>,
}
