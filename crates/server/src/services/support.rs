//! Support tickets opened from the API or inbound email.

use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use flexhub_core::{Email, MessageAuthor, same_mailbox, SupportTicketId, TicketPriority, TicketStatus};

use crate::db::{NewTicket, SupportTicketRepository, TicketChanges, UserRepository};
use crate::error::AppError;
use crate::models::{SupportTicket, TicketMessage, TicketThread};
use crate::services::email::EmailService;

const MAX_SUBJECT_LENGTH: usize = 300;
const MAX_BODY_LENGTH: usize = 50_000;

/// Public ticket form.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicket {
    pub subject: String,
    pub email: String,
    pub body: String,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
}

/// Ticket support service.
#[derive(Debug, Clone)]
pub struct SupportService {
    pool: PgPool,
    email: EmailService,
}

impl SupportService {
    /// Create a new support service.
    #[must_use]
    pub const fn new(pool: PgPool, email: EmailService) -> Self {
        Self { pool, email }
    }

    /// Open a ticket and acknowledge it to the requester.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` if the form is invalid.
    #[instrument(skip(self, form))]
    pub async fn create(&self, form: CreateTicket) -> Result<TicketThread, AppError> {
        let requester = Email::parse(&form.email).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let subject = required_text("subject", &form.subject, MAX_SUBJECT_LENGTH)?;
        let body = required_text("body", &form.body, MAX_BODY_LENGTH)?;

        let requester_id = UserRepository::new(&self.pool)
            .get_by_email(&requester)
            .await?
            .map(|user| user.id);

        let thread = SupportTicketRepository::new(&self.pool)
            .create(&NewTicket {
                subject,
                requester_email: requester.into_inner(),
                requester_id,
                priority: form.priority.unwrap_or_default(),
                body,
            })
            .await?;

        info!(ticket_id = %thread.ticket.id, "Support ticket opened");

        let first = thread.messages.first().map_or("", |m| m.body.as_str());
        if let Err(e) = self.email.send_ticket_message(&thread.ticket, first, true).await {
            error!(error = %e, "Failed to acknowledge support ticket");
        }

        Ok(thread)
    }

    /// Get a ticket with its messages.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if it does not exist.
    pub async fn get(&self, id: SupportTicketId) -> Result<TicketThread, AppError> {
        SupportTicketRepository::new(&self.pool)
            .get_thread(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket {id}")))
    }

    /// List tickets, optionally by status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the query fails.
    pub async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SupportTicket>, AppError> {
        Ok(SupportTicketRepository::new(&self.pool)
            .list(status, limit, offset)
            .await?)
    }

    /// Reply as staff; the requester gets the message by email.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the ticket does not exist.
    #[instrument(skip(self, body))]
    pub async fn staff_reply(
        &self,
        id: SupportTicketId,
        actor: &str,
        body: &str,
    ) -> Result<TicketMessage, AppError> {
        let body = required_text("body", body, MAX_BODY_LENGTH)?;
        let ticket = self.require_ticket(id).await?;

        let message = SupportTicketRepository::new(&self.pool)
            .add_message(
                id,
                actor,
                MessageAuthor::Staff,
                &body,
                ticket.status.after_staff_reply(),
            )
            .await?;

        if let Err(e) = self.email.send_ticket_message(&ticket, &body, false).await {
            error!(error = %e, "Failed to email staff reply");
        }

        Ok(message)
    }

    /// Append a customer's emailed reply; waiting and finished tickets reopen.
    ///
    /// Returns `None` when `from` is not the ticket's requester. Bodies longer
    /// than the form limit are cut to it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the ticket does not exist.
    #[instrument(skip(self, body))]
    pub async fn customer_reply(
        &self,
        id: SupportTicketId,
        from: &str,
        body: &str,
    ) -> Result<Option<TicketMessage>, AppError> {
        let ticket = self.require_ticket(id).await?;
        let Some(body) = accept_reply(&ticket.requester_email, from, body) else {
            warn!(ticket_id = %id, "Reply from someone other than the requester ignored");
            return Ok(None);
        };
        let status = ticket.status.after_customer_reply();

        let message = SupportTicketRepository::new(&self.pool)
            .add_message(id, from, MessageAuthor::Customer, &body, status)
            .await?;

        info!(from = ?ticket.status, to = ?status, "Customer replied to ticket");
        Ok(Some(message))
    }

    /// Change status, priority or assignee.
    ///
    /// # Errors
    ///
    /// - `AppError::BadRequest` if the assignee does not exist
    /// - `AppError::NotFound` if the ticket does not exist
    #[instrument(skip(self, changes))]
    pub async fn update(
        &self,
        id: SupportTicketId,
        changes: TicketChanges,
    ) -> Result<SupportTicket, AppError> {
        if let Some(Some(assignee)) = changes.assignee_id {
            let exists = UserRepository::new(&self.pool)
                .get_by_id(assignee)
                .await?
                .is_some();
            if !exists {
                return Err(AppError::BadRequest(format!("user {assignee} does not exist")));
            }
        }

        Ok(SupportTicketRepository::new(&self.pool)
            .update(id, &changes)
            .await?)
    }

    async fn require_ticket(&self, id: SupportTicketId) -> Result<SupportTicket, AppError> {
        SupportTicketRepository::new(&self.pool)
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket {id}")))
    }
}

/// The reply text to store, or `None` if `from` is not the requester's mailbox.
fn accept_reply(requester: &str, from: &str, body: &str) -> Option<String> {
    if !same_mailbox(requester, from) {
        return None;
    }
    Some(body.trim().chars().take(MAX_BODY_LENGTH).collect())
}

fn required_text(field: &str, value: &str, max: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(AppError::BadRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_required_text() {
        assert_eq!(
            required_text("subject", "  Billing question ", 300).ok().as_deref(),
            Some("Billing question")
        );
        assert!(matches!(
            required_text("subject", "   ", 300),
            Err(AppError::BadRequest(msg)) if msg == "subject is required"
        ));
        assert!(required_text("body", "abcd", 3).is_err());
    }

    #[test]
    fn test_reply_from_requester_is_accepted() {
        assert_eq!(
            accept_reply("kim.lee@gmail.com", "KimLee+support@googlemail.com", "  Thanks!\n"),
            Some("Thanks!".to_string())
        );
    }

    #[test]
    fn test_reply_from_other_sender_is_refused() {
        assert_eq!(accept_reply("kim@fitmail.io", "mallory@attacker.example", "hi"), None);
        assert_eq!(accept_reply("kim@fitmail.io", "kim@fitmail.io.attacker.example", "hi"), None);
    }

    #[test]
    fn test_oversized_reply_is_cut_to_limit() {
        let body = "é".repeat(MAX_BODY_LENGTH + 500);
        let stored = accept_reply("kim@fitmail.io", "kim@fitmail.io", &body).unwrap();
        assert_eq!(stored.chars().count(), MAX_BODY_LENGTH);
    }
}
