//! Support ticket repository.

use sqlx::PgPool;

use flexhub_core::{MessageAuthor, SupportTicketId, TicketPriority, TicketStatus, UserId};

use super::RepositoryError;
use crate::models::{SupportTicket, TicketMessage, TicketThread};

const TICKET_COLUMNS: &str = r"
    id, subject, requester_email, requester_id, status, priority, assignee_id,
    created_at, updated_at
";

const MESSAGE_COLUMNS: &str = "id, ticket_id, author_email, author_kind, body, created_at";

/// Input for opening a ticket. The body becomes the first message.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub subject: String,
    pub requester_email: String,
    pub requester_id: Option<UserId>,
    pub priority: TicketPriority,
    pub body: String,
}

/// Partial update of a ticket. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct TicketChanges {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assignee_id: Option<Option<UserId>>,
}

/// Repository for support tickets.
pub struct SupportTicketRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SupportTicketRepository<'a> {
    /// Create a new support ticket repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a ticket by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_id(
        &self,
        id: SupportTicketId,
    ) -> Result<Option<SupportTicket>, RepositoryError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM support_tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(ticket)
    }

    /// Get a ticket with its messages.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get_thread(
        &self,
        id: SupportTicketId,
    ) -> Result<Option<TicketThread>, RepositoryError> {
        let Some(ticket) = self.get_by_id(id).await? else {
            return Ok(None);
        };

        let messages = sqlx::query_as::<_, TicketMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM support_ticket_messages WHERE ticket_id = $1 ORDER BY created_at, id"
        ))
        .bind(id)
        .fetch_all(self.pool)
        .await?;

        Ok(Some(TicketThread { ticket, messages }))
    }

    /// List tickets, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SupportTicket>, RepositoryError> {
        let tickets = sqlx::query_as::<_, SupportTicket>(&format!(
            r"
            SELECT {TICKET_COLUMNS} FROM support_tickets
            WHERE ($1::ticket_status IS NULL OR status = $1)
            ORDER BY updated_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok(tickets)
    }

    /// Open a ticket with its first customer message.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if either insert fails.
    pub async fn create(&self, new: &NewTicket) -> Result<TicketThread, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let ticket = sqlx::query_as::<_, SupportTicket>(&format!(
            r"
            INSERT INTO support_tickets (subject, requester_email, requester_id, priority)
            VALUES ($1, $2, $3, $4)
            RETURNING {TICKET_COLUMNS}
            "
        ))
        .bind(&new.subject)
        .bind(&new.requester_email)
        .bind(new.requester_id)
        .bind(new.priority)
        .fetch_one(&mut *tx)
        .await?;

        let message = sqlx::query_as::<_, TicketMessage>(&format!(
            r"
            INSERT INTO support_ticket_messages (ticket_id, author_email, author_kind, body)
            VALUES ($1, $2, $3, $4)
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(ticket.id)
        .bind(&new.requester_email)
        .bind(MessageAuthor::Customer)
        .bind(&new.body)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TicketThread {
            ticket,
            messages: vec![message],
        })
    }

    /// Append a message and set the ticket's new status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the ticket does not exist.
    pub async fn add_message(
        &self,
        id: SupportTicketId,
        author_email: &str,
        author_kind: MessageAuthor,
        body: &str,
        status: TicketStatus,
    ) -> Result<TicketMessage, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE support_tickets SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound);
        }

        let message = sqlx::query_as::<_, TicketMessage>(&format!(
            r"
            INSERT INTO support_ticket_messages (ticket_id, author_email, author_kind, body)
            VALUES ($1, $2, $3, $4)
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(id)
        .bind(author_email)
        .bind(author_kind)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(message)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the ticket does not exist.
    pub async fn update(
        &self,
        id: SupportTicketId,
        changes: &TicketChanges,
    ) -> Result<SupportTicket, RepositoryError> {
        sqlx::query_as::<_, SupportTicket>(&format!(
            r"
            UPDATE support_tickets SET
                status = COALESCE($2, status),
                priority = COALESCE($3, priority),
                assignee_id = CASE WHEN $4 THEN $5 ELSE assignee_id END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TICKET_COLUMNS}
            "
        ))
        .bind(id)
        .bind(changes.status)
        .bind(changes.priority)
        .bind(changes.assignee_id.is_some())
        .bind(changes.assignee_id.flatten())
        .fetch_optional(self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)
    }
}
