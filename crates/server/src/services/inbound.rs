//! Routing inbound email to support tickets and applications.
//!
//! Order of precedence:
//!
//! 1. A ticket reference (`[Ticket #N]` subject or `support+N@` recipient)
//!    appends a customer reply to that ticket
//! 2. A sender with an open application feeds the application pipeline;
//!    a signed-looking attachment is stored against it
//! 3. Mail to a `support*@` mailbox opens a new ticket
//! 4. Anything else is acknowledged and ignored

use serde::Serialize;
use tracing::{info, instrument, warn};

use flexhub_core::{
    ApplicationId, ApplicationStatus, DocumentSource, Email, SupportTicketId, TicketMessageId,
};

use crate::error::AppError;
use crate::mailgun::{
    AttachmentContent, InboundAttachment, InboundEmail, MailgunClient, WebhookError,
    is_support_recipient, signed_document, ticket_reference,
};
use crate::services::applications::{ApplicationService, DocumentUpload};
use crate::services::storage::content_type_for;
use crate::services::support::{CreateTicket, SupportService};

/// What the webhook did with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    TicketReply {
        ticket_id: SupportTicketId,
        message_id: TicketMessageId,
    },
    SignedDocument {
        application_id: ApplicationId,
        status: ApplicationStatus,
        applicant_notified: bool,
    },
    /// Mail from an applicant without a signed document.
    ApplicationCorrespondence { application_id: ApplicationId },
    TicketOpened { ticket_id: SupportTicketId },
    Ignored { reason: String },
}

impl WebhookOutcome {
    pub(crate) fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

/// Inbound email processor.
#[derive(Debug, Clone)]
pub struct InboundMailService {
    mailgun: MailgunClient,
    applications: ApplicationService,
    support: SupportService,
}

impl InboundMailService {
    /// Create a new inbound mail processor.
    #[must_use]
    pub const fn new(
        mailgun: MailgunClient,
        applications: ApplicationService,
        support: SupportService,
    ) -> Self {
        Self {
            mailgun,
            applications,
            support,
        }
    }

    /// The Mailgun client used for verification and downloads.
    #[must_use]
    pub const fn mailgun(&self) -> &MailgunClient {
        &self.mailgun
    }

    /// Route one inbound email.
    ///
    /// # Errors
    ///
    /// Returns the underlying `AppError` when a database, storage or
    /// download step fails.
    #[instrument(skip(self, email), fields(sender = %email.sender, recipient = %email.recipient))]
    pub async fn process(&self, email: &InboundEmail) -> Result<WebhookOutcome, AppError> {
        if let Some(ticket_id) = ticket_reference(email) {
            return self.reply_to_ticket(ticket_id, email).await;
        }

        if let Ok(sender) = Email::parse(&email.sender) {
            if let Some(application) = self.applications.find_open_for_sender(&sender).await? {
                return self.handle_applicant_mail(application.id, email).await;
            }
        }

        if is_support_recipient(&email.recipient) {
            return self.open_ticket(email).await;
        }

        info!("No route for inbound email");
        Ok(WebhookOutcome::ignored("no matching route"))
    }

    async fn reply_to_ticket(
        &self,
        ticket_id: SupportTicketId,
        email: &InboundEmail,
    ) -> Result<WebhookOutcome, AppError> {
        let body = email.reply_text();
        if body.is_empty() {
            return Ok(WebhookOutcome::ignored("empty reply"));
        }

        let Some(message) = self
            .support
            .customer_reply(ticket_id, &email.sender, body)
            .await?
        else {
            return Ok(WebhookOutcome::ignored("sender is not the ticket requester"));
        };

        Ok(WebhookOutcome::TicketReply {
            ticket_id,
            message_id: message.id,
        })
    }

    async fn handle_applicant_mail(
        &self,
        application_id: ApplicationId,
        email: &InboundEmail,
    ) -> Result<WebhookOutcome, AppError> {
        let Some(attachment) = signed_document(email) else {
            info!(application_id = %application_id, "Applicant mail without a signed document");
            return Ok(WebhookOutcome::ApplicationCorrespondence { application_id });
        };

        let upload = self.fetch(attachment).await?;
        let update = self
            .applications
            .attach_signed_document(application_id, upload, DocumentSource::Email)
            .await?;

        Ok(WebhookOutcome::SignedDocument {
            application_id,
            status: update.application.status,
            applicant_notified: update.applicant_notified,
        })
    }

    async fn open_ticket(&self, email: &InboundEmail) -> Result<WebhookOutcome, AppError> {
        let subject = match email.subject.trim() {
            "" => "(no subject)".to_string(),
            s => s.to_string(),
        };
        let body = match email.reply_text() {
            "" => "(no message body)".to_string(),
            s => s.to_string(),
        };

        let thread = self
            .support
            .create(CreateTicket {
                subject,
                email: email.sender.clone(),
                body,
                priority: None,
            })
            .await?;

        Ok(WebhookOutcome::TicketOpened {
            ticket_id: thread.ticket.id,
        })
    }

    async fn fetch(&self, attachment: &InboundAttachment) -> Result<DocumentUpload, AppError> {
        let content = match &attachment.content {
            AttachmentContent::Inline(bytes) => bytes.clone(),
            AttachmentContent::Remote { url } => {
                self.mailgun
                    .download_attachment(url)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "Could not fetch stored attachment");
                        match e {
                            WebhookError::InvalidPayload(msg) => AppError::BadRequest(msg),
                            other => AppError::Internal(other.to_string()),
                        }
                    })?
            }
        };

        Ok(DocumentUpload {
            filename: attachment.filename.clone(),
            content_type: attachment
                .content_type
                .clone()
                .unwrap_or_else(|| content_type_for(&attachment.filename).to_string()),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(WebhookOutcome::TicketOpened {
            ticket_id: SupportTicketId::new(5),
        })
        .unwrap_or_default();
        assert_eq!(json["outcome"], "ticket_opened");
        assert_eq!(json["ticket_id"], 5);

        let json = serde_json::to_value(WebhookOutcome::ignored("no matching route"))
            .unwrap_or_default();
        assert_eq!(json["outcome"], "ignored");
        assert_eq!(json["reason"], "no matching route");
    }
}
