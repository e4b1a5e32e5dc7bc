//! Transactional email via Brevo and Resend.
//!
//! Resend is the primary provider when configured; only Brevo accepts
//! attachments. Bodies are rendered from Askama HTML + text templates.
//!
//! Delivery follows a [`DeliveryPlan`]: the chosen provider is tried up to
//! [`MAX_ATTEMPTS`] times, then a final degraded attempt goes out without
//! attachments so the recipient at least gets the message.

use std::time::Duration;

use askama::Template;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::EmailConfig;
use crate::models::{Application, SupportTicket};

const BREVO_URL: &str = "https://api.brevo.com/v3/smtp/email";
const RESEND_URL: &str = "https://api.resend.com/emails";

/// Tries per provider before degrading.
pub const MAX_ATTEMPTS: usize = 3;

// =============================================================================
// Templates
// =============================================================================

#[derive(Template)]
#[template(path = "email/application_received.html")]
struct ApplicationReceivedHtml<'a> {
    name: &'a str,
    kind: &'a str,
}

#[derive(Template)]
#[template(path = "email/application_received.txt")]
struct ApplicationReceivedText<'a> {
    name: &'a str,
    kind: &'a str,
}

#[derive(Template)]
#[template(path = "email/new_application.html")]
struct NewApplicationHtml<'a> {
    application: &'a Application,
    kind: &'a str,
}

#[derive(Template)]
#[template(path = "email/new_application.txt")]
struct NewApplicationText<'a> {
    application: &'a Application,
    kind: &'a str,
}

#[derive(Template)]
#[template(path = "email/documents_request.html")]
struct DocumentsRequestHtml<'a> {
    name: &'a str,
    kind: &'a str,
    has_attachment: bool,
}

#[derive(Template)]
#[template(path = "email/documents_request.txt")]
struct DocumentsRequestText<'a> {
    name: &'a str,
    kind: &'a str,
    has_attachment: bool,
}

#[derive(Template)]
#[template(path = "email/document_received.html")]
struct DocumentReceivedHtml<'a> {
    name: &'a str,
}

#[derive(Template)]
#[template(path = "email/document_received.txt")]
struct DocumentReceivedText<'a> {
    name: &'a str,
}

#[derive(Template)]
#[template(path = "email/application_decision.html")]
struct ApplicationDecisionHtml<'a> {
    name: &'a str,
    kind: &'a str,
    approved: bool,
    note: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/application_decision.txt")]
struct ApplicationDecisionText<'a> {
    name: &'a str,
    kind: &'a str,
    approved: bool,
    note: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/ticket_message.html")]
struct TicketMessageHtml<'a> {
    ticket: &'a SupportTicket,
    body: &'a str,
    opened: bool,
}

#[derive(Template)]
#[template(path = "email/ticket_message.txt")]
struct TicketMessageText<'a> {
    ticket: &'a SupportTicket,
    body: &'a str,
    opened: bool,
}

// =============================================================================
// Errors and message types
// =============================================================================

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// No provider is configured.
    #[error("no email provider configured")]
    NoProvider,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider rejected the message.
    #[error("{provider} rejected the message ({status}): {message}")]
    Rejected {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// Attachment could not be read.
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// Every planned attempt failed; holds the last error.
    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// Outbound email provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Brevo,
    Resend,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Brevo => "brevo",
            Self::Resend => "resend",
        })
    }
}

/// A file attached to an email.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A fully rendered email.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// One planned send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub provider: Provider,
    pub with_attachments: bool,
}

/// Ordered list of send attempts for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub attempts: Vec<Attempt>,
}

impl DeliveryPlan {
    /// Build the attempt sequence.
    ///
    /// - no provider: empty plan
    /// - no attachments: primary provider, [`MAX_ATTEMPTS`] times
    /// - attachments with Brevo: Brevo [`MAX_ATTEMPTS`] times, then one
    ///   attempt on the primary without attachments
    /// - attachments without Brevo: only the degraded attempt
    #[must_use]
    pub fn new(brevo: bool, resend: bool, has_attachments: bool) -> Self {
        let primary = if resend {
            Some(Provider::Resend)
        } else if brevo {
            Some(Provider::Brevo)
        } else {
            None
        };

        let Some(primary) = primary else {
            return Self {
                attempts: Vec::new(),
            };
        };

        let mut attempts = Vec::with_capacity(MAX_ATTEMPTS + 1);

        if has_attachments {
            if brevo {
                attempts.extend(std::iter::repeat_n(
                    Attempt {
                        provider: Provider::Brevo,
                        with_attachments: true,
                    },
                    MAX_ATTEMPTS,
                ));
            }
            attempts.push(Attempt {
                provider: primary,
                with_attachments: false,
            });
        } else {
            attempts.extend(std::iter::repeat_n(
                Attempt {
                    provider: primary,
                    with_attachments: false,
                },
                MAX_ATTEMPTS,
            ));
        }

        Self { attempts }
    }
}

/// What actually happened for a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub provider: Provider,
    pub attempts: usize,
    /// Sent without the attachments it was supposed to carry.
    pub degraded: bool,
}

// =============================================================================
// Service
// =============================================================================

/// Email service for sending transactional emails.
#[derive(Clone)]
pub struct EmailService {
    client: reqwest::Client,
    brevo_api_key: Option<SecretString>,
    resend_api_key: Option<SecretString>,
    from_address: String,
    from_name: String,
    taskforce_address: Option<String>,
    retry_delay: Duration,
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService")
            .field("brevo", &self.brevo_api_key.is_some())
            .field("resend", &self.resend_api_key.is_some())
            .field("from_address", &self.from_address)
            .finish_non_exhaustive()
    }
}

impl EmailService {
    /// Create a new email service from configuration.
    #[must_use]
    pub fn new(config: &EmailConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            brevo_api_key: config.brevo_api_key.clone(),
            resend_api_key: config.resend_api_key.clone(),
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
            taskforce_address: config.taskforce_notify_address.clone(),
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Acknowledge a new application to the applicant.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or delivery fails.
    pub async fn send_application_received(
        &self,
        application: &Application,
    ) -> Result<DeliveryReport, EmailError> {
        let kind = application.kind.label();
        let name = application.name.as_str();

        self.send(OutgoingEmail {
            to: application.email.to_string(),
            subject: format!("We received your {kind} application"),
            html: ApplicationReceivedHtml { name, kind }.render()?,
            text: ApplicationReceivedText { name, kind }.render()?,
            reply_to: None,
            attachments: Vec::new(),
        })
        .await
    }

    /// Tell the taskforce inbox about a new application.
    ///
    /// Returns `Ok(None)` when no taskforce address is configured.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or delivery fails.
    pub async fn notify_new_application(
        &self,
        application: &Application,
    ) -> Result<Option<DeliveryReport>, EmailError> {
        let Some(to) = self.taskforce_address.clone() else {
            return Ok(None);
        };
        let kind = application.kind.label();

        let report = self
            .send(OutgoingEmail {
                to,
                subject: format!("New {kind} application: {}", application.name),
                html: NewApplicationHtml { application, kind }.render()?,
                text: NewApplicationText { application, kind }.render()?,
                reply_to: Some(application.email.to_string()),
                attachments: Vec::new(),
            })
            .await?;

        Ok(Some(report))
    }

    /// Ask the applicant to sign and return the agreement.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or delivery fails.
    pub async fn send_documents_request(
        &self,
        application: &Application,
        agreement: Option<Attachment>,
    ) -> Result<DeliveryReport, EmailError> {
        let kind = application.kind.label();
        let name = application.name.as_str();
        let has_attachment = agreement.is_some();

        self.send(OutgoingEmail {
            to: application.email.to_string(),
            subject: format!("Next step for your {kind} application"),
            html: DocumentsRequestHtml {
                name,
                kind,
                has_attachment,
            }
            .render()?,
            text: DocumentsRequestText {
                name,
                kind,
                has_attachment,
            }
            .render()?,
            reply_to: None,
            attachments: agreement.into_iter().collect(),
        })
        .await
    }

    /// Confirm that a signed document arrived.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or delivery fails.
    pub async fn send_document_received(
        &self,
        application: &Application,
    ) -> Result<DeliveryReport, EmailError> {
        let name = application.name.as_str();

        self.send(OutgoingEmail {
            to: application.email.to_string(),
            subject: "We received your signed document".to_string(),
            html: DocumentReceivedHtml { name }.render()?,
            text: DocumentReceivedText { name }.render()?,
            reply_to: None,
            attachments: Vec::new(),
        })
        .await
    }

    /// Tell the applicant about the decision.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or delivery fails.
    pub async fn send_application_decision(
        &self,
        application: &Application,
        approved: bool,
    ) -> Result<DeliveryReport, EmailError> {
        let kind = application.kind.label();
        let name = application.name.as_str();
        let note = application.review_note.as_deref();
        let subject = if approved {
            format!("Welcome aboard: your {kind} application was approved")
        } else {
            format!("Update on your {kind} application")
        };

        self.send(OutgoingEmail {
            to: application.email.to_string(),
            subject,
            html: ApplicationDecisionHtml {
                name,
                kind,
                approved,
                note,
            }
            .render()?,
            text: ApplicationDecisionText {
                name,
                kind,
                approved,
                note,
            }
            .render()?,
            reply_to: None,
            attachments: Vec::new(),
        })
        .await
    }

    /// Send a ticket message to the requester.
    ///
    /// `opened` selects the "we got your request" wording for new tickets.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or delivery fails.
    pub async fn send_ticket_message(
        &self,
        ticket: &SupportTicket,
        body: &str,
        opened: bool,
    ) -> Result<DeliveryReport, EmailError> {
        self.send(OutgoingEmail {
            to: ticket.requester_email.clone(),
            subject: ticket_subject(ticket),
            html: TicketMessageHtml {
                ticket,
                body,
                opened,
            }
            .render()?,
            text: TicketMessageText {
                ticket,
                body,
                opened,
            }
            .render()?,
            reply_to: Some(ticket_reply_address(&self.from_address, ticket)),
            attachments: Vec::new(),
        })
        .await
    }

    /// Deliver a rendered email according to its [`DeliveryPlan`].
    ///
    /// # Errors
    ///
    /// Returns `EmailError::NoProvider` with no provider configured, or
    /// `EmailError::Exhausted` once every attempt failed.
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    pub async fn send(&self, email: OutgoingEmail) -> Result<DeliveryReport, EmailError> {
        let plan = DeliveryPlan::new(
            self.brevo_api_key.is_some(),
            self.resend_api_key.is_some(),
            !email.attachments.is_empty(),
        );

        if plan.attempts.is_empty() {
            return Err(EmailError::NoProvider);
        }

        let mut last_error = None;

        for (index, attempt) in plan.attempts.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let result = match attempt.provider {
                Provider::Brevo => self.send_brevo(&email, attempt.with_attachments).await,
                Provider::Resend => self.send_resend(&email).await,
            };

            match result {
                Ok(()) => {
                    let degraded = !email.attachments.is_empty() && !attempt.with_attachments;
                    if degraded {
                        warn!(provider = %attempt.provider, "Email sent without attachments");
                    }
                    info!(provider = %attempt.provider, attempt = index + 1, "Email sent");
                    return Ok(DeliveryReport {
                        provider: attempt.provider,
                        attempts: index + 1,
                        degraded,
                    });
                }
                Err(e) => {
                    warn!(provider = %attempt.provider, attempt = index + 1, error = %e, "Email attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(EmailError::Exhausted {
            attempts: plan.attempts.len(),
            last: last_error.map_or_else(String::new, |e| e.to_string()),
        })
    }

    async fn send_brevo(
        &self,
        email: &OutgoingEmail,
        with_attachments: bool,
    ) -> Result<(), EmailError> {
        let key = self.brevo_api_key.as_ref().ok_or(EmailError::NoProvider)?;

        let mut payload = json!({
            "sender": { "name": self.from_name, "email": self.from_address },
            "to": [{ "email": email.to }],
            "subject": email.subject,
            "htmlContent": email.html,
            "textContent": email.text,
        });

        if let Some(reply_to) = &email.reply_to {
            payload["replyTo"] = json!({ "email": reply_to });
        }

        if with_attachments && !email.attachments.is_empty() {
            payload["attachment"] = email
                .attachments
                .iter()
                .map(|a| json!({ "name": a.filename, "content": BASE64.encode(&a.content) }))
                .collect();
        }

        let response = self
            .client
            .post(BREVO_URL)
            .header("api-key", key.expose_secret())
            .json(&payload)
            .send()
            .await?;

        check_response(Provider::Brevo, response).await
    }

    async fn send_resend(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let key = self.resend_api_key.as_ref().ok_or(EmailError::NoProvider)?;

        let mut payload = json!({
            "from": format!("{} <{}>", self.from_name, self.from_address),
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
        });

        if let Some(reply_to) = &email.reply_to {
            payload["reply_to"] = json!(reply_to);
        }

        let response = self
            .client
            .post(RESEND_URL)
            .bearer_auth(key.expose_secret())
            .json(&payload)
            .send()
            .await?;

        check_response(Provider::Resend, response).await
    }
}

async fn check_response(provider: Provider, response: reqwest::Response) -> Result<(), EmailError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(EmailError::Rejected {
        provider,
        status: status.as_u16(),
        message,
    })
}

/// Subject line carrying the ticket reference used to thread replies.
#[must_use]
pub fn ticket_subject(ticket: &SupportTicket) -> String {
    format!("[Ticket #{}] {}", ticket.id, ticket.subject)
}

/// `support+<id>@domain` address so replies route back to the ticket.
#[must_use]
pub fn ticket_reply_address(from_address: &str, ticket: &SupportTicket) -> String {
    let domain = from_address
        .rsplit_once('@')
        .map_or(from_address, |(_, domain)| domain);
    format!("support+{}@{domain}", ticket.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BREVO_WITH_FILES: Attempt = Attempt {
        provider: Provider::Brevo,
        with_attachments: true,
    };

    #[test]
    fn test_plan_prefers_resend() {
        let plan = DeliveryPlan::new(true, true, false);
        assert_eq!(plan.attempts.len(), MAX_ATTEMPTS);
        assert!(plan.attempts.iter().all(|a| a.provider == Provider::Resend));
    }

    #[test]
    fn test_plan_brevo_only() {
        let plan = DeliveryPlan::new(true, false, false);
        assert_eq!(plan.attempts.len(), MAX_ATTEMPTS);
        assert!(plan.attempts.iter().all(|a| a.provider == Provider::Brevo));
    }

    #[test]
    fn test_attachments_force_brevo_then_degrade() {
        let plan = DeliveryPlan::new(true, true, true);
        assert_eq!(
            plan.attempts,
            vec![
                BREVO_WITH_FILES,
                BREVO_WITH_FILES,
                BREVO_WITH_FILES,
                Attempt {
                    provider: Provider::Resend,
                    with_attachments: false,
                },
            ]
        );
    }

    #[test]
    fn test_attachments_without_brevo_only_degraded() {
        let plan = DeliveryPlan::new(false, true, true);
        assert_eq!(
            plan.attempts,
            vec![Attempt {
                provider: Provider::Resend,
                with_attachments: false,
            }]
        );
    }

    #[test]
    fn test_no_provider_empty_plan() {
        assert!(DeliveryPlan::new(false, false, true).attempts.is_empty());
    }

    #[test]
    fn test_documents_request_renders() {
        let html = DocumentsRequestHtml {
            name: "Kim",
            kind: "Coach",
            has_attachment: true,
        }
        .render();
        assert!(html.is_ok_and(|h| h.contains("Kim") && h.contains("attached")));

        let text = DocumentsRequestText {
            name: "Kim",
            kind: "Coach",
            has_attachment: false,
        }
        .render();
        assert!(text.is_ok_and(|t| !t.contains("attached")));
    }

    #[test]
    fn test_decision_note_rendered() {
        let text = ApplicationDecisionText {
            name: "Sam",
            kind: "Affiliate",
            approved: false,
            note: Some("Audience too small for now"),
        }
        .render();
        assert!(text.is_ok_and(|t| t.contains("Audience too small for now")));
    }
}
