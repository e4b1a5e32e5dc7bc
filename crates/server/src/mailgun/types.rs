//! Inbound email types and Mailgun payload shapes.

use serde::Deserialize;

/// An inbound email, independent of which payload shape delivered it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEmail {
    /// Bare sender address, lowercase.
    pub sender: String,
    /// Bare recipient address, lowercase.
    pub recipient: String,
    pub subject: String,
    /// Full plain-text body.
    pub body_plain: String,
    /// Body with quoted replies and signature removed, when Mailgun provides it.
    pub stripped_text: Option<String>,
    pub message_id: Option<String>,
    pub attachments: Vec<InboundAttachment>,
}

impl InboundEmail {
    /// Text to store for a reply: the stripped body when present.
    #[must_use]
    pub fn reply_text(&self) -> &str {
        self.stripped_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.body_plain.trim())
    }
}

/// An attachment, either uploaded inline or stored by Mailgun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: AttachmentContent,
}

/// Where an attachment's bytes are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    /// Sent in the request body (multipart route).
    Inline(Vec<u8>),
    /// Stored by Mailgun; fetch with the API key.
    Remote { url: String },
}

/// Mailgun webhook signature fields.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WebhookSignature {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

/// Event webhook body (`application/json`).
#[derive(Debug, Deserialize)]
pub(crate) struct EventPayload {
    pub signature: Option<WebhookSignature>,
    #[serde(rename = "event-data")]
    pub event_data: EventData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventData {
    pub event: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub envelope: Option<Envelope>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub targets: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventMessage {
    #[serde(default)]
    pub headers: EventHeaders,
    #[serde(default)]
    pub attachments: Vec<StoredAttachment>,
    #[serde(default, rename = "body-plain")]
    pub body_plain: Option<String>,
    #[serde(default, rename = "stripped-text")]
    pub stripped_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventHeaders {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, rename = "message-id")]
    pub message_id: Option<String>,
}

/// An attachment Mailgun stored; used by both the event payload and the
/// legacy form's `attachments` JSON field.
#[derive(Debug, Deserialize)]
pub(crate) struct StoredAttachment {
    #[serde(alias = "name")]
    pub filename: String,
    #[serde(default, rename = "content-type")]
    pub content_type: Option<String>,
    pub url: String,
}
