//! Mailgun inbound email integration.
//!
//! This module provides:
//! - [`MailgunClient`] for signature verification and stored attachments
//! - Parsers for the three payload shapes Mailgun delivers
//! - Routing heuristics (ticket references, signed documents)
//!
//! # Flow
//!
//! 1. Mailgun posts to `/email-webhook`
//! 2. The body is parsed into an [`InboundEmail`] and its signature checked
//! 3. `InboundMailService` routes it to a ticket or an application

mod client;
mod error;
mod parse;
mod routing;
mod types;

pub use client::{MAX_ATTACHMENT_BYTES, MailgunClient, stored_attachment_url};
pub(crate) use client::constant_time_compare;
pub use error::WebhookError;
pub use parse::{
    ParsedWebhook, extract_address, is_attachment_field, parse_event_json, parse_form_fields,
    parse_urlencoded,
};
pub use routing::{
    has_document_extension, is_support_recipient, mentions_signing, signed_document,
    ticket_reference,
};
pub use types::{AttachmentContent, InboundAttachment, InboundEmail, WebhookSignature};
