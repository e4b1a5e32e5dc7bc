//! Mailgun webhook errors.

use thiserror::Error;

/// Errors that can occur while accepting an inbound email.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature missing, stale or wrong.
    #[error("Invalid Mailgun signature: {0}")]
    InvalidSignature(String),

    /// Payload could not be understood.
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// A stored attachment could not be fetched.
    #[error("Attachment download failed: {0}")]
    Download(String),
}
