//! Normalizing the three Mailgun payload shapes into [`InboundEmail`].
//!
//! 1. Event webhook: `application/json` with `event-data`
//! 2. Inbound route: `multipart/form-data` with `attachment-N` files
//! 3. Legacy route: `application/x-www-form-urlencoded` with an
//!    `attachments` JSON field of stored URLs

use super::error::WebhookError;
use super::types::{
    AttachmentContent, EventPayload, InboundAttachment, InboundEmail, StoredAttachment,
    WebhookSignature,
};

/// Events that carry a message we should process.
const PROCESSED_EVENTS: &[&str] = &["delivered", "accepted"];

/// A parsed webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedWebhook {
    Email {
        email: InboundEmail,
        signature: Option<WebhookSignature>,
    },
    /// A valid event we do not process (e.g. `opened`).
    IgnoredEvent(String),
}

/// Parse an event webhook JSON body.
///
/// # Errors
///
/// Returns `WebhookError::InvalidPayload` if the JSON is malformed or the
/// message has no sender or recipient.
pub fn parse_event_json(body: &[u8]) -> Result<ParsedWebhook, WebhookError> {
    let payload: EventPayload = serde_json::from_slice(body)
        .map_err(|e| WebhookError::InvalidPayload(format!("invalid JSON event: {e}")))?;
    let data = payload.event_data;

    if !PROCESSED_EVENTS.contains(&data.event.as_str()) {
        return Ok(ParsedWebhook::IgnoredEvent(data.event));
    }

    let message = data.message;
    let headers = message.as_ref().map(|m| &m.headers);

    let sender = data
        .envelope
        .as_ref()
        .and_then(|e| e.sender.as_deref())
        .or_else(|| headers.and_then(|h| h.from.as_deref()))
        .map(extract_address)
        .unwrap_or_default();

    let recipient = data
        .recipient
        .as_deref()
        .or_else(|| data.envelope.as_ref().and_then(|e| e.targets.as_deref()))
        .or_else(|| headers.and_then(|h| h.to.as_deref()))
        .map(extract_address)
        .unwrap_or_default();

    let subject = headers
        .and_then(|h| h.subject.clone())
        .unwrap_or_default();
    let message_id = headers.and_then(|h| h.message_id.clone());

    let (body_plain, stripped_text, attachments) = match message {
        Some(m) => (
            m.body_plain.unwrap_or_default(),
            m.stripped_text,
            m.attachments.into_iter().map(remote_attachment).collect(),
        ),
        None => (String::new(), None, Vec::new()),
    };

    let email = InboundEmail {
        sender,
        recipient,
        subject,
        body_plain,
        stripped_text,
        message_id,
        attachments,
    };
    require_addresses(&email)?;

    Ok(ParsedWebhook::Email {
        email,
        signature: payload.signature,
    })
}

/// Parse a URL-encoded form body.
///
/// # Errors
///
/// Returns `WebhookError::InvalidPayload` if required fields are missing.
pub fn parse_urlencoded(body: &[u8]) -> Result<ParsedWebhook, WebhookError> {
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(body).into_owned().collect();
    parse_form_fields(fields, Vec::new())
}

/// Build an email from form fields plus any files already read from a
/// multipart body.
///
/// # Errors
///
/// Returns `WebhookError::InvalidPayload` if required fields are missing or
/// the `attachments` field is not valid JSON.
pub fn parse_form_fields(
    fields: Vec<(String, String)>,
    files: Vec<InboundAttachment>,
) -> Result<ParsedWebhook, WebhookError> {
    let get = |name: &str| field(&fields, name);

    let sender = get("sender")
        .or_else(|| get("from"))
        .map(extract_address)
        .unwrap_or_default();
    let recipient = get("recipient")
        .or_else(|| get("to"))
        .map(extract_address)
        .unwrap_or_default();

    let signature = match (get("timestamp"), get("token"), get("signature")) {
        (Some(timestamp), Some(token), Some(signature)) => Some(WebhookSignature {
            timestamp: timestamp.to_string(),
            token: token.to_string(),
            signature: signature.to_string(),
        }),
        _ => None,
    };

    let mut attachments = files;
    if let Some(raw) = get("attachments") {
        let stored: Vec<StoredAttachment> = serde_json::from_str(raw).map_err(|e| {
            WebhookError::InvalidPayload(format!("invalid attachments field: {e}"))
        })?;
        attachments.extend(stored.into_iter().map(remote_attachment));
    }

    let email = InboundEmail {
        sender,
        recipient,
        subject: get("subject").unwrap_or_default().to_string(),
        body_plain: get("body-plain").unwrap_or_default().to_string(),
        stripped_text: get("stripped-text").map(str::to_string),
        message_id: get("message-id").map(str::to_string),
        attachments,
    };
    require_addresses(&email)?;

    Ok(ParsedWebhook::Email { email, signature })
}

/// Returns true for multipart file fields Mailgun names `attachment-N`.
#[must_use]
pub fn is_attachment_field(name: &str) -> bool {
    name.strip_prefix("attachment-")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Extract the bare address from `Name <addr>` or a comma-separated list
/// (first entry wins), lowercase.
#[must_use]
pub fn extract_address(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or(raw);
    let address = match (first.find('<'), first.rfind('>')) {
        (Some(start), Some(end)) if start < end => first.get(start + 1..end).unwrap_or(first),
        _ => first,
    };
    address.trim().trim_matches('"').to_lowercase()
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.trim().is_empty())
}

fn remote_attachment(stored: StoredAttachment) -> InboundAttachment {
    InboundAttachment {
        filename: stored.filename,
        content_type: stored.content_type,
        content: AttachmentContent::Remote { url: stored.url },
    }
}

fn require_addresses(email: &InboundEmail) -> Result<(), WebhookError> {
    if email.sender.is_empty() || !email.sender.contains('@') {
        return Err(WebhookError::InvalidPayload("missing sender".to_string()));
    }
    if email.recipient.is_empty() {
        return Err(WebhookError::InvalidPayload("missing recipient".to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(extract_address("Kim Lee <Kim@Example.com>"), "kim@example.com");
        assert_eq!(extract_address(" ana@uni.edu "), "ana@uni.edu");
        assert_eq!(
            extract_address("\"Support\" <support@flexhub.app>, other@x.com"),
            "support@flexhub.app"
        );
    }

    #[test]
    fn test_event_json_delivered() {
        let body = br#"{
            "signature": {"timestamp": "1700000000", "token": "tok", "signature": "abc"},
            "event-data": {
                "event": "delivered",
                "recipient": "support@flexhub.app",
                "envelope": {"sender": "kim@example.com"},
                "message": {
                    "headers": {
                        "from": "Kim <kim@example.com>",
                        "to": "support@flexhub.app",
                        "subject": "Signed agreement",
                        "message-id": "<m1@mail.example.com>"
                    },
                    "attachments": [
                        {"filename": "agreement.pdf", "content-type": "application/pdf", "size": 1024,
                         "url": "https://storage.mailgun.net/v3/domains/x/messages/abc/attachments/0"}
                    ]
                }
            }
        }"#;

        let ParsedWebhook::Email { email, signature } = parse_event_json(body).unwrap() else {
            panic!("expected an email");
        };

        assert_eq!(email.sender, "kim@example.com");
        assert_eq!(email.recipient, "support@flexhub.app");
        assert_eq!(email.subject, "Signed agreement");
        assert_eq!(email.attachments.len(), 1);
        assert!(matches!(
            email.attachments[0].content,
            AttachmentContent::Remote { .. }
        ));
        assert_eq!(signature.unwrap().token, "tok");
    }

    #[test]
    fn test_event_json_other_events_ignored() {
        let body = br#"{"event-data": {"event": "opened", "recipient": "a@b.com"}}"#;
        assert_eq!(
            parse_event_json(body).unwrap(),
            ParsedWebhook::IgnoredEvent("opened".to_string())
        );
    }

    #[test]
    fn test_event_json_malformed() {
        assert!(matches!(
            parse_event_json(b"{not json"),
            Err(WebhookError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_legacy_form_with_stored_attachments() {
        let body = "sender=Kim%40Example.com&recipient=apply%40flexhub.app&subject=My+NDA\
                    &body-plain=Attached&timestamp=1700000000&token=t&signature=s\
                    &attachments=%5B%7B%22name%22%3A%22nda.pdf%22%2C%22url%22%3A%22https%3A%2F%2Fx%2F1%22%7D%5D";

        let ParsedWebhook::Email { email, signature } = parse_urlencoded(body.as_bytes()).unwrap()
        else {
            panic!("expected an email");
        };

        assert_eq!(email.sender, "kim@example.com");
        assert_eq!(email.subject, "My NDA");
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "nda.pdf");
        assert!(signature.is_some());
    }

    #[test]
    fn test_multipart_fields_with_inline_files() {
        let files = vec![InboundAttachment {
            filename: "w9.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            content: AttachmentContent::Inline(vec![1, 2, 3]),
        }];
        let parsed = parse_form_fields(
            fields(&[
                ("from", "Ana <ana@uni.edu>"),
                ("recipient", "support@flexhub.app"),
                ("subject", "Re: [Ticket #12] Billing"),
                ("body-plain", "Thanks!\n\n> quoted"),
                ("stripped-text", "Thanks!"),
            ]),
            files,
        )
        .unwrap();

        let ParsedWebhook::Email { email, signature } = parsed else {
            panic!("expected an email");
        };
        assert_eq!(email.sender, "ana@uni.edu");
        assert_eq!(email.reply_text(), "Thanks!");
        assert_eq!(email.attachments.len(), 1);
        assert!(signature.is_none());
    }

    #[test]
    fn test_missing_sender_rejected() {
        assert!(matches!(
            parse_form_fields(fields(&[("recipient", "support@flexhub.app")]), Vec::new()),
            Err(WebhookError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_is_attachment_field() {
        assert!(is_attachment_field("attachment-1"));
        assert!(is_attachment_field("attachment-12"));
        assert!(!is_attachment_field("attachment-"));
        assert!(!is_attachment_field("attachments"));
        assert!(!is_attachment_field("attachment-x"));
    }
}
