//! Heuristics for deciding what an inbound email is.

use flexhub_core::SupportTicketId;

use super::types::{InboundAttachment, InboundEmail};

/// Extensions a signed document can have.
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "png", "jpg", "jpeg", "heic"];

/// Keywords matched at the start of a word ("SignedContract", "agreements"),
/// so "unsigned" and "disagreement" do not count.
const SIGNING_KEYWORDS: &[&str] = &["signed", "signature", "agreement", "contract", "docusign"];

/// Short keywords matched as whole words only ("nda" is not "agenda").
const SIGNING_WORDS: &[&str] = &["nda", "w9", "w-9"];

/// Returns true if the filename has a document extension.
#[must_use]
pub fn has_document_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Returns true if the text mentions signing.
#[must_use]
pub fn mentions_signing(text: &str) -> bool {
    let text = text.to_lowercase();

    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| SIGNING_KEYWORDS.iter().any(|k| word.starts_with(k)))
        || text
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .any(|word| SIGNING_WORDS.contains(&word))
}

/// The attachment that looks like a signed document, if any.
///
/// It must have a document extension, and either its filename or the
/// message subject/body must mention signing.
#[must_use]
pub fn signed_document(email: &InboundEmail) -> Option<&InboundAttachment> {
    let message_mentions = mentions_signing(&email.subject) || mentions_signing(&email.body_plain);

    let documents = email
        .attachments
        .iter()
        .filter(|a| has_document_extension(&a.filename));

    let mut fallback = None;
    for attachment in documents {
        if mentions_signing(&attachment.filename) {
            return Some(attachment);
        }
        if message_mentions && fallback.is_none() {
            fallback = Some(attachment);
        }
    }
    fallback
}

/// Ticket referenced by `[Ticket #N]` in the subject or a `support+N@`
/// recipient.
#[must_use]
pub fn ticket_reference(email: &InboundEmail) -> Option<SupportTicketId> {
    subject_ticket_reference(&email.subject).or_else(|| recipient_ticket_reference(&email.recipient))
}

fn subject_ticket_reference(subject: &str) -> Option<SupportTicketId> {
    let lower = subject.to_ascii_lowercase();
    let start = lower.find("[ticket #")? + "[ticket #".len();
    let rest = lower.get(start..)?;
    let end = rest.find(']')?;

    rest.get(..end)?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .map(SupportTicketId::new)
}

fn recipient_ticket_reference(recipient: &str) -> Option<SupportTicketId> {
    let (local, _) = recipient.split_once('@')?;
    let (mailbox, tag) = local.split_once('+')?;
    if !mailbox.eq_ignore_ascii_case("support") {
        return None;
    }

    tag.parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .map(SupportTicketId::new)
}

/// Returns true if the email was sent to a support mailbox.
#[must_use]
pub fn is_support_recipient(recipient: &str) -> bool {
    recipient
        .split_once('@')
        .is_some_and(|(local, _)| local.to_ascii_lowercase().starts_with("support"))
}
