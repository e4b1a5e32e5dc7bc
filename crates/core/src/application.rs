//! Application approval workflow.
//!
//! ```text
//! pending ──send documents──► awaiting ──signed doc──► received ──approve──► approved
//!    │                           │                        │
//!    └───────────────────────────┴──────── reject ────────┴──────────────► rejected
//! ```
//!
//! A signed document arriving while the application is still `pending` is
//! kept on file but does not move the status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DocumentSource;

/// Application status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "application_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Submitted, not yet reviewed.
    #[default]
    Pending,
    /// Agreement sent; waiting for the signed copy.
    Awaiting,
    /// Signed document on file.
    Received,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Awaiting => "awaiting",
            Self::Received => "received",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Returns true once a decision has been made.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Returns true if inbound email for this applicant should be routed to
    /// the application rather than to support.
    #[must_use]
    pub const fn accepts_inbound_documents(&self) -> bool {
        !self.is_terminal()
    }

    /// What happens when a signed document arrives in this state.
    #[must_use]
    pub const fn on_signed_document(&self) -> DocumentDisposition {
        match self {
            Self::Awaiting | Self::Received => DocumentDisposition::Advance,
            Self::Pending => DocumentDisposition::StoreOnly,
            Self::Approved | Self::Rejected => DocumentDisposition::Refuse,
        }
    }

    /// Apply an event.
    ///
    /// # Errors
    ///
    /// Returns a `TransitionError` if the event is not allowed from the
    /// current status.
    pub const fn apply(self, event: &ApplicationEvent) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self));
        }

        match (self, event) {
            (Self::Pending, ApplicationEvent::SendDocuments) => Ok(Self::Awaiting),
            (Self::Awaiting | Self::Received, ApplicationEvent::SignedDocumentReceived { .. }) => {
                Ok(Self::Received)
            }
            (Self::Received, ApplicationEvent::Approve { has_signed_document }) => {
                if *has_signed_document {
                    Ok(Self::Approved)
                } else {
                    Err(TransitionError::MissingSignedDocument)
                }
            }
            (_, ApplicationEvent::Reject) => Ok(Self::Rejected),
            (from, event) => Err(TransitionError::NotAllowed {
                from,
                event: event.name(),
            }),
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting" => Ok(Self::Awaiting),
            "received" => Ok(Self::Received),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("invalid application status: {s}")),
        }
    }
}

/// Something that happens to an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEvent {
    SendDocuments,
    SignedDocumentReceived { source: DocumentSource },
    Approve { has_signed_document: bool },
    Reject,
}

impl ApplicationEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendDocuments => "send_documents",
            Self::SignedDocumentReceived { .. } => "signed_document_received",
            Self::Approve { .. } => "approve",
            Self::Reject => "reject",
        }
    }
}

/// How to treat a signed document given the application's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentDisposition {
    /// Store it and move the application to `received`.
    Advance,
    /// Store it, leave the status alone.
    StoreOnly,
    /// The application is closed; do not store.
    Refuse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {event} an application that is {from}")]
    NotAllowed {
        from: ApplicationStatus,
        event: &'static str,
    },
    #[error("a signed document is required before approval")]
    MissingSignedDocument,
    #[error("application is already {0}")]
    Terminal(ApplicationStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationStatus::{Approved, Awaiting, Pending, Received, Rejected};

    const EMAILED: ApplicationEvent = ApplicationEvent::SignedDocumentReceived {
        source: DocumentSource::Email,
    };

    #[test]
    fn test_happy_path() {
        let status = Pending.apply(&ApplicationEvent::SendDocuments);
        assert_eq!(status, Ok(Awaiting));

        let status = Awaiting.apply(&EMAILED);
        assert_eq!(status, Ok(Received));

        let status = Received.apply(&ApplicationEvent::Approve {
            has_signed_document: true,
        });
        assert_eq!(status, Ok(Approved));
    }

    #[test]
    fn test_pending_cannot_skip_to_received() {
        assert!(matches!(
            Pending.apply(&EMAILED),
            Err(TransitionError::NotAllowed { .. })
        ));
        assert!(matches!(
            Pending.apply(&ApplicationEvent::SignedDocumentReceived {
                source: DocumentSource::Upload
            }),
            Err(TransitionError::NotAllowed { .. })
        ));
        assert_eq!(Pending.on_signed_document(), DocumentDisposition::StoreOnly);
    }

    #[test]
    fn test_second_document_keeps_received() {
        assert_eq!(Received.apply(&EMAILED), Ok(Received));
        assert_eq!(Received.on_signed_document(), DocumentDisposition::Advance);
    }

    #[test]
    fn test_approve_requires_document() {
        assert_eq!(
            Received.apply(&ApplicationEvent::Approve {
                has_signed_document: false
            }),
            Err(TransitionError::MissingSignedDocument)
        );
        assert!(matches!(
            Awaiting.apply(&ApplicationEvent::Approve {
                has_signed_document: true
            }),
            Err(TransitionError::NotAllowed { .. })
        ));
    }

    #[test]
    fn test_reject_from_any_open_state() {
        for status in [Pending, Awaiting, Received] {
            assert_eq!(status.apply(&ApplicationEvent::Reject), Ok(Rejected));
        }
    }

    #[test]
    fn test_terminal_states_refuse_everything() {
        for status in [Approved, Rejected] {
            assert_eq!(
                status.apply(&ApplicationEvent::Reject),
                Err(TransitionError::Terminal(status))
            );
            assert_eq!(status.on_signed_document(), DocumentDisposition::Refuse);
            assert!(!status.accepts_inbound_documents());
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for status in [Pending, Awaiting, Received, Approved, Rejected] {
            assert_eq!(status.as_str().parse::<ApplicationStatus>(), Ok(status));
        }
    }
}
