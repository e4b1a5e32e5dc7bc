//! Ambassador/staff applications.

use chrono::{DateTime, Utc};
use serde::Serialize;

use flexhub_core::{ApplicationId, ApplicationStatus, ApplicationType, DocumentSource, Email};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    pub email: Email,
    pub phone: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: ApplicationType,
    pub message: Option<String>,
    pub resume_url: Option<String>,
    pub status: ApplicationStatus,
    pub signed_document_filename: Option<String>,
    pub signed_document_url: Option<String>,
    pub signed_document_path: Option<String>,
    pub signed_document_received_at: Option<DateTime<Utc>>,
    pub signed_document_source: Option<DocumentSource>,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Returns true once any signed document has been recorded.
    #[must_use]
    pub const fn has_signed_document(&self) -> bool {
        self.signed_document_received_at.is_some()
    }
}
