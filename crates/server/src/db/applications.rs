//! Application repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use flexhub_core::{ApplicationId, ApplicationStatus, ApplicationType, DocumentSource, Email};

use super::RepositoryError;
use crate::models::Application;

const APPLICATION_COLUMNS: &str = r"
    id, name, email, phone, type, message, resume_url, status,
    signed_document_filename, signed_document_url, signed_document_path,
    signed_document_received_at, signed_document_source,
    reviewed_by, review_note, created_at, updated_at
";

/// Input for a new application.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub name: String,
    pub email: Email,
    pub phone: Option<String>,
    pub kind: ApplicationType,
    pub message: Option<String>,
    pub resume_url: Option<String>,
}

/// Stored signed-document metadata.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    pub filename: String,
    pub url: Option<String>,
    pub storage_path: Option<String>,
    pub received_at: DateTime<Utc>,
    pub source: DocumentSource,
}

/// Filter for listing applications.
#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub kind: Option<ApplicationType>,
    pub limit: i64,
    pub offset: i64,
}

/// Repository for application database operations.
pub struct ApplicationRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ApplicationRepository<'a> {
    /// Create a new application repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get an application by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_id(
        &self,
        id: ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(application)
    }

    /// List applications, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, RepositoryError> {
        let applications = sqlx::query_as::<_, Application>(&format!(
            r"
            SELECT {APPLICATION_COLUMNS} FROM applications
            WHERE ($1::application_status IS NULL OR status = $1)
              AND ($2::application_type IS NULL OR type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "
        ))
        .bind(filter.status)
        .bind(filter.kind)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(self.pool)
        .await?;

        Ok(applications)
    }

    /// Non-rejected applications of a type for the same mailbox.
    ///
    /// `canonical` is the [`Email::canonical`] form of the incoming address.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_duplicates(
        &self,
        canonical: &str,
        kind: ApplicationType,
    ) -> Result<Vec<Application>, RepositoryError> {
        let applications = sqlx::query_as::<_, Application>(&format!(
            r"
            SELECT {APPLICATION_COLUMNS} FROM applications
            WHERE email_canonical = $1
              AND type = $2
              AND status <> 'rejected'
            ORDER BY created_at DESC
            "
        ))
        .bind(canonical)
        .bind(kind)
        .fetch_all(self.pool)
        .await?;

        Ok(applications)
    }

    /// Most recent undecided application from an applicant's mailbox.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_open_by_email(
        &self,
        canonical: &str,
    ) -> Result<Option<Application>, RepositoryError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            r"
            SELECT {APPLICATION_COLUMNS} FROM applications
            WHERE email_canonical = $1
              AND status IN ('pending', 'awaiting', 'received')
            ORDER BY
                CASE status WHEN 'awaiting' THEN 0 WHEN 'received' THEN 1 ELSE 2 END,
                created_at DESC
            LIMIT 1
            "
        ))
        .bind(canonical)
        .fetch_optional(self.pool)
        .await?;

        Ok(application)
    }

    /// Insert a new pending application.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create(&self, new: &NewApplication) -> Result<Application, RepositoryError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            r"
            INSERT INTO applications
                (name, email, email_canonical, phone, type, message, resume_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {APPLICATION_COLUMNS}
            "
        ))
        .bind(&new.name)
        .bind(new.email.as_str())
        .bind(new.email.canonical())
        .bind(new.phone.as_deref())
        .bind(new.kind)
        .bind(new.message.as_deref())
        .bind(new.resume_url.as_deref())
        .fetch_one(self.pool)
        .await?;

        Ok(application)
    }

    /// Move an application to `to`, but only if it is still in `from`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the status changed concurrently.
    pub async fn transition(
        &self,
        id: ApplicationId,
        from: ApplicationStatus,
        to: ApplicationStatus,
    ) -> Result<Application, RepositoryError> {
        sqlx::query_as::<_, Application>(&format!(
            r"
            UPDATE applications SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {APPLICATION_COLUMNS}
            "
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| RepositoryError::Conflict(format!("application {id} is no longer {from}")))
    }

    /// Record a decision (approve/reject) with reviewer and note.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the status changed concurrently.
    pub async fn decide(
        &self,
        id: ApplicationId,
        from: ApplicationStatus,
        to: ApplicationStatus,
        reviewed_by: &str,
        note: Option<&str>,
    ) -> Result<Application, RepositoryError> {
        sqlx::query_as::<_, Application>(&format!(
            r"
            UPDATE applications
            SET status = $3, reviewed_by = $4, review_note = $5, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {APPLICATION_COLUMNS}
            "
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(reviewed_by)
        .bind(note)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| RepositoryError::Conflict(format!("application {id} is no longer {from}")))
    }

    /// Store signed-document metadata and set the resulting status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the status changed concurrently.
    pub async fn attach_signed_document(
        &self,
        id: ApplicationId,
        from: ApplicationStatus,
        to: ApplicationStatus,
        document: &SignedDocument,
    ) -> Result<Application, RepositoryError> {
        sqlx::query_as::<_, Application>(&format!(
            r"
            UPDATE applications SET
                status = $3,
                signed_document_filename = $4,
                signed_document_url = $5,
                signed_document_path = $6,
                signed_document_received_at = $7,
                signed_document_source = $8,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {APPLICATION_COLUMNS}
            "
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(&document.filename)
        .bind(document.url.as_deref())
        .bind(document.storage_path.as_deref())
        .bind(document.received_at)
        .bind(document.source)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| RepositoryError::Conflict(format!("application {id} is no longer {from}")))
    }
}
