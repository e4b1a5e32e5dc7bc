//! Application intake and approval workflow.
//!
//! Status changes go through `ApplicationStatus::apply` first and are then
//! written with a `WHERE status = from` guard, so two staff members (or a
//! staff member and an inbound email) cannot both move the same application.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use flexhub_core::{
    ApplicationEvent, ApplicationId, ApplicationStatus, ApplicationType, DocumentDisposition,
    DocumentSource, Email, TransitionError,
};

use crate::db::{
    ApplicationFilter, ApplicationRepository, NewApplication, SignedDocument, UserRepository,
};
use crate::error::AppError;
use crate::models::Application;
use crate::services::email::{Attachment, EmailService};
use crate::services::storage::StorageService;

const MAX_NAME_LENGTH: usize = 200;
const MAX_MESSAGE_LENGTH: usize = 10_000;

/// Public application form.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitApplication {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "type")]
    pub kind: ApplicationType,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub resume_url: Option<String>,
}

/// A signed document to attach, from an upload or an email attachment.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// An application after a workflow step, plus whether the applicant was told.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationUpdate {
    pub application: Application,
    pub applicant_notified: bool,
}

/// Application workflow service.
#[derive(Debug, Clone)]
pub struct ApplicationService {
    pool: PgPool,
    email: EmailService,
    storage: Option<StorageService>,
    agreement_path: Option<PathBuf>,
}

impl ApplicationService {
    /// Create a new application service.
    #[must_use]
    pub const fn new(
        pool: PgPool,
        email: EmailService,
        storage: Option<StorageService>,
        agreement_path: Option<PathBuf>,
    ) -> Self {
        Self {
            pool,
            email,
            storage,
            agreement_path,
        }
    }

    /// Accept a new application.
    ///
    /// # Errors
    ///
    /// - `AppError::BadRequest` if the form is invalid
    /// - `AppError::Conflict` if an open application of the same type exists
    ///   for the same mailbox
    #[instrument(skip(self, form), fields(kind = ?form.kind))]
    pub async fn submit(&self, form: SubmitApplication) -> Result<Application, AppError> {
        let new = validate_submission(form)?;
        let repo = ApplicationRepository::new(&self.pool);

        let duplicates = repo
            .find_duplicates(&new.email.canonical(), new.kind)
            .await?;
        if let Some(existing) = duplicates.first() {
            info!(existing_id = %existing.id, "Duplicate application refused");
            return Err(AppError::Conflict(format!(
                "an application for this email is already {}",
                existing.status
            )));
        }

        let application = repo.create(&new).await?;
        info!(application_id = %application.id, "Application submitted");

        if let Err(e) = self.email.send_application_received(&application).await {
            error!(error = %e, "Failed to send application acknowledgement");
        }
        if let Err(e) = self.email.notify_new_application(&application).await {
            error!(error = %e, "Failed to notify taskforce of new application");
        }

        Ok(application)
    }

    /// Get an application.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if it does not exist.
    pub async fn get(&self, id: ApplicationId) -> Result<Application, AppError> {
        ApplicationRepository::new(&self.pool)
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("application {id}")))
    }

    /// List applications.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the query fails.
    pub async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, AppError> {
        Ok(ApplicationRepository::new(&self.pool).list(filter).await?)
    }

    /// Send the agreement and move the application to `awaiting`.
    ///
    /// The agreement file is attached when configured and readable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transition` if the application is not `pending`.
    #[instrument(skip(self))]
    pub async fn send_documents(
        &self,
        id: ApplicationId,
        actor: &str,
    ) -> Result<ApplicationUpdate, AppError> {
        let current = self.get(id).await?;
        let next = current.status.apply(&ApplicationEvent::SendDocuments)?;

        let application = ApplicationRepository::new(&self.pool)
            .transition(id, current.status, next)
            .await?;
        info!(actor, "Agreement requested from applicant");

        let agreement = match &self.agreement_path {
            Some(path) => load_agreement(path).await,
            None => None,
        };

        let applicant_notified = match self
            .email
            .send_documents_request(&application, agreement)
            .await
        {
            Ok(report) => {
                if report.degraded {
                    warn!("Agreement email went out without the attachment");
                }
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to send agreement email");
                false
            }
        };

        Ok(ApplicationUpdate {
            application,
            applicant_notified,
        })
    }

    /// Store a signed document and advance the application if its state allows.
    ///
    /// A document for a `pending` application is stored without a status
    /// change; closed applications refuse it.
    ///
    /// # Errors
    ///
    /// - `AppError::Transition` if the application is approved or rejected
    /// - `AppError::Storage` if the upload fails
    #[instrument(skip(self, upload), fields(filename = %upload.filename, bytes = upload.content.len()))]
    pub async fn attach_signed_document(
        &self,
        id: ApplicationId,
        upload: DocumentUpload,
        source: DocumentSource,
    ) -> Result<ApplicationUpdate, AppError> {
        let current = self.get(id).await?;

        let next = match current.status.on_signed_document() {
            DocumentDisposition::Refuse => {
                return Err(TransitionError::Terminal(current.status).into());
            }
            DocumentDisposition::StoreOnly => current.status,
            DocumentDisposition::Advance => current
                .status
                .apply(&ApplicationEvent::SignedDocumentReceived { source })?,
        };

        let (url, storage_path) = match &self.storage {
            Some(storage) => {
                let stored = storage
                    .upload_signed_document(
                        id,
                        &upload.filename,
                        &upload.content_type,
                        upload.content,
                    )
                    .await?;
                (Some(stored.url), Some(stored.path))
            }
            None => {
                warn!("Storage not configured, keeping document metadata only");
                (None, None)
            }
        };

        let application = ApplicationRepository::new(&self.pool)
            .attach_signed_document(
                id,
                current.status,
                next,
                &SignedDocument {
                    filename: upload.filename,
                    url,
                    storage_path,
                    received_at: Utc::now(),
                    source,
                },
            )
            .await?;

        info!(from = %current.status, to = %next, "Signed document attached");

        let applicant_notified = match self.email.send_document_received(&application).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to confirm signed document");
                false
            }
        };

        Ok(ApplicationUpdate {
            application,
            applicant_notified,
        })
    }

    /// Approve an application and grant the matching role.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transition` unless the application is `received`
    /// with a signed document on file.
    #[instrument(skip(self, note))]
    pub async fn approve(
        &self,
        id: ApplicationId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<ApplicationUpdate, AppError> {
        let current = self.get(id).await?;
        let next = current.status.apply(&ApplicationEvent::Approve {
            has_signed_document: current.has_signed_document(),
        })?;

        let application = ApplicationRepository::new(&self.pool)
            .decide(id, current.status, next, actor, note)
            .await?;
        info!(actor, "Application approved");

        self.grant_role(&application).await?;
        Ok(self.notify_decision(application, true).await)
    }

    /// Reject an open application.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transition` if the application is already decided.
    #[instrument(skip(self, note))]
    pub async fn reject(
        &self,
        id: ApplicationId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<ApplicationUpdate, AppError> {
        let current = self.get(id).await?;
        let next = current.status.apply(&ApplicationEvent::Reject)?;

        let application = ApplicationRepository::new(&self.pool)
            .decide(id, current.status, next, actor, note)
            .await?;
        info!(actor, "Application rejected");

        Ok(self.notify_decision(application, false).await)
    }

    /// Most recent open application from the mailbox of `email`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the query fails.
    pub async fn find_open_for_sender(
        &self,
        email: &Email,
    ) -> Result<Option<Application>, AppError> {
        Ok(ApplicationRepository::new(&self.pool)
            .find_open_by_email(&email.canonical())
            .await?)
    }

    async fn grant_role(&self, application: &Application) -> Result<(), AppError> {
        let Some(role) = application.kind.granted_role() else {
            return Ok(());
        };

        let users = UserRepository::new(&self.pool);
        match users
            .find_by_email_variations(&application.email.variations())
            .await?
        {
            Some(user) if user.role == role => {}
            Some(user) => {
                users.set_role(user.id, role).await?;
                info!(user_id = %user.id, role = %role, "Role granted");
            }
            None => {
                info!(role = %role, "Applicant has no account yet, role not granted");
            }
        }

        Ok(())
    }

    async fn notify_decision(&self, application: Application, approved: bool) -> ApplicationUpdate {
        let applicant_notified = match self
            .email
            .send_application_decision(&application, approved)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to send decision email");
                false
            }
        };

        ApplicationUpdate {
            application,
            applicant_notified,
        }
    }
}

fn validate_submission(form: SubmitApplication) -> Result<NewApplication, AppError> {
    let name = form.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }

    let email = Email::parse(&form.email).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let message = non_empty(form.message);
    if message
        .as_ref()
        .is_some_and(|m| m.chars().count() > MAX_MESSAGE_LENGTH)
    {
        return Err(AppError::BadRequest(format!(
            "message must be at most {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    let resume_url = non_empty(form.resume_url);
    if let Some(raw) = &resume_url {
        let parsed = url::Url::parse(raw)
            .map_err(|_| AppError::BadRequest("resume_url must be a valid URL".to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::BadRequest(
                "resume_url must be an http(s) URL".to_string(),
            ));
        }
    }

    Ok(NewApplication {
        name,
        email,
        phone: non_empty(form.phone),
        kind: form.kind,
        message,
        resume_url,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn load_agreement(path: &Path) -> Option<Attachment> {
    match tokio::fs::read(path).await {
        Ok(content) => Some(Attachment {
            filename: path
                .file_name()
                .map_or_else(|| "agreement.pdf".to_string(), |n| n.to_string_lossy().into_owned()),
            content,
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Agreement file unreadable, sending without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> SubmitApplication {
        SubmitApplication {
            name: "  Kim Lee ".to_string(),
            email: "Kim.Lee+apply@Gmail.com".to_string(),
            phone: Some("   ".to_string()),
            kind: ApplicationType::Coach,
            message: Some("I coach kettlebells.".to_string()),
            resume_url: None,
        }
    }

    #[test]
    fn test_validate_submission_normalizes() {
        let new = validate_submission(form()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(new.name, "Kim Lee");
        assert_eq!(new.email.as_str(), "kim.lee+apply@gmail.com");
        assert!(new.phone.is_none());
        assert_eq!(new.message.as_deref(), Some("I coach kettlebells."));
    }

    #[test]
    fn test_validate_submission_rejects_bad_input() {
        let blank = SubmitApplication {
            name: " ".to_string(),
            ..form()
        };
        assert!(matches!(validate_submission(blank), Err(AppError::BadRequest(_))));

        let bad_email = SubmitApplication {
            email: "not-an-email".to_string(),
            ..form()
        };
        assert!(matches!(validate_submission(bad_email), Err(AppError::BadRequest(_))));

        let bad_resume = SubmitApplication {
            resume_url: Some("javascript:alert(1)".to_string()),
            ..form()
        };
        assert!(matches!(validate_submission(bad_resume), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_submission_form_uses_type_field() {
        let form: SubmitApplication = serde_json::from_str(
            r#"{"name":"Ana","email":"ana@uni.edu","type":"affiliate"}"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(form.kind, ApplicationType::Affiliate);
        assert!(form.message.is_none());
    }

    #[tokio::test]
    async fn test_missing_agreement_file_is_skipped() {
        let attachment = load_agreement(Path::new("/nonexistent/flexhub-agreement.pdf")).await;
        assert!(attachment.is_none());
    }
}
