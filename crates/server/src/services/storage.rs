//! Signed-document storage in Supabase Storage.
//!
//! Objects are uploaded with the service role key to
//! `POST {url}/storage/v1/object/{bucket}/{path}` and linked through the
//! public object URL.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{info, instrument};

use flexhub_core::ApplicationId;

use crate::config::StorageConfig;

/// Errors that can occur when storing files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage API rejected the upload.
    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Where an uploaded object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path inside the bucket.
    pub path: String,
    /// Public URL of the object.
    pub url: String,
}

/// Supabase Storage client.
#[derive(Clone)]
pub struct StorageService {
    client: reqwest::Client,
    base_url: String,
    service_role_key: SecretString,
    bucket: String,
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("base_url", &self.base_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl StorageService {
    /// Create a new storage client.
    #[must_use]
    pub fn new(config: &StorageConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.url.clone(),
            service_role_key: config.service_role_key.clone(),
            bucket: config.bucket.clone(),
        }
    }

    /// Upload a signed document for an application.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the upload fails.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn upload_signed_document(
        &self,
        application_id: ApplicationId,
        filename: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        let path = signed_document_path(application_id, filename, Utc::now());
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(&path)
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.service_role_key.expose_secret())
            .header("apikey", self.service_role_key.expose_secret())
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(content)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        info!(path = %path, "Signed document uploaded");

        Ok(StoredObject {
            url: self.public_url(&path),
            path,
        })
    }

    /// Public URL for an object path.
    #[must_use]
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        )
    }
}

/// Object path for a signed document: `applications/{id}/{timestamp}-{file}`.
#[must_use]
pub fn signed_document_path(
    application_id: ApplicationId,
    filename: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "applications/{application_id}/{}-{}",
        at.format("%Y%m%dT%H%M%S"),
        sanitize_filename(filename)
    )
}

/// Keep letters, digits, `.`, `-` and `_`; everything else becomes `_`.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');

    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Guess a content type from a filename extension.
#[must_use]
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
