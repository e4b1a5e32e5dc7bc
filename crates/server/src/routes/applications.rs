//! Application intake and review handlers.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use flexhub_core::{ApplicationId, ApplicationStatus, ApplicationType, DocumentSource};

use super::page;
use crate::db::ApplicationFilter;
use crate::error::AppError;
use crate::mailgun::MAX_ATTACHMENT_BYTES;
use crate::middleware::RequireTaskforce;
use crate::models::Application;
use crate::services::storage::content_type_for;
use crate::services::{ApplicationUpdate, DocumentUpload, SubmitApplication};
use crate::state::AppState;

/// Multipart field carrying the signed document.
const DOCUMENT_FIELD: &str = "file";

/// Largest document plus room for multipart framing.
const UPLOAD_BODY_LIMIT: usize = MAX_ATTACHMENT_BYTES + 64 * 1024;

/// Build the applications router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/applications",
            post(submit_application).get(list_applications),
        )
        .route("/api/applications/{id}", get(get_application))
        .route("/api/applications/{id}/send-documents", post(send_documents))
        .route(
            "/api/applications/{id}/signed-document",
            post(upload_signed_document).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/applications/{id}/approve", post(approve))
        .route("/api/applications/{id}/reject", post(reject))
}

#[derive(Debug, Deserialize)]
pub struct ApplicationsQuery {
    pub status: Option<ApplicationStatus>,
    #[serde(rename = "type")]
    pub kind: Option<ApplicationType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Body for approve and reject.
#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub note: Option<String>,
}

impl DecisionRequest {
    fn note(&self) -> Option<&str> {
        self.note.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

async fn submit_application(
    State(state): State<AppState>,
    Json(form): Json<SubmitApplication>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    let application = state.applications().submit(form).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn list_applications(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Query(query): Query<ApplicationsQuery>,
) -> Result<Json<Vec<Application>>, AppError> {
    let (limit, offset) = page(query.limit, query.offset);
    let filter = ApplicationFilter {
        status: query.status,
        kind: query.kind,
        limit,
        offset,
    };
    Ok(Json(state.applications().list(&filter).await?))
}

async fn get_application(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<ApplicationId>,
) -> Result<Json<Application>, AppError> {
    Ok(Json(state.applications().get(id).await?))
}

async fn send_documents(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<ApplicationId>,
) -> Result<Json<ApplicationUpdate>, AppError> {
    Ok(Json(
        state
            .applications()
            .send_documents(id, actor.as_str())
            .await?,
    ))
}

/// Attach a signed document uploaded by staff.
///
/// Expects `multipart/form-data` with the document in a `file` field.
async fn upload_signed_document(
    RequireTaskforce(_actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<ApplicationId>,
    multipart: Multipart,
) -> Result<Json<ApplicationUpdate>, AppError> {
    let upload = read_document(multipart).await?;
    Ok(Json(
        state
            .applications()
            .attach_signed_document(id, upload, DocumentSource::Upload)
            .await?,
    ))
}

async fn read_document(mut multipart: Multipart) -> Result<DocumentUpload, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(DOCUMENT_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("document filename is required".to_string()))?;
        let content_type = field
            .content_type()
            .map_or_else(|| content_type_for(&filename).to_string(), str::to_string);
        let content = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("could not read document: {e}")))?;

        if content.is_empty() {
            return Err(AppError::BadRequest("document is empty".to_string()));
        }

        return Ok(DocumentUpload {
            filename,
            content_type,
            content: content.to_vec(),
        });
    }

    Err(AppError::BadRequest(format!(
        "multipart field '{DOCUMENT_FIELD}' is required"
    )))
}

async fn approve(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<ApplicationId>,
    body: Option<Json<DecisionRequest>>,
) -> Result<Json<ApplicationUpdate>, AppError> {
    let Json(body) = body.unwrap_or_default();
    Ok(Json(
        state
            .applications()
            .approve(id, actor.as_str(), body.note())
            .await?,
    ))
}

async fn reject(
    RequireTaskforce(actor): RequireTaskforce,
    State(state): State<AppState>,
    Path(id): Path<ApplicationId>,
    body: Option<Json<DecisionRequest>>,
) -> Result<Json<ApplicationUpdate>, AppError> {
    let Json(body) = body.unwrap_or_default();
    Ok(Json(
        state
            .applications()
            .reject(id, actor.as_str(), body.note())
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_note_trimmed() {
        let body: DecisionRequest = serde_json::from_str(r#"{"note": "  "}"#).unwrap();
        assert_eq!(body.note(), None);

        let body: DecisionRequest =
            serde_json::from_str(r#"{"note": " strong references "}"#).unwrap();
        assert_eq!(body.note(), Some("strong references"));
    }

    #[test]
    fn test_query_parses_type() {
        let query: ApplicationsQuery =
            parse_query("status=awaiting&type=coach&limit=5");
        assert_eq!(query.status, Some(ApplicationStatus::Awaiting));
        assert_eq!(query.kind, Some(ApplicationType::Coach));
        assert_eq!(query.limit, Some(5));
    }

    fn parse_query(q: &str) -> ApplicationsQuery {
        let uri: axum::http::Uri = format!("/api/applications?{q}").parse().unwrap();
        Query::<ApplicationsQuery>::try_from_uri(&uri).unwrap().0
    }
}
