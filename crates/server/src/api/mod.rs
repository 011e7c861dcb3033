//! JSON API over the back-office services.
//!
//! Every route under `/api` except registration and login expects
//! `Authorization: Bearer <token>`. Failures render as
//! `{"error": {"code", "message", "detail", "correlation_id"}}`.

mod auth;
mod finance;
mod people;
mod requests;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use tourdesk_core::documents::{BlobStore, DocumentRenderer, RenderedDocument};
use tourdesk_core::errors::{ApplicationError, AuthFailure, ErrorKind, InterfaceError};
use tourdesk_core::identity::Actor;
use tourdesk_core::{Backoffice, SweepReport};

#[derive(Clone)]
pub struct AppState {
    pub backoffice: Backoffice,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub blobs: Arc<dyn BlobStore>,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(requests::routes())
        .merge(finance::routes(state.max_upload_bytes))
        .merge(people::routes())
        .route("/api/dashboard", get(dashboard))
        .route("/api/sweeps", post(run_sweeps))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    inner: InterfaceError,
}

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        let kind = value.kind();
        let correlation_id = Uuid::new_v4().simple().to_string();
        match kind {
            ErrorKind::Internal | ErrorKind::ExternalServiceFailure => error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error_code = kind.code(),
                error = %value,
                "request failed"
            ),
            _ => warn!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                error_code = kind.code(),
                error = %value,
                "request rejected"
            ),
        }
        Self { kind, inner: value.into_interface(correlation_id) }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'static str,
    message: &'static str,
    detail: &'a str,
    correlation_id: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.inner {
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: ErrorPayload {
                code: self.kind.code(),
                message: self.inner.user_message(),
                detail: self.inner.detail(),
                correlation_id: self.inner.correlation_id(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Count {
    pub count: usize,
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// The authenticated caller, resolved from the bearer credential.
pub struct CurrentActor(pub Actor);

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get(header::AUTHORIZATION) {
            None => None,
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| ApplicationError::Unauthenticated(AuthFailure::Malformed))?;
                let token = raw
                    .strip_prefix("Bearer ")
                    .ok_or(ApplicationError::Unauthenticated(AuthFailure::Malformed))?;
                Some(token.trim())
            }
        };
        let actor = state.backoffice.authenticate(token).await?;
        Ok(Self(actor))
    }
}

pub(crate) fn document_response(document: RenderedDocument) -> Response {
    let disposition = format!("inline; filename=\"{}\"", document.file_name);
    let mut response = (StatusCode::OK, document.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(document.content_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

pub(crate) fn created<T: Serialize>(value: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(value))
}

async fn dashboard(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<tourdesk_core::services::DashboardStats> {
    Ok(Json(state.backoffice.dashboard(&actor).await?))
}

async fn run_sweeps(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<SweepReport> {
    Ok(Json(state.backoffice.run_sweeps(&actor).await?))
}
