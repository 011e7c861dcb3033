use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde::Deserialize;
use tracing::info;

use tourdesk_core::domain::user::UserProfile;
use tourdesk_core::services::{LoginResponse, RegisterCustomer};

use super::{created, ApiError, ApiResult, AppState, CurrentActor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/password", post(change_password))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterCustomer>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let profile = state.backoffice.register_customer(body).await?;
    Ok(created(profile))
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let response = state.backoffice.login(&body.email, &body.password).await?;
    info!(
        event_name = "api.auth.login",
        user_id = %response.user.id,
        role = %response.user.role,
        "user signed in"
    );
    Ok(Json(response))
}

async fn me(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<UserProfile> {
    Ok(Json(state.backoffice.me(&actor).await?))
}

async fn change_password(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<PasswordChange>,
) -> Result<StatusCode, ApiError> {
    state.backoffice.change_password(&actor, &body.current_password, &body.new_password).await?;
    Ok(StatusCode::NO_CONTENT)
}
