//! Staff accounts, leave cover and notification inboxes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use tourdesk_core::audit::Notification;
use tourdesk_core::domain::leave::Leave;
use tourdesk_core::domain::user::{Role, UserProfile};
use tourdesk_core::domain::{LeaveId, NotificationId, UserId};
use tourdesk_core::services::{NewLeave, NewUser, UserUpdate};

use super::{created, ApiError, ApiResult, AppState, Count, CurrentActor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/salespeople", get(salespeople))
        .route("/api/users/{id}", patch(update_user))
        .route("/api/users/{id}/password", post(reset_password))
        .route("/api/users/{id}/cost-breakup", put(set_cost_breakup_access))
        .route("/api/leaves", get(my_leaves).post(create_leave))
        .route("/api/leaves/covering", get(covering_leaves))
        .route("/api/leaves/all", get(all_leaves))
        .route("/api/leaves/backups", get(available_backups))
        .route("/api/leaves/{id}/cancel", post(cancel_leave))
        .route("/api/notifications", get(notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/{id}/read", post(mark_read))
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleFilter {
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordReset {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CostBreakupAccess {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct BackupWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

async fn list_users(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(filter): Query<RoleFilter>,
) -> ApiResult<Vec<UserProfile>> {
    Ok(Json(state.backoffice.list_users(&actor, filter.role).await?))
}

async fn create_user(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<NewUser>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    Ok(created(state.backoffice.create_user(&actor, body).await?))
}

async fn salespeople(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<UserProfile>> {
    Ok(Json(state.backoffice.salespeople(&actor).await?))
}

async fn update_user(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<UserId>,
    Json(body): Json<UserUpdate>,
) -> ApiResult<UserProfile> {
    Ok(Json(state.backoffice.update_user(&actor, &id, body).await?))
}

async fn reset_password(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<UserId>,
    Json(body): Json<PasswordReset>,
) -> Result<StatusCode, ApiError> {
    state.backoffice.reset_password(&actor, &id, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_cost_breakup_access(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<UserId>,
    Json(body): Json<CostBreakupAccess>,
) -> ApiResult<UserProfile> {
    Ok(Json(state.backoffice.set_cost_breakup_access(&actor, &id, body.enabled).await?))
}

async fn my_leaves(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<Vec<Leave>> {
    Ok(Json(state.backoffice.my_leaves(&actor).await?))
}

async fn create_leave(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<NewLeave>,
) -> Result<(StatusCode, Json<Leave>), ApiError> {
    Ok(created(state.backoffice.create_leave(&actor, body).await?))
}

async fn covering_leaves(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Leave>> {
    Ok(Json(state.backoffice.covering_leaves(&actor).await?))
}

async fn all_leaves(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<Vec<Leave>> {
    Ok(Json(state.backoffice.all_leaves(&actor).await?))
}

async fn available_backups(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(window): Query<BackupWindow>,
) -> ApiResult<Vec<UserProfile>> {
    let backups =
        state.backoffice.available_backups(&actor, window.start_date, window.end_date).await?;
    Ok(Json(backups))
}

async fn cancel_leave(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<LeaveId>,
) -> ApiResult<Leave> {
    Ok(Json(state.backoffice.cancel_leave(&actor, &id).await?))
}

async fn notifications(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Notification>> {
    Ok(Json(state.backoffice.notifications(&actor).await?))
}

async fn unread_count(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<Count> {
    Ok(Json(Count { count: state.backoffice.unread_notifications(&actor).await? }))
}

async fn mark_all_read(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<Count> {
    Ok(Json(Count { count: state.backoffice.mark_all_notifications_read(&actor).await? }))
}

async fn mark_read(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<NotificationId>,
) -> ApiResult<Notification> {
    Ok(Json(state.backoffice.mark_notification_read(&actor, &id).await?))
}
