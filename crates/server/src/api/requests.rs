//! Travel requests and their quotations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use tourdesk_core::audit::Activity;
use tourdesk_core::domain::invoice::Invoice;
use tourdesk_core::domain::quotation::{CostBreakupItem, QuotationView};
use tourdesk_core::domain::request::RequestView;
use tourdesk_core::domain::{QuotationId, RequestId};
use tourdesk_core::services::{
    AcceptanceOutcome, NewRequest, NoteInput, QuotationDraft, RequestQuery, RequestUpdate,
};

use super::{created, document_response, ApiError, ApiResult, AppState, CurrentActor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/requests", get(list_requests).post(create_request))
        .route("/api/requests/open", get(open_requests))
        .route("/api/requests/delegated", get(delegated_requests))
        .route("/api/requests/{id}", get(get_request).put(update_request))
        .route("/api/requests/{id}/submit", post(submit_request))
        .route("/api/requests/{id}/assign", post(assign_to_me))
        .route("/api/requests/{id}/validate", post(validate_request))
        .route("/api/requests/{id}/cancel", post(cancel_request))
        .route("/api/requests/{id}/withdraw", post(withdraw_request))
        .route("/api/requests/{id}/reopen", post(reopen_request))
        .route("/api/requests/{id}/notes", post(add_note))
        .route("/api/requests/{id}/timeline", get(timeline))
        .route("/api/requests/{id}/invoice", get(invoice_for_request))
        .route("/api/requests/{id}/quotations", get(list_quotations).post(create_quotation))
        .route("/api/quotations/awaiting-invoice", get(awaiting_invoice))
        .route("/api/quotations/{id}", get(get_quotation).put(update_quotation))
        .route("/api/quotations/{id}/publish", post(publish_quotation))
        .route("/api/quotations/{id}/accept", post(accept_quotation))
        .route("/api/quotations/{id}/decline", post(decline_quotation))
        .route("/api/quotations/{id}/cost-breakup", get(cost_breakup))
        .route("/api/quotations/{id}/proforma", get(proforma))
        .route("/api/quotations/{id}/invoice", post(invoice_quotation))
}

/// Optional free-text reason on cancel, withdraw and decline.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishBody {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceOptions {
    pub tcs_percent: Option<Decimal>,
}

async fn list_requests(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<RequestQuery>,
) -> ApiResult<Vec<RequestView>> {
    Ok(Json(state.backoffice.list_requests(&actor, query).await?))
}

async fn create_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<NewRequest>,
) -> Result<(StatusCode, Json<RequestView>), ApiError> {
    Ok(created(state.backoffice.create_request(&actor, body).await?))
}

async fn open_requests(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<RequestView>> {
    Ok(Json(state.backoffice.open_requests(&actor).await?))
}

async fn delegated_requests(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<RequestView>> {
    Ok(Json(state.backoffice.delegated_requests(&actor).await?))
}

async fn get_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestView> {
    Ok(Json(state.backoffice.get_request(&actor, &id).await?))
}

async fn update_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
    Json(body): Json<RequestUpdate>,
) -> ApiResult<RequestView> {
    Ok(Json(state.backoffice.update_request(&actor, &id, body).await?))
}

async fn submit_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestView> {
    Ok(Json(state.backoffice.submit_request(&actor, &id).await?))
}

async fn assign_to_me(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestView> {
    Ok(Json(state.backoffice.assign_to_me(&actor, &id).await?))
}

async fn validate_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestView> {
    Ok(Json(state.backoffice.validate_request(&actor, &id).await?))
}

async fn cancel_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<RequestView> {
    let reason = body.and_then(|Json(body)| body.reason);
    Ok(Json(state.backoffice.cancel_request(&actor, &id, reason).await?))
}

async fn withdraw_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<RequestView> {
    let reason = body.and_then(|Json(body)| body.reason);
    Ok(Json(state.backoffice.withdraw_request(&actor, &id, reason).await?))
}

async fn reopen_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestView> {
    Ok(Json(state.backoffice.reopen_request(&actor, &id).await?))
}

async fn add_note(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
    Json(body): Json<NoteInput>,
) -> Result<(StatusCode, Json<Activity>), ApiError> {
    Ok(created(state.backoffice.add_note(&actor, &id, body).await?))
}

async fn timeline(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<Vec<Activity>> {
    Ok(Json(state.backoffice.request_timeline(&actor, &id).await?))
}

async fn invoice_for_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<Invoice> {
    Ok(Json(state.backoffice.invoice_for_request(&actor, &id).await?))
}

async fn list_quotations(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
) -> ApiResult<Vec<QuotationView>> {
    Ok(Json(state.backoffice.list_quotations(&actor, &id).await?))
}

async fn create_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<RequestId>,
    Json(body): Json<QuotationDraft>,
) -> Result<(StatusCode, Json<QuotationView>), ApiError> {
    Ok(created(state.backoffice.create_quotation(&actor, &id, body).await?))
}

async fn awaiting_invoice(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<QuotationView>> {
    Ok(Json(state.backoffice.accepted_without_invoice(&actor).await?))
}

async fn get_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
) -> ApiResult<QuotationView> {
    Ok(Json(state.backoffice.get_quotation(&actor, &id).await?))
}

async fn update_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
    Json(body): Json<QuotationDraft>,
) -> ApiResult<QuotationView> {
    Ok(Json(state.backoffice.update_quotation(&actor, &id, body).await?))
}

async fn publish_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
    Json(body): Json<PublishBody>,
) -> ApiResult<QuotationView> {
    Ok(Json(state.backoffice.publish_quotation(&actor, &id, body.expires_at).await?))
}

async fn accept_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
) -> ApiResult<AcceptanceOutcome> {
    Ok(Json(state.backoffice.accept_quotation(&actor, &id).await?))
}

async fn decline_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<QuotationView> {
    let reason = body.and_then(|Json(body)| body.reason);
    Ok(Json(state.backoffice.decline_quotation(&actor, &id, reason).await?))
}

async fn cost_breakup(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
) -> ApiResult<Vec<CostBreakupItem>> {
    Ok(Json(state.backoffice.cost_breakup(&actor, &id).await?))
}

async fn proforma(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
) -> Result<Response, ApiError> {
    let document = state.backoffice.render_proforma(&actor, &id, state.renderer.as_ref()).await?;
    Ok(document_response(document))
}

async fn invoice_quotation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<QuotationId>,
    body: Option<Json<InvoiceOptions>>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let options = body.map(|Json(body)| body).unwrap_or_default();
    let invoice =
        state.backoffice.create_invoice_from_quotation(&actor, &id, options.tcs_percent).await?;
    Ok(created(invoice))
}
