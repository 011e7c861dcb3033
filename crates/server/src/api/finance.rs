//! Invoices, installment schedules and payment verification.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use tourdesk_core::domain::invoice::Invoice;
use tourdesk_core::domain::payment::{Payment, PaymentAllocation, PaymentMethod};
use tourdesk_core::domain::{InvoiceId, PaymentId};
use tourdesk_core::invoicing::BreakupDraft;
use tourdesk_core::services::{
    InvoiceSchedule, OverdueBreakup, PaymentQuery, PaymentSubmission, SettlementReport,
};

use super::{created, document_response, ApiError, ApiResult, AppState, Count, CurrentActor};

pub(super) fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/invoices", get(list_invoices))
        .route("/api/invoices/overdue", get(overdue))
        .route("/api/invoices/overdue/count", get(overdue_count))
        .route("/api/invoices/{id}", get(get_invoice))
        .route("/api/invoices/{id}/schedule", get(schedule))
        .route("/api/invoices/{id}/breakups", post(create_breakups))
        .route("/api/invoices/{id}/allocations", get(allocations))
        .route("/api/invoices/{id}/document", get(invoice_document))
        .route("/api/invoices/{id}/payments", post(submit_payment))
        .route("/api/invoices/{id}/pay-remaining", post(pay_remaining))
        .route("/api/payments", get(list_payments))
        .route("/api/payments/refund-reviews", get(refund_reviews))
        .route("/api/payments/{id}", get(get_payment))
        .route(
            "/api/payments/{id}/proof",
            put(upload_proof).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/payments/{id}/confirm", post(confirm_payment))
        .route("/api/payments/{id}/verify", post(verify_payment))
        .route("/api/payments/{id}/reject", post(reject_payment))
        .route("/api/payments/{id}/resolve-refund", post(resolve_refund))
}

#[derive(Debug, Deserialize)]
pub struct BreakupPlan {
    pub breakups: Vec<BreakupDraft>,
}

#[derive(Debug, Deserialize)]
pub struct RemainingPayment {
    pub method: PaymentMethod,
    pub proof_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProofUpload {
    pub file_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewNotes {
    pub notes: Option<String>,
    pub reason: Option<String>,
}

impl ReviewNotes {
    fn text(self) -> Option<String> {
        self.notes.or(self.reason)
    }
}

fn review_notes(body: Option<Json<ReviewNotes>>) -> Option<String> {
    body.and_then(|Json(body)| body.text())
}

async fn list_invoices(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Invoice>> {
    Ok(Json(state.backoffice.list_invoices(&actor).await?))
}

async fn overdue(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<OverdueBreakup>> {
    Ok(Json(state.backoffice.overdue_breakups(&actor).await?))
}

async fn overdue_count(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<Count> {
    Ok(Json(Count { count: state.backoffice.overdue_count(&actor).await? }))
}

async fn get_invoice(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
) -> ApiResult<Invoice> {
    Ok(Json(state.backoffice.get_invoice(&actor, &id).await?))
}

async fn schedule(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
) -> ApiResult<InvoiceSchedule> {
    Ok(Json(state.backoffice.invoice_schedule(&actor, &id).await?))
}

async fn create_breakups(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
    Json(body): Json<BreakupPlan>,
) -> Result<(StatusCode, Json<InvoiceSchedule>), ApiError> {
    Ok(created(state.backoffice.create_payment_breakup(&actor, &id, body.breakups).await?))
}

async fn allocations(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
) -> ApiResult<Vec<PaymentAllocation>> {
    Ok(Json(state.backoffice.allocation_ledger(&actor, &id).await?))
}

async fn invoice_document(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
) -> Result<Response, ApiError> {
    let document = state.backoffice.render_invoice(&actor, &id, state.renderer.as_ref()).await?;
    Ok(document_response(document))
}

async fn submit_payment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
    Json(body): Json<PaymentSubmission>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    Ok(created(state.backoffice.submit_payment(&actor, &id, body).await?))
}

async fn pay_remaining(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<InvoiceId>,
    Json(body): Json<RemainingPayment>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let payment =
        state.backoffice.pay_remaining(&actor, &id, body.method, body.proof_reference).await?;
    Ok(created(payment))
}

async fn list_payments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<PaymentQuery>,
) -> ApiResult<Vec<Payment>> {
    Ok(Json(state.backoffice.list_payments(&actor, query).await?))
}

async fn refund_reviews(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Payment>> {
    Ok(Json(state.backoffice.refund_reviews(&actor).await?))
}

async fn get_payment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<PaymentId>,
) -> ApiResult<Payment> {
    Ok(Json(state.backoffice.get_payment(&actor, &id).await?))
}

async fn upload_proof(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<PaymentId>,
    Query(upload): Query<ProofUpload>,
    body: Bytes,
) -> ApiResult<Payment> {
    let payment = state
        .backoffice
        .attach_payment_proof(&actor, &id, &upload.file_name, &body, state.blobs.as_ref())
        .await?;
    Ok(Json(payment))
}

async fn confirm_payment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<PaymentId>,
    body: Option<Json<ReviewNotes>>,
) -> ApiResult<SettlementReport> {
    Ok(Json(state.backoffice.confirm_by_accountant(&actor, &id, review_notes(body)).await?))
}

async fn verify_payment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<PaymentId>,
    body: Option<Json<ReviewNotes>>,
) -> ApiResult<Payment> {
    Ok(Json(state.backoffice.verify_by_operations(&actor, &id, review_notes(body)).await?))
}

async fn reject_payment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<PaymentId>,
    body: Option<Json<ReviewNotes>>,
) -> ApiResult<SettlementReport> {
    Ok(Json(state.backoffice.reject_payment(&actor, &id, review_notes(body)).await?))
}

async fn resolve_refund(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<PaymentId>,
    body: Option<Json<ReviewNotes>>,
) -> ApiResult<Payment> {
    Ok(Json(state.backoffice.resolve_refund_review(&actor, &id, review_notes(body)).await?))
}
