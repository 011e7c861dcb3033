use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::{ActivityAction, Notification, Outbox};
use crate::config::RepublishPolicy;
use crate::documents::{DocumentPayload, DocumentRenderer, ProformaDocument, RenderedDocument};
use crate::domain::invoice::Invoice;
use crate::domain::payment::{Payment, PaymentKind, PaymentMethod, PaymentStatus, RefundReview};
use crate::domain::quotation::{
    CostBreakupItem, Quotation, QuotationData, QuotationStatus, QuotationView,
};
use crate::domain::request::{RequestStatus, TravelRequest};
use crate::domain::user::Role;
use crate::domain::{PaymentId, QuotationId, RequestId, UserId};
use crate::errors::{ApplicationError, DomainError, ValidationFailure};
use crate::flows::{FlowAction, FlowContext, FlowEvent};
use crate::identity::{Actor, Capability};
use crate::invoicing::derive_invoice;
use crate::services::{Backoffice, Tx};

#[derive(Clone, Debug, Deserialize)]
pub struct QuotationDraft {
    pub data: QuotationData,
    #[serde(default)]
    pub cost_breakup: Vec<CostBreakupItem>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AcceptanceOutcome {
    pub quotation: QuotationView,
    pub invoice: Option<Invoice>,
    pub advance_payment: Option<Payment>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySweep {
    pub expired_quotations: usize,
    pub expired_requests: usize,
}

impl Backoffice {
    fn check_draft(&self, draft: &QuotationDraft) -> Result<(), ValidationFailure> {
        if draft.data.trip_title.trim().is_empty() {
            return Err(ValidationFailure::field("trip_title", "must not be empty"));
        }
        draft.data.pricing.validate(self.settings.amount_tolerance)?;
        for item in &draft.cost_breakup {
            item.validate(self.settings.amount_tolerance)?;
        }
        Ok(())
    }

    pub async fn create_quotation(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        draft: QuotationDraft,
    ) -> Result<QuotationView, ApplicationError> {
        actor.require(Capability::AuthorQuotation)?;
        self.check_draft(&draft)?;

        let mut tx = self.begin().await?;
        let mut request =
            self.workable_request(&mut tx, actor, request_id, "author quotations").await?;
        let existing = tx.quotations_for_request(&request.id).await?;

        self.advance_request(&mut tx, &mut request, FlowEvent::QuotationCreated, &FlowContext::default())
            .await?;

        let now = self.now();
        let quotation = Quotation {
            id: QuotationId::generate(),
            request_id: request.id.clone(),
            version: next_version(&existing),
            status: QuotationStatus::Draft,
            expires_at: None,
            published_at: None,
            accepted_at: None,
            data: draft.data,
            cost_breakup: draft.cost_breakup,
            created_by: actor.user_id.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.put_quotation(&quotation).await?;
        self.record(
            &mut tx,
            &request.id,
            actor,
            ActivityAction::QuotationCreated,
            Some(format!("version {}", quotation.version)),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            event_name = "quotation.created",
            quotation_id = %quotation.id,
            request_id = %request.id,
            version = quotation.version,
            total = %quotation.data.pricing.total,
            "quotation drafted"
        );
        Ok(quotation.project(actor.can_view_cost_breakup()))
    }

    pub async fn update_quotation(
        &self,
        actor: &Actor,
        id: &QuotationId,
        draft: QuotationDraft,
    ) -> Result<QuotationView, ApplicationError> {
        actor.require(Capability::AuthorQuotation)?;
        self.check_draft(&draft)?;

        let mut tx = self.begin().await?;
        let mut quotation = self.load_quotation(&mut tx, id).await?;
        self.workable_request(&mut tx, actor, &quotation.request_id, "edit quotations").await?;
        if !quotation.status.is_live() {
            return Err(DomainError::Conflict(format!(
                "quotation {} is {} and can no longer be edited",
                quotation.id, quotation.status
            ))
            .into());
        }

        quotation.data = draft.data;
        quotation.cost_breakup = draft.cost_breakup;
        quotation.updated_at = self.now();
        tx.put_quotation(&quotation).await?;
        self.record(&mut tx, &quotation.request_id, actor, ActivityAction::QuotationUpdated, None)
            .await?;
        tx.commit().await?;
        Ok(quotation.project(actor.can_view_cost_breakup()))
    }

    /// DRAFT→SENT, or a republish of a SENT quotation with a new expiry.
    pub async fn publish_quotation(
        &self,
        actor: &Actor,
        id: &QuotationId,
        expires_at: DateTime<Utc>,
    ) -> Result<QuotationView, ApplicationError> {
        actor.require(Capability::PublishQuotation)?;
        let now = self.now();
        if expires_at <= now {
            return Err(ValidationFailure::field("expires_at", "must be in the future").into());
        }

        let mut tx = self.begin().await?;
        let mut quotation = self.load_quotation(&mut tx, id).await?;
        let request =
            self.workable_request(&mut tx, actor, &quotation.request_id, "publish quotations").await?;
        request.ensure_open()?;

        let republish = quotation.status == QuotationStatus::Sent;
        quotation.transition_to(QuotationStatus::Sent, now)?;
        quotation.expires_at = Some(expires_at);
        quotation.published_at = Some(now);
        if republish && self.settings.republish_policy == RepublishPolicy::BumpVersion {
            let siblings = tx.quotations_for_request(&quotation.request_id).await?;
            quotation.version = next_version(&siblings);
        }
        tx.put_quotation(&quotation).await?;

        let action = if republish {
            ActivityAction::QuotationRepublished
        } else {
            ActivityAction::QuotationPublished
        };
        self.record(
            &mut tx,
            &request.id,
            actor,
            action,
            Some(format!("version {} expires {}", quotation.version, expires_at.to_rfc3339())),
        )
        .await?;

        let mut outbox = Outbox::default();
        if let Some(customer_id) = &request.client.customer_id {
            outbox.push(
                Notification::new(
                    customer_id.clone(),
                    "Your quotation is ready",
                    format!(
                        "A quotation for \"{}\" is available until {}.",
                        request.title,
                        expires_at.format("%Y-%m-%d")
                    ),
                    now,
                )
                .with_link(format!("/quotations/{}", quotation.id)),
            );
        }
        self.finish(tx, outbox).await?;

        let event_name = if republish { "quotation.republished" } else { "quotation.published" };
        tracing::info!(
            event_name,
            quotation_id = %quotation.id,
            version = quotation.version,
            expires_at = %expires_at,
            "quotation published"
        );
        Ok(quotation.project(actor.can_view_cost_breakup()))
    }

    /// Customer acceptance: quotation, competitors, request, invoice and advance placeholder
    /// change together or not at all.
    pub async fn accept_quotation(
        &self,
        actor: &Actor,
        id: &QuotationId,
    ) -> Result<AcceptanceOutcome, ApplicationError> {
        actor.require(Capability::RespondToQuotation)?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut quotation = self.load_quotation(&mut tx, id).await?;
        let (mut request, _) = self.visible_request(&mut tx, actor, &quotation.request_id).await?;

        let siblings = tx.quotations_for_request(&request.id).await?;
        if quotation.status == QuotationStatus::Accepted
            || siblings.iter().any(|other| other.status == QuotationStatus::Accepted)
        {
            return Err(DomainError::AlreadyAccepted(quotation.id.to_string()).into());
        }
        if quotation.is_lapsed(now) {
            return Err(DomainError::QuotationLapsed {
                quotation_id: quotation.id.to_string(),
                expired_at: quotation.expires_at.unwrap_or(now),
            }
            .into());
        }

        quotation.transition_to(QuotationStatus::Accepted, now)?;
        quotation.accepted_at = Some(now);
        tx.put_quotation(&quotation).await?;

        let outcome = self
            .advance_request(&mut tx, &mut request, FlowEvent::QuotationAccepted, &FlowContext::default())
            .await?;
        if outcome.actions.contains(&FlowAction::RejectLiveQuotations) {
            for mut other in siblings.into_iter().filter(|other| other.id != quotation.id) {
                if other.status.is_live() {
                    other.transition_to(QuotationStatus::Rejected, now)?;
                    tx.put_quotation(&other).await?;
                }
            }
        }
        self.record(
            &mut tx,
            &request.id,
            actor,
            ActivityAction::QuotationAccepted,
            Some(format!("version {}", quotation.version)),
        )
        .await?;

        let (invoice, advance_payment) = if outcome.actions.contains(&FlowAction::IssueInvoice)
            && self.settings.invoice_on_accept
        {
            let (invoice, advance) = self
                .issue_invoice(&mut tx, actor, &quotation, &request, self.settings.default_tcs_percent)
                .await?;
            (Some(invoice), advance)
        } else {
            (None, None)
        };

        let mut outbox = Outbox::default();
        self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
        if invoice.is_some() {
            let accountants = tx.users(Some(Role::Accountant)).await?;
            let recipients: Vec<UserId> =
                accountants.into_iter().filter(|user| user.active).map(|user| user.id).collect();
            outbox.notify_all(&recipients, &actor.user_id, |recipient| {
                Notification::new(
                    recipient.clone(),
                    "Invoice raised",
                    format!("\"{}\" was accepted and invoiced.", request.title),
                    now,
                )
                .with_link(format!("/requests/{}", request.id))
            });
        }
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "quotation.accepted",
            quotation_id = %quotation.id,
            request_id = %request.id,
            invoiced = invoice.is_some(),
            "quotation accepted"
        );
        Ok(AcceptanceOutcome {
            quotation: quotation.project(false),
            invoice,
            advance_payment,
        })
    }

    pub async fn decline_quotation(
        &self,
        actor: &Actor,
        id: &QuotationId,
        reason: Option<String>,
    ) -> Result<QuotationView, ApplicationError> {
        actor.require(Capability::RespondToQuotation)?;
        let mut tx = self.begin().await?;
        let mut quotation = self.load_quotation(&mut tx, id).await?;
        let (request, _) = self.visible_request(&mut tx, actor, &quotation.request_id).await?;
        if quotation.status != QuotationStatus::Sent {
            return Err(DomainError::InvalidTransition {
                entity: "quotation",
                from: quotation.status.to_string(),
                to: QuotationStatus::Rejected.to_string(),
            }
            .into());
        }

        quotation.transition_to(QuotationStatus::Rejected, self.now())?;
        tx.put_quotation(&quotation).await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::QuotationDeclined, reason.clone())
            .await?;

        let mut outbox = Outbox::default();
        let recipients: Vec<UserId> = [&request.assigned_sales_id, &request.assigned_ops_id]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        outbox.notify_all(&recipients, &actor.user_id, |recipient| {
            Notification::new(
                recipient.clone(),
                "Quotation declined",
                format!(
                    "The customer declined version {} for \"{}\"{}",
                    quotation.version,
                    request.title,
                    reason.as_deref().map(|reason| format!(": {reason}")).unwrap_or_default()
                ),
                self.now(),
            )
            .with_link(format!("/requests/{}", request.id))
        });
        self.finish(tx, outbox).await?;
        Ok(quotation.project(false))
    }

    pub async fn get_quotation(
        &self,
        actor: &Actor,
        id: &QuotationId,
    ) -> Result<QuotationView, ApplicationError> {
        let mut tx = self.begin().await?;
        let quotation = self.load_quotation(&mut tx, id).await?;
        self.visible_request(&mut tx, actor, &quotation.request_id).await?;
        if actor.role == Role::Customer && quotation.status == QuotationStatus::Draft {
            return Err(ApplicationError::not_found("quotation", id));
        }
        Ok(quotation.project(actor.can_view_cost_breakup()))
    }

    /// Customers only see what has been published to them.
    pub async fn list_quotations(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Vec<QuotationView>, ApplicationError> {
        let mut tx = self.begin().await?;
        let (request, _) = self.visible_request(&mut tx, actor, request_id).await?;
        let mut quotations = tx.quotations_for_request(&request.id).await?;
        quotations.sort_by_key(|quotation| (quotation.version, quotation.created_at));
        Ok(quotations
            .iter()
            .filter(|quotation| {
                actor.role != Role::Customer || quotation.status != QuotationStatus::Draft
            })
            .map(|quotation| quotation.project(actor.can_view_cost_breakup()))
            .collect())
    }

    pub async fn cost_breakup(
        &self,
        actor: &Actor,
        id: &QuotationId,
    ) -> Result<Vec<CostBreakupItem>, ApplicationError> {
        if !actor.can_view_cost_breakup() {
            return Err(actor.forbidden("view quotation cost breakups"));
        }
        let mut tx = self.begin().await?;
        let quotation = self.load_quotation(&mut tx, id).await?;
        self.visible_request(&mut tx, actor, &quotation.request_id).await?;
        Ok(quotation.cost_breakup)
    }

    /// SENT quotations past expiry become EXPIRED; a QUOTED request left without a live
    /// quotation expires with them.
    pub async fn expire_quotations(&self, actor: &Actor) -> Result<ExpirySweep, ApplicationError> {
        actor.require(Capability::RunSweeps)?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut sweep = ExpirySweep::default();
        let mut touched_requests: Vec<RequestId> = Vec::new();

        for mut quotation in tx.quotations_by_status(QuotationStatus::Sent).await? {
            if !quotation.is_lapsed(now) {
                continue;
            }
            quotation.transition_to(QuotationStatus::Expired, now)?;
            tx.put_quotation(&quotation).await?;
            self.record(&mut tx, &quotation.request_id, actor, ActivityAction::QuotationExpired, None)
                .await?;
            sweep.expired_quotations += 1;
            if !touched_requests.contains(&quotation.request_id) {
                touched_requests.push(quotation.request_id.clone());
            }
        }

        let mut outbox = Outbox::default();
        for request_id in touched_requests {
            let mut request = self.load_request(&mut tx, &request_id).await?;
            if request.status != RequestStatus::Quoted {
                continue;
            }
            let live = tx
                .quotations_for_request(&request_id)
                .await?
                .iter()
                .filter(|quotation| quotation.status.is_live())
                .count();
            let context = FlowContext { live_quotations: live };
            match self.flow.apply(request.status, FlowEvent::QuotationLapsed, &context) {
                Ok(_) => {
                    let outcome = self
                        .advance_request(&mut tx, &mut request, FlowEvent::QuotationLapsed, &context)
                        .await?;
                    self.record(&mut tx, &request.id, actor, ActivityAction::RequestExpired, None)
                        .await?;
                    self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
                    sweep.expired_requests += 1;
                }
                Err(error) => {
                    tracing::debug!(
                        event_name = "quotation.expiry.request_kept",
                        request_id = %request.id,
                        reason = %error,
                        "request stays quoted"
                    );
                }
            }
        }
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "quotation.expiry.swept",
            expired_quotations = sweep.expired_quotations,
            expired_requests = sweep.expired_requests,
            "quotation expiry sweep finished"
        );
        Ok(sweep)
    }

    /// Accepted quotations still waiting for operations to raise the invoice.
    pub async fn accepted_without_invoice(
        &self,
        actor: &Actor,
    ) -> Result<Vec<QuotationView>, ApplicationError> {
        actor.require(Capability::ManageInvoices)?;
        let mut tx = self.begin().await?;
        let mut pending = Vec::new();
        for quotation in tx.quotations_by_status(QuotationStatus::Accepted).await? {
            if tx.invoice_for_quotation(&quotation.id).await?.is_none() {
                pending.push(quotation.project(actor.can_view_cost_breakup()));
            }
        }
        Ok(pending)
    }

    pub async fn render_proforma(
        &self,
        actor: &Actor,
        id: &QuotationId,
        renderer: &dyn DocumentRenderer,
    ) -> Result<RenderedDocument, ApplicationError> {
        let mut tx = self.begin().await?;
        let quotation = self.load_quotation(&mut tx, id).await?;
        let (request, delegated) = self.visible_request(&mut tx, actor, &quotation.request_id).await?;
        if quotation.status == QuotationStatus::Draft && actor.role == Role::Customer {
            return Err(ApplicationError::not_found("quotation", id));
        }
        drop(tx);

        let payload = DocumentPayload::Proforma(ProformaDocument {
            quotation: quotation.project(false),
            request: request.project(Role::Customer, delegated),
        });
        renderer.render(&payload).await.map_err(|error| {
            tracing::warn!(
                event_name = "document.render_failed",
                quotation_id = %id,
                error = %error,
                "proforma rendering failed"
            );
            ApplicationError::from(error)
        })
    }

    pub(super) async fn load_quotation(
        &self,
        tx: &mut Tx,
        id: &QuotationId,
    ) -> Result<Quotation, ApplicationError> {
        tx.quotation(id).await?.ok_or_else(|| ApplicationError::not_found("quotation", id))
    }

    /// Creates the invoice and, when a deposit is due, the advance placeholder payment.
    pub(super) async fn issue_invoice(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        quotation: &Quotation,
        request: &TravelRequest,
        tcs_percent: Decimal,
    ) -> Result<(Invoice, Option<Payment>), ApplicationError> {
        if let Some(existing) = tx.invoice_for_quotation(&quotation.id).await? {
            return Err(DomainError::InvoiceAlreadyExists {
                quotation_id: quotation.id.to_string(),
                invoice_number: existing.invoice_number,
            }
            .into());
        }

        let now = self.now();
        let invoice =
            derive_invoice(quotation, request, tcs_percent, self.settings.invoice_due_days, now)?;
        tx.put_invoice(&invoice).await?;
        self.record(
            tx,
            &request.id,
            actor,
            ActivityAction::InvoiceCreated,
            Some(invoice.invoice_number.clone()),
        )
        .await?;

        let advance = if invoice.advance_amount > Decimal::ZERO {
            let placeholder = Payment {
                id: PaymentId::generate(),
                invoice_id: invoice.id.clone(),
                amount: invoice.advance_amount,
                method: PaymentMethod::Pending,
                kind: PaymentKind::Advance,
                status: PaymentStatus::Pending,
                received_at: None,
                verified_at: None,
                accountant_notes: None,
                operations_notes: None,
                proof_reference: None,
                submitted_by: request.client.customer_id.clone().unwrap_or_else(|| actor.user_id.clone()),
                unallocated_amount: Decimal::ZERO,
                refund_review: RefundReview::NotRequired,
                created_at: now,
                updated_at: now,
            };
            tx.put_payment(&placeholder).await?;
            Some(placeholder)
        } else {
            None
        };

        tracing::info!(
            event_name = "invoice.created",
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total_amount,
            advance = %invoice.advance_amount,
            "invoice raised"
        );
        Ok((invoice, advance))
    }
}

fn next_version(existing: &[Quotation]) -> u32 {
    let count = u32::try_from(existing.len()).unwrap_or(u32::MAX - 1);
    let highest = existing.iter().map(|quotation| quotation.version).max().unwrap_or(0);
    count.max(highest) + 1
}
