use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::{ActivityAction, Notification, Outbox};
use crate::documents::BlobStore;
use crate::domain::invoice::{Invoice, InvoiceStatus, PaymentBreakup};
use crate::domain::payment::{
    Payment, PaymentAllocation, PaymentFilter, PaymentKind, PaymentMethod, PaymentStatus,
    RefundReview,
};
use crate::domain::request::RequestStatus;
use crate::domain::user::Role;
use crate::domain::{InvoiceId, PaymentId, UserId};
use crate::errors::{ApplicationError, DomainError, ValidationFailure};
use crate::flows::{FlowContext, FlowEvent};
use crate::identity::{Actor, Capability};
use crate::invoicing::implicit_breakup;
use crate::services::{Backoffice, Tx};
use crate::settlement::{allocate_fifo, outstanding, reverse_allocations};
use crate::store::LockScope;

#[derive(Clone, Debug, Deserialize)]
pub struct PaymentSubmission {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(default = "default_kind")]
    pub kind: PaymentKind,
    pub proof_reference: Option<String>,
}

fn default_kind() -> PaymentKind {
    PaymentKind::Installment
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PaymentQuery {
    pub invoice_id: Option<InvoiceId>,
    pub status: Option<PaymentStatus>,
    pub refund_review: Option<RefundReview>,
}

/// What a verification or rejection step did to the money.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub payment: Payment,
    pub allocations: Vec<PaymentAllocation>,
    pub unallocated: Decimal,
    pub invoice_status: InvoiceStatus,
}

impl Backoffice {
    /// Customer payment against their own invoice. An advance submission completes the
    /// placeholder created at acceptance when one is still open.
    pub async fn submit_payment(
        &self,
        actor: &Actor,
        invoice_id: &InvoiceId,
        submission: PaymentSubmission,
    ) -> Result<Payment, ApplicationError> {
        actor.require(Capability::SubmitPayment)?;
        if submission.amount <= Decimal::ZERO {
            return Err(ValidationFailure::InvalidAmount(submission.amount).into());
        }
        if !submission.method.is_attested() {
            return Err(ValidationFailure::field("method", "choose how the money was sent").into());
        }

        let mut tx = self.begin().await?;
        let invoice = self.payable_invoice(&mut tx, actor, invoice_id).await?;
        let now = self.now();

        let placeholder = if submission.kind == PaymentKind::Advance {
            tx.payments(&PaymentFilter {
                invoice_id: Some(invoice.id.clone()),
                statuses: vec![PaymentStatus::Pending],
                refund_review: None,
            })
            .await?
            .into_iter()
            .find(|payment| payment.kind == PaymentKind::Advance && !payment.method.is_attested())
        } else {
            None
        };

        let payment = match placeholder {
            Some(mut payment) => {
                payment.amount = submission.amount;
                payment.method = submission.method;
                payment.proof_reference = submission.proof_reference;
                payment.submitted_by = actor.user_id.clone();
                payment.updated_at = now;
                payment
            }
            None => Payment {
                id: PaymentId::generate(),
                invoice_id: invoice.id.clone(),
                amount: submission.amount,
                method: submission.method,
                kind: submission.kind,
                status: PaymentStatus::Pending,
                received_at: None,
                verified_at: None,
                accountant_notes: None,
                operations_notes: None,
                proof_reference: submission.proof_reference,
                submitted_by: actor.user_id.clone(),
                unallocated_amount: Decimal::ZERO,
                refund_review: RefundReview::NotRequired,
                created_at: now,
                updated_at: now,
            },
        };
        tx.put_payment(&payment).await?;
        self.record(
            &mut tx,
            &invoice.request_id,
            actor,
            ActivityAction::PaymentSubmitted,
            Some(format!("{} {} via {}", payment.amount, invoice.currency, payment.method)),
        )
        .await?;

        let mut outbox = Outbox::default();
        self.notify_role(&mut tx, &mut outbox, actor, Role::Accountant, |recipient| {
            Notification::new(
                recipient.clone(),
                "Payment awaiting confirmation",
                format!(
                    "{} {} received against {}.",
                    payment.amount, invoice.currency, invoice.invoice_number
                ),
                now,
            )
            .with_link(format!("/payments/{}", payment.id))
        })
        .await?;
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "payment.submitted",
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            amount = %payment.amount,
            kind = %payment.kind,
            "payment submitted"
        );
        Ok(payment)
    }

    /// Submits the outstanding balance, less submissions still awaiting confirmation, as a
    /// `full_payment`.
    pub async fn pay_remaining(
        &self,
        actor: &Actor,
        invoice_id: &InvoiceId,
        method: PaymentMethod,
        proof_reference: Option<String>,
    ) -> Result<Payment, ApplicationError> {
        let (outstanding_amount, in_flight) = {
            let mut tx = self.begin().await?;
            let invoice = self.payable_invoice(&mut tx, actor, invoice_id).await?;
            let breakups = tx.breakups(&invoice.id).await?;
            let outstanding_amount =
                if breakups.is_empty() { invoice.total_amount } else { outstanding(&breakups) };
            let awaiting = tx
                .payments(&PaymentFilter {
                    invoice_id: Some(invoice.id.clone()),
                    statuses: vec![PaymentStatus::Pending],
                    refund_review: None,
                })
                .await?;
            let in_flight: Decimal = awaiting
                .iter()
                .filter(|payment| payment.method.is_attested())
                .map(|payment| payment.amount)
                .sum();
            (outstanding_amount, in_flight)
        };
        if outstanding_amount <= Decimal::ZERO {
            return Err(DomainError::Conflict(format!("invoice {invoice_id} has nothing outstanding")).into());
        }
        // Submissions awaiting the accountant already claim part of the balance.
        let remaining = outstanding_amount - in_flight;
        if remaining <= Decimal::ZERO {
            return Err(DomainError::Conflict(format!(
                "invoice {invoice_id} is covered by {in_flight} awaiting confirmation"
            ))
            .into());
        }

        self.submit_payment(
            actor,
            invoice_id,
            PaymentSubmission {
                amount: remaining,
                method,
                kind: PaymentKind::FullPayment,
                proof_reference,
            },
        )
        .await
    }

    /// Stores an uploaded proof and records its reference on the payment.
    pub async fn attach_payment_proof(
        &self,
        actor: &Actor,
        id: &PaymentId,
        file_name: &str,
        bytes: &[u8],
        blobs: &dyn BlobStore,
    ) -> Result<Payment, ApplicationError> {
        {
            let mut tx = self.begin().await?;
            let payment = self.load_payment(&mut tx, id).await?;
            self.ensure_payment_visible(&mut tx, actor, &payment).await?;
            if payment.status != PaymentStatus::Pending {
                return Err(DomainError::Conflict(format!(
                    "payment {} is {} and its proof is locked",
                    payment.id, payment.status
                ))
                .into());
            }
        }

        let reference = blobs.put(&format!("{id}-{file_name}"), bytes).await?;

        let mut tx = self.begin().await?;
        let mut payment = self.load_payment(&mut tx, id).await?;
        payment.proof_reference = Some(reference);
        payment.updated_at = self.now();
        tx.put_payment(&payment).await?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Accountant confirmation. Allocates the amount FIFO across the installments while
    /// holding the invoice lock.
    pub async fn confirm_by_accountant(
        &self,
        actor: &Actor,
        id: &PaymentId,
        notes: Option<String>,
    ) -> Result<SettlementReport, ApplicationError> {
        actor.require(Capability::VerifyAsAccountant)?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let invoice_id = self.load_payment(&mut tx, id).await?.invoice_id;
        tx.lock(&LockScope::Invoice(invoice_id.clone())).await?;

        let mut payment = self.load_payment(&mut tx, id).await?;
        let mut invoice = self.load_invoice(&mut tx, &invoice_id).await?;
        if !payment.method.is_attested() {
            return Err(ValidationFailure::field(
                "method",
                "the customer has not submitted this payment yet",
            )
            .into());
        }
        if invoice.status.is_closed() {
            return Err(DomainError::Conflict(format!(
                "invoice {} is {}",
                invoice.invoice_number, invoice.status
            ))
            .into());
        }

        payment.transition_to(PaymentStatus::ReceivedByAccountant, now)?;
        payment.received_at = Some(now);
        payment.accountant_notes = notes;

        let breakups = self.breakups_for_settlement(&mut tx, &invoice).await?;
        let pass = allocate_fifo(&payment, &breakups, now)?;
        for breakup in &pass.touched {
            tx.put_breakup(breakup).await?;
        }
        for allocation in &pass.allocations {
            tx.append_allocation(allocation).await?;
        }
        payment.unallocated_amount = pass.unallocated;

        let mut verified = false;
        if payment.kind == PaymentKind::FullPayment {
            payment.transition_to(PaymentStatus::VerifiedByOps, now)?;
            payment.verified_at = Some(now);
            verified = true;
        }
        tx.put_payment(&payment).await?;

        invoice.set_status(pass.invoice_status, now);
        tx.put_invoice(&invoice).await?;

        self.record(
            &mut tx,
            &invoice.request_id,
            actor,
            ActivityAction::PaymentReceived,
            Some(format!("{} allocated, {} unallocated", pass.allocated, pass.unallocated)),
        )
        .await?;
        if verified {
            self.record(&mut tx, &invoice.request_id, actor, ActivityAction::PaymentVerified, None)
                .await?;
        }

        let mut outbox = Outbox::default();
        if pass.invoice_status == InvoiceStatus::Paid {
            let mut request = self.load_request(&mut tx, &invoice.request_id).await?;
            if request.status == RequestStatus::Accepted {
                let outcome = self
                    .advance_request(
                        &mut tx,
                        &mut request,
                        FlowEvent::SettlementCompleted,
                        &FlowContext::default(),
                    )
                    .await?;
                self.record(&mut tx, &request.id, actor, ActivityAction::RequestPaid, None).await?;
                self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
            }
        }
        if !verified {
            self.notify_role(&mut tx, &mut outbox, actor, Role::Operations, |recipient| {
                Notification::new(
                    recipient.clone(),
                    "Payment needs operations verification",
                    format!("{} confirmed against {}.", payment.amount, invoice.invoice_number),
                    now,
                )
                .with_link(format!("/payments/{}", payment.id))
            })
            .await?;
        }
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "payment.settlement.applied",
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            allocated = %pass.allocated,
            unallocated = %pass.unallocated,
            invoice_status = %pass.invoice_status,
            "payment allocated across installments"
        );
        Ok(SettlementReport {
            payment,
            allocations: pass.allocations,
            unallocated: pass.unallocated,
            invoice_status: pass.invoice_status,
        })
    }

    pub async fn verify_by_operations(
        &self,
        actor: &Actor,
        id: &PaymentId,
        notes: Option<String>,
    ) -> Result<Payment, ApplicationError> {
        actor.require(Capability::VerifyAsOperations)?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut payment = self.load_payment(&mut tx, id).await?;
        let invoice = self.load_invoice(&mut tx, &payment.invoice_id).await?;

        payment.transition_to(PaymentStatus::VerifiedByOps, now)?;
        payment.verified_at = Some(now);
        payment.operations_notes = notes;
        tx.put_payment(&payment).await?;
        self.record(&mut tx, &invoice.request_id, actor, ActivityAction::PaymentVerified, None)
            .await?;

        let request = self.load_request(&mut tx, &invoice.request_id).await?;
        let mut outbox = Outbox::default();
        if let Some(customer_id) = &request.client.customer_id {
            outbox.push(
                Notification::new(
                    customer_id.clone(),
                    "Payment verified",
                    format!("Your payment of {} {} is verified.", payment.amount, invoice.currency),
                    now,
                )
                .with_link(format!("/invoices/{}", invoice.id)),
            );
        }
        self.finish(tx, outbox).await?;

        tracing::info!(event_name = "payment.verified", payment_id = %payment.id, "payment verified");
        Ok(payment)
    }

    /// Accountants reject unconfirmed payments; operations reject confirmed ones, which
    /// reverses their allocations and queues the money for refund review.
    pub async fn reject_payment(
        &self,
        actor: &Actor,
        id: &PaymentId,
        reason: Option<String>,
    ) -> Result<SettlementReport, ApplicationError> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let invoice_id = self.load_payment(&mut tx, id).await?.invoice_id;
        tx.lock(&LockScope::Invoice(invoice_id.clone())).await?;
        let mut payment = self.load_payment(&mut tx, id).await?;
        let mut invoice = self.load_invoice(&mut tx, &invoice_id).await?;

        let step = match payment.status {
            PaymentStatus::Pending => Capability::VerifyAsAccountant,
            PaymentStatus::ReceivedByAccountant => Capability::VerifyAsOperations,
            _ => {
                return Err(DomainError::InvalidTransition {
                    entity: "payment",
                    from: payment.status.to_string(),
                    to: PaymentStatus::Rejected.to_string(),
                }
                .into())
            }
        };
        actor.require(step)?;

        let allocated_before = payment.status == PaymentStatus::ReceivedByAccountant;
        payment.transition_to(PaymentStatus::Rejected, now)?;
        match actor.role {
            Role::Operations => payment.operations_notes = reason.clone(),
            _ => payment.accountant_notes = reason.clone(),
        }

        let mut reversal = Vec::new();
        let mut invoice_status = invoice.status;
        if allocated_before {
            let ledger = tx.allocations_for_payment(&payment.id).await?;
            let breakups = tx.breakups(&invoice.id).await?;
            let pass = reverse_allocations(&ledger, &breakups, now);
            for breakup in &pass.touched {
                tx.put_breakup(breakup).await?;
            }
            for allocation in &pass.allocations {
                tx.append_allocation(allocation).await?;
            }
            if !pass.allocations.is_empty() {
                payment.refund_review = RefundReview::Pending;
                self.record(
                    &mut tx,
                    &invoice.request_id,
                    actor,
                    ActivityAction::AllocationsReversed,
                    Some(format!("{} returned to the schedule", -pass.allocated)),
                )
                .await?;
            }
            if !invoice.status.is_closed() {
                invoice_status = pass.invoice_status;
                invoice.set_status(invoice_status, now);
                tx.put_invoice(&invoice).await?;
            }
            reversal = pass.allocations;
        }
        payment.unallocated_amount = Decimal::ZERO;
        tx.put_payment(&payment).await?;
        self.record(&mut tx, &invoice.request_id, actor, ActivityAction::PaymentRejected, reason.clone())
            .await?;

        let mut outbox = Outbox::default();
        let mut request = self.load_request(&mut tx, &invoice.request_id).await?;
        if request.status == RequestStatus::Paid && invoice_status != InvoiceStatus::Paid {
            let outcome = self
                .advance_request(&mut tx, &mut request, FlowEvent::SettlementReversed, &FlowContext::default())
                .await?;
            self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
        }
        if let Some(customer_id) = &request.client.customer_id {
            outbox.push(
                Notification::new(
                    customer_id.clone(),
                    "Payment rejected",
                    format!(
                        "Your payment of {} {} was rejected{}",
                        payment.amount,
                        invoice.currency,
                        reason.as_deref().map(|reason| format!(": {reason}")).unwrap_or_default()
                    ),
                    now,
                )
                .with_link(format!("/invoices/{}", invoice.id)),
            );
        }
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "payment.rejected",
            payment_id = %payment.id,
            reversed_entries = reversal.len(),
            refund_review = %payment.refund_review,
            "payment rejected"
        );
        Ok(SettlementReport {
            payment,
            allocations: reversal,
            unallocated: Decimal::ZERO,
            invoice_status,
        })
    }

    pub async fn list_payments(
        &self,
        actor: &Actor,
        query: PaymentQuery,
    ) -> Result<Vec<Payment>, ApplicationError> {
        let mut tx = self.begin().await?;
        if !actor.can(Capability::ViewFinance) {
            let Some(invoice_id) = &query.invoice_id else {
                return Err(actor.forbidden("list payments across invoices"));
            };
            self.readable_invoice(&mut tx, actor, invoice_id).await?;
        }
        let filter = PaymentFilter {
            invoice_id: query.invoice_id,
            statuses: query.status.into_iter().collect(),
            refund_review: query.refund_review,
        };
        let mut payments = tx.payments(&filter).await?;
        payments.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(payments)
    }

    pub async fn get_payment(&self, actor: &Actor, id: &PaymentId) -> Result<Payment, ApplicationError> {
        let mut tx = self.begin().await?;
        let payment = self.load_payment(&mut tx, id).await?;
        self.ensure_payment_visible(&mut tx, actor, &payment).await?;
        Ok(payment)
    }

    pub async fn refund_reviews(&self, actor: &Actor) -> Result<Vec<Payment>, ApplicationError> {
        actor.require(Capability::VerifyAsAccountant)?;
        let mut tx = self.begin().await?;
        Ok(tx
            .payments(&PaymentFilter {
                refund_review: Some(RefundReview::Pending),
                ..PaymentFilter::default()
            })
            .await?)
    }

    pub async fn resolve_refund_review(
        &self,
        actor: &Actor,
        id: &PaymentId,
        notes: Option<String>,
    ) -> Result<Payment, ApplicationError> {
        actor.require(Capability::VerifyAsAccountant)?;
        let mut tx = self.begin().await?;
        let mut payment = self.load_payment(&mut tx, id).await?;
        if payment.refund_review != RefundReview::Pending {
            return Err(DomainError::Conflict(format!(
                "payment {} has no open refund review",
                payment.id
            ))
            .into());
        }
        let invoice = self.load_invoice(&mut tx, &payment.invoice_id).await?;

        payment.refund_review = RefundReview::Resolved;
        if notes.is_some() {
            payment.accountant_notes = notes.clone();
        }
        payment.updated_at = self.now();
        tx.put_payment(&payment).await?;
        self.record(&mut tx, &invoice.request_id, actor, ActivityAction::RefundReviewResolved, notes)
            .await?;
        tx.commit().await?;
        Ok(payment)
    }

    async fn load_payment(&self, tx: &mut Tx, id: &PaymentId) -> Result<Payment, ApplicationError> {
        tx.payment(id).await?.ok_or_else(|| ApplicationError::not_found("payment", id))
    }

    async fn ensure_payment_visible(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        payment: &Payment,
    ) -> Result<(), ApplicationError> {
        if actor.can(Capability::ViewFinance) {
            return Ok(());
        }
        self.readable_invoice(tx, actor, &payment.invoice_id).await.map(|_| ())
    }

    /// The customer's own open invoice.
    async fn payable_invoice(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        invoice_id: &InvoiceId,
    ) -> Result<Invoice, ApplicationError> {
        let invoice = self.load_invoice(tx, invoice_id).await?;
        self.visible_request(tx, actor, &invoice.request_id).await?;
        if invoice.status.is_closed() || invoice.status == InvoiceStatus::Paid {
            return Err(DomainError::Conflict(format!(
                "invoice {} is {} and takes no further payments",
                invoice.invoice_number, invoice.status
            ))
            .into());
        }
        Ok(invoice)
    }

    /// The invoice's installments, materialising the single implicit one on first use.
    async fn breakups_for_settlement(
        &self,
        tx: &mut Tx,
        invoice: &Invoice,
    ) -> Result<Vec<PaymentBreakup>, ApplicationError> {
        let breakups = tx.breakups(&invoice.id).await?;
        if !breakups.is_empty() {
            return Ok(breakups);
        }
        let implicit = implicit_breakup(invoice, self.now());
        tx.put_breakup(&implicit).await?;
        Ok(vec![implicit])
    }

    async fn notify_role(
        &self,
        tx: &mut Tx,
        outbox: &mut Outbox,
        actor: &Actor,
        role: Role,
        build: impl Fn(&UserId) -> Notification,
    ) -> Result<(), ApplicationError> {
        let recipients: Vec<UserId> = tx
            .users(Some(role))
            .await?
            .into_iter()
            .filter(|user| user.active)
            .map(|user| user.id)
            .collect();
        outbox.notify_all(&recipients, &actor.user_id, build);
        Ok(())
    }
}
