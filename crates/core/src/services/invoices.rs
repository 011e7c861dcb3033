use rust_decimal::Decimal;
use serde::Serialize;

use crate::audit::{ActivityAction, Notification, Outbox};
use crate::documents::{DocumentPayload, DocumentRenderer, InvoiceDocument, RenderedDocument};
use crate::domain::invoice::{Invoice, InvoiceStatus, PaymentBreakup};
use crate::domain::payment::PaymentAllocation;
use crate::domain::quotation::QuotationStatus;
use crate::domain::user::Role;
use crate::domain::{InvoiceId, QuotationId, RequestId};
use crate::errors::{ApplicationError, DomainError};
use crate::identity::{Actor, Capability};
use crate::invoicing::{days_overdue, implicit_breakup, plan_breakups, BreakupDraft};
use crate::services::{Backoffice, Tx};
use crate::settlement::outstanding;

/// An invoice with its installments and running totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvoiceSchedule {
    pub invoice: Invoice,
    pub breakups: Vec<PaymentBreakup>,
    /// True when no schedule was planned and the whole total is shown as one installment.
    pub implicit: bool,
    pub total_paid: Decimal,
    pub total_remaining: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OverdueBreakup {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub request_id: RequestId,
    pub client_name: String,
    pub breakup: PaymentBreakup,
    pub days_overdue: i64,
}

impl Backoffice {
    /// Raises the invoice for an accepted quotation that was not invoiced on acceptance.
    pub async fn create_invoice_from_quotation(
        &self,
        actor: &Actor,
        quotation_id: &QuotationId,
        tcs_percent: Option<Decimal>,
    ) -> Result<Invoice, ApplicationError> {
        actor.require(Capability::ManageInvoices)?;
        let mut tx = self.begin().await?;
        let quotation = self.load_quotation(&mut tx, quotation_id).await?;
        if quotation.status != QuotationStatus::Accepted {
            return Err(DomainError::QuotationNotAccepted {
                quotation_id: quotation.id.to_string(),
                status: quotation.status.to_string(),
            }
            .into());
        }
        let request = self.load_request(&mut tx, &quotation.request_id).await?;

        let (invoice, _) = self
            .issue_invoice(
                &mut tx,
                actor,
                &quotation,
                &request,
                tcs_percent.unwrap_or(self.settings.default_tcs_percent),
            )
            .await?;

        let mut outbox = Outbox::default();
        if let Some(customer_id) = &request.client.customer_id {
            outbox.push(
                Notification::new(
                    customer_id.clone(),
                    "Invoice issued",
                    format!(
                        "Invoice {} for \"{}\" totals {} {}.",
                        invoice.invoice_number, request.title, invoice.total_amount, invoice.currency
                    ),
                    self.now(),
                )
                .with_link(format!("/invoices/{}", invoice.id)),
            );
        }
        self.finish(tx, outbox).await?;
        Ok(invoice)
    }

    /// Plans the installment schedule. An invoice is scheduled once.
    pub async fn create_payment_breakup(
        &self,
        actor: &Actor,
        invoice_id: &InvoiceId,
        drafts: Vec<BreakupDraft>,
    ) -> Result<InvoiceSchedule, ApplicationError> {
        actor.require(Capability::ManageInvoices)?;
        let mut tx = self.begin().await?;
        tx.lock(&crate::store::LockScope::Invoice(invoice_id.clone())).await?;
        let invoice = self.load_invoice(&mut tx, invoice_id).await?;
        if invoice.status.is_closed() {
            return Err(DomainError::Conflict(format!(
                "invoice {} is {}",
                invoice.invoice_number, invoice.status
            ))
            .into());
        }
        if !tx.breakups(&invoice.id).await?.is_empty() {
            return Err(DomainError::BreakupAlreadyPlanned(invoice.invoice_number.clone()).into());
        }

        let max = usize::try_from(self.settings.max_installments).unwrap_or(usize::MAX);
        let breakups = plan_breakups(
            &invoice,
            &drafts,
            self.today(),
            max,
            self.settings.amount_tolerance,
            self.now(),
        )?;
        for breakup in &breakups {
            tx.put_breakup(breakup).await?;
        }
        self.record(
            &mut tx,
            &invoice.request_id,
            actor,
            ActivityAction::BreakupPlanned,
            Some(format!("{} installments for {}", breakups.len(), invoice.invoice_number)),
        )
        .await?;

        let request = self.load_request(&mut tx, &invoice.request_id).await?;
        let mut outbox = Outbox::default();
        if let Some(customer_id) = &request.client.customer_id {
            outbox.push(
                Notification::new(
                    customer_id.clone(),
                    "Payment schedule ready",
                    format!(
                        "{} is split into {} installments, first due {}.",
                        invoice.invoice_number,
                        breakups.len(),
                        breakups[0].due_date
                    ),
                    self.now(),
                )
                .with_link(format!("/invoices/{}", invoice.id)),
            );
        }
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "invoice.breakup_planned",
            invoice_id = %invoice.id,
            installments = breakups.len(),
            "payment schedule planned"
        );
        Ok(schedule_of(invoice, breakups, false))
    }

    pub async fn get_invoice(
        &self,
        actor: &Actor,
        id: &InvoiceId,
    ) -> Result<Invoice, ApplicationError> {
        let mut tx = self.begin().await?;
        self.readable_invoice(&mut tx, actor, id).await
    }

    pub async fn invoice_for_request(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<Invoice, ApplicationError> {
        let mut tx = self.begin().await?;
        let (request, _) = self.visible_request(&mut tx, actor, request_id).await?;
        if actor.role.is_staff()
            && !actor.can(Capability::ViewFinance)
            && !request.is_assigned_to(&actor.user_id)
        {
            return Err(actor.forbidden("view invoices"));
        }
        tx.invoice_for_request(&request.id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("invoice for request", request_id))
    }

    pub async fn list_invoices(&self, actor: &Actor) -> Result<Vec<Invoice>, ApplicationError> {
        actor.require(Capability::ViewFinance)?;
        let mut tx = self.begin().await?;
        let mut invoices = tx.invoices().await?;
        invoices.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(invoices)
    }

    pub async fn invoice_schedule(
        &self,
        actor: &Actor,
        id: &InvoiceId,
    ) -> Result<InvoiceSchedule, ApplicationError> {
        let mut tx = self.begin().await?;
        let invoice = self.readable_invoice(&mut tx, actor, id).await?;
        let breakups = tx.breakups(&invoice.id).await?;
        if breakups.is_empty() {
            let implicit = implicit_breakup(&invoice, self.now());
            return Ok(schedule_of(invoice, vec![implicit], true));
        }
        Ok(schedule_of(invoice, breakups, false))
    }

    pub async fn allocation_ledger(
        &self,
        actor: &Actor,
        id: &InvoiceId,
    ) -> Result<Vec<PaymentAllocation>, ApplicationError> {
        actor.require(Capability::ViewFinance)?;
        let mut tx = self.begin().await?;
        let invoice = self.load_invoice(&mut tx, id).await?;
        let mut ledger = tx.allocations_for_invoice(&invoice.id).await?;
        ledger.sort_by_key(|entry| entry.created_at);
        Ok(ledger)
    }

    /// Unpaid installments past their due date on invoices that are still open.
    pub async fn overdue_breakups(
        &self,
        actor: &Actor,
    ) -> Result<Vec<OverdueBreakup>, ApplicationError> {
        actor.require(Capability::ViewFinance)?;
        let mut tx = self.begin().await?;
        let today = self.today();
        let mut overdue = Vec::new();

        for invoice in tx.invoices().await? {
            if invoice.status.is_closed() || invoice.status == InvoiceStatus::Paid {
                continue;
            }
            let mut breakups = tx.breakups(&invoice.id).await?;
            if breakups.is_empty() {
                breakups.push(implicit_breakup(&invoice, invoice.created_at));
            }
            for breakup in breakups {
                if let Some(days) = days_overdue(&breakup, today) {
                    overdue.push(OverdueBreakup {
                        invoice_id: invoice.id.clone(),
                        invoice_number: invoice.invoice_number.clone(),
                        request_id: invoice.request_id.clone(),
                        client_name: invoice.client.name.clone(),
                        breakup,
                        days_overdue: days,
                    });
                }
            }
        }

        overdue.sort_by(|left, right| right.days_overdue.cmp(&left.days_overdue));
        Ok(overdue)
    }

    pub async fn overdue_count(&self, actor: &Actor) -> Result<usize, ApplicationError> {
        Ok(self.overdue_breakups(actor).await?.len())
    }

    /// Flags open invoices with a late installment as `Overdue`. The next settlement pass
    /// re-derives the status from the installments.
    pub async fn mark_overdue(&self, actor: &Actor) -> Result<usize, ApplicationError> {
        actor.require(Capability::RunSweeps)?;
        let today = self.today();
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut marked = 0;

        for mut invoice in tx.invoices().await? {
            if invoice.status.is_closed()
                || matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Overdue)
            {
                continue;
            }
            let breakups = tx.breakups(&invoice.id).await?;
            let late = if breakups.is_empty() {
                invoice.due_date < today
            } else {
                breakups.iter().any(|breakup| breakup.is_overdue(today))
            };
            if late {
                invoice.set_status(InvoiceStatus::Overdue, now);
                tx.put_invoice(&invoice).await?;
                marked += 1;
            }
        }
        tx.commit().await?;

        tracing::info!(event_name = "invoice.overdue.swept", marked, "overdue sweep finished");
        Ok(marked)
    }

    /// Renders the invoice document. A rendering failure leaves the invoice untouched.
    pub async fn render_invoice(
        &self,
        actor: &Actor,
        id: &InvoiceId,
        renderer: &dyn DocumentRenderer,
    ) -> Result<RenderedDocument, ApplicationError> {
        let mut tx = self.begin().await?;
        let invoice = self.readable_invoice(&mut tx, actor, id).await?;
        let request = self.load_request(&mut tx, &invoice.request_id).await?;
        let mut breakups = tx.breakups(&invoice.id).await?;
        drop(tx);
        if breakups.is_empty() {
            breakups.push(implicit_breakup(&invoice, invoice.created_at));
        }

        let total_remaining = outstanding(&breakups);
        let payload = DocumentPayload::Invoice(InvoiceDocument {
            total_paid: invoice.total_amount - total_remaining,
            total_remaining,
            trip_title: request.title,
            invoice,
            breakups,
        });
        renderer.render(&payload).await.map_err(|error| {
            tracing::warn!(
                event_name = "document.render_failed",
                invoice_id = %id,
                error = %error,
                "invoice rendering failed"
            );
            ApplicationError::from(error)
        })
    }

    pub(super) async fn load_invoice(
        &self,
        tx: &mut Tx,
        id: &InvoiceId,
    ) -> Result<Invoice, ApplicationError> {
        tx.invoice(id).await?.ok_or_else(|| ApplicationError::not_found("invoice", id))
    }

    /// Finance roles read every invoice; customers only those of their own requests.
    pub(super) async fn readable_invoice(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        id: &InvoiceId,
    ) -> Result<Invoice, ApplicationError> {
        let invoice = self.load_invoice(tx, id).await?;
        if actor.can(Capability::ViewFinance) {
            return Ok(invoice);
        }
        let (request, _) = self.visible_request(tx, actor, &invoice.request_id).await?;
        match actor.role {
            Role::Customer => Ok(invoice),
            _ if request.is_assigned_to(&actor.user_id) => Ok(invoice),
            _ => Err(actor.forbidden("view invoices")),
        }
    }
}

fn schedule_of(invoice: Invoice, breakups: Vec<PaymentBreakup>, implicit: bool) -> InvoiceSchedule {
    let total_paid = breakups.iter().map(|breakup| breakup.paid_amount).sum();
    let total_remaining = outstanding(&breakups);
    InvoiceSchedule { invoice, breakups, implicit, total_paid, total_remaining }
}
