use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BreakupId, InvoiceId, QuotationId, RequestId};

wire_enum!(InvoiceStatus {
    VerificationPending => "Verification Pending",
    PartialPaid => "Partial Paid",
    Paid => "Paid",
    Overdue => "Overdue",
    RefundInitiated => "Refund Initiated",
    Cancelled => "Cancelled",
});

impl InvoiceStatus {
    /// Statuses set by an explicit close-out rather than derived from breakups.
    pub fn is_closed(self) -> bool {
        matches!(self, InvoiceStatus::RefundInitiated | InvoiceStatus::Cancelled)
    }
}

wire_enum!(BreakupStatus {
    Pending => "pending",
    PartialPaid => "partial_paid",
    Paid => "paid",
});

impl BreakupStatus {
    pub fn for_amounts(amount: Decimal, paid: Decimal) -> Self {
        if paid <= Decimal::ZERO {
            BreakupStatus::Pending
        } else if paid >= amount {
            BreakupStatus::Paid
        } else {
            BreakupStatus::PartialPaid
        }
    }
}

/// Client details copied at invoice creation; later profile edits do not flow through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub quotation_id: QuotationId,
    pub request_id: RequestId,
    pub client: ClientSnapshot,
    pub base_amount: Decimal,
    pub tcs_percent: Decimal,
    pub tcs_amount: Decimal,
    pub total_amount: Decimal,
    pub advance_amount: Decimal,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn set_status(&mut self, status: InvoiceStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

/// One scheduled installment of an invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBreakup {
    pub id: BreakupId,
    pub invoice_id: InvoiceId,
    pub sequence: u32,
    pub description: Option<String>,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: BreakupStatus,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentBreakup {
    pub fn new(
        invoice_id: InvoiceId,
        sequence: u32,
        amount: Decimal,
        due_date: NaiveDate,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BreakupId::generate(),
            invoice_id,
            sequence,
            description,
            amount,
            due_date,
            status: BreakupStatus::Pending,
            paid_amount: Decimal::ZERO,
            remaining_amount: amount,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves `delta` into (positive) or out of (negative) the paid column.
    pub fn apply(&mut self, delta: Decimal, now: DateTime<Utc>) {
        self.paid_amount += delta;
        self.remaining_amount = self.amount - self.paid_amount;
        self.status = BreakupStatus::for_amounts(self.amount, self.paid_amount);
        self.updated_at = now;
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != BreakupStatus::Paid && self.due_date < today
    }
}
