use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::invoice::BreakupStatus;
use crate::domain::{AllocationId, BreakupId, InvoiceId, PaymentId, UserId};
use crate::errors::DomainError;

wire_enum!(PaymentStatus {
    Pending => "PENDING",
    ReceivedByAccountant => "RECEIVED_BY_ACCOUNTANT",
    VerifiedByOps => "VERIFIED_BY_OPS",
    Captured => "CAPTURED",
    Rejected => "REJECTED",
});

wire_enum!(PaymentMethod {
    BankTransfer => "bank_transfer",
    Upi => "upi",
    Card => "card",
    Cash => "cash",
    Cheque => "cheque",
    Pending => "pending",
});

impl PaymentMethod {
    /// Whether a customer has actually named how the money was sent.
    pub fn is_attested(self) -> bool {
        self != PaymentMethod::Pending
    }
}

wire_enum!(PaymentKind {
    Advance => "advance",
    Installment => "installment",
    FullPayment => "full_payment",
});

wire_enum!(RefundReview {
    NotRequired => "none",
    Pending => "pending",
    Resolved => "resolved",
});

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub received_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub accountant_notes: Option<String>,
    pub operations_notes: Option<String>,
    pub proof_reference: Option<String>,
    pub submitted_by: UserId,
    pub unallocated_amount: Decimal,
    pub refund_review: RefundReview,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::{Pending, ReceivedByAccountant, Rejected, VerifiedByOps};

        matches!(
            (self.status, next),
            (Pending, ReceivedByAccountant)
                | (Pending, Rejected)
                | (ReceivedByAccountant, VerifiedByOps)
                | (ReceivedByAccountant, Rejected)
        )
    }

    pub fn transition_to(
        &mut self,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "payment",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Append-only settlement ledger entry. Reversals carry a negative amount and point at the
/// entry they undo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: AllocationId,
    pub payment_id: PaymentId,
    pub breakup_id: BreakupId,
    pub invoice_id: InvoiceId,
    pub allocated_amount: Decimal,
    pub resulting_status: BreakupStatus,
    pub reverses: Option<AllocationId>,
    pub created_at: DateTime<Utc>,
}

impl PaymentAllocation {
    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub invoice_id: Option<InvoiceId>,
    pub statuses: Vec<PaymentStatus>,
    pub refund_review: Option<RefundReview>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.invoice_id.as_ref().map_or(true, |id| &payment.invoice_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&payment.status))
            && self.refund_review.map_or(true, |review| payment.refund_review == review)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Payment, PaymentKind, PaymentMethod, PaymentStatus, RefundReview};
    use crate::domain::{InvoiceId, PaymentId, UserId};

    fn payment(status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            id: PaymentId::from("pay-1"),
            invoice_id: InvoiceId::from("inv-1"),
            amount: Decimal::from(10_000),
            method: PaymentMethod::Upi,
            kind: PaymentKind::Installment,
            status,
            received_at: None,
            verified_at: None,
            accountant_notes: None,
            operations_notes: None,
            proof_reference: None,
            submitted_by: UserId::from("cust-1"),
            unallocated_amount: Decimal::ZERO,
            refund_review: RefundReview::NotRequired,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn verification_runs_accountant_then_operations() {
        let mut pending = payment(PaymentStatus::Pending);
        assert!(pending.transition_to(PaymentStatus::VerifiedByOps, Utc::now()).is_err());
        pending.transition_to(PaymentStatus::ReceivedByAccountant, Utc::now()).expect("received");
        pending.transition_to(PaymentStatus::VerifiedByOps, Utc::now()).expect("verified");
    }

    #[test]
    fn verified_payments_are_final() {
        let mut verified = payment(PaymentStatus::VerifiedByOps);
        assert!(!verified.can_transition_to(PaymentStatus::Rejected));
        assert!(verified.transition_to(PaymentStatus::Rejected, Utc::now()).is_err());
    }

    #[test]
    fn placeholder_method_is_not_an_attestation() {
        assert!(!PaymentMethod::Pending.is_attested());
        assert!(PaymentMethod::BankTransfer.is_attested());
    }
}
