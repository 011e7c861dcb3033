//! FIFO allocation of verified money across an invoice's installments, and its reversal.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::invoice::{BreakupStatus, InvoiceStatus, PaymentBreakup};
use crate::domain::payment::{Payment, PaymentAllocation};
use crate::domain::AllocationId;
use crate::errors::ValidationFailure;

/// Result of one allocation or reversal pass over an invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettlementPass {
    pub allocations: Vec<PaymentAllocation>,
    /// Installments whose paid/remaining columns changed.
    pub touched: Vec<PaymentBreakup>,
    pub allocated: Decimal,
    pub unallocated: Decimal,
    pub invoice_status: InvoiceStatus,
}

fn fifo_order(breakups: &[PaymentBreakup]) -> Vec<PaymentBreakup> {
    let mut ordered = breakups.to_vec();
    ordered.sort_by(|left, right| {
        left.due_date.cmp(&right.due_date).then(left.sequence.cmp(&right.sequence))
    });
    ordered
}

pub fn derive_invoice_status(breakups: &[PaymentBreakup]) -> InvoiceStatus {
    if !breakups.is_empty() && breakups.iter().all(|breakup| breakup.status == BreakupStatus::Paid)
    {
        InvoiceStatus::Paid
    } else if breakups.iter().any(|breakup| breakup.paid_amount > Decimal::ZERO) {
        InvoiceStatus::PartialPaid
    } else {
        InvoiceStatus::VerificationPending
    }
}

pub fn outstanding(breakups: &[PaymentBreakup]) -> Decimal {
    breakups.iter().map(|breakup| breakup.remaining_amount).sum()
}

/// Walks unpaid installments by `(due_date, sequence)`, filling each before touching the next.
pub fn allocate_fifo(
    payment: &Payment,
    breakups: &[PaymentBreakup],
    now: DateTime<Utc>,
) -> Result<SettlementPass, ValidationFailure> {
    if payment.amount <= Decimal::ZERO {
        return Err(ValidationFailure::InvalidAmount(payment.amount));
    }

    let mut ordered = fifo_order(breakups);
    let mut remaining = payment.amount;
    let mut allocations = Vec::new();
    let mut touched = Vec::new();

    for breakup in ordered.iter_mut() {
        if remaining <= Decimal::ZERO {
            break;
        }
        if breakup.status == BreakupStatus::Paid {
            continue;
        }
        let take = remaining.min(breakup.remaining_amount);
        if take <= Decimal::ZERO {
            continue;
        }

        breakup.apply(take, now);
        remaining -= take;
        allocations.push(PaymentAllocation {
            id: AllocationId::generate(),
            payment_id: payment.id.clone(),
            breakup_id: breakup.id.clone(),
            invoice_id: breakup.invoice_id.clone(),
            allocated_amount: take,
            resulting_status: breakup.status,
            reverses: None,
            created_at: now,
        });
        touched.push(breakup.clone());
    }

    Ok(SettlementPass {
        allocations,
        touched,
        allocated: payment.amount - remaining,
        unallocated: remaining,
        invoice_status: derive_invoice_status(&ordered),
    })
}

/// Appends a compensating entry for every not-yet-reversed allocation in `ledger`.
///
/// `ledger` holds the entries of a single payment, reversals included.
pub fn reverse_allocations(
    ledger: &[PaymentAllocation],
    breakups: &[PaymentBreakup],
    now: DateTime<Utc>,
) -> SettlementPass {
    let already_reversed: BTreeSet<&AllocationId> =
        ledger.iter().filter_map(|entry| entry.reverses.as_ref()).collect();
    let mut current = fifo_order(breakups);
    let mut allocations = Vec::new();
    let mut touched_ids = BTreeSet::new();
    let mut restored = Decimal::ZERO;

    for entry in ledger {
        if entry.is_reversal() || already_reversed.contains(&entry.id) {
            continue;
        }
        let Some(breakup) = current.iter_mut().find(|breakup| breakup.id == entry.breakup_id)
        else {
            tracing::warn!(
                event_name = "payment.settlement.orphan_allocation",
                allocation_id = %entry.id,
                breakup_id = %entry.breakup_id,
                "allocation points at an unknown installment"
            );
            continue;
        };

        breakup.apply(-entry.allocated_amount, now);
        restored += entry.allocated_amount;
        touched_ids.insert(breakup.id.clone());
        allocations.push(PaymentAllocation {
            id: AllocationId::generate(),
            payment_id: entry.payment_id.clone(),
            breakup_id: entry.breakup_id.clone(),
            invoice_id: entry.invoice_id.clone(),
            allocated_amount: -entry.allocated_amount,
            resulting_status: breakup.status,
            reverses: Some(entry.id.clone()),
            created_at: now,
        });
    }

    let touched =
        current.iter().filter(|breakup| touched_ids.contains(&breakup.id)).cloned().collect();

    SettlementPass {
        allocations,
        touched,
        allocated: -restored,
        unallocated: Decimal::ZERO,
        invoice_status: derive_invoice_status(&current),
    }
}
