//! Invoice derivation and installment planning.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::invoice::{ClientSnapshot, Invoice, InvoiceStatus, PaymentBreakup};
use crate::domain::quotation::{Quotation, QuotationStatus};
use crate::domain::request::TravelRequest;
use crate::domain::InvoiceId;
use crate::errors::{DomainError, ValidationFailure};

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `INV-YYYYMMDD-XXXXXXXX`, the suffix taken from a fresh UUID.
pub fn invoice_number(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("INV-{}-{}", now.format("%Y%m%d"), suffix.to_ascii_uppercase())
}

/// Builds the invoice for an accepted quotation. The caller guarantees uniqueness per quotation.
pub fn derive_invoice(
    quotation: &Quotation,
    request: &TravelRequest,
    tcs_percent: Decimal,
    due_days: u32,
    now: DateTime<Utc>,
) -> Result<Invoice, DomainError> {
    if quotation.status != QuotationStatus::Accepted {
        return Err(DomainError::QuotationNotAccepted {
            quotation_id: quotation.id.to_string(),
            status: quotation.status.to_string(),
        });
    }
    if tcs_percent.is_sign_negative() || tcs_percent > Decimal::ONE_HUNDRED {
        return Err(ValidationFailure::field("tcs_percent", "must be between 0 and 100").into());
    }

    let pricing = &quotation.data.pricing;
    let base_amount = round_money(pricing.total);
    let tcs_amount = round_money(base_amount * tcs_percent / Decimal::ONE_HUNDRED);

    Ok(Invoice {
        id: InvoiceId::generate(),
        invoice_number: invoice_number(now),
        quotation_id: quotation.id.clone(),
        request_id: request.id.clone(),
        client: ClientSnapshot {
            name: request.client.name.clone(),
            email: request.client.email.clone(),
            phone: request.client.phone.clone(),
        },
        base_amount,
        tcs_percent,
        tcs_amount,
        total_amount: base_amount + tcs_amount,
        advance_amount: round_money(pricing.deposit_due),
        currency: pricing.currency.clone(),
        status: InvoiceStatus::VerificationPending,
        due_date: now.date_naive() + Duration::days(i64::from(due_days)),
        created_at: now,
        updated_at: now,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakupDraft {
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub description: Option<String>,
}

/// Validates a schedule against the invoice and materialises it in the given order.
///
/// Checks run in a fixed order: count, amounts, sum, past dates, then ordering.
pub fn plan_breakups(
    invoice: &Invoice,
    drafts: &[BreakupDraft],
    today: NaiveDate,
    max_installments: usize,
    tolerance: Decimal,
    now: DateTime<Utc>,
) -> Result<Vec<PaymentBreakup>, ValidationFailure> {
    if drafts.is_empty() {
        return Err(ValidationFailure::field("breakups", "at least one installment is required"));
    }
    if drafts.len() > max_installments {
        return Err(ValidationFailure::TooManyInstallments {
            count: drafts.len(),
            max: max_installments,
        });
    }
    if let Some(draft) = drafts.iter().find(|draft| draft.amount <= Decimal::ZERO) {
        return Err(ValidationFailure::InvalidAmount(draft.amount));
    }

    // Amounts are compared as they will be stored. A shortfall or excess within tolerance lands
    // on the last installment so the schedule always sums to the invoice total exactly.
    let mut amounts: Vec<Decimal> = drafts.iter().map(|draft| round_money(draft.amount)).collect();
    let actual: Decimal = amounts.iter().copied().sum();
    let leftover = invoice.total_amount - actual;
    if leftover.abs() > tolerance {
        return Err(ValidationFailure::AmountMismatch { expected: invoice.total_amount, actual });
    }
    if let Some(last) = amounts.last_mut() {
        *last += leftover;
        if *last <= Decimal::ZERO {
            return Err(ValidationFailure::InvalidAmount(*last));
        }
    }

    for (offset, draft) in drafts.iter().enumerate() {
        if draft.due_date < today {
            return Err(ValidationFailure::PastDueDate {
                index: offset + 1,
                due_date: draft.due_date,
                today,
            });
        }
    }
    for (offset, pair) in drafts.windows(2).enumerate() {
        if pair[1].due_date < pair[0].due_date {
            return Err(ValidationFailure::UnorderedDueDates {
                index: offset + 2,
                due_date: pair[1].due_date,
                previous_index: offset + 1,
                previous: pair[0].due_date,
            });
        }
    }

    Ok(drafts
        .iter()
        .zip(amounts)
        .zip(1u32..)
        .map(|((draft, amount), sequence)| {
            PaymentBreakup::new(
                invoice.id.clone(),
                sequence,
                amount,
                draft.due_date,
                draft.description.clone(),
                now,
            )
        })
        .collect())
}

/// The single installment an invoice is treated as having when nobody planned a schedule.
pub fn implicit_breakup(invoice: &Invoice, now: DateTime<Utc>) -> PaymentBreakup {
    PaymentBreakup::new(
        invoice.id.clone(),
        1,
        invoice.total_amount,
        invoice.due_date,
        Some("Full amount".to_owned()),
        now,
    )
}

pub fn days_overdue(breakup: &PaymentBreakup, today: NaiveDate) -> Option<i64> {
    breakup.is_overdue(today).then(|| (today - breakup.due_date).num_days())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{days_overdue, derive_invoice, implicit_breakup, plan_breakups, BreakupDraft};
    use crate::domain::invoice::{BreakupStatus, Invoice, InvoiceStatus};
    use crate::domain::quotation::fixtures::quotation;
    use crate::domain::quotation::QuotationStatus;
    use crate::domain::request::fixtures::request;
    use crate::domain::request::RequestStatus;
    use crate::errors::{DomainError, ValidationFailure};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date")
    }

    fn invoice() -> Invoice {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().expect("timestamp");
        derive_invoice(
            &quotation(QuotationStatus::Accepted),
            &request(RequestStatus::Accepted),
            Decimal::ZERO,
            7,
            now,
        )
        .expect("accepted quotation")
    }

    fn draft(amount: i64, offset_days: i64) -> BreakupDraft {
        BreakupDraft {
            amount: Decimal::from(amount),
            due_date: today() + Duration::days(offset_days),
            description: None,
        }
    }

    fn plan(drafts: &[BreakupDraft]) -> Result<Vec<crate::domain::invoice::PaymentBreakup>, ValidationFailure> {
        plan_breakups(&invoice(), drafts, today(), 10, Decimal::new(1, 2), Utc::now())
    }

    #[test]
    fn invoice_applies_tcs_and_snapshots_the_client() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().expect("timestamp");
        let invoice = derive_invoice(
            &quotation(QuotationStatus::Accepted),
            &request(RequestStatus::Accepted),
            Decimal::new(5, 1),
            7,
            now,
        )
        .expect("accepted quotation");

        assert_eq!(invoice.base_amount, Decimal::from(30_000));
        assert_eq!(invoice.tcs_amount, Decimal::from(150));
        assert_eq!(invoice.total_amount, Decimal::from(30_150));
        assert_eq!(invoice.advance_amount, Decimal::from(6_000));
        assert_eq!(invoice.status, InvoiceStatus::VerificationPending);
        assert_eq!(invoice.due_date, today() + Duration::days(7));
        assert_eq!(invoice.client.name, "Asha Menon");
        assert!(invoice.invoice_number.starts_with("INV-20260310-"));
        assert_eq!(invoice.invoice_number.len(), "INV-20260310-".len() + 8);
    }

    #[test]
    fn unaccepted_quotation_cannot_be_invoiced() {
        let error = derive_invoice(
            &quotation(QuotationStatus::Sent),
            &request(RequestStatus::Quoted),
            Decimal::ZERO,
            7,
            Utc::now(),
        )
        .expect_err("sent quotation");
        assert!(matches!(error, DomainError::QuotationNotAccepted { ref status, .. } if status == "SENT"));
    }

    #[test]
    fn schedule_is_persisted_in_order_as_pending() {
        let breakups = plan(&[draft(10_000, 1), draft(12_000, 7), draft(8_000, 14)]).expect("valid plan");

        assert_eq!(breakups.len(), 3);
        assert_eq!(breakups[1].sequence, 2);
        assert!(breakups.iter().all(|breakup| breakup.status == BreakupStatus::Pending));
        assert!(breakups.iter().all(|breakup| breakup.remaining_amount == breakup.amount));
    }

    #[test]
    fn sum_mismatch_reports_expected_and_actual() {
        let error = plan(&[draft(10_000, 1), draft(12_000, 7), draft(7_000, 14)]).expect_err("short");
        assert_eq!(
            error,
            ValidationFailure::AmountMismatch {
                expected: Decimal::from(30_000),
                actual: Decimal::from(29_000)
            }
        );
    }

    fn draft_at(amount: &str, offset_days: i64) -> BreakupDraft {
        BreakupDraft {
            amount: amount.parse().expect("decimal"),
            due_date: today() + Duration::days(offset_days),
            description: None,
        }
    }

    #[test]
    fn sub_paisa_drafts_are_checked_after_rounding() {
        let error = plan(&[
            draft_at("10000.005", 1),
            draft_at("10000.005", 7),
            draft_at("9999.995", 14),
        ])
        .expect_err("rounds to 30000.02");
        assert_eq!(
            error,
            ValidationFailure::AmountMismatch {
                expected: Decimal::from(30_000),
                actual: "30000.02".parse().expect("decimal")
            }
        );

        let breakups = plan(&[
            draft_at("10000.005", 1),
            draft_at("9999.99", 7),
            draft_at("9999.996", 14),
        ])
        .expect("rounds to the total");
        let stored: Decimal = breakups.iter().map(|breakup| breakup.amount).sum();
        assert_eq!(stored, Decimal::from(30_000));
    }

    #[test]
    fn tolerated_difference_lands_on_the_last_installment() {
        let breakups = plan(&[draft(10_000, 1), draft(10_000, 7), draft_at("9999.99", 14)])
            .expect("within tolerance");

        let stored: Decimal = breakups.iter().map(|breakup| breakup.amount).sum();
        assert_eq!(stored, invoice().total_amount);
        assert_eq!(breakups[2].amount, Decimal::from(10_000));
        assert_eq!(breakups[2].remaining_amount, Decimal::from(10_000));
    }

    #[test]
    fn count_is_checked_before_sum() {
        let drafts: Vec<BreakupDraft> = (0..11).map(|offset| draft(1_000, offset)).collect();
        assert_eq!(
            plan(&drafts).expect_err("eleven installments"),
            ValidationFailure::TooManyInstallments { count: 11, max: 10 }
        );
        assert!(matches!(
            plan(&[]).expect_err("empty"),
            ValidationFailure::InvalidField { field: "breakups", .. }
        ));
    }

    #[test]
    fn past_and_unordered_dates_are_rejected() {
        let past = plan(&[draft(15_000, -1), draft(15_000, 3)]).expect_err("yesterday");
        assert!(matches!(past, ValidationFailure::PastDueDate { index: 1, .. }));

        let unordered = plan(&[draft(15_000, 5), draft(15_000, 3)]).expect_err("out of order");
        assert!(matches!(
            unordered,
            ValidationFailure::UnorderedDueDates { index: 2, previous_index: 1, .. }
        ));

        let zero = plan(&[draft(0, 1), draft(30_000, 3)]).expect_err("zero amount");
        assert_eq!(zero, ValidationFailure::InvalidAmount(Decimal::ZERO));
    }

    #[test]
    fn unscheduled_invoice_is_one_installment() {
        let invoice = invoice();
        let breakup = implicit_breakup(&invoice, Utc::now());

        assert_eq!(breakup.amount, invoice.total_amount);
        assert_eq!(breakup.due_date, invoice.due_date);
        assert_eq!(days_overdue(&breakup, invoice.due_date + Duration::days(3)), Some(3));
        assert_eq!(days_overdue(&breakup, invoice.due_date), None);
    }
}
