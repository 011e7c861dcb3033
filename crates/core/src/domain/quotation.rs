use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::ServiceFlags;
use crate::domain::{QuotationId, RequestId, UserId};
use crate::errors::{DomainError, ValidationFailure};

wire_enum!(QuotationStatus {
    Draft => "DRAFT",
    Sent => "SENT",
    Accepted => "ACCEPTED",
    Rejected => "REJECTED",
    Expired => "EXPIRED",
});

impl QuotationStatus {
    /// Quotations a customer may still act on, or that staff are still preparing.
    pub fn is_live(self) -> bool {
        matches!(self, QuotationStatus::Draft | QuotationStatus::Sent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItineraryDay {
    pub day: u32,
    pub title: String,
    #[serde(default)]
    pub activities: Vec<String>,
    pub hotel: Option<String>,
    #[serde(default)]
    pub meals: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub subtotal: Decimal,
    pub taxes: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub per_person: Decimal,
    pub deposit_due: Decimal,
    pub currency: String,
}

impl Pricing {
    pub fn expected_total(&self) -> Decimal {
        self.subtotal + self.taxes - self.discount
    }

    /// Checks the authored aggregates. Totals are stored as written, never recomputed.
    pub fn validate(&self, tolerance: Decimal) -> Result<(), ValidationFailure> {
        let figures = [
            ("subtotal", self.subtotal),
            ("taxes", self.taxes),
            ("discount", self.discount),
            ("total", self.total),
            ("per_person", self.per_person),
            ("deposit_due", self.deposit_due),
        ];
        if let Some((field, _)) = figures.iter().find(|(_, value)| value.is_sign_negative()) {
            return Err(ValidationFailure::field(*field, "must not be negative"));
        }

        let expected = self.expected_total();
        if (self.total - expected).abs() > tolerance {
            return Err(ValidationFailure::PricingMismatch { expected, total: self.total });
        }
        if self.deposit_due > self.total {
            return Err(ValidationFailure::field(
                "deposit_due",
                format!("{} exceeds the total {}", self.deposit_due, self.total),
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(ValidationFailure::field("currency", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationData {
    pub trip_title: String,
    #[serde(default)]
    pub services: ServiceFlags,
    #[serde(default)]
    pub itinerary: Vec<ItineraryDay>,
    pub pricing: Pricing,
    #[serde(default)]
    pub inclusions: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    pub terms: Option<String>,
}

/// Internal supplier-cost line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakupItem {
    pub category: String,
    pub name: String,
    pub supplier: Option<String>,
    pub unit_cost: Decimal,
    pub quantity: u32,
    pub total: Decimal,
}

impl CostBreakupItem {
    pub fn validate(&self, tolerance: Decimal) -> Result<(), ValidationFailure> {
        if self.unit_cost.is_sign_negative() {
            return Err(ValidationFailure::field("cost_breakup.unit_cost", "must not be negative"));
        }
        let expected = self.unit_cost * Decimal::from(self.quantity);
        if (self.total - expected).abs() > tolerance {
            return Err(ValidationFailure::field(
                "cost_breakup.total",
                format!("{} for `{}` should be {expected}", self.total, self.name),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub request_id: RequestId,
    pub version: u32,
    pub status: QuotationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub data: QuotationData,
    pub cost_breakup: Vec<CostBreakupItem>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quotation {
    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        use QuotationStatus::{Accepted, Draft, Expired, Rejected, Sent};

        matches!(
            (self.status, next),
            (Draft, Sent)
                | (Sent, Sent)
                | (Sent, Accepted)
                | (Draft, Rejected)
                | (Sent, Rejected)
                | (Sent, Expired)
        )
    }

    pub fn transition_to(
        &mut self,
        next: QuotationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "quotation",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == QuotationStatus::Sent && self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn project(&self, include_cost_breakup: bool) -> QuotationView {
        QuotationView {
            id: self.id.clone(),
            request_id: self.request_id.clone(),
            version: self.version,
            status: self.status,
            expires_at: self.expires_at,
            published_at: self.published_at,
            accepted_at: self.accepted_at,
            data: self.data.clone(),
            cost_breakup: include_cost_breakup.then(|| self.cost_breakup.clone()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotationView {
    pub id: QuotationId,
    pub request_id: RequestId,
    pub version: u32,
    pub status: QuotationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub data: QuotationData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_breakup: Option<Vec<CostBreakupItem>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{Pricing, Quotation, QuotationData, QuotationStatus};
    use crate::domain::request::ServiceFlags;
    use crate::domain::{QuotationId, RequestId, UserId};

    pub fn pricing(subtotal: i64, taxes: i64, discount: i64) -> Pricing {
        let total = subtotal + taxes - discount;
        Pricing {
            subtotal: Decimal::from(subtotal),
            taxes: Decimal::from(taxes),
            discount: Decimal::from(discount),
            total: Decimal::from(total),
            per_person: Decimal::from(total / 2),
            deposit_due: Decimal::from(total / 5),
            currency: "INR".to_owned(),
        }
    }

    pub fn quotation(status: QuotationStatus) -> Quotation {
        let created = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp");
        Quotation {
            id: QuotationId::from("quo-1"),
            request_id: RequestId::from("req-1"),
            version: 1,
            status,
            expires_at: None,
            published_at: None,
            accepted_at: None,
            data: QuotationData {
                trip_title: "Kerala backwaters".to_owned(),
                services: ServiceFlags { holiday_package: true, ..ServiceFlags::default() },
                itinerary: Vec::new(),
                pricing: pricing(27_000, 3_000, 0),
                inclusions: Vec::new(),
                exclusions: Vec::new(),
                terms: None,
            },
            cost_breakup: Vec::new(),
            created_by: UserId::from("sales-1"),
            created_at: created,
            updated_at: created,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::fixtures::{pricing, quotation};
    use super::{CostBreakupItem, QuotationStatus};
    use crate::errors::{DomainError, ValidationFailure};

    #[test]
    fn pricing_within_tolerance_is_accepted() {
        let mut figures = pricing(10_000, 1_800, 500);
        figures.total += Decimal::new(1, 2);
        figures.validate(Decimal::new(1, 2)).expect("one cent of rounding is tolerated");
    }

    #[test]
    fn pricing_mismatch_reports_expected_total() {
        let mut figures = pricing(10_000, 1_800, 500);
        figures.total = Decimal::from(12_000);

        let error = figures.validate(Decimal::new(1, 2)).expect_err("mismatch");
        assert_eq!(
            error,
            ValidationFailure::PricingMismatch {
                expected: Decimal::from(11_300),
                total: Decimal::from(12_000)
            }
        );
    }

    #[test]
    fn acceptance_requires_sent() {
        let mut draft = quotation(QuotationStatus::Draft);
        let error =
            draft.transition_to(QuotationStatus::Accepted, Utc::now()).expect_err("draft->accepted");
        assert!(matches!(error, DomainError::InvalidTransition { entity: "quotation", .. }));

        let mut sent = quotation(QuotationStatus::Sent);
        sent.transition_to(QuotationStatus::Accepted, Utc::now()).expect("sent->accepted");
        assert!(sent.transition_to(QuotationStatus::Rejected, Utc::now()).is_err());
    }

    #[test]
    fn lapse_is_measured_against_expiry() {
        let now = Utc::now();
        let mut sent = quotation(QuotationStatus::Sent);
        sent.expires_at = Some(now - Duration::minutes(1));
        assert!(sent.is_lapsed(now));

        sent.expires_at = Some(now + Duration::days(3));
        assert!(!sent.is_lapsed(now));
    }

    #[test]
    fn cost_lines_must_multiply_out() {
        let line = CostBreakupItem {
            category: "hotel".to_owned(),
            name: "Lake Palace".to_owned(),
            supplier: None,
            unit_cost: Decimal::from(4_500),
            quantity: 3,
            total: Decimal::from(13_000),
        };
        assert!(line.validate(Decimal::new(1, 2)).is_err());
    }

    #[test]
    fn projection_drops_cost_breakup_unless_permitted() {
        let sent = quotation(QuotationStatus::Sent);
        assert!(sent.project(false).cost_breakup.is_none());
        assert_eq!(sent.project(true).cost_breakup, Some(Vec::new()));
    }
}
