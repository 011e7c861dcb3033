use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::Role;
use crate::domain::{RequestId, UserId};
use crate::errors::{DomainError, ValidationFailure};

wire_enum!(RequestStatus {
    Draft => "DRAFT",
    Pending => "PENDING",
    Quoted => "QUOTED",
    Accepted => "ACCEPTED",
    Paid => "PAID",
    Rejected => "REJECTED",
    Expired => "EXPIRED",
    CustomerCancelled => "CUSTOMER_CANCELLED",
});

impl RequestStatus {
    /// Statuses that count toward a rep's assignment cap.
    pub const WORKLOAD: &'static [RequestStatus] = &[RequestStatus::Pending, RequestStatus::Quoted];

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Expired | RequestStatus::Paid)
    }

    pub fn counts_toward_workload(self) -> bool {
        Self::WORKLOAD.contains(&self)
    }
}

wire_enum!(AssignmentSlot {
    Sales => "sales",
    Operations => "operations",
});

impl AssignmentSlot {
    pub fn for_role(role: Role) -> Option<Self> {
        match role {
            Role::Sales => Some(Self::Sales),
            Role::Operations => Some(Self::Operations),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceFlags {
    pub holiday_package: bool,
    pub mice: bool,
    pub hotel_only: bool,
    pub sightseeing: bool,
    pub visa: bool,
    pub transport: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub customer_id: Option<UserId>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripParameters {
    pub destination: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub preferred_dates: Option<String>,
    pub people_count: u32,
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
    #[serde(default)]
    pub travel_vibe: Vec<String>,
    #[serde(default)]
    pub services: ServiceFlags,
    pub special_requirements: Option<String>,
}

impl TripParameters {
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        if self.destination.trim().is_empty() {
            return Err(ValidationFailure::field("destination", "must not be empty"));
        }
        if self.people_count == 0 {
            return Err(ValidationFailure::field("people_count", "must be at least 1"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(ValidationFailure::InvalidDateRange { start, end });
            }
        }
        if let (Some(min), Some(max)) = (self.budget_min, self.budget_max) {
            if min > max {
                return Err(ValidationFailure::field(
                    "budget_min",
                    format!("{min} exceeds budget_max {max}"),
                ));
            }
        }
        if self.budget_min.is_some_and(|min| min.is_sign_negative()) {
            return Err(ValidationFailure::field("budget_min", "must not be negative"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRequest {
    pub id: RequestId,
    pub title: String,
    pub client: ClientRef,
    pub trip: TripParameters,
    pub status: RequestStatus,
    pub assigned_sales_id: Option<UserId>,
    pub assigned_ops_id: Option<UserId>,
    pub is_salesperson_validated: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TravelRequest {
    pub fn assignee(&self, slot: AssignmentSlot) -> Option<&UserId> {
        match slot {
            AssignmentSlot::Sales => self.assigned_sales_id.as_ref(),
            AssignmentSlot::Operations => self.assigned_ops_id.as_ref(),
        }
    }

    pub fn is_assigned_to(&self, user_id: &UserId) -> bool {
        self.assigned_sales_id.as_ref() == Some(user_id)
            || self.assigned_ops_id.as_ref() == Some(user_id)
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        self.client.customer_id.as_ref() == Some(user_id)
    }

    pub fn set_status(&mut self, status: RequestStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::Conflict(format!(
                "request {} is {} and can no longer change",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// The canonical request narrowed to what `role` may see.
    pub fn project(&self, role: Role, delegated: bool) -> RequestView {
        let staff = role.is_staff();
        RequestView {
            id: self.id.clone(),
            title: self.title.clone(),
            client: self.client.clone(),
            trip: self.trip.clone(),
            status: self.status,
            assigned_sales_id: staff.then(|| self.assigned_sales_id.clone()).flatten(),
            assigned_ops_id: staff.then(|| self.assigned_ops_id.clone()).flatten(),
            is_salesperson_validated: staff.then_some(self.is_salesperson_validated),
            delegated: staff && delegated,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestView {
    pub id: RequestId,
    pub title: String,
    pub client: ClientRef,
    pub trip: TripParameters,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_sales_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_ops_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_salesperson_validated: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub delegated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store-level query over requests. Empty collections mean "no constraint".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub customer_id: Option<UserId>,
    pub assigned_to: Vec<UserId>,
    pub statuses: Vec<RequestStatus>,
    pub unassigned: Option<AssignmentSlot>,
    pub validated: Option<bool>,
}

impl RequestFilter {
    pub fn matches(&self, request: &TravelRequest) -> bool {
        if let Some(customer_id) = &self.customer_id {
            if !request.is_owned_by(customer_id) {
                return false;
            }
        }
        if !self.assigned_to.is_empty()
            && !self.assigned_to.iter().any(|user_id| request.is_assigned_to(user_id))
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&request.status) {
            return false;
        }
        if let Some(slot) = self.unassigned {
            if request.assignee(slot).is_some() {
                return false;
            }
        }
        if let Some(validated) = self.validated {
            if request.is_salesperson_validated != validated {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use super::{ClientRef, RequestStatus, ServiceFlags, TravelRequest, TripParameters};
    use crate::domain::{RequestId, UserId};

    pub fn request(status: RequestStatus) -> TravelRequest {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp");
        TravelRequest {
            id: RequestId::from("req-1"),
            title: "Kerala backwaters".to_owned(),
            client: ClientRef {
                customer_id: Some(UserId::from("cust-1")),
                name: "Asha Menon".to_owned(),
                email: "asha@example.com".to_owned(),
                phone: None,
                country_code: Some("IN".to_owned()),
            },
            trip: TripParameters {
                destination: "Alleppey".to_owned(),
                start_date: None,
                end_date: None,
                preferred_dates: Some("late April".to_owned()),
                people_count: 2,
                budget_min: None,
                budget_max: None,
                travel_vibe: vec!["relaxed".to_owned()],
                services: ServiceFlags { holiday_package: true, ..ServiceFlags::default() },
                special_requirements: None,
            },
            status,
            assigned_sales_id: None,
            assigned_ops_id: None,
            is_salesperson_validated: false,
            created_by: UserId::from("cust-1"),
            created_at: created,
            updated_at: created,
        }
    }
}
