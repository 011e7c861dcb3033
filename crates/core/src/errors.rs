use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::request::AssignmentSlot;
use crate::domain::user::Role;
use crate::flows::FlowTransitionError;

/// Coarse classification shared by every surface (HTTP status, CLI exit class).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    ValidationFailed,
    AssignmentLimitExceeded,
    ExternalServiceFailure,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ValidationFailed => "validation_failed",
            Self::AssignmentLimitExceeded => "assignment_limit_exceeded",
            Self::ExternalServiceFailure => "external_service_failure",
            Self::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("pricing total {total} does not match subtotal + taxes - discount = {expected}")]
    PricingMismatch { expected: Decimal, total: Decimal },
    #[error("{count} installments requested, at most {max} allowed")]
    TooManyInstallments { count: usize, max: usize },
    #[error("installments sum to {actual} but the invoice total is {expected}")]
    AmountMismatch { expected: Decimal, actual: Decimal },
    #[error("installment {index} is due {due_date}, which is before today ({today})")]
    PastDueDate { index: usize, due_date: NaiveDate, today: NaiveDate },
    #[error("installment {index} is due {due_date}, before installment {previous_index} ({previous})")]
    UnorderedDueDates { index: usize, due_date: NaiveDate, previous_index: usize, previous: NaiveDate },
    #[error("{backup_id} is already backup on leave {leave_id} ({start} to {end})")]
    OverlappingLeave { backup_id: String, leave_id: String, start: NaiveDate, end: NaiveDate },
    #[error("amount must be greater than zero, got {0}")]
    InvalidAmount(Decimal),
    #[error("end date {end} is before start date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("{field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationFailure {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidTransition { entity: &'static str, from: String, to: String },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("the {slot} slot of request {request_id} is already assigned")]
    AlreadyAssigned { request_id: String, slot: AssignmentSlot },
    #[error("{user_id} already holds the maximum of {limit} active requests")]
    AssignmentLimitExceeded { user_id: String, limit: u32 },
    #[error("quotation {0} is already accepted")]
    AlreadyAccepted(String),
    #[error("quotation {quotation_id} lapsed at {expired_at}")]
    QuotationLapsed { quotation_id: String, expired_at: DateTime<Utc> },
    #[error("quotation {quotation_id} is {status}, not ACCEPTED")]
    QuotationNotAccepted { quotation_id: String, status: String },
    #[error("invoice {invoice_number} already exists for quotation {quotation_id}")]
    InvoiceAlreadyExists { quotation_id: String, invoice_number: String },
    #[error("invoice {0} already has a payment schedule")]
    BreakupAlreadyPlanned(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::AssignmentLimitExceeded { .. } => ErrorKind::AssignmentLimitExceeded,
            _ => ErrorKind::Conflict,
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("credential is missing")]
    Missing,
    #[error("credential is malformed or its signature is invalid")]
    Malformed,
    #[error("credential has expired")]
    Expired,
    #[error("account is inactive")]
    Inactive,
    #[error("email or password is incorrect")]
    BadCredentials,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(AuthFailure),
    #[error("{role} is not allowed to {action}")]
    Forbidden { role: Role, action: String },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<ValidationFailure> for ApplicationError {
    fn from(value: ValidationFailure) -> Self {
        Self::Domain(DomainError::Validation(value))
    }
}

impl From<FlowTransitionError> for ApplicationError {
    fn from(value: FlowTransitionError) -> Self {
        Self::Domain(DomainError::FlowTransition(value))
    }
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Domain(error) => error.kind(),
            Self::Integration(_) => ErrorKind::ExternalServiceFailure,
            Self::Persistence(_) | Self::Configuration(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Sign in again to continue.",
            Self::Forbidden { .. } => "Your role does not permit this action.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed state and this action no longer applies. Refresh and retry."
            }
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Detail safe to return to the caller. Internal failures never expose their cause.
    pub fn detail(&self) -> &str {
        match self {
            Self::Internal { .. } => self.user_message(),
            Self::Unauthorized { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let kind = value.kind();
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match kind {
            ErrorKind::Unauthenticated => Self::Unauthorized { message, correlation_id },
            ErrorKind::Forbidden => Self::Forbidden { message, correlation_id },
            ErrorKind::NotFound => Self::NotFound { message, correlation_id },
            ErrorKind::Conflict | ErrorKind::AssignmentLimitExceeded => {
                Self::Conflict { message, correlation_id }
            }
            ErrorKind::ValidationFailed => Self::BadRequest { message, correlation_id },
            ErrorKind::ExternalServiceFailure => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ErrorKind::Internal => match value {
                ApplicationError::Persistence(message) => {
                    Self::ServiceUnavailable { message, correlation_id }
                }
                _ => Self::Internal { message, correlation_id },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::user::Role;
    use crate::errors::{
        ApplicationError, AuthFailure, DomainError, ErrorKind, InterfaceError, ValidationFailure,
    };

    #[test]
    fn validation_failure_maps_to_bad_request_with_detail() {
        let interface = ApplicationError::from(ValidationFailure::AmountMismatch {
            expected: Decimal::from(30_000),
            actual: Decimal::from(29_000),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert!(interface.detail().contains("29000"));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn assignment_limit_is_a_distinct_conflict() {
        let error = ApplicationError::from(DomainError::AssignmentLimitExceeded {
            user_id: "sales-1".to_owned(),
            limit: 10,
        });
        assert_eq!(error.kind(), ErrorKind::AssignmentLimitExceeded);
        assert_eq!(error.kind().code(), "assignment_limit_exceeded");
        assert!(matches!(error.into_interface("req-2"), InterfaceError::Conflict { .. }));
    }

    #[test]
    fn auth_and_role_failures_keep_their_kind() {
        let expired = ApplicationError::Unauthenticated(AuthFailure::Expired);
        assert_eq!(expired.to_string(), "unauthenticated: credential has expired");
        assert!(matches!(expired.into_interface("req-3"), InterfaceError::Unauthorized { .. }));

        let forbidden =
            ApplicationError::Forbidden { role: Role::Customer, action: "view cost breakups".into() };
        assert_eq!(forbidden.to_string(), "customer is not allowed to view cost breakups");
        assert_eq!(forbidden.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal_without_leaking_cause() {
        let interface = ApplicationError::Configuration("token secret unreadable".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.detail(), "An unexpected internal error occurred.");
        assert_eq!(interface.correlation_id(), "req-5");
    }
}
