//! Persistence port. Every service operation runs inside one [`StoreTx`]; dropping a
//! transaction without committing discards its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{Activity, Notification};
use crate::domain::invoice::{Invoice, PaymentBreakup};
use crate::domain::leave::{Leave, LeaveFilter};
use crate::domain::payment::{Payment, PaymentAllocation, PaymentFilter};
use crate::domain::quotation::{Quotation, QuotationStatus};
use crate::domain::request::{AssignmentSlot, RequestFilter, TravelRequest};
use crate::domain::user::{Role, User};
use crate::domain::{
    InvoiceId, LeaveId, NotificationId, PaymentId, QuotationId, RequestId, UserId,
};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("could not decode stored {entity}: {reason}")]
    Decode { entity: &'static str, reason: String },
    #[error("{entity} with key `{key}` already exists")]
    Duplicate { entity: &'static str, key: String },
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate { entity, key } => ApplicationError::Domain(
                crate::errors::DomainError::Conflict(format!("{entity} `{key}` already exists")),
            ),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Atomic claim of an assignment slot, bounded by the claimant's live workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignmentClaim {
    pub request_id: RequestId,
    pub slot: AssignmentSlot,
    pub user_id: UserId,
    pub limit: u32,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(TravelRequest),
    AlreadyAssigned,
    LimitReached,
    Missing,
}

/// Write locks taken before a read-check-write sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockScope {
    Invoice(InvoiceId),
    LeaveBackup(UserId),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn user(&mut self, id: &UserId) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;
    async fn users(&mut self, role: Option<Role>) -> Result<Vec<User>, StoreError>;
    async fn put_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn request(&mut self, id: &RequestId) -> Result<Option<TravelRequest>, StoreError>;
    async fn requests(&mut self, filter: &RequestFilter) -> Result<Vec<TravelRequest>, StoreError>;
    async fn put_request(&mut self, request: &TravelRequest) -> Result<(), StoreError>;
    async fn claim_request(&mut self, claim: &AssignmentClaim) -> Result<ClaimOutcome, StoreError>;

    async fn quotation(&mut self, id: &QuotationId) -> Result<Option<Quotation>, StoreError>;
    async fn quotations_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Vec<Quotation>, StoreError>;
    async fn quotations_by_status(
        &mut self,
        status: QuotationStatus,
    ) -> Result<Vec<Quotation>, StoreError>;
    async fn put_quotation(&mut self, quotation: &Quotation) -> Result<(), StoreError>;

    async fn invoice(&mut self, id: &InvoiceId) -> Result<Option<Invoice>, StoreError>;
    async fn invoice_for_quotation(
        &mut self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Invoice>, StoreError>;
    async fn invoice_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Option<Invoice>, StoreError>;
    async fn invoices(&mut self) -> Result<Vec<Invoice>, StoreError>;
    async fn put_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn lock(&mut self, scope: &LockScope) -> Result<(), StoreError>;

    async fn breakups(&mut self, invoice_id: &InvoiceId) -> Result<Vec<PaymentBreakup>, StoreError>;
    async fn put_breakup(&mut self, breakup: &PaymentBreakup) -> Result<(), StoreError>;

    async fn payment(&mut self, id: &PaymentId) -> Result<Option<Payment>, StoreError>;
    async fn payments(&mut self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError>;
    async fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn allocations_for_payment(
        &mut self,
        payment_id: &PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError>;
    async fn allocations_for_invoice(
        &mut self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<PaymentAllocation>, StoreError>;
    async fn append_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError>;

    async fn leave(&mut self, id: &LeaveId) -> Result<Option<Leave>, StoreError>;
    async fn leaves(&mut self, filter: &LeaveFilter) -> Result<Vec<Leave>, StoreError>;
    async fn put_leave(&mut self, leave: &Leave) -> Result<(), StoreError>;

    async fn append_activity(&mut self, activity: &Activity) -> Result<(), StoreError>;
    async fn activities_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Vec<Activity>, StoreError>;

    async fn notification(&mut self, id: &NotificationId) -> Result<Option<Notification>, StoreError>;
    async fn notifications(&mut self, recipient: &UserId) -> Result<Vec<Notification>, StoreError>;
    async fn put_notification(&mut self, notification: &Notification) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
