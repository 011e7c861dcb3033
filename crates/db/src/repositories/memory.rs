use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tourdesk_core::audit::{Activity, Notification};
use tourdesk_core::domain::invoice::{Invoice, PaymentBreakup};
use tourdesk_core::domain::leave::{Leave, LeaveFilter};
use tourdesk_core::domain::payment::{Payment, PaymentAllocation, PaymentFilter};
use tourdesk_core::domain::quotation::{Quotation, QuotationStatus};
use tourdesk_core::domain::request::{AssignmentSlot, RequestFilter, TravelRequest};
use tourdesk_core::domain::user::{Role, User};
use tourdesk_core::domain::{
    InvoiceId, LeaveId, NotificationId, PaymentId, QuotationId, RequestId, UserId,
};
use tourdesk_core::store::{AssignmentClaim, ClaimOutcome, LockScope, Store, StoreError, StoreTx};

#[derive(Clone, Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    requests: BTreeMap<RequestId, TravelRequest>,
    quotations: BTreeMap<QuotationId, Quotation>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    breakups: Vec<PaymentBreakup>,
    payments: BTreeMap<PaymentId, Payment>,
    allocations: Vec<PaymentAllocation>,
    leaves: BTreeMap<LeaveId, Leave>,
    activities: Vec<Activity>,
    notifications: BTreeMap<NotificationId, Notification>,
}

/// Process-local store for tests and demos. A transaction holds the store exclusively and
/// works on a snapshot; commit swaps the snapshot in, drop discards it.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) {
    items.sort_by(|left, right| created_at(right).cmp(&created_at(left)));
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn user(&mut self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.get(id).cloned())
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.values().find(|user| user.email == email).cloned())
    }

    async fn users(&mut self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .working
            .users
            .values()
            .filter(|user| role.map_or(true, |role| user.role == role))
            .cloned()
            .collect();
        users.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(users)
    }

    async fn put_user(&mut self, user: &User) -> Result<(), StoreError> {
        let taken = self.working.users.values().any(|other| other.email == user.email && other.id != user.id);
        if taken {
            return Err(StoreError::Duplicate { entity: "user", key: user.email.clone() });
        }
        self.working.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn request(&mut self, id: &RequestId) -> Result<Option<TravelRequest>, StoreError> {
        Ok(self.working.requests.get(id).cloned())
    }

    async fn requests(&mut self, filter: &RequestFilter) -> Result<Vec<TravelRequest>, StoreError> {
        let mut requests: Vec<TravelRequest> =
            self.working.requests.values().filter(|request| filter.matches(request)).cloned().collect();
        newest_first(&mut requests, |request| request.created_at);
        Ok(requests)
    }

    async fn put_request(&mut self, request: &TravelRequest) -> Result<(), StoreError> {
        self.working.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn claim_request(&mut self, claim: &AssignmentClaim) -> Result<ClaimOutcome, StoreError> {
        let held = self
            .working
            .requests
            .values()
            .filter(|request| {
                request.status.counts_toward_workload()
                    && request.assignee(claim.slot) == Some(&claim.user_id)
            })
            .count();

        let Some(request) = self.working.requests.get_mut(&claim.request_id) else {
            return Ok(ClaimOutcome::Missing);
        };
        if request.assignee(claim.slot).is_some() {
            return Ok(ClaimOutcome::AlreadyAssigned);
        }
        if held >= claim.limit as usize {
            return Ok(ClaimOutcome::LimitReached);
        }

        match claim.slot {
            AssignmentSlot::Sales => request.assigned_sales_id = Some(claim.user_id.clone()),
            AssignmentSlot::Operations => request.assigned_ops_id = Some(claim.user_id.clone()),
        }
        request.updated_at = claim.at;
        Ok(ClaimOutcome::Claimed(request.clone()))
    }

    async fn quotation(&mut self, id: &QuotationId) -> Result<Option<Quotation>, StoreError> {
        Ok(self.working.quotations.get(id).cloned())
    }

    async fn quotations_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Vec<Quotation>, StoreError> {
        let mut quotations: Vec<Quotation> = self
            .working
            .quotations
            .values()
            .filter(|quotation| &quotation.request_id == request_id)
            .cloned()
            .collect();
        quotations.sort_by_key(|quotation| (quotation.version, quotation.created_at));
        Ok(quotations)
    }

    async fn quotations_by_status(
        &mut self,
        status: QuotationStatus,
    ) -> Result<Vec<Quotation>, StoreError> {
        let mut quotations: Vec<Quotation> = self
            .working
            .quotations
            .values()
            .filter(|quotation| quotation.status == status)
            .cloned()
            .collect();
        quotations.sort_by_key(|quotation| quotation.created_at);
        Ok(quotations)
    }

    async fn put_quotation(&mut self, quotation: &Quotation) -> Result<(), StoreError> {
        self.working.quotations.insert(quotation.id.clone(), quotation.clone());
        Ok(())
    }

    async fn invoice(&mut self, id: &InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.working.invoices.get(id).cloned())
    }

    async fn invoice_for_quotation(
        &mut self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .working
            .invoices
            .values()
            .find(|invoice| &invoice.quotation_id == quotation_id)
            .cloned())
    }

    async fn invoice_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .working
            .invoices
            .values()
            .filter(|invoice| &invoice.request_id == request_id)
            .max_by_key(|invoice| invoice.created_at)
            .cloned())
    }

    async fn invoices(&mut self) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<Invoice> = self.working.invoices.values().cloned().collect();
        invoices.sort_by_key(|invoice| invoice.created_at);
        Ok(invoices)
    }

    async fn put_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        let clash = self.working.invoices.values().any(|other| {
            other.id != invoice.id
                && (other.quotation_id == invoice.quotation_id
                    || other.invoice_number == invoice.invoice_number)
        });
        if clash {
            return Err(StoreError::Duplicate {
                entity: "invoice",
                key: invoice.quotation_id.to_string(),
            });
        }
        self.working.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(())
    }

    /// Every transaction already holds the whole store.
    async fn lock(&mut self, _scope: &LockScope) -> Result<(), StoreError> {
        Ok(())
    }

    async fn breakups(&mut self, invoice_id: &InvoiceId) -> Result<Vec<PaymentBreakup>, StoreError> {
        let mut breakups: Vec<PaymentBreakup> = self
            .working
            .breakups
            .iter()
            .filter(|breakup| &breakup.invoice_id == invoice_id)
            .cloned()
            .collect();
        breakups.sort_by_key(|breakup| breakup.sequence);
        Ok(breakups)
    }

    async fn put_breakup(&mut self, breakup: &PaymentBreakup) -> Result<(), StoreError> {
        let breakups = &mut self.working.breakups;
        if let Some(existing) = breakups.iter_mut().find(|existing| existing.id == breakup.id) {
            *existing = breakup.clone();
            return Ok(());
        }
        if breakups
            .iter()
            .any(|existing| existing.invoice_id == breakup.invoice_id && existing.sequence == breakup.sequence)
        {
            return Err(StoreError::Duplicate {
                entity: "payment breakup",
                key: format!("{}#{}", breakup.invoice_id, breakup.sequence),
            });
        }
        breakups.push(breakup.clone());
        Ok(())
    }

    async fn payment(&mut self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.working.payments.get(id).cloned())
    }

    async fn payments(&mut self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> =
            self.working.payments.values().filter(|payment| filter.matches(payment)).cloned().collect();
        payments.sort_by_key(|payment| payment.created_at);
        Ok(payments)
    }

    async fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.working.payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn allocations_for_payment(
        &mut self,
        payment_id: &PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        Ok(self
            .working
            .allocations
            .iter()
            .filter(|allocation| &allocation.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn allocations_for_invoice(
        &mut self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        Ok(self
            .working
            .allocations
            .iter()
            .filter(|allocation| &allocation.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn append_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        if self.working.allocations.iter().any(|existing| existing.id == allocation.id) {
            return Err(StoreError::Duplicate {
                entity: "payment allocation",
                key: allocation.id.to_string(),
            });
        }
        self.working.allocations.push(allocation.clone());
        Ok(())
    }

    async fn leave(&mut self, id: &LeaveId) -> Result<Option<Leave>, StoreError> {
        Ok(self.working.leaves.get(id).cloned())
    }

    async fn leaves(&mut self, filter: &LeaveFilter) -> Result<Vec<Leave>, StoreError> {
        let mut leaves: Vec<Leave> =
            self.working.leaves.values().filter(|leave| filter.matches(leave)).cloned().collect();
        leaves.sort_by_key(|leave| (leave.range.start, leave.created_at));
        Ok(leaves)
    }

    async fn put_leave(&mut self, leave: &Leave) -> Result<(), StoreError> {
        self.working.leaves.insert(leave.id.clone(), leave.clone());
        Ok(())
    }

    async fn append_activity(&mut self, activity: &Activity) -> Result<(), StoreError> {
        self.working.activities.push(activity.clone());
        Ok(())
    }

    async fn activities_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Vec<Activity>, StoreError> {
        Ok(self
            .working
            .activities
            .iter()
            .filter(|activity| &activity.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn notification(&mut self, id: &NotificationId) -> Result<Option<Notification>, StoreError> {
        Ok(self.working.notifications.get(id).cloned())
    }

    async fn notifications(&mut self, recipient: &UserId) -> Result<Vec<Notification>, StoreError> {
        let mut inbox: Vec<Notification> = self
            .working
            .notifications
            .values()
            .filter(|notification| &notification.recipient == recipient)
            .cloned()
            .collect();
        newest_first(&mut inbox, |notification| notification.created_at);
        Ok(inbox)
    }

    async fn put_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        self.working.notifications.insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use tourdesk_core::domain::user::{Role, User};
    use tourdesk_core::domain::UserId;
    use tourdesk_core::store::{Store, StoreError};

    use super::InMemoryStore;

    fn user(id: &str, email: &str) -> User {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid");
        User {
            id: UserId::from(id),
            email: email.to_owned(),
            name: id.to_owned(),
            phone: None,
            role: Role::Sales,
            active: true,
            can_see_cost_breakup: false,
            password_hash: "hash".to_owned(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dropped_transactions_leave_no_trace() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.expect("begin");
            tx.put_user(&user("u-1", "a@example.com")).await.expect("put");
        }

        let mut tx = store.begin().await.expect("begin");
        assert_eq!(tx.user(&UserId::from("u-1")).await.expect("read"), None);
    }

    #[tokio::test]
    async fn committed_writes_are_visible_to_later_transactions() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.put_user(&user("u-1", "a@example.com")).await.expect("put");
        tx.commit().await.expect("commit");

        let mut tx = store.begin().await.expect("begin");
        assert!(tx.user_by_email("a@example.com").await.expect("read").is_some());
    }

    #[tokio::test]
    async fn email_uniqueness_is_enforced() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.put_user(&user("u-1", "a@example.com")).await.expect("put");
        let error = tx.put_user(&user("u-2", "a@example.com")).await.expect_err("duplicate");
        assert!(matches!(error, StoreError::Duplicate { entity: "user", .. }));
    }
}
