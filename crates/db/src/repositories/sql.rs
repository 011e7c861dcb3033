use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite, Transaction};

use tourdesk_core::audit::{Activity, Notification};
use tourdesk_core::domain::invoice::{Invoice, PaymentBreakup};
use tourdesk_core::domain::leave::{DateRange, Leave, LeaveFilter, LeaveStatus};
use tourdesk_core::domain::payment::{Payment, PaymentAllocation, PaymentFilter};
use tourdesk_core::domain::quotation::{Quotation, QuotationStatus};
use tourdesk_core::domain::request::{AssignmentSlot, RequestFilter, RequestStatus, TravelRequest};
use tourdesk_core::domain::user::{Role, User};
use tourdesk_core::domain::{
    ActivityId, AllocationId, BreakupId, InvoiceId, LeaveId, NotificationId, PaymentId,
    QuotationId, RequestId, UserId,
};
use tourdesk_core::store::{AssignmentClaim, ClaimOutcome, LockScope, Store, StoreError, StoreTx};

use super::rows::{json, optional_timestamp, timestamp, write_failure, Columns, DbResultExt};
use crate::DbPool;

const USER_COLUMNS: &str = "id, email, name, phone, role, active, can_see_cost_breakup, \
    password_hash, created_at, updated_at";
const REQUEST_COLUMNS: &str = "id, title, client_json, trip_json, status, assigned_sales_id, \
    assigned_ops_id, is_salesperson_validated, created_by, created_at, updated_at";
const QUOTATION_COLUMNS: &str = "id, request_id, version, status, expires_at, published_at, \
    accepted_at, data_json, cost_breakup_json, created_by, created_at, updated_at";
const INVOICE_COLUMNS: &str = "id, invoice_number, quotation_id, request_id, client_json, \
    base_amount, tcs_percent, tcs_amount, total_amount, advance_amount, currency, status, \
    due_date, created_at, updated_at";
const BREAKUP_COLUMNS: &str = "id, invoice_id, sequence, description, amount, due_date, status, \
    paid_amount, remaining_amount, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, invoice_id, amount, method, kind, status, received_at, \
    verified_at, accountant_notes, operations_notes, proof_reference, submitted_by, \
    unallocated_amount, refund_review, created_at, updated_at";
const ALLOCATION_COLUMNS: &str = "id, payment_id, breakup_id, invoice_id, allocated_amount, \
    resulting_status, reverses, created_at";
const LEAVE_COLUMNS: &str =
    "id, user_id, backup_user_id, start_date, end_date, reason, status, created_at";
const ACTIVITY_COLUMNS: &str =
    "id, request_id, actor_id, actor_name, actor_role, action, notes, created_at";
const NOTIFICATION_COLUMNS: &str = "id, recipient_id, title, message, link, is_read, created_at";

/// SQLite-backed store. Each [`StoreTx`] wraps one database transaction.
#[derive(Clone)]
pub struct SqlStore {
    pool: DbPool,
}

impl SqlStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqlStore {
    /// Takes SQLite's write lock up front so a second writer waits on `busy_timeout`
    /// instead of failing when it upgrades a deferred read snapshot.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.db()?;
        Ok(Box::new(SqlTx { tx }))
    }
}

struct SqlTx {
    tx: Transaction<'static, Sqlite>,
}

fn slot_column(slot: AssignmentSlot) -> &'static str {
    match slot {
        AssignmentSlot::Sales => "assigned_sales_id",
        AssignmentSlot::Operations => "assigned_ops_id",
    }
}

fn workload_statuses() -> String {
    RequestStatus::WORKLOAD
        .iter()
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_in<'args>(query: &mut QueryBuilder<'args, Sqlite>, values: Vec<String>) {
    query.push(" IN (");
    let mut separated = query.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl StoreTx for SqlTx {
    async fn user(&mut self, id: &UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn users(&mut self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        let rows = match role {
            Some(role) => {
                sqlx::query(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE role = ? ORDER BY name ASC"
                ))
                .bind(role.as_str())
                .fetch_all(&mut *self.tx)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY name ASC"))
                    .fetch_all(&mut *self.tx)
                    .await
            }
        }
        .db()?;
        rows.iter().map(user_from_row).collect()
    }

    async fn put_user(&mut self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (
                id, email, name, phone, role, active, can_see_cost_breakup, password_hash,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                name = excluded.name,
                phone = excluded.phone,
                role = excluded.role,
                active = excluded.active,
                can_see_cost_breakup = excluded.can_see_cost_breakup,
                password_hash = excluded.password_hash,
                updated_at = excluded.updated_at",
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.phone.as_deref())
        .bind(user.role.as_str())
        .bind(i64::from(user.active))
        .bind(i64::from(user.can_see_cost_breakup))
        .bind(&user.password_hash)
        .bind(timestamp(user.created_at))
        .bind(timestamp(user.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| write_failure(error, "user", &user.email))?;
        Ok(())
    }

    async fn request(&mut self, id: &RequestId) -> Result<Option<TravelRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM travel_requests WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn requests(&mut self, filter: &RequestFilter) -> Result<Vec<TravelRequest>, StoreError> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM travel_requests WHERE 1 = 1"
        ));
        if let Some(customer_id) = &filter.customer_id {
            query.push(" AND customer_id = ").push_bind(customer_id.0.clone());
        }
        if !filter.statuses.is_empty() {
            query.push(" AND status");
            push_in(&mut query, filter.statuses.iter().map(|status| status.as_str().to_owned()).collect());
        }
        if !filter.assigned_to.is_empty() {
            let ids: Vec<String> = filter.assigned_to.iter().map(|id| id.0.clone()).collect();
            query.push(" AND (assigned_sales_id");
            push_in(&mut query, ids.clone());
            query.push(" OR assigned_ops_id");
            push_in(&mut query, ids);
            query.push(")");
        }
        if let Some(slot) = filter.unassigned {
            query.push(format!(" AND {} IS NULL", slot_column(slot)));
        }
        if let Some(validated) = filter.validated {
            query.push(" AND is_salesperson_validated = ").push_bind(i64::from(validated));
        }
        query.push(" ORDER BY created_at DESC");

        let rows = query.build().fetch_all(&mut *self.tx).await.db()?;
        rows.iter().map(request_from_row).collect()
    }

    async fn put_request(&mut self, request: &TravelRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO travel_requests (
                id, title, customer_id, client_json, trip_json, status, assigned_sales_id,
                assigned_ops_id, is_salesperson_validated, created_by, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                customer_id = excluded.customer_id,
                client_json = excluded.client_json,
                trip_json = excluded.trip_json,
                status = excluded.status,
                assigned_sales_id = excluded.assigned_sales_id,
                assigned_ops_id = excluded.assigned_ops_id,
                is_salesperson_validated = excluded.is_salesperson_validated,
                updated_at = excluded.updated_at",
        )
        .bind(request.id.as_str())
        .bind(&request.title)
        .bind(request.client.customer_id.as_ref().map(|id| id.0.clone()))
        .bind(json("request", &request.client)?)
        .bind(json("request", &request.trip)?)
        .bind(request.status.as_str())
        .bind(request.assigned_sales_id.as_ref().map(|id| id.0.clone()))
        .bind(request.assigned_ops_id.as_ref().map(|id| id.0.clone()))
        .bind(i64::from(request.is_salesperson_validated))
        .bind(request.created_by.as_str())
        .bind(timestamp(request.created_at))
        .bind(timestamp(request.updated_at))
        .execute(&mut *self.tx)
        .await
        .db()?;
        Ok(())
    }

    /// Check-and-set in one statement: the slot must be empty and the claimant's live
    /// workload below the limit at the moment of the write.
    async fn claim_request(&mut self, claim: &AssignmentClaim) -> Result<ClaimOutcome, StoreError> {
        let column = slot_column(claim.slot);
        let sql = format!(
            "UPDATE travel_requests SET {column} = ?, updated_at = ?
             WHERE id = ? AND {column} IS NULL
               AND (SELECT COUNT(*) FROM travel_requests
                    WHERE {column} = ? AND status IN ({})) < ?",
            workload_statuses()
        );
        let result = sqlx::query(&sql)
            .bind(claim.user_id.as_str())
            .bind(timestamp(claim.at))
            .bind(claim.request_id.as_str())
            .bind(claim.user_id.as_str())
            .bind(i64::from(claim.limit))
            .execute(&mut *self.tx)
            .await
            .db()?;

        let current = self.request(&claim.request_id).await?;
        Ok(match current {
            None => ClaimOutcome::Missing,
            Some(request) if result.rows_affected() == 1 => ClaimOutcome::Claimed(request),
            Some(request) if request.assignee(claim.slot).is_some() => ClaimOutcome::AlreadyAssigned,
            Some(_) => ClaimOutcome::LimitReached,
        })
    }

    async fn quotation(&mut self, id: &QuotationId) -> Result<Option<Quotation>, StoreError> {
        let row = sqlx::query(&format!("SELECT {QUOTATION_COLUMNS} FROM quotations WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(quotation_from_row).transpose()
    }

    async fn quotations_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Vec<Quotation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotations WHERE request_id = ?
             ORDER BY version ASC, created_at ASC"
        ))
        .bind(request_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(quotation_from_row).collect()
    }

    async fn quotations_by_status(
        &mut self,
        status: QuotationStatus,
    ) -> Result<Vec<Quotation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotations WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(quotation_from_row).collect()
    }

    async fn put_quotation(&mut self, quotation: &Quotation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO quotations (
                id, request_id, version, status, expires_at, published_at, accepted_at,
                data_json, cost_breakup_json, created_by, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                status = excluded.status,
                expires_at = excluded.expires_at,
                published_at = excluded.published_at,
                accepted_at = excluded.accepted_at,
                data_json = excluded.data_json,
                cost_breakup_json = excluded.cost_breakup_json,
                updated_at = excluded.updated_at",
        )
        .bind(quotation.id.as_str())
        .bind(quotation.request_id.as_str())
        .bind(i64::from(quotation.version))
        .bind(quotation.status.as_str())
        .bind(optional_timestamp(quotation.expires_at))
        .bind(optional_timestamp(quotation.published_at))
        .bind(optional_timestamp(quotation.accepted_at))
        .bind(json("quotation", &quotation.data)?)
        .bind(json("quotation", &quotation.cost_breakup)?)
        .bind(quotation.created_by.as_str())
        .bind(timestamp(quotation.created_at))
        .bind(timestamp(quotation.updated_at))
        .execute(&mut *self.tx)
        .await
        .db()?;
        Ok(())
    }

    async fn invoice(&mut self, id: &InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn invoice_for_quotation(
        &mut self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Invoice>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE quotation_id = ?"))
                .bind(quotation_id.as_str())
                .fetch_optional(&mut *self.tx)
                .await
                .db()?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn invoice_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE request_id = ?
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(request_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .db()?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn invoices(&mut self) -> Result<Vec<Invoice>, StoreError> {
        let rows =
            sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY created_at ASC"))
                .fetch_all(&mut *self.tx)
                .await
                .db()?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn put_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO invoices (
                id, invoice_number, quotation_id, request_id, client_json, base_amount,
                tcs_percent, tcs_amount, total_amount, advance_amount, currency, status,
                due_date, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                client_json = excluded.client_json,
                base_amount = excluded.base_amount,
                tcs_percent = excluded.tcs_percent,
                tcs_amount = excluded.tcs_amount,
                total_amount = excluded.total_amount,
                advance_amount = excluded.advance_amount,
                status = excluded.status,
                due_date = excluded.due_date,
                updated_at = excluded.updated_at",
        )
        .bind(invoice.id.as_str())
        .bind(&invoice.invoice_number)
        .bind(invoice.quotation_id.as_str())
        .bind(invoice.request_id.as_str())
        .bind(json("invoice", &invoice.client)?)
        .bind(invoice.base_amount.to_string())
        .bind(invoice.tcs_percent.to_string())
        .bind(invoice.tcs_amount.to_string())
        .bind(invoice.total_amount.to_string())
        .bind(invoice.advance_amount.to_string())
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(invoice.due_date.to_string())
        .bind(timestamp(invoice.created_at))
        .bind(timestamp(invoice.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| write_failure(error, "invoice", invoice.quotation_id.as_str()))?;
        Ok(())
    }

    /// Transactions already hold the database write lock; touching the row keeps the
    /// scope explicit for stores with finer-grained locking.
    async fn lock(&mut self, scope: &LockScope) -> Result<(), StoreError> {
        let (sql, key) = match scope {
            LockScope::Invoice(id) => {
                ("UPDATE invoices SET updated_at = updated_at WHERE id = ?", id.as_str())
            }
            LockScope::LeaveBackup(user_id) => {
                ("UPDATE users SET updated_at = updated_at WHERE id = ?", user_id.as_str())
            }
        };
        sqlx::query(sql).bind(key).execute(&mut *self.tx).await.db()?;
        Ok(())
    }

    async fn breakups(&mut self, invoice_id: &InvoiceId) -> Result<Vec<PaymentBreakup>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BREAKUP_COLUMNS} FROM payment_breakups WHERE invoice_id = ?
             ORDER BY sequence ASC"
        ))
        .bind(invoice_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(breakup_from_row).collect()
    }

    async fn put_breakup(&mut self, breakup: &PaymentBreakup) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_breakups (
                id, invoice_id, sequence, description, amount, due_date, status, paid_amount,
                remaining_amount, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                amount = excluded.amount,
                due_date = excluded.due_date,
                status = excluded.status,
                paid_amount = excluded.paid_amount,
                remaining_amount = excluded.remaining_amount,
                updated_at = excluded.updated_at",
        )
        .bind(breakup.id.as_str())
        .bind(breakup.invoice_id.as_str())
        .bind(i64::from(breakup.sequence))
        .bind(breakup.description.as_deref())
        .bind(breakup.amount.to_string())
        .bind(breakup.due_date.to_string())
        .bind(breakup.status.as_str())
        .bind(breakup.paid_amount.to_string())
        .bind(breakup.remaining_amount.to_string())
        .bind(timestamp(breakup.created_at))
        .bind(timestamp(breakup.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| {
            write_failure(error, "payment breakup", &format!("{}#{}", breakup.invoice_id, breakup.sequence))
        })?;
        Ok(())
    }

    async fn payment(&mut self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payments(&mut self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE 1 = 1"));
        if let Some(invoice_id) = &filter.invoice_id {
            query.push(" AND invoice_id = ").push_bind(invoice_id.0.clone());
        }
        if !filter.statuses.is_empty() {
            query.push(" AND status");
            push_in(&mut query, filter.statuses.iter().map(|status| status.as_str().to_owned()).collect());
        }
        if let Some(review) = filter.refund_review {
            query.push(" AND refund_review = ").push_bind(review.as_str().to_owned());
        }
        query.push(" ORDER BY created_at ASC");

        let rows = query.build().fetch_all(&mut *self.tx).await.db()?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn put_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (
                id, invoice_id, amount, method, kind, status, received_at, verified_at,
                accountant_notes, operations_notes, proof_reference, submitted_by,
                unallocated_amount, refund_review, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                amount = excluded.amount,
                method = excluded.method,
                kind = excluded.kind,
                status = excluded.status,
                received_at = excluded.received_at,
                verified_at = excluded.verified_at,
                accountant_notes = excluded.accountant_notes,
                operations_notes = excluded.operations_notes,
                proof_reference = excluded.proof_reference,
                submitted_by = excluded.submitted_by,
                unallocated_amount = excluded.unallocated_amount,
                refund_review = excluded.refund_review,
                updated_at = excluded.updated_at",
        )
        .bind(payment.id.as_str())
        .bind(payment.invoice_id.as_str())
        .bind(payment.amount.to_string())
        .bind(payment.method.as_str())
        .bind(payment.kind.as_str())
        .bind(payment.status.as_str())
        .bind(optional_timestamp(payment.received_at))
        .bind(optional_timestamp(payment.verified_at))
        .bind(payment.accountant_notes.as_deref())
        .bind(payment.operations_notes.as_deref())
        .bind(payment.proof_reference.as_deref())
        .bind(payment.submitted_by.as_str())
        .bind(payment.unallocated_amount.to_string())
        .bind(payment.refund_review.as_str())
        .bind(timestamp(payment.created_at))
        .bind(timestamp(payment.updated_at))
        .execute(&mut *self.tx)
        .await
        .db()?;
        Ok(())
    }

    async fn allocations_for_payment(
        &mut self,
        payment_id: &PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM payment_allocations WHERE payment_id = ? ORDER BY seq ASC"
        ))
        .bind(payment_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn allocations_for_invoice(
        &mut self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM payment_allocations WHERE invoice_id = ? ORDER BY seq ASC"
        ))
        .bind(invoice_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn append_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_allocations (
                id, payment_id, breakup_id, invoice_id, allocated_amount, resulting_status,
                reverses, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(allocation.id.as_str())
        .bind(allocation.payment_id.as_str())
        .bind(allocation.breakup_id.as_str())
        .bind(allocation.invoice_id.as_str())
        .bind(allocation.allocated_amount.to_string())
        .bind(allocation.resulting_status.as_str())
        .bind(allocation.reverses.as_ref().map(|id| id.0.clone()))
        .bind(timestamp(allocation.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| write_failure(error, "payment allocation", allocation.id.as_str()))?;
        Ok(())
    }

    async fn leave(&mut self, id: &LeaveId) -> Result<Option<Leave>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .db()?;
        row.as_ref().map(leave_from_row).transpose()
    }

    async fn leaves(&mut self, filter: &LeaveFilter) -> Result<Vec<Leave>, StoreError> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE 1 = 1"));
        if let Some(user_id) = &filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id.0.clone());
        }
        if let Some(backup_user_id) = &filter.backup_user_id {
            query.push(" AND backup_user_id = ").push_bind(backup_user_id.0.clone());
        }
        if filter.active_only {
            query.push(" AND status = ").push_bind(LeaveStatus::Active.as_str().to_owned());
        }
        query.push(" ORDER BY start_date ASC, created_at ASC");

        let rows = query.build().fetch_all(&mut *self.tx).await.db()?;
        rows.iter().map(leave_from_row).collect()
    }

    async fn put_leave(&mut self, leave: &Leave) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO leaves (
                id, user_id, backup_user_id, start_date, end_date, reason, status, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                backup_user_id = excluded.backup_user_id,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                reason = excluded.reason,
                status = excluded.status",
        )
        .bind(leave.id.as_str())
        .bind(leave.user_id.as_str())
        .bind(leave.backup_user_id.as_str())
        .bind(leave.range.start.to_string())
        .bind(leave.range.end.to_string())
        .bind(&leave.reason)
        .bind(leave.status.as_str())
        .bind(timestamp(leave.created_at))
        .execute(&mut *self.tx)
        .await
        .db()?;
        Ok(())
    }

    async fn append_activity(&mut self, activity: &Activity) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO activities (
                id, request_id, actor_id, actor_name, actor_role, action, notes, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(activity.id.as_str())
        .bind(activity.request_id.as_str())
        .bind(activity.actor_id.as_str())
        .bind(&activity.actor_name)
        .bind(activity.actor_role.as_str())
        .bind(activity.action.as_str())
        .bind(activity.notes.as_deref())
        .bind(timestamp(activity.created_at))
        .execute(&mut *self.tx)
        .await
        .db()?;
        Ok(())
    }

    async fn activities_for_request(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Vec<Activity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE request_id = ? ORDER BY seq ASC"
        ))
        .bind(request_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn notification(&mut self, id: &NotificationId) -> Result<Option<Notification>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&mut *self.tx)
                .await
                .db()?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn notifications(&mut self, recipient: &UserId) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = ?
             ORDER BY created_at DESC"
        ))
        .bind(recipient.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .db()?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn put_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notifications (
                id, recipient_id, title, message, link, is_read, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET is_read = excluded.is_read",
        )
        .bind(notification.id.as_str())
        .bind(notification.recipient.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.link.as_deref())
        .bind(i64::from(notification.read))
        .bind(timestamp(notification.created_at))
        .execute(&mut *self.tx)
        .await
        .db()?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let SqlTx { tx } = *self;
        tx.commit().await.db()
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    let columns = Columns::new(row, "user");
    Ok(User {
        id: UserId(columns.text("id")?),
        email: columns.text("email")?,
        name: columns.text("name")?,
        phone: columns.optional_text("phone")?,
        role: columns.parsed("role")?,
        active: columns.flag("active")?,
        can_see_cost_breakup: columns.flag("can_see_cost_breakup")?,
        password_hash: columns.text("password_hash")?,
        created_at: columns.timestamp("created_at")?,
        updated_at: columns.timestamp("updated_at")?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<TravelRequest, StoreError> {
    let columns = Columns::new(row, "request");
    Ok(TravelRequest {
        id: RequestId(columns.text("id")?),
        title: columns.text("title")?,
        client: columns.json("client_json")?,
        trip: columns.json("trip_json")?,
        status: columns.parsed("status")?,
        assigned_sales_id: columns.optional_text("assigned_sales_id")?.map(UserId),
        assigned_ops_id: columns.optional_text("assigned_ops_id")?.map(UserId),
        is_salesperson_validated: columns.flag("is_salesperson_validated")?,
        created_by: UserId(columns.text("created_by")?),
        created_at: columns.timestamp("created_at")?,
        updated_at: columns.timestamp("updated_at")?,
    })
}

fn quotation_from_row(row: &SqliteRow) -> Result<Quotation, StoreError> {
    let columns = Columns::new(row, "quotation");
    Ok(Quotation {
        id: QuotationId(columns.text("id")?),
        request_id: RequestId(columns.text("request_id")?),
        version: columns.count("version")?,
        status: columns.parsed("status")?,
        expires_at: columns.optional_timestamp("expires_at")?,
        published_at: columns.optional_timestamp("published_at")?,
        accepted_at: columns.optional_timestamp("accepted_at")?,
        data: columns.json("data_json")?,
        cost_breakup: columns.json("cost_breakup_json")?,
        created_by: UserId(columns.text("created_by")?),
        created_at: columns.timestamp("created_at")?,
        updated_at: columns.timestamp("updated_at")?,
    })
}

fn invoice_from_row(row: &SqliteRow) -> Result<Invoice, StoreError> {
    let columns = Columns::new(row, "invoice");
    Ok(Invoice {
        id: InvoiceId(columns.text("id")?),
        invoice_number: columns.text("invoice_number")?,
        quotation_id: QuotationId(columns.text("quotation_id")?),
        request_id: RequestId(columns.text("request_id")?),
        client: columns.json("client_json")?,
        base_amount: columns.parsed("base_amount")?,
        tcs_percent: columns.parsed("tcs_percent")?,
        tcs_amount: columns.parsed("tcs_amount")?,
        total_amount: columns.parsed("total_amount")?,
        advance_amount: columns.parsed("advance_amount")?,
        currency: columns.text("currency")?,
        status: columns.parsed("status")?,
        due_date: columns.parsed("due_date")?,
        created_at: columns.timestamp("created_at")?,
        updated_at: columns.timestamp("updated_at")?,
    })
}

fn breakup_from_row(row: &SqliteRow) -> Result<PaymentBreakup, StoreError> {
    let columns = Columns::new(row, "payment breakup");
    Ok(PaymentBreakup {
        id: BreakupId(columns.text("id")?),
        invoice_id: InvoiceId(columns.text("invoice_id")?),
        sequence: columns.count("sequence")?,
        description: columns.optional_text("description")?,
        amount: columns.parsed("amount")?,
        due_date: columns.parsed("due_date")?,
        status: columns.parsed("status")?,
        paid_amount: columns.parsed("paid_amount")?,
        remaining_amount: columns.parsed("remaining_amount")?,
        created_at: columns.timestamp("created_at")?,
        updated_at: columns.timestamp("updated_at")?,
    })
}

fn payment_from_row(row: &SqliteRow) -> Result<Payment, StoreError> {
    let columns = Columns::new(row, "payment");
    Ok(Payment {
        id: PaymentId(columns.text("id")?),
        invoice_id: InvoiceId(columns.text("invoice_id")?),
        amount: columns.parsed("amount")?,
        method: columns.parsed("method")?,
        kind: columns.parsed("kind")?,
        status: columns.parsed("status")?,
        received_at: columns.optional_timestamp("received_at")?,
        verified_at: columns.optional_timestamp("verified_at")?,
        accountant_notes: columns.optional_text("accountant_notes")?,
        operations_notes: columns.optional_text("operations_notes")?,
        proof_reference: columns.optional_text("proof_reference")?,
        submitted_by: UserId(columns.text("submitted_by")?),
        unallocated_amount: columns.parsed("unallocated_amount")?,
        refund_review: columns.parsed("refund_review")?,
        created_at: columns.timestamp("created_at")?,
        updated_at: columns.timestamp("updated_at")?,
    })
}

fn allocation_from_row(row: &SqliteRow) -> Result<PaymentAllocation, StoreError> {
    let columns = Columns::new(row, "payment allocation");
    Ok(PaymentAllocation {
        id: AllocationId(columns.text("id")?),
        payment_id: PaymentId(columns.text("payment_id")?),
        breakup_id: BreakupId(columns.text("breakup_id")?),
        invoice_id: InvoiceId(columns.text("invoice_id")?),
        allocated_amount: columns.parsed("allocated_amount")?,
        resulting_status: columns.parsed("resulting_status")?,
        reverses: columns.optional_text("reverses")?.map(AllocationId),
        created_at: columns.timestamp("created_at")?,
    })
}

fn leave_from_row(row: &SqliteRow) -> Result<Leave, StoreError> {
    let columns = Columns::new(row, "leave");
    Ok(Leave {
        id: LeaveId(columns.text("id")?),
        user_id: UserId(columns.text("user_id")?),
        backup_user_id: UserId(columns.text("backup_user_id")?),
        range: DateRange { start: columns.parsed("start_date")?, end: columns.parsed("end_date")? },
        reason: columns.text("reason")?,
        status: columns.parsed("status")?,
        created_at: columns.timestamp("created_at")?,
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<Activity, StoreError> {
    let columns = Columns::new(row, "activity");
    Ok(Activity {
        id: ActivityId(columns.text("id")?),
        request_id: RequestId(columns.text("request_id")?),
        actor_id: UserId(columns.text("actor_id")?),
        actor_name: columns.text("actor_name")?,
        actor_role: columns.parsed("actor_role")?,
        action: columns.parsed("action")?,
        notes: columns.optional_text("notes")?,
        created_at: columns.timestamp("created_at")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, StoreError> {
    let columns = Columns::new(row, "notification");
    Ok(Notification {
        id: NotificationId(columns.text("id")?),
        recipient: UserId(columns.text("recipient_id")?),
        title: columns.text("title")?,
        message: columns.text("message")?,
        link: columns.optional_text("link")?,
        read: columns.flag("is_read")?,
        created_at: columns.timestamp("created_at")?,
    })
}
