//! Application services. Each public operation takes the calling [`Actor`], runs in one store
//! transaction and releases its notifications only after commit.

mod dashboard;
mod invoices;
mod leaves;
mod notifications;
mod payments;
mod quotations;
mod requests;
mod users;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::audit::{Activity, ActivityAction, NotificationSink, Outbox, StoreNotificationSink};
use crate::clock::{Clock, SystemClock};
use crate::config::WorkflowSettings;
use crate::delegation::resolve_delegates_for;
use crate::domain::leave::LeaveFilter;
use crate::domain::request::TravelRequest;
use crate::domain::user::Role;
use crate::domain::{RequestId, UserId};
use crate::errors::ApplicationError;
use crate::flows::{FlowContext, FlowEngine, FlowEvent, RequestLifecycle, TransitionOutcome};
use crate::identity::{Actor, CredentialService};
use crate::store::{Store, StoreTx};

pub use dashboard::DashboardStats;
pub use invoices::{InvoiceSchedule, OverdueBreakup};
pub use leaves::NewLeave;
pub use payments::{PaymentQuery, PaymentSubmission, SettlementReport};
pub use quotations::{AcceptanceOutcome, ExpirySweep, QuotationDraft};
pub use requests::{ClientInput, NewRequest, NoteInput, RequestQuery, RequestUpdate};
pub use users::{LoginResponse, NewUser, RegisterCustomer, UserUpdate};

type Tx = Box<dyn StoreTx>;

/// Maintenance sweep totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub expired_quotations: usize,
    pub expired_requests: usize,
    pub overdue_invoices: usize,
}

#[derive(Clone)]
pub struct Backoffice {
    store: Arc<dyn Store>,
    credentials: CredentialService,
    notifier: Arc<dyn NotificationSink>,
    settings: WorkflowSettings,
    clock: Arc<dyn Clock>,
    flow: Arc<FlowEngine<RequestLifecycle>>,
}

impl Backoffice {
    /// Wires the store-backed inbox and the system clock.
    pub fn new(
        store: Arc<dyn Store>,
        credentials: CredentialService,
        settings: WorkflowSettings,
    ) -> Self {
        let notifier = Arc::new(StoreNotificationSink::new(Arc::clone(&store)));
        Self {
            store,
            credentials,
            notifier,
            settings,
            clock: Arc::new(SystemClock),
            flow: Arc::new(FlowEngine::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Runs both maintenance sweeps, each in its own transaction.
    pub async fn run_sweeps(&self, actor: &Actor) -> Result<SweepReport, ApplicationError> {
        let expiry = self.expire_quotations(actor).await?;
        let overdue_invoices = self.mark_overdue(actor).await?;
        let report = SweepReport {
            expired_quotations: expiry.expired_quotations,
            expired_requests: expiry.expired_requests,
            overdue_invoices,
        };
        tracing::info!(
            event_name = "maintenance.sweep.completed",
            expired_quotations = report.expired_quotations,
            expired_requests = report.expired_requests,
            overdue_invoices = report.overdue_invoices,
            "maintenance sweep completed"
        );
        Ok(report)
    }

    async fn begin(&self) -> Result<Tx, ApplicationError> {
        Ok(self.store.begin().await?)
    }

    async fn finish(&self, tx: Tx, outbox: Outbox) -> Result<(), ApplicationError> {
        tx.commit().await?;
        if !outbox.is_empty() {
            outbox.flush(self.notifier.as_ref()).await;
        }
        Ok(())
    }

    async fn record(
        &self,
        tx: &mut Tx,
        request_id: &RequestId,
        actor: &Actor,
        action: ActivityAction,
        notes: Option<String>,
    ) -> Result<(), ApplicationError> {
        let mut activity = Activity::new(request_id.clone(), actor, action, self.now());
        activity.notes = notes;
        tx.append_activity(&activity).await?;
        Ok(())
    }

    /// Primaries whose work is delegated to the actor today.
    async fn delegated_to(
        &self,
        tx: &mut Tx,
        actor: &Actor,
    ) -> Result<BTreeSet<UserId>, ApplicationError> {
        if !actor.role.takes_assignments() {
            return Ok(BTreeSet::new());
        }
        let leaves = tx.leaves(&LeaveFilter::active()).await?;
        Ok(resolve_delegates_for(&leaves, &actor.user_id, self.today()))
    }

    async fn load_request(
        &self,
        tx: &mut Tx,
        id: &RequestId,
    ) -> Result<TravelRequest, ApplicationError> {
        tx.request(id).await?.ok_or_else(|| ApplicationError::not_found("request", id))
    }

    /// Loads a request the actor may see, together with whether access comes via delegation.
    async fn visible_request(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<(TravelRequest, bool), ApplicationError> {
        let request = self.load_request(tx, id).await?;
        let delegated = self.delegated_to(tx, actor).await?;
        match access(actor, &request, &delegated) {
            Access::Direct => Ok((request, false)),
            Access::Delegated => Ok((request, true)),
            Access::Denied => Err(ApplicationError::not_found("request", id)),
        }
    }

    /// A request the actor works on: admins always, reps when assigned or covering for the
    /// assignee.
    async fn workable_request(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        id: &RequestId,
        action: &str,
    ) -> Result<TravelRequest, ApplicationError> {
        let request = self.load_request(tx, id).await?;
        match actor.role {
            Role::Admin => Ok(request),
            Role::Sales | Role::Operations => {
                let delegated = self.delegated_to(tx, actor).await?;
                let covers = request.is_assigned_to(&actor.user_id)
                    || delegated.iter().any(|primary| request.is_assigned_to(primary));
                if covers {
                    Ok(request)
                } else {
                    Err(actor.forbidden(format!("{action} on a request assigned to someone else")))
                }
            }
            Role::Accountant | Role::Customer => Err(actor.forbidden(action)),
        }
    }

    async fn advance_request(
        &self,
        tx: &mut Tx,
        request: &mut TravelRequest,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let outcome = self.flow.apply_traced(&request.id, request.status, event, context)?;
        request.set_status(outcome.to, self.now());
        tx.put_request(request).await?;
        Ok(outcome)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Direct,
    Delegated,
    Denied,
}

fn access(actor: &Actor, request: &TravelRequest, delegated: &BTreeSet<UserId>) -> Access {
    match actor.role {
        Role::Admin | Role::Accountant => Access::Direct,
        Role::Customer => {
            if request.is_owned_by(&actor.user_id) {
                Access::Direct
            } else {
                Access::Denied
            }
        }
        Role::Sales | Role::Operations => {
            if request.is_assigned_to(&actor.user_id) || request.created_by == actor.user_id {
                Access::Direct
            } else if delegated.iter().any(|primary| request.is_assigned_to(primary)) {
                Access::Delegated
            } else if is_open_for(actor.role, request) {
                Access::Direct
            } else {
                Access::Denied
            }
        }
    }
}

/// Unclaimed work a rep may browse before taking it.
fn is_open_for(role: Role, request: &TravelRequest) -> bool {
    use crate::domain::request::AssignmentSlot;

    if !request.status.counts_toward_workload() {
        return false;
    }
    match role {
        Role::Sales => request.assignee(AssignmentSlot::Sales).is_none(),
        Role::Operations => {
            request.is_salesperson_validated
                && request.assignee(AssignmentSlot::Operations).is_none()
        }
        _ => false,
    }
}
