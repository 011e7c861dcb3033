use std::collections::BTreeSet;

use serde::Deserialize;

use crate::audit::{Activity, ActivityAction, Notification, Outbox};
use crate::domain::invoice::InvoiceStatus;
use crate::domain::quotation::QuotationStatus;
use crate::domain::request::{
    AssignmentSlot, ClientRef, RequestFilter, RequestStatus, RequestView, TravelRequest,
    TripParameters,
};
use crate::domain::user::Role;
use crate::domain::{RequestId, UserId};
use crate::errors::{ApplicationError, DomainError, ValidationFailure};
use crate::flows::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};
use crate::identity::{Actor, Capability};
use crate::services::{access, Access, Backoffice, Tx};
use crate::store::{AssignmentClaim, ClaimOutcome};

#[derive(Clone, Debug, Deserialize)]
pub struct ClientInput {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub customer_id: Option<UserId>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewRequest {
    pub title: String,
    pub client: Option<ClientInput>,
    pub trip: TripParameters,
    /// Submit straight to PENDING instead of keeping a draft.
    #[serde(default = "default_submit")]
    pub submit: bool,
}

fn default_submit() -> bool {
    true
}

/// Partial edit of a request's descriptive fields. Status and assignment change only
/// through their own operations.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequestUpdate {
    pub title: Option<String>,
    pub client: Option<ClientInput>,
    pub trip: Option<TripParameters>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequestQuery {
    pub status: Option<RequestStatus>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NoteInput {
    pub note: String,
    pub notify: Option<UserId>,
}

impl Backoffice {
    pub async fn create_request(
        &self,
        actor: &Actor,
        input: NewRequest,
    ) -> Result<RequestView, ApplicationError> {
        actor.require(Capability::CreateRequest)?;
        if input.title.trim().is_empty() {
            return Err(ValidationFailure::field("title", "must not be empty").into());
        }
        input.trip.validate()?;

        let mut tx = self.begin().await?;
        let client = match (actor.role, input.client) {
            (Role::Customer, _) => {
                let user = tx
                    .user(&actor.user_id)
                    .await?
                    .ok_or_else(|| ApplicationError::not_found("user", &actor.user_id))?;
                ClientRef {
                    customer_id: Some(user.id),
                    name: user.name,
                    email: user.email,
                    phone: user.phone,
                    country_code: None,
                }
            }
            (_, Some(client)) => {
                if client.name.trim().is_empty() || !client.email.contains('@') {
                    return Err(ValidationFailure::field(
                        "client",
                        "name and a valid email are required",
                    )
                    .into());
                }
                ClientRef {
                    customer_id: client.customer_id,
                    name: client.name.trim().to_owned(),
                    email: client.email.trim().to_owned(),
                    phone: client.phone,
                    country_code: client.country_code,
                }
            }
            (_, None) => {
                return Err(ValidationFailure::field(
                    "client",
                    "staff must name the client the request is for",
                )
                .into())
            }
        };

        let now = self.now();
        let mut request = TravelRequest {
            id: RequestId::generate(),
            title: input.title.trim().to_owned(),
            client,
            trip: input.trip,
            status: self.flow.initial_state(),
            assigned_sales_id: None,
            assigned_ops_id: None,
            is_salesperson_validated: false,
            created_by: actor.user_id.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.put_request(&request).await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestCreated, None).await?;

        let mut outbox = Outbox::default();
        if input.submit {
            let outcome = self
                .advance_request(&mut tx, &mut request, FlowEvent::Submitted, &FlowContext::default())
                .await?;
            self.record(&mut tx, &request.id, actor, ActivityAction::RequestSubmitted, None).await?;
            self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;

            if actor.role == Role::Sales {
                request = self.claim(&mut tx, actor, &request.id, AssignmentSlot::Sales).await?;
            }
        }

        self.finish(tx, outbox).await?;
        tracing::info!(
            event_name = "request.created",
            request_id = %request.id,
            status = %request.status,
            actor_id = %actor.user_id,
            "travel request created"
        );
        Ok(request.project(actor.role, false))
    }

    pub async fn submit_request(
        &self,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        let mut tx = self.begin().await?;
        let (mut request, delegated) = self.visible_request(&mut tx, actor, id).await?;
        if request.created_by != actor.user_id && !request.is_owned_by(&actor.user_id) {
            return Err(actor.forbidden("submit a request someone else drafted"));
        }

        let outcome = self
            .advance_request(&mut tx, &mut request, FlowEvent::Submitted, &FlowContext::default())
            .await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestSubmitted, None).await?;
        let mut outbox = Outbox::default();
        self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
        self.finish(tx, outbox).await?;
        Ok(request.project(actor.role, delegated))
    }

    /// Customers may edit their own request until it is quoted; the assigned reps, their
    /// cover and admins may edit until the customer accepts.
    pub async fn update_request(
        &self,
        actor: &Actor,
        id: &RequestId,
        update: RequestUpdate,
    ) -> Result<RequestView, ApplicationError> {
        let mut tx = self.begin().await?;
        let (mut request, delegated) = match actor.role {
            Role::Customer => {
                let (request, delegated) = self.visible_request(&mut tx, actor, id).await?;
                if request.created_by != actor.user_id && !request.is_owned_by(&actor.user_id) {
                    return Err(actor.forbidden("edit a request someone else raised"));
                }
                (request, delegated)
            }
            _ => (self.workable_request(&mut tx, actor, id, "edit requests").await?, false),
        };

        let editable: &[RequestStatus] = match actor.role {
            Role::Customer => &[RequestStatus::Draft, RequestStatus::Pending],
            _ => &[RequestStatus::Draft, RequestStatus::Pending, RequestStatus::Quoted],
        };
        if !editable.contains(&request.status) {
            return Err(DomainError::Conflict(format!(
                "request {} is {} and can no longer be edited",
                request.id, request.status
            ))
            .into());
        }

        let mut changed = Vec::new();
        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(ValidationFailure::field("title", "must not be empty").into());
            }
            request.title = title.trim().to_owned();
            changed.push("title");
        }
        if let Some(client) = update.client {
            if actor.role == Role::Customer {
                return Err(actor.forbidden("change the client on a request"));
            }
            if client.name.trim().is_empty() || !client.email.contains('@') {
                return Err(
                    ValidationFailure::field("client", "name and a valid email are required").into()
                );
            }
            request.client = ClientRef {
                customer_id: client.customer_id.or_else(|| request.client.customer_id.clone()),
                name: client.name.trim().to_owned(),
                email: client.email.trim().to_owned(),
                phone: client.phone,
                country_code: client.country_code,
            };
            changed.push("client");
        }
        if let Some(trip) = update.trip {
            trip.validate()?;
            request.trip = trip;
            changed.push("trip");
        }
        if changed.is_empty() {
            return Err(ValidationFailure::field("update", "nothing to change").into());
        }

        request.updated_at = self.now();
        tx.put_request(&request).await?;
        let notes = format!("updated {}", changed.join(", "));
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestUpdated, Some(notes)).await?;

        let mut outbox = Outbox::default();
        if actor.role == Role::Customer {
            if let Some(sales_id) = &request.assigned_sales_id {
                outbox.push(
                    Notification::new(
                        sales_id.clone(),
                        "Request edited by the customer",
                        format!("{} changed \"{}\".", actor.name, request.title),
                        self.now(),
                    )
                    .with_link(format!("/requests/{}", request.id)),
                );
            }
        }
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "request.updated",
            request_id = %request.id,
            actor_id = %actor.user_id,
            fields = %changed.join(","),
            "travel request edited"
        );
        Ok(request.project(actor.role, delegated))
    }

    pub async fn get_request(
        &self,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        let mut tx = self.begin().await?;
        let (request, delegated) = self.visible_request(&mut tx, actor, id).await?;
        Ok(request.project(actor.role, delegated))
    }

    /// Requests the actor is responsible for: own, assigned, or delegated to them today.
    pub async fn list_requests(
        &self,
        actor: &Actor,
        query: RequestQuery,
    ) -> Result<Vec<RequestView>, ApplicationError> {
        let mut tx = self.begin().await?;
        let statuses = query.status.into_iter().collect::<Vec<_>>();
        let delegated = self.delegated_to(&mut tx, actor).await?;

        let filter = match actor.role {
            Role::Customer => RequestFilter {
                customer_id: Some(actor.user_id.clone()),
                statuses,
                ..RequestFilter::default()
            },
            Role::Sales | Role::Operations => {
                let mut assigned_to = vec![actor.user_id.clone()];
                assigned_to.extend(delegated.iter().cloned());
                RequestFilter { assigned_to, statuses, ..RequestFilter::default() }
            }
            Role::Accountant | Role::Admin => RequestFilter { statuses, ..RequestFilter::default() },
        };

        let requests = tx.requests(&filter).await?;
        Ok(project_all(actor, requests, &delegated))
    }

    /// Unclaimed requests the actor's role could take.
    pub async fn open_requests(&self, actor: &Actor) -> Result<Vec<RequestView>, ApplicationError> {
        let filter = match actor.role {
            Role::Sales => RequestFilter {
                unassigned: Some(AssignmentSlot::Sales),
                statuses: RequestStatus::WORKLOAD.to_vec(),
                ..RequestFilter::default()
            },
            Role::Operations => RequestFilter {
                unassigned: Some(AssignmentSlot::Operations),
                statuses: RequestStatus::WORKLOAD.to_vec(),
                validated: Some(true),
                ..RequestFilter::default()
            },
            Role::Admin => RequestFilter {
                unassigned: Some(AssignmentSlot::Sales),
                statuses: RequestStatus::WORKLOAD.to_vec(),
                ..RequestFilter::default()
            },
            Role::Accountant | Role::Customer => {
                return Err(actor.forbidden("browse unassigned requests"))
            }
        };

        let mut tx = self.begin().await?;
        let requests = tx.requests(&filter).await?;
        Ok(requests.iter().map(|request| request.project(actor.role, false)).collect())
    }

    /// Requests assigned to colleagues the actor is covering for today.
    pub async fn delegated_requests(
        &self,
        actor: &Actor,
    ) -> Result<Vec<RequestView>, ApplicationError> {
        let mut tx = self.begin().await?;
        let delegated = self.delegated_to(&mut tx, actor).await?;
        if delegated.is_empty() {
            return Ok(Vec::new());
        }
        let filter =
            RequestFilter { assigned_to: delegated.iter().cloned().collect(), ..RequestFilter::default() };
        let requests = tx.requests(&filter).await?;
        Ok(requests.iter().map(|request| request.project(actor.role, true)).collect())
    }

    pub async fn assign_to_me(
        &self,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        let slot = match actor.role {
            Role::Sales => {
                actor.require(Capability::AssignAsSales)?;
                AssignmentSlot::Sales
            }
            Role::Operations => {
                actor.require(Capability::AssignAsOperations)?;
                AssignmentSlot::Operations
            }
            _ => return Err(actor.forbidden("claim requests")),
        };

        let mut tx = self.begin().await?;
        let request = self.load_request(&mut tx, id).await?;
        if !request.status.counts_toward_workload() {
            return Err(DomainError::Conflict(format!(
                "request {} is {} and cannot be claimed",
                request.id, request.status
            ))
            .into());
        }
        if slot == AssignmentSlot::Operations && !request.is_salesperson_validated {
            return Err(DomainError::Conflict(format!(
                "request {} has not been validated by sales yet",
                request.id
            ))
            .into());
        }

        let request = self.claim(&mut tx, actor, id, slot).await?;
        let mut outbox = Outbox::default();
        if let Some(customer_id) = &request.client.customer_id {
            outbox.push(
                Notification::new(
                    customer_id.clone(),
                    "Your request has an agent",
                    format!("{} is now handling \"{}\".", actor.name, request.title),
                    self.now(),
                )
                .with_link(format!("/requests/{}", request.id)),
            );
        }
        self.finish(tx, outbox).await?;
        Ok(request.project(actor.role, false))
    }

    pub async fn validate_request(
        &self,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        actor.require(Capability::ValidateRequest)?;
        let mut tx = self.begin().await?;
        let mut request = self.workable_request(&mut tx, actor, id, "validate requests").await?;
        request.ensure_open()?;
        if request.is_salesperson_validated {
            return Ok(request.project(actor.role, false));
        }

        request.is_salesperson_validated = true;
        request.updated_at = self.now();
        tx.put_request(&request).await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestValidated, None).await?;

        let operations = tx.users(Some(Role::Operations)).await?;
        let mut outbox = Outbox::default();
        let recipients: Vec<UserId> = match &request.assigned_ops_id {
            Some(ops) => vec![ops.clone()],
            None => operations.into_iter().filter(|user| user.active).map(|user| user.id).collect(),
        };
        outbox.notify_all(&recipients, &actor.user_id, |recipient| {
            Notification::new(
                recipient.clone(),
                "Request validated",
                format!("\"{}\" is validated and ready for operations.", request.title),
                self.now(),
            )
            .with_link(format!("/requests/{}", request.id))
        });
        self.finish(tx, outbox).await?;
        Ok(request.project(actor.role, false))
    }

    /// Staff cancellation. An accepted request's invoice is closed out with it.
    pub async fn cancel_request(
        &self,
        actor: &Actor,
        id: &RequestId,
        reason: Option<String>,
    ) -> Result<RequestView, ApplicationError> {
        actor.require(Capability::CancelRequest)?;
        let mut tx = self.begin().await?;
        let mut request = self.workable_request(&mut tx, actor, id, "cancel requests").await?;

        let outcome = self
            .advance_request(&mut tx, &mut request, FlowEvent::StaffCancelled, &FlowContext::default())
            .await?;
        self.apply_close_out(&mut tx, actor, &request, &outcome).await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestCancelled, reason).await?;

        let mut outbox = Outbox::default();
        self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
        self.finish(tx, outbox).await?;
        Ok(request.project(actor.role, false))
    }

    pub async fn withdraw_request(
        &self,
        actor: &Actor,
        id: &RequestId,
        reason: Option<String>,
    ) -> Result<RequestView, ApplicationError> {
        if actor.role != Role::Customer {
            return Err(actor.forbidden("withdraw requests"));
        }
        let mut tx = self.begin().await?;
        let (mut request, _) = self.visible_request(&mut tx, actor, id).await?;

        let outcome = self
            .advance_request(&mut tx, &mut request, FlowEvent::CustomerWithdrew, &FlowContext::default())
            .await?;
        self.apply_close_out(&mut tx, actor, &request, &outcome).await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestWithdrawn, reason).await?;

        let mut outbox = Outbox::default();
        self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
        self.finish(tx, outbox).await?;
        Ok(request.project(actor.role, false))
    }

    pub async fn reopen_request(
        &self,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut request = match actor.role {
            Role::Customer => self.visible_request(&mut tx, actor, id).await?.0,
            _ => {
                actor.require(Capability::CancelRequest)?;
                self.workable_request(&mut tx, actor, id, "reopen requests").await?
            }
        };

        let outcome = self
            .advance_request(&mut tx, &mut request, FlowEvent::Reopened, &FlowContext::default())
            .await?;
        self.record(&mut tx, &request.id, actor, ActivityAction::RequestReopened, None).await?;
        let mut outbox = Outbox::default();
        self.queue_flow_notices(&mut tx, actor, &request, &outcome, &mut outbox).await?;
        self.finish(tx, outbox).await?;
        Ok(request.project(actor.role, false))
    }

    pub async fn add_note(
        &self,
        actor: &Actor,
        id: &RequestId,
        input: NoteInput,
    ) -> Result<Activity, ApplicationError> {
        if input.note.trim().is_empty() {
            return Err(ValidationFailure::field("note", "must not be empty").into());
        }
        let mut tx = self.begin().await?;
        let request = self.workable_request(&mut tx, actor, id, "add notes").await?;

        let activity = Activity::new(request.id.clone(), actor, ActivityAction::NoteAdded, self.now())
            .with_notes(input.note.trim());
        tx.append_activity(&activity).await?;

        let mut outbox = Outbox::default();
        if let Some(colleague) = input.notify {
            let recipient = tx
                .user(&colleague)
                .await?
                .filter(|user| user.active && user.role.is_staff())
                .ok_or_else(|| ApplicationError::not_found("user", &colleague))?;
            outbox.push(
                Notification::new(
                    recipient.id,
                    format!("Note on \"{}\"", request.title),
                    format!("{}: {}", actor.name, input.note.trim()),
                    self.now(),
                )
                .with_link(format!("/requests/{}", request.id)),
            );
        }
        self.finish(tx, outbox).await?;
        Ok(activity)
    }

    pub async fn request_timeline(
        &self,
        actor: &Actor,
        id: &RequestId,
    ) -> Result<Vec<Activity>, ApplicationError> {
        let mut tx = self.begin().await?;
        let (request, _) = self.visible_request(&mut tx, actor, id).await?;
        let mut activities = tx.activities_for_request(&request.id).await?;
        activities.sort_by_key(|activity| activity.created_at);
        Ok(activities)
    }

    /// Atomically takes `slot` for the actor, mapping a refused claim onto the domain error.
    async fn claim(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        id: &RequestId,
        slot: AssignmentSlot,
    ) -> Result<TravelRequest, ApplicationError> {
        let claim = AssignmentClaim {
            request_id: id.clone(),
            slot,
            user_id: actor.user_id.clone(),
            limit: self.settings.assignment_limit,
            at: self.now(),
        };
        match tx.claim_request(&claim).await? {
            ClaimOutcome::Claimed(request) => {
                self.record(
                    tx,
                    &request.id,
                    actor,
                    ActivityAction::RequestAssigned,
                    Some(format!("{slot} slot")),
                )
                .await?;
                tracing::info!(
                    event_name = "request.assigned",
                    request_id = %request.id,
                    slot = %slot,
                    user_id = %actor.user_id,
                    "request claimed"
                );
                Ok(request)
            }
            ClaimOutcome::AlreadyAssigned => {
                Err(DomainError::AlreadyAssigned { request_id: id.to_string(), slot }.into())
            }
            ClaimOutcome::LimitReached => {
                tracing::info!(
                    event_name = "request.assignment_limit_reached",
                    request_id = %id,
                    user_id = %actor.user_id,
                    limit = self.settings.assignment_limit,
                    "assignment refused at capacity"
                );
                Err(DomainError::AssignmentLimitExceeded {
                    user_id: actor.user_id.to_string(),
                    limit: self.settings.assignment_limit,
                }
                .into())
            }
            ClaimOutcome::Missing => Err(ApplicationError::not_found("request", id)),
        }
    }

    /// Carries out the record-level follow-ups of a cancellation or withdrawal.
    pub(super) async fn apply_close_out(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        request: &TravelRequest,
        outcome: &TransitionOutcome,
    ) -> Result<(), ApplicationError> {
        let now = self.now();
        if outcome.actions.contains(&FlowAction::RejectLiveQuotations) {
            for mut quotation in tx.quotations_for_request(&request.id).await? {
                if quotation.status.is_live() {
                    quotation.transition_to(QuotationStatus::Rejected, now)?;
                    tx.put_quotation(&quotation).await?;
                }
            }
        }

        if outcome.actions.contains(&FlowAction::CloseInvoice) {
            if let Some(mut invoice) = tx.invoice_for_request(&request.id).await? {
                let allocations = tx.allocations_for_invoice(&invoice.id).await?;
                let settled: rust_decimal::Decimal =
                    allocations.iter().map(|entry| entry.allocated_amount).sum();
                let status = if settled > rust_decimal::Decimal::ZERO {
                    InvoiceStatus::RefundInitiated
                } else {
                    InvoiceStatus::Cancelled
                };
                invoice.set_status(status, now);
                tx.put_invoice(&invoice).await?;
                tracing::info!(
                    event_name = "invoice.closed",
                    invoice_id = %invoice.id,
                    status = %status,
                    actor_id = %actor.user_id,
                    "invoice closed with its request"
                );
            }
        }
        Ok(())
    }

    /// Notifications implied by a request transition.
    pub(super) async fn queue_flow_notices(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        request: &TravelRequest,
        outcome: &TransitionOutcome,
        outbox: &mut Outbox,
    ) -> Result<(), ApplicationError> {
        let title = format!("Request {}", outcome.to.as_str().to_ascii_lowercase().replace('_', " "));
        let message = format!("\"{}\" moved from {} to {}.", request.title, outcome.from, outcome.to);
        let link = format!("/requests/{}", request.id);

        if outcome.actions.contains(&FlowAction::NotifyStaff) {
            let mut recipients: Vec<UserId> = [&request.assigned_sales_id, &request.assigned_ops_id]
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            if recipients.is_empty() {
                recipients = tx
                    .users(Some(Role::Sales))
                    .await?
                    .into_iter()
                    .filter(|user| user.active)
                    .map(|user| user.id)
                    .collect();
            }
            outbox.notify_all(&recipients, &actor.user_id, |recipient| {
                Notification::new(recipient.clone(), title.clone(), message.clone(), self.now())
                    .with_link(link.clone())
            });
        }
        if outcome.actions.contains(&FlowAction::NotifyCustomer) {
            if let Some(customer_id) = &request.client.customer_id {
                outbox.notify_all([customer_id], &actor.user_id, |recipient| {
                    Notification::new(recipient.clone(), title.clone(), message.clone(), self.now())
                        .with_link(link.clone())
                });
            }
        }
        Ok(())
    }
}

fn project_all(
    actor: &Actor,
    requests: Vec<TravelRequest>,
    delegated: &BTreeSet<UserId>,
) -> Vec<RequestView> {
    requests
        .iter()
        .map(|request| {
            let via_delegation = access(actor, request, delegated) == Access::Delegated;
            request.project(actor.role, via_delegation)
        })
        .collect()
}
