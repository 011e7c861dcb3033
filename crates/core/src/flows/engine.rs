use thiserror::Error;

use crate::domain::request::RequestStatus;
use crate::domain::RequestId;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> RequestStatus;
    fn transition(
        &self,
        current: RequestStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The travel request status machine.
#[derive(Clone, Debug, Default)]
pub struct RequestLifecycle;

impl FlowDefinition for RequestLifecycle {
    fn initial_state(&self) -> RequestStatus {
        RequestStatus::Draft
    }

    fn transition(
        &self,
        current: RequestStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_request(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> RequestStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: RequestStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    /// Same as [`FlowEngine::apply`], with the outcome recorded as a tracing event.
    pub fn apply_traced(
        &self,
        request_id: &RequestId,
        current: RequestStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => tracing::info!(
                event_name = "flow.transition_applied",
                request_id = %request_id,
                from = %outcome.from,
                to = %outcome.to,
                event = ?outcome.event,
                "request transition applied"
            ),
            Err(error) => tracing::info!(
                event_name = "flow.transition_rejected",
                request_id = %request_id,
                error = %error,
                "request transition rejected"
            ),
        }
        result
    }
}

impl Default for FlowEngine<RequestLifecycle> {
    fn default() -> Self {
        Self::new(RequestLifecycle)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: RequestStatus, event: FlowEvent },
    #[error("{count} live quotation(s) remain; the request cannot lapse yet")]
    LiveQuotationsRemain { count: usize },
}

fn transition_request(
    current: RequestStatus,
    event: FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{CloseInvoice, IssueInvoice, NotifyCustomer, NotifyStaff, RejectLiveQuotations};
    use FlowEvent::{
        CustomerWithdrew, QuotationAccepted, QuotationCreated, QuotationLapsed, Reopened,
        SettlementCompleted, SettlementReversed, StaffCancelled, Submitted,
    };
    use RequestStatus::{
        Accepted, CustomerCancelled, Draft, Expired, Paid, Pending, Quoted, Rejected,
    };

    let (to, actions) = match (current, event) {
        (Draft, Submitted) => (Pending, vec![NotifyStaff]),
        (Pending, QuotationCreated) | (Quoted, QuotationCreated) => (Quoted, Vec::new()),
        (Pending, QuotationAccepted) | (Quoted, QuotationAccepted) => {
            (Accepted, vec![RejectLiveQuotations, IssueInvoice, NotifyStaff])
        }
        (Accepted, SettlementCompleted) => (Paid, vec![NotifyCustomer, NotifyStaff]),
        (Paid, SettlementReversed) => (Accepted, vec![NotifyStaff]),
        (Quoted, QuotationLapsed) => {
            if context.live_quotations > 0 {
                return Err(FlowTransitionError::LiveQuotationsRemain {
                    count: context.live_quotations,
                });
            }
            (Expired, vec![NotifyCustomer])
        }
        (Accepted, StaffCancelled) => (Rejected, vec![CloseInvoice, NotifyCustomer]),
        (Draft, StaffCancelled) | (Pending, StaffCancelled) | (Quoted, StaffCancelled) => {
            (Rejected, vec![RejectLiveQuotations, NotifyCustomer])
        }
        (Draft, CustomerWithdrew) | (Pending, CustomerWithdrew) | (Quoted, CustomerWithdrew) => {
            (CustomerCancelled, vec![RejectLiveQuotations, NotifyStaff])
        }
        (CustomerCancelled, Reopened) => (Pending, vec![NotifyStaff]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
