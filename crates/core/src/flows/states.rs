use serde::{Deserialize, Serialize};

use crate::domain::request::RequestStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    Submitted,
    QuotationCreated,
    QuotationAccepted,
    SettlementCompleted,
    SettlementReversed,
    QuotationLapsed,
    StaffCancelled,
    CustomerWithdrew,
    Reopened,
}

/// Facts about the surrounding records that a transition may depend on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub live_quotations: usize,
}

/// Follow-up work the caller performs in the same transaction as the status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    NotifyStaff,
    NotifyCustomer,
    RejectLiveQuotations,
    IssueInvoice,
    CloseInvoice,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
