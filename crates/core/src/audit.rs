use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ActivityId, NotificationId, RequestId, UserId};
use crate::domain::user::Role;
use crate::identity::Actor;
use crate::store::Store;

wire_enum!(ActivityAction {
    RequestCreated => "request_created",
    RequestSubmitted => "request_submitted",
    RequestUpdated => "request_updated",
    RequestAssigned => "request_assigned",
    RequestValidated => "request_validated",
    RequestCancelled => "request_cancelled",
    RequestWithdrawn => "request_withdrawn",
    RequestReopened => "request_reopened",
    RequestExpired => "request_expired",
    RequestPaid => "request_paid",
    NoteAdded => "note_added",
    QuotationCreated => "quotation_created",
    QuotationUpdated => "quotation_updated",
    QuotationPublished => "quotation_published",
    QuotationRepublished => "quotation_republished",
    QuotationAccepted => "quotation_accepted",
    QuotationDeclined => "quotation_declined",
    QuotationExpired => "quotation_expired",
    InvoiceCreated => "invoice_created",
    BreakupPlanned => "breakup_planned",
    PaymentSubmitted => "payment_submitted",
    PaymentReceived => "payment_received",
    PaymentVerified => "payment_verified",
    PaymentRejected => "payment_rejected",
    AllocationsReversed => "allocations_reversed",
    RefundReviewResolved => "refund_review_resolved",
});

/// Immutable audit record, written in the same transaction as the change it describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub request_id: RequestId,
    pub actor_id: UserId,
    pub actor_name: String,
    pub actor_role: Role,
    pub action: ActivityAction,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        request_id: RequestId,
        actor: &Actor,
        action: ActivityAction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            request_id,
            actor_id: actor.user_id.clone(),
            actor_name: actor.name.clone(),
            actor_role: actor.role,
            action,
            notes: None,
            created_at: now,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient,
            title: title.into(),
            message: message.into(),
            link: None,
            read: false,
            created_at: now,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Delivery transport. Failures are reported, never propagated into the triggering operation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotificationSink {
    pub fn delivered(&self) -> Vec<Notification> {
        match self.delivered.lock() {
            Ok(delivered) => delivered.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        match self.delivered.lock() {
            Ok(mut delivered) => delivered.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

/// Persists notifications into the store's inbox, one short transaction each.
#[derive(Clone)]
pub struct StoreNotificationSink {
    store: Arc<dyn Store>,
}

impl StoreNotificationSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for StoreNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let mut tx =
            self.store.begin().await.map_err(|error| NotificationError(error.to_string()))?;
        tx.put_notification(notification).await.map_err(|error| NotificationError(error.to_string()))?;
        tx.commit().await.map_err(|error| NotificationError(error.to_string()))
    }
}

/// Notifications queued during an operation, released only once its transaction commits.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Notification>,
}

impl Outbox {
    pub fn push(&mut self, notification: Notification) {
        self.pending.push(notification);
    }

    /// Queues the same notice for each distinct recipient, skipping the actor themselves.
    pub fn notify_all<'a>(
        &mut self,
        recipients: impl IntoIterator<Item = &'a UserId>,
        skip: &UserId,
        build: impl Fn(&UserId) -> Notification,
    ) {
        let mut seen: Vec<&UserId> = Vec::new();
        for recipient in recipients {
            if recipient == skip || seen.contains(&recipient) {
                continue;
            }
            seen.push(recipient);
            self.pending.push(build(recipient));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns how many notifications were delivered.
    pub async fn flush(self, sink: &dyn NotificationSink) -> usize {
        let mut delivered = 0;
        for notification in &self.pending {
            match sink.deliver(notification).await {
                Ok(()) => delivered += 1,
                Err(error) => tracing::warn!(
                    event_name = "notification.delivery_failed",
                    recipient = %notification.recipient,
                    title = %notification.title,
                    error = %error,
                    "notification dropped"
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::{
        Activity, ActivityAction, InMemoryNotificationSink, Notification, NotificationError,
        NotificationSink, Outbox,
    };
    use crate::domain::{RequestId, UserId};
    use crate::identity::Actor;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn deliver(&self, _: &Notification) -> Result<(), NotificationError> {
            Err(NotificationError("smtp relay unreachable".to_owned()))
        }
    }

    #[test]
    fn activity_captures_actor_identity() {
        let actor = Actor::system();
        let activity =
            Activity::new(RequestId::from("req-9"), &actor, ActivityAction::QuotationRepublished, Utc::now())
                .with_notes("expiry moved to 2026-06-01");

        assert_eq!(activity.actor_name, "System");
        assert_eq!(activity.action.as_str(), "quotation_republished");
        assert_eq!(activity.notes.as_deref(), Some("expiry moved to 2026-06-01"));
    }

    #[test]
    fn outbox_skips_the_actor_and_duplicates() {
        let actor = UserId::from("sales-1");
        let ops = UserId::from("ops-1");
        let mut outbox = Outbox::default();
        outbox.notify_all([&actor, &ops, &ops], &actor, |recipient| {
            Notification::new(recipient.clone(), "Quotation ready", "Q-1 is ready", Utc::now())
        });

        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn flush_counts_successful_deliveries() {
        let sink = InMemoryNotificationSink::default();
        let mut outbox = Outbox::default();
        outbox.push(
            Notification::new(UserId::from("cust-1"), "Invoice", "INV ready", Utc::now())
                .with_link("/invoices/inv-1"),
        );

        assert_eq!(outbox.flush(&sink).await, 1);
        assert_eq!(sink.delivered()[0].link.as_deref(), Some("/invoices/inv-1"));
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let mut outbox = Outbox::default();
        outbox.push(Notification::new(UserId::from("cust-1"), "Paid", "thanks", Utc::now()));

        assert_eq!(outbox.flush(&FailingSink).await, 0);
    }
}
