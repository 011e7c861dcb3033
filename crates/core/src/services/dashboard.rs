use chrono::Duration;
use serde::Serialize;

use crate::domain::payment::{PaymentFilter, PaymentStatus, RefundReview};
use crate::domain::quotation::QuotationStatus;
use crate::domain::user::Role;
use crate::errors::ApplicationError;
use crate::identity::{Actor, Capability};
use crate::services::{Backoffice, RequestQuery};

const EXPIRY_HORIZON_DAYS: i64 = 3;

/// Landing-page counters. Fields a role has no business seeing stay `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub role: Option<Role>,
    pub my_active_requests: usize,
    pub open_requests: Option<usize>,
    pub delegated_requests: Option<usize>,
    pub expiring_quotations: Option<usize>,
    pub pending_verifications: Option<usize>,
    pub overdue_breakups: Option<usize>,
    pub refund_reviews: Option<usize>,
    pub unread_notifications: usize,
}

impl Backoffice {
    pub async fn dashboard(&self, actor: &Actor) -> Result<DashboardStats, ApplicationError> {
        let mine = self.list_requests(actor, RequestQuery::default()).await?;
        let mut stats = DashboardStats {
            role: Some(actor.role),
            my_active_requests: mine
                .iter()
                .filter(|request| !request.status.is_terminal() && !request.delegated)
                .count(),
            unread_notifications: self.unread_notifications(actor).await?,
            ..DashboardStats::default()
        };

        if matches!(actor.role, Role::Sales | Role::Operations | Role::Admin) {
            stats.open_requests = Some(self.open_requests(actor).await?.len());
        }
        if actor.role.takes_assignments() {
            stats.delegated_requests = Some(self.delegated_requests(actor).await?.len());
        }
        if actor.can(Capability::PublishQuotation) || actor.role == Role::Sales {
            let horizon = self.now() + Duration::days(EXPIRY_HORIZON_DAYS);
            let mut tx = self.begin().await?;
            let sent = tx.quotations_by_status(QuotationStatus::Sent).await?;
            stats.expiring_quotations = Some(
                sent.iter()
                    .filter(|quotation| quotation.expires_at.is_some_and(|expiry| expiry <= horizon))
                    .count(),
            );
        }
        if actor.can(Capability::ViewFinance) {
            let wanted = match actor.role {
                Role::Accountant => vec![PaymentStatus::Pending],
                Role::Operations => vec![PaymentStatus::ReceivedByAccountant],
                _ => vec![PaymentStatus::Pending, PaymentStatus::ReceivedByAccountant],
            };
            {
                let mut tx = self.begin().await?;
                let pending = tx
                    .payments(&PaymentFilter { statuses: wanted, ..PaymentFilter::default() })
                    .await?;
                stats.pending_verifications =
                    Some(pending.iter().filter(|payment| payment.method.is_attested()).count());
            }
            stats.overdue_breakups = Some(self.overdue_count(actor).await?);
        }
        if actor.can(Capability::VerifyAsAccountant) {
            let mut tx = self.begin().await?;
            let reviews = tx
                .payments(&PaymentFilter {
                    refund_review: Some(RefundReview::Pending),
                    ..PaymentFilter::default()
                })
                .await?;
            stats.refund_reviews = Some(reviews.len());
        }

        Ok(stats)
    }
}
