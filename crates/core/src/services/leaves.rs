use chrono::NaiveDate;
use serde::Deserialize;

use crate::audit::{Notification, Outbox};
use crate::delegation::{available_backups, validate_backup_assignment};
use crate::domain::leave::{DateRange, Leave, LeaveFilter, LeaveStatus};
use crate::domain::user::{Role, User, UserProfile};
use crate::domain::{LeaveId, UserId};
use crate::errors::{ApplicationError, DomainError, ValidationFailure};
use crate::identity::{Actor, Capability};
use crate::services::{Backoffice, Tx};
use crate::store::LockScope;

#[derive(Clone, Debug, Deserialize)]
pub struct NewLeave {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub backup_user_id: UserId,
    #[serde(default)]
    pub reason: String,
    /// Admins may file leave on behalf of a colleague.
    pub user_id: Option<UserId>,
}

impl Backoffice {
    /// Files a leave. The backup must share the primary's role, be active, and not already
    /// cover an overlapping leave; the check and insert run under the backup's lock.
    pub async fn create_leave(&self, actor: &Actor, input: NewLeave) -> Result<Leave, ApplicationError> {
        actor.require(Capability::ManageLeave)?;
        let range = DateRange::new(input.start_date, input.end_date)?;
        let owner_id = match input.user_id {
            Some(user_id) if user_id != actor.user_id => {
                if actor.role != Role::Admin {
                    return Err(actor.forbidden("file leave for someone else"));
                }
                user_id
            }
            _ => actor.user_id.clone(),
        };
        if input.backup_user_id == owner_id {
            return Err(ValidationFailure::field("backup_user_id", "cannot back yourself up").into());
        }

        let mut tx = self.begin().await?;
        let owner = load_user(&mut tx, &owner_id).await?;
        let backup = load_user(&mut tx, &input.backup_user_id).await?;
        if !backup.active || !backup.role.is_staff() {
            return Err(ValidationFailure::field("backup_user_id", "must be an active staff member").into());
        }
        if backup.role != owner.role {
            return Err(ValidationFailure::field(
                "backup_user_id",
                format!("backup must be {}, {} is {}", owner.role, backup.name, backup.role),
            )
            .into());
        }

        tx.lock(&LockScope::LeaveBackup(backup.id.clone())).await?;
        let covering = tx
            .leaves(&LeaveFilter {
                backup_user_id: Some(backup.id.clone()),
                active_only: true,
                ..LeaveFilter::default()
            })
            .await?;
        validate_backup_assignment(&covering, &backup.id, &range, None)?;

        let now = self.now();
        let leave = Leave {
            id: LeaveId::generate(),
            user_id: owner.id.clone(),
            backup_user_id: backup.id.clone(),
            range,
            reason: input.reason.trim().to_owned(),
            status: LeaveStatus::Active,
            created_at: now,
        };
        tx.put_leave(&leave).await?;

        let mut outbox = Outbox::default();
        outbox.push(Notification::new(
            backup.id.clone(),
            "You are covering a colleague",
            format!(
                "{} is on leave from {} to {}; their requests are visible to you.",
                owner.name, range.start, range.end
            ),
            now,
        ));
        self.finish(tx, outbox).await?;

        tracing::info!(
            event_name = "leave.created",
            leave_id = %leave.id,
            user_id = %leave.user_id,
            backup_user_id = %leave.backup_user_id,
            start = %range.start,
            end = %range.end,
            "leave filed"
        );
        Ok(leave)
    }

    pub async fn my_leaves(&self, actor: &Actor) -> Result<Vec<Leave>, ApplicationError> {
        actor.require(Capability::ManageLeave)?;
        let mut tx = self.begin().await?;
        let mut leaves = tx
            .leaves(&LeaveFilter { user_id: Some(actor.user_id.clone()), ..LeaveFilter::default() })
            .await?;
        leaves.sort_by(|left, right| right.range.start.cmp(&left.range.start));
        Ok(leaves)
    }

    /// Leaves where the actor is the named backup.
    pub async fn covering_leaves(&self, actor: &Actor) -> Result<Vec<Leave>, ApplicationError> {
        actor.require(Capability::ManageLeave)?;
        let mut tx = self.begin().await?;
        let mut leaves = tx
            .leaves(&LeaveFilter {
                backup_user_id: Some(actor.user_id.clone()),
                active_only: true,
                ..LeaveFilter::default()
            })
            .await?;
        leaves.sort_by(|left, right| left.range.start.cmp(&right.range.start));
        Ok(leaves)
    }

    pub async fn all_leaves(&self, actor: &Actor) -> Result<Vec<Leave>, ApplicationError> {
        if actor.role != Role::Admin {
            return Err(actor.forbidden("list every leave"));
        }
        let mut tx = self.begin().await?;
        let mut leaves = tx.leaves(&LeaveFilter::default()).await?;
        leaves.sort_by(|left, right| right.range.start.cmp(&left.range.start));
        Ok(leaves)
    }

    pub async fn cancel_leave(&self, actor: &Actor, id: &LeaveId) -> Result<Leave, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut leave = tx.leave(id).await?.ok_or_else(|| ApplicationError::not_found("leave", id))?;
        if leave.user_id != actor.user_id && actor.role != Role::Admin {
            return Err(actor.forbidden("cancel someone else's leave"));
        }
        if leave.status == LeaveStatus::Cancelled {
            return Err(DomainError::Conflict(format!("leave {id} is already cancelled")).into());
        }

        leave.status = LeaveStatus::Cancelled;
        tx.put_leave(&leave).await?;
        let mut outbox = Outbox::default();
        outbox.push(Notification::new(
            leave.backup_user_id.clone(),
            "Cover cancelled",
            format!("The leave from {} to {} you were covering was cancelled.", leave.range.start, leave.range.end),
            self.now(),
        ));
        self.finish(tx, outbox).await?;

        tracing::info!(event_name = "leave.cancelled", leave_id = %leave.id, actor_id = %actor.user_id, "leave cancelled");
        Ok(leave)
    }

    /// Colleagues of the actor's role who are at work throughout the range.
    pub async fn available_backups(
        &self,
        actor: &Actor,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UserProfile>, ApplicationError> {
        actor.require(Capability::ManageLeave)?;
        let range = DateRange::new(start, end)?;
        let mut tx = self.begin().await?;
        let users = tx.users(Some(actor.role)).await?;
        let leaves = tx.leaves(&LeaveFilter::active()).await?;
        Ok(available_backups(&users, &leaves, actor.role, &range, &actor.user_id)
            .into_iter()
            .map(User::profile)
            .collect())
    }
}

async fn load_user(tx: &mut Tx, id: &UserId) -> Result<User, ApplicationError> {
    tx.user(id).await?.ok_or_else(|| ApplicationError::not_found("user", id))
}
