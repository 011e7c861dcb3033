use crate::audit::Notification;
use crate::domain::NotificationId;
use crate::errors::ApplicationError;
use crate::identity::Actor;
use crate::services::Backoffice;

impl Backoffice {
    /// The actor's inbox, newest first.
    pub async fn notifications(&self, actor: &Actor) -> Result<Vec<Notification>, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut inbox = tx.notifications(&actor.user_id).await?;
        inbox.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(inbox)
    }

    pub async fn unread_notifications(&self, actor: &Actor) -> Result<usize, ApplicationError> {
        let mut tx = self.begin().await?;
        Ok(tx.notifications(&actor.user_id).await?.iter().filter(|item| !item.read).count())
    }

    /// Someone else's notification reads as missing.
    pub async fn mark_notification_read(
        &self,
        actor: &Actor,
        id: &NotificationId,
    ) -> Result<Notification, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut notification = tx
            .notification(id)
            .await?
            .filter(|notification| notification.recipient == actor.user_id)
            .ok_or_else(|| ApplicationError::not_found("notification", id))?;
        if !notification.read {
            notification.read = true;
            tx.put_notification(&notification).await?;
            tx.commit().await?;
        }
        Ok(notification)
    }

    pub async fn mark_all_notifications_read(&self, actor: &Actor) -> Result<usize, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut marked = 0;
        for mut notification in tx.notifications(&actor.user_id).await? {
            if notification.read {
                continue;
            }
            notification.read = true;
            tx.put_notification(&notification).await?;
            marked += 1;
        }
        tx.commit().await?;
        Ok(marked)
    }
}
