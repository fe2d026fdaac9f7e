//! Notification delivery port and the persistent inbox

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::NotificationStore;
use crate::error::{LifecycleError, Result};
use crate::models::{Actor, Notification};

const SUBSCRIBER_CAPACITY: usize = 256;

/// Delivers a message to a user.
///
/// Implementations must be idempotent per `notification_id`: the relay may
/// hand over the same notification more than once.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, notification_id: Uuid, recipient_id: Uuid, message: &str) -> Result<()>;
}

/// Persists delivered notifications and fans them out to live subscribers.
///
/// Holds no state of its own beyond the broadcast channel, so a restarted
/// process sees everything delivered before the restart.
pub struct NotificationInbox {
    store: Arc<dyn NotificationStore>,
    sender: broadcast::Sender<Notification>,
}

impl NotificationInbox {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self { store, sender }
    }

    /// Live feed of newly delivered notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Notifications for one user, newest first
    pub async fn list_for(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        self.store.notifications_for(recipient_id).await
    }

    pub async fn unread_count(&self, recipient_id: Uuid) -> Result<i64> {
        self.store.unread_notifications(recipient_id).await
    }

    /// Acknowledge a notification. Only its recipient may do so; repeats are no-ops.
    pub async fn mark_read(&self, actor: &Actor, notification_id: Uuid) -> Result<Notification> {
        let notification = self
            .store
            .find_notification(notification_id)
            .await?
            .ok_or(LifecycleError::NotificationNotFound(notification_id))?;

        if notification.recipient_id != actor.id {
            return Err(LifecycleError::WrongActor {
                actor_id: actor.id,
                role: actor.role,
                action: "acknowledge this notification",
            });
        }
        if notification.is_read {
            return Ok(notification);
        }

        self.store
            .mark_notification_read(notification_id, Utc::now())
            .await?
            .ok_or(LifecycleError::NotificationNotFound(notification_id))
    }
}

#[async_trait]
impl NotificationDispatcher for NotificationInbox {
    async fn send(&self, notification_id: Uuid, recipient_id: Uuid, message: &str) -> Result<()> {
        let notification = Notification {
            id: notification_id,
            recipient_id,
            message: message.to_string(),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        };

        if !self.store.insert_notification(&notification).await? {
            tracing::debug!(notification_id = %notification_id, "Duplicate delivery ignored");
            return Ok(());
        }

        // No receivers is fine; pollers still see the stored copy.
        let _ = self.sender.send(notification);
        Ok(())
    }
}
