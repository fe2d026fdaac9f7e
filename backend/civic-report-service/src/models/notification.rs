use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message visible to one user until they acknowledge it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Outbox row recorded in the same commit as the transition that triggers it.
///
/// The relay hands it to the dispatcher; its id doubles as the notification
/// id so redelivery is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub report_id: Option<Uuid>,
    pub message: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationIntent {
    pub fn new(
        recipient_id: Uuid,
        report_id: Option<Uuid>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            report_id,
            message: message.into(),
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
            delivered_at: None,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none()
    }
}
