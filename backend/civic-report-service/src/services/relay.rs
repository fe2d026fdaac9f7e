//! Background delivery of notification intents
//!
//! Lifecycle commits only write outbox rows. The relay polls for undelivered
//! rows, hands each to the dispatcher under a timeout and records the
//! outcome. Failed rows are retried with exponential backoff until
//! `max_attempts` is reached, after which they stay in the outbox for
//! manual follow-up.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::db::NotificationOutbox;
use crate::error::Result;
use crate::metrics;
use crate::models::NotificationIntent;
use crate::services::notifications::NotificationDispatcher;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_attempts: i32,
    pub initial_backoff: Duration,
    pub send_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            batch_size: 100,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            send_timeout: Duration::from_millis(5000),
        }
    }
}

impl RelaySettings {
    /// Delay before retrying an intent that has failed `attempts` times
    pub fn backoff_for(&self, attempts: i32) -> Duration {
        if attempts <= 0 {
            return Duration::ZERO;
        }
        let exponent = (attempts - 1).min(16) as u32;
        self.initial_backoff
            .checked_mul(2u32.pow(exponent))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    fn is_due(&self, intent: &NotificationIntent, now: DateTime<Utc>) -> bool {
        match intent.last_attempt_at {
            None => true,
            Some(last) => match chrono::Duration::from_std(self.backoff_for(intent.attempts)) {
                Ok(backoff) => last + backoff <= now,
                Err(_) => false,
            },
        }
    }
}

pub struct NotificationRelay {
    outbox: Arc<dyn NotificationOutbox>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    settings: RelaySettings,
}

impl NotificationRelay {
    pub fn new(
        outbox: Arc<dyn NotificationOutbox>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            outbox,
            dispatcher,
            settings,
        }
    }

    /// Deliver one batch of due intents. Returns how many were delivered.
    pub async fn run_once(&self) -> Result<usize> {
        let pending = self
            .outbox
            .pending_notifications(self.settings.batch_size, self.settings.max_attempts)
            .await?;

        let now = Utc::now();
        let mut delivered = 0;

        for intent in pending {
            if !self.settings.is_due(&intent, now) {
                tracing::debug!(
                    notification_id = %intent.id,
                    attempts = intent.attempts,
                    "Notification backing off"
                );
                continue;
            }
            if self.deliver(&intent).await? {
                delivered += 1;
            }
        }

        Ok(delivered)
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<bool> {
        let send = self
            .dispatcher
            .send(intent.id, intent.recipient_id, &intent.message);

        let failure = match tokio::time::timeout(self.settings.send_timeout, send).await {
            Ok(Ok(())) => {
                self.outbox.mark_delivered(intent.id).await?;
                metrics::record_delivery("delivered");
                tracing::debug!(
                    notification_id = %intent.id,
                    recipient_id = %intent.recipient_id,
                    "Notification delivered"
                );
                return Ok(true);
            }
            Ok(Err(e)) => {
                metrics::record_delivery("failed");
                e.to_string()
            }
            Err(_) => {
                metrics::record_delivery("timeout");
                format!(
                    "dispatcher did not answer within {}ms",
                    self.settings.send_timeout.as_millis()
                )
            }
        };

        self.outbox.mark_failed(intent.id, &failure).await?;

        let attempts = intent.attempts + 1;
        if attempts >= self.settings.max_attempts {
            tracing::error!(
                notification_id = %intent.id,
                recipient_id = %intent.recipient_id,
                attempts,
                error = %failure,
                "Notification exceeded max attempts, giving up"
            );
        } else {
            tracing::warn!(
                notification_id = %intent.id,
                recipient_id = %intent.recipient_id,
                attempts,
                error = %failure,
                "Notification delivery failed, will retry"
            );
        }
        Ok(false)
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            max_attempts = self.settings.max_attempts,
            "Notification relay starting"
        );

        loop {
            match self.run_once().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(delivered = count, "Relayed notifications"),
                Err(e) => tracing::error!(error = %e, "Notification relay batch failed"),
            }

            // Spread pollers from several replicas apart.
            let jitter_ms = {
                let max = (self.settings.poll_interval.as_millis() as u64 / 10).max(1);
                rand::thread_rng().gen_range(0..max)
            };
            let wait = self.settings.poll_interval + Duration::from_millis(jitter_ms);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Notification relay stopped");
    }
}
