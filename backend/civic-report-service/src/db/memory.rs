use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CommitOutcome, LedgerRepository, NotificationOutbox, NotificationStore, ReportFilter,
    ReportRepository, StaffDirectory, TransitionCommit,
};
use crate::error::{LifecycleError, Result};
use crate::models::{LedgerEntry, Notification, NotificationIntent, Report, StatusUpdate};

#[derive(Default)]
struct MemoryState {
    reports: HashMap<Uuid, Report>,
    updates: HashMap<Uuid, Vec<StatusUpdate>>,
    votes: HashSet<(Uuid, Uuid)>,
    ledger: HashMap<Uuid, Vec<LedgerEntry>>,
    /// Undelivered intents only; delivered rows are dropped
    outbox: Vec<NotificationIntent>,
    notifications: HashMap<Uuid, Notification>,
    /// Registration order
    staff: Vec<Uuid>,
}

impl MemoryState {
    fn balance(&self, user_id: Uuid) -> i64 {
        self.ledger
            .get(&user_id)
            .map(|entries| entries.iter().map(|e| e.delta).sum())
            .unwrap_or(0)
    }

    /// Reject a batch of entries that would overdraw any user, before anything is written.
    fn check_entries(&self, entries: &[LedgerEntry]) -> Result<()> {
        let mut projected: HashMap<Uuid, i64> = HashMap::new();
        for entry in entries {
            let balance = *projected
                .entry(entry.user_id)
                .or_insert_with(|| self.balance(entry.user_id));
            let next = balance + entry.delta;
            if entry.delta < 0 && next < 0 {
                return Err(LifecycleError::InsufficientBalance {
                    balance,
                    requested: -entry.delta,
                });
            }
            projected.insert(entry.user_id, next);
        }
        Ok(())
    }
}

/// In-process store guarded by a single lock.
///
/// Every commit runs under the write lock, so status, audit, ledger and
/// outbox changes become visible together.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the staff directory
    pub async fn with_staff(self, staff: impl IntoIterator<Item = Uuid>) -> Self {
        {
            let mut state = self.state.write().await;
            for id in staff {
                if !state.staff.contains(&id) {
                    state.staff.push(id);
                }
            }
        }
        self
    }

    /// Outbox rows still awaiting delivery
    pub async fn outbox_snapshot(&self) -> Vec<NotificationIntent> {
        self.state.read().await.outbox.clone()
    }

    /// Overwrite a stored report without any checks. Test hook for corrupt rows.
    #[doc(hidden)]
    pub async fn force_report(&self, report: Report) {
        self.state.write().await.reports.insert(report.id, report);
    }
}

#[async_trait]
impl ReportRepository for MemoryStore {
    async fn commit(&self, commit: TransitionCommit) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;
        let id = commit.report.id;

        match (commit.expected_version, state.reports.get(&id)) {
            (None, Some(_)) => {
                return Err(LifecycleError::Internal(format!(
                    "report {} already exists",
                    id
                )))
            }
            (Some(_), None) => return Err(LifecycleError::ReportNotFound(id)),
            (Some(expected), Some(current)) if current.version != expected => {
                return Ok(CommitOutcome::Conflict {
                    current: Some(current.clone()),
                });
            }
            _ => {}
        }

        state.check_entries(&commit.ledger)?;

        for entry in commit.ledger {
            state.ledger.entry(entry.user_id).or_default().push(entry);
        }
        state.outbox.extend(commit.notifications);
        state.updates.entry(id).or_default().push(commit.update);
        state.reports.insert(id, commit.report.clone());

        Ok(CommitOutcome::Committed(commit.report))
    }

    async fn find_report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.state.read().await.reports.get(&id).cloned())
    }

    async fn list_reports(&self, filter: ReportFilter) -> Result<Vec<Report>> {
        let state = self.state.read().await;
        let mut reports: Vec<Report> = state
            .reports
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        reports.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(reports)
    }

    async fn status_updates(&self, report_id: Uuid) -> Result<Vec<StatusUpdate>> {
        let state = self.state.read().await;
        let mut updates = state.updates.get(&report_id).cloned().unwrap_or_default();
        // Appended in commit order; reverse for newest first.
        updates.reverse();
        Ok(updates)
    }

    async fn record_vote(&self, report_id: Uuid, user_id: Uuid) -> Result<Report> {
        let mut state = self.state.write().await;
        if !state.reports.contains_key(&report_id) {
            return Err(LifecycleError::ReportNotFound(report_id));
        }
        if !state.votes.insert((report_id, user_id)) {
            return Err(LifecycleError::AlreadyVoted { report_id, user_id });
        }
        let report = state
            .reports
            .get_mut(&report_id)
            .ok_or(LifecycleError::ReportNotFound(report_id))?;
        report.upvote_count += 1;
        Ok(report.clone())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<i64> {
        let mut state = self.state.write().await;
        state.check_entries(std::slice::from_ref(&entry))?;
        let user_id = entry.user_id;
        state.ledger.entry(user_id).or_default().push(entry);
        Ok(state.balance(user_id))
    }

    async fn balance(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.state.read().await.balance(user_id))
    }

    async fn entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .ledger
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl NotificationOutbox for MemoryStore {
    async fn pending_notifications(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<NotificationIntent>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|n| n.is_pending() && n.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        self.state.write().await.outbox.retain(|n| n.id != id);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(intent) = state.outbox.iter_mut().find(|n| n.id == id) {
            intent.attempts += 1;
            intent.last_attempt_at = Some(Utc::now());
            intent.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl StaffDirectory for MemoryStore {
    async fn is_staff(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.read().await.staff.contains(&id))
    }

    async fn register_staff(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.staff.contains(&id) {
            state.staff.push(id);
        }
        Ok(())
    }

    async fn list_staff(&self) -> Result<Vec<Uuid>> {
        Ok(self.state.read().await.staff.clone())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.notifications.entry(notification.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(true)
            }
        }
    }

    async fn find_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.state.read().await.notifications.get(&id).cloned())
    }

    async fn notifications_for(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut items: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(items)
    }

    async fn unread_notifications(&self, recipient_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
            .count() as i64)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let mut state = self.state.write().await;
        Ok(state.notifications.get_mut(&id).map(|n| {
            if !n.is_read {
                n.is_read = true;
                n.read_at = Some(read_at);
            }
            n.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, LedgerReason, NewReport, ReportStatus};

    fn open_commit(citizen: Uuid) -> TransitionCommit {
        let now = Utc::now();
        let report = Report::open(
            citizen,
            &NewReport::new("Pothole", Category::Roads, "MG Road"),
            None,
            None,
            now,
        );
        TransitionCommit {
            update: StatusUpdate::new(report.id, ReportStatus::Open, None, now),
            report,
            expected_version: None,
            ledger: vec![],
            notifications: vec![NotificationIntent::new(citizen, None, "filed", now)],
        }
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let citizen = Uuid::new_v4();
        let commit = open_commit(citizen);
        let report = match store.commit(commit).await.unwrap() {
            CommitOutcome::Committed(r) => r,
            other => panic!("unexpected {:?}", other),
        };

        let staff = Uuid::new_v4();
        let mut first = report.clone();
        first.assign_to(staff, Utc::now()).unwrap();
        let mut second = report.clone();
        second.assign_to(Uuid::new_v4(), Utc::now()).unwrap();

        let make = |r: Report| TransitionCommit {
            update: StatusUpdate::new(r.id, r.status, None, Utc::now()),
            report: r,
            expected_version: Some(1),
            ledger: vec![],
            notifications: vec![],
        };

        assert!(matches!(
            store.commit(make(first)).await.unwrap(),
            CommitOutcome::Committed(_)
        ));
        match store.commit(make(second)).await.unwrap() {
            CommitOutcome::Conflict { current: Some(current) } => {
                assert_eq!(current.assigned_staff, Some(staff));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.status_updates(report.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_overdraw_in_commit_writes_nothing() {
        let store = MemoryStore::new();
        let citizen = Uuid::new_v4();
        let mut commit = open_commit(citizen);
        let report_id = commit.report.id;
        commit.ledger.push(LedgerEntry::new(
            citizen,
            -5,
            LedgerReason::RewardRedeemed,
            Utc::now(),
        ));

        let err = store.commit(commit).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InsufficientBalance { balance: 0, requested: 5 }));
        assert!(store.find_report(report_id).await.unwrap().is_none());
        assert!(store.outbox_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_votes_are_unique_per_user() {
        let store = MemoryStore::new();
        let commit = open_commit(Uuid::new_v4());
        let report_id = commit.report.id;
        store.commit(commit).await.unwrap();

        let voter = Uuid::new_v4();
        assert_eq!(store.record_vote(report_id, voter).await.unwrap().upvote_count, 1);
        assert!(matches!(
            store.record_vote(report_id, voter).await,
            Err(LifecycleError::AlreadyVoted { .. })
        ));
        let report = store.record_vote(report_id, Uuid::new_v4()).await.unwrap();
        assert_eq!(report.upvote_count, 2);
        assert_eq!(report.version, 1);
    }

    #[tokio::test]
    async fn test_outbox_attempt_tracking() {
        let store = MemoryStore::new();
        let commit = open_commit(Uuid::new_v4());
        store.commit(commit).await.unwrap();

        let pending = store.pending_notifications(10, 2).await.unwrap();
        assert_eq!(pending.len(), 1);
        let id = pending[0].id;

        store.mark_failed(id, "timeout").await.unwrap();
        store.mark_failed(id, "timeout").await.unwrap();
        assert!(store.pending_notifications(10, 2).await.unwrap().is_empty());
        assert_eq!(store.pending_notifications(10, 3).await.unwrap().len(), 1);

        store.mark_delivered(id).await.unwrap();
        assert!(store.pending_notifications(10, 10).await.unwrap().is_empty());
        assert!(store.outbox_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_staff_listed_in_registration_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let store = MemoryStore::new().with_staff([first]).await;
        store.register_staff(second).await.unwrap();
        store.register_staff(first).await.unwrap();

        assert_eq!(store.list_staff().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_notification_insert_reports_first_writer() {
        let store = MemoryStore::new();
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            message: "submitted".into(),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        };

        assert!(store.insert_notification(&notification).await.unwrap());
        assert!(!store.insert_notification(&notification).await.unwrap());

        let first = store
            .mark_notification_read(notification.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        let again = store
            .mark_notification_read(notification.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.read_at, again.read_at);
        assert_eq!(store.unread_notifications(notification.recipient_id).await.unwrap(), 0);
    }
}
