//! Persistence ports and their implementations
//!
//! `MemoryStore` backs tests and database-less deployments; `PgStore` is the
//! PostgreSQL implementation. Both honour the same contract: a
//! [`TransitionCommit`] is applied entirely or not at all, and a stale
//! `expected_version` is reported as [`CommitOutcome::Conflict`] rather than
//! overwriting the newer state.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    LedgerEntry, Notification, NotificationIntent, Report, ReportStatus, StatusUpdate,
};

/// Everything a lifecycle transition writes, applied as one unit
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    /// The report in its post-transition state
    pub report: Report,
    /// Version the transition was validated against; `None` inserts a new report
    pub expected_version: Option<i64>,
    pub update: StatusUpdate,
    pub ledger: Vec<LedgerEntry>,
    pub notifications: Vec<NotificationIntent>,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed(Report),
    /// Another transition won the race; carries the state it left behind
    Conflict { current: Option<Report> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFilter {
    All,
    Status(ReportStatus),
    CreatedBy(Uuid),
    AssignedTo(Uuid),
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        match self {
            ReportFilter::All => true,
            ReportFilter::Status(status) => report.status == *status,
            ReportFilter::CreatedBy(user_id) => report.created_by == *user_id,
            ReportFilter::AssignedTo(staff_id) => report.assigned_staff == Some(*staff_id),
        }
    }
}

/// Reports and their audit trail
#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Apply a transition atomically, checking `expected_version` first.
    async fn commit(&self, commit: TransitionCommit) -> Result<CommitOutcome>;

    async fn find_report(&self, id: Uuid) -> Result<Option<Report>>;

    /// Matching reports ordered by `(created_at, id)` ascending
    async fn list_reports(&self, filter: ReportFilter) -> Result<Vec<Report>>;

    /// Audit entries for a report, newest first
    async fn status_updates(&self, report_id: Uuid) -> Result<Vec<StatusUpdate>>;

    /// Record one upvote per user; fails with `AlreadyVoted` on repeats
    async fn record_vote(&self, report_id: Uuid, user_id: Uuid) -> Result<Report>;
}

/// Append-only coin ledger
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Append an entry and return the new balance.
    ///
    /// A negative delta that would take the balance below zero fails with
    /// `InsufficientBalance` and appends nothing.
    async fn append_entry(&self, entry: LedgerEntry) -> Result<i64>;

    async fn balance(&self, user_id: Uuid) -> Result<i64>;

    /// All entries for a user, oldest first
    async fn entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>>;
}

/// Undelivered notification intents written by lifecycle commits
#[async_trait]
pub trait NotificationOutbox: Send + Sync {
    /// Undelivered intents with fewer than `max_attempts` attempts, oldest first
    async fn pending_notifications(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<NotificationIntent>>;

    async fn mark_delivered(&self, id: Uuid) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;
}

/// Known staff identities
#[async_trait]
pub trait StaffDirectory: Send + Sync {
    async fn is_staff(&self, id: Uuid) -> Result<bool>;

    async fn register_staff(&self, id: Uuid) -> Result<()>;

    /// Every registered staff id, in registration order
    async fn list_staff(&self) -> Result<Vec<Uuid>>;
}

/// Delivered notifications, kept until their recipient reads them and beyond
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Store a notification unless one with the same id exists.
    ///
    /// Returns `true` only for the call that actually inserted it.
    async fn insert_notification(&self, notification: &Notification) -> Result<bool>;

    async fn find_notification(&self, id: Uuid) -> Result<Option<Notification>>;

    /// Notifications for one recipient, newest first
    async fn notifications_for(&self, recipient_id: Uuid) -> Result<Vec<Notification>>;

    async fn unread_notifications(&self, recipient_id: Uuid) -> Result<i64>;

    /// Flag as read, keeping the first `read_at` on repeats
    async fn mark_notification_read(
        &self,
        id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<Option<Notification>>;
}
