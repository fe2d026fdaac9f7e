//! PostgreSQL implementation of the persistence ports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    CommitOutcome, LedgerRepository, NotificationOutbox, NotificationStore, ReportFilter,
    ReportRepository, StaffDirectory, TransitionCommit,
};
use crate::error::{LifecycleError, Result};
use crate::models::{
    Coordinate, EvidenceRef, LedgerEntry, Notification, NotificationIntent, Report,
    ResolutionProof, StatusUpdate,
};

const REPORT_COLUMNS: &str = r#"
    id, title, category, location, description, latitude, longitude, evidence_ref,
    status, created_by, assigned_staff, proof_ref, proof_latitude, proof_longitude,
    resolved_at, verified_at, upvote_count, version, created_at, updated_at
"#;

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_report(tx: &mut Transaction<'_, Postgres>, report: &Report) -> Result<()> {
        let proof = report.resolution_proof.as_ref();
        sqlx::query(
            r#"
            INSERT INTO reports (
                id, title, category, location, description, latitude, longitude, evidence_ref,
                status, created_by, assigned_staff, proof_ref, proof_latitude, proof_longitude,
                resolved_at, verified_at, upvote_count, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(report.id)
        .bind(&report.title)
        .bind(report.category.as_str())
        .bind(&report.location)
        .bind(&report.description)
        .bind(report.coordinates.map(|c| c.latitude()))
        .bind(report.coordinates.map(|c| c.longitude()))
        .bind(report.evidence.as_ref().map(|e| e.as_str().to_string()))
        .bind(report.status.as_str())
        .bind(report.created_by)
        .bind(report.assigned_staff)
        .bind(proof.map(|p| p.evidence.as_str().to_string()))
        .bind(proof.map(|p| p.staff_location.latitude()))
        .bind(proof.map(|p| p.staff_location.longitude()))
        .bind(proof.map(|p| p.resolved_at))
        .bind(report.verified_at)
        .bind(report.upvote_count)
        .bind(report.version)
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Returns false when the row's version no longer matches `expected`.
    async fn update_report(
        tx: &mut Transaction<'_, Postgres>,
        report: &Report,
        expected: i64,
    ) -> Result<bool> {
        let proof = report.resolution_proof.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = $2,
                assigned_staff = $3,
                proof_ref = $4,
                proof_latitude = $5,
                proof_longitude = $6,
                resolved_at = $7,
                verified_at = $8,
                version = $9,
                updated_at = $10
            WHERE id = $1 AND version = $11
            "#,
        )
        .bind(report.id)
        .bind(report.status.as_str())
        .bind(report.assigned_staff)
        .bind(proof.map(|p| p.evidence.as_str().to_string()))
        .bind(proof.map(|p| p.staff_location.latitude()))
        .bind(proof.map(|p| p.staff_location.longitude()))
        .bind(proof.map(|p| p.resolved_at))
        .bind(report.verified_at)
        .bind(report.version)
        .bind(report.updated_at)
        .bind(expected)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Append one ledger entry inside `tx`, serialized per user by an advisory lock.
    async fn append_in_tx(tx: &mut Transaction<'_, Postgres>, entry: &LedgerEntry) -> Result<i64> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(entry.user_id)
            .execute(&mut **tx)
            .await?;

        let balance: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT FROM ledger_entries WHERE user_id = $1",
        )
        .bind(entry.user_id)
        .fetch_one(&mut **tx)
        .await?;

        if entry.delta < 0 && balance + entry.delta < 0 {
            return Err(LifecycleError::InsufficientBalance {
                balance,
                requested: -entry.delta,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, user_id, delta, reason, report_id, memo, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.delta)
        .bind(entry.reason.as_str())
        .bind(entry.report_id)
        .bind(&entry.memo)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(balance + entry.delta)
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> LifecycleError {
    LifecycleError::Internal(format!("corrupt {} row: {}", what, err))
}

fn report_from_row(row: &PgRow) -> Result<Report> {
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("status")?;
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    let evidence_ref: Option<String> = row.try_get("evidence_ref")?;
    let proof_ref: Option<String> = row.try_get("proof_ref")?;
    let proof_latitude: Option<f64> = row.try_get("proof_latitude")?;
    let proof_longitude: Option<f64> = row.try_get("proof_longitude")?;
    let resolved_at: Option<DateTime<Utc>> = row.try_get("resolved_at")?;

    let resolution_proof = match (proof_ref, proof_latitude, proof_longitude, resolved_at) {
        (Some(evidence), Some(lat), Some(lon), Some(resolved_at)) => Some(ResolutionProof {
            evidence: EvidenceRef(evidence),
            staff_location: Coordinate::new(lat, lon).map_err(|e| corrupt("report", e))?,
            resolved_at,
        }),
        _ => None,
    };

    Ok(Report {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        category: category.parse().map_err(|e: String| corrupt("report", e))?,
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        coordinates: Coordinate::from_parts(latitude, longitude)
            .map_err(|e| corrupt("report", e))?,
        evidence: evidence_ref.map(EvidenceRef),
        status: status.parse().map_err(|e: String| corrupt("report", e))?,
        created_by: row.try_get("created_by")?,
        assigned_staff: row.try_get("assigned_staff")?,
        resolution_proof,
        verified_at: row.try_get("verified_at")?,
        upvote_count: row.try_get("upvote_count")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn update_from_row(row: &PgRow) -> Result<StatusUpdate> {
    let status: String = row.try_get("status")?;
    Ok(StatusUpdate {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        status: status.parse().map_err(|e: String| corrupt("status update", e))?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let reason: String = row.try_get("reason")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        delta: row.try_get("delta")?,
        reason: reason.parse().map_err(|e: String| corrupt("ledger", e))?,
        report_id: row.try_get("report_id")?,
        memo: row.try_get("memo")?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
    })
}

fn intent_from_row(row: &PgRow) -> Result<NotificationIntent> {
    Ok(NotificationIntent {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        report_id: row.try_get("report_id")?,
        message: row.try_get("message")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        delivered_at: row.try_get("delivered_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ReportRepository for PgStore {
    async fn commit(&self, commit: TransitionCommit) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        match commit.expected_version {
            None => Self::insert_report(&mut tx, &commit.report).await?,
            Some(expected) => {
                if !Self::update_report(&mut tx, &commit.report, expected).await? {
                    tx.rollback().await?;
                    let current = self.find_report(commit.report.id).await?;
                    if current.is_none() {
                        return Err(LifecycleError::ReportNotFound(commit.report.id));
                    }
                    return Ok(CommitOutcome::Conflict { current });
                }
            }
        }

        for entry in &commit.ledger {
            Self::append_in_tx(&mut tx, entry).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO report_status_updates (id, report_id, status, comment, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(commit.update.id)
        .bind(commit.update.report_id)
        .bind(commit.update.status.as_str())
        .bind(&commit.update.comment)
        .bind(commit.update.created_at)
        .execute(&mut *tx)
        .await?;

        for intent in &commit.notifications {
            sqlx::query(
                r#"
                INSERT INTO notification_outbox (id, recipient_id, report_id, message, attempts, created_at)
                VALUES ($1, $2, $3, $4, 0, $5)
                "#,
            )
            .bind(intent.id)
            .bind(intent.recipient_id)
            .bind(intent.report_id)
            .bind(&intent.message)
            .bind(intent.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            report_id = %commit.report.id,
            status = commit.report.status.as_str(),
            version = commit.report.version,
            "Transition committed"
        );

        Ok(CommitOutcome::Committed(commit.report))
    }

    async fn find_report(&self, id: Uuid) -> Result<Option<Report>> {
        let row = sqlx::query(&format!("SELECT {} FROM reports WHERE id = $1", REPORT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(report_from_row).transpose()
    }

    async fn list_reports(&self, filter: ReportFilter) -> Result<Vec<Report>> {
        let rows = match filter {
            ReportFilter::All => {
                sqlx::query(&format!(
                    "SELECT {} FROM reports ORDER BY created_at ASC, id ASC",
                    REPORT_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
            ReportFilter::Status(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM reports WHERE status = $1 ORDER BY created_at ASC, id ASC",
                    REPORT_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            ReportFilter::CreatedBy(user_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM reports WHERE created_by = $1 ORDER BY created_at ASC, id ASC",
                    REPORT_COLUMNS
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            ReportFilter::AssignedTo(staff_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM reports WHERE assigned_staff = $1 ORDER BY created_at ASC, id ASC",
                    REPORT_COLUMNS
                ))
                .bind(staff_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(report_from_row).collect()
    }

    async fn status_updates(&self, report_id: Uuid) -> Result<Vec<StatusUpdate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, report_id, status, comment, created_at
            FROM report_status_updates
            WHERE report_id = $1
            ORDER BY seq DESC
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(update_from_row).collect()
    }

    async fn record_vote(&self, report_id: Uuid, user_id: Uuid) -> Result<Report> {
        let mut tx = self.pool.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM reports WHERE id = $1)")
                .bind(report_id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            return Err(LifecycleError::ReportNotFound(report_id));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO report_votes (report_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (report_id, user_id) DO NOTHING
            "#,
        )
        .bind(report_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(LifecycleError::AlreadyVoted { report_id, user_id });
        }

        let row = sqlx::query(&format!(
            "UPDATE reports SET upvote_count = upvote_count + 1 WHERE id = $1 RETURNING {}",
            REPORT_COLUMNS
        ))
        .bind(report_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        report_from_row(&row)
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let balance = Self::append_in_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn balance(&self, user_id: Uuid) -> Result<i64> {
        let balance: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT FROM ledger_entries WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, delta, reason, report_id, memo, created_at
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl NotificationOutbox for PgStore {
    async fn pending_notifications(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<NotificationIntent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recipient_id, report_id, message, attempts, last_error,
                   last_attempt_at, delivered_at, created_at
            FROM notification_outbox
            WHERE delivered_at IS NULL AND attempts < $1
            ORDER BY seq ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(intent_from_row).collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET delivered_at = NOW(),
                last_attempt_at = NOW(),
                attempts = attempts + 1,
                last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET attempts = attempts + 1,
                last_attempt_at = NOW(),
                last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StaffDirectory for PgStore {
    async fn is_staff(&self, id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM staff_members WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn register_staff(&self, id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO staff_members (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_staff(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM staff_members ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, message, is_read, created_at, read_at";

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_id, message, is_read, created_at, read_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .bind(notification.read_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn notifications_for(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE recipient_id = $1 ORDER BY created_at DESC, id DESC",
            NOTIFICATION_COLUMNS
        ))
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn unread_notifications(&self, recipient_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, $2)
            WHERE id = $1
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .bind(read_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }
}
