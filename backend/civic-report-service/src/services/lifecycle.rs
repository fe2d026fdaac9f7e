//! Report state machine
//!
//! Every transition follows the same shape: load the report, run the guards
//! in a fixed order, upload evidence once no guard can reject the call, then
//! hand the new state together with its audit entry, coin movements and
//! notification intents to the repository as a single commit. The commit
//! carries the version the guards were evaluated against, so two racing
//! transitions on one report cannot both land. An upload whose commit is
//! rejected is discarded again.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::db::{CommitOutcome, ReportFilter, ReportRepository, TransitionCommit};
use crate::error::{LifecycleError, Result};
use crate::metrics;
use crate::models::{
    Actor, Coordinate, EvidenceRef, LedgerEntry, LedgerReason, NewReport, NotificationIntent,
    Report, ReportStatus, ResolutionProof, Role, StatusUpdate,
};
use crate::services::assignment::AssignmentRegistry;
use crate::services::evidence::EvidenceStore;
use crate::services::geo_index::Geofence;

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Deployment knobs for guards and rewards
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePolicy {
    pub staff_geofence_meters: f64,
    pub citizen_geofence_meters: f64,
    pub report_filed_reward: i64,
    pub issue_resolved_reward: i64,
    pub resolution_verified_reward: i64,
    pub max_evidence_bytes: usize,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            staff_geofence_meters: 200.0,
            citizen_geofence_meters: 100.0,
            report_filed_reward: 0,
            issue_resolved_reward: 25,
            resolution_verified_reward: 50,
            max_evidence_bytes: 10 * 1024 * 1024,
        }
    }
}

/// An image submitted with a report or a resolution
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl PhotoUpload {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(bytes, DEFAULT_CONTENT_TYPE)
    }
}

#[derive(Clone)]
pub struct ReportLifecycle {
    reports: Arc<dyn ReportRepository>,
    assignments: AssignmentRegistry,
    evidence: Arc<dyn EvidenceStore>,
    policy: LifecyclePolicy,
}

fn require_role(actor: &Actor, role: Role, action: &'static str) -> Result<()> {
    if actor.role != role {
        return Err(LifecycleError::WrongActor {
            actor_id: actor.id,
            role: actor.role,
            action,
        });
    }
    Ok(())
}

fn require_status(report: &Report, next: ReportStatus, transition: &'static str) -> Result<()> {
    if !report.status.can_transition_to(next) {
        return Err(LifecycleError::InvalidStateForTransition {
            report_id: report.id,
            status: report.status,
            transition,
        });
    }
    Ok(())
}

impl ReportLifecycle {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        assignments: AssignmentRegistry,
        evidence: Arc<dyn EvidenceStore>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            reports,
            assignments,
            evidence,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn assignments(&self) -> &AssignmentRegistry {
        &self.assignments
    }

    /// File a new report as the citizen `actor`.
    pub async fn create(&self, actor: &Actor, input: NewReport) -> Result<Report> {
        let result = self.try_create(actor, input).await;
        self.observe("create", actor, None, &result);
        result
    }

    /// Dispatch an open report to a staff member. Admin only.
    pub async fn assign(&self, actor: &Actor, report_id: Uuid, staff_id: Uuid) -> Result<Report> {
        let result = self.try_assign(actor, report_id, staff_id).await;
        self.observe("assign", actor, Some(report_id), &result);
        result
    }

    /// Close out field work with a proof photo taken near the issue.
    ///
    /// Only the assigned staff member may resolve. When the report carries
    /// coordinates, `staff_location` must be within the staff geofence.
    pub async fn resolve(
        &self,
        actor: &Actor,
        report_id: Uuid,
        proof: Option<PhotoUpload>,
        staff_location: Option<Coordinate>,
    ) -> Result<Report> {
        let result = self
            .try_resolve(actor, report_id, proof, staff_location)
            .await;
        self.observe("resolve", actor, Some(report_id), &result);
        result
    }

    /// Confirm a resolution on site as the reporting citizen.
    pub async fn verify(
        &self,
        actor: &Actor,
        report_id: Uuid,
        citizen_location: Option<Coordinate>,
    ) -> Result<Report> {
        let result = self.try_verify(actor, report_id, citizen_location).await;
        self.observe("verify", actor, Some(report_id), &result);
        result
    }

    pub async fn get(&self, report_id: Uuid) -> Result<Report> {
        tracing::debug!(report_id = %report_id, "Fetching report");
        self.load(report_id).await
    }

    /// Reports filed by `citizen_id`, oldest first
    pub async fn list_for_user(&self, citizen_id: Uuid) -> Result<Vec<Report>> {
        self.reports
            .list_reports(ReportFilter::CreatedBy(citizen_id))
            .await
    }

    /// Reports assigned to `staff_id`, oldest first
    pub async fn list_for_staff(&self, staff_id: Uuid) -> Result<Vec<Report>> {
        self.assignments.tasks_for(staff_id).await
    }

    pub async fn list_all(&self, status: Option<ReportStatus>) -> Result<Vec<Report>> {
        let filter = status.map(ReportFilter::Status).unwrap_or(ReportFilter::All);
        self.reports.list_reports(filter).await
    }

    /// Audit trail of a report, newest first
    pub async fn status_history(&self, report_id: Uuid) -> Result<Vec<StatusUpdate>> {
        self.load(report_id).await?;
        self.reports.status_updates(report_id).await
    }

    /// Count one upvote from `actor`. Does not touch the workflow version.
    pub async fn upvote(&self, actor: &Actor, report_id: Uuid) -> Result<Report> {
        let report = self.reports.record_vote(report_id, actor.id).await?;
        tracing::info!(
            report_id = %report_id,
            actor_id = %actor.id,
            upvotes = report.upvote_count,
            "Report upvoted"
        );
        Ok(report)
    }

    async fn try_create(&self, actor: &Actor, input: NewReport) -> Result<Report> {
        require_role(actor, Role::Citizen, "file reports")?;
        input
            .validate()
            .map_err(|e| LifecycleError::InvalidInput(e.to_string()))?;
        let coordinates = Coordinate::from_parts(input.latitude, input.longitude)?;

        let photo = match &input.photo {
            Some(bytes) if !bytes.is_empty() => {
                let content_type = input
                    .photo_content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
                let photo = PhotoUpload::new(bytes.clone(), content_type);
                self.check_photo(&photo)?;
                Some(photo)
            }
            _ => None,
        };
        let evidence = match photo {
            Some(photo) => Some(self.upload(&photo).await?),
            None => None,
        };

        let uploaded = evidence.clone();
        let now = Utc::now();
        let report = Report::open(actor.id, &input, coordinates, evidence, now);

        let mut ledger = Vec::new();
        if self.policy.report_filed_reward > 0 {
            ledger.push(
                LedgerEntry::new(
                    actor.id,
                    self.policy.report_filed_reward,
                    LedgerReason::ReportFiled,
                    now,
                )
                .for_report(report.id),
            );
        }

        let notice = NotificationIntent::new(
            actor.id,
            Some(report.id),
            format!("Your report '{}' has been submitted", report.title),
            now,
        );

        let commit = TransitionCommit {
            update: StatusUpdate::new(
                report.id,
                ReportStatus::Open,
                Some("Report submitted".to_string()),
                now,
            ),
            report,
            expected_version: None,
            ledger,
            notifications: vec![notice],
        };
        self.commit_with_evidence(commit, "create", uploaded).await
    }

    async fn try_assign(&self, actor: &Actor, report_id: Uuid, staff_id: Uuid) -> Result<Report> {
        require_role(actor, Role::Admin, "assign reports")?;
        let mut report = self.load(report_id).await?;
        require_status(&report, ReportStatus::InProgress, "assign")?;
        self.assignments.ensure_staff(staff_id).await?;

        let expected = report.version;
        let now = Utc::now();
        report.assign_to(staff_id, now)?;

        let notice = NotificationIntent::new(
            staff_id,
            Some(report.id),
            format!("You have been assigned report '{}'", report.title),
            now,
        );

        let commit = TransitionCommit {
            update: StatusUpdate::new(
                report.id,
                ReportStatus::InProgress,
                Some(format!("Assigned to staff member {}", staff_id)),
                now,
            ),
            report,
            expected_version: Some(expected),
            ledger: vec![],
            notifications: vec![notice],
        };
        self.commit(commit, "assign").await
    }

    async fn try_resolve(
        &self,
        actor: &Actor,
        report_id: Uuid,
        proof: Option<PhotoUpload>,
        staff_location: Option<Coordinate>,
    ) -> Result<Report> {
        require_role(actor, Role::Staff, "resolve reports")?;
        let mut report = self.load(report_id).await?;
        require_status(&report, ReportStatus::Resolved, "resolve")?;
        if report.assigned_staff != Some(actor.id) {
            return Err(LifecycleError::WrongActor {
                actor_id: actor.id,
                role: actor.role,
                action: "resolve a report assigned to someone else",
            });
        }

        let proof = match proof {
            Some(photo) if !photo.bytes.is_empty() => photo,
            _ => return Err(LifecycleError::MissingEvidence),
        };
        self.check_photo(&proof)?;

        let staff_location = staff_location.ok_or(LifecycleError::MissingLocation)?;
        if let Some(center) = report.coordinates {
            Geofence::new(self.policy.staff_geofence_meters).check(&center, &staff_location)?;
        }

        let evidence = self.upload(&proof).await?;
        let uploaded = Some(evidence.clone());

        let expected = report.version;
        let now = Utc::now();
        report.mark_resolved(
            ResolutionProof {
                evidence,
                staff_location,
                resolved_at: now,
            },
            now,
        )?;

        let mut ledger = Vec::new();
        if self.policy.issue_resolved_reward > 0 {
            ledger.push(
                LedgerEntry::new(
                    report.created_by,
                    self.policy.issue_resolved_reward,
                    LedgerReason::IssueResolved,
                    now,
                )
                .for_report(report.id),
            );
        }

        let notice = NotificationIntent::new(
            report.created_by,
            Some(report.id),
            format!(
                "Your report '{}' status changed to {}",
                report.title,
                ReportStatus::Resolved
            ),
            now,
        );

        let commit = TransitionCommit {
            update: StatusUpdate::new(
                report.id,
                ReportStatus::Resolved,
                Some("Resolved with photo proof".to_string()),
                now,
            ),
            report,
            expected_version: Some(expected),
            ledger,
            notifications: vec![notice],
        };
        self.commit_with_evidence(commit, "resolve", uploaded).await
    }

    async fn try_verify(
        &self,
        actor: &Actor,
        report_id: Uuid,
        citizen_location: Option<Coordinate>,
    ) -> Result<Report> {
        require_role(actor, Role::Citizen, "verify resolutions")?;
        let mut report = self.load(report_id).await?;
        require_status(&report, ReportStatus::Closed, "verify")?;
        if report.created_by != actor.id {
            return Err(LifecycleError::WrongActor {
                actor_id: actor.id,
                role: actor.role,
                action: "verify a report filed by someone else",
            });
        }

        let citizen_location = citizen_location.ok_or(LifecycleError::MissingLocation)?;
        if let Some(center) = report.coordinates {
            Geofence::new(self.policy.citizen_geofence_meters).check(&center, &citizen_location)?;
        }

        let expected = report.version;
        let now = Utc::now();
        report.mark_verified(now)?;

        let mut ledger = Vec::new();
        if self.policy.resolution_verified_reward > 0 {
            ledger.push(
                LedgerEntry::new(
                    report.created_by,
                    self.policy.resolution_verified_reward,
                    LedgerReason::ResolutionVerified,
                    now,
                )
                .for_report(report.id),
            );
        }

        let mut notifications = Vec::new();
        if let Some(staff_id) = report.assigned_staff {
            notifications.push(NotificationIntent::new(
                staff_id,
                Some(report.id),
                format!("Your resolution of '{}' was verified by the citizen", report.title),
                now,
            ));
        }

        let commit = TransitionCommit {
            update: StatusUpdate::new(
                report.id,
                ReportStatus::Closed,
                Some("Verified on site by the reporting citizen".to_string()),
                now,
            ),
            report,
            expected_version: Some(expected),
            ledger,
            notifications,
        };
        self.commit(commit, "verify").await
    }

    /// Fetch a report, treating a row that breaks the model invariants as fatal.
    async fn load(&self, report_id: Uuid) -> Result<Report> {
        let report = self
            .reports
            .find_report(report_id)
            .await?
            .ok_or(LifecycleError::ReportNotFound(report_id))?;

        if let Some(violation) = report.invariant_violation() {
            tracing::error!(report_id = %report_id, violation = %violation, "Corrupt report state");
            panic!("corrupt report state: {}", violation);
        }
        Ok(report)
    }

    fn check_photo(&self, photo: &PhotoUpload) -> Result<()> {
        if photo.bytes.len() > self.policy.max_evidence_bytes {
            return Err(LifecycleError::InvalidInput(format!(
                "photo is {} bytes, limit is {}",
                photo.bytes.len(),
                self.policy.max_evidence_bytes
            )));
        }
        if !photo
            .content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("image/")
        {
            return Err(LifecycleError::InvalidInput(format!(
                "unsupported photo content type: {}",
                photo.content_type
            )));
        }
        Ok(())
    }

    async fn upload(&self, photo: &PhotoUpload) -> Result<EvidenceRef> {
        self.evidence
            .store(&photo.bytes, &photo.content_type)
            .await
    }

    async fn commit(&self, commit: TransitionCommit, transition: &'static str) -> Result<Report> {
        let report_id = commit.report.id;
        let fallback = commit.report.status;
        match self.reports.commit(commit).await? {
            CommitOutcome::Committed(report) => Ok(report),
            CommitOutcome::Conflict { current } => {
                Err(LifecycleError::InvalidStateForTransition {
                    report_id,
                    status: current.map(|r| r.status).unwrap_or(fallback),
                    transition,
                })
            }
        }
    }

    /// Commit, then drop a fresh upload that the failed commit left unreferenced.
    async fn commit_with_evidence(
        &self,
        commit: TransitionCommit,
        transition: &'static str,
        uploaded: Option<EvidenceRef>,
    ) -> Result<Report> {
        let result = self.commit(commit, transition).await;
        if let (Err(e), Some(evidence)) = (&result, uploaded) {
            tracing::warn!(
                evidence = %evidence,
                transition,
                error = %e,
                "Discarding evidence of an uncommitted transition"
            );
            if let Err(discard_err) = self.evidence.discard(&evidence).await {
                tracing::warn!(
                    evidence = %evidence,
                    error = %discard_err,
                    "Orphaned evidence left in storage"
                );
            }
        }
        result
    }

    fn observe(
        &self,
        transition: &'static str,
        actor: &Actor,
        report_id: Option<Uuid>,
        result: &Result<Report>,
    ) {
        match result {
            Ok(report) => {
                metrics::record_transition(transition, "committed");
                tracing::info!(
                    report_id = %report.id,
                    actor_id = %actor.id,
                    status = report.status.as_str(),
                    version = report.version,
                    transition,
                    "Report transition committed"
                );
            }
            Err(e) => {
                metrics::record_transition(transition, e.code());
                if matches!(e, LifecycleError::GeofenceViolation { .. }) {
                    metrics::record_geofence_rejection(actor.role.as_str());
                }
                tracing::warn!(
                    report_id = ?report_id,
                    actor_id = %actor.id,
                    role = actor.role.as_str(),
                    transition,
                    error = %e,
                    "Report transition rejected"
                );
            }
        }
    }
}
