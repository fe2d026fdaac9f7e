use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::Coordinate;
use crate::error::LifecycleError;

/// Workflow position of a report.
///
/// The only legal path is `Open -> InProgress -> Resolved -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl ReportStatus {
    /// The single state this one may advance to.
    pub fn successor(&self) -> Option<ReportStatus> {
        match self {
            ReportStatus::Open => Some(ReportStatus::InProgress),
            ReportStatus::InProgress => Some(ReportStatus::Resolved),
            ReportStatus::Resolved => Some(ReportStatus::Closed),
            ReportStatus::Closed => None,
        }
    }

    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        self.successor() == Some(next)
    }

    /// Canonical storage form
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Open => "open",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Closed => "closed",
        }
    }

    /// Parse a user-facing status label, accepting the legacy synonyms
    /// ("Pending", "Progress", "In Progress", "Solved").
    ///
    /// Only the HTTP boundary calls this; lifecycle code works with the enum.
    pub fn from_label(label: &str) -> Option<ReportStatus> {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "open" | "pending" => Some(ReportStatus::Open),
            "inprogress" | "progress" => Some(ReportStatus::InProgress),
            "resolved" | "solved" => Some(ReportStatus::Resolved),
            "closed" => Some(ReportStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReportStatus::Open => "Open",
            ReportStatus::InProgress => "In Progress",
            ReportStatus::Resolved => "Resolved",
            ReportStatus::Closed => "Closed",
        };
        f.write_str(label)
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ReportStatus::Open),
            "in_progress" => Ok(ReportStatus::InProgress),
            "resolved" => Ok(ReportStatus::Resolved),
            "closed" => Ok(ReportStatus::Closed),
            other => Err(format!("unknown report status: {}", other)),
        }
    }
}

/// Issue category offered to citizens when filing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[serde(alias = "Roads")]
    Roads,
    #[serde(alias = "Waste Management")]
    WasteManagement,
    #[serde(alias = "Street Lighting")]
    StreetLighting,
    #[serde(alias = "Water Leakage")]
    WaterLeakage,
    #[serde(alias = "Public Parks")]
    PublicParks,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Roads => "roads",
            Category::WasteManagement => "waste_management",
            Category::StreetLighting => "street_lighting",
            Category::WaterLeakage => "water_leakage",
            Category::PublicParks => "public_parks",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roads" => Ok(Category::Roads),
            "waste_management" => Ok(Category::WasteManagement),
            "street_lighting" => Ok(Category::StreetLighting),
            "water_leakage" => Ok(Category::WaterLeakage),
            "public_parks" => Ok(Category::PublicParks),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// Opaque handle returned by an evidence store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(pub String);

impl EvidenceRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the assigned staff member submitted when resolving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionProof {
    pub evidence: EvidenceRef,
    pub staff_location: Coordinate,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub title: String,
    pub category: Category,
    pub location: String,
    pub description: String,
    pub coordinates: Option<Coordinate>,
    pub evidence: Option<EvidenceRef>,
    pub status: ReportStatus,
    pub created_by: Uuid,
    pub assigned_staff: Option<Uuid>,
    pub resolution_proof: Option<ResolutionProof>,
    pub verified_at: Option<DateTime<Utc>>,
    pub upvote_count: i64,
    /// Bumped by every lifecycle transition; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// Create a new open report
    pub fn open(
        created_by: Uuid,
        input: &NewReport,
        coordinates: Option<Coordinate>,
        evidence: Option<EvidenceRef>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: input.title.trim().to_string(),
            category: input.category,
            location: input.location.trim().to_string(),
            description: input.description.trim().to_string(),
            coordinates,
            evidence,
            status: ReportStatus::Open,
            created_by,
            assigned_staff: None,
            resolution_proof: None,
            verified_at: None,
            upvote_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(
        &mut self,
        next: ReportStatus,
        transition: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if !self.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidStateForTransition {
                report_id: self.id,
                status: self.status,
                transition,
            });
        }
        self.status = next;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn assign_to(&mut self, staff_id: Uuid, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.advance(ReportStatus::InProgress, "assign", now)?;
        self.assigned_staff = Some(staff_id);
        Ok(())
    }

    pub fn mark_resolved(
        &mut self,
        proof: ResolutionProof,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.advance(ReportStatus::Resolved, "resolve", now)?;
        self.resolution_proof = Some(proof);
        Ok(())
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.advance(ReportStatus::Closed, "verify", now)?;
        self.verified_at = Some(now);
        Ok(())
    }

    /// Describe the first broken model invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        let needs_staff = matches!(
            self.status,
            ReportStatus::InProgress | ReportStatus::Resolved | ReportStatus::Closed
        );
        if needs_staff && self.assigned_staff.is_none() {
            return Some(format!(
                "report {} is {} without an assigned staff member",
                self.id, self.status
            ));
        }

        let needs_proof = matches!(self.status, ReportStatus::Resolved | ReportStatus::Closed);
        if needs_proof && self.resolution_proof.is_none() {
            return Some(format!(
                "report {} is {} without a resolution proof",
                self.id, self.status
            ));
        }

        if (self.status == ReportStatus::Closed) != self.verified_at.is_some() {
            return Some(format!(
                "report {} is {} but verified_at is {:?}",
                self.id, self.status, self.verified_at
            ));
        }

        None
    }
}

/// Append-only audit entry written once per transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: Uuid,
    pub report_id: Uuid,
    pub status: ReportStatus,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(
        report_id: Uuid,
        status: ReportStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_id,
            status,
            comment: comment.filter(|c| !c.trim().is_empty()),
            created_at: now,
        }
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Citizen submission for a new report
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewReport {
    #[validate(custom(function = "not_blank"), length(max = 200))]
    pub title: String,
    pub category: Category,
    #[validate(custom(function = "not_blank"), length(max = 500))]
    pub location: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Raw photo bytes; decoded from base64 at the HTTP boundary
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
    #[serde(default)]
    pub photo_content_type: Option<String>,
}

impl NewReport {
    pub fn new(title: &str, category: Category, location: &str) -> Self {
        Self {
            title: title.to_string(),
            category,
            location: location.to_string(),
            description: String::new(),
            latitude: None,
            longitude: None,
            photo: None,
            photo_content_type: None,
        }
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_photo(mut self, bytes: Vec<u8>, content_type: &str) -> Self {
        self.photo = Some(bytes);
        self.photo_content_type = Some(content_type.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        Report::open(
            Uuid::new_v4(),
            &NewReport::new("Pothole", Category::Roads, "MG Road"),
            None,
            None,
            Utc::now(),
        )
    }

    fn proof() -> ResolutionProof {
        ResolutionProof {
            evidence: EvidenceRef("/uploads/proof.jpg".into()),
            staff_location: Coordinate::new(1.0, 1.0).unwrap(),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_only_advances_forward() {
        use ReportStatus::*;
        let all = [Open, InProgress, Resolved, Closed];
        for (i, from) in all.iter().enumerate() {
            for (j, to) in all.iter().enumerate() {
                assert_eq!(from.can_transition_to(*to), j == i + 1, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ReportStatus::from_label("Pending"), Some(ReportStatus::Open));
        assert_eq!(ReportStatus::from_label("Progress"), Some(ReportStatus::InProgress));
        assert_eq!(ReportStatus::from_label("In Progress"), Some(ReportStatus::InProgress));
        assert_eq!(ReportStatus::from_label("IN_PROGRESS"), Some(ReportStatus::InProgress));
        assert_eq!(ReportStatus::from_label("Solved"), Some(ReportStatus::Resolved));
        assert_eq!(ReportStatus::from_label("closed"), Some(ReportStatus::Closed));
        assert_eq!(ReportStatus::from_label("rejected"), None);
        // Storage form does not accept synonyms
        assert!("pending".parse::<ReportStatus>().is_err());
        assert_eq!("in_progress".parse::<ReportStatus>().unwrap(), ReportStatus::InProgress);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut report = sample();
        let err = report.mark_resolved(proof(), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidStateForTransition {
                status: ReportStatus::Open,
                transition: "resolve",
                ..
            }
        ));
        assert_eq!(report.status, ReportStatus::Open);
        assert_eq!(report.version, 1);
        assert!(report.mark_verified(Utc::now()).is_err());
    }

    #[test]
    fn test_full_walk_keeps_invariants() {
        let mut report = sample();
        assert!(report.invariant_violation().is_none());

        report.assign_to(Uuid::new_v4(), Utc::now()).unwrap();
        assert!(report.invariant_violation().is_none());

        report.mark_resolved(proof(), Utc::now()).unwrap();
        assert!(report.invariant_violation().is_none());

        report.mark_verified(Utc::now()).unwrap();
        assert!(report.invariant_violation().is_none());
        assert_eq!(report.status, ReportStatus::Closed);
        assert_eq!(report.version, 4);
        assert!(report.assign_to(Uuid::new_v4(), Utc::now()).is_err());
    }

    #[test]
    fn test_detects_corrupted_rows() {
        let mut report = sample();
        report.status = ReportStatus::Resolved;
        assert!(report.invariant_violation().is_some());
    }

    #[test]
    fn test_new_report_validation() {
        assert!(NewReport::new("Broken lamp", Category::StreetLighting, "5th Cross")
            .validate()
            .is_ok());
        assert!(NewReport::new("   ", Category::Roads, "MG Road").validate().is_err());
        assert!(NewReport::new("Leak", Category::WaterLeakage, "").validate().is_err());
    }

    #[test]
    fn test_category_accepts_display_labels() {
        let c: Category = serde_json::from_str(r#""Waste Management""#).unwrap();
        assert_eq!(c, Category::WasteManagement);
        let c: Category = serde_json::from_str(r#""public_parks""#).unwrap();
        assert_eq!(c, Category::PublicParks);
    }
}
