use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ReportStatus, Role};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Actor {actor_id} ({role}) may not {action}")]
    WrongActor {
        actor_id: Uuid,
        role: Role,
        action: &'static str,
    },

    #[error("Cannot {transition} report {report_id} while it is {status}")]
    InvalidStateForTransition {
        report_id: Uuid,
        status: ReportStatus,
        transition: &'static str,
    },

    #[error("You are {distance_meters:.0}m away from the issue (limit {limit_meters:.0}m)")]
    GeofenceViolation {
        distance_meters: f64,
        limit_meters: f64,
    },

    #[error("A proof photo is required to resolve a report")]
    MissingEvidence,

    #[error("Current GPS location is required")]
    MissingLocation,

    #[error("Staff member not found: {0}")]
    StaffNotFound(Uuid),

    #[error("Insufficient balance: have {balance}, need {requested}")]
    InsufficientBalance { balance: i64, requested: i64 },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Evidence storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Notification delivery failed: {0}")]
    NotificationDeliveryFailed(String),

    #[error("Report not found: {0}")]
    ReportNotFound(Uuid),

    #[error("Notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("User {user_id} already voted for report {report_id}")]
    AlreadyVoted { report_id: Uuid, user_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::WrongActor { .. } => "WRONG_ACTOR",
            LifecycleError::InvalidStateForTransition { .. } => "INVALID_STATE_FOR_TRANSITION",
            LifecycleError::GeofenceViolation { .. } => "GEOFENCE_VIOLATION",
            LifecycleError::MissingEvidence => "MISSING_EVIDENCE",
            LifecycleError::MissingLocation => "MISSING_LOCATION",
            LifecycleError::StaffNotFound(_) => "STAFF_NOT_FOUND",
            LifecycleError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LifecycleError::InvalidAmount(_) => "INVALID_AMOUNT",
            LifecycleError::InvalidCoordinate(_) => "INVALID_COORDINATE",
            LifecycleError::InvalidInput(_) => "INVALID_INPUT",
            LifecycleError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            LifecycleError::NotificationDeliveryFailed(_) => "NOTIFICATION_DELIVERY_FAILED",
            LifecycleError::ReportNotFound(_) => "REPORT_NOT_FOUND",
            LifecycleError::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            LifecycleError::AlreadyVoted { .. } => "ALREADY_VOTED",
            LifecycleError::Database(_) => "DATABASE_ERROR",
            LifecycleError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_meters: Option<f64>,
}

impl ResponseError for LifecycleError {
    fn status_code(&self) -> StatusCode {
        match self {
            LifecycleError::WrongActor { .. } => StatusCode::FORBIDDEN,
            LifecycleError::InvalidStateForTransition { .. }
            | LifecycleError::InsufficientBalance { .. }
            | LifecycleError::AlreadyVoted { .. } => StatusCode::CONFLICT,
            LifecycleError::GeofenceViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LifecycleError::MissingEvidence
            | LifecycleError::MissingLocation
            | LifecycleError::InvalidAmount(_)
            | LifecycleError::InvalidCoordinate(_)
            | LifecycleError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LifecycleError::StaffNotFound(_)
            | LifecycleError::ReportNotFound(_)
            | LifecycleError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            LifecycleError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LifecycleError::NotificationDeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            LifecycleError::Database(_) | LifecycleError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (distance_meters, limit_meters) = match self {
            LifecycleError::GeofenceViolation {
                distance_meters,
                limit_meters,
            } => (Some(*distance_meters), Some(*limit_meters)),
            _ => (None, None),
        };

        // Never leak driver details to clients.
        let message = match self {
            LifecycleError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Database error".to_string()
            }
            LifecycleError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.code(),
            message,
            distance_meters,
            limit_meters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geofence_message_carries_distance() {
        let err = LifecycleError::GeofenceViolation {
            distance_meters: 243.4,
            limit_meters: 200.0,
        };
        assert_eq!(
            err.to_string(),
            "You are 243m away from the issue (limit 200m)"
        );
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            LifecycleError::MissingEvidence.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LifecycleError::StaffNotFound(Uuid::new_v4()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LifecycleError::InvalidStateForTransition {
                report_id: Uuid::new_v4(),
                status: ReportStatus::Closed,
                transition: "resolve",
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LifecycleError::StorageUnavailable("disk full".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
