use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::{data_url_content_type, decode_photo, AppState};
use crate::error::{LifecycleError, Result};
use crate::models::{Actor, Category, Coordinate, NewReport, ReportStatus};
use crate::services::PhotoUpload;

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub title: String,
    pub category: Category,
    pub location: String,
    #[serde(default)]
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Base64 image, optionally as a `data:` URL
    pub photo: Option<String>,
    pub photo_content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListReportsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub staff_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub photo: Option<String>,
    pub photo_content_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn photo_upload(photo: Option<&str>, content_type: Option<&str>) -> Result<Option<PhotoUpload>> {
    let Some(encoded) = photo.filter(|p| !p.trim().is_empty()) else {
        return Ok(None);
    };
    let bytes = decode_photo(encoded)?;
    let content_type = content_type
        .map(str::to_string)
        .or_else(|| data_url_content_type(encoded));
    Ok(Some(match content_type {
        Some(ct) => PhotoUpload::new(bytes, ct),
        None => PhotoUpload::jpeg(bytes),
    }))
}

pub async fn create_report(
    state: web::Data<AppState>,
    actor: Actor,
    req: web::Json<CreateReportRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let photo = photo_upload(req.photo.as_deref(), req.photo_content_type.as_deref())?;

    let mut input = NewReport::new(&req.title, req.category, &req.location)
        .with_description(&req.description);
    input.latitude = req.latitude;
    input.longitude = req.longitude;
    if let Some(photo) = photo {
        input = input.with_photo(photo.bytes, &photo.content_type);
    }

    let report = state.lifecycle.create(&actor, input).await?;
    Ok(HttpResponse::Created().json(report))
}

pub async fn list_reports(
    state: web::Data<AppState>,
    _actor: Actor,
    query: web::Query<ListReportsQuery>,
) -> Result<HttpResponse> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(label) if label.eq_ignore_ascii_case("all") => None,
        Some(label) => Some(ReportStatus::from_label(label).ok_or_else(|| {
            LifecycleError::InvalidInput(format!("unknown status filter: {}", label))
        })?),
    };

    let reports = state.lifecycle.list_all(status).await?;
    Ok(HttpResponse::Ok().json(reports))
}

pub async fn get_report(
    state: web::Data<AppState>,
    _actor: Actor,
    report_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let report = state.lifecycle.get(report_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn get_status_history(
    state: web::Data<AppState>,
    _actor: Actor,
    report_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let updates = state
        .lifecycle
        .status_history(report_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(updates))
}

pub async fn assign_report(
    state: web::Data<AppState>,
    actor: Actor,
    report_id: web::Path<Uuid>,
    req: web::Json<AssignRequest>,
) -> Result<HttpResponse> {
    let report = state
        .lifecycle
        .assign(&actor, report_id.into_inner(), req.staff_id)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn resolve_report(
    state: web::Data<AppState>,
    actor: Actor,
    report_id: web::Path<Uuid>,
    req: web::Json<ResolveRequest>,
) -> Result<HttpResponse> {
    let proof = photo_upload(req.photo.as_deref(), req.photo_content_type.as_deref())?;
    let location = Coordinate::from_parts(req.latitude, req.longitude)?;

    let report = state
        .lifecycle
        .resolve(&actor, report_id.into_inner(), proof, location)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn verify_report(
    state: web::Data<AppState>,
    actor: Actor,
    report_id: web::Path<Uuid>,
    req: web::Json<VerifyRequest>,
) -> Result<HttpResponse> {
    let location = Coordinate::from_parts(req.latitude, req.longitude)?;
    let report = state
        .lifecycle
        .verify(&actor, report_id.into_inner(), location)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn vote_report(
    state: web::Data<AppState>,
    actor: Actor,
    report_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let report = state
        .lifecycle
        .upvote(&actor, report_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn list_user_reports(
    state: web::Data<AppState>,
    _actor: Actor,
    user_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let reports = state
        .lifecycle
        .list_for_user(user_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(reports))
}

/// Staff ids an admin can assign to
pub async fn list_staff(state: web::Data<AppState>, actor: Actor) -> Result<HttpResponse> {
    let staff = state.lifecycle.assignments().list_staff(&actor).await?;
    Ok(HttpResponse::Ok().json(staff))
}

pub async fn list_staff_tasks(
    state: web::Data<AppState>,
    _actor: Actor,
    staff_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let reports = state
        .lifecycle
        .list_for_staff(staff_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(reports))
}
