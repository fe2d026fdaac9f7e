//! HTTP surface
//!
//! Handlers translate JSON and headers into lifecycle calls; every rule
//! lives in the services.

pub mod notifications;
pub mod reports;
pub mod rewards;

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::PathBuf;
use std::sync::Arc;

use crate::db::{LedgerRepository, ReportRepository, StaffDirectory};
use crate::error::{LifecycleError, Result};
use crate::services::{
    AssignmentRegistry, CoinLedger, EvidenceStore, LifecyclePolicy, NotificationInbox,
    ReportLifecycle,
};

/// Shared handles injected into every handler through `web::Data`
pub struct AppState {
    pub lifecycle: ReportLifecycle,
    pub ledger: CoinLedger,
    pub inbox: Arc<NotificationInbox>,
}

impl AppState {
    /// Wire the services on top of one store implementing every repository port.
    pub fn new<S>(
        store: Arc<S>,
        evidence: Arc<dyn EvidenceStore>,
        inbox: Arc<NotificationInbox>,
        policy: LifecyclePolicy,
    ) -> Self
    where
        S: ReportRepository + LedgerRepository + StaffDirectory + 'static,
    {
        let assignments = AssignmentRegistry::new(store.clone(), store.clone());
        Self {
            lifecycle: ReportLifecycle::new(store.clone(), assignments, evidence, policy),
            ledger: CoinLedger::new(store),
            inbox,
        }
    }
}

/// Room for the non-photo fields of a JSON body
const JSON_ENVELOPE_BYTES: usize = 64 * 1024;

/// Largest JSON body that can carry a base64 photo of `max_evidence_bytes`
pub(crate) fn json_body_limit(max_evidence_bytes: usize) -> usize {
    max_evidence_bytes.div_ceil(3) * 4 + JSON_ENVELOPE_BYTES
}

/// JSON extractor settings sized for a base64 photo of up to `max_evidence_bytes`.
///
/// Oversized or malformed bodies are answered with the regular `INVALID_INPUT`
/// error body.
pub fn json_config(max_evidence_bytes: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(json_body_limit(max_evidence_bytes))
        .error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
            let message = match &err {
                JsonPayloadError::OverflowKnownLength { length, limit } => format!(
                    "request body is {} bytes, limit is {} bytes",
                    length, limit
                ),
                JsonPayloadError::Overflow { limit } => {
                    format!("request body exceeds {} bytes", limit)
                }
                other => format!("malformed JSON body: {}", other),
            };
            LifecycleError::InvalidInput(message).into()
        })
}

/// Directory served under `/uploads`
#[derive(Debug, Clone)]
pub struct UploadDir(pub PathBuf);

/// Decode a base64 photo field, tolerating a `data:` URL prefix.
pub(crate) fn decode_photo(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| LifecycleError::InvalidInput(format!("photo is not valid base64: {}", e)))
}

/// Content type announced by a `data:` URL, if any
pub(crate) fn data_url_content_type(encoded: &str) -> Option<String> {
    encoded
        .split_once(";base64,")
        .and_then(|(prefix, _)| prefix.strip_prefix("data:"))
        .map(str::to_string)
}

/// Serve a stored evidence file by name
pub async fn serve_upload(
    dir: web::Data<UploadDir>,
    file_name: web::Path<String>,
) -> Result<HttpResponse> {
    let file_name = file_name.into_inner();
    let valid = !file_name.is_empty()
        && file_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !file_name.contains("..");
    if !valid {
        return Err(LifecycleError::InvalidInput(format!(
            "invalid file name: {}",
            file_name
        )));
    }

    let bytes = match tokio::fs::read(dir.0.join(&file_name)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HttpResponse::NotFound().finish())
        }
        Err(e) => return Err(LifecycleError::StorageUnavailable(e.to_string())),
    };

    let content_type = match file_name.rsplit('.').next() {
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    };
    Ok(HttpResponse::Ok().content_type(content_type).body(bytes))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/reports", web::post().to(reports::create_report))
            .route("/reports", web::get().to(reports::list_reports))
            .route("/reports/{id}", web::get().to(reports::get_report))
            .route("/reports/{id}/updates", web::get().to(reports::get_status_history))
            .route("/reports/{id}/assign", web::put().to(reports::assign_report))
            .route("/reports/{id}/resolve", web::put().to(reports::resolve_report))
            .route("/reports/{id}/verify", web::put().to(reports::verify_report))
            .route("/reports/{id}/vote", web::post().to(reports::vote_report))
            .route("/users/{id}/reports", web::get().to(reports::list_user_reports))
            .route("/staff", web::get().to(reports::list_staff))
            .route("/staff/{id}/tasks", web::get().to(reports::list_staff_tasks))
            .route("/notifications", web::get().to(notifications::list_notifications))
            .route(
                "/notifications/{id}/read",
                web::put().to(notifications::mark_notification_read),
            )
            .route("/rewards/balance", web::get().to(rewards::get_balance))
            .route("/rewards/history", web::get().to(rewards::get_history))
            .route("/rewards/redeem", web::post().to(rewards::redeem)),
    );
}
