use actix_web::{web, HttpResponse};
use serde::Serialize;
use uuid::Uuid;

use super::AppState;
use crate::error::Result;
use crate::models::{Actor, Notification};

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub unread_count: i64,
    pub notifications: Vec<Notification>,
}

/// Caller's notifications, newest first
pub async fn list_notifications(state: web::Data<AppState>, actor: Actor) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(NotificationList {
        unread_count: state.inbox.unread_count(actor.id).await?,
        notifications: state.inbox.list_for(actor.id).await?,
    }))
}

pub async fn mark_notification_read(
    state: web::Data<AppState>,
    actor: Actor,
    notification_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let notification = state
        .inbox
        .mark_read(&actor, notification_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(notification))
}
