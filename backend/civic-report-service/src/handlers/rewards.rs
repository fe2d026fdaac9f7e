use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::Result;
use crate::models::Actor;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub cost: i64,
    pub item: String,
}

pub async fn get_balance(state: web::Data<AppState>, actor: Actor) -> Result<HttpResponse> {
    let balance = state.ledger.balance(actor.id).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id: actor.id,
        balance,
    }))
}

pub async fn get_history(state: web::Data<AppState>, actor: Actor) -> Result<HttpResponse> {
    let entries = state.ledger.history(actor.id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

pub async fn redeem(
    state: web::Data<AppState>,
    actor: Actor,
    req: web::Json<RedeemRequest>,
) -> Result<HttpResponse> {
    let balance = state.ledger.redeem(actor.id, req.cost, &req.item).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id: actor.id,
        balance,
    }))
}
