use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::LedgerRepository;
use crate::error::{LifecycleError, Result};
use crate::models::{LedgerEntry, LedgerReason};

/// Civic-coin balances, derived from an append-only ledger
#[derive(Clone)]
pub struct CoinLedger {
    repo: Arc<dyn LedgerRepository>,
}

fn positive(amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(LifecycleError::InvalidAmount(amount));
    }
    Ok(amount)
}

impl CoinLedger {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Add coins and return the new balance
    pub async fn credit(&self, user_id: Uuid, amount: i64, reason: LedgerReason) -> Result<i64> {
        let amount = positive(amount)?;
        let balance = self
            .repo
            .append_entry(LedgerEntry::new(user_id, amount, reason, Utc::now()))
            .await?;
        tracing::info!(user_id = %user_id, amount, reason = reason.as_str(), balance, "Coins credited");
        Ok(balance)
    }

    /// Remove coins and return the new balance.
    ///
    /// Fails with `InsufficientBalance` and leaves the ledger untouched when
    /// the balance does not cover `amount`.
    pub async fn debit(&self, user_id: Uuid, amount: i64, reason: LedgerReason) -> Result<i64> {
        let amount = positive(amount)?;
        self.append_debit(LedgerEntry::new(user_id, -amount, reason, Utc::now()))
            .await
    }

    /// Spend `cost` coins on a catalog item
    pub async fn redeem(&self, user_id: Uuid, cost: i64, item: &str) -> Result<i64> {
        let cost = positive(cost)?;
        let item = item.trim();
        if item.is_empty() {
            return Err(LifecycleError::InvalidInput(
                "item name must not be blank".to_string(),
            ));
        }
        let entry = LedgerEntry::new(user_id, -cost, LedgerReason::RewardRedeemed, Utc::now())
            .with_memo(item);
        self.append_debit(entry).await
    }

    async fn append_debit(&self, entry: LedgerEntry) -> Result<i64> {
        let user_id = entry.user_id;
        let amount = -entry.delta;
        match self.repo.append_entry(entry).await {
            Ok(balance) => {
                tracing::info!(user_id = %user_id, amount, balance, "Coins debited");
                Ok(balance)
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, amount, error = %e, "Debit rejected");
                Err(e)
            }
        }
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<i64> {
        self.repo.balance(user_id).await
    }

    /// Every ledger entry for a user, oldest first
    pub async fn history(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.repo.entries(user_id).await
    }
}
