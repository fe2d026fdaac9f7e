use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Why coins moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    ReportFiled,
    IssueResolved,
    ResolutionVerified,
    RewardRedeemed,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::ReportFiled => "report_filed",
            LedgerReason::IssueResolved => "issue_resolved",
            LedgerReason::ResolutionVerified => "resolution_verified",
            LedgerReason::RewardRedeemed => "reward_redeemed",
        }
    }
}

impl FromStr for LedgerReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report_filed" => Ok(LedgerReason::ReportFiled),
            "issue_resolved" => Ok(LedgerReason::IssueResolved),
            "resolution_verified" => Ok(LedgerReason::ResolutionVerified),
            "reward_redeemed" => Ok(LedgerReason::RewardRedeemed),
            other => Err(format!("unknown ledger reason: {}", other)),
        }
    }
}

/// One civic-coin movement. A user's balance is the sum of their deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delta: i64,
    pub reason: LedgerReason,
    pub report_id: Option<Uuid>,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(user_id: Uuid, delta: i64, reason: LedgerReason, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            delta,
            reason,
            report_id: None,
            memo: None,
            created_at: now,
        }
    }

    pub fn for_report(mut self, report_id: Uuid) -> Self {
        self.report_id = Some(report_id);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}
