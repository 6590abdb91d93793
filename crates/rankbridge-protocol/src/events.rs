use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::PROTOCOL_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    RankSet,
    Promotion,
    Demotion,
    BranchRankSet,
    BranchPromotion,
    BranchDemotion,
    BranchRequestAccepted,
    BranchRequestRejected,
}

impl AuditKind {
    /// Dotted identifier used in logs.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::RankSet => "rank.set",
            Self::Promotion => "rank.promotion",
            Self::Demotion => "rank.demotion",
            Self::BranchRankSet => "branch.rank.set",
            Self::BranchPromotion => "branch.rank.promotion",
            Self::BranchDemotion => "branch.rank.demotion",
            Self::BranchRequestAccepted => "branch.request.accepted",
            Self::BranchRequestRejected => "branch.request.rejected",
        }
    }

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::RankSet => "Rank Change",
            Self::Promotion => "Promotion",
            Self::Demotion => "Demotion",
            Self::BranchRankSet => "Branch Rank Change",
            Self::BranchPromotion => "Branch Promotion",
            Self::BranchDemotion => "Branch Demotion",
            Self::BranchRequestAccepted => "Branch Request Accepted",
            Self::BranchRequestRejected => "Branch Request Rejected",
        }
    }

    #[must_use]
    pub const fn color(self) -> u32 {
        match self {
            Self::Promotion | Self::BranchPromotion | Self::BranchRequestAccepted => 0x57_F2_87,
            Self::Demotion | Self::BranchDemotion | Self::BranchRequestRejected => 0xED_42_45,
            Self::RankSet | Self::BranchRankSet => 0x58_65_F2,
        }
    }

    #[must_use]
    pub const fn is_branch_request(self) -> bool {
        matches!(
            self,
            Self::BranchRequestAccepted | Self::BranchRequestRejected
        )
    }
}

/// Who performed the audited action, as resolved through their linked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    pub chat_identity: String,
    pub username: String,
    pub rank_name: String,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub v: u16,
    pub event_id: String,
    pub kind: AuditKind,
    pub target_user: String,
    pub target_user_id: u64,
    pub actor: AuditActor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_rank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_rank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at_unix: i64,
}

impl AuditEvent {
    /// Starts an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        kind: AuditKind,
        target_user: impl Into<String>,
        target_user_id: u64,
        actor: AuditActor,
    ) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            event_id: Ulid::new().to_string(),
            kind,
            target_user: target_user.into(),
            target_user_id,
            actor,
            old_rank: None,
            new_rank: None,
            branch: None,
            reason: None,
            occurred_at_unix: now_unix(),
        }
    }

    #[must_use]
    pub fn with_ranks(mut self, old_rank: Option<String>, new_rank: impl Into<String>) -> Self {
        self.old_rank = old_rank;
        self.new_rank = Some(new_rank.into());
        self
    }

    #[must_use]
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    /// Blank reasons are dropped.
    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|value| !value.trim().is_empty());
        self
    }
}

fn now_unix() -> i64 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
