use axum::Json;
use serde::{Deserialize, Serialize};

use super::{
    platform::{GroupMembership, GroupRank},
    queries::RankLookup,
    ranks::{JoinDecision, JoinDecisionOutcome, RankChangeOutcome},
    verification::{LinkState, VerificationOutcome},
};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: &'static str,
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkRequest {
    pub(crate) identity: String,
    pub(crate) username: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum LinkResponse {
    Linked {
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_username: Option<String>,
        rank: RankView,
    },
    VerificationRequired {
        username: String,
        code: String,
        expires_at_unix_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_username: Option<String>,
    },
}

impl From<VerificationOutcome> for LinkResponse {
    fn from(value: VerificationOutcome) -> Self {
        match value {
            VerificationOutcome::Linked {
                username,
                previous,
                rank,
            } => Self::Linked {
                username: username.into(),
                previous_username: previous.map(Into::into),
                rank: RankView::from(rank),
            },
            VerificationOutcome::VerificationRequired {
                code,
                username,
                expires_at_unix_ms,
                current_link,
            } => Self::VerificationRequired {
                username: username.into(),
                code: code.into(),
                expires_at_unix_ms,
                current_username: current_link.map(Into::into),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub(crate) enum LinkStateResponse {
    Unlinked,
    Pending {
        claimed_username: String,
        expires_at_unix_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        linked_username: Option<String>,
    },
    Linked {
        username: String,
    },
}

impl LinkStateResponse {
    pub(crate) fn from_state(state: LinkState, ttl: std::time::Duration) -> Self {
        match state {
            LinkState::Unlinked => Self::Unlinked,
            LinkState::Pending { pending, linked } => Self::Pending {
                expires_at_unix_ms: pending.expires_at_unix_ms(ttl),
                claimed_username: pending.claimed_username.into(),
                linked_username: linked.map(Into::into),
            },
            LinkState::Linked { username } => Self::Linked {
                username: username.into(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetRankRequest {
    pub(crate) caller: String,
    pub(crate) username: String,
    pub(crate) role: String,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StepRankRequest {
    pub(crate) caller: String,
    pub(crate) username: String,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RankView {
    pub(crate) name: String,
    pub(crate) rank: u32,
}

impl From<GroupRank> for RankView {
    fn from(value: GroupRank) -> Self {
        Self {
            name: value.name,
            rank: value.rank.get(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RankChangeResponse {
    pub(crate) username: String,
    pub(crate) user_id: u64,
    pub(crate) old_rank: Option<RankView>,
    pub(crate) new_rank: RankView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) branch: Option<String>,
    pub(crate) performed_by: String,
}

impl From<RankChangeOutcome> for RankChangeResponse {
    fn from(value: RankChangeOutcome) -> Self {
        Self {
            username: value.target.into(),
            user_id: value.target_user_id.get(),
            old_rank: value.old_rank.map(RankView::from),
            new_rank: RankView {
                name: value.new_rank.name,
                rank: value.new_rank.rank.get(),
            },
            branch: value.branch.map(Into::into),
            performed_by: value.performed_by.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct JoinRequestBody {
    pub(crate) caller: String,
    pub(crate) username: String,
    pub(crate) decision: JoinDecisionValue,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum JoinDecisionValue {
    Accept,
    Reject,
}

impl From<JoinDecisionValue> for JoinDecision {
    fn from(value: JoinDecisionValue) -> Self {
        match value {
            JoinDecisionValue::Accept => Self::Accept,
            JoinDecisionValue::Reject => Self::Reject,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JoinDecisionResponse {
    pub(crate) username: String,
    pub(crate) user_id: u64,
    pub(crate) branch: String,
    pub(crate) decision: &'static str,
    pub(crate) performed_by: String,
}

impl From<JoinDecisionOutcome> for JoinDecisionResponse {
    fn from(value: JoinDecisionOutcome) -> Self {
        Self {
            username: value.target.into(),
            user_id: value.target_user_id.get(),
            branch: value.branch.into(),
            decision: value.decision.as_str(),
            performed_by: value.performed_by.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RankQueryResponse {
    pub(crate) user_id: u64,
    pub(crate) username: String,
    pub(crate) display_name: String,
    pub(crate) rank: RankView,
}

impl From<RankLookup> for RankQueryResponse {
    fn from(value: RankLookup) -> Self {
        Self {
            user_id: value.user_id.get(),
            username: value.username,
            display_name: value.display_name,
            rank: RankView::from(value.rank),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GroupListResponse {
    pub(crate) user_id: u64,
    pub(crate) groups: Vec<GroupMembershipView>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GroupMembershipView {
    pub(crate) group_id: u64,
    pub(crate) group_name: String,
    pub(crate) role: RankView,
}

impl From<GroupMembership> for GroupMembershipView {
    fn from(value: GroupMembership) -> Self {
        Self {
            group_id: value.group_id.get(),
            group_name: value.group_name,
            role: RankView::from(value.role),
        }
    }
}
