use std::future::Future;

use axum::{
    extract::{FromRequest, Json, Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
};
use serde::de::DeserializeOwned;
use rankbridge_core::{BranchName, ChatIdentity, PlatformUsername};

use super::{
    core::AppState,
    errors::{ApiFailure, BridgeError},
    permissions::RankScope,
    platform::GameActivity,
    ranks::{JoinRequestDecision, RankChangeRequest, RankOperation},
    types::{
        GroupListResponse, GroupMembershipView, JoinDecisionResponse, JoinRequestBody,
        LinkRequest, LinkResponse, LinkStateResponse, RankChangeResponse, RankQueryResponse,
        SetRankRequest, StepRankRequest,
    },
};

/// JSON body extractor whose rejections use the bridge error envelope.
pub(crate) struct ApiJson<T>(pub(crate) T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiFailure;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Runs engine work on its own task so a dropped request cannot cancel it halfway.
async fn run_detached<T, F>(work: F) -> Result<T, ApiFailure>
where
    F: Future<Output = Result<T, BridgeError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(ApiFailure::from),
        Err(e) => {
            tracing::error!(event = "request.task_failed", error = %e);
            Err(ApiFailure::Internal)
        }
    }
}

fn require_api_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiFailure> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiFailure::Unauthorized)?;
    if !tokens_match(expected, provided) {
        return Err(ApiFailure::Unauthorized);
    }
    Ok(())
}

fn tokens_match(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len()
        && expected
            .bytes()
            .zip(provided.bytes())
            .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn parse_identity(raw: String) -> Result<ChatIdentity, ApiFailure> {
    ChatIdentity::try_from(raw).map_err(|_| ApiFailure::InvalidRequest("chat identity is invalid"))
}

fn parse_username(raw: String) -> Result<PlatformUsername, ApiFailure> {
    PlatformUsername::try_from(raw.trim().to_owned())
        .map_err(|_| ApiFailure::InvalidRequest("platform username is invalid"))
}

fn parse_branch(raw: String) -> Result<BranchName, ApiFailure> {
    BranchName::try_from(raw).map_err(|_| ApiFailure::InvalidRequest("branch name is invalid"))
}

pub(crate) async fn create_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<LinkRequest>,
) -> Result<Json<LinkResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let identity = parse_identity(payload.identity)?;
    let username = parse_username(payload.username)?;
    let bridge = state.bridge.clone();
    let outcome =
        run_detached(async move { bridge.request_link(&identity, &username).await }).await?;
    Ok(Json(LinkResponse::from(outcome)))
}

pub(crate) async fn change_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<LinkRequest>,
) -> Result<Json<LinkResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let identity = parse_identity(payload.identity)?;
    let username = parse_username(payload.username)?;
    let bridge = state.bridge.clone();
    let outcome =
        run_detached(async move { bridge.request_change(&identity, &username).await }).await?;
    Ok(Json(LinkResponse::from(outcome)))
}

pub(crate) async fn get_link_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> Result<Json<LinkStateResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let identity = parse_identity(identity)?;
    let bridge = state.bridge.clone();
    let link_state = run_detached(async move {
        let link_state = bridge.link_state(&identity).await;
        Ok::<_, BridgeError>(link_state)
    })
    .await?;
    Ok(Json(LinkStateResponse::from_state(
        link_state,
        state.bridge.verification_ttl,
    )))
}

async fn change_rank(
    state: AppState,
    scope: RankScope,
    caller: String,
    username: String,
    operation: RankOperation,
    reason: Option<String>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    let request = RankChangeRequest {
        caller: parse_identity(caller)?,
        scope,
        target: parse_username(username)?,
        operation,
        reason,
    };
    let bridge = state.bridge.clone();
    let outcome = run_detached(async move { bridge.change_rank(request).await }).await?;
    Ok(Json(RankChangeResponse::from(outcome)))
}

pub(crate) async fn set_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<SetRankRequest>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let operation = RankOperation::Set { role: payload.role };
    change_rank(
        state,
        RankScope::Primary,
        payload.caller,
        payload.username,
        operation,
        payload.reason,
    )
    .await
}

pub(crate) async fn promote_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<StepRankRequest>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    change_rank(
        state,
        RankScope::Primary,
        payload.caller,
        payload.username,
        RankOperation::Promote,
        payload.reason,
    )
    .await
}

pub(crate) async fn demote_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<StepRankRequest>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    change_rank(
        state,
        RankScope::Primary,
        payload.caller,
        payload.username,
        RankOperation::Demote,
        payload.reason,
    )
    .await
}

pub(crate) async fn set_branch_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    ApiJson(payload): ApiJson<SetRankRequest>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let scope = RankScope::Branch(parse_branch(branch)?);
    let operation = RankOperation::Set { role: payload.role };
    change_rank(
        state,
        scope,
        payload.caller,
        payload.username,
        operation,
        payload.reason,
    )
    .await
}

pub(crate) async fn promote_branch_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    ApiJson(payload): ApiJson<StepRankRequest>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let scope = RankScope::Branch(parse_branch(branch)?);
    change_rank(
        state,
        scope,
        payload.caller,
        payload.username,
        RankOperation::Promote,
        payload.reason,
    )
    .await
}

pub(crate) async fn demote_branch_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    ApiJson(payload): ApiJson<StepRankRequest>,
) -> Result<Json<RankChangeResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let scope = RankScope::Branch(parse_branch(branch)?);
    change_rank(
        state,
        scope,
        payload.caller,
        payload.username,
        RankOperation::Demote,
        payload.reason,
    )
    .await
}

pub(crate) async fn decide_branch_join_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    ApiJson(payload): ApiJson<JoinRequestBody>,
) -> Result<Json<JoinDecisionResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let request = JoinRequestDecision {
        caller: parse_identity(payload.caller)?,
        branch: parse_branch(branch)?,
        target: parse_username(payload.username)?,
        decision: payload.decision.into(),
        reason: payload.reason,
    };
    let bridge = state.bridge.clone();
    let outcome = run_detached(async move { bridge.decide_join_request(request).await }).await?;
    Ok(Json(JoinDecisionResponse::from(outcome)))
}

pub(crate) async fn get_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<Json<RankQueryResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let username = parse_username(username)?;
    let bridge = state.bridge.clone();
    let lookup = run_detached(async move { bridge.rank_of(&username).await }).await?;
    Ok(Json(RankQueryResponse::from(lookup)))
}

pub(crate) async fn get_user_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<Json<GroupListResponse>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let username = parse_username(username)?;
    let bridge = state.bridge.clone();
    let (user_id, groups) = run_detached(async move { bridge.groups_of(&username).await }).await?;
    Ok(Json(GroupListResponse {
        user_id: user_id.get(),
        groups: groups.into_iter().map(GroupMembershipView::from).collect(),
    }))
}

pub(crate) async fn get_game_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<GameActivity>, ApiFailure> {
    require_api_token(&state, &headers)?;
    let bridge = state.bridge.clone();
    let activity = run_detached(async move { bridge.game_activity().await }).await?;
    Ok(Json(activity))
}

#[cfg(test)]
mod tests {
    use super::tokens_match;

    #[test]
    fn token_comparison_requires_exact_match() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3cres"));
        assert!(!tokens_match("s3cret", "s3cret-longer"));
        assert!(!tokens_match("s3cret", ""));
    }
}
