use std::sync::Mutex;

use anyhow::anyhow;
use rankbridge_core::{
    GroupId, PlatformUserId, PlatformUsername, RankValue, RoleId, RoleLadderEntry,
    VerificationCode,
};
use reqwest::{
    header::{HeaderValue, COOKIE},
    RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::core::PlatformEndpoints;

const SESSION_COOKIE_NAME: &str = ".ROBLOSECURITY";
const CSRF_TOKEN_HEADER: &str = "x-csrf-token";
const MAX_ENDPOINT_URL_CHARS: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum PlatformCallError {
    #[error("{operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation}: unexpected status {status}")]
    Status {
        operation: &'static str,
        status: u16,
    },
    #[error("{operation}: unreadable response")]
    Decode { operation: &'static str },
}

/// Session secret for authenticated platform calls. Never printed.
#[derive(Clone)]
pub struct PlatformCredential(String);

impl PlatformCredential {
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.to_owned())
    }

    fn cookie_header(&self) -> String {
        format!("{SESSION_COOKIE_NAME}={}", self.0)
    }
}

impl std::fmt::Debug for PlatformCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlatformCredential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub display_name: String,
    pub description: String,
}

/// A member's role in one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRank {
    pub role_id: RoleId,
    pub name: String,
    pub rank: RankValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub group_name: String,
    pub role: GroupRank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameActivity {
    pub name: String,
    pub players_online: u64,
    pub max_players: u64,
    pub total_visits: u64,
}

/// Everything the bridge needs from the game platform. Lookups report a missing subject
/// as `Ok(None)`; `Err` is reserved for calls that could not be completed.
pub(crate) trait PlatformApi {
    async fn resolve_user_id(
        &self,
        username: &PlatformUsername,
    ) -> Result<Option<PlatformUserId>, PlatformCallError>;

    async fn user_info(
        &self,
        user_id: PlatformUserId,
    ) -> Result<Option<UserProfile>, PlatformCallError>;

    async fn user_groups(
        &self,
        user_id: PlatformUserId,
    ) -> Result<Vec<GroupMembership>, PlatformCallError>;

    async fn group_roles(
        &self,
        group_id: GroupId,
    ) -> Result<Option<Vec<RoleLadderEntry>>, PlatformCallError>;

    async fn set_user_role(
        &self,
        credential: &PlatformCredential,
        group_id: GroupId,
        user_id: PlatformUserId,
        role_id: RoleId,
    ) -> Result<(), PlatformCallError>;

    async fn accept_join_request(
        &self,
        credential: &PlatformCredential,
        group_id: GroupId,
        user_id: PlatformUserId,
    ) -> Result<(), PlatformCallError>;

    async fn reject_join_request(
        &self,
        credential: &PlatformCredential,
        group_id: GroupId,
        user_id: PlatformUserId,
    ) -> Result<(), PlatformCallError>;

    async fn game_activity(&self, game_id: u64)
        -> Result<Option<GameActivity>, PlatformCallError>;

    async fn rank_in_group(
        &self,
        user_id: PlatformUserId,
        group_id: GroupId,
    ) -> Result<Option<GroupRank>, PlatformCallError> {
        Ok(self
            .user_groups(user_id)
            .await?
            .into_iter()
            .find(|membership| membership.group_id == group_id)
            .map(|membership| membership.role))
    }

    /// Ownership proof: the code must appear in the account's public profile description.
    async fn verify_profile_code(
        &self,
        user_id: PlatformUserId,
        code: &VerificationCode,
    ) -> Result<bool, PlatformCallError> {
        Ok(self
            .user_info(user_id)
            .await?
            .is_some_and(|profile| profile.description.contains(code.as_str())))
    }
}

#[derive(Deserialize)]
struct UsernamesResponse {
    data: Vec<UsernameMatch>,
}

#[derive(Deserialize)]
struct UsernameMatch {
    id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct UserGroupRolesResponse {
    data: Vec<UserGroupRole>,
}

#[derive(Deserialize)]
struct UserGroupRole {
    group: GroupSummary,
    role: RoleSummary,
}

#[derive(Deserialize)]
struct GroupSummary {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct RoleSummary {
    id: u64,
    name: String,
    rank: u32,
}

#[derive(Deserialize)]
struct GroupRolesResponse {
    roles: Vec<RoleSummary>,
}

#[derive(Deserialize)]
struct GamesResponse {
    data: Vec<GameDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameDetail {
    name: String,
    #[serde(default)]
    playing: u64,
    #[serde(default)]
    max_players: u64,
    #[serde(default)]
    visits: u64,
}

impl From<RoleSummary> for GroupRank {
    fn from(value: RoleSummary) -> Self {
        Self {
            role_id: RoleId(value.id),
            name: value.name,
            rank: RankValue(value.rank),
        }
    }
}

/// reqwest-backed client for the platform's public web APIs.
pub(crate) struct HttpPlatformClient {
    http: reqwest::Client,
    users_api_url: String,
    groups_api_url: String,
    games_api_url: String,
    csrf_token: Mutex<Option<HeaderValue>>,
}

impl HttpPlatformClient {
    pub(crate) fn new(
        http: reqwest::Client,
        endpoints: &PlatformEndpoints,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            users_api_url: validate_endpoint_url("users api", &endpoints.users_api_url)?,
            groups_api_url: validate_endpoint_url("groups api", &endpoints.groups_api_url)?,
            games_api_url: validate_endpoint_url("games api", &endpoints.games_api_url)?,
            csrf_token: Mutex::new(None),
        })
    }

    fn cached_csrf_token(&self) -> Option<HeaderValue> {
        self.csrf_token.lock().ok().and_then(|token| token.clone())
    }

    fn remember_csrf_token(&self, token: HeaderValue) {
        if let Ok(mut slot) = self.csrf_token.lock() {
            *slot = Some(token);
        }
    }

    /// Sends a cookie-authenticated request. A 403 that hands back a fresh anti-forgery
    /// token is answered once with that token; the rejected attempt changed nothing.
    async fn send_authenticated(
        &self,
        operation: &'static str,
        credential: &PlatformCredential,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, PlatformCallError> {
        let attempt = |token: Option<HeaderValue>| {
            let mut request = build().header(COOKIE, credential.cookie_header());
            if let Some(token) = token {
                request = request.header(CSRF_TOKEN_HEADER, token);
            }
            request.send()
        };

        let response = attempt(self.cached_csrf_token())
            .await
            .map_err(|source| PlatformCallError::Transport { operation, source })?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }
        let Some(token) = response.headers().get(CSRF_TOKEN_HEADER).cloned() else {
            return Ok(response);
        };
        tracing::debug!(event = "platform.csrf_refresh", operation);
        self.remember_csrf_token(token.clone());
        attempt(Some(token))
            .await
            .map_err(|source| PlatformCallError::Transport { operation, source })
    }

    async fn mutate(
        &self,
        operation: &'static str,
        credential: &PlatformCredential,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<(), PlatformCallError> {
        let response = self.send_authenticated(operation, credential, build).await?;
        if !response.status().is_success() {
            return Err(PlatformCallError::Status {
                operation,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

async fn send(
    operation: &'static str,
    request: RequestBuilder,
) -> Result<Response, PlatformCallError> {
    request
        .send()
        .await
        .map_err(|source| PlatformCallError::Transport { operation, source })
}

/// Decodes a lookup body; 404 and 400 mean the subject does not exist.
async fn decode_lookup<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> Result<Option<T>, PlatformCallError> {
    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Ok(None),
        status if status.is_success() => response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|_| PlatformCallError::Decode { operation }),
        status => Err(PlatformCallError::Status {
            operation,
            status: status.as_u16(),
        }),
    }
}

impl PlatformApi for HttpPlatformClient {
    async fn resolve_user_id(
        &self,
        username: &PlatformUsername,
    ) -> Result<Option<PlatformUserId>, PlatformCallError> {
        const OPERATION: &str = "resolve user id";
        let request = self
            .http
            .post(format!("{}/v1/usernames/users", self.users_api_url))
            .json(&serde_json::json!({
                "usernames": [username.as_str()],
                "excludeBannedUsers": true,
            }));
        let response = send(OPERATION, request).await?;
        let found: Option<UsernamesResponse> = decode_lookup(OPERATION, response).await?;
        Ok(found
            .and_then(|body| body.data.into_iter().next())
            .map(|user| PlatformUserId(user.id)))
    }

    async fn user_info(
        &self,
        user_id: PlatformUserId,
    ) -> Result<Option<UserProfile>, PlatformCallError> {
        const OPERATION: &str = "get user info";
        let request = self
            .http
            .get(format!("{}/v1/users/{user_id}", self.users_api_url));
        let response = send(OPERATION, request).await?;
        let found: Option<UserResponse> = decode_lookup(OPERATION, response).await?;
        Ok(found.map(|user| UserProfile {
            name: user.name,
            display_name: user.display_name,
            description: user.description,
        }))
    }

    async fn user_groups(
        &self,
        user_id: PlatformUserId,
    ) -> Result<Vec<GroupMembership>, PlatformCallError> {
        const OPERATION: &str = "list user groups";
        let request = self
            .http
            .get(format!("{}/v2/users/{user_id}/groups/roles", self.groups_api_url));
        let response = send(OPERATION, request).await?;
        let found: Option<UserGroupRolesResponse> = decode_lookup(OPERATION, response).await?;
        Ok(found
            .map(|body| body.data)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| GroupMembership {
                group_id: GroupId(entry.group.id),
                group_name: entry.group.name,
                role: GroupRank::from(entry.role),
            })
            .collect())
    }

    async fn group_roles(
        &self,
        group_id: GroupId,
    ) -> Result<Option<Vec<RoleLadderEntry>>, PlatformCallError> {
        const OPERATION: &str = "list group roles";
        let request = self
            .http
            .get(format!("{}/v1/groups/{group_id}/roles", self.groups_api_url));
        let response = send(OPERATION, request).await?;
        let found: Option<GroupRolesResponse> = decode_lookup(OPERATION, response).await?;
        Ok(found.map(|body| {
            body.roles
                .into_iter()
                .map(|role| RoleLadderEntry {
                    rank: RankValue(role.rank),
                    name: role.name,
                    role_id: RoleId(role.id),
                })
                .collect()
        }))
    }

    async fn set_user_role(
        &self,
        credential: &PlatformCredential,
        group_id: GroupId,
        user_id: PlatformUserId,
        role_id: RoleId,
    ) -> Result<(), PlatformCallError> {
        let url = format!("{}/v1/groups/{group_id}/users/{user_id}", self.groups_api_url);
        self.mutate("set user role", credential, || {
            self.http
                .patch(&url)
                .json(&serde_json::json!({ "roleId": role_id }))
        })
        .await
    }

    async fn accept_join_request(
        &self,
        credential: &PlatformCredential,
        group_id: GroupId,
        user_id: PlatformUserId,
    ) -> Result<(), PlatformCallError> {
        let url = format!(
            "{}/v1/groups/{group_id}/join-requests/users/{user_id}",
            self.groups_api_url
        );
        self.mutate("accept join request", credential, || {
            self.http.post(&url).json(&serde_json::json!({}))
        })
        .await
    }

    async fn reject_join_request(
        &self,
        credential: &PlatformCredential,
        group_id: GroupId,
        user_id: PlatformUserId,
    ) -> Result<(), PlatformCallError> {
        let url = format!(
            "{}/v1/groups/{group_id}/join-requests/users/{user_id}",
            self.groups_api_url
        );
        self.mutate("reject join request", credential, || self.http.delete(&url))
            .await
    }

    async fn game_activity(
        &self,
        game_id: u64,
    ) -> Result<Option<GameActivity>, PlatformCallError> {
        const OPERATION: &str = "get game activity";
        let request = self
            .http
            .get(format!("{}/v1/games?universeIds={game_id}", self.games_api_url));
        let response = send(OPERATION, request).await?;
        let found: Option<GamesResponse> = decode_lookup(OPERATION, response).await?;
        Ok(found
            .and_then(|body| body.data.into_iter().next())
            .map(|game| GameActivity {
                name: game.name,
                players_online: game.playing,
                max_players: game.max_players,
                total_visits: game.visits,
            }))
    }
}

fn validate_endpoint_url(label: &str, value: &str) -> anyhow::Result<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.len() > MAX_ENDPOINT_URL_CHARS {
        return Err(anyhow!("{label} url is invalid"));
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(anyhow!("{label} url must use http:// or https://"));
    }
    Ok(trimmed.to_owned())
}
