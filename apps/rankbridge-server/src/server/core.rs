use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;

use super::{
    audit::WebhookNotifier,
    engine::Bridge,
    platform::{HttpPlatformClient, PlatformCredential},
    settings::{validate_settings, BridgeSettings},
    store::{JsonFileStore, PendingVerification},
};
use rankbridge_core::PlatformUsername;

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_VERIFICATION_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_USERS_API_URL: &str = "https://users.roblox.com";
pub const DEFAULT_GROUPS_API_URL: &str = "https://groups.roblox.com";
pub const DEFAULT_GAMES_API_URL: &str = "https://games.roblox.com";
pub const ACCOUNT_LINKS_FILE: &str = "account_links.json";
pub const PENDING_VERIFICATIONS_FILE: &str = "pending_verifications.json";
const MAX_API_TOKEN_CHARS: usize = 512;

pub(crate) type LinkStore = JsonFileStore<PlatformUsername>;
pub(crate) type PendingStore = JsonFileStore<PendingVerification>;
pub(crate) type HttpBridge = Bridge<HttpPlatformClient, LinkStore, PendingStore>;

/// Base URLs of the platform web APIs the bridge talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformEndpoints {
    pub users_api_url: String,
    pub groups_api_url: String,
    pub games_api_url: String,
}

impl Default for PlatformEndpoints {
    fn default() -> Self {
        Self {
            users_api_url: String::from(DEFAULT_USERS_API_URL),
            groups_api_url: String::from(DEFAULT_GROUPS_API_URL),
            games_api_url: String::from(DEFAULT_GAMES_API_URL),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub verification_ttl: Duration,
    pub platform_timeout: Duration,
    pub data_dir: PathBuf,
    pub settings: BridgeSettings,
    pub platform: PlatformEndpoints,
    pub platform_credential: Option<String>,
    pub api_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            verification_ttl: Duration::from_secs(DEFAULT_VERIFICATION_TTL_SECS),
            platform_timeout: Duration::from_secs(DEFAULT_PLATFORM_TIMEOUT_SECS),
            data_dir: PathBuf::from("./data"),
            settings: BridgeSettings::default(),
            platform: PlatformEndpoints::default(),
            platform_credential: None,
            api_token: None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) bridge: Arc<HttpBridge>,
    pub(crate) api_token: Option<Arc<str>>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let (settings, warnings) = validate_settings(&config.settings)?;
        for warning in &warnings {
            tracing::warn!(event = "settings.warning", %warning);
        }
        if config.verification_ttl.is_zero() {
            return Err(anyhow!("verification ttl must be at least 1 second"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.platform_timeout)
            .build()
            .map_err(|e| anyhow!("http client init failed: {e}"))?;
        let platform = HttpPlatformClient::new(http_client.clone(), &config.platform)?;
        let credential = match config.platform_credential.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Some(PlatformCredential::new(value)),
            _ => {
                tracing::warn!(
                    event = "settings.warning",
                    warning = "no platform credential configured; rank mutations are disabled"
                );
                None
            }
        };
        let notifier = WebhookNotifier::new(
            http_client,
            settings.audit_endpoint.clone(),
            settings.branch_audit_endpoint.clone(),
        );

        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| anyhow!("data directory init failed: {e}"))?;
        let links = JsonFileStore::new(config.data_dir.join(ACCOUNT_LINKS_FILE));
        let pending = JsonFileStore::new(config.data_dir.join(PENDING_VERIFICATIONS_FILE));

        let bridge = Bridge::new(platform, links, pending, settings, Arc::new(notifier))
            .with_credential(credential)
            .with_verification_ttl(config.verification_ttl);

        Ok(Self {
            bridge: Arc::new(bridge),
            api_token: build_api_token(config.api_token.as_deref())?,
        })
    }
}

fn build_api_token(value: Option<&str>) -> anyhow::Result<Option<Arc<str>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_API_TOKEN_CHARS {
        return Err(anyhow!(
            "api token must be between 1 and {MAX_API_TOKEN_CHARS} characters"
        ));
    }
    Ok(Some(Arc::from(trimmed)))
}

pub(crate) fn now_unix_ms() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
