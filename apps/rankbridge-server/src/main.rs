#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use rankbridge_server::{build_router, init_tracing, AppConfig, BridgeSettings, PlatformEndpoints};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let platform_credential = std::env::var("RANKBRIDGE_PLATFORM_CREDENTIAL")
        .map_err(|_| anyhow::anyhow!("RANKBRIDGE_PLATFORM_CREDENTIAL is required for runtime"))?;
    let settings_path = std::env::var("RANKBRIDGE_CONFIG")
        .map_or_else(|_| PathBuf::from("./config.json"), PathBuf::from);
    let settings = BridgeSettings::from_file(&settings_path)?;
    let defaults = PlatformEndpoints::default();
    let app_config = AppConfig {
        data_dir: std::env::var("RANKBRIDGE_DATA_DIR")
            .map_or_else(|_| PathBuf::from("./data"), PathBuf::from),
        settings,
        platform: PlatformEndpoints {
            users_api_url: std::env::var("RANKBRIDGE_USERS_API_URL")
                .unwrap_or(defaults.users_api_url),
            groups_api_url: std::env::var("RANKBRIDGE_GROUPS_API_URL")
                .unwrap_or(defaults.groups_api_url),
            games_api_url: std::env::var("RANKBRIDGE_GAMES_API_URL")
                .unwrap_or(defaults.games_api_url),
        },
        platform_credential: Some(platform_credential),
        api_token: std::env::var("RANKBRIDGE_API_TOKEN").ok(),
        ..AppConfig::default()
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("RANKBRIDGE_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid RANKBRIDGE_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "rankbridge-server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
