use anyhow::anyhow;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, StatusCode},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    core::{AppConfig, AppState},
    handlers::{
        change_link, create_link, decide_branch_join_request, demote_branch_rank, demote_rank,
        get_game_activity, get_link_state, get_rank, get_user_groups, promote_branch_rank,
        promote_rank, set_branch_rank, set_rank,
    },
    types::health,
};

/// Build the axum router for the bridge API.
///
/// # Errors
/// Returns an error if the configuration or settings are invalid.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    if config.max_body_bytes == 0 {
        return Err(anyhow!("max body bytes must be at least 1 byte"));
    }
    if config.request_timeout.is_zero() {
        return Err(anyhow!("request timeout must be at least 1 second"));
    }

    let app_state = AppState::new(config)?;
    let request_id_header = HeaderName::from_static("x-request-id");

    let routes = Router::new()
        .route("/health", get(health))
        .route("/links", post(create_link))
        .route("/links/change", post(change_link))
        .route("/links/{identity}", get(get_link_state))
        .route("/ranks/set", post(set_rank))
        .route("/ranks/promote", post(promote_rank))
        .route("/ranks/demote", post(demote_rank))
        .route("/ranks/{username}", get(get_rank))
        .route("/branches/{branch}/ranks/set", post(set_branch_rank))
        .route("/branches/{branch}/ranks/promote", post(promote_branch_rank))
        .route("/branches/{branch}/ranks/demote", post(demote_branch_rank))
        .route(
            "/branches/{branch}/join-requests",
            post(decide_branch_join_request),
        )
        .route("/users/{username}/groups", get(get_user_groups))
        .route("/game/activity", get(get_game_activity));

    Ok(routes
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                )),
        ))
}
