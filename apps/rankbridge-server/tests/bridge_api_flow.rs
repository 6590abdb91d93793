use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Request, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use rankbridge_server::{build_router, AppConfig, BridgeSettings, IdSetting, PlatformEndpoints};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

const STUB_COOKIE: &str = ".ROBLOSECURITY=stub-cookie";
const STUB_CSRF_TOKEN: &str = "csrf-1";

/// In-process stand-in for the platform web APIs and the audit webhook.
#[derive(Default)]
struct StubPlatform {
    carol_description: Mutex<String>,
    role_changes: Mutex<Vec<(u64, u64, Value)>>,
    join_decisions: Mutex<Vec<(String, u64, u64)>>,
    csrf_challenges: AtomicUsize,
    role_change_delay: Mutex<Option<Duration>>,
    webhooks: Mutex<Vec<Value>>,
}

fn user_id_for(name: &str) -> Option<u64> {
    match name.to_ascii_lowercase().as_str() {
        "alice" => Some(1),
        "bob" => Some(2),
        "carol" => Some(3),
        _ => None,
    }
}

fn primary_roles() -> Value {
    json!([
        {"id": 11, "name": "Recruit", "rank": 1},
        {"id": 15, "name": "Private", "rank": 5},
        {"id": 18, "name": "Sergeant", "rank": 8},
        {"id": 20, "name": "Corporal", "rank": 10},
    ])
}

async fn resolve_usernames(Json(body): Json<Value>) -> Json<Value> {
    let data: Vec<Value> = body["usernames"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(user_id_for)
        .map(|id| json!({"id": id}))
        .collect();
    Json(json!({ "data": data }))
}

async fn user_info(
    State(stub): State<Arc<StubPlatform>>,
    Path(user_id): Path<u64>,
) -> impl IntoResponse {
    let (name, description) = match user_id {
        1 => ("Alice", String::new()),
        2 => ("Bob", String::new()),
        3 => ("Carol", stub.carol_description.lock().unwrap().clone()),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(json!({
        "id": user_id,
        "name": name,
        "displayName": format!("{name} the Brave"),
        "description": description,
    }))
    .into_response()
}

async fn user_groups(Path(user_id): Path<u64>) -> Json<Value> {
    let group = json!({"id": 100, "name": "Fort Drill"});
    let army = json!({"id": 200, "name": "Fort Drill Army"});
    let data = match user_id {
        1 => json!([
            {"group": group, "role": {"id": 20, "name": "Corporal", "rank": 10}},
            {"group": army, "role": {"id": 250, "name": "Officer", "rank": 50}},
        ]),
        3 => json!([{"group": group, "role": {"id": 15, "name": "Private", "rank": 5}}]),
        _ => json!([]),
    };
    Json(json!({ "data": data }))
}

async fn group_roles(Path(group_id): Path<u64>) -> impl IntoResponse {
    match group_id {
        100 => Json(json!({"groupId": 100, "roles": primary_roles()})).into_response(),
        200 => Json(json!({"groupId": 200, "roles": [
            {"id": 210, "name": "Cadet", "rank": 1},
            {"id": 250, "name": "Officer", "rank": 50},
        ]}))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Demands the session cookie, then answers the first tokenless call with a csrf challenge.
fn check_session(stub: &StubPlatform, headers: &HeaderMap) -> Option<axum::response::Response> {
    if headers.get("cookie").and_then(|v| v.to_str().ok()) != Some(STUB_COOKIE) {
        return Some(StatusCode::UNAUTHORIZED.into_response());
    }
    if headers.get("x-csrf-token").and_then(|v| v.to_str().ok()) != Some(STUB_CSRF_TOKEN) {
        stub.csrf_challenges.fetch_add(1, Ordering::SeqCst);
        return Some(
            (StatusCode::FORBIDDEN, [("x-csrf-token", STUB_CSRF_TOKEN)]).into_response(),
        );
    }
    None
}

async fn set_user_role(
    State(stub): State<Arc<StubPlatform>>,
    Path((group_id, user_id)): Path<(u64, u64)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Some(rejection) = check_session(&stub, &headers) {
        return rejection;
    }
    let delay = *stub.role_change_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    stub.role_changes
        .lock()
        .unwrap()
        .push((group_id, user_id, body));
    Json(json!({})).into_response()
}

async fn accept_join(
    State(stub): State<Arc<StubPlatform>>,
    Path((group_id, user_id)): Path<(u64, u64)>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Some(rejection) = check_session(&stub, &headers) {
        return rejection;
    }
    stub.join_decisions
        .lock()
        .unwrap()
        .push((String::from("accept"), group_id, user_id));
    Json(json!({})).into_response()
}

async fn reject_join(
    State(stub): State<Arc<StubPlatform>>,
    Path((group_id, user_id)): Path<(u64, u64)>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Some(rejection) = check_session(&stub, &headers) {
        return rejection;
    }
    stub.join_decisions
        .lock()
        .unwrap()
        .push((String::from("reject"), group_id, user_id));
    Json(json!({})).into_response()
}

async fn games(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let data = if query.get("universeIds").map(String::as_str) == Some("4242") {
        json!([{"name": "Fort Drill", "playing": 17, "maxPlayers": 40, "visits": 123_456}])
    } else {
        json!([])
    };
    Json(json!({ "data": data }))
}

async fn webhook(State(stub): State<Arc<StubPlatform>>, Json(body): Json<Value>) -> StatusCode {
    stub.webhooks.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn spawn_platform_stub() -> (String, Arc<StubPlatform>) {
    let stub = Arc::new(StubPlatform::default());
    let app = Router::new()
        .route("/v1/usernames/users", post(resolve_usernames))
        .route("/v1/users/{id}", get(user_info))
        .route("/v2/users/{id}/groups/roles", get(user_groups))
        .route("/v1/groups/{group}/roles", get(group_roles))
        .route("/v1/groups/{group}/users/{user}", patch(set_user_role))
        .route(
            "/v1/groups/{group}/join-requests/users/{user}",
            post(accept_join).delete(reject_join),
        )
        .route("/v1/games", get(games))
        .route("/webhook", post(webhook))
        .with_state(stub.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), stub)
}

fn temp_data_dir() -> PathBuf {
    std::env::temp_dir().join(format!("rankbridge-it-{}", ulid::Ulid::new()))
}

fn config_for(base_url: &str, data_dir: PathBuf) -> AppConfig {
    AppConfig {
        data_dir,
        settings: BridgeSettings {
            group_id: Some(IdSetting::Number(100)),
            game_id: Some(IdSetting::Text(String::from("4242"))),
            max_rank_can_assign: Some(rankbridge_core::RankValue(8)),
            branch_groups: BTreeMap::from([
                (String::from("Army"), IdSetting::Number(200)),
                (String::from("Navy"), IdSetting::Text(String::from("NAVY_GROUP_ID"))),
            ]),
            webhook_url: Some(format!("{base_url}/webhook")),
            ..BridgeSettings::default()
        },
        platform: PlatformEndpoints {
            users_api_url: base_url.to_owned(),
            groups_api_url: base_url.to_owned(),
            games_api_url: base_url.to_owned(),
        },
        platform_credential: Some(String::from("stub-cookie")),
        ..AppConfig::default()
    }
}

async fn seed_link(data_dir: &std::path::Path, identity: &str, username: &str) {
    tokio::fs::create_dir_all(data_dir).await.unwrap();
    let mut document = serde_json::Map::new();
    document.insert(identity.to_owned(), Value::from(username));
    tokio::fs::write(
        data_dir.join("account_links.json"),
        serde_json::to_vec_pretty(&Value::Object(document)).unwrap(),
    )
    .await
    .unwrap();
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_for_webhooks(stub: &StubPlatform, count: usize) -> Vec<Value> {
    for _ in 0..100 {
        let delivered = stub.webhooks.lock().unwrap().clone();
        if delivered.len() >= count {
            return delivered;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} webhook deliveries");
}

#[tokio::test]
async fn link_round_trip_proves_ownership_through_the_profile() {
    let (base_url, stub) = spawn_platform_stub().await;
    let data_dir = temp_data_dir();
    let app = build_router(&config_for(&base_url, data_dir.clone())).unwrap();

    let (status, unlinked) = call(&app, "GET", "/links/1001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unlinked["state"], "unlinked");

    let link = json!({"identity": "1001", "username": "Carol"});
    let (status, challenge) = call(&app, "POST", "/links", Some(link.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(challenge["status"], "verification_required");
    let code = challenge["code"].as_str().unwrap().to_owned();
    assert_eq!(code.len(), 8);

    let (_, pending) = call(&app, "GET", "/links/1001", None).await;
    assert_eq!(pending["state"], "pending");
    assert_eq!(pending["claimed_username"], "Carol");
    assert_eq!(pending["expires_at_unix_ms"], challenge["expires_at_unix_ms"]);

    *stub.carol_description.lock().unwrap() = format!("verify: {code}");
    let (status, linked) = call(&app, "POST", "/links", Some(link)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(linked["status"], "linked");
    assert_eq!(linked["rank"], json!({"name": "Private", "rank": 5}));

    let (_, state) = call(&app, "GET", "/links/1001", None).await;
    assert_eq!(state, json!({"state": "linked", "username": "Carol"}));

    let stored: Value = serde_json::from_slice(
        &tokio::fs::read(data_dir.join("account_links.json"))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(stored, json!({"1001": "Carol"}));
    let pending_file = tokio::fs::read_to_string(data_dir.join("pending_verifications.json"))
        .await
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&pending_file).unwrap(), json!({}));
}

#[tokio::test]
async fn promotion_negotiates_csrf_once_and_posts_an_audit_embed() {
    let (base_url, stub) = spawn_platform_stub().await;
    let data_dir = temp_data_dir();
    seed_link(&data_dir, "2002", "Alice").await;
    let app = build_router(&config_for(&base_url, data_dir)).unwrap();

    let request = json!({"caller": "2002", "username": "carol", "reason": "good drills"});
    let (status, body) = call(&app, "POST", "/ranks/promote", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["new_rank"], json!({"name": "Sergeant", "rank": 8}));
    assert_eq!(body["old_rank"], json!({"name": "Private", "rank": 5}));
    assert_eq!(body["performed_by"], "Alice");

    let (status, _) = call(&app, "POST", "/ranks/promote", Some(request)).await;
    assert_eq!(status, StatusCode::OK);

    let changes = stub.role_changes.lock().unwrap().clone();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0], (100, 3, json!({"roleId": 18})));
    assert_eq!(stub.csrf_challenges.load(Ordering::SeqCst), 1);

    let webhooks = wait_for_webhooks(&stub, 2).await;
    let embed = &webhooks[0]["embeds"][0];
    assert_eq!(embed["title"], "Promotion");
    let fields = embed["fields"].as_array().unwrap();
    assert!(fields
        .iter()
        .any(|field| field["name"] == "Reason" && field["value"] == "good drills"));
}

#[tokio::test]
async fn timed_out_request_still_finishes_the_mutation_and_audit() {
    let (base_url, stub) = spawn_platform_stub().await;
    *stub.role_change_delay.lock().unwrap() = Some(Duration::from_millis(600));
    let data_dir = temp_data_dir();
    seed_link(&data_dir, "2002", "Alice").await;
    let config = AppConfig {
        request_timeout: Duration::from_millis(150),
        ..config_for(&base_url, data_dir)
    };
    let app = build_router(&config).unwrap();

    let (status, _) = call(
        &app,
        "POST",
        "/ranks/promote",
        Some(json!({"caller": "2002", "username": "Carol"})),
    )
    .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert!(stub.role_changes.lock().unwrap().is_empty());

    let webhooks = wait_for_webhooks(&stub, 1).await;
    assert_eq!(webhooks[0]["embeds"][0]["title"], "Promotion");
    assert_eq!(
        stub.role_changes.lock().unwrap().clone(),
        vec![(100, 3, json!({"roleId": 18}))]
    );
}

#[tokio::test]
async fn denials_and_configuration_errors_map_to_statuses() {
    let (base_url, stub) = spawn_platform_stub().await;
    let data_dir = temp_data_dir();
    seed_link(&data_dir, "2002", "Alice").await;
    let app = build_router(&config_for(&base_url, data_dir)).unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/ranks/set",
        Some(json!({"caller": "2002", "username": "Carol", "role": "Corporal"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");
    assert_eq!(
        body["reason"],
        "you may assign at most rank 8 (requested rank: 10)"
    );

    let (status, body) = call(
        &app,
        "POST",
        "/ranks/demote",
        Some(json!({"caller": "9999", "username": "Carol"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, body) = call(
        &app,
        "POST",
        "/branches/Navy/ranks/promote",
        Some(json!({"caller": "2002", "username": "Carol"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "configuration_error");

    let (status, body) = call(
        &app,
        "POST",
        "/ranks/promote",
        Some(json!({"caller": "2002", "username": "Nobody"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = call(
        &app,
        "POST",
        "/links",
        Some(json!({"identity": "1001", "username": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = call(
        &app,
        "POST",
        "/links",
        Some(json!({"identity": "2002", "username": "Carol"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("already linked to Alice"));

    assert!(stub.role_changes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn branch_join_requests_reach_the_branch_group() {
    let (base_url, stub) = spawn_platform_stub().await;
    let data_dir = temp_data_dir();
    seed_link(&data_dir, "2002", "Alice").await;
    let app = build_router(&config_for(&base_url, data_dir)).unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/branches/army/join-requests",
        Some(json!({"caller": "2002", "username": "Bob", "decision": "accept"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "accept");
    assert_eq!(body["user_id"], 2);

    let (status, _) = call(
        &app,
        "POST",
        "/branches/Army/join-requests",
        Some(json!({"caller": "2002", "username": "Carol", "decision": "reject", "reason": "full"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        stub.join_decisions.lock().unwrap().clone(),
        vec![
            (String::from("accept"), 200, 2),
            (String::from("reject"), 200, 3),
        ]
    );
    let webhooks = wait_for_webhooks(&stub, 2).await;
    let titles: Vec<&str> = webhooks
        .iter()
        .map(|hook| hook["embeds"][0]["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Branch Request Accepted"));
    assert!(titles.contains(&"Branch Request Rejected"));
}

#[tokio::test]
async fn read_only_queries_report_platform_state() {
    let (base_url, _stub) = spawn_platform_stub().await;
    let app = build_router(&config_for(&base_url, temp_data_dir())).unwrap();

    let (status, rank) = call(&app, "GET", "/ranks/Carol", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rank["display_name"], "Carol the Brave");
    assert_eq!(rank["rank"], json!({"name": "Private", "rank": 5}));

    let (status, groups) = call(&app, "GET", "/users/alice/groups", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups["user_id"], 1);
    assert_eq!(groups["groups"].as_array().unwrap().len(), 2);

    let (status, activity) = call(&app, "GET", "/game/activity", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activity["players_online"], 17);
    assert_eq!(activity["total_visits"], 123_456);

    let (status, missing) = call(&app, "GET", "/ranks/Bob", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"], "not_found");
}

#[tokio::test]
async fn unreachable_platform_is_an_external_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let app = build_router(&config_for(&base_url, temp_data_dir())).unwrap();

    let (status, body) = call(&app, "GET", "/ranks/Carol", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "external_call_failure");
}
