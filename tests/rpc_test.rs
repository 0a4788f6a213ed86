use dealerd::{
    config::DaemonConfig, ipc::event::EventBroadcaster, settings, storage::Storage,
    visits::VisitLog, AppContext,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
/// Integration tests for the dealerd JSON-RPC server.
/// Spins up a real daemon on a free port and exercises the RPC surface.
use std::io::{Read as _, Write as _};
use std::net::TcpStream;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Start a daemon on a random port and return the WebSocket URL.
async fn start_test_daemon() -> (String, Arc<AppContext>) {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let port = get_free_port();

    let config = Arc::new(DaemonConfig::new(
        Some(port),
        Some(data_dir.clone()),
        Some("warn".to_string()),
        None,
    ));
    let storage = Arc::new(Storage::new(&data_dir).await.unwrap());
    settings::seed(&storage, &config.quota).await.unwrap();
    let broadcaster = Arc::new(EventBroadcaster::new());
    let visits = Arc::new(VisitLog::new(storage.clone(), (*broadcaster).clone()));

    let ctx = Arc::new(AppContext {
        config,
        storage,
        broadcaster,
        visits,
        started_at: std::time::Instant::now(),
        daemon_id: "test-daemon-id".to_string(),
        auth_token: String::new(),
    });

    let ctx_server = ctx.clone();
    tokio::spawn(async move {
        dealerd::ipc::run(ctx_server).await.ok();
    });

    // Give server a moment to bind
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let url = format!("ws://127.0.0.1:{}", ctx.config.port);
    (url, ctx)
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn ws_rpc(url: &str, method: &str, params: Value) -> Value {
    let (mut ws, _) = connect_async(url).await.expect("ws connect failed");

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params
    });
    ws.send(Message::Text(serde_json::to_string(&request).unwrap()))
        .await
        .unwrap();

    // Read messages until we get the response (skip notifications)
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = msg {
            let v: Value = serde_json::from_str(&text).unwrap();
            if v.get("id").is_some() {
                return v;
            }
        }
    }
}

#[tokio::test]
async fn test_daemon_ping() {
    let (url, _ctx) = start_test_daemon().await;
    let resp = ws_rpc(&url, "daemon.ping", json!({})).await;
    assert_eq!(resp["result"]["pong"], true);
}

#[tokio::test]
async fn test_daemon_status() {
    let (url, _ctx) = start_test_daemon().await;
    let resp = ws_rpc(&url, "daemon.status", json!({})).await;
    let result = &resp["result"];
    assert!(result["version"].is_string());
    assert!(result["uptime"].is_number());
    assert_eq!(result["shotsUsed"], 0);
    assert_eq!(result["maxShots"], 3);
    assert_eq!(result["daemonId"], "test-daemon-id");
}

#[tokio::test]
async fn test_method_not_found() {
    let (url, _ctx) = start_test_daemon().await;
    let resp = ws_rpc(&url, "no.such.method", json!({})).await;
    assert_eq!(resp["error"]["code"], -32601);
}

#[tokio::test]
async fn test_settings_defaults_and_edits() {
    let (url, _ctx) = start_test_daemon().await;

    // Fresh daemon: seeded defaults
    let resp = ws_rpc(&url, "settings.get", json!({})).await;
    let settings = &resp["result"]["settings"];
    assert_eq!(settings["trackedHostnames"], "");
    assert_eq!(settings["maxShots"], 3);
    assert_eq!(settings["shotDurationMs"], 6 * 60 * 1000);
    assert_eq!(settings["windowMs"], 24 * 60 * 60 * 1000);

    // Hostname list is stored verbatim
    let resp = ws_rpc(
        &url,
        "settings.setHostnames",
        json!({ "hostnames": "Reddit.com, news.ycombinator.com" }),
    )
    .await;
    assert_eq!(
        resp["result"]["settings"]["trackedHostnames"],
        "Reddit.com, news.ycombinator.com"
    );

    // Numeric fields: leading digits win, suffix is dropped
    let resp = ws_rpc(&url, "settings.setMaxShots", json!({ "value": "5x" })).await;
    assert_eq!(resp["result"]["applied"], true);
    assert_eq!(resp["result"]["settings"]["maxShots"], 5);

    // Minutes in, milliseconds stored
    let resp = ws_rpc(&url, "settings.setShotDuration", json!({ "value": "10" })).await;
    assert_eq!(resp["result"]["applied"], true);
    assert_eq!(resp["result"]["settings"]["shotDurationMs"], 10 * 60 * 1000);

    // Garbage is silently ignored — the old value stands
    let resp = ws_rpc(&url, "settings.setMaxShots", json!({ "value": "abc" })).await;
    assert_eq!(resp["result"]["applied"], false);
    assert_eq!(resp["result"]["settings"]["maxShots"], 5);

    let resp = ws_rpc(&url, "settings.setMaxShots", json!({ "value": "-2" })).await;
    assert_eq!(resp["result"]["applied"], false);
    assert_eq!(resp["result"]["settings"]["maxShots"], 5);
}

#[tokio::test]
async fn test_gate_full_cycle() {
    let (url, _ctx) = start_test_daemon().await;

    ws_rpc(
        &url,
        "settings.setHostnames",
        json!({ "hostnames": "reddit.com" }),
    )
    .await;

    // Untracked hostname: gate stays hidden
    let resp = ws_rpc(&url, "gate.state", json!({ "hostname": "example.com" })).await;
    assert_eq!(resp["result"]["state"]["kind"], "hidden");

    // Tracked hostname with no active shot: prompt with full quota
    let resp = ws_rpc(&url, "gate.state", json!({ "hostname": "reddit.com" })).await;
    let state = &resp["result"]["state"];
    assert_eq!(state["kind"], "prompt");
    assert_eq!(state["shotsUsed"], 0);
    assert_eq!(state["maxShots"], 3);
    assert_eq!(state["canConsume"], true);

    // Subdomains match the pattern too
    let resp = ws_rpc(&url, "gate.state", json!({ "hostname": "old.reddit.com" })).await;
    assert_eq!(resp["result"]["state"]["kind"], "prompt");

    // Consuming starts a timer for the full shot duration
    let resp = ws_rpc(&url, "shots.consume", json!({ "hostname": "reddit.com" })).await;
    let state = &resp["result"]["state"];
    assert_eq!(state["kind"], "timer");
    assert_eq!(state["remainingMs"], 6 * 60 * 1000);
    assert_eq!(state["remaining"], "06:00");
    assert_eq!(state["shotsUsed"], 1);

    // The gate now reports the running timer
    let resp = ws_rpc(&url, "gate.state", json!({ "hostname": "reddit.com" })).await;
    let state = &resp["result"]["state"];
    assert_eq!(state["kind"], "timer");
    assert!(state["remainingMs"].as_i64().unwrap() <= 6 * 60 * 1000);
    assert!(state["remainingMs"].as_i64().unwrap() > 0);

    // The shot is bound to its hostname — a sibling tracked site still prompts
    ws_rpc(
        &url,
        "settings.setHostnames",
        json!({ "hostnames": "reddit.com, twitter.com" }),
    )
    .await;
    let resp = ws_rpc(&url, "gate.state", json!({ "hostname": "twitter.com" })).await;
    let state = &resp["result"]["state"];
    assert_eq!(state["kind"], "prompt");
    assert_eq!(state["shotsUsed"], 1);

    let resp = ws_rpc(&url, "shots.list", json!({})).await;
    assert_eq!(resp["result"]["used"], 1);
    assert_eq!(resp["result"]["shots"][0]["hostname"], "reddit.com");
}

#[tokio::test]
async fn test_quota_is_shared_across_hostnames() {
    let (url, _ctx) = start_test_daemon().await;

    ws_rpc(&url, "settings.setMaxShots", json!({ "value": "1" })).await;

    let resp = ws_rpc(&url, "shots.consume", json!({ "hostname": "a.com" })).await;
    assert!(resp.get("error").is_none(), "first consume failed: {resp:?}");

    // One shot in the log blocks every hostname, not just a.com
    let resp = ws_rpc(&url, "shots.consume", json!({ "hostname": "b.com" })).await;
    assert_eq!(resp["error"]["code"], -32001);

    // The prompt for another tracked site reflects the spent quota
    ws_rpc(
        &url,
        "settings.setHostnames",
        json!({ "hostnames": "b.com" }),
    )
    .await;
    let resp = ws_rpc(&url, "gate.state", json!({ "hostname": "b.com" })).await;
    let state = &resp["result"]["state"];
    assert_eq!(state["kind"], "prompt");
    assert_eq!(state["canConsume"], false);
}

#[tokio::test]
async fn test_navigation_prunes_expired_shots() {
    let (url, ctx) = start_test_daemon().await;

    // Plant a shot two days old — well outside the 24h window
    let two_days_ago = chrono::Utc::now().timestamp_millis() - 48 * 60 * 60 * 1000;
    ctx.storage
        .record_shot_below_limit("reddit.com", two_days_ago, 99)
        .await
        .unwrap();

    // Loading events and events without a URL are acknowledged but ignored
    let resp = ws_rpc(
        &url,
        "tabs.navigated",
        json!({ "status": "loading", "url": "https://example.com/" }),
    )
    .await;
    assert_eq!(resp["result"]["pruned"], 0);

    let resp = ws_rpc(&url, "tabs.navigated", json!({ "status": "complete" })).await;
    assert_eq!(resp["result"]["pruned"], 0);

    // A completed load with a URL prunes — on any site, tracked or not
    let resp = ws_rpc(
        &url,
        "tabs.navigated",
        json!({ "status": "complete", "url": "https://example.com/page" }),
    )
    .await;
    assert_eq!(resp["result"]["pruned"], 1);

    let resp = ws_rpc(&url, "shots.list", json!({})).await;
    assert_eq!(resp["result"]["used"], 0);
}

#[tokio::test]
async fn test_shots_reset() {
    let (url, _ctx) = start_test_daemon().await;

    ws_rpc(&url, "shots.consume", json!({ "hostname": "a.com" })).await;
    ws_rpc(&url, "shots.consume", json!({ "hostname": "b.com" })).await;

    let resp = ws_rpc(&url, "shots.reset", json!({})).await;
    assert_eq!(resp["result"]["cleared"], 2);

    let resp = ws_rpc(&url, "shots.list", json!({})).await;
    assert_eq!(resp["result"]["used"], 0);

    // Quota is restored — consuming works again
    let resp = ws_rpc(&url, "shots.consume", json!({ "hostname": "a.com" })).await;
    assert!(resp.get("error").is_none());
}

#[tokio::test]
async fn test_push_notifications_reach_other_clients() {
    let (url, _ctx) = start_test_daemon().await;

    // Client B connects first and just listens
    let (mut listener, _) = connect_async(&url).await.expect("ws connect failed");
    // Give the server a moment to register B's broadcast subscription
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Client A spends a shot
    let resp = ws_rpc(&url, "shots.consume", json!({ "hostname": "reddit.com" })).await;
    assert!(resp.get("error").is_none());

    // B hears shots.changed then gate.changed without ever asking
    let mut methods = Vec::new();
    while methods.len() < 2 {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), listener.next())
            .await
            .expect("timed out waiting for push notification")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            let v: Value = serde_json::from_str(&text).unwrap();
            assert!(v.get("id").is_none(), "notifications carry no id: {v}");
            methods.push(v["method"].as_str().unwrap_or_default().to_string());
        }
    }
    assert_eq!(methods, vec!["shots.changed", "gate.changed"]);
}

#[tokio::test]
async fn test_auth_required_when_token_set() {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let port = get_free_port();

    let config = Arc::new(DaemonConfig::new(
        Some(port),
        Some(data_dir.clone()),
        Some("warn".to_string()),
        None,
    ));
    let storage = Arc::new(Storage::new(&data_dir).await.unwrap());
    settings::seed(&storage, &config.quota).await.unwrap();
    let broadcaster = Arc::new(EventBroadcaster::new());
    let visits = Arc::new(VisitLog::new(storage.clone(), (*broadcaster).clone()));
    let ctx = Arc::new(AppContext {
        config,
        storage,
        broadcaster,
        visits,
        started_at: std::time::Instant::now(),
        daemon_id: "test-daemon-id".to_string(),
        auth_token: "secret-token".to_string(),
    });
    let ctx_server = ctx.clone();
    tokio::spawn(async move {
        dealerd::ipc::run(ctx_server).await.ok();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let url = format!("ws://127.0.0.1:{port}");

    // Skipping auth gets the connection rejected
    let (mut ws, _) = connect_async(&url).await.expect("ws connect failed");
    ws.send(Message::Text(
        json!({ "jsonrpc": "2.0", "id": 1, "method": "daemon.ping", "params": {} }).to_string(),
    ))
    .await
    .unwrap();
    let msg = ws.next().await.unwrap().unwrap();
    let v: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(v["error"]["code"], -32004);

    // Authenticating first unlocks the session
    let (mut ws, _) = connect_async(&url).await.expect("ws connect failed");
    ws.send(Message::Text(
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "daemon.auth",
            "params": { "token": "secret-token" }
        })
        .to_string(),
    ))
    .await
    .unwrap();
    let msg = ws.next().await.unwrap().unwrap();
    let v: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(v["result"]["authenticated"], true);

    ws.send(Message::Text(
        json!({ "jsonrpc": "2.0", "id": 2, "method": "daemon.ping", "params": {} }).to_string(),
    ))
    .await
    .unwrap();
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = msg {
            let v: Value = serde_json::from_str(&text).unwrap();
            if v.get("id").is_some() {
                assert_eq!(v["result"]["pong"], true);
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_url, ctx) = start_test_daemon().await;
    let port = ctx.config.port;

    // Give the server a moment to be ready
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Use a blocking TCP connection in a spawn_blocking to avoid mixing sync I/O
    let result = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))?;
        stream.write_all(b"GET /health HTTP/1.0\r\nHost: localhost\r\n\r\n")?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        Ok::<String, std::io::Error>(response)
    })
    .await
    .unwrap()
    .expect("TCP connect failed");

    // Extract the JSON body (after the blank line separating headers from body)
    let body = result.split("\r\n\r\n").nth(1).unwrap_or(&result);
    let json: serde_json::Value = serde_json::from_str(body).expect("health body is not JSON");

    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime"].is_number());
    assert_eq!(json["shotsUsed"], 0);
    assert_eq!(json["maxShots"], 3);
    assert!(json["port"].is_number());
}
