//! Loopback end-to-end tests driving a real `axum::serve` instance: a
//! `tokio-tungstenite` client stands in for Playwright, and
//! [`cdp_relay::testutil::mock_extension::MockExtension`] stands in for
//! the browser extension. Mirrors the scenarios in the design document,
//! in the style of the teacher's own `tests/e2e_test.rs`.

#![cfg(feature = "test-util")]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cdp_relay::config::Config;
use cdp_relay::router::Router;
use cdp_relay::server::{build_router, AppState};
use cdp_relay::testutil::mock_extension::MockExtension;
use cdp_relay::wire::Envelope;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay(config: Config) -> (String, Arc<Router>) {
    let router = Arc::new(Router::new(&config, "test"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let app = build_router(AppState { router: router.clone() });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, router)
}

async fn connect_client(addr: &str, path_id: &str) -> WsStream {
    let url = format!("ws://{addr}/cdp/{path_id}");
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

async fn send_command(client: &mut WsStream, id: u64, method: &str, params: serde_json::Value) {
    let envelope = Envelope::command(id, method, params);
    client
        .send(Message::Text(envelope.to_text().unwrap().into()))
        .await
        .unwrap();
}

async fn recv_envelope(client: &mut WsStream) -> Envelope {
    loop {
        match client.next().await.unwrap().unwrap() {
            Message::Text(t) => return Envelope::parse(&t).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame from relay: {other:?}"),
        }
    }
}

fn attached_session_id(event: &Envelope) -> String {
    event.params.as_ref().unwrap()["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn solo_client_attaches_navigates_and_forwards_a_command() {
    let (addr, _router) = spawn_relay(Config::default()).await;

    let mut ext = MockExtension::connect(&addr, None).await;
    let mut client = connect_client(&addr, "c1").await;

    send_command(&mut client, 1, "Target.setAutoAttach", json!({"autoAttach": true, "flatten": true})).await;
    let ack = recv_envelope(&mut client).await;
    assert_eq!(ack.id, Some(1));

    ext.tab_attached(42, "https://example.com", "Example").await;

    let created = recv_envelope(&mut client).await;
    assert_eq!(created.method.as_deref(), Some("Target.targetCreated"));
    let attached = recv_envelope(&mut client).await;
    assert_eq!(attached.method.as_deref(), Some("Target.attachedToTarget"));
    let session_id = attached_session_id(&attached);

    ext.tab_navigated(42, "https://example.com/2", "Example 2").await;
    let navigated = recv_envelope(&mut client).await;
    assert_eq!(navigated.method.as_deref(), Some("Target.targetInfoChanged"));

    send_command(
        &mut client,
        2,
        "Page.navigate",
        json!({"url": "https://example.com/3", "sessionId": session_id}),
    )
    .await;

    let forwarded = ext.recv_command().await;
    assert_eq!(forwarded.method.as_deref(), Some("Page.navigate"));
    ext.answer(forwarded.id.unwrap(), json!({"frameId": "f1", "loaderId": "l1"})).await;

    let response = recv_envelope(&mut client).await;
    assert_eq!(response.id, Some(2));
    assert_eq!(response.result.unwrap()["frameId"], "f1");
}

#[tokio::test]
async fn tab_detach_destroys_target_and_session() {
    let (addr, _router) = spawn_relay(Config::default()).await;

    let mut ext = MockExtension::connect(&addr, None).await;
    let mut client = connect_client(&addr, "c1").await;

    send_command(&mut client, 1, "Target.setAutoAttach", json!({"autoAttach": true, "flatten": true})).await;
    recv_envelope(&mut client).await;

    ext.tab_attached(7, "https://a", "A").await;
    recv_envelope(&mut client).await; // targetCreated
    recv_envelope(&mut client).await; // attachedToTarget

    ext.tab_detached(7, "closed").await;

    let detached = recv_envelope(&mut client).await;
    assert_eq!(detached.method.as_deref(), Some("Target.detachedFromTarget"));
    let destroyed = recv_envelope(&mut client).await;
    assert_eq!(destroyed.method.as_deref(), Some("Target.targetDestroyed"));
}

#[tokio::test]
async fn two_clients_sharing_a_tab_get_distinct_sessions() {
    let (addr, _router) = spawn_relay(Config::default()).await;

    let mut ext = MockExtension::connect(&addr, None).await;
    let mut client_a = connect_client(&addr, "a").await;
    let mut client_b = connect_client(&addr, "b").await;

    send_command(&mut client_a, 1, "Target.setAutoAttach", json!({"autoAttach": true, "flatten": true})).await;
    recv_envelope(&mut client_a).await;
    send_command(&mut client_b, 1, "Target.setAutoAttach", json!({"autoAttach": true, "flatten": true})).await;
    recv_envelope(&mut client_b).await;

    ext.tab_attached(9, "https://a", "A").await;

    recv_envelope(&mut client_a).await; // targetCreated
    let attached_a = recv_envelope(&mut client_a).await;
    recv_envelope(&mut client_b).await; // targetCreated
    let attached_b = recv_envelope(&mut client_b).await;

    assert_ne!(attached_session_id(&attached_a), attached_session_id(&attached_b));
}

#[tokio::test]
async fn extension_reconnect_within_freeze_window_reuses_target_id() {
    let mut config = Config::default();
    config.target_freeze_timeout_secs = 5;
    let (addr, _router) = spawn_relay(config).await;

    let mut ext = MockExtension::connect(&addr, None).await;
    let mut client = connect_client(&addr, "c1").await;
    send_command(&mut client, 1, "Target.setAutoAttach", json!({"autoAttach": true, "flatten": true})).await;
    recv_envelope(&mut client).await;

    ext.tab_attached(3, "https://a", "A").await;
    let first_created = recv_envelope(&mut client).await;
    recv_envelope(&mut client).await; // attachedToTarget
    let first_target_id = first_created.params.unwrap()["targetInfo"]["targetId"]
        .as_str()
        .unwrap()
        .to_string();

    ext.close().await;

    let detached = recv_envelope(&mut client).await;
    assert_eq!(detached.method.as_deref(), Some("Target.detachedFromTarget"));
    let destroyed = recv_envelope(&mut client).await;
    assert_eq!(destroyed.method.as_deref(), Some("Target.targetDestroyed"));

    // give the server a beat to finish processing the closed socket
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ext2 = MockExtension::connect(&addr, None).await;
    ext2.tab_attached(3, "https://a", "A").await;

    let second_created = recv_envelope(&mut client).await;
    let second_target_id = second_created.params.unwrap()["targetInfo"]["targetId"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(second_target_id, first_target_id);
}

#[tokio::test]
async fn recording_start_stop_round_trip_over_http() {
    let (addr, _router) = spawn_relay(Config::default()).await;
    let mut ext = MockExtension::connect(&addr, None).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("capture.webm");

    let http = reqwest::Client::new();
    let start_url = format!("http://{addr}/recording/start");
    let start_task = {
        let http = http.clone();
        let out_path = out_path.clone();
        tokio::spawn(async move {
            http.post(start_url)
                .json(&json!({"tabId": 42, "outputPath": out_path}))
                .send()
                .await
                .unwrap()
        })
    };

    let start_cmd = ext.recv_command().await;
    assert_eq!(start_cmd.method.as_deref(), Some("startRecording"));
    ext.answer(start_cmd.id.unwrap(), json!({"success": true})).await;

    let start_resp = start_task.await.unwrap();
    assert!(start_resp.status().is_success());
    let start_body: serde_json::Value = start_resp.json().await.unwrap();
    assert_eq!(start_body["success"], true);

    ext.recording_metadata(42, false).await;
    ext.send_binary(Bytes::from_static(&[1, 2, 3])).await;
    ext.recording_metadata(42, false).await;
    ext.send_binary(Bytes::from_static(&[4, 5, 6])).await;

    let stop_url = format!("http://{addr}/recording/stop");
    let stop_task = {
        let http = http.clone();
        tokio::spawn(async move {
            http.post(stop_url).json(&json!({"tabId": 42})).send().await.unwrap()
        })
    };

    let stop_cmd = ext.recv_command().await;
    assert_eq!(stop_cmd.method.as_deref(), Some("stopRecording"));
    ext.answer(stop_cmd.id.unwrap(), json!({"success": true})).await;
    ext.recording_metadata(42, true).await;

    let stop_resp = stop_task.await.unwrap();
    assert!(stop_resp.status().is_success());
    let stop_body: serde_json::Value = stop_resp.json().await.unwrap();
    assert_eq!(stop_body["success"], true);
    assert_eq!(stop_body["size"], 6);

    let bytes = std::fs::read(&out_path).unwrap();
    assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
}
