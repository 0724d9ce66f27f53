use super::*;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use crossbeam_channel::{unbounded, Receiver};
use listener_core::{
    transport::{InboundMessage, TransportMessage},
    ConnectionController, ControllerUpdate,
};
use serde_json::{json, Value};
use shared::domain::{ConnectionStatus, TransportStatus};
use std::{collections::HashMap, time::Instant};
use tokio::{net::TcpListener, sync::mpsc};

/// What the fake endpoint does once it has accepted a join.
#[derive(Clone, Copy)]
enum AfterJoin {
    PushChange,
    CloseSocket,
    ChannelClose,
    ChannelError,
    SystemError,
}

#[derive(Clone)]
struct FakeRealtime {
    join_status: &'static str,
    after_join: AfterJoin,
    frames_tx: mpsc::UnboundedSender<Value>,
    params_tx: mpsc::UnboundedSender<HashMap<String, String>>,
}

struct FakeRealtimeHandle {
    url: String,
    frames: mpsc::UnboundedReceiver<Value>,
    params: mpsc::UnboundedReceiver<HashMap<String, String>>,
}

async fn spawn_realtime_server(join_status: &'static str) -> anyhow::Result<FakeRealtimeHandle> {
    spawn_realtime_server_with(join_status, AfterJoin::PushChange).await
}

async fn spawn_realtime_server_with(
    join_status: &'static str,
    after_join: AfterJoin,
) -> anyhow::Result<FakeRealtimeHandle> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let (params_tx, params) = mpsc::unbounded_channel();
    let state = FakeRealtime {
        join_status,
        after_join,
        frames_tx,
        params_tx,
    };
    let app = Router::new()
        .route("/realtime/v1/websocket", get(ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(FakeRealtimeHandle {
        url: format!("http://{addr}"),
        frames,
        params,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<FakeRealtime>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let _ = state.params_tx.send(params);
    ws.on_upgrade(move |socket| fake_channel(state, socket))
}

async fn fake_channel(state: FakeRealtime, mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let event = frame["event"].as_str().unwrap_or_default().to_string();
        let topic = frame["topic"].clone();
        let msg_ref = frame["ref"].clone();
        let _ = state.frames_tx.send(frame);

        if event != "phx_join" {
            continue;
        }
        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": { "status": state.join_status, "response": {} },
            "ref": msg_ref,
        });
        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            return;
        }
        if state.join_status != "ok" {
            continue;
        }

        let frames = match state.after_join {
            AfterJoin::PushChange => vec![
                json!({
                    "topic": "phoenix",
                    "event": "phx_reply",
                    "payload": { "status": "ok", "response": {} },
                    "ref": "1",
                }),
                json!({
                    "topic": topic,
                    "event": "postgres_changes",
                    "payload": {
                        "data": {
                            "type": "INSERT",
                            "schema": "public",
                            "table": "users",
                            "record": { "id": 1 },
                            "old_record": {},
                            "commit_timestamp": "2024-05-01T12:00:00Z",
                        },
                        "ids": [1],
                    },
                    "ref": null,
                }),
            ],
            AfterJoin::CloseSocket => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            AfterJoin::ChannelClose => vec![json!({
                "topic": topic,
                "event": "phx_close",
                "payload": {},
                "ref": null,
            })],
            AfterJoin::ChannelError => vec![json!({
                "topic": topic,
                "event": "phx_error",
                "payload": {},
                "ref": null,
            })],
            AfterJoin::SystemError => vec![json!({
                "topic": topic,
                "event": "system",
                "payload": {
                    "status": "error",
                    "message": "replication slot unavailable",
                    "extension": "postgres_changes",
                },
                "ref": null,
            })],
        };
        for frame in frames {
            if socket.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
    }
}

async fn next_message(rx: &Receiver<TransportMessage>) -> TransportMessage {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(message) = rx.try_recv() {
            return message;
        }
        assert!(Instant::now() < deadline, "timed out waiting for transport message");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<Value>, event: &str) -> Value {
    let wait = async {
        while let Some(frame) = frames.recv().await {
            if frame["event"] == event {
                return frame;
            }
        }
        panic!("server closed before {event} frame");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event} frame"))
}

async fn wait_for_status(
    controller: &mut ConnectionController<RealtimeTransport>,
    expected: ConnectionStatus,
) -> Vec<ControllerUpdate> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let inbox = controller.inbox();
    let mut updates = Vec::new();
    loop {
        // One message at a time, so a status that is passed through quickly
        // is still observed.
        while let Ok(message) = inbox.try_recv() {
            updates.extend(controller.handle_message(message));
            if controller.status() == expected {
                return updates;
            }
        }
        if controller.status() == expected {
            return updates;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {expected}, still {} after {updates:?}",
            controller.status()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connects a controller to a fake endpoint and waits until it is joined.
async fn connected_controller(
    after_join: AfterJoin,
) -> (ConnectionController<RealtimeTransport>, FakeRealtimeHandle) {
    let server = spawn_realtime_server_with("ok", after_join)
        .await
        .expect("spawn server");
    let transport = RealtimeTransport::from_current(RealtimeSettings::new(&server.url, "anon"))
        .expect("runtime");
    let mut controller = ConnectionController::new(transport);
    controller.start();
    wait_for_status(&mut controller, ConnectionStatus::Connected).await;
    (controller, server)
}

fn sink() -> (ChangeSink, Receiver<TransportMessage>) {
    let (tx, rx) = unbounded();
    (ChangeSink::new(SubscriptionId::new(), tx), rx)
}

#[tokio::test]
async fn joins_channel_and_forwards_changes() {
    let mut server = spawn_realtime_server("ok").await.expect("spawn server");
    let transport = RealtimeTransport::from_current(RealtimeSettings::new(&server.url, "anon"))
        .expect("runtime");
    let (sink, rx) = sink();
    let id = sink.subscription_id();

    let handle = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect("subscribe");
    assert_eq!(handle.id(), id);

    let subscribed = next_message(&rx).await;
    assert_eq!(subscribed.subscription, id);
    assert_eq!(
        subscribed.kind,
        InboundMessage::StatusChanged(TransportStatus::Subscribed)
    );

    let changed = next_message(&rx).await;
    let InboundMessage::NotificationReceived(change) = changed.kind else {
        panic!("expected notification, got {changed:?}");
    };
    assert_eq!(change.event_kind.as_deref(), Some("INSERT"));
    assert_eq!(change.schema_name.as_deref(), Some("public"));
    assert_eq!(change.table_name.as_deref(), Some("users"));
    assert_eq!(change.after, Some(json!({ "id": 1 })));

    let params = server.params.recv().await.expect("query params");
    assert_eq!(params.get("apikey").map(String::as_str), Some("anon"));
    assert_eq!(params.get("vsn").map(String::as_str), Some("1.0.0"));

    let join = next_frame(&mut server.frames, "phx_join").await;
    assert_eq!(join["topic"], "realtime:postgres_changes");
    assert_eq!(join["payload"]["access_token"], "anon");
    assert_eq!(join["payload"]["config"]["postgres_changes"][0]["schema"], "*");

    transport.unsubscribe(handle);
}

#[tokio::test]
async fn unsubscribe_sends_leave() {
    let mut server = spawn_realtime_server("ok").await.expect("spawn server");
    let transport = RealtimeTransport::from_current(RealtimeSettings::new(&server.url, "anon"))
        .expect("runtime");
    let (sink, rx) = sink();

    let handle = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect("subscribe");
    next_message(&rx).await;

    transport.unsubscribe(handle);

    let leave = next_frame(&mut server.frames, "phx_leave").await;
    assert_eq!(leave["topic"], "realtime:postgres_changes");
}

#[tokio::test]
async fn rejected_join_reports_channel_error() {
    let server = spawn_realtime_server("error").await.expect("spawn server");
    let transport = RealtimeTransport::from_current(RealtimeSettings::new(&server.url, "bad"))
        .expect("runtime");
    let (sink, rx) = sink();

    let handle = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect("subscribe");

    let message = next_message(&rx).await;
    assert_eq!(
        message.kind,
        InboundMessage::StatusChanged(TransportStatus::ChannelError)
    );
    transport.unsubscribe(handle);
}

#[tokio::test]
async fn unreachable_endpoint_reports_channel_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport =
        RealtimeTransport::from_current(RealtimeSettings::new(format!("http://{addr}"), "anon"))
            .expect("runtime");
    let (sink, rx) = sink();

    let handle = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect("subscribe returns before connecting");

    let message = next_message(&rx).await;
    assert_eq!(
        message.kind,
        InboundMessage::StatusChanged(TransportStatus::ChannelError)
    );
    transport.unsubscribe(handle);
}

#[tokio::test]
async fn bad_url_fails_synchronously() {
    let transport =
        RealtimeTransport::from_current(RealtimeSettings::new("mailto:someone", "anon"))
            .expect("runtime");
    let (sink, rx) = sink();

    let err = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect_err("must fail");

    assert!(err.to_string().contains("mailto"), "unexpected error: {err}");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn server_closing_socket_disconnects_controller() {
    let (mut controller, _server) = connected_controller(AfterJoin::CloseSocket).await;

    let updates = wait_for_status(&mut controller, ConnectionStatus::Disconnected).await;

    assert_eq!(
        updates,
        vec![ControllerUpdate::StatusChanged(ConnectionStatus::Disconnected)]
    );
    assert!(!controller.is_active());
}

#[tokio::test]
async fn channel_close_frame_disconnects_controller() {
    let (mut controller, _server) = connected_controller(AfterJoin::ChannelClose).await;

    wait_for_status(&mut controller, ConnectionStatus::Disconnected).await;

    assert!(!controller.is_active());
}

#[tokio::test]
async fn channel_error_frame_disconnects_controller() {
    let (mut controller, _server) = connected_controller(AfterJoin::ChannelError).await;

    wait_for_status(&mut controller, ConnectionStatus::Disconnected).await;

    assert!(!controller.is_active());
    assert_eq!(controller.event_count(), 0);
}

#[tokio::test]
async fn system_error_reports_channel_error() {
    let server = spawn_realtime_server_with("ok", AfterJoin::SystemError)
        .await
        .expect("spawn server");
    let transport = RealtimeTransport::from_current(RealtimeSettings::new(&server.url, "anon"))
        .expect("runtime");
    let (sink, rx) = sink();

    let handle = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect("subscribe");

    assert_eq!(
        next_message(&rx).await.kind,
        InboundMessage::StatusChanged(TransportStatus::Subscribed)
    );
    assert_eq!(
        next_message(&rx).await.kind,
        InboundMessage::StatusChanged(TransportStatus::ChannelError)
    );
    transport.unsubscribe(handle);
}

#[tokio::test]
async fn controller_can_restart_after_server_close() {
    let (mut controller, _server) = connected_controller(AfterJoin::CloseSocket).await;
    wait_for_status(&mut controller, ConnectionStatus::Disconnected).await;

    controller.start();

    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    wait_for_status(&mut controller, ConnectionStatus::Connected).await;
}

#[tokio::test]
async fn heartbeat_is_sent_on_phoenix_topic() {
    let mut server = spawn_realtime_server("ok").await.expect("spawn server");
    let mut settings = RealtimeSettings::new(&server.url, "anon");
    settings.heartbeat_interval = Duration::from_millis(50);
    let transport = RealtimeTransport::from_current(settings).expect("runtime");
    let (sink, _rx) = sink();

    let handle = transport
        .subscribe_to_changes(&ChangeFilter::all(), sink)
        .expect("subscribe");

    let heartbeat = next_frame(&mut server.frames, "heartbeat").await;
    assert_eq!(heartbeat["topic"], "phoenix");
    assert_eq!(heartbeat["payload"], json!({}));
    assert!(heartbeat["ref"].is_string());
    transport.unsubscribe(handle);
}

#[test]
fn from_current_requires_a_runtime() {
    let err = RealtimeTransport::from_current(RealtimeSettings::new("https://x.test", "k"))
        .err()
        .expect("no runtime outside tokio");
    assert!(matches!(err, TransportError::NoRuntime));
}

#[test]
fn settings_default_channel_and_heartbeat() {
    let settings = RealtimeSettings::new("https://x.test", "k");
    assert_eq!(settings.channel, "postgres_changes");
    assert_eq!(settings.heartbeat_interval, Duration::from_secs(25));
}
