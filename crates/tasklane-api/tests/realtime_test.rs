#![allow(clippy::unwrap_used, clippy::expect_used)]
// Integration tests for `RealtimeClient` against an in-process WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use tasklane_api::realtime::{
    ConnectionPhase, JoinStatus, RealtimeClient, RealtimeConfig, RealtimeEvent,
};

// ── Mock realtime server ────────────────────────────────────────────

/// Accepts WebSocket connections, reports every inbound text frame, and
/// pushes whatever is sent on `outbound` to all connected clients.
struct MockRealtimeServer {
    addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<serde_json::Value>,
    outbound: broadcast::Sender<String>,
    shutdown: broadcast::Sender<()>,
    kick: broadcast::Sender<()>,
    connections: Arc<AtomicUsize>,
}

impl MockRealtimeServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(16);
        let (shutdown, _) = broadcast::channel(1);
        let (kick, _) = broadcast::channel(1);
        let connections = Arc::new(AtomicUsize::new(0));

        let push = outbound.clone();
        let stop = shutdown.clone();
        let drop_all = kick.clone();
        let accepted_count = Arc::clone(&connections);
        tokio::spawn(async move {
            let mut stop_accepting = stop.subscribe();
            loop {
                tokio::select! {
                    _ = stop_accepting.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        accepted_count.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(serve(
                            stream,
                            inbound_tx.clone(),
                            push.subscribe(),
                            stop.subscribe(),
                            drop_all.subscribe(),
                        ));
                    }
                }
            }
        });

        Self {
            addr,
            inbound,
            outbound,
            shutdown,
            kick,
            connections,
        }
    }

    fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    async fn next_inbound(&mut self) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("server inbound channel closed")
    }

    fn push(&self, frame: &serde_json::Value) {
        self.outbound.send(frame.to_string()).unwrap();
    }

    /// Stop accepting and drop every open connection.
    fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Drop every open connection but keep accepting new ones.
    fn drop_connections(&self) {
        let _ = self.kick.send(());
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    inbound: mpsc::UnboundedSender<serde_json::Value>,
    mut outbound: broadcast::Receiver<String>,
    mut shutdown: broadcast::Receiver<()>,
    mut kick: broadcast::Receiver<()>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = kick.recv() => return,
            frame = outbound.recv() => {
                let Ok(frame) = frame else { return };
                if sink.send(Message::text(frame)).await.is_err() {
                    return;
                }
            }
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str(&text) {
                        let _ = inbound.send(value);
                    }
                }
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn config_for(server: &MockRealtimeServer) -> RealtimeConfig {
    let mut config = RealtimeConfig::new(
        server.base_url(),
        SecretString::from("anon-key".to_owned()),
    );
    config.max_reconnects = 1;
    config.reconnect_delay = Duration::from_secs(30);
    config.ping_interval = Duration::from_millis(200);
    config
}

/// Fixture whose supervisor retries quickly.
fn reconnecting_config(server: &MockRealtimeServer, max_reconnects: u32) -> RealtimeConfig {
    let mut config = config_for(server);
    config.max_reconnects = max_reconnects;
    config.reconnect_delay = Duration::from_millis(50);
    config
}

async fn next_disconnect_reason(events: &mut mpsc::Receiver<RealtimeEvent>) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let RealtimeEvent::Disconnected { reason } = events.recv().await.unwrap() {
                return reason;
            }
        }
    })
    .await
    .expect("timed out waiting for disconnect")
}

/// Next non-lifecycle event, within a bounded wait.
async fn next_data_event(events: &mut mpsc::Receiver<RealtimeEvent>) -> RealtimeEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if !event.is_lifecycle() {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_sends_join_per_table() {
    let mut server = MockRealtimeServer::start().await;
    let (client, mut events) = RealtimeClient::new(config_for(&server));

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.phase(), ConnectionPhase::Connected);

    let first = server.next_inbound().await;
    let second = server.next_inbound().await;
    let mut topics = vec![
        first["topic"].as_str().unwrap().to_owned(),
        second["topic"].as_str().unwrap().to_owned(),
    ];
    topics.sort();

    assert_eq!(first["event"], "phx_join");
    assert_eq!(second["event"], "phx_join");
    assert_eq!(
        topics,
        vec!["realtime:public:projects", "realtime:public:tasks"]
    );

    let connected = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connected, RealtimeEvent::Connected);

    client.disconnect();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_update_frame_yields_one_task_updated() {
    let mut server = MockRealtimeServer::start().await;
    let (client, mut events) = RealtimeClient::new(config_for(&server));
    client.connect().await.unwrap();

    // Joins arrive before any data event is pushed.
    server.next_inbound().await;
    server.next_inbound().await;

    server.push(&json!({
        "event": "postgres_changes",
        "topic": "realtime:public:tasks",
        "payload": {
            "schema": "public",
            "table": "tasks",
            "type": "UPDATE",
            "record": { "id": "t-42", "title": "Renamed task", "status": "in_progress" },
            "old_record": { "id": "t-42", "title": "Old name" }
        },
        "ref": "7"
    }));

    match next_data_event(&mut events).await {
        RealtimeEvent::TaskUpdated { task_id, task, old } => {
            assert_eq!(task_id, "t-42");
            assert_eq!(task.title, "Renamed task");
            assert_eq!(old.unwrap().title, "Old name");
        }
        other => panic!("expected TaskUpdated, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err(), "expected exactly one event");

    client.disconnect();
}

#[tokio::test]
async fn test_join_reply_marks_subscription() {
    let mut server = MockRealtimeServer::start().await;
    let (client, _events) = RealtimeClient::new(config_for(&server));
    client.connect().await.unwrap();

    let join = server.next_inbound().await;
    let topic = join["topic"].as_str().unwrap().to_owned();
    server.push(&json!({
        "event": "phx_reply",
        "topic": topic,
        "payload": { "status": "ok", "response": {} },
        "ref": join["ref"]
    }));

    let joined = wait_until(|| {
        client
            .subscriptions()
            .iter()
            .any(|(t, status)| *t == topic && *status == JoinStatus::Joined)
    })
    .await;
    assert!(joined, "join was never acknowledged: {:?}", client.subscriptions());

    client.disconnect();
}

#[tokio::test]
async fn test_server_close_flips_connected_flag() {
    let server = MockRealtimeServer::start().await;
    let (client, mut events) = RealtimeClient::new(config_for(&server));
    client.connect().await.unwrap();
    assert!(client.is_connected());

    server.shutdown();

    let dropped = wait_until(|| !client.is_connected()).await;
    assert!(dropped, "client still reports connected after server shutdown");

    let reason = next_disconnect_reason(&mut events).await;
    assert!(!reason.is_empty());

    client.disconnect();
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = RealtimeConfig::new(
        Url::parse(&format!("http://{addr}")).unwrap(),
        SecretString::from("anon-key".to_owned()),
    );
    let (client, _events) = RealtimeClient::new(config);

    let result = client.connect().await;
    assert!(matches!(
        result,
        Err(tasklane_api::Error::WebSocketConnect(_))
    ));
    assert!(!client.is_connected());
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = MockRealtimeServer::start().await;
    let (client, _events) = RealtimeClient::new(config_for(&server));
    client.connect().await.unwrap();

    client.disconnect();
    client.disconnect();
    assert!(!client.is_connected());
    assert_eq!(client.reconnect_count(), 0);
}

// ── Reconnect supervisor ────────────────────────────────────────────

#[tokio::test]
async fn test_lost_link_reconnects_and_rejoins() {
    let mut server = MockRealtimeServer::start().await;
    let (client, mut events) = RealtimeClient::new(reconnecting_config(&server, 3));
    client.connect().await.unwrap();
    server.next_inbound().await;
    server.next_inbound().await;

    server.drop_connections();
    next_disconnect_reason(&mut events).await;

    let rejoins = [server.next_inbound().await, server.next_inbound().await];
    assert!(rejoins.iter().all(|frame| frame["event"] == "phx_join"));

    let reconnected = wait_until(|| client.is_connected()).await;
    assert!(reconnected, "client never reconnected");
    assert_eq!(server.connections(), 2);
    assert_eq!(client.phase(), ConnectionPhase::Connected);
    assert_eq!(client.reconnect_count(), 0);
    assert!(client.is_running());

    client.disconnect();
}

#[tokio::test]
async fn test_reconnect_gives_up_after_limit() {
    let server = MockRealtimeServer::start().await;
    let (client, mut events) = RealtimeClient::new(reconnecting_config(&server, 2));
    client.connect().await.unwrap();

    server.shutdown();
    next_disconnect_reason(&mut events).await;

    let stopped = wait_until(|| !client.is_running()).await;
    assert!(stopped, "supervisor still running: {:?}", client.phase());
    assert!(!client.is_connected());
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    assert_eq!(client.reconnect_count(), 0);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_disconnect_during_backoff_stops_supervisor() {
    let server = MockRealtimeServer::start().await;
    let mut config = config_for(&server);
    config.max_reconnects = 3;
    config.reconnect_delay = Duration::from_millis(300);
    let (client, mut events) = RealtimeClient::new(config);
    client.connect().await.unwrap();

    server.drop_connections();
    next_disconnect_reason(&mut events).await;
    let backing_off = wait_until(|| {
        matches!(client.phase(), ConnectionPhase::Reconnecting { attempt: 1 })
    })
    .await;
    assert!(backing_off, "supervisor never started backing off");

    client.disconnect();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(server.connections(), 1);
    assert!(!client.is_connected());
    assert!(!client.is_running());
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
}
