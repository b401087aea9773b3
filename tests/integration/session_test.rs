// tests/integration/session_test.rs

//! Session servers driven directly through `SessionWorker`.

use super::test_helpers::{TestClient, init_tracing, is_heartbeat, wait_until};
use async_trait::async_trait;
use partyline::core::PartylineError;
use partyline::core::registry::ConnectionInfo;
use partyline::core::session::{
    EchoBehavior, SessionBehavior, SessionContext, SessionHandle, SessionSpec, SessionWorker,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_session(behavior: Arc<dyn SessionBehavior>) -> SessionHandle {
    init_tracing();
    let spec = SessionSpec {
        id: 7,
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    SessionWorker::spawn(spec, behavior)
        .await
        .expect("Failed to spawn session")
}

async fn spawn_echo() -> SessionHandle {
    spawn_session(Arc::new(EchoBehavior::new(Duration::from_millis(50)))).await
}

/// Echoes like the shipped behavior, but misbehaves on request.
struct FaultyBehavior;

#[async_trait]
impl SessionBehavior for FaultyBehavior {
    async fn on_message(
        &self,
        _session: &SessionContext,
        _conn: &ConnectionInfo,
        message: &str,
    ) -> Result<Option<Value>, PartylineError> {
        match message {
            "\"panic\"" => panic!("behavior blew up"),
            "\"fail\"" => Err(PartylineError::Internal("backend unavailable".into())),
            "\"quiet\"" => Ok(None),
            _ => EchoBehavior::echo(message).map(Some),
        }
    }

    async fn on_tick(&self, _session: &SessionContext) -> Result<(), PartylineError> {
        Ok(())
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

#[tokio::test]
async fn test_handle_reports_bound_address() {
    let handle = spawn_echo().await;
    assert_eq!(handle.id(), 7);
    assert_ne!(handle.port(), 0);
    assert_eq!(handle.address(), format!("tcp://127.0.0.1:{}", handle.port()));
    assert_eq!(handle.label(), "Echo Server");
    assert!(handle.is_running());
    assert!(handle.stop(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_echo_reply_goes_to_sender() {
    let handle = spawn_echo().await;
    let mut client = TestClient::connect(handle.local_addr()).await;

    let reply = client
        .request(json!({ "message": "hi", "from": "p1" }))
        .await;
    assert_eq!(reply, json!({ "from": "p1", "echo": "hi" }));

    assert!(handle.stop(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_heartbeat_reaches_every_client() {
    let handle = spawn_echo().await;
    let mut first = TestClient::connect(handle.local_addr()).await;
    let mut second = TestClient::connect(handle.local_addr()).await;

    assert!(is_heartbeat(&first.recv().await));
    assert!(is_heartbeat(&second.recv().await));

    assert!(handle.stop(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_bad_messages_are_answered_in_band() {
    let handle = spawn_echo().await;
    let mut client = TestClient::connect(handle.local_addr()).await;

    client.send_line("{broken").await;
    assert_eq!(
        client.recv_reply().await,
        json!({ "error": "Invalid JSON format" })
    );

    let reply = client.request(json!({ "text": "no message" })).await;
    assert_eq!(reply, json!({ "error": "Missing key: 'message'" }));

    let reply = client.request(json!({ "message": 2 })).await;
    assert_eq!(reply, json!({ "echo": 2 }));

    assert!(handle.stop(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_client_count_follows_connections() {
    let handle = spawn_echo().await;
    assert_eq!(handle.client_count(), 0);

    let a = TestClient::connect(handle.local_addr()).await;
    let b = TestClient::connect(handle.local_addr()).await;
    wait_until("two clients", || handle.client_count() == 2).await;

    drop(a);
    wait_until("one client", || handle.client_count() == 1).await;
    drop(b);
    wait_until("no clients", || handle.client_count() == 0).await;

    assert!(handle.stop(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_handler_faults_do_not_close_the_connection() {
    let handle = spawn_session(Arc::new(FaultyBehavior)).await;
    let mut client = TestClient::connect(handle.local_addr()).await;

    client.send_line("\"panic\"").await;
    client.send_line("\"fail\"").await;
    client.send_line("\"quiet\"").await;
    let reply = client.request(json!({ "message": "still here" })).await;
    assert_eq!(reply, json!({ "echo": "still here" }));
    assert_eq!(handle.client_count(), 1);

    assert!(handle.stop(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_stop_closes_clients_and_listener() {
    let handle = spawn_echo().await;
    let addr = handle.local_addr();
    let mut client = TestClient::connect(addr).await;
    wait_until("the client to register", || handle.client_count() == 1).await;

    assert!(handle.stop(Duration::from_secs(3)).await);
    assert!(!handle.is_running());
    assert_eq!(handle.client_count(), 0);
    client.expect_closed().await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());

    // Stopping twice is harmless.
    assert!(handle.stop(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let first = spawn_echo().await;
    let second = spawn_echo().await;
    let mut client = TestClient::connect(second.local_addr()).await;

    assert!(first.stop(Duration::from_secs(3)).await);

    let reply = client.request(json!({ "message": "alive" })).await;
    assert_eq!(reply, json!({ "echo": "alive" }));
    assert!(second.is_running());

    assert!(second.stop(Duration::from_secs(3)).await);
}
