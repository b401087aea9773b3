// tests/integration/client_test.rs

//! `ClientConnection` against plain sockets and a real session.

use super::test_helpers::{TestMaster, init_tracing, parse_address, wait_until};
use partyline::client::{ClientConnection, ClientSettings, ConnectionState};
use partyline::core::PartylineError;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

fn fast_settings() -> ClientSettings {
    ClientSettings {
        reconnect_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
        max_reconnect_attempts: None,
    }
}

async fn next_state(rx: &mut broadcast::Receiver<ConnectionState>) -> ConnectionState {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for a state change")
        .expect("State channel closed")
}

/// Accepts connections forever and keeps each open until its peer hangs up.
fn spawn_patient_peer(listener: TcpListener) {
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut scratch = [0u8; 1024];
                while matches!(socket.read(&mut scratch).await, Ok(n) if n > 0) {}
            });
        }
    });
}

/// A client whose callback forwards `(message, name)` pairs to a channel.
fn recording_client(port: u16) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<(String, String)>) {
    let client = ClientConnection::new("127.0.0.1", port, "game", fast_settings());
    let (tx, rx) = mpsc::unbounded_channel();
    client.set_message_callback(move |message, name| {
        let _ = tx.send((message.to_string(), name.to_string()));
    });
    (client, rx)
}

#[tokio::test]
async fn test_split_message_is_dispatched_once() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"ab").await.unwrap();
        socket.flush().await.unwrap();
        sleep(Duration::from_millis(150)).await;
        socket.write_all(b"c\n").await.unwrap();
        sleep(Duration::from_millis(150)).await;
    });

    let (client, mut messages) = recording_client(port);
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    let (message, name) = timeout(Duration::from_secs(5), messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message, "abc");
    assert_eq!(name, "game");

    server.await.unwrap();
    timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(messages.try_recv().is_err());
}

#[tokio::test]
async fn test_send_appends_delimiter() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        let first = lines.next_line().await.unwrap();
        let second = lines.next_line().await.unwrap();
        (first, second)
    });

    let client = ClientConnection::new("127.0.0.1", port, "control", fast_settings());
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.state().is_connected());
    client.send(r#"{"command":"list"}"#).await.unwrap();
    client.send(r#"{"command":"create"}"#).await.unwrap();

    let (first, second) = server.await.unwrap();
    assert_eq!(first.as_deref(), Some(r#"{"command":"list"}"#));
    assert_eq!(second.as_deref(), Some(r#"{"command":"create"}"#));
    client.close().await;
}

#[tokio::test]
async fn test_send_without_connection() {
    let client = ClientConnection::new("127.0.0.1", 1, "idle", fast_settings());
    let mut states = client.subscribe();

    let err = client.send("{}").await.unwrap_err();
    assert!(matches!(err, PartylineError::NotConnected));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    sleep(Duration::from_millis(200)).await;
    assert!(states.try_recv().is_err(), "no reconnect should be scheduled");
}

#[tokio::test]
async fn test_failed_connect_returns_to_disconnected() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ClientConnection::new("127.0.0.1", port, "nowhere", fast_settings());
    let mut states = client.subscribe();

    assert!(client.connect().await.is_err());
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Disconnected);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _server = tokio::spawn(async move {
        // Drop the peer promptly so close() does not wait out its bound.
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });

    let client = ClientConnection::new("127.0.0.1", port, "closer", fast_settings());
    client.connect().await.unwrap();
    let mut states = client.subscribe();

    client.close().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Closing);
    assert_eq!(next_state(&mut states).await, ConnectionState::Disconnected);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(states.try_recv().is_err());
    assert!(matches!(
        client.send("{}").await,
        Err(PartylineError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnect_walks_the_state_machine() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    spawn_patient_peer(listener);

    let client = ClientConnection::new("127.0.0.1", port, "resilient", fast_settings());
    client.connect().await.unwrap();
    let mut states = client.subscribe();

    client.reconnect().await.unwrap();
    let observed = [
        next_state(&mut states).await,
        next_state(&mut states).await,
        next_state(&mut states).await,
        next_state(&mut states).await,
    ];
    assert_eq!(
        observed,
        [
            ConnectionState::Closing,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert!(client.is_running());
    client.close().await;
}

#[tokio::test]
async fn test_failed_send_triggers_reconnect() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _server = tokio::spawn(async move {
        // Hang up on the first peer, then behave.
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        spawn_patient_peer(listener);
    });

    let client = ClientConnection::new("127.0.0.1", port, "sender", fast_settings());
    client.connect().await.unwrap();
    let mut states = client.subscribe();

    let mut failed = false;
    for _ in 0..100 {
        if client.send("{\"message\":\"ping\"}").await.is_err() {
            failed = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(failed, "writes to a closed peer never failed");

    let mut seen = Vec::new();
    while seen.last() != Some(&ConnectionState::Connected) {
        seen.push(next_state(&mut states).await);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Closing,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    client.send("{\"message\":\"again\"}").await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn test_close_does_not_wait_for_blocked_send() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _server = tokio::spawn(async move {
        // Accept and never read, so the client's socket buffers fill up.
        let (socket, _) = listener.accept().await.unwrap();
        sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let client = ClientConnection::new("127.0.0.1", port, "stuck", fast_settings());
    client.connect().await.unwrap();
    let mut states = client.subscribe();

    let sender = {
        let client = client.clone();
        let payload = "x".repeat(64 * 1024 * 1024);
        tokio::spawn(async move { client.send(&payload).await })
    };
    sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(5), client.close())
        .await
        .expect("close waited behind the pending send");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_running());

    let sent = timeout(Duration::from_secs(5), sender).await.unwrap().unwrap();
    assert!(matches!(sent, Err(PartylineError::NotConnected)));

    sleep(Duration::from_millis(200)).await;
    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    assert_eq!(
        seen,
        vec![ConnectionState::Closing, ConnectionState::Disconnected],
        "an interrupted send must not schedule a reconnect"
    );
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _server = tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        spawn_patient_peer(listener);
    });

    let settings = ClientSettings {
        reconnect_delay: Duration::from_millis(300),
        ..fast_settings()
    };
    let client = ClientConnection::new("127.0.0.1", port, "leaving", settings);
    client.connect().await.unwrap();

    let mut failed = false;
    for _ in 0..100 {
        if client.send("{\"message\":\"ping\"}").await.is_err() {
            failed = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(failed, "writes to a closed peer never failed");

    client.close().await;
    let mut states = client.subscribe();
    sleep(Duration::from_millis(900)).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_running());
    while let Ok(state) = states.try_recv() {
        assert_ne!(state, ConnectionState::Connecting, "reconnected after close");
    }
    assert!(matches!(
        client.send("{}").await,
        Err(PartylineError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnect_gives_up_after_cap() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let settings = ClientSettings {
        max_reconnect_attempts: Some(2),
        ..fast_settings()
    };
    let client = ClientConnection::new("127.0.0.1", port, "capped", settings);
    let mut states = client.subscribe();

    let result = timeout(Duration::from_secs(5), client.reconnect()).await.unwrap();
    assert!(result.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let mut attempts = 0;
    while let Ok(state) = states.try_recv() {
        if state == ConnectionState::Connecting {
            attempts += 1;
        }
    }
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn test_peer_close_does_not_reconnect() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
        listener
    });

    let client = ClientConnection::new("127.0.0.1", port, "quitter", fast_settings());
    client.run().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let _listener = server.await.unwrap();
    let mut states = client.subscribe();
    sleep(Duration::from_millis(200)).await;
    assert!(states.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_talks_to_a_real_session() {
    let master = TestMaster::start().await;
    let handle = master.orchestrator.create().await.unwrap();
    let addr = parse_address(&handle.address());

    let (client, mut messages) = recording_client(addr.port());
    client.connect().await.unwrap();
    let receiver = {
        let client = client.clone();
        tokio::spawn(async move { client.receive().await })
    };
    wait_until("the session to register the client", || {
        handle.client_count() == 1
    })
    .await;

    client.send(r#"{"message":"hello"}"#).await.unwrap();
    let reply = timeout(Duration::from_secs(5), async {
        loop {
            let (message, _) = messages.recv().await.unwrap();
            let value: Value = serde_json::from_str(&message).unwrap();
            if value != json!({ "echo": "Game loop" }) {
                return value;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(reply, json!({ "echo": "hello" }));

    client.close().await;
    timeout(Duration::from_secs(5), receiver)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    master.shutdown().await;
}
