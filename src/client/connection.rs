// src/client/connection.rs

use super::frame_buffer::FrameBuffer;
use super::state::ConnectionState;
use crate::config::ClientConfig;
use crate::core::PartylineError;
use crate::core::protocol::JsonLineCodec;
use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long one read waits before the loop re-checks whether it should stop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK_SIZE: usize = 4096;
/// Upper bound on waiting for the peer's end-of-stream while closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Receives every complete message together with the connection's name.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Timing knobs for a [`ClientConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: Option<u32>,
}

impl From<&ClientConfig> for ClientSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// A newline-framed TCP connection that reconnects after a failed send.
///
/// The read half is owned by [`ClientConnection::receive`] while it runs and
/// the write half is shared by every sender. Each successful connect bumps a
/// generation counter so a receive loop left over from an earlier socket
/// notices it has been superseded and exits without touching the new one.
///
/// Closing cancels a per-socket token first, so a send stuck on a peer that
/// stopped reading gives up the write half instead of holding it. A
/// consumer's [`ClientConnection::close`] also ends any reconnect that is
/// still waiting out its delay.
pub struct ClientConnection {
    host: String,
    port: u16,
    name: String,
    settings: ClientSettings,
    state: Mutex<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    running: AtomicBool,
    reconnecting: AtomicBool,
    generation: AtomicU64,
    // Bumped by every consumer close; a reconnect that sees it move gives up.
    close_requests: AtomicU64,
    closing: Mutex<CancellationToken>,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    callback: RwLock<Option<MessageCallback>>,
}

impl ClientConnection {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        name: impl Into<String>,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Arc::new(Self {
            host: host.into(),
            port,
            name: name.into(),
            settings,
            state: Mutex::new(ConnectionState::Disconnected),
            transitions,
            running: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            close_requests: AtomicU64::new(0),
            closing: Mutex::new(CancellationToken::new()),
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            callback: RwLock::new(None),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Every state change from now on, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Replaces the callback that receives inbound messages.
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    /// Opens the TCP stream. No bytes are exchanged.
    pub async fn connect(&self) -> Result<(), PartylineError> {
        self.set_state(ConnectionState::Connecting);
        debug!("[{}] Connecting to {}:{}...", self.name, self.host, self.port);

        let attempt = timeout(
            self.settings.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await;
        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {}:{} timed out", self.host, self.port),
                )
                .into());
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("[{}] Could not set TCP_NODELAY: {}", self.name, e);
        }
        let (read_half, write_half) = stream.into_split();
        *self.closing.lock() = CancellationToken::new();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.running.store(true, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        info!("[{}] Connected to {}:{}", self.name, self.host, self.port);
        Ok(())
    }

    /// Reads until the peer closes, a transport error occurs, or the
    /// connection is closed or replaced. Each complete message goes to the
    /// callback exactly once.
    ///
    /// A transport fault closes the connection but does not reconnect.
    pub async fn receive(&self) -> Result<(), PartylineError> {
        let generation = self.generation.load(Ordering::Acquire);
        let Some(mut reader) = self.reader.lock().await.take() else {
            error!("[{}] Receive called without an open connection.", self.name);
            return Err(PartylineError::NotConnected);
        };
        debug!("[{}] Starting receive loop...", self.name);

        let mut frames = FrameBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        while self.is_current(generation) {
            let read = match timeout(POLL_INTERVAL, reader.read(&mut chunk)).await {
                Ok(read) => read,
                Err(_) => continue,
            };
            match read {
                Ok(0) => {
                    debug!("[{}] Server closed the connection.", self.name);
                    drop(reader);
                    self.release_if_current(generation).await;
                    return Ok(());
                }
                Ok(n) => match frames.push(&chunk[..n]) {
                    Ok(messages) => {
                        for message in messages {
                            self.dispatch(&message);
                        }
                    }
                    Err(e) => {
                        error!("[{}] Error decoding data: {}", self.name, e);
                        drop(reader);
                        self.release_if_current(generation).await;
                        return Err(e);
                    }
                },
                Err(e) => {
                    if e.kind() == io::ErrorKind::ConnectionReset {
                        error!("[{}] Connection reset by server.", self.name);
                    } else {
                        error!("[{}] Error receiving data: {}", self.name, e);
                    }
                    drop(reader);
                    self.release_if_current(generation).await;
                    return Err(e.into());
                }
            }
        }
        debug!("[{}] Receive loop stopped.", self.name);
        Ok(())
    }

    /// Connects and then receives until the connection ends.
    pub async fn run(&self) -> Result<(), PartylineError> {
        self.connect().await?;
        self.receive().await
    }

    /// Writes `message` followed by the delimiter.
    ///
    /// If the write fails, a reconnect is started in the background and the
    /// write error is returned right away. A write interrupted by `close`
    /// returns `NotConnected` and schedules nothing.
    pub async fn send(self: &Arc<Self>, message: &str) -> Result<(), PartylineError> {
        let mut payload = BytesMut::with_capacity(message.len() + 1);
        JsonLineCodec::new().encode(message, &mut payload)?;

        let epoch = self.close_requests.load(Ordering::Acquire);
        let result = {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Err(PartylineError::NotConnected);
            };
            let closing = self.closing.lock().clone();
            tokio::select! {
                biased;
                _ = closing.cancelled() => {
                    debug!("[{}] Send abandoned because the connection is closing.", self.name);
                    return Err(PartylineError::NotConnected);
                }
                res = writer.write_all(&payload) => res,
            }
        };

        if let Err(e) = result {
            error!("[{}] Error sending data: {}", self.name, e);
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.reconnect_since(epoch).await {
                    warn!("[{}] Giving up on reconnecting: {}", this.name, e);
                }
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Closes the connection. Safe to call any number of times.
    ///
    /// Interrupts any in-flight send, half-closes the write side, waits
    /// briefly for the peer to finish if no receive loop owns the read side,
    /// then drops the socket. Errors along the way are ignored. A background
    /// reconnect that has not connected yet is abandoned.
    pub async fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::AcqRel);
        self.release().await;
    }

    async fn release(&self) {
        self.running.store(false, Ordering::Release);
        self.closing.lock().cancel();
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        if reader.is_none() && writer.is_none() {
            if self.state().is_connected() {
                self.set_state(ConnectionState::Disconnected);
            }
            return;
        }

        self.set_state(ConnectionState::Closing);
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        if let Some(mut reader) = reader {
            let mut scratch = [0u8; 1024];
            let _ = timeout(CLOSE_TIMEOUT, reader.read(&mut scratch)).await;
        }
        self.set_state(ConnectionState::Disconnected);
        debug!("[{}] Connection closed.", self.name);
    }

    /// Closes, waits the fixed reconnect delay and connects again, retrying
    /// with the same delay until it succeeds or the attempt cap is reached.
    ///
    /// A successful reconnect starts a fresh receive loop. Calls made while
    /// a reconnect is already running return immediately, and a consumer
    /// `close` made while this one waits ends it without connecting.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), PartylineError> {
        let epoch = self.close_requests.load(Ordering::Acquire);
        self.reconnect_since(epoch).await
    }

    /// Reconnects unless the consumer has closed since `epoch` was read.
    async fn reconnect_since(self: &Arc<Self>, epoch: u64) -> Result<(), PartylineError> {
        let Some(_guard) = ReconnectGuard::acquire(&self.reconnecting) else {
            debug!("[{}] Reconnect already in progress.", self.name);
            return Ok(());
        };

        if self.closed_since(epoch) {
            debug!("[{}] Closed before reconnecting.", self.name);
            return Ok(());
        }
        self.release().await;
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            sleep(self.settings.reconnect_delay).await;
            if self.closed_since(epoch) {
                debug!("[{}] Closed while waiting to reconnect.", self.name);
                return Ok(());
            }
            match self.connect().await {
                Ok(()) if self.closed_since(epoch) => {
                    debug!("[{}] Closed while reconnecting.", self.name);
                    self.release().await;
                    return Ok(());
                }
                Ok(()) => {
                    info!("[{}] Reconnected after {} attempt(s).", self.name, attempts);
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let _ = this.receive().await;
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!("[{}] Reconnect attempt {} failed: {}", self.name, attempts, e);
                    if let Some(max) = self.settings.max_reconnect_attempts
                        && attempts >= max
                    {
                        return Err(e);
                    }
                }
            }
        }
    }

    fn dispatch(&self, message: &str) {
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => callback(message, &self.name),
            None => debug!("[{}] Received message: {}", self.name, message),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    async fn release_if_current(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.release().await;
        }
    }

    fn closed_since(&self, epoch: u64) -> bool {
        self.close_requests.load(Ordering::Acquire) != epoch
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous != next {
            debug!("[{}] {} -> {}", self.name, previous, next);
            // No subscribers is fine.
            let _ = self.transitions.send(next);
        }
    }
}

/// Holds the reconnect flag for the duration of one reconnect.
struct ReconnectGuard<'a>(&'a AtomicBool);

impl<'a> ReconnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
