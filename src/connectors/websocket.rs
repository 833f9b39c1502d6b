//! Streaming client with a reconnection state machine.
//!
//! Key behaviour:
//! 1. `connect` resolves only once authenticated and every registered
//!    subscription has been replayed
//! 2. Heartbeat frame on a fixed interval, independent of inbound traffic
//! 3. Capped exponential reconnect backoff; the attempt counter resets on
//!    every entry into `Connected`
//! 4. Malformed frames and failing callbacks never end the connection
//! 5. `disconnect` is terminal and idempotent
//! 6. Subscribe, unsubscribe and auth frames wait on the shared request
//!    dispatcher's rate limit; heartbeats do not
//! 7. Dropping the last handle stops the background tasks

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

use super::polymarket_stream::DEFAULT_MARKET_WS_URL;
use super::protocol::{Inbound, StreamProtocol};
use crate::dispatch::RequestDispatcher;
use crate::events::{EventSink, StreamEvent, StreamMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Callback invoked for every update on a subscribed key.
pub type StreamCallback = Arc<dyn Fn(&StreamMessage) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed by server: {0}")]
    ConnectionClosed(String),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Client is closed")]
    Closed,
}

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay: Duration,
    pub reconnect_growth: f64,
    pub reconnect_max_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Bound on socket open and on the authentication handshake.
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MARKET_WS_URL.to_string(),
            auto_reconnect: true,
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_millis(3000),
            reconnect_growth: 1.5,
            reconnect_max_delay: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl StreamConfig {
    /// `min(cap, base * growth^(attempt - 1))` for a 1-based attempt.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let millis =
            self.reconnect_base_delay.as_millis() as f64 * self.reconnect_growth.powi(exponent as i32);
        let capped = millis.min(self.reconnect_max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}

#[derive(Default)]
struct ConnectionTasks {
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl ConnectionTasks {
    fn abort_all(&mut self) {
        for handle in [self.reader.take(), self.heartbeat.take(), self.reconnect.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

enum CloseReason {
    Closed(String),
    Failed(String),
}

/// Persistent streaming connection with subscriptions that survive reconnects.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct StreamingClient {
    inner: Arc<ClientInner>,
    _handles: Arc<LastHandle>,
}

/// Dropped with the last [`StreamingClient`] clone; stops the background
/// tasks, which hold the shared state strongly.
struct LastHandle(Weak<ClientInner>);

impl Drop for LastHandle {
    fn drop(&mut self) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        inner.auto_reconnect.store(false, Ordering::SeqCst);
        inner.transition(ConnectionState::Closed);
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.tasks.lock().abort_all();
        debug!("[{}] Last handle dropped, tasks stopped", inner.protocol.name());
    }
}

struct ClientInner {
    config: StreamConfig,
    protocol: Arc<dyn StreamProtocol>,
    /// Shared with REST calls so control frames count against the same budget.
    dispatcher: Arc<RequestDispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Mutex<HashMap<String, StreamCallback>>,
    auto_reconnect: AtomicBool,
    attempts: AtomicU32,
    /// Bumped on every successful connect so stale tasks can tell they are stale.
    generation: AtomicU64,
    /// Holding this lock orders subscription replay against `watch`.
    writer: tokio::sync::Mutex<Option<WsSink>>,
    tasks: Mutex<ConnectionTasks>,
    connect_lock: tokio::sync::Mutex<()>,
    events: EventSink<StreamEvent>,
}

impl StreamingClient {
    pub fn new(
        config: StreamConfig,
        protocol: Arc<dyn StreamProtocol>,
        dispatcher: Arc<RequestDispatcher>,
        events: EventSink<StreamEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let auto_reconnect = AtomicBool::new(config.auto_reconnect);

        let inner = Arc::new(ClientInner {
            config,
            protocol,
            dispatcher,
            state_tx,
            subscriptions: Mutex::new(HashMap::new()),
            auto_reconnect,
            attempts: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            writer: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(ConnectionTasks::default()),
            connect_lock: tokio::sync::Mutex::new(()),
            events,
        });

        Self {
            _handles: Arc::new(LastHandle(Arc::downgrade(&inner))),
            inner,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Keys with a registered callback.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscription_keys()
    }

    /// Opens the connection, authenticates and replays subscriptions.
    ///
    /// On failure the client is left `Disconnected`, never `Connected`.
    pub async fn connect(&self) -> Result<(), StreamError> {
        let _guard = self.inner.connect_lock.lock().await;

        match self.state() {
            ConnectionState::Closed => return Err(StreamError::Closed),
            ConnectionState::Connected => return Ok(()),
            _ => {}
        }

        match self.inner.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("[{}] Connect failed: {}", self.inner.protocol.name(), e);
                self.inner.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Closes the connection for good and disables auto-reconnect.
    pub async fn disconnect(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        let was_closed = self.state() == ConnectionState::Closed;
        self.inner.transition(ConnectionState::Closed);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.tasks.lock().abort_all();

        let sink = self.inner.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        if !was_closed {
            info!("[{}] Stream closed", self.inner.protocol.name());
        }
    }

    /// Registers `callback` for `key` and subscribes to it.
    ///
    /// Re-registering a key replaces its callback. Connects first when the
    /// client is disconnected; while reconnecting the subscription is
    /// replayed once the connection is back.
    pub async fn watch<F>(&self, key: impl Into<String>, callback: F) -> Result<(), StreamError>
    where
        F: Fn(&StreamMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = key.into();

        if self.state() == ConnectionState::Closed {
            return Err(StreamError::Closed);
        }

        let replaced = self
            .inner
            .subscriptions
            .lock()
            .insert(key.clone(), Arc::new(callback))
            .is_some();
        if replaced {
            debug!("[{}] Replaced callback for {}", self.inner.protocol.name(), key);
        }

        if self.is_connected() {
            self.inner.dispatcher.throttle(self.inner.protocol.name()).await;
        }

        {
            let mut writer = self.inner.writer.lock().await;
            if let Some(sink) = writer.as_mut() {
                let frame = self.inner.protocol.subscribe_frame(std::slice::from_ref(&key));
                return match sink.send(Message::Text(frame)).await {
                    Ok(()) => {
                        debug!("[{}] Subscribed to {}", self.inner.protocol.name(), key);
                        Ok(())
                    }
                    Err(e) => {
                        // Still registered: replayed on reconnect.
                        warn!(
                            "[{}] Subscribe for {} not sent: {}",
                            self.inner.protocol.name(),
                            key,
                            e
                        );
                        Ok(())
                    }
                };
            }
        }

        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Connecting => self.connect().await,
            ConnectionState::Closed => Err(StreamError::Closed),
            ConnectionState::Connected | ConnectionState::Reconnecting => Ok(()),
        }
    }

    /// Removes the callback for `key`, unsubscribing if connected.
    ///
    /// Returns whether the key was registered.
    pub async fn unwatch(&self, key: &str) -> Result<bool, StreamError> {
        if self.inner.subscriptions.lock().remove(key).is_none() {
            return Ok(false);
        }

        if self.is_connected() {
            self.inner.dispatcher.throttle(self.inner.protocol.name()).await;
        }

        let mut writer = self.inner.writer.lock().await;
        if let Some(sink) = writer.as_mut() {
            let frame = self.inner.protocol.unsubscribe_frame(&[key.to_string()]);
            sink.send(Message::Text(frame))
                .await
                .map_err(|e| StreamError::SendFailed(e.to_string()))?;
            debug!("[{}] Unsubscribed from {}", self.inner.protocol.name(), key);
        }

        Ok(true)
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn subscription_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Moves the state machine. Nothing leaves `Closed`.
    fn transition(&self, to: ConnectionState) -> bool {
        let mut from = to;
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == to || *state == ConnectionState::Closed {
                return false;
            }
            from = *state;
            *state = to;
            true
        });

        if changed {
            debug!("[{}] State {} -> {}", self.protocol.name(), from, to);
            self.events.emit(StreamEvent::StateChanged {
                from,
                to,
                timestamp: Utc::now(),
            });
        }
        changed
    }

    /// One connection attempt: open, authenticate, replay, start tasks.
    async fn establish(self: &Arc<Self>) -> Result<(), StreamError> {
        if !self.transition(ConnectionState::Connecting)
            && self.state() != ConnectionState::Connecting
        {
            return Err(StreamError::Closed);
        }
        info!("[{}] Connecting to {}", self.protocol.name(), self.config.url);

        let (ws, _response) = timeout(self.config.connect_timeout, connect_async(self.config.url.as_str()))
            .await
            .map_err(|_| StreamError::Timeout("connect"))?
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut source) = ws.split();

        if let Some(frame) = self.protocol.auth_frame() {
            self.dispatcher.throttle(self.protocol.name()).await;
            sink.send(Message::Text(frame))
                .await
                .map_err(|e| StreamError::SendFailed(e.to_string()))?;
            timeout(
                self.config.connect_timeout,
                self.await_auth(&mut sink, &mut source),
            )
            .await
            .map_err(|_| StreamError::Timeout("authentication"))??;
            debug!("[{}] Authenticated", self.protocol.name());
        }

        if !self.subscriptions.lock().is_empty() {
            self.dispatcher.throttle(self.protocol.name()).await;
        }
        let mut writer = self.writer.lock().await;

        let keys = self.subscription_keys();
        if !keys.is_empty() {
            sink.send(Message::Text(self.protocol.subscribe_frame(&keys)))
                .await
                .map_err(|e| StreamError::SendFailed(e.to_string()))?;
        }

        *writer = Some(sink);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempts.store(0, Ordering::SeqCst);

        if !self.transition(ConnectionState::Connected) {
            // Closed while the handshake was in flight.
            if let Some(mut sink) = writer.take() {
                let _ = sink.close().await;
            }
            return Err(StreamError::Closed);
        }
        drop(writer);

        info!(
            "[{}] Connected, {} subscription(s) replayed",
            self.protocol.name(),
            keys.len()
        );

        let reader = tokio::spawn(Arc::clone(self).read_loop(source, generation));
        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop(generation));
        let mut tasks = self.tasks.lock();
        tasks.reader = Some(reader);
        tasks.heartbeat = Some(heartbeat);

        Ok(())
    }

    async fn await_auth(&self, sink: &mut WsSink, source: &mut WsSource) -> Result<(), StreamError> {
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    if self.protocol.is_control(&text) {
                        continue;
                    }
                    match self.protocol.decode(&text) {
                        Ok(Inbound::AuthAccepted) => return Ok(()),
                        Ok(Inbound::AuthRejected(reason)) => {
                            return Err(StreamError::Authentication(reason))
                        }
                        Ok(_) => trace!("[{}] Frame before auth ack ignored", self.protocol.name()),
                        Err(e) => debug!("[{}] Malformed frame during auth: {}", self.protocol.name(), e),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed during authentication".to_string());
                    return Err(StreamError::Authentication(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::ConnectionFailed(e.to_string())),
                None => {
                    return Err(StreamError::ConnectionClosed(
                        "stream ended during authentication".to_string(),
                    ))
                }
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut source: WsSource, generation: u64) {
        let reason = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => self.handle_text(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_text(&text),
                    Err(_) => debug!("[{}] Non-UTF8 binary frame dropped", self.protocol.name()),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Some(sink) = self.writer.lock().await.as_mut() {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Pong(_))) => trace!("[{}] Pong", self.protocol.name()),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    break CloseReason::Closed(reason);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => break CloseReason::Failed(e.to_string()),
                None => break CloseReason::Closed("Stream ended".to_string()),
            }
        };

        self.handle_close(generation, reason).await;
    }

    /// Parses and dispatches one text frame. Never fails.
    fn handle_text(&self, text: &str) {
        if self.protocol.is_control(text) {
            trace!("[{}] Control frame: {}", self.protocol.name(), text.trim());
            return;
        }

        match self.protocol.decode(text) {
            Ok(Inbound::Messages(messages)) => {
                for message in &messages {
                    self.dispatch(message);
                }
            }
            Ok(Inbound::Ignored) => {}
            Ok(other) => debug!("[{}] Unexpected frame: {:?}", self.protocol.name(), other),
            Err(e) => warn!("[{}] Dropping malformed frame: {}", self.protocol.name(), e),
        }
    }

    fn dispatch(&self, message: &StreamMessage) {
        let key = message.key();
        let callback = self.subscriptions.lock().get(key).cloned();
        let Some(callback) = callback else {
            trace!("[{}] No subscriber for {}", self.protocol.name(), key);
            return;
        };

        let failure = match catch_unwind(AssertUnwindSafe(|| callback(message))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        if let Some(message) = failure {
            warn!("[{}] Callback for {} failed: {}", self.protocol.name(), key, message);
            self.events.emit(StreamEvent::CallbackFailed {
                key: key.to_string(),
                message,
                timestamp: Utc::now(),
            });
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, generation: u64) {
        let period = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            ticker.tick().await;

            if self.generation.load(Ordering::SeqCst) != generation
                || self.state() != ConnectionState::Connected
            {
                return;
            }

            let frame = self.protocol.heartbeat_frame();
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => match sink.send(Message::Text(frame)).await {
                    Ok(()) => trace!("[{}] Sent heartbeat", self.protocol.name()),
                    Err(e) => debug!("[{}] Heartbeat send failed: {}", self.protocol.name(), e),
                },
                None => return,
            }
        }
    }

    async fn handle_close(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        {
            let mut tasks = self.tasks.lock();
            if let Some(heartbeat) = tasks.heartbeat.take() {
                heartbeat.abort();
            }
            // This is the reader task itself; detach instead of aborting.
            tasks.reader.take();
        }
        self.writer.lock().await.take();

        if self.state() == ConnectionState::Closed {
            return;
        }

        match reason {
            CloseReason::Failed(message) => {
                warn!("[{}] Stream error: {}", self.protocol.name(), message);
                self.events.emit(StreamEvent::Error {
                    message,
                    timestamp: Utc::now(),
                });
            }
            CloseReason::Closed(message) => {
                info!("[{}] Stream closed by server: {}", self.protocol.name(), message);
            }
        }

        if self.auto_reconnect.load(Ordering::SeqCst) {
            self.transition(ConnectionState::Reconnecting);
            let handle = tokio::spawn(Arc::clone(self).reconnect_loop());
            self.tasks.lock().reconnect = Some(handle);
        } else {
            self.transition(ConnectionState::Disconnected);
        }
    }

    /// Retries `establish` with capped backoff until it succeeds, the client
    /// is closed, or attempts run out.
    fn reconnect_loop(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                if !self.auto_reconnect.load(Ordering::SeqCst)
                    || self.state() == ConnectionState::Closed
                {
                    return;
                }

                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let max = self.config.max_reconnect_attempts;
                if max > 0 && attempt > max {
                    self.give_up(attempt - 1);
                    return;
                }

                self.transition(ConnectionState::Reconnecting);
                let delay = self.config.reconnect_delay(attempt);
                info!(
                    "[{}] Reconnecting in {}ms (attempt {})",
                    self.protocol.name(),
                    delay.as_millis(),
                    attempt
                );
                tokio::time::sleep(delay).await;

                let _guard = self.connect_lock.lock().await;
                match self.state() {
                    ConnectionState::Closed | ConnectionState::Connected => return,
                    _ => {}
                }

                match self.establish().await {
                    Ok(()) => {
                        info!("[{}] Reconnection successful", self.protocol.name());
                        return;
                    }
                    Err(StreamError::Authentication(reason)) => {
                        error!(
                            "[{}] Authentication rejected on reconnect: {}",
                            self.protocol.name(),
                            reason
                        );
                        self.give_up(attempt);
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "[{}] Reconnection attempt {} failed: {}",
                            self.protocol.name(),
                            attempt,
                            e
                        );
                        self.events.emit(StreamEvent::Error {
                            message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        })
    }

    fn give_up(&self, attempts: u32) {
        error!(
            "[{}] Giving up after {} reconnection attempt(s)",
            self.protocol.name(),
            attempts
        );
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.transition(ConnectionState::Closed);
        self.events.emit(StreamEvent::PermanentlyDisconnected {
            attempts,
            timestamp: Utc::now(),
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("callback panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("callback panicked: {}", s)
    } else {
        "callback panicked".to_string()
    }
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("protocol", &self.inner.protocol.name())
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .finish()
    }
}
