//! Connection Client
//!
//! One persistent streaming connection to a venue, multiplexing many logical
//! subscriptions.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect──► Connecting ──handshake──► Open ──close──► Closing ──► Closed
//!                        │                     │                            ▲
//!                        └──timeout / error────┴────error / remote close────┘
//! ```
//!
//! `Closed` is restart-ready: a later `connect` starts a fresh attempt with a
//! fresh connected handle. The client never reconnects by itself.
//!
//! # Event loop
//!
//! Each attempt runs in one spawned task that serially handles keepalive
//! ticks, outbound frames and inbound transport events. Shared state sits
//! behind a mutex that is released before any callback, settlement or await.
//!
//! # Correlation
//!
//! Callers wait on a [`Deferred`] keyed by a message hash. Outcomes that
//! arrive with no waiter are stashed under the key (latest wins) and handed
//! to the next `request` for it. The stash belongs to one connection and is
//! dropped when it closes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::FrameCodec;
use super::keepalive::{KeepAliveConfig, KeepAliveEvent, KeepAliveMonitor, KeepAliveState};
use crate::application::ports::{
    CLOSE_NORMAL, CloseEvent, Frame, Transport, TransportEvent, TransportEvents,
    TransportOptions, TransportSink,
};
use crate::domain::deferred::Deferred;
use crate::domain::error::ClientError;
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::metrics;

// =============================================================================
// Public Types
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete.
    Open,
    /// Local close requested.
    Closing,
    /// Terminal and restart-ready.
    Closed,
}

impl ConnectionStatus {
    /// Status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Handle settled with the URL once the connection opens.
pub type ConnectedHandle = Deferred<String, ClientError>;

/// Handle settled with the close event once the connection closes.
pub type DisconnectedHandle = Deferred<CloseEvent, ClientError>;

/// Handle settled with a correlated response.
pub type ResponseHandle = Deferred<Value, ClientError>;

/// Handle settled once an outbound frame is written.
pub type SendHandle = Deferred<(), ClientError>;

type MessageFn = dyn Fn(&ConnectionClient, Value) + Send + Sync;
type ErrorFn = dyn Fn(&ConnectionClient, &ClientError) + Send + Sync;
type CloseFn = dyn Fn(&ConnectionClient, &CloseEvent) + Send + Sync;
type ConnectedFn = dyn Fn(&ConnectionClient) + Send + Sync;
type PingFn = dyn Fn(&ConnectionClient) -> Option<Value> + Send + Sync;

/// Caller-supplied hooks.
///
/// `on_message` receives every decoded inbound value and is where the venue
/// parser lives. `ping` builds an application-level keepalive message; when
/// absent the client falls back to protocol pings.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    on_message: Option<Arc<MessageFn>>,
    on_error: Option<Arc<ErrorFn>>,
    on_close: Option<Arc<CloseFn>>,
    on_connected: Option<Arc<ConnectedFn>>,
    ping: Option<Arc<PingFn>>,
}

impl ClientCallbacks {
    /// Hooks that do nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle decoded inbound values.
    #[must_use]
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConnectionClient, Value) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Observe errors, fatal or not.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConnectionClient, &ClientError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Observe close events.
    #[must_use]
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConnectionClient, &CloseEvent) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Observe successful handshakes.
    #[must_use]
    pub fn on_connected<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConnectionClient) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(callback));
        self
    }

    /// Build application-level keepalive messages.
    #[must_use]
    pub fn ping<F>(mut self, probe: F) -> Self
    where
        F: Fn(&ConnectionClient) -> Option<Value> + Send + Sync + 'static,
    {
        self.ping = Some(Arc::new(probe));
        self
    }
}

impl fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("ping", &self.ping.is_some())
            .finish()
    }
}

// =============================================================================
// State
// =============================================================================

enum Command {
    Send { frame: Frame, done: SendHandle },
}

struct ClientState {
    status: ConnectionStatus,
    generation: u64,
    futures: HashMap<String, ResponseHandle>,
    stashed: HashMap<String, Result<Value, ClientError>>,
    subscriptions: HashMap<String, Value>,
    connected: ConnectedHandle,
    disconnected: Option<DisconnectedHandle>,
    error: Option<ClientError>,
    closed_by_user: bool,
    connection_started: Option<i64>,
    connection_established: Option<i64>,
    keepalive: Option<Arc<KeepAliveState>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    cancel: Option<CancellationToken>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            generation: 0,
            futures: HashMap::new(),
            stashed: HashMap::new(),
            subscriptions: HashMap::new(),
            connected: Deferred::new(),
            disconnected: None,
            error: None,
            closed_by_user: false,
            connection_started: None,
            connection_established: None,
            keepalive: None,
            commands: None,
            cancel: None,
        }
    }
}

struct ClientInner {
    url: String,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    callbacks: ClientCallbacks,
    codec: FrameCodec,
    state: Mutex<ClientState>,
}

/// Cloneable handle to one venue connection.
#[derive(Clone)]
pub struct ConnectionClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ConnectionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionClient")
            .field("url", &self.inner.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Public API
// =============================================================================

impl ConnectionClient {
    /// Create an idle client.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        url: impl Into<String>,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        callbacks: ClientCallbacks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = FrameCodec::new(config.decompression);
        Ok(Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                config,
                transport,
                callbacks,
                codec,
                state: Mutex::new(ClientState::new()),
            }),
        })
    }

    /// Venue URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Whether the handshake has completed and no close has begun.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// When the current attempt started, ms since the epoch.
    #[must_use]
    pub fn connection_started(&self) -> Option<i64> {
        self.inner.state.lock().connection_started
    }

    /// When the current connection opened, ms since the epoch.
    #[must_use]
    pub fn connection_established(&self) -> Option<i64> {
        self.inner.state.lock().connection_established
    }

    /// Last observed pong, ms since the epoch.
    #[must_use]
    pub fn last_pong(&self) -> Option<i64> {
        self.inner
            .state
            .lock()
            .keepalive
            .as_ref()
            .map(|keepalive| keepalive.last_pong_millis())
    }

    /// Record an application-level pong seen by the venue parser.
    pub fn record_pong(&self) {
        if let Some(keepalive) = self.inner.state.lock().keepalive.clone() {
            keepalive.record_pong();
        }
    }

    /// Error that ended the last connection, if any.
    #[must_use]
    pub fn error(&self) -> Option<ClientError> {
        self.inner.state.lock().error.clone()
    }

    /// Start connecting, or return the in-flight handle.
    pub fn connect(&self) -> ConnectedHandle {
        self.connect_with_backoff(Duration::ZERO)
    }

    /// Start connecting after `delay`, or return the in-flight handle.
    pub fn connect_with_backoff(&self, delay: Duration) -> ConnectedHandle {
        let (handle, generation, cancel, commands) = {
            let mut state = self.inner.state.lock();
            match state.status {
                ConnectionStatus::Connecting
                | ConnectionStatus::Open
                | ConnectionStatus::Closing => return state.connected.clone(),
                ConnectionStatus::Idle | ConnectionStatus::Closed => {}
            }
            if state.status == ConnectionStatus::Closed {
                state.connected = Deferred::new();
                state.disconnected = None;
                state.error = None;
                state.closed_by_user = false;
                state.connection_established = None;
                state.keepalive = None;
            }
            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            state.status = ConnectionStatus::Connecting;
            state.generation += 1;
            state.connection_started = Some(now_millis());
            state.commands = Some(commands_tx);
            state.cancel = Some(cancel.clone());
            (
                state.connected.clone(),
                state.generation,
                cancel,
                commands_rx,
            )
        };

        tracing::info!(
            url = %self.inner.url,
            generation,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Connecting"
        );
        let client = self.clone();
        tokio::spawn(async move {
            client.run(generation, delay, cancel, commands).await;
        });
        handle
    }

    /// Close the connection. Pending requests reject with
    /// [`ClientError::ClosedByUser`].
    pub fn close(&self) -> DisconnectedHandle {
        let mut state = self.inner.state.lock();
        match state.status {
            ConnectionStatus::Idle | ConnectionStatus::Closed => {
                Deferred::resolved(CloseEvent::new(CLOSE_NORMAL, "not connected"))
            }
            ConnectionStatus::Closing => state
                .disconnected
                .get_or_insert_with(Deferred::new)
                .clone(),
            ConnectionStatus::Connecting | ConnectionStatus::Open => {
                state.status = ConnectionStatus::Closing;
                state.closed_by_user = true;
                if let Some(cancel) = &state.cancel {
                    cancel.cancel();
                }
                tracing::info!(url = %self.inner.url, "Closing connection");
                state
                    .disconnected
                    .get_or_insert_with(Deferred::new)
                    .clone()
            }
        }
    }

    /// Handle settled when the current connection closes for any reason.
    ///
    /// Already resolved when there is no connection.
    pub fn disconnected(&self) -> DisconnectedHandle {
        let mut state = self.inner.state.lock();
        match state.status {
            ConnectionStatus::Idle | ConnectionStatus::Closed => {
                Deferred::resolved(CloseEvent::new(CLOSE_NORMAL, "not connected"))
            }
            ConnectionStatus::Connecting | ConnectionStatus::Open | ConnectionStatus::Closing => {
                state
                    .disconnected
                    .get_or_insert_with(Deferred::new)
                    .clone()
            }
        }
    }

    /// Serialize and send a message. Strings are sent verbatim.
    pub fn send(&self, message: &Value) -> SendHandle {
        let frame = match self.inner.codec.encode(message) {
            Ok(frame) => frame,
            Err(error) => return Deferred::rejected(error),
        };
        let state = self.inner.state.lock();
        let commands = match (&state.status, &state.commands) {
            (ConnectionStatus::Open, Some(commands)) => commands.clone(),
            _ => {
                return Deferred::rejected(ClientError::Network(
                    "connection is not open".to_string(),
                ));
            }
        };
        drop(state);

        let done = Deferred::new();
        if commands
            .send(Command::Send {
                frame,
                done: done.clone(),
            })
            .is_err()
        {
            done.reject(ClientError::Network("connection is not open".to_string()));
        }
        done
    }

    /// Handle for `message_hash`, replaying any stashed outcome.
    pub fn request(&self, message_hash: &str) -> ResponseHandle {
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.futures.get(message_hash) {
            return existing.clone();
        }
        let deferred = Deferred::new();
        match state.stashed.remove(message_hash) {
            Some(outcome) => {
                drop(state);
                match outcome {
                    Ok(value) => deferred.resolve(value),
                    Err(error) => deferred.reject(error),
                };
            }
            None => {
                state
                    .futures
                    .insert(message_hash.to_string(), deferred.clone());
            }
        }
        deferred
    }

    /// Resolve the waiter for `message_hash`, or stash the value if none.
    ///
    /// Returns whether a waiter was settled.
    pub fn resolve(&self, value: Value, message_hash: &str) -> bool {
        self.settle(message_hash, Ok(value))
    }

    /// Reject the waiter for `message_hash`, or every waiter when `None`.
    ///
    /// Returns whether any waiter was settled.
    pub fn reject(&self, error: ClientError, message_hash: Option<&str>) -> bool {
        if let Some(message_hash) = message_hash {
            return self.settle(message_hash, Err(error));
        }
        let pending: Vec<_> = self.inner.state.lock().futures.drain().collect();
        let any = !pending.is_empty();
        for (_, deferred) in pending {
            deferred.reject(error.clone());
        }
        any
    }

    /// Subscribe through this connection.
    ///
    /// Returns the handle for `message_hash`, connects, and once open sends
    /// `subscribe_message` unless `subscribe_hash` is already recorded. With
    /// no `subscribe_hash`, an existing waiter for `message_hash` is reused.
    pub fn watch(
        &self,
        message_hash: &str,
        subscribe_message: Option<Value>,
        subscribe_hash: Option<&str>,
    ) -> ResponseHandle {
        if subscribe_hash.is_none()
            && let Some(existing) = self.inner.state.lock().futures.get(message_hash).cloned()
        {
            return existing;
        }

        let future = self.request(message_hash);
        let already_subscribed = subscribe_hash.is_some_and(|hash| {
            let mut state = self.inner.state.lock();
            if state.subscriptions.contains_key(hash) {
                true
            } else {
                let record = subscribe_message.clone().unwrap_or(Value::Bool(true));
                state.subscriptions.insert(hash.to_string(), record);
                false
            }
        });

        let client = self.clone();
        let waiter = future.clone();
        let subscribe_hash = subscribe_hash.map(str::to_string);
        self.connect().on_settled(move |outcome| {
            let failed = match outcome {
                Ok(_) if already_subscribed => return,
                Ok(_) => match subscribe_message {
                    Some(message) => {
                        let sent = client.send(&message);
                        sent.on_settled(move |result| {
                            if let Err(error) = result {
                                if let Some(hash) = &subscribe_hash {
                                    client.unwatch(hash);
                                }
                                waiter.reject(error);
                            }
                        });
                        return;
                    }
                    None => return,
                },
                Err(error) => error,
            };
            if let Some(hash) = &subscribe_hash {
                client.unwatch(hash);
            }
            waiter.reject(failed);
        });
        future
    }

    /// Forget a recorded subscription so the next `watch` re-sends it.
    pub fn unwatch(&self, subscribe_hash: &str) -> bool {
        self.inner
            .state
            .lock()
            .subscriptions
            .remove(subscribe_hash)
            .is_some()
    }

    /// Recorded subscribe hashes.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .subscriptions
            .keys()
            .cloned()
            .collect()
    }

    /// Number of pending correlated waiters.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.state.lock().futures.len()
    }

    fn settle(&self, message_hash: &str, outcome: Result<Value, ClientError>) -> bool {
        let waiter = {
            let mut state = self.inner.state.lock();
            match state.futures.remove(message_hash) {
                Some(waiter) => waiter,
                None => {
                    state.stashed.insert(message_hash.to_string(), outcome);
                    return false;
                }
            }
        };
        match outcome {
            Ok(value) => waiter.resolve(value),
            Err(error) => waiter.reject(error),
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

impl ConnectionClient {
    async fn run(
        self,
        generation: u64,
        delay: Duration,
        cancel: CancellationToken,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        if !delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.finish(generation, CloseEvent::new(CLOSE_NORMAL, "closed by user"));
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let opened = tokio::select! {
            () = cancel.cancelled() => {
                self.finish(generation, CloseEvent::new(CLOSE_NORMAL, "closed by user"));
                return;
            }
            opened = self.open_transport() => opened,
        };
        let (mut sink, mut events) = match opened {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(url = %self.inner.url, error = %error, "Handshake failed");
                self.fail(generation, error.clone());
                self.finish(generation, CloseEvent::abnormal(error.to_string()));
                return;
            }
        };

        let keepalive = Arc::new(KeepAliveState::new());
        if !self.on_open(generation, Arc::clone(&keepalive)) {
            let _ = sink.close(CLOSE_NORMAL).await;
            self.finish(generation, CloseEvent::new(CLOSE_NORMAL, "closed by user"));
            return;
        }

        let monitor_cancel = cancel.child_token();
        let (keepalive_tx, mut keepalive_rx) = mpsc::channel(8);
        let _idle_keepalive = match KeepAliveConfig::from_client_config(&self.inner.config) {
            Some(config) => {
                let monitor = KeepAliveMonitor::new(
                    config,
                    Arc::clone(&keepalive),
                    keepalive_tx,
                    monitor_cancel.clone(),
                );
                tokio::spawn(monitor.run());
                None
            }
            None => Some(keepalive_tx),
        };

        let close = self
            .event_loop(
                generation,
                &cancel,
                sink.as_mut(),
                &mut events,
                &mut keepalive_rx,
                &mut commands,
                &keepalive,
            )
            .await;
        monitor_cancel.cancel();
        self.finish(generation, close);
    }

    async fn open_transport(
        &self,
    ) -> Result<(Box<dyn TransportSink>, TransportEvents), ClientError> {
        let options = TransportOptions {
            protocols: self.inner.config.protocols.clone(),
            headers: self.inner.config.headers.clone(),
        };
        let open = self.inner.transport.open(&self.inner.url, &options);
        match self.inner.config.effective_connection_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, open)
                .await
                .unwrap_or_else(|_| {
                    Err(ClientError::RequestTimeout(format!(
                        "Connection to {} timed out due to a connection timeout",
                        self.inner.url
                    )))
                }),
            None => open.await,
        }
    }

    /// Serially handle events until the connection ends; returns the close event.
    async fn event_loop(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        sink: &mut dyn TransportSink,
        events: &mut TransportEvents,
        keepalive_rx: &mut mpsc::Receiver<KeepAliveEvent>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        keepalive: &KeepAliveState,
    ) -> CloseEvent {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    if let Err(error) = sink.close(CLOSE_NORMAL).await {
                        tracing::debug!(error = %error, "Close handshake failed");
                    }
                    return CloseEvent::new(CLOSE_NORMAL, "closed by user");
                }

                Some(event) = keepalive_rx.recv() => match event {
                    KeepAliveEvent::Timeout { .. } => {
                        metrics::record_keepalive_timeout();
                        let error = ClientError::RequestTimeout(format!(
                            "Connection to {} timed out due to a ping-pong keepalive missing on time",
                            self.inner.url
                        ));
                        return self.abort(generation, error);
                    }
                    KeepAliveEvent::Probe => {
                        if let Err(error) = self.probe(sink, keepalive).await {
                            return self.abort(generation, error);
                        }
                    }
                },

                Some(command) = commands.recv() => match command {
                    Command::Send { frame, done } => {
                        if !sink.confirms_writes() {
                            done.resolve(());
                        }
                        match sink.send(frame).await {
                            Ok(()) => {
                                done.resolve(());
                            }
                            Err(error) => {
                                done.reject(error.clone());
                                return self.abort(generation, error);
                            }
                        }
                    }
                },

                event = events.next() => match event {
                    Some(TransportEvent::Message(frame)) => self.handle_frame(&frame),
                    Some(TransportEvent::Ping(data)) => {
                        keepalive.record_pong();
                        match sink.pong(data).await {
                            Ok(()) | Err(ClientError::NotSupported(_)) => {}
                            Err(error) => return self.abort(generation, error),
                        }
                    }
                    Some(TransportEvent::Pong(_)) => keepalive.record_pong(),
                    Some(TransportEvent::Error(error)) => return self.abort(generation, error),
                    Some(TransportEvent::Close(close)) => return close,
                    None => return CloseEvent::abnormal("transport stream ended"),
                },
            }
        }
    }

    async fn probe(
        &self,
        sink: &mut dyn TransportSink,
        keepalive: &KeepAliveState,
    ) -> Result<(), ClientError> {
        if let Some(ping) = &self.inner.callbacks.ping {
            if let Some(message) = ping(self) {
                let frame = self.inner.codec.encode(&message)?;
                sink.send(frame).await?;
            }
            return Ok(());
        }
        if sink.exposes_control_frames() {
            return sink.ping().await;
        }
        // platform answers pings itself
        keepalive.record_pong();
        Ok(())
    }

    fn handle_frame(&self, frame: &Frame) {
        metrics::record_frame_received(frame.len());
        match self.inner.codec.decode(frame) {
            Ok(value) => {
                if let Some(on_message) = &self.inner.callbacks.on_message {
                    on_message(self, value);
                }
            }
            Err(error) => {
                metrics::record_decode_error();
                tracing::warn!(url = %self.inner.url, error = %error, "Dropping undecodable frame");
                if let Some(on_error) = &self.inner.callbacks.on_error {
                    on_error(self, &error);
                }
            }
        }
    }

    fn abort(&self, generation: u64, error: ClientError) -> CloseEvent {
        tracing::warn!(url = %self.inner.url, error = %error, "Connection failed");
        let close = CloseEvent::abnormal(error.to_string());
        self.fail(generation, error);
        close
    }

    fn on_open(&self, generation: u64, keepalive: Arc<KeepAliveState>) -> bool {
        let connected = {
            let mut state = self.inner.state.lock();
            if state.generation != generation || state.status != ConnectionStatus::Connecting {
                return false;
            }
            state.status = ConnectionStatus::Open;
            state.connection_established = Some(now_millis());
            state.keepalive = Some(keepalive);
            state.connected.clone()
        };

        metrics::connection_opened();
        tracing::info!(url = %self.inner.url, generation, "Connection open");
        connected.resolve(self.inner.url.clone());
        if let Some(on_connected) = &self.inner.callbacks.on_connected {
            on_connected(self);
        }
        true
    }

    /// Record a fatal error, reject every waiter and notify `on_error`.
    fn fail(&self, generation: u64, error: ClientError) {
        let (pending, connected) = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            state.error = Some(error.clone());
            let pending: Vec<_> = state.futures.drain().map(|(_, waiter)| waiter).collect();
            (pending, state.connected.clone())
        };

        if connected.is_pending() {
            connected.reject(error.clone());
        }
        for waiter in pending {
            waiter.reject(error.clone());
        }
        if let Some(on_error) = &self.inner.callbacks.on_error {
            on_error(self, &error);
        }
    }

    /// Transition to `Closed` and release everything tied to the attempt.
    fn finish(&self, generation: u64, close: CloseEvent) {
        let (pending, connected, disconnected, rejection, was_open) = {
            let mut state = self.inner.state.lock();
            if state.generation != generation || state.status == ConnectionStatus::Closed {
                return;
            }
            let was_open = state.connection_established.is_some()
                && matches!(
                    state.status,
                    ConnectionStatus::Open | ConnectionStatus::Closing
                );
            let rejection = if state.closed_by_user {
                ClientError::ClosedByUser
            } else if let Some(error) = &state.error {
                error.clone()
            } else {
                ClientError::Network(format!(
                    "connection closed by remote server, closing code {}",
                    close.code
                ))
            };
            state.status = ConnectionStatus::Closed;
            state.subscriptions.clear();
            state.stashed.clear();
            state.commands = None;
            state.keepalive = None;
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            let pending: Vec<_> = state.futures.drain().map(|(_, waiter)| waiter).collect();
            (
                pending,
                state.connected.clone(),
                state.disconnected.take(),
                rejection,
                was_open,
            )
        };

        if was_open {
            metrics::connection_closed();
        }
        tracing::info!(
            url = %self.inner.url,
            code = close.code,
            reason = %close.reason,
            "Connection closed"
        );
        if connected.is_pending() {
            connected.reject(rejection.clone());
        }
        for waiter in pending {
            waiter.reject(rejection.clone());
        }
        if let Some(disconnected) = disconnected {
            disconnected.resolve(close.clone());
        }
        if let Some(on_close) = &self.inner.callbacks.on_close {
            on_close(self, &close);
        }
    }
}
