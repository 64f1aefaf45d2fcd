//! The single relay connection of a client process.
//!
//! One driver task owns the socket and every piece of lifecycle state.
//! Callers talk to it through a cloneable [`ConnectionHandle`]; helper tasks
//! (handshake, reader, timers) report back tagged with the connection
//! generation or reconnect attempt they belong to, and stale reports are
//! dropped.

use super::backoff::Backoff;
use super::history_sync::HistorySync;
use crate::config::Config;
use crate::core::{ClientEvent, ConnectionState, IdentityProvider};
use crate::error::{ConfigError, TransportError};
use crate::transport::protocol::{AUTH_FAILURE_CLOSE_CODE, ClientMessage, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const COMMAND_BUFFER: usize = 32;
const INTERNAL_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub url: Url,
    pub auto_reconnect: bool,
    pub connect_timeout: Duration,
    pub token_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub reconnect_settle: Duration,
    pub history_idle: Duration,
    pub history_ceiling: Duration,
}

impl ConnectionOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = &config.client;
        Ok(Self {
            url: config.parsed_relay_url()?,
            auto_reconnect: client.auto_reconnect,
            connect_timeout: client.connect_timeout(),
            token_timeout: client.token_timeout(),
            backoff_base: client.backoff_base(),
            backoff_max: client.backoff_max(),
            reconnect_settle: client.reconnect_settle(),
            history_idle: client.history_idle(),
            history_ceiling: client.history_ceiling(),
        })
    }
}

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Send {
        message: ClientMessage,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown,
}

enum Internal {
    Opened {
        generation: u64,
        stream: Box<WsStream>,
    },
    ConnectFailed {
        generation: u64,
        error: TransportError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        code: Option<u16>,
        reason: String,
    },
    ReconnectDue {
        attempt: u64,
    },
}

/// Cloneable front end of the connection driver.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Start connecting. A no-op that re-announces the current state when
    /// already connecting or open.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.command(Command::Connect).await
    }

    /// Tear the connection down. Always announces `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.command(Command::Disconnect).await
    }

    /// Disconnect (if needed), let the teardown settle, then connect.
    /// Supersedes any reconnect scheduled earlier.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        self.command(Command::Reconnect).await
    }

    pub async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { message, reply }).await?;
        rx.await.map_err(|_| TransportError::DriverStopped)?
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), TransportError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::DriverStopped)
    }

    async fn command(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::DriverStopped)
    }
}

/// Spawn the driver for one relay connection. It starts disconnected.
pub fn spawn_connection(
    options: ConnectionOptions,
    identity: Arc<dyn IdentityProvider>,
    events: mpsc::Sender<ClientEvent>,
) -> (ConnectionHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let driver = ConnectionDriver {
        backoff: Backoff::new(options.backoff_base, options.backoff_max),
        history: HistorySync::new(options.history_idle, options.history_ceiling),
        options,
        identity,
        events,
        internal_tx,
        state_tx,
        state: ConnectionState::Disconnected,
        generation: 0,
        attempt: 0,
        reconnect_suspended: false,
        sink: None,
        connector: None,
        reader: None,
    };
    let task = tokio::spawn(driver.run(command_rx, internal_rx));

    (
        ConnectionHandle {
            commands: command_tx,
            state: state_rx,
        },
        task,
    )
}

struct ConnectionDriver {
    options: ConnectionOptions,
    identity: Arc<dyn IdentityProvider>,
    events: mpsc::Sender<ClientEvent>,
    internal_tx: mpsc::Sender<Internal>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    backoff: Backoff,
    history: HistorySync,
    /// Bumped per connect attempt; tags handshake and reader reports.
    generation: u64,
    /// Bumped per scheduled or explicit reconnect; a due timer whose id is
    /// not current has been superseded.
    attempt: u64,
    /// Set after the relay rejects our credentials (handshake 401/403 or a
    /// 4001 close) until the next explicit connect.
    reconnect_suspended: bool,
    sink: Option<WsSink>,
    connector: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl ConnectionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<Internal>,
    ) {
        loop {
            let history_deadline = self.history.deadline();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(report) = internal.recv() => self.handle_internal(report).await,
                () = wait_until(history_deadline) => {
                    if let Some(received) = self.history.poll(Instant::now()) {
                        tracing::debug!(received, "initial history complete (idle)");
                        self.emit(ClientEvent::HistoryReady { received }).await;
                    }
                }
            }
        }

        self.teardown().await;
        tracing::debug!("relay connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => {
                self.reconnect_suspended = false;
                self.connect().await;
            }
            Command::Disconnect => {
                // Invalidate any scheduled reconnect.
                self.attempt += 1;
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected, None).await;
            }
            Command::Reconnect => {
                self.reconnect_suspended = false;
                self.attempt += 1;
                let attempt = self.attempt;
                if self.state == ConnectionState::Disconnected {
                    self.connect().await;
                } else {
                    self.teardown().await;
                    self.set_state(ConnectionState::Disconnected, None).await;
                    self.schedule(attempt, self.options.reconnect_settle);
                }
            }
            Command::Send { message, reply } => {
                let result = self.send(&message).await;
                let _ = reply.send(result);
            }
            Command::Shutdown => return false,
        }
        true
    }

    async fn handle_internal(&mut self, report: Internal) {
        match report {
            Internal::Opened { generation, stream } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    tracing::debug!(generation, "dropping stale relay handshake");
                    return;
                }
                self.on_open(*stream).await;
            }
            Internal::ConnectFailed { generation, error } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    return;
                }
                self.connector = None;
                if error.is_auth_rejection() {
                    tracing::warn!(url = %self.options.url, "relay rejected credentials: {error}");
                    self.reconnect_suspended = true;
                    self.emit(ClientEvent::AuthenticationFailed {
                        reason: error.to_string(),
                    })
                    .await;
                    self.set_state(ConnectionState::Disconnected, Some(error.to_string()))
                        .await;
                    return;
                }
                tracing::warn!(url = %self.options.url, "relay connect failed: {error}");
                self.set_state(ConnectionState::Disconnected, Some(error.to_string()))
                    .await;
                self.schedule_auto_reconnect();
            }
            Internal::Frame { generation, text } => {
                if generation == self.generation {
                    self.on_frame(&text).await;
                }
            }
            Internal::Closed {
                generation,
                code,
                reason,
            } => {
                if generation != self.generation || self.state != ConnectionState::Open {
                    return;
                }
                self.on_closed(code, reason).await;
            }
            Internal::ReconnectDue { attempt } => {
                if attempt != self.attempt {
                    tracing::debug!(attempt, current = self.attempt, "abandoning stale reconnect");
                    return;
                }
                if self.state == ConnectionState::Disconnected {
                    tracing::info!(attempt, "reconnecting to relay");
                    self.connect().await;
                }
            }
        }
    }

    async fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            // Never a second attempt; just re-assert where we are.
            self.set_state(self.state, None).await;
            return;
        }

        self.generation += 1;
        self.set_state(ConnectionState::Connecting, None).await;

        let generation = self.generation;
        let url = self.options.url.clone();
        let connect_timeout = self.options.connect_timeout;
        let token_timeout = self.options.token_timeout;
        let identity = Arc::clone(&self.identity);
        let internal = self.internal_tx.clone();

        self.connector = Some(tokio::spawn(async move {
            let token = tokio::time::timeout(token_timeout, identity.identity_token())
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!("identity token fetch timed out; connecting unauthenticated");
                    None
                });
            let report = match open_socket(&url, token.as_deref(), connect_timeout).await {
                Ok(stream) => Internal::Opened {
                    generation,
                    stream: Box::new(stream),
                },
                Err(error) => Internal::ConnectFailed { generation, error },
            };
            let _ = internal.send(report).await;
        }));
    }

    async fn on_open(&mut self, stream: WsStream) {
        self.connector = None;
        let (sink, stream) = stream.split();
        self.sink = Some(sink);
        self.reader = Some(tokio::spawn(read_frames(
            stream,
            self.generation,
            self.internal_tx.clone(),
        )));

        self.backoff.reset();
        tracing::info!(url = %self.options.url, "relay connection open");
        self.set_state(ConnectionState::Open, None).await;
        self.history.begin(Instant::now());

        for request in [ClientMessage::HistoryRequest, ClientMessage::OnlineUsersRequest] {
            if let Err(error) = self.send(&request).await {
                tracing::warn!("initial relay request failed: {error}");
                return;
            }
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!("dropping malformed relay message: {error}");
                return;
            }
        };

        match message {
            ServerMessage::NewCheckin(check_in) => {
                self.history.record(Instant::now());
                self.emit(ClientEvent::CheckInReceived { check_in }).await;
            }
            ServerMessage::OnlineUsers { count } => {
                self.emit(ClientEvent::OnlineCountChanged { count }).await;
            }
            ServerMessage::HistoryEnd { count } => {
                if let Some(received) = self.history.finish() {
                    tracing::debug!(received, announced = count, "initial history complete");
                    self.emit(ClientEvent::HistoryReady { received }).await;
                }
            }
            ServerMessage::Error { message } => {
                tracing::warn!("relay notice: {message}");
                self.emit(ClientEvent::RelayNotice { message }).await;
            }
        }
    }

    async fn on_closed(&mut self, code: Option<u16>, reason: String) {
        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.history.reset();

        if code == Some(AUTH_FAILURE_CLOSE_CODE) {
            tracing::warn!("relay rejected credentials: {reason}");
            self.reconnect_suspended = true;
            self.emit(ClientEvent::AuthenticationFailed {
                reason: reason.clone(),
            })
            .await;
            self.set_state(ConnectionState::Disconnected, Some(reason))
                .await;
            return;
        }

        tracing::warn!(code = ?code, "relay connection closed: {reason}");
        self.set_state(ConnectionState::Disconnected, Some(reason))
            .await;
        self.schedule_auto_reconnect();
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if let Err(error) = sink.send(Message::Text(message.to_json().into())).await {
            let error = TransportError::Send(error.to_string());
            self.on_closed(None, error.to_string()).await;
            return Err(error);
        }
        Ok(())
    }

    fn schedule_auto_reconnect(&mut self) {
        if !self.options.auto_reconnect || self.reconnect_suspended {
            return;
        }
        self.attempt += 1;
        let delay = self.backoff.next_delay();
        tracing::info!(
            attempt = self.attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling relay reconnect"
        );
        self.schedule(self.attempt, delay);
    }

    fn schedule(&self, attempt: u64, delay: Duration) {
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ReconnectDue { attempt }).await;
        });
    }

    /// Deterministic teardown of whatever is in flight. Leaves the state at
    /// `Disconnected` without announcing it.
    async fn teardown(&mut self) {
        // Reports from the torn-down connection are now stale.
        self.generation += 1;
        self.history.reset();

        if let Some(connector) = self.connector.take() {
            connector.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            self.set_state(ConnectionState::Closing, None).await;
            if let Err(error) = sink.close().await {
                tracing::debug!("relay close handshake failed: {error}");
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = ConnectionState::Disconnected;
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    async fn set_state(&mut self, state: ConnectionState, detail: Option<String>) {
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(ClientEvent::connection(state, detail)).await;
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("client event receiver dropped");
        }
    }
}

async fn open_socket(
    url: &Url,
    token: Option<&str>,
    connect_timeout: Duration,
) -> Result<WsStream, TransportError> {
    let connection_error = |message: String| TransportError::Connection {
        url: url.to_string(),
        message,
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| connection_error(e.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| connection_error(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    match tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(WsError::Http(response)))
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            Err(TransportError::Unauthorized {
                url: url.to_string(),
                status: response.status().as_u16(),
            })
        }
        Ok(Err(error)) => Err(connection_error(error.to_string())),
        Err(_) => Err(TransportError::ConnectTimeout {
            url: url.to_string(),
            timeout_ms: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    generation: u64,
    internal: mpsc::Sender<Internal>,
) {
    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = Internal::Frame {
                    generation,
                    text: text.as_str().to_owned(),
                };
                if internal.send(frame).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => {
                    if internal
                        .send(Internal::Frame { generation, text })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(_) => tracing::warn!("dropping non-UTF-8 relay frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame.map_or((None, "closed by relay".to_string()), |frame| {
                    (Some(u16::from(frame.code)), frame.reason.as_str().to_owned())
                });
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => break (None, error.to_string()),
            None => break (None, "connection closed".to_string()),
        }
    };

    let _ = internal
        .send(Internal::Closed {
            generation,
            code,
            reason,
        })
        .await;
}

async fn wait_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    } else {
        futures_util::future::pending::<()>().await;
    }
}
