//! WebSocket client for the Loxone Miniserver
//!
//! One worker task per client owns the connection: it opens the transport,
//! runs the key/authenticate/structure handshake, decodes the binary status
//! stream and maps close codes to offline reasons. Callers steer it through
//! a control channel and watch its [`ConnectionState`].

use crate::client::command::{
    action_command, PendingResponses, SessionWriter, CMD_AUTHENTICATE, CMD_ENABLE_STATUS_UPDATES,
    CMD_GET_KEY, CMD_GET_STRUCTURE, CMD_KEEPALIVE, STATUS_AUTH_TIMEOUT, STATUS_OK,
    STATUS_UNAUTHORIZED,
};
use crate::client::events::{EventDispatcher, LoxoneEvent, OfflineReason, StateValue};
use crate::client::frame::{DecodedFrame, FrameDecoder};
use crate::client::identifier::LoxoneUuid;
use crate::client::transport::{
    CloseInfo, FrameSink, FrameStream, Transport, WsFrame, CLOSE_NORMAL,
};
use crate::client::{LoxoneResponse, LoxoneStructure};
use crate::config::{credentials::LoxoneCredentials, LoxoneConfig, WEBSOCKET_PROTOCOL};
use crate::error::{LoxoneError, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Connection lifecycle as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Authenticating,
    FetchingConfig,
    Running,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::FetchingConfig => "fetching_config",
            ConnectionState::Running => "running",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Control {
    Connect,
    Disconnect,
}

/// Handle to a Miniserver connection
///
/// `connect` and `disconnect` only enqueue a request; progress is reported
/// through the event queue and [`state_watch`](Self::state_watch). Dropping
/// the handle closes the connection and stops the worker.
pub struct LoxoneWebSocketClient {
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    writer: SessionWriter,
    pending: Arc<PendingResponses>,
    response_timeout: std::time::Duration,
}

impl fmt::Debug for LoxoneWebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxoneWebSocketClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LoxoneWebSocketClient {
    /// Create a client and spawn its worker on `runtime`
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called.
    pub fn new(
        config: LoxoneConfig,
        credentials: LoxoneCredentials,
        transport: Arc<dyn Transport>,
        events: EventDispatcher,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = config.websocket_url()?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (keepalive_tx, keepalive_rx) = mpsc::unbounded_channel();
        let writer = SessionWriter::new();
        let pending = Arc::new(PendingResponses::new());
        let response_timeout = config.websocket.response_timeout;

        let worker = ConnectionWorker {
            config,
            endpoint,
            credentials,
            transport,
            events,
            writer: writer.clone(),
            pending: pending.clone(),
            runtime: runtime.clone(),
            state_tx,
            state: ConnectionState::Idle,
            decoder: FrameDecoder::new(),
            opening: None,
            stream: None,
            keepalive: None,
            session: 0,
            keepalive_tx,
            close_deadline: None,
        };
        runtime.spawn(worker.run(control_rx, keepalive_rx));

        Ok(Self {
            control_tx,
            state_rx,
            writer,
            pending,
            response_timeout,
        })
    }

    /// Start connecting
    ///
    /// If a connection is active it is closed instead; a second transport is
    /// never opened.
    pub fn connect(&self) -> Result<()> {
        self.control_tx
            .send(Control::Connect)
            .map_err(|_| LoxoneError::internal("Connection worker has stopped"))
    }

    /// Close the connection, if any
    pub fn disconnect(&self) {
        if self.control_tx.send(Control::Disconnect).is_err() {
            debug!("disconnect() after worker stopped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver following every state transition
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Send `jdev/sps/io/<uuid>/<operation>` without waiting for the answer
    pub async fn send_action(&self, uuid: &LoxoneUuid, operation: &str) -> Result<()> {
        let command = action_command(uuid, operation)?;
        debug!(%uuid, operation, "sending action");
        self.writer.send_text(&command).await
    }

    /// Send an action and wait for the Miniserver's `LL` response
    pub async fn send_action_and_wait(
        &self,
        uuid: &LoxoneUuid,
        operation: &str,
    ) -> Result<LoxoneResponse> {
        let command = action_command(uuid, operation)?;
        let response = self.pending.register(&command);
        if let Err(e) = self.writer.send_text(&command).await {
            drop(response);
            self.pending.cancel(&command);
            return Err(e);
        }

        match timeout(self.response_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LoxoneError::connection("Session closed before response")),
            Err(_) => {
                self.pending.cancel(&command);
                Err(LoxoneError::timeout(format!(
                    "No response to {command} within {:?}",
                    self.response_timeout
                )))
            }
        }
    }
}

struct ConnectionWorker {
    config: LoxoneConfig,
    endpoint: Url,
    credentials: LoxoneCredentials,
    transport: Arc<dyn Transport>,
    events: EventDispatcher,
    writer: SessionWriter,
    pending: Arc<PendingResponses>,
    runtime: Handle,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    decoder: FrameDecoder,
    /// Transport open in flight while Connecting
    opening: Option<OpenFuture>,
    stream: Option<FrameStream>,
    keepalive: Option<CancellationToken>,
    /// Incremented per opened session, tags keep-alive failures
    session: u64,
    keepalive_tx: mpsc::UnboundedSender<(u64, String)>,
    close_deadline: Option<Instant>,
}

type OpenFuture = Pin<Box<dyn Future<Output = Result<(FrameSink, FrameStream)>> + Send>>;

async fn opened(opening: &mut Option<OpenFuture>) -> Result<(FrameSink, FrameStream)> {
    match opening {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<WsFrame>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl ConnectionWorker {
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut keepalive_rx: mpsc::UnboundedReceiver<(u64, String)>,
    ) {
        loop {
            let deadline = self.close_deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Connect) => self.handle_connect().await,
                    Some(Control::Disconnect) => self.handle_disconnect().await,
                    None => break,
                },
                result = opened(&mut self.opening), if self.opening.is_some() => {
                    self.opening = None;
                    self.on_opened(result).await;
                }
                frame = next_frame(&mut self.stream), if self.stream.is_some() => {
                    self.handle_frame(frame).await;
                }
                Some((session, detail)) = keepalive_rx.recv() => {
                    if session == self.session && self.state == ConnectionState::Running {
                        self.fail(OfflineReason::CommunicationError, detail).await;
                    }
                }
                _ = sleep_until(deadline), if self.close_deadline.is_some() => {
                    warn!("Server did not confirm close within {:?}", self.config.websocket.close_timeout);
                    self.finish_close().await;
                }
            }
        }

        debug!("Client handle dropped, stopping connection worker");
        if self.state != ConnectionState::Idle {
            self.stop_keepalive();
            let _ = self
                .writer
                .send_frame(WsFrame::Close(Some(CloseInfo::new(CLOSE_NORMAL, "Client dropped"))))
                .await;
            self.finish_close().await;
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    async fn handle_connect(&mut self) {
        if self.state != ConnectionState::Idle {
            info!(state = %self.state, "connect() on active connection, closing it");
            self.events.publish(LoxoneEvent::ClientClosing).await;
            let reason = format!("connect() requested while {}", self.state);
            self.close(&reason).await;
            return;
        }

        self.decoder.reset();
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", self.endpoint);

        let transport = self.transport.clone();
        let endpoint = self.endpoint.clone();
        let limit = self.config.connect_timeout;
        self.opening = Some(Box::pin(async move {
            match timeout(limit, transport.open(&endpoint, WEBSOCKET_PROTOCOL)).await {
                Ok(opened) => opened,
                Err(_) => Err(LoxoneError::timeout(format!(
                    "Connect timed out after {limit:?}"
                ))),
            }
        }));
    }

    async fn on_opened(&mut self, opened: Result<(FrameSink, FrameStream)>) {
        let (sink, stream) = match opened {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.endpoint, e);
                self.set_state(ConnectionState::Idle);
                self.events
                    .offline(OfflineReason::CommunicationError, e.to_string())
                    .await;
                return;
            }
        };

        self.session += 1;
        self.writer.attach(sink).await;
        self.stream = Some(stream);
        self.set_state(ConnectionState::Connected);

        self.send_or_fail(CMD_GET_KEY).await;
    }

    async fn handle_disconnect(&mut self) {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closing => {
                debug!(state = %self.state, "disconnect() ignored");
            }
            _ => {
                info!("Disconnecting from {}", self.endpoint);
                self.events.publish(LoxoneEvent::ClientClosing).await;
                self.close("Client disconnect").await;
            }
        }
    }

    /// Send a handshake command; a failed write takes the connection down
    async fn send_or_fail(&mut self, command: &str) -> bool {
        match self.writer.send_text(command).await {
            Ok(()) => true,
            Err(e) => {
                self.fail(
                    OfflineReason::CommunicationError,
                    format!("Failed to send {command}: {e}"),
                )
                .await;
                false
            }
        }
    }

    /// Report the connection offline and close it
    async fn fail(&mut self, reason: OfflineReason, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(%reason, "Connection failed: {}", detail);
        self.events.offline(reason, detail.clone()).await;
        self.close(&detail).await;
    }

    /// Start the close handshake
    async fn close(&mut self, reason: &str) {
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Closing) {
            return;
        }
        self.stop_keepalive();
        self.set_state(ConnectionState::Closing);
        self.pending.fail_all(reason);

        if self.stream.is_none() {
            self.finish_close().await;
            return;
        }

        let frame = WsFrame::Close(Some(CloseInfo::new(CLOSE_NORMAL, reason)));
        if let Err(e) = self.writer.send_frame(frame).await {
            debug!("Could not send close frame: {}", e);
            self.finish_close().await;
            return;
        }
        self.close_deadline = Some(Instant::now() + self.config.websocket.close_timeout);
    }

    /// Drop the session and go idle
    async fn finish_close(&mut self) {
        self.stop_keepalive();
        self.opening = None;
        if let Some(mut sink) = self.writer.detach().await {
            use futures::SinkExt;
            if let Err(e) = sink.close().await {
                trace!("Closing sink: {}", e);
            }
        }
        self.stream = None;
        self.close_deadline = None;
        self.decoder.reset();
        self.pending.fail_all("Connection closed");
        self.set_state(ConnectionState::Idle);
        info!("Connection to {} closed", self.endpoint);
    }

    fn start_keepalive(&mut self) {
        self.stop_keepalive();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let writer = self.writer.clone();
        let failures = self.keepalive_tx.clone();
        let session = self.session;
        let period = self.config.websocket.keepalive_interval;

        self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        trace!("sending keep-alive");
                        if let Err(e) = writer.send_text(CMD_KEEPALIVE).await {
                            let _ = failures.send((session, format!("Keep-alive failed: {e}")));
                            break;
                        }
                    }
                }
            }
            trace!("keep-alive task stopped");
        });
        self.keepalive = Some(token);
    }

    fn stop_keepalive(&mut self) {
        if let Some(token) = self.keepalive.take() {
            token.cancel();
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<WsFrame>>) {
        match frame {
            None => {
                if self.state != ConnectionState::Closing {
                    self.events
                        .offline(
                            OfflineReason::CommunicationError,
                            "Connection closed without close frame",
                        )
                        .await;
                }
                self.finish_close().await;
            }
            Some(Err(e)) => {
                if self.state != ConnectionState::Closing {
                    warn!("WebSocket error: {}", e);
                    self.events
                        .offline(OfflineReason::CommunicationError, e.to_string())
                        .await;
                }
                self.finish_close().await;
            }
            Some(Ok(WsFrame::Close(info))) => self.handle_close(info).await,
            Some(Ok(WsFrame::Text(text))) => self.handle_text(text).await,
            Some(Ok(WsFrame::Binary(data))) => self.handle_binary(data).await,
            Some(Ok(WsFrame::Ping(_))) | Some(Ok(WsFrame::Pong(_))) => trace!("ping/pong"),
        }
    }

    async fn handle_close(&mut self, info: Option<CloseInfo>) {
        if self.state == ConnectionState::Closing {
            debug!("Close confirmed by server");
            self.finish_close().await;
            return;
        }

        let reason = OfflineReason::from_close_code(info.as_ref().map(|info| info.code));
        let detail = match &info {
            Some(info) => format!("Server closed connection: {} {}", info.code, info.reason),
            None => "Server closed connection".to_string(),
        };
        info!(%reason, "{}", detail);
        self.events.offline(reason, detail).await;

        let _ = self.writer.send_frame(WsFrame::Close(info)).await;
        self.finish_close().await;
    }

    async fn handle_text(&mut self, text: String) {
        self.decoder.on_text();
        if self.state == ConnectionState::Closing {
            return;
        }
        if text.len() > self.config.websocket.max_text_message_bytes() {
            warn!("Discarding {} byte text message above limit", text.len());
            return;
        }
        trace!("<- {}", text);

        match self.state {
            ConnectionState::Connected => match LoxoneResponse::parse(&text) {
                Ok(response) => self.on_key_response(response).await,
                Err(e) => self.fail(OfflineReason::InternalError, e.to_string()).await,
            },
            ConnectionState::Authenticating => match LoxoneResponse::parse(&text) {
                Ok(response) => self.on_auth_response(response).await,
                Err(e) => self.fail(OfflineReason::InternalError, e.to_string()).await,
            },
            ConnectionState::FetchingConfig => match LoxoneStructure::parse(&text) {
                Ok(structure) => self.on_structure(structure).await,
                Err(e) => self.fail(OfflineReason::InternalError, e.to_string()).await,
            },
            ConnectionState::Running => match LoxoneResponse::parse(&text) {
                Ok(response) => {
                    if !self.pending.resolve(&response) && !response.is_ok() {
                        debug!(control = %response.control, code = response.code, "command failed");
                    }
                }
                Err(e) => debug!("Ignoring text message: {}", e),
            },
            state => debug!(%state, "Ignoring text message"),
        }
    }

    fn status_reason(code: u16) -> OfflineReason {
        match code {
            STATUS_UNAUTHORIZED => OfflineReason::Unauthorized,
            STATUS_AUTH_TIMEOUT => OfflineReason::AuthenticationTimeout,
            _ => OfflineReason::CommunicationError,
        }
    }

    async fn on_key_response(&mut self, response: LoxoneResponse) {
        if response.code != STATUS_OK {
            let reason = Self::status_reason(response.code);
            self.fail(reason, format!("Key request refused with {}", response.code))
                .await;
            return;
        }

        let hash = match self.credentials.sign(&response.value_str()) {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(OfflineReason::InternalError, e.to_string()).await;
                return;
            }
        };
        self.set_state(ConnectionState::Authenticating);
        self.send_or_fail(&format!("{CMD_AUTHENTICATE}{hash}")).await;
    }

    async fn on_auth_response(&mut self, response: LoxoneResponse) {
        if response.code != STATUS_OK {
            let reason = Self::status_reason(response.code);
            self.fail(reason, format!("Authentication refused with {}", response.code))
                .await;
            return;
        }

        info!(user = %self.credentials.username, "Authenticated");
        self.set_state(ConnectionState::FetchingConfig);
        self.send_or_fail(CMD_GET_STRUCTURE).await;
    }

    async fn on_structure(&mut self, structure: LoxoneStructure) {
        info!(
            controls = structure.controls.len(),
            rooms = structure.rooms.len(),
            "Structure file received"
        );
        self.events
            .publish(LoxoneEvent::ConfigurationReceived(Box::new(structure)))
            .await;

        if !self.send_or_fail(CMD_ENABLE_STATUS_UPDATES).await {
            return;
        }
        self.set_state(ConnectionState::Running);
        self.start_keepalive();
        self.events.publish(LoxoneEvent::ServerOnline).await;
    }

    async fn handle_binary(&mut self, data: Vec<u8>) {
        if self.state == ConnectionState::Closing {
            return;
        }
        if data.len() > self.config.websocket.max_binary_message_bytes() {
            warn!("Discarding {} byte binary message above limit", data.len());
            self.decoder.reset();
            return;
        }

        match self.decoder.on_binary(&data) {
            Ok(DecodedFrame::ValueStates(states)) => {
                trace!("{} value states", states.len());
                for state in states {
                    self.events
                        .state_update(state.uuid, StateValue::Number(state.value))
                        .await;
                }
            }
            Ok(DecodedFrame::TextStates(states)) => {
                trace!("{} text states", states.len());
                for state in states {
                    self.events
                        .state_update(state.uuid, StateValue::Text(state.text))
                        .await;
                }
            }
            Ok(DecodedFrame::KeepAlive) => trace!("keep-alive answered"),
            Ok(DecodedFrame::OutOfService) => warn!("Miniserver is going out of service"),
            Ok(DecodedFrame::Skipped { msg_type, len }) => {
                debug!(?msg_type, len, "Skipped payload")
            }
            Ok(other) => trace!(?other, "binary header"),
            Err(e) => debug!("Discarding binary message: {}", e),
        }
    }
}
