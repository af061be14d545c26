//! In-memory transport for exercising the client without a Miniserver
//!
//! [`MockTransport`] hands every opened session to the test as a
//! [`MockServer`], which sees the frames the client writes and injects the
//! frames the client reads.

use crate::client::command::STATUS_OK;
use crate::client::frame::{encode_value_states, FrameHeader, MessageType, ValueState};
use crate::client::transport::{CloseInfo, FrameSink, FrameStream, Transport, WsFrame};
use crate::error::{LoxoneError, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, Mutex};
use url::Url;

const MOCK_WAIT: Duration = Duration::from_secs(5);

/// Transport whose sessions are driven by the test
pub struct MockTransport {
    opens: AtomicUsize,
    fail_next: StdMutex<Option<String>>,
    hang_next: AtomicBool,
    last_endpoint: StdMutex<Option<(Url, String)>>,
    servers_tx: tokio_mpsc::UnboundedSender<MockServer>,
    servers_rx: Mutex<tokio_mpsc::UnboundedReceiver<MockServer>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = tokio_mpsc::unbounded_channel();
        Self {
            opens: AtomicUsize::new(0),
            fail_next: StdMutex::new(None),
            hang_next: AtomicBool::new(false),
            last_endpoint: StdMutex::new(None),
            servers_tx,
            servers_rx: Mutex::new(servers_rx),
        }
    }

    /// Number of `open` calls so far, failed ones included
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `open` fail with a connection error
    pub fn fail_next_open(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Make the next `open` never complete
    pub fn hang_next_open(&self) {
        self.hang_next.store(true, Ordering::SeqCst);
    }

    /// Endpoint and sub-protocol of the last `open`
    pub fn last_endpoint(&self) -> Option<(Url, String)> {
        self.last_endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait for the client to open a session
    pub async fn accept(&self) -> MockServer {
        let mut servers = self.servers_rx.lock().await;
        tokio::time::timeout(MOCK_WAIT, servers.recv())
            .await
            .expect("client did not open a session")
            .expect("transport dropped")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &Url, protocol: &str) -> Result<(FrameSink, FrameStream)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_endpoint.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((endpoint.clone(), protocol.to_string()));

        if self.hang_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failure = self
            .fail_next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(message) = failure {
            return Err(LoxoneError::connection(message));
        }

        let (client_tx, server_rx) = mpsc::unbounded::<WsFrame>();
        let (server_tx, client_rx) = mpsc::unbounded::<Result<WsFrame>>();
        let sink: FrameSink =
            Box::pin(client_tx.sink_map_err(|e| LoxoneError::websocket(e.to_string())));
        let stream: FrameStream = Box::pin(client_rx);

        let server = MockServer {
            outgoing: server_rx,
            incoming: server_tx,
        };
        self.servers_tx
            .send(server)
            .map_err(|_| LoxoneError::internal("mock transport dropped"))?;
        Ok((sink, stream))
    }
}

/// Server side of one mock session
pub struct MockServer {
    outgoing: mpsc::UnboundedReceiver<WsFrame>,
    incoming: mpsc::UnboundedSender<Result<WsFrame>>,
}

impl MockServer {
    /// Next frame written by the client; `None` once the client dropped the session
    pub async fn next_frame(&mut self) -> Option<WsFrame> {
        self.outgoing.next().await
    }

    /// Next frame, failing the test if none arrives in time
    pub async fn expect_frame(&mut self) -> WsFrame {
        tokio::time::timeout(MOCK_WAIT, self.outgoing.next())
            .await
            .expect("client sent nothing")
            .expect("client closed the session")
    }

    pub async fn expect_text(&mut self) -> String {
        match self.expect_frame().await {
            WsFrame::Text(text) => text,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    pub async fn expect_close(&mut self) -> Option<CloseInfo> {
        match self.expect_frame().await {
            WsFrame::Close(info) => info,
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    /// Wait for the client's close frame and confirm it
    pub async fn confirm_close(&mut self) -> Option<CloseInfo> {
        let info = self.expect_close().await;
        self.send_frame(WsFrame::Close(info.clone()));
        info
    }

    pub fn send_frame(&self, frame: WsFrame) {
        let _ = self.incoming.unbounded_send(Ok(frame));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send_frame(WsFrame::Text(text.into()));
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.send_frame(WsFrame::Binary(data.into()));
    }

    /// Send an `LL` response envelope
    pub fn send_response(&self, control: &str, code: u16, value: serde_json::Value) {
        let body = serde_json::json!({
            "LL": { "control": control, "value": value, "Code": code.to_string() }
        });
        self.send_text(body.to_string());
    }

    pub fn send_ok(&self, control: &str, value: serde_json::Value) {
        self.send_response(control, STATUS_OK, value);
    }

    /// Send a value table as header frame plus payload frame
    pub fn send_value_states(&self, states: &[ValueState]) {
        let payload = encode_value_states(states);
        let header = FrameHeader::new(MessageType::ValueStates, payload.len() as u32);
        self.send_binary(header.encode().to_vec());
        self.send_binary(payload);
    }

    pub fn send_close(&self, code: u16) {
        self.send_frame(WsFrame::Close(Some(CloseInfo::new(code, ""))));
    }

    /// Fail the client's read side with a transport error
    pub fn send_error(&self, message: &str) {
        let _ = self
            .incoming
            .unbounded_send(Err(LoxoneError::websocket(message.to_string())));
    }

    /// Stop accepting client frames so further client writes fail
    pub fn stop_reading(&mut self) {
        self.outgoing.close();
    }

    /// Drop the connection without a close frame
    pub fn hang_up(self) {}
}
