//! Text commands and the shared session writer

use crate::client::identifier::LoxoneUuid;
use crate::client::transport::{FrameSink, WsFrame};
use crate::client::LoxoneResponse;
use crate::error::{LoxoneError, Result};
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace};

pub const CMD_GET_KEY: &str = "jdev/sys/getkey";
pub const CMD_AUTHENTICATE: &str = "authenticate/";
pub const CMD_KEEPALIVE: &str = "keepalive";
pub const CMD_GET_STRUCTURE: &str = "data/LoxAPP3.json";
pub const CMD_ENABLE_STATUS_UPDATES: &str = "jdev/sps/enablebinstatusupdate";
pub const CMD_IO_PREFIX: &str = "jdev/sps/io/";

pub const STATUS_OK: u16 = 200;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_AUTH_TIMEOUT: u16 = 420;

/// Build the command operating a control
pub fn action_command(uuid: &LoxoneUuid, operation: &str) -> Result<String> {
    if operation.is_empty() {
        return Err(LoxoneError::invalid_input("Operation must not be empty"));
    }
    Ok(format!("{CMD_IO_PREFIX}{uuid}/{operation}"))
}

/// Normalize a command path for matching against the echoed `control`
///
/// The Miniserver echoes `jdev/...` commands as `dev/...`.
pub fn command_key(path: &str) -> String {
    let path = path.trim_start_matches('/');
    path.strip_prefix('j').unwrap_or(path).to_string()
}

/// Write half of the open session, shared by all writers
#[derive(Clone, Default)]
pub struct SessionWriter {
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter").finish_non_exhaustive()
    }
}

impl SessionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, sink: FrameSink) {
        *self.sink.lock().await = Some(sink);
    }

    /// Drop the sink; later writes fail until the next attach
    pub async fn detach(&self) -> Option<FrameSink> {
        self.sink.lock().await.take()
    }

    pub async fn is_open(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        trace!("-> {}", text);
        self.send_frame(WsFrame::Text(text.to_string())).await
    }

    pub async fn send_frame(&self, frame: WsFrame) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| LoxoneError::connection("No open session"))?;
        sink.send(frame).await
    }
}

/// Commands awaiting their `LL` response
#[derive(Debug, Default)]
pub struct PendingResponses {
    waiting: StdMutex<HashMap<String, Vec<oneshot::Sender<Result<LoxoneResponse>>>>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the response to `command`
    pub fn register(&self, command: &str) -> oneshot::Receiver<Result<LoxoneResponse>> {
        let (tx, rx) = oneshot::channel();
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        waiting.entry(command_key(command)).or_default().push(tx);
        rx
    }

    /// Hand a response to the oldest waiter for its command
    ///
    /// Returns `false` if nobody was waiting.
    pub fn resolve(&self, response: &LoxoneResponse) -> bool {
        let key = command_key(&response.control);
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        let Some(queue) = waiting.get_mut(&key) else {
            return false;
        };
        let sender = queue.remove(0);
        if queue.is_empty() {
            waiting.remove(&key);
        }
        if sender.send(Ok(response.clone())).is_err() {
            debug!("Waiter for {} is gone", key);
        }
        true
    }

    /// Drop a registration whose command could not be sent
    pub fn cancel(&self, command: &str) {
        let key = command_key(command);
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = waiting.get_mut(&key) {
            queue.retain(|tx| !tx.is_closed());
            if queue.is_empty() {
                waiting.remove(&key);
            }
        }
    }

    /// Fail every waiter with a connection error
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
            waiting.drain().flat_map(|(_, queue)| queue).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(LoxoneError::connection(reason.to_string())));
        }
    }

    pub fn len(&self) -> usize {
        let waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
