//! Events published by the WebSocket client
//!
//! The connection worker turns protocol progress into a small closed set of
//! [`LoxoneEvent`]s and pushes them, in generation order, onto a bounded
//! queue owned by whoever supervises the connection.

use crate::client::identifier::LoxoneUuid;
use crate::client::LoxoneStructure;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Why the Miniserver connection went offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineReason {
    /// Transport failure or unexpected close
    CommunicationError,
    /// The server closed an idle session (close code 1001)
    IdleTimeout,
    /// The server blocked the user after failed logins (close code 4003)
    TooManyFailedLogins,
    /// Credentials were rejected (status 401)
    Unauthorized,
    /// Authentication took too long (status 420)
    AuthenticationTimeout,
    /// Local failure: unusable key, unparseable configuration
    InternalError,
}

impl OfflineReason {
    /// Map a WebSocket close status code to the reported reason
    pub fn from_close_code(code: Option<u16>) -> Self {
        match code {
            Some(1001) => Self::IdleTimeout,
            Some(4003) => Self::TooManyFailedLogins,
            _ => Self::CommunicationError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommunicationError => "communication-error",
            Self::IdleTimeout => "idle-timeout",
            Self::TooManyFailedLogins => "too-many-failed-logins",
            Self::Unauthorized => "unauthorized",
            Self::AuthenticationTimeout => "authentication-timeout",
            Self::InternalError => "internal-error",
        }
    }
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried by a state update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Number(value) => write!(f, "{value}"),
            StateValue::Text(text) => f.write_str(text),
        }
    }
}

/// State update from the binary status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// State identifier
    pub uuid: LoxoneUuid,

    /// New value
    pub value: StateValue,

    /// Time the update was received
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateUpdate {
    pub fn new(uuid: LoxoneUuid, value: StateValue) -> Self {
        Self {
            uuid,
            value,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Event delivered to the connection supervisor
#[derive(Debug, Clone)]
pub enum LoxoneEvent {
    /// Handshake finished, live updates are enabled
    ServerOnline,
    /// The connection is gone
    ServerOffline {
        reason: OfflineReason,
        detail: String,
    },
    /// The structure file was received and parsed
    ConfigurationReceived(Box<LoxoneStructure>),
    /// A state changed
    StateUpdate(StateUpdate),
    /// The client started closing the connection on request
    ClientClosing,
}

impl LoxoneEvent {
    pub fn offline(reason: OfflineReason, detail: impl Into<String>) -> Self {
        Self::ServerOffline {
            reason,
            detail: detail.into(),
        }
    }
}

/// Publishing side of the event queue
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<LoxoneEvent>,
}

/// Create a bounded event queue
pub fn event_channel(capacity: usize) -> (EventDispatcher, mpsc::Receiver<LoxoneEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventDispatcher { sender }, receiver)
}

impl EventDispatcher {
    /// Push an event, waiting while the queue is full
    ///
    /// Returns `false` when the consumer is gone; the event is dropped and
    /// the connection carries on.
    pub async fn publish(&self, event: LoxoneEvent) -> bool {
        trace!(?event, "publishing event");
        match self.sender.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!("Event consumer gone, dropping {:?}", event);
                false
            }
        }
    }

    pub async fn state_update(&self, uuid: LoxoneUuid, value: StateValue) -> bool {
        self.publish(LoxoneEvent::StateUpdate(StateUpdate::new(uuid, value)))
            .await
    }

    pub async fn offline(&self, reason: OfflineReason, detail: impl Into<String>) -> bool {
        self.publish(LoxoneEvent::offline(reason, detail)).await
    }

    /// Whether the consumer dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
