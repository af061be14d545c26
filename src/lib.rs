//! Authenticated WebSocket client for the Loxone Miniserver
//!
//! This crate implements the Miniserver's `remotecontrol` WebSocket protocol:
//! key exchange and HMAC authentication, structure file download, the binary
//! status stream and keep-alive handling over one persistent connection.
//!
//! # Features
//!
//! - Single-owner connection worker driven through a non-blocking handle
//! - Typed events pushed in order onto a bounded queue
//! - Binary frame codec for value and text state tables
//! - Injectable transport, with a `tokio-tungstenite` implementation
//! - In-memory mock transport for tests (`test-utils`)
//!
//! # Example
//!
//! ```no_run
//! use loxone_ws_client::{
//!     client::{event_channel, LoxoneEvent, LoxoneWebSocketClient, TungsteniteTransport},
//!     config::{credentials::create_credentials, LoxoneConfig},
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> loxone_ws_client::Result<()> {
//! let config = LoxoneConfig {
//!     host: "192.168.1.77".to_string(),
//!     ..Default::default()
//! };
//! let (events, mut rx) = event_channel(config.websocket.event_queue_capacity);
//! let transport = Arc::new(TungsteniteTransport::new(
//!     config.websocket.max_binary_message_bytes(),
//! ));
//! let client = LoxoneWebSocketClient::new(
//!     config,
//!     create_credentials("admin", "secret"),
//!     transport,
//!     events,
//!     tokio::runtime::Handle::current(),
//! )?;
//!
//! client.connect()?;
//! while let Some(event) = rx.recv().await {
//!     if let LoxoneEvent::StateUpdate(update) = event {
//!         println!("{} = {}", update.uuid, update.value);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use client::{
    ConnectionState, ControlRegistry, LoxoneEvent, LoxoneStructure, LoxoneUuid,
    LoxoneWebSocketClient, OfflineReason,
};
pub use config::{credentials::LoxoneCredentials, ClientConfig, LoxoneConfig};
pub use error::{LoxoneError, Result};
