//! WebSocket transport abstraction
//!
//! The connection worker only sees [`WsFrame`]s flowing through a boxed sink
//! and stream. [`TungsteniteTransport`] provides them over a real socket;
//! tests plug in the in-memory transport from `crate::mock`.

use crate::error::{LoxoneError, Result};
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;
use url::Url;

/// One WebSocket message as seen by the protocol layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseInfo>),
}

/// Close status sent or received with a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Normal closure status code
pub const CLOSE_NORMAL: u16 = 1000;

/// Writing half of an open session
pub type FrameSink = Pin<Box<dyn Sink<WsFrame, Error = LoxoneError> + Send>>;

/// Reading half of an open session
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WsFrame>> + Send>>;

/// Opens WebSocket sessions
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session to `endpoint` negotiating `protocol`
    ///
    /// Returning `Ok` means the WebSocket handshake completed.
    async fn open(&self, endpoint: &Url, protocol: &str) -> Result<(FrameSink, FrameStream)>;
}

#[cfg(feature = "websocket")]
pub use tungstenite_transport::TungsteniteTransport;

#[cfg(feature = "websocket")]
mod tungstenite_transport {
    use super::*;
    use futures_util::{future, SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
        Message,
    };
    use tokio_tungstenite::connect_async_with_config;
    use tracing::debug;

    /// Transport over `tokio-tungstenite`
    #[derive(Debug, Clone)]
    pub struct TungsteniteTransport {
        max_message_size: usize,
    }

    impl TungsteniteTransport {
        /// Create a transport rejecting messages above `max_message_size` bytes
        pub fn new(max_message_size: usize) -> Self {
            Self { max_message_size }
        }
    }

    fn to_message(frame: WsFrame) -> Message {
        match frame {
            WsFrame::Text(text) => Message::Text(text),
            WsFrame::Binary(data) => Message::Binary(data),
            WsFrame::Ping(data) => Message::Ping(data),
            WsFrame::Pong(data) => Message::Pong(data),
            WsFrame::Close(info) => Message::Close(info.map(|info| CloseFrame {
                code: CloseCode::from(info.code),
                reason: info.reason.into(),
            })),
        }
    }

    fn from_message(message: Message) -> Option<WsFrame> {
        match message {
            Message::Text(text) => Some(WsFrame::Text(text)),
            Message::Binary(data) => Some(WsFrame::Binary(data)),
            Message::Ping(data) => Some(WsFrame::Ping(data)),
            Message::Pong(data) => Some(WsFrame::Pong(data)),
            Message::Close(frame) => Some(WsFrame::Close(frame.map(|frame| CloseInfo {
                code: u16::from(frame.code),
                reason: frame.reason.into_owned(),
            }))),
            // Raw frames are only produced when writing
            Message::Frame(_) => None,
        }
    }

    fn ws_error(e: tungstenite::Error) -> LoxoneError {
        LoxoneError::websocket(e.to_string())
    }

    #[async_trait]
    impl Transport for TungsteniteTransport {
        async fn open(&self, endpoint: &Url, protocol: &str) -> Result<(FrameSink, FrameStream)> {
            let mut request = endpoint
                .as_str()
                .into_client_request()
                .map_err(|e| LoxoneError::config(format!("Invalid WebSocket URL: {e}")))?;
            let protocol = HeaderValue::from_str(protocol)
                .map_err(|e| LoxoneError::config(format!("Invalid sub-protocol: {e}")))?;
            request
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, protocol);

            let config = WebSocketConfig {
                max_message_size: Some(self.max_message_size),
                ..Default::default()
            };

            let (stream, response) = connect_async_with_config(request, Some(config), false)
                .await
                .map_err(|e| LoxoneError::connection(format!("WebSocket connection failed: {e}")))?;
            debug!("WebSocket connected, response: {:?}", response.status());

            let (sink, stream) = stream.split();
            let sink = sink
                .with(|frame: WsFrame| future::ready(Ok::<_, tungstenite::Error>(to_message(frame))))
                .sink_map_err(ws_error);
            let stream = stream.filter_map(|message| {
                future::ready(match message {
                    Ok(message) => from_message(message).map(Ok),
                    Err(e) => Some(Err(ws_error(e))),
                })
            });

            Ok((Box::pin(sink), Box::pin(stream)))
        }
    }

}
