//! WebSocket transport to the local bridge service

use super::{Connector, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Default bridge endpoint
pub const DEFAULT_BRIDGE_URL: &str = "ws://localhost:8787/bridge";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections to a fixed bridge URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Connector for `url` with a bounded handshake
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE_URL, Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| Error::Timeout(self.connect_timeout))??;
        debug!(url = %self.url, "bridge connection established");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => return Ok(text),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| Error::Transport(format!("non UTF-8 bridge frame: {e}")));
                }
                Message::Close(_) => return Err(Error::ChannelClosed),
                // Control frames are answered by tungstenite itself.
                _ => continue,
            }
        }
        Err(Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(err) => match Error::from(err) {
                Error::ChannelClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}
