//! Single-connection channel to the signing bridge
//!
//! Frames carry no request identifier, so a channel allows exactly one
//! outstanding exchange. Callers open a channel per logical operation and
//! close it when done, success or not.

pub mod message;
pub mod ws;

pub use message::{Command, DeviceRequest, DeviceResponse, STATUS_OK};
pub use ws::WsConnector;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Message-oriented connection carrying text frames
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    async fn send(&mut self, frame: String) -> Result<()>;
    /// Wait for the next inbound frame
    async fn recv(&mut self) -> Result<String>;
    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Factory for fresh bridge connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// An open connection that serves one exchange at a time.
pub struct Channel {
    transport: Mutex<Box<dyn Transport>>,
    closed: AtomicBool,
}

impl Channel {
    /// Wrap an already-open transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect through `connector`. Any failure becomes [`Error::Connect`].
    pub async fn open(connector: &dyn Connector) -> Result<Self> {
        match connector.connect().await {
            Ok(transport) => Ok(Self::new(transport)),
            Err(err) => {
                debug!(error = %err, "bridge connection failed");
                Err(Error::Connect)
            }
        }
    }

    /// Send `request` and resolve with the next inbound frame.
    ///
    /// Fails with [`Error::ExchangeInProgress`] if another exchange holds the channel.
    pub async fn exchange(&self, request: &DeviceRequest) -> Result<DeviceResponse> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let mut transport = self
            .transport
            .try_lock()
            .map_err(|_| Error::ExchangeInProgress)?;

        let frame = serde_json::to_string(request)?;
        debug!(cmd = ?request.cmd, "-> bridge");
        transport.send(frame).await?;

        let reply = transport.recv().await?;
        debug!(cmd = ?request.cmd, bytes = reply.len(), "<- bridge");
        DeviceResponse::from_frame(&reply)
    }

    /// Close the underlying transport. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut transport = self.transport.lock().await;
        if let Err(err) = transport.close().await {
            debug!(error = %err, "error while closing bridge channel");
        }
    }

    /// True once [`Channel::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
