//! Error types for ATLINK operations

use std::time::Duration;
use thiserror::Error;

/// Result type alias using ATLINK's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Instruction surfaced whenever the bridge cannot be reached.
pub const CONNECT_INSTRUCTION: &str = "Please login your AT.Wallet Card via AT.Wallet App.";

/// Main error type for ATLINK operations
#[derive(Error, Debug)]
pub enum Error {
    /// HD path string does not have the expected shape
    #[error("Malformed HD path: {0}")]
    MalformedPath(String),

    /// Bridge unreachable; always carries the fixed user instruction
    #[error("{}", CONNECT_INSTRUCTION)]
    Connect,

    /// Device rejected the command
    #[error("{text}")]
    DeviceStatus {
        /// HTTP-style status code returned by the bridge
        code: u16,
        /// Decoded status text
        text: String,
    },

    /// Response is missing fields the command requires
    #[error("Unknown error: {0}")]
    UnknownResponse(String),

    /// Device returned a signature that does not verify
    #[error("The transaction signature is not valid")]
    SignatureVerification,

    /// Capability the device firmware does not provide
    #[error("Not supported on this device: {0}")]
    Unsupported(&'static str),

    /// Address is not tracked by the keyring
    #[error("Address {0} not found in this keyring")]
    AccountNotFound(String),

    /// A second exchange was attempted while one is outstanding
    #[error("Another exchange is already in progress on this channel")]
    ExchangeInProgress,

    /// Channel has been closed by either side
    #[error("Bridge channel closed")]
    ChannelClosed,

    /// Transport-level failure on an open channel
    #[error("Bridge transport error: {0}")]
    Transport(String),

    /// Exchange did not complete in time
    #[error("Bridge exchange timed out after {0:?}")]
    Timeout(Duration),

    /// Key material could not be parsed or derived
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Address string could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Transaction fields could not be encoded or decoded
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Usage-history lookup failed
    #[error("Usage history lookup failed: {0}")]
    History(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a device status error, decoding the code into its reason phrase.
    pub fn device_status(code: u16) -> Self {
        let text = reqwest::StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown status")
            .to_string();
        Error::DeviceStatus { code, text }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Other(format!("Hex decode error: {}", e))
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Error::InvalidKey(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::History(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::ChannelClosed,
            other => Error::Transport(other.to_string()),
        }
    }
}
