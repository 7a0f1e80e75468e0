//! JSON frames exchanged with the bridge

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status code signalling success
pub const STATUS_OK: u16 = 200;

/// Commands understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Fetch the extended public key of an account node
    GetExtendedPublicKey,
    /// Register an account node with the card
    AddAccount,
    /// Unregister an account address
    RemoveAccount,
    /// Sign a legacy transaction
    SignTransaction,
}

/// One outbound frame: `{requester, cmd, parameters}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    /// Name of the requesting application
    pub requester: String,
    /// Command name
    pub cmd: Command,
    /// Command-specific payload
    pub parameters: Value,
}

impl DeviceRequest {
    /// Build a request frame
    pub fn new(requester: impl Into<String>, cmd: Command, parameters: Value) -> Self {
        Self {
            requester: requester.into(),
            cmd,
            parameters,
        }
    }
}

/// One inbound frame: `{status, results}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    /// HTTP-style status code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Command-specific result payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

impl DeviceResponse {
    /// Successful response carrying `results`
    pub fn ok(results: Value) -> Self {
        Self {
            status: Some(STATUS_OK),
            results: Some(results),
        }
    }

    /// Response with only a status code
    pub fn status(code: u16) -> Self {
        Self {
            status: Some(code),
            results: None,
        }
    }

    /// Decode a text frame. Anything that is not a response object is a protocol violation.
    pub fn from_frame(frame: &str) -> Result<Self> {
        serde_json::from_str(frame)
            .map_err(|e| Error::UnknownResponse(format!("undecodable bridge frame: {e}")))
    }

    /// Fail unless the status is present and OK.
    pub fn ensure_ok(&self) -> Result<()> {
        match self.status {
            None => Err(Error::UnknownResponse("response carries no status".to_string())),
            Some(STATUS_OK) => Ok(()),
            Some(code) => Err(Error::device_status(code)),
        }
    }

    /// Non-empty string result field `name`.
    pub fn field(&self, name: &str) -> Result<&str> {
        self.results
            .as_ref()
            .and_then(|results| results.get(name))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::UnknownResponse(format!("response is missing '{name}'")))
    }
}
