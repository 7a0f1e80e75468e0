//! Request/response operations understood by the card
//!
//! Each call opens its own channel, performs one exchange and closes the
//! channel again on every path, including errors and timeouts.

use crate::address::EthAddress;
use crate::bridge::{Channel, Command, Connector, DeviceRequest, DeviceResponse};
use crate::error::{Error, Result};
use crate::hdkey::ExtendedPublicKey;
use crate::path::HdPath;
use crate::transaction::{SignedTransaction, Transaction};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Requester name sent when none is configured
pub const DEFAULT_REQUESTER: &str = "MetaMask";

/// Operations the card firmware has no endpoint for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// `eth_sign` style hash signing
    SignMessage,
    /// `personal_sign`
    SignPersonalMessage,
    /// EIP-712 typed data
    SignTypedData,
    /// Private key export
    ExportAccount,
}

impl Capability {
    /// Human-readable capability name
    pub fn name(self) -> &'static str {
        match self {
            Capability::SignMessage => "message signing",
            Capability::SignPersonalMessage => "personal message signing",
            Capability::SignTypedData => "typed data signing",
            Capability::ExportAccount => "private key export",
        }
    }

    /// Error for this permanent capability gap
    pub fn unsupported(self) -> Error {
        Error::Unsupported(self.name())
    }
}

/// Client for the four bridge commands
#[derive(Clone)]
pub struct DeviceClient {
    connector: Arc<dyn Connector>,
    requester: String,
    exchange_timeout: Option<Duration>,
}

impl DeviceClient {
    /// Client opening connections through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            requester: DEFAULT_REQUESTER.to_string(),
            exchange_timeout: None,
        }
    }

    /// Override the requester name
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    /// Bound each exchange; the channel is closed when the bound expires.
    pub fn with_exchange_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Fetch the extended public key of `account_path` (an account-level node).
    pub async fn get_extended_public_key(&self, account_path: &HdPath) -> Result<ExtendedPublicKey> {
        let response = self
            .call(Command::GetExtendedPublicKey, json!({ "path": account_path.to_string() }))
            .await?;
        response.ensure_ok()?;

        let fingerprint = response.field("parkeyFp")?;
        let chain_code = response.field("chainCode")?;
        let public_key = response.field("pubkey")?;

        let mut key = ExtendedPublicKey::from_hex(public_key, chain_code)
            .map_err(|e| Error::UnknownResponse(format!("unusable extended key: {e}")))?;
        if let Ok(bytes) = hex::decode(fingerprint.trim_start_matches("0x")) {
            if let Ok(fingerprint) = <[u8; 4]>::try_from(bytes.as_slice()) {
                key = key.with_parent_fingerprint(fingerprint);
            }
        }

        info!(path = %account_path, "fetched extended public key");
        Ok(key)
    }

    /// Register the account node at `account_path` with the card.
    pub async fn add_account(&self, account_path: &HdPath) -> Result<bool> {
        let response = self
            .call(Command::AddAccount, json!({ "path": account_path.to_string() }))
            .await?;
        response.ensure_ok()?;
        Ok(true)
    }

    /// Unregister `address` from the card.
    pub async fn remove_account(&self, address: &EthAddress) -> Result<bool> {
        let response = self
            .call(Command::RemoveAccount, json!({ "address": address.to_checksum() }))
            .await?;
        response.ensure_ok()?;
        Ok(true)
    }

    /// Ask the card to sign `tx` as `address`.
    ///
    /// The returned signature is not verified here; callers must check it
    /// against the sender before trusting it.
    pub async fn sign_transaction(
        &self,
        address: &EthAddress,
        tx: &Transaction,
    ) -> Result<SignedTransaction> {
        let response = self
            .call(
                Command::SignTransaction,
                json!({
                    "address": address.to_checksum(),
                    "transaction": tx.normalize(),
                }),
            )
            .await?;
        response.ensure_ok()?;

        let v = response.field("v")?;
        let r = response.field("r")?;
        let s = response.field("s")?;
        tx.clone().with_device_signature(v, r, s)
    }

    async fn call(&self, cmd: Command, parameters: serde_json::Value) -> Result<DeviceResponse> {
        let request = DeviceRequest::new(self.requester.clone(), cmd, parameters);
        let channel = Channel::open(self.connector.as_ref()).await?;

        let outcome = match self.exchange_timeout {
            Some(limit) => match tokio::time::timeout(limit, channel.exchange(&request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(limit)),
            },
            None => channel.exchange(&request).await,
        };

        channel.close().await;
        if let Err(err) = &outcome {
            debug!(?cmd, error = %err, "bridge command failed");
        }
        outcome
    }
}
