//! ATLINK - AT.Wallet card keyring over the local WebSocket bridge
//!
//! This library lets an Ethereum wallet host drive an AT.Wallet hardware card
//! through the AT.Wallet bridge service. Private keys never leave the card:
//! the host receives one extended public key per account node and derives
//! addresses itself, while signing happens on the device.
//!
//! # Features
//!
//! - **HD paths**: BIP44 path parsing and account/key splitting
//! - **Public derivation**: CKDpub below the account node, EIP-55 addresses
//! - **Bridge protocol**: single-exchange JSON request/response channel
//! - **Account discovery**: paginated, gap-stopping BIP44 scan
//! - **Keyring facade**: serialize/restore and account management for hosts
//!
//! # Example
//!
//! ```no_run
//! use atlink::{AtlinkConfig, BridgeKeyring, HostKeyring};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AtlinkConfig::load(None)?;
//!     let keyring = BridgeKeyring::from_config(&config)?;
//!
//!     // Register the first two accounts with the card
//!     let accounts = keyring.add_accounts(2).await?;
//!
//!     println!("Accounts: {accounts:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]

pub mod address;
pub mod bridge;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod hdkey;
pub mod history;
pub mod keyring;
pub mod logging;
pub mod path;
pub mod transaction;

// Re-exports for convenience
pub use error::{Error, Result};

pub use address::EthAddress;
pub use bridge::ws::WsConnector;
pub use bridge::{Channel, Command, Connector, DeviceRequest, DeviceResponse, Transport};
pub use config::{AtlinkConfig, BridgeOptions, DiscoveryOptions, LogRotation, LoggingOptions};
pub use device::{Capability, DeviceClient};
pub use discovery::{AccountDiscovery, DiscoveredAccount, UnlockOutcome};
pub use hdkey::{ExtendedKeyStore, ExtendedPublicKey};
pub use history::{EtherscanHistory, Network, UsageHistory};
pub use keyring::{BridgeKeyring, HostKeyring, KEYRING_TYPE, KeyringState};
pub use path::{HdPath, PathComponent};
pub use transaction::{SignedTransaction, Transaction};
