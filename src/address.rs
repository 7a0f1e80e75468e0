//! Ethereum account addresses with mixed-case checksum encoding

use crate::error::{Error, Result};
use ethers_core::types::Address;
use ethers_core::utils::to_checksum;
use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account address.
///
/// Equality is byte equality, so two spellings that differ only in letter
/// case compare equal. `Display` renders the checksummed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EthAddress([u8; 20]);

impl EthAddress {
    /// Wrap raw address bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Last 20 bytes of keccak-256 over the uncompressed public key (sans 0x04 tag).
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.serialize_uncompressed();
        let hash = Keccak256::digest(&uncompressed[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Checksummed `0x`-prefixed form.
    pub fn to_checksum(&self) -> String {
        to_checksum(&Address::from(self.0), None)
    }

    /// Lowercase `0x`-prefixed form.
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl FromStr for EthAddress {
    type Err = Error;

    /// Accepts any letter case; mixed case is not required to carry a valid checksum.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if body.len() != 40 {
            return Err(Error::InvalidAddress(format!(
                "'{s}' must be 20 bytes of hex"
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(body, &mut bytes)
            .map_err(|e| Error::InvalidAddress(format!("'{s}': {e}")))?;
        Ok(Self(bytes))
    }
}

impl From<EthAddress> for ethers_core::types::Address {
    fn from(address: EthAddress) -> Self {
        ethers_core::types::Address::from(address.0)
    }
}

impl From<ethers_core::types::Address> for EthAddress {
    fn from(address: ethers_core::types::Address) -> Self {
        Self(address.0)
    }
}

impl Serialize for EthAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for EthAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
