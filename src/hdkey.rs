//! Public-only extended keys and the per-account key cache
//!
//! The device hands out one extended public key per account node. Everything
//! below the account (change/index) is derived here with CKDpub, so hardened
//! steps are rejected outright.

use crate::address::EthAddress;
use crate::error::{Error, Result};
use crate::path::{HARDENED_OFFSET, HdPath};
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, VerifyOnly};
use sha2::Sha512;
use std::sync::OnceLock;
use tracing::debug;

type HmacSha512 = Hmac<Sha512>;

fn secp() -> &'static Secp256k1<VerifyOnly> {
    static CONTEXT: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();
    CONTEXT.get_or_init(Secp256k1::verification_only)
}

/// Extended public key: a public key plus the chain code needed for CKDpub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    /// Node public key
    pub public_key: PublicKey,
    /// Node chain code
    pub chain_code: [u8; 32],
    /// Parent fingerprint as reported by the device, if any
    pub parent_fingerprint: Option<[u8; 4]>,
}

impl ExtendedPublicKey {
    /// Build from raw bytes; accepts compressed or uncompressed SEC1 keys.
    pub fn from_parts(public_key: &[u8], chain_code: &[u8]) -> Result<Self> {
        let public_key = PublicKey::from_slice(public_key)?;
        let chain_code: [u8; 32] = chain_code.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "chain code must be 32 bytes, got {}",
                chain_code.len()
            ))
        })?;
        Ok(Self {
            public_key,
            chain_code,
            parent_fingerprint: None,
        })
    }

    /// Decode the hex fields returned by the bridge.
    pub fn from_hex(public_key: &str, chain_code: &str) -> Result<Self> {
        let public_key = hex::decode(public_key.trim_start_matches("0x"))?;
        let chain_code = hex::decode(chain_code.trim_start_matches("0x"))?;
        Self::from_parts(&public_key, &chain_code)
    }

    /// Attach the parent fingerprint
    pub fn with_parent_fingerprint(mut self, fingerprint: [u8; 4]) -> Self {
        self.parent_fingerprint = Some(fingerprint);
        self
    }

    /// CKDpub for a single non-hardened child number.
    pub fn derive_child(&self, index: u32) -> Result<Self> {
        if index >= HARDENED_OFFSET {
            return Err(Error::InvalidKey(format!(
                "hardened child {} cannot be derived from a public key",
                index & !HARDENED_OFFSET
            )));
        }

        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        mac.update(&self.public_key.serialize());
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let (il, ir) = digest.split_at(32);

        let mut tweak_bytes = [0u8; 32];
        tweak_bytes.copy_from_slice(il);
        let tweak = Scalar::from_be_bytes(tweak_bytes)
            .map_err(|_| Error::InvalidKey(format!("child {index} tweak out of range")))?;
        let public_key = self.public_key.add_exp_tweak(secp(), &tweak)?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(Self {
            public_key,
            chain_code,
            parent_fingerprint: None,
        })
    }

    /// Apply every component of a relative path.
    pub fn derive_path(&self, path: &HdPath) -> Result<Self> {
        path.components()
            .iter()
            .try_fold(self.clone(), |key, component| {
                if component.hardened {
                    return Err(Error::InvalidKey(format!(
                        "'{path}' contains hardened component {component}"
                    )));
                }
                key.derive_child(component.index)
            })
    }

    /// Address of this node's public key
    pub fn address(&self) -> EthAddress {
        EthAddress::from_public_key(&self.public_key)
    }
}

/// Cache holding the extended key of exactly one account node.
///
/// The key is never mutated in place: switching to a different account
/// prefix drops it, and the next unlock installs a fresh one.
#[derive(Debug, Default)]
pub struct ExtendedKeyStore {
    account_path: Option<HdPath>,
    key: Option<ExtendedPublicKey>,
}

impl ExtendedKeyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the store at `path`, discarding the key if the account prefix changes.
    pub fn set_active_path(&mut self, path: &HdPath) -> Result<()> {
        let account_path = path.account_path()?;
        if self.account_path.as_ref() != Some(&account_path) {
            if self.key.take().is_some() {
                debug!(
                    from = ?self.account_path.as_ref().map(ToString::to_string),
                    to = %account_path,
                    "account prefix changed, dropping cached extended key"
                );
            }
            self.account_path = Some(account_path);
        }
        Ok(())
    }

    /// Account prefix the store currently tracks
    pub fn account_path(&self) -> Option<&HdPath> {
        self.account_path.as_ref()
    }

    /// Install a freshly fetched key for the active account prefix.
    pub fn install(&mut self, key: ExtendedPublicKey) {
        self.key = Some(key);
    }

    /// True iff a public key is present
    pub fn is_ready(&self) -> bool {
        self.key.is_some()
    }

    /// Derive the checksummed address at `key_path` below the cached account node.
    pub fn derive_address(&self, key_path: &HdPath) -> Result<EthAddress> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::InvalidKey("no extended public key loaded".to_string()))?;
        Ok(key.derive_path(key_path)?.address())
    }

    /// Forget both the key and the tracked prefix.
    pub fn reset(&mut self) {
        self.account_path = None;
        self.key = None;
    }
}
