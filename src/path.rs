//! BIP32 derivation path codec
//!
//! Full paths carry exactly five components
//! (`purpose'/coin_type'/account'/change/index`). The bridge only ever sees
//! the account-level prefix; the change/index suffix is applied locally.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Index offset for hardened children
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Number of components in a derivable path
pub const FULL_PATH_LEN: usize = 5;

/// Number of components in the account-level prefix
pub const ACCOUNT_PATH_LEN: usize = 3;

/// Fails unless `index` fits below the hardened offset.
pub fn check_account_index(index: u32) -> Result<u32> {
    if index >= HARDENED_OFFSET {
        return Err(Error::MalformedPath(format!(
            "account index {index} exceeds the BIP32 index range"
        )));
    }
    Ok(index)
}

/// BIP44 purpose
pub const BIP44_PURPOSE: u32 = 44;

/// SLIP-44 coin type for Ether
pub const ETH_COIN_TYPE: u32 = 60;

/// Default path for the first account
pub const DEFAULT_HD_PATH: &str = "m/44'/60'/0'/0/0";

/// A single component of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathComponent {
    /// The index value, without the hardened bit
    pub index: u32,
    /// Whether this is a hardened derivation
    pub hardened: bool,
}

impl PathComponent {
    /// Create a hardened component
    pub fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    /// Create a normal (non-hardened) component
    pub fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }

    /// BIP32 child number, hardened bit included
    pub fn to_bip32_index(self) -> u32 {
        if self.hardened {
            self.index | HARDENED_OFFSET
        } else {
            self.index
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        let hardened = raw.ends_with('\'') || raw.ends_with('h');
        let digits = if hardened { &raw[..raw.len() - 1] } else { raw };

        let index = digits
            .parse::<u32>()
            .map_err(|e| Error::MalformedPath(format!("invalid component '{raw}': {e}")))?;
        if index >= HARDENED_OFFSET {
            return Err(Error::MalformedPath(format!(
                "component '{raw}' exceeds the BIP32 index range"
            )));
        }

        Ok(Self { index, hardened })
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// An ordered sequence of derivation components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HdPath {
    components: Vec<PathComponent>,
}

impl HdPath {
    /// Build a path from raw components; no length check.
    pub fn from_components(components: Vec<PathComponent>) -> Self {
        Self { components }
    }

    /// Parse a full derivation path like `m/44'/60'/0'/0/0`.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        let body = trimmed
            .strip_prefix("m/")
            .or_else(|| trimmed.strip_prefix("M/"))
            .unwrap_or(trimmed);

        if body.is_empty() || body == "m" {
            return Err(Error::MalformedPath(format!("'{path}' has no components")));
        }

        let components = body
            .split('/')
            .map(PathComponent::parse)
            .collect::<Result<Vec<_>>>()?;

        if components.len() != FULL_PATH_LEN {
            return Err(Error::MalformedPath(format!(
                "'{path}' has {} components, expected {FULL_PATH_LEN}",
                components.len()
            )));
        }

        Ok(Self { components })
    }

    /// `m/44'/60'/{index}'/0/0`: one hardened account node per account index.
    pub fn for_account(index: u32) -> Result<Self> {
        check_account_index(index)?;
        Ok(Self::bip44(index))
    }

    fn bip44(index: u32) -> Self {
        Self {
            components: vec![
                PathComponent::hardened(BIP44_PURPOSE),
                PathComponent::hardened(ETH_COIN_TYPE),
                PathComponent::hardened(index),
                PathComponent::normal(0),
                PathComponent::normal(0),
            ],
        }
    }

    /// Split into the account-level prefix and the change/index suffix.
    pub fn split_account_and_key_path(&self) -> Result<(HdPath, HdPath)> {
        if self.components.len() != FULL_PATH_LEN {
            return Err(Error::MalformedPath(format!(
                "'{self}' cannot be split, expected {FULL_PATH_LEN} components"
            )));
        }
        let (account, key) = self.components.split_at(ACCOUNT_PATH_LEN);
        Ok((Self::from_components(account.to_vec()), Self::from_components(key.to_vec())))
    }

    /// The account-level prefix of a full path.
    pub fn account_path(&self) -> Result<HdPath> {
        self.split_account_and_key_path().map(|(account, _)| account)
    }

    /// Path components in order
    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True when the path has no components
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Join two paths, e.g. an account path with its key path.
    pub fn join(&self, other: &HdPath) -> HdPath {
        let mut components = self.components.clone();
        components.extend_from_slice(&other.components);
        Self { components }
    }
}

impl Default for HdPath {
    fn default() -> Self {
        Self::bip44(0)
    }
}

impl fmt::Display for HdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl FromStr for HdPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for HdPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HdPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
