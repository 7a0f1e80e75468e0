//! Usage-history lookups consulted during account discovery

use crate::address::EthAddress;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Answers whether an address has any prior on-chain activity
#[async_trait]
pub trait UsageHistory: Send + Sync {
    /// True if `address` has at least one transaction
    async fn has_activity(&self, address: &EthAddress) -> Result<bool>;
}

/// Networks with a known explorer API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Ethereum mainnet
    #[default]
    Mainnet,
    /// Ropsten testnet
    Ropsten,
    /// Kovan testnet
    Kovan,
    /// Rinkeby testnet
    Rinkeby,
    /// Goerli testnet
    Goerli,
    /// Sepolia testnet
    Sepolia,
}

impl Network {
    /// Explorer API base URL
    pub fn api_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.etherscan.io",
            Network::Ropsten => "http://api-ropsten.etherscan.io",
            Network::Kovan => "http://api-kovan.etherscan.io",
            Network::Rinkeby => "https://api-rinkeby.etherscan.io",
            Network::Goerli => "https://api-goerli.etherscan.io",
            Network::Sepolia => "https://api-sepolia.etherscan.io",
        }
    }

    /// Parse a network name, falling back to mainnet for anything unknown.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "ropsten" => Ok(Network::Ropsten),
            "kovan" => Ok(Network::Kovan),
            "rinkeby" => Ok(Network::Rinkeby),
            "goerli" => Ok(Network::Goerli),
            "sepolia" => Ok(Network::Sepolia),
            other => Err(Error::Config(format!("Unknown network '{other}'"))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Ropsten => "ropsten",
            Network::Kovan => "kovan",
            Network::Rinkeby => "rinkeby",
            Network::Goerli => "goerli",
            Network::Sepolia => "sepolia",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    #[serde(default)]
    result: Value,
}

impl TxListResponse {
    fn has_activity(&self) -> bool {
        self.status != "0"
            && self
                .result
                .as_array()
                .map(|entries| !entries.is_empty())
                .unwrap_or(false)
    }
}

/// Etherscan `txlist` lookup
#[derive(Debug, Clone)]
pub struct EtherscanHistory {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl EtherscanHistory {
    /// Lookup against the explorer for `network`
    pub fn new(network: Network, api_key: Option<String>) -> Self {
        Self::with_base_url(network.api_url(), api_key)
    }

    /// Lookup against an explicit API base URL
    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, address: &EthAddress) -> reqwest::RequestBuilder {
        let url = format!("{}/api", self.base_url.trim_end_matches('/'));
        let address = address.to_checksum();
        let mut query = vec![
            ("module", "account"),
            ("action", "txlist"),
            ("address", address.as_str()),
            ("tag", "latest"),
            ("page", "1"),
            ("offset", "1"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }
        self.client.get(url).query(&query)
    }
}

#[async_trait]
impl UsageHistory for EtherscanHistory {
    async fn has_activity(&self, address: &EthAddress) -> Result<bool> {
        let response: TxListResponse = self
            .request(address)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let used = response.has_activity();
        debug!(%address, used, "usage history lookup");
        Ok(used)
    }
}
