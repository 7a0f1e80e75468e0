//! Host-wallet keyring adapter over account discovery

use crate::address::EthAddress;
use crate::bridge::ws::WsConnector;
use crate::config::AtlinkConfig;
use crate::device::{Capability, DeviceClient};
use crate::discovery::{AccountDiscovery, DEFAULT_PER_PAGE, DiscoveredAccount, UnlockOutcome};
use crate::error::{Error, Result};
use crate::history::{EtherscanHistory, UsageHistory};
use crate::path::HdPath;
use crate::transaction::{SignedTransaction, Transaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Type tag under which the host registers this keyring
pub const KEYRING_TYPE: &str = "AuthenTrend Hardware";

/// Persisted keyring state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeyringState {
    /// Configured HD path
    pub hd_path: HdPath,
    /// Tracked accounts
    pub accounts: Vec<EthAddress>,
    /// Discovery page (0 before the first page)
    pub page: u32,
    /// Accounts per page
    pub per_page: u32,
    /// First index `add_accounts` starts from
    pub unlocked_account: u32,
}

impl Default for KeyringState {
    fn default() -> Self {
        Self {
            hd_path: HdPath::default(),
            accounts: Vec::new(),
            page: 0,
            per_page: DEFAULT_PER_PAGE,
            unlocked_account: 0,
        }
    }
}

/// Contract a host wallet drives its keyrings through
#[async_trait]
pub trait HostKeyring: Send + Sync {
    /// Type tag
    fn keyring_type(&self) -> &'static str;

    /// Snapshot the persistent state
    async fn serialize(&self) -> Result<KeyringState>;

    /// Restore from a snapshot; missing or zero page size falls back to the default.
    async fn deserialize(&self, state: KeyringState) -> Result<()>;

    /// Tracked accounts, in insertion order
    async fn get_accounts(&self) -> Result<Vec<EthAddress>>;

    /// Register `n` more accounts
    async fn add_accounts(&self, n: u32) -> Result<Vec<EthAddress>>;

    /// Stop tracking `address`
    async fn remove_account(&self, address: &str) -> Result<()>;

    /// Sign a legacy transaction as `address`
    async fn sign_transaction(&self, address: &str, tx: &Transaction) -> Result<SignedTransaction>;

    /// `eth_sign`
    async fn sign_message(&self, address: &str, data: &[u8]) -> Result<String>;

    /// `personal_sign`
    async fn sign_personal_message(&self, address: &str, message: &[u8]) -> Result<String>;

    /// EIP-712 typed data
    async fn sign_typed_data(&self, address: &str, typed_data: &Value) -> Result<String>;

    /// Private key export
    async fn export_account(&self, address: &str) -> Result<String>;

    /// Wipe every in-memory state back to defaults
    async fn forget_device(&self);
}

/// Keyring backed by an AT.Wallet card behind the bridge.
///
/// Every operation holds one lock for its whole duration, so device
/// commands from concurrent callers never interleave.
pub struct BridgeKeyring {
    discovery: Mutex<AccountDiscovery>,
}

impl BridgeKeyring {
    /// Wrap an assembled discovery engine
    pub fn new(discovery: AccountDiscovery) -> Self {
        Self {
            discovery: Mutex::new(discovery),
        }
    }

    /// Keyring talking to the configured bridge and explorer.
    pub fn from_config(config: &AtlinkConfig) -> Result<Self> {
        let connector = WsConnector::new(config.bridge.url.clone(), config.bridge.connect_timeout());
        let device = DeviceClient::new(Arc::new(connector))
            .with_requester(config.bridge.requester.clone())
            .with_exchange_timeout(config.bridge.exchange_timeout());
        let history: Arc<dyn UsageHistory> = Arc::new(EtherscanHistory::new(
            config.discovery.network,
            config.discovery.api_key.clone(),
        ));

        let mut discovery = AccountDiscovery::new(device, history);
        discovery.set_hd_path(config.discovery.hd_path()?)?;
        discovery.session_mut().set_per_page(config.discovery.per_page.max(1));
        Ok(Self::new(discovery))
    }

    /// Resolve the key for `path`, or the configured path.
    pub async fn unlock(&self, path: Option<&HdPath>) -> Result<UnlockOutcome> {
        self.discovery.lock().await.unlock(path).await
    }

    /// True iff an extended key is loaded
    pub async fn is_unlocked(&self) -> bool {
        self.discovery.lock().await.is_unlocked()
    }

    /// Change the configured HD path
    pub async fn set_hd_path(&self, path: HdPath) -> Result<()> {
        self.discovery.lock().await.set_hd_path(path)
    }

    /// Set the first index `add_accounts` starts from
    pub async fn set_account_to_unlock(&self, index: u32) -> Result<()> {
        self.discovery.lock().await.set_account_to_unlock(index)
    }

    /// Restart paging and return page 1
    pub async fn get_first_page(&self) -> Result<Vec<DiscoveredAccount>> {
        self.discovery.lock().await.first_page().await
    }

    /// Next discovery page
    pub async fn get_next_page(&self) -> Result<Vec<DiscoveredAccount>> {
        self.discovery.lock().await.next_page().await
    }

    /// Previous discovery page
    pub async fn get_previous_page(&self) -> Result<Vec<DiscoveredAccount>> {
        self.discovery.lock().await.previous_page().await
    }
}

#[async_trait]
impl HostKeyring for BridgeKeyring {
    fn keyring_type(&self) -> &'static str {
        KEYRING_TYPE
    }

    async fn serialize(&self) -> Result<KeyringState> {
        let discovery = self.discovery.lock().await;
        Ok(KeyringState {
            hd_path: discovery.hd_path().clone(),
            accounts: discovery.accounts().to_vec(),
            page: discovery.session().page(),
            per_page: discovery.session().per_page(),
            unlocked_account: discovery.unlocked_account(),
        })
    }

    async fn deserialize(&self, state: KeyringState) -> Result<()> {
        let mut discovery = self.discovery.lock().await;
        discovery.set_hd_path(state.hd_path)?;
        discovery.set_accounts(state.accounts);
        let per_page = if state.per_page == 0 {
            DEFAULT_PER_PAGE
        } else {
            state.per_page
        };
        discovery.session_mut().set_per_page(per_page);
        discovery.session_mut().set_page(state.page);
        discovery.set_account_to_unlock(state.unlocked_account)
    }

    async fn get_accounts(&self) -> Result<Vec<EthAddress>> {
        Ok(self.discovery.lock().await.accounts().to_vec())
    }

    async fn add_accounts(&self, n: u32) -> Result<Vec<EthAddress>> {
        self.discovery.lock().await.add_accounts(n).await
    }

    async fn remove_account(&self, address: &str) -> Result<()> {
        let parsed: EthAddress = address
            .parse()
            .map_err(|_| Error::AccountNotFound(address.to_string()))?;
        self.discovery.lock().await.remove_account(&parsed).await
    }

    async fn sign_transaction(&self, address: &str, tx: &Transaction) -> Result<SignedTransaction> {
        let sender: EthAddress = address.parse()?;
        self.discovery.lock().await.sign_transaction(&sender, tx).await
    }

    async fn sign_message(&self, _address: &str, _data: &[u8]) -> Result<String> {
        Err(Capability::SignMessage.unsupported())
    }

    async fn sign_personal_message(&self, _address: &str, _message: &[u8]) -> Result<String> {
        Err(Capability::SignPersonalMessage.unsupported())
    }

    async fn sign_typed_data(&self, _address: &str, _typed_data: &Value) -> Result<String> {
        Err(Capability::SignTypedData.unsupported())
    }

    async fn export_account(&self, _address: &str) -> Result<String> {
        Err(Capability::ExportAccount.unsupported())
    }

    async fn forget_device(&self) {
        self.discovery.lock().await.forget();
        info!("device forgotten");
    }
}
