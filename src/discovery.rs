//! BIP44 account discovery and account-list bookkeeping
//!
//! Discovery walks one hardened account node per index and stops right after
//! the first index with no usage history: an account must not be exposed
//! while a lower one is still unused.

use crate::address::EthAddress;
use crate::device::DeviceClient;
use crate::error::{Error, Result};
use crate::hdkey::ExtendedKeyStore;
use crate::history::UsageHistory;
use crate::path::{HARDENED_OFFSET, HdPath, check_account_index};
use crate::transaction::{SignedTransaction, Transaction};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound (exclusive) on account indices explored by pagination
pub const MAX_INDEX: u32 = 10;

/// Default number of accounts per page
pub const DEFAULT_PER_PAGE: u32 = 5;

/// One scanned account on a discovery page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAccount {
    /// Checksummed address
    pub address: EthAddress,
    /// Balance is never fetched during discovery
    pub balance: Option<String>,
    /// Account index
    pub index: u32,
}

/// Pagination cursor, live only while paging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySession {
    page: u32,
    per_page: u32,
    max_index: u32,
}

impl DiscoverySession {
    /// Cursor before the first page
    pub fn new(per_page: u32) -> Self {
        Self {
            page: 0,
            per_page,
            max_index: MAX_INDEX,
        }
    }

    /// Move by `increment` pages (floored at page 1) and return the index range to scan.
    pub fn advance(&mut self, increment: i32) -> Range<u32> {
        let page = (i64::from(self.page) + i64::from(increment)).max(1);
        self.page = u32::try_from(page).unwrap_or(u32::MAX);

        let from = (self.page - 1).saturating_mul(self.per_page);
        let to = from.saturating_add(self.per_page).min(self.max_index);
        from.min(to)..to
    }

    /// Current page number (0 before the first page)
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Accounts per page
    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Jump to a stored page number
    pub fn set_page(&mut self, page: u32) {
        self.page = page;
    }

    /// Change the page size
    pub fn set_per_page(&mut self, per_page: u32) {
        self.per_page = per_page;
    }

    /// Back to before the first page
    pub fn reset(&mut self) {
        self.page = 0;
    }
}

impl Default for DiscoverySession {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PAGE)
    }
}

/// Where a page scan ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// More indices remain in the page
    Scanning,
    /// Stopped after an index with no usage history
    StoppedAtGap,
    /// Every index of the page was scanned
    Exhausted,
}

/// Scan over one page of account indices, independent of any I/O.
#[derive(Debug)]
pub struct PageScan {
    next: u32,
    end: u32,
    state: ScanState,
    accounts: Vec<DiscoveredAccount>,
}

impl PageScan {
    /// Scan over `range`
    pub fn new(range: Range<u32>) -> Self {
        let state = if range.is_empty() {
            ScanState::Exhausted
        } else {
            ScanState::Scanning
        };
        Self {
            next: range.start,
            end: range.end,
            state,
            accounts: Vec::new(),
        }
    }

    /// Index to check next, or `None` once the scan has ended.
    pub fn next_index(&self) -> Option<u32> {
        (self.state == ScanState::Scanning).then_some(self.next)
    }

    /// Record the result for the current index. An unused account is kept as the last entry.
    pub fn record(&mut self, address: EthAddress, used: bool) {
        if self.state != ScanState::Scanning {
            return;
        }
        self.accounts.push(DiscoveredAccount {
            address,
            balance: None,
            index: self.next,
        });
        self.next += 1;

        if !used {
            self.state = ScanState::StoppedAtGap;
        } else if self.next >= self.end {
            self.state = ScanState::Exhausted;
        }
    }

    /// Current state
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Entries recorded so far
    pub fn into_accounts(self) -> Vec<DiscoveredAccount> {
        self.accounts
    }
}

/// Result of an unlock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// A key was already loaded and no explicit path was given
    AlreadyUnlocked,
    /// Address at the resolved path
    Unlocked(EthAddress),
}

/// Drives the key cache, the device and the usage-history lookup.
pub struct AccountDiscovery {
    device: DeviceClient,
    history: Arc<dyn UsageHistory>,
    keys: ExtendedKeyStore,
    hd_path: HdPath,
    accounts: Vec<EthAddress>,
    session: DiscoverySession,
    unlocked_account: u32,
}

impl AccountDiscovery {
    /// Discovery over `device`, probing usage through `history`
    pub fn new(device: DeviceClient, history: Arc<dyn UsageHistory>) -> Self {
        Self {
            device,
            history,
            keys: ExtendedKeyStore::new(),
            hd_path: HdPath::default(),
            accounts: Vec::new(),
            session: DiscoverySession::default(),
            unlocked_account: 0,
        }
    }

    /// Resolve the extended key for `path` (or the configured path).
    ///
    /// Without an explicit path this is a no-op once a key is loaded.
    pub async fn unlock(&mut self, path: Option<&HdPath>) -> Result<UnlockOutcome> {
        match path {
            Some(path) => self.unlock_path(path).await.map(UnlockOutcome::Unlocked),
            None if self.keys.is_ready() => Ok(UnlockOutcome::AlreadyUnlocked),
            None => {
                let path = self.hd_path.clone();
                self.unlock_path(&path).await.map(UnlockOutcome::Unlocked)
            }
        }
    }

    async fn unlock_path(&mut self, path: &HdPath) -> Result<EthAddress> {
        let (account_path, key_path) = path.split_account_and_key_path()?;
        self.keys.set_active_path(path)?;
        if !self.keys.is_ready() {
            let key = self.device.get_extended_public_key(&account_path).await?;
            self.keys.install(key);
        }
        self.keys.derive_address(&key_path)
    }

    /// True iff an extended key is loaded
    pub fn is_unlocked(&self) -> bool {
        self.keys.is_ready()
    }

    /// Configured HD path
    pub fn hd_path(&self) -> &HdPath {
        &self.hd_path
    }

    /// Change the configured HD path; the key survives only if the account node is unchanged.
    pub fn set_hd_path(&mut self, path: HdPath) -> Result<()> {
        self.keys.set_active_path(&path)?;
        self.hd_path = path;
        Ok(())
    }

    /// First account index `add_accounts` starts from
    pub fn unlocked_account(&self) -> u32 {
        self.unlocked_account
    }

    /// Set the first account index `add_accounts` starts from
    pub fn set_account_to_unlock(&mut self, index: u32) -> Result<()> {
        self.unlocked_account = check_account_index(index)?;
        Ok(())
    }

    /// Tracked accounts, in insertion order
    pub fn accounts(&self) -> &[EthAddress] {
        &self.accounts
    }

    /// Replace the tracked accounts, dropping case-insensitive duplicates.
    pub fn set_accounts(&mut self, accounts: Vec<EthAddress>) {
        self.accounts.clear();
        for account in accounts {
            if !self.accounts.contains(&account) {
                self.accounts.push(account);
            }
        }
    }

    /// Pagination cursor
    pub fn session(&self) -> &DiscoverySession {
        &self.session
    }

    /// Mutable pagination cursor
    pub fn session_mut(&mut self) -> &mut DiscoverySession {
        &mut self.session
    }

    /// Restart paging and return page 1.
    pub async fn first_page(&mut self) -> Result<Vec<DiscoveredAccount>> {
        self.session.reset();
        self.scan_page(1).await
    }

    /// Advance one page.
    pub async fn next_page(&mut self) -> Result<Vec<DiscoveredAccount>> {
        self.scan_page(1).await
    }

    /// Go back one page (never before page 1).
    pub async fn previous_page(&mut self) -> Result<Vec<DiscoveredAccount>> {
        self.scan_page(-1).await
    }

    async fn scan_page(&mut self, increment: i32) -> Result<Vec<DiscoveredAccount>> {
        let range = self.session.advance(increment);
        self.unlock(None).await?;

        let mut scan = PageScan::new(range.clone());
        while let Some(index) = scan.next_index() {
            let address = self.unlock_path(&HdPath::for_account(index)?).await?;
            let used = self.history.has_activity(&address).await?;
            scan.record(address, used);
        }

        debug!(
            page = self.session.page(),
            from = range.start,
            to = range.end,
            state = ?scan.state(),
            "discovery page scanned"
        );
        Ok(scan.into_accounts())
    }

    /// Register `n` accounts starting at the unlock index, skipping known ones.
    ///
    /// A device-side failure ends the batch; accounts added before it are kept.
    pub async fn add_accounts(&mut self, n: u32) -> Result<Vec<EthAddress>> {
        if n == 0 {
            return Ok(self.accounts.clone());
        }
        let from = self.unlocked_account;
        let to = from
            .checked_add(n)
            .filter(|to| *to <= HARDENED_OFFSET)
            .ok_or_else(|| {
                Error::MalformedPath(format!(
                    "{n} accounts from index {from} exceed the BIP32 index range"
                ))
            })?;
        self.unlock(None).await?;

        for index in from..to {
            let path = HdPath::for_account(index)?;
            let address = self.unlock_path(&path).await?;
            if self.accounts.contains(&address) {
                debug!(%address, index, "account already tracked");
                continue;
            }

            match self.device.add_account(&path.account_path()?).await {
                Ok(true) => {
                    info!(%address, index, "account added");
                    self.accounts.push(address);
                }
                Ok(false) => {
                    warn!(%address, index, "device declined account, stopping batch");
                    break;
                }
                Err(err) => {
                    warn!(%address, index, error = %err, "device failed to add account, stopping batch");
                    break;
                }
            }
        }

        self.session.reset();
        Ok(self.accounts.clone())
    }

    /// Stop tracking `address`, then tell the device on a best-effort basis.
    pub async fn remove_account(&mut self, address: &EthAddress) -> Result<()> {
        if !self.accounts.contains(address) {
            return Err(Error::AccountNotFound(address.to_checksum()));
        }
        self.accounts.retain(|account| account != address);
        info!(%address, "account removed");

        if let Err(err) = self.unlock(None).await {
            warn!(%address, error = %err, "skipping device-side removal");
            return Ok(());
        }
        if let Err(err) = self.device.remove_account(address).await {
            warn!(%address, error = %err, "device-side removal failed");
        }
        Ok(())
    }

    /// Have the device sign `tx` as `address` and verify the result.
    pub async fn sign_transaction(
        &mut self,
        address: &EthAddress,
        tx: &Transaction,
    ) -> Result<SignedTransaction> {
        self.unlock(None).await?;
        let signed = self.device.sign_transaction(address, tx).await?;
        signed.verify(address)?;
        info!(%address, hash = ?signed.hash(), "transaction signed");
        Ok(signed)
    }

    /// Drop accounts, key and paging state.
    pub fn forget(&mut self) {
        self.accounts.clear();
        self.keys.reset();
        self.session.reset();
        self.unlocked_account = 0;
    }
}
