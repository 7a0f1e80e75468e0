#![allow(dead_code)]

//! In-memory AT.Wallet card for integration tests.
//!
//! The card holds a BIP39 seed and does real BIP32 private derivation and
//! recoverable secp256k1 signing, so everything the keyring derives from the
//! public side can be checked against an independent private-side result.

use async_trait::async_trait;
use atlink::bridge::{Command, Connector, DeviceRequest, DeviceResponse, Transport};
use atlink::discovery::AccountDiscovery;
use atlink::transaction::NormalizedTransaction;
use atlink::{BridgeKeyring, DeviceClient, Error, EthAddress, Result, Transaction, UsageHistory};
use ethers_core::types::{Bytes, U256};
use hmac::{Hmac, Mac};
use secp256k1::{Message, PublicKey, Scalar, Secp256k1, SecretKey};
use serde_json::json;
use sha2::Sha512;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

type HmacSha512 = Hmac<Sha512>;

pub const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Address of the phrase above at m/44'/60'/0'/0/0
pub const FIRST_ADDRESS: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

const HARDENED: u32 = 0x8000_0000;

#[derive(Clone)]
pub struct PrivateNode {
    pub secret: SecretKey,
    pub chain_code: [u8; 32],
}

impl PrivateNode {
    pub fn master(seed: &[u8]) -> Self {
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed").unwrap();
        mac.update(seed);
        Self::from_digest(&mac.finalize().into_bytes())
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);
        Self {
            secret: SecretKey::from_slice(&digest[..32]).unwrap(),
            chain_code,
        }
    }

    pub fn child(&self, index: u32) -> Self {
        let secp = Secp256k1::new();
        let mut mac = HmacSha512::new_from_slice(&self.chain_code).unwrap();
        if index >= HARDENED {
            mac.update(&[0]);
            mac.update(&self.secret.secret_bytes());
        } else {
            mac.update(&PublicKey::from_secret_key(&secp, &self.secret).serialize());
        }
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut il = [0u8; 32];
        il.copy_from_slice(&digest[..32]);
        let tweak = Scalar::from_be_bytes(il).unwrap();
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);
        Self {
            secret: self.secret.add_tweak(&tweak).unwrap(),
            chain_code,
        }
    }

    pub fn derive(&self, path: &[u32]) -> Self {
        path.iter().fold(self.clone(), |node, index| node.child(*index))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::new(), &self.secret)
    }

    pub fn address(&self) -> EthAddress {
        EthAddress::from_public_key(&self.public_key())
    }
}

pub fn seed_root() -> PrivateNode {
    static ROOT: OnceLock<PrivateNode> = OnceLock::new();
    ROOT.get_or_init(|| {
        let mnemonic = bip39::Mnemonic::parse_normalized(PHRASE).unwrap();
        PrivateNode::master(&mnemonic.to_seed_normalized(""))
    })
    .clone()
}

/// `m/44'/60'/{account}'`
pub fn account_node(account: u32) -> PrivateNode {
    seed_root().derive(&[44 | HARDENED, 60 | HARDENED, account | HARDENED])
}

/// Address at `m/44'/60'/{account}'/0/0`, derived from the private side.
pub fn address_at(account: u32) -> EthAddress {
    account_node(account).derive(&[0, 0]).address()
}

fn parse_path(path: &str) -> Vec<u32> {
    path.trim_start_matches("m/")
        .split('/')
        .map(|part| match part.strip_suffix('\'') {
            Some(index) => index.parse::<u32>().unwrap() | HARDENED,
            None => part.parse::<u32>().unwrap(),
        })
        .collect()
}

fn quantity(raw: &str) -> U256 {
    let body = raw.trim_start_matches("0x");
    if body.is_empty() {
        U256::zero()
    } else {
        U256::from_str_radix(body, 16).unwrap()
    }
}

fn denormalize(tx: &NormalizedTransaction) -> Transaction {
    Transaction {
        to: (tx.to != "0x").then(|| tx.to.parse().unwrap()),
        value: quantity(&tx.value),
        data: Bytes::from(hex::decode(tx.data.trim_start_matches("0x")).unwrap()),
        chain_id: quantity(&tx.chain_id).as_u64(),
        nonce: quantity(&tx.nonce),
        gas_limit: quantity(&tx.gas_limit),
        gas_price: quantity(&tx.gas_price),
    }
}

/// Scripted card: answers the four bridge commands from its seed.
pub struct MockDevice {
    pub(crate) root: PrivateNode,
    pub fail_add_at: Option<u32>,
    pub fail_remove: bool,
    pub sign_with_wrong_key: bool,
    /// Refuse every connection after this many have been opened
    pub refuse_after: Option<usize>,
    pub(crate) log: Mutex<Vec<DeviceRequest>>,
    pub(crate) opens: AtomicUsize,
    pub(crate) closes: AtomicUsize,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            root: seed_root(),
            fail_add_at: None,
            fail_remove: false,
            sign_with_wrong_key: false,
            refuse_after: None,
            log: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

impl MockDevice {
    pub fn respond(&self, request: &DeviceRequest) -> DeviceResponse {
        self.log.lock().unwrap().push(request.clone());
        let params = &request.parameters;
        match request.cmd {
            Command::GetExtendedPublicKey => {
                let node = self.root.derive(&parse_path(params["path"].as_str().unwrap()));
                DeviceResponse::ok(json!({
                    "parkeyFp": "00000000",
                    "chainCode": hex::encode(node.chain_code),
                    "pubkey": hex::encode(node.public_key().serialize()),
                }))
            }
            Command::AddAccount => {
                let path = parse_path(params["path"].as_str().unwrap());
                if Some(path[2] & !HARDENED) == self.fail_add_at {
                    DeviceResponse::status(500)
                } else {
                    DeviceResponse::ok(json!({}))
                }
            }
            Command::RemoveAccount if self.fail_remove => DeviceResponse::status(503),
            Command::RemoveAccount => DeviceResponse::ok(json!({})),
            Command::SignTransaction => self.sign(request),
        }
    }

    fn sign(&self, request: &DeviceRequest) -> DeviceResponse {
        let address: EthAddress = request.parameters["address"].as_str().unwrap().parse().unwrap();
        let Some(account) = (0..20).find(|account| address_at(*account) == address) else {
            return DeviceResponse::status(404);
        };
        let normalized: NormalizedTransaction =
            serde_json::from_value(request.parameters["transaction"].clone()).unwrap();
        let tx = denormalize(&normalized);

        let signer = if self.sign_with_wrong_key { account + 1 } else { account };
        let key = account_node(signer).derive(&[0, 0]).secret;
        let message = Message::from_slice(tx.sighash().as_bytes()).unwrap();
        let (recid, compact) = Secp256k1::new()
            .sign_ecdsa_recoverable(&message, &key)
            .serialize_compact();
        let v = recid.to_i32() as u64 + 35 + tx.chain_id * 2;

        DeviceResponse::ok(json!({
            "v": format!("{v:x}"),
            "r": hex::encode(&compact[..32]),
            "s": hex::encode(&compact[32..]),
        }))
    }

    /// Reply frame for a raw request frame
    pub fn handle_frame(&self, frame: &str) -> String {
        let request: DeviceRequest = serde_json::from_str(frame).unwrap();
        serde_json::to_string(&self.respond(&request)).unwrap()
    }

    pub fn requests(&self, cmd: Command) -> Vec<DeviceRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.cmd == cmd)
            .cloned()
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// In-process connector handing out links to one [`MockDevice`]
#[derive(Clone)]
pub struct MockBridge(pub Arc<MockDevice>);

struct MockLink {
    device: Arc<MockDevice>,
    pending: Option<String>,
}

#[async_trait]
impl Connector for MockBridge {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        if self.0.refuse_after.is_some_and(|limit| self.0.opens() >= limit) {
            return Err(Error::Connect);
        }
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLink {
            device: self.0.clone(),
            pending: None,
        }))
    }
}

#[async_trait]
impl Transport for MockLink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.pending = Some(self.device.handle_frame(&frame));
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        self.pending.take().ok_or(Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.device.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Usage history answering from a fixed set of used addresses
#[derive(Default)]
pub struct ScriptedHistory {
    used: HashSet<EthAddress>,
    queried: Mutex<Vec<EthAddress>>,
}

impl ScriptedHistory {
    /// Accounts `0..n` have history
    pub fn used_below(n: u32) -> Self {
        Self {
            used: (0..n).map(address_at).collect(),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn queried(&self) -> Vec<EthAddress> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageHistory for ScriptedHistory {
    async fn has_activity(&self, address: &EthAddress) -> Result<bool> {
        self.queried.lock().unwrap().push(*address);
        Ok(self.used.contains(address))
    }
}

pub fn keyring_with(device: Arc<MockDevice>, history: Arc<ScriptedHistory>) -> BridgeKeyring {
    let client = DeviceClient::new(Arc::new(MockBridge(device)));
    BridgeKeyring::new(AccountDiscovery::new(client, history))
}

pub fn fixture_tx() -> Transaction {
    Transaction {
        to: Some("0x3535353535353535353535353535353535353535".parse().unwrap()),
        value: U256::from(1_000_000_000_000_000_000u64),
        data: Bytes::default(),
        chain_id: 1,
        nonce: U256::from(9u64),
        gas_limit: U256::from(21_000u64),
        gas_price: U256::from(20_000_000_000u64),
    }
}
