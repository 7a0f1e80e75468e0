//! Legacy (EIP-155) transactions as exchanged with the card
//!
//! The bridge's JSON encoding cannot carry raw bytes, so every numeric and
//! byte field travels as a `0x`-prefixed minimal big-endian hex string.

use crate::address::EthAddress;
use crate::error::{Error, Result};
use ethers_core::types::{Address, Bytes, H256, Signature, TransactionRequest, U256};
use ethers_core::utils::keccak256;
use serde::{Deserialize, Serialize};

/// Unsigned legacy transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Recipient; `None` creates a contract
    #[serde(default)]
    pub to: Option<EthAddress>,
    /// Value in wei
    #[serde(default)]
    pub value: U256,
    /// Call data
    #[serde(default)]
    pub data: Bytes,
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Sender nonce
    #[serde(default)]
    pub nonce: U256,
    /// Gas limit
    pub gas_limit: U256,
    /// Gas price in wei
    pub gas_price: U256,
}

/// Hex-string rendition of a [`Transaction`] as sent to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTransaction {
    /// Recipient address, lowercase hex (`0x` for contract creation)
    pub to: String,
    /// Value
    pub value: String,
    /// Call data
    pub data: String,
    /// Chain id
    pub chain_id: String,
    /// Nonce
    pub nonce: String,
    /// Gas limit
    pub gas_limit: String,
    /// Gas price
    pub gas_price: String,
}

/// `0x` followed by the big-endian bytes of `value` without leading zeros.
pub fn hex_quantity(value: U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let first = buf.iter().position(|b| *b != 0).unwrap_or(buf.len());
    format!("0x{}", hex::encode(&buf[first..]))
}

fn decode_hex_field(name: &str, raw: &str, max_len: usize) -> Result<Vec<u8>> {
    let body = raw.trim_start_matches("0x");
    let padded;
    let body = if body.len() % 2 == 1 {
        padded = format!("0{body}");
        padded.as_str()
    } else {
        body
    };
    let bytes = hex::decode(body)
        .map_err(|e| Error::UnknownResponse(format!("'{name}' is not hex: {e}")))?;
    if bytes.len() > max_len {
        return Err(Error::UnknownResponse(format!(
            "'{name}' is {} bytes, at most {max_len} allowed",
            bytes.len()
        )));
    }
    Ok(bytes)
}

impl Transaction {
    /// Encode every field as a hex string for the bridge.
    pub fn normalize(&self) -> NormalizedTransaction {
        NormalizedTransaction {
            to: self
                .to
                .map(|to| to.to_lower_hex())
                .unwrap_or_else(|| "0x".to_string()),
            value: hex_quantity(self.value),
            data: format!("0x{}", hex::encode(&self.data)),
            chain_id: hex_quantity(U256::from(self.chain_id)),
            nonce: hex_quantity(self.nonce),
            gas_limit: hex_quantity(self.gas_limit),
            gas_price: hex_quantity(self.gas_price),
        }
    }

    /// Equivalent ethers request, used for RLP and the signing hash
    pub fn to_request(&self) -> TransactionRequest {
        let request = TransactionRequest::new()
            .value(self.value)
            .data(self.data.clone())
            .nonce(self.nonce)
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .chain_id(self.chain_id);
        match self.to {
            Some(to) => request.to(Address::from(to)),
            None => request,
        }
    }

    /// EIP-155 signing hash
    pub fn sighash(&self) -> H256 {
        self.to_request().sighash()
    }

    /// Attach the `v`/`r`/`s` hex fields returned by the card.
    pub fn with_device_signature(self, v: &str, r: &str, s: &str) -> Result<SignedTransaction> {
        let v_bytes = decode_hex_field("v", v, 8)?;
        let v = v_bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let r = U256::from_big_endian(&decode_hex_field("r", r, 32)?);
        let s = U256::from_big_endian(&decode_hex_field("s", s, 32)?);
        Ok(SignedTransaction {
            transaction: self,
            v,
            r,
            s,
        })
    }
}

/// Transaction with the card's signature attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The signed payload
    pub transaction: Transaction,
    /// Recovery value, EIP-155 encoded
    pub v: u64,
    /// Signature r
    pub r: U256,
    /// Signature s
    pub s: U256,
}

impl SignedTransaction {
    /// Signature in ethers form
    pub fn signature(&self) -> Signature {
        Signature {
            r: self.r,
            s: self.s,
            v: self.v,
        }
    }

    /// Recover the signing address.
    pub fn recover_signer(&self) -> Result<EthAddress> {
        if self.v >= 35 && (self.v - 35) / 2 != self.transaction.chain_id {
            return Err(Error::SignatureVerification);
        }
        self.signature()
            .recover(self.transaction.sighash())
            .map(EthAddress::from)
            .map_err(|_| Error::SignatureVerification)
    }

    /// Fail with [`Error::SignatureVerification`] unless `sender` produced the signature.
    pub fn verify(&self, sender: &EthAddress) -> Result<()> {
        if self.recover_signer()? == *sender {
            Ok(())
        } else {
            Err(Error::SignatureVerification)
        }
    }

    /// RLP encoding ready for broadcast
    pub fn raw(&self) -> Bytes {
        self.transaction.to_request().rlp_signed(&self.signature())
    }

    /// Transaction hash
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(self.raw()))
    }
}
