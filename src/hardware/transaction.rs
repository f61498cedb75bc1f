//! Ethereum transaction payloads
//!
//! - Legacy (EIP-155): `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`
//! - Fee market (EIP-1559): `0x02 || rlp([chainId, nonce, maxPriorityFeePerGas,
//!   maxFeePerGas, gasLimit, to, value, data, accessList])`
//!
//! The access list is always sent empty.

use crate::core::errors::{HardwareError, HardwareErrorKind, Result};
use crate::hardware::hashing::keccak256;
use crate::hardware::rlp::Item;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// EIP-2718 type byte for fee-market transactions.
pub const EIP1559_TX_TYPE: u8 = 0x02;

/// 20-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl FromStr for Address {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.len() != 40 {
            return Err(HardwareError::with_code(
                HardwareErrorKind::Unknown,
                format!("Invalid address length: {}", s),
                "INVALID_ADDRESS",
            ));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out)?;
        Ok(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(data)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// Wei amounts as JSON-RPC style hex quantities (`"0x3b9aca00"`).
mod hex_quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(digits) => u128::from_str_radix(digits, 16),
            None => s.parse::<u128>(),
        }
        .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    #[serde(with = "hex_quantity")]
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` for contract creation.
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(with = "hex_quantity")]
    pub value: u128,
    #[serde(default, with = "hex_data")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    #[serde(with = "hex_quantity")]
    pub max_priority_fee_per_gas: u128,
    #[serde(with = "hex_quantity")]
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(with = "hex_quantity")]
    pub value: u128,
    #[serde(default, with = "hex_data")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transaction {
    Legacy(LegacyTransaction),
    Eip1559(Eip1559Transaction),
}

fn to_item(to: &Option<Address>) -> Item {
    match to {
        Some(addr) => Item::bytes(addr.0.to_vec()),
        None => Item::bytes(Vec::new()),
    }
}

impl LegacyTransaction {
    pub fn rlp_items(&self) -> Vec<Item> {
        vec![
            Item::uint(self.nonce as u128),
            Item::uint(self.gas_price),
            Item::uint(self.gas_limit as u128),
            to_item(&self.to),
            Item::uint(self.value),
            Item::bytes(self.data.clone()),
            Item::uint(self.chain_id as u128),
            Item::uint(0),
            Item::uint(0),
        ]
    }
}

impl Eip1559Transaction {
    pub fn rlp_items(&self) -> Vec<Item> {
        vec![
            Item::uint(self.chain_id as u128),
            Item::uint(self.nonce as u128),
            Item::uint(self.max_priority_fee_per_gas),
            Item::uint(self.max_fee_per_gas),
            Item::uint(self.gas_limit as u128),
            to_item(&self.to),
            Item::uint(self.value),
            Item::bytes(self.data.clone()),
            Item::empty_list(),
        ]
    }
}

impl Transaction {
    pub fn chain_id(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.chain_id,
            Transaction::Eip1559(tx) => tx.chain_id,
        }
    }

    pub fn is_typed(&self) -> bool {
        matches!(self, Transaction::Eip1559(_))
    }

    /// Bytes the device signs over; also what the APDU vendor is sent.
    pub fn unsigned_payload(&self) -> Vec<u8> {
        match self {
            Transaction::Legacy(tx) => Item::List(tx.rlp_items()).encode(),
            Transaction::Eip1559(tx) => {
                let mut out = vec![EIP1559_TX_TYPE];
                out.extend_from_slice(&Item::List(tx.rlp_items()).encode());
                out
            }
        }
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(self.unsigned_payload())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
