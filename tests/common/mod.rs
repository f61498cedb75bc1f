// tests/common/mod.rs
// Shared test doubles: an in-memory Ledger Ethereum app and a connect broker,
// both signing with a fixed secp256k1 key.

#![allow(dead_code)]

use async_trait::async_trait;
use hw_wallet_bridge::hardware::classify::Fault;
use hw_wallet_bridge::hardware::hashing::{keccak256, personal_message_hash};
use hw_wallet_bridge::hardware::ledger::{ApduConnector, ApduExchange};
use hw_wallet_bridge::hardware::signature::SECP256K1_N;
use hw_wallet_bridge::hardware::transaction::{Eip1559Transaction, LegacyTransaction, Transaction};
use hw_wallet_bridge::hardware::trezor::{BrokerResponse, ConnectBroker};
use hw_wallet_bridge::hardware::FaultResult;
use parking_lot::Mutex;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde_json::{json, Value};
use std::sync::Arc;

pub const TEST_KEY: [u8; 32] = [0x4c; 32];

pub const STANDARD_PATH: &str = "m/44'/60'/0'/0/0";

/// Address of [`TEST_KEY`], lowercase.
pub fn test_address() -> String {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&TEST_KEY).expect("valid key");
    let pk = PublicKey::from_secret_key(&secp, &sk);
    let digest = keccak256(&pk.serialize_uncompressed()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// `(recovery_id, r, s)` over a prehashed message.
pub fn sign_hash(hash: &[u8; 32]) -> (u8, [u8; 32], [u8; 32]) {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&TEST_KEY).expect("valid key");
    let message = Message::from_slice(hash).expect("32 bytes");
    let (recid, compact) = secp
        .sign_ecdsa_recoverable(&message, &sk)
        .serialize_compact();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    (recid.to_i32() as u8, r, s)
}

/// `n - s`
pub fn negate_scalar(s: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut diff = SECP256K1_N[i] as i16 - s[i] as i16 - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = diff as u8;
    }
    out
}

/// Signature as the device would emit it, optionally in high-S form.
pub fn device_signature(hash: &[u8; 32], high_s: bool) -> (u8, [u8; 32], [u8; 32]) {
    let (recid, r, s) = sign_hash(hash);
    if high_s {
        (recid ^ 1, r, negate_scalar(&s))
    } else {
        (recid, r, s)
    }
}

fn split_path(payload: &[u8]) -> (&[u8], &[u8]) {
    let depth = payload.first().copied().unwrap_or(0) as usize;
    payload.split_at(1 + depth * 4)
}

fn ok(mut data: Vec<u8>) -> Vec<u8> {
    data.extend_from_slice(&[0x90, 0x00]);
    data
}

#[derive(Default)]
pub struct LedgerState {
    /// Every APDU received, in order.
    pub apdus: Vec<Vec<u8>>,
    /// Status word returned for the next command instead of its result.
    pub fail_next: Option<u16>,
    /// Status word returned for every command.
    pub fail_always: Option<u16>,
    pub high_s: bool,
    pub closed: bool,
    pending: Vec<u8>,
}

/// In-memory Ethereum app. Multi-chunk commands are answered after every
/// chunk with a signature over the bytes received so far.
#[derive(Clone, Default)]
pub struct MockLedger {
    pub state: Arc<Mutex<LedgerState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, status: u16) {
        self.state.lock().fail_next = Some(status);
    }

    pub fn fail_always(&self, status: u16) {
        self.state.lock().fail_always = Some(status);
    }

    pub fn emit_high_s(&self) {
        self.state.lock().high_s = true;
    }

    pub fn apdus(&self) -> Vec<Vec<u8>> {
        self.state.lock().apdus.clone()
    }

    fn respond(&self, apdu: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock();
        state.apdus.push(apdu.to_vec());
        if let Some(sw) = state.fail_next.take().or(state.fail_always) {
            return sw.to_be_bytes().to_vec();
        }

        let (ins, p1, data) = (apdu[1], apdu[2], &apdu[5..]);
        if p1 == 0x00 || ins == 0x02 {
            state.pending.clear();
        }
        state.pending.extend_from_slice(data);
        let payload = state.pending.clone();
        let high_s = state.high_s;

        match ins {
            0x02 => {
                let secp = Secp256k1::new();
                let sk = SecretKey::from_slice(&TEST_KEY).expect("valid key");
                let pk = PublicKey::from_secret_key(&secp, &sk).serialize_uncompressed();
                let address = test_address();
                // the app reports mixed-case hex without the prefix
                let ascii = address[2..].to_ascii_uppercase();
                let mut out = vec![pk.len() as u8];
                out.extend_from_slice(&pk);
                out.push(ascii.len() as u8);
                out.extend_from_slice(ascii.as_bytes());
                ok(out)
            }
            0x06 => ok(vec![0x01, 1, 10, 3]),
            0x08 => {
                let (_, rest) = split_path(&payload);
                let message = rest.get(4..).unwrap_or_default();
                let (recid, r, s) = device_signature(&personal_message_hash(message), high_s);
                ok(signature_bytes(27 + recid, &r, &s))
            }
            0x04 => {
                let (_, tx) = split_path(&payload);
                let (recid, r, s) = device_signature(&keccak256(tx), high_s);
                let v = if tx.first() == Some(&0x02) {
                    recid
                } else {
                    let chain_id = legacy_chain_id(tx);
                    if chain_id == 0 {
                        27 + recid
                    } else {
                        (chain_id * 2 + 35 + recid as u64) as u8
                    }
                };
                ok(signature_bytes(v, &r, &s))
            }
            0x0C => {
                let (_, hashes) = split_path(&payload);
                let mut preimage = vec![0x19, 0x01];
                preimage.extend_from_slice(hashes);
                let (recid, r, s) = device_signature(&keccak256(&preimage), high_s);
                ok(signature_bytes(27 + recid, &r, &s))
            }
            _ => vec![0x6d, 0x00],
        }
    }
}

fn signature_bytes(v: u8, r: &[u8; 32], s: &[u8; 32]) -> Vec<u8> {
    let mut out = vec![v];
    out.extend_from_slice(r);
    out.extend_from_slice(s);
    out
}

/// Chain id of an unsigned EIP-155 list: the seventh item.
fn legacy_chain_id(tx: &[u8]) -> u64 {
    let item = rlp::Rlp::new(tx);
    item.val_at::<u64>(6).unwrap_or(0)
}

pub struct MockExchange {
    ledger: MockLedger,
}

#[async_trait]
impl ApduExchange for MockExchange {
    async fn exchange(&mut self, apdu: &[u8]) -> FaultResult<Vec<u8>> {
        Ok(self.ledger.respond(apdu))
    }

    async fn close(&mut self) -> FaultResult<()> {
        self.ledger.state.lock().closed = true;
        Ok(())
    }

    fn product_name(&self) -> Option<String> {
        Some("Nano X".to_string())
    }
}

/// Connector handing out exchanges to one [`MockLedger`]; `unplugged`
/// makes `open` fail the way hidapi does with nothing attached.
#[derive(Clone, Default)]
pub struct MockConnector {
    pub ledger: MockLedger,
    pub unplugged: Arc<Mutex<bool>>,
}

impl MockConnector {
    pub fn new(ledger: MockLedger) -> Self {
        Self {
            ledger,
            unplugged: Arc::new(Mutex::new(false)),
        }
    }

    pub fn unplug(&self) {
        *self.unplugged.lock() = true;
    }
}

#[async_trait]
impl ApduConnector for MockConnector {
    async fn open(&self) -> FaultResult<Box<dyn ApduExchange>> {
        if *self.unplugged.lock() {
            return Err(Fault::from("No Ledger device found. Connect and unlock it."));
        }
        Ok(Box::new(MockExchange {
            ledger: self.ledger.clone(),
        }))
    }
}

#[derive(Default)]
pub struct BrokerState {
    pub calls: Vec<(String, Value)>,
    /// `(method, code, message)` failures, matched by method name.
    pub failures: Vec<(String, String, String)>,
    /// Successful payloads that replace the computed answer.
    pub replies: Vec<(String, Value)>,
    pub high_s: bool,
}

/// Connect broker answering like the Trezor Ethereum methods.
#[derive(Clone, Default)]
pub struct MockBroker {
    pub state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, method: &str, code: &str, message: &str) {
        self.state
            .lock()
            .failures
            .push((method.to_string(), code.to_string(), message.to_string()));
    }

    pub fn emit_high_s(&self) {
        self.state.lock().high_s = true;
    }

    pub fn reply(&self, method: &str, payload: Value) {
        self.state.lock().replies.push((method.to_string(), payload));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().calls.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(m, _)| m).collect()
    }
}

fn quantity(value: &Value) -> u128 {
    let text = value.as_str().unwrap_or("0x0");
    u128::from_str_radix(text.trim_start_matches("0x"), 16).unwrap_or(0)
}

/// Rebuilds the transaction from `ethereumSignTransaction` params.
pub fn transaction_from_params(params: &Value) -> Transaction {
    let to = params["to"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().expect("address"));
    let data = hex::decode(params["data"].as_str().unwrap_or("0x").trim_start_matches("0x"))
        .expect("hex data");
    let chain_id = params["chainId"].as_u64().unwrap_or(0);
    let nonce = quantity(&params["nonce"]) as u64;
    let gas_limit = quantity(&params["gasLimit"]) as u64;
    let value = quantity(&params["value"]);
    if params.get("maxFeePerGas").is_some() {
        Transaction::Eip1559(Eip1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: quantity(&params["maxPriorityFeePerGas"]),
            max_fee_per_gas: quantity(&params["maxFeePerGas"]),
            gas_limit,
            to,
            value,
            data,
        })
    } else {
        Transaction::Legacy(LegacyTransaction {
            chain_id,
            nonce,
            gas_price: quantity(&params["gasPrice"]),
            gas_limit,
            to,
            value,
            data,
        })
    }
}

fn hex_signature(v: u8, r: &[u8; 32], s: &[u8; 32]) -> String {
    format!("{}{}{:02x}", hex::encode(r), hex::encode(s), v)
}

#[async_trait]
impl ConnectBroker for MockBroker {
    async fn call(&self, method: &str, params: Value) -> FaultResult<BrokerResponse> {
        let mut state = self.state.lock();
        state.calls.push((method.to_string(), params.clone()));
        if let Some((_, code, message)) = state.failures.iter().find(|(m, _, _)| m == method) {
            return Ok(BrokerResponse::failure(code, message));
        }
        if let Some((_, payload)) = state.replies.iter().find(|(m, _)| m == method) {
            return Ok(BrokerResponse::ok(payload.clone()));
        }
        let high_s = state.high_s;

        let payload = match method {
            "getFeatures" => json!({
                "model": "T",
                "major_version": 2,
                "minor_version": 6,
                "patch_version": 3,
                "label": "Test Trezor"
            }),
            "ethereumGetAddress" => {
                // checksummed casing from the firmware
                let address = test_address();
                json!({ "address": format!("0x{}", address[2..].to_ascii_uppercase()), "path": params["path"] })
            }
            "ethereumSignMessage" => {
                let message = hex::decode(params["message"].as_str().unwrap_or_default())
                    .expect("hex message");
                let (recid, r, s) = device_signature(&personal_message_hash(&message), high_s);
                json!({ "address": test_address(), "signature": hex_signature(27 + recid, &r, &s) })
            }
            "ethereumSignTransaction" => {
                let tx = transaction_from_params(&params["transaction"]);
                let (recid, r, s) = device_signature(&tx.signing_hash(), high_s);
                let v = if tx.is_typed() {
                    recid as u64
                } else {
                    tx.chain_id() * 2 + 35 + recid as u64
                };
                json!({
                    "v": format!("{:#x}", v),
                    "r": format!("0x{}", hex::encode(r)),
                    "s": format!("0x{}", hex::encode(s)),
                })
            }
            "ethereumSignTypedData" => {
                let domain = hex::decode(params["domain_separator_hash"].as_str().unwrap_or_default())
                    .expect("hex domain");
                let message = hex::decode(params["message_hash"].as_str().unwrap_or_default())
                    .expect("hex message");
                let mut preimage = vec![0x19, 0x01];
                preimage.extend_from_slice(&domain);
                preimage.extend_from_slice(&message);
                let (recid, r, s) = device_signature(&keccak256(&preimage), high_s);
                json!({ "address": test_address(), "signature": format!("0x{}", hex_signature(27 + recid, &r, &s)) })
            }
            "dispose" => json!({}),
            _ => return Ok(BrokerResponse::failure("Method_NotAllowed", "Unknown method")),
        };
        Ok(BrokerResponse::ok(payload))
    }
}

pub const MAIL_TYPED_DATA: &str = r#"{
    "types": {
        "EIP712Domain": [
            {"name": "name", "type": "string"},
            {"name": "version", "type": "string"},
            {"name": "chainId", "type": "uint256"},
            {"name": "verifyingContract", "type": "address"}
        ],
        "Person": [
            {"name": "name", "type": "string"},
            {"name": "wallet", "type": "address"}
        ],
        "Mail": [
            {"name": "from", "type": "Person"},
            {"name": "to", "type": "Person"},
            {"name": "contents", "type": "string"}
        ]
    },
    "primaryType": "Mail",
    "domain": {
        "name": "Ether Mail",
        "version": "1",
        "chainId": 1,
        "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
    },
    "message": {
        "from": {"name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"},
        "to": {"name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"},
        "contents": "Hello, Bob!"
    }
}"#;
