//! Trezor Connect integration
//!
//! Every operation is one broker call `method(params) -> {success, payload}`.
//! On failure the payload carries `error` (message) and `code`
//! (e.g. `Method_Cancel`), which feed the connect classifier.

use crate::core::errors::HardwareError;
use crate::hardware::classify::{Fault, RawFault};
use crate::hardware::eip712::TypedData;
use crate::hardware::path::DerivationPath;
use crate::hardware::signature::{parse_signature_components, split_signature, SignatureComponents};
use crate::hardware::transaction::{Address, Transaction};
use crate::hardware::{AppConfig, DeviceInfo, DeviceProvider, DeviceSession, FaultResult, Vendor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const METHOD_GET_FEATURES: &str = "getFeatures";
pub const METHOD_GET_ADDRESS: &str = "ethereumGetAddress";
pub const METHOD_SIGN_MESSAGE: &str = "ethereumSignMessage";
pub const METHOD_SIGN_TRANSACTION: &str = "ethereumSignTransaction";
pub const METHOD_SIGN_TYPED_DATA: &str = "ethereumSignTypedData";
pub const METHOD_DISPOSE: &str = "dispose";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerResponse {
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
}

impl BrokerResponse {
    pub fn ok(payload: Value) -> Self {
        Self { success: true, payload }
    }

    pub fn failure(code: &str, error: &str) -> Self {
        Self {
            success: false,
            payload: json!({ "code": code, "error": error }),
        }
    }
}

/// The connect library as seen from Rust.
///
/// `Err` is for failures of the call itself (bridge unreachable, broker not
/// initialized); device-side failures come back as `success: false`.
#[async_trait]
pub trait ConnectBroker: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> FaultResult<BrokerResponse>;
}

fn malformed(method: &str) -> Fault {
    Fault::Classified(HardwareError::transport(format!(
        "Malformed {} response payload",
        method
    )))
}

fn payload_str<'a>(payload: &'a Value, key: &str, method: &str) -> FaultResult<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(method))
}

async fn call_broker(broker: &dyn ConnectBroker, method: &str, params: Value) -> FaultResult<Value> {
    debug!("Trezor Connect call: {}", method);
    let response = broker.call(method, params).await?;
    if response.success {
        return Ok(response.payload);
    }
    let payload = &response.payload;
    let fault = RawFault {
        code: payload.get("code").and_then(Value::as_str).map(str::to_string),
        message: payload.get("error").and_then(Value::as_str).map(str::to_string),
        ..Default::default()
    };
    debug!("Trezor Connect {} failed: {:?}", method, fault);
    Err(fault.into())
}

fn device_info_from_features(features: &Value) -> DeviceInfo {
    let model = features
        .get("model")
        .and_then(Value::as_str)
        .map(|m| format!("Trezor Model {}", m))
        .unwrap_or_else(|| "Trezor".to_string());
    let version = |key: &str| features.get(key).and_then(Value::as_u64);
    let firmware_version = match (version("major_version"), version("minor_version"), version("patch_version")) {
        (Some(major), Some(minor), Some(patch)) => Some(format!("{}.{}.{}", major, minor, patch)),
        _ => None,
    };
    DeviceInfo {
        vendor: Vendor::Trezor,
        model,
        firmware_version,
        label: features.get("label").and_then(Value::as_str).map(str::to_string),
    }
}

fn quantity(value: u128) -> String {
    format!("{:#x}", value)
}

fn to_param(to: &Option<Address>) -> String {
    to.as_ref().map(Address::to_string).unwrap_or_default()
}

/// `transaction` object for `ethereumSignTransaction`.
pub fn transaction_params(transaction: &Transaction) -> Value {
    match transaction {
        Transaction::Legacy(tx) => json!({
            "to": to_param(&tx.to),
            "value": quantity(tx.value),
            "gasPrice": quantity(tx.gas_price),
            "gasLimit": quantity(tx.gas_limit as u128),
            "nonce": quantity(tx.nonce as u128),
            "data": format!("0x{}", hex::encode(&tx.data)),
            "chainId": tx.chain_id,
        }),
        Transaction::Eip1559(tx) => json!({
            "to": to_param(&tx.to),
            "value": quantity(tx.value),
            "maxFeePerGas": quantity(tx.max_fee_per_gas),
            "maxPriorityFeePerGas": quantity(tx.max_priority_fee_per_gas),
            "gasLimit": quantity(tx.gas_limit as u128),
            "nonce": quantity(tx.nonce as u128),
            "data": format!("0x{}", hex::encode(&tx.data)),
            "chainId": tx.chain_id,
        }),
    }
}

fn parse_v(text: &str, method: &str) -> FaultResult<u64> {
    let parsed = match text.strip_prefix("0x") {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|_| malformed(method))
}

pub struct TrezorSession {
    broker: Arc<dyn ConnectBroker>,
    info: DeviceInfo,
}

impl TrezorSession {
    pub fn new(broker: Arc<dyn ConnectBroker>, info: DeviceInfo) -> Self {
        Self { broker, info }
    }

    async fn call(&self, method: &str, params: Value) -> FaultResult<Value> {
        call_broker(self.broker.as_ref(), method, params).await
    }

    fn signature_from_payload(payload: &Value, method: &str) -> FaultResult<SignatureComponents> {
        let signature = payload_str(payload, "signature", method)?;
        let hex_sig = if signature.starts_with("0x") {
            signature.to_string()
        } else {
            format!("0x{}", signature)
        };
        Ok(split_signature(&hex_sig)?)
    }
}

#[async_trait]
impl DeviceSession for TrezorSession {
    fn vendor(&self) -> Vendor {
        Vendor::Trezor
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    async fn app_config(&mut self) -> FaultResult<AppConfig> {
        let features = self.call(METHOD_GET_FEATURES, json!({})).await?;
        self.info = device_info_from_features(&features);
        Ok(AppConfig {
            name: "Ethereum".to_string(),
            version: self
                .info
                .firmware_version
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            // firmware shows contract data for every transaction
            arbitrary_data_enabled: true,
        })
    }

    async fn get_address(&mut self, path: &DerivationPath, display: bool) -> FaultResult<String> {
        info!("Fetching Ethereum address for {}", path);
        let payload = self
            .call(
                METHOD_GET_ADDRESS,
                json!({ "path": path.to_string(), "showOnTrezor": display }),
            )
            .await?;
        let address = payload_str(&payload, "address", METHOD_GET_ADDRESS)?;
        Ok(address.to_ascii_lowercase())
    }

    async fn sign_personal_message(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
    ) -> FaultResult<SignatureComponents> {
        info!("Trezor signing personal message ({} bytes) at {}", message.len(), path);
        let payload = self
            .call(
                METHOD_SIGN_MESSAGE,
                json!({ "path": path.to_string(), "message": hex::encode(message), "hex": true }),
            )
            .await?;
        Self::signature_from_payload(&payload, METHOD_SIGN_MESSAGE)
    }

    async fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &Transaction,
    ) -> FaultResult<SignatureComponents> {
        info!(
            "Trezor signing transaction on chain {} at {}",
            transaction.chain_id(),
            path
        );
        let payload = self
            .call(
                METHOD_SIGN_TRANSACTION,
                json!({ "path": path.to_string(), "transaction": transaction_params(transaction) }),
            )
            .await?;
        let v = parse_v(payload_str(&payload, "v", METHOD_SIGN_TRANSACTION)?, METHOD_SIGN_TRANSACTION)?;
        let r = payload_str(&payload, "r", METHOD_SIGN_TRANSACTION)?;
        let s = payload_str(&payload, "s", METHOD_SIGN_TRANSACTION)?;
        Ok(parse_signature_components(r, s, v))
    }

    async fn sign_typed_data(
        &mut self,
        path: &DerivationPath,
        typed_data: &TypedData,
    ) -> FaultResult<SignatureComponents> {
        info!("Trezor signing typed data {} at {}", typed_data.primary_type, path);
        let domain_separator = typed_data.domain_separator()?;
        let message_hash = typed_data.message_hash()?;
        let mut params = json!({
            "path": path.to_string(),
            "data": serde_json::to_value(typed_data).map_err(HardwareError::from)?,
            "metamask_v4_compat": true,
            "domain_separator_hash": hex::encode(domain_separator),
        });
        if let Some(hash) = message_hash {
            params["message_hash"] = Value::String(hex::encode(hash));
        }
        let payload = self.call(METHOD_SIGN_TYPED_DATA, params).await?;
        Self::signature_from_payload(&payload, METHOD_SIGN_TYPED_DATA)
    }

    async fn close(&mut self) -> FaultResult<()> {
        self.call(METHOD_DISPOSE, json!({})).await.map(|_| ())
    }
}

/// Opens [`TrezorSession`]s; opening reads the device features.
pub struct TrezorProvider {
    broker: Arc<dyn ConnectBroker>,
}

impl TrezorProvider {
    pub fn new(broker: Arc<dyn ConnectBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl DeviceProvider for TrezorProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Trezor
    }

    async fn open(&self) -> FaultResult<Box<dyn DeviceSession>> {
        let features = call_broker(self.broker.as_ref(), METHOD_GET_FEATURES, json!({})).await?;
        let info = device_info_from_features(&features);
        info!("Trezor features: {} {:?}", info.model, info.firmware_version);
        Ok(Box::new(TrezorSession::new(Arc::clone(&self.broker), info)))
    }
}
