//! Hardware wallet integration
//!
//! Two device families sit behind one contract:
//! - Ledger: APDU commands over a byte pipe ([`ledger`])
//! - Trezor: JSON calls through a connect broker ([`trezor`])
//!
//! Vendors are reached only through [`DeviceProvider`] / [`DeviceSession`];
//! everything above that seam (state machine, signer) is vendor-agnostic.

pub mod classify;
pub mod connection;
pub mod eip712;
pub mod hashing;
pub mod ledger;
pub mod path;
pub mod rlp;
pub mod signature;
pub mod signer;
pub mod transaction;
pub mod trezor;

use crate::core::config::HardwareConfig;
use crate::core::errors::{HardwareError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use classify::{classify_apdu_fault, classify_connect_fault, Fault};
use eip712::TypedData;
use path::DerivationPath;
use signature::SignatureComponents;
use transaction::Transaction;

pub use connection::{ConnectionMachine, ConnectionState, Subscription};
pub use signer::{DiscoveredAccount, HardwareSigner};

/// Result of a raw vendor call, before classification.
pub type FaultResult<T> = std::result::Result<T, Fault>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Ledger,
    Trezor,
}

impl Vendor {
    /// Maps a raw fault from this vendor onto the unified taxonomy.
    pub fn classify(&self, fault: impl Into<Fault>) -> HardwareError {
        match self {
            Vendor::Ledger => classify_apdu_fault(fault),
            Vendor::Trezor => classify_connect_fault(fault),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Ledger => f.write_str("ledger"),
            Vendor::Trezor => f.write_str("trezor"),
        }
    }
}

impl FromStr for Vendor {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ledger" => Ok(Vendor::Ledger),
            "trezor" => Ok(Vendor::Trezor),
            other => Err(HardwareError::unsupported(format!(
                "Unknown hardware wallet vendor: {}",
                other
            ))),
        }
    }
}

/// Static facts about a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub vendor: Vendor,
    pub model: String,
    pub firmware_version: Option<String>,
    pub label: Option<String>,
}

/// State of the on-device Ethereum application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    /// Contract data / blind signing allowed.
    pub arbitrary_data_enabled: bool,
}

/// An open channel to one device.
///
/// Failures are returned unclassified; the owning
/// [`ConnectionMachine`] maps them with the vendor's classifier.
#[async_trait]
pub trait DeviceSession: Send {
    fn vendor(&self) -> Vendor;

    fn device_info(&self) -> DeviceInfo;

    async fn app_config(&mut self) -> FaultResult<AppConfig>;

    /// Derives the address at `path`; with `display` the user confirms it on screen.
    async fn get_address(&mut self, path: &DerivationPath, display: bool) -> FaultResult<String>;

    /// EIP-191 personal message signature.
    async fn sign_personal_message(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
    ) -> FaultResult<SignatureComponents>;

    async fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &Transaction,
    ) -> FaultResult<SignatureComponents>;

    async fn sign_typed_data(
        &mut self,
        path: &DerivationPath,
        typed_data: &TypedData,
    ) -> FaultResult<SignatureComponents>;

    /// Releases the underlying handle. The session is not used afterwards.
    async fn close(&mut self) -> FaultResult<()>;
}

/// Acquires sessions for one vendor.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    fn vendor(&self) -> Vendor;

    async fn open(&self) -> FaultResult<Box<dyn DeviceSession>>;
}

/// Picks the provider for `config.vendor`.
///
/// Fails with `UnsupportedOperation` when the vendor library is unavailable:
/// Ledger without the `ledger` feature, Trezor without a broker.
pub fn provider_for(
    config: &HardwareConfig,
    broker: Option<Arc<dyn trezor::ConnectBroker>>,
) -> Result<Box<dyn DeviceProvider>> {
    match config.vendor {
        Vendor::Ledger => ledger_provider(),
        Vendor::Trezor => match broker {
            Some(broker) => Ok(Box::new(trezor::TrezorProvider::new(broker))),
            None => Err(HardwareError::unsupported(
                "Trezor support unavailable: no connect broker configured",
            )),
        },
    }
}

#[cfg(feature = "ledger")]
fn ledger_provider() -> Result<Box<dyn DeviceProvider>> {
    Ok(Box::new(ledger::LedgerProvider::new(Arc::new(
        ledger::transport::HidConnector::default(),
    ))))
}

#[cfg(not(feature = "ledger"))]
fn ledger_provider() -> Result<Box<dyn DeviceProvider>> {
    Err(HardwareError::unsupported(
        "Ledger support unavailable: built without the `ledger` feature",
    ))
}
