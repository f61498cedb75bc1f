//! Signing facade
//!
//! Wraps a [`ConnectionMachine`] with the configured deadlines, account
//! discovery and canonical signature output.

use crate::core::config::{HardwareConfig, PathStyle};
use crate::core::errors::{HardwareError, HardwareErrorKind, Result};
use crate::hardware::connection::{ConnectionMachine, ConnectionState, Subscription, VerifiedAddress};
use crate::hardware::eip712::TypedData;
use crate::hardware::hashing::personal_message_hash;
use crate::hardware::path::{build_path, get_alternate_path, get_standard_path, DerivationPath};
use crate::hardware::signature::{recover_address, to_canonical_signature, SignatureComponents};
use crate::hardware::transaction::Transaction;
use crate::hardware::trezor::ConnectBroker;
use crate::hardware::{provider_for, DeviceInfo, DeviceProvider, Vendor};
use crate::tools::async_support::{execute_with_timeout, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SIGNATURE_MISMATCH: &str = "SIGNATURE_MISMATCH";

/// One address found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAccount {
    pub address: String,
    pub path: String,
    pub index: u32,
}

pub struct HardwareSigner {
    machine: ConnectionMachine,
    config: HardwareConfig,
}

impl HardwareSigner {
    pub fn new(provider: Box<dyn DeviceProvider>, config: HardwareConfig) -> Self {
        let machine = ConnectionMachine::new(provider).with_connect_timeout(config.connect_timeout());
        Self { machine, config }
    }

    /// Validates `config` and picks the provider for its vendor.
    pub fn from_config(
        config: HardwareConfig,
        broker: Option<Arc<dyn ConnectBroker>>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = provider_for(&config, broker)?;
        Ok(Self::new(provider, config))
    }

    pub fn with_machine(machine: ConnectionMachine, config: HardwareConfig) -> Self {
        Self { machine, config }
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    pub fn vendor(&self) -> Vendor {
        self.machine.vendor()
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        self.machine.device_info()
    }

    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectionState, Option<&HardwareError>) + Send + Sync + 'static,
    {
        self.machine.on_state_change(listener)
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.machine.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.machine.disconnect().await
    }

    fn deadline(&self, operation: &str) -> TimeoutConfig {
        TimeoutConfig::new(self.config.operation_timeout(), operation)
    }

    /// Path for account `index` under the configured [`PathStyle`].
    pub fn path_for_index(&self, index: u32) -> Result<DerivationPath> {
        match self.config.path_style {
            PathStyle::Standard => get_standard_path(0, index),
            PathStyle::Alternate => get_alternate_path(index),
            PathStyle::Base => build_path(&self.config.base_path, index),
        }
    }

    pub async fn get_address(&mut self, path: &DerivationPath) -> Result<String> {
        let deadline = self.deadline("get_address");
        execute_with_timeout(self.machine.get_address(path, false), deadline).await
    }

    /// Addresses for indices `start..start + count`, in order.
    pub async fn discover_accounts(&mut self, start: u32, count: u32) -> Result<Vec<DiscoveredAccount>> {
        info!(
            "Discovering {} accounts from index {} ({:?} paths)",
            count, start, self.config.path_style
        );
        let end = start.checked_add(count).ok_or_else(|| {
            HardwareError::invalid_path(format!("Account range {}+{} overflows", start, count))
        })?;

        let mut accounts = Vec::with_capacity(count as usize);
        for index in start..end {
            let path = self.path_for_index(index)?;
            let address = self.get_address(&path).await?;
            debug!("Account {} at {}: {}", index, path, address);
            accounts.push(DiscoveredAccount {
                address,
                path: path.to_string(),
                index,
            });
        }
        Ok(accounts)
    }

    /// [`discover_accounts`](Self::discover_accounts) from index 0 with the
    /// configured `discovery_count`.
    pub async fn default_accounts(&mut self) -> Result<Vec<DiscoveredAccount>> {
        let count = self.config.discovery_count;
        self.discover_accounts(0, count).await
    }

    /// Shows the address on the device; bounded by the operation timeout.
    pub async fn verify_address(&mut self, path: &DerivationPath) -> Result<VerifiedAddress> {
        let deadline = self.deadline("verify_address");
        execute_with_timeout(self.machine.verify_address(path), deadline).await
    }

    /// EIP-191 personal message signature as `0x || r || s || v`.
    pub async fn sign_message(&mut self, path: &DerivationPath, message: &[u8]) -> Result<String> {
        let deadline = self.deadline("sign_message");
        let components =
            execute_with_timeout(self.machine.sign_personal_message(path, message), deadline).await?;
        self.finish(path, &components, personal_message_hash(message)).await
    }

    pub async fn sign_transaction(&mut self, path: &DerivationPath, transaction: &Transaction) -> Result<String> {
        let deadline = self.deadline("sign_transaction");
        let components =
            execute_with_timeout(self.machine.sign_transaction(path, transaction), deadline).await?;
        self.finish(path, &components, transaction.signing_hash()).await
    }

    pub async fn sign_typed_data(&mut self, path: &DerivationPath, typed_data: &TypedData) -> Result<String> {
        // reject malformed payloads before the device prompts the user
        let hash = typed_data.signing_hash()?;
        let deadline = self.deadline("sign_typed_data");
        let components =
            execute_with_timeout(self.machine.sign_typed_data(path, typed_data), deadline).await?;
        self.finish(path, &components, hash).await
    }

    async fn finish(
        &mut self,
        path: &DerivationPath,
        components: &SignatureComponents,
        hash: [u8; 32],
    ) -> Result<String> {
        let signature = to_canonical_signature(components)?;
        if self.config.verify_signatures {
            self.check_signer(path, &signature, &hash).await?;
        }
        Ok(signature)
    }

    async fn check_signer(&mut self, path: &DerivationPath, signature: &str, hash: &[u8; 32]) -> Result<()> {
        let recovered = recover_address(hash, signature)?;
        let expected = self.get_address(path).await?;
        if !recovered.eq_ignore_ascii_case(&expected) {
            warn!("Signature recovers to {} but {} owns {}", recovered, path, expected);
            return Err(HardwareError::with_code(
                HardwareErrorKind::Unknown,
                format!(
                    "Signature recovers to {} instead of the device address {}",
                    recovered, expected
                ),
                SIGNATURE_MISMATCH,
            ));
        }
        debug!("Signature verified against {}", expected);
        Ok(())
    }
}

impl std::fmt::Debug for HardwareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSigner")
            .field("machine", &self.machine)
            .field("config", &self.config)
            .finish()
    }
}
