use crate::core::errors::{HardwareError, HardwareErrorKind, Result};
use crate::hardware::path::is_valid_path;
use crate::hardware::Vendor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const ENV_VENDOR: &str = "HW_WALLET_VENDOR";
pub const ENV_BASE_PATH: &str = "HW_WALLET_BASE_PATH";
pub const ENV_CONNECT_TIMEOUT: &str = "HW_WALLET_CONNECT_TIMEOUT";

/// Which path generator account discovery uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// `m/44'/60'/0'/0/{index}`
    Standard,
    /// `m/44'/60'/{index}'/0/0`
    Alternate,
    /// `{base_path}/{index}`
    Base,
}

/// Hardware wallet configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Device family to talk to
    #[serde(default = "HardwareConfig::default_vendor")]
    pub vendor: Vendor,

    /// Connect deadline (seconds)
    #[serde(default = "HardwareConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Deadline for each device operation (seconds); covers on-device confirmation
    #[serde(default = "HardwareConfig::default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Base for `PathStyle::Base` discovery
    #[serde(default = "HardwareConfig::default_base_path")]
    pub base_path: String,

    /// Accounts returned by default discovery
    #[serde(default = "HardwareConfig::default_discovery_count")]
    pub discovery_count: u32,

    #[serde(default = "HardwareConfig::default_path_style")]
    pub path_style: PathStyle,

    /// Recover every signature and compare against the device address
    #[serde(default = "HardwareConfig::default_verify_signatures")]
    pub verify_signatures: bool,
}

impl HardwareConfig {
    fn default_vendor() -> Vendor { Vendor::Ledger }
    fn default_connect_timeout() -> u64 { 30 }
    fn default_operation_timeout() -> u64 { 120 }
    fn default_base_path() -> String { "m/44'/60'/0'/0".to_string() }
    fn default_discovery_count() -> u32 { 5 }
    fn default_path_style() -> PathStyle { PathStyle::Standard }
    fn default_verify_signatures() -> bool { true }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            HardwareError::with_code(
                HardwareErrorKind::Unknown,
                format!("Failed to read config {}: {}", path.display(), e),
                "INVALID_CONFIG",
            )
        })?;
        debug!("Loaded hardware config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Applies `HW_WALLET_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an injectable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(vendor) = lookup(ENV_VENDOR) {
            self.vendor = vendor.parse()?;
        }
        if let Some(base) = lookup(ENV_BASE_PATH) {
            self.base_path = base;
        }
        if let Some(timeout) = lookup(ENV_CONNECT_TIMEOUT) {
            self.connect_timeout_secs = timeout.trim().parse().map_err(|_| {
                invalid_config(format!("{} must be a number of seconds", ENV_CONNECT_TIMEOUT))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_path(&self.base_path) {
            return Err(HardwareError::invalid_path(format!(
                "Invalid base path: {}",
                self.base_path
            )));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(invalid_config("Timeouts must be greater than zero"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn invalid_config(message: impl Into<String>) -> HardwareError {
    HardwareError::with_code(
        HardwareErrorKind::Unknown,
        message,
        "INVALID_CONFIG",
    )
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            vendor: Self::default_vendor(),
            connect_timeout_secs: Self::default_connect_timeout(),
            operation_timeout_secs: Self::default_operation_timeout(),
            base_path: Self::default_base_path(),
            discovery_count: Self::default_discovery_count(),
            path_style: Self::default_path_style(),
            verify_signatures: Self::default_verify_signatures(),
        }
    }
}
