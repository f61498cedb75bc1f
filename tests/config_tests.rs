//! Configuration loading

use hw_wallet_bridge::core::config::{ENV_BASE_PATH, ENV_CONNECT_TIMEOUT, ENV_VENDOR};
use hw_wallet_bridge::{HardwareConfig, HardwareErrorKind, PathStyle, Vendor};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_partial_file_uses_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "vendor = \"trezor\"\npath_style = \"base\"\nbase_path = \"m/44'/60'/2'\"").unwrap();

    let config = HardwareConfig::from_file(file.path()).unwrap();
    assert_eq!(config.vendor, Vendor::Trezor);
    assert_eq!(config.path_style, PathStyle::Base);
    assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    assert_eq!(config.operation_timeout(), Duration::from_secs(120));
    assert_eq!(config.discovery_count, 5);
    assert!(config.verify_signatures);
}

#[test]
fn test_missing_file() {
    let err = HardwareConfig::from_file("/nonexistent/hw-wallet.toml").unwrap_err();
    assert_eq!(err.code(), "INVALID_CONFIG");
}

#[test]
fn test_invalid_base_path_rejected() {
    let err = HardwareConfig::from_toml_str("base_path = \"m/44x\"").unwrap_err();
    assert_eq!(err.kind(), HardwareErrorKind::InvalidPath);
}

#[test]
fn test_overrides() {
    let config = HardwareConfig::default()
        .with_overrides(|key| match key {
            k if k == ENV_VENDOR => Some("trezor".to_string()),
            k if k == ENV_BASE_PATH => Some("m/44'/60'/9'".to_string()),
            k if k == ENV_CONNECT_TIMEOUT => Some("12".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.vendor, Vendor::Trezor);
    assert_eq!(config.base_path, "m/44'/60'/9'");
    assert_eq!(config.connect_timeout(), Duration::from_secs(12));

    let err = HardwareConfig::default()
        .with_overrides(|key| (key == ENV_VENDOR).then(|| "keepkey".to_string()))
        .unwrap_err();
    assert_eq!(err.kind(), HardwareErrorKind::UnsupportedOperation);
}
