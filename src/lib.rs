#![allow(clippy::len_zero)]
// src/lib.rs

pub mod core;
pub mod hardware;
pub mod tools;

pub use crate::core::config::{HardwareConfig, PathStyle};
pub use crate::core::errors::{HardwareError, HardwareErrorKind, RecoveryPolicy, Result};
pub use hardware::{
    ConnectionMachine, ConnectionState, DeviceInfo, DeviceProvider, DeviceSession, DiscoveredAccount,
    HardwareSigner, Subscription, Vendor,
};
