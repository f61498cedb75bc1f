//! Trezor hardware wallet integration
//!
//! Trezor devices are reached through a connect broker; this crate never
//! speaks the device wire protocol directly.

pub mod connect;

pub use connect::{BrokerResponse, ConnectBroker, TrezorProvider, TrezorSession};
