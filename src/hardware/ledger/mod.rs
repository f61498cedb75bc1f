//! Ledger hardware wallet integration
//!
//! - `apdu`: command/response encoding and chunking
//! - `transport`: HID framing and the byte-pipe capability
//! - `app`: the Ethereum app session and provider

pub mod apdu;
pub mod app;
pub mod transport;

pub use app::{LedgerProvider, LedgerSession};
pub use transport::{ApduConnector, ApduExchange};
