//! Ledger transport layer
//!
//! APDUs travel over USB HID in 64-byte frames:
//!
//! ```text
//! first:    channel(2) tag(1) seq(2) total_len(2) data(57)
//! follow:   channel(2) tag(1) seq(2) data(59)
//! ```
//!
//! Framing is pure and always compiled; the hidapi-backed connector needs the
//! `ledger` feature.

use crate::core::errors::{HardwareError, Result};
use crate::hardware::FaultResult;
use async_trait::async_trait;

/// Ledger USB vendor id
pub const LEDGER_VENDOR_ID: u16 = 0x2C97;
pub const LEDGER_USAGE_PAGE: u16 = 0xFFA0;

/// HID frame size
pub const HID_PACKET_SIZE: usize = 64;

/// APDU channel
pub const CHANNEL: u16 = 0x0101;

/// HID APDU tag
pub const TAG_APDU: u8 = 0x05;

const FIRST_HEADER_LEN: usize = 7;
const NEXT_HEADER_LEN: usize = 5;
const MAX_FRAMES: u16 = 1024;

/// A byte pipe that carries one APDU exchange at a time.
///
/// `exchange` returns the full response including the trailing status word.
#[async_trait]
pub trait ApduExchange: Send {
    async fn exchange(&mut self, apdu: &[u8]) -> FaultResult<Vec<u8>>;

    async fn close(&mut self) -> FaultResult<()>;

    /// USB product string, when the transport knows it.
    fn product_name(&self) -> Option<String> {
        None
    }
}

/// Opens [`ApduExchange`] pipes to a device.
#[async_trait]
pub trait ApduConnector: Send + Sync {
    async fn open(&self) -> FaultResult<Box<dyn ApduExchange>>;
}

/// Splits an APDU into HID frames (without the report id byte).
pub fn build_hid_packets(apdu: &[u8]) -> Vec<[u8; HID_PACKET_SIZE]> {
    let mut packets = Vec::new();
    let total_len = apdu.len();
    let mut offset = 0;
    let mut sequence = 0u16;

    loop {
        let mut packet = [0u8; HID_PACKET_SIZE];
        packet[0..2].copy_from_slice(&CHANNEL.to_be_bytes());
        packet[2] = TAG_APDU;
        packet[3..5].copy_from_slice(&sequence.to_be_bytes());

        let data_start = if sequence == 0 {
            packet[5..7].copy_from_slice(&(total_len as u16).to_be_bytes());
            FIRST_HEADER_LEN
        } else {
            NEXT_HEADER_LEN
        };
        let chunk_size = (HID_PACKET_SIZE - data_start).min(total_len - offset);
        packet[data_start..data_start + chunk_size]
            .copy_from_slice(&apdu[offset..offset + chunk_size]);
        offset += chunk_size;

        packets.push(packet);
        sequence += 1;

        if offset >= total_len {
            break;
        }
    }

    packets
}

/// Reassembles a response from HID frames read off the device.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    data: Vec<u8>,
    expected_len: Option<usize>,
    sequence: u16,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame. Returns the complete response once all bytes arrived.
    ///
    /// Frames from other channels or with another tag are skipped.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        if frame.len() < FIRST_HEADER_LEN {
            return Err(HardwareError::transport("HID frame too short"));
        }
        let channel = u16::from_be_bytes([frame[0], frame[1]]);
        if channel != CHANNEL || frame[2] != TAG_APDU {
            return Ok(None);
        }

        let sequence = u16::from_be_bytes([frame[3], frame[4]]);
        if sequence != self.sequence {
            return Err(HardwareError::transport(format!(
                "HID sequence mismatch: expected {}, got {}",
                self.sequence, sequence
            )));
        }
        if self.sequence >= MAX_FRAMES {
            return Err(HardwareError::transport("Too many HID frames in response"));
        }

        if sequence == 0 {
            self.expected_len = Some(u16::from_be_bytes([frame[5], frame[6]]) as usize);
            self.data.extend_from_slice(&frame[FIRST_HEADER_LEN..]);
        } else {
            self.data.extend_from_slice(&frame[NEXT_HEADER_LEN..]);
        }
        self.sequence += 1;

        match self.expected_len {
            Some(len) if self.data.len() >= len => {
                let mut out = std::mem::take(&mut self.data);
                out.truncate(len);
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(feature = "ledger")]
pub use hid::{HidConnector, HidTransport};

#[cfg(feature = "ledger")]
mod hid {
    use super::*;
    use crate::hardware::classify::RawFault;
    use hidapi::{HidApi, HidDevice};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{debug, info, warn};

    fn join_error(e: tokio::task::JoinError) -> HardwareError {
        HardwareError::transport(format!("HID worker failed: {}", e))
    }

    /// Opens the first attached Ledger.
    #[derive(Debug, Clone)]
    pub struct HidConnector {
        pub read_timeout: Duration,
    }

    impl Default for HidConnector {
        fn default() -> Self {
            Self {
                read_timeout: Duration::from_secs(120),
            }
        }
    }

    #[async_trait]
    impl ApduConnector for HidConnector {
        async fn open(&self) -> FaultResult<Box<dyn ApduExchange>> {
            let read_timeout = self.read_timeout;
            let transport = tokio::task::spawn_blocking(move || HidTransport::open(read_timeout))
                .await
                .map_err(join_error)??;
            Ok(Box::new(transport))
        }
    }

    /// Ledger HID transport
    pub struct HidTransport {
        device: Arc<Mutex<HidDevice>>,
        product: Option<String>,
        read_timeout: Duration,
    }

    impl HidTransport {
        /// Blocking; call from a blocking context.
        pub fn open(read_timeout: Duration) -> FaultResult<Self> {
            info!("Connecting to Ledger device...");

            let api = HidApi::new()
                .map_err(|e| HardwareError::transport(format!("HID API init failed: {}", e)))?;

            let device_info = api
                .device_list()
                .filter(|d| d.vendor_id() == LEDGER_VENDOR_ID)
                .find(|d| d.usage_page() == LEDGER_USAGE_PAGE)
                .ok_or_else(|| RawFault::message("No Ledger device found. Connect and unlock it."))?;

            let device = device_info.open_device(&api).map_err(|e| {
                RawFault::message(format!("Failed to open Ledger device: {}", e))
            })?;

            let product = device_info.product_string().map(str::to_string);
            info!("Connected to Ledger device {:?}", product);

            Ok(Self {
                device: Arc::new(Mutex::new(device)),
                product,
                read_timeout,
            })
        }
    }

    fn exchange_blocking(
        device: &HidDevice,
        apdu: &[u8],
        read_timeout: Duration,
    ) -> Result<Vec<u8>> {
        let packets = build_hid_packets(apdu);
        for (i, packet) in packets.iter().enumerate() {
            debug!("Sending HID frame {}/{}", i + 1, packets.len());
            // report id 0 precedes every frame
            let mut report = Vec::with_capacity(HID_PACKET_SIZE + 1);
            report.push(0x00);
            report.extend_from_slice(packet);
            device
                .write(&report)
                .map_err(|e| HardwareError::transport(format!("HID write failed: {}", e)))?;
        }

        let mut assembler = ResponseAssembler::new();
        loop {
            let mut frame = [0u8; HID_PACKET_SIZE];
            let read = device
                .read_timeout(&mut frame, read_timeout.as_millis() as i32)
                .map_err(|e| HardwareError::transport(format!("HID read failed: {}", e)))?;
            if read == 0 {
                return Err(HardwareError::timeout("Timed out waiting for the Ledger device"));
            }
            if let Some(response) = assembler.push(&frame[..read])? {
                return Ok(response);
            }
        }
    }

    #[async_trait]
    impl ApduExchange for HidTransport {
        async fn exchange(&mut self, apdu: &[u8]) -> FaultResult<Vec<u8>> {
            let device = Arc::clone(&self.device);
            let apdu = apdu.to_vec();
            let read_timeout = self.read_timeout;
            let response = tokio::task::spawn_blocking(move || {
                let device = device.lock();
                exchange_blocking(&device, &apdu, read_timeout)
            })
            .await
            .map_err(join_error)?;
            if let Err(e) = &response {
                warn!("Ledger HID exchange failed: {}", e);
            }
            Ok(response?)
        }

        async fn close(&mut self) -> FaultResult<()> {
            // hidapi closes the handle when the last reference drops
            debug!("Closing Ledger HID transport");
            Ok(())
        }

        fn product_name(&self) -> Option<String> {
            self.product.clone()
        }
    }
}
