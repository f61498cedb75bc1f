//! APDU (Application Protocol Data Unit) commands for the Ledger Ethereum app

use crate::core::errors::HardwareError;
use crate::hardware::classify::{Fault, RawFault};
use tracing::debug;

/// Largest data field a single APDU carries.
pub const MAX_CHUNK_SIZE: usize = 255;

/// P1 for the first chunk of a multi-part payload
pub const P1_FIRST_CHUNK: u8 = 0x00;
/// P1 for every following chunk
pub const P1_MORE_CHUNKS: u8 = 0x80;

pub const SW_OK: u16 = 0x9000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduClass {
    /// Ethereum app CLA
    Standard = 0xE0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduInstruction {
    GetEthPublicAddress = 0x02,
    SignTransaction = 0x04,
    GetAppConfiguration = 0x06,
    SignPersonalMessage = 0x08,
    SignEip712Hashed = 0x0C,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    pub fn new(cla: ApduClass, ins: ApduInstruction, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla: cla as u8,
            ins: ins as u8,
            p1,
            p2,
            data,
        }
    }

    /// `CLA INS P1 P2 Lc data`
    pub fn to_bytes(&self) -> Result<Vec<u8>, HardwareError> {
        if self.data.len() > MAX_CHUNK_SIZE {
            return Err(HardwareError::transport(format!(
                "APDU data of {} bytes exceeds {}",
                self.data.len(),
                MAX_CHUNK_SIZE
            )));
        }
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.push(self.cla);
        bytes.push(self.ins);
        bytes.push(self.p1);
        bytes.push(self.p2);
        bytes.push(self.data.len() as u8);
        bytes.extend_from_slice(&self.data);

        debug!(
            "APDU command: CLA={:02X} INS={:02X} P1={:02X} P2={:02X} Len={}",
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            self.data.len()
        );

        Ok(bytes)
    }
}

/// Splits `payload` into APDUs of at most [`MAX_CHUNK_SIZE`] bytes.
///
/// An empty payload still yields one command.
pub fn chunk_payload(ins: ApduInstruction, p2: u8, payload: &[u8]) -> Vec<ApduCommand> {
    if payload.is_empty() {
        return vec![ApduCommand::new(ApduClass::Standard, ins, P1_FIRST_CHUNK, p2, Vec::new())];
    }
    payload
        .chunks(MAX_CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let p1 = if i == 0 { P1_FIRST_CHUNK } else { P1_MORE_CHUNKS };
            ApduCommand::new(ApduClass::Standard, ins, p1, p2, chunk.to_vec())
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HardwareError> {
        if bytes.len() < 2 {
            return Err(HardwareError::transport("APDU response too short"));
        }

        let len = bytes.len();
        let sw1 = bytes[len - 2];
        let sw2 = bytes[len - 1];
        let data = bytes[..len - 2].to_vec();

        debug!("APDU response: SW1={:02X} SW2={:02X} DataLen={}", sw1, sw2, data.len());

        Ok(Self { data, sw1, sw2 })
    }

    pub fn is_success(&self) -> bool {
        self.status_code() == SW_OK
    }

    pub fn status_code(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    pub fn error_description(&self) -> String {
        match self.status_code() {
            0x9000 => "Success".to_string(),
            0x5515 => "Device is locked".to_string(),
            0x6511 | 0x6e01 => "Open the Ethereum app on the device".to_string(),
            0x6700 => "Incorrect data length".to_string(),
            0x6982 => "Security status not satisfied".to_string(),
            0x6985 => "Conditions of use not satisfied (denied by the user)".to_string(),
            0x6986 => "Command not allowed (rejected by the user)".to_string(),
            0x6a80 | 0x6a82 => "Invalid data".to_string(),
            0x6b00 => "Wrong parameter".to_string(),
            0x6d00 => "Instruction not supported".to_string(),
            0x6e00 => "Class not supported".to_string(),
            0x6faa => "Device is locked".to_string(),
            other => format!("Unknown status: {:04X}", other),
        }
    }

    /// Payload on `0x9000`, otherwise a raw fault carrying the status word.
    pub fn into_result(self) -> Result<Vec<u8>, Fault> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Fault::Raw(
                RawFault::status(self.status_code()).with_message(self.error_description()),
            ))
        }
    }
}
