//! Vendor fault classification
//!
//! Both classifiers are total: every input maps to exactly one
//! [`HardwareError`], and an already-classified error comes back unchanged.

use crate::core::errors::{HardwareError, HardwareErrorKind};
use tracing::debug;

/// An unclassified vendor fault. Every field is optional; a missing field
/// simply never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFault {
    /// APDU status word.
    pub status_code: Option<u16>,
    /// Connect-broker error code, e.g. `Method_Cancel`.
    pub code: Option<String>,
    pub message: Option<String>,
    /// Error type name, e.g. `TransportOpenUserCancelled`.
    pub name: Option<String>,
}

impl RawFault {
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn message_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.message.as_deref().unwrap_or(fallback)
    }

    /// Message and name, lowercased, for keyword heuristics.
    fn haystack(&self) -> String {
        let mut text = self.message.clone().unwrap_or_default();
        if let Some(name) = &self.name {
            text.push(' ');
            text.push_str(name);
        }
        text.to_lowercase()
    }
}

/// Anything a vendor call can fail with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Classified(HardwareError),
    Raw(RawFault),
}

impl From<HardwareError> for Fault {
    fn from(err: HardwareError) -> Self {
        Fault::Classified(err)
    }
}

impl From<RawFault> for Fault {
    fn from(raw: RawFault) -> Self {
        Fault::Raw(raw)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::Raw(RawFault::message(message))
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::Raw(RawFault::message(message))
    }
}

const UNKNOWN_FAULT: &str = "Unknown hardware wallet error";

fn status_hex(status: u16) -> String {
    format!("0x{:04x}", status)
}

/// Classifies a fault from the APDU/HID vendor.
pub fn classify_apdu_fault(fault: impl Into<Fault>) -> HardwareError {
    let raw = match fault.into() {
        Fault::Classified(err) => return err,
        Fault::Raw(raw) => raw,
    };

    let classified = classify_apdu_status(&raw).unwrap_or_else(|| classify_apdu_message(&raw));
    debug!(
        "APDU fault classified as {:?} (code {})",
        classified.kind(),
        classified.code()
    );
    classified
}

fn classify_apdu_status(raw: &RawFault) -> Option<HardwareError> {
    let status = raw.status_code?;
    let code = status_hex(status);
    let err = match status {
        0x6985 | 0x6986 => HardwareError::with_code(
            HardwareErrorKind::UserRejected,
            raw.message_or("User rejected the request on the device"),
            code,
        ),
        0x6a80 | 0x6a82 => HardwareError::with_code(
            HardwareErrorKind::Unknown,
            raw.message_or("Invalid data"),
            code,
        ),
        0x6b00 => HardwareError::with_code(
            HardwareErrorKind::Unknown,
            raw.message_or("Wrong parameter"),
            code,
        ),
        0x6d00 | 0x6e00 => HardwareError::with_code(
            HardwareErrorKind::UnsupportedOperation,
            raw.message_or("Instruction not supported by the device app"),
            code,
        ),
        0x6faa => HardwareError::with_code(
            HardwareErrorKind::DeviceLocked,
            raw.message_or("Device is locked"),
            code,
        ),
        _ => return None,
    };
    Some(err)
}

fn classify_apdu_message(raw: &RawFault) -> HardwareError {
    let text = raw.haystack();
    let message = raw.message_or(UNKNOWN_FAULT).to_string();

    let kind = if text.contains("denied") || text.contains("rejected") {
        HardwareErrorKind::UserRejected
    } else if text.contains("locked") || text.contains("pin") {
        HardwareErrorKind::DeviceLocked
    } else if text.contains("not found")
        || text.contains("no device")
        || text.contains("transportopenusercancelled")
    {
        HardwareErrorKind::DeviceNotFound
    } else if text.contains("app") && (text.contains("open") || text.contains("launch")) {
        HardwareErrorKind::AppNotOpen
    } else {
        HardwareErrorKind::Unknown
    };

    match raw.status_code {
        Some(status) => HardwareError::with_code(kind, message, status_hex(status)),
        None => HardwareError::new(kind, message),
    }
}

/// Classifies a fault from the connect-broker vendor.
pub fn classify_connect_fault(fault: impl Into<Fault>) -> HardwareError {
    let raw = match fault.into() {
        Fault::Classified(err) => return err,
        Fault::Raw(raw) => raw,
    };

    let classified = classify_connect_code(&raw).unwrap_or_else(|| classify_connect_message(&raw));
    debug!(
        "Connect fault classified as {:?} (code {})",
        classified.kind(),
        classified.code()
    );
    classified
}

fn classify_connect_code(raw: &RawFault) -> Option<HardwareError> {
    let code = raw.code.as_deref()?;
    let (kind, fallback) = match code {
        "Method_Cancel"
        | "Method_Interrupted"
        | "Failure_ActionCancelled"
        | "Method_PermissionsNotGranted" => {
            (HardwareErrorKind::UserRejected, "User cancelled the request")
        }
        "Device_CallInProgress" => {
            return Some(HardwareError::with_code(
                HardwareErrorKind::Unknown,
                "Device is busy",
                code,
            ))
        }
        "Device_InvalidState" | "Init_NotInitialized" => {
            (HardwareErrorKind::DeviceLocked, "Device is locked or not initialized")
        }
        "Transport_Missing" | "Device_NotFound" | "Device_Disconnected" => {
            (HardwareErrorKind::DeviceNotFound, "Device not found")
        }
        _ => return None,
    };
    Some(HardwareError::with_code(kind, raw.message_or(fallback), code))
}

fn classify_connect_message(raw: &RawFault) -> HardwareError {
    let text = raw.haystack();
    let message = raw.message_or(UNKNOWN_FAULT).to_string();

    let kind = if text.contains("cancelled")
        || text.contains("canceled")
        || text.contains("rejected")
        || text.contains("denied")
    {
        HardwareErrorKind::UserRejected
    } else if text.contains("not found") {
        HardwareErrorKind::DeviceNotFound
    } else if text.contains("pin") || text.contains("passphrase") || text.contains("locked") {
        HardwareErrorKind::DeviceLocked
    } else {
        HardwareErrorKind::Unknown
    };

    match &raw.code {
        Some(code) => HardwareError::with_code(kind, message, code.clone()),
        None => HardwareError::new(kind, message),
    }
}
