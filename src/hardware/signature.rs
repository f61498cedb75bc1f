//! ECDSA signature normalization
//!
//! Every signature handed back to a caller goes through
//! [`to_canonical_signature`]: low-S form, `v` in `{27, 28}` or chain-protected
//! (`>= 35`), serialized as `0x || r || s || v`.

use crate::core::errors::{HardwareError, HardwareErrorKind, Result};
use crate::hardware::hashing::keccak256;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use std::cmp::Ordering;
use tracing::debug;

/// secp256k1 group order `n`.
pub const SECP256K1_N: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

/// `n / 2`, rounded down.
pub const SECP256K1_HALF_N: [u8; 32] = [
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
];

const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";

/// A signature scalar as delivered by a vendor: hex text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarInput {
    Hex(String),
    Bytes(Vec<u8>),
}

impl From<&str> for ScalarInput {
    fn from(s: &str) -> Self {
        ScalarInput::Hex(s.to_string())
    }
}

impl From<String> for ScalarInput {
    fn from(s: String) -> Self {
        ScalarInput::Hex(s)
    }
}

impl From<&[u8]> for ScalarInput {
    fn from(b: &[u8]) -> Self {
        ScalarInput::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for ScalarInput {
    fn from(b: Vec<u8>) -> Self {
        ScalarInput::Bytes(b)
    }
}

impl From<[u8; 32]> for ScalarInput {
    fn from(b: [u8; 32]) -> Self {
        ScalarInput::Bytes(b.to_vec())
    }
}

impl ScalarInput {
    /// Lowercase hex without prefix, left-padded to 64 digits.
    fn to_canonical_hex(&self) -> String {
        let digits = match self {
            ScalarInput::Hex(s) => {
                let trimmed = s.trim();
                let stripped = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                    .unwrap_or(trimmed);
                stripped.to_ascii_lowercase()
            }
            ScalarInput::Bytes(b) => hex::encode(b),
        };
        pad_hex(digits)
    }
}

fn pad_hex(digits: String) -> String {
    if digits.len() >= 64 {
        digits
    } else {
        format!("{:0>64}", digits)
    }
}

/// `{r, s, v}` with `r`/`s` kept as canonical `0x`-prefixed hex.
///
/// Only built through [`parse_signature_components`], so `v` is always
/// normalized. `r`/`s` may still be out of range; check with
/// [`is_valid_signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureComponents {
    r: String,
    s: String,
    v: u64,
}

impl SignatureComponents {
    pub fn r(&self) -> &str {
        &self.r
    }

    pub fn s(&self) -> &str {
        &self.s
    }

    pub fn v(&self) -> u64 {
        self.v
    }

    /// yParity encoded by `v`.
    pub fn parity(&self) -> u8 {
        recovery_parity(self.v)
    }
}

/// Maps 0/1 to 27/28, keeps 27/28 and chain-protected values, and folds
/// anything else onto 27/28 by parity.
pub fn normalize_recovery_value(v: u64) -> u64 {
    match v {
        0 | 1 => v + 27,
        27 | 28 => v,
        v if v >= 35 => v,
        v => (v % 2) + 27,
    }
}

fn recovery_parity(v: u64) -> u8 {
    if v >= 35 {
        ((v - 35) % 2) as u8
    } else {
        ((v + 1) % 2) as u8
    }
}

/// Parity-flipped counterpart of a normalized `v`.
///
/// Both 27/28 and `chainId*2+35+parity` keep parity 0 on odd values.
fn flip_parity(v: u64) -> u64 {
    if v % 2 == 1 {
        v + 1
    } else {
        v - 1
    }
}

pub fn parse_signature_components(
    r: impl Into<ScalarInput>,
    s: impl Into<ScalarInput>,
    v: u64,
) -> SignatureComponents {
    SignatureComponents {
        r: format!("0x{}", r.into().to_canonical_hex()),
        s: format!("0x{}", s.into().to_canonical_hex()),
        v: normalize_recovery_value(v),
    }
}

fn scalar_bytes(hex_str: &str) -> Option<[u8; 32]> {
    let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    if digits.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out).ok()?;
    Some(out)
}

fn compare_bytes(a: &[u8; 32], b: &[u8; 32]) -> Ordering {
    a.iter().cmp(b.iter())
}

/// `a - b` over 32-byte big-endian integers, assuming `a >= b`.
fn subtract(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut result = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let diff = a[i] as i16 - b[i] as i16 - borrow;
        if diff < 0 {
            result[i] = (diff + 256) as u8;
            borrow = 1;
        } else {
            result[i] = diff as u8;
            borrow = 0;
        }
    }
    result
}

fn is_valid_scalar(bytes: &[u8; 32]) -> bool {
    bytes.iter().any(|b| *b != 0) && compare_bytes(bytes, &SECP256K1_N) == Ordering::Less
}

/// True when both `r` and `s` are 32-byte scalars in `[1, n-1]`.
pub fn is_valid_signature(components: &SignatureComponents) -> bool {
    match (scalar_bytes(&components.r), scalar_bytes(&components.s)) {
        (Some(r), Some(s)) => is_valid_scalar(&r) && is_valid_scalar(&s),
        _ => false,
    }
}

fn low_s_bytes(s: &[u8; 32]) -> ([u8; 32], bool) {
    if compare_bytes(s, &SECP256K1_HALF_N) == Ordering::Greater
        && compare_bytes(s, &SECP256K1_N) == Ordering::Less
    {
        (subtract(&SECP256K1_N, s), true)
    } else {
        (*s, false)
    }
}

/// Replaces `s` with `n - s` when `s > n/2`.
///
/// Input that is not a 32-byte scalar below `n` comes back in canonical hex
/// form but otherwise untouched.
pub fn canonicalize_low_s(s: &str) -> String {
    let canonical = format!("0x{}", ScalarInput::from(s).to_canonical_hex());
    match scalar_bytes(&canonical) {
        Some(bytes) => {
            let (low, _) = low_s_bytes(&bytes);
            format!("0x{}", hex::encode(low))
        }
        None => canonical,
    }
}

fn encode_v(v: u64) -> String {
    let digits = format!("{:02x}", v);
    if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits
    }
}

/// `0x || r || s || v` without touching `s`.
pub fn assemble_signature(components: &SignatureComponents) -> Result<String> {
    if !is_valid_signature(components) {
        return Err(HardwareError::with_code(
            HardwareErrorKind::Unknown,
            "Signature scalars are not valid secp256k1 values",
            INVALID_SIGNATURE,
        ));
    }
    Ok(format!(
        "0x{}{}{}",
        &components.r[2..],
        &components.s[2..],
        encode_v(components.v)
    ))
}

/// Low-S form, then [`assemble_signature`].
///
/// When `s` is replaced the recovery parity flips with it, so the result
/// still recovers to the signing key.
pub fn to_canonical_signature(components: &SignatureComponents) -> Result<String> {
    let canonical = match scalar_bytes(&components.s) {
        Some(s) => {
            let (low, flipped) = low_s_bytes(&s);
            if flipped {
                debug!("High-S signature replaced with n - s");
                SignatureComponents {
                    r: components.r.clone(),
                    s: format!("0x{}", hex::encode(low)),
                    v: flip_parity(components.v),
                }
            } else {
                components.clone()
            }
        }
        None => components.clone(),
    };
    assemble_signature(&canonical)
}

/// Splits a 65-byte `0x`-prefixed signature into components.
pub fn split_signature(signature: &str) -> Result<SignatureComponents> {
    let digits = signature.strip_prefix("0x").unwrap_or(signature);
    if !digits.is_ascii() {
        return Err(HardwareError::with_code(
            HardwareErrorKind::Unknown,
            "Signature is not hex text",
            INVALID_SIGNATURE,
        ));
    }
    if digits.len() < 130 || digits.len() % 2 != 0 {
        return Err(HardwareError::with_code(
            HardwareErrorKind::Unknown,
            format!("Signature has unexpected length {}", digits.len()),
            INVALID_SIGNATURE,
        ));
    }
    let v_bytes = hex::decode(&digits[128..])?;
    if v_bytes.len() > 8 {
        return Err(HardwareError::with_code(
            HardwareErrorKind::Unknown,
            "Recovery value too large",
            INVALID_SIGNATURE,
        ));
    }
    let v = v_bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Ok(parse_signature_components(&digits[..64], &digits[64..128], v))
}

/// Ethereum address of the public key `signature` recovers to, for a 32-byte
/// prehashed message. Lowercase, `0x`-prefixed.
pub fn recover_address(hash: &[u8; 32], signature: &str) -> Result<String> {
    let components = split_signature(signature)?;
    let (r, s) = match (scalar_bytes(&components.r), scalar_bytes(&components.s)) {
        (Some(r), Some(s)) => (r, s),
        _ => {
            return Err(HardwareError::with_code(
                HardwareErrorKind::Unknown,
                "Signature scalars are not 32 bytes",
                INVALID_SIGNATURE,
            ))
        }
    };
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&r);
    compact[32..].copy_from_slice(&s);

    let invalid = |e: secp256k1::Error| {
        HardwareError::with_code(HardwareErrorKind::Unknown, e.to_string(), INVALID_SIGNATURE)
    };
    let recovery_id = RecoveryId::from_i32(components.parity() as i32).map_err(invalid)?;
    let sig = RecoverableSignature::from_compact(&compact, recovery_id).map_err(invalid)?;
    let message = Message::from_slice(hash).map_err(invalid)?;
    let public_key = Secp256k1::verification_only()
        .recover_ecdsa(&message, &sig)
        .map_err(invalid)?;

    let uncompressed = public_key.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}
