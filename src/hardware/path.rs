//! BIP32/BIP44 derivation path algebra
//!
//! Paths are written `m/44'/60'/0'/0/0`. Each segment is a decimal index in
//! `[0, 2^31 - 1]`, optionally followed by `'` to mark hardened derivation.

use crate::core::errors::{HardwareError, Result};
use std::fmt;
use std::str::FromStr;

/// Offset added to hardened indices.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Largest index a single segment may carry.
pub const MAX_INDEX: u32 = HARDENED_OFFSET - 1;

/// Deepest path a device accepts in a serialized payload.
pub const MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub index: u32,
    pub hardened: bool,
}

impl PathSegment {
    /// Index as sent to hardware (hardened segments carry the high bit).
    pub fn hardware_index(&self) -> u32 {
        if self.hardened {
            self.index + HARDENED_OFFSET
        } else {
            self.index
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// A validated, non-empty derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    segments: Vec<PathSegment>,
}

impl DerivationPath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns a new path with one more non-hardened segment.
    pub fn child(&self, index: u32) -> Result<Self> {
        if index > MAX_INDEX {
            return Err(HardwareError::invalid_path(format!(
                "Index {} exceeds maximum {}",
                index, MAX_INDEX
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(PathSegment {
            index,
            hardened: false,
        });
        Ok(Self { segments })
    }

    /// Depth byte followed by big-endian hardware indices.
    ///
    /// Fails with `InvalidPath` above [`MAX_DEPTH`] segments.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.segments.len() > MAX_DEPTH {
            return Err(HardwareError::invalid_path(format!(
                "Path depth {} exceeds maximum {}",
                self.segments.len(),
                MAX_DEPTH
            )));
        }
        let mut bytes = Vec::with_capacity(1 + self.segments.len() * 4);
        bytes.push(self.segments.len() as u8);
        for segment in &self.segments {
            bytes.extend_from_slice(&segment.hardware_index().to_be_bytes());
        }
        Ok(bytes)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self> {
        parse_path(s)
    }
}

fn parse_segments(text: &str) -> Option<Vec<PathSegment>> {
    let rest = text.strip_prefix('m')?;
    if rest.is_empty() {
        return None;
    }
    let rest = rest.strip_prefix('/')?;

    let mut segments = Vec::new();
    for part in rest.split('/') {
        let (digits, hardened) = match part.strip_suffix('\'') {
            Some(d) => (d, true),
            None => (part, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // u64 so overlong inputs fail the range check instead of overflowing
        let value: u64 = digits.parse().ok()?;
        if value > MAX_INDEX as u64 {
            return None;
        }
        segments.push(PathSegment {
            index: value as u32,
            hardened,
        });
    }
    Some(segments)
}

/// Checks path syntax and segment ranges.
pub fn is_valid_path(text: &str) -> bool {
    parse_segments(text).is_some()
}

pub fn parse_path(text: &str) -> Result<DerivationPath> {
    match parse_segments(text) {
        Some(segments) => Ok(DerivationPath { segments }),
        None => Err(HardwareError::invalid_path(format!(
            "Invalid derivation path: {}",
            text
        ))),
    }
}

/// Appends a non-hardened `index` to `base`.
pub fn build_path(base: &str, index: u32) -> Result<DerivationPath> {
    let base = parse_path(base)?;
    base.child(index)
}

pub fn path_to_hardware_indices(path: &DerivationPath) -> Vec<u32> {
    path.segments.iter().map(PathSegment::hardware_index).collect()
}

fn check_index(name: &str, value: u32) -> Result<()> {
    if value > MAX_INDEX {
        return Err(HardwareError::invalid_path(format!(
            "{} {} exceeds maximum {}",
            name, value, MAX_INDEX
        )));
    }
    Ok(())
}

fn hardened(index: u32) -> PathSegment {
    PathSegment {
        index,
        hardened: true,
    }
}

fn plain(index: u32) -> PathSegment {
    PathSegment {
        index,
        hardened: false,
    }
}

/// `m/44'/60'/0'/{account}/{address}`
pub fn get_standard_path(account: u32, address: u32) -> Result<DerivationPath> {
    check_index("Account", account)?;
    check_index("Address index", address)?;
    Ok(DerivationPath {
        segments: vec![hardened(44), hardened(60), hardened(0), plain(account), plain(address)],
    })
}

/// `m/44'/60'/{account}'/0/0`
pub fn get_alternate_path(account: u32) -> Result<DerivationPath> {
    check_index("Account", account)?;
    Ok(DerivationPath {
        segments: vec![hardened(44), hardened(60), hardened(account), plain(0), plain(0)],
    })
}
