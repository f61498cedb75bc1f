//! EIP-712 typed structured data hashing
//!
//! ```text
//! signing_hash = keccak256(0x19 0x01 || domainSeparator || hashStruct(message))
//! hashStruct(s) = keccak256(typeHash(s) || encodeData(s))
//! ```
//!
//! `encodeType` lists the primary type first, then every transitively
//! referenced struct type sorted by name. Ledger signs the two hashes
//! directly; Trezor receives the full document.

use crate::core::errors::{HardwareError, HardwareErrorKind, Result};
use crate::hardware::hashing::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const DOMAIN_TYPE: &str = "EIP712Domain";
const INVALID_TYPED_DATA: &str = "INVALID_TYPED_DATA";

fn invalid(message: impl Into<String>) -> HardwareError {
    HardwareError::with_code(HardwareErrorKind::Unknown, message, INVALID_TYPED_DATA)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl TypedField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
        }
    }
}

/// An `eth_signTypedData_v4` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub types: BTreeMap<String, Vec<TypedField>>,
    pub primary_type: String,
    #[serde(default)]
    pub domain: Map<String, Value>,
    #[serde(default)]
    pub message: Value,
}

impl TypedData {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// `EIP712Domain` fields, inferred from the domain object when the
    /// document leaves the type out.
    fn domain_fields(&self) -> Vec<TypedField> {
        if let Some(fields) = self.types.get(DOMAIN_TYPE) {
            return fields.clone();
        }
        [
            ("name", "string"),
            ("version", "string"),
            ("chainId", "uint256"),
            ("verifyingContract", "address"),
            ("salt", "bytes32"),
        ]
        .iter()
        .filter(|(name, _)| self.domain.contains_key(*name))
        .map(|(name, ty)| TypedField::new(*name, *ty))
        .collect()
    }

    fn fields(&self, type_name: &str) -> Result<Vec<TypedField>> {
        if type_name == DOMAIN_TYPE {
            return Ok(self.domain_fields());
        }
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| invalid(format!("Undefined type: {}", type_name)))
    }

    fn is_struct(&self, type_name: &str) -> bool {
        type_name == DOMAIN_TYPE || self.types.contains_key(type_name)
    }

    fn collect_dependencies(&self, type_name: &str, found: &mut BTreeSet<String>) -> Result<()> {
        if found.contains(type_name) {
            return Ok(());
        }
        found.insert(type_name.to_string());
        for field in self.fields(type_name)? {
            let base = base_type(&field.field_type);
            if self.is_struct(base) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    /// e.g. `Mail(Person from,Person to,string contents)Person(string name,address wallet)`
    pub fn encode_type(&self, type_name: &str) -> Result<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(type_name, &mut deps)?;
        deps.remove(type_name);

        let mut out = String::new();
        for name in std::iter::once(type_name.to_string()).chain(deps) {
            let fields = self.fields(&name)?;
            let members: Vec<String> = fields
                .iter()
                .map(|f| format!("{} {}", f.field_type, f.name))
                .collect();
            out.push_str(&format!("{}({})", name, members.join(",")));
        }
        Ok(out)
    }

    pub fn type_hash(&self, type_name: &str) -> Result<[u8; 32]> {
        Ok(keccak256(self.encode_type(type_name)?))
    }

    pub fn hash_struct(&self, type_name: &str, data: &Value) -> Result<[u8; 32]> {
        Ok(keccak256(self.encode_data(type_name, data)?))
    }

    fn encode_data(&self, type_name: &str, data: &Value) -> Result<Vec<u8>> {
        let object = data
            .as_object()
            .ok_or_else(|| invalid(format!("Value for {} must be an object", type_name)))?;
        let fields = self.fields(type_name)?;

        let mut out = Vec::with_capacity(32 * (fields.len() + 1));
        out.extend_from_slice(&self.type_hash(type_name)?);
        for field in &fields {
            let value = object.get(&field.name).ok_or_else(|| {
                invalid(format!("Missing field {}.{}", type_name, field.name))
            })?;
            out.extend_from_slice(&self.encode_field(&field.field_type, value)?);
        }
        Ok(out)
    }

    fn encode_field(&self, field_type: &str, value: &Value) -> Result<[u8; 32]> {
        if let Some(element_type) = array_element_type(field_type) {
            let items = value
                .as_array()
                .ok_or_else(|| invalid(format!("Value for {} must be an array", field_type)))?;
            if let Some(expected) = fixed_array_len(field_type) {
                if items.len() != expected {
                    return Err(invalid(format!(
                        "{} expects {} elements, got {}",
                        field_type,
                        expected,
                        items.len()
                    )));
                }
            }
            let mut concat = Vec::with_capacity(items.len() * 32);
            for item in items {
                concat.extend_from_slice(&self.encode_field(element_type, item)?);
            }
            return Ok(keccak256(concat));
        }

        if self.is_struct(field_type) {
            return self.hash_struct(field_type, value);
        }

        encode_atomic(field_type, value)
    }

    pub fn domain_separator(&self) -> Result<[u8; 32]> {
        self.hash_struct(DOMAIN_TYPE, &Value::Object(self.domain.clone()))
    }

    /// `hashStruct(message)`, or `None` when the primary type is the domain itself.
    pub fn message_hash(&self) -> Result<Option<[u8; 32]>> {
        if self.primary_type == DOMAIN_TYPE {
            return Ok(None);
        }
        Ok(Some(self.hash_struct(&self.primary_type, &self.message)?))
    }

    pub fn signing_hash(&self) -> Result<[u8; 32]> {
        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(&self.domain_separator()?);
        if let Some(message_hash) = self.message_hash()? {
            buf.extend_from_slice(&message_hash);
        }
        Ok(keccak256(buf))
    }
}

fn base_type(field_type: &str) -> &str {
    match field_type.find('[') {
        Some(i) => &field_type[..i],
        None => field_type,
    }
}

fn array_element_type(field_type: &str) -> Option<&str> {
    if !field_type.ends_with(']') {
        return None;
    }
    field_type.rfind('[').map(|i| &field_type[..i])
}

fn fixed_array_len(field_type: &str) -> Option<usize> {
    let open = field_type.rfind('[')?;
    field_type[open + 1..field_type.len() - 1].parse().ok()
}

fn encode_atomic(field_type: &str, value: &Value) -> Result<[u8; 32]> {
    match field_type {
        "string" => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("string value expected"))?;
            Ok(keccak256(s.as_bytes()))
        }
        "bytes" => Ok(keccak256(hex_value(value)?)),
        "bool" => {
            let b = match value {
                Value::Bool(b) => *b,
                Value::String(s) if s == "true" => true,
                Value::String(s) if s == "false" => false,
                _ => return Err(invalid("bool value expected")),
            };
            let mut out = [0u8; 32];
            out[31] = b as u8;
            Ok(out)
        }
        "address" => {
            let bytes = hex_value(value)?;
            if bytes.len() != 20 {
                return Err(invalid("address must be 20 bytes"));
            }
            let mut out = [0u8; 32];
            out[12..].copy_from_slice(&bytes);
            Ok(out)
        }
        t if t.starts_with("bytes") => {
            let size: usize = t[5..]
                .parse()
                .map_err(|_| invalid(format!("Unknown type: {}", t)))?;
            let bytes = hex_value(value)?;
            if size == 0 || size > 32 || bytes.len() > size {
                return Err(invalid(format!("Value does not fit {}", t)));
            }
            let mut out = [0u8; 32];
            out[..bytes.len()].copy_from_slice(&bytes);
            Ok(out)
        }
        t if t.starts_with("uint") => {
            check_int_width(t, 4)?;
            let (negative, magnitude) = integer_value(value)?;
            if negative {
                return Err(invalid(format!("Negative value for {}", t)));
            }
            Ok(magnitude)
        }
        t if t.starts_with("int") => {
            check_int_width(t, 3)?;
            let (negative, magnitude) = integer_value(value)?;
            Ok(if negative { twos_complement(magnitude) } else { magnitude })
        }
        other => Err(invalid(format!("Unknown type: {}", other))),
    }
}

fn check_int_width(field_type: &str, prefix_len: usize) -> Result<()> {
    let width = &field_type[prefix_len..];
    if width.is_empty() {
        return Ok(());
    }
    match width.parse::<u16>() {
        Ok(bits) if bits > 0 && bits <= 256 && bits % 8 == 0 => Ok(()),
        _ => Err(invalid(format!("Unknown type: {}", field_type))),
    }
}

fn hex_value(value: &Value) -> Result<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid("hex string value expected"))?;
    Ok(hex::decode(s.strip_prefix("0x").unwrap_or(s))?)
}

/// Sign and 256-bit big-endian magnitude of a JSON number or a decimal /
/// `0x` hex string.
fn integer_value(value: &Value) -> Result<(bool, [u8; 32])> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok((false, u256_from_u128(u as u128)))
            } else if let Some(i) = n.as_i64() {
                Ok((i < 0, u256_from_u128(i.unsigned_abs() as u128)))
            } else {
                Err(invalid("Fractional or oversized number; pass large integers as strings"))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s),
            };
            let magnitude = match digits.strip_prefix("0x") {
                Some(hex_digits) => parse_radix(hex_digits, 16),
                None => parse_radix(digits, 10),
            }
            .ok_or_else(|| invalid(format!("Invalid integer: {}", s)))?;
            Ok((negative, magnitude))
        }
        _ => Err(invalid("integer value expected")),
    }
}

fn u256_from_u128(v: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&v.to_be_bytes());
    out
}

fn parse_radix(digits: &str, radix: u32) -> Option<[u8; 32]> {
    if digits.is_empty() {
        return None;
    }
    let mut acc = [0u8; 32];
    for c in digits.chars() {
        let d = c.to_digit(radix)?;
        let mut carry = d;
        for byte in acc.iter_mut().rev() {
            let v = *byte as u32 * radix + carry;
            *byte = v as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return None;
        }
    }
    Some(acc)
}

fn twos_complement(magnitude: [u8; 32]) -> [u8; 32] {
    let mut out = magnitude.map(|b| !b);
    for byte in out.iter_mut().rev() {
        let (v, overflow) = byte.overflowing_add(1);
        *byte = v;
        if !overflow {
            break;
        }
    }
    out
}
