//! Recursive-length-prefix encoding
//!
//! Only the encoder is needed: transactions are serialized here and handed to
//! the device, nothing is ever decoded.

/// An RLP value: a byte string or a list of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    /// Minimal big-endian integer; zero is the empty string.
    pub fn uint(value: u128) -> Self {
        Item::Bytes(minimal_be_bytes(value))
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Item::Bytes(data.into())
    }

    pub fn empty_list() -> Self {
        Item::List(Vec::new())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }

    fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            Item::Bytes(data) => encode_bytes_to(data, out),
            Item::List(items) => {
                let mut payload = Vec::new();
                for item in items {
                    item.encode_to(&mut payload);
                }
                encode_header(payload.len(), 0xc0, out);
                out.extend_from_slice(&payload);
            }
        }
    }
}

fn minimal_be_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Short form `offset + len` up to 55 bytes, otherwise
/// `offset + 55 + len_of_len` followed by the big-endian length.
fn encode_header(len: usize, offset: u8, out: &mut Vec<u8>) {
    if len <= 55 {
        out.push(offset + len as u8);
    } else {
        let len_bytes = minimal_be_bytes(len as u128);
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
}

fn encode_bytes_to(data: &[u8], out: &mut Vec<u8>) {
    if data.len() == 1 && data[0] < 0x80 {
        out.push(data[0]);
    } else {
        encode_header(data.len(), 0x80, out);
        out.extend_from_slice(data);
    }
}

pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 9);
    encode_bytes_to(data, &mut out);
    out
}

pub fn encode_uint(value: u128) -> Vec<u8> {
    encode_bytes(&minimal_be_bytes(value))
}

pub fn encode_list(items: &[Item]) -> Vec<u8> {
    Item::List(items.to_vec()).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(encode_uint(0), vec![0x80]);
        assert_eq!(encode_uint(1), vec![0x01]);
        assert_eq!(encode_uint(0x7f), vec![0x7f]);
        assert_eq!(encode_uint(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_uint(1024), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn test_strings() {
        assert_eq!(encode_bytes(b""), vec![0x80]);
        assert_eq!(encode_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);

        let long = vec![0xaa; 56];
        let encoded = encode_bytes(&long);
        assert_eq!(&encoded[..2], &[0xb8, 56]);
        assert_eq!(encoded.len(), 58);
    }

    #[test]
    fn test_lists() {
        assert_eq!(Item::empty_list().encode(), vec![0xc0]);
        let cat_dog = encode_list(&[Item::bytes(&b"cat"[..]), Item::bytes(&b"dog"[..])]);
        assert_eq!(
            cat_dog,
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_long_list_header() {
        let items: Vec<Item> = (0..20).map(|_| Item::bytes(vec![0x11u8; 3])).collect();
        let encoded = encode_list(&items);
        // 20 * 4 = 80 payload bytes
        assert_eq!(&encoded[..2], &[0xf8, 80]);
    }

    #[test]
    fn test_nested_empty_lists() {
        // [ [], [[]], [ [], [[]] ] ]
        let set = Item::List(vec![
            Item::empty_list(),
            Item::List(vec![Item::empty_list()]),
            Item::List(vec![Item::empty_list(), Item::List(vec![Item::empty_list()])]),
        ]);
        assert_eq!(set.encode(), vec![0xc7, 0xc0, 0xc1, 0xc0, 0xc3, 0xc0, 0xc1, 0xc0]);
    }
}
