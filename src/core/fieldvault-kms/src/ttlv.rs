//! KMIP TTLV (tag, type, length, value) encoding.
//!
//! Tags are 3 bytes, the type 1 byte and the length 4 bytes, all big-endian.
//! Values are padded with zeros to a multiple of 8 bytes.

use crate::error::KmsError;

/// Length of an item header.
pub const HEADER_LEN: usize = 8;

/// Tags used by the `Get` exchange.
pub mod tag {
    #![allow(missing_docs)]
    pub const BATCH_COUNT: u32 = 0x42000D;
    pub const BATCH_ITEM: u32 = 0x42000F;
    pub const KEY_BLOCK: u32 = 0x420040;
    pub const KEY_MATERIAL: u32 = 0x420043;
    pub const KEY_VALUE: u32 = 0x420045;
    pub const OPERATION: u32 = 0x42005C;
    pub const PROTOCOL_VERSION: u32 = 0x420069;
    pub const PROTOCOL_VERSION_MAJOR: u32 = 0x42006A;
    pub const PROTOCOL_VERSION_MINOR: u32 = 0x42006B;
    pub const REQUEST_HEADER: u32 = 0x420077;
    pub const REQUEST_MESSAGE: u32 = 0x420078;
    pub const REQUEST_PAYLOAD: u32 = 0x420079;
    pub const RESPONSE_HEADER: u32 = 0x42007A;
    pub const RESPONSE_MESSAGE: u32 = 0x42007B;
    pub const RESPONSE_PAYLOAD: u32 = 0x42007C;
    pub const RESULT_MESSAGE: u32 = 0x42007D;
    pub const RESULT_REASON: u32 = 0x42007E;
    pub const RESULT_STATUS: u32 = 0x42007F;
    pub const SECRET_DATA: u32 = 0x420085;
    pub const UNIQUE_IDENTIFIER: u32 = 0x420094;
}

const TYPE_STRUCTURE: u8 = 0x01;
const TYPE_INTEGER: u8 = 0x02;
const TYPE_LONG_INTEGER: u8 = 0x03;
const TYPE_ENUMERATION: u8 = 0x05;
const TYPE_BOOLEAN: u8 = 0x06;
const TYPE_TEXT_STRING: u8 = 0x07;
const TYPE_BYTE_STRING: u8 = 0x08;
const TYPE_DATE_TIME: u8 = 0x09;

/// A TTLV value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Nested items.
    Structure(Vec<Item>),
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    LongInteger(i64),
    /// 32-bit enumeration.
    Enumeration(u32),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 text.
    TextString(String),
    /// Raw bytes.
    ByteString(Vec<u8>),
    /// Seconds since the Unix epoch.
    DateTime(i64),
    /// Any other type, kept undecoded.
    Other {
        /// Type byte.
        item_type: u8,
        /// Unpadded value bytes.
        raw: Vec<u8>,
    },
}

/// A tagged TTLV item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// 24-bit tag.
    pub tag: u32,
    /// Value.
    pub value: Value,
}

impl Item {
    /// Creates an item.
    pub fn new(tag: u32, value: Value) -> Self {
        Self { tag, value }
    }

    /// Creates a structure item.
    pub fn structure(tag: u32, children: Vec<Item>) -> Self {
        Self::new(tag, Value::Structure(children))
    }

    /// First direct child with `tag`.
    pub fn child(&self, tag: u32) -> Option<&Item> {
        match &self.value {
            Value::Structure(children) => children.iter().find(|c| c.tag == tag),
            _ => None,
        }
    }

    /// Follows a chain of child tags.
    pub fn path(&self, tags: &[u32]) -> Option<&Item> {
        tags.iter().try_fold(self, |item, tag| item.child(*tag))
    }

    /// Encodes the item.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let (item_type, body) = match &self.value {
            Value::Structure(children) => {
                let mut body = Vec::new();
                for child in children {
                    child.encode_into(&mut body);
                }
                (TYPE_STRUCTURE, body)
            }
            Value::Integer(v) => (TYPE_INTEGER, v.to_be_bytes().to_vec()),
            Value::LongInteger(v) => (TYPE_LONG_INTEGER, v.to_be_bytes().to_vec()),
            Value::Enumeration(v) => (TYPE_ENUMERATION, v.to_be_bytes().to_vec()),
            Value::Boolean(v) => (TYPE_BOOLEAN, u64::from(*v).to_be_bytes().to_vec()),
            Value::TextString(s) => (TYPE_TEXT_STRING, s.as_bytes().to_vec()),
            Value::ByteString(b) => (TYPE_BYTE_STRING, b.clone()),
            Value::DateTime(v) => (TYPE_DATE_TIME, v.to_be_bytes().to_vec()),
            Value::Other { item_type, raw } => (*item_type, raw.clone()),
        };

        out.extend_from_slice(&self.tag.to_be_bytes()[1..]);
        out.push(item_type);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out.resize(out.len() + padding(body.len()), 0);
    }

    /// Decodes exactly one item spanning the whole buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, KmsError> {
        let (item, used) = Self::decode_prefix(buf)?;
        if used != buf.len() {
            return Err(KmsError::Protocol(format!(
                "{} trailing bytes after TTLV item",
                buf.len() - used
            )));
        }
        Ok(item)
    }

    /// Decodes one item from the start of `buf`, returning it and the
    /// number of bytes consumed (including padding).
    pub fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), KmsError> {
        let (tag, item_type, len) = read_header(buf)?;
        let padded = len + padding(len);
        if buf.len() < HEADER_LEN + padded {
            return Err(KmsError::Protocol("truncated TTLV value".into()));
        }
        let body = &buf[HEADER_LEN..HEADER_LEN + len];

        let value = match item_type {
            TYPE_STRUCTURE => {
                let mut children = Vec::new();
                let mut offset = 0;
                while offset < body.len() {
                    let (child, used) = Self::decode_prefix(&body[offset..])?;
                    children.push(child);
                    offset += used;
                }
                Value::Structure(children)
            }
            TYPE_INTEGER => Value::Integer(i32::from_be_bytes(fixed(body)?)),
            TYPE_LONG_INTEGER => Value::LongInteger(i64::from_be_bytes(fixed(body)?)),
            TYPE_ENUMERATION => Value::Enumeration(u32::from_be_bytes(fixed(body)?)),
            TYPE_BOOLEAN => Value::Boolean(u64::from_be_bytes(fixed(body)?) != 0),
            TYPE_TEXT_STRING => Value::TextString(
                String::from_utf8(body.to_vec())
                    .map_err(|_| KmsError::Protocol("text string is not UTF-8".into()))?,
            ),
            TYPE_BYTE_STRING => Value::ByteString(body.to_vec()),
            TYPE_DATE_TIME => Value::DateTime(i64::from_be_bytes(fixed(body)?)),
            other => Value::Other {
                item_type: other,
                raw: body.to_vec(),
            },
        };

        Ok((Self { tag, value }, HEADER_LEN + padded))
    }
}

/// Parses a header, returning `(tag, type, value length)`.
pub fn read_header(buf: &[u8]) -> Result<(u32, u8, usize), KmsError> {
    if buf.len() < HEADER_LEN {
        return Err(KmsError::Protocol("truncated TTLV header".into()));
    }
    let tag = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    Ok((tag, buf[3], len))
}

/// Total encoded size of an item whose header is `header`.
pub fn encoded_len(header: &[u8]) -> Result<usize, KmsError> {
    let (_, _, len) = read_header(header)?;
    Ok(HEADER_LEN + len + padding(len))
}

fn padding(len: usize) -> usize {
    (8 - len % 8) % 8
}

fn fixed<const N: usize>(body: &[u8]) -> Result<[u8; N], KmsError> {
    body.try_into()
        .map_err(|_| KmsError::Protocol(format!("expected {N}-byte value, got {}", body.len())))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_layout() {
        let item = Item::new(tag::PROTOCOL_VERSION_MAJOR, Value::Integer(1));
        assert_eq!(
            item.encode(),
            vec![0x42, 0x00, 0x6A, 0x02, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_text_string_padding() {
        let item = Item::new(tag::UNIQUE_IDENTIFIER, Value::TextString("1".into()));
        let encoded = item.encode();
        assert_eq!(encoded.len(), 16);
        assert_eq!(&encoded[..8], &[0x42, 0x00, 0x94, 0x07, 0, 0, 0, 1]);
        assert_eq!(encoded[8], b'1');
        assert!(encoded[9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_structure_decode() {
        let item = Item::structure(
            tag::RESPONSE_PAYLOAD,
            vec![
                Item::new(tag::UNIQUE_IDENTIFIER, Value::TextString("1".into())),
                Item::structure(
                    tag::SECRET_DATA,
                    vec![Item::new(tag::KEY_MATERIAL, Value::ByteString(vec![5; 96]))],
                ),
            ],
        );

        let decoded = Item::decode(&item.encode()).unwrap();
        assert_eq!(decoded, item);
        assert_eq!(
            decoded
                .path(&[tag::SECRET_DATA, tag::KEY_MATERIAL])
                .map(|i| &i.value),
            Some(&Value::ByteString(vec![5; 96]))
        );
    }

    #[test]
    fn test_unknown_type_preserved() {
        let item = Item::new(
            0x42000A,
            Value::Other {
                item_type: 0x0A,
                raw: vec![0, 0, 0, 60],
            },
        );
        assert_eq!(Item::decode(&item.encode()).unwrap(), item);
    }

    #[test]
    fn test_truncated_input() {
        let encoded = Item::new(tag::OPERATION, Value::Enumeration(0x0A)).encode();

        assert!(matches!(
            Item::decode(&encoded[..5]),
            Err(KmsError::Protocol(_))
        ));
        assert!(matches!(
            Item::decode(&encoded[..12]),
            Err(KmsError::Protocol(_))
        ));
    }

    #[test]
    fn test_bad_integer_length() {
        let mut encoded = Item::new(tag::BATCH_COUNT, Value::ByteString(vec![1, 2])).encode();
        encoded[3] = TYPE_INTEGER;
        assert!(Item::decode(&encoded).is_err());
    }

    #[test]
    fn test_encoded_len() {
        let encoded = Item::new(tag::KEY_MATERIAL, Value::ByteString(vec![0; 13])).encode();
        assert_eq!(encoded_len(&encoded[..HEADER_LEN]).unwrap(), encoded.len());
        assert_eq!(encoded.len(), 8 + 16);
    }
}
