//! Deterministic CBOR for object bytes.
//!
//! Object ids hash these bytes, so every node must produce the same encoding
//! for the same object: shortest-form heads, definite lengths, 64-bit floats,
//! and map keys ordered by their encoded bytes.
//!
//! Decoding goes through `ciborium`; [`Fields`] gives integer-keyed access to
//! a decoded map with errors that name the object being read.

use ciborium::value::Value;

use crate::error::{CoreError, Result};
use crate::types::ObjectId;

/// Encode a CBOR Value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Decode CBOR bytes into a Value.
///
/// Trailing bytes after the first item are rejected.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut cursor = std::io::Cursor::new(bytes);
    let value: Value = ciborium::from_reader(&mut cursor)
        .map_err(|e| CoreError::DecodingError(e.to_string()))?;
    if cursor.position() as usize != bytes.len() {
        return Err(CoreError::DecodingError("trailing bytes".into()));
    }
    Ok(value)
}

const MAJOR_UINT: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => {
            let n = i128::from(*i);
            if n >= 0 {
                write_head(buf, MAJOR_UINT, n as u64);
            } else {
                // -1 is stored as 0, -2 as 1, ...
                write_head(buf, MAJOR_NEGATIVE, (-1 - n) as u64);
            }
        }
        Value::Bytes(b) => {
            write_head(buf, MAJOR_BYTES, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            write_head(buf, MAJOR_TEXT, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            write_head(buf, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map(buf, entries),
        Value::Tag(tag, inner) => {
            write_head(buf, MAJOR_TAG, *tag);
            encode_value_to(buf, inner);
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        _ => panic!("unsupported CBOR value type"),
    }
}

/// Write a major type and argument in the shortest form.
fn write_head(buf: &mut Vec<u8>, major: u8, n: u64) {
    let major = major << 5;
    match n {
        0..=23 => buf.push(major | n as u8),
        24..=0xff => buf.extend_from_slice(&[major | 24, n as u8]),
        0x100..=0xffff => {
            buf.push(major | 25);
            buf.extend_from_slice(&(n as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(major | 26);
            buf.extend_from_slice(&(n as u32).to_be_bytes());
        }
        _ => {
            buf.push(major | 27);
            buf.extend_from_slice(&n.to_be_bytes());
        }
    }
}

/// Maps are written with keys in encoded byte order.
fn encode_map(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut encoded: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(key, value)| (encode_canonical(key), value))
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0));

    write_head(buf, MAJOR_MAP, encoded.len() as u64);
    for (key, value) in encoded {
        buf.extend_from_slice(&key);
        encode_value_to(buf, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value constructors
// ─────────────────────────────────────────────────────────────────────────────

/// Build an integer-keyed map value.
pub fn int_map(entries: Vec<(u64, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Integer(k.into()), v))
            .collect(),
    )
}

/// Encode an object id as a byte string.
pub fn id_value(id: &ObjectId) -> Value {
    Value::Bytes(id.0.to_vec())
}

/// Encode an optional object id as bytes or null.
pub fn optional_id_value(id: Option<&ObjectId>) -> Value {
    match id {
        Some(id) => id_value(id),
        None => Value::Null,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field access while decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Integer-keyed view over a decoded map, tied to the object being decoded
/// so errors name the offending id.
pub struct Fields<'a> {
    id: ObjectId,
    entries: &'a [(Value, Value)],
}

impl<'a> Fields<'a> {
    /// Wrap a decoded value that must be a map.
    pub fn new(id: ObjectId, value: &'a Value) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self { id, entries }),
            _ => Err(CoreError::malformed(id, "expected map")),
        }
    }

    /// Get a value by integer key.
    pub fn get(&self, key: u64) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
    }

    fn require(&self, key: u64, name: &str) -> Result<&'a Value> {
        self.get(key)
            .ok_or_else(|| CoreError::malformed(self.id, format!("missing {}", name)))
    }

    pub fn u64(&self, key: u64, name: &str) -> Result<u64> {
        match self.require(key, name)? {
            Value::Integer(i) => u64::try_from(i128::from(*i))
                .map_err(|_| CoreError::malformed(self.id, format!("{} out of range", name))),
            _ => Err(CoreError::malformed(self.id, format!("invalid {}", name))),
        }
    }

    pub fn i64(&self, key: u64, name: &str) -> Result<i64> {
        match self.require(key, name)? {
            Value::Integer(i) => i64::try_from(i128::from(*i))
                .map_err(|_| CoreError::malformed(self.id, format!("{} out of range", name))),
            _ => Err(CoreError::malformed(self.id, format!("invalid {}", name))),
        }
    }

    pub fn text(&self, key: u64, name: &str) -> Result<&'a str> {
        match self.require(key, name)? {
            Value::Text(s) => Ok(s),
            _ => Err(CoreError::malformed(self.id, format!("invalid {}", name))),
        }
    }

    pub fn array(&self, key: u64, name: &str) -> Result<&'a [Value]> {
        match self.require(key, name)? {
            Value::Array(items) => Ok(items),
            _ => Err(CoreError::malformed(self.id, format!("invalid {}", name))),
        }
    }

    pub fn optional_object_id(&self, key: u64, name: &str) -> Result<Option<ObjectId>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => object_id_from(self.id, value, name).map(Some),
        }
    }

    /// The id of the object being decoded.
    pub fn object_id(&self) -> ObjectId {
        self.id
    }
}

/// Read a byte-string value as an object id.
pub fn object_id_from(owner: ObjectId, value: &Value, name: &str) -> Result<ObjectId> {
    match value {
        Value::Bytes(b) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Ok(ObjectId(arr))
        }
        _ => Err(CoreError::malformed(owner, format!("invalid {}", name))),
    }
}
