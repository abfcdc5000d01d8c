//! Message content: record dictionaries, array records and config records.
//!
//! Arrays are split into [`ArrayChunk`]s so that no single object grows past
//! [`ARRAY_CHUNK_SIZE`] bytes. Chunks are content-addressed, so two arrays
//! sharing a chunk of identical bytes reference the same object id.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::canonical::{id_value, int_map, object_id_from, Fields};
use crate::error::{CoreError, Result};
use crate::inflatable::{Inflatable, ObjectContents};
use crate::object::ObjectType;
use crate::types::ObjectId;

/// Maximum number of bytes held by a single array chunk.
pub const ARRAY_CHUNK_SIZE: usize = 20 * 1024 * 1024;

mod keys {
    pub const ENTRIES: u64 = 0;

    pub const DTYPE: u64 = 0;
    pub const SHAPE: u64 = 1;
    pub const STYPE: u64 = 2;
    pub const CHUNKS: u64 = 3;
}

// ─────────────────────────────────────────────────────────────────────────────
// Config values
// ─────────────────────────────────────────────────────────────────────────────

/// A scalar or list value stored in a [`ConfigRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    fn to_cbor(&self) -> Value {
        match self {
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Int(i) => Value::Integer((*i).into()),
            ConfigValue::Float(f) => Value::Float(*f),
            ConfigValue::Str(s) => Value::Text(s.clone()),
            ConfigValue::Bytes(b) => Value::Bytes(b.to_vec()),
            ConfigValue::List(items) => Value::Array(items.iter().map(Self::to_cbor).collect()),
        }
    }

    fn from_cbor(id: ObjectId, value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Bool(b) => ConfigValue::Bool(*b),
            Value::Integer(i) => ConfigValue::Int(
                i64::try_from(i128::from(*i))
                    .map_err(|_| CoreError::malformed(id, "config integer out of range"))?,
            ),
            Value::Float(f) => ConfigValue::Float(*f),
            Value::Text(s) => ConfigValue::Str(s.clone()),
            Value::Bytes(b) => ConfigValue::Bytes(Bytes::copy_from_slice(b)),
            Value::Array(items) => ConfigValue::List(
                items
                    .iter()
                    .map(|item| Self::from_cbor(id, item))
                    .collect::<Result<_>>()?,
            ),
            _ => return Err(CoreError::malformed(id, "unsupported config value")),
        })
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config record
// ─────────────────────────────────────────────────────────────────────────────

/// Named config values. Small enough to always travel as a single object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRecord {
    pub values: BTreeMap<String, ConfigValue>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub(crate) fn inflate(id: &ObjectId, contents: &ObjectContents<'_>) -> Result<Self> {
        let body = contents.load(id, ObjectType::ConfigRecord)?;
        let fields = Fields::new(*id, &body)?;
        let entries = match fields.get(keys::ENTRIES) {
            Some(Value::Map(entries)) => entries,
            _ => return Err(CoreError::malformed(*id, "invalid config entries")),
        };

        let mut values = BTreeMap::new();
        for (key, value) in entries {
            let key = match key {
                Value::Text(k) => k.clone(),
                _ => return Err(CoreError::malformed(*id, "config key must be text")),
            };
            values.insert(key, ConfigValue::from_cbor(*id, value)?);
        }
        Ok(Self { values })
    }
}

impl Inflatable for ConfigRecord {
    fn object_type(&self) -> ObjectType {
        ObjectType::ConfigRecord
    }

    fn children(&self) -> Vec<&dyn Inflatable> {
        Vec::new()
    }

    fn deflate_body(&self, _child_ids: &[ObjectId]) -> Value {
        let entries = self
            .values
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), v.to_cbor()))
            .collect();
        int_map(vec![(keys::ENTRIES, Value::Map(entries))])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arrays
// ─────────────────────────────────────────────────────────────────────────────

/// A contiguous slice of an array's serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayChunk(pub Bytes);

impl ArrayChunk {
    pub(crate) fn inflate(id: &ObjectId, contents: &ObjectContents<'_>) -> Result<Self> {
        match contents.load(id, ObjectType::ArrayChunk)? {
            Value::Bytes(b) => Ok(ArrayChunk(Bytes::from(b))),
            _ => Err(CoreError::malformed(*id, "chunk body must be bytes")),
        }
    }
}

impl Inflatable for ArrayChunk {
    fn object_type(&self) -> ObjectType {
        ObjectType::ArrayChunk
    }

    fn children(&self) -> Vec<&dyn Inflatable> {
        Vec::new()
    }

    fn deflate_body(&self, _child_ids: &[ObjectId]) -> Value {
        Value::Bytes(self.0.to_vec())
    }
}

/// A serialized tensor: type/shape description plus its bytes in chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub stype: String,
    pub chunks: Vec<ArrayChunk>,
}

impl Array {
    /// Build an array, splitting `data` into chunks of [`ARRAY_CHUNK_SIZE`].
    pub fn from_bytes(
        dtype: impl Into<String>,
        shape: Vec<u64>,
        stype: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::with_chunk_size(dtype, shape, stype, data, ARRAY_CHUNK_SIZE)
    }

    /// Build an array with an explicit chunk size.
    ///
    /// A `chunk_size` of zero is treated as one byte per chunk.
    pub fn with_chunk_size(
        dtype: impl Into<String>,
        shape: Vec<u64>,
        stype: impl Into<String>,
        data: impl Into<Bytes>,
        chunk_size: usize,
    ) -> Self {
        let data = data.into();
        let chunk_size = chunk_size.max(1);
        let chunks = (0..data.len())
            .step_by(chunk_size)
            .map(|start| ArrayChunk(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        Self {
            dtype: dtype.into(),
            shape,
            stype: stype.into(),
            chunks,
        }
    }

    /// The array bytes, reassembled from its chunks.
    pub fn data(&self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks[0].0.clone();
        }
        let mut buf = BytesMut::with_capacity(self.chunks.iter().map(|c| c.0.len()).sum());
        for chunk in &self.chunks {
            buf.extend_from_slice(&chunk.0);
        }
        buf.freeze()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn inflate(id: &ObjectId, contents: &ObjectContents<'_>) -> Result<Self> {
        let body = contents.load(id, ObjectType::Array)?;
        let fields = Fields::new(*id, &body)?;

        let shape = fields
            .array(keys::SHAPE, "shape")?
            .iter()
            .map(|dim| match dim {
                Value::Integer(i) => u64::try_from(i128::from(*i))
                    .map_err(|_| CoreError::malformed(*id, "invalid shape")),
                _ => Err(CoreError::malformed(*id, "invalid shape")),
            })
            .collect::<Result<Vec<_>>>()?;

        let chunks = fields
            .array(keys::CHUNKS, "chunks")?
            .iter()
            .map(|v| {
                let chunk_id = object_id_from(*id, v, "chunk id")?;
                ArrayChunk::inflate(&chunk_id, contents)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dtype: fields.text(keys::DTYPE, "dtype")?.to_string(),
            shape,
            stype: fields.text(keys::STYPE, "stype")?.to_string(),
            chunks,
        })
    }
}

impl Inflatable for Array {
    fn object_type(&self) -> ObjectType {
        ObjectType::Array
    }

    fn children(&self) -> Vec<&dyn Inflatable> {
        self.chunks.iter().map(|c| c as &dyn Inflatable).collect()
    }

    fn deflate_body(&self, child_ids: &[ObjectId]) -> Value {
        int_map(vec![
            (keys::DTYPE, Value::Text(self.dtype.clone())),
            (
                keys::SHAPE,
                Value::Array(self.shape.iter().map(|d| Value::Integer((*d).into())).collect()),
            ),
            (keys::STYPE, Value::Text(self.stype.clone())),
            (keys::CHUNKS, Value::Array(child_ids.iter().map(id_value).collect())),
        ])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Array record
// ─────────────────────────────────────────────────────────────────────────────

/// Named arrays, typically model parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayRecord {
    pub arrays: BTreeMap<String, Array>,
}

impl ArrayRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, array: Array) -> Self {
        self.arrays.insert(name.into(), array);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Array> {
        self.arrays.get(name)
    }

    pub(crate) fn inflate(id: &ObjectId, contents: &ObjectContents<'_>) -> Result<Self> {
        let body = contents.load(id, ObjectType::ArrayRecord)?;
        let fields = Fields::new(*id, &body)?;

        let mut arrays = BTreeMap::new();
        for (name, child_id) in named_children(*id, fields.array(keys::ENTRIES, "entries")?)? {
            arrays.insert(name, Array::inflate(&child_id, contents)?);
        }
        Ok(Self { arrays })
    }
}

impl Inflatable for ArrayRecord {
    fn object_type(&self) -> ObjectType {
        ObjectType::ArrayRecord
    }

    fn children(&self) -> Vec<&dyn Inflatable> {
        self.arrays.values().map(|a| a as &dyn Inflatable).collect()
    }

    fn deflate_body(&self, child_ids: &[ObjectId]) -> Value {
        int_map(vec![(
            keys::ENTRIES,
            named_children_value(self.arrays.keys(), child_ids),
        )])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record dict
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a [`RecordDict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Array(ArrayRecord),
    Config(ConfigRecord),
}

impl Record {
    fn as_inflatable(&self) -> &dyn Inflatable {
        match self {
            Record::Array(r) => r,
            Record::Config(r) => r,
        }
    }
}

/// The content of a message: named records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDict {
    pub records: BTreeMap<String, Record>,
}

impl RecordDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arrays(mut self, name: impl Into<String>, record: ArrayRecord) -> Self {
        self.records.insert(name.into(), Record::Array(record));
        self
    }

    pub fn with_config(mut self, name: impl Into<String>, record: ConfigRecord) -> Self {
        self.records.insert(name.into(), Record::Config(record));
        self
    }

    pub fn array_record(&self, name: &str) -> Option<&ArrayRecord> {
        match self.records.get(name) {
            Some(Record::Array(r)) => Some(r),
            _ => None,
        }
    }

    pub fn config_record(&self, name: &str) -> Option<&ConfigRecord> {
        match self.records.get(name) {
            Some(Record::Config(r)) => Some(r),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn inflate(id: &ObjectId, contents: &ObjectContents<'_>) -> Result<Self> {
        let body = contents.load(id, ObjectType::RecordDict)?;
        let fields = Fields::new(*id, &body)?;

        let mut records = BTreeMap::new();
        for (name, child_id) in named_children(*id, fields.array(keys::ENTRIES, "entries")?)? {
            // The child's own type tag decides which record it is
            let record = match contents.object_type(&child_id)? {
                ObjectType::ArrayRecord => Record::Array(ArrayRecord::inflate(&child_id, contents)?),
                ObjectType::ConfigRecord => {
                    Record::Config(ConfigRecord::inflate(&child_id, contents)?)
                }
                other => {
                    return Err(CoreError::UnexpectedObjectType {
                        id: child_id,
                        expected: ObjectType::ArrayRecord,
                        actual: other,
                    })
                }
            };
            records.insert(name, record);
        }
        Ok(Self { records })
    }
}

impl Inflatable for RecordDict {
    fn object_type(&self) -> ObjectType {
        ObjectType::RecordDict
    }

    fn children(&self) -> Vec<&dyn Inflatable> {
        self.records.values().map(Record::as_inflatable).collect()
    }

    fn deflate_body(&self, child_ids: &[ObjectId]) -> Value {
        int_map(vec![(
            keys::ENTRIES,
            named_children_value(self.records.keys(), child_ids),
        )])
    }
}

/// Encode `[[name, child_id], ...]` pairing names with child ids in order.
fn named_children_value<'a>(names: impl Iterator<Item = &'a String>, child_ids: &[ObjectId]) -> Value {
    Value::Array(
        names
            .zip(child_ids)
            .map(|(name, id)| Value::Array(vec![Value::Text(name.clone()), id_value(id)]))
            .collect(),
    )
}

fn named_children(owner: ObjectId, entries: &[Value]) -> Result<Vec<(String, ObjectId)>> {
    entries
        .iter()
        .map(|entry| match entry {
            Value::Array(pair) if pair.len() == 2 => {
                let name = match &pair[0] {
                    Value::Text(s) => s.clone(),
                    _ => return Err(CoreError::malformed(owner, "entry name must be text")),
                };
                Ok((name, object_id_from(owner, &pair[1], "entry id")?))
            }
            _ => Err(CoreError::malformed(owner, "invalid entry")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_chunking() {
        let array = Array::with_chunk_size("u8", vec![10], "raw", vec![7u8; 10], 4);
        assert_eq!(array.num_chunks(), 3);
        assert_eq!(array.chunks[2].0.len(), 2);
        assert_eq!(array.data(), Bytes::from(vec![7u8; 10]));
    }

    #[test]
    fn test_array_default_chunk_size_single_chunk() {
        let array = Array::from_bytes("f32", vec![2, 2], "numpy.ndarray", vec![1u8; 16]);
        assert_eq!(array.num_chunks(), 1);
    }

    #[test]
    fn test_array_zero_chunk_size() {
        let array = Array::with_chunk_size("u8", vec![3], "raw", vec![1u8, 2, 3], 0);
        assert_eq!(array.num_chunks(), 3);
    }

    #[test]
    fn test_empty_array_has_no_chunks() {
        let array = Array::from_bytes("u8", vec![0], "raw", Bytes::new());
        assert_eq!(array.num_chunks(), 0);
        assert!(array.data().is_empty());
    }

    #[test]
    fn test_record_dict_accessors() {
        let content = RecordDict::new()
            .with_arrays("params", ArrayRecord::new())
            .with_config("config", ConfigRecord::new().with("lr", 0.1));
        assert!(content.array_record("params").is_some());
        assert!(content.array_record("config").is_none());
        assert_eq!(
            content.config_record("config").unwrap().get("lr"),
            Some(&ConfigValue::Float(0.1))
        );
    }
}
