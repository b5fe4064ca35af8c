use bytes::{BufMut as _, Bytes, BytesMut};
use serde::{ser::SerializeSeq as _, Serialize, Serializer};
use snafu::ResultExt as _;

use super::{Encode, EvaluationError};

/// A value emitted by a transform.
///
/// Transforms emit a tuple of values per document; the tuple becomes the index key. Values keep the type the transform
/// gave them so that numeric and string keys collate differently downstream.
#[derive(Clone, Debug, PartialEq)]
pub enum EmittedValue {
    /// A string.
    String(String),

    /// An integer.
    Integer(i64),

    /// A floating-point number.
    Float(f64),

    /// A boolean.
    Bool(bool),

    /// An undefined or null value.
    Undefined,

    /// An array of values.
    Array(Vec<EmittedValue>),

    /// A map, as an ordered list of key/value pairs.
    Map(Vec<(EmittedValue, EmittedValue)>),

    /// An arbitrary JSON object.
    Object(serde_json::Value),
}

impl Serialize for EmittedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Undefined => serializer.serialize_none(),
            Self::Array(values) => values.serialize(serializer),
            Self::Map(entries) => {
                // Maps are written as a list of pairs so that non-string keys survive.
                let mut seq = serializer.serialize_seq(Some(entries.len()))?;
                for (key, value) in entries {
                    seq.serialize_element(&(key, value))?;
                }
                seq.end()
            }
            Self::Object(value) => value.serialize(serializer),
        }
    }
}

impl From<serde_json::Value> for EmittedValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Undefined,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(values) => Self::Array(values.into_iter().map(Self::from).collect()),
            object @ Value::Object(_) => Self::Object(object),
        }
    }
}

/// Encodes the values emitted for a document into index key bytes.
///
/// The emitted tuple is encoded as a JSON array. Returns `Ok(None)` when nothing was emitted, which means the document
/// does not match the index.
///
/// When `buffer` is present, the key is encoded into it and split off, leaving the remaining capacity of the buffer
/// available for the next key. Without a buffer, a fresh allocation is used. Both paths produce identical bytes.
///
/// # Errors
///
/// If the values cannot be encoded, an error is returned.
pub fn encode_emitted(
    values: &[EmittedValue], buffer: Option<&mut BytesMut>,
) -> Result<Option<Bytes>, EvaluationError> {
    if values.is_empty() {
        return Ok(None);
    }

    match buffer {
        Some(buffer) => {
            buffer.clear();
            serde_json::to_writer((&mut *buffer).writer(), values).context(Encode)?;
            Ok(Some(buffer.split().freeze()))
        }
        None => serde_json::to_vec(values).map(|v| Some(Bytes::from(v))).context(Encode),
    }
}
