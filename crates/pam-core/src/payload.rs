//! Payload codec
//!
//! Application payloads travel as opaque byte frames. A decoded frame is one
//! of three shapes, tried in a fixed order: raw bytes (not UTF-8, or UTF-8
//! containing NUL), a JSON object, or plain text. Decoding never fails.

use core::fmt;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::CodecError;

/// JSON object carried by a structured payload
pub type StructuredMap = Map<String, Value>;

// ----------------------------------------------------------------------------
// Payload
// ----------------------------------------------------------------------------

/// A decoded application payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Binary data, passed through untouched
    Bytes(Vec<u8>),
    /// UTF-8 text that is not a JSON object
    Text(String),
    /// A JSON object
    Structured(StructuredMap),
}

impl Payload {
    /// Build a structured payload from any serializable value
    ///
    /// Fails when the value cannot be serialized or does not serialize to a
    /// JSON object.
    pub fn structured<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Payload::Structured(map)),
            other => Err(CodecError::NotAnObject {
                kind: json_kind(&other),
            }),
        }
    }

    /// Short name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "text",
            Payload::Structured(_) => "structured",
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredMap> {
        match self {
            Payload::Structured(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_structured(self) -> Option<StructuredMap> {
        match self {
            Payload::Structured(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Look up a key of a structured payload
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_structured().and_then(|map| map.get(key))
    }

    /// JSON representation, used when a payload is nested inside an envelope
    ///
    /// Binary payloads have no JSON form.
    pub fn to_json(&self) -> Result<Value, CodecError> {
        match self {
            Payload::Bytes(bytes) => Err(CodecError::Serialization {
                reason: format!("{} bytes of binary data are not JSON serializable", bytes.len()),
            }),
            Payload::Text(text) => Ok(Value::String(text.clone())),
            Payload::Structured(map) => Ok(Value::Object(map.clone())),
        }
    }

    /// Encode into a transport frame
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Payload::Text(text) => write!(f, "{}", text),
            Payload::Structured(map) => write!(f, "{}", Value::Object(map.clone())),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<StructuredMap> for Payload {
    fn from(map: StructuredMap) -> Self {
        Payload::Structured(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ----------------------------------------------------------------------------
// Codec
// ----------------------------------------------------------------------------

/// Encode a payload into a transport frame
///
/// Bytes pass through, text is UTF-8 encoded, structured payloads are
/// serialized as JSON.
pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    match payload {
        Payload::Bytes(bytes) => Ok(bytes.clone()),
        Payload::Text(text) => Ok(text.as_bytes().to_vec()),
        Payload::Structured(map) => Ok(serde_json::to_vec(map)?),
    }
}

/// Decode a transport frame
///
/// Order matters: UTF-8 first (NUL means binary misread as text), then JSON
/// object, then plain text.
pub fn decode(data: Vec<u8>) -> Payload {
    let text = match String::from_utf8(data) {
        Ok(text) => text,
        Err(err) => return Payload::Bytes(err.into_bytes()),
    };

    if text.contains('\0') {
        return Payload::Bytes(text.into_bytes());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Payload::Structured(map),
        _ => Payload::Text(text),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_order() {
        assert_eq!(decode(vec![0xff, 0xfe]), Payload::Bytes(vec![0xff, 0xfe]));
        assert_eq!(decode(b"a\0b".to_vec()), Payload::Bytes(b"a\0b".to_vec()));
        assert_eq!(decode(b"hello".to_vec()), Payload::Text("hello".into()));

        let decoded = decode(br#"{"type":"prompt"}"#.to_vec());
        assert_eq!(decoded.get("type"), Some(&json!("prompt")));
    }

    #[test]
    fn test_non_object_json_stays_text() {
        assert_eq!(decode(b"42".to_vec()), Payload::Text("42".into()));
        assert_eq!(decode(b"[1,2]".to_vec()), Payload::Text("[1,2]".into()));
        assert_eq!(decode(b"\"quoted\"".to_vec()), Payload::Text("\"quoted\"".into()));
    }

    #[test]
    fn test_encode_variants() {
        assert_eq!(encode(&Payload::Bytes(vec![1, 2, 3])).unwrap(), vec![1, 2, 3]);
        assert_eq!(encode(&"héllo".into()).unwrap(), "héllo".as_bytes());

        let payload = Payload::structured(&json!({"a": 1})).unwrap();
        assert_eq!(encode(&payload).unwrap(), br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn test_structured_rejects_non_objects() {
        let err = Payload::structured(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, CodecError::NotAnObject { kind: "array" }));
    }

    #[test]
    fn test_structured_reports_serialization_failure() {
        use std::collections::HashMap;

        // Non-string map keys cannot become JSON object keys
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        let err = Payload::structured(&map).unwrap_err();
        assert!(matches!(err, CodecError::Serialization { .. }));
    }

    #[test]
    fn test_bytes_have_no_json_form() {
        assert!(Payload::Bytes(vec![1]).to_json().is_err());
        assert_eq!(Payload::from("x").to_json().unwrap(), json!("x"));
    }
}
