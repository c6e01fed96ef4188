//! Request/reply envelope
//!
//! A request is a structured payload carrying the reserved `_request_id` key.
//! Non-structured payloads are wrapped under `data` before tagging. A reply is
//! any structured payload echoing the same `_request_id`.

use serde_json::Value;
use uuid::Uuid;

use crate::errors::CodecError;
use crate::payload::{Payload, StructuredMap};

/// Reserved key correlating a reply with its request
pub const REQUEST_ID_KEY: &str = "_request_id";

/// Key wrapping a non-structured request payload
pub const DATA_KEY: &str = "data";

/// Generate a fresh request identifier
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Read the request id of a structured message, if it carries one
pub fn request_id(map: &StructuredMap) -> Option<&str> {
    map.get(REQUEST_ID_KEY).and_then(Value::as_str)
}

/// Tag a payload with a request id
///
/// Structured payloads get the key inserted, overwriting any existing one;
/// text is wrapped as `{"_request_id": id, "data": text}`. Binary payloads
/// cannot be wrapped.
pub fn tag(payload: Payload, request_id: &str) -> Result<StructuredMap, CodecError> {
    let mut map = match payload {
        Payload::Structured(map) => map,
        other => {
            let mut map = StructuredMap::new();
            map.insert(DATA_KEY.to_string(), other.to_json()?);
            map
        }
    };
    map.insert(
        REQUEST_ID_KEY.to_string(),
        Value::String(request_id.to_string()),
    );
    Ok(map)
}

/// Build a reply to a received request
pub fn reply_to(request: &StructuredMap, payload: Payload) -> Result<StructuredMap, CodecError> {
    let id = request_id(request).ok_or_else(|| CodecError::Serialization {
        reason: format!("message has no string `{}`", REQUEST_ID_KEY),
    })?;
    tag(payload, id)
}
