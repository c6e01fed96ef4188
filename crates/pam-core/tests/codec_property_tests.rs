//! Property-based tests for the payload codec

use pam_core::{decode, encode, Payload, StructuredMap};
use proptest::prelude::*;
use serde_json::Value;

// ----------------------------------------------------------------------------
// Strategies
// ----------------------------------------------------------------------------

fn text_without_nul() -> impl Strategy<Value = String> {
    "[^\\x00]{0,64}"
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        text_without_nul().prop_map(Value::String),
    ]
}

fn structured_map() -> impl Strategy<Value = StructuredMap> {
    prop::collection::btree_map("[a-z_]{1,8}", json_leaf(), 0..8)
        .prop_map(|entries| entries.into_iter().collect())
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

proptest! {
    #[test]
    fn decode_is_total(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        // Any byte sequence decodes to exactly one of the three shapes
        let decoded = decode(bytes.clone());
        match decoded {
            Payload::Bytes(out) => prop_assert_eq!(out, bytes),
            Payload::Text(text) => prop_assert_eq!(text.into_bytes(), bytes),
            Payload::Structured(_) => prop_assert!(std::str::from_utf8(&bytes).is_ok()),
        }
    }

    #[test]
    fn non_utf8_bytes_round_trip(mut bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        bytes.push(0xff);
        let payload = Payload::Bytes(bytes.clone());
        prop_assert_eq!(decode(encode(&payload).unwrap()), payload);
    }

    #[test]
    fn structured_round_trip(map in structured_map()) {
        let payload = Payload::Structured(map);
        prop_assert_eq!(decode(encode(&payload).unwrap()), payload);
    }

    #[test]
    fn plain_text_round_trip(text in "[a-zA-Z ][a-zA-Z0-9 .,!?]{0,64}") {
        // Without braces the text can never parse as a JSON object
        let payload = Payload::Text(text);
        prop_assert_eq!(decode(encode(&payload).unwrap()), payload);
    }

    #[test]
    fn text_with_nul_decodes_as_bytes(prefix in text_without_nul(), suffix in text_without_nul()) {
        let text = format!("{}\0{}", prefix, suffix);
        let decoded = decode(encode(&Payload::Text(text.clone())).unwrap());
        prop_assert_eq!(decoded, Payload::Bytes(text.into_bytes()));
    }
}
