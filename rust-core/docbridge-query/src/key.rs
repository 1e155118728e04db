// SPDX-License-Identifier: PMPL-1.0-or-later
//! Identifier normalization.
//!
//! Callers usually hold identifiers as strings. The store keeps them as
//! object ids or binary UUIDs, so clause values on the identifier field are
//! classified here before they reach a filter.

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson};

use crate::value::Value;

/// Length of an object id in hex characters.
const OBJECT_ID_HEX_LEN: usize = 24;
/// Length of a raw UUID in bytes.
const UUID_LEN: usize = 16;

/// Normalize an identifier value into its native representation.
///
/// Rules, first match wins:
/// 1. exactly 24 hex characters: an object id;
/// 2. exactly 16 bytes with at least one byte outside printable ASCII
///    (tab, CR and LF count as printable): a binary UUID;
/// 3. anything else: the value unchanged.
pub fn normalize(raw: Value) -> Bson {
    match raw {
        Value::String(s) => normalize_str(s),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => normalize_str(s),
            Err(err) => {
                let bytes = err.into_bytes();
                if is_binary_uuid(&bytes) {
                    uuid(bytes)
                } else {
                    Value::Bytes(bytes).into_bson()
                }
            }
        },
        Value::Native(Bson::String(s)) => normalize_str(s),
        other => other.into_bson(),
    }
}

fn normalize_str(s: String) -> Bson {
    if s.len() == OBJECT_ID_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(oid) = ObjectId::parse_str(&s) {
            return Bson::ObjectId(oid);
        }
    }
    if is_binary_uuid(s.as_bytes()) {
        return uuid(s.into_bytes());
    }
    Bson::String(s)
}

fn is_binary_uuid(bytes: &[u8]) -> bool {
    bytes.len() == UUID_LEN
        && bytes
            .iter()
            .any(|&b| !matches!(b, 0x20..=0x7E | b'\t' | b'\r' | b'\n'))
}

fn uuid(bytes: Vec<u8>) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string_becomes_object_id() {
        let id = normalize(Value::from("507f1f77bcf86cd799439011"));
        match id {
            Bson::ObjectId(oid) => assert_eq!(oid.to_hex(), "507f1f77bcf86cd799439011"),
            other => panic!("expected object id, got {other:?}"),
        }
    }

    #[test]
    fn test_uppercase_hex_is_accepted() {
        assert!(matches!(
            normalize(Value::from("507F1F77BCF86CD799439011")),
            Bson::ObjectId(_)
        ));
    }

    #[test]
    fn test_non_printable_16_bytes_becomes_uuid() {
        let raw: Vec<u8> = (0u8..16).collect();
        match normalize(Value::bytes(raw.clone())) {
            Bson::Binary(bin) => {
                assert_eq!(bin.subtype, BinarySubtype::Uuid);
                assert_eq!(bin.bytes, raw);
            }
            other => panic!("expected binary uuid, got {other:?}"),
        }
    }

    #[test]
    fn test_printable_16_bytes_pass_through() {
        assert_eq!(
            normalize(Value::from("abcdefghijklmnop")),
            Bson::String("abcdefghijklmnop".into())
        );
        // Whitespace control characters count as printable.
        assert_eq!(
            normalize(Value::from("abcdefghijklmn\t\n")),
            Bson::String("abcdefghijklmn\t\n".into())
        );
    }

    #[test]
    fn test_plain_values_pass_through() {
        assert_eq!(normalize(Value::from("plain")), Bson::String("plain".into()));
        assert_eq!(normalize(Value::from(42)), Bson::Int32(42));
        // 24 characters but not hex.
        assert_eq!(
            normalize(Value::from("zzzzzzzzzzzzzzzzzzzzzzzz")),
            Bson::String("zzzzzzzzzzzzzzzzzzzzzzzz".into())
        );
    }

    #[test]
    fn test_deterministic() {
        let a = normalize(Value::from("507f1f77bcf86cd799439011"));
        let b = normalize(Value::from("507f1f77bcf86cd799439011"));
        assert_eq!(a, b);
    }
}
