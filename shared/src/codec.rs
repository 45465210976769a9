//! JSON codec for the device identity record
//!
//! The record carries exactly two string fields:
//! ```text
//! {"address":"00:11:22:AA:BB:CC","name":"Band"}
//! ```
//!
//! There is no version field; unknown fields are ignored on decode.

use thiserror::Error;

use crate::identity::DeviceIdentity;

/// Field holding the transport address
pub const FIELD_ADDRESS: &str = "address";

/// Field holding the display name
pub const FIELD_NAME: &str = "name";

/// Errors that can occur while encoding or decoding an identity record
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed identity record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Identity record is missing field '{0}'")]
    MissingField(&'static str),
}

/// Encode an identity into its compact JSON record
pub fn encode(identity: &DeviceIdentity) -> Result<String, CodecError> {
    Ok(serde_json::to_string(identity)?)
}

/// Decode an identity from a JSON record
///
/// A record whose name is missing or `null` decodes with an empty name. The
/// address is taken as written; it is checked when the device connects.
pub fn decode(record: &str) -> Result<DeviceIdentity, CodecError> {
    let value: serde_json::Value = serde_json::from_str(record)?;

    let address = value
        .get(FIELD_ADDRESS)
        .and_then(|v| v.as_str())
        .ok_or(CodecError::MissingField(FIELD_ADDRESS))?;

    let name = value
        .get(FIELD_NAME)
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    Ok(DeviceIdentity::new(address, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_two_fields() {
        let identity = DeviceIdentity::new("00:11:22:AA:BB:CC", "Band");
        let record = encode(&identity).expect("encode failed");

        let value: serde_json::Value = serde_json::from_str(&record).expect("not json");
        let object = value.as_object().expect("not an object");
        assert_eq!(object.len(), 2);
        assert_eq!(object[FIELD_ADDRESS], "00:11:22:AA:BB:CC");
        assert_eq!(object[FIELD_NAME], "Band");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = DeviceIdentity::new("00:11:22:AA:BB:CC", "Band \"7\"");
        let decoded = decode(&encode(&original).expect("encode failed")).expect("decode failed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let decoded = decode(r#"{"address":"00:11:22:AA:BB:CC","name":"Band","rssi":-60}"#)
            .expect("decode failed");
        assert_eq!(decoded.name, "Band");
    }

    #[test]
    fn test_decode_missing_name_is_empty() {
        let decoded = decode(r#"{"address":"00:11:22:AA:BB:CC","name":null}"#).expect("decode failed");
        assert_eq!(decoded.name, "");
    }

    #[test]
    fn test_decode_missing_address() {
        let result = decode(r#"{"name":"Band"}"#);
        assert!(matches!(result, Err(CodecError::MissingField(FIELD_ADDRESS))));
    }

    #[test]
    fn test_decode_keeps_non_canonical_address() {
        let identity = DeviceIdentity::new("00:11:22:aa:bb:cc", "Band");
        let decoded = decode(&encode(&identity).expect("encode failed")).expect("decode failed");
        assert_eq!(decoded, identity);
        assert!(!decoded.has_valid_address());
    }

    #[test]
    fn test_decode_non_string_address() {
        let result = decode(r#"{"address":42,"name":"Band"}"#);
        assert!(matches!(result, Err(CodecError::MissingField(FIELD_ADDRESS))));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("{address"), Err(CodecError::Malformed(_))));
    }
}
