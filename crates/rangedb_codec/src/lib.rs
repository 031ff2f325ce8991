//! # rangedb Codec
//!
//! Value serialization for rangedb.
//!
//! The engine treats stored values as opaque payloads. This crate is the
//! single place that turns them into bytes and back:
//!
//! - [`to_cbor`] / [`from_cbor`] - serde-driven CBOR via `ciborium`
//! - [`Encode`] / [`Decode`] - blanket traits over serde types
//! - [`validate_round_trip`] - encode, decode and compare before a write
//!
//! ## Usage
//!
//! ```
//! use rangedb_codec::{from_cbor, to_cbor, validate_round_trip};
//!
//! let bytes = to_cbor(&("Anna", 3u32)).unwrap();
//! let decoded: (String, u32) = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, ("Anna".to_string(), 3));
//!
//! assert_eq!(validate_round_trip(&42i64).unwrap(), to_cbor(&42i64).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use ciborium::Value;
pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value's `Serialize`
/// implementation fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| CodecError::encoding(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR
/// for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding(e.to_string()))
}

/// Encodes `value` and proves the bytes decode back to an equal value.
///
/// Returns the encoded bytes so callers do not pay for a second encode.
///
/// # Errors
///
/// Returns the encode or decode failure, or
/// [`CodecError::RoundTripMismatch`] if the decoded value differs.
pub fn validate_round_trip<T>(value: &T) -> CodecResult<Vec<u8>>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    let bytes = to_cbor(value)?;
    let decoded: T = from_cbor(&bytes)?;
    if &decoded != value {
        return Err(CodecError::mismatch("decoded value differs from the original"));
    }
    Ok(bytes)
}

/// Types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode a value from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not describe a `Self`.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T: Serialize> Encode for T {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl<T: DeserializeOwned> Decode for T {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        cupcakes: u32,
        tags: Vec<String>,
    }

    /// Serializes as a string but deserializes as an integer.
    #[derive(Debug, PartialEq)]
    struct Lopsided;

    impl Serialize for Lopsided {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str("not a number")
        }
    }

    impl<'de> Deserialize<'de> for Lopsided {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            u64::deserialize(deserializer).map(|_| Lopsided)
        }
    }

    /// Decodes successfully but loses information.
    #[derive(Debug, PartialEq)]
    struct Forgetful(u32);

    impl Serialize for Forgetful {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u32(self.0)
        }
    }

    impl<'de> Deserialize<'de> for Forgetful {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            u32::deserialize(deserializer).map(|_| Forgetful(0))
        }
    }

    #[test]
    fn struct_round_trip() {
        let anna = Person {
            name: "Anna".into(),
            cupcakes: 3,
            tags: vec!["a".into()],
        };
        let bytes = anna.encode().unwrap();
        assert_eq!(Person::decode(&bytes).unwrap(), anna);
        assert_eq!(validate_round_trip(&anna).unwrap(), bytes);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = from_cbor::<Person>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }

    #[test]
    fn wrong_shape_fails_to_decode() {
        let bytes = to_cbor(&"just a string").unwrap();
        assert!(from_cbor::<Person>(&bytes).is_err());
    }

    #[test]
    fn undecodable_value_fails_validation() {
        let err = validate_round_trip(&Lopsided).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }

    #[test]
    fn lossy_value_fails_validation() {
        let err = validate_round_trip(&Forgetful(7)).unwrap_err();
        assert!(matches!(err, CodecError::RoundTripMismatch { .. }));
        assert!(validate_round_trip(&Forgetful(0)).is_ok());
    }

    #[test]
    fn generic_value_reads_any_record() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), 1i64);
        let bytes = to_cbor(&map).unwrap();
        let value: Value = from_cbor(&bytes).unwrap();
        assert!(value.is_map());
    }

    proptest! {
        #[test]
        fn plain_data_always_validates(
            name in ".{0,24}",
            cupcakes in any::<u32>(),
            tags in prop::collection::vec("[a-z]{0,8}", 0..4),
        ) {
            let person = Person { name, cupcakes, tags };
            prop_assert!(validate_round_trip(&person).is_ok());
        }
    }
}
