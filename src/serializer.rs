//! Pluggable value serialization.
//!
//! The [`Serializer`] trait is the codec contract used for every parameter
//! and return value crossing the wire: `serialize(value) -> bytes` and
//! `deserialize(bytes) -> value`. A [`BincodeSerializer`] using bincode's
//! standard configuration is provided as the default.

use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Serialize, de::DeserializeOwned};

/// Errors produced by the codec layer: value serialization and the envelope
/// and parameter framing built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to serialize a value.
    #[error("failed to serialize value: {0}")]
    Serialize(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to deserialize a value.
    #[error("failed to deserialize value: {0}")]
    Deserialize(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// An envelope field ended before its declared length.
    #[error("call envelope truncated while reading {field}")]
    Truncated {
        /// Envelope field being read when the bytes ran out.
        field: &'static str,
    },
    /// An envelope string is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Envelope field holding the offending bytes.
        field: &'static str,
    },
    /// A response carried a status byte other than 0 or 1.
    #[error("invalid response status byte {0:#04x}")]
    InvalidStatus(u8),
    /// A length does not fit in its four byte prefix.
    #[error("length does not fit in a 32-bit prefix")]
    LengthOverflow,
    /// A parameter's declared length exceeds the remaining payload.
    #[error("parameter {index} truncated: have {have} bytes, need {need}")]
    ShortParameter {
        /// Zero-based position of the parameter in declared order.
        index: usize,
        /// Bytes remaining in the payload.
        have: usize,
        /// Bytes the parameter declared.
        need: usize,
    },
}

/// Trait for serializing and deserializing parameter and return values.
///
/// # Object Safety
///
/// This trait is not object-safe: both methods are generic over the value
/// type. Use concrete serializer types in API bounds; the registry, server
/// and client are all generic over `S: Serializer` for this reason.
pub trait Serializer: Send + Sync {
    /// Serialize `value` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialize`] if the value cannot be encoded.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a value of type `T` from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Deserialize`] if the bytes cannot be decoded.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Serializer using `bincode` with its standard configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        encode_to_vec(value, config::standard())
            .map_err(|error| CodecError::Serialize(Box::new(error)))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        decode_from_slice(bytes, config::standard())
            .map(|(value, _)| value)
            .map_err(|error| CodecError::Deserialize(Box::new(error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let serializer = BincodeSerializer;
        let bytes = serializer.serialize(&42_i32).expect("serialize");
        let value: i32 = serializer.deserialize(&bytes).expect("deserialize");
        assert_eq!(value, 42);
    }

    #[test]
    fn unit_encodes_to_empty_payload() {
        let serializer = BincodeSerializer;
        let bytes = serializer.serialize(&()).expect("serialize");
        assert!(bytes.is_empty());
        serializer.deserialize::<()>(&bytes).expect("deserialize");
    }

    #[test]
    fn garbage_bytes_fail_to_deserialize() {
        let serializer = BincodeSerializer;
        let err = serializer.deserialize::<String>(&[0xFF; 3]).unwrap_err();
        assert!(matches!(err, CodecError::Deserialize(_)));
    }
}
