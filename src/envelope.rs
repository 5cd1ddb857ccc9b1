//! Call and response envelopes and per-parameter sub-framing.
//!
//! A request frame's payload is a [`CallEnvelope`]: two length-prefixed UTF-8
//! strings (namespace, then method) followed by the encoded parameter bytes.
//! A response frame's payload is a [`ResponseEnvelope`]: one status byte
//! (`1` success, `0` failure) followed by either the encoded return value or
//! a UTF-8 error message.
//!
//! The outer call envelope is not parameter-count-aware, so each parameter is
//! independently sub-framed as `[u32 length][codec bytes]` and decoded in the
//! target method's declared order.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::serializer::{CodecError, Serializer};

/// Outcome carried in the first byte of every response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The call completed and the payload is the encoded return value.
    Success,
    /// The call failed and the payload is a UTF-8 error message.
    Failure,
}

impl Status {
    const SUCCESS_BYTE: u8 = 1;
    const FAILURE_BYTE: u8 = 0;

    /// Map a wire byte to a status.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::SUCCESS_BYTE => Some(Self::Success),
            Self::FAILURE_BYTE => Some(Self::Failure),
            _ => None,
        }
    }

    /// Wire byte for this status.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Success => Self::SUCCESS_BYTE,
            Self::Failure => Self::FAILURE_BYTE,
        }
    }
}

/// Decoded request: target namespace, method name and raw parameter bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnvelope {
    /// Logical service name the call targets.
    pub namespace: String,
    /// Method name within the namespace's table.
    pub method: String,
    /// Codec-encoded, per-parameter sub-framed argument bytes.
    pub payload: Bytes,
}

impl CallEnvelope {
    /// Decode an envelope from a complete frame payload.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if either string is truncated or not UTF-8.
    pub fn decode(mut frame: Bytes) -> Result<Self, CodecError> {
        let namespace = read_string(&mut frame, "namespace")?;
        let method = read_string(&mut frame, "method")?;
        Ok(Self {
            namespace,
            method,
            payload: frame,
        })
    }

    /// Append the namespace and method headers to an outbound request body.
    ///
    /// Parameter bytes are appended after this by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LengthOverflow`] if a string exceeds the 32-bit
    /// length prefix.
    pub fn encode_header(
        dst: &mut BytesMut,
        namespace: &str,
        method: &str,
    ) -> Result<(), CodecError> {
        write_string(dst, namespace)?;
        write_string(dst, method)
    }
}

fn read_string(buf: &mut Bytes, field: &'static str) -> Result<String, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Truncated { field });
    }
    let len = buf.get_u32_le() as usize;
    if buf.len() < len {
        return Err(CodecError::Truncated { field });
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn write_string(dst: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = u32::try_from(value.len()).map_err(|_| CodecError::LengthOverflow)?;
    dst.extend_from_slice(&len.to_le_bytes());
    dst.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Response carried back to the caller: a status byte plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// Success or failure marker.
    pub status: Status,
    /// Encoded return value, or a UTF-8 error message on failure.
    pub payload: Vec<u8>,
}

impl ResponseEnvelope {
    /// Build a success envelope around an encoded return value.
    #[must_use]
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Success,
            payload,
        }
    }

    /// Build a failure envelope carrying `message` as UTF-8 bytes.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            payload: message.into().into_bytes(),
        }
    }

    /// Whether the envelope reports success.
    #[must_use]
    pub fn is_success(&self) -> bool { self.status == Status::Success }

    /// Failure message carried in the payload, lossily decoded.
    #[must_use]
    pub fn failure_message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialize to the wire form `[status byte][payload]`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.status.as_byte());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode from the wire form.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the status byte is missing or invalid.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (&status, payload) = bytes
            .split_first()
            .ok_or(CodecError::Truncated { field: "status" })?;
        let status = Status::from_byte(status).ok_or(CodecError::InvalidStatus(status))?;
        Ok(Self {
            status,
            payload: payload.to_vec(),
        })
    }
}

/// Serialize `value` and append it to `dst` with its own length prefix.
///
/// # Errors
///
/// Returns a [`CodecError`] if serialization fails or the encoded value
/// exceeds the 32-bit length prefix.
pub fn write_param<S: Serializer, T: Serialize>(
    serializer: &S,
    dst: &mut BytesMut,
    value: &T,
) -> Result<(), CodecError> {
    let bytes = serializer.serialize(value)?;
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::LengthOverflow)?;
    dst.extend_from_slice(&len.to_le_bytes());
    dst.extend_from_slice(&bytes);
    Ok(())
}

/// Cursor over the sub-framed parameter bytes of a call payload.
///
/// Parameters are decoded strictly in the order the target method declares
/// them; the sub-framing makes each boundary self-describing.
#[derive(Debug)]
pub struct ParamCursor<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> ParamCursor<'a> {
    /// Create a cursor over a call payload.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self { Self { bytes, index: 0 } }

    /// Decode the next parameter in declared order.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ShortParameter`] if the payload ends before the
    /// parameter's declared length, or a decode error from the serializer.
    pub fn next<S: Serializer, T: DeserializeOwned>(
        &mut self,
        serializer: &S,
    ) -> Result<T, CodecError> {
        if self.bytes.len() < 4 {
            return Err(CodecError::ShortParameter {
                index: self.index,
                have: self.bytes.len(),
                need: 4,
            });
        }
        let (prefix, rest) = self.bytes.split_at(4);
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if rest.len() < len {
            return Err(CodecError::ShortParameter {
                index: self.index,
                have: rest.len(),
                need: len,
            });
        }
        let (param, rest) = rest.split_at(len);
        self.bytes = rest;
        self.index += 1;
        serializer.deserialize(param)
    }

    /// Bytes not yet consumed by [`next`](Self::next).
    #[must_use]
    pub const fn remaining(&self) -> usize { self.bytes.len() }
}
