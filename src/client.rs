//! Blocking call client.
//!
//! [`CallClient`] is the outbound counterpart of the host: it opens one TCP
//! connection, writes each call as a framed [`CallEnvelope`] and blocks until
//! the paired framed response arrives. Blocking on connect and read is
//! deliberate; the client is a simple synchronous request/response surface,
//! and the connection is reused across calls.
//!
//! Failure responses surface as [`CallError::Remote`], annotated with the
//! namespace and method so callers can use ordinary error handling.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use bytes::BytesMut;
use serde::{Serialize, de::DeserializeOwned};

use crate::envelope::{self, CallEnvelope, ResponseEnvelope, Status};
use crate::frame::LengthFormat;
use crate::serializer::{BincodeSerializer, CodecError, Serializer};

/// Errors raised by [`CallClient::call`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Transport failure on the underlying socket.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// Local failure encoding the request or decoding the response.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The server answered with a failure envelope.
    #[error("remote call {namespace}.{method} failed: {message}")]
    Remote {
        /// Namespace the call targeted.
        namespace: String,
        /// Method the call targeted.
        method: String,
        /// Error message carried in the failure envelope.
        message: String,
    },
    /// The peer closed the connection before a full response arrived.
    #[error("connection closed by peer")]
    Disconnected,
}

/// Argument tuple encodable as sub-framed call parameters.
///
/// Implemented for tuples of up to five serializable values; each element is
/// written as `[u32 length][codec bytes]` in order.
pub trait Params<S: Serializer> {
    /// Append every parameter to the request body.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if any element fails to serialize.
    fn encode(&self, serializer: &S, dst: &mut BytesMut) -> Result<(), CodecError>;
}

macro_rules! impl_params {
    ($($p:ident),*) => {
        impl<S: Serializer, $($p: Serialize),*> Params<S> for ($($p,)*) {
            #[allow(non_snake_case, unused_variables)]
            fn encode(&self, serializer: &S, dst: &mut BytesMut) -> Result<(), CodecError> {
                let ($($p,)*) = self;
                $(envelope::write_param(serializer, dst, $p)?;)*
                Ok(())
            }
        }
    };
}

impl_params!();
impl_params!(P1);
impl_params!(P1, P2);
impl_params!(P1, P2, P3);
impl_params!(P1, P2, P3, P4);
impl_params!(P1, P2, P3, P4, P5);

/// Synchronous client for services hosted by a `WirecallServer`.
pub struct CallClient<S = BincodeSerializer> {
    stream: TcpStream,
    serializer: S,
    format: LengthFormat,
}

impl CallClient {
    /// Connect using the default serializer.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the connection cannot be established.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, CallError> {
        Self::connect_with(addr, BincodeSerializer)
    }
}

impl<S: Serializer> CallClient<S> {
    /// Connect using a specific serializer instance.
    ///
    /// The serializer must match the one the target registry decodes with.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the connection cannot be established.
    pub fn connect_with(addr: impl ToSocketAddrs, serializer: S) -> Result<Self, CallError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            serializer,
            format: LengthFormat::default(),
        })
    }

    /// Call `namespace.method` with `params`, blocking for the result.
    ///
    /// For void-returning methods use `R = ()`; the empty success payload
    /// decodes to `()`.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Remote`] when the server reports a failure,
    /// [`CallError::Disconnected`] when the peer closes mid-response, and
    /// codec or I/O errors for local failures.
    pub fn call<P, R>(&mut self, namespace: &str, method: &str, params: P) -> Result<R, CallError>
    where
        P: Params<S>,
        R: DeserializeOwned,
    {
        let mut body = BytesMut::new();
        CallEnvelope::encode_header(&mut body, namespace, method)?;
        params.encode(&self.serializer, &mut body)?;
        let framed = self.format.encode_frame(&body)?;
        self.stream.write_all(&framed)?;

        let payload = self.read_response()?;
        let response = ResponseEnvelope::decode(&payload)?;
        match response.status {
            Status::Success => Ok(self.serializer.deserialize(&response.payload)?),
            Status::Failure => Err(CallError::Remote {
                namespace: namespace.to_owned(),
                method: method.to_owned(),
                message: response.failure_message(),
            }),
        }
    }

    fn read_response(&mut self) -> Result<Vec<u8>, CallError> {
        let prefix_len = self.format.prefix_len();
        let mut prefix = [0_u8; 4];
        read_exact(&mut self.stream, &mut prefix[..prefix_len])?;
        let len = self.format.read_len(&prefix[..prefix_len])?;
        let mut payload = vec![0_u8; len];
        read_exact(&mut self.stream, &mut payload)?;
        Ok(payload)
    }
}

fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), CallError> {
    stream.read_exact(buf).map_err(|error| {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            CallError::Disconnected
        } else {
            CallError::Io(error)
        }
    })
}
