//! `wirecall` exposes plain in-process objects as callable services over raw
//! TCP, using length-prefixed framing and a pluggable serializer.
//!
//! The runtime has three load-bearing pieces: a non-blocking host that
//! accepts many concurrent connections against a fixed pool of receive
//! segments ([`server`], [`pool`]); a framing layer that reassembles complete
//! messages out of arbitrarily chunked reads ([`frame`]); and a dispatch
//! registry that routes each decoded call to a registered method, marshals
//! parameters and return values, and folds every error into a wire-level
//! failure envelope ([`registry`], [`service`]).
//!
//! Embedding code registers [`ServiceTable`]s in a [`ServiceRegistry`] and
//! hands it to a [`WirecallServer`]; remote callers use the blocking
//! [`CallClient`] or speak the wire format directly.

pub mod client;
mod connection;
pub mod envelope;
pub mod frame;
pub mod pool;
pub mod registry;
pub mod serializer;
pub mod server;
pub mod service;

pub use client::{CallClient, CallError, Params};
pub use envelope::{CallEnvelope, ParamCursor, ResponseEnvelope, Status};
pub use frame::{Endianness, FrameAssembler, LengthFormat};
pub use pool::{Segment, SegmentPool};
pub use registry::{DispatchError, RegistryError, ServiceRegistry};
pub use serializer::{BincodeSerializer, CodecError, Serializer};
pub use server::{
    DEFAULT_BACKLOG, DEFAULT_SEGMENT_COUNT, DEFAULT_SEGMENT_SIZE, WirecallServer,
};
pub use service::{FallibleMethod, HandlerError, InvokeError, Method, ServiceTable};
