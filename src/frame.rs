//! Length-prefixed framing and per-connection frame reassembly.
//!
//! A frame on the wire is a length prefix followed by exactly that many
//! payload bytes. [`LengthFormat`] describes the prefix; the crate default is
//! a four byte little-endian prefix. [`FrameAssembler`] turns arbitrarily
//! chunked socket reads back into complete frames: a single read may carry a
//! fraction of a frame, one frame, or the tail of one frame plus the header
//! of the next.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Byte order used for encoding and decoding length prefixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Format of the length prefix preceding each frame.
#[derive(Clone, Copy, Debug)]
pub struct LengthFormat {
    bytes: usize,
    endianness: Endianness,
}

impl LengthFormat {
    /// Create a new [`LengthFormat`].
    ///
    /// Only two and four byte prefixes are supported; other widths are
    /// rejected when a frame is decoded or encoded.
    #[must_use]
    pub const fn new(bytes: usize, endianness: Endianness) -> Self { Self { bytes, endianness } }

    /// Two byte big-endian prefix.
    #[must_use]
    pub const fn u16_be() -> Self { Self::new(2, Endianness::Big) }

    /// Two byte little-endian prefix.
    #[must_use]
    pub const fn u16_le() -> Self { Self::new(2, Endianness::Little) }

    /// Four byte big-endian prefix.
    #[must_use]
    pub const fn u32_be() -> Self { Self::new(4, Endianness::Big) }

    /// Four byte little-endian prefix.
    #[must_use]
    pub const fn u32_le() -> Self { Self::new(4, Endianness::Little) }

    /// Width of the prefix in bytes.
    #[must_use]
    pub const fn prefix_len(&self) -> usize { self.bytes }

    pub(crate) fn read_len(&self, bytes: &[u8]) -> io::Result<usize> {
        let len = match (self.bytes, self.endianness) {
            (2, Endianness::Big) => u32::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            (2, Endianness::Little) => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            (4, Endianness::Big) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (4, Endianness::Little) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unsupported length prefix size",
                ));
            }
        };
        usize::try_from(len).map_err(|_| io::Error::other("frame too large"))
    }

    fn write_len(&self, len: usize, dst: &mut BytesMut) -> io::Result<()> {
        let too_large = || io::Error::new(io::ErrorKind::InvalidInput, "frame too large");
        match (self.bytes, self.endianness) {
            (2, Endianness::Big) => {
                dst.put_slice(&u16::try_from(len).map_err(|_| too_large())?.to_be_bytes());
            }
            (2, Endianness::Little) => {
                dst.put_slice(&u16::try_from(len).map_err(|_| too_large())?.to_le_bytes());
            }
            (4, Endianness::Big) => {
                dst.put_slice(&u32::try_from(len).map_err(|_| too_large())?.to_be_bytes());
            }
            (4, Endianness::Little) => {
                dst.put_slice(&u32::try_from(len).map_err(|_| too_large())?.to_le_bytes());
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unsupported length prefix size",
                ));
            }
        }
        Ok(())
    }

    /// Wrap `payload` in a length prefix, producing one complete frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload length does not fit in the prefix or
    /// the prefix width is unsupported.
    pub fn encode_frame(&self, payload: &[u8]) -> io::Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.bytes + payload.len());
        self.write_len(payload.len(), &mut dst)?;
        dst.extend_from_slice(payload);
        Ok(dst.freeze())
    }
}

impl Default for LengthFormat {
    fn default() -> Self { Self::u32_le() }
}

/// Stateful reassembler turning raw socket reads into complete frames.
///
/// One assembler exists per connection. Bytes are appended with
/// [`push`](Self::push); [`next_frame`](Self::next_frame) yields complete
/// frames and must be called in a loop after every push, because a single
/// chunk may complete several frames at once.
///
/// The declared length is parsed once, only when the full prefix is buffered,
/// and a frame is reported only when its payload is buffered in full.
/// Leftover bytes after an extracted frame carry forward into the next one.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    format: LengthFormat,
    buf: BytesMut,
    pending: Option<usize>,
}

impl FrameAssembler {
    /// Create an assembler using the crate default [`LengthFormat`].
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create an assembler using a custom [`LengthFormat`].
    #[must_use]
    pub fn with_format(format: LengthFormat) -> Self {
        Self {
            format,
            buf: BytesMut::new(),
            pending: None,
        }
    }

    /// Append raw bytes received from the transport.
    pub fn push(&mut self, chunk: &[u8]) { self.buf.extend_from_slice(chunk); }

    /// Number of bytes buffered but not yet extracted as frames.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buf.len() }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed; an incomplete frame is
    /// never an error, the assembler simply waits for further input.
    ///
    /// # Errors
    ///
    /// Returns an error if the length prefix cannot be interpreted.
    pub fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        let prefix = self.format.prefix_len();
        if self.pending.is_none() {
            if self.buf.len() < prefix {
                return Ok(None);
            }
            self.pending = Some(self.format.read_len(&self.buf[..prefix])?);
        }
        match self.pending {
            Some(len) if self.buf.len() - prefix >= len => {
                self.buf.advance(prefix);
                let frame = self.buf.split_to(len).freeze();
                self.pending = None;
                Ok(Some(frame))
            }
            _ => Ok(None),
        }
    }
}
