//! The dual-size prefixed frame format.
//!
//! Every message on the wire is one frame: a 17-byte prefix followed by the
//! payload. The prefix carries a flags byte and the payload size twice, once
//! in native byte order and once in big-endian. The two sizes must agree;
//! a mismatch means the stream is corrupt and the connection is unusable.

use crate::error::{Error, FrameError, Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the frame prefix in bytes.
pub const PREFIX_SIZE: usize = 17;

/// Maximum accepted payload size (64MB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Payload disposition bits carried in the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No disposition bits set; payload is an opaque (JSON) body.
    pub const NONE: Self = Self(0);
    /// Control frame, e.g. the handshake banner.
    pub const CONTROL: Self = Self(1);
    /// Frame explicitly carries no payload.
    pub const EMPTY: Self = Self(2);
    /// Payload is raw bytes rather than a structured body.
    pub const RAW: Self = Self(4);
    /// Payload is a remote error message.
    pub const ERROR: Self = Self(8);

    /// Build flags from a raw prefix byte. Unknown bits are preserved; the
    /// byte is opaque beyond the dispositions this layer inspects.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw prefix byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One self-describing unit of the wire protocol.
///
/// A zero-size frame decodes to `payload: None`, not to an empty buffer;
/// the absence of a value is distinct from an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload disposition.
    pub flags: FrameFlags,
    /// Payload bytes, if any.
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Create a frame. An empty payload is normalized to `None`.
    pub fn new(flags: FrameFlags, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            flags,
            payload: if payload.is_empty() {
                None
            } else {
                Some(payload)
            },
        }
    }

    /// Create a frame with no payload.
    #[must_use]
    pub const fn empty(flags: FrameFlags) -> Self {
        Self {
            flags,
            payload: None,
        }
    }

    /// Whether the peer marked this frame as carrying an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.flags.contains(FrameFlags::ERROR)
    }

    fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Encode prefix and payload into a single buffer.
    ///
    /// # Errors
    ///
    /// Fails if the `EMPTY` flag is set on a frame that carries a payload
    /// (a caller contract violation), or if the payload is oversized.
    pub fn encode(&self) -> Result<Bytes> {
        let len = self.payload_len();
        if self.flags.contains(FrameFlags::EMPTY) && len != 0 {
            return Err(FrameError::PayloadWithEmptyFlag.into());
        }
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: len as u64,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }

        let mut buf = BytesMut::with_capacity(PREFIX_SIZE + len);
        buf.put_u8(self.flags.bits());
        buf.put_u64_ne(len as u64);
        buf.put_u64(len as u64);
        if let Some(payload) = &self.payload {
            buf.put_slice(payload);
        }
        Ok(buf.freeze())
    }

    /// Write the frame to a blocking stream.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one frame from a blocking stream, accumulating short reads until
    /// the full payload is assembled.
    ///
    /// # Errors
    ///
    /// A stream that closes cleanly between frames yields
    /// [`TransportError::Closed`]; one that closes mid-frame yields a
    /// distinct truncation error.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; PREFIX_SIZE];
        let got = read_full(reader, &mut prefix)?;
        if got == 0 {
            return Err(TransportError::Closed.into());
        }
        if got < PREFIX_SIZE {
            return Err(FrameError::TruncatedPrefix.into());
        }

        let (flags, size) = parse_prefix(&prefix)?;
        if size == 0 {
            return Ok(Self::empty(flags));
        }

        let mut payload = vec![0u8; size as usize];
        let got = read_full(reader, &mut payload)?;
        if got < payload.len() {
            return Err(FrameError::TruncatedPayload {
                expected: payload.len(),
                got,
            }
            .into());
        }
        Ok(Self {
            flags,
            payload: Some(payload.into()),
        })
    }
}

/// Parse a 17-byte prefix, validating the size mirror.
pub fn parse_prefix(prefix: &[u8; PREFIX_SIZE]) -> Result<(FrameFlags, u64)> {
    let mut buf = &prefix[..];
    let flags = FrameFlags::from_bits(buf.get_u8());
    let size = buf.get_u64_ne();
    let mirror = buf.get_u64();
    if size != mirror {
        return Err(FrameError::CorruptPrefix { size, mirror }.into());
    }
    if size > MAX_FRAME_SIZE as u64 {
        return Err(FrameError::TooLarge {
            size,
            max: MAX_FRAME_SIZE,
        }
        .into());
    }
    Ok((flags, size))
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Codec for framing over an async stream.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < PREFIX_SIZE {
            buf.reserve(PREFIX_SIZE - buf.len());
            return Ok(None);
        }

        let mut prefix = [0u8; PREFIX_SIZE];
        prefix.copy_from_slice(&buf[..PREFIX_SIZE]);
        let (flags, size) = parse_prefix(&prefix)?;

        let total = PREFIX_SIZE + size as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(PREFIX_SIZE);
        let payload = if size == 0 {
            None
        } else {
            Some(buf.split_to(size as usize).freeze())
        };
        Ok(Some(Frame { flags, payload }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None if buf.len() < PREFIX_SIZE => Err(FrameError::TruncatedPrefix.into()),
            None => {
                let mut header = &buf[1..];
                let expected = header.get_u64_ne() as usize;
                Err(FrameError::TruncatedPayload {
                    expected,
                    got: buf.len() - PREFIX_SIZE,
                }
                .into())
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<()> {
        let encoded = frame.encode()?;
        buf.reserve(encoded.len());
        buf.put_slice(&encoded);
        Ok(())
    }
}
