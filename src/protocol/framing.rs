//! Test host message framing layer
//!
//! Every message is a UTF-8 string preceded by its byte length encoded as a
//! 7-bit variable-length integer (the layout `BinaryWriter.Write(string)`
//! produces on the host side):
//!
//! ```text
//! <len: 1-5 bytes, low 7 bits first, high bit = more><len bytes of UTF-8>
//! ```

use crate::io::transport::Transport;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Maximum frame size to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// A 32-bit length never needs more than five 7-bit groups
const MAX_PREFIX_BYTES: usize = 5;

/// Errors produced while encoding or decoding frames
#[derive(Debug, thiserror::Error)]
pub enum FrameCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid length prefix")]
    InvalidLengthPrefix,

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Length-prefixed string codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with a custom size ceiling
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the 7-bit length prefix at the start of `buf`
///
/// Returns `(length, prefix_len)` once the prefix is complete.
fn decode_length_prefix(buf: &[u8]) -> Result<Option<(usize, usize)>, FrameCodecError> {
    let mut value: u64 = 0;
    for (index, byte) in buf.iter().take(MAX_PREFIX_BYTES).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            if value > u64::from(u32::MAX) {
                return Err(FrameCodecError::InvalidLengthPrefix);
            }
            return Ok(Some((value as usize, index + 1)));
        }
    }

    if buf.len() >= MAX_PREFIX_BYTES {
        Err(FrameCodecError::InvalidLengthPrefix)
    } else {
        Ok(None)
    }
}

fn encode_length_prefix(mut length: usize, dst: &mut BytesMut) {
    while length >= 0x80 {
        dst.put_u8((length as u8 & 0x7f) | 0x80);
        length >>= 7;
    }
    dst.put_u8(length as u8);
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((length, prefix_len)) = decode_length_prefix(&src[..])? else {
            return Ok(None);
        };

        if length > self.max_frame_size {
            return Err(FrameCodecError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let frame_len = prefix_len + length;
        if src.len() < frame_len {
            trace!(
                "FrameCodec: Incomplete frame - need {} more bytes",
                frame_len - src.len()
            );
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let payload = src.split_to(length);
        trace!("FrameCodec: Parsed complete frame ({} bytes)", length);
        Ok(Some(String::from_utf8(payload.to_vec())?))
    }
}

impl<'a> Encoder<&'a str> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(FrameCodecError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(MAX_PREFIX_BYTES + item.len());
        encode_length_prefix(item.len(), dst);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

/// Error types for message framing over a transport
#[derive(Debug, thiserror::Error)]
pub enum FramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error(transparent)]
    Codec(#[from] FrameCodecError),
}

/// Frame-level wrapper around a byte transport
///
/// Partial frames stay buffered between calls, so abandoning a pending
/// `receive_frame` never loses data.
pub struct MessageFraming<T: Transport> {
    transport: T,
    codec: FrameCodec,
    receive_buffer: BytesMut,
}

impl<T: Transport> MessageFraming<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(),
            receive_buffer: BytesMut::new(),
        }
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one frame
    pub async fn send_frame(&mut self, frame: &str) -> Result<(), FramingError<T::Error>> {
        let mut encoded = BytesMut::new();
        self.codec.encode(frame, &mut encoded)?;

        trace!("MessageFraming: Sending frame ({} bytes content)", frame.len());

        self.transport
            .send(&encoded)
            .await
            .map_err(FramingError::Transport)
    }

    /// Receive the next complete frame
    pub async fn receive_frame(&mut self) -> Result<String, FramingError<T::Error>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.receive_buffer)? {
                return Ok(frame);
            }

            let chunk = self
                .transport
                .receive()
                .await
                .map_err(FramingError::Transport)?;
            self.receive_buffer.extend_from_slice(&chunk);
        }
    }

    pub async fn close(&mut self) -> Result<(), FramingError<T::Error>> {
        self.transport
            .close()
            .await
            .map_err(FramingError::Transport)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
