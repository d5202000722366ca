//! Frame codec for hook connections.
//!
//! The hook script writes a single JSON object with no terminator and, for
//! permission requests, keeps the socket open waiting for a reply. Frames
//! are therefore recognised by parsing a complete JSON value out of the
//! buffered bytes rather than by a delimiter. Trailing newlines and EOF
//! termination are both accepted.

use bytes::{Buf, BytesMut};
use serde_json::Deserializer;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use tide_core::DomainError;

use crate::message::PermissionResponse;
use crate::parse::RawHookEvent;

/// Maximum frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Errors raised while framing a hook connection.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame exceeds {max} bytes (buffered {size})")]
    TooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed mid-frame ({0} bytes pending)")]
    Truncated(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for DomainError {
    fn from(err: FrameError) -> Self {
        DomainError::protocol(err.to_string())
    }
}

/// Decodes [`RawHookEvent`] frames and encodes [`PermissionResponse`] replies.
#[derive(Debug, Clone)]
pub struct HookFrameCodec {
    max_frame_size: usize,
}

impl HookFrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for HookFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for HookFrameCodec {
    type Item = RawHookEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let leading = src
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        src.advance(leading);

        if src.is_empty() {
            return Ok(None);
        }

        let mut stream = Deserializer::from_slice(&src[..]).into_iter::<RawHookEvent>();
        match stream.next() {
            Some(Ok(frame)) => {
                let consumed = stream.byte_offset();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > self.max_frame_size {
                    return Err(FrameError::TooLarge {
                        size: src.len(),
                        max: self.max_frame_size,
                    });
                }
                Ok(None)
            }
            Some(Err(e)) => Err(FrameError::Json(e)),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated(src.len())),
        }
    }
}

impl Encoder<PermissionResponse> for HookFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: PermissionResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(&item)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
