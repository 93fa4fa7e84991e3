//! NUL-delimited element framing for `tokio_util::codec`.
//!
//! [`ElementCodec`] buffers bytes until a `0x00` terminator arrives, then
//! decodes exactly that frame. A configurable size cap protects against
//! unbounded buffering from a peer that never sends a terminator.

use bytes::{BufMut, Bytes, BytesMut};
use talk_core::Element;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{self, FRAME_DELIMITER};
use crate::error::FrameError;

/// Default maximum frame size (16 MiB). Media attachments are the largest
/// expected frames.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for [`Element`] streams.
#[derive(Debug, Clone)]
pub struct ElementCodec {
    max_frame_size: usize,

    /// Bytes of the buffer already scanned for a terminator.
    scanned: usize,
}

impl ElementCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scanned: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for ElementCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ElementCodec {
    type Item = Element;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Element>, FrameError> {
        let start = self.scanned.min(src.len());
        let terminator = src
            .get(start..)
            .and_then(|unscanned| unscanned.iter().position(|b| *b == FRAME_DELIMITER));

        match terminator {
            Some(offset) => {
                let end = start + offset;
                self.scanned = 0;
                if end > self.max_frame_size {
                    return Err(FrameError::FrameTooLarge {
                        size: end,
                        max: self.max_frame_size,
                    });
                }
                let frame = src.split_to(end + 1);
                Ok(Some(codec::decode(&frame)?))
            }
            None => {
                if src.len() > self.max_frame_size {
                    return Err(FrameError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_size,
                    });
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Element>, FrameError> {
        match self.decode(src)? {
            Some(element) => Ok(Some(element)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::IncompleteFrame {
                buffered: src.len(),
            }),
        }
    }
}

impl Encoder<Element> for ElementCodec {
    type Error = FrameError;

    fn encode(&mut self, element: Element, dst: &mut BytesMut) -> Result<(), FrameError> {
        let record = codec::encode_record(&element)?;
        dst.reserve(record.len() + 1);
        dst.put_slice(&record);
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}

/// Pre-encoded frames (as produced by [`codec::encode`]) are written as-is.
impl Encoder<Bytes> for ElementCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}
