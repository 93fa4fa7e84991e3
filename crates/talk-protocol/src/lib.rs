//! talk protocol - wire codec for relay communication
//!
//! One frame is one [`Element`](talk_core::Element) encoded as a UTF-8 JSON
//! record (envelope fields, variant fields and a `"type"` discriminator)
//! followed by a single `0x00` terminator.
//!
//! - [`codec`]: `encode` / `decode` of a single frame
//! - [`framing`]: [`ElementCodec`] for `tokio_util::codec` streams

pub mod codec;
pub mod error;
pub mod framing;

pub use codec::{decode, encode, encode_record, FRAME_DELIMITER};
pub use error::{DecodeError, EncodeError, FrameError};
pub use framing::{ElementCodec, DEFAULT_MAX_FRAME_SIZE};
