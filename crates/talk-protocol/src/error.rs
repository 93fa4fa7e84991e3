//! Codec and framing errors.

use std::io;

use thiserror::Error;

/// A frame could not be turned into an element.
///
/// Never retried: once a frame fails to decode the stream cannot be trusted
/// to resynchronize, so the owning connection is closed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed element: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("element has no \"type\" discriminator")]
    MissingKind,

    #[error("unknown element type: {0}")]
    UnknownKind(String),
}

/// An element could not be serialized.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode element: {0}")]
    Serialize(#[from] serde_json::Error),

    /// JSON has no NaN or infinity; serde_json would write `null`.
    #[error("timestamp is not a finite number: {0}")]
    NonFiniteTimestamp(f64),
}

/// Errors produced while reading or writing a framed stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The stream ended in the middle of a frame.
    #[error("stream ended with {buffered} bytes of an incomplete frame")]
    IncompleteFrame { buffered: usize },
}

impl FrameError {
    /// True for errors caused by the peer's bytes rather than the transport.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::FrameTooLarge { .. } | Self::IncompleteFrame { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::FrameTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "frame too large: 20 bytes (max: 10)");

        let err = FrameError::IncompleteFrame { buffered: 7 };
        assert!(err.to_string().contains("7 bytes"));

        let err = FrameError::from(DecodeError::UnknownKind("Ping".to_string()));
        assert_eq!(err.to_string(), "unknown element type: Ping");
    }

    #[test]
    fn test_protocol_violation_classification() {
        assert!(FrameError::IncompleteFrame { buffered: 1 }.is_protocol_violation());
        assert!(FrameError::from(DecodeError::MissingKind).is_protocol_violation());
        let io = FrameError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!io.is_protocol_violation());
    }
}
