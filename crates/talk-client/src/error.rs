//! Error types for the relay client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use talk_protocol::FrameError;
use thiserror::Error;

/// Relay client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Every connection attempt failed.
    ///
    /// Check that the relay is running and reachable at `addr`.
    #[error("Failed to connect to relay at {addr} after {attempts} attempt(s): {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Connecting was cancelled through the cancellation token.
    #[error("Connection cancelled")]
    Cancelled,

    /// Reading or writing a frame failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The relay closed the connection.
    #[error("Connection closed by relay")]
    Closed,

    /// A message was sent before `identify`.
    #[error("No identity declared; call identify first")]
    NotIdentified,
}

/// Convenience result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_mentions_address() {
        let err = ClientError::Connect {
            addr: "127.0.0.1:9090".to_string(),
            attempts: 3,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:9090"));
        assert!(msg.contains("3 attempt"));
    }

    #[test]
    fn test_frame_error_is_transparent() {
        let err = ClientError::from(FrameError::IncompleteFrame { buffered: 3 });
        assert_eq!(
            err.to_string(),
            FrameError::IncompleteFrame { buffered: 3 }.to_string()
        );
    }
}
