//! Relay configuration.

use std::time::Duration;

pub use talk_protocol::DEFAULT_MAX_FRAME_SIZE;
use thiserror::Error;

/// Default listen host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9090;

/// Frames queued per connection before fan-out to it starts failing.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Per-frame socket write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`RelayServer`](crate::server::RelayServer).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use talkd::config::RelayConfig;
///
/// let config = RelayConfig::default()
///     .with_host("127.0.0.1")
///     .with_port(0)
///     .with_idle_timeout(Some(Duration::from_secs(300)));
///
/// assert_eq!(config.listen_addr(), "127.0.0.1:0");
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host or IP address to listen on.
    pub host: String,

    /// Port to listen on (0 picks an ephemeral port).
    pub port: u16,

    /// Capacity of each connection's outbound frame queue.
    pub outbound_buffer: usize,

    /// Largest accepted frame, in bytes, excluding the terminator.
    pub max_frame_size: usize,

    /// Timeout for writing a single frame to a socket.
    pub write_timeout: Duration,

    /// Close connections that send nothing for this long. Disabled by default.
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: None,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames;
        self
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Address string suitable for `TcpListener::bind`.
    ///
    /// IPv6 literals are bracketed.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Checks values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroOutboundBuffer);
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::ZeroMaxFrameSize);
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("write_timeout"));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout("idle_timeout"));
        }
        Ok(())
    }
}

/// Invalid relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("listen host must not be empty")]
    EmptyHost,

    #[error("outbound buffer must hold at least one frame")]
    ZeroOutboundBuffer,

    #[error("max frame size must be greater than zero")]
    ZeroMaxFrameSize,

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}
