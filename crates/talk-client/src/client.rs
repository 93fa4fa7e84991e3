//! Relay connection client.
//!
//! This module provides the `RelayClient` which handles:
//! - Connection to the relay over TCP with exponential backoff
//! - Declaring an identity and remembering it as the default sender
//! - Building and sending messages, heartbeats and read receipts
//! - Reading the elements the relay forwards
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use talk_core::{Element, ElementId, Heartbeat, Identity, Media, Message, SessionToken, Status, UserId};
use talk_protocol::{ElementCodec, DEFAULT_MAX_FRAME_SIZE};

use crate::error::{ClientError, Result};

/// Receiver used for elements addressed to the relay itself.
pub const RELAY_IDENTITY: &str = "server";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the relay client.
///
/// # Example
///
/// ```rust
/// use talk_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     addr: "10.0.0.5:9090".to_string(),
///     retry_initial_delay: Duration::from_millis(500),
///     ..Default::default()
/// };
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the relay.
    pub addr: String,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,

    /// Connection attempts before giving up. 0 retries until cancelled.
    pub max_attempts: u32,

    /// Largest frame accepted from the relay.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9090".to_string(),
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            retry_multiplier: 2.0,
            max_attempts: 5,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Delay to wait after a failed attempt that waited `delay`.
    fn next_delay(&self, delay: Duration) -> Duration {
        let next_delay_ms = (delay.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_delay_ms).min(self.retry_max_delay)
    }
}

// ============================================================================
// Relay Client
// ============================================================================

/// One connection to the relay.
///
/// # Example
///
/// ```rust,ignore
/// use talk_client::{ClientConfig, RelayClient};
/// use tokio_util::sync::CancellationToken;
///
/// let mut client = RelayClient::connect(&ClientConfig::default(), &CancellationToken::new()).await?;
/// client.identify("bob", "session-1", "secret").await?;
/// client.send_text("alice", "hi").await?;
///
/// while let Some(element) = client.recv().await? {
///     println!("{element:?}");
/// }
/// ```
pub struct RelayClient {
    framed: Framed<TcpStream, ElementCodec>,

    /// Identity declared through `identify`, used as the default sender.
    user: Option<UserId>,

    peer: Option<SocketAddr>,
}

impl RelayClient {
    /// Connects to the relay, retrying with exponential backoff.
    ///
    /// Gives up after `max_attempts` failures, or as soon as `cancel_token`
    /// fires while waiting between attempts.
    pub async fn connect(config: &ClientConfig, cancel_token: &CancellationToken) -> Result<Self> {
        let stream = connect_with_retry(config, cancel_token).await?;
        Ok(Self::from_stream(stream, config.max_frame_size))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream, max_frame_size: usize) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            framed: Framed::new(stream, ElementCodec::with_max_frame_size(max_frame_size)),
            user: None,
            peer,
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Declares `user` on this connection and makes it the default sender.
    ///
    /// The relay does not reply to an identity.
    pub async fn identify(
        &mut self,
        user: impl Into<UserId>,
        session: impl Into<SessionToken>,
        password: impl Into<String>,
    ) -> Result<()> {
        let user = user.into();
        let identity = Identity::new(user.clone(), RELAY_IDENTITY, session, password);
        self.send(identity.into()).await?;

        debug!(user = %user, "Identity sent");
        self.user = Some(user);
        Ok(())
    }

    /// Sends a text message and returns its id.
    pub async fn send_text(
        &mut self,
        receiver: impl Into<UserId>,
        text: impl Into<String>,
    ) -> Result<ElementId> {
        let message = Message::text(self.sender()?, receiver, text);
        self.send_message(message).await
    }

    /// Sends a media attachment and returns the message id.
    pub async fn send_media(
        &mut self,
        receiver: impl Into<UserId>,
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<ElementId> {
        let message = Message::media(self.sender()?, receiver, Media::new(name, bytes));
        self.send_message(message).await
    }

    /// Sends a heartbeat; the relay echoes it back.
    pub async fn heartbeat(&mut self, receiver: impl Into<UserId>) -> Result<()> {
        let heartbeat = Heartbeat::new(self.sender()?, receiver);
        self.send(heartbeat.into()).await
    }

    /// Sends a read receipt for `message` back toward its sender.
    pub async fn mark_read(&mut self, message: &Message) -> Result<()> {
        self.send(Status::read(message).into()).await
    }

    /// Sends any element as-is.
    pub async fn send(&mut self, element: Element) -> Result<()> {
        self.framed.send(element).await?;
        Ok(())
    }

    /// Reads the next element. `None` once the relay has closed the
    /// connection at a frame boundary.
    pub async fn recv(&mut self) -> Result<Option<Element>> {
        Ok(self.framed.next().await.transpose()?)
    }

    /// Like [`RelayClient::recv`], but a closed connection is an error.
    pub async fn next_element(&mut self) -> Result<Element> {
        self.recv().await?.ok_or(ClientError::Closed)
    }

    /// Flushes pending frames and shuts down the write half.
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<Element>::close(&mut self.framed).await?;
        Ok(())
    }

    fn sender(&self) -> Result<UserId> {
        self.user.clone().ok_or(ClientError::NotIdentified)
    }

    async fn send_message(&mut self, message: Message) -> Result<ElementId> {
        let id = message.envelope.id.clone();
        self.send(message.into()).await?;
        Ok(id)
    }
}

/// Attempts to connect to the relay with exponential backoff.
///
/// Uses exponential backoff between attempts, starting at
/// `retry_initial_delay` and capping at `retry_max_delay`.
async fn connect_with_retry(
    config: &ClientConfig,
    cancel_token: &CancellationToken,
) -> Result<TcpStream> {
    let mut delay = config.retry_initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);

        debug!(attempt, addr = %config.addr, "Attempting to connect to relay");

        let error = match TcpStream::connect(&config.addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                info!(attempt, addr = %config.addr, "Connected to relay");
                return Ok(stream);
            }
            Err(e) => e,
        };

        if config.max_attempts != 0 && attempt >= config.max_attempts {
            warn!(attempts = attempt, addr = %config.addr, error = %error, "Giving up on relay");
            return Err(ClientError::Connect {
                addr: config.addr.clone(),
                attempts: attempt,
                source: error,
            });
        }

        debug!(attempt, error = %error, retry_in_ms = delay.as_millis() as u64, "Connection attempt failed");

        // Wait before retry, checking for cancellation
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                info!("Connection retry cancelled");
                return Err(ClientError::Cancelled);
            }
            _ = sleep(delay) => {
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talk_core::ElementKind;
    use talk_protocol::codec;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// An address nothing is listening on.
    async fn refused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.retry_initial_delay, Duration::from_millis(100));
        assert_eq!(config.retry_max_delay, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ClientConfig::default();
        assert_eq!(config.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(config.next_delay(Duration::from_secs(4)), Duration::from_secs(5));
        assert_eq!(config.next_delay(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        let config = ClientConfig {
            retry_initial_delay: Duration::from_millis(1),
            max_attempts: 2,
            ..ClientConfig::new(refused_addr().await)
        };

        let result = RelayClient::connect(&config, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ClientError::Connect { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_connect_honors_cancellation() {
        let config = ClientConfig {
            max_attempts: 0,
            ..ClientConfig::new(refused_addr().await)
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = RelayClient::connect(&config, &cancel).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_identify_sets_default_sender() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig::new(listener.local_addr().unwrap().to_string());

        let mut client = RelayClient::connect(&config, &CancellationToken::new())
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        assert!(matches!(
            client.send_text("alice", "too early").await,
            Err(ClientError::NotIdentified)
        ));

        client.identify("bob", "s-1", "pw").await.unwrap();
        let id = client.send_text("alice", "hi").await.unwrap();
        assert_eq!(client.user().map(|u| u.as_str()), Some("bob"));
        client.close().await.unwrap();

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let frames: Vec<Element> = raw
            .split_inclusive(|b| *b == 0)
            .map(|frame| codec::decode(frame).unwrap())
            .collect();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind(), ElementKind::Identity);
        assert_eq!(frames[0].sender().as_str(), "bob");
        assert_eq!(frames[0].receiver().as_str(), RELAY_IDENTITY);
        match &frames[1] {
            Element::Message(message) => {
                assert_eq!(message.envelope.id, id);
                assert_eq!(message.envelope.sender.as_str(), "bob");
                assert_eq!(message.value.as_deref(), Some("hi"));
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }
}
