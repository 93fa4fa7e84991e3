//! Protocol elements.
//!
//! An [`Element`] is the unit carried by one wire frame. The set of variants
//! is closed: `Message`, `Identity`, `Heartbeat` and `Status`. Each variant
//! struct flattens the shared [`Envelope`], so on the wire every element is a
//! single flat record with a `"type"` discriminator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ElementId, SessionToken, Timestamp, UserId};

// ============================================================================
// Envelope
// ============================================================================

/// Fields every element carries.
///
/// `id` and `timestamp` are filled in on decode when a producer omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "ElementId::generate")]
    pub id: ElementId,

    #[serde(default = "Timestamp::now")]
    pub timestamp: Timestamp,

    pub sender: UserId,

    pub receiver: UserId,
}

impl Envelope {
    /// Creates an envelope with a fresh id and the current time.
    pub fn new(sender: impl Into<UserId>, receiver: impl Into<UserId>) -> Self {
        Self {
            id: ElementId::generate(),
            timestamp: Timestamp::now(),
            sender: sender.into(),
            receiver: receiver.into(),
        }
    }

    /// A fresh envelope travelling the opposite direction.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self::new(self.receiver.clone(), self.sender.clone())
    }
}

// ============================================================================
// Variants
// ============================================================================

/// Binary attachment of a [`Message`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Raw bytes, carried as base64 text on the wire.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,

    /// File name or label of the attachment.
    pub name: String,
}

impl Media {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            name: name.into(),
        }
    }
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("name", &self.name)
            .field("len", &self.value.len())
            .finish()
    }
}

/// User content addressed from `sender` to `receiver`.
///
/// Exactly one of `value` and `media` is expected, but both shapes are
/// representable and the relay forwards either unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub envelope: Envelope,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

impl Message {
    /// Creates a text message.
    pub fn text(
        sender: impl Into<UserId>,
        receiver: impl Into<UserId>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(sender, receiver),
            value: Some(value.into()),
            media: None,
        }
    }

    /// Creates a media message.
    pub fn media(sender: impl Into<UserId>, receiver: impl Into<UserId>, media: Media) -> Self {
        Self {
            envelope: Envelope::new(sender, receiver),
            value: None,
            media: Some(media),
        }
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ElementId>) -> Self {
        self.envelope.id = id.into();
        self
    }

    /// Returns true when exactly one of `value` / `media` is present.
    pub fn is_well_formed(&self) -> bool {
        self.value.is_some() != self.media.is_some()
    }
}

/// Declares the connection it arrives on as belonging to `sender`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(flatten)]
    pub envelope: Envelope,

    pub session: SessionToken,

    /// Opaque credential. Carried, never interpreted by the relay.
    pub password: String,
}

impl Identity {
    pub fn new(
        sender: impl Into<UserId>,
        receiver: impl Into<UserId>,
        session: impl Into<SessionToken>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(sender, receiver),
            session: session.into(),
            password: password.into(),
        }
    }
}

// Credentials must not end up in logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("envelope", &self.envelope)
            .field("session", &self.session)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Liveness probe; the relay answers with the sender/receiver swapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(flatten)]
    pub envelope: Envelope,
}

impl Heartbeat {
    pub fn new(sender: impl Into<UserId>, receiver: impl Into<UserId>) -> Self {
        Self {
            envelope: Envelope::new(sender, receiver),
        }
    }

    /// A fresh heartbeat answering this one.
    #[must_use]
    pub fn echo(&self) -> Self {
        Self {
            envelope: self.envelope.reply(),
        }
    }
}

/// Acknowledgement state carried by [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusValue {
    /// The relay accepted the message for routing. Not proof of delivery.
    Accepted,
    /// The receiver has read the message.
    Read,
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Read => write!(f, "Read"),
        }
    }
}

/// Acknowledgement referencing a prior [`Message`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(flatten)]
    pub envelope: Envelope,

    pub value: StatusValue,

    pub message_id: ElementId,
}

impl Status {
    /// Builds a status travelling back from the message's receiver to its sender.
    pub fn for_message(message: &Message, value: StatusValue) -> Self {
        Self {
            envelope: message.envelope.reply(),
            value,
            message_id: message.envelope.id.clone(),
        }
    }

    /// Ingress acknowledgement produced by the relay.
    pub fn accepted(message: &Message) -> Self {
        Self::for_message(message, StatusValue::Accepted)
    }

    /// Read receipt produced by a receiving client.
    pub fn read(message: &Message) -> Self {
        Self::for_message(message, StatusValue::Read)
    }
}

// ============================================================================
// Element
// ============================================================================

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Element {
    Message(Message),
    Identity(Identity),
    Heartbeat(Heartbeat),
    Status(Status),
}

impl Element {
    /// Name of the discriminator field on the wire.
    pub const KIND_FIELD: &'static str = "type";

    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Message(_) => ElementKind::Message,
            Self::Identity(_) => ElementKind::Identity,
            Self::Heartbeat(_) => ElementKind::Heartbeat,
            Self::Status(_) => ElementKind::Status,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            Self::Message(m) => &m.envelope,
            Self::Identity(i) => &i.envelope,
            Self::Heartbeat(h) => &h.envelope,
            Self::Status(s) => &s.envelope,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.envelope().id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.envelope().timestamp
    }

    pub fn sender(&self) -> &UserId {
        &self.envelope().sender
    }

    pub fn receiver(&self) -> &UserId {
        &self.envelope().receiver
    }
}

impl From<Message> for Element {
    fn from(m: Message) -> Self {
        Self::Message(m)
    }
}

impl From<Identity> for Element {
    fn from(i: Identity) -> Self {
        Self::Identity(i)
    }
}

impl From<Heartbeat> for Element {
    fn from(h: Heartbeat) -> Self {
        Self::Heartbeat(h)
    }
}

impl From<Status> for Element {
    fn from(s: Status) -> Self {
        Self::Status(s)
    }
}

/// Discriminator values of [`Element`], exactly as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Message,
    Identity,
    Heartbeat,
    Status,
}

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [
        ElementKind::Message,
        ElementKind::Identity,
        ElementKind::Heartbeat,
        ElementKind::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::Identity => "Identity",
            Self::Heartbeat => "Heartbeat",
            Self::Status => "Status",
        }
    }

    /// Resolves a wire discriminator. Matching is case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
