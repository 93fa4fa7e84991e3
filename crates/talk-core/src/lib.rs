//! talk core - shared element model
//!
//! This crate provides the protocol payload types shared between the
//! relay (`talkd`), the wire codec (`talk-protocol`) and clients.
//!
//! Every payload is an [`Element`]: a closed set of variants that all carry
//! the same [`Envelope`] (id, timestamp, sender, receiver).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod element;
pub mod ids;

// Re-exports for convenience
pub use element::{
    Element, ElementKind, Envelope, Heartbeat, Identity, Media, Message, Status, StatusValue,
};
pub use ids::{ElementId, SessionToken, Timestamp, UserId};
