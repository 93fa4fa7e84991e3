//! Programmatic client for the talk relay.
//!
//! [`RelayClient`] speaks the same NUL-delimited element stream as the relay:
//! declare an identity, send messages, read whatever the relay forwards.

pub mod client;
pub mod error;

pub use client::{ClientConfig, RelayClient, RELAY_IDENTITY};
pub use error::{ClientError, Result};
