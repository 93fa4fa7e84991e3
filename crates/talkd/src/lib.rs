//! talk relay daemon - session registry and fan-out server
//!
//! This crate provides the core infrastructure for the relay:
//! - `config` - Listener and per-connection limits
//! - `registry` - Identity → connections actor
//! - `server` - TCP server, connection loops and element dispatch
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        talkd relay                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │     │       RegistryActor         │   │
//! │  │  (TcpListener)  │     │ (identity → connections)    │   │
//! │  └────────┬────────┘     └──────────────▲──────────────┘   │
//! │           │ accept                      │ register/lookup   │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐   │
//! │  │ConnectionHandler│────▶│         Dispatcher          │   │
//! │  │  (per client)   │     │  ack / fan-out / echo       │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ try_send          │
//! │                          ┌──────────────▼──────────────┐   │
//! │                          │ outbound queue + writer task │   │
//! │                          │       (per client)           │   │
//! │                          └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod registry;
pub mod server;

pub use config::RelayConfig;
pub use registry::{spawn_registry, RegistryHandle};
pub use server::{RelayServer, ServerError};
