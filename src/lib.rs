//! # opcua-uacp
//!
//! The OPC UA binary transport (UACP): the wire codec for the connection
//! protocol messages, the Hello/Acknowledge handshake that opens a connection,
//! and the security token bookkeeping the secure channel layer relies on.
//!
//! ## Layers
//! - [`core`]: little-endian primitives, timestamps, stream framing codec
//! - [`protocol`]: message definitions, handshake state machine, chunk dispatcher, status codes
//! - [`service`]: `ChannelSecurityToken` and the current/previous token store
//! - [`transport`]: async connection driver and TCP listener
//! - [`config`], [`error`], [`utils`]: configuration, error type, logging, metrics, timeouts
//!
//! ## Example
//! ```rust
//! use opcua_uacp::protocol::message::{Hello, Message};
//!
//! let hello = Hello::new(0, 65535, 65535, 0, "opc.tcp://localhost:4840");
//! let bytes = Message::Hello(hello.clone()).to_bytes();
//! assert_eq!(&bytes[..4], b"HELF");
//! assert_eq!(Message::decode(&bytes).ok(), Some(Message::Hello(hello)));
//! ```
//!
//! ## Out of scope
//! Chunk reassembly, OpenSecureChannel processing and cryptography belong to
//! the secure channel layer. UACP hands it raw `OPN`, `MSG` and `CLO` chunks.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::UacpConfig;
pub use error::{ProtocolError, Result};
pub use protocol::handshake::{Handshake, HandshakeState, Role, Step, TransportLimits};
pub use protocol::message::{
    Acknowledge, ErrorMessage, Generic, Hello, Message, MessageHeader, ReverseHello,
};
pub use protocol::status::StatusCode;
pub use service::{ChannelSecurityToken, SecurityTokens};
pub use transport::UacpConnection;
