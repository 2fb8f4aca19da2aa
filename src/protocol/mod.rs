//! # UACP Protocol Layer
//!
//! Message definitions, the connection handshake, and chunk routing.
//!
//! ## Components
//! - **Message**: the common 8-byte header and the Hello, Acknowledge, Error,
//!   ReverseHello and Generic bodies
//! - **Handshake**: per-connection state machine from `Closed` to `Open`
//! - **Dispatcher**: routes secure channel chunks by message type
//! - **Status**: OPC UA status codes carried in Error messages
//!
//! ## Handshake Flow
//! ```text
//! Client                          Server
//!   |                               |
//!   |---- Hello ------------------->|
//!   |                               | (validate, revise limits)
//!   |<--- Acknowledge --------------|
//!   |                               |
//!   |<=== OPN / MSG / CLO ========>|
//! ```
//!
//! A server that initiated the socket first sends ReverseHello; the client
//! answers with Hello and the flow continues as above.

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod status;
