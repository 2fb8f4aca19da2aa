//! # Transport Layer
//!
//! Runs UACP over byte streams.
//!
//! ## Components
//! - **Connection**: handshake driver and chunk I/O over any `AsyncRead + AsyncWrite`
//! - **TCP**: `opc.tcp://` endpoint parsing, client connect and a listener with graceful shutdown

pub mod connection;
pub mod tcp;

pub use connection::UacpConnection;
pub use tcp::{connect_tcp, endpoint_address, UacpListener};
