//! # Error Types
//!
//! Error handling for the UACP transport layer.
//!
//! This module defines every failure that can surface from the binary codec,
//! the stream framing codec, the handshake state machine, and the security token
//! store.
//!
//! ## Error Categories
//! - **Decoding Errors**: truncated input, illegal length prefixes, size mismatches
//! - **Handshake Errors**: protocol violations and errors reported by the peer
//! - **Token Errors**: rejected security token installs
//! - **I/O Errors**: stream failures surfaced by the connection driver
//!
//! Decoding errors are always reported to the caller. Only the handshake state
//! machine reacts to a failure, by turning it into an outbound `ERR` message via
//! [`ProtocolError::status_code`].
//!
//! ## Example Usage
//! ```rust
//! use opcua_uacp::error::{ProtocolError, Result};
//! use opcua_uacp::protocol::message::Message;
//! use tracing::{error, info};
//!
//! fn parse(bytes: &[u8]) -> Result<Message> {
//!     Message::decode(bytes)
//! }
//!
//! match parse(&[0x48, 0x45, 0x4c]) {
//!     Ok(msg) => info!(?msg, "decoded"),
//!     Err(ProtocolError::IncompleteHeader(n)) => error!(available = n, "need more bytes"),
//!     Err(e) => error!(error = %e, "decode failed"),
//! }
//! ```

use crate::protocol::status::StatusCode;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Token store errors
    pub const ERR_TOKEN_STORE_LOCK: &str = "Failed to acquire lock on security token store";
    pub const ERR_TOKEN_CHANNEL_CHANGED: &str = "Security token belongs to a different channel";
    pub const ERR_TOKEN_ID_NOT_INCREASING: &str = "Security token id must strictly increase";

    /// Handshake errors
    pub const ERR_UNEXPECTED_HELLO: &str = "Hello received in an illegal state";
    pub const ERR_UNEXPECTED_ACKNOWLEDGE: &str = "Acknowledge received without a pending Hello";
    pub const ERR_UNEXPECTED_REVERSE_HELLO: &str = "ReverseHello received in an illegal state";
    pub const ERR_UNEXPECTED_CHUNK: &str = "Secure channel chunk received before the connection opened";
    pub const ERR_ALREADY_STARTED: &str = "Handshake already started";
    pub const ERR_SERVER_ROLE_ONLY: &str = "Operation only valid for a server handshake";
    pub const ERR_CLIENT_ROLE_ONLY: &str = "Operation only valid for a client handshake";
    pub const ERR_VERSION_UNSUPPORTED: &str = "Requested protocol version is not supported";
    pub const ERR_ENDPOINT_URL_TOO_LONG: &str = "Endpoint URL exceeds the maximum length";
    pub const ERR_BUFFER_TOO_SMALL: &str = "Buffer size is below the protocol minimum";
    pub const ERR_REVISED_BUFFER_TOO_LARGE: &str = "Revised buffer size exceeds the requested size";
    pub const ERR_NOT_OPEN: &str = "Connection is not open";

    /// Framing errors
    pub const ERR_CHUNK_TOO_LARGE: &str = "Chunk exceeds the negotiated send buffer size";
    pub const ERR_TOO_MANY_CHUNKS: &str = "Message exceeds the maximum chunk count";
}

/// ProtocolError is the primary error type for all UACP operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("Invalid string: not valid UTF-8")]
    InvalidString,

    #[error("Size mismatch: header declares {declared} bytes, got {actual}")]
    SizeMismatch { declared: u32, actual: usize },

    #[error("Incomplete header: {0} of 8 bytes available")]
    IncompleteHeader(usize),

    #[error("Invalid message header")]
    InvalidHeader,

    #[error("Message too large: {size} bytes (limit {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Protocol violation ({status}): {detail}")]
    ProtocolViolation { status: StatusCode, detail: String },

    #[error("Remote error ({code}): {reason}")]
    RemoteError { code: StatusCode, reason: String },

    #[error("Invalid security token: {0}")]
    InvalidToken(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Shorthand for a protocol violation with a static detail message.
    pub fn violation(status: StatusCode, detail: &str) -> Self {
        ProtocolError::ProtocolViolation {
            status,
            detail: detail.to_string(),
        }
    }

    /// Status code to report to the peer when this failure closes a connection.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProtocolError::TruncatedInput { .. }
            | ProtocolError::InvalidLength(_)
            | ProtocolError::InvalidString
            | ProtocolError::SizeMismatch { .. }
            | ProtocolError::IncompleteHeader(_)
            | ProtocolError::InvalidHeader => StatusCode::BAD_DECODING_ERROR,
            ProtocolError::MessageTooLarge { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            ProtocolError::ProtocolViolation { status, .. } => *status,
            ProtocolError::RemoteError { code, .. } => *code,
            ProtocolError::InvalidToken(_) => StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN,
            ProtocolError::UnexpectedMessage => StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
            ProtocolError::Timeout => StatusCode::BAD_TIMEOUT,
            ProtocolError::ConnectionClosed => StatusCode::BAD_SECURE_CHANNEL_CLOSED,
            ProtocolError::Io(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            ProtocolError::ConfigError(_) | ProtocolError::Custom(_) => {
                StatusCode::BAD_TCP_INTERNAL_ERROR
            }
        }
    }

    /// Whether more bytes from the transport could resolve this failure.
    ///
    /// Only a short header qualifies. `TruncatedInput` is raised inside a frame
    /// whose declared size has already been read in full, so waiting cannot fix it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::IncompleteHeader(_))
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
