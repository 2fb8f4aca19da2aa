//! # Core Encoding Components
//!
//! Primitive types, timestamps, and stream framing.
//!
//! This module provides the foundation for the transport: the OPC UA binary
//! built-in types UACP is made of and a Tokio codec that cuts a byte stream
//! into whole UACP messages.
//!
//! ## Components
//! - **Primitives**: little-endian integers, length-prefixed strings and byte strings
//! - **Timestamp**: 64-bit `DateTime` in 100 ns ticks since 1601
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Security
//! - Frame size is validated against the negotiated buffer size before buffering
//! - Length prefixes are validated before allocation

pub mod codec;
pub mod primitives;
pub mod timestamp;

pub use codec::UacpCodec;
pub use primitives::{ByteString, Decode, Encode, UaString};
pub use timestamp::Timestamp;
