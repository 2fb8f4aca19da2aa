//! # UACP Messages
//!
//! Typed representation of the OPC UA connection protocol messages and their
//! byte-exact binary codec.
//!
//! ## Wire Format
//! ```text
//! [MessageType(3)] [ChunkType(1)] [MessageSize(u32 LE)] [Body(MessageSize - 8)]
//! ```
//!
//! | Tag/Chunk | Variant        | Body                                                      |
//! |-----------|----------------|-----------------------------------------------------------|
//! | `HEL`/`F` | `Hello`        | version, recv buf, send buf, max msg, max chunks, url      |
//! | `ACK`/`F` | `Acknowledge`  | version, recv buf, send buf, max msg, max chunks           |
//! | `ERR`/`F` | `Error`        | status code, reason                                        |
//! | `RHE`/`F` | `ReverseHello` | server uri, endpoint url                                   |
//! | other     | `Generic`      | opaque payload (secure channel `OPN`/`MSG`/`CLO` chunks)   |
//!
//! `MessageSize` is always computed on encode. On decode the buffer must hold
//! exactly `MessageSize` bytes.

use crate::core::primitives::{check_prefixed_len, decode_u32, encode_u32, Decode, Encode, UaString};
use crate::error::{ProtocolError, Result};
use crate::protocol::status::StatusCode;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// Largest frame the 32-bit size field can describe.
pub const MAX_FRAME_SIZE: usize = u32::MAX as usize;

/// Size of the common message header.
pub const HEADER_SIZE: usize = 8;

pub const MESSAGE_TYPE_HELLO: [u8; 3] = *b"HEL";
pub const MESSAGE_TYPE_ACKNOWLEDGE: [u8; 3] = *b"ACK";
pub const MESSAGE_TYPE_ERROR: [u8; 3] = *b"ERR";
pub const MESSAGE_TYPE_REVERSE_HELLO: [u8; 3] = *b"RHE";

/// Secure channel tags, framed by this layer as `Generic`.
pub const MESSAGE_TYPE_OPEN: [u8; 3] = *b"OPN";
pub const MESSAGE_TYPE_MESSAGE: [u8; 3] = *b"MSG";
pub const MESSAGE_TYPE_CLOSE: [u8; 3] = *b"CLO";

/// Final chunk of a message.
pub const CHUNK_FINAL: u8 = b'F';
/// Intermediate chunk; more follow.
pub const CHUNK_INTERMEDIATE: u8 = b'C';
/// Final chunk of an aborted message.
pub const CHUNK_ABORT: u8 = b'A';

/// The 8-byte header common to every UACP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    pub message_type: [u8; 3],
    pub chunk_type: u8,
    /// Total size including this header.
    pub message_size: u32,
}

impl MessageHeader {
    /// Read the header from the first 8 bytes of `input`.
    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < HEADER_SIZE {
            return Err(ProtocolError::IncompleteHeader(input.len()));
        }
        let mut size = &input[4..HEADER_SIZE];
        Ok(Self {
            message_type: [input[0], input[1], input[2]],
            chunk_type: input[3],
            message_size: decode_u32(&mut size)?,
        })
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.message_type);
        buf.put_u8(self.chunk_type);
        encode_u32(buf, self.message_size);
    }

    /// Declared body length; zero when the size field is smaller than a header.
    pub fn body_len(&self) -> usize {
        (self.message_size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Tag rendered for logs.
    pub fn message_type_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message_type)
    }

    fn is(&self, message_type: [u8; 3]) -> bool {
        self.message_type == message_type && self.chunk_type == CHUNK_FINAL
    }
}

/// Fail with `MessageTooLarge` if `size` does not fit the header size field.
pub fn check_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// `HEL`: opens a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    /// 0 means no limit.
    pub max_message_size: u32,
    /// 0 means no limit.
    pub max_chunk_count: u32,
    pub endpoint_url: UaString,
}

impl Hello {
    /// Build a Hello with no chunk count limit.
    pub fn new(
        version: u32,
        receive_buffer_size: u32,
        send_buffer_size: u32,
        max_message_size: u32,
        endpoint_url: impl Into<UaString>,
    ) -> Self {
        Self {
            version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count: 0,
            endpoint_url: endpoint_url.into(),
        }
    }

    pub fn with_max_chunk_count(mut self, max_chunk_count: u32) -> Self {
        self.max_chunk_count = max_chunk_count;
        self
    }
}

impl Encode for Hello {
    fn encoded_len(&self) -> usize {
        20 + self.endpoint_url.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_u32(buf, self.version);
        encode_u32(buf, self.receive_buffer_size);
        encode_u32(buf, self.send_buffer_size);
        encode_u32(buf, self.max_message_size);
        encode_u32(buf, self.max_chunk_count);
        self.endpoint_url.encode(buf);
    }
}

impl Decode for Hello {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self {
            version: decode_u32(buf)?,
            receive_buffer_size: decode_u32(buf)?,
            send_buffer_size: decode_u32(buf)?,
            max_message_size: decode_u32(buf)?,
            max_chunk_count: decode_u32(buf)?,
            endpoint_url: UaString::decode(buf)?,
        })
    }
}

/// `ACK`: the accepting peer's revised limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge {
    pub version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Acknowledge {
    pub fn new(
        version: u32,
        receive_buffer_size: u32,
        send_buffer_size: u32,
        max_message_size: u32,
    ) -> Self {
        Self {
            version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count: 0,
        }
    }

    pub fn with_max_chunk_count(mut self, max_chunk_count: u32) -> Self {
        self.max_chunk_count = max_chunk_count;
        self
    }
}

impl Encode for Acknowledge {
    fn encoded_len(&self) -> usize {
        20
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_u32(buf, self.version);
        encode_u32(buf, self.receive_buffer_size);
        encode_u32(buf, self.send_buffer_size);
        encode_u32(buf, self.max_message_size);
        encode_u32(buf, self.max_chunk_count);
    }
}

impl Decode for Acknowledge {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self {
            version: decode_u32(buf)?,
            receive_buffer_size: decode_u32(buf)?,
            send_buffer_size: decode_u32(buf)?,
            max_message_size: decode_u32(buf)?,
            max_chunk_count: decode_u32(buf)?,
        })
    }
}

/// `ERR`: terminal error report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: StatusCode,
    pub reason: UaString,
}

impl ErrorMessage {
    pub fn new(code: impl Into<StatusCode>, reason: impl Into<UaString>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

impl Encode for ErrorMessage {
    fn encoded_len(&self) -> usize {
        4 + self.reason.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_u32(buf, self.code.bits());
        self.reason.encode(buf);
    }
}

impl Decode for ErrorMessage {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self {
            code: StatusCode(decode_u32(buf)?),
            reason: UaString::decode(buf)?,
        })
    }
}

/// `RHE`: announces the server behind a server-initiated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseHello {
    pub server_uri: UaString,
    pub endpoint_url: UaString,
}

impl ReverseHello {
    pub fn new(server_uri: impl Into<UaString>, endpoint_url: impl Into<UaString>) -> Self {
        Self {
            server_uri: server_uri.into(),
            endpoint_url: endpoint_url.into(),
        }
    }
}

impl Encode for ReverseHello {
    fn encoded_len(&self) -> usize {
        self.server_uri.encoded_len() + self.endpoint_url.encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.server_uri.encode(buf);
        self.endpoint_url.encode(buf);
    }
}

impl Decode for ReverseHello {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self {
            server_uri: UaString::decode(buf)?,
            endpoint_url: UaString::decode(buf)?,
        })
    }
}

/// Any other tag/chunk-type pair. The payload belongs to the secure channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generic {
    pub message_type: [u8; 3],
    pub chunk_type: u8,
    pub payload: Bytes,
}

impl Generic {
    pub fn new(message_type: [u8; 3], chunk_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            chunk_type,
            payload: payload.into(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.chunk_type == CHUNK_FINAL
    }

    pub fn is_abort(&self) -> bool {
        self.chunk_type == CHUNK_ABORT
    }
}

/// A decoded UACP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Acknowledge(Acknowledge),
    Error(ErrorMessage),
    ReverseHello(ReverseHello),
    Generic(Generic),
}

impl Message {
    fn tag(&self) -> ([u8; 3], u8) {
        match self {
            Message::Hello(_) => (MESSAGE_TYPE_HELLO, CHUNK_FINAL),
            Message::Acknowledge(_) => (MESSAGE_TYPE_ACKNOWLEDGE, CHUNK_FINAL),
            Message::Error(_) => (MESSAGE_TYPE_ERROR, CHUNK_FINAL),
            Message::ReverseHello(_) => (MESSAGE_TYPE_REVERSE_HELLO, CHUNK_FINAL),
            Message::Generic(g) => (g.message_type, g.chunk_type),
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Message::Hello(m) => m.encoded_len(),
            Message::Acknowledge(m) => m.encoded_len(),
            Message::Error(m) => m.encoded_len(),
            Message::ReverseHello(m) => m.encoded_len(),
            Message::Generic(g) => g.payload.len(),
        }
    }

    /// Three-byte message type tag on the wire.
    pub fn message_type(&self) -> [u8; 3] {
        self.tag().0
    }

    /// Variant name for logs and dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "Hello",
            Message::Acknowledge(_) => "Acknowledge",
            Message::Error(_) => "Error",
            Message::ReverseHello(_) => "ReverseHello",
            Message::Generic(_) => "Generic",
        }
    }

    /// Header this message encodes with. The size is derived from the body
    /// and is only meaningful once [`Message::check_encodable`] passed.
    pub fn header(&self) -> MessageHeader {
        let (message_type, chunk_type) = self.tag();
        let size = self.encoded_len();
        MessageHeader {
            message_type,
            chunk_type,
            message_size: size as u32,
        }
    }

    /// Total encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body_len()
    }

    /// Append `header || body` to `dst`.
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        self.header().encode(dst);
        match self {
            Message::Hello(m) => m.encode(dst),
            Message::Acknowledge(m) => m.encode(dst),
            Message::Error(m) => m.encode(dst),
            Message::ReverseHello(m) => m.encode(dst),
            Message::Generic(g) => dst.put_slice(&g.payload),
        }
    }

    /// Verify every length fits its wire field and return the frame size.
    ///
    /// # Errors
    /// `MessageTooLarge` if the frame exceeds [`MAX_FRAME_SIZE`] or a string
    /// exceeds its `i32` length prefix.
    pub fn check_encodable(&self) -> Result<usize> {
        match self {
            Message::Hello(m) => check_prefixed_len(m.endpoint_url.len())?,
            Message::Error(m) => check_prefixed_len(m.reason.len())?,
            Message::ReverseHello(m) => {
                check_prefixed_len(m.server_uri.len())?;
                check_prefixed_len(m.endpoint_url.len())?;
            }
            Message::Acknowledge(_) | Message::Generic(_) => {}
        }
        let size = self.encoded_len();
        check_frame_size(size)?;
        Ok(size)
    }

    /// Encode after [`Message::check_encodable`].
    pub fn try_to_bytes(&self) -> Result<Bytes> {
        self.check_encodable()?;
        Ok(self.to_bytes())
    }

    /// Encode without length checks.
    ///
    /// A message that fails [`Message::check_encodable`] gets a truncated size
    /// field or length prefix. Use [`Message::try_to_bytes`] or [`UacpCodec`]
    /// for messages of unbounded size.
    ///
    /// [`UacpCodec`]: crate::core::codec::UacpCodec
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode exactly one message from `input`.
    pub fn decode(input: &[u8]) -> Result<Self> {
        // Validate the header before copying anything
        MessageHeader::decode(input)?;
        Self::from_bytes(Bytes::copy_from_slice(input))
    }

    /// Decode exactly one message, sharing `input` with a `Generic` payload.
    pub fn from_bytes(input: Bytes) -> Result<Self> {
        let header = MessageHeader::decode(&input)?;

        if input.len() != header.message_size as usize {
            return Err(ProtocolError::SizeMismatch {
                declared: header.message_size,
                actual: input.len(),
            });
        }

        let mut body = input.slice(HEADER_SIZE..);

        let message = if header.is(MESSAGE_TYPE_HELLO) {
            Message::Hello(Hello::decode(&mut body)?)
        } else if header.is(MESSAGE_TYPE_ACKNOWLEDGE) {
            Message::Acknowledge(Acknowledge::decode(&mut body)?)
        } else if header.is(MESSAGE_TYPE_ERROR) {
            Message::Error(ErrorMessage::decode(&mut body)?)
        } else if header.is(MESSAGE_TYPE_REVERSE_HELLO) {
            Message::ReverseHello(ReverseHello::decode(&mut body)?)
        } else {
            let payload = body.split_off(0);
            Message::Generic(Generic {
                message_type: header.message_type,
                chunk_type: header.chunk_type,
                payload,
            })
        };

        if body.has_remaining() {
            return Err(ProtocolError::SizeMismatch {
                declared: header.message_size,
                actual: input.len() - body.remaining(),
            });
        }

        Ok(message)
    }
}

impl From<Hello> for Message {
    fn from(m: Hello) -> Self {
        Message::Hello(m)
    }
}

impl From<Acknowledge> for Message {
    fn from(m: Acknowledge) -> Self {
        Message::Acknowledge(m)
    }
}

impl From<ErrorMessage> for Message {
    fn from(m: ErrorMessage) -> Self {
        Message::Error(m)
    }
}

impl From<ReverseHello> for Message {
    fn from(m: ReverseHello) -> Self {
        Message::ReverseHello(m)
    }
}

impl From<Generic> for Message {
    fn from(m: Generic) -> Self {
        Message::Generic(m)
    }
}
