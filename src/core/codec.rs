//! Stream framing for UACP messages.
//!
//! ## Frame Format
//! ```text
//! [MessageType(3)] [ChunkType(1)] [MessageSize(u32 LE)] [Body(MessageSize - 8)]
//! ```
//!
//! The decoder peeks the header, waits until `MessageSize` bytes are buffered
//! and hands exactly that frame to [`Message::from_bytes`]. Bytes belonging to
//! the next frame stay in the buffer.

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::TransportLimits;
use crate::protocol::message::{Message, MessageHeader, HEADER_SIZE};
use crate::utils::metrics::global_metrics;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Codec for framing UACP messages over a byte stream.
///
/// Limits are frame sizes including the header. Zero disables a limit.
#[derive(Debug, Clone)]
pub struct UacpCodec {
    max_receive_size: usize,
    max_send_size: usize,
}

impl UacpCodec {
    pub fn new(max_receive_size: u32, max_send_size: u32) -> Self {
        Self {
            max_receive_size: max_receive_size as usize,
            max_send_size: max_send_size as usize,
        }
    }

    pub fn max_receive_size(&self) -> usize {
        self.max_receive_size
    }

    pub fn max_send_size(&self) -> usize {
        self.max_send_size
    }

    /// Adopt the buffer sizes negotiated by the handshake.
    pub fn apply_limits(&mut self, limits: &TransportLimits) {
        self.max_receive_size = limits.receive_buffer_size as usize;
        self.max_send_size = limits.send_buffer_size as usize;
    }

    fn check(size: usize, max: usize) -> Result<()> {
        if max != 0 && size > max {
            return Err(ProtocolError::MessageTooLarge { size, max });
        }
        Ok(())
    }
}

impl Default for UacpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_BUFFER_SIZE)
    }
}

impl Decoder for UacpCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = MessageHeader::decode(&src[..])?;
        let size = header.message_size as usize;

        if size < HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader);
        }
        Self::check(size, self.max_receive_size)?;

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let frame = src.split_to(size).freeze();
        trace!(message_type = %header.message_type_lossy(), size, "Decoded frame");
        let message = Message::from_bytes(frame)?;
        global_metrics().frame_decoded(size);
        Ok(Some(message))
    }
}

impl Encoder<Message> for UacpCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let size = item.check_encodable()?;
        Self::check(size, self.max_send_size)?;

        dst.reserve(size);
        item.encode_into(dst);
        global_metrics().frame_encoded(size);
        Ok(())
    }
}
