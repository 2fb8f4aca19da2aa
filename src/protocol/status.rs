//! OPC UA status codes used by the UACP layer.
//!
//! Only the codes the transport and secure channel report are listed; the full
//! table belongs to the service layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit OPC UA status code as carried in `ERR` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);
    pub const BAD_ENCODING_LIMITS_EXCEEDED: StatusCode = StatusCode(0x8008_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_TCP_SERVER_TOO_BUSY: StatusCode = StatusCode(0x807D_0000);
    pub const BAD_TCP_MESSAGE_TYPE_INVALID: StatusCode = StatusCode(0x807E_0000);
    pub const BAD_TCP_SECURE_CHANNEL_UNKNOWN: StatusCode = StatusCode(0x807F_0000);
    pub const BAD_TCP_MESSAGE_TOO_LARGE: StatusCode = StatusCode(0x8080_0000);
    pub const BAD_TCP_NOT_ENOUGH_RESOURCES: StatusCode = StatusCode(0x8081_0000);
    pub const BAD_TCP_INTERNAL_ERROR: StatusCode = StatusCode(0x8082_0000);
    pub const BAD_TCP_ENDPOINT_URL_INVALID: StatusCode = StatusCode(0x8083_0000);
    pub const BAD_REQUEST_INTERRUPTED: StatusCode = StatusCode(0x8084_0000);
    pub const BAD_REQUEST_TIMEOUT: StatusCode = StatusCode(0x8085_0000);
    pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8086_0000);
    pub const BAD_SECURE_CHANNEL_TOKEN_UNKNOWN: StatusCode = StatusCode(0x8087_0000);
    pub const BAD_SEQUENCE_NUMBER_INVALID: StatusCode = StatusCode(0x8088_0000);
    pub const BAD_PROTOCOL_VERSION_UNSUPPORTED: StatusCode = StatusCode(0x80BE_0000);

    /// Raw wire value
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Severity bits `10` mark a bad code.
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Symbolic name, if the code is one this crate knows.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            StatusCode::GOOD => "Good",
            StatusCode::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            StatusCode::BAD_DECODING_ERROR => "BadDecodingError",
            StatusCode::BAD_ENCODING_LIMITS_EXCEEDED => "BadEncodingLimitsExceeded",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_TCP_SERVER_TOO_BUSY => "BadTcpServerTooBusy",
            StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID => "BadTcpMessageTypeInvalid",
            StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN => "BadTcpSecureChannelUnknown",
            StatusCode::BAD_TCP_MESSAGE_TOO_LARGE => "BadTcpMessageTooLarge",
            StatusCode::BAD_TCP_NOT_ENOUGH_RESOURCES => "BadTcpNotEnoughResources",
            StatusCode::BAD_TCP_INTERNAL_ERROR => "BadTcpInternalError",
            StatusCode::BAD_TCP_ENDPOINT_URL_INVALID => "BadTcpEndpointUrlInvalid",
            StatusCode::BAD_REQUEST_INTERRUPTED => "BadRequestInterrupted",
            StatusCode::BAD_REQUEST_TIMEOUT => "BadRequestTimeout",
            StatusCode::BAD_SECURE_CHANNEL_CLOSED => "BadSecureChannelClosed",
            StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN => "BadSecureChannelTokenUnknown",
            StatusCode::BAD_SEQUENCE_NUMBER_INVALID => "BadSequenceNumberInvalid",
            StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED => "BadProtocolVersionUnsupported",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u32> for StatusCode {
    fn from(bits: u32) -> Self {
        StatusCode(bits)
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}
