//! `ChannelSecurityToken`: identifies the keys a secure channel uses for one
//! lifetime window.
//!
//! ## Wire Format
//! ```text
//! [ChannelId(u32)] [TokenId(u32)] [CreatedAt(DateTime)] [RevisedLifetime(u32 ms)]
//! ```
//! Fixed 20 bytes, no length prefix.

use crate::core::primitives::{decode_u32, encode_u32, Decode, Encode};
use crate::core::timestamp::{decode_timestamp, encode_timestamp, Timestamp};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Encoded size of a token.
pub const SECURITY_TOKEN_SIZE: usize = 20;

/// Customary point in a token's lifetime at which a renewal is issued.
pub const DEFAULT_RENEWAL_FRACTION: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub created_at: Timestamp,
    /// Lifetime granted by the server, in milliseconds.
    pub revised_lifetime: u32,
}

impl ChannelSecurityToken {
    pub fn new(channel_id: u32, token_id: u32, created_at: Timestamp, revised_lifetime: u32) -> Self {
        Self {
            channel_id,
            token_id,
            created_at,
            revised_lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(u64::from(self.revised_lifetime))
    }

    /// `created_at + revised_lifetime`.
    pub fn expires_at(&self) -> Timestamp {
        self.created_at.saturating_add(self.lifetime())
    }

    /// Instant `fraction` of the way through the lifetime.
    ///
    /// A fraction outside the open interval `(0, 1)`, or NaN, falls back to
    /// [`DEFAULT_RENEWAL_FRACTION`].
    pub fn renew_at(&self, fraction: f64) -> Timestamp {
        let fraction = if fraction > 0.0 && fraction < 1.0 {
            fraction
        } else {
            DEFAULT_RENEWAL_FRACTION
        };
        self.created_at
            .saturating_add(self.lifetime().mul_f64(fraction))
    }

    /// Latest instant a renewal should be issued by.
    pub fn renewal_deadline(&self) -> Timestamp {
        self.renew_at(DEFAULT_RENEWAL_FRACTION)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }

    /// Whether traffic protected by this token is still accepted at `now`.
    pub fn accepts_at(&self, now: Timestamp, grace: Duration) -> bool {
        now < self.expires_at().saturating_add(grace)
    }

    /// Decode from a slice, failing unless it holds at least one full token.
    pub fn from_slice(mut input: &[u8]) -> Result<Self> {
        Self::decode(&mut input)
    }
}

impl Encode for ChannelSecurityToken {
    fn encoded_len(&self) -> usize {
        SECURITY_TOKEN_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_u32(buf, self.channel_id);
        encode_u32(buf, self.token_id);
        encode_timestamp(buf, self.created_at);
        encode_u32(buf, self.revised_lifetime);
    }
}

impl Decode for ChannelSecurityToken {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        // Check up front so a short buffer is left untouched
        let available = buf.remaining();
        if available < SECURITY_TOKEN_SIZE {
            return Err(ProtocolError::TruncatedInput {
                needed: SECURITY_TOKEN_SIZE,
                available,
            });
        }
        Ok(Self {
            channel_id: decode_u32(buf)?,
            token_id: decode_u32(buf)?,
            created_at: decode_timestamp(buf)?,
            revised_lifetime: decode_u32(buf)?,
        })
    }
}
