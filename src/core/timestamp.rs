//! OPC UA `DateTime`: 100 ns ticks since 1601-01-01T00:00:00Z.

use crate::core::primitives::{decode_u64, encode_u64, Decode, Encode};
use crate::error::Result;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ticks between 1601-01-01 and the Unix epoch.
pub const EPOCH_OFFSET_TICKS: u64 = 116_444_736_000_000_000;

pub const TICKS_PER_SECOND: u64 = 10_000_000;

const NANOS_PER_TICK: u64 = 100;

/// Wire timestamp. Zero means "no timestamp".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The null timestamp.
    pub const NULL: Timestamp = Timestamp(0);

    pub const fn from_ticks(ticks: u64) -> Self {
        Timestamp(ticks)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a wall-clock instant. Instants at or before 1601 map to [`Timestamp::NULL`].
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => {
                Timestamp(EPOCH_OFFSET_TICKS.saturating_add(duration_to_ticks(since_epoch)))
            }
            Err(err) => {
                let before_epoch = duration_to_ticks(err.duration());
                Timestamp(EPOCH_OFFSET_TICKS.saturating_sub(before_epoch))
            }
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn from_unix_millis(millis: u64) -> Self {
        Timestamp(EPOCH_OFFSET_TICKS.saturating_add(millis.saturating_mul(10_000)))
    }

    /// `None` for the null timestamp.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self.is_null() {
            return None;
        }
        if self.0 >= EPOCH_OFFSET_TICKS {
            UNIX_EPOCH.checked_add(ticks_to_duration(self.0 - EPOCH_OFFSET_TICKS))
        } else {
            UNIX_EPOCH.checked_sub(ticks_to_duration(EPOCH_OFFSET_TICKS - self.0))
        }
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration_to_ticks(duration)).map(Timestamp)
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_to_ticks(duration)))
    }

    /// Zero if `earlier` is later than `self`.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        ticks_to_duration(self.0.saturating_sub(earlier.0))
    }
}

fn duration_to_ticks(duration: Duration) -> u64 {
    let ticks = duration.as_nanos() / u128::from(NANOS_PER_TICK);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

fn ticks_to_duration(ticks: u64) -> Duration {
    let secs = ticks / TICKS_PER_SECOND;
    let nanos = (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;
    Duration::new(secs, nanos as u32)
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

pub fn encode_timestamp<B: BufMut>(buf: &mut B, value: Timestamp) {
    encode_u64(buf, value.0);
}

pub fn decode_timestamp<B: Buf>(buf: &mut B) -> Result<Timestamp> {
    decode_u64(buf).map(Timestamp)
}

impl Encode for Timestamp {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_timestamp(buf, *self);
    }
}

impl Decode for Timestamp {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        decode_timestamp(buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    // 2018-08-10T23:00:00Z
    const AUG_10_2018_UNIX_SECS: u64 = 1_533_942_000;

    #[test]
    fn test_known_instant_encoding() {
        let ts = Timestamp::from(UNIX_EPOCH + Duration::from_secs(AUG_10_2018_UNIX_SECS));
        let mut buf = BytesMut::new();
        encode_timestamp(&mut buf, ts);
        assert_eq!(
            &buf[..],
            &[0x00, 0x98, 0x67, 0xdd, 0xfd, 0x30, 0xd4, 0x01]
        );
    }

    #[test]
    fn test_unix_epoch_offset() {
        assert_eq!(Timestamp::from(UNIX_EPOCH).ticks(), EPOCH_OFFSET_TICKS);
        assert_eq!(Timestamp::from_unix_millis(0).ticks(), EPOCH_OFFSET_TICKS);
        assert_eq!(Timestamp::from_unix_millis(1).ticks(), EPOCH_OFFSET_TICKS + 10_000);
    }

    #[test]
    fn test_system_time_roundtrip() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let ts = Timestamp::from_system_time(time);
        assert_eq!(ts.to_system_time().unwrap(), time);
    }

    #[test]
    fn test_null_timestamp() {
        assert!(Timestamp::NULL.is_null());
        assert!(Timestamp::NULL.to_system_time().is_none());
        let before_1601 = UNIX_EPOCH - Duration::from_secs(400 * 365 * 24 * 3600);
        assert!(Timestamp::from_system_time(before_1601).is_null());
    }

    #[test]
    fn test_duration_arithmetic() {
        let start = Timestamp::from_unix_millis(1_000);
        let later = start.checked_add(Duration::from_millis(6_000_000)).unwrap();
        assert_eq!(
            later.saturating_duration_since(start),
            Duration::from_millis(6_000_000)
        );
        assert_eq!(start.saturating_duration_since(later), Duration::ZERO);
        assert!(Timestamp::from_ticks(u64::MAX)
            .checked_add(Duration::from_secs(1))
            .is_none());
    }

    #[test]
    fn test_truncated_timestamp() {
        let mut input: &[u8] = &[0x00; 7];
        assert!(decode_timestamp(&mut input).is_err());
    }
}
