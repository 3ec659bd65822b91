//! OPC UA timestamps.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{TimeZone, Utc};
use std::fmt;

use super::encoding::{BinaryDecode, BinaryEncode, DecodingLimits, EncodingResult};
use super::status::StatusCode;

/// Ticks between 1601-01-01 and 1970-01-01 (100 ns units).
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
/// 100-ns ticks per second.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// A 64-bit count of 100-nanosecond intervals since 1601-01-01 UTC.
///
/// Tick value 0 is the null date; `i64::MAX` means "no value / end of time".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime(i64);

impl DateTime {
    pub const NULL: DateTime = DateTime(0);
    /// Sentinel meaning "no value"; never interpreted as a calendar date.
    pub const MAX: DateTime = DateTime(i64::MAX);

    pub fn now() -> Self {
        Self::from_chrono(&Utc::now())
    }

    pub fn from_ticks(ticks: i64) -> Self {
        DateTime(ticks)
    }

    pub fn ticks(self) -> i64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn from_chrono(dt: &chrono::DateTime<Utc>) -> Self {
        let ticks = dt.timestamp() * TICKS_PER_SECOND + i64::from(dt.timestamp_subsec_nanos()) / 100;
        DateTime(ticks.saturating_add(UNIX_EPOCH_TICKS))
    }

    /// Convert to a calendar date. Null and the no-value sentinel yield `None`.
    pub fn as_chrono(self) -> Option<chrono::DateTime<Utc>> {
        if self.is_null() || self == Self::MAX {
            return None;
        }
        let unix_ticks = self.0 - UNIX_EPOCH_TICKS;
        let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    }

    /// Milliseconds between two timestamps, saturating at zero when `other`
    /// is later than `self`.
    pub fn millis_since(self, other: DateTime) -> i64 {
        (self.0.saturating_sub(other.0)) / 10_000
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_chrono() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "<null>"),
        }
    }
}

impl BinaryEncode for DateTime {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_i64_le(self.0);
        Ok(())
    }
}

impl BinaryDecode for DateTime {
    fn decode<B: Buf>(buf: &mut B, _limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 8 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        Ok(DateTime(buf.get_i64_le()))
    }
}
