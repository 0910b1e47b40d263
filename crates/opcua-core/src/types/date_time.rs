//! DateTime — signed 100-nanosecond ticks since 1601-01-01 00:00:00 UTC.
//!
//! Zero is the null sentinel. Conversions clamp to the representable window
//! (1601-01-01 through 9999-12-31); no leap-second handling is applied.

use bytes::{BufMut, BytesMut};
use chrono::{TimeZone, Utc};

use crate::codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};

/// Ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;

/// 9999-12-31 23:59:59 UTC.
const MAX_TICKS: i64 = 2_650_467_743_990_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DateTime(i64);

impl DateTime {
    pub const NULL: DateTime = DateTime(0);

    pub fn from_ticks(ticks: i64) -> Self {
        DateTime(ticks.clamp(0, MAX_TICKS))
    }

    pub fn ticks(self) -> i64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let since_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let ticks = UNIX_EPOCH_TICKS
            .saturating_add(since_unix.as_secs() as i64 * TICKS_PER_SECOND)
            .saturating_add(since_unix.subsec_nanos() as i64 / 100);
        DateTime::from_ticks(ticks)
    }

    pub fn from_unix_timestamp(secs: i64) -> Self {
        DateTime::from_ticks(
            UNIX_EPOCH_TICKS.saturating_add(secs.saturating_mul(TICKS_PER_SECOND)),
        )
    }

    /// Whole seconds since the Unix epoch (negative before 1970).
    pub fn to_unix_timestamp(self) -> i64 {
        (self.0 - UNIX_EPOCH_TICKS).div_euclid(TICKS_PER_SECOND)
    }

    pub fn from_chrono(dt: chrono::DateTime<Utc>) -> Self {
        let ticks = UNIX_EPOCH_TICKS
            .saturating_add(dt.timestamp().saturating_mul(TICKS_PER_SECOND))
            .saturating_add(i64::from(dt.timestamp_subsec_nanos()) / 100);
        DateTime::from_ticks(ticks)
    }

    pub fn to_chrono(self) -> chrono::DateTime<Utc> {
        let since_unix = self.0 - UNIX_EPOCH_TICKS;
        let secs = since_unix.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_unix.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        Utc.timestamp_opt(secs, nanos).unwrap()
    }
}

impl BinaryEncode for DateTime {
    fn encode(&self, out: &mut BytesMut) {
        out.put_i64_le(self.0);
    }
}

impl BinaryDecode for DateTime {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        // Raw ticks are preserved on decode; clamping only applies to values
        // this client constructs.
        Ok(DateTime(input.read_i64()?))
    }
}

impl std::fmt::Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.to_chrono().to_rfc3339())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_null() {
        assert!(DateTime::NULL.is_null());
        assert!(!DateTime::now().is_null());
    }

    #[test]
    fn unix_epoch_round_trip() {
        let epoch = DateTime::from_unix_timestamp(0);
        assert_eq!(epoch.ticks(), UNIX_EPOCH_TICKS);
        assert_eq!(epoch.to_unix_timestamp(), 0);

        let ts = 1_700_000_000;
        assert_eq!(DateTime::from_unix_timestamp(ts).to_unix_timestamp(), ts);
    }

    #[test]
    fn now_is_close_to_system_clock() {
        let now = DateTime::now().to_unix_timestamp();
        let sys = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!((now - sys).abs() <= 1);
    }

    #[test]
    fn chrono_round_trip() {
        let dt = Utc.with_ymd_and_hms(2024, 2, 29, 12, 34, 56).unwrap();
        assert_eq!(DateTime::from_chrono(dt).to_chrono(), dt);
    }

    #[test]
    fn construction_clamps_to_window() {
        assert_eq!(DateTime::from_ticks(-5).ticks(), 0);
        assert_eq!(DateTime::from_ticks(i64::MAX).ticks(), MAX_TICKS);
    }

    #[test]
    fn wire_round_trip() {
        let dt = DateTime::from_unix_timestamp(1_234_567_890);
        let bytes = dt.encode_to_vec();
        assert_eq!(bytes.len(), 8);
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(DateTime::decode(&mut reader).unwrap(), dt);
    }
}
