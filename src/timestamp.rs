//! A timestamp returned from the timestamp oracle.
//!
//! The version used in transactions can be converted from a timestamp.
//! The lower 18 (PHYSICAL_SHIFT_BITS) bits are the logical part of the timestamp.
//! The higher bits of the version are the physical part of the timestamp.

use std::convert::TryInto;
use std::fmt;

use crate::internal_err;
use crate::Result;

const PHYSICAL_SHIFT_BITS: u32 = 18;
const LOGICAL_MASK: i64 = (1_i64 << PHYSICAL_SHIFT_BITS) - 1;

/// A PD timestamp: milliseconds of wall clock plus a logical counter.
///
/// Timestamps are handed out monotonically by PD. The client only reads and compares them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub physical: i64,
    pub logical: i64,
}

impl Timestamp {
    pub fn new(physical: i64, logical: i64) -> Self {
        Self { physical, logical }
    }

    /// Convert the timestamp to its `u64` version. Out-of-range parts yield `0`.
    pub fn version(&self) -> u64 {
        let ts: i128 = ((self.physical as i128) << PHYSICAL_SHIFT_BITS) + (self.logical as i128);
        ts.try_into().unwrap_or(0)
    }

    pub fn from_version(version: u64) -> Self {
        let version = version as i64;
        Self {
            physical: version >> PHYSICAL_SHIFT_BITS,
            logical: version & LOGICAL_MASK,
        }
    }

    /// Convert u64 to an optional timestamp, where `0` represents no timestamp.
    pub fn try_from_version(version: u64) -> Option<Self> {
        if version == 0 {
            None
        } else {
            Some(Self::from_version(version))
        }
    }

    /// A zero version is never handed out by PD.
    pub fn is_valid(&self) -> bool {
        self.version() != 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version())
    }
}

/// Create a transaction timestamp from its physical and logical parts.
///
/// This matches TiKV's timestamp encoding: `(physical_ms << 18) + logical`.
pub fn compose_ts(physical_ms: i64, logical: i64) -> Result<u64> {
    let ts: i128 = ((physical_ms as i128) << PHYSICAL_SHIFT_BITS) + (logical as i128);
    ts.try_into().map_err(|_| {
        internal_err!("invalid ts parts (physical_ms={physical_ms}, logical={logical})")
    })
}

/// Extract the physical part (milliseconds since Unix epoch) from a TiKV timestamp.
pub fn extract_physical(ts: u64) -> i64 {
    (ts >> PHYSICAL_SHIFT_BITS) as i64
}

/// Extract the logical part from a TiKV timestamp.
pub fn extract_logical(ts: u64) -> i64 {
    (ts as i64) & LOGICAL_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_parts_round_trip() {
        let physical_ms = 1_700_000_123_456_i64;
        let logical = 42_i64;
        let ts = compose_ts(physical_ms, logical).unwrap();
        assert_eq!(extract_physical(ts), physical_ms);
        assert_eq!(extract_logical(ts), logical);
        assert_eq!(Timestamp::new(physical_ms, logical).version(), ts);
        assert_eq!(Timestamp::from_version(ts), Timestamp::new(physical_ms, logical));
    }

    #[test]
    fn zero_version_is_not_a_timestamp() {
        assert!(!Timestamp::default().is_valid());
        assert_eq!(Timestamp::try_from_version(0), None);
        assert!(Timestamp::new(1, 0).is_valid());
    }

    #[test]
    fn ordering_follows_version() {
        let a = Timestamp::new(10, 5);
        let b = Timestamp::new(11, 0);
        assert!(a < b);
        assert!(a.version() < b.version());
    }

    #[test]
    fn compose_ts_rejects_negative_timestamps() {
        assert!(compose_ts(-1, 0).is_err());
    }
}
