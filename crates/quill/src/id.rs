use core::{fmt, str::FromStr};

use crate::error::ParseIdError;

/// A 64-bit Snowflake ID.
///
/// - 1 bit reserved (always zero so the value stays positive as a signed
///   64-bit integer)
/// - 41 bits timestamp (ms since the generator's epoch, see [`CUSTOM_EPOCH`])
/// - 10 bits worker ID
/// - 12 bits sequence
///
/// ```text
///  Bit Index:  63           63 62            22 21            12 11             0
///              +--------------+----------------+----------------+---------------+
///  Field:      | reserved (1) | timestamp (41) | worker ID (10) | sequence (12) |
///              +--------------+----------------+----------------+---------------+
///              |<----------- MSB ---------- 64 bits ---------- LSB ------------>|
/// ```
///
/// IDs order exactly like their raw integers. The canonical external form is
/// the decimal string produced by [`Display`](fmt::Display), since consumers
/// that store numbers as doubles cannot hold the full 64-bit range.
///
/// [`CUSTOM_EPOCH`]: crate::CUSTOM_EPOCH
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SnowflakeId {
    id: u64,
}

impl SnowflakeId {
    /// Bitmask for the 41-bit timestamp field. Occupies bits 22 through 62.
    pub const TIMESTAMP_MASK: u64 = (1 << 41) - 1;

    /// Bitmask for the 10-bit worker ID field. Occupies bits 12 through 21.
    pub const WORKER_ID_MASK: u64 = (1 << 10) - 1;

    /// Bitmask for the 12-bit sequence field. Occupies bits 0 through 11.
    pub const SEQUENCE_MASK: u64 = (1 << 12) - 1;

    pub const TIMESTAMP_SHIFT: u64 = 22;
    pub const WORKER_ID_SHIFT: u64 = 12;
    pub const SEQUENCE_SHIFT: u64 = 0;

    /// Largest timestamp (ms since epoch) the layout can encode.
    pub const MAX_TIMESTAMP: u64 = Self::TIMESTAMP_MASK;

    /// Largest worker ID the layout can encode.
    pub const MAX_WORKER_ID: u64 = Self::WORKER_ID_MASK;

    /// Largest per-millisecond sequence value.
    pub const MAX_SEQUENCE: u64 = Self::SEQUENCE_MASK;

    /// Packs the three fields into an ID. Out-of-range values are masked.
    pub const fn from_components(timestamp: u64, worker_id: u64, sequence: u64) -> Self {
        let timestamp = (timestamp & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let worker_id = (worker_id & Self::WORKER_ID_MASK) << Self::WORKER_ID_SHIFT;
        let sequence = (sequence & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        Self {
            id: timestamp | worker_id | sequence,
        }
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    pub const fn timestamp(&self) -> u64 {
        (self.id >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK
    }

    pub const fn worker_id(&self) -> u64 {
        (self.id >> Self::WORKER_ID_SHIFT) & Self::WORKER_ID_MASK
    }

    pub const fn sequence(&self) -> u64 {
        (self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK
    }

    /// Returns `true` if the sequence can be incremented within the current
    /// millisecond.
    pub const fn has_sequence_room(&self) -> bool {
        self.sequence() < Self::MAX_SEQUENCE
    }

    /// Returns a new ID with the sequence incremented.
    pub const fn increment_sequence(&self) -> Self {
        Self::from_components(self.timestamp(), self.worker_id(), self.sequence() + 1)
    }

    /// Returns a new ID for a newer timestamp with the sequence reset to zero.
    pub const fn rollover_to_timestamp(&self, timestamp: u64) -> Self {
        Self::from_components(timestamp, self.worker_id(), 0)
    }

    /// Returns `true` if the reserved sign bit is clear.
    pub const fn is_valid(&self) -> bool {
        self.id >> 63 == 0
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeId")
            .field("raw", &format_args!("0x{:016x} ({})", self.id, self.id))
            .field("timestamp", &self.timestamp())
            .field("worker_id", &self.worker_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl FromStr for SnowflakeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u64 = s.trim().parse()?;
        let id = Self::from_raw(raw);
        if !id.is_valid() {
            return Err(ParseIdError::SignBitSet(raw));
        }
        Ok(id)
    }
}

impl From<SnowflakeId> for u64 {
    fn from(id: SnowflakeId) -> Self {
        id.to_raw()
    }
}

impl From<SnowflakeId> for String {
    fn from(id: SnowflakeId) -> Self {
        id.to_string()
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use core::fmt;

    use serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de::{self, Visitor},
    };

    use super::SnowflakeId;

    impl Serialize for SnowflakeId {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.collect_str(self)
        }
    }

    struct IdVisitor;

    impl Visitor<'_> for IdVisitor {
        type Value = SnowflakeId;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a snowflake id as a decimal string or non-negative integer")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.parse().map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            let id = SnowflakeId::from_raw(v);
            if !id.is_valid() {
                return Err(E::custom(crate::ParseIdError::SignBitSet(v)));
            }
            Ok(id)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(SnowflakeId::from_raw)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
        }
    }

    impl<'de> Deserialize<'de> for SnowflakeId {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            d.deserialize_any(IdVisitor)
        }
    }
}
