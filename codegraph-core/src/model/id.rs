//! Time-ordered id generation for entities, relationships, and tasks.
//!
//! Adapted from the UUID6 scheme used for checkpoint ids elsewhere in the
//! pack: a time-ordered 128-bit value with monotonic tie-breaking within the
//! same 100ns tick, so ids sort the way rows were inserted without needing a
//! separate sequence column.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

const UUID_EPOCH_OFFSET: u64 = 0x01b2_1dd2_1381_4000;

/// A stable, time-ordered identifier for an [`crate::model::Entity`],
/// [`crate::model::Relationship`], or [`crate::model::Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId {
    bytes: [u8; 16],
}

impl GraphId {
    fn from_int(mut int_val: u128, version: u8) -> Self {
        int_val &= !(0xC000_u128 << 48);
        int_val |= 0x8000_u128 << 48;
        int_val &= !(0xF000_u128 << 64);
        int_val |= (version as u128) << 76;
        Self {
            bytes: int_val.to_be_bytes(),
        }
    }

    pub fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.bytes)
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3],
            self.bytes[4], self.bytes[5],
            self.bytes[6], self.bytes[7],
            self.bytes[8], self.bytes[9],
            self.bytes[10], self.bytes[11], self.bytes[12], self.bytes[13], self.bytes[14], self.bytes[15]
        )
    }
}

impl serde::Serialize for GraphId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for GraphId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_graph_id(&s).ok_or_else(|| serde::de::Error::custom("invalid graph id"))
    }
}

/// Parses a dashed or bare hex-32 string back into a [`GraphId`].
pub fn parse_graph_id(s: &str) -> Option<GraphId> {
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(GraphId { bytes })
}

/// Generates a new time-ordered id.
pub fn new_id() -> GraphId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut timestamp = nanos / 100 + UUID_EPOCH_OFFSET;

    loop {
        let last = LAST_TIMESTAMP.load(Ordering::SeqCst);
        if timestamp <= last {
            timestamp = last + 1;
        }
        if LAST_TIMESTAMP
            .compare_exchange(last, timestamp, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }

    let node = rand_u48();
    let clock_seq = rand_u14();

    let time_high_and_mid = (timestamp >> 12) & 0xFFFF_FFFF_FFFF;
    let time_low = timestamp & 0x0FFF;

    let mut uuid_int: u128 = (time_high_and_mid as u128) << 80;
    uuid_int |= (time_low as u128) << 64;
    uuid_int |= ((clock_seq & 0x3FFF) as u128) << 48;
    uuid_int |= (node & 0xFFFF_FFFF_FFFF) as u128;

    GraphId::from_int(uuid_int, 6)
}

fn rand_u48() -> u64 {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42);
    let mut state = seed ^ 0xDEAD_BEEF_CAFE_BABE;
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state & 0xFFFF_FFFF_FFFF
}

fn rand_u14() -> u16 {
    (rand_u48() & 0x3FFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sort_in_generation_order() {
        let a = new_id();
        let b = new_id();
        assert!(b.as_u128() > a.as_u128());
        assert!(b.to_string() > a.to_string());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let id = new_id();
        let s = id.to_string();
        assert_eq!(parse_graph_id(&s), Some(id));
    }
}
