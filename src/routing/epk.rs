//! Effective partition key hashing
//!
//! Maps a logical partition-key value onto the hex key space covered by
//! [`FeedRange`](super::FeedRange). The hash is stable across processes so
//! documents always land in the same range for the same topology.

use serde_json::Value;

/// Hash a partition-key value into an 8-digit hex effective key
///
/// The result is always below `"FF"`, so it lies inside the full range.
pub fn effective_partition_key(value: &Value) -> String {
    let canonical = value.to_string();
    let crc = crc32fast::hash(canonical.as_bytes());
    let scaled = ((crc as u64) * 0xFF00_0000) >> 32;
    format!("{:08X}", scaled)
}
