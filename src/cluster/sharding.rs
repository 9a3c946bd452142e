//! Sharding Module
//!
//! Redis-compatible slot routing: 16384 CRC16 slots, with `{hashtag}`
//! extraction so that keys sharing a tag always land on the same node.

/// Total number of slots (Redis-compatible)
pub const TOTAL_SLOTS: u16 = 16384;

/// A single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub u16);

impl Slot {
    pub fn new(slot: u16) -> Self {
        debug_assert!(slot < TOTAL_SLOTS);
        Self(slot)
    }

    /// Calculate slot from key using CRC16 over its hashtag
    pub fn from_key(key: &[u8]) -> Self {
        let hash = crc16(hashtag(key));
        Self(hash % TOTAL_SLOTS)
    }
}

/// The part of a key that is hashed for routing.
///
/// If the key contains `{...}` with a non-empty body, only the body between
/// the first `{` and the next `}` is hashed; otherwise the whole key is.
pub fn hashtag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// CRC16 implementation (XMODEM)
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Slot range (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end);
        debug_assert!(end < TOTAL_SLOTS);
        Self { start, end }
    }

    pub fn contains(&self, slot: Slot) -> bool {
        slot.0 >= self.start && slot.0 <= self.end
    }

    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }
}

/// Static slot-to-node table for a fixed list of endpoints
#[derive(Debug, Clone)]
pub struct ShardMap {
    ranges: Vec<SlotRange>,
}

impl ShardMap {
    /// Distribute slots evenly across `nodes` endpoints
    pub fn new(nodes: usize) -> Self {
        let nodes = nodes.max(1);
        let slots_per_node = TOTAL_SLOTS as usize / nodes;
        let mut extra = TOTAL_SLOTS as usize % nodes;

        let mut ranges = Vec::with_capacity(nodes);
        let mut start = 0u16;
        for _ in 0..nodes {
            let count = slots_per_node + if extra > 0 { extra -= 1; 1 } else { 0 };
            let end = start + count as u16 - 1;
            ranges.push(SlotRange::new(start, end));
            start = end.saturating_add(1);
        }
        Self { ranges }
    }

    pub fn node_count(&self) -> usize {
        self.ranges.len()
    }

    /// Index of the node owning a slot
    pub fn node_for_slot(&self, slot: Slot) -> usize {
        // ranges are contiguous and sorted, so a binary search suffices
        self.ranges
            .partition_point(|range| range.end < slot.0)
            .min(self.ranges.len() - 1)
    }

    /// Index of the node owning a key
    pub fn node_for_key(&self, key: &[u8]) -> usize {
        self.node_for_slot(Slot::from_key(key))
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_from_key() {
        let slot = Slot::from_key(b"hello");
        assert!(slot.0 < TOTAL_SLOTS);
        // Reference value from the Redis cluster specification
        assert_eq!(Slot::from_key(b"123456789").0, 0x31C3 % TOTAL_SLOTS);
    }

    #[test]
    fn test_hashtag_colocation() {
        assert_eq!(hashtag(b"{Test:posts:100}01"), b"Test:posts:100");
        assert_eq!(
            Slot::from_key(b"{Test:posts:100}01"),
            Slot::from_key(b"{Test:posts:100}99")
        );
        // empty tag hashes the whole key
        assert_eq!(hashtag(b"{}abc"), b"{}abc");
        assert_eq!(hashtag(b"plain"), b"plain");
        assert_eq!(hashtag(b"open{only"), b"open{only");
    }

    #[test]
    fn test_slot_range() {
        let range = SlotRange::new(0, 5460);
        assert!(range.contains(Slot(0)));
        assert!(range.contains(Slot(5460)));
        assert!(!range.contains(Slot(5461)));
        assert_eq!(range.count(), 5461);
    }

    #[test]
    fn test_distribute_slots() {
        let map = ShardMap::new(3);
        assert_eq!(map.node_count(), 3);

        let total: usize = map.ranges().iter().map(|r| r.count() as usize).sum();
        assert_eq!(total, TOTAL_SLOTS as usize);

        assert_eq!(map.node_for_slot(Slot(0)), 0);
        assert_eq!(map.node_for_slot(Slot(5461)), 0);
        assert_eq!(map.node_for_slot(Slot(5462)), 1);
        assert_eq!(map.node_for_slot(Slot(TOTAL_SLOTS - 1)), 2);
    }

    #[test]
    fn test_single_node_owns_everything() {
        let map = ShardMap::new(1);
        assert_eq!(map.node_for_key(b"anything"), 0);
        assert_eq!(map.node_for_slot(Slot(TOTAL_SLOTS - 1)), 0);

        let empty = ShardMap::new(0);
        assert_eq!(empty.node_count(), 1);
    }
}
