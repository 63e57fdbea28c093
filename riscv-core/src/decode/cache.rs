//! Direct-mapped decode cache keyed by PC.
//!
//! Per `spec.md` §4.1: fetch consults the cache before re-decoding, and any memory write to
//! `[a, a+n)` invalidates every slot whose cached instruction could overlap
//! `[a-1, a+n)` (the `-1` covers a 2-byte compressed instruction starting one byte before `a`).

use super::inst::DecodedInst;

#[derive(Debug, Clone, Copy)]
struct Slot {
    address: u64,
    inst: DecodedInst,
}

/// A power-of-two-sized, direct-mapped cache from instruction address to its decoded form.
#[derive(Debug, Clone)]
pub struct DecodeCache {
    slots: Vec<Option<Slot>>,
    index_mask: u64,
}

impl DecodeCache {
    /// `capacity` is rounded up to the next power of two if it isn't one already.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        Self {
            slots: vec![None; capacity],
            index_mask: (capacity - 1) as u64,
        }
    }

    fn index(&self, address: u64) -> usize {
        (address & self.index_mask) as usize
    }

    pub fn lookup(&self, address: u64) -> Option<DecodedInst> {
        match &self.slots[self.index(address)] {
            Some(slot) if slot.address == address => Some(slot.inst),
            _ => None,
        }
    }

    pub fn insert(&mut self, address: u64, inst: DecodedInst) {
        let index = self.index(address);
        self.slots[index] = Some(Slot { address, inst });
    }

    /// Invalidates every cached entry whose address falls in `[a-1, a+n)`, i.e. every
    /// instruction that could have decoded bytes overlapping the write.
    pub fn invalidate_range(&mut self, a: u64, n: u64) {
        let lo = a.saturating_sub(1);
        let hi = a + n;
        for slot in &mut self.slots {
            if let Some(s) = slot {
                if s.address >= lo && s.address < hi {
                    *slot = None;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::inst::Opcode;
    use crate::fp::RoundingMode;

    fn dummy(address: u64) -> DecodedInst {
        DecodedInst {
            address,
            inst_bits: 0x13,
            inst_size: 4,
            id: Opcode::Addi,
            op0: 0,
            op1: 0,
            op2: 0,
            op3: 0,
            rounding_mode: RoundingMode::RoundNearestEven,
            atomic_aq: false,
            atomic_rl: false,
            valid: true,
        }
    }

    #[test]
    fn miss_then_hit() {
        let mut cache = DecodeCache::new(16);
        assert!(cache.lookup(0x1000).is_none());
        cache.insert(0x1000, dummy(0x1000));
        assert_eq!(cache.lookup(0x1000).unwrap().address, 0x1000);
    }

    #[test]
    fn aliasing_overwrites_slot() {
        let mut cache = DecodeCache::new(16);
        cache.insert(0x1000, dummy(0x1000));
        cache.insert(0x1010, dummy(0x1010));
        assert!(cache.lookup(0x1000).is_none());
        assert_eq!(cache.lookup(0x1010).unwrap().address, 0x1010);
    }

    #[test]
    fn write_invalidates_overlapping_slots() {
        let mut cache = DecodeCache::new(64);
        cache.insert(0x100, dummy(0x100));
        cache.insert(0x104, dummy(0x104));
        cache.insert(0x200, dummy(0x200));
        // A 4-byte write at 0x101 overlaps [0x100, 0x105): invalidates both 0x100 and 0x104,
        // since [a-1, a+n) = [0x100, 0x105).
        cache.invalidate_range(0x101, 4);
        assert!(cache.lookup(0x100).is_none());
        assert!(cache.lookup(0x104).is_none());
        assert_eq!(cache.lookup(0x200).unwrap().address, 0x200);
    }

    #[test]
    fn write_just_before_does_not_invalidate_unrelated_slot() {
        let mut cache = DecodeCache::new(64);
        cache.insert(0x200, dummy(0x200));
        cache.invalidate_range(0x100, 4);
        assert!(cache.lookup(0x200).is_some());
    }
}
