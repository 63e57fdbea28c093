//! Speculative load/store queues used to model rollback on imprecise bus errors, `spec.md` §4.5.
//!
//! Grounded on `original_source/Core.cpp`'s `putInStoreQueue`/`putInLoadQueue`/
//! `invalidateInLoadQueue`/`removeFromLoadQueue`/`applyStoreException`/`applyLoadException`: the
//! original supplies the exact tie-breaking rules `spec.md` only describes in prose (oldest
//! matching `prevData` when several invalidated entries target the same register, trimming a
//! store record at a double-word boundary rather than discarding it outright). The Rust shape
//! (index-based `VecDeque`, a `valid` flag instead of removal) follows `spec.md` §9 Design Notes.

use std::collections::VecDeque;

use thiserror::Error;

use crate::registers::Specifier;

/// Outcome of [`StoreQueue::apply_exception`]/[`LoadQueue::apply_exception`] when exactly one
/// queue entry matched the faulting address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Matched,
}

/// `spec.md` §4.5/§7: "Zero or multiple matches are a hard error" returned to the caller rather
/// than silently mutating partial state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RollbackError {
    #[error("imprecise bus error at {addr:#x} matches no entry in the queue")]
    NoMatch { addr: u64 },
    #[error("imprecise bus error at {addr:#x} matches {matches} entries in the queue")]
    MultipleMatches { addr: u64, matches: usize },
}

#[derive(Debug, Clone, Copy)]
struct StoreEntry {
    addr: u64,
    size: u64,
    new_data: u64,
    prev_data: u64,
}

/// Bounded FIFO of in-flight stores, used to roll memory back to its pre-store contents when an
/// imprecise store-bus-error is signalled after the store already committed.
#[derive(Debug, Clone)]
pub struct StoreQueue {
    entries: VecDeque<StoreEntry>,
    capacity: usize,
}

impl StoreQueue {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records a completed store. A size-0 capacity or a DCCM-targeted store (per `spec.md` §4.3,
    /// DCCM stores never need rollback bookkeeping) is simply dropped.
    pub fn push(&mut self, addr: u64, size: u64, new_data: u64, prev_data: u64, is_dccm: bool) {
        if self.capacity == 0 || is_dccm {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(StoreEntry { addr, size, new_data, prev_data });
    }

    /// `applyStoreException` (`spec.md` §4.5): restores bytes up to the next double-word
    /// boundary by overwriting memory with `prevData` via `poke`, trims the matched queue entry
    /// if it straddles that boundary, and replays subsequent queued stores over the restored
    /// range. When `rollback_enabled` is false, performs no mutation and simply reports a match.
    pub fn apply_exception(
        &mut self,
        addr: u64,
        rollback_enabled: bool,
        mut poke: impl FnMut(u64, u8),
    ) -> Result<RollbackOutcome, RollbackError> {
        if !rollback_enabled {
            return Ok(RollbackOutcome::Matched);
        }

        let matches = self.entries.iter().filter(|e| addr >= e.addr && addr < e.addr + e.size).count();
        if matches == 0 {
            return Err(RollbackError::NoMatch { addr });
        }
        if matches > 1 {
            return Err(RollbackError::MultipleMatches { addr, matches });
        }

        let hit_ix = self
            .entries
            .iter()
            .position(|e| addr >= e.addr && addr < e.addr + e.size)
            .expect("exactly one match verified above");

        let hit = self.entries[hit_ix];
        let offset = addr - hit.addr;
        let mut prev = hit.prev_data >> (offset * 8);
        let mut next_boundary_addr = addr;
        let mut trimmed: Option<StoreEntry> = None;
        for i in offset..hit.size {
            poke(next_boundary_addr, prev as u8);
            prev >>= 8;
            next_boundary_addr += 1;
            if next_boundary_addr % 8 != 0 {
                continue;
            }
            if i + 1 < hit.size {
                let new_data = hit.new_data >> ((i + 1 - offset) * 8);
                trimmed = Some(StoreEntry {
                    addr: next_boundary_addr,
                    size: hit.size - (i + 1),
                    new_data,
                    prev_data: prev,
                });
            }
            break;
        }
        let undo_end = next_boundary_addr;

        // Replay bytes of every *later* entry that also covers the now-restored range.
        for entry in self.entries.iter().skip(hit_ix + 1) {
            let mut data = entry.new_data;
            for byte_addr in entry.addr..entry.addr + entry.size {
                if byte_addr >= addr && byte_addr < undo_end {
                    poke(byte_addr, data as u8);
                }
                data >>= 8;
            }
        }

        match trimmed {
            Some(replacement) => self.entries[hit_ix] = replacement,
            None => {
                self.entries.remove(hit_ix);
            }
        }
        Ok(RollbackOutcome::Matched)
    }
}

#[derive(Debug, Clone, Copy)]
struct LoadEntry {
    addr: u64,
    size: u64,
    reg_ix: Specifier,
    prev_data: u64,
    valid: bool,
}

/// Bounded FIFO of in-flight (non-DCCM) loads, used to revert a destination register when an
/// imprecise load-bus-error is signalled after the load already committed.
#[derive(Debug, Clone)]
pub struct LoadQueue {
    entries: VecDeque<LoadEntry>,
    capacity: usize,
}

impl LoadQueue {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records a non-DCCM load's destination register and its prior value, so it can be restored
    /// on a later `applyLoadException`/`applyLoadFinished`.
    pub fn push(&mut self, addr: u64, size: u64, reg_ix: Specifier, prev_data: u64) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LoadEntry { addr, size, reg_ix, prev_data, valid: true });
    }

    /// `spec.md` §4.3: called when `rs1` (the base register of a later load/store) is about to
    /// be consumed; any queue entry whose destination is `rs1` is invalidated (dependency stall)
    /// so a later exception cannot erroneously revert it.
    pub fn invalidate(&mut self, reg_ix: Specifier) {
        for entry in self.entries.iter_mut() {
            if entry.reg_ix == reg_ix {
                entry.valid = false;
            }
        }
    }

    /// `removeFromLoadQueue` (`spec.md` §4.3): called when `reg_ix` is about to be overwritten by
    /// a non-load instruction. The most recent valid entry targeting `reg_ix` is removed
    /// entirely; any older entries with the same target are invalidated (their value is now
    /// stale, stall semantics no longer apply to them).
    pub fn remove_for_write(&mut self, reg_ix: Specifier) {
        if reg_ix == Specifier::X0 {
            return;
        }
        let mut remove_ix = None;
        for ix in (0..self.entries.len()).rev() {
            if !self.entries[ix].valid || self.entries[ix].reg_ix != reg_ix {
                continue;
            }
            if remove_ix.is_none() {
                remove_ix = Some(ix);
            } else {
                self.entries[ix].valid = false;
            }
        }
        if let Some(ix) = remove_ix {
            self.entries.remove(ix);
        }
    }

    /// `applyLoadException`/`applyLoadFinished` (`spec.md` §4.5): finds the matching valid
    /// entry, returns `(reg, value)` to restore into the register file (picking the oldest
    /// `prevData` among older invalidated entries with the same target, per the original's
    /// "walking earlier invalidated entries" rule), then removes the entry.
    ///
    /// `match_oldest` is `applyLoadFinished`'s `matchOldest` flag (`spec.md` §6): when several
    /// entries match `addr`, pick the oldest instead of treating it as a hard error.
    pub fn apply_exception(
        &mut self,
        addr: u64,
        rollback_enabled: bool,
        match_oldest: bool,
    ) -> Result<(RollbackOutcome, Option<(Specifier, u64)>), RollbackError> {
        if !rollback_enabled {
            return Ok((RollbackOutcome::Matched, None));
        }

        let matches = self
            .entries
            .iter()
            .filter(|e| e.valid && addr >= e.addr && addr < e.addr + e.size)
            .count();
        if matches == 0 {
            return Err(RollbackError::NoMatch { addr });
        }
        if matches > 1 && !match_oldest {
            return Err(RollbackError::MultipleMatches { addr, matches });
        }

        let hit_ix = self
            .entries
            .iter()
            .position(|e| e.valid && addr >= e.addr && addr < e.addr + e.size)
            .expect("exactly one match verified above");
        let hit = self.entries[hit_ix];

        // A later entry with the same target register means the current register value is
        // already stale from our point of view; don't clobber it.
        let has_younger = self
            .entries
            .iter()
            .skip(hit_ix + 1)
            .any(|e| e.valid && e.reg_ix == hit.reg_ix);

        let restore = if has_younger {
            None
        } else {
            // Walk older invalidated entries with the same target to find the oldest prevData.
            let mut value = hit.prev_data;
            for entry in self.entries.iter().take(hit_ix).rev() {
                if entry.reg_ix == hit.reg_ix {
                    value = entry.prev_data;
                } else {
                    continue;
                }
            }
            Some((hit.reg_ix, value))
        };

        self.entries.remove(hit_ix);
        Ok((RollbackOutcome::Matched, restore))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_queue_evicts_oldest_past_capacity() {
        let mut q = StoreQueue::new(2);
        q.push(0x1000, 4, 1, 0, false);
        q.push(0x1004, 4, 2, 0, false);
        q.push(0x1008, 4, 3, 0, false);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn store_rollback_restores_bytes() {
        let mut q = StoreQueue::new(4);
        q.push(0x1000, 4, 0xAABBCCDD, 0x11223344, false);
        let mut restored = Vec::new();
        q.apply_exception(0x1000, true, |addr, byte| restored.push((addr, byte))).unwrap();
        assert_eq!(restored, vec![(0x1000, 0x44), (0x1001, 0x33), (0x1002, 0x22), (0x1003, 0x11)]);
        assert!(q.is_empty());
    }

    #[test]
    fn store_rollback_no_match_is_hard_error() {
        let mut q = StoreQueue::new(4);
        q.push(0x1000, 4, 0, 0, false);
        assert_eq!(q.apply_exception(0x2000, true, |_, _| {}), Err(RollbackError::NoMatch { addr: 0x2000 }));
    }

    #[test]
    fn load_queue_remove_for_write_drops_most_recent() {
        let mut q = LoadQueue::new(8);
        q.push(0x1000, 4, Specifier::from_u5(5), 1);
        q.push(0x1004, 4, Specifier::from_u5(5), 2);
        q.remove_for_write(Specifier::from_u5(5));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn load_exception_restores_prev_data() {
        let mut q = LoadQueue::new(8);
        q.push(0x1000, 4, Specifier::from_u5(5), 0xDEAD_BEEF);
        let (outcome, restore) = q.apply_exception(0x1000, true, false).unwrap();
        assert_eq!(outcome, RollbackOutcome::Matched);
        assert_eq!(restore, Some((Specifier::from_u5(5), 0xDEAD_BEEF)));
        assert!(q.is_empty());
    }

    #[test]
    fn load_exception_with_younger_same_target_does_not_restore() {
        let mut q = LoadQueue::new(8);
        q.push(0x1000, 4, Specifier::from_u5(5), 1);
        q.push(0x2000, 4, Specifier::from_u5(5), 2);
        let (_, restore) = q.apply_exception(0x1000, true, false).unwrap();
        assert_eq!(restore, None);
    }

    #[test]
    fn load_finished_with_match_oldest_picks_earliest_entry() {
        let mut q = LoadQueue::new(8);
        q.push(0x1000, 4, Specifier::from_u5(5), 11);
        q.push(0x1000, 4, Specifier::from_u5(6), 22);
        assert_eq!(
            q.apply_exception(0x1000, true, false),
            Err(RollbackError::MultipleMatches { addr: 0x1000, matches: 2 })
        );
        let (outcome, restore) = q.apply_exception(0x1000, true, true).unwrap();
        assert_eq!(outcome, RollbackOutcome::Matched);
        assert_eq!(restore, Some((Specifier::from_u5(5), 11)));
        assert_eq!(q.len(), 1);
    }
}
