//! Persisted whole-simulation snapshots: `spec.md` §4.7's `snapshotRun` and the save/load
//! round-trip implied by §6's `peek*`/`poke*` surface extended to the whole address space.
//!
//! Distinct from `space_time::SpaceTime`'s in-process undo history (used by `Hart::what_if_step`,
//! see `hart.rs`): that mechanism is a cheap structural clone meant to live only as long as one
//! hypothetical step. This module is for serializing a running simulation to disk and reloading
//! it later, grounded on `willmccallion-rvsim`'s use of `serde` for its own save-state format (the
//! teacher itself has no persisted snapshot format; see `DESIGN.md`).

use serde::{Deserialize, Serialize};
use space_time::Allocator;

use crate::csr::num::CsrNumber;
use crate::hart::Hart;
use crate::memory::Memory;
use crate::privilege::PrivilegeLevel;
use crate::xlen::Xlen;

/// One hart's architectural state, `spec.md` §3's "Architectural state". Execution auxiliaries
/// (decode cache, load/store queues, load reservation) are transient dispatch bookkeeping and are
/// rebuilt fresh on restore rather than persisted, the same way [`Hart::reset`] leaves them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HartSnapshot {
    pub pc: u64,
    pub int_regs: [u64; 32],
    pub fp_regs: [u64; 32],
    pub csrs: Vec<(CsrNumber, u64)>,
    pub privilege: PrivilegeLevel,
    pub mcycle: u64,
    pub retired: u64,
    pub debug_mode: bool,
}

impl HartSnapshot {
    /// Captures every CSR number the hart was configured with (`HartConfig::csrs`), via
    /// [`Hart::peek_csr`] so tied CSRs (`mcycle`/`minstret`/`mhartid`) come along correctly.
    pub fn capture<X: Xlen, A: Allocator>(hart: &Hart<X, A>) -> Self {
        let csrs = hart
            .config()
            .csrs
            .iter()
            .map(|(number, _)| (*number, hart.peek_csr(*number).0))
            .collect();
        Self {
            pc: hart.peek_pc(),
            int_regs: std::array::from_fn(|i| hart.peek_int_reg(i as u8)),
            fp_regs: std::array::from_fn(|i| hart.peek_fp_reg(i as u8)),
            csrs,
            privilege: hart.privilege(),
            mcycle: hart.mcycle(),
            retired: hart.retired(),
            debug_mode: hart.is_debug_mode(),
        }
    }

    /// Restores this capture onto `hart` via the same `poke*` surface a debug harness would use.
    pub fn restore<X: Xlen, A: Allocator>(&self, hart: &mut Hart<X, A>) {
        hart.poke_pc(self.pc);
        for (i, value) in self.int_regs.iter().enumerate() {
            hart.poke_int_reg(i as u8, *value);
        }
        for (i, value) in self.fp_regs.iter().enumerate() {
            hart.poke_fp_reg(i as u8, *value);
        }
        for (number, value) in &self.csrs {
            hart.poke_csr(*number, *value);
        }
        hart.set_privilege(self.privilege);
        hart.set_mcycle(self.mcycle);
        hart.set_retired(self.retired);
        hart.set_debug_mode_raw(self.debug_mode);
    }
}

/// A full capture of one [`Memory`]'s contents, `spec.md` §6 `peekMemory`/`pokeMemory` extended to
/// the whole address space. Kept dense (not page-sparse) for the same reason documented on
/// [`Memory::snapshot_bytes`]: the `pristine` page flag is not a reliable "has content" signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub bytes: Vec<u8>,
}

impl MemorySnapshot {
    pub fn capture(memory: &Memory) -> Self {
        Self { bytes: memory.snapshot_bytes() }
    }

    pub fn restore(&self, memory: &mut Memory) {
        memory.restore_bytes(&self.bytes);
    }
}

/// A point-in-time capture of a whole simulation: every hart plus shared memory, `spec.md` §4.7
/// `snapshotRun`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub harts: Vec<HartSnapshot>,
    pub memory: MemorySnapshot,
}

impl Snapshot {
    pub fn capture<X: Xlen, A: Allocator>(harts: &[Hart<X, A>], memory: &Memory) -> Self {
        Self {
            harts: harts.iter().map(HartSnapshot::capture).collect(),
            memory: MemorySnapshot::capture(memory),
        }
    }

    /// Restores every hart in `harts` from the corresponding entry in this snapshot and `memory`
    /// from [`Self::memory`]. Panics if `harts.len()` does not match the captured hart count; a
    /// mismatch means the caller reloaded a snapshot against a differently-configured simulation,
    /// which is a harness bug rather than an architectural condition.
    pub fn restore<X: Xlen, A: Allocator>(&self, harts: &mut [Hart<X, A>], memory: &mut Memory) {
        assert_eq!(harts.len(), self.harts.len(), "snapshot hart count does not match");
        for (hart, captured) in harts.iter_mut().zip(&self.harts) {
            captured.restore(hart);
        }
        self.memory.restore(memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::HartConfig;
    use crate::xlen::Rv64;

    #[test]
    fn hart_snapshot_round_trips_registers_and_csrs() {
        let mut hart = Hart::<Rv64>::new(HartConfig { reset_pc: 0x8000_0000, ..HartConfig::default() });
        hart.poke_int_reg(5, 0x1234);
        hart.poke_csr(crate::csr::num::MSCRATCH, 0xABCD);
        let snap = HartSnapshot::capture(&hart);

        hart.poke_int_reg(5, 0);
        hart.poke_csr(crate::csr::num::MSCRATCH, 0);
        snap.restore(&mut hart);

        assert_eq!(hart.peek_int_reg(5), 0x1234);
        assert_eq!(hart.peek_csr(crate::csr::num::MSCRATCH).0, 0xABCD);
    }

    #[test]
    fn memory_snapshot_round_trips_bytes() {
        let mut memory = Memory::new(4096, 4096, 4096).unwrap();
        memory.set_page_attributes(
            0,
            memory.size(),
            crate::memory::PageAttributes { mapped: true, read: true, write: true, ..Default::default() },
        );
        memory.write(0x10, &[1, 2, 3, 4]).unwrap();
        let snap = MemorySnapshot::capture(&memory);

        memory.write(0x10, &[0, 0, 0, 0]).unwrap();
        snap.restore(&mut memory);

        assert_eq!(memory.read(0x10, 4).unwrap(), vec![1, 2, 3, 4]);
    }
}
