//! The run loop(s) layered on top of a single [`Hart::step`](crate::hart::Hart::step), `spec.md`
//! §4.7: `run`, `runUntilAddress`, `simpleRun`, `snapshotRun`, `whatIfStep`.
//!
//! Kept as free functions rather than `Hart` methods (aside from `what_if_step`, which needs the
//! concrete `SpaceTime` allocator and lives on `Hart` itself in `hart.rs`): a run loop only needs
//! `Hart::step_with_console`, so it has no reason to be generic over the allocator the way `Hart`
//! is, and keeping it here matches `spec.md` §9's "exceptions as control flow" note — `RunResult`
//! is the tagged enum the loop returns by value instead of raising through a panic/exception path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use space_time::Allocator;

use crate::execute::StepOutcome;
use crate::hart::{ConsoleIo, Hart};
use crate::memory::Memory;
use crate::trap::Exception;
use crate::xlen::Xlen;

/// Why a run loop stopped, `spec.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// Reached `RunLimits::stop_pc`.
    Completed,
    /// `RunLimits::cancel` was observed set.
    Interrupted,
    /// `RunLimits::max_instructions` was reached without hitting any other stop condition.
    LimitReached,
    /// A `toHost` write terminated the run; carries the raw value written.
    Exited(u64),
    /// The hart entered debug mode (`ebreak`, a trigger, or an external halt request).
    EnteredDebugMode,
    /// `spec.md` §9 Design Notes: a simulator-level safety valve, not an architectural state. More
    /// than [`STUCK_THRESHOLD`] consecutive illegal-instruction traps in a row almost certainly
    /// means the program counter ran off into non-code memory; left running, the hart would spin
    /// on that forever rather than making any real progress.
    StuckInIllegal,
}

/// How many consecutive `IllegalInst` traps [`run_until`] tolerates before giving up with
/// [`RunResult::StuckInIllegal`].
pub const STUCK_THRESHOLD: u32 = 64;

/// Stop conditions for [`run_until`]. All fields are optional; a run with every field `None` only
/// stops on a `toHost` write, debug-mode entry, or the stuck-in-illegal safety valve.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub max_instructions: Option<u64>,
    pub stop_pc: Option<u64>,
    /// Checked once per instruction; lets a harness wire `Ctrl-C` (`SPEC_FULL.md` §7) to a clean
    /// stop instead of killing the process mid-instruction.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// `spec.md` §4.7 `run`/`runUntilAddress`: steps `hart` until a stop condition in `limits` fires,
/// a `toHost` write terminates it, or it enters debug mode.
pub fn run_until<X: Xlen, A: Allocator>(
    hart: &mut Hart<X, A>,
    memory: &mut Memory,
    mut console: Option<&mut dyn ConsoleIo>,
    limits: &RunLimits,
) -> RunResult {
    let mut executed = 0u64;
    let mut consecutive_illegal = 0u32;

    loop {
        if let Some(cancel) = &limits.cancel {
            if cancel.load(Ordering::Relaxed) {
                return RunResult::Interrupted;
            }
        }
        if let Some(stop_pc) = limits.stop_pc {
            if hart.peek_pc() == stop_pc {
                return RunResult::Completed;
            }
        }
        if let Some(max) = limits.max_instructions {
            if executed >= max {
                return RunResult::LimitReached;
            }
        }

        let outcome = hart.step_with_console(memory, console.as_mut().map(|c| &mut **c));
        executed += 1;

        match outcome {
            StepOutcome::Continue => consecutive_illegal = 0,
            StepOutcome::Exception(Exception::IllegalInst, _) => {
                consecutive_illegal += 1;
                if consecutive_illegal >= STUCK_THRESHOLD {
                    return RunResult::StuckInIllegal;
                }
            }
            StepOutcome::Exception(_, _) => consecutive_illegal = 0,
            StepOutcome::Terminate(value) => return RunResult::Exited(value),
            StepOutcome::EnterDebugMode(_) => return RunResult::EnteredDebugMode,
        }
    }
}

/// `spec.md` §4.7 `runUntilAddress`: convenience wrapper building [`RunLimits`] around a single
/// stop address.
pub fn run_until_address<X: Xlen, A: Allocator>(
    hart: &mut Hart<X, A>,
    memory: &mut Memory,
    console: Option<&mut dyn ConsoleIo>,
    stop_pc: u64,
    max_instructions: Option<u64>,
    cancel: Option<Arc<AtomicBool>>,
) -> RunResult {
    run_until(hart, memory, console, &RunLimits { max_instructions, stop_pc: Some(stop_pc), cancel })
}

/// `spec.md` §4.7 `simpleRun`: a throughput-oriented run with no stop-address bookkeeping beyond
/// termination. The original reaches for a second, trigger/counter-free interpreter loop here;
/// triggers and the cycle/retirement counters are cheap, always-on parts of `Hart::step` in this
/// implementation (see `DESIGN.md`), so a second loop would only duplicate `run_until` without
/// actually skipping any work. `simple_run` is therefore a thin alias with no limits at all.
pub fn simple_run<X: Xlen, A: Allocator>(hart: &mut Hart<X, A>, memory: &mut Memory) -> RunResult {
    run_until(hart, memory, None, &RunLimits::default())
}

/// `spec.md` §4.7 `snapshotRun`: runs in chunks of `period` instructions, invoking `on_period`
/// after each chunk so the caller can persist a [`crate::snapshot::Snapshot`] (or anything else)
/// before continuing. `riscv-core` stays filesystem-free; `on_period` is the harness's hook for
/// doing the actual serialization (`SPEC_FULL.md` §4/§6).
pub fn snapshot_run<X: Xlen, A: Allocator>(
    hart: &mut Hart<X, A>,
    memory: &mut Memory,
    mut console: Option<&mut dyn ConsoleIo>,
    limits: &RunLimits,
    period: u64,
    mut on_period: impl FnMut(&Hart<X, A>, &Memory),
) -> RunResult {
    assert!(period > 0, "snapshot period must be nonzero");
    let mut remaining = limits.max_instructions;

    loop {
        let chunk = match remaining {
            Some(0) => return RunResult::LimitReached,
            Some(r) => r.min(period),
            None => period,
        };
        let chunk_limits = RunLimits {
            max_instructions: Some(chunk),
            stop_pc: limits.stop_pc,
            cancel: limits.cancel.clone(),
        };
        let result = run_until(hart, memory, console.as_mut().map(|c| &mut **c), &chunk_limits);
        if let Some(r) = remaining.as_mut() {
            *r -= chunk;
        }
        match result {
            RunResult::LimitReached => on_period(hart, memory),
            other => return other,
        }
    }
}

/// `spec.md` §4.7 `whatIfStep`'s return value: what a hypothetical step would have changed, had it
/// been kept. `memory_changes` is `(addr, old_byte, new_byte)` for every byte the step touched.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub pc_before: u64,
    pub pc_after: u64,
    pub memory_changes: Vec<(u64, u8, u8)>,
    pub outcome: StepOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::HartConfig;
    use crate::memory::PageAttributes;
    use crate::xlen::Rv64;

    fn runnable_memory() -> Memory {
        let mut mem = Memory::new(1 << 16, 1 << 16, 4096).unwrap();
        mem.set_page_attributes(
            0,
            mem.size(),
            PageAttributes { mapped: true, read: true, write: true, exec: true, ..Default::default() },
        );
        mem
    }

    #[test]
    fn run_until_address_stops_at_target_pc() {
        let mut hart = Hart::<Rv64>::new(HartConfig { reset_pc: 0, ..HartConfig::default() });
        let mut memory = runnable_memory();
        // addi x0, x0, 0 (nop), four times
        for pc in (0..16).step_by(4) {
            memory.write(pc, &0x0000_0013u32.to_le_bytes()).unwrap();
        }
        let result = run_until_address(&mut hart, &mut memory, None, 12, None, None);
        assert_eq!(result, RunResult::Completed);
        assert_eq!(hart.peek_pc(), 12);
    }

    #[test]
    fn max_instructions_limit_is_honored() {
        let mut hart = Hart::<Rv64>::new(HartConfig { reset_pc: 0, ..HartConfig::default() });
        let mut memory = runnable_memory();
        for pc in (0..4096).step_by(4) {
            memory.write(pc, &0x0000_0013u32.to_le_bytes()).unwrap();
        }
        let result = run_until(
            &mut hart,
            &mut memory,
            None,
            &RunLimits { max_instructions: Some(10), ..Default::default() },
        );
        assert_eq!(result, RunResult::LimitReached);
        assert_eq!(hart.peek_pc(), 40);
    }

    #[test]
    fn terminate_write_stops_the_run() {
        let mut hart = Hart::<Rv64>::new(HartConfig {
            reset_pc: 0,
            to_host_addr: Some(0x1000),
            ..HartConfig::default()
        });
        let mut memory = runnable_memory();
        // lui x5, 1 (x5 = 0x1000); addi x6, x0, 1 (x6 = 1); sw x6, 0(x5)
        memory.write(0, &0x0000_12B7u32.to_le_bytes()).unwrap();
        memory.write(4, &0x0010_0313u32.to_le_bytes()).unwrap();
        memory.write(8, &0x0062_A023u32.to_le_bytes()).unwrap();
        let result = simple_run(&mut hart, &mut memory);
        assert_eq!(result, RunResult::Exited(1));
    }

    #[test]
    fn stuck_in_illegal_gives_up_after_threshold() {
        let mut hart = Hart::<Rv64>::new(HartConfig { reset_pc: 0, ..HartConfig::default() });
        let mut memory = runnable_memory();
        // all-ones is never a valid instruction encoding.
        for pc in (0..(STUCK_THRESHOLD as u64 + 8) * 4).step_by(4) {
            memory.write(pc, &0xFFFF_FFFFu32.to_le_bytes()).unwrap();
        }
        hart.poke_csr(crate::csr::num::MTVEC, 0);
        let result = simple_run(&mut hart, &mut memory);
        assert_eq!(result, RunResult::StuckInIllegal);
    }

    #[test]
    fn snapshot_run_invokes_callback_each_period() {
        let mut hart = Hart::<Rv64>::new(HartConfig { reset_pc: 0, ..HartConfig::default() });
        let mut memory = runnable_memory();
        for pc in (0..4096).step_by(4) {
            memory.write(pc, &0x0000_0013u32.to_le_bytes()).unwrap();
        }
        let mut periods = 0;
        let result = snapshot_run(
            &mut hart,
            &mut memory,
            None,
            &RunLimits { max_instructions: Some(30), ..Default::default() },
            10,
            |_, _| periods += 1,
        );
        assert_eq!(result, RunResult::LimitReached);
        assert_eq!(periods, 3);
    }
}
