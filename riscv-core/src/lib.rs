//! A single RISC-V hart: fetch/decode/execute, architectural state, the trap/interrupt pipeline,
//! and the speculative load/store queues backing imprecise-fault rollback, `spec.md` §1/§2.
//!
//! Grounded on the teacher's `red-planet-core` crate root: a flat `pub mod` per subsystem plus a
//! handful of convenience re-exports, rather than the teacher's `board`/`bus`/`system_bus`/
//! `simulator` device-graph layer, which `SPEC_FULL.md` §3 replaces with a single flat [`Memory`]
//! the caller owns directly (see `DESIGN.md` for the substitution).

pub mod csr;
pub mod decode;
pub mod execute;
pub mod fp;
pub mod hart;
pub mod memory;
pub mod privilege;
pub mod queues;
pub mod registers;
pub mod reservation;
pub mod run;
pub mod snapshot;
pub mod trap;
pub mod trigger;
pub mod xlen;

pub use execute::StepOutcome;
pub use hart::{ConsoleIo, Hart, HartConfig, HartState};
pub use memory::{Memory, MemoryAccessError, MemoryConfigError, PageAttributes, RegionAttributes};
pub use privilege::PrivilegeLevel;
pub use run::{run_until, run_until_address, ChangeRecord, RunLimits, RunResult};
pub use snapshot::{HartSnapshot, MemorySnapshot, Snapshot};
pub use trap::{Exception, Interrupt};
pub use xlen::{Rv32, Rv64, Xlen};
