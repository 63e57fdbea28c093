//! Control and Status Register file.
//!
//! `spec.md` §3 describes the CSR file as "a mapping from CSR number to `{reset, value,
//! write_mask, poke_mask, implemented?, debug-only?, shared-across-harts?}`... [with] some CSRs
//! ... tied to external variables". [`file::CsrFile`] is exactly that generic mapping; the
//! handful of CSRs with internal multi-bit-field structure (`mstatus`, `dcsr`) get thin bitfield
//! views (`status`, `dcsr` submodules) over the raw `u64` the file stores, in the teacher's
//! `bitvec` idiom (`red-planet-core/src/core/status.rs`), rather than separate owned storage.
//! Tied CSRs (`minstret`, `mcycle`, `mhartid`) are routed at the `Hart` level, not inside
//! [`file::CsrFile`] itself, since the file has no access to the hart's other fields.

pub mod dcsr;
pub mod file;
pub mod num;
pub mod status;

pub use file::{CsrDescriptor, CsrError, CsrFile, TiedTarget};
pub use num::CsrNumber;
