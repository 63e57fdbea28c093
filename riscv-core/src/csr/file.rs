//! Generic CSR storage: reset value, write mask, poke mask, and tied-alias routing.

use std::collections::HashMap;

use thiserror::Error;

use super::num::CsrNumber;

/// Identifies a CSR whose architectural value lives somewhere other than [`CsrFile`]'s own
/// storage. `spec.md` §9 Design Notes ("Tied CSRs"): the teacher holds a raw pointer from the CSR
/// slot into an owning field; here that is a routing enum checked by the caller (`Hart`) before
/// it ever reaches [`CsrFile::read`]/[`CsrFile::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TiedTarget {
    #[default]
    None,
    Minstret,
    Mcycle,
    Mhartid,
}

/// Static configuration for one CSR number, supplied by the harness (`spec.md` §6: "per-CSR
/// configuration (reset/mask/poke-mask/implemented)").
#[derive(Debug, Clone, Copy)]
pub struct CsrDescriptor {
    pub reset: u64,
    /// Mask applied to ordinary `csrrw`/`csrrs`/`csrrc` writes.
    pub write_mask: u64,
    /// Mask applied to debug-harness `pokeCsr`; independent of `write_mask` (`spec.md` §6).
    pub poke_mask: u64,
    pub implemented: bool,
    pub debug_only: bool,
    pub tied: TiedTarget,
}

impl Default for CsrDescriptor {
    fn default() -> Self {
        Self {
            reset: 0,
            write_mask: u64::MAX,
            poke_mask: u64::MAX,
            implemented: true,
            debug_only: false,
            tied: TiedTarget::None,
        }
    }
}

impl CsrDescriptor {
    pub fn read_only(reset: u64) -> Self {
        Self { reset, write_mask: 0, poke_mask: u64::MAX, ..Default::default() }
    }

    pub fn tied(tied: TiedTarget) -> Self {
        Self { tied, ..Default::default() }
    }

    pub fn masked(reset: u64, mask: u64) -> Self {
        Self { reset, write_mask: mask, poke_mask: mask, ..Default::default() }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CsrError {
    #[error("CSR {0:#05x} is not implemented")]
    NotImplemented(CsrNumber),
    #[error("CSR {0:#05x} is debug-mode-only and the hart is not in debug mode")]
    DebugOnly(CsrNumber),
}

/// A table of CSR storage slots, addressed by 12-bit CSR number.
#[derive(Debug, Clone, Default)]
pub struct CsrFile {
    descriptors: HashMap<CsrNumber, CsrDescriptor>,
    values: HashMap<CsrNumber, u64>,
}

impl CsrFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the static configuration for `num`, per harness configuration.
    pub fn configure(&mut self, num: CsrNumber, descriptor: CsrDescriptor) {
        self.values.insert(num, descriptor.reset);
        self.descriptors.insert(num, descriptor);
    }

    pub fn descriptor(&self, num: CsrNumber) -> Option<&CsrDescriptor> {
        self.descriptors.get(&num)
    }

    pub fn is_implemented(&self, num: CsrNumber) -> bool {
        self.descriptors.get(&num).map(|d| d.implemented).unwrap_or(false)
    }

    pub fn is_debug_only(&self, num: CsrNumber) -> bool {
        self.descriptors.get(&num).map(|d| d.debug_only).unwrap_or(false)
    }

    /// `spec.md` §6 `peekCsr`: current value plus the static descriptor fields, regardless of
    /// `implemented` (peeking an unimplemented CSR is diagnostic, not an error).
    pub fn peek(&self, num: CsrNumber) -> (u64, u64, u64, u64) {
        let descriptor = self.descriptors.get(&num).copied().unwrap_or_default();
        let value = self.values.get(&num).copied().unwrap_or(0);
        (value, descriptor.reset, descriptor.write_mask, descriptor.poke_mask)
    }

    /// Reads the raw value of `num`, failing if unimplemented. Does not resolve tied CSRs;
    /// callers (`Hart`) must check [`CsrDescriptor::tied`] first.
    pub fn read(&self, num: CsrNumber) -> Result<u64, CsrError> {
        if !self.is_implemented(num) {
            return Err(CsrError::NotImplemented(num));
        }
        Ok(self.values.get(&num).copied().unwrap_or(0))
    }

    /// Writes `value` through `write_mask`, failing if unimplemented.
    pub fn write(&mut self, num: CsrNumber, value: u64) -> Result<(), CsrError> {
        let descriptor = self.descriptors.get(&num).copied().ok_or(CsrError::NotImplemented(num))?;
        if !descriptor.implemented {
            return Err(CsrError::NotImplemented(num));
        }
        let slot = self.values.entry(num).or_insert(descriptor.reset);
        *slot = *slot & !descriptor.write_mask | value & descriptor.write_mask;
        Ok(())
    }

    /// `spec.md` §6 `pokeCsr`: applies `poke_mask`, not `write_mask`, and succeeds even on CSRs
    /// marked unimplemented (a debug harness can still observe/force raw storage).
    pub fn poke(&mut self, num: CsrNumber, value: u64) {
        let descriptor = self.descriptors.get(&num).copied().unwrap_or_default();
        let slot = self.values.entry(num).or_insert(descriptor.reset);
        *slot = *slot & !descriptor.poke_mask | value & descriptor.poke_mask;
    }

    /// Writes the raw value unconditionally (no mask), used internally by multi-field CSRs
    /// (`mstatus`, `dcsr`) whose bitfield view already computed the masked result.
    pub fn write_raw(&mut self, num: CsrNumber, value: u64) {
        self.values.insert(num, value);
    }

    pub fn reset(&mut self) {
        for (num, descriptor) in &self.descriptors {
            self.values.insert(*num, descriptor.reset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::num;

    #[test]
    fn write_respects_mask_poke_respects_poke_mask() {
        let mut file = CsrFile::new();
        file.configure(num::MSCRATCH, CsrDescriptor::masked(0, 0x0000_00FF));
        file.write(num::MSCRATCH, 0xFFFF_FFFF).unwrap();
        assert_eq!(file.read(num::MSCRATCH).unwrap(), 0xFF);

        file.configure(
            num::MDSEAC,
            CsrDescriptor { reset: 0, write_mask: 0, poke_mask: u64::MAX, ..Default::default() },
        );
        file.poke(num::MDSEAC, 0xDEAD_BEEF);
        assert_eq!(file.read(num::MDSEAC).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn unimplemented_csr_read_fails() {
        let file = CsrFile::new();
        assert!(matches!(file.read(num::SATP), Err(CsrError::NotImplemented(_))));
    }

    #[test]
    fn poke_then_peek_returns_masked_value() {
        let mut file = CsrFile::new();
        file.configure(num::MEPC, CsrDescriptor::masked(0, u64::MAX));
        file.poke(num::MEPC, 0x1234);
        let (value, ..) = file.peek(num::MEPC);
        assert_eq!(value, 0x1234);
    }
}
