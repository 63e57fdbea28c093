//! Trap & interrupt pipeline, `spec.md` §4.4.
//!
//! `enter_trap` mirrors the teacher's `Core::trap` almost directly: `xEPC`/`xCAUSE`/`xTVAL`
//! writes, the `mstatus` `MIE→MPIE`/`MPP` update, and vectored-`tvec` base computation. Next
//! privilege is unconditionally Machine (`spec.md` §4.4 step 2 / Design Note (b): delegation to
//! S/U mode is a TODO, not a feature to implement — the original source computes `nextMode` but
//! always overwrites it back to Machine before acting on it). Fast-external-interrupt and NMI
//! have no teacher equivalent; NMI is grounded on `original_source/Core.cpp`'s
//! `initiateNmi`/`undelegatedInterrupt` pair (always-Machine, fixed `nmiPc_` target) and built in
//! the same function/module shape directly from `spec.md` §4.4.

use log::{debug, trace};

use crate::csr::file::CsrFile;
use crate::csr::num;
use crate::csr::status::Mstatus;
use crate::memory::Memory;
use crate::privilege::PrivilegeLevel;
use crate::reservation::ReservationSet;

/// Synchronous exception causes, `spec.md` §4.4 / standard RISC-V privileged cause encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstAddrMisal,
    InstAccFault,
    IllegalInst,
    Breakpoint,
    LoadAddrMisal,
    LoadAccFault,
    StoreAddrMisal,
    StoreAccFault,
    UEnvCall,
    SEnvCall,
    MEnvCall,
    InstPageFault,
    LoadPageFault,
    StorePageFault,
}

impl Exception {
    pub fn cause(self) -> u64 {
        match self {
            Exception::InstAddrMisal => 0,
            Exception::InstAccFault => 1,
            Exception::IllegalInst => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddrMisal => 4,
            Exception::LoadAccFault => 5,
            Exception::StoreAddrMisal => 6,
            Exception::StoreAccFault => 7,
            Exception::UEnvCall => 8,
            Exception::SEnvCall => 9,
            Exception::MEnvCall => 11,
            Exception::InstPageFault => 12,
            Exception::LoadPageFault => 13,
            Exception::StorePageFault => 15,
        }
    }

    pub fn env_call_for(level: PrivilegeLevel) -> Exception {
        match level {
            PrivilegeLevel::User => Exception::UEnvCall,
            PrivilegeLevel::Supervisor => Exception::SEnvCall,
            PrivilegeLevel::Machine => Exception::MEnvCall,
        }
    }
}

/// Asynchronous interrupt causes. `spec.md` §4.4 priority order: `M_EXTERNAL > M_LOCAL >
/// M_SOFTWARE > M_TIMER > M_INT_TIMER0 > M_INT_TIMER1`. The `M_LOCAL`/`M_INT_TIMER{0,1}` causes
/// are vendor-local (not in the standard `mcause` table) and occupy the local-interrupt cause
/// range, `spec.md` §4.4's "non-standard" interrupt sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    SSoftware,
    MSoftware,
    STimer,
    MTimer,
    SExternal,
    MExternal,
    MLocal,
    MIntTimer0,
    MIntTimer1,
}

impl Interrupt {
    pub fn cause(self) -> u64 {
        match self {
            Interrupt::SSoftware => 1,
            Interrupt::MSoftware => 3,
            Interrupt::STimer => 5,
            Interrupt::MTimer => 7,
            Interrupt::SExternal => 9,
            Interrupt::MExternal => 11,
            Interrupt::MLocal => 16,
            Interrupt::MIntTimer0 => 28,
            Interrupt::MIntTimer1 => 29,
        }
    }

    /// Highest to lowest priority, `spec.md` §4.4.
    const PRIORITY: [Interrupt; 6] = [
        Interrupt::MExternal,
        Interrupt::MLocal,
        Interrupt::MSoftware,
        Interrupt::MTimer,
        Interrupt::MIntTimer0,
        Interrupt::MIntTimer1,
    ];
}

/// Cause of NMI entry, `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmiCause {
    StoreException,
    LoadException,
    FastInterruptFailure,
}

/// Trap-pipeline state that is not a plain CSR: sticky NMI pending/cause, and the `MDSEAC` lock
/// bit (supplemented from `original_source/Core.cpp`: "once set... `MDSEAC` is sticky until
/// explicitly cleared", carried as state rather than folded into the raw CSR value).
#[derive(Debug, Clone, Copy, Default)]
pub struct Trap {
    nmi_pending: bool,
    nmi_cause: Option<NmiCause>,
    mdseac_locked: bool,
}

impl Trap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending_nmi(&mut self, cause: NmiCause) {
        self.nmi_pending = true;
        self.nmi_cause = Some(cause);
    }

    pub fn clear_pending_nmi(&mut self) {
        self.nmi_pending = false;
        self.nmi_cause = None;
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    pub fn nmi_cause(&self) -> Option<NmiCause> {
        self.nmi_cause
    }

    /// `spec.md` supplemented: locks `MDSEAC` after the first imprecise bus fault records its
    /// address; subsequent faults must not overwrite it until explicit housekeeping clears it.
    pub fn lock_mdseac(&mut self) -> bool {
        let was_locked = self.mdseac_locked;
        self.mdseac_locked = true;
        was_locked
    }

    pub fn unlock_mdseac(&mut self) {
        self.mdseac_locked = false;
    }

    pub fn mdseac_locked(&self) -> bool {
        self.mdseac_locked
    }
}

fn tvec_target(csr: &CsrFile, cause: u64, is_interrupt: bool) -> u64 {
    let tvec = csr.read(num::MTVEC).unwrap_or(0);
    let base = tvec & !0b11;
    let mode = tvec & 0b11;
    if is_interrupt && mode == 1 {
        base.wrapping_add(4 * cause)
    } else {
        base
    }
}

/// `initiateException`/asynchronous-interrupt delivery, `spec.md` §4.4 steps 1-5. `cause` already
/// encodes the interrupt-bit convention expected by the caller (set for interrupts). Returns the
/// new `pc`.
#[allow(clippy::too_many_arguments)]
pub fn enter_trap<X: crate::xlen::Xlen>(
    csr: &mut CsrFile,
    privilege: &mut PrivilegeLevel,
    reservation: &mut ReservationSet,
    cause: u64,
    is_interrupt: bool,
    pc_to_save: u64,
    tval: u64,
) -> u64 {
    reservation.clear();
    let orig_mode = *privilege;
    // TODO: spec.md §4.4 step 2 / Design Note (b): delegation to S/U mode is a TODO in the
    // original source too — `nextMode` is computed there but always overwritten back to Machine.
    // Carried forward unchanged: next privilege is unconditionally Machine, `medeleg`/`mideleg`
    // are not consulted.
    let target = PrivilegeLevel::Machine;
    *privilege = target;

    csr.write_raw(num::MEPC, (pc_to_save & !1) & X::MASK);
    csr.write_raw(num::MCAUSE, cause);
    csr.write_raw(num::MTVAL, tval);

    let status_num = num::MSTATUS;
    let mut status = Mstatus::from_raw(csr.read(status_num).unwrap_or(0));
    status.set_mpie(status.mie());
    status.set_mie(false);
    status.set_mpp(orig_mode);
    csr.write_raw(status_num, status.raw());

    let new_pc = tvec_target(csr, cause_code(cause, is_interrupt), is_interrupt);
    debug!(
        "trap: cause={cause:#x} interrupt={is_interrupt} {orig_mode:?}->{target:?} epc={pc_to_save:#x} pc={new_pc:#x}"
    );
    new_pc
}

/// `spec.md` §4.4 NMI delivery: "behaves like an undelegated interrupt... but uses a fixed
/// `nmiPc`." Grounded on `original_source/Core.cpp`'s `initiateNmi`/`undelegatedInterrupt`: always
/// Machine, `MEPC`/`MCAUSE`/`MTVAL` (cleared) written, `mstatus` `MIE→MPIE`/`MPP` updated the same
/// way as [`enter_trap`], except the new `pc` is the harness-configured `nmi_pc` rather than a
/// `tvec` lookup — there is no delegation check to skip here at all (NMI was never eligible for
/// it), so this does not share `enter_trap`'s TODO. `cause` carries the interrupt-bit convention
/// since NMI is architecturally an interrupt, not a synchronous exception.
pub fn enter_nmi<X: crate::xlen::Xlen>(
    csr: &mut CsrFile,
    privilege: &mut PrivilegeLevel,
    reservation: &mut ReservationSet,
    cause: u64,
    pc_to_save: u64,
    nmi_pc: u64,
) -> u64 {
    reservation.clear();
    let orig_mode = *privilege;
    *privilege = PrivilegeLevel::Machine;

    let cause = interrupt_cause_bits::<X>(cause);
    csr.write_raw(num::MEPC, (pc_to_save & !1) & X::MASK);
    csr.write_raw(num::MCAUSE, cause);
    csr.write_raw(num::MTVAL, 0);

    let mut status = Mstatus::from_raw(csr.read(num::MSTATUS).unwrap_or(0));
    status.set_mpie(status.mie());
    status.set_mie(false);
    status.set_mpp(orig_mode);
    csr.write_raw(num::MSTATUS, status.raw());

    debug!("nmi: cause={cause:#x} {orig_mode:?}->Machine epc={pc_to_save:#x} pc={nmi_pc:#x}");
    nmi_pc
}

fn cause_code(cause: u64, is_interrupt: bool) -> u64 {
    if is_interrupt {
        cause & !(1 << 63)
    } else {
        cause
    }
}

/// `spec.md` §4.4: the interrupt-bit convention for `xCAUSE`, register-width dependent.
pub fn interrupt_cause_bits<X: crate::xlen::Xlen>(code: u64) -> u64 {
    code | (1 << (X::WIDTH - 1))
}

/// Checks for a pending, enabled interrupt in priority order. Returns `None` while `mstatus.MIE`
/// is clear or the hart is halted in debug mode.
pub fn pending_interrupt(csr: &CsrFile, debug_halted: bool) -> Option<Interrupt> {
    if debug_halted {
        return None;
    }
    let status = Mstatus::from_raw(csr.read(num::MSTATUS).unwrap_or(0));
    if !status.mie() {
        return None;
    }
    let mie = csr.read(num::MIE).unwrap_or(0);
    let mip = csr.read(num::MIP).unwrap_or(0);
    let pending = mie & mip;
    for candidate in Interrupt::PRIORITY {
        if pending & (1 << candidate.cause()) != 0 {
            trace!("interrupt pending: {candidate:?}");
            return Some(candidate);
        }
    }
    None
}

/// Fast-external-interrupt shortcut, `spec.md` §4.4: reads the handler address from `MEIHAP`,
/// requires it to sit in DCCM, loads the target PC from that address and jumps directly.
/// Failures are reported so the caller can promote to NMI.
pub fn fast_external_interrupt(csr: &CsrFile, memory: &Memory) -> Result<u64, NmiCause> {
    let handler_addr = csr.read(num::MEIHAP).unwrap_or(0) & !0b11;
    if memory.page_attributes(handler_addr).map(|p| !p.dccm).unwrap_or(true) {
        return Err(NmiCause::FastInterruptFailure);
    }
    let bytes = memory.read_raw(handler_addr, 8).map_err(|_| NmiCause::FastInterruptFailure)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::file::CsrDescriptor;
    use crate::xlen::Rv32;

    fn csr_with(pairs: &[(num::CsrNumber, u64)]) -> CsrFile {
        let mut csr = CsrFile::new();
        for &(n, reset) in pairs {
            csr.configure(n, CsrDescriptor { reset, ..Default::default() });
        }
        csr
    }

    #[test]
    fn undelegated_exception_goes_to_machine_and_sets_mpp() {
        let mut csr = csr_with(&[
            (num::MSTATUS, 0),
            (num::MEPC, 0),
            (num::MCAUSE, 0),
            (num::MTVAL, 0),
            (num::MTVEC, 0x8000_0000),
            (num::MEDELEG, 0),
        ]);
        let mut privilege = PrivilegeLevel::User;
        let mut reservation = ReservationSet::new();
        reservation.set(0x100, 4);
        let pc = enter_trap::<Rv32>(
            &mut csr,
            &mut privilege,
            &mut reservation,
            Exception::IllegalInst.cause(),
            false,
            0x1000,
            0,
        );
        assert_eq!(pc, 0x8000_0000);
        assert_eq!(privilege, PrivilegeLevel::Machine);
        assert!(!reservation.is_held());
        assert_eq!(csr.read(num::MEPC).unwrap(), 0x1000);
        let status = Mstatus::from_raw(csr.read(num::MSTATUS).unwrap());
        assert_eq!(status.mpp(), PrivilegeLevel::User);
    }

    #[test]
    fn medeleg_bit_is_ignored_and_trap_still_goes_to_machine() {
        // spec.md §4.4 step 2 / Design Note (b): delegation is a TODO, so even a `medeleg` bit
        // set for this cause must not route the trap to S-mode.
        let cause = Exception::UEnvCall.cause();
        let mut csr = csr_with(&[
            (num::MSTATUS, 0),
            (num::MEPC, 0),
            (num::MCAUSE, 0),
            (num::MTVAL, 0),
            (num::MTVEC, 0x9000_0000),
            (num::MEDELEG, 1 << cause),
        ]);
        let mut privilege = PrivilegeLevel::User;
        let mut reservation = ReservationSet::new();
        let pc = enter_trap::<Rv32>(&mut csr, &mut privilege, &mut reservation, cause, false, 0x2000, 0);
        assert_eq!(pc, 0x9000_0000);
        assert_eq!(privilege, PrivilegeLevel::Machine);
        let status = Mstatus::from_raw(csr.read(num::MSTATUS).unwrap());
        assert_eq!(status.mpp(), PrivilegeLevel::User);
        assert!(!status.mie());
    }

    #[test]
    fn vectored_interrupt_adds_cause_offset() {
        let cause = interrupt_cause_bits::<Rv32>(Interrupt::MTimer.cause());
        let mut csr = csr_with(&[
            (num::MSTATUS, 0),
            (num::MEPC, 0),
            (num::MCAUSE, 0),
            (num::MTVAL, 0),
            (num::MTVEC, 0x8000_0000 | 1),
            (num::MEDELEG, 0),
        ]);
        let mut privilege = PrivilegeLevel::Machine;
        let mut reservation = ReservationSet::new();
        let pc = enter_trap::<Rv32>(&mut csr, &mut privilege, &mut reservation, cause, true, 0x3000, 0);
        assert_eq!(pc, 0x8000_0000 + 4 * Interrupt::MTimer.cause());
    }

    #[test]
    fn pending_interrupt_respects_priority() {
        let mut csr = csr_with(&[(num::MSTATUS, 0), (num::MIE, u64::MAX), (num::MIP, u64::MAX)]);
        let mut status = Mstatus::from_raw(csr.read(num::MSTATUS).unwrap());
        status.set_mie(true);
        csr.write_raw(num::MSTATUS, status.raw());
        assert_eq!(pending_interrupt(&csr, false), Some(Interrupt::MExternal));
    }

    #[test]
    fn mdseac_lock_is_sticky() {
        let mut trap = Trap::new();
        assert!(!trap.lock_mdseac());
        assert!(trap.lock_mdseac());
        assert!(trap.mdseac_locked());
        trap.unlock_mdseac();
        assert!(!trap.mdseac_locked());
    }

    #[test]
    fn nmi_jumps_to_fixed_pc_ignoring_mtvec_and_medeleg() {
        let mut csr = csr_with(&[
            (num::MSTATUS, 0),
            (num::MEPC, 0),
            (num::MCAUSE, 0),
            (num::MTVAL, 0xDEAD),
            (num::MTVEC, 0x8000_0000),
            (num::MEDELEG, u64::MAX),
        ]);
        let mut privilege = PrivilegeLevel::Supervisor;
        let mut reservation = ReservationSet::new();
        reservation.set(0x100, 4);
        let pc = enter_nmi::<Rv32>(&mut csr, &mut privilege, &mut reservation, 0, 0x4000, 0xF000_0000);
        assert_eq!(pc, 0xF000_0000);
        assert_eq!(privilege, PrivilegeLevel::Machine);
        assert!(!reservation.is_held());
        assert_eq!(csr.read(num::MEPC).unwrap(), 0x4000);
        assert_eq!(csr.read(num::MTVAL).unwrap(), 0);
        assert_eq!(csr.read(num::MCAUSE).unwrap(), interrupt_cause_bits::<Rv32>(0));
        let status = Mstatus::from_raw(csr.read(num::MSTATUS).unwrap());
        assert_eq!(status.mpp(), PrivilegeLevel::Supervisor);
        assert!(!status.mie());
    }
}
