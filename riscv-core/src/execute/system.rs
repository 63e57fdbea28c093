//! `fence`/`fence.i`, `ecall`/`ebreak`, `{m,s,u}ret`, `wfi`, `spec.md` §4.3 "System".

use crate::csr::dcsr::{DebugCause, Dcsr};
use crate::csr::num;
use crate::csr::status::Mstatus;
use crate::decode::DecodedInst;
use crate::privilege::PrivilegeLevel;
use crate::trap::Exception;
use crate::xlen::Xlen;

use super::{Executor, StepOutcome};

/// `spec.md` §4.3: "`fence`... clears the load/store queues." No memory-ordering model exists to
/// enforce beyond that; the queues themselves are the only speculative state in flight.
pub fn fence<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    ex.state.store_queue.clear();
    ex.state.load_queue.clear();
    StepOutcome::Continue
}

/// `spec.md` §4.3: "`fence.i`... implicitly invalidates the decode cache via subsequent memory
/// writes", i.e. nothing is owed here beyond what every store handler already does.
pub fn fence_i<X: Xlen>(_ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    StepOutcome::Continue
}

/// `spec.md` §4.3: "`ecall` raises `U/S/M_ENV_CALL` by current mode." `spec.md` §7: the
/// retired-count inhibition that applies to other architectural traps is waived for `ecall`/
/// `ebreak`, which compensate by incrementing here, before the trap is delivered.
pub fn ecall<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    ex.state.retired = ex.state.retired.wrapping_add(1);
    StepOutcome::Exception(Exception::env_call_for(ex.state.privilege), 0)
}

/// `spec.md` §4.3: "`ebreak` either enters debug mode (if `DCSR.ebreakm` is set in M-mode) or
/// raises `BREAKP`", generalized to the per-privilege `ebreak{m,s,u}` bit for the current mode.
pub fn ebreak<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    let dcsr = Dcsr::from_raw(ex.state.csr.peek(num::DCSR).0);
    let enters_debug = match ex.state.privilege {
        PrivilegeLevel::Machine => dcsr.ebreakm(),
        PrivilegeLevel::Supervisor => dcsr.ebreaks(),
        PrivilegeLevel::User => dcsr.ebreaku(),
    };
    if enters_debug {
        return StepOutcome::EnterDebugMode(DebugCause::Ebreak);
    }
    ex.state.retired = ex.state.retired.wrapping_add(1);
    StepOutcome::Exception(Exception::Breakpoint, ex.current_pc)
}

/// `spec.md` §4.3: "`mret`/`sret`/`uret` restore MPP/SPP, MPIE/SPIE, clear reservation, set
/// `pc = xEPC & ~1`, switch privilege."
pub fn mret<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    if ex.state.privilege != PrivilegeLevel::Machine {
        return ex.illegal();
    }
    let mut status = Mstatus::from_raw(ex.state.csr.peek(num::MSTATUS).0);
    let target = status.mpp();
    status.set_mie(status.mpie());
    status.set_mpie(true);
    status.set_mpp(PrivilegeLevel::User);
    ex.state.csr.write_raw(num::MSTATUS, status.raw());

    ex.state.privilege = target;
    ex.state.reservation.clear();
    let epc = ex.state.csr.peek(num::MEPC).0;
    ex.state.registers.set_pc(X::to_unsigned(epc & !1));
    StepOutcome::Continue
}

pub fn sret<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    if ex.state.privilege == PrivilegeLevel::User {
        return ex.illegal();
    }
    let mut status = Mstatus::from_raw(ex.state.csr.peek(num::MSTATUS).0);
    let target = status.spp();
    status.set_sie(status.spie());
    status.set_spie(true);
    status.set_spp(PrivilegeLevel::User);
    ex.state.csr.write_raw(num::MSTATUS, status.raw());

    ex.state.privilege = target;
    ex.state.reservation.clear();
    let epc = ex.state.csr.peek(num::SEPC).0;
    ex.state.registers.set_pc(X::to_unsigned(epc & !1));
    StepOutcome::Continue
}

/// No `N`-extension user-trap CSRs (`uepc`/`ucause`) are implemented (`spec.md` §3's CSR set has
/// no `u*` trap-handling registers), so `uret` has no architectural state to restore from.
pub fn uret<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    ex.illegal()
}

/// `spec.md` §4.3: "`wfi`... `is` a no-op" beyond the halt-until-interrupt behavior `Hart::step`
/// already implements by checking `halted_in_wfi` ahead of fetch.
pub fn wfi<X: Xlen>(ex: &mut Executor<X>, _inst: &DecodedInst) -> StepOutcome {
    ex.state.halted_in_wfi = true;
    StepOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::StepOutcome;
    use crate::hart::{Hart, HartConfig};
    use crate::memory::{Memory, PageAttributes};
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

    const ECALL: u32 = 0x0000_0073;
    const EBREAK: u32 = 0x0010_0073;
    const MRET: u32 = 0x3020_0073;

    #[test]
    fn ecall_in_machine_mode_traps_to_mtvec() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &ECALL.to_le_bytes()).unwrap();
        hart.poke_csr(num::MTVEC, 0x100);
        let mut status = Mstatus::from_raw(hart.peek_csr(num::MSTATUS).0);
        status.set_mie(true);
        hart.poke_csr(num::MSTATUS, status.raw());

        let outcome = hart.step(&mut memory);
        assert!(matches!(outcome, StepOutcome::Exception(Exception::MEnvCall, _)));
        assert_eq!(hart.peek_pc(), 0x100);
        assert_eq!(hart.peek_csr(num::MCAUSE).0, 11);
        assert_eq!(hart.peek_csr(num::MEPC).0, 0);
        let after = Mstatus::from_raw(hart.peek_csr(num::MSTATUS).0);
        assert!(after.mpie());
        assert!(!after.mie());
        assert_eq!(after.mpp(), PrivilegeLevel::Machine);
    }

    #[test]
    fn ebreak_without_dcsr_bit_raises_breakpoint() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &EBREAK.to_le_bytes()).unwrap();
        hart.poke_csr(num::MTVEC, 0x200);

        let outcome = hart.step(&mut memory);
        assert!(matches!(outcome, StepOutcome::Exception(Exception::Breakpoint, 0)));
        assert_eq!(hart.peek_pc(), 0x200);
    }

    #[test]
    fn ebreak_with_dcsr_ebreakm_enters_debug_mode() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &EBREAK.to_le_bytes()).unwrap();
        hart.poke_csr(num::DCSR, 1 << 15);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::EnterDebugMode(DebugCause::Ebreak));
        assert!(hart.is_debug_mode());
    }

    #[test]
    fn mret_restores_privilege_and_pc() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &MRET.to_le_bytes()).unwrap();
        hart.poke_csr(num::MEPC, 0x8000_0004);
        let mut status = Mstatus::from_raw(0);
        status.set_mpp(PrivilegeLevel::User);
        status.set_mie(false);
        hart.poke_csr(num::MSTATUS, status.raw());

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_pc(), 0x8000_0004);
        assert_eq!(hart.state().privilege, PrivilegeLevel::User);
    }
}
