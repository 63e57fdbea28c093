//! `csrrw`/`csrrs`/`csrrc{i}`, `spec.md` §4.3 "CSR" and §7's minstret/mcycle inhibition rule.

use crate::csr::num;
use crate::decode::{DecodedInst, Opcode};
use crate::hart::{read_csr, write_csr};
use crate::registers::Specifier;
use crate::xlen::Xlen;

use super::{Executor, StepOutcome};

/// `spec.md` §4.3: "compute `prev` by reading the CSR (trap ILLEGAL_INST on read-fail); compute
/// `next` by the op; if the op would write and the source mask is nonzero, write `next`; then
/// `x[rd] = prev`."
///
/// `Hart::step` unconditionally increments `mcycle` after dispatch and increments `retired` on a
/// `Continue` outcome (this instruction's outcome is always `Continue` when it doesn't trap); a
/// write that lands on the tied `mcycle`/`minstret` pair decrements here to compensate, so the net
/// effect is the value the instruction actually wrote, `spec.md` §7.
pub fn csr_op<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let number = inst.op2 as u16;

    if ex.state.csr.is_debug_only(number) && !ex.state.debug_mode {
        return ex.illegal();
    }

    // Privileged ISA: CSR bits [9:8] give the minimum privilege required to access it.
    let required = ((number >> 8) & 0b11) as u8;
    if ex.state.privilege.bits() < required {
        return ex.illegal();
    }

    let prev = match read_csr::<X>(ex.state, ex.config, number) {
        Ok(value) => value,
        Err(_) => return ex.illegal(),
    };

    let is_immediate = matches!(inst.id, Opcode::CsrRwi | Opcode::CsrRsi | Opcode::CsrRci);
    let source = if is_immediate {
        inst.op1 as u64 & 0x1F
    } else {
        X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op1 as u8)))
    };

    let always_writes = matches!(inst.id, Opcode::CsrRw | Opcode::CsrRwi);
    if always_writes || source != 0 {
        // CSR bits [11:10] of `0b11` mark a read-only CSR; a write there is illegal regardless of
        // whether the computed value would differ from `prev`.
        if (number >> 10) & 0b11 == 0b11 {
            return ex.illegal();
        }
        let next = match inst.id {
            Opcode::CsrRw | Opcode::CsrRwi => source,
            Opcode::CsrRs | Opcode::CsrRsi => prev | source,
            Opcode::CsrRc | Opcode::CsrRci => prev & !source,
            _ => unreachable!("csr_op dispatched a non-CSR opcode"),
        };
        if write_csr::<X>(ex.state, number, next).is_err() {
            return ex.illegal();
        }
        match number {
            num::MCYCLE => ex.state.mcycle = ex.state.mcycle.wrapping_sub(1),
            num::MINSTRET => ex.state.retired = ex.state.retired.wrapping_sub(1),
            _ => {}
        }
    }

    ex.state.registers.set_x(inst.rd(), X::to_unsigned(prev));
    StepOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn encode_csrrw(rd: u8, rs1: u8, csr: u16) -> u32 {
        ((csr as u32) << 20) | ((rs1 as u32) << 15) | (0b001 << 12) | ((rd as u32) << 7) | 0x73
    }

    fn encode_csrrci(rd: u8, uimm: u8, csr: u16) -> u32 {
        ((csr as u32) << 20) | ((uimm as u32 & 0x1F) << 15) | (0b111 << 12) | ((rd as u32) << 7) | 0x73
    }

    #[test]
    fn csrrw_swaps_value_and_reads_prior() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &encode_csrrw(6, 5, num::MSCRATCH).to_le_bytes()).unwrap();
        hart.poke_csr(num::MSCRATCH, 0x11);
        hart.poke_int_reg(5, 0x22);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_int_reg(6), 0x11);
        assert_eq!(hart.peek_csr(num::MSCRATCH).0, 0x22);
    }

    #[test]
    fn csrrci_with_zero_immediate_does_not_write() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &encode_csrrci(7, 0, num::MSCRATCH).to_le_bytes()).unwrap();
        hart.poke_csr(num::MSCRATCH, 0x55);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_int_reg(7), 0x55);
        assert_eq!(hart.peek_csr(num::MSCRATCH).0, 0x55);
    }

    #[test]
    fn csrrw_on_minstret_is_not_clobbered_by_auto_increment() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        memory.write(0, &encode_csrrw(0, 5, num::MINSTRET).to_le_bytes()).unwrap();
        hart.poke_int_reg(5, 100);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_csr(num::MINSTRET).0, 100);
    }
}
