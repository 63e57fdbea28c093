//! Control-transfer instructions: `jal`/`jalr` and the six conditional branches,
//! `spec.md` §4.3 "Control transfer".

use crate::decode::{DecodedInst, Opcode};
use crate::registers::Specifier;
use crate::trap::Exception;
use crate::xlen::Xlen;

use super::{Executor, StepOutcome};

fn signed_of_width<X: Xlen>(value: u64) -> i64 {
    if X::WIDTH == 32 {
        (value as u32) as i32 as i64
    } else {
        value as i64
    }
}

pub fn jal<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    // `rd`'s link value is the sequential next instruction, which `Hart::step` has already
    // written to `registers.pc()` ahead of dispatch.
    let link = X::to_u64(ex.state.registers.pc());
    let target = ((ex.current_pc as i64).wrapping_add(inst.op1) as u64) & X::MASK;
    if target % 2 != 0 {
        return StepOutcome::Exception(Exception::InstAddrMisal, target);
    }
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(link));
    ex.state.registers.set_pc(X::to_unsigned(target));
    StepOutcome::Continue
}

pub fn jalr<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = X::to_u64(ex.state.registers.x(inst.rs1()));
    let link = X::to_u64(ex.state.registers.pc());
    let target = ((rs1 as i64).wrapping_add(inst.op2) as u64 & !1) & X::MASK;
    if target % 2 != 0 {
        return StepOutcome::Exception(Exception::InstAddrMisal, target);
    }
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(link));
    ex.state.registers.set_pc(X::to_unsigned(target));
    StepOutcome::Continue
}

/// `Beq`/`Bne`/`Blt`/`Bge`/`Bltu`/`Bgeu`. Decode places the compared registers directly in
/// `op0`/`op1` for this opcode family (not the `rd`/`rs1`/`rs2` convention the other families
/// use), so they're read straight from the operand fields here.
pub fn conditional<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op0 as u8)));
    let rs2 = X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op1 as u8)));

    let taken = match inst.id {
        Opcode::Beq => rs1 == rs2,
        Opcode::Bne => rs1 != rs2,
        Opcode::Blt => signed_of_width::<X>(rs1) < signed_of_width::<X>(rs2),
        Opcode::Bge => signed_of_width::<X>(rs1) >= signed_of_width::<X>(rs2),
        Opcode::Bltu => rs1 < rs2,
        Opcode::Bgeu => rs1 >= rs2,
        _ => unreachable!("conditional dispatched a non-branch opcode"),
    };

    if taken {
        let target = ((ex.current_pc as i64).wrapping_add(inst.op2) as u64) & X::MASK;
        if target % 2 != 0 {
            return StepOutcome::Exception(Exception::InstAddrMisal, target);
        }
        ex.state.registers.set_pc(X::to_unsigned(target));
    }
    StepOutcome::Continue
}
