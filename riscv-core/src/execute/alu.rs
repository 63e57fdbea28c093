//! Arithmetic/logical instructions: `lui`/`auipc`, reg-imm, reg-reg, and multiply/divide,
//! `spec.md` §4.3 "Arithmetic/logical".

use crate::decode::{DecodedInst, Opcode};
use crate::trap::Exception;
use crate::xlen::Xlen;

use super::{Executor, StepOutcome};

fn sign_extend_32(value: u32) -> u64 {
    value as i32 as i64 as u64
}

pub fn lui<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let value = inst.op1 as u64;
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(value));
    StepOutcome::Continue
}

pub fn auipc<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let value = ex.current_pc.wrapping_add(inst.op1 as u64);
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(value));
    StepOutcome::Continue
}

pub fn reg_imm_op<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = X::to_u64(ex.state.registers.x(inst.rs1()));
    let imm = inst.op2;
    let imm_u = imm as u64;

    let is_word = matches!(inst.id, Opcode::Addiw | Opcode::Slliw | Opcode::Srliw | Opcode::Sraiw);
    if is_word && X::WIDTH != 64 {
        return StepOutcome::Exception(Exception::IllegalInst, 0);
    }

    let result: u64 = match inst.id {
        Opcode::Addi => rs1.wrapping_add(imm_u) & X::MASK,
        Opcode::Slti => (((rs1 as i64) < imm) as u64),
        Opcode::Sltiu => ((rs1 < imm_u) as u64),
        Opcode::Xori => (rs1 ^ imm_u) & X::MASK,
        Opcode::Ori => (rs1 | imm_u) & X::MASK,
        Opcode::Andi => (rs1 & imm_u) & X::MASK,
        Opcode::Slli => {
            let shamt = imm as u32;
            if X::WIDTH == 32 && shamt & 0x20 != 0 {
                return StepOutcome::Exception(Exception::IllegalInst, 0);
            }
            (rs1 << (shamt & X::SHIFT_MASK)) & X::MASK
        }
        Opcode::Srli => {
            let shamt = imm as u32;
            if X::WIDTH == 32 && shamt & 0x20 != 0 {
                return StepOutcome::Exception(Exception::IllegalInst, 0);
            }
            (rs1 & X::MASK) >> (shamt & X::SHIFT_MASK)
        }
        Opcode::Srai => {
            let shamt = imm as u32;
            if X::WIDTH == 32 && shamt & 0x20 != 0 {
                return StepOutcome::Exception(Exception::IllegalInst, 0);
            }
            let signed = if X::WIDTH == 32 { (rs1 as u32) as i32 as i64 } else { rs1 as i64 };
            ((signed >> (shamt & X::SHIFT_MASK)) as u64) & X::MASK
        }
        Opcode::Addiw => sign_extend_32((rs1 as u32).wrapping_add(imm_u as u32)),
        Opcode::Slliw => {
            // TODO: spec.md Design Note (d): the original masks this shift amount to 5 bits
            // unconditionally rather than special-casing the formally-reserved bit 5; carried
            // forward unchanged.
            let shamt = (imm as u32) & 0x1F;
            sign_extend_32((rs1 as u32) << shamt)
        }
        Opcode::Srliw => {
            let shamt = (imm as u32) & 0x1F;
            sign_extend_32((rs1 as u32) >> shamt)
        }
        Opcode::Sraiw => {
            let shamt = (imm as u32) & 0x1F;
            sign_extend_32(((rs1 as u32 as i32) >> shamt) as u32)
        }
        _ => unreachable!("reg_imm_op dispatched a non-reg-imm opcode"),
    };
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(result));
    StepOutcome::Continue
}

pub fn reg_reg_op<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = X::to_u64(ex.state.registers.x(inst.rs1()));
    let rs2 = X::to_u64(ex.state.registers.x(inst.rs2()));

    let is_word = matches!(
        inst.id,
        Opcode::Addw | Opcode::Subw | Opcode::Sllw | Opcode::Srlw | Opcode::Sraw
    );
    if is_word && X::WIDTH != 64 {
        return StepOutcome::Exception(Exception::IllegalInst, 0);
    }

    let result: u64 = match inst.id {
        Opcode::Add => rs1.wrapping_add(rs2) & X::MASK,
        Opcode::Sub => rs1.wrapping_sub(rs2) & X::MASK,
        Opcode::Sll => (rs1 << (rs2 as u32 & X::SHIFT_MASK)) & X::MASK,
        Opcode::Slt => {
            let signed1 = if X::WIDTH == 32 { rs1 as u32 as i32 as i64 } else { rs1 as i64 };
            let signed2 = if X::WIDTH == 32 { rs2 as u32 as i32 as i64 } else { rs2 as i64 };
            (signed1 < signed2) as u64
        }
        Opcode::Sltu => (rs1 < rs2) as u64,
        Opcode::Xor => (rs1 ^ rs2) & X::MASK,
        Opcode::Srl => (rs1 & X::MASK) >> (rs2 as u32 & X::SHIFT_MASK),
        Opcode::Sra => {
            let signed = if X::WIDTH == 32 { (rs1 as u32) as i32 as i64 } else { rs1 as i64 };
            ((signed >> (rs2 as u32 & X::SHIFT_MASK)) as u64) & X::MASK
        }
        Opcode::Or => (rs1 | rs2) & X::MASK,
        Opcode::And => (rs1 & rs2) & X::MASK,
        Opcode::Addw => sign_extend_32((rs1 as u32).wrapping_add(rs2 as u32)),
        Opcode::Subw => sign_extend_32((rs1 as u32).wrapping_sub(rs2 as u32)),
        Opcode::Sllw => sign_extend_32((rs1 as u32) << (rs2 as u32 & 0x1F)),
        Opcode::Srlw => sign_extend_32((rs1 as u32) >> (rs2 as u32 & 0x1F)),
        Opcode::Sraw => sign_extend_32(((rs1 as u32 as i32) >> (rs2 as u32 & 0x1F)) as u32),
        _ => unreachable!("reg_reg_op dispatched a non-reg-reg opcode"),
    };
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(result));
    StepOutcome::Continue
}

pub fn mul_div_op<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = X::to_u64(ex.state.registers.x(inst.rs1()));
    let rs2 = X::to_u64(ex.state.registers.x(inst.rs2()));

    let is_word = matches!(
        inst.id,
        Opcode::Mulw | Opcode::Divw | Opcode::Divuw | Opcode::Remw | Opcode::Remuw
    );
    if is_word && X::WIDTH != 64 {
        return StepOutcome::Exception(Exception::IllegalInst, 0);
    }

    let result: u64 = match inst.id {
        Opcode::Mul => rs1.wrapping_mul(rs2) & X::MASK,
        Opcode::Mulh => {
            let a = signed_widen::<X>(rs1);
            let b = signed_widen::<X>(rs2);
            let wide = a.wrapping_mul(b);
            ((wide >> X::WIDTH) as u64) & X::MASK
        }
        Opcode::Mulhsu => {
            let a = signed_widen::<X>(rs1);
            let b = (rs2 & X::MASK) as i128;
            let wide = a.wrapping_mul(b);
            ((wide >> X::WIDTH) as u64) & X::MASK
        }
        Opcode::Mulhu => {
            let a = (rs1 & X::MASK) as u128;
            let b = (rs2 & X::MASK) as u128;
            let wide = a.wrapping_mul(b);
            ((wide >> X::WIDTH) as u64) & X::MASK
        }
        Opcode::Div => {
            let a = signed_of_width::<X>(rs1);
            let b = signed_of_width::<X>(rs2);
            if b == 0 {
                u64::MAX & X::MASK
            } else if a == i64::MIN >> (64 - X::WIDTH) && b == -1 {
                rs1 & X::MASK
            } else {
                (a.wrapping_div(b) as u64) & X::MASK
            }
        }
        Opcode::Divu => {
            if rs2 == 0 {
                u64::MAX & X::MASK
            } else {
                (rs1 & X::MASK) / (rs2 & X::MASK)
            }
        }
        Opcode::Rem => {
            let a = signed_of_width::<X>(rs1);
            let b = signed_of_width::<X>(rs2);
            if b == 0 {
                rs1 & X::MASK
            } else if a == i64::MIN >> (64 - X::WIDTH) && b == -1 {
                0
            } else {
                (a.wrapping_rem(b) as u64) & X::MASK
            }
        }
        Opcode::Remu => {
            if rs2 == 0 {
                rs1 & X::MASK
            } else {
                (rs1 & X::MASK) % (rs2 & X::MASK)
            }
        }
        Opcode::Mulw => sign_extend_32((rs1 as u32).wrapping_mul(rs2 as u32)),
        Opcode::Divw => {
            let a = rs1 as u32 as i32;
            let b = rs2 as u32 as i32;
            if b == 0 {
                u64::MAX
            } else if a == i32::MIN && b == -1 {
                sign_extend_32(rs1 as u32)
            } else {
                sign_extend_32(a.wrapping_div(b) as u32)
            }
        }
        Opcode::Divuw => {
            let a = rs1 as u32;
            let b = rs2 as u32;
            if b == 0 { u64::MAX } else { sign_extend_32(a / b) }
        }
        Opcode::Remw => {
            let a = rs1 as u32 as i32;
            let b = rs2 as u32 as i32;
            if b == 0 {
                sign_extend_32(rs1 as u32)
            } else if a == i32::MIN && b == -1 {
                0
            } else {
                sign_extend_32(a.wrapping_rem(b) as u32)
            }
        }
        Opcode::Remuw => {
            let word1 = rs1 as u32;
            let word2 = rs2 as u32;
            // TODO: spec.md Design Note (c): the original's zero-divisor shortcut compares
            // `word1` (the dividend) rather than `word2` (the divisor); carried forward
            // unchanged. The `word2 == 0` arm below exists only to avoid an actual division by
            // zero in Rust where the original's mistaken branch would have fallen through to
            // undefined hardware-dependent behavior.
            if word1 == 0 {
                sign_extend_32(word1)
            } else if word2 == 0 {
                sign_extend_32(word1)
            } else {
                sign_extend_32(word1 % word2)
            }
        }
        _ => unreachable!("mul_div_op dispatched an unrelated opcode"),
    };
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(result));
    StepOutcome::Continue
}

fn signed_of_width<X: Xlen>(value: u64) -> i64 {
    if X::WIDTH == 32 {
        (value as u32) as i32 as i64
    } else {
        value as i64
    }
}

fn signed_widen<X: Xlen>(value: u64) -> i128 {
    signed_of_width::<X>(value) as i128
}
