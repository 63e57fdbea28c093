//! Load-reserved/store-conditional and the AMO*.{W,D} read-modify-write family,
//! `spec.md` §4.3 "A extension".

use crate::decode::{DecodedInst, Opcode};
use crate::trap::Exception;
use crate::xlen::Xlen;

use super::{Executor, StepOutcome};

fn sign_extend_32(raw: u64) -> u64 {
    (raw as u32) as i32 as i64 as u64
}

fn amo_width(id: Opcode) -> u64 {
    use Opcode::*;
    match id {
        LrW | ScW | AmoswapW | AmoaddW | AmoxorW | AmoandW | AmoorW | AmominW | AmomaxW | AmominuW
        | AmomaxuW => 4,
        LrD | ScD | AmoswapD | AmoaddD | AmoxorD | AmoandD | AmoorD | AmominD | AmomaxD | AmominuD
        | AmomaxuD => 8,
        _ => unreachable!("amo_width dispatched a non-AMO opcode"),
    }
}

pub fn load_reserved<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let size = amo_width(inst.id);
    if size == 8 && X::WIDTH != 64 {
        return StepOutcome::Exception(Exception::IllegalInst, 0);
    }
    let addr = X::to_u64(ex.state.registers.x(inst.rs1()));
    if addr % size != 0 {
        return StepOutcome::Exception(Exception::LoadAddrMisal, addr);
    }

    // `Memory::amo_lock` only needs to span the read here; the exclusive `&mut Memory` `Hart::step`
    // already holds for the whole instruction rules out a write racing in underneath it.
    let bytes = {
        let _lock = ex.memory.amo_lock();
        match ex.memory.read(addr, size) {
            Ok(bytes) => bytes,
            Err(_) => return StepOutcome::Exception(Exception::LoadAccFault, addr),
        }
    };
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    let raw = u64::from_le_bytes(buf);
    let value = if size == 4 { sign_extend_32(raw) } else { raw };

    ex.state.reservation.set(addr, size);
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(value));
    StepOutcome::Continue
}

pub fn store_conditional<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let size = amo_width(inst.id);
    if size == 8 && X::WIDTH != 64 {
        return StepOutcome::Exception(Exception::IllegalInst, 0);
    }
    let addr = X::to_u64(ex.state.registers.x(inst.rs1()));
    if addr % size != 0 {
        return StepOutcome::Exception(Exception::StoreAddrMisal, addr);
    }
    let value = X::to_u64(ex.state.registers.x(inst.rs2()));

    let succeeded = ex.state.reservation.check_and_clear(addr, size);
    let result = if succeeded {
        // The write itself is already exclusive via `&mut Memory`; `amo_lock` only matters for
        // serializing the read half against a concurrent reader (see `load_reserved`).
        let bytes = value.to_le_bytes();
        match ex.memory.write(addr, &bytes[..size as usize]) {
            Ok(outcome) => {
                ex.decode_cache.invalidate_range(outcome.addr, outcome.len);
                0
            }
            Err(_) => return StepOutcome::Exception(Exception::StoreAccFault, addr),
        }
    } else {
        1
    };

    ex.state.registers.set_x(inst.rd(), X::to_unsigned(result));
    StepOutcome::Continue
}

pub fn amo_op<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let size = amo_width(inst.id);
    if size == 8 && X::WIDTH != 64 {
        return StepOutcome::Exception(Exception::IllegalInst, 0);
    }
    let addr = X::to_u64(ex.state.registers.x(inst.rs1()));
    if addr % size != 0 {
        return StepOutcome::Exception(Exception::StoreAddrMisal, addr);
    }
    let operand = X::to_u64(ex.state.registers.x(inst.rs2()));

    let bytes = {
        let _lock = ex.memory.amo_lock();
        match ex.memory.read(addr, size) {
            Ok(bytes) => bytes,
            Err(_) => return StepOutcome::Exception(Exception::LoadAccFault, addr),
        }
    };
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    let raw = u64::from_le_bytes(buf);
    let old = if size == 4 { sign_extend_32(raw) } else { raw };

    let new = combine(inst.id, old, operand, size);
    let store_bytes = new.to_le_bytes();
    match ex.memory.write(addr, &store_bytes[..size as usize]) {
        Ok(outcome) => ex.decode_cache.invalidate_range(outcome.addr, outcome.len),
        Err(_) => return StepOutcome::Exception(Exception::StoreAccFault, addr),
    }

    ex.state.reservation.invalidate_if_overlapping(addr, size);
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(old));
    StepOutcome::Continue
}

fn combine(id: Opcode, old: u64, operand: u64, size: u64) -> u64 {
    use Opcode::*;
    let mask = if size == 4 { 0xFFFF_FFFFu64 } else { u64::MAX };
    let result = match id {
        AmoswapW | AmoswapD => operand,
        AmoaddW | AmoaddD => old.wrapping_add(operand),
        AmoxorW | AmoxorD => old ^ operand,
        AmoandW | AmoandD => old & operand,
        AmoorW | AmoorD => old | operand,
        AmominW | AmomaxW | AmominD | AmomaxD => {
            let signed_old = if size == 4 { (old as u32) as i32 as i64 } else { old as i64 };
            let signed_op = if size == 4 { (operand as u32) as i32 as i64 } else { operand as i64 };
            let take_old = match id {
                AmominW | AmominD => signed_old <= signed_op,
                _ => signed_old >= signed_op,
            };
            if take_old {
                old
            } else {
                operand
            }
        }
        AmominuW | AmomaxuW | AmominuD | AmomaxuD => {
            let u_old = old & mask;
            let u_op = operand & mask;
            let take_old = match id {
                AmominuW | AmominuD => u_old <= u_op,
                _ => u_old >= u_op,
            };
            if take_old {
                old
            } else {
                operand
            }
        }
        _ => unreachable!("combine dispatched a non-AMO opcode"),
    };
    if size == 4 {
        sign_extend_32(result)
    } else {
        result
    }
}
