//! Load and store instructions, `spec.md` §4.3 "Load/store" and §4.3's `conIo`/`toHost`
//! supplements (`SPEC_FULL.md` §4).

use crate::decode::{DecodedInst, Opcode};
use crate::registers::Specifier;
use crate::trap::Exception;
use crate::trigger::MatchMode;
use crate::xlen::Xlen;

use super::{trigger_outcome, Executor, StepOutcome};

fn sign_extend(raw: u64, bits: u32) -> u64 {
    let shift = 64 - bits;
    (((raw << shift) as i64) >> shift) as u64
}

pub(super) fn target_addr<X: Xlen>(base: u64, offset: i64) -> u64 {
    ((base as i64).wrapping_add(offset) as u64) & X::MASK
}

fn load_size(id: Opcode) -> u64 {
    match id {
        Opcode::Lb | Opcode::Lbu => 1,
        Opcode::Lh | Opcode::Lhu => 2,
        Opcode::Lw | Opcode::Lwu => 4,
        Opcode::Ld => 8,
        _ => unreachable!("load_size dispatched a non-load opcode"),
    }
}

fn store_size(id: Opcode) -> u64 {
    match id {
        Opcode::Sb => 1,
        Opcode::Sh => 2,
        Opcode::Sw => 4,
        Opcode::Sd => 8,
        _ => unreachable!("store_size dispatched a non-store opcode"),
    }
}

pub(super) fn misaligned<X: Xlen>(ex: &Executor<X>, addr: u64, size: u64) -> bool {
    if !ex.memory.same_region(addr, size) {
        return true;
    }
    size > 1 && addr % size != 0 && ex.memory.region_attributes(addr).map(|r| !r.idempotent).unwrap_or(false)
}

pub fn load<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    // A load's destination overwrites any in-flight entry the load queue holds for `rd`, and its
    // use of `rs1` as an address dependency retires any entry that register was backing.
    ex.state.load_queue.invalidate(inst.rs1());

    let base = X::to_u64(ex.state.registers.x(inst.rs1()));
    let addr = target_addr::<X>(base, inst.op2);
    let size = load_size(inst.id);

    if misaligned(ex, addr, size) {
        return StepOutcome::Exception(Exception::LoadAddrMisal, addr);
    }

    let privilege = ex.state.privilege;
    if let Some((_, action)) = ex.state.triggers.evaluate(MatchMode::LoadAddr, addr, privilege) {
        return trigger_outcome(action, addr);
    }

    if Some(addr) == ex.config.con_io_addr && size == 1 {
        let byte = ex.console.as_deref_mut().map_or(0, |c| c.read_byte());
        let value = extend(byte as u64, inst.id);
        ex.state.load_queue.remove_for_write(inst.rd());
        ex.state.registers.set_x(inst.rd(), X::to_unsigned(value));
        return StepOutcome::Continue;
    }

    let bytes = match ex.memory.read(addr, size) {
        Ok(bytes) => bytes,
        Err(_) => return StepOutcome::Exception(Exception::LoadAccFault, addr),
    };
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    let raw = u64::from_le_bytes(buf);
    let value = extend(raw, inst.id);

    let prev = X::to_u64(ex.state.registers.x(inst.rd()));
    ex.state.load_queue.remove_for_write(inst.rd());
    let is_dccm = ex.memory.page_attributes(addr).map(|p| p.dccm).unwrap_or(false);
    if !is_dccm {
        ex.state.load_queue.push(addr, size, inst.rd(), prev);
    }
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(value));
    StepOutcome::Continue
}

fn extend(raw: u64, id: Opcode) -> u64 {
    match id {
        Opcode::Lb => sign_extend(raw, 8),
        Opcode::Lh => sign_extend(raw, 16),
        Opcode::Lw => sign_extend(raw, 32),
        Opcode::Lbu => raw & 0xFF,
        Opcode::Lhu => raw & 0xFFFF,
        Opcode::Lwu => raw & 0xFFFF_FFFF,
        Opcode::Ld => raw,
        _ => unreachable!("extend dispatched a non-load opcode"),
    }
}

/// `spec.md` §4.3: decode places the base and value registers directly in `op0`/`op1` for this
/// opcode family, not the `rd`/`rs1`/`rs2` convention the other families use.
pub fn store<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = Specifier::from_u5(inst.op0 as u8);
    let rs2 = Specifier::from_u5(inst.op1 as u8);
    ex.state.load_queue.invalidate(rs1);
    ex.state.load_queue.invalidate(rs2);

    let base = X::to_u64(ex.state.registers.x(rs1));
    let addr = target_addr::<X>(base, inst.op2);
    let value = X::to_u64(ex.state.registers.x(rs2));
    let size = store_size(inst.id);

    if misaligned(ex, addr, size) {
        return StepOutcome::Exception(Exception::StoreAddrMisal, addr);
    }

    let privilege = ex.state.privilege;
    if let Some((_, action)) = ex.state.triggers.evaluate(MatchMode::StoreAddr, addr, privilege) {
        return trigger_outcome(action, addr);
    }
    if let Some((_, action)) = ex.state.triggers.evaluate(MatchMode::StoreData, value, privilege) {
        return trigger_outcome(action, addr);
    }

    ex.state.reservation.invalidate_if_overlapping(addr, size);

    if Some(addr) == ex.config.con_io_addr && size == 1 {
        if let Some(console) = ex.console.as_deref_mut() {
            console.write_byte(value as u8);
        }
        return StepOutcome::Continue;
    }

    if Some(addr) == ex.config.to_host_addr && value != 0 {
        return StepOutcome::Terminate(value);
    }

    let prev = {
        let mut buf = [0u8; 8];
        if let Ok(bytes) = ex.memory.read_raw(addr, size) {
            buf[..bytes.len()].copy_from_slice(&bytes);
        }
        u64::from_le_bytes(buf)
    };
    let bytes = value.to_le_bytes();
    let is_dccm = ex.memory.page_attributes(addr).map(|p| p.dccm).unwrap_or(false);
    match ex.memory.write(addr, &bytes[..size as usize]) {
        Ok(outcome) => {
            ex.decode_cache.invalidate_range(outcome.addr, outcome.len);
            ex.state.store_queue.push(addr, size, value, prev, is_dccm);
            StepOutcome::Continue
        }
        Err(_) => StepOutcome::Exception(Exception::StoreAccFault, addr),
    }
}
