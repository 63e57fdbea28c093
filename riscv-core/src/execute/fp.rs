//! Single/double-precision arithmetic, conversions, and the `flw`/`fld`/`fsw`/`fsd` pair,
//! `spec.md` §4.3 "FP". The teacher has no F/D extension; the host-FPU exception-flag lifting and
//! NaN-boxing/canonicalization conventions below are grounded instead on `willmccallion-rvsim`'s
//! FPU module (`examples/willmccallion-rvsim/crates/hardware/src/core/units/fpu/`), the one repo
//! in the pack that implements this extension.

use crate::decode::{DecodedInst, Opcode};
use crate::fp::{AccruedFlags, FpClass, FpSpecifier, RoundingMode};
use crate::registers::Specifier;
use crate::trap::Exception;
use crate::trigger::MatchMode;
use crate::xlen::Xlen;

use super::loadstore::{misaligned, target_addr};
use super::{trigger_outcome, Executor, StepOutcome};

/// Lifts host-FPU sticky exception flags for arithmetic ops via libc's `<fenv.h>`, the same
/// technique `willmccallion-rvsim`'s `fpu::mod` uses: the host FPU already performs IEEE-754
/// arithmetic matching what's needed here, so its flags are cleared, the op run, and the flags
/// read back rather than re-derived by hand.
mod host_flags {
    use crate::fp::AccruedFlags;

    const FE_INVALID: i32 = 0x01;
    const FE_DIVBYZERO: i32 = 0x04;
    const FE_OVERFLOW: i32 = 0x08;
    const FE_UNDERFLOW: i32 = 0x10;
    const FE_INEXACT: i32 = 0x20;
    const FE_ALL_EXCEPT: i32 = FE_INVALID | FE_DIVBYZERO | FE_OVERFLOW | FE_UNDERFLOW | FE_INEXACT;

    unsafe extern "C" {
        fn feclearexcept(excepts: i32) -> i32;
        fn fetestexcept(excepts: i32) -> i32;
    }

    /// Runs `op` with the host's sticky FP exception flags cleared first, returning its result
    /// alongside whatever flags the host FPU raised while computing it.
    pub fn observe<T>(op: impl FnOnce() -> T) -> (T, AccruedFlags) {
        // SAFETY: `feclearexcept`/`fetestexcept` only touch the calling thread's FP environment
        // word; no pointers cross the FFI boundary.
        unsafe { feclearexcept(FE_ALL_EXCEPT) };
        let result = op();
        let raised = unsafe { fetestexcept(FE_ALL_EXCEPT) };
        let flags = AccruedFlags {
            inexact: raised & FE_INEXACT != 0,
            underflow: raised & FE_UNDERFLOW != 0,
            overflow: raised & FE_OVERFLOW != 0,
            divide_by_zero: raised & FE_DIVBYZERO != 0,
            invalid: raised & FE_INVALID != 0,
        };
        (result, flags)
    }
}

const CANON_NAN_F32: u32 = 0x7fc0_0000;
const CANON_NAN_F64: u64 = 0x7ff8_0000_0000_0000;

fn canon_f32(v: f32) -> f32 {
    if v.is_nan() {
        f32::from_bits(CANON_NAN_F32)
    } else {
        v
    }
}

fn canon_f64(v: f64) -> f64 {
    if v.is_nan() {
        f64::from_bits(CANON_NAN_F64)
    } else {
        v
    }
}

fn is_signaling_f32(v: f32) -> bool {
    matches!(FpClass::classify_f32(v), FpClass::SignalingNan)
}

fn is_signaling_f64(v: f64) -> bool {
    matches!(FpClass::classify_f64(v), FpClass::SignalingNan)
}

/// IEEE 754-2008 `minNum`/`maxNum`, `spec.md` §4.3 "`fmin`/`fmax` propagate canonical NaN when
/// both operands are NaN, else return the non-NaN operand; a signaling NaN operand sets NV even
/// though the result itself is unaffected."
fn fminmax_f32(a: f32, b: f32, want_max: bool) -> (f32, bool) {
    let invalid = is_signaling_f32(a) || is_signaling_f32(b);
    let result = match (a.is_nan(), b.is_nan()) {
        (true, true) => f32::from_bits(CANON_NAN_F32),
        (true, false) => b,
        (false, true) => a,
        (false, false) => {
            // -0.0 and +0.0 compare equal under `<`/`>`; break the tie per IEEE 754-2008.
            if a == 0.0 && b == 0.0 {
                let a_neg = a.is_sign_negative();
                if a_neg == want_max { b } else { a }
            } else if want_max {
                a.max(b)
            } else {
                a.min(b)
            }
        }
    };
    (result, invalid)
}

fn fminmax_f64(a: f64, b: f64, want_max: bool) -> (f64, bool) {
    let invalid = is_signaling_f64(a) || is_signaling_f64(b);
    let result = match (a.is_nan(), b.is_nan()) {
        (true, true) => f64::from_bits(CANON_NAN_F64),
        (true, false) => b,
        (false, true) => a,
        (false, false) => {
            if a == 0.0 && b == 0.0 {
                let a_neg = a.is_sign_negative();
                if a_neg == want_max { b } else { a }
            } else if want_max {
                a.max(b)
            } else {
                a.min(b)
            }
        }
    };
    (result, invalid)
}

/// Applies a resolved static rounding mode to produce an integral `f64`, `spec.md` §4.3's
/// `fcvt.*` family. `rm` is never `Dynamic`/`Invalid1`/`Invalid2` here: callers resolve and reject
/// those before reaching this point.
fn round_to_integral(value: f64, rm: RoundingMode) -> f64 {
    match rm {
        RoundingMode::RoundNearestEven => value.round_ties_even(),
        RoundingMode::RoundTowardZero => value.trunc(),
        RoundingMode::RoundDown => value.floor(),
        RoundingMode::RoundUp => value.ceil(),
        RoundingMode::RoundNearestMaxMagnitude => {
            if value.is_sign_negative() {
                -((-value + 0.5).floor())
            } else {
                (value + 0.5).floor()
            }
        }
        RoundingMode::Dynamic | RoundingMode::Invalid1 | RoundingMode::Invalid2 => {
            unreachable!("rounding mode must be resolved and validated before use")
        }
    }
}

/// Exact (not rounded) boundaries of each target integer range, chosen so they are themselves
/// exactly representable as `f64` (unlike e.g. `i64::MAX`, whose exact value isn't): the check is
/// always "is `rounded` within `[min, bound)`", a strict upper bound one past the true maximum.
mod bounds {
    pub const I32_MIN: f64 = -2147483648.0;
    pub const I32_MAX_BOUND: f64 = 2147483648.0;
    pub const U32_MAX_BOUND: f64 = 4294967296.0;
    pub const I64_MIN: f64 = -9223372036854775808.0;
    pub const I64_MAX_BOUND: f64 = 9223372036854775808.0;
    pub const U64_MAX_BOUND: f64 = 18446744073709551616.0;
}

/// `fcvt.{w,wu,l,lu}.{s,d}`: float to integer, per `spec.md` §4.3. NaN or an out-of-range value
/// sets NV and saturates to the relevant boundary (RISC-V software-visible convention); a NaN
/// saturates to the widest positive representable value.
fn float_to_int(value: f64, rm: RoundingMode, width64: bool, signed: bool) -> (u64, bool, bool) {
    if value.is_nan() {
        let bits = match (signed, width64) {
            (true, false) => i32::MAX as u64,
            (true, true) => i64::MAX as u64,
            (false, false) => u32::MAX as u64,
            (false, true) => u64::MAX,
        };
        return (bits, true, false);
    }

    let rounded = round_to_integral(value, rm);
    let (min, max_bound) = match (signed, width64) {
        (true, false) => (bounds::I32_MIN, bounds::I32_MAX_BOUND),
        (true, true) => (bounds::I64_MIN, bounds::I64_MAX_BOUND),
        (false, false) => (0.0, bounds::U32_MAX_BOUND),
        (false, true) => (0.0, bounds::U64_MAX_BOUND),
    };

    if rounded < min {
        let bits = if signed { if width64 { i64::MIN as u64 } else { i32::MIN as u64 } } else { 0 };
        return (bits, true, false);
    }
    if rounded >= max_bound {
        let bits = match (signed, width64) {
            (true, false) => i32::MAX as u64,
            (true, true) => i64::MAX as u64,
            (false, false) => u32::MAX as u64,
            (false, true) => u64::MAX,
        };
        return (bits, true, false);
    }

    let inexact = rounded != value;
    let bits = match (signed, width64) {
        (true, false) => (rounded as i32) as i64 as u64,
        (true, true) => rounded as i64 as u64,
        (false, false) => (rounded as u32) as u64,
        (false, true) => rounded as u64,
    };
    (bits, false, inexact)
}

/// `fcvt.{s,d}.{w,wu,l,lu}`: integer to float. Conversions within a type's exactly-representable
/// range (always true for 32-bit sources into either format, and for 64-bit sources into `f64`)
/// are exact under any rounding mode; only a 64-bit source narrowed to `f32` can actually lose
/// bits, and that narrowing uses the host's own (round-to-nearest-even) `as` cast rather than
/// honoring `rm`, matching the approximation `willmccallion-rvsim`'s FPU documents for the same
/// gap.
fn int_to_f32(raw: u64, width64: bool, signed: bool) -> f32 {
    if width64 {
        if signed { raw as i64 as f32 } else { raw as f32 }
    } else if signed {
        (raw as u32) as i32 as f32
    } else {
        (raw as u32) as f32
    }
}

fn int_to_f64(raw: u64, width64: bool, signed: bool) -> f64 {
    if width64 {
        if signed { raw as i64 as f64 } else { raw as f64 }
    } else if signed {
        (raw as u32) as i32 as f64
    } else {
        (raw as u32) as f64
    }
}

fn sign_extend_32(raw: u64) -> u64 {
    (raw as u32) as i32 as i64 as u64
}

/// `spec.md` §4.3: resolves `inst.rounding_mode` against `FCSR.frm`, trapping `ILLEGAL_INST` for
/// either of the two reserved static encodings (whether named directly or reached indirectly
/// through a `Dynamic` instruction whose `FCSR.frm` itself holds a reserved encoding).
fn resolve_rm<X: Xlen>(ex: &Executor<X>, inst: &DecodedInst) -> Result<RoundingMode, StepOutcome> {
    match ex.state.fcsr.resolve(inst.rounding_mode) {
        RoundingMode::Invalid1 | RoundingMode::Invalid2 => Err(ex.illegal()),
        resolved => Ok(resolved),
    }
}

pub fn fp_load<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let base = X::to_u64(ex.state.registers.x(inst.rs1()));
    let addr = target_addr::<X>(base, inst.op2);
    let size = if inst.id == Opcode::Flw { 4 } else { 8 };

    if misaligned(ex, addr, size) {
        return StepOutcome::Exception(Exception::LoadAddrMisal, addr);
    }
    let privilege = ex.state.privilege;
    if let Some((_, action)) = ex.state.triggers.evaluate(MatchMode::LoadAddr, addr, privilege) {
        return trigger_outcome(action, addr);
    }

    let bytes = match ex.memory.read(addr, size) {
        Ok(bytes) => bytes,
        Err(_) => return StepOutcome::Exception(Exception::LoadAccFault, addr),
    };
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    let raw = u64::from_le_bytes(buf);

    let rd = FpSpecifier::from_u5(inst.op0 as u8);
    if size == 4 {
        ex.state.fp.set_f32_bits(rd, raw as u32);
    } else {
        ex.state.fp.set_f64(rd, raw);
    }
    StepOutcome::Continue
}

/// `spec.md` §4.3: decode places the base register and the FP value register directly in
/// `op0`/`op1` for this opcode family, the same non-`rd`/`rs1`/`rs2` convention integer stores use.
pub fn fp_store<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let rs1 = Specifier::from_u5(inst.op0 as u8);
    let rs2 = FpSpecifier::from_u5(inst.op1 as u8);

    let base = X::to_u64(ex.state.registers.x(rs1));
    let addr = target_addr::<X>(base, inst.op2);
    let size = if inst.id == Opcode::Fsw { 4 } else { 8 };
    let value = if size == 4 { ex.state.fp.f32_bits(rs2) as u64 } else { ex.state.fp.f64(rs2) };

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

pub fn single<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    use Opcode::*;
    match inst.id {
        FaddS | FsubS | FmulS | FdivS | FsqrtS => arith_f32(ex, inst),
        FsgnjS | FsgnjnS | FsgnjxS => sgnj_f32(ex, inst),
        FminS | FmaxS => minmax_f32(ex, inst),
        FcvtWS | FcvtWuS | FcvtLS | FcvtLuS => cvt_f32_to_int(ex, inst),
        FcvtSW | FcvtSWu | FcvtSL | FcvtSLu => cvt_int_to_f32(ex, inst),
        FmvXW => fmv_x_w(ex, inst),
        FmvWX => fmv_w_x(ex, inst),
        FeqS | FltS | FleS => compare_f32(ex, inst),
        FclassS => fclass_f32(ex, inst),
        _ => unreachable!("single dispatched a non-F opcode"),
    }
}

pub fn double<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    use Opcode::*;
    match inst.id {
        FaddD | FsubD | FmulD | FdivD | FsqrtD => arith_f64(ex, inst),
        FsgnjD | FsgnjnD | FsgnjxD => sgnj_f64(ex, inst),
        FminD | FmaxD => minmax_f64(ex, inst),
        FcvtWD | FcvtWuD | FcvtLD | FcvtLuD => cvt_f64_to_int(ex, inst),
        FcvtDW | FcvtDWu | FcvtDL | FcvtDLu => cvt_int_to_f64(ex, inst),
        FcvtSD => cvt_d_to_s(ex, inst),
        FcvtDS => cvt_s_to_d(ex, inst),
        FmvXD => fmv_x_d(ex, inst),
        FmvDX => fmv_d_x(ex, inst),
        FeqD | FltD | FleD => compare_f64(ex, inst),
        FclassD => fclass_f64(ex, inst),
        _ => unreachable!("double dispatched a non-D opcode"),
    }
}

fn arith_f32<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    // Resolved only to trap a reserved encoding; the host FPU below always rounds to nearest.
    if let Err(outcome) = resolve_rm(ex, inst) {
        return outcome;
    }
    let rd = FpSpecifier::from_u5(inst.op0 as u8);
    let a = ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8));
    let a = f32::from_bits(a);

    let (result, flags) = if inst.id == Opcode::FsqrtS {
        host_flags::observe(|| a.sqrt())
    } else {
        let b = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op2 as u8)));
        match inst.id {
            Opcode::FaddS => host_flags::observe(|| a + b),
            Opcode::FsubS => host_flags::observe(|| a - b),
            Opcode::FmulS => host_flags::observe(|| a * b),
            Opcode::FdivS => host_flags::observe(|| a / b),
            _ => unreachable!(),
        }
    };
    ex.state.fcsr.set_flags(flags);
    ex.state.fp.set_f32_bits(rd, canon_f32(result).to_bits());
    StepOutcome::Continue
}

fn arith_f64<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    if let Err(outcome) = resolve_rm(ex, inst) {
        return outcome;
    }
    let rd = FpSpecifier::from_u5(inst.op0 as u8);
    let a = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8)));

    let (result, flags) = if inst.id == Opcode::FsqrtD {
        host_flags::observe(|| a.sqrt())
    } else {
        let b = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op2 as u8)));
        match inst.id {
            Opcode::FaddD => host_flags::observe(|| a + b),
            Opcode::FsubD => host_flags::observe(|| a - b),
            Opcode::FmulD => host_flags::observe(|| a * b),
            Opcode::FdivD => host_flags::observe(|| a / b),
            _ => unreachable!(),
        }
    };
    ex.state.fcsr.set_flags(flags);
    ex.state.fp.set_f64(rd, canon_f64(result).to_bits());
    StepOutcome::Continue
}

/// `spec.md` §4.3: `fsgnj{,n,x}` copy `rs1`'s magnitude with a sign bit taken (or inverted, or
/// XOR-combined) from `rs2`; never touches the accrued flags, even for NaN operands.
fn sgnj_f32<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8));
    let b = ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op2 as u8));
    let sign = match inst.id {
        Opcode::FsgnjS => b & 0x8000_0000,
        Opcode::FsgnjnS => !b & 0x8000_0000,
        Opcode::FsgnjxS => (a ^ b) & 0x8000_0000,
        _ => unreachable!(),
    };
    let result = (a & 0x7FFF_FFFF) | sign;
    ex.state.fp.set_f32_bits(FpSpecifier::from_u5(inst.op0 as u8), result);
    StepOutcome::Continue
}

fn sgnj_f64<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8));
    let b = ex.state.fp.f64(FpSpecifier::from_u5(inst.op2 as u8));
    let sign = match inst.id {
        Opcode::FsgnjD => b & 0x8000_0000_0000_0000,
        Opcode::FsgnjnD => !b & 0x8000_0000_0000_0000,
        Opcode::FsgnjxD => (a ^ b) & 0x8000_0000_0000_0000,
        _ => unreachable!(),
    };
    let result = (a & 0x7FFF_FFFF_FFFF_FFFF) | sign;
    ex.state.fp.set_f64(FpSpecifier::from_u5(inst.op0 as u8), result);
    StepOutcome::Continue
}

fn minmax_f32<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8)));
    let b = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op2 as u8)));
    let (result, invalid) = fminmax_f32(a, b, inst.id == Opcode::FmaxS);
    ex.state.fcsr.set_flags(AccruedFlags { invalid, ..Default::default() });
    ex.state.fp.set_f32_bits(FpSpecifier::from_u5(inst.op0 as u8), result.to_bits());
    StepOutcome::Continue
}

fn minmax_f64<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8)));
    let b = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op2 as u8)));
    let (result, invalid) = fminmax_f64(a, b, inst.id == Opcode::FmaxD);
    ex.state.fcsr.set_flags(AccruedFlags { invalid, ..Default::default() });
    ex.state.fp.set_f64(FpSpecifier::from_u5(inst.op0 as u8), result.to_bits());
    StepOutcome::Continue
}

fn cvt_f32_to_int<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let width64 = matches!(inst.id, Opcode::FcvtLS | Opcode::FcvtLuS);
    if width64 && X::WIDTH != 64 {
        return ex.illegal();
    }
    let rm = match resolve_rm(ex, inst) {
        Ok(rm) => rm,
        Err(outcome) => return outcome,
    };
    let signed = matches!(inst.id, Opcode::FcvtWS | Opcode::FcvtLS);
    let value = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8))) as f64;
    let (bits, invalid, inexact) = float_to_int(value, rm, width64, signed);
    ex.state.fcsr.set_flags(AccruedFlags { invalid, inexact, ..Default::default() });
    let widened = if width64 { bits } else if signed { sign_extend_32(bits) } else { bits & 0xFFFF_FFFF };
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(widened));
    StepOutcome::Continue
}

fn cvt_f64_to_int<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let width64 = matches!(inst.id, Opcode::FcvtLD | Opcode::FcvtLuD);
    if width64 && X::WIDTH != 64 {
        return ex.illegal();
    }
    let rm = match resolve_rm(ex, inst) {
        Ok(rm) => rm,
        Err(outcome) => return outcome,
    };
    let signed = matches!(inst.id, Opcode::FcvtWD | Opcode::FcvtLD);
    let value = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8)));
    let (bits, invalid, inexact) = float_to_int(value, rm, width64, signed);
    ex.state.fcsr.set_flags(AccruedFlags { invalid, inexact, ..Default::default() });
    let widened = if width64 { bits } else if signed { sign_extend_32(bits) } else { bits & 0xFFFF_FFFF };
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(widened));
    StepOutcome::Continue
}

fn cvt_int_to_f32<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let width64 = matches!(inst.id, Opcode::FcvtSL | Opcode::FcvtSLu);
    if width64 && X::WIDTH != 64 {
        return ex.illegal();
    }
    if let Err(outcome) = resolve_rm(ex, inst) {
        return outcome;
    }
    let signed = matches!(inst.id, Opcode::FcvtSW | Opcode::FcvtSL);
    let raw = X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op1 as u8)));
    let result = int_to_f32(raw, width64, signed);
    ex.state.fcsr.set_flags(AccruedFlags::default());
    ex.state.fp.set_f32_bits(FpSpecifier::from_u5(inst.op0 as u8), result.to_bits());
    StepOutcome::Continue
}

fn cvt_int_to_f64<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let width64 = matches!(inst.id, Opcode::FcvtDL | Opcode::FcvtDLu);
    if width64 && X::WIDTH != 64 {
        return ex.illegal();
    }
    if let Err(outcome) = resolve_rm(ex, inst) {
        return outcome;
    }
    let signed = matches!(inst.id, Opcode::FcvtDW | Opcode::FcvtDL);
    let raw = X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op1 as u8)));
    let result = int_to_f64(raw, width64, signed);
    ex.state.fcsr.set_flags(AccruedFlags::default());
    ex.state.fp.set_f64(FpSpecifier::from_u5(inst.op0 as u8), result.to_bits());
    StepOutcome::Continue
}

/// `fcvt.d.s`: single to double is always exact, no flags beyond NaN canonicalization.
fn cvt_s_to_d<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8)));
    let invalid = is_signaling_f32(a);
    ex.state.fcsr.set_flags(AccruedFlags { invalid, ..Default::default() });
    ex.state.fp.set_f64(FpSpecifier::from_u5(inst.op0 as u8), canon_f64(a as f64).to_bits());
    StepOutcome::Continue
}

/// `fcvt.s.d`: double to single narrows, so it honors the rounding mode and may flag NX/OF/UF.
fn cvt_d_to_s<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    if let Err(outcome) = resolve_rm(ex, inst) {
        return outcome;
    }
    let a = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8)));
    let (result, mut flags) = host_flags::observe(|| a as f32);
    flags.invalid = flags.invalid || is_signaling_f64(a);
    ex.state.fcsr.set_flags(flags);
    ex.state.fp.set_f32_bits(FpSpecifier::from_u5(inst.op0 as u8), canon_f32(result).to_bits());
    StepOutcome::Continue
}

fn fmv_x_w<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let bits = ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8));
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(sign_extend_32(bits as u64)));
    StepOutcome::Continue
}

fn fmv_w_x<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let value = X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op1 as u8))) as u32;
    ex.state.fp.set_f32_bits(FpSpecifier::from_u5(inst.op0 as u8), value);
    StepOutcome::Continue
}

fn fmv_x_d<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    if X::WIDTH != 64 {
        return ex.illegal();
    }
    let bits = ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8));
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(bits));
    StepOutcome::Continue
}

fn fmv_d_x<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    if X::WIDTH != 64 {
        return ex.illegal();
    }
    let value = X::to_u64(ex.state.registers.x(Specifier::from_u5(inst.op1 as u8)));
    ex.state.fp.set_f64(FpSpecifier::from_u5(inst.op0 as u8), value);
    StepOutcome::Continue
}

/// `spec.md` §4.3: `feq` sets NV only for a signaling-NaN operand; `flt`/`fle` set NV for any NaN
/// operand (quiet included), since an ordering comparison with a quiet NaN is itself invalid.
fn compare_f32<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8)));
    let b = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op2 as u8)));
    let (result, invalid) = match inst.id {
        Opcode::FeqS => (a == b, is_signaling_f32(a) || is_signaling_f32(b)),
        Opcode::FltS => (a < b, a.is_nan() || b.is_nan()),
        Opcode::FleS => (a <= b, a.is_nan() || b.is_nan()),
        _ => unreachable!(),
    };
    ex.state.fcsr.set_flags(AccruedFlags { invalid, ..Default::default() });
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(result as u64));
    StepOutcome::Continue
}

fn compare_f64<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let a = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8)));
    let b = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op2 as u8)));
    let (result, invalid) = match inst.id {
        Opcode::FeqD => (a == b, is_signaling_f64(a) || is_signaling_f64(b)),
        Opcode::FltD => (a < b, a.is_nan() || b.is_nan()),
        Opcode::FleD => (a <= b, a.is_nan() || b.is_nan()),
        _ => unreachable!(),
    };
    ex.state.fcsr.set_flags(AccruedFlags { invalid, ..Default::default() });
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(result as u64));
    StepOutcome::Continue
}

fn fclass_f32<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let value = f32::from_bits(ex.state.fp.f32_bits(FpSpecifier::from_u5(inst.op1 as u8)));
    let class = FpClass::classify_f32(value).bit() as u64;
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(class));
    StepOutcome::Continue
}

fn fclass_f64<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    let value = f64::from_bits(ex.state.fp.f64(FpSpecifier::from_u5(inst.op1 as u8)));
    let class = FpClass::classify_f64(value).bit() as u64;
    ex.state.registers.set_x(inst.rd(), X::to_unsigned(class));
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

    fn encode_r4_like(f7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32) -> u32 {
        (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | 0x53
    }

    #[test]
    fn fadd_s_adds_and_sets_rounding_field_unused() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        // fadd.s f2, f0, f1 (rm = 0b111 -> dynamic, FCSR.frm defaults to RNE)
        let inst = encode_r4_like(0b0000000, 1, 0, 0b111, 2);
        memory.write(0, &inst.to_le_bytes()).unwrap();
        hart.poke_fp_reg(0, (1.5f32).to_bits() as u64 | 0xFFFF_FFFF_0000_0000);
        hart.poke_fp_reg(1, (2.25f32).to_bits() as u64 | 0xFFFF_FFFF_0000_0000);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        let result = f32::from_bits(hart.peek_fp_reg(2) as u32);
        assert_eq!(result, 3.75f32);
    }

    #[test]
    fn fmin_s_propagates_non_nan_operand() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        // fmin.s f2, f0, f1
        let inst = encode_r4_like(0b0010100, 1, 0, 0b000, 2);
        memory.write(0, &inst.to_le_bytes()).unwrap();
        hart.poke_fp_reg(0, f32::NAN.to_bits() as u64 | 0xFFFF_FFFF_0000_0000);
        hart.poke_fp_reg(1, (4.0f32).to_bits() as u64 | 0xFFFF_FFFF_0000_0000);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(f32::from_bits(hart.peek_fp_reg(2) as u32), 4.0f32);
    }

    #[test]
    fn feq_s_sets_invalid_on_signaling_nan() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        // feq.s x5, f0, f1
        let inst = encode_r4_like(0b1010000, 1, 0, 0b010, 5);
        memory.write(0, &inst.to_le_bytes()).unwrap();
        let snan = f32::from_bits(0x7F80_0001); // signaling: quiet bit clear, nonzero payload
        hart.poke_fp_reg(0, snan.to_bits() as u64 | 0xFFFF_FFFF_0000_0000);
        hart.poke_fp_reg(1, (1.0f32).to_bits() as u64 | 0xFFFF_FFFF_0000_0000);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_int_reg(5), 0);
        assert!(hart.peek_csr(crate::csr::num::FFLAGS).0 & 0b10000 != 0);
    }

    #[test]
    fn fclass_s_reports_positive_infinity() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        // fclass.s x5, f0
        let inst = encode_r4_like(0b1110000, 0, 0, 0b001, 5);
        memory.write(0, &inst.to_le_bytes()).unwrap();
        hart.poke_fp_reg(0, f32::INFINITY.to_bits() as u64 | 0xFFFF_FFFF_0000_0000);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_int_reg(5), FpClass::PositiveInfinity.bit() as u64);
    }

    #[test]
    fn fcvt_w_s_saturates_on_overflow() {
        let mut hart = Hart::<Rv64>::new(HartConfig::default());
        let mut memory = runnable_memory();
        // fcvt.w.s x5, f0, rtz
        let inst = encode_r4_like(0b1100000, 0, 0, 0b001, 5);
        memory.write(0, &inst.to_le_bytes()).unwrap();
        hart.poke_fp_reg(0, (1.0e30f32).to_bits() as u64 | 0xFFFF_FFFF_0000_0000);

        let outcome = hart.step(&mut memory);
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(hart.peek_int_reg(5) as i32, i32::MAX);
        assert!(hart.peek_csr(crate::csr::num::FFLAGS).0 & 0b10000 != 0);
    }
}
