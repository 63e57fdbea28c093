//! Execute dispatch: one handler per opcode family, `spec.md` §4.3.
//!
//! `dispatch` is a single `match` over `Opcode`, directly modeled on the teacher's
//! `Core::execute_instruction` match over `Instruction` (`red-planet-core/src/core/mod.rs`); each
//! arm is a thin call into the relevant submodule, mirroring the teacher's `Executor` (`core/
//! execute.rs`) bundling the pieces of state a handler needs behind one struct.

mod alu;
mod amo;
mod branch;
mod csr;
mod fp;
mod loadstore;
mod system;

use log::trace;

use crate::csr::dcsr::DebugCause;
use crate::decode::{DecodeCache, DecodedInst, Opcode};
use crate::hart::{ConsoleIo, HartConfig, HartState};
use crate::memory::Memory;
use crate::trap::Exception;
use crate::trigger::TriggerAction;
use crate::xlen::Xlen;

/// The bundle of mutable state one instruction handler needs, gathered behind a single struct the
/// way the teacher's `Executor<'a, 'c, A, B>` gathers a core/bus pair.
pub struct Executor<'a, X: Xlen> {
    pub state: &'a mut HartState<X>,
    pub memory: &'a mut Memory,
    pub decode_cache: &'a mut DecodeCache,
    pub config: &'a HartConfig,
    /// Harness-supplied console backing the `conIo` byte address (`SPEC_FULL.md` §4, supplemented
    /// from `original_source/Core.cpp`); `None` when the harness configured no `conIo` address.
    pub console: Option<&'a mut dyn ConsoleIo>,
    /// `currPc`: the address of the instruction being executed (captured before the sequential
    /// PC increment `spec.md` §4.7 performs ahead of dispatch).
    pub current_pc: u64,
}

/// What a handler asks the run loop (`hart::Hart::step`) to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Ordinary retirement; `state.registers.pc()` already holds the next address.
    Continue,
    Exception(Exception, u64),
    /// A write to the configured `toHost` address with a nonzero value, `spec.md` §4.3/§6.
    Terminate(u64),
    EnterDebugMode(DebugCause),
}

impl<'a, X: Xlen> Executor<'a, X> {
    fn illegal(&self) -> StepOutcome {
        StepOutcome::Exception(Exception::IllegalInst, 0)
    }
}

/// Turns a fired [`TriggerAction`] into the outcome a handler returns, `spec.md` §4.6.
pub(crate) fn trigger_outcome(action: TriggerAction, addr: u64) -> StepOutcome {
    match action {
        TriggerAction::Breakpoint => StepOutcome::Exception(Exception::Breakpoint, addr),
        TriggerAction::EnterDebugMode => StepOutcome::EnterDebugMode(DebugCause::Trigger),
    }
}

/// `spec.md` §4.3: "Dispatch selects the handler by `id`." One arm per [`Opcode`] variant.
pub fn dispatch<X: Xlen>(ex: &mut Executor<X>, inst: &DecodedInst) -> StepOutcome {
    use Opcode::*;
    trace!(
        "executing {:?} at {:#x} (op0={} op1={} op2={} op3={})",
        inst.id,
        ex.current_pc,
        inst.op0,
        inst.op1,
        inst.op2,
        inst.op3
    );
    match inst.id {
        Illegal => ex.illegal(),

        Lui => alu::lui(ex, inst),
        Auipc => alu::auipc(ex, inst),
        Jal => branch::jal(ex, inst),
        Jalr => branch::jalr(ex, inst),

        Beq | Bne | Blt | Bge | Bltu | Bgeu => branch::conditional(ex, inst),

        Lb | Lh | Lw | Lbu | Lhu | Lwu | Ld => loadstore::load(ex, inst),
        Sb | Sh | Sw | Sd => loadstore::store(ex, inst),

        Addi | Slti | Sltiu | Xori | Ori | Andi | Slli | Srli | Srai | Addiw | Slliw | Srliw | Sraiw => {
            alu::reg_imm_op(ex, inst)
        }
        Add | Sub | Sll | Slt | Sltu | Xor | Srl | Sra | Or | And | Addw | Subw | Sllw | Srlw | Sraw => {
            alu::reg_reg_op(ex, inst)
        }
        Mul | Mulh | Mulhsu | Mulhu | Div | Divu | Rem | Remu | Mulw | Divw | Divuw | Remw | Remuw => {
            alu::mul_div_op(ex, inst)
        }

        Fence => system::fence(ex, inst),
        FenceI => system::fence_i(ex, inst),
        Ecall => system::ecall(ex, inst),
        Ebreak => system::ebreak(ex, inst),
        Mret => system::mret(ex, inst),
        Sret => system::sret(ex, inst),
        Uret => system::uret(ex, inst),
        Wfi => system::wfi(ex, inst),
        SfenceVma => StepOutcome::Continue,

        CsrRw | CsrRs | CsrRc | CsrRwi | CsrRsi | CsrRci => csr::csr_op(ex, inst),

        LrW | LrD => amo::load_reserved(ex, inst),
        ScW | ScD => amo::store_conditional(ex, inst),
        AmoswapW | AmoaddW | AmoxorW | AmoandW | AmoorW | AmominW | AmomaxW | AmominuW | AmomaxuW
        | AmoswapD | AmoaddD | AmoxorD | AmoandD | AmoorD | AmominD | AmomaxD | AmominuD | AmomaxuD => {
            amo::amo_op(ex, inst)
        }

        Flw | Fld => fp::fp_load(ex, inst),
        Fsw | Fsd => fp::fp_store(ex, inst),

        FaddS | FsubS | FmulS | FdivS | FsqrtS | FsgnjS | FsgnjnS | FsgnjxS | FminS | FmaxS | FcvtWS
        | FcvtWuS | FcvtSW | FcvtSWu | FcvtLS | FcvtLuS | FcvtSL | FcvtSLu | FmvXW | FmvWX | FeqS
        | FltS | FleS | FclassS => fp::single(ex, inst),

        FaddD | FsubD | FmulD | FdivD | FsqrtD | FsgnjD | FsgnjnD | FsgnjxD | FminD | FmaxD | FcvtWD
        | FcvtWuD | FcvtDW | FcvtDWu | FcvtLD | FcvtLuD | FcvtDL | FcvtDLu | FcvtSD | FcvtDS | FmvXD
        | FmvDX | FeqD | FltD | FleD | FclassD => fp::double(ex, inst),
    }
}
