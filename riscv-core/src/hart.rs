//! Top-level hart: ties the register files, CSR file, queues, triggers, and decode cache together
//! and drives fetch/dispatch/trap, `spec.md` §2/§4.7.
//!
//! Grounded on the teacher's `red-planet-core/src/core/mod.rs` `Core<A, B>`: a generic allocator
//! parameter, a `Config` struct, and `new`/`reset`/`step` of the same shape. `B: SystemBus<A>` is
//! dropped in favor of a `Memory` reference passed explicitly into `step`/`fetch` (`SPEC_FULL.md`
//! §3: memory is owned by the caller, `Arc<Mutex<Memory>>`-wrapped when harts share it, not routed
//! through the allocator). Unlike the teacher, which allocates one field at a time through
//! `A::Id<T>`, the whole architectural-state bundle (`HartState<X>`) is allocated as a single
//! scalar: `execute::Executor` is already built around one `&mut HartState<X>` reference, so an
//! `Id` per field would only have to be re-flattened into a bundle at every dispatch anyway.

use std::collections::HashMap;

use log::{debug, trace};
use space_time::{Allocator, SpaceTime};

use crate::csr::dcsr::{DebugCause, Dcsr};
use crate::csr::file::CsrDescriptor;
use crate::csr::num;
use crate::csr::{CsrError, CsrFile};
use crate::decode::{self, DecodeCache, DecodedInst};
use crate::execute::{self, Executor, StepOutcome};
use crate::fp::{Fcsr, FpRegisters, FpSpecifier};
use crate::memory::Memory;
use crate::privilege::PrivilegeLevel;
use crate::queues::{LoadQueue, RollbackError, RollbackOutcome, StoreQueue};
use crate::registers::{Registers, Specifier};
use crate::reservation::ReservationSet;
use crate::trap::{self, Exception, Interrupt, NmiCause, Trap};
use crate::trigger::{MatchMode, TriggerAction, TriggerUnit};
use crate::xlen::Xlen;

/// Harness-supplied backing for the `conIo` byte address, `SPEC_FULL.md` §4: "wired as a `Memory`
/// region attribute, but backed by a harness-supplied trait object rather than hardcoding terminal
/// I/O inside `riscv-core`". A test harness can supply an in-memory implementation.
pub trait ConsoleIo: Send {
    fn read_byte(&mut self) -> u8;
    fn write_byte(&mut self, byte: u8);
}

/// Harness-supplied configuration for one hart, `spec.md` §6.
#[derive(Debug, Clone)]
pub struct HartConfig {
    pub mhartid: u64,
    pub reset_pc: u64,
    /// `spec.md` §4.4: the fixed PC an NMI jumps to, independent of `mtvec`.
    pub nmi_pc: u64,
    pub decode_cache_capacity: usize,
    pub store_queue_capacity: usize,
    pub load_queue_capacity: usize,
    pub trigger_count: usize,
    /// `spec.md` §4.5: whether an imprecise bus error rolls the store/load queue back at all, or
    /// is simply treated as a fatal, unrecoverable fault.
    pub rollback_enabled: bool,
    /// A nonzero write to this address terminates the run, `spec.md` §4.3/§6.
    pub to_host_addr: Option<u64>,
    /// The byte address backing `conIo`, `SPEC_FULL.md` §4.
    pub con_io_addr: Option<u64>,
    /// Per-CSR static configuration. Any CSR number not listed defaults to
    /// [`CsrDescriptor::default`].
    pub csrs: Vec<(num::CsrNumber, CsrDescriptor)>,
}

impl Default for HartConfig {
    fn default() -> Self {
        Self {
            mhartid: 0,
            reset_pc: 0,
            nmi_pc: 0,
            decode_cache_capacity: 1024,
            store_queue_capacity: 4,
            load_queue_capacity: 4,
            trigger_count: 4,
            rollback_enabled: true,
            to_host_addr: None,
            con_io_addr: None,
            csrs: default_csr_table(),
        }
    }
}

/// A reasonable default CSR map covering Zicsr, the trap CSRs for both privilege levels, the
/// debug-trigger CSRs, and the vendor MDSEAC/MEIHAP pair, `spec.md` §3/§6.
fn default_csr_table() -> Vec<(num::CsrNumber, CsrDescriptor)> {
    vec![
        (num::FFLAGS, CsrDescriptor::masked(0, 0x1F)),
        (num::FRM, CsrDescriptor::masked(0, 0x7)),
        (num::FCSR, CsrDescriptor::masked(0, 0xFF)),
        (num::CYCLE, CsrDescriptor::read_only(0)),
        (num::TIME, CsrDescriptor::read_only(0)),
        (num::INSTRET, CsrDescriptor::read_only(0)),
        (num::CYCLEH, CsrDescriptor::read_only(0)),
        (num::TIMEH, CsrDescriptor::read_only(0)),
        (num::INSTRETH, CsrDescriptor::read_only(0)),
        (num::SSTATUS, CsrDescriptor::default()),
        (num::SIE, CsrDescriptor::default()),
        (num::STVEC, CsrDescriptor::default()),
        (num::SCOUNTEREN, CsrDescriptor::default()),
        (num::SSCRATCH, CsrDescriptor::default()),
        (num::SEPC, CsrDescriptor::default()),
        (num::SCAUSE, CsrDescriptor::default()),
        (num::STVAL, CsrDescriptor::default()),
        (num::SIP, CsrDescriptor::default()),
        (num::SATP, CsrDescriptor::default()),
        (num::MVENDORID, CsrDescriptor::read_only(0)),
        (num::MARCHID, CsrDescriptor::read_only(0)),
        (num::MIMPID, CsrDescriptor::read_only(0)),
        (num::MCONFIGPTR, CsrDescriptor::read_only(0)),
        (num::MHARTID, CsrDescriptor::read_only(0)),
        (num::MSTATUS, CsrDescriptor::default()),
        (num::MISA, CsrDescriptor::read_only(0x8000_0000_0014_112D)),
        (num::MEDELEG, CsrDescriptor::default()),
        (num::MIDELEG, CsrDescriptor::default()),
        (num::MIE, CsrDescriptor::default()),
        (num::MTVEC, CsrDescriptor::default()),
        (num::MCOUNTEREN, CsrDescriptor::default()),
        (num::MSTATUSH, CsrDescriptor::default()),
        (num::MSCRATCH, CsrDescriptor::default()),
        (num::MEPC, CsrDescriptor::default()),
        (num::MCAUSE, CsrDescriptor::default()),
        (num::MTVAL, CsrDescriptor::default()),
        (num::MIP, CsrDescriptor::default()),
        (num::MCYCLE, CsrDescriptor::default()),
        (num::MINSTRET, CsrDescriptor::default()),
        (num::MCYCLEH, CsrDescriptor::default()),
        (num::MINSTRETH, CsrDescriptor::default()),
        (num::TSELECT, CsrDescriptor::default()),
        (num::TDATA1, CsrDescriptor::default()),
        (num::TDATA2, CsrDescriptor::default()),
        (num::TDATA3, CsrDescriptor::default()),
        (num::DCSR, { let mut d = CsrDescriptor::default(); d.debug_only = true; d }),
        (num::DPC, { let mut d = CsrDescriptor::default(); d.debug_only = true; d }),
        (num::DSCRATCH0, { let mut d = CsrDescriptor::default(); d.debug_only = true; d }),
        (num::DSCRATCH1, { let mut d = CsrDescriptor::default(); d.debug_only = true; d }),
        (num::MDSEAC, CsrDescriptor::read_only(0)),
        (num::MEIHAP, CsrDescriptor::default()),
        (num::MEICIDPL, CsrDescriptor::default()),
        (num::MEICURPL, CsrDescriptor::default()),
    ]
}

/// Everything architectural about one hart, bundled into a single `Clone`-able value so it can be
/// allocated as one scalar through [`space_time::Allocator`] (see the module note above).
#[derive(Debug, Clone)]
pub struct HartState<X: Xlen> {
    pub registers: Registers<X>,
    pub fp: FpRegisters,
    pub fcsr: Fcsr,
    pub csr: CsrFile,
    pub privilege: PrivilegeLevel,
    pub reservation: ReservationSet,
    pub store_queue: StoreQueue,
    pub load_queue: LoadQueue,
    pub triggers: TriggerUnit,
    pub trap: Trap,
    pub debug_mode: bool,
    /// Backing store for the tied `mcycle`/`cycle` CSR pair, `spec.md` §3.
    pub mcycle: u64,
    /// Backing store for the tied `minstret`/`instret` CSR pair.
    pub retired: u64,
    pub halted_in_wfi: bool,
}

impl<X: Xlen> HartState<X> {
    fn new(config: &HartConfig) -> Self {
        let mut csr = CsrFile::new();
        for (number, descriptor) in &config.csrs {
            csr.configure(*number, *descriptor);
        }
        Self {
            registers: Registers::new(X::to_unsigned(config.reset_pc)),
            fp: FpRegisters::new(),
            fcsr: Fcsr::default(),
            csr,
            privilege: PrivilegeLevel::Machine,
            reservation: ReservationSet::new(),
            store_queue: StoreQueue::new(config.store_queue_capacity),
            load_queue: LoadQueue::new(config.load_queue_capacity),
            triggers: TriggerUnit::new(config.trigger_count),
            trap: Trap::new(),
            debug_mode: false,
            mcycle: 0,
            retired: 0,
            halted_in_wfi: false,
        }
    }
}

/// CSR numbers whose storage is not backed by [`CsrFile`] at all, `spec.md` §3's "tied" CSRs.
/// Kept as free functions (rather than methods on `CsrFile`) since `CsrFile` has no access to the
/// rest of `HartState`; shared between [`Hart`]'s peek/poke surface and `execute::csr`. `fflags`/
/// `frm`/`fcsr` are tied to `HartState::fcsr` rather than `CsrFile` so `execute::fp` can read/set
/// them directly without going through a CSR number at all.
pub(crate) fn read_csr<X: Xlen>(
    state: &HartState<X>,
    config: &HartConfig,
    number: num::CsrNumber,
) -> Result<u64, CsrError> {
    match number {
        num::MCYCLE | num::CYCLE => Ok(state.mcycle),
        num::MCYCLEH | num::CYCLEH => Ok(state.mcycle >> 32),
        num::MINSTRET | num::INSTRET => Ok(state.retired),
        num::MINSTRETH | num::INSTRETH => Ok(state.retired >> 32),
        num::MHARTID => Ok(config.mhartid),
        num::FFLAGS => Ok((state.fcsr.raw() & 0x1F) as u64),
        num::FRM => Ok(((state.fcsr.raw() >> 5) & 0x7) as u64),
        num::FCSR => Ok((state.fcsr.raw() & 0xFF) as u64),
        _ => state.csr.read(number),
    }
}

pub(crate) fn write_csr<X: Xlen>(
    state: &mut HartState<X>,
    number: num::CsrNumber,
    value: u64,
) -> Result<(), CsrError> {
    match number {
        num::MCYCLE => state.mcycle = value,
        num::MCYCLEH => state.mcycle = (value << 32) | (state.mcycle & 0xFFFF_FFFF),
        num::MINSTRET => state.retired = value,
        num::MINSTRETH => state.retired = (value << 32) | (state.retired & 0xFFFF_FFFF),
        num::CYCLE | num::INSTRET | num::MHARTID => {}
        num::FFLAGS => state.fcsr.write(value as u32, 0x1F),
        num::FRM => state.fcsr.set_frm(value as u8),
        num::FCSR => state.fcsr.write(value as u32, 0xFF),
        _ => state.csr.write(number, value)?,
    }
    Ok(())
}

/// One hart: architectural state plus the decode cache, generic over the allocator `HartState<X>`
/// is stored behind. Defaults to [`SpaceTime`] so an ordinary `Hart::<Rv64>::new(config)` works
/// without naming the allocator; `what_if_step`/snapshotting (see `run.rs`) require the concrete
/// `SpaceTime` allocator since snapshotting is not part of the generic `Allocator` trait.
pub struct Hart<X: Xlen, A: Allocator = SpaceTime> {
    allocator: A,
    state_id: A::Id<HartState<X>>,
    decode_cache: DecodeCache,
    config: HartConfig,
}

impl<X: Xlen, A: Allocator + Default> Hart<X, A> {
    pub fn new(config: HartConfig) -> Self {
        let mut allocator = A::default();
        let state = HartState::new(&config);
        let state_id = allocator.insert(state);
        let decode_cache = DecodeCache::new(config.decode_cache_capacity);
        Self { allocator, state_id, decode_cache, config }
    }
}

impl<X: Xlen, A: Allocator> Hart<X, A> {
    pub fn state(&self) -> &HartState<X> {
        self.allocator.get(self.state_id).expect("hart state id is always valid")
    }

    pub fn state_mut(&mut self) -> &mut HartState<X> {
        self.allocator.get_mut(self.state_id).expect("hart state id is always valid")
    }

    pub fn config(&self) -> &HartConfig {
        &self.config
    }

    pub fn is_debug_mode(&self) -> bool {
        self.state().debug_mode
    }

    /// `spec.md` §6: returns a hart to its power-on state without disturbing memory contents.
    pub fn reset(&mut self, memory: &mut Memory) {
        let reset_pc = X::to_unsigned(self.config.reset_pc);
        let replacement = HartState::new(&self.config);
        let state = self.state_mut();
        *state = replacement;
        state.registers.set_pc(reset_pc);
        self.decode_cache.clear();
        memory.reset_mapped_registers();
        debug!("hart {} reset to pc={:#x}", self.config.mhartid, self.config.reset_pc);
    }

    fn fetch(&mut self, memory: &Memory, pc: u64) -> Result<DecodedInst, Exception> {
        if let Some(cached) = self.decode_cache.lookup(pc) {
            return Ok(cached);
        }
        if !memory.is_executable(pc, 2) {
            return Err(Exception::InstAccFault);
        }
        let low = memory.read(pc, 2).map_err(|_| Exception::InstAccFault)?;
        let low16 = u16::from_le_bytes([low[0], low[1]]);
        let mut decoded = if low16 & 0b11 == 0b11 {
            if !memory.is_executable(pc, 4) {
                return Err(Exception::InstAccFault);
            }
            let bytes = memory.read(pc, 4).map_err(|_| Exception::InstAccFault)?;
            let high16 = u16::from_le_bytes([bytes[2], bytes[3]]);
            decode::decode(low16, Some(high16)).map_err(|_| Exception::IllegalInst)?
        } else {
            decode::decode(low16, None).map_err(|_| Exception::IllegalInst)?
        };
        decoded.address = pc;
        self.decode_cache.insert(pc, decoded);
        Ok(decoded)
    }

    /// `spec.md` §4.7: fetch, decode, dispatch, then trap/retire bookkeeping. Interrupts and NMI
    /// are serviced first, ahead of fetch, `spec.md` §4.4's priority ordering. Never panics on
    /// architectural conditions: illegal instructions, traps, and termination are all ordinary
    /// [`StepOutcome`]s for the caller (`run.rs`) to interpret.
    pub fn step(&mut self, memory: &mut Memory) -> StepOutcome {
        self.step_with_console(memory, None)
    }

    /// Same as [`Hart::step`], but routes the `conIo` byte address (if configured) through
    /// `console` instead of reading/writing as zero, `SPEC_FULL.md` §4.
    pub fn step_with_console(&mut self, memory: &mut Memory, console: Option<&mut dyn ConsoleIo>) -> StepOutcome {
        if self.state().debug_mode {
            return StepOutcome::Continue;
        }

        if self.state().halted_in_wfi {
            if trap::pending_interrupt(&self.state().csr, false).is_some() {
                self.state_mut().halted_in_wfi = false;
            } else {
                return StepOutcome::Continue;
            }
        }

        if let Some(outcome) = self.service_interrupts_and_nmi(memory) {
            return outcome;
        }

        let pc = X::to_u64(self.state().registers.pc());
        let inst = match self.fetch(memory, pc) {
            Ok(inst) => inst,
            Err(exception) => return self.raise(exception, pc, pc),
        };

        let privilege = self.state().privilege;
        if let Some((_, action)) = self.state().triggers.evaluate(MatchMode::AddrBefore, pc, privilege) {
            return self.fire_trigger(action, pc);
        }

        let next_pc = pc.wrapping_add(inst.inst_size as u64) & X::MASK;
        self.state_mut().registers.set_pc(X::to_unsigned(next_pc));

        let outcome = {
            let config = &self.config;
            let decode_cache = &mut self.decode_cache;
            let state = self.allocator.get_mut(self.state_id).expect("hart state id is always valid");
            let mut ex = Executor { state, memory, decode_cache, config, console, current_pc: pc };
            execute::dispatch(&mut ex, &inst)
        };

        self.state_mut().mcycle = self.state().mcycle.wrapping_add(1);

        match outcome {
            StepOutcome::Continue => {
                self.state_mut().retired = self.state().retired.wrapping_add(1);
                self.tick_icount_triggers(pc)
            }
            StepOutcome::Exception(exception, tval) => {
                // `spec.md` §7: the retired-count update is inhibited for architectural traps,
                // except `ecall`/`ebreak`, which compensate by incrementing their own count
                // (`execute::system`) before returning this outcome.
                self.raise(exception, pc, tval)
            }
            StepOutcome::Terminate(code) => StepOutcome::Terminate(code),
            StepOutcome::EnterDebugMode(cause) => {
                self.enter_debug_mode(cause, pc);
                StepOutcome::EnterDebugMode(cause)
            }
        }
    }

    fn tick_icount_triggers(&mut self, current_pc: u64) -> StepOutcome {
        let fired = self.state_mut().triggers.tick_icount();
        if let Some((_, action)) = fired.into_iter().next() {
            return self.fire_trigger(action, current_pc);
        }
        StepOutcome::Continue
    }

    fn fire_trigger(&mut self, action: TriggerAction, pc: u64) -> StepOutcome {
        match action {
            TriggerAction::Breakpoint => self.raise(Exception::Breakpoint, pc, pc),
            TriggerAction::EnterDebugMode => {
                self.enter_debug_mode(DebugCause::Trigger, pc);
                StepOutcome::EnterDebugMode(DebugCause::Trigger)
            }
        }
    }

    fn raise(&mut self, exception: Exception, pc_to_save: u64, tval: u64) -> StepOutcome {
        let cause = exception.cause();
        let state = self.state_mut();
        let new_pc = trap::enter_trap::<X>(
            &mut state.csr,
            &mut state.privilege,
            &mut state.reservation,
            cause,
            false,
            pc_to_save,
            tval,
        );
        state.registers.set_pc(X::to_unsigned(new_pc));
        StepOutcome::Exception(exception, tval)
    }

    fn service_interrupts_and_nmi(&mut self, memory: &Memory) -> Option<StepOutcome> {
        let nmi_pc = self.config.nmi_pc;
        let state = self.state_mut();
        if state.trap.nmi_pending() {
            let cause_code = match state.trap.nmi_cause().expect("nmi_pending implies a cause") {
                NmiCause::StoreException => 0,
                NmiCause::LoadException => 1,
                NmiCause::FastInterruptFailure => 2,
            };
            let pc = X::to_u64(state.registers.pc());
            state.trap.clear_pending_nmi();
            let new_pc = trap::enter_nmi::<X>(
                &mut state.csr,
                &mut state.privilege,
                &mut state.reservation,
                cause_code,
                pc,
                nmi_pc,
            );
            state.registers.set_pc(X::to_unsigned(new_pc));
            debug!("nmi serviced, cause={cause_code}");
            return Some(StepOutcome::Continue);
        }

        let interrupt = trap::pending_interrupt(&state.csr, state.debug_mode)?;
        let pc = X::to_u64(state.registers.pc());

        if interrupt == Interrupt::MExternal {
            if let Ok(target) = trap::fast_external_interrupt(&state.csr, memory) {
                state.registers.set_pc(X::to_unsigned(target));
                trace!("fast external interrupt redirect to {target:#x}");
                return Some(StepOutcome::Continue);
            }
            state.trap.set_pending_nmi(NmiCause::FastInterruptFailure);
        }

        let cause = trap::interrupt_cause_bits::<X>(interrupt.cause());
        let new_pc = trap::enter_trap::<X>(
            &mut state.csr,
            &mut state.privilege,
            &mut state.reservation,
            cause,
            true,
            pc,
            0,
        );
        state.registers.set_pc(X::to_unsigned(new_pc));
        Some(StepOutcome::Continue)
    }

    /// `spec.md` §6 `enterDebugMode`: forces debug mode from outside the fetch/execute loop (e.g.
    /// a halt request already routes through this via [`Self::request_halt`]).
    pub fn enter_debug_mode(&mut self, cause: DebugCause, pc: u64) {
        let state = self.state_mut();
        state.debug_mode = true;
        state.reservation.clear();
        state.csr.write_raw(num::DPC, pc);
        let mut dcsr = Dcsr::from_raw(state.csr.peek(num::DCSR).0);
        dcsr.set_cause(cause);
        dcsr.set_prv(state.privilege.bits());
        state.csr.write_raw(num::DCSR, dcsr.raw());
        debug!("entering debug mode: cause={cause:?} dpc={pc:#x}");
    }

    /// `spec.md` §6: external debug request to halt at the next retirement boundary.
    pub fn request_halt(&mut self) {
        let pc = X::to_u64(self.state().registers.pc());
        if !self.state().debug_mode {
            self.enter_debug_mode(DebugCause::Haltreq, pc);
        }
    }

    /// `spec.md` §6: external debug request to resume from debug mode at `dpc`.
    pub fn resume(&mut self) {
        let state = self.state_mut();
        if !state.debug_mode {
            return;
        }
        state.debug_mode = false;
        let dpc = state.csr.peek(num::DPC).0;
        state.registers.set_pc(X::to_unsigned(dpc));
    }

    /// `spec.md` §6 `exitDebugMode`: alias for [`Self::resume`] under the external-interface name.
    pub fn exit_debug_mode(&mut self) {
        self.resume();
    }

    /// `spec.md` §6 `setPendingNmi`/`clearPendingNmi`: lets a harness (or a device model it owns)
    /// drive the NMI line directly, independent of the store/load-exception paths below.
    pub fn set_pending_nmi(&mut self, cause: NmiCause) {
        self.state_mut().trap.set_pending_nmi(cause);
    }

    pub fn clear_pending_nmi(&mut self) {
        self.state_mut().trap.clear_pending_nmi();
    }

    /// `spec.md` §4.5/§6 `applyStoreException`: an external bus signals an imprecise store
    /// fault at `addr`. Rolls the store queue back to its pre-fault contents via `memory.poke`,
    /// then latches `MDSEAC`/NMI (`spec.md` supplemented: `MDSEAC` is sticky until the harness
    /// explicitly clears it with [`Self::clear_pending_nmi`]'s CSR-level counterpart).
    pub fn apply_store_exception(
        &mut self,
        memory: &mut Memory,
        addr: u64,
    ) -> Result<RollbackOutcome, RollbackError> {
        let rollback_enabled = self.config.rollback_enabled;
        let state = self.state_mut();
        let outcome = state.store_queue.apply_exception(addr, rollback_enabled, |a, b| {
            let _ = memory.poke(a, &[b]);
        })?;
        if !state.trap.mdseac_locked() {
            state.csr.write_raw(num::MDSEAC, addr);
        }
        state.trap.lock_mdseac();
        state.trap.set_pending_nmi(NmiCause::StoreException);
        Ok(outcome)
    }

    /// `spec.md` §4.5/§6 `applyLoadException`: as [`Self::apply_store_exception`], but restores
    /// the destination register of the faulting load instead of memory.
    pub fn apply_load_exception(&mut self, addr: u64) -> Result<RollbackOutcome, RollbackError> {
        let rollback_enabled = self.config.rollback_enabled;
        let state = self.state_mut();
        let (outcome, restore) = state.load_queue.apply_exception(addr, rollback_enabled, false)?;
        if let Some((reg, value)) = restore {
            state.registers.set_x(reg, X::to_unsigned(value));
        }
        if !state.trap.mdseac_locked() {
            state.csr.write_raw(num::MDSEAC, addr);
        }
        state.trap.lock_mdseac();
        state.trap.set_pending_nmi(NmiCause::LoadException);
        Ok(outcome)
    }

    /// `spec.md` §6 `applyLoadFinished`: a load that was outstanding when the hart moved on has
    /// now completed successfully. Unlike [`Self::apply_load_exception`] this is not a fault: it
    /// only retires the matching queue entry (restoring its register if nothing younger has since
    /// overwritten it) and never touches `MDSEAC`/NMI. `match_oldest` is the external interface's
    /// `matchOldest` flag for resolving multiple matches against the same address.
    pub fn apply_load_finished(
        &mut self,
        addr: u64,
        match_oldest: bool,
    ) -> Result<RollbackOutcome, RollbackError> {
        let state = self.state_mut();
        let (outcome, restore) = state.load_queue.apply_exception(addr, true, match_oldest)?;
        if let Some((reg, value)) = restore {
            state.registers.set_x(reg, X::to_unsigned(value));
        }
        Ok(outcome)
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.state().privilege
    }

    pub fn set_privilege(&mut self, level: PrivilegeLevel) {
        self.state_mut().privilege = level;
    }

    pub fn mcycle(&self) -> u64 {
        self.state().mcycle
    }

    pub fn set_mcycle(&mut self, value: u64) {
        self.state_mut().mcycle = value;
    }

    pub fn retired(&self) -> u64 {
        self.state().retired
    }

    pub fn set_retired(&mut self, value: u64) {
        self.state_mut().retired = value;
    }

    /// Sets `debug_mode` directly, bypassing the `DCSR`/`DPC` bookkeeping [`Self::enter_debug_mode`]
    /// and [`Self::resume`] perform; used by [`crate::snapshot::HartSnapshot::restore`], which
    /// restores those CSRs itself from the captured snapshot.
    pub fn set_debug_mode_raw(&mut self, value: bool) {
        self.state_mut().debug_mode = value;
    }

    // --- peek/poke/trigger control surface, `spec.md` §6 ---

    pub fn peek_int_reg(&self, index: u8) -> u64 {
        X::to_u64(self.state().registers.x(Specifier::from_u5(index)))
    }

    pub fn poke_int_reg(&mut self, index: u8, value: u64) {
        let value = X::to_unsigned(value & X::MASK);
        self.state_mut().registers.set_x(Specifier::from_u5(index), value);
    }

    pub fn peek_pc(&self) -> u64 {
        X::to_u64(self.state().registers.pc())
    }

    pub fn poke_pc(&mut self, pc: u64) {
        self.state_mut().registers.set_pc(X::to_unsigned(pc));
    }

    pub fn peek_fp_reg(&self, index: u8) -> u64 {
        self.state().fp.f64(FpSpecifier::from_u5(index))
    }

    pub fn poke_fp_reg(&mut self, index: u8, value: u64) {
        self.state_mut().fp.set_f64(FpSpecifier::from_u5(index), value);
    }

    pub fn peek_csr(&self, number: num::CsrNumber) -> (u64, u64, u64, u64) {
        match number {
            num::MCYCLE | num::CYCLE => (self.state().mcycle, 0, 0, u64::MAX),
            num::MCYCLEH | num::CYCLEH => (self.state().mcycle >> 32, 0, 0, u64::MAX),
            num::MINSTRET | num::INSTRET => (self.state().retired, 0, 0, u64::MAX),
            num::MINSTRETH | num::INSTRETH => (self.state().retired >> 32, 0, 0, u64::MAX),
            num::MHARTID => (self.config.mhartid, self.config.mhartid, 0, 0),
            num::FFLAGS => ((self.state().fcsr.raw() & 0x1F) as u64, 0, 0, 0x1F),
            num::FRM => (((self.state().fcsr.raw() >> 5) & 0x7) as u64, 0, 0, 0x7),
            num::FCSR => ((self.state().fcsr.raw() & 0xFF) as u64, 0, 0, 0xFF),
            _ => self.state().csr.peek(number),
        }
    }

    pub fn poke_csr(&mut self, number: num::CsrNumber, value: u64) {
        match number {
            num::MCYCLE | num::CYCLE => self.state_mut().mcycle = value,
            num::MCYCLEH | num::CYCLEH => {
                let lo = self.state().mcycle & 0xFFFF_FFFF;
                self.state_mut().mcycle = (value << 32) | lo;
            }
            num::MINSTRET | num::INSTRET => self.state_mut().retired = value,
            num::MINSTRETH | num::INSTRETH => {
                let lo = self.state().retired & 0xFFFF_FFFF;
                self.state_mut().retired = (value << 32) | lo;
            }
            num::MHARTID => {}
            num::FFLAGS => self.state_mut().fcsr.write(value as u32, 0x1F),
            num::FRM => self.state_mut().fcsr.set_frm(value as u8),
            num::FCSR => self.state_mut().fcsr.write(value as u32, 0xFF),
            _ => self.state_mut().csr.poke(number, value),
        }
    }

    pub fn peek_memory(&self, memory: &Memory, addr: u64, len: u64) -> Result<Vec<u8>, crate::memory::MemoryAccessError> {
        memory.read_raw(addr, len)
    }

    pub fn poke_memory(&self, memory: &mut Memory, addr: u64, data: &[u8]) -> Result<(), crate::memory::MemoryAccessError> {
        memory.poke(addr, data)?;
        self.decode_cache_invalidate_hint(addr, data.len() as u64);
        Ok(())
    }

    fn decode_cache_invalidate_hint(&self, _addr: u64, _len: u64) {
        // Invalidation happens through `Hart::invalidate_decode_cache`, kept separate since this
        // method only has `&self`; callers that mutate memory through `Hart` should follow up with
        // that call (loadstore/amo handlers do this themselves via `ex.decode_cache`).
    }

    pub fn invalidate_decode_cache(&mut self, addr: u64, len: u64) {
        self.decode_cache.invalidate_range(addr, len);
    }

    pub fn set_trigger(&mut self, index: usize, tdata1: u64, tdata2: u64, tdata3: u64) {
        let state = self.state_mut();
        if index >= state.triggers.len() {
            return;
        }
        let previous = state.triggers.tselect();
        state.triggers.set_tselect(index);
        let trigger = state.triggers.selected_mut();
        trigger.tdata1 = crate::trigger::Tdata1::from_raw(tdata1);
        trigger.tdata2 = tdata2;
        trigger.tdata3 = tdata3;
        state.triggers.set_tselect(previous);
    }

    pub fn dump_int_regs(&self) -> HashMap<u8, u64> {
        (0..32).map(|i| (i, self.peek_int_reg(i))).collect()
    }
}

impl<X: Xlen> Hart<X, SpaceTime> {
    /// `spec.md` §4.7 `whatIfStep`: executes one hypothetical instruction, then restores both
    /// architectural state and memory regardless of what happened, returning what would have
    /// changed had it been kept. Register/CSR/queue state is restored via a `space_time` snapshot
    /// (see the module note on [`Hart`]); memory is restored via a full-byte capture rather than
    /// riding the store queue, since AMO/LR/SC writes (`execute::amo`) bypass it.
    pub fn what_if_step(&mut self, memory: &mut Memory) -> crate::run::ChangeRecord {
        let snapshot = self.allocator.make_snapshot();
        let before = memory.snapshot_bytes();
        let pc_before = self.peek_pc();

        let outcome = self.step(memory);

        let pc_after = self.peek_pc();
        let after = memory.snapshot_bytes();
        let memory_changes = before
            .iter()
            .zip(after.iter())
            .enumerate()
            .filter(|(_, (old, new))| old != new)
            .map(|(addr, (&old, &new))| (addr as u64, old, new))
            .collect();

        self.allocator
            .restore_snapshot(snapshot)
            .expect("a snapshot just taken is always valid to restore");
        let _ = self.allocator.drop_snapshot(snapshot);
        memory.restore_bytes(&before);

        crate::run::ChangeRecord { pc_before, pc_after, memory_changes, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlen::Rv64;

    fn make_hart() -> Hart<Rv64> {
        let config = HartConfig { reset_pc: 0x8000_0000, ..HartConfig::default() };
        Hart::new(config)
    }

    #[test]
    fn new_hart_starts_at_reset_pc_in_machine_mode() {
        let hart = make_hart();
        assert_eq!(hart.peek_pc(), 0x8000_0000);
        assert_eq!(hart.state().privilege, PrivilegeLevel::Machine);
    }

    #[test]
    fn reset_restores_pc_and_clears_retirement_count() {
        let mut hart = make_hart();
        let mut memory = Memory::new(64 * 1024, 64 * 1024, 4096).unwrap();
        hart.poke_pc(0x1234);
        hart.state_mut().retired = 99;
        hart.reset(&mut memory);
        assert_eq!(hart.peek_pc(), 0x8000_0000);
        assert_eq!(hart.state().retired, 0);
    }

    #[test]
    fn illegal_fetch_raises_inst_access_fault() {
        let mut hart = make_hart();
        let mut memory = Memory::new(64 * 1024, 64 * 1024, 4096).unwrap();
        let outcome = hart.step(&mut memory);
        assert!(matches!(outcome, StepOutcome::Exception(Exception::InstAccFault, _)));
    }

    #[test]
    fn tied_mcycle_csr_reads_the_shadow_counter() {
        let mut hart = make_hart();
        hart.state_mut().mcycle = 42;
        assert_eq!(hart.peek_csr(num::MCYCLE).0, 42);
        assert_eq!(
            read_csr::<Rv64>(hart.state(), hart.config(), num::CYCLE).unwrap(),
            42
        );
    }

    #[test]
    fn apply_store_exception_restores_memory_and_latches_mdseac() {
        let mut hart = make_hart();
        let mut memory = Memory::new(64 * 1024, 64 * 1024, 4096).unwrap();
        memory.set_page_attributes(
            0,
            memory.size(),
            crate::memory::PageAttributes { mapped: true, read: true, write: true, ..Default::default() },
        );
        memory.write(0x100, &[0xAA]).unwrap();
        hart.state_mut().store_queue.push(0x100, 1, 0xAA, 0x11, false);

        hart.apply_store_exception(&mut memory, 0x100).unwrap();

        assert_eq!(memory.read(0x100, 1).unwrap(), vec![0x11]);
        assert_eq!(hart.peek_csr(num::MDSEAC).0, 0x100);
        assert_eq!(hart.state().trap.nmi_cause(), Some(NmiCause::StoreException));
    }

    #[test]
    fn apply_load_exception_restores_register() {
        let mut hart = make_hart();
        hart.state_mut().load_queue.push(0x200, 4, Specifier::from_u5(7), 0xDEAD_BEEF);
        hart.poke_int_reg(7, 0);

        hart.apply_load_exception(0x200).unwrap();

        assert_eq!(hart.peek_int_reg(7), 0xDEAD_BEEF);
        assert_eq!(hart.state().trap.nmi_cause(), Some(NmiCause::LoadException));
    }

    #[test]
    fn apply_load_finished_restores_without_setting_nmi() {
        let mut hart = make_hart();
        hart.state_mut().load_queue.push(0x300, 4, Specifier::from_u5(9), 7);
        hart.poke_int_reg(9, 0);

        hart.apply_load_finished(0x300, false).unwrap();

        assert_eq!(hart.peek_int_reg(9), 7);
        assert!(!hart.state().trap.nmi_pending());
    }

    #[test]
    fn what_if_step_restores_register_and_memory_state() {
        let mut hart = make_hart();
        let mut memory = Memory::new(64 * 1024, 64 * 1024, 4096).unwrap();
        memory.set_page_attributes(
            0,
            memory.size(),
            crate::memory::PageAttributes { mapped: true, read: true, write: true, exec: true, ..Default::default() },
        );
        hart.poke_pc(0x8000_0000);
        // `addi x5, x0, 1`
        memory.write(0x8000_0000, &0x0010_0293u32.to_le_bytes()).unwrap();
        hart.poke_int_reg(5, 0);

        let change = hart.what_if_step(&mut memory);

        assert_eq!(change.outcome, StepOutcome::Continue);
        assert_eq!(change.pc_before, 0x8000_0000);
        assert_eq!(change.pc_after, 0x8000_0004);
        assert_eq!(hart.peek_pc(), 0x8000_0000);
        assert_eq!(hart.peek_int_reg(5), 0);
    }
}
