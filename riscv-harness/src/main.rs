//! `riscv-harness`: a batch CLI driving `riscv-core`, `spec.md` §6/§7. Grounded on the teacher's
//! `red-planet-cli` for the overall clap/env_logger/ctrlc wiring, but swaps its TUI/gdbstub/tokio
//! front end for a plain run-to-completion loop, since `SPEC_FULL.md` §1 scopes interactive
//! debugging out.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use riscv_core::run::{run_until, RunLimits, RunResult};
use riscv_core::xlen::{Rv32, Rv64, Xlen};
use riscv_core::{ConsoleIo, Hart, HartConfig, Memory, PageAttributes};

use riscv_harness::config::{HarnessConfig, XlenWidth};
use riscv_harness::error::HarnessError;
use riscv_harness::loader;
use riscv_harness::trace::{self, StepSample, TraceWriter};

/// Batch RISC-V hart simulator, `spec.md` §1.
#[derive(Debug, Parser)]
struct Args {
    /// ELF or hex image to load, per the `hex_image` config flag.
    image: PathBuf,

    /// TOML configuration file (`HarnessConfig`); harness defaults apply to anything it omits.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `config.trace`.
    #[arg(short, long)]
    trace: bool,

    /// Overrides `config.max_instructions`.
    #[arg(short = 'n', long)]
    max_instructions: Option<u64>,
}

/// Stdin/stdout-backed `conIo`, grounded on the teacher's `red-planet-cli` console handling (a
/// non-blocking raw-mode TTY reader there; a single blocking byte read suffices for this batch
/// harness since there is no interactive session to keep responsive).
struct StdConsole;

impl ConsoleIo for StdConsole {
    fn read_byte(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        match io::stdin().read(&mut buf) {
            Ok(1) => buf[0],
            _ => 0xFF,
        }
    }

    fn write_byte(&mut self, byte: u8) {
        let _ = io::stdout().write_all(&[byte]);
        let _ = io::stdout().flush();
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<u8, HarnessError> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    if args.trace {
        config.trace = true;
    }
    if let Some(n) = args.max_instructions {
        config.max_instructions = Some(n);
    }

    let mut memory = Memory::new(config.memory_size, config.region_size, config.page_size)?;
    memory.set_page_attributes(
        0,
        memory.size(),
        PageAttributes { mapped: true, read: true, write: true, exec: true, ..Default::default() },
    );

    let bytes = fs::read(&args.image).map_err(|e| riscv_harness::error::io_error(&args.image, e))?;

    let mut to_host_addr = config.to_host_addr;
    let mut con_io_addr = config.con_io_addr;
    let mut entry = config.reset_pc;

    if config.hex_image {
        let text = String::from_utf8_lossy(&bytes);
        loader::hex::load(&mut memory, &text)?;
    } else {
        let image = loader::elf::load(&mut memory, &bytes)?;
        let found_bits = if image.is_64_bit { 64 } else { 32 };
        if found_bits != config.xlen.bits() {
            return Err(HarnessError::XlenMismatch { configured: config.xlen.bits(), found: found_bits });
        }
        to_host_addr = to_host_addr.or(image.to_host_addr);
        con_io_addr = con_io_addr.or(image.con_io_addr);
        if config.reset_pc == 0 {
            entry = image.entry;
        }
    }

    let hart_config = HartConfig {
        reset_pc: entry,
        nmi_pc: config.nmi_pc,
        to_host_addr,
        con_io_addr,
        ..HartConfig::default()
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed))
        .expect("failed to install Ctrl-C handler");

    let limits =
        RunLimits { max_instructions: config.max_instructions, stop_pc: None, cancel: Some(cancel) };

    let mut console = StdConsole;
    let writer = config.trace.then(TraceWriter::stdout);

    let result = match config.xlen {
        XlenWidth::Rv32 => {
            let mut hart = Hart::<Rv32>::new(hart_config);
            hart.reset(&mut memory);
            drive(&mut hart, &mut memory, &mut console, &limits, writer.as_ref(), &config)
        }
        XlenWidth::Rv64 => {
            let mut hart = Hart::<Rv64>::new(hart_config);
            hart.reset(&mut memory);
            drive(&mut hart, &mut memory, &mut console, &limits, writer.as_ref(), &config)
        }
    };

    info!("run finished: {result:?}");
    match result {
        RunResult::Exited(code) => Ok((code & 0xFF) as u8),
        RunResult::Completed | RunResult::LimitReached | RunResult::EnteredDebugMode => Ok(0),
        RunResult::Interrupted => Ok(130),
        RunResult::StuckInIllegal => Ok(1),
    }
}

/// Runs `hart` to completion, optionally emitting one trace record per retired instruction.
/// `riscv_core::run::run_until` has no per-step hook, so tracing drives `Hart::step_with_console`
/// directly instead; the untraced path defers entirely to `run_until` so it isn't paying for a
/// `StepSample` capture it doesn't need.
fn drive<X: Xlen>(
    hart: &mut Hart<X>,
    memory: &mut Memory,
    console: &mut dyn ConsoleIo,
    limits: &RunLimits,
    writer: Option<&TraceWriter>,
    config: &HarnessConfig,
) -> RunResult {
    let Some(writer) = writer else {
        return run_until(hart, memory, Some(console), limits);
    };

    let width_digits = config.xlen.bits() as usize / 4;
    let mut executed = 0u64;
    let mut consecutive_illegal = 0u32;

    loop {
        if let Some(cancel) = &limits.cancel {
            if cancel.load(Ordering::Relaxed) {
                return RunResult::Interrupted;
            }
        }
        if let Some(stop_pc) = limits.stop_pc {
            if hart.peek_pc() == stop_pc {
                return RunResult::Completed;
            }
        }
        if let Some(max) = limits.max_instructions {
            if executed >= max {
                return RunResult::LimitReached;
            }
        }

        let pc = hart.peek_pc();
        let fetched = trace::fetch_for_trace(&*memory, pc);
        let before = sample(&*hart, &*memory, config);

        let outcome = hart.step_with_console(memory, Some(console));
        executed += 1;

        let after = sample(&*hart, &*memory, config);
        let (asm, inst_bits, inst_size) = match &fetched {
            Some((inst, bits, size)) => (trace::disassemble(inst), *bits, *size),
            None => ("<unfetchable>".to_string(), 0, 4),
        };
        writer
            .record(hart.retired(), 0, pc, inst_bits, inst_size, width_digits, &before, &after, &asm)
            .expect("trace output write failed");

        match outcome {
            riscv_core::StepOutcome::Continue => consecutive_illegal = 0,
            riscv_core::StepOutcome::Exception(riscv_core::Exception::IllegalInst, _) => {
                consecutive_illegal += 1;
                if consecutive_illegal >= riscv_core::run::STUCK_THRESHOLD {
                    return RunResult::StuckInIllegal;
                }
            }
            riscv_core::StepOutcome::Exception(_, _) => consecutive_illegal = 0,
            riscv_core::StepOutcome::Terminate(value) => return RunResult::Exited(value),
            riscv_core::StepOutcome::EnterDebugMode(_) => return RunResult::EnteredDebugMode,
        }
    }
}

fn sample<X: Xlen>(hart: &Hart<X>, memory: &Memory, config: &HarnessConfig) -> StepSample {
    let mut int_regs = [0u64; 32];
    for (ix, slot) in int_regs.iter_mut().enumerate() {
        *slot = hart.peek_int_reg(ix as u8);
    }
    let mut fp_regs = [0u64; 32];
    if config.fp_enabled {
        for (ix, slot) in fp_regs.iter_mut().enumerate() {
            *slot = hart.peek_fp_reg(ix as u8);
        }
    }
    let csrs = hart.config().csrs.iter().map(|(num, _)| (*num, hart.peek_csr(*num).0)).collect();
    let memory = memory.read(0, memory.size()).unwrap_or_default();
    StepSample { int_regs, fp_regs, csrs, memory }
}
