//! ELF loader, `spec.md` §6: loadable `PT_LOAD` segments are copied to their physical address;
//! the `tohost`, `__whisper_console_io`, `__global_pointer$`, `_finish`, `_end` symbols are
//! honoured if present.
//!
//! Grounded on the teacher's `red-planet-cli/src/main.rs::load_elf` and `red-planet-test/src/
//! main.rs` (`PT_LOAD` filter, `elf.syms.iter()` + `elf.strtab.get_at` symbol lookup) almost
//! verbatim; the teacher only recovers `begin_signature`/`end_signature`, this recovers the
//! wider symbol set `spec.md` names.

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::debug;
use riscv_core::Memory;

use crate::error::HarnessError;

/// Addresses recovered from the ELF's symbol table, when present. Harness configuration always
/// takes priority over these when both are supplied (`config.rs`'s `to_host_addr`/`con_io_addr`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfImage {
    pub entry: u64,
    pub is_64_bit: bool,
    pub to_host_addr: Option<u64>,
    pub con_io_addr: Option<u64>,
    pub global_pointer: Option<u64>,
    pub finish_addr: Option<u64>,
    pub end_addr: Option<u64>,
}

/// Parses `bytes` as an ELF image, copies every `PT_LOAD` segment's file contents into `memory`
/// at its physical address (zero-filling the `p_memsz - p_filesz` tail, e.g. `.bss`), and returns
/// whatever of `spec.md` §6's honoured symbols were present.
pub fn load(memory: &mut Memory, bytes: &[u8]) -> Result<ElfImage, HarnessError> {
    let elf = Elf::parse(bytes)?;

    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        debug!(
            "loading PT_LOAD segment: file [{:#x}..{:#x}] -> phys [{:#x}..{:#x})",
            header.p_offset,
            header.p_offset + header.p_filesz,
            header.p_paddr,
            header.p_paddr + header.p_memsz,
        );
        let data = &bytes[header.file_range()];
        memory.load_raw(header.p_paddr, data)?;
        if header.p_memsz > header.p_filesz {
            let pad = vec![0u8; (header.p_memsz - header.p_filesz) as usize];
            memory.load_raw(header.p_paddr + header.p_filesz, &pad)?;
        }
    }

    let mut image = ElfImage { entry: elf.entry, is_64_bit: elf.is_64, ..ElfImage::default() };
    for sym in elf.syms.iter() {
        let Some(name) = elf.strtab.get_at(sym.st_name) else { continue };
        match name {
            "tohost" => image.to_host_addr = Some(sym.st_value),
            "__whisper_console_io" => image.con_io_addr = Some(sym.st_value),
            "__global_pointer$" => image.global_pointer = Some(sym.st_value),
            "_finish" => image.finish_addr = Some(sym.st_value),
            "_end" => image.end_addr = Some(sym.st_value),
            _ => {}
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_bytes() {
        let mut mem = Memory::new(4096, 4096, 4096).unwrap();
        let err = load(&mut mem, b"not an elf file");
        assert!(err.is_err());
    }
}
