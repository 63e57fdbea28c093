//! Hex image loader, `spec.md` §6: lines of either `@<hex-addr>` (set current address) or
//! whitespace-separated hex-byte pairs, written sequentially starting at the current address.
//!
//! Grounded on `original_source/Memory.cpp`'s `loadHexFile`, expressed in the teacher's idiom
//! (fallible `thiserror` result per malformed line rather than the original's
//! warn-and-keep-going console output).

use log::debug;
use riscv_core::Memory;

use crate::error::HarnessError;

/// Writes `text` (the contents of a hex image file) into `memory` starting wherever `@`
/// directives place the cursor, defaulting to address 0 if the file opens with bare byte pairs.
pub fn load(memory: &mut Memory, text: &str) -> Result<(), HarnessError> {
    let mut addr: u64 = 0;
    let mut pending: Vec<u8> = Vec::new();
    let mut pending_start = addr;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(hex) = line.strip_prefix('@') {
            flush(memory, pending_start, &pending)?;
            pending.clear();
            addr = u64::from_str_radix(hex.trim(), 16).map_err(|_| HarnessError::Hex {
                line: lineno + 1,
                reason: format!("invalid address {hex:?}"),
            })?;
            pending_start = addr;
            continue;
        }

        for token in line.split_whitespace() {
            let byte = u8::from_str_radix(token, 16).map_err(|_| HarnessError::Hex {
                line: lineno + 1,
                reason: format!("invalid byte {token:?}"),
            })?;
            pending.push(byte);
            addr += 1;
        }
    }

    flush(memory, pending_start, &pending)?;
    debug!("hex image loaded, final cursor at {addr:#x}");
    Ok(())
}

fn flush(memory: &mut Memory, start: u64, bytes: &[u8]) -> Result<(), HarnessError> {
    if bytes.is_empty() {
        return Ok(());
    }
    memory.load_raw(start, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscv_core::PageAttributes;

    fn ram() -> Memory {
        let mut mem = Memory::new(4096, 4096, 4096).unwrap();
        mem.set_page_attributes(
            0,
            mem.size(),
            PageAttributes { mapped: true, read: true, write: true, ..Default::default() },
        );
        mem
    }

    #[test]
    fn loads_bytes_sequentially_from_zero() {
        let mut mem = ram();
        load(&mut mem, "de ad be ef\n").unwrap();
        assert_eq!(mem.read(0, 4).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn address_directive_relocates_the_cursor() {
        let mut mem = ram();
        load(&mut mem, "@100\n01 02\n@10\nff\n").unwrap();
        assert_eq!(mem.read(0x100, 2).unwrap(), vec![0x01, 0x02]);
        assert_eq!(mem.read(0x10, 1).unwrap(), vec![0xff]);
    }

    #[test]
    fn rejects_malformed_byte_token() {
        let mut mem = ram();
        let err = load(&mut mem, "zz\n").unwrap_err();
        assert!(matches!(err, HarnessError::Hex { line: 1, .. }));
    }
}
