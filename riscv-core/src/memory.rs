//! Flat byte-addressable memory with per-page attributes, region boundaries, and
//! memory-mapped-register write masks.
//!
//! Unlike the teacher's `Bus`/`SystemBus` device graph (a TileLink-like trait object per
//! peripheral), `spec.md` §3/§4 describes a single flat address space the hart(s) share directly,
//! closer to `original_source`'s `Memory.hpp`/`.cpp`. `Memory` is therefore a plain owned struct
//! rather than a bus trait; see `DESIGN.md` for the substitution rationale. The little-endian
//! serialization contract and "never panic on an (address, size) pair" discipline are kept from
//! the teacher's `bus.rs`.

use std::sync::Mutex;

use log::warn;
use thiserror::Error;

/// Per-page access/role attributes, `spec.md` §3.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageAttributes {
    pub mapped: bool,
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub iccm: bool,
    pub dccm: bool,
    /// `Some` iff this page is a memory-mapped-register page; the mask is applied (AND) to every
    /// write, word by word.
    pub mem_mapped_register: bool,
    /// Set once the page has been written at least once; used only for diagnostics/snapshots.
    pub pristine: bool,
}

/// Per-region attributes. Regions are coarser than pages; `spec.md` §4.3 uses region boundaries
/// (not page boundaries) to decide whether a misaligned access is tolerated.
#[derive(Debug, Clone, Copy)]
pub struct RegionAttributes {
    /// Non-idempotent regions (typically memory-mapped I/O) may not tolerate a misaligned or
    /// split access, even when the target architecture otherwise supports unaligned accesses.
    pub idempotent: bool,
}

impl Default for RegionAttributes {
    fn default() -> Self {
        Self { idempotent: true }
    }
}

#[derive(Debug, Error)]
pub enum MemoryConfigError {
    #[error("memory size {size:#x} is not a multiple of the region size {region_size:#x}")]
    SizeNotMultipleOfRegion { size: u64, region_size: u64 },
    #[error("region size {region_size:#x} is not a multiple of the page size {page_size:#x}")]
    RegionNotMultipleOfPage { region_size: u64, page_size: u64 },
    #[error("region/page size {0:#x} is not a power of two")]
    NotPowerOfTwo(u64),
    #[error("memory-mapped-register page at {addr:#x} has a mask vector of the wrong length")]
    BadMaskLength { addr: u64 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessError {
    #[error("address {0:#x} is not mapped")]
    Unmapped(u64),
    #[error("address {0:#x} is not readable")]
    NotReadable(u64),
    #[error("address {0:#x} is not writable")]
    NotWritable(u64),
    #[error("address {0:#x} is not executable")]
    NotExecutable(u64),
    #[error("access at {0:#x} runs past the end of memory")]
    OutOfBounds(u64),
}

/// Outcome of a byte-level write, used by callers (loads/stores, pokes) to decide whether to
/// clear a load reservation / invalidate a decode-cache range / mark a store-queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub addr: u64,
    pub len: u64,
}

/// The flat address space shared by every hart. Atomic read-modify-write sequences take
/// [`Memory::amo_lock`] for the duration of the sequence (`spec.md` §5).
#[derive(Debug)]
pub struct Memory {
    bytes: Vec<u8>,
    region_size: u64,
    page_size: u64,
    regions: Vec<RegionAttributes>,
    pages: Vec<PageAttributes>,
    /// One write mask (little-endian words) per memory-mapped-register page, keyed by page
    /// index; absent for ordinary pages.
    mmio_masks: std::collections::HashMap<usize, Vec<u8>>,
    amo_mutex: Mutex<()>,
}

impl Memory {
    pub const DEFAULT_REGION_SIZE: u64 = 256 * 1024 * 1024;
    pub const DEFAULT_PAGE_SIZE: u64 = 4096;

    pub fn new(size: u64, region_size: u64, page_size: u64) -> Result<Self, MemoryConfigError> {
        if !region_size.is_power_of_two() {
            return Err(MemoryConfigError::NotPowerOfTwo(region_size));
        }
        if !page_size.is_power_of_two() {
            return Err(MemoryConfigError::NotPowerOfTwo(page_size));
        }
        if region_size % page_size != 0 {
            return Err(MemoryConfigError::RegionNotMultipleOfPage { region_size, page_size });
        }
        if size % region_size != 0 {
            return Err(MemoryConfigError::SizeNotMultipleOfRegion { size, region_size });
        }
        let num_regions = (size / region_size) as usize;
        let num_pages = (size / page_size) as usize;
        Ok(Self {
            bytes: vec![0; size as usize],
            region_size,
            page_size,
            regions: vec![RegionAttributes::default(); num_regions],
            pages: vec![PageAttributes::default(); num_pages],
            mmio_masks: std::collections::HashMap::new(),
            amo_mutex: Mutex::new(()),
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    fn page_index(&self, addr: u64) -> usize {
        (addr / self.page_size) as usize
    }

    fn region_index(&self, addr: u64) -> usize {
        (addr / self.region_size) as usize
    }

    /// `true` iff `[addr, addr+len)` stays within a single region.
    pub fn same_region(&self, addr: u64, len: u64) -> bool {
        len == 0 || self.region_index(addr) == self.region_index(addr + len - 1)
    }

    pub fn region_attributes(&self, addr: u64) -> Option<RegionAttributes> {
        self.regions.get(self.region_index(addr)).copied()
    }

    pub fn page_attributes(&self, addr: u64) -> Option<PageAttributes> {
        self.pages.get(self.page_index(addr)).copied()
    }

    /// Configures the attributes of every page in `[addr, addr+len)`. `len` must be a multiple
    /// of the page size and `addr` page-aligned; used by harness-level memory-map configuration,
    /// not by the hart at run time.
    pub fn set_page_attributes(&mut self, addr: u64, len: u64, attrs: PageAttributes) {
        let first = self.page_index(addr);
        let count = (len / self.page_size) as usize;
        for page in &mut self.pages[first..first + count] {
            *page = attrs;
        }
    }

    pub fn set_region_attributes(&mut self, addr: u64, attrs: RegionAttributes) {
        let idx = self.region_index(addr);
        if let Some(region) = self.regions.get_mut(idx) {
            *region = attrs;
        }
    }

    /// Installs a memory-mapped-register write mask over `[addr, addr+mask.len())`. Every write
    /// touching this page is ANDed with the mask (little-endian, byte per byte).
    pub fn set_mmio_mask(&mut self, addr: u64, mask: Vec<u8>) -> Result<(), MemoryConfigError> {
        let page = self.page_index(addr);
        if mask.len() as u64 != self.page_size {
            return Err(MemoryConfigError::BadMaskLength { addr });
        }
        self.mmio_masks.insert(page, mask);
        Ok(())
    }

    /// Raw read with no attribute checking, used by loaders (ELF/hex) to populate memory.
    pub fn load_raw(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryAccessError> {
        let end = addr + data.len() as u64;
        if end > self.size() {
            return Err(MemoryAccessError::OutOfBounds(addr));
        }
        self.bytes[addr as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn check_bounds(&self, addr: u64, len: u64) -> Result<(), MemoryAccessError> {
        if addr.checked_add(len).map(|e| e > self.size()).unwrap_or(true) {
            return Err(MemoryAccessError::OutOfBounds(addr));
        }
        Ok(())
    }

    /// Reads `len` bytes at `addr`, honoring `read`/`mapped` page attributes.
    pub fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>, MemoryAccessError> {
        self.check_bounds(addr, len)?;
        if let Some(page) = self.page_attributes(addr) {
            if !page.mapped {
                return Err(MemoryAccessError::Unmapped(addr));
            }
            if !page.read {
                return Err(MemoryAccessError::NotReadable(addr));
            }
        }
        Ok(self.bytes[addr as usize..(addr + len) as usize].to_vec())
    }

    /// Reads `len` bytes at `addr` ignoring page attributes (debug peek).
    pub fn read_raw(&self, addr: u64, len: u64) -> Result<Vec<u8>, MemoryAccessError> {
        self.check_bounds(addr, len)?;
        Ok(self.bytes[addr as usize..(addr + len) as usize].to_vec())
    }

    /// `true` iff every byte in `[addr, addr+len)` is in an instruction-fetchable page.
    pub fn is_executable(&self, addr: u64, len: u64) -> bool {
        if self.check_bounds(addr, len).is_err() {
            return false;
        }
        let first = self.page_index(addr);
        let last = self.page_index(addr + len - 1);
        (first..=last).all(|p| self.pages.get(p).map(|a| a.mapped && a.exec).unwrap_or(true))
    }

    /// Writes `data` at `addr`, applying the memory-mapped-register mask if present. Returns the
    /// range actually modified so the caller (the hart) can invalidate its decode cache and clear
    /// any overlapping load reservation / update the store queue.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<WriteOutcome, MemoryAccessError> {
        self.check_bounds(addr, data.len() as u64)?;
        if let Some(page) = self.page_attributes(addr) {
            if !page.mapped {
                return Err(MemoryAccessError::Unmapped(addr));
            }
            if !page.write {
                return Err(MemoryAccessError::NotWritable(addr));
            }
        }
        let page_idx = self.page_index(addr);
        let page_base = page_idx as u64 * self.page_size;
        if let Some(mask) = self.mmio_masks.get(&page_idx) {
            for (i, byte) in data.iter().enumerate() {
                let offset = (addr - page_base) as usize + i;
                let m = mask.get(offset).copied().unwrap_or(0xFF);
                let target = addr as usize + i;
                self.bytes[target] = (self.bytes[target] & !m) | (byte & m);
            }
        } else {
            self.bytes[addr as usize..addr as usize + data.len()].copy_from_slice(data);
        }
        if let Some(page) = self.pages.get_mut(page_idx) {
            page.pristine = false;
        }
        Ok(WriteOutcome { addr, len: data.len() as u64 })
    }

    /// Writes ignoring page write-protection (debug poke still honors the mmio mask), per
    /// `spec.md` §6 `pokeMemory`.
    pub fn poke(&mut self, addr: u64, data: &[u8]) -> Result<WriteOutcome, MemoryAccessError> {
        self.check_bounds(addr, data.len() as u64)?;
        let page_idx = self.page_index(addr);
        let page_base = page_idx as u64 * self.page_size;
        if let Some(mask) = self.mmio_masks.get(&page_idx) {
            for (i, byte) in data.iter().enumerate() {
                let offset = (addr - page_base) as usize + i;
                let m = mask.get(offset).copied().unwrap_or(0xFF);
                let target = addr as usize + i;
                self.bytes[target] = (self.bytes[target] & !m) | (byte & m);
            }
        } else {
            self.bytes[addr as usize..addr as usize + data.len()].copy_from_slice(data);
        }
        Ok(WriteOutcome { addr, len: data.len() as u64 })
    }

    /// Zeroes every memory-mapped-register page; used by `Hart::reset` when the caller does not
    /// want ELF-loaded peripheral state to survive a reset (`spec.md` §4 lifecycle).
    pub fn reset_mapped_registers(&mut self) {
        let page_size = self.page_size as usize;
        for (page_idx, page) in self.pages.iter().enumerate() {
            if page.mem_mapped_register {
                let start = page_idx * page_size;
                self.bytes[start..start + page_size].fill(0);
            }
        }
    }

    /// Captures every byte of the address space, `spec.md` §4.7 `whatIfStep`/`snapshotRun`. Full
    /// rather than page-sparse: `pristine` is only cleared by `write`/`poke`, not by a loader's
    /// `load_raw`, so a page-sparse capture could silently drop ELF-loaded content untouched since
    /// load.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Restores a capture taken by [`Self::snapshot_bytes`] of this same `Memory`. Bypasses page
    /// attributes and the mmio write mask, the same way [`Self::poke`] does.
    pub fn restore_bytes(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len() as u64, self.size(), "snapshot size does not match this memory's size");
        self.bytes.copy_from_slice(bytes);
    }

    /// Acquires the process-wide AMO mutex for the duration of an atomic read-modify-write
    /// sequence (`spec.md` §5). The guard releases the lock on drop, including on an early return
    /// from an exception path.
    pub fn amo_lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.amo_mutex.lock().unwrap_or_else(|poison| {
            warn!("AMO mutex was poisoned by a panicking hart; recovering");
            poison.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_memory() -> Memory {
        let mut mem = Memory::new(1 << 20, 1 << 18, 1 << 12).unwrap();
        mem.set_page_attributes(
            0,
            mem.size(),
            PageAttributes {
                mapped: true,
                read: true,
                write: true,
                exec: true,
                iccm: false,
                dccm: true,
                mem_mapped_register: false,
                pristine: true,
            },
        );
        mem
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut mem = plain_memory();
        mem.write(0x100, &[0xEF, 0xBE, 0xAD, 0xDE]).unwrap();
        assert_eq!(mem.read(0x100, 4).unwrap(), vec![0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn mmio_mask_restricts_writes() {
        let mut mem = plain_memory();
        mem.set_page_attributes(
            0x1000,
            0x1000,
            PageAttributes {
                mapped: true,
                read: true,
                write: true,
                exec: false,
                iccm: false,
                dccm: false,
                mem_mapped_register: true,
                pristine: true,
            },
        );
        let mut mask = vec![0u8; 4096];
        mask[0] = 0x0F;
        mem.set_mmio_mask(0x1000, mask).unwrap();
        mem.write(0x1000, &[0xFF]).unwrap();
        assert_eq!(mem.read(0x1000, 1).unwrap(), vec![0x0F]);
    }

    #[test]
    fn unmapped_write_is_rejected() {
        let mut mem = Memory::new(1 << 20, 1 << 18, 1 << 12).unwrap();
        assert!(mem.write(0, &[1]).is_err());
    }

    #[test]
    fn region_boundary_detection() {
        let mem = plain_memory();
        assert!(mem.same_region(0x100, 4));
        let boundary = mem.region_size();
        assert!(!mem.same_region(boundary - 2, 4));
    }
}
