//! Harness-level configuration: everything `riscv-core` itself has no opinion on (memory
//! geometry, which XLEN to instantiate, trace/logging toggles), loaded from a TOML file the way
//! the teacher's CLI takes flags, but collected into one `serde`-deserialized struct instead —
//! `spec.md` §6 describes these as harness responsibilities, not core ones.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::HarnessError;

/// Which `riscv_core::xlen::Xlen` marker type to instantiate `Hart` with. A runtime value since
/// the choice only matters at harness startup; `riscv-core` itself is monomorphized per width at
/// compile time (`SPEC_FULL.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XlenWidth {
    Rv32,
    Rv64,
}

impl XlenWidth {
    pub fn bits(self) -> u32 {
        match self {
            XlenWidth::Rv32 => 32,
            XlenWidth::Rv64 => 64,
        }
    }
}

fn default_xlen() -> XlenWidth {
    XlenWidth::Rv64
}

/// A comfortable size for the small bare-metal test images this harness targets, not a general-
/// purpose system's main memory: `trace.rs`'s diff-based tracing re-reads the whole region every
/// step (`DESIGN.md`), so a large default here would make `trace = true` impractically slow.
fn default_memory_size() -> u64 {
    1 << 20
}

fn default_region_size() -> u64 {
    1 << 16
}

fn default_page_size() -> u64 {
    4096
}

fn default_true() -> bool {
    true
}

/// `spec.md` §6's harness-facing knobs, collected into one struct. Any field the TOML file omits
/// falls back to the default a bare-metal RISC-V test program would expect.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HarnessConfig {
    pub xlen: XlenWidth,
    pub memory_size: u64,
    pub region_size: u64,
    pub page_size: u64,
    pub reset_pc: u64,
    /// `spec.md` §4.4: fixed NMI dispatch target, independent of `mtvec`.
    pub nmi_pc: u64,
    /// A nonzero write here terminates the run, `spec.md` §4.3/§6. `None` means the ELF's
    /// `tohost` symbol (if present) is used instead; explicit config always wins.
    pub to_host_addr: Option<u64>,
    pub con_io_addr: Option<u64>,
    pub max_instructions: Option<u64>,
    /// `spec.md` §6: emit one trace record per retired instruction.
    pub trace: bool,
    /// Whether the image is raw hex (`spec.md` §6 hex loader format) rather than ELF.
    pub hex_image: bool,
    pub fp_enabled: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            xlen: default_xlen(),
            memory_size: default_memory_size(),
            region_size: default_region_size(),
            page_size: default_page_size(),
            reset_pc: 0,
            nmi_pc: 0,
            to_host_addr: None,
            con_io_addr: None,
            max_instructions: None,
            trace: false,
            hex_image: false,
            fp_enabled: default_true(),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, HarnessError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let text = fs::read_to_string(path).map_err(|e| crate::error::io_error(path, e))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_empty_toml() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config.xlen, XlenWidth::Rv64);
        assert_eq!(config.memory_size, default_memory_size());
        assert!(!config.trace);
    }

    #[test]
    fn overrides_one_field_and_keeps_the_rest_default() {
        let config = HarnessConfig::from_toml_str("xlen = \"rv32\"\nto_host_addr = 4096\n").unwrap();
        assert_eq!(config.xlen, XlenWidth::Rv32);
        assert_eq!(config.to_host_addr, Some(4096));
        assert_eq!(config.memory_size, default_memory_size());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result = HarnessConfig::from_toml_str("bogus_field = 1\n");
        assert!(result.is_err());
    }
}
