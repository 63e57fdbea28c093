//! Harness-level error taxonomy, `SPEC_FULL.md` §7: everything that can go wrong loading a
//! program, parsing configuration, or walking a guest image, as opposed to `riscv-core`'s
//! architectural traps and simulator-internal configuration errors, which it handles itself.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse ELF image: {0}")]
    Elf(#[from] goblin::error::Error),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("malformed hex image at line {line}: {reason}")]
    Hex { line: usize, reason: String },

    #[error(transparent)]
    MemoryConfig(#[from] riscv_core::MemoryConfigError),

    #[error(transparent)]
    MemoryAccess(#[from] riscv_core::MemoryAccessError),

    #[error(
        "configured xlen is {configured}-bit but the ELF image is {found}-bit; refusing to load"
    )]
    XlenMismatch { configured: u32, found: u32 },

    #[error("ELF image has no symbol named {0:?}")]
    MissingSymbol(&'static str),
}

pub fn io_error(path: impl Into<PathBuf>, source: io::Error) -> HarnessError {
    HarnessError::Io { path: path.into(), source }
}
