//! Library half of the harness binary: configuration, image loaders, and trace output, kept
//! separate from `main.rs` so the ELF-load-then-run path can be exercised from an integration
//! test (`tests/`) without shelling out to the built binary.

pub mod config;
pub mod error;
pub mod loader;
pub mod trace;
