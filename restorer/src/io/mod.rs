//! I/O helpers for the restoration engine.

pub mod backoff;
pub mod config;
pub mod experience;
pub mod media;
pub mod memory;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod tool;
pub mod workspace;
