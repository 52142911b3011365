//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod arena;
pub mod plan;
pub mod selector;
pub mod tournament;
pub mod types;
