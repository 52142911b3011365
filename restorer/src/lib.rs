//! Restoration-planning and execution-tree engine.
//!
//! This crate restores an image suffering multiple simultaneous degradations
//! by composing external, black-box restoration tools: it proposes an ordered
//! plan of subtasks, executes each subtask by trying candidate tools against a
//! quality gate, records every image variant in an execution tree, and rolls
//! back and replans when a subtask cannot be fixed. The architecture enforces
//! a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (tree arena, plan algebra,
//!   severity bucketing, tournaments). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (tool processes, oracle calls,
//!   filesystem state). Isolated behind traits to enable scripted fakes in
//!   tests.
//!
//! Orchestration modules ([`planner`], [`executor`], [`controller`],
//! [`session`]) coordinate core logic with I/O to implement CLI commands.

pub mod controller;
pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod planner;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
