//! lanaudit daemon internals.
//!
//! Exposed as a library so integration tests can drive the orchestrator
//! pieces (dispatch loop, CLI assembly) without spawning a process.

pub mod cli;
pub mod logging;
pub mod orchestrator;
