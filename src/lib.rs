//! pldbg - breakpoint coordination for cooperating debugged processes
//!
//! This library keeps breakpoints in a per-process Local table and a Shared
//! table visible to a whole process group, and implements the handshake
//! that attaches a debugger proxy to a target that hit one.

pub mod cli;
pub mod commands;
pub mod common;
pub mod coordinator;
pub mod ipc;
pub mod proxy;
pub mod registry;
pub mod target;
pub mod wire;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use coordinator::Coordinator;
pub use registry::{Breakpoint, BreakpointData, BreakpointKey, Identity, Location, Scope};
pub use target::Target;
