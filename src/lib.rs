//! xds-gdb: a gdb wrapper that bridges the terminal to a native gdb or to a gdb executed by a
//! remote XDS agent.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod log;
pub mod scan;
pub mod session;
