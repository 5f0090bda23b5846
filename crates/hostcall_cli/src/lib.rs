//! HOSTCALL demonstration host
//!
//! Registers a fixed set of host functions, instantiates a plugin with
//! them and calls a single export.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod functions;

pub use cli::{Cli, CliError, run};
