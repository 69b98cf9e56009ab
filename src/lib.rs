//! Fission command interpreter
//!
//! An r2-style command language over a small analysis session: seek, flags,
//! IO maps, a debugger model and binary info. Two interchangeable front ends
//! (a step-wise parser and a pest grammar) feed the same executor.

pub mod analysis;
pub mod cmd;
pub mod core;
pub mod ui;

pub use crate::cmd::{CmdError, CmdResult, ParserKind};
pub use crate::core::{Core, CoreOptions};
