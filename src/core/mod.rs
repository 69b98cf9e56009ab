//! Core module - Session state and the substrate commands operate on
//!
//! Configuration, console, flags, IO, the debugger model, sdb, tasks and
//! the numeric evaluator. [`Core`] ties them together.

pub mod config;
pub mod cons;
pub mod debugger;
pub mod flags;
pub mod grep;
pub mod memory;
pub mod num;
pub mod sdb;
pub mod session;
pub mod tasks;

// Re-export common types
pub use config::{Config, ConfigError};
pub use cons::Console;
pub use debugger::{DebugError, Debugger};
pub use flags::{Flag, Flags};
pub use grep::Grep;
pub use memory::{Io, MemoryError, MemoryProtection};
pub use num::NumError;
pub use session::{Core, CoreOptions, BLOCK_MAX};
