//! Builtins - Leaf commands
//!
//! Small, plain commands the interpreter dispatches to. They only ever see
//! the text after their name; all `@`, `~`, `|` and `>` handling happened
//! before they run.

mod bin;
mod debug;
mod info;
mod print;
mod seek;
mod shell;

use super::help::CmdDescriptor;
use super::registry::Registry;
use super::{args, CmdError};
use crate::core::Core;

pub fn register_all(registry: &mut Registry) {
    info::register(registry);
    seek::register(registry);
    print::register(registry);
    debug::register(registry);
    bin::register(registry);
    shell::register(registry);
}

fn desc(cmd: &str, args: &str, summary: &str) -> CmdDescriptor {
    CmdDescriptor::new(cmd, args, summary)
}

/// Evaluate an optional numeric argument
fn num_arg(core: &mut Core, text: &str) -> Result<Option<u64>, CmdError> {
    let text = args::trim_ws(text);
    if text.is_empty() {
        return Ok(None);
    }
    core.num(text).map(Some)
}

/// Every word evaluated as a number
fn num_args(core: &mut Core, text: &str) -> Result<Vec<u64>, CmdError> {
    args::split(text).iter().map(|w| core.num(w)).collect()
}

/// Refuse `what` when the session is sandboxed
fn deny_in_sandbox(core: &Core, what: &str) -> Result<(), CmdError> {
    if core.is_sandboxed() {
        return Err(CmdError::Sandbox(format!("{} not allowed in sandbox mode", what)));
    }
    Ok(())
}
