//! Debugger model commands: `dr`, `dp`, `db`, `dbt`

use super::{desc, num_arg};
use crate::cmd::registry::Registry;
use crate::cmd::{args, CmdError, CmdResult};
use crate::core::Core;

pub fn register(registry: &mut Registry) {
    registry.add(
        desc("dr", "[reg[=value]]", "show or set registers")
            .detail("dr* prints the registers as commands"),
        cmd_regs,
    );
    registry.add(desc("dp", "[pid]", "list threads or select one"), cmd_threads);
    registry.add(
        desc("db", "[addr]", "list or set breakpoints").detail("db- addr removes one"),
        cmd_breakpoint,
    );
    registry.add(desc("dbt", "", "show the backtrace"), cmd_backtrace);
}

fn cmd_regs(core: &mut Core, input: &str) -> CmdResult {
    let input = args::trim_ws(input);
    if input == "*" {
        let lines: Vec<String> = core
            .dbg
            .registers()
            .iter()
            .map(|r| format!("dr {}={:#x}", r.name, r.value))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    if input.is_empty() {
        let bits = core.config.get_i("asm.bits") as u32;
        let lines: Vec<String> = core
            .dbg
            .registers()
            .iter()
            .filter(|r| r.size == bits)
            .map(|r| format!("{} = {:#018x}", r.name, r.value))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    match input.split_once('=') {
        Some((name, value)) => {
            let value = core.num(value)?;
            core.dbg.reg_set(args::trim_ws(name), value)?;
        }
        None => {
            let value = core.dbg.reg_get(input)?;
            core.cons.println(&format!("{:#x}", value));
        }
    }
    Ok(0)
}

fn cmd_threads(core: &mut Core, input: &str) -> CmdResult {
    match num_arg(core, input)? {
        Some(pid) => {
            let pid = u32::try_from(pid).map_err(|_| CmdError::Invalid(format!("bad pid {}", pid)))?;
            core.dbg.select(pid)?;
        }
        None => {
            let current = core.dbg.pid();
            let lines: Vec<String> = core
                .dbg
                .threads()
                .iter()
                .map(|t| {
                    let mark = if Some(t.pid) == current { '*' } else { '-' };
                    format!("{} {} {}", mark, t.pid, t.name)
                })
                .collect();
            for line in lines {
                core.cons.println(&line);
            }
        }
    }
    Ok(0)
}

fn cmd_breakpoint(core: &mut Core, input: &str) -> CmdResult {
    if let Some(addr) = input.strip_prefix('-') {
        let addr = num_arg(core, addr)?.unwrap_or(core.offset);
        core.dbg.remove_breakpoint(addr)?;
        return Ok(0);
    }
    match num_arg(core, input)? {
        Some(addr) => core.dbg.set_breakpoint(addr)?,
        None => {
            let lines: Vec<String> = core
                .dbg
                .breakpoints()
                .iter()
                .map(|bp| format!("{:#x} {}", bp.address, if bp.enabled { "on" } else { "off" }))
                .collect();
            for line in lines {
                core.cons.println(&line);
            }
        }
    }
    Ok(0)
}

fn cmd_backtrace(core: &mut Core, _input: &str) -> CmdResult {
    let lines: Vec<String> = core
        .dbg
        .frames()
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} {:#x} bp={:#x} sp={:#x}", i, f.addr, f.bp, f.sp))
        .collect();
    for line in lines {
        core.cons.println(&line);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_roundtrip_through_commands() {
        let mut core = Core::default();
        core.cmd("dr rax=0x40");
        core.cmd("dr rax");
        assert_eq!(core.cons.take_output(), "0x40\n");
        core.cmd("dr rax=0");
        core.cmd("\"dr rax=0x99\"");
        core.cmd(".dr*");
        assert_eq!(core.dbg.reg_get("rax").unwrap(), 0x99);
        assert_eq!(core.cons.take_output(), "");
    }

    #[test]
    fn test_breakpoints() {
        let mut core = Core::default();
        core.cmd("db 0x401000");
        core.cmd("db");
        assert_eq!(core.cons.take_output(), "0x401000 on\n");
        core.cmd("db- 0x401000");
        assert!(core.dbg.breakpoints().is_empty());
        assert!(core.cmd("db- 0x401000") < 0);
    }
}
