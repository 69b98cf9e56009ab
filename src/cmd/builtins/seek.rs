//! Session commands: seek, block size, config, flags, functions, sdb

use super::{desc, num_arg, num_args};
use crate::analysis::{BasicBlock, Function};
use crate::cmd::registry::Registry;
use crate::cmd::{args, CmdError, CmdResult};
use crate::core::Core;

pub fn register(registry: &mut Registry) {
    registry.add(
        desc("s", "[addr]", "seek to address or print the current one")
            .detail("s+ n / s- n move relative to the current offset"),
        cmd_seek,
    );
    registry.add(desc("0x", "addr", "seek to a hex address"), cmd_seek_hex);
    registry.add(desc("so", "[n]", "seek n instructions forward or back"), cmd_seek_instr);
    registry.add(desc("b", "[size]", "get or set the block size"), cmd_blocksize);
    registry.add(
        desc("e", "[key[=value]]", "list, get or set configuration"),
        cmd_eval,
    );
    registry.add(desc("q", "", "quit"), cmd_quit);
    registry.add(
        desc("f", "[name [size [addr]]]", "list or set flags")
            .detail("f-name removes a flag, f-glob* removes matching ones"),
        cmd_flag,
    );
    registry.add(
        desc("fs", "[name]", "list or select flagspaces")
            .detail("fs+name pushes, fs- pops, fs * selects all"),
        cmd_flagspace,
    );
    registry.add(
        desc("af", "[name addr size [bb...]]", "list or declare functions")
            .detail("bb is addr:size[:instr,...]"),
        cmd_function,
    );
    registry.add(desc("k", "[ns/]key[=value] | *", "query the session database"), cmd_sdb);
}

fn cmd_seek(core: &mut Core, input: &str) -> CmdResult {
    let input = args::trim_ws(input);
    if input.is_empty() {
        core.cons.println(&format!("{:#x}", core.offset));
        return Ok(0);
    }
    let addr = if let Some(delta) = input.strip_prefix('+') {
        core.offset.wrapping_add(core.num(args::trim_ws(delta))?)
    } else if let Some(delta) = input.strip_prefix('-') {
        core.offset.wrapping_sub(core.num(args::trim_ws(delta))?)
    } else {
        core.num(input)?
    };
    core.seek(addr);
    Ok(0)
}

fn cmd_seek_hex(core: &mut Core, input: &str) -> CmdResult {
    let addr = core.num(&format!("0x{}", args::trim_ws(input)))?;
    core.seek(addr);
    Ok(0)
}

fn cmd_seek_instr(core: &mut Core, input: &str) -> CmdResult {
    let input = args::trim_ws(input);
    let delta = if input.is_empty() {
        1
    } else {
        core.num_signed(input)?
    };
    let addr = core
        .anal
        .instr_relative(core.offset, delta)
        .ok_or_else(|| CmdError::Invalid(format!("no instruction {} away from {:#x}", delta, core.offset)))?;
    core.seek(addr);
    Ok(0)
}

fn cmd_blocksize(core: &mut Core, input: &str) -> CmdResult {
    match num_arg(core, input)? {
        Some(size) => {
            core.set_blocksize(size)?;
        }
        None => core.cons.println(&format!("{:#x}", core.blocksize)),
    }
    Ok(0)
}

fn cmd_eval(core: &mut Core, input: &str) -> CmdResult {
    let input = args::trim_ws(input);
    if input.is_empty() {
        let lines: Vec<String> = core
            .config
            .keys()
            .map(|k| format!("{} = {}", k, core.config.get(k).unwrap_or("")))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    if let Some(key) = input.strip_suffix('?') {
        let key = args::trim_ws(key);
        let text = core
            .config
            .desc(key)
            .ok_or_else(|| CmdError::Invalid(format!("Unknown config key '{}'", key)))?;
        core.cons.println(text);
        return Ok(0);
    }
    match input.split_once('=') {
        Some((key, value)) => {
            core.config.set(args::trim_ws(key), &args::unquote(value))?;
        }
        None => {
            let value = core
                .config
                .get(input)
                .ok_or_else(|| CmdError::Invalid(format!("Unknown config key '{}'", input)))?
                .to_string();
            core.cons.println(&value);
        }
    }
    Ok(0)
}

fn cmd_quit(core: &mut Core, _input: &str) -> CmdResult {
    log::info!("quit requested");
    core.quit = true;
    Ok(0)
}

fn cmd_flag(core: &mut Core, input: &str) -> CmdResult {
    if let Some(name) = input.strip_prefix('-') {
        let name = args::trim_ws(name);
        if name.contains('*') {
            let removed = core
                .flags
                .unset_glob(name)
                .map_err(|e| CmdError::Invalid(format!("bad glob '{}': {}", name, e)))?;
            log::debug!("removed {} flags matching {}", removed, name);
        } else if !core.flags.unset(name) {
            return Err(CmdError::Handler(format!("no flag named '{}'", name)));
        }
        return Ok(0);
    }
    if args::trim_ws(input) == "*" {
        let lines: Vec<String> = core
            .flags
            .visible()
            .map(|f| format!("f {} {} {:#x}", f.name, f.size, f.offset))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    let words = args::split(input);
    let Some((name, rest)) = words.split_first() else {
        let lines: Vec<String> = core
            .flags
            .visible()
            .map(|f| format!("{:#x} {} {}", f.offset, f.size, f.name))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    };
    let size = match rest.first() {
        Some(w) => core.num(w)?,
        None => 1,
    };
    let addr = match rest.get(1) {
        Some(w) => core.num(w)?,
        None => core.offset,
    };
    core.flags.set(name, addr, size);
    Ok(0)
}

fn cmd_flagspace(core: &mut Core, input: &str) -> CmdResult {
    let input = args::trim_ws(input);
    if input.is_empty() {
        let current = core.flags.space().map(str::to_string);
        for space in core.flags.spaces() {
            let mark = if current.as_deref() == Some(space.as_str()) { '*' } else { '.' };
            core.cons.println(&format!("{} {}", mark, space));
        }
        return Ok(0);
    }
    if let Some(name) = input.strip_prefix('+') {
        core.flags.space_push(args::trim_ws(name));
    } else if input == "-" {
        if !core.flags.space_pop() {
            return Err(CmdError::Handler("flagspace stack is empty".into()));
        }
    } else {
        core.flags.space_set(input);
    }
    Ok(0)
}

fn cmd_function(core: &mut Core, input: &str) -> CmdResult {
    if let Some(addr) = input.strip_prefix('-') {
        let addr = num_arg(core, addr)?.unwrap_or(core.offset);
        if !core.anal.remove_at(addr) {
            return Err(CmdError::Handler(format!("no function at {:#x}", addr)));
        }
        return Ok(0);
    }
    let words = args::split(input);
    if words.is_empty() {
        let lines: Vec<String> = core
            .anal
            .functions()
            .iter()
            .map(|f| format!("{:#x} {} {} {}", f.addr, f.size, f.blocks.len(), f.name))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    if words.len() < 3 {
        return Err(CmdError::Invalid("usage: af name addr size [bb...]".into()));
    }
    let addr = core.num(&words[1])?;
    let size = core.num(&words[2])?;
    let mut blocks = Vec::new();
    for spec in &words[3..] {
        blocks.push(parse_block(core, spec)?);
    }
    if blocks.is_empty() {
        blocks.push(BasicBlock {
            addr,
            size,
            instrs: vec![addr],
        });
    }
    core.anal.add(Function {
        name: words[0].clone(),
        addr,
        size,
        blocks,
    });
    Ok(0)
}

/// `addr:size[:instr,instr...]`
fn parse_block(core: &mut Core, spec: &str) -> Result<BasicBlock, CmdError> {
    let mut parts = spec.splitn(3, ':');
    let (Some(addr), Some(size)) = (parts.next(), parts.next()) else {
        return Err(CmdError::Invalid(format!("bad basic block '{}'", spec)));
    };
    let addr = core.num(addr)?;
    let size = core.num(size)?;
    let mut instrs = match parts.next() {
        Some(list) => num_args(core, &list.replace(',', " "))?,
        None => vec![addr],
    };
    instrs.sort_unstable();
    Ok(BasicBlock { addr, size, instrs })
}

fn cmd_sdb(core: &mut Core, input: &str) -> CmdResult {
    let out = core.sdb.query(args::trim_ws(input));
    if !out.is_empty() {
        core.cons.print(&out);
        if !out.ends_with('\n') {
            core.cons.print("\n");
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_forms() {
        let mut core = Core::default();
        core.cmd("s 0x100");
        core.cmd("s+ 0x10");
        assert_eq!(core.offset, 0x110);
        core.cmd("0x2000");
        assert_eq!(core.offset, 0x2000);
        core.cmd("s");
        assert_eq!(core.cons.take_output(), "0x2000\n");
    }

    #[test]
    fn test_flags_and_spaces() {
        let mut core = Core::default();
        core.cmd("fs+ syms");
        core.cmd("f sym.main 4 0x400");
        core.cmd("fs-");
        core.cmd("f other");
        assert_eq!(core.flags.get("sym.main").unwrap().space.as_deref(), Some("syms"));
        core.cmd("fs syms");
        core.cmd("f");
        assert_eq!(core.cons.take_output(), "0x400 4 sym.main\n");
        core.cmd("f-sym.*");
        assert!(core.flags.get("sym.main").is_none());
    }

    #[test]
    fn test_declare_function() {
        let mut core = Core::default();
        core.cmd("af main 0x100 0x10 0x100:8:0x100,0x104 0x108:8");
        let func = core.anal.function_at(0x10c).unwrap();
        assert_eq!(func.blocks.len(), 2);
        core.cmd("s 0x100");
        core.cmd("so 2");
        assert_eq!(core.offset, 0x108);
    }

    #[test]
    fn test_instruction_seek_out_of_range() {
        let mut core = Core::default();
        core.cmd("af f 0x100 0x10 0x100:0x10:0x100,0x104");
        core.cmd("s 0x104");
        for line in ["so -0x8000000000000000", "so 0x7fffffffffffffff", "so 0x8000000000000000"] {
            assert!(core.cmd(line) < 0, "{}", line);
        }
        assert_eq!(core.offset, 0x104);
        core.cmd("so -1");
        assert_eq!(core.offset, 0x100);
    }

    #[test]
    fn test_eval_config() {
        let mut core = Core::default();
        core.cmd("e asm.bits=32");
        core.cmd("e asm.bits");
        assert_eq!(core.cons.take_output(), "32\n");
        assert!(core.cmd("e no.such=1") < 0);
    }
}
