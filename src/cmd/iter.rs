//! Iter - The `@@` and `@@@` iteration engine
//!
//! An iterator expands into a list of targets first; the list is a
//! snapshot, so commands run by the loop may change flags or functions
//! without affecting which targets are visited. Ranges are the exception:
//! they are stepped as the loop goes. The seek, block size and selected
//! thread are restored when the loop ends.

use super::{args, registry, CmdError, CmdResult};
use crate::analysis::loader::flag_name;
use crate::core::flags::compile_glob;
use crate::core::{Core, BLOCK_MAX};

pub const ITER_HELP: &str = "\
Usage: cmd @@ [iterator]
| cmd @@ glob*...   run cmd at every flag matching the globs
| cmd @@=a b c      run cmd at each listed address
| cmd @@c:cmd2      run cmd at every address printed by cmd2
| cmd @@.file       run cmd at every address listed in file
| cmd @@k query     run cmd at every address returned by an sdb query
| cmd @@s:f t s     run cmd from f to t stepping s (block size s)
| cmd @@b           run cmd at every basic block of the function
| cmd @@i           run cmd at every instruction of the function
| cmd @@f[:name]    run cmd at every function (names containing name)
| cmd @@t           run cmd on every thread
| cmd @@dbt[abs]    run cmd at every backtrace address, bp or sp
| cmd @@/str        run cmd at every hit of a search
";

pub const ITER3_HELP: &str = "\
Usage: cmd @@@ [type]
| cmd @@@=a s a s   address and size pairs
| cmd @@@c:cmd2     address and size pairs printed by cmd2
| cmd @@@m          io maps of the current file descriptor
| cmd @@@M          debugger memory maps
| cmd @@@t          threads
| cmd @@@r          registers of asm.bits size
| cmd @@@i          imports
| cmd @@@S          sections
| cmd @@@s          symbols
| cmd @@@st         strings
| cmd @@@f[:glob]   flags
| cmd @@@F[:glob]   functions
| cmd @@@b          basic blocks of the current function
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    Addr,
    Bp,
    Sp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IterSpec {
    Flags(Vec<String>),
    Exprs(String),
    CmdOutput(String),
    File(String),
    Sdb(String),
    Range(String),
    Blocks,
    Instrs,
    Functions(Option<String>),
    Threads,
    Backtrace(FrameField),
    Hits(String),
    Pairs(String),
    PairsFromCmd(String),
    IoMaps,
    DebugMaps,
    ThreadSelect,
    Registers,
    Imports,
    Sections,
    Symbols,
    Strings,
    FlagGlob(Option<String>),
    FunctionGlob(Option<String>),
}

/// One visit of the loop
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub addr: u64,
    pub size: Option<u64>,
    /// Printed before the command output
    pub header: Option<String>,
    pub thread: Option<u32>,
}

impl Target {
    fn at(addr: u64) -> Self {
        Self {
            addr,
            size: None,
            header: None,
            thread: None,
        }
    }

    fn sized(addr: u64, size: u64) -> Self {
        Self {
            size: (size > 0).then_some(size),
            ..Self::at(addr)
        }
    }
}

impl IterSpec {
    /// Parse the text after `@@` (level 2) or `@@@` (level 3). `None` is a
    /// help request.
    pub fn parse(level: u8, body: &str) -> Result<Option<IterSpec>, CmdError> {
        if args::trim_ws(body) == "?" {
            return Ok(None);
        }
        if level >= 3 {
            return parse_typed(body).map(Some);
        }
        let rest = |prefix: &str| args::trim_ws(&body[prefix.len()..]).to_string();
        let trimmed = args::trim_ws(body);
        let spec = if body.starts_with('=') {
            IterSpec::Exprs(rest("="))
        } else if body.starts_with("c:") {
            IterSpec::CmdOutput(rest("c:"))
        } else if body.starts_with('.') {
            IterSpec::File(args::unquote(&body[1..]))
        } else if body.starts_with('k') {
            IterSpec::Sdb(rest("k"))
        } else if body.starts_with("s:") {
            IterSpec::Range(rest("s:"))
        } else if trimmed == "b" && body.starts_with('b') {
            IterSpec::Blocks
        } else if trimmed == "i" && body.starts_with('i') {
            IterSpec::Instrs
        } else if body.starts_with('f') && (trimmed == "f" || body.starts_with("f:")) {
            IterSpec::Functions(body.strip_prefix("f:").map(|s| args::trim_ws(s).to_string()))
        } else if trimmed == "t" && body.starts_with('t') {
            IterSpec::Threads
        } else if let Some(kind) = body.strip_prefix("dbt") {
            IterSpec::Backtrace(match args::trim_ws(kind) {
                "" | "a" => FrameField::Addr,
                "b" => FrameField::Bp,
                "s" => FrameField::Sp,
                other => {
                    return Err(CmdError::Syntax(format!("unknown backtrace field '{}'", other)))
                }
            })
        } else if body.starts_with('/') {
            IterSpec::Hits(rest("/"))
        } else {
            let globs = args::split(body);
            if globs.is_empty() {
                return Err(CmdError::Syntax("missing iterator after '@@'".into()));
            }
            IterSpec::Flags(globs)
        };
        Ok(Some(spec))
    }

    pub fn help(level: u8) -> &'static str {
        if level >= 3 {
            ITER3_HELP
        } else {
            ITER_HELP
        }
    }
}

fn parse_typed(body: &str) -> Result<IterSpec, CmdError> {
    let body = body.trim_start_matches([' ', '\t']);
    let trimmed = args::trim_ws(body);
    let glob = |text: &str| {
        text.strip_prefix(':')
            .map(|g| args::trim_ws(g).to_string())
            .filter(|g| !g.is_empty())
    };
    let spec = if let Some(pairs) = body.strip_prefix('=') {
        IterSpec::Pairs(args::trim_ws(pairs).to_string())
    } else if let Some(cmd) = body.strip_prefix("c:") {
        IterSpec::PairsFromCmd(args::trim_ws(cmd).to_string())
    } else {
        match trimmed {
            "m" => IterSpec::IoMaps,
            "M" => IterSpec::DebugMaps,
            "t" => IterSpec::ThreadSelect,
            "r" => IterSpec::Registers,
            "i" => IterSpec::Imports,
            "S" => IterSpec::Sections,
            "s" => IterSpec::Symbols,
            "st" => IterSpec::Strings,
            "b" => IterSpec::Blocks,
            _ if trimmed.starts_with('f') => IterSpec::FlagGlob(glob(&trimmed[1..])),
            _ if trimmed.starts_with('F') => IterSpec::FunctionGlob(glob(&trimmed[1..])),
            other => {
                return Err(CmdError::Syntax(format!("unknown '@@@' iterator '{}'", other)))
            }
        }
    };
    Ok(spec)
}

fn eval_words(core: &mut Core, text: &str) -> Vec<u64> {
    let mut out = Vec::new();
    for word in text.split_whitespace() {
        match core.num(word) {
            Ok(addr) => out.push(addr),
            Err(e) => log::warn!("iter: skipping '{}': {}", word, e),
        }
    }
    out
}

fn eval_pairs(core: &mut Core, text: &str) -> Result<Vec<Target>, CmdError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() % 2 != 0 {
        return Err(CmdError::Syntax("expected address and size pairs".into()));
    }
    words
        .chunks(2)
        .map(|pair| Ok(Target::sized(core.num(pair[0])?, core.num(pair[1])?)))
        .collect()
}

fn function_blocks(core: &Core) -> Result<Vec<crate::analysis::BasicBlock>, CmdError> {
    core.anal
        .function_at(core.offset)
        .map(|f| f.sorted_blocks())
        .ok_or_else(|| CmdError::Invalid(format!("No function at {:#x}", core.offset)))
}

fn glob_error(e: globset::Error) -> CmdError {
    CmdError::Invalid(format!("Invalid glob: {}", e))
}

/// Targets of one `@@`/`@@@` loop
#[derive(Debug)]
pub enum Targets {
    List(std::vec::IntoIter<Target>),
    /// `from..to` by `step`, produced on demand
    Range { next: Option<u64>, to: u64, step: u64 },
}

impl Iterator for Targets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        match self {
            Targets::List(list) => list.next(),
            Targets::Range { next, to, step } => {
                let addr = next.filter(|&addr| addr < *to)?;
                *next = addr.checked_add(*step);
                Some(Target::sized(addr, *step))
            }
        }
    }
}

/// Expand an iterator into its targets
pub fn targets(core: &mut Core, spec: &IterSpec) -> Result<Targets, CmdError> {
    let list = match spec {
        IterSpec::Flags(globs) => {
            let mut out = Vec::new();
            for glob in globs {
                for flag in core.flags.matching(glob).map_err(glob_error)? {
                    out.push(Target::at(flag.offset));
                }
            }
            out
        }
        IterSpec::Exprs(text) => eval_words(core, text).into_iter().map(Target::at).collect(),
        IterSpec::CmdOutput(cmd) => {
            let out = core.cmd_str(cmd)?;
            eval_words(core, &out).into_iter().map(Target::at).collect()
        }
        IterSpec::File(path) => {
            if core.is_sandboxed() {
                return Err(CmdError::Sandbox(
                    "@@. is not available in sandbox mode".into(),
                ));
            }
            let text = std::fs::read_to_string(path)
                .map_err(|e| CmdError::Resource(format!("Cannot open '{}': {}", path, e)))?;
            let mut out = Vec::new();
            for line in text.lines() {
                let line = line.split('#').next().unwrap_or("");
                out.extend(eval_words(core, line).into_iter().map(Target::at));
            }
            out
        }
        IterSpec::Sdb(query) => {
            let result = core.sdb.query(query);
            let values: Vec<String> = result
                .lines()
                .map(|l| l.rsplit('=').next().unwrap_or(l).trim().to_string())
                .collect();
            eval_words(core, &values.join(" "))
                .into_iter()
                .map(Target::at)
                .collect()
        }
        IterSpec::Range(text) => {
            let words = args::split(text);
            let [from, to, step] = words.as_slice() else {
                return Err(CmdError::Syntax("expected @@s:from to step".into()));
            };
            let (from, to, step) = (core.num(from)?, core.num(to)?, core.num(step)?);
            if step == 0 {
                return Err(CmdError::Invalid("Step must be greater than zero".into()));
            }
            return Ok(Targets::Range {
                next: Some(from),
                to,
                step,
            });
        }
        IterSpec::Blocks => function_blocks(core)?
            .into_iter()
            .map(|bb| Target::sized(bb.addr, bb.size))
            .collect(),
        IterSpec::Instrs => function_blocks(core)?
            .into_iter()
            .flat_map(|bb| bb.instrs)
            .map(Target::at)
            .collect(),
        IterSpec::Functions(filter) => core
            .anal
            .functions()
            .iter()
            .filter(|f| filter.as_ref().map_or(true, |s| f.name.contains(s.as_str())))
            .map(|f| Target::sized(f.addr, f.size))
            .collect(),
        IterSpec::Threads => core
            .dbg
            .threads()
            .iter()
            .map(|t| Target {
                header: Some(format!("# PID {}\n", t.pid)),
                thread: Some(t.pid),
                ..Target::at(core.offset)
            })
            .collect(),
        IterSpec::ThreadSelect => core
            .dbg
            .threads()
            .iter()
            .map(|t| Target {
                thread: Some(t.pid),
                ..Target::at(core.offset)
            })
            .collect(),
        IterSpec::Backtrace(field) => core
            .dbg
            .frames()
            .iter()
            .map(|f| {
                Target::at(match field {
                    FrameField::Addr => f.addr,
                    FrameField::Bp => f.bp,
                    FrameField::Sp => f.sp,
                })
            })
            .collect(),
        IterSpec::Hits(what) => {
            let prefix = core.config.get("search.prefix").unwrap_or("hit").to_string();
            let pattern = format!("{}*", prefix);
            core.flags.unset_glob(&pattern).map_err(glob_error)?;
            core.cmd_str(&format!("/ {}", what))?;
            core.flags
                .matching(&pattern)
                .map_err(glob_error)?
                .into_iter()
                .map(|f| Target::sized(f.offset, f.size))
                .collect()
        }
        IterSpec::Pairs(text) => eval_pairs(core, text)?,
        IterSpec::PairsFromCmd(cmd) => {
            let out = core.cmd_str(cmd)?;
            eval_pairs(core, &out)?
        }
        IterSpec::IoMaps => match core.io.current_fd() {
            Some(fd) => core
                .io
                .maps_of(fd)
                .into_iter()
                .map(|m| Target::sized(m.from, m.size))
                .collect(),
            None => Vec::new(),
        },
        IterSpec::DebugMaps => core
            .dbg
            .maps()
            .iter()
            .map(|m| Target::sized(m.base_address, m.size))
            .collect(),
        IterSpec::Registers => {
            let bits = core.config.get_i("asm.bits");
            core.dbg
                .registers()
                .iter()
                .filter(|r| r.size as u64 == bits)
                .map(|r| Target {
                    header: Some(format!("{}: ", r.name)),
                    ..Target::at(r.value)
                })
                .collect()
        }
        IterSpec::Imports => {
            let bin = core.bin.as_ref();
            bin.map(|b| b.imports.as_slice())
                .unwrap_or(&[])
                .iter()
                .filter_map(|imp| {
                    core.flags
                        .get(&format!("sym.imp.{}", flag_name(&imp.name)))
                        .map(|f| f.offset)
                        .or(imp.address)
                })
                .map(Target::at)
                .collect()
        }
        IterSpec::Sections => core
            .bin
            .iter()
            .flat_map(|b| b.sections.iter())
            .map(|s| Target::sized(s.virtual_address, s.virtual_size))
            .collect(),
        IterSpec::Symbols => core
            .bin
            .iter()
            .flat_map(|b| b.symbols.iter())
            .map(|s| Target::sized(s.address, s.size))
            .collect(),
        IterSpec::Strings => core
            .bin
            .iter()
            .flat_map(|b| b.strings.iter())
            .map(|s| Target::sized(s.address, s.size))
            .collect(),
        IterSpec::FlagGlob(glob) => {
            let flags = match glob {
                Some(glob) => core.flags.matching(glob).map_err(glob_error)?,
                None => core.flags.visible().cloned().collect(),
            };
            flags
                .into_iter()
                .map(|f| Target::sized(f.offset, f.size))
                .collect()
        }
        IterSpec::FunctionGlob(glob) => {
            let matcher = glob.as_deref().map(compile_glob).transpose().map_err(glob_error)?;
            core.anal
                .functions()
                .iter()
                .filter(|f| matcher.as_ref().map_or(true, |m| m.is_match(&f.name)))
                .map(|f| Target::sized(f.addr, f.size))
                .collect()
        }
    };
    Ok(Targets::List(list.into_iter()))
}

/// Run `cmd` once per target of `spec`
pub fn for_each(core: &mut Core, spec: &IterSpec, cmd: &str) -> CmdResult {
    let list = targets(core, spec)?;
    log::info!("iter: '{}' over {:?}", cmd, spec);
    let (offset, blocksize) = (core.offset, core.blocksize);
    let pid = core.dbg.pid();
    let mut status = Ok(0);

    for target in list {
        if core.is_interrupted() {
            log::info!("iter: interrupted");
            break;
        }
        if let Some(thread) = target.thread {
            if let Err(e) = core.dbg.select(thread) {
                core.report(&e.into());
                continue;
            }
        }
        core.seek(target.addr);
        if let Some(size) = target.size {
            if let Err(e) = core.set_blocksize(size.min(BLOCK_MAX)) {
                core.report(&e);
                continue;
            }
        }
        if let Some(header) = &target.header {
            core.cons.print(header);
        }
        core.cons.push();
        let result = registry::dispatch(core, cmd);
        let out = core.cons.pop();
        core.cons.print(&out);
        match result {
            Err(e) if e.is_fatal() => {
                status = Err(e);
                break;
            }
            Err(e) => core.report(&e),
            Ok(_) => {}
        }
        core.yield_tasks();
    }

    core.offset = offset;
    core.blocksize = blocksize;
    core.dbg.restore_selection(pid);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BasicBlock, Function};
    use crate::cmd::alias::AliasValue;

    fn parse(level: u8, body: &str) -> IterSpec {
        IterSpec::parse(level, body).unwrap().unwrap()
    }

    #[test]
    fn test_parse_level2() {
        assert_eq!(parse(2, " sym.* str.*"), IterSpec::Flags(vec!["sym.*".into(), "str.*".into()]));
        assert_eq!(parse(2, "=1 2"), IterSpec::Exprs("1 2".into()));
        assert_eq!(parse(2, "f"), IterSpec::Functions(None));
        assert_eq!(parse(2, "f:ma"), IterSpec::Functions(Some("ma".into())));
        assert_eq!(parse(2, " f*"), IterSpec::Flags(vec!["f*".into()]));
        assert_eq!(parse(2, "dbts"), IterSpec::Backtrace(FrameField::Sp));
        assert_eq!(parse(2, "b"), IterSpec::Blocks);
        assert!(IterSpec::parse(2, "?").unwrap().is_none());
        assert!(IterSpec::parse(2, "  ").is_err());
    }

    #[test]
    fn test_parse_level3() {
        assert_eq!(parse(3, "st"), IterSpec::Strings);
        assert_eq!(parse(3, " s"), IterSpec::Symbols);
        assert_eq!(parse(3, "f:sym.*"), IterSpec::FlagGlob(Some("sym.*".into())));
        assert_eq!(parse(3, "F"), IterSpec::FunctionGlob(None));
        assert!(IterSpec::parse(3, "zz").is_err());
    }

    #[test]
    fn test_range_sets_blocksize() {
        let mut core = Core::default();
        let list: Vec<Target> = targets(&mut core, &parse(2, "s:0x10 0x30 0x10"))
            .unwrap()
            .collect();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].addr, 0x20);
        assert_eq!(list[1].size, Some(0x10));

        let mut top = targets(&mut core, &parse(2, "s:0xfffffffffffffff0 0xffffffffffffffff 8")).unwrap();
        assert_eq!(top.next().map(|t| t.addr), Some(0xfffffffffffffff0));
        assert_eq!(top.next().map(|t| t.addr), Some(0xfffffffffffffff8));
        assert!(top.next().is_none());
    }

    fn stop_here(core: &mut Core, _input: &str) -> CmdResult {
        core.cons.println(&format!("{:#x}", core.offset));
        core.interrupt();
        Ok(0)
    }

    #[test]
    fn test_huge_range_is_interruptible() {
        let mut core = Core::default();
        core.registry.register("stop", stop_here);
        core.seek(0x99);
        for_each(&mut core, &parse(2, "s:0 0xffffffffffffffff 1"), "stop").unwrap();
        assert_eq!(core.cons.take_output(), "0x0\n");
        assert_eq!(core.offset, 0x99);
    }

    #[test]
    fn test_range_step_above_block_max() {
        let mut core = Core::default();
        let step = BLOCK_MAX * 2;
        for_each(&mut core, &parse(2, &format!("s:0 {:#x} {:#x}", step * 2, step)), "b").unwrap();
        assert_eq!(core.cons.take_output(), format!("{0:#x}\n{0:#x}\n", BLOCK_MAX));
        assert_eq!(core.cons.take_errors(), "");
        assert_eq!(core.blocksize, 0x100);
    }

    #[test]
    fn test_failing_target_is_reported_and_skipped() {
        let mut core = Core::default();
        core.seek(0x99);
        core.flags.set("t.a", 0x10, 1);
        core.flags.set("t.b", 0x20, 1);
        core.flags.set("t.c", 0x30, 1);
        for_each(&mut core, &parse(2, " t.*"), "so 1").unwrap();
        assert_eq!(core.cons.take_errors().matches("[!]").count(), 3);
        assert_eq!(core.offset, 0x99);
    }

    #[test]
    fn test_for_each_restores_state() {
        let mut core = Core::default();
        core.seek(0x99);
        core.flags.set("a", 0x10, 1);
        core.flags.set("b", 0x20, 1);
        for_each(&mut core, &parse(2, " *"), "?v $$").unwrap();
        assert_eq!(core.cons.take_output(), "0x10\n0x20\n");
        assert_eq!(core.offset, 0x99);
    }

    #[test]
    fn test_snapshot_ignores_new_flags() {
        let mut core = Core::default();
        core.flags.set("loop.a", 0x10, 1);
        core.aliases
            .set("add", AliasValue::Raw("f loop.b;?v $$".into()));
        for_each(&mut core, &parse(2, " loop.*"), "$add").unwrap();
        assert_eq!(core.cons.take_output(), "0x10\n");
        assert!(core.flags.get("loop.b").is_some());
    }

    #[test]
    fn test_blocks_of_current_function() {
        let mut core = Core::default();
        core.anal.add(Function {
            name: "main".into(),
            addr: 0x100,
            size: 0x10,
            blocks: vec![
                BasicBlock {
                    addr: 0x108,
                    size: 8,
                    instrs: vec![0x108],
                },
                BasicBlock {
                    addr: 0x100,
                    size: 8,
                    instrs: vec![0x100, 0x104],
                },
            ],
        });
        core.seek(0x100);
        let addrs: Vec<u64> = targets(&mut core, &IterSpec::Instrs)
            .unwrap()
            .map(|t| t.addr)
            .collect();
        assert_eq!(addrs, vec![0x100, 0x104, 0x108]);
        core.seek(0x500);
        assert!(targets(&mut core, &IterSpec::Blocks).is_err());
    }
}
