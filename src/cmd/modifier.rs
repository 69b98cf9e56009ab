//! Modifier - Temporary `@` context changes
//!
//! Each `@` clause changes some piece of session state for the duration of
//! one command. Applying a clause records how to undo it in a
//! [`ModifierFrame`]; the frame is always unwound in reverse order, whether
//! the command succeeded or not.

use super::iter::IterSpec;
use super::{args, CmdError, CmdResult};
use crate::core::config::{ConfigHold, RANGE_KEYS};
use crate::core::memory::MemoryProtection;
use crate::core::num;
use crate::core::Core;

pub const MODIFIER_HELP: &str = "\
Usage: [.][#]<cmd>[*] [`cmd`] [@ addr] [~grep] [|syscmd] [>[>]file]
| @ addr[!size]   temporary seek (+/- relative to the current offset)
| @%K=V           set environment variable K for this command
| @..tail         seek to the offset with its low digits replaced
| @...tail        block size up to the tail address
| @(from to)      temporary from/to for the range config keys
| @a:arch[:bits]  temporary arch and bits
| @b:bits         temporary asm.bits
| @B:nth          nth instruction of the current basic block
| @e:k=v,k=v      temporary config values
| @f:file         temporary buffer with the file contents
| @F:space        temporary flagspace
| @i:nth          nth instruction from the current one
| @k:query        seek to the value of an sdb query
| @o:fd           temporary current file descriptor
| @r:reg          seek to a register value
| @s:string       temporary buffer with the string
| @x:hexpairs     temporary buffer with the bytes
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekKind {
    Absolute,
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Seek {
        expr: String,
        kind: SeekKind,
        size: Option<String>,
    },
    Env {
        key: String,
        value: String,
    },
    SeekTail(String),
    BlockTail(String),
    FromTo(String, String),
    Arch(String),
    Bits(String),
    BlockInstr(String),
    Eval(String),
    File(String),
    FlagSpace(String),
    Instr(String),
    Kuery(String),
    Fd(String),
    Register(String),
    Str(String),
    Hex(String),
}

/// A parsed `@` clause
#[derive(Debug, Clone, PartialEq)]
pub enum ModClause {
    Apply(Modifier),
    Help,
}

impl Modifier {
    /// Parse the text following a single `@`
    pub fn parse(body: &str) -> Result<ModClause, CmdError> {
        let text = args::trim_ws(body);
        if text == "?" {
            return Ok(ModClause::Help);
        }
        if text.is_empty() {
            return Err(CmdError::Syntax("missing address after '@'".into()));
        }
        let modifier = if let Some(env) = text.strip_prefix('%') {
            let (key, value) = env
                .split_once('=')
                .ok_or_else(|| CmdError::Syntax("expected @%KEY=VALUE".into()))?;
            Modifier::Env {
                key: key.trim().to_string(),
                value: args::unquote(value),
            }
        } else if let Some(tail) = text.strip_prefix("...") {
            Modifier::BlockTail(tail.trim().to_string())
        } else if let Some(tail) = text.strip_prefix("..") {
            Modifier::SeekTail(tail.trim().to_string())
        } else if text == "." {
            return Err(CmdError::Syntax("'@.' expects '@..' or '@...'".into()));
        } else if let Some(inner) = text.strip_prefix('(') {
            let inner = inner
                .strip_suffix(')')
                .ok_or_else(|| CmdError::Syntax("missing ')' in '@('".into()))?;
            let words = args::split(inner);
            match words.as_slice() {
                [from, to] => Modifier::FromTo(from.clone(), to.clone()),
                _ => return Err(CmdError::Syntax("expected @(from to)".into())),
            }
        } else if let Some(modifier) = typed(text) {
            modifier
        } else if let Some(query) = text.strip_prefix("k ") {
            Modifier::Kuery(args::unquote(query))
        } else {
            let (kind, rest) = match text.as_bytes()[0] {
                b'+' => (SeekKind::Forward, &text[1..]),
                b'-' => (SeekKind::Backward, &text[1..]),
                _ => (SeekKind::Absolute, text),
            };
            let (expr, size) = match rest.split_once('!') {
                Some((expr, size)) => (expr, Some(args::unquote(size))),
                None => (rest, None),
            };
            Modifier::Seek {
                expr: args::unquote(expr),
                kind,
                size,
            }
        };
        Ok(ModClause::Apply(modifier))
    }

    /// Apply the change, recording its undo in `frame`
    pub fn apply(&self, core: &mut Core, frame: &mut ModifierFrame) -> Result<(), CmdError> {
        log::trace!("modifier: apply {:?}", self);
        match self {
            Modifier::Seek { expr, kind, size } => {
                let value = eval_address(core, expr)?;
                let addr = match kind {
                    SeekKind::Absolute => value,
                    SeekKind::Forward => core.offset.wrapping_add(value),
                    SeekKind::Backward => core.offset.wrapping_sub(value),
                };
                if let Some(size) = size {
                    let size = core.num(size)?;
                    set_blocksize(core, frame, size)?;
                }
                seek(core, frame, addr);
            }
            Modifier::Env { key, value } => {
                refuse_in_sandbox(core, "@%")?;
                let old = std::env::var(key).ok();
                std::env::set_var(key, value);
                frame.push(Restore::Env {
                    key: key.clone(),
                    old,
                });
            }
            Modifier::SeekTail(tail) => {
                let addr = num::tail(core.offset, tail)?;
                seek(core, frame, addr);
            }
            Modifier::BlockTail(tail) => {
                let addr = num::tail(core.offset, tail)?;
                let size = addr.abs_diff(core.offset).max(1);
                set_blocksize(core, frame, size)?;
            }
            Modifier::FromTo(from, to) => {
                let from = core.num(from)?;
                let to = core.num(to)?;
                let keys: Vec<String> = RANGE_KEYS
                    .iter()
                    .flat_map(|k| [format!("{}.from", k), format!("{}.to", k)])
                    .collect();
                let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                frame.push(Restore::Config(core.config.hold(&keys)));
                for range in RANGE_KEYS {
                    core.config.set_i(&format!("{}.from", range), from)?;
                    core.config.set_i(&format!("{}.to", range), to)?;
                }
            }
            Modifier::Arch(spec) => {
                let (arch, bits) = match spec.split_once(':') {
                    Some((arch, bits)) => (arch, Some(bits)),
                    None => (spec.as_str(), None),
                };
                frame.push(Restore::Config(core.config.hold(&["asm.arch", "asm.bits"])));
                core.config.set("asm.arch", arch)?;
                if let Some(bits) = bits {
                    let bits = core.num(bits)?;
                    core.config.set_i("asm.bits", bits)?;
                }
            }
            Modifier::Bits(bits) => {
                let bits = core.num(bits)?;
                frame.push(Restore::Config(
                    core.config.hold(&["asm.bits", "anal.ignbithints"]),
                ));
                core.config.set_i("asm.bits", bits)?;
                core.config.set_b("anal.ignbithints", true)?;
            }
            Modifier::BlockInstr(nth) => {
                let nth = core.num_signed(nth)?;
                let bb = core.anal.bb_at(core.offset).ok_or_else(|| {
                    CmdError::Invalid(format!("No basic block at {:#x}", core.offset))
                })?;
                let idx = if nth < 0 {
                    (bb.instrs.len() as i64).checked_add(nth)
                } else {
                    Some(nth)
                };
                let addr = idx
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| bb.instrs.get(i))
                    .copied()
                    .ok_or_else(|| {
                        CmdError::Invalid(format!("No instruction {} in basic block", nth))
                    })?;
                seek(core, frame, addr);
            }
            Modifier::Eval(pairs) => {
                for pair in pairs.split(',') {
                    let Some((key, value)) = pair.split_once('=') else {
                        return Err(CmdError::Syntax(format!("expected key=value in '{}'", pair)));
                    };
                    let key = key.trim();
                    if !core.config.contains(key) {
                        log::warn!("modifier: unknown config key '{}'", key);
                        continue;
                    }
                    frame.push(Restore::Config(core.config.hold(&[key])));
                    core.config.set(key, value.trim())?;
                }
            }
            Modifier::File(path) => {
                refuse_in_sandbox(core, "@f:")?;
                let data = std::fs::read(path).map_err(|e| {
                    CmdError::Resource(format!("Cannot open '{}': {}", path, e))
                })?;
                open_buffer(core, frame, &format!("file://{}", path), data)?;
            }
            Modifier::FlagSpace(space) => {
                core.flags.space_push(space);
                frame.push(Restore::FlagSpace);
            }
            Modifier::Instr(nth) => {
                let nth = core.num_signed(nth)?;
                let addr = core.anal.instr_relative(core.offset, nth).ok_or_else(|| {
                    CmdError::Invalid(format!("No instruction {} from {:#x}", nth, core.offset))
                })?;
                seek(core, frame, addr);
            }
            Modifier::Kuery(query) => {
                let result = core.sdb.query(query);
                let value = result.lines().next().unwrap_or("").trim().to_string();
                if value.is_empty() {
                    return Err(CmdError::Invalid(format!("Empty sdb result for '{}'", query)));
                }
                let addr = core.num(&value)?;
                seek(core, frame, addr);
            }
            Modifier::Fd(fd) => {
                refuse_in_sandbox(core, "@o:")?;
                let fd = core.num(fd)?;
                let fd = u32::try_from(fd)
                    .map_err(|_| CmdError::Invalid(format!("Invalid fd {}", fd)))?;
                let prev = core.io.use_fd(fd)?;
                frame.push(Restore::Fd(prev));
            }
            Modifier::Register(spec) => {
                let split = spec.find(['+', '-']);
                let (name, delta) = match split {
                    Some(at) => (&spec[..at], Some(&spec[at..])),
                    None => (spec.as_str(), None),
                };
                let mut addr = core.dbg.reg_get(name.trim())?;
                if let Some(delta) = delta {
                    let amount = core.num(&delta[1..])?;
                    addr = if delta.starts_with('+') {
                        addr.wrapping_add(amount)
                    } else {
                        addr.wrapping_sub(amount)
                    };
                }
                seek(core, frame, addr);
            }
            Modifier::Str(text) => {
                open_buffer(core, frame, "malloc://str", text.as_bytes().to_vec())?;
            }
            Modifier::Hex(pairs) => {
                let pairs: String = pairs.split_whitespace().collect();
                let data = hex::decode(&pairs)
                    .map_err(|e| CmdError::Invalid(format!("Invalid hexpairs '{}': {}", pairs, e)))?;
                open_buffer(core, frame, "malloc://hex", data)?;
            }
        }
        Ok(())
    }
}

/// `X:arg` forms
fn typed(text: &str) -> Option<Modifier> {
    let bytes = text.as_bytes();
    if bytes.len() < 2 || bytes[1] != b':' {
        return None;
    }
    let arg = args::unquote(&text[2..]);
    let modifier = match bytes[0] {
        b'a' => Modifier::Arch(arg),
        b'b' => Modifier::Bits(arg),
        b'B' => Modifier::BlockInstr(arg),
        b'e' => Modifier::Eval(arg),
        b'f' => Modifier::File(arg),
        b'F' => Modifier::FlagSpace(arg),
        b'i' => Modifier::Instr(arg),
        b'k' => Modifier::Kuery(arg),
        b'o' => Modifier::Fd(arg),
        b'r' => Modifier::Register(arg),
        b's' => Modifier::Str(arg),
        b'x' => Modifier::Hex(arg),
        _ => return None,
    };
    Some(modifier)
}

fn eval_address(core: &mut Core, expr: &str) -> Result<u64, CmdError> {
    core.num(expr)
        .map_err(|e| CmdError::Invalid(format!("Invalid address '{}': {}", expr, e)))
}

fn refuse_in_sandbox(core: &Core, what: &str) -> Result<(), CmdError> {
    if core.is_sandboxed() {
        return Err(CmdError::Sandbox(format!(
            "{} is not available in sandbox mode",
            what
        )));
    }
    Ok(())
}

fn seek(core: &mut Core, frame: &mut ModifierFrame, addr: u64) {
    frame.push(Restore::Offset(core.offset));
    core.seek(addr);
}

fn set_blocksize(core: &mut Core, frame: &mut ModifierFrame, size: u64) -> Result<(), CmdError> {
    let prev = core.set_blocksize(size)?;
    frame.push(Restore::BlockSize(prev));
    Ok(())
}

/// Temporary descriptor mapped at the current offset
fn open_buffer(
    core: &mut Core,
    frame: &mut ModifierFrame,
    uri: &str,
    data: Vec<u8>,
) -> Result<(), CmdError> {
    let len = data.len() as u64;
    let prev = core.io.current_fd();
    let fd = core.io.open(uri, data, core.offset, MemoryProtection::RW);
    frame.push(Restore::CloseDesc { fd, prev });
    if len > 0 {
        set_blocksize(core, frame, len)?;
    }
    Ok(())
}

/// One recorded undo step
#[derive(Debug)]
pub enum Restore {
    Offset(u64),
    BlockSize(u64),
    Config(ConfigHold),
    FlagSpace,
    Fd(Option<u32>),
    CloseDesc { fd: u32, prev: Option<u32> },
    Env { key: String, old: Option<String> },
}

impl Restore {
    fn undo(self, core: &mut Core) {
        match self {
            Restore::Offset(offset) => core.offset = offset,
            Restore::BlockSize(size) => core.blocksize = size,
            Restore::Config(hold) => core.config.restore(hold),
            Restore::FlagSpace => {
                core.flags.space_pop();
            }
            Restore::Fd(prev) => core.io.restore_fd(prev),
            Restore::CloseDesc { fd, prev } => {
                if let Err(e) = core.io.close(fd) {
                    log::warn!("modifier: {}", e);
                }
                core.io.restore_fd(prev);
            }
            Restore::Env { key, old } => match old {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            },
        }
    }
}

/// Undo log of the modifiers applied to one command
#[derive(Debug, Default)]
pub struct ModifierFrame {
    undo: Vec<Restore>,
}

impl ModifierFrame {
    pub fn push(&mut self, restore: Restore) {
        self.undo.push(restore);
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Undo everything, most recent first
    pub fn restore(mut self, core: &mut Core) {
        while let Some(step) = self.undo.pop() {
            step.undo(core);
        }
    }
}

/// Apply `mods` left to right, run `inner`, then restore
pub fn with_modifiers<F>(core: &mut Core, mods: &[Modifier], inner: F) -> CmdResult
where
    F: FnOnce(&mut Core) -> CmdResult,
{
    if mods.is_empty() {
        return inner(core);
    }
    let mut frame = ModifierFrame::default();
    core.frames += 1;
    let mut result = Ok(0);
    for modifier in mods {
        if let Err(e) = modifier.apply(core, &mut frame) {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = inner(core);
    }
    log::trace!("modifier: restoring {} steps", frame.len());
    frame.restore(core);
    core.frames -= 1;
    result
}

/// Raw text of one clause as found by a parser
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClauseBody<'a> {
    /// `@body`
    Modifier(&'a str),
    /// `@@body` (level 2) or `@@@body` (level 3)
    Iterator(u8, &'a str),
}

/// The `@` clauses of one command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clauses {
    pub modifiers: Vec<Modifier>,
    pub iterator: Option<IterSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedClauses {
    Run(Clauses),
    /// A clause asked for help; print it instead of running anything
    Help(&'static str),
}

/// Parse clause bodies in order; the first help request or error wins
pub fn parse_clauses(bodies: &[ClauseBody]) -> Result<ParsedClauses, CmdError> {
    let mut clauses = Clauses::default();
    for body in bodies {
        match *body {
            ClauseBody::Modifier(text) => match Modifier::parse(text)? {
                ModClause::Help => return Ok(ParsedClauses::Help(MODIFIER_HELP)),
                ModClause::Apply(modifier) => clauses.modifiers.push(modifier),
            },
            ClauseBody::Iterator(level, text) => match IterSpec::parse(level, text)? {
                None => return Ok(ParsedClauses::Help(IterSpec::help(level))),
                Some(spec) => clauses.iterator = Some(spec),
            },
        }
    }
    Ok(ParsedClauses::Run(clauses))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(text: &str) -> Modifier {
        match Modifier::parse(text).unwrap() {
            ModClause::Apply(m) => m,
            ModClause::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            apply(" 0x10!32"),
            Modifier::Seek {
                expr: "0x10".into(),
                kind: SeekKind::Absolute,
                size: Some("32".into())
            }
        );
        assert!(matches!(apply("+4"), Modifier::Seek { kind: SeekKind::Forward, .. }));
        assert_eq!(apply("..ff"), Modifier::SeekTail("ff".into()));
        assert_eq!(apply("...ff"), Modifier::BlockTail("ff".into()));
        assert_eq!(apply("x:90 90"), Modifier::Hex("90 90".into()));
        assert_eq!(apply("s:\"a b\""), Modifier::Str("a b".into()));
        assert_eq!(apply("k foo"), Modifier::Kuery("foo".into()));
        assert_eq!(apply("(1 2)"), Modifier::FromTo("1".into(), "2".into()));
        assert_eq!(Modifier::parse(" ?").unwrap(), ModClause::Help);
        assert!(Modifier::parse(".").is_err());
        assert!(Modifier::parse("  ").is_err());
    }

    #[test]
    fn test_restore_reverse_order() {
        let mut core = Core::default();
        core.seek(0x10);
        let mods = vec![
            apply("0x100!0x20"),
            apply("e:asm.bits=16"),
            apply("+8"),
        ];
        with_modifiers(&mut core, &mods, |core| {
            assert_eq!(core.offset, 0x108);
            assert_eq!(core.blocksize, 0x20);
            assert_eq!(core.config.get_i("asm.bits"), 16);
            Err(CmdError::Handler("boom".into()))
        })
        .unwrap_err();
        assert_eq!(core.offset, 0x10);
        assert_eq!(core.blocksize, 0x100);
        assert_eq!(core.config.get_i("asm.bits"), 64);
        assert_eq!(core.frames, 0);
    }

    #[test]
    fn test_failed_modifier_restores_earlier_ones() {
        let mut core = Core::default();
        let mods = vec![apply("0x40"), apply("r:nosuchreg")];
        let result = with_modifiers(&mut core, &mods, |_| Ok(0));
        assert!(result.is_err());
        assert_eq!(core.offset, 0);
    }

    #[test]
    fn test_hex_buffer_is_temporary() {
        let mut core = Core::default();
        core.seek(0x1000);
        with_modifiers(&mut core, &[apply("x:41424344")], |core| {
            assert_eq!(core.blocksize, 4);
            assert_eq!(core.block(), b"ABCD".to_vec());
            Ok(0)
        })
        .unwrap();
        assert_eq!(core.io.descs().count(), 0);
        assert_eq!(core.block()[0], 0xff);
    }

    #[test]
    fn test_bits_forces_ignbithints() {
        let mut core = Core::default();
        with_modifiers(&mut core, &[apply("b:32")], |core| {
            assert!(core.config.get_b("anal.ignbithints"));
            assert_eq!(core.config.get_i("asm.bits"), 32);
            Ok(0)
        })
        .unwrap();
        assert!(!core.config.get_b("anal.ignbithints"));
    }

    #[test]
    fn test_instruction_index_out_of_range() {
        let mut core = Core::default();
        core.cmd("af f 0x100 0x10 0x100:0x10:0x100,0x104");
        core.seek(0x104);
        for text in [
            "B:-0x8000000000000000",
            "B:-0x8000000000000001",
            "B:0xffffffffffffffff",
            "i:0x7fffffffffffffff",
            "i:-0x8000000000000000",
        ] {
            let result = with_modifiers(&mut core, &[apply(text)], |_| Ok(0));
            assert!(matches!(result, Err(CmdError::Invalid(_))), "{}", text);
        }
        assert_eq!(core.offset, 0x104);

        with_modifiers(&mut core, &[apply("B:-1")], |core| {
            assert_eq!(core.offset, 0x104);
            Ok(0)
        })
        .unwrap();
    }

    #[test]
    fn test_sandbox_refuses_env_and_fd() {
        let mut core = Core::new(crate::core::CoreOptions {
            sandbox: true,
            ..Default::default()
        });
        for text in ["%FOO=1", "o:3", "f:/etc/hostname"] {
            let result = with_modifiers(&mut core, &[apply(text)], |_| Ok(0));
            assert!(matches!(result, Err(CmdError::Sandbox(_))), "{}", text);
        }
    }
}
