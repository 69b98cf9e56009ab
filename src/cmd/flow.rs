//! Flow - Execution of parsed constructs
//!
//! Both front ends decompose a line into the same constructs: repeats,
//! quoted statements, sequences, boolean chains, help wildcards, greps,
//! backtick substitutions and `@` clauses. This module runs them, so the
//! parsers only decide *what* was written.

use super::iter;
use super::modifier::{self, ClauseBody, Modifier, ModClause, ParsedClauses, MODIFIER_HELP};
use super::pipe::{self, PipeDest, Redirect, RedirectOp, RedirectTarget};
use super::{args, registry, CmdError, CmdResult};
use crate::core::grep::{Grep, GREP_HELP};
use crate::core::Core;

/// Counts above this ask for confirmation in interactive sessions
pub const REPEAT_CONFIRM: u64 = 1024;

/// Report a non-fatal error and turn it into a failure status
pub fn absorb(core: &mut Core, result: CmdResult) -> CmdResult {
    match result {
        Err(e) if !e.is_fatal() => {
            core.report(&e);
            Ok(-1)
        }
        other => other,
    }
}

/// Run `count` iterations of `body`, calling `run` for each one
pub fn repeat<F>(core: &mut Core, count: u64, body: &str, mut run: F) -> CmdResult
where
    F: FnMut(&mut Core) -> CmdResult,
{
    if count == 0 {
        return Ok(0);
    }
    if count > 1 && core.is_sandboxed() {
        return Err(CmdError::Sandbox(
            "Command repeat sugar disabled in sandbox mode".into(),
        ));
    }
    if count > REPEAT_CONFIRM && core.is_interactive() {
        let question = format!("Are you sure to repeat this {} times?", count);
        if !core.yes_no(&question, false) {
            return Err(CmdError::Declined(format!("repeat of {} declined", count)));
        }
    }
    log::debug!("repeat: {} x '{}'", count, body);

    let quits = args::trim_ws(body).starts_with('q');
    let times = core.config.get("cmd.times").unwrap_or("").to_string();
    let mut status = Ok(0);
    for _ in 0..count {
        if !times.is_empty() {
            let result = core.run_nested(".dr*");
            absorb(core, result)?;
            let result = core.run_nested(&times);
            absorb(core, result)?;
        }
        status = match run(core) {
            Err(e) if e.is_fatal() || quits => return Err(e),
            Ok(n) if n < 0 && quits => return Ok(n),
            other => absorb(core, other),
        };
        if core.quit || core.is_interrupted() {
            break;
        }
    }
    status
}

/// Run `left`, then `right` whatever happened to `left`
pub fn sequence<L, R>(core: &mut Core, left: L, right: R) -> CmdResult
where
    L: FnOnce(&mut Core) -> CmdResult,
    R: FnOnce(&mut Core) -> CmdResult,
{
    let result = left(core);
    absorb(core, result)?;
    if core.quit || core.is_interrupted() {
        return Ok(0);
    }
    right(core)
}

/// Run `left`, and `right` only when `left` succeeded
pub fn and_then<L, R>(core: &mut Core, left: L, right: R) -> CmdResult
where
    L: FnOnce(&mut Core) -> CmdResult,
    R: FnOnce(&mut Core) -> CmdResult,
{
    match left(core)? {
        n if n < 0 => Ok(n),
        _ => right(core),
    }
}

/// Print the command help below `prefix`
pub fn help(core: &mut Core, prefix: &str, detail: usize, grep: Option<&str>) -> CmdResult {
    let text = core.registry.help().recursive_help(prefix, detail);
    if text.is_empty() {
        return Err(CmdError::Handler(format!("no help for '{}'", prefix)));
    }
    let print = |core: &mut Core| {
        core.cons.print(&text);
        Ok(0)
    };
    match grep {
        Some(spec) => with_grep(core, spec, print),
        None => print(core),
    }
}

/// `prefix?..?*` where the first `?+*` run ends the word
pub fn split_help_word(word: &str) -> Option<(&str, usize)> {
    let bytes = word.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'?' {
            let marks = bytes[i..].iter().take_while(|&&b| b == b'?').count();
            if bytes.get(i + marks) == Some(&b'*') {
                return (i + marks + 1 == bytes.len()).then(|| (&word[..i], marks));
            }
            i += marks;
        } else {
            i += 1;
        }
    }
    None
}

/// Run `inner` with its output filtered through a `~` specifier
pub fn with_grep<F>(core: &mut Core, spec: &str, inner: F) -> CmdResult
where
    F: FnOnce(&mut Core) -> CmdResult,
{
    if args::trim_ws(spec) == "?" {
        core.cons.print(GREP_HELP);
        return Ok(0);
    }
    let grep = Grep::parse(spec);
    let (result, out) = pipe::capture(core, inner);
    core.cons.print(&grep.apply(&out));
    result
}

/// Output of a backtick body, ready to be spliced
pub fn substitute(core: &mut Core, inner: &str) -> Result<String, CmdError> {
    let inner = args::trim_ws(inner);
    let saved = core.num_value;
    let out = match inner.strip_prefix('!') {
        Some(shell) => pipe::shell_capture(core, shell).map(|out| out.trim().to_string()),
        None => {
            let hold = core.config.hold(&["scr.color"]);
            let out = match core.config.set_b("scr.color", false) {
                Ok(_) => core.cmd_str(inner),
                Err(e) => Err(e.into()),
            };
            core.config.restore(hold);
            out.map(|out| out.trim().replace('\n', " "))
        }
    };
    core.num_value = saved;
    let out = out?;
    if out.starts_with('|') || out.starts_with('*') {
        return Err(CmdError::Invalid("invalid backticked command".into()));
    }
    log::trace!("substitute: `{}` -> '{}'", inner, out);
    Ok(out)
}

/// Replacement text for one substitution span
pub fn splice(core: &mut Core, inner: &str, discard: bool, in_dquote: bool) -> Result<String, CmdError> {
    let out = substitute(core, inner)?;
    if discard {
        return Ok(String::new());
    }
    let set = if in_dquote {
        args::SPECIAL_CHARS_DOUBLE_QUOTED
    } else {
        args::SPECIAL_CHARS_REGULAR
    };
    Ok(args::escape(&out, set))
}

/// Dispatch `base` under parsed `@` clauses
pub fn run_clauses(core: &mut Core, base: &str, clauses: &[ClauseBody]) -> CmdResult {
    match modifier::parse_clauses(clauses)? {
        ParsedClauses::Help(text) => {
            core.cons.print(text);
            Ok(0)
        }
        ParsedClauses::Run(clauses) => {
            modifier::with_modifiers(core, &clauses.modifiers, |core| match &clauses.iterator {
                Some(spec) => iter::for_each(core, spec, base),
                None => registry::dispatch(core, base),
            })
        }
    }
}

/// Where the output of a quoted statement goes
#[derive(Debug, Clone, PartialEq)]
pub enum QuotedOutput {
    Redirect { op: String, target: String },
    Pipe(String),
}

/// A `"..."` statement with its optional suffix
#[derive(Debug, Clone, PartialEq)]
pub struct QuotedStmt {
    /// Text between the quotes, escapes untouched
    pub body: String,
    pub at: Option<String>,
    pub output: Option<QuotedOutput>,
}

/// Run a quoted statement; its body goes to the registry as is
pub fn run_quoted(core: &mut Core, stmt: &QuotedStmt) -> CmdResult {
    let body = stmt.body.replace("\\\"", "\"");
    let mods = match &stmt.at {
        Some(at) => match Modifier::parse(at)? {
            ModClause::Help => {
                core.cons.print(MODIFIER_HELP);
                return Ok(0);
            }
            ModClause::Apply(m) => vec![m],
        },
        None => Vec::new(),
    };
    let run = |core: &mut Core| modifier::with_modifiers(core, &mods, |core| registry::dispatch(core, &body));
    match &stmt.output {
        None => run(core),
        Some(QuotedOutput::Pipe(dest)) => pipe::run_piped(core, &PipeDest::parse(dest), run),
        Some(QuotedOutput::Redirect { op, target }) => {
            let redirect = Redirect {
                op: RedirectOp::parse(op)?,
                target: RedirectTarget::parse(target)?,
            };
            pipe::run_redirected(core, &redirect, run)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::alias::AliasValue;

    #[test]
    fn test_repeat_counts() {
        let mut core = Core::default();
        let mut runs = 0;
        repeat(&mut core, 3, "x", |_| {
            runs += 1;
            Ok(0)
        })
        .unwrap();
        assert_eq!(runs, 3);
        repeat(&mut core, 0, "x", |_| {
            runs += 1;
            Ok(0)
        })
        .unwrap();
        assert_eq!(runs, 3);
    }

    #[test]
    fn test_repeat_declined() {
        let mut core = Core::default();
        core.config.set_b("scr.interactive", true).unwrap();
        core.cons.script_answer(false);
        let result = repeat(&mut core, 2000, "x", |_| Ok(0));
        assert!(matches!(result, Err(CmdError::Declined(_))));
    }

    #[test]
    fn test_repeat_runs_cmd_times() {
        let mut core = Core::default();
        core.config.set("cmd.times", "?e tick").unwrap();
        repeat(&mut core, 2, "?e body", |core| registry::dispatch(core, "?e body")).unwrap();
        assert_eq!(core.cons.take_output(), "tick\nbody\ntick\nbody\n");
    }

    #[test]
    fn test_substitute_flattens_and_rejects() {
        let mut core = Core::default();
        core.aliases.set("two", AliasValue::Raw("$a\nb".into()));
        assert_eq!(substitute(&mut core, "$two").unwrap(), "a b");
        core.aliases.set("bad", AliasValue::Raw("$*oops".into()));
        assert!(substitute(&mut core, "$bad").is_err());
        assert_eq!(splice(&mut core, "$two", true, false).unwrap(), "");
    }

    #[test]
    fn test_splice_escapes_for_context() {
        let mut core = Core::default();
        core.aliases.set("q", AliasValue::Raw("$a;\"b".into()));
        assert_eq!(splice(&mut core, "$q", false, false).unwrap(), "a\\;\\\"b");
        assert_eq!(splice(&mut core, "$q", false, true).unwrap(), "a;\\\"b");
    }

    #[test]
    fn test_help_words() {
        assert_eq!(split_help_word("p?*"), Some(("p", 1)));
        assert_eq!(split_help_word("??*"), Some(("", 2)));
        assert_eq!(split_help_word("a?*b?*"), None);
        assert_eq!(split_help_word("p?"), None);
    }

    #[test]
    fn test_grep_wraps_output() {
        let mut core = Core::default();
        with_grep(&mut core, "two", |core| {
            core.cons.print("one\ntwo\nthree\n");
            Ok(0)
        })
        .unwrap();
        assert_eq!(core.cons.take_output(), "two\n");
    }
}
