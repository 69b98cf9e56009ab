//! Legacy - Step-wise command line interpreter
//!
//! The line goes through a fixed list of steps. A step either handles the
//! line, usually by splitting it and running the parts from some later
//! step, or passes it on unchanged. Order of the steps:
//!
//! repeat, quoted statement, comment, `;`, `|`, `&&`, `?*` help, `>`,
//! backtick substitution, `~` grep, `@` clauses and dispatch.

mod scan;

use super::flow::{self, QuotedOutput, QuotedStmt};
use super::modifier::{self, ClauseBody, ParsedClauses};
use super::pipe::{self, PipeDest, Redirect, RedirectOp, RedirectTarget, REDIRECT_HELP};
use super::{args, registry, CmdError, CmdResult, Interpreter};
use crate::core::Core;
use scan::{is_comment_start, Scan};

/// The step-wise interpreter
pub struct LegacyParser;

impl Interpreter for LegacyParser {
    fn interpret(&self, core: &mut Core, line: &str) -> CmdResult {
        run_from(core, line, Step::Repeat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
    Repeat,
    Quoted,
    Comment,
    Sequence,
    Pipe,
    And,
    Help,
    Redirect,
    Substitute,
    Grep,
    Clauses,
}

fn run_from(core: &mut Core, mut text: &str, mut from: Step) -> CmdResult {
    loop {
        match step(core, text, from)? {
            Next::Done(status) => return Ok(status),
            Next::Tail(tail) => {
                if core.quit || core.is_interrupted() {
                    return Ok(0);
                }
                text = tail;
                from = Step::Repeat;
            }
        }
    }
}

/// Outcome of one pass over a line
enum Next<'a> {
    Done(i32),
    /// Earlier statements ran; the rest starts over from the first step
    Tail(&'a str),
}

fn step<'a>(core: &mut Core, text: &'a str, from: Step) -> Result<Next<'a>, CmdError> {
    let mut text = args::trim_ws(text);
    if text.is_empty() {
        return Ok(Next::Done(0));
    }
    log::trace!("legacy: {:?} '{}'", from, text);

    if from <= Step::Repeat {
        if let Some((count, body)) = repeat_prefix(text) {
            let body = args::trim_ws(body);
            if body.is_empty() {
                return Ok(Next::Done(0));
            }
            return flow::repeat(core, count, body, |core| run_from(core, body, Step::Repeat))
                .map(Next::Done);
        }
    }
    if from <= Step::Quoted && text.starts_with('"') {
        let (stmt, tail) = parse_quoted(text)?;
        let result = flow::run_quoted(core, &stmt);
        return match tail {
            Some(tail) => {
                flow::absorb(core, result)?;
                Ok(Next::Tail(tail))
            }
            None => result.map(Next::Done),
        };
    }
    if from <= Step::Comment {
        if text.starts_with("#!") || text.starts_with("#?") {
            return registry::dispatch(core, text).map(Next::Done);
        }
        if text.starts_with('#') {
            return Ok(Next::Done(0));
        }
        if let Some(pos) = scan::walk_until(text, is_comment_start)?.stopped {
            text = args::trim_ws(&text[..pos]);
        }
    }

    let scan = scan::walk(text)?;

    if from <= Step::Sequence {
        let stops: Vec<usize> = scan.positions(b';').collect();
        if !stops.is_empty() {
            return sequence(core, text, &stops);
        }
    }
    if from <= Step::Pipe {
        if let Some(pos) = scan.rfind(b'|') {
            let dest = PipeDest::parse(&text[pos + 1..]);
            let left = &text[..pos];
            return pipe::run_piped(core, &dest, |core| run_from(core, left, Step::Pipe))
                .map(Next::Done);
        }
    }
    if from <= Step::And {
        if let Some(pos) = find_and(text, &scan) {
            let (left, right) = (&text[..pos], &text[pos + 2..]);
            return flow::and_then(
                core,
                |core| run_from(core, left, Step::Help),
                |core| run_from(core, right, Step::And),
            )
            .map(Next::Done);
        }
    }
    if from <= Step::Help {
        if let Some((prefix, detail, grep)) = help_wildcard(text, &scan) {
            return flow::help(core, prefix, detail, grep).map(Next::Done);
        }
    }
    if from <= Step::Redirect {
        if let Some(pos) = scan.find(b'>') {
            return redirect(core, text, &scan, pos).map(Next::Done);
        }
    }
    if from <= Step::Substitute && !scan.substs.is_empty() {
        let expanded = substitute_all(core, text, &scan)?;
        return run_from(core, &expanded, Step::Repeat).map(Next::Done);
    }
    if from <= Step::Grep {
        if let Some(pos) = scan.find(b'~') {
            let (command, spec) = (&text[..pos], &text[pos + 1..]);
            return flow::with_grep(core, spec, |core| run_from(core, command, Step::Clauses))
                .map(Next::Done);
        }
    }
    clauses(core, text, &scan).map(Next::Done)
}

/// Run the `;` statements of `text` split at the top-level `stops`. A
/// statement that opens with a repeat count, a quote or `#` takes the rest
/// of the line, so it is handed back as the tail.
fn sequence<'a>(core: &mut Core, text: &'a str, stops: &[usize]) -> Result<Next<'a>, CmdError> {
    let mut start = 0;
    for &stop in stops {
        if start > 0 {
            let rest = args::trim_ws(&text[start..]);
            if takes_rest_of_line(rest) {
                return Ok(Next::Tail(rest));
            }
        }
        let result = run_from(core, &text[start..stop], Step::Pipe);
        flow::absorb(core, result)?;
        if core.quit || core.is_interrupted() {
            return Ok(Next::Done(0));
        }
        start = stop + 1;
    }
    Ok(Next::Tail(&text[start..]))
}

fn takes_rest_of_line(text: &str) -> bool {
    text.starts_with('"') || text.starts_with('#') || repeat_prefix(text).is_some()
}

/// Leading repeat count and the text after it
fn repeat_prefix(text: &str) -> Option<(u64, &str)> {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || text.starts_with("0x") {
        return None;
    }
    let count = text[..digits].parse().unwrap_or(u64::MAX);
    Some((count, &text[digits..]))
}

/// Split a `"..."` statement off the front of `text`. The second value is
/// whatever follows a `;` after it.
fn parse_quoted(text: &str) -> Result<(QuotedStmt, Option<&str>), CmdError> {
    let bytes = text.as_bytes();
    let mut i = 1;
    let close = loop {
        match bytes.get(i) {
            None => return Err(CmdError::Syntax("unterminated quoted command".into())),
            Some(b'\\') if bytes.get(i + 1) == Some(&b'"') => i += 2,
            Some(b'"') => break i,
            Some(_) => i += 1,
        }
    };
    let mut stmt = QuotedStmt {
        body: text[1..close].to_string(),
        at: None,
        output: None,
    };

    let mut rest = trim_start_ws(&text[close + 1..]);
    if let Some(after) = rest.strip_prefix('@') {
        let after = trim_start_ws(after);
        let end = after
            .find([' ', '\t', ';', '>', '|'])
            .unwrap_or(after.len());
        if end == 0 {
            return Err(CmdError::Syntax("missing address after '@'".into()));
        }
        stmt.at = Some(after[..end].to_string());
        rest = &after[end..];
    } else if let Some(after) = rest.strip_prefix('>') {
        let (op, after) = match after.strip_prefix('>') {
            Some(after) => (">>", after),
            None => (">", after),
        };
        let after = trim_start_ws(after);
        let end = after.find([' ', '\t', ';']).unwrap_or(after.len());
        if end == 0 {
            return Err(CmdError::Syntax("missing redirection target".into()));
        }
        stmt.output = Some(QuotedOutput::Redirect {
            op: op.to_string(),
            target: after[..end].to_string(),
        });
        rest = &after[end..];
    } else if let Some(after) = rest.strip_prefix('|') {
        let bytes = after.as_bytes();
        let end = (0..bytes.len())
            .find(|&i| bytes[i] == b';' || is_comment_start(bytes, i))
            .unwrap_or(bytes.len());
        stmt.output = Some(QuotedOutput::Pipe(after[..end].to_string()));
        rest = &after[end..];
    }

    let rest = trim_start_ws(rest);
    if rest.is_empty() || is_comment_start(rest.as_bytes(), 0) {
        return Ok((stmt, None));
    }
    match rest.strip_prefix(';') {
        Some(tail) => Ok((stmt, Some(tail))),
        None => Err(CmdError::Syntax(format!(
            "unexpected '{}' after quoted command",
            rest
        ))),
    }
}

fn trim_start_ws(s: &str) -> &str {
    s.trim_start_matches([' ', '\t'])
}

/// First top-level `&&` with a command on its left
fn find_and(text: &str, scan: &Scan) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut from = 0;
    for pos in scan.positions(b'&') {
        if pos < from || bytes.get(pos + 1) != Some(&b'&') || !scan.is_top(pos + 1) {
            continue;
        }
        if !args::trim_ws(&text[..pos]).is_empty() {
            return Some(pos);
        }
        from = pos + 2;
    }
    None
}

/// A `word?*` statement: help prefix, detail level and optional grep
fn help_wildcard<'a>(text: &'a str, scan: &Scan) -> Option<(&'a str, usize, Option<&'a str>)> {
    if scan.find(b'>').is_some() {
        return None;
    }
    let (main, grep) = match scan.find(b'~') {
        Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
        None => (text, None),
    };
    let word = args::trim_ws(main);
    if word.is_empty()
        || word
            .bytes()
            .any(|b| args::is_ws(b) || args::is_special(b) || b == b'\\')
    {
        return None;
    }
    let (prefix, marks) = flow::split_help_word(word)?;
    Some((prefix, marks - 1, grep))
}

fn redirect(core: &mut Core, text: &str, scan: &Scan, pos: usize) -> CmdResult {
    let bytes = text.as_bytes();
    let fd_prefix = pos > 0
        && (bytes[pos - 1].is_ascii_digit() || bytes[pos - 1] == b'H')
        && (pos == 1 || args::is_ws(bytes[pos - 2]));
    let op_start = if fd_prefix { pos - 1 } else { pos };
    let op_end = if bytes.get(pos + 1) == Some(&b'>') { pos + 2 } else { pos + 1 };
    let left = &text[..op_start];
    let op = RedirectOp::parse(&text[op_start..op_end])?;

    if trim_start_ws(&text[op_end..]).starts_with('?') {
        core.cons.print(REDIRECT_HELP);
        return Ok(0);
    }

    let trailing_at = scan.positions(b'@').find(|&p| p >= op_end);
    let target_end = trailing_at.unwrap_or(text.len());
    let target = args::trim_ws(&text[op_end..target_end]);
    if target.is_empty() {
        return Err(CmdError::Syntax("missing redirection target".into()));
    }
    let has_subst = scan.substs.iter().any(|s| s.span.start >= op_end);
    let target_start = op_end + (text[op_end..].len() - trim_start_ws(&text[op_end..]).len());
    let target_stop = target_start + target.len();
    if has_subst
        || scan.any_in(target_start..target_stop, |b| {
            args::is_ws(b) || matches!(b, b'>' | b'~' | b'|' | b';')
        })
    {
        return Err(CmdError::Syntax("malformed redirection target".into()));
    }
    let redirect = Redirect {
        op,
        target: RedirectTarget::parse(target)?,
    };

    let mods = match trailing_at {
        Some(at) => {
            if scan.find(b'~').map_or(false, |p| p > at) {
                return Err(CmdError::Syntax("unexpected '~' after redirection".into()));
            }
            let bodies = split_clauses(text, scan, at);
            if bodies
                .iter()
                .any(|b| matches!(b, ClauseBody::Iterator(..)))
            {
                return Err(CmdError::Syntax("'@@' is not allowed after a redirection".into()));
            }
            match modifier::parse_clauses(&bodies)? {
                ParsedClauses::Help(help) => {
                    core.cons.print(help);
                    return Ok(0);
                }
                ParsedClauses::Run(clauses) => clauses.modifiers,
            }
        }
        None => Vec::new(),
    };
    log::debug!("legacy: redirect {:?} for '{}'", redirect, left);
    modifier::with_modifiers(core, &mods, |core| {
        pipe::run_redirected(core, &redirect, |core| run_from(core, left, Step::Help))
    })
}

/// Expand every substitution span, left to right
fn substitute_all(core: &mut Core, text: &str, scan: &Scan) -> Result<String, CmdError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for subst in &scan.substs {
        out.push_str(&text[last..subst.span.start]);
        let inner = scan.inner_text(subst);
        out.push_str(&flow::splice(core, inner, subst.discard, subst.in_dquote)?);
        last = subst.span.end;
    }
    out.push_str(&text[last..]);
    log::debug!("legacy: substituted '{}' -> '{}'", text, out);
    Ok(out)
}

/// `@` clauses starting at top-level position `first`
fn split_clauses<'a>(text: &'a str, scan: &Scan, first: usize) -> Vec<ClauseBody<'a>> {
    let ats: Vec<usize> = scan.positions(b'@').filter(|&p| p >= first).collect();
    let mut bodies = Vec::new();
    let mut k = 0;
    while k < ats.len() {
        let at = ats[k];
        let run = ats[k..]
            .iter()
            .enumerate()
            .take_while(|&(n, &p)| p == at + n)
            .count();
        match run {
            1 => {
                let end = ats.get(k + 1).copied().unwrap_or(text.len());
                bodies.push(ClauseBody::Modifier(&text[at + 1..end]));
                k += 1;
            }
            2 => {
                bodies.push(ClauseBody::Iterator(2, &text[at + 2..]));
                break;
            }
            _ => {
                bodies.push(ClauseBody::Iterator(3, &text[at + 3..]));
                break;
            }
        }
    }
    bodies
}

fn clauses(core: &mut Core, text: &str, scan: &Scan) -> CmdResult {
    match scan.find(b'@') {
        None => registry::dispatch(core, text),
        Some(first) => {
            let bodies = split_clauses(text, scan, first);
            flow::run_clauses(core, &text[..first], &bodies)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreOptions;

    fn run(core: &mut Core, line: &str) -> CmdResult {
        LegacyParser.interpret(core, line)
    }

    #[test]
    fn test_repeat_prefix() {
        assert_eq!(repeat_prefix("3 px"), Some((3, " px")));
        assert_eq!(repeat_prefix("0x10"), None);
        assert_eq!(repeat_prefix("px"), None);
        assert_eq!(
            repeat_prefix("99999999999999999999999 x"),
            Some((u64::MAX, " x"))
        );
    }

    #[test]
    fn test_parse_quoted() {
        let (stmt, tail) = parse_quoted("\"?e a;b\" @ 0x10 ; ?e c").unwrap();
        assert_eq!(stmt.body, "?e a;b");
        assert_eq!(stmt.at.as_deref(), Some("0x10"));
        assert_eq!(tail, Some(" ?e c"));

        let (stmt, tail) = parse_quoted("\"?e \\\"x\\\"\"@0x10;?e c").unwrap();
        assert_eq!(stmt.body, "?e \\\"x\\\"");
        assert_eq!(stmt.at.as_deref(), Some("0x10"));
        assert_eq!(tail, Some("?e c"));

        let (stmt, _) = parse_quoted("\"px\" >> out.txt # done").unwrap();
        assert_eq!(
            stmt.output,
            Some(QuotedOutput::Redirect {
                op: ">>".into(),
                target: "out.txt".into()
            })
        );
        assert!(parse_quoted("\"px\" junk").is_err());
        assert!(parse_quoted("\"px").is_err());
    }

    #[test]
    fn test_splice_keeps_rest_of_line() {
        let mut core = Core::default();
        let text = "s `echo hi` @ 4";
        let scan = scan::walk(text).unwrap();
        assert_eq!(substitute_all(&mut core, text, &scan).unwrap(), "s hi @ 4");
    }

    #[test]
    fn test_substitution_then_modifier() {
        let mut core = Core::default();
        run(&mut core, "?v `?v 0x20` @ 4").unwrap();
        run(&mut core, "s `?e 0x30` @ 4").unwrap();
        assert_eq!(core.cons.take_output(), "0x20\n");
        assert_eq!(core.offset, 0);
    }

    #[test]
    fn test_sequence_and_chain() {
        let mut core = Core::default();
        run(&mut core, "?e a; nope; ?e b").unwrap();
        run(&mut core, "nope && ?e c").unwrap_err();
        run(&mut core, "?e d && ?e e").unwrap();
        assert_eq!(core.cons.take_output(), "a\nb\nd\ne\n");
        assert!(core.cons.take_errors().contains("Unknown command 'nope'"));
    }

    #[test]
    fn test_long_sequence_runs_flat() {
        let mut core = Core::default();
        let line = vec!["?e a"; 5000].join(";");
        assert_eq!(run(&mut core, &line).unwrap(), 0);
        assert_eq!(core.cons.take_output().lines().count(), 5000);
    }

    #[test]
    fn test_sequence_tail_forms() {
        let mut core = Core::default();
        run(&mut core, "?e a; 2 ?e b; ?e c").unwrap();
        assert_eq!(core.cons.take_output(), "a\nb\nc\nb\nc\n");

        run(&mut core, "\"?e q\"; ?e r; \"?e s\"; ?e t").unwrap();
        assert_eq!(core.cons.take_output(), "q\nr\ns\nt\n");

        run(&mut core, "?e u; #x; ?e never").unwrap();
        assert_eq!(core.cons.take_output(), "u\n");

        core.interrupt();
        run(&mut core, "?e v; ?e w").unwrap();
        assert_eq!(core.cons.take_output(), "v\n");
    }

    #[test]
    fn test_comment_stops_scan() {
        let mut core = Core::default();
        run(&mut core, "?e hi # it's fine").unwrap();
        run(&mut core, "# whole line").unwrap();
        assert_eq!(core.cons.take_output(), "hi\n");
    }

    #[test]
    fn test_redirect_target_errors() {
        let mut core = Core::default();
        assert!(matches!(run(&mut core, "?e a >"), Err(CmdError::Syntax(_))));
        assert!(matches!(run(&mut core, "?e a > b c"), Err(CmdError::Syntax(_))));
        assert!(matches!(
            run(&mut core, "?e a > `?e f`"),
            Err(CmdError::Syntax(_))
        ));
        assert!(matches!(
            run(&mut core, "?e a > $x @@ b"),
            Err(CmdError::Syntax(_))
        ));
    }

    #[test]
    fn test_trailing_modifier_moves_onto_command() {
        let mut core = Core::default();
        run(&mut core, "?v $$ > $at @ 0x40").unwrap();
        run(&mut core, "$at").unwrap();
        assert_eq!(core.cons.take_output(), "0x40\n");
        assert_eq!(core.offset, 0);
    }

    #[test]
    fn test_sandbox_repeat() {
        let mut core = Core::new(CoreOptions {
            sandbox: true,
            ..CoreOptions::default()
        });
        assert!(matches!(run(&mut core, "3 ?e x"), Err(CmdError::Sandbox(_))));
        run(&mut core, "1 ?e x").unwrap();
        assert_eq!(core.cons.take_output(), "x\n");
    }
}
