//! Grammar - pest based command line interpreter
//!
//! The whole line is parsed at once into a [`Node`] tree which is then
//! walked. Statements containing backtick substitutions are expanded and
//! parsed again before they run.

mod tree;

use pest::error::LineColLocation;
use pest::Parser;
use pest_derive::Parser;

use super::flow;
use super::modifier::{self, ClauseBody, ParsedClauses};
use super::pipe::{self, PipeDest, Redirect, RedirectOp, RedirectTarget};
use super::{registry, CmdError, CmdResult, Interpreter};
use crate::core::Core;
pub use tree::{ClauseText, Edit, Node, Simple, SubstSpan};

#[derive(Parser)]
#[grammar = "cmd/grammar/r2cmd.pest"]
struct CmdGrammar;

/// The grammar interpreter
pub struct GrammarParser;

impl Interpreter for GrammarParser {
    fn interpret(&self, core: &mut Core, line: &str) -> CmdResult {
        let node = parse_line(line)?;
        log::trace!("grammar: {:?}", node);
        exec(core, &node)
    }
}

/// Parse one line into its syntax tree
pub fn parse_line(text: &str) -> Result<Node, CmdError> {
    let mut pairs = CmdGrammar::parse(Rule::line, text).map_err(|e| {
        let col = match e.line_col {
            LineColLocation::Pos((_, col)) | LineColLocation::Span((_, col), _) => col,
        };
        CmdError::Syntax(format!("unexpected input at column {}", col))
    })?;
    let node = pairs
        .next()
        .and_then(|line| line.into_inner().find(|p| p.as_rule() != Rule::EOI))
        .map(tree::build_seq)
        .unwrap_or(Node::Empty);
    Ok(node)
}

fn exec(core: &mut Core, node: &Node) -> CmdResult {
    match node {
        Node::Empty => Ok(0),
        Node::Repeat { count, body, text } => flow::repeat(core, *count, text, |core| exec(core, body)),
        Node::Sequence(left, right) => flow::sequence(core, |core| exec(core, left), |core| exec(core, right)),
        Node::Quoted(stmt) => flow::run_quoted(core, stmt),
        Node::Pipe { left, dest } => {
            pipe::run_piped(core, &PipeDest::parse(dest), |core| exec(core, left))
        }
        Node::And(left, right) => flow::and_then(core, |core| exec(core, left), |core| exec(core, right)),
        Node::Help { prefix, detail, grep } => flow::help(core, prefix, *detail, grep.as_deref()),
        Node::UsageHelp(text) => {
            core.cons.print(text);
            Ok(0)
        }
        Node::Redirect {
            command,
            op,
            target,
            trailing,
        } => exec_redirect(core, command, op, target, trailing),
        Node::Raw(text) => registry::dispatch(core, text),
        Node::Simple(simple) => exec_simple(core, simple),
    }
}

fn exec_redirect(core: &mut Core, command: &Node, op: &str, target: &str, trailing: &[String]) -> CmdResult {
    let redirect = Redirect {
        op: RedirectOp::parse(op)?,
        target: RedirectTarget::parse(target)?,
    };
    let bodies: Vec<ClauseBody> = trailing.iter().map(|b| ClauseBody::Modifier(b)).collect();
    let mods = match modifier::parse_clauses(&bodies)? {
        ParsedClauses::Help(help) => {
            core.cons.print(help);
            return Ok(0);
        }
        ParsedClauses::Run(clauses) => clauses.modifiers,
    };
    log::debug!("grammar: redirect {:?}", redirect);
    modifier::with_modifiers(core, &mods, |core| {
        pipe::run_redirected(core, &redirect, |core| exec(core, command))
    })
}

fn exec_simple(core: &mut Core, simple: &Simple) -> CmdResult {
    if !simple.substitutions.is_empty() {
        let expanded = expand(core, simple)?;
        log::debug!("grammar: substituted '{}' -> '{}'", simple.source, expanded);
        let node = parse_line(&expanded)?;
        return exec(core, &node);
    }
    let bodies: Vec<ClauseBody> = simple
        .clauses
        .iter()
        .map(|c| match c.level {
            1 => ClauseBody::Modifier(&c.body),
            level => ClauseBody::Iterator(level, &c.body),
        })
        .collect();
    let run = |core: &mut Core| flow::run_clauses(core, &simple.command, &bodies);
    match &simple.grep {
        Some(spec) => flow::with_grep(core, spec, run),
        None => run(core),
    }
}

/// Source of `simple` with every substitution replaced by its output
fn expand(core: &mut Core, simple: &Simple) -> Result<String, CmdError> {
    let mut edits = Vec::with_capacity(simple.substitutions.len());
    for subst in &simple.substitutions {
        edits.push(Edit {
            old_text: simple.source[subst.range.clone()].to_string(),
            new_text: flow::splice(core, &subst.inner, subst.discard, subst.in_dquote)?,
            range: subst.range.clone(),
        });
    }
    Ok(tree::apply_edits(&simple.source, &edits))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(line: &str) -> Simple {
        match parse_line(line).unwrap() {
            Node::Simple(s) => s,
            other => panic!("not a simple statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(parse_line("").unwrap(), Node::Empty);
        assert_eq!(parse_line("  # note").unwrap(), Node::Empty);
        assert!(matches!(parse_line("?e a; ?e b").unwrap(), Node::Sequence(..)));
        assert!(matches!(parse_line("?e a;").unwrap(), Node::Sequence(_, r) if *r == Node::Empty));
        assert!(matches!(parse_line("3 ?e a; ?e b").unwrap(), Node::Repeat { count: 3, .. }));
        assert!(matches!(parse_line("?e a | cat").unwrap(), Node::Pipe { .. }));
        assert!(matches!(parse_line("#!python").unwrap(), Node::Raw(_)));
        assert!(matches!(parse_line("p?*~x").unwrap(), Node::Help { detail: 0, .. }));
        assert!(matches!(parse_line("?e a > ?").unwrap(), Node::UsageHelp(_)));
    }

    #[test]
    fn test_and_folds_right() {
        match parse_line("?e a && ?e b && ?e c").unwrap() {
            Node::And(left, right) => {
                assert!(matches!(*left, Node::Simple(_)));
                assert!(matches!(*right, Node::And(..)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_simple_clauses() {
        let s = simple("px 16 @ 0x10 @a:x86 @@ f* ~foo");
        assert_eq!(s.command, "px 16");
        assert_eq!(
            s.clauses,
            vec![
                ClauseText { level: 1, body: " 0x10 ".into() },
                ClauseText { level: 1, body: "a:x86 ".into() },
                ClauseText { level: 2, body: " f* ".into() },
            ]
        );
        assert_eq!(s.grep.as_deref(), Some("foo"));
    }

    #[test]
    fn test_redirect_parts() {
        match parse_line("?e hi 2> err.txt @ 4").unwrap() {
            Node::Redirect { op, target, trailing, .. } => {
                assert_eq!(op, "2>");
                assert_eq!(target, "err.txt");
                assert_eq!(trailing, vec![" 4".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_line("?e a > b c").is_err());
        assert!(parse_line("?e a > `?e f`").is_err());
        assert!(parse_line("?e a > $x @@ b").is_err());
    }

    #[test]
    fn test_substitution_spans() {
        let s = simple("?e `?e a` \"x `?e b`\" ``?e c``");
        let found: Vec<(&str, bool, bool)> = s
            .substitutions
            .iter()
            .map(|t| (t.inner.as_str(), t.discard, t.in_dquote))
            .collect();
        assert_eq!(
            found,
            vec![("?e a", false, false), ("?e b", false, true), ("?e c", true, false)]
        );
        assert_eq!(&s.source[s.substitutions[0].range.clone()], "`?e a`");
    }

    #[test]
    fn test_expand_keeps_rest_of_line() {
        let mut core = Core::default();
        let s = simple("s `echo hi` @ 4");
        assert_eq!(expand(&mut core, &s).unwrap(), "s hi @ 4");
    }

    #[test]
    fn test_quoted_statement() {
        match parse_line("\"?e a;b\" @ 0x10 ; ?e c").unwrap() {
            Node::Sequence(head, _) => match *head {
                Node::Quoted(stmt) => {
                    assert_eq!(stmt.body, "?e a;b");
                    assert_eq!(stmt.at.as_deref(), Some("0x10"));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_line("\"px\" junk").is_err());
    }

    #[test]
    fn test_syntax_error_column() {
        match parse_line("?e \"open") {
            Err(CmdError::Syntax(msg)) => assert!(msg.contains("column")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
