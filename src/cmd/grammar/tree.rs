//! Tree - Syntax tree of one command line
//!
//! Built from the pest parse of a line. Nodes keep the raw text of their
//! clauses; clause bodies are parsed when the node runs.

use std::ops::Range;

use pest::iterators::Pair;

use super::Rule;
use crate::cmd::args;
use crate::cmd::flow::{self, QuotedOutput, QuotedStmt};

/// A substitution found inside a simple statement
#[derive(Debug, Clone, PartialEq)]
pub struct SubstSpan {
    /// Relative to the statement source
    pub range: Range<usize>,
    pub inner: String,
    pub discard: bool,
    pub in_dquote: bool,
}

/// One `@`, `@@` or `@@@` clause
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseText {
    /// 1 for `@`, 2 or 3 for the iterator levels
    pub level: u8,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Simple {
    pub source: String,
    pub substitutions: Vec<SubstSpan>,
    pub command: String,
    pub clauses: Vec<ClauseText>,
    pub grep: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Empty,
    Repeat {
        count: u64,
        body: Box<Node>,
        text: String,
    },
    Sequence(Box<Node>, Box<Node>),
    Quoted(QuotedStmt),
    Pipe {
        left: Box<Node>,
        dest: String,
    },
    And(Box<Node>, Box<Node>),
    Help {
        prefix: String,
        detail: usize,
        grep: Option<String>,
    },
    /// `> ?` and friends
    UsageHelp(&'static str),
    Redirect {
        command: Box<Node>,
        op: String,
        target: String,
        trailing: Vec<String>,
    },
    /// `#!...` and `#?...` go to the registry untouched
    Raw(String),
    Simple(Simple),
}

/// Build the node for any rule that can stand where `seq` is expected
pub fn build_seq(pair: Pair<Rule>) -> Node {
    match pair.as_rule() {
        Rule::repeat_stmt => {
            let mut inner = pair.into_inner();
            let count = inner
                .next()
                .map(|c| c.as_str().parse().unwrap_or(u64::MAX))
                .unwrap_or(0);
            match inner.next() {
                Some(body) => Node::Repeat {
                    count,
                    text: args::trim_ws(body.as_str()).to_string(),
                    body: Box::new(build_seq(body)),
                },
                None => Node::Empty,
            }
        }
        Rule::quoted_seq | Rule::stmt_seq => {
            let mut inner = pair.into_inner();
            let head = match inner.next() {
                Some(first) if first.as_rule() == Rule::quoted_stmt => Node::Quoted(build_quoted(first)),
                Some(first) => build_pipeline(first),
                None => Node::Empty,
            };
            match inner.next() {
                Some(semi) if semi.as_rule() == Rule::semi => {
                    let tail = inner.next().map(build_seq).unwrap_or(Node::Empty);
                    Node::Sequence(Box::new(head), Box::new(tail))
                }
                _ => head,
            }
        }
        Rule::hash_stmt => Node::Raw(pair.as_str().to_string()),
        _ => Node::Empty,
    }
}

fn build_quoted(pair: Pair<Rule>) -> QuotedStmt {
    let mut stmt = QuotedStmt {
        body: String::new(),
        at: None,
        output: None,
    };
    let mut op = None;
    for part in pair.into_inner() {
        let text = part.as_str().to_string();
        match part.as_rule() {
            Rule::quoted_text => stmt.body = text,
            Rule::quoted_addr => stmt.at = Some(text),
            Rule::quoted_op => op = Some(text),
            Rule::quoted_target => {
                stmt.output = Some(QuotedOutput::Redirect {
                    op: op.take().unwrap_or_else(|| ">".to_string()),
                    target: text,
                })
            }
            Rule::quoted_shell => stmt.output = Some(QuotedOutput::Pipe(text)),
            _ => {}
        }
    }
    stmt
}

fn build_pipeline(pair: Pair<Rule>) -> Node {
    let mut inner = pair.into_inner();
    let mut node = inner.next().map(build_and).unwrap_or(Node::Empty);
    for dest in inner {
        node = Node::Pipe {
            left: Box::new(node),
            dest: dest.as_str().to_string(),
        };
    }
    node
}

fn build_and(pair: Pair<Rule>) -> Node {
    let mut stmts: Vec<Node> = pair.into_inner().map(build_redirect).collect();
    let mut node = stmts.pop().unwrap_or(Node::Empty);
    while let Some(left) = stmts.pop() {
        node = Node::And(Box::new(left), Box::new(node));
    }
    node
}

fn build_redirect(pair: Pair<Rule>) -> Node {
    let mut inner = pair.into_inner();
    let command = match inner.next() {
        Some(stmt) if stmt.as_rule() == Rule::help_stmt => build_help(stmt),
        Some(stmt) => build_simple(stmt),
        None => Node::Empty,
    };
    let mut op = None;
    let mut target = None;
    let mut trailing = Vec::new();
    for part in inner {
        match part.as_rule() {
            Rule::redirect_help => return Node::UsageHelp(crate::cmd::pipe::REDIRECT_HELP),
            Rule::redirect_op => op = Some(part.as_str().to_string()),
            Rule::redirect_target => target = Some(part.as_str().to_string()),
            Rule::trailing_mod => trailing.extend(part.into_inner().map(|b| b.as_str().to_string())),
            _ => {}
        }
    }
    match (op, target) {
        (Some(op), Some(target)) => Node::Redirect {
            command: Box::new(command),
            op,
            target,
            trailing,
        },
        _ => command,
    }
}

fn build_help(pair: Pair<Rule>) -> Node {
    let mut inner = pair.into_inner();
    let word = inner.next().map(|w| w.as_str()).unwrap_or("");
    let grep = inner.next().map(|g| g.as_str().to_string());
    match flow::split_help_word(word) {
        Some((prefix, marks)) => Node::Help {
            prefix: prefix.to_string(),
            detail: marks - 1,
            grep,
        },
        None => Node::Empty,
    }
}

fn build_simple(pair: Pair<Rule>) -> Node {
    let source = pair.as_str();
    if args::trim_ws(source).is_empty() {
        return Node::Empty;
    }
    let base = pair.as_span().start();
    let mut quoted: Vec<Range<usize>> = Vec::new();
    let mut substitutions = Vec::new();
    for part in pair.clone().into_inner().flatten() {
        let span = part.as_span();
        let range = span.start() - base..span.end() - base;
        let (discard, body) = match part.as_rule() {
            Rule::dq_str => {
                quoted.push(range);
                continue;
            }
            Rule::subst_tick | Rule::subst_paren => (false, part.into_inner().next()),
            Rule::subst_discard => (true, part.into_inner().next()),
            _ => continue,
        };
        let in_dquote = quoted.iter().any(|q| q.start < range.start && range.end <= q.end);
        substitutions.push(SubstSpan {
            inner: body.map(|b| b.as_str().to_string()).unwrap_or_default(),
            range,
            discard,
            in_dquote,
        });
    }

    let mut simple = Simple {
        source: source.to_string(),
        substitutions,
        command: String::new(),
        clauses: Vec::new(),
        grep: None,
    };
    for part in pair.into_inner() {
        let rule = part.as_rule();
        let body = || part.clone().into_inner().next().map(|b| b.as_str().to_string()).unwrap_or_default();
        match rule {
            Rule::base_cmd => simple.command = part.as_str().to_string(),
            Rule::modifier => simple.clauses.push(ClauseText { level: 1, body: body() }),
            Rule::iter2 => simple.clauses.push(ClauseText { level: 2, body: body() }),
            Rule::iter3 => simple.clauses.push(ClauseText { level: 3, body: body() }),
            Rule::grep => simple.grep = Some(body()),
            _ => {}
        }
    }
    Node::Simple(simple)
}

/// Source text with every edit applied; edits are sorted and disjoint
pub fn apply_edits(source: &str, edits: &[Edit]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for edit in edits {
        debug_assert_eq!(&source[edit.range.clone()], edit.old_text);
        out.push_str(&source[last..edit.range.start]);
        out.push_str(&edit.new_text);
        last = edit.range.end;
    }
    out.push_str(&source[last..]);
    out
}

/// Replacement of one substitution span
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub old_text: String,
    pub new_text: String,
    pub range: Range<usize>,
}
