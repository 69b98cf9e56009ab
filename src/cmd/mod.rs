//! Command module - The command language interpreter
//!
//! A line of text goes through one of two interchangeable front ends (the
//! step-wise legacy parser or the pest grammar). Both decompose it into the
//! same constructs and hand the resulting plain commands to the registry.
//! Everything that executes a construct (modifiers, iterators, pipes,
//! redirections, substitution) is shared between the two.

pub mod alias;
pub mod args;
pub mod builtins;
pub mod flow;
pub mod grammar;
pub mod help;
pub mod iter;
pub mod legacy;
pub mod modifier;
pub mod pipe;
pub mod registry;

use thiserror::Error;

use crate::core::{ConfigError, Core, DebugError, MemoryError, NumError};

/// Command errors
#[derive(Error, Debug)]
pub enum CmdError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    /// A handler rejected its input
    #[error("{0}")]
    Handler(String),

    #[error("{0}")]
    Invalid(String),

    /// Files, processes and other outside resources
    #[error("{0}")]
    Resource(String),

    #[error("{0}")]
    Sandbox(String),

    #[error("{0}")]
    Declined(String),

    #[error("Maximum command depth exceeded")]
    DepthExceeded,

    #[error(transparent)]
    Num(#[from] NumError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Debug(#[from] DebugError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CmdError {
    /// Fatal errors abort loops instead of being reported per iteration
    pub fn is_fatal(&self) -> bool {
        matches!(self, CmdError::DepthExceeded | CmdError::Declined(_))
    }
}

/// Status of a command. `Ok(n)` with `n < 0` is a quiet failure.
pub type CmdResult = Result<i32, CmdError>;

pub fn succeeded(result: &CmdResult) -> bool {
    matches!(result, Ok(n) if *n >= 0)
}

/// Which front end interprets command lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserKind {
    #[default]
    Legacy,
    Grammar,
}

/// A front end: turns one line into executed commands
pub trait Interpreter {
    fn interpret(&self, core: &mut Core, line: &str) -> CmdResult;
}

pub fn interpreter(kind: ParserKind) -> &'static dyn Interpreter {
    match kind {
        ParserKind::Legacy => &legacy::LegacyParser,
        ParserKind::Grammar => &grammar::GrammarParser,
    }
}

const HTTP_GET: &str = "GET /cmd/";
const HTTP_HEADER: &str = "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: -1\r\n\r\n";

impl Core {
    /// Execute command text. Each line runs in turn; errors are reported
    /// on the console and stop the remaining lines.
    pub fn cmd(&mut self, text: &str) -> i32 {
        if self.depth == 0 {
            self.clear_interrupt();
        }
        let mut status = 0;
        for line in text.split('\n') {
            let line = line.trim_end_matches('\r');
            status = match self.cmd_line(line) {
                Ok(n) => n,
                Err(e) => {
                    self.report(&e);
                    -1
                }
            };
            self.yield_tasks();
            if status < 0 || self.quit || self.is_interrupted() {
                break;
            }
        }
        status
    }

    fn cmd_line(&mut self, line: &str) -> CmdResult {
        let line = args::trim_ws(line);
        if line.is_empty() {
            if self.config.get_b("cmd.repeat") {
                if let Some(last) = self.lastcmd.clone() {
                    return self.run_nested(&last);
                }
            }
            return Ok(0);
        }
        // `|` at column 0 is a comment unless it asks for help
        if line.starts_with('|') && !line.starts_with("|?") {
            return Ok(0);
        }
        let body = match line.strip_prefix(HTTP_GET) {
            Some(rest) => {
                let cmd = rest.split(" HTTP/").next().unwrap_or(rest);
                self.cons.print(HTTP_HEADER);
                cmd.replace("%20", " ")
            }
            None => line.to_string(),
        };
        if !body.starts_with('.') {
            self.lastcmd = Some(body.clone());
        }
        self.run_nested(&body)
    }

    /// Interpret one line one level deeper. Text with several lines runs
    /// them in order and stops at the first failure.
    pub fn run_nested(&mut self, text: &str) -> CmdResult {
        let limit = self.config.get_i("cmd.depth").max(1) as usize;
        if self.depth >= limit {
            return Err(CmdError::DepthExceeded);
        }
        self.depth += 1;
        let result = self.run_lines(text);
        self.depth -= 1;
        result
    }

    fn run_lines(&mut self, text: &str) -> CmdResult {
        let front = interpreter(self.parser());
        let mut status = Ok(0);
        for line in text.lines() {
            status = front.interpret(self, line);
            if !succeeded(&status) || self.quit {
                break;
            }
        }
        status
    }

    /// Run `text` and return what it printed
    pub fn cmd_str(&mut self, text: &str) -> Result<String, CmdError> {
        self.cons.push();
        let result = self.run_nested(text);
        let out = self.cons.pop();
        result.map(|_| out)
    }

    /// Run every line of a script. Failed lines are reported; the script
    /// stops at the first one.
    pub fn run_script(&mut self, text: &str) -> CmdResult {
        let mut status = 0;
        for line in text.lines() {
            status = match self.run_nested(line) {
                Ok(n) => n,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.report(&e);
                    -1
                }
            };
            self.yield_tasks();
            if status < 0 || self.quit || self.is_interrupted() {
                break;
            }
        }
        Ok(status)
    }
}
