//! Session - The core session state
//!
//! One `Core` holds everything a command can observe or change: the seek,
//! the block size, configuration, flags, IO, analysis, the debugger model,
//! the console and the command registry. Commands receive `&mut Core`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::{Anal, BinInfo};
use crate::cmd::alias::AliasTable;
use crate::cmd::registry::Registry;
use crate::cmd::{CmdError, ParserKind};
use crate::core::config::Config;
use crate::core::cons::Console;
use crate::core::debugger::Debugger;
use crate::core::flags::Flags;
use crate::core::memory::Io;
use crate::core::num::{self, Resolver};
use crate::core::sdb::Sdb;
use crate::core::tasks::TaskQueue;

/// Largest block size a command may request
pub const BLOCK_MAX: u64 = 0x10_0000;
pub const BLOCK_DEFAULT: u64 = 0x100;

/// Options fixed when the session is created
#[derive(Debug, Clone, Copy)]
pub struct CoreOptions {
    pub parser: ParserKind,
    pub sandbox: bool,
    pub interactive: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            parser: ParserKind::Legacy,
            sandbox: false,
            interactive: false,
        }
    }
}

pub struct Core {
    pub offset: u64,
    pub blocksize: u64,
    pub config: Config,
    pub cons: Console,
    pub flags: Flags,
    pub io: Io,
    pub anal: Anal,
    pub bin: Option<BinInfo>,
    pub dbg: Debugger,
    pub sdb: Sdb,
    pub aliases: AliasTable,
    pub registry: Registry,
    pub tasks: TaskQueue,
    /// Result of the last numeric evaluation (`$?`)
    pub num_value: u64,
    pub lastcmd: Option<String>,
    pub quit: bool,
    parser: ParserKind,
    interrupted: Arc<AtomicBool>,
    pub(crate) depth: usize,
    /// Live modifier frames; tasks never run while one is open
    pub(crate) frames: usize,
}

impl Core {
    pub fn new(options: CoreOptions) -> Self {
        let mut config = Config::new();
        // Both keys exist in the default table
        let _ = config.set_b("scr.interactive", options.interactive);
        let _ = config.set_b("cfg.sandbox", options.sandbox);
        log::debug!(
            "session: parser={:?} sandbox={} interactive={}",
            options.parser,
            options.sandbox,
            options.interactive
        );
        Self {
            offset: 0,
            blocksize: BLOCK_DEFAULT,
            config,
            cons: Console::new(),
            flags: Flags::new(),
            io: Io::new(),
            anal: Anal::new(),
            bin: None,
            dbg: Debugger::new(),
            sdb: Sdb::new(),
            aliases: AliasTable::new(),
            registry: Registry::with_builtins(),
            tasks: TaskQueue::new(),
            num_value: 0,
            lastcmd: None,
            quit: false,
            parser: options.parser,
            interrupted: Arc::new(AtomicBool::new(false)),
            depth: 0,
            frames: 0,
        }
    }

    pub fn parser(&self) -> ParserKind {
        self.parser
    }

    pub fn set_parser(&mut self, parser: ParserKind) {
        self.parser = parser;
    }

    pub fn seek(&mut self, addr: u64) {
        log::trace!("seek {:#x}", addr);
        self.offset = addr;
    }

    /// Change the block size, returning the previous one
    pub fn set_blocksize(&mut self, size: u64) -> Result<u64, CmdError> {
        if size == 0 || size > BLOCK_MAX {
            return Err(CmdError::Invalid(format!(
                "block size {:#x} out of range (1..={:#x})",
                size, BLOCK_MAX
            )));
        }
        Ok(std::mem::replace(&mut self.blocksize, size))
    }

    /// Bytes of the current block
    pub fn block(&self) -> Vec<u8> {
        self.io.read_at(self.offset, self.blocksize as usize)
    }

    /// Evaluate a numeric expression against this session
    pub fn num(&mut self, expr: &str) -> Result<u64, CmdError> {
        let value = num::eval(expr, &*self)?;
        self.num_value = value;
        Ok(value)
    }

    /// Evaluate `expr` as a signed count; a leading `-` negates the rest
    pub fn num_signed(&mut self, expr: &str) -> Result<i64, CmdError> {
        let expr = expr.trim();
        let value = match expr.strip_prefix('-') {
            Some(rest) => -i128::from(self.num(rest)?),
            None => i128::from(self.num(expr)?),
        };
        i64::try_from(value).map_err(|_| CmdError::Invalid(format!("'{}' is out of range", expr)))
    }

    pub fn is_sandboxed(&self) -> bool {
        self.config.get_b("cfg.sandbox")
    }

    pub fn is_interactive(&self) -> bool {
        self.config.get_b("scr.interactive")
    }

    /// Ask the user, honoring `scr.interactive`
    pub fn yes_no(&mut self, question: &str, default: bool) -> bool {
        let interactive = self.is_interactive();
        self.cons.yes_no(question, default, interactive)
    }

    /// Shared flag set by the SIGINT handler
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    /// Write a diagnostic for a failed command
    pub fn report(&mut self, err: &CmdError) {
        log::debug!("command failed: {:?}", err);
        let msg = match err {
            CmdError::DepthExceeded => "That was too deep".to_string(),
            other => other.to_string(),
        };
        self.cons.eprintln(&format!("[!] {}", msg));
    }

    /// Run pending background tasks. Does nothing while a modifier frame is
    /// open or another task is already running.
    pub fn yield_tasks(&mut self) {
        if self.frames > 0 || self.tasks.is_running() {
            return;
        }
        while let Some((id, cmd)) = self.tasks.begin_next() {
            log::debug!("task {}: running '{}'", id, cmd);
            let (offset, blocksize) = (self.offset, self.blocksize);
            self.cons.push();
            let status = match self.run_nested(&cmd) {
                Ok(status) => status,
                Err(e) => {
                    self.report(&e);
                    -1
                }
            };
            let output = self.cons.pop();
            self.offset = offset;
            self.blocksize = blocksize;
            self.tasks.finish(id, output, status);
        }
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreOptions::default())
    }
}

impl Resolver for Core {
    fn resolve(&self, name: &str) -> Option<u64> {
        match name {
            "$$" => Some(self.offset),
            "$b" => Some(self.blocksize),
            "$?" => Some(self.num_value),
            "$s" => Some(self.bin.as_ref().map_or(0, |b| b.data.len() as u64)),
            "entry0" => self
                .flags
                .get("entry0")
                .map(|f| f.offset)
                .or_else(|| self.bin.as_ref().map(|b| b.entry_point)),
            _ => self
                .flags
                .get(name)
                .map(|f| f.offset)
                .or_else(|| self.dbg.reg_get(name).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver() {
        let mut core = Core::default();
        core.seek(0x40);
        core.flags.set("sym.main", 0x1000, 1);
        assert_eq!(core.num("$$+sym.main").unwrap(), 0x1040);
        assert_eq!(core.num("$?").unwrap(), 0x1040);
        assert!(core.num("nope").is_err());
    }

    #[test]
    fn test_blocksize_bounds() {
        let mut core = Core::default();
        assert_eq!(core.set_blocksize(0x20).unwrap(), BLOCK_DEFAULT);
        assert!(core.set_blocksize(0).is_err());
        assert!(core.set_blocksize(BLOCK_MAX + 1).is_err());
        assert_eq!(core.blocksize, 0x20);
    }

    #[test]
    fn test_num_signed_range() {
        let mut core = Core::default();
        assert_eq!(core.num_signed(" -3 ").unwrap(), -3);
        assert_eq!(core.num_signed("-0x8000000000000000").unwrap(), i64::MIN);
        assert_eq!(core.num_signed("0x7fffffffffffffff").unwrap(), i64::MAX);
        assert!(matches!(core.num_signed("0x8000000000000000"), Err(CmdError::Invalid(_))));
        assert!(matches!(core.num_signed("-0x8000000000000001"), Err(CmdError::Invalid(_))));
    }

    #[test]
    fn test_tasks_skip_inside_frames() {
        let mut core = Core::default();
        core.tasks.enqueue("?e hi", false);
        core.frames = 1;
        core.yield_tasks();
        assert!(core.tasks.has_pending());
        core.frames = 0;
        core.yield_tasks();
        assert_eq!(core.tasks.list()[0].result.as_deref(), Some("hi\n"));
    }
}
