//! Registry - Command table and dispatch
//!
//! Handlers are looked up by the longest registered name that prefixes the
//! command text; the remainder is handed to the handler untouched.

use std::collections::HashMap;

use super::help::{CmdDescriptor, HelpTrie};
use super::{alias, args, builtins, CmdError, CmdResult};
use crate::core::Core;

pub type CmdHandler = fn(&mut Core, &str) -> CmdResult;

pub struct Registry {
    handlers: HashMap<String, CmdHandler>,
    longest: usize,
    help: HelpTrie,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            longest: 0,
            help: HelpTrie::new(),
        }
    }

    /// Registry with every built-in command
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        log::debug!(
            "registry: {} commands, {} help entries",
            registry.handlers.len(),
            registry.help.len()
        );
        registry
    }

    pub fn register(&mut self, name: &str, handler: CmdHandler) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            log::warn!("registry: '{}' registered twice", name);
        }
        self.longest = self.longest.max(name.len());
    }

    /// Register a handler together with its help descriptor
    pub fn add(&mut self, desc: CmdDescriptor, handler: CmdHandler) {
        self.register(&desc.cmd.clone(), handler);
        self.help.add(desc);
    }

    pub fn describe(&mut self, desc: CmdDescriptor) {
        self.help.add(desc);
    }

    pub fn help(&self) -> &HelpTrie {
        &self.help
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Longest registered prefix of `text`: its length and handler
    pub fn lookup(&self, text: &str) -> Option<(usize, CmdHandler)> {
        let max = self.longest.min(text.len());
        (1..=max)
            .rev()
            .filter(|&len| text.is_char_boundary(len))
            .find_map(|len| self.handlers.get(&text[..len]).map(|h| (len, *h)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one plain command
pub fn dispatch(core: &mut Core, text: &str) -> CmdResult {
    let text = args::trim_ws(text);
    if text.is_empty() {
        return Ok(0);
    }
    if let Some((len, handler)) = core.registry.lookup(text) {
        let (name, rest) = text.split_at(len);
        if args::trim_ws(rest) == "?" && !core.registry.help().under(name).is_empty() {
            let help = core.registry.help().recursive_help(name, 0);
            core.cons.print(&help);
            return Ok(0);
        }
        log::debug!("dispatch: '{}' -> {}", text, name);
        return handler(core, rest);
    }
    let (word, rest) = text
        .split_once(|c| c == ' ' || c == '\t')
        .unwrap_or((text, ""));
    if core.aliases.get(word).is_some() {
        return alias::invoke(core, word, rest);
    }
    Err(CmdError::UnknownCommand(word.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(_: &mut Core, _: &str) -> CmdResult {
        Ok(1)
    }

    fn second(_: &mut Core, _: &str) -> CmdResult {
        Ok(2)
    }

    #[test]
    fn test_longest_prefix() {
        let mut registry = Registry::new();
        registry.register("p", first);
        registry.register("px", second);
        assert_eq!(registry.lookup("pxa").map(|(len, _)| len), Some(2));
        assert_eq!(registry.lookup("pd 4").map(|(len, _)| len), Some(1));
        assert!(registry.lookup("x").is_none());
    }

    #[test]
    fn test_dispatch_passes_remainder() {
        let mut core = Core::default();
        core.cmd("s 0x40");
        assert_eq!(core.offset, 0x40);
        assert!(matches!(
            dispatch(&mut core, "zzz 1"),
            Err(CmdError::UnknownCommand(w)) if w == "zzz"
        ));
    }

    #[test]
    fn test_command_question_mark_prints_help() {
        let mut core = Core::default();
        dispatch(&mut core, "px ?").unwrap();
        assert!(core.cons.take_output().contains("px"));
    }
}
