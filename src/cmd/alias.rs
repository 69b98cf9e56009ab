//! Alias - User-defined command aliases and the `$` command

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{args, pipe, CmdError, CmdResult};
use crate::core::Core;

#[derive(Debug, Clone, PartialEq)]
pub enum AliasValue {
    Raw(String),
    /// Kept encoded; decoded when used
    Base64(String),
}

impl AliasValue {
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix("base64:") {
            Some(encoded) => AliasValue::Base64(encoded.to_string()),
            None => AliasValue::Raw(text.to_string()),
        }
    }

    pub fn decoded(&self) -> String {
        match self {
            AliasValue::Raw(text) => text.clone(),
            AliasValue::Base64(encoded) => STANDARD
                .decode(encoded.trim())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default(),
        }
    }

    fn stored(&self) -> String {
        match self {
            AliasValue::Raw(text) => text.clone(),
            AliasValue::Base64(encoded) => format!("base64:{}", encoded),
        }
    }
}

/// Ordered alias table; names are stored without the `$` marker
#[derive(Debug, Default)]
pub struct AliasTable {
    entries: Vec<(String, AliasValue)>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AliasValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Last write wins; the entry keeps its position
    pub fn set(&mut self, name: &str, value: AliasValue) {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != name);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AliasValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

pub const ALIAS_HELP: &str = "\
Usage: $alias[=cmd] [args...]
| $               list aliases
| $*              list aliases and their values
| $**             list aliases with decoded values
| $foo=cmd        define alias (base64:... and '...' values accepted)
| $foo=-          edit the alias in cfg.editor
| $foo=           delete alias
| $-foo           delete alias
| $-*             delete every alias
| $foo:=expr      set flag foo to expr
| $foo+=expr      add expr to flag foo
| $foo-=expr      subtract expr from flag foo
| $foo?           print the alias value
| $foo?n          same, without trailing newline
| $foo [args]     run the alias with args appended
| $foo=$text      alias that prints text
";

/// Handler for the `$` command
pub fn cmd_alias(core: &mut Core, input: &str) -> CmdResult {
    let input = args::trim_ws(input);
    if input.is_empty() {
        let keys: Vec<String> = core.aliases.keys().map(|k| format!("${}", k)).collect();
        for key in keys {
            core.cons.println(&key);
        }
        return Ok(0);
    }
    if input == "?" {
        core.cons.print(ALIAS_HELP);
        return Ok(0);
    }
    if let Some(rest) = input.strip_prefix('*') {
        let decoded = rest.starts_with('*');
        let lines: Vec<String> = core
            .aliases
            .iter()
            .map(|(k, v)| {
                let value = if decoded { v.decoded() } else { v.stored() };
                format!("${}={}", k, value)
            })
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    if let Some(name) = input.strip_prefix('-') {
        let name = args::trim_ws(name);
        if name == "*" {
            core.aliases.clear();
        } else {
            core.aliases.delete(name.trim_start_matches('$'));
        }
        return Ok(0);
    }

    let space = input.find([' ', '\t']);
    match input.find('=') {
        Some(eq) if space.map_or(true, |sp| eq < sp) => define(core, &input[..eq], &input[eq + 1..]),
        _ => {
            let (name, rest) = match space {
                Some(sp) => (&input[..sp], &input[sp + 1..]),
                None => (input, ""),
            };
            if space.is_none() {
                if let Some(name) = name.strip_suffix("?n") {
                    return show(core, name, false);
                }
                if let Some(name) = name.strip_suffix('?') {
                    return show(core, name, true);
                }
            }
            invoke(core, name, rest)
        }
    }
}

fn define(core: &mut Core, lhs: &str, value: &str) -> CmdResult {
    if let Some((name, op)) = quick_set(lhs) {
        let amount = core.num(value)?;
        let current = || core.flags.get(name).map(|f| f.offset).unwrap_or(0);
        let at = match op {
            ':' => amount,
            '+' => current().wrapping_add(amount),
            _ => current().wrapping_sub(amount),
        };
        core.flags.set(name, at, 1);
        return Ok(0);
    }
    let name = lhs;
    let value = strip_single_quotes(value);
    if value.is_empty() {
        core.aliases.delete(name);
        return Ok(0);
    }
    if value == "-" {
        let current = core.aliases.get(name).map(AliasValue::decoded).unwrap_or_default();
        let edited = pipe::edit_text(core, &current)?;
        core.aliases.set(name, AliasValue::Raw(edited.trim_end().to_string()));
        return Ok(0);
    }
    log::debug!("alias: ${} = {}", name, value);
    core.aliases.set(name, AliasValue::parse(value));
    Ok(0)
}

/// `name:`, `name+` or `name-` in front of `=`
fn quick_set(lhs: &str) -> Option<(&str, char)> {
    let op = lhs.chars().last()?;
    match op {
        ':' | '+' | '-' if lhs.len() > 1 => Some((&lhs[..lhs.len() - 1], op)),
        _ => None,
    }
}

fn strip_single_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn show(core: &mut Core, name: &str, newline: bool) -> CmdResult {
    match core.aliases.get(name) {
        Some(value) => {
            let text = value.decoded();
            if newline {
                core.cons.println(&text);
            } else {
                core.cons.print(&text);
            }
            Ok(0)
        }
        None => Err(CmdError::Handler(format!("unknown key '${}'", name))),
    }
}

/// Run alias `name` with `args` appended
pub fn invoke(core: &mut Core, name: &str, rest: &str) -> CmdResult {
    let value = match core.aliases.get(name) {
        Some(value) => value.decoded(),
        None => {
            if let Ok(addr) = core.num(name) {
                core.seek(addr);
                return Ok(0);
            }
            return Err(CmdError::Handler(format!("Unknown alias '{}'", name)));
        }
    };
    if let Some(text) = value.strip_prefix('$') {
        core.cons.print(text);
        if !text.ends_with('\n') {
            core.cons.print("\n");
        }
        return Ok(0);
    }
    let rest = args::trim_ws(rest);
    let line = if rest.is_empty() {
        value
    } else {
        format!("{} {}", value, rest)
    };
    log::debug!("alias: ${} -> {}", name, line);
    core.run_nested(&line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_and_overwrite() {
        let mut table = AliasTable::new();
        table.set("b", AliasValue::Raw("1".into()));
        table.set("a", AliasValue::Raw("2".into()));
        table.set("b", AliasValue::Raw("3".into()));
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(table.get("b"), Some(&AliasValue::Raw("3".into())));
        assert!(table.delete("a"));
        assert!(!table.delete("a"));
    }

    #[test]
    fn test_base64_value() {
        let value = AliasValue::parse("base64:P2UgaGk=");
        assert_eq!(value.decoded(), "?e hi");
        assert_eq!(value.stored(), "base64:P2UgaGk=");
    }

    #[test]
    fn test_alias_command() {
        let mut core = Core::default();
        core.cmd("$hi=?e hello");
        core.cmd("$hi");
        core.cmd("$hi?");
        core.cmd("$hi world");
        assert_eq!(core.cons.take_output(), "hello\n?e hello\nhello world\n");
        core.cmd("$hi=");
        assert!(core.aliases.get("hi").is_none());
    }

    #[test]
    fn test_quick_set_assigns_flags() {
        let mut core = Core::default();
        core.cmd("$ptr:=0x100");
        core.cmd("$ptr+=0x10");
        assert_eq!(core.flags.get("ptr").unwrap().offset, 0x110);
        core.cmd("$ptr-=0x20");
        assert_eq!(core.flags.get("ptr").unwrap().offset, 0xf0);
        assert!(core.aliases.get("ptr").is_none());
    }

    #[test]
    fn test_unknown_alias_seeks_to_flag() {
        let mut core = Core::default();
        core.flags.set("target", 0x4242, 1);
        core.cmd("$target");
        assert_eq!(core.offset, 0x4242);
        assert!(core.cmd("$nothing") < 0);
        assert!(core.cons.take_errors().contains("Unknown alias 'nothing'"));
    }

    #[test]
    fn test_literal_value_prints() {
        let mut core = Core::default();
        core.aliases.set("msg", AliasValue::Raw("$stored text".into()));
        core.cmd("$msg");
        assert_eq!(core.cons.take_output(), "stored text\n");
    }
}
