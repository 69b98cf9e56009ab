//! `?` family, `echo` and `#`

use super::{desc, num_arg};
use crate::cmd::registry::Registry;
use crate::cmd::{args, CmdError, CmdResult};
use crate::core::Core;

pub fn register(registry: &mut Registry) {
    registry.add(desc("?", "", "show the command list"), cmd_help);
    registry.add(desc("?*", "", "list every command"), cmd_help);
    registry.add(
        desc("?e", "[text]", "print text and a newline").detail("quotes and escapes are resolved"),
        cmd_echo,
    );
    registry.add(desc("echo", "[text]", "same as ?e"), cmd_echo);
    registry.add(
        desc("?v", "expr", "print the value of an expression in hex").detail("sets $?"),
        cmd_value,
    );
    registry.add(desc("#", "!lang | ?", "scripting hooks"), cmd_hash);
}

fn cmd_help(core: &mut Core, _input: &str) -> CmdResult {
    let text = core.registry.help().recursive_help("", 0);
    core.cons.print(&text);
    Ok(0)
}

fn cmd_echo(core: &mut Core, input: &str) -> CmdResult {
    let text = args::unquote(input);
    core.cons.println(&text);
    Ok(0)
}

fn cmd_value(core: &mut Core, input: &str) -> CmdResult {
    let value = num_arg(core, input)?.unwrap_or(core.num_value);
    core.cons.println(&format!("{:#x}", value));
    Ok(0)
}

fn cmd_hash(core: &mut Core, input: &str) -> CmdResult {
    if let Some(lang) = input.strip_prefix('!') {
        let lang = args::trim_ws(lang);
        if lang.is_empty() {
            return Ok(0);
        }
        return Err(CmdError::Handler(format!("no interpreter for '{}'", lang)));
    }
    if input.starts_with('?') {
        core.cons.print("| #!lang       run a script interpreter (none available)\n");
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_and_value() {
        let mut core = Core::default();
        core.cmd("?e 'a  b' c\\;d");
        core.cmd("?v 0x10+2");
        assert_eq!(core.cons.take_output(), "a  b c;d\n0x12\n");
        assert_eq!(core.num_value, 0x12);
    }

    #[test]
    fn test_hash_bang() {
        let mut core = Core::default();
        assert!(core.cmd("#!python") < 0);
        assert!(core.cons.take_errors().contains("no interpreter for 'python'"));
    }
}
