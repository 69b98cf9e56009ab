//! Scripting commands: `$` aliases, `!` shell, `.` interpret, `&` tasks

use super::{deny_in_sandbox, desc};
use crate::cmd::alias::{self, ALIAS_HELP};
use crate::cmd::registry::Registry;
use crate::cmd::{args, pipe, CmdError, CmdResult};
use crate::core::Core;

const TASK_HELP: &str = "\
| &               list tasks
| & cmd           run cmd in the background
| &t cmd          same, dropping the task once it finished
| &= id           show the output of a task
| &- id           delete a task
| &-*             delete every finished task
| && [id]         run pending tasks now
| &b id           cancel a pending task
";

pub fn register(registry: &mut Registry) {
    let mut alias_desc = desc("$", "[name[=value]]", "list, set or run aliases");
    for line in ALIAS_HELP.lines() {
        alias_desc = alias_desc.detail(line);
    }
    registry.add(alias_desc, alias::cmd_alias);
    registry.add(desc("!", "cmd", "run a shell command"), cmd_shell);
    registry.add(
        desc(".", "cmd | file", "interpret the output of a command")
            .detail(". file runs a script, .!cmd runs shell output"),
        cmd_interpret,
    );
    registry.add(desc("&", "[cmd]", "background tasks"), cmd_task);
}

fn cmd_shell(core: &mut Core, input: &str) -> CmdResult {
    deny_in_sandbox(core, "Shell commands are")?;
    let command = args::trim_ws(input);
    if command.is_empty() {
        return Err(CmdError::Invalid("missing shell command".into()));
    }
    log::info!("shell: {}", command);
    let output = pipe::spawn_with_input(command, "")?;
    core.cons.print(&output.stdout);
    Ok(if output.success { 0 } else { -1 })
}

fn cmd_interpret(core: &mut Core, input: &str) -> CmdResult {
    if input.starts_with(' ') || input.starts_with('\t') {
        deny_in_sandbox(core, "Reading scripts is")?;
        let path = args::unquote(input);
        let script = std::fs::read_to_string(&path)
            .map_err(|e| CmdError::Resource(format!("Cannot open '{}': {}", path, e)))?;
        log::info!("script: {}", path);
        return core.run_script(&script);
    }
    let out = match input.strip_prefix('!') {
        Some(shell) => pipe::shell_capture(core, shell)?,
        None if input.is_empty() => return Ok(0),
        None => core.cmd_str(input)?,
    };
    core.run_script(&out)
}

fn cmd_task(core: &mut Core, input: &str) -> CmdResult {
    deny_in_sandbox(core, "Tasks are")?;
    if args::trim_ws(input).is_empty() {
        let lines: Vec<String> = core
            .tasks
            .list()
            .iter()
            .map(|t| format!("{} {} {}", t.id, t.state.as_str(), t.cmd))
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    }
    if args::trim_ws(input) == "?" {
        core.cons.print(TASK_HELP);
        return Ok(0);
    }
    // Tasks run in queue order, so joining one means running them all
    if input.starts_with('&') {
        core.yield_tasks();
        return Ok(0);
    }
    if let Some(id) = input.strip_prefix('=') {
        let id = task_id(id)?;
        let task = core
            .tasks
            .get(id)
            .ok_or_else(|| CmdError::Handler(format!("no task {}", id)))?;
        let out = task.result.clone().unwrap_or_default();
        core.cons.print(&out);
        return Ok(0);
    }
    if let Some(rest) = input.strip_prefix('-') {
        if args::trim_ws(rest) == "*" {
            core.tasks.remove_finished();
        } else if !core.tasks.remove(task_id(rest)?) {
            return Err(CmdError::Handler(format!("no task {}", args::trim_ws(rest))));
        }
        return Ok(0);
    }
    if let Some(id) = input.strip_prefix('b') {
        let id = task_id(id)?;
        if !core.tasks.cancel(id) {
            return Err(CmdError::Handler(format!("task {} is not pending", id)));
        }
        return Ok(0);
    }
    let (cmd, transient) = match input.strip_prefix('t') {
        Some(cmd) if cmd.starts_with([' ', '\t']) => (cmd, true),
        _ => (input, false),
    };
    let id = core.tasks.enqueue(args::trim_ws(cmd), transient);
    core.cons.println(&format!("{}", id));
    Ok(0)
}

fn task_id(text: &str) -> Result<u32, CmdError> {
    let text = args::trim_ws(text);
    text.parse()
        .map_err(|_| CmdError::Invalid(format!("bad task id '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreOptions;
    use std::io::Write;

    #[test]
    fn test_task_queue_commands() {
        let mut core = Core::default();
        core.tasks.enqueue("?e queued", false);
        core.cmd("&&");
        core.cmd("&= 1");
        assert_eq!(core.cons.take_output(), "queued\n");
        core.cmd("&-*");
        assert!(core.tasks.list().is_empty());

        // only finished tasks go; this one is still pending when `&-*` runs
        core.tasks.enqueue("?e later", false);
        core.cmd("&-*");
        assert_eq!(core.tasks.list().len(), 1);
        core.cmd("&-*");
        assert!(core.tasks.list().is_empty());
    }

    #[test]
    fn test_interpret_output_and_script() {
        let mut core = Core::default();
        core.cmd("\"$cmds=$s 0x80\"");
        core.cmd(".$cmds");
        assert_eq!(core.offset, 0x80);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s 0x90\n?e done").unwrap();
        core.cmd(&format!(". {}", file.path().display()));
        assert_eq!(core.offset, 0x90);
        assert_eq!(core.cons.take_output(), "done\n");
    }

    #[test]
    fn test_sandbox_refusals() {
        let mut core = Core::new(CoreOptions {
            sandbox: true,
            ..CoreOptions::default()
        });
        assert!(core.cmd("!echo hi") < 0);
        assert!(core.cmd("& ?e x") < 0);
        assert!(core.cons.take_errors().contains("sandbox"));
        assert_eq!(core.cons.take_output(), "");
    }

    #[test]
    fn test_shell_output() {
        let mut core = Core::default();
        assert_eq!(core.cmd("!printf abc"), 0);
        assert_eq!(core.cons.take_output(), "abc");
    }
}
