//! Pipe - Output transport for `|` and `>`
//!
//! A pipe or redirection runs its command with output captured, then
//! delivers the text: to a shell command, a file, an alias, an editor or
//! back into the interpreter. The output configuration that was changed
//! for the transfer is restored afterwards.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::process::{Command, Stdio};

use super::alias::AliasValue;
use super::{args, CmdError, CmdResult};
use crate::core::config::ConfigHold;
use crate::core::cons::html_filter;
use crate::core::Core;

pub const PIPE_HELP: &str = "\
Usage: cmd | [dest]
| cmd | sh-cmd    pipe the output to a shell command
| cmd |           disable colors for cmd
| cmd |H          render the output as html
| cmd |T          read the output aloud
| cmd |.          run the output as commands
| cmd |?          this help
";

pub const REDIRECT_HELP: &str = "\
Usage: cmd > [file]
| cmd > file      write the output to file
| cmd >> file     append the output to file
| cmd 2> file     write the diagnostics to file
| cmd H> file     write the output as html
| cmd > $alias    store the output in an alias
| cmd >> $alias   append the output to an alias
| cmd > -         open the output in cfg.editor
";

#[derive(Debug, Clone, PartialEq)]
pub enum PipeDest {
    Shell(String),
    Plain,
    Html,
    Tts,
    Interpret,
    Help,
}

impl PipeDest {
    pub fn parse(text: &str) -> Self {
        match args::trim_ws(text) {
            "" => PipeDest::Plain,
            "H" => PipeDest::Html,
            "T" => PipeDest::Tts,
            "." => PipeDest::Interpret,
            "?" => PipeDest::Help,
            cmd => PipeDest::Shell(cmd.to_string()),
        }
    }
}

/// The operator part of a redirection: `>`, `>>`, `N>`, `H>`...
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedirectOp {
    pub fd: Option<u32>,
    pub append: bool,
    pub html: bool,
}

impl RedirectOp {
    /// Parse operator text such as `>`, `2>>` or `H>`
    pub fn parse(op: &str) -> Result<Self, CmdError> {
        let (prefix, arrows) = op.split_at(op.find('>').unwrap_or(op.len()));
        let append = match arrows {
            ">" => false,
            ">>" => true,
            _ => return Err(CmdError::Syntax(format!("malformed redirection '{}'", op))),
        };
        let (fd, html) = match prefix {
            "" => (None, false),
            "H" => (None, true),
            digit => (
                Some(
                    digit
                        .parse()
                        .map_err(|_| CmdError::Syntax(format!("bad file descriptor '{}'", digit)))?,
                ),
                false,
            ),
        };
        Ok(Self { fd, append, html })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedirectTarget {
    File(String),
    Alias(String),
    Editor,
}

impl RedirectTarget {
    /// Classify an already validated target word
    pub fn parse(word: &str) -> Result<Self, CmdError> {
        let word = args::split(args::trim_ws(word)).join("");
        if word.is_empty() {
            return Err(CmdError::Syntax("missing redirection target".into()));
        }
        Ok(match word.as_str() {
            "-" => RedirectTarget::Editor,
            w if w.starts_with('$') => RedirectTarget::Alias(w[1..].to_string()),
            w => RedirectTarget::File(w.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub op: RedirectOp,
    pub target: RedirectTarget,
}

/// Run `inner` with its output captured into a string
pub fn capture<F>(core: &mut Core, inner: F) -> (CmdResult, String)
where
    F: FnOnce(&mut Core) -> CmdResult,
{
    core.cons.push();
    let result = inner(core);
    let out = core.cons.pop();
    (result, out)
}

/// Saved output settings of an open pipe
struct PipeDescriptor {
    hold: ConfigHold,
}

impl PipeDescriptor {
    fn open(core: &mut Core, color: bool, html: bool, interactive: bool) -> Result<Self, CmdError> {
        let hold = core
            .config
            .hold(&["scr.color", "scr.html", "scr.interactive"]);
        core.config.set_b("scr.color", color)?;
        core.config.set_b("scr.html", html)?;
        core.config.set_b("scr.interactive", interactive)?;
        Ok(Self { hold })
    }

    fn close(self, core: &mut Core) {
        core.config.restore(self.hold);
    }
}

fn refuse_in_sandbox(core: &Core, what: &str) -> Result<(), CmdError> {
    if core.is_sandboxed() {
        return Err(CmdError::Sandbox(format!("{} are not allowed in sandbox mode", what)));
    }
    Ok(())
}

/// Run `inner` with its output sent to `dest`
pub fn run_piped<F>(core: &mut Core, dest: &PipeDest, inner: F) -> CmdResult
where
    F: FnOnce(&mut Core) -> CmdResult,
{
    match dest {
        PipeDest::Help => {
            core.cons.print(PIPE_HELP);
            Ok(0)
        }
        PipeDest::Plain => {
            let pipe = PipeDescriptor::open(core, false, false, core.is_interactive())?;
            let result = inner(core);
            pipe.close(core);
            result
        }
        PipeDest::Html => {
            let pipe = PipeDescriptor::open(core, false, true, false)?;
            let (result, out) = capture(core, inner);
            pipe.close(core);
            core.cons.print(&html_filter(&out));
            result
        }
        PipeDest::Tts => {
            let pipe = PipeDescriptor::open(core, false, false, false)?;
            let (result, out) = capture(core, inner);
            pipe.close(core);
            core.cons.print(&out);
            if core.is_sandboxed() {
                log::warn!("pipe: speech disabled in sandbox mode");
            } else if let Err(e) = speak(&out) {
                log::warn!("pipe: speech failed: {}", e);
            }
            result
        }
        PipeDest::Interpret => {
            let (result, out) = capture(core, inner);
            result?;
            core.run_script(&out)
        }
        PipeDest::Shell(cmd) => {
            refuse_in_sandbox(core, "Pipes")?;
            let keep_color = core.config.get_b("scr.color.pipe") && core.config.get_b("scr.color");
            let pipe = PipeDescriptor::open(core, keep_color, false, false)?;
            let (result, out) = capture(core, inner);
            pipe.close(core);
            result?;
            log::info!("pipe: spawning '{}'", cmd);
            let output = spawn_with_input(cmd, &out)?;
            core.cons.print(&output.stdout);
            Ok(if output.success { 0 } else { -1 })
        }
    }
}

pub struct ShellOutput {
    pub stdout: String,
    pub success: bool,
}

/// Run `cmd` through `sh -c` with `input` on stdin, collecting stdout
pub fn spawn_with_input(cmd: &str, input: &str) -> Result<ShellOutput, CmdError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| CmdError::Resource(format!("Cannot spawn '{}': {}", cmd, e)))?;

    // Feed stdin from a thread so a child that never reads cannot block us
    let writer = child.stdin.take().map(|mut stdin| {
        let data = input.to_string();
        std::thread::spawn(move || {
            let _ = stdin.write_all(data.as_bytes());
        })
    });
    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)?;
    }
    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let status = child.wait()?;
    Ok(ShellOutput {
        stdout,
        success: status.success(),
    })
}

/// Output of a shell command run for a `` `!cmd` `` substitution
pub fn shell_capture(core: &Core, cmd: &str) -> Result<String, CmdError> {
    if core.is_sandboxed() {
        return Err(CmdError::Sandbox(
            "Shell commands are not allowed in sandbox mode".into(),
        ));
    }
    Ok(spawn_with_input(cmd, "")?.stdout)
}

fn speak(text: &str) -> Result<(), CmdError> {
    let program = if cfg!(target_os = "macos") { "say" } else { "espeak --stdin" };
    let output = spawn_with_input(program, text)?;
    if output.success {
        Ok(())
    } else {
        Err(CmdError::Resource(format!("'{}' failed", program)))
    }
}

/// Open `text` in `cfg.editor` and return the edited contents
pub fn edit_text(core: &mut Core, text: &str) -> Result<String, CmdError> {
    if core.is_sandboxed() {
        return Err(CmdError::Sandbox("The editor is not available in sandbox mode".into()));
    }
    let editor = core.config.get("cfg.editor").unwrap_or("vi").to_string();
    let mut file = tempfile::Builder::new().prefix("fission-edit").tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    core.cons.flush()?;
    log::info!("editor: {} {}", editor, file.path().display());
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} \"$0\"", editor))
        .arg(file.path())
        .status()
        .map_err(|e| CmdError::Resource(format!("Cannot run editor '{}': {}", editor, e)))?;
    if !status.success() {
        return Err(CmdError::Resource(format!("Editor '{}' failed", editor)));
    }
    Ok(std::fs::read_to_string(file.path())?)
}

/// Run `inner` with its output redirected
pub fn run_redirected<F>(core: &mut Core, redirect: &Redirect, inner: F) -> CmdResult
where
    F: FnOnce(&mut Core) -> CmdResult,
{
    let op = redirect.op;
    match &redirect.target {
        RedirectTarget::Alias(name) => {
            let (result, out) = capture(core, inner);
            let value = match core.aliases.get(name) {
                Some(AliasValue::Raw(old)) if op.append && old.starts_with('$') => {
                    format!("{}{}", old, out)
                }
                _ => format!("${}", out),
            };
            log::debug!("redirect: {} bytes into ${}", out.len(), name);
            core.aliases.set(name, AliasValue::Raw(value));
            result
        }
        RedirectTarget::Editor => {
            if core.is_sandboxed() {
                return Err(CmdError::Sandbox(
                    "The editor is not available in sandbox mode".into(),
                ));
            }
            let pipe = PipeDescriptor::open(core, false, false, false)?;
            let (result, out) = capture(core, inner);
            pipe.close(core);
            edit_text(core, &out)?;
            result
        }
        RedirectTarget::File(path) => {
            refuse_in_sandbox(core, "File redirections")?;
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(op.append)
                .truncate(!op.append)
                .open(path)
                .map_err(|e| CmdError::Resource(format!("Cannot open '{}': {}", path, e)))?;
            match op.fd {
                None | Some(1) => {
                    let keep_color =
                        core.config.get_b("scr.color.pipe") && core.config.get_b("scr.color");
                    let pipe = PipeDescriptor::open(core, keep_color, op.html, false)?;
                    let (result, out) = capture(core, inner);
                    pipe.close(core);
                    let text = if op.html { html_filter(&out) } else { out };
                    file.write_all(text.as_bytes())?;
                    result
                }
                Some(2) => {
                    let saved = core.cons.take_errors();
                    let result = match inner(core) {
                        Err(e) if !e.is_fatal() => {
                            core.report(&e);
                            Ok(-1)
                        }
                        other => other,
                    };
                    let errors = core.cons.take_errors();
                    core.cons.restore_errors(saved);
                    file.write_all(errors.as_bytes())?;
                    result
                }
                Some(fd) => Err(CmdError::Resource(format!(
                    "File descriptor {} is not open",
                    fd
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ops() {
        assert_eq!(
            RedirectOp::parse("2>>").unwrap(),
            RedirectOp {
                fd: Some(2),
                append: true,
                html: false
            }
        );
        assert!(RedirectOp::parse("H>").unwrap().html);
        assert!(RedirectOp::parse(">>>").is_err());
        assert_eq!(PipeDest::parse(" H "), PipeDest::Html);
        assert_eq!(PipeDest::parse(" sort -r"), PipeDest::Shell("sort -r".into()));
    }

    #[test]
    fn test_targets() {
        assert_eq!(RedirectTarget::parse("-").unwrap(), RedirectTarget::Editor);
        assert_eq!(
            RedirectTarget::parse("$out").unwrap(),
            RedirectTarget::Alias("out".into())
        );
        assert_eq!(
            RedirectTarget::parse("'a b.txt'").unwrap(),
            RedirectTarget::File("a b.txt".into())
        );
        assert!(RedirectTarget::parse(" ").is_err());
    }

    #[test]
    fn test_alias_capture_appends() {
        let mut core = Core::default();
        let redirect = Redirect {
            op: RedirectOp::parse(">").unwrap(),
            target: RedirectTarget::Alias("log".into()),
        };
        run_redirected(&mut core, &redirect, |core| {
            core.cons.println("one");
            Ok(0)
        })
        .unwrap();
        let redirect = Redirect {
            op: RedirectOp::parse(">>").unwrap(),
            ..redirect
        };
        run_redirected(&mut core, &redirect, |core| {
            core.cons.println("two");
            Ok(0)
        })
        .unwrap();
        assert_eq!(
            core.aliases.get("log"),
            Some(&AliasValue::Raw("$one\ntwo\n".into()))
        );
    }

    #[test]
    fn test_plain_pipe_restores_color() {
        let mut core = Core::default();
        core.config.set_b("scr.color", true).unwrap();
        run_piped(&mut core, &PipeDest::Plain, |core| {
            assert!(!core.config.get_b("scr.color"));
            Ok(0)
        })
        .unwrap();
        assert!(core.config.get_b("scr.color"));
    }
}
