//! fission-cmd - r2-style command shell
//!
//! Parses the command line, opens the target, runs batch commands and then
//! drops into the REPL unless told to stay quiet.

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use fission_cmd::cmd::args::{escape, SPECIAL_CHARS_DOUBLE_QUOTED};
use fission_cmd::ui::cli::{install_interrupt_handler, run_cli};
use fission_cmd::{Core, CoreOptions, ParserKind};

/// Fission command interpreter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to open and map before running commands
    target: Option<String>,

    /// Command to run after loading (repeatable)
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Script file to run after loading
    #[arg(short = 'i', long = "script")]
    script: Option<String>,

    /// Refuse shell, file and task access
    #[arg(long, default_value_t = false)]
    sandbox: bool,

    /// Parse commands with the grammar front end
    #[arg(long, default_value_t = false)]
    grammar: bool,

    /// Exit after batch commands instead of starting the REPL
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    let parser = if args.grammar {
        ParserKind::Grammar
    } else {
        ParserKind::Legacy
    };
    log::debug!("parser: {:?}, sandbox: {}", parser, args.sandbox);

    let mut core = Core::new(CoreOptions {
        parser,
        sandbox: args.sandbox,
        interactive: !args.quiet,
    });
    install_interrupt_handler(&core)?;

    if let Some(target) = &args.target {
        let open = format!("o \"{}\"", escape(target, SPECIAL_CHARS_DOUBLE_QUOTED));
        if core.cmd(&open) < 0 {
            eprintln!("{} Cannot open '{}'", "[!]".red(), target);
        }
        core.cons.flush()?;
    }

    if let Some(path) = &args.script {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read script '{}'", path))?;
        if let Err(e) = core.run_script(&script) {
            core.report(&e);
        }
        core.cons.flush()?;
    }

    let mut status = 0;
    for command in &args.commands {
        status = core.cmd(command);
        core.cons.flush()?;
        if core.quit {
            break;
        }
    }

    if !args.quiet && !core.quit {
        run_cli(&mut core)?;
        core.cons.flush()?;
    }

    if status < 0 {
        std::process::exit(1);
    }
    Ok(())
}
