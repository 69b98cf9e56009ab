//! CLI - reedline-based REPL
//!
//! Reads lines, hands them to [`Core::cmd`] and flushes the console after
//! each one. Ctrl-C while a command runs sets the session interrupt flag.

use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;

use crate::core::Core;

/// `[0x1000]> `
pub struct FissionPrompt {
    current_address: u64,
}

impl FissionPrompt {
    pub fn new() -> Self {
        Self { current_address: 0 }
    }

    pub fn set_address(&mut self, addr: u64) {
        self.current_address = addr;
    }
}

impl Default for FissionPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for FissionPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(format!("[{:#x}]", self.current_address))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Run the REPL until `q`, Ctrl-D or end of input
pub fn run_cli(core: &mut Core) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = FissionPrompt::new();

    println!(
        "{} fission-cmd v{} - type '?' for help, 'q' to quit",
        "[*]".cyan(),
        env!("CARGO_PKG_VERSION")
    );

    while !core.quit {
        prompt.set_address(core.offset);
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                let status = core.cmd(&buffer);
                core.cons.flush()?;
                log::trace!("repl: '{}' -> {}", buffer, status);
            }
            Signal::CtrlC => continue,
            Signal::CtrlD => break,
        }
    }
    Ok(())
}

/// Route SIGINT to the session interrupt flag
#[cfg(target_os = "linux")]
pub fn install_interrupt_handler(core: &Core) -> Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal as Sig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, OnceLock};

    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    extern "C" fn on_sigint(_: nix::libc::c_int) {
        if let Some(flag) = FLAG.get() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    if FLAG.set(core.interrupt_handle()).is_err() {
        log::warn!("interrupt handler already installed");
        return Ok(());
    }
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs an atomic store
    unsafe { sigaction(Sig::SIGINT, &action) }?;
    log::debug!("SIGINT handler installed");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn install_interrupt_handler(_core: &Core) -> Result<()> {
    log::debug!("no SIGINT handler on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_shows_offset() {
        let mut prompt = FissionPrompt::new();
        prompt.set_address(0x1000);
        let text = format!(
            "{}{}",
            prompt.render_prompt_left(),
            prompt.render_prompt_indicator(reedline::PromptEditMode::Default)
        );
        assert_eq!(text, "[0x1000]> ");
    }
}
