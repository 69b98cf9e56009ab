//! Console - Buffered output and user prompts
//!
//! Every command prints into the top buffer of a stack. Capturing output
//! (grep, pipes, substitution, iteration) pushes a fresh buffer and pops it
//! afterwards. The bottom buffer is flushed to stdout by the front end.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

pub struct Console {
    buffers: Vec<String>,
    errors: String,
    answers: VecDeque<bool>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            buffers: vec![String::new()],
            errors: String::new(),
            answers: VecDeque::new(),
        }
    }

    pub fn print(&mut self, text: &str) {
        if let Some(top) = self.buffers.last_mut() {
            top.push_str(text);
        }
    }

    pub fn println(&mut self, text: &str) {
        self.print(text);
        self.print("\n");
    }

    /// Diagnostics bypass capture buffers
    pub fn eprintln(&mut self, text: &str) {
        self.errors.push_str(text);
        self.errors.push('\n');
    }

    /// Start capturing output
    pub fn push(&mut self) {
        self.buffers.push(String::new());
    }

    /// Stop capturing and return what was printed since the matching push
    pub fn pop(&mut self) -> String {
        if self.buffers.len() > 1 {
            self.buffers.pop().unwrap_or_default()
        } else {
            std::mem::take(&mut self.buffers[0])
        }
    }

    pub fn depth(&self) -> usize {
        self.buffers.len() - 1
    }

    /// Take everything printed to the session buffer
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.buffers[0])
    }

    pub fn take_errors(&mut self) -> String {
        std::mem::take(&mut self.errors)
    }

    /// Put diagnostics back in front of anything printed since they were taken
    pub fn restore_errors(&mut self, saved: String) {
        let newer = std::mem::replace(&mut self.errors, saved);
        self.errors.push_str(&newer);
    }

    /// Write pending output to stdout and diagnostics to stderr
    pub fn flush(&mut self) -> io::Result<()> {
        let out = self.take_output();
        if !out.is_empty() {
            let mut stdout = io::stdout().lock();
            stdout.write_all(out.as_bytes())?;
            stdout.flush()?;
        }
        let err = self.take_errors();
        if !err.is_empty() {
            io::stderr().lock().write_all(err.as_bytes())?;
        }
        Ok(())
    }

    /// Queue an answer for the next [`Console::yes_no`] prompt
    pub fn script_answer(&mut self, yes: bool) {
        self.answers.push_back(yes);
    }

    /// Ask a yes/no question. Non-interactive sessions take the default.
    pub fn yes_no(&mut self, question: &str, default: bool, interactive: bool) -> bool {
        if let Some(answer) = self.answers.pop_front() {
            return answer;
        }
        if !interactive {
            return default;
        }
        if self.flush().is_err() {
            return default;
        }
        eprint!("{} ", question);
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return default;
        }
        match line.trim() {
            "y" | "Y" | "yes" => true,
            "n" | "N" | "no" => false,
            _ => default,
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

/// Render plain text for `|H` and `H>`
pub fn html_filter(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        for c in line.chars() {
            match c {
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '&' => out.push_str("&amp;"),
                _ => out.push(c),
            }
        }
        out.push_str("<br />\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_capture() {
        let mut cons = Console::new();
        cons.println("outer");
        cons.push();
        cons.print("inner");
        cons.push();
        cons.print("deep");
        assert_eq!(cons.pop(), "deep");
        assert_eq!(cons.pop(), "inner");
        assert_eq!(cons.depth(), 0);
        assert_eq!(cons.take_output(), "outer\n");
    }

    #[test]
    fn test_scripted_answers() {
        let mut cons = Console::new();
        cons.script_answer(true);
        assert!(cons.yes_no("go?", false, true));
        assert!(!cons.yes_no("go?", false, false));
    }

    #[test]
    fn test_html_filter() {
        assert_eq!(html_filter("a<b\n"), "a&lt;b<br />\n");
    }
}
