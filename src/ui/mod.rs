//! UI module - Interactive front end
//!
//! The reedline REPL and process signal wiring for the `fission-cmd` binary.

pub mod cli;
