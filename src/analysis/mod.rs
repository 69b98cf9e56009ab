//! Analysis Module - Binary loading and the function model
//!
//! Provides the data the iteration forms walk over: sections, symbols,
//! imports and strings from the loader, functions and basic blocks from
//! the analysis model.

pub mod functions;
pub mod loader;

pub use functions::{Anal, BasicBlock, Function};
pub use loader::{BinInfo, ImportInfo, SectionInfo, StringInfo, SymbolInfo};
