//! Debugger - Debuggee state model
//!
//! Holds the register file, threads, backtrace and memory maps that the
//! `d*` commands and the `@r:`, `@@t`, `@@dbt` and `@@@r` forms read from.

use super::memory::{MemoryProtection, MemoryRegion};
use thiserror::Error;

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Unknown register: {name}")]
    UnknownRegister { name: String },

    #[error("Process not found: {pid}")]
    ProcessNotFound { pid: u32 },

    #[error("Breakpoint error at {address:#x}: {reason}")]
    BreakpointError { address: u64, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub value: u64,
    /// Width in bits
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadInfo {
    pub pid: u32,
    pub name: String,
}

/// One backtrace frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub addr: u64,
    pub bp: u64,
    pub sp: u64,
}

/// Software breakpoint info
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub address: u64,
    pub enabled: bool,
}

pub struct Debugger {
    regs: Vec<Register>,
    pid: Option<u32>,
    threads: Vec<ThreadInfo>,
    frames: Vec<Frame>,
    maps: Vec<MemoryRegion>,
    breakpoints: Vec<Breakpoint>,
}

const GPRS: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "rip", "rflags",
];

impl Debugger {
    /// x86-64 register file, all zero
    pub fn new() -> Self {
        let mut regs: Vec<Register> = GPRS
            .iter()
            .map(|name| Register {
                name: name.to_string(),
                value: 0,
                size: 64,
            })
            .collect();
        for name in ["eax", "ebx", "ecx", "edx", "eflags"] {
            regs.push(Register {
                name: name.to_string(),
                value: 0,
                size: 32,
            });
        }
        Self {
            regs,
            pid: None,
            threads: Vec::new(),
            frames: Vec::new(),
            maps: Vec::new(),
            breakpoints: Vec::new(),
        }
    }

    pub fn registers(&self) -> &[Register] {
        &self.regs
    }

    pub fn reg_get(&self, name: &str) -> Result<u64, DebugError> {
        self.regs
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value)
            .ok_or_else(|| DebugError::UnknownRegister {
                name: name.to_string(),
            })
    }

    pub fn reg_set(&mut self, name: &str, value: u64) -> Result<(), DebugError> {
        let reg = self
            .regs
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| DebugError::UnknownRegister {
                name: name.to_string(),
            })?;
        reg.value = if reg.size >= 64 {
            value
        } else {
            value & ((1u64 << reg.size) - 1)
        };
        log::trace!("reg {} = {:#x}", name, reg.value);
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn threads(&self) -> &[ThreadInfo] {
        &self.threads
    }

    pub fn add_thread(&mut self, pid: u32, name: &str) {
        if !self.threads.iter().any(|t| t.pid == pid) {
            self.threads.push(ThreadInfo {
                pid,
                name: name.to_string(),
            });
        }
        if self.pid.is_none() {
            self.pid = Some(pid);
        }
    }

    /// Select the thread/process all further debugger reads refer to
    pub fn select(&mut self, pid: u32) -> Result<Option<u32>, DebugError> {
        if !self.threads.iter().any(|t| t.pid == pid) {
            return Err(DebugError::ProcessNotFound { pid });
        }
        log::debug!("Selecting pid {}", pid);
        Ok(self.pid.replace(pid))
    }

    /// Put back a selection returned by [`Debugger::select`]
    pub fn restore_selection(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn maps(&self) -> &[MemoryRegion] {
        &self.maps
    }

    pub fn add_map(&mut self, base_address: u64, size: u64, protection: MemoryProtection, name: &str) {
        self.maps.push(MemoryRegion {
            base_address,
            size,
            protection,
            name: (!name.is_empty()).then(|| name.to_string()),
        });
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Set a software breakpoint at the specified address
    pub fn set_breakpoint(&mut self, address: u64) -> Result<(), DebugError> {
        if self.breakpoints.iter().any(|bp| bp.address == address) {
            return Err(DebugError::BreakpointError {
                address,
                reason: "already set".into(),
            });
        }
        log::debug!("Setting breakpoint at {:#x}", address);
        self.breakpoints.push(Breakpoint {
            address,
            enabled: true,
        });
        Ok(())
    }

    /// Remove a breakpoint at the specified address
    pub fn remove_breakpoint(&mut self, address: u64) -> Result<(), DebugError> {
        log::debug!("Removing breakpoint at {:#x}", address);
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.address != address);
        if before == self.breakpoints.len() {
            return Err(DebugError::BreakpointError {
                address,
                reason: "no breakpoint here".into(),
            });
        }
        Ok(())
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers() {
        let mut dbg = Debugger::new();
        dbg.reg_set("rax", 0x1234).unwrap();
        assert_eq!(dbg.reg_get("rax").unwrap(), 0x1234);
        dbg.reg_set("eax", u64::MAX).unwrap();
        assert_eq!(dbg.reg_get("eax").unwrap(), 0xffff_ffff);
        assert!(dbg.reg_get("xmm0").is_err());
    }

    #[test]
    fn test_select_thread() {
        let mut dbg = Debugger::new();
        dbg.add_thread(100, "main");
        dbg.add_thread(101, "worker");
        assert_eq!(dbg.pid(), Some(100));
        let prev = dbg.select(101).unwrap();
        assert_eq!(prev, Some(100));
        assert!(dbg.select(7).is_err());
        dbg.restore_selection(prev);
        assert_eq!(dbg.pid(), Some(100));
    }

    #[test]
    fn test_breakpoints() {
        let mut dbg = Debugger::new();
        dbg.set_breakpoint(0x401000).unwrap();
        assert!(dbg.set_breakpoint(0x401000).is_err());
        dbg.remove_breakpoint(0x401000).unwrap();
        assert!(dbg.breakpoints().is_empty());
    }
}
