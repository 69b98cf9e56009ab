//! Functions - Function and basic-block model
//!
//! There is no disassembler behind this: functions and their blocks are
//! declared through `af` (or by a loader) and the iterators walk them.

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub addr: u64,
    pub size: u64,
    /// Instruction start addresses, ascending
    pub instrs: Vec<u64>,
}

impl BasicBlock {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr - self.addr < self.size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub addr: u64,
    pub size: u64,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn contains(&self, addr: u64) -> bool {
        (addr >= self.addr && addr - self.addr < self.size.max(1))
            || self.blocks.iter().any(|bb| bb.contains(addr))
    }

    /// Blocks sorted by address
    pub fn sorted_blocks(&self) -> Vec<BasicBlock> {
        let mut blocks = self.blocks.clone();
        blocks.sort_by_key(|bb| bb.addr);
        blocks
    }
}

#[derive(Debug, Default)]
pub struct Anal {
    functions: Vec<Function>,
}

impl Anal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the function starting at `func.addr`
    pub fn add(&mut self, func: Function) {
        log::debug!("anal: function {} at {:#x}", func.name, func.addr);
        match self.functions.iter_mut().find(|f| f.addr == func.addr) {
            Some(existing) => *existing = func,
            None => self.functions.push(func),
        }
    }

    pub fn remove_at(&mut self, addr: u64) -> bool {
        let before = self.functions.len();
        self.functions.retain(|f| !f.contains(addr));
        before != self.functions.len()
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function_at(&self, addr: u64) -> Option<&Function> {
        self.functions.iter().find(|f| f.contains(addr))
    }

    pub fn bb_at(&self, addr: u64) -> Option<&BasicBlock> {
        self.function_at(addr)?
            .blocks
            .iter()
            .find(|bb| bb.contains(addr))
    }

    /// Address of the instruction `delta` instructions away from the one
    /// containing `addr`, following the function's blocks in address order
    pub fn instr_relative(&self, addr: u64, delta: i64) -> Option<u64> {
        let func = self.function_at(addr)?;
        let instrs: Vec<u64> = func
            .sorted_blocks()
            .into_iter()
            .flat_map(|bb| bb.instrs)
            .collect();
        let cur = instrs.iter().rposition(|&i| i <= addr)?;
        let idx = i64::try_from(cur).ok()?.checked_add(delta)?;
        usize::try_from(idx).ok().and_then(|i| instrs.get(i)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Anal {
        let mut anal = Anal::new();
        anal.add(Function {
            name: "main".into(),
            addr: 0x100,
            size: 0x10,
            blocks: vec![
                BasicBlock {
                    addr: 0x108,
                    size: 8,
                    instrs: vec![0x108, 0x10c],
                },
                BasicBlock {
                    addr: 0x100,
                    size: 8,
                    instrs: vec![0x100, 0x102, 0x105],
                },
            ],
        });
        anal
    }

    #[test]
    fn test_lookup() {
        let anal = sample();
        assert_eq!(anal.function_at(0x10c).unwrap().name, "main");
        assert_eq!(anal.bb_at(0x103).unwrap().addr, 0x100);
        assert!(anal.function_at(0x200).is_none());
    }

    #[test]
    fn test_instr_relative() {
        let anal = sample();
        assert_eq!(anal.instr_relative(0x102, 2), Some(0x108));
        assert_eq!(anal.instr_relative(0x108, -1), Some(0x105));
        assert_eq!(anal.instr_relative(0x100, -1), None);
        assert_eq!(anal.instr_relative(0x108, i64::MAX), None);
        assert_eq!(anal.instr_relative(0x108, i64::MIN), None);
    }
}
