//! Flags - Named addresses
//!
//! Insertion-ordered flag table with flagspaces. Iteration (`@@`, `@@@f`)
//! works on cloned snapshots so commands may freely add or remove flags
//! while a loop is running.

use std::collections::HashMap;

use globset::{Glob, GlobMatcher};

#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    pub space: Option<String>,
}

#[derive(Debug, Default)]
pub struct Flags {
    items: Vec<Flag>,
    /// Name to position in `items`
    index: HashMap<String, usize>,
    space: Option<String>,
    space_stack: Vec<Option<String>>,
}

/// Compile a flag glob; a bare `*` matches everything
pub fn compile_glob(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(Glob::new(pattern)?.compile_matcher())
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or move a flag. Existing flags keep their table position.
    pub fn set(&mut self, name: &str, offset: u64, size: u64) {
        if let Some(&at) = self.index.get(name) {
            let flag = &mut self.items[at];
            flag.offset = offset;
            flag.size = size;
            return;
        }
        self.index.insert(name.to_string(), self.items.len());
        self.items.push(Flag {
            name: name.to_string(),
            offset,
            size,
            space: self.space.clone(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.index.get(name).map(|&at| &self.items[at])
    }

    pub fn unset(&mut self, name: &str) -> bool {
        let Some(at) = self.index.remove(name) else {
            return false;
        };
        self.items.remove(at);
        self.reindex();
        true
    }

    /// Remove every flag matching the glob in the current space
    pub fn unset_glob(&mut self, pattern: &str) -> Result<usize, globset::Error> {
        let matcher = compile_glob(pattern)?;
        let space = self.space.clone();
        let before = self.items.len();
        self.items
            .retain(|f| !(in_space(f, &space) && matcher.is_match(&f.name)));
        let removed = before - self.items.len();
        if removed > 0 {
            self.reindex();
        }
        Ok(removed)
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(at, f)| (f.name.clone(), at))
            .collect();
    }

    pub fn all(&self) -> &[Flag] {
        &self.items
    }

    /// Flags of the selected flagspace, or every flag when none is selected
    pub fn visible(&self) -> impl Iterator<Item = &Flag> {
        let space = self.space.clone();
        self.items.iter().filter(move |f| in_space(f, &space))
    }

    /// Snapshot of visible flags matching `pattern`, in table order
    pub fn matching(&self, pattern: &str) -> Result<Vec<Flag>, globset::Error> {
        let matcher = compile_glob(pattern)?;
        Ok(self
            .visible()
            .filter(|f| matcher.is_match(&f.name))
            .cloned()
            .collect())
    }

    /// First flag placed exactly at `offset`
    pub fn at(&self, offset: u64) -> Option<&Flag> {
        self.visible().find(|f| f.offset == offset)
    }

    pub fn space(&self) -> Option<&str> {
        self.space.as_deref()
    }

    /// Select a flagspace; `*` or empty selects all of them
    pub fn space_set(&mut self, name: &str) {
        self.space = match name {
            "" | "*" => None,
            n => Some(n.to_string()),
        };
    }

    pub fn space_push(&mut self, name: &str) {
        self.space_stack.push(self.space.clone());
        self.space_set(name);
    }

    pub fn space_pop(&mut self) -> bool {
        match self.space_stack.pop() {
            Some(prev) => {
                self.space = prev;
                true
            }
            None => false,
        }
    }

    /// Known flagspaces in order of first use
    pub fn spaces(&self) -> Vec<String> {
        let mut spaces: Vec<String> = Vec::new();
        for name in self.items.iter().filter_map(|f| f.space.as_ref()) {
            if !spaces.contains(name) {
                spaces.push(name.clone());
            }
        }
        spaces
    }
}

fn in_space(flag: &Flag, space: &Option<String>) -> bool {
    match space {
        Some(space) => flag.space.as_deref() == Some(space.as_str()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_and_glob() {
        let mut flags = Flags::new();
        flags.set("f2", 0x20, 1);
        flags.set("g1", 0x30, 1);
        flags.set("f1", 0x10, 1);
        let names: Vec<_> = flags
            .matching("f*")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["f2", "f1"]);
    }

    #[test]
    fn test_spaces() {
        let mut flags = Flags::new();
        flags.set("main", 0x10, 0);
        flags.space_push("symbols");
        flags.set("sym.main", 0x10, 0);
        assert_eq!(flags.visible().count(), 1);
        assert!(flags.space_pop());
        assert_eq!(flags.visible().count(), 2);
        assert_eq!(flags.spaces(), vec!["symbols".to_string()]);
    }

    #[test]
    fn test_set_keeps_position() {
        let mut flags = Flags::new();
        flags.set("a", 1, 0);
        flags.set("b", 2, 0);
        flags.set("a", 3, 0);
        assert_eq!(flags.all()[0].offset, 3);
        assert!(flags.unset("a"));
        assert_eq!(flags.all().len(), 1);
    }
}
