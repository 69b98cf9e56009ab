//! Help - Command descriptors and the help trie
//!
//! Every registered command describes itself with a [`CmdDescriptor`]. The
//! descriptors live in a byte-indexed trie so `pd?*` can list everything
//! under a prefix in lexical order.

/// Help text of one command
#[derive(Debug, Clone, PartialEq)]
pub struct CmdDescriptor {
    pub cmd: String,
    pub args: String,
    pub summary: String,
    pub details: Vec<String>,
}

impl CmdDescriptor {
    pub fn new(cmd: &str, args: &str, summary: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            args: args.to_string(),
            summary: summary.to_string(),
            details: Vec::new(),
        }
    }

    pub fn detail(mut self, line: &str) -> Self {
        self.details.push(line.to_string());
        self
    }

    fn usage(&self) -> String {
        if self.args.is_empty() {
            self.cmd.clone()
        } else {
            format!("{} {}", self.cmd, self.args)
        }
    }
}

struct TrieNode {
    desc: Option<CmdDescriptor>,
    children: Vec<Option<Box<TrieNode>>>,
}

impl TrieNode {
    fn new() -> Self {
        Self {
            desc: None,
            children: (0..256).map(|_| None).collect(),
        }
    }
}

pub struct HelpTrie {
    root: TrieNode,
    len: usize,
}

impl HelpTrie {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            len: 0,
        }
    }

    /// Insert a descriptor. A second descriptor for the same command is
    /// rejected with a warning.
    pub fn add(&mut self, desc: CmdDescriptor) -> bool {
        let mut node = &mut self.root;
        for b in desc.cmd.bytes() {
            node = node.children[b as usize]
                .get_or_insert_with(|| Box::new(TrieNode::new()))
                .as_mut();
        }
        if node.desc.is_some() {
            log::warn!("help: duplicate descriptor for '{}'", desc.cmd);
            return false;
        }
        node.desc = Some(desc);
        self.len += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, prefix: &str) -> Option<&TrieNode> {
        let mut node = &self.root;
        for b in prefix.bytes() {
            node = node.children[b as usize].as_deref()?;
        }
        Some(node)
    }

    pub fn get(&self, cmd: &str) -> Option<&CmdDescriptor> {
        self.node(cmd)?.desc.as_ref()
    }

    /// Descriptors under `prefix`, in lexical order
    pub fn under(&self, prefix: &str) -> Vec<&CmdDescriptor> {
        let mut out = Vec::new();
        if let Some(node) = self.node(prefix) {
            collect(node, &mut out);
        }
        out
    }

    /// Help for every command starting with `prefix`. `detail` 0 prints
    /// usages with summaries, 1 adds the detail lines, 2 prints the full
    /// help block of each command.
    pub fn recursive_help(&self, prefix: &str, detail: usize) -> String {
        let descs = self.under(prefix);
        let width = descs.iter().map(|d| d.usage().len()).max().unwrap_or(0);
        let mut out = String::new();
        for desc in descs {
            if detail >= 2 {
                out.push_str(&format!("Usage: {}  # {}\n", desc.usage(), desc.summary));
                for line in &desc.details {
                    out.push_str(&format!("  {}\n", line));
                }
                out.push('\n');
                continue;
            }
            out.push_str(&format!(
                "| {:<width$}  {}\n",
                desc.usage(),
                desc.summary,
                width = width
            ));
            if detail == 1 {
                for line in &desc.details {
                    out.push_str(&format!("|   {}\n", line));
                }
            }
        }
        out
    }
}

impl Default for HelpTrie {
    fn default() -> Self {
        Self::new()
    }
}

fn collect<'a>(node: &'a TrieNode, out: &mut Vec<&'a CmdDescriptor>) {
    if let Some(desc) = &node.desc {
        out.push(desc);
    }
    for child in node.children.iter().flatten() {
        collect(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie() -> HelpTrie {
        let mut trie = HelpTrie::new();
        trie.add(CmdDescriptor::new("px", "[len]", "Hexdump"));
        trie.add(CmdDescriptor::new("p8", "[len]", "Hex pairs").detail("p8 4 @ main"));
        trie.add(CmdDescriptor::new("s", "[addr]", "Seek"));
        trie
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut trie = trie();
        assert!(!trie.add(CmdDescriptor::new("s", "", "Again")));
        assert_eq!(trie.len(), 3);
        assert_eq!(trie.get("s").unwrap().summary, "Seek");
    }

    #[test]
    fn test_recursive_help_order_and_detail() {
        let trie = trie();
        assert_eq!(
            trie.recursive_help("p", 0),
            "| p8 [len]  Hex pairs\n| px [len]  Hexdump\n"
        );
        assert!(trie.recursive_help("p", 1).contains("|   p8 4 @ main"));
        assert!(trie.recursive_help("p", 2).starts_with("Usage: p8 [len]  # Hex pairs\n"));
        assert_eq!(trie.recursive_help("z", 1), "");
    }
}
