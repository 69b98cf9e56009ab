//! Sdb - Session key/value database
//!
//! Namespaces are plain `ns/` key prefixes. Queries follow the `k` command:
//! `key`, `key=value`, `key=` (delete), `*` and `ns/*` (list).

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct Sdb {
    entries: BTreeMap<String, String>,
}

impl Sdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(key.to_string(), value.to_string());
        }
    }

    /// Run a query and return its textual result (one line per entry)
    pub fn query(&mut self, query: &str) -> String {
        let query = query.trim();
        if query.is_empty() || query == "*" {
            return self.list("");
        }
        if let Some(ns) = query.strip_suffix("/*") {
            return self.list(&format!("{}/", ns));
        }
        if let Some((key, value)) = query.split_once('=') {
            self.set(key.trim(), value.trim());
            return String::new();
        }
        match self.get(query) {
            Some(value) => format!("{}\n", value),
            None => String::new(),
        }
    }

    fn list(&self, prefix: &str) -> String {
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| format!("{}={}\n", &k[prefix.len()..], v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_forms() {
        let mut sdb = Sdb::new();
        assert_eq!(sdb.query("anal/entry=0x400"), "");
        assert_eq!(sdb.query("anal/entry"), "0x400\n");
        sdb.query("other=1");
        assert_eq!(sdb.query("anal/*"), "entry=0x400\n");
        assert_eq!(sdb.query("*"), "anal/entry=0x400\nother=1\n");
        sdb.query("other=");
        assert_eq!(sdb.get("other"), None);
    }
}
