//! Config - Session configuration table
//!
//! Flat key/value store behind the `e` command and the `@e:` modifier.
//! Values are stored as text and interpreted on read.

use std::collections::BTreeMap;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Config key {key} is locked: {reason}")]
    Locked { key: String, reason: String },
}

/// Range keys touched by the `@(from to)` modifier
pub const RANGE_KEYS: &[&str] = &[
    "anal", "diff", "graph", "io.buffer", "lines", "search", "zoom",
];

#[derive(Debug, Clone)]
struct ConfigNode {
    value: String,
    desc: &'static str,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct Config {
    nodes: BTreeMap<String, ConfigNode>,
}

/// Snapshot of a set of keys, handed back to [`Config::restore`]
#[derive(Debug, Default)]
pub struct ConfigHold {
    saved: Vec<(String, String)>,
}

impl Config {
    pub fn new() -> Self {
        let mut config = Self {
            nodes: BTreeMap::new(),
        };
        config.define("asm.arch", "x86", "Current architecture");
        config.define("asm.bits", "64", "Word size in bits");
        config.define("anal.ignbithints", "false", "Ignore bit hints while analyzing");
        config.define("scr.color", "false", "Colorize output");
        config.define("scr.color.pipe", "false", "Keep colors when piping output");
        config.define("scr.html", "false", "Render output as HTML");
        config.define("scr.interactive", "false", "Ask questions on the terminal");
        config.define("cmd.repeat", "false", "Empty line repeats the last command");
        config.define("cmd.times", "", "Command run after each repeat iteration");
        config.define("cmd.depth", "10", "Maximum nested command depth");
        config.define("cmd.hit", "", "Command run on every search hit");
        config.define("cfg.editor", "vi", "External editor for `> -` and `=-`");
        config.define("cfg.sandbox", "false", "Refuse privileged operations");
        config.define("search.prefix", "hit", "Prefix of search hit flags");
        for range in RANGE_KEYS {
            config.define(&format!("{}.from", range), "0", "Range start");
            config.define(&format!("{}.to", range), "0", "Range end");
        }
        config
    }

    /// Create a key, or reset an existing one
    pub fn define(&mut self, key: &str, value: &str, desc: &'static str) {
        self.nodes.insert(
            key.to_string(),
            ConfigNode {
                value: value.to_string(),
                desc,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.nodes.get(key).map(|n| n.value.as_str())
    }

    /// Numeric value of a key; booleans read as 0/1, garbage reads as 0
    pub fn get_i(&self, key: &str) -> u64 {
        match self.get(key) {
            Some("true") => 1,
            Some("false") | None => 0,
            Some(v) => {
                let v = v.trim();
                if let Some(hex) = v.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16).unwrap_or(0)
                } else {
                    v.parse().unwrap_or(0)
                }
            }
        }
    }

    pub fn get_b(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("1"))
    }

    pub fn desc(&self, key: &str) -> Option<&'static str> {
        self.nodes.get(key).map(|n| n.desc)
    }

    /// Set an existing key. Returns the previous value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<String, ConfigError> {
        if key == "cfg.sandbox" && self.get_b("cfg.sandbox") && !is_true(value) {
            return Err(ConfigError::Locked {
                key: key.to_string(),
                reason: "sandbox cannot be disabled".into(),
            });
        }
        let node = self
            .nodes
            .get_mut(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let value = normalize_bool(value);
        log::trace!("config {} = {}", key, value);
        Ok(std::mem::replace(&mut node.value, value))
    }

    pub fn set_b(&mut self, key: &str, value: bool) -> Result<String, ConfigError> {
        self.set(key, if value { "true" } else { "false" })
    }

    pub fn set_i(&mut self, key: &str, value: u64) -> Result<String, ConfigError> {
        self.set(key, &value.to_string())
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    /// Snapshot the given keys; unknown keys are ignored
    pub fn hold(&self, keys: &[&str]) -> ConfigHold {
        ConfigHold {
            saved: keys
                .iter()
                .filter_map(|k| self.get(k).map(|v| (k.to_string(), v.to_string())))
                .collect(),
        }
    }

    pub fn restore(&mut self, hold: ConfigHold) {
        for (key, value) in hold.saved.into_iter().rev() {
            if let Some(node) = self.nodes.get_mut(&key) {
                node.value = value;
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn is_true(value: &str) -> bool {
    matches!(value.trim(), "true" | "1" | "on" | "yes")
}

fn normalize_bool(value: &str) -> String {
    match value.trim() {
        "on" | "yes" => "true".to_string(),
        "off" | "no" => "false".to_string(),
        v => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let mut config = Config::new();
        assert_eq!(config.get_i("asm.bits"), 64);
        config.set("cmd.repeat", "on").unwrap();
        assert!(config.get_b("cmd.repeat"));
        config.set("search.from", "0x40").unwrap();
        assert_eq!(config.get_i("search.from"), 0x40);
        assert!(config.set("no.such.key", "1").is_err());
    }

    #[test]
    fn test_hold_restore() {
        let mut config = Config::new();
        let hold = config.hold(&["scr.color", "scr.interactive"]);
        config.set("scr.color", "true").unwrap();
        config.set("scr.interactive", "true").unwrap();
        config.restore(hold);
        assert!(!config.get_b("scr.color"));
        assert!(!config.get_b("scr.interactive"));
    }

    #[test]
    fn test_sandbox_is_sticky() {
        let mut config = Config::new();
        config.set("cfg.sandbox", "true").unwrap();
        assert!(config.set("cfg.sandbox", "false").is_err());
        assert!(config.get_b("cfg.sandbox"));
    }
}
