//! Args - Escaping and argument splitting
//!
//! A backslash escapes the next character only when that character belongs
//! to the special set of the surrounding context; any other backslash is
//! literal. Both parsers and every scanner follow this rule, which makes
//! `unescape(escape(s, set), set) == s` hold for any `s`.

/// Characters with a meaning outside quotes
pub const SPECIAL_CHARS_REGULAR: &str = "@;~$#|`\"'()<>";
/// Characters that must be escaped inside `"..."`
pub const SPECIAL_CHARS_DOUBLE_QUOTED: &str = "\"";
/// Characters that must be escaped inside `'...'`
pub const SPECIAL_CHARS_SINGLE_QUOTED: &str = "'";

pub fn is_special(c: u8) -> bool {
    SPECIAL_CHARS_REGULAR.as_bytes().contains(&c)
}

/// Spaces and tabs separate words; nothing else does
pub fn is_ws(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

pub fn trim_ws(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '\t')
}

/// Prefix every member of `set` with a backslash
pub fn escape(s: &str, set: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if set.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Remove the backslashes in front of members of `set`
pub fn unescape(s: &str, set: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if set.contains(next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Split argument text into words. Quotes group words and are removed,
/// escapes are resolved per context.
pub fn split(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {
                if in_word {
                    words.push(std::mem::take(&mut cur));
                    in_word = false;
                }
            }
            '\\' => {
                in_word = true;
                match chars.peek() {
                    Some(&next) if SPECIAL_CHARS_REGULAR.contains(next) => {
                        cur.push(next);
                        chars.next();
                    }
                    _ => cur.push('\\'),
                }
            }
            '\'' | '"' => {
                in_word = true;
                let quote = c;
                while let Some(q) = chars.next() {
                    if q == '\\' && chars.peek() == Some(&quote) {
                        cur.push(quote);
                        chars.next();
                    } else if q == quote {
                        break;
                    } else {
                        cur.push(q);
                    }
                }
            }
            _ => {
                in_word = true;
                cur.push(c);
            }
        }
    }
    if in_word {
        words.push(cur);
    }
    words
}

/// Words of `text` joined by single spaces
pub fn unquote(text: &str) -> String {
    split(text).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip_per_set() {
        let samples = [
            "plain",
            "a;b|c>d",
            "back\\slash\\@",
            "\\\\@",
            "q\"uo'te`s",
            "$(x) #y ~z",
        ];
        for set in [
            SPECIAL_CHARS_REGULAR,
            SPECIAL_CHARS_DOUBLE_QUOTED,
            SPECIAL_CHARS_SINGLE_QUOTED,
        ] {
            for s in samples {
                assert_eq!(unescape(&escape(s, set), set), s, "set {:?}", set);
            }
        }
    }

    #[test]
    fn test_escape_regular() {
        assert_eq!(escape("a@b;c", SPECIAL_CHARS_REGULAR), "a\\@b\\;c");
        assert_eq!(escape("say \"hi\"", SPECIAL_CHARS_DOUBLE_QUOTED), "say \\\"hi\\\"");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("  a  b\tc "), vec!["a", "b", "c"]);
        assert_eq!(split("'a b' \"c\\\"d\" e\\;f"), vec!["a b", "c\"d", "e;f"]);
        assert_eq!(split("x\\n"), vec!["x\\n"]);
        assert_eq!(split("a''"), vec!["a"]);
        assert_eq!(split("''"), vec![""]);
    }
}
