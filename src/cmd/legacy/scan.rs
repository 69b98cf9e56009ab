//! Scan - Quote and substitution aware walk over a command line
//!
//! The walk records every byte that sits at the top level (outside
//! quotes, escapes and backtick bodies) and every substitution span.
//! Operator searches only ever look at top-level bytes.

use std::ops::Range;

use crate::cmd::args::{is_ws, SPECIAL_CHARS_REGULAR};
use crate::cmd::CmdError;

/// A `` `cmd` ``, ``` ``cmd`` ``` or `$(cmd)` span
#[derive(Debug, Clone, PartialEq)]
pub struct Subst {
    /// Whole span, delimiters included
    pub span: Range<usize>,
    pub inner: Range<usize>,
    /// Double backticks run the command and splice nothing
    pub discard: bool,
    pub in_dquote: bool,
}

#[derive(Debug)]
pub struct Scan<'a> {
    text: &'a str,
    top: Vec<usize>,
    pub substs: Vec<Subst>,
    /// Where a walk with a stop condition ended early
    pub stopped: Option<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
}

pub fn walk(text: &str) -> Result<Scan<'_>, CmdError> {
    walk_until(text, |_, _| false)
}

/// Walk `text`, stopping at the first top-level byte for which `stop`
/// holds. Anything after that byte is never looked at.
pub fn walk_until<F>(text: &str, mut stop: F) -> Result<Scan<'_>, CmdError>
where
    F: FnMut(&[u8], usize) -> bool,
{
    let bytes = text.as_bytes();
    let mut scan = Scan {
        text,
        top: Vec::new(),
        substs: Vec::new(),
        stopped: None,
    };
    let mut quote = Quote::None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        match quote {
            Quote::None => match c {
                b'\\' if next.map_or(false, |n| SPECIAL_CHARS_REGULAR.as_bytes().contains(&n)) => {
                    i += 2;
                }
                b'\'' => {
                    quote = Quote::Single;
                    i += 1;
                }
                b'"' => {
                    quote = Quote::Double;
                    i += 1;
                }
                b'`' => i = substitution(bytes, i, false, &mut scan.substs)?,
                b'$' if next == Some(b'(') => i = substitution(bytes, i, false, &mut scan.substs)?,
                _ => {
                    if stop(bytes, i) {
                        scan.stopped = Some(i);
                        return Ok(scan);
                    }
                    scan.top.push(i);
                    i += 1;
                }
            },
            Quote::Double => match c {
                b'\\' if next == Some(b'"') => i += 2,
                b'"' => {
                    quote = Quote::None;
                    i += 1;
                }
                b'`' => i = substitution(bytes, i, true, &mut scan.substs)?,
                b'$' if next == Some(b'(') => i = substitution(bytes, i, true, &mut scan.substs)?,
                _ => i += 1,
            },
            Quote::Single => match c {
                b'\\' if next == Some(b'\'') => i += 2,
                b'\'' => {
                    quote = Quote::None;
                    i += 1;
                }
                _ => i += 1,
            },
        }
    }
    if quote != Quote::None {
        return Err(CmdError::Syntax("unterminated quote".into()));
    }
    Ok(scan)
}

/// Record the substitution starting at `start`; returns the index after it
fn substitution(
    bytes: &[u8],
    start: usize,
    in_dquote: bool,
    out: &mut Vec<Subst>,
) -> Result<usize, CmdError> {
    let (inner, end, discard) = if bytes[start] == b'$' {
        let mut depth = 1;
        let mut j = start + 2;
        loop {
            match bytes.get(j) {
                None => return Err(CmdError::Syntax("missing closing ')'".into())),
                Some(b'(') => depth += 1,
                Some(b')') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Some(_) => {}
            }
            j += 1;
        }
        (start + 2..j, j + 1, false)
    } else if bytes.get(start + 1) == Some(&b'`') {
        let body = start + 2;
        let close = bytes[body..]
            .windows(2)
            .position(|w| w == b"``")
            .ok_or_else(|| CmdError::Syntax("missing closing backticks".into()))?;
        (body..body + close, body + close + 2, true)
    } else {
        let body = start + 1;
        let close = bytes[body..]
            .iter()
            .position(|&b| b == b'`')
            .ok_or_else(|| CmdError::Syntax("missing closing backtick".into()))?;
        (body..body + close, body + close + 1, false)
    };
    out.push(Subst {
        span: start..end,
        inner,
        discard,
        in_dquote,
    });
    Ok(end)
}

/// `#` followed by whitespace or the end of the line
pub fn is_comment_start(bytes: &[u8], i: usize) -> bool {
    bytes[i] == b'#' && bytes.get(i + 1).map_or(true, |&b| is_ws(b))
}

impl<'a> Scan<'a> {
    pub fn is_top(&self, pos: usize) -> bool {
        self.top.binary_search(&pos).is_ok()
    }

    pub fn positions(&self, byte: u8) -> impl Iterator<Item = usize> + '_ {
        let bytes = self.text.as_bytes();
        self.top.iter().copied().filter(move |&i| bytes[i] == byte)
    }

    /// First top-level occurrence of `byte`
    pub fn find(&self, byte: u8) -> Option<usize> {
        self.positions(byte).next()
    }

    pub fn rfind(&self, byte: u8) -> Option<usize> {
        self.positions(byte).last()
    }

    /// Whether any top-level byte in `range` satisfies `pred`
    pub fn any_in<P>(&self, range: Range<usize>, pred: P) -> bool
    where
        P: Fn(u8) -> bool,
    {
        let bytes = self.text.as_bytes();
        self.top
            .iter()
            .filter(|&&i| range.contains(&i))
            .any(|&i| pred(bytes[i]))
    }

    pub fn inner_text(&self, subst: &Subst) -> &'a str {
        &self.text[subst.inner.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_hide_operators() {
        let scan = walk("?e 'a;b' \"c|d\" e\\;f ; g").unwrap();
        assert_eq!(scan.positions(b';').collect::<Vec<_>>(), vec![20]);
        assert_eq!(scan.find(b'|'), None);
    }

    #[test]
    fn test_substitution_forms() {
        let text = "s `?e a` $(?e (b)) ``?e c`` \"`?e d`\"";
        let scan = walk(text).unwrap();
        let found: Vec<(&str, bool, bool)> = scan
            .substs
            .iter()
            .map(|s| (scan.inner_text(s), s.discard, s.in_dquote))
            .collect();
        assert_eq!(
            found,
            vec![
                ("?e a", false, false),
                ("?e (b)", false, false),
                ("?e c", true, false),
                ("?e d", false, true),
            ]
        );
    }

    #[test]
    fn test_unterminated() {
        assert!(walk("?e \"abc").is_err());
        assert!(walk("?e `abc").is_err());
        assert!(walk("?e $(abc").is_err());
        assert!(walk("?e \\\"abc").is_ok());
    }

    #[test]
    fn test_stop_before_trailing_garbage() {
        let text = "?e hi # it's";
        let scan = walk_until(text, is_comment_start).unwrap();
        assert_eq!(scan.stopped, Some(6));
    }

    #[test]
    fn test_backslash_before_plain_char_is_literal() {
        let scan = walk("a\\b;c").unwrap();
        assert!(scan.is_top(1));
        assert_eq!(scan.find(b';'), Some(3));
    }
}
