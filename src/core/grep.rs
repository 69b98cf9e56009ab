//! Grep - `~` output filter
//!
//! Parses the text after `~` and applies it line-wise to captured output.
//!
//! Syntax: `word1,word2` (OR), `a&b` (AND), `!word` (negate), `^word` and
//! `word$` (anchors), `[n]` (column), `:n` (line index, negative from the
//! end), trailing `?` (count matching lines).

/// Compiled grep specifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grep {
    /// OR-ed groups of AND-ed terms
    groups: Vec<Vec<Term>>,
    column: Option<usize>,
    line: Option<i64>,
    count: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    word: String,
    negate: bool,
    begin: bool,
    end: bool,
}

impl Term {
    fn matches(&self, line: &str) -> bool {
        let hit = match (self.begin, self.end) {
            (true, true) => line == self.word,
            (true, false) => line.starts_with(&self.word),
            (false, true) => line.ends_with(&self.word),
            (false, false) => line.contains(&self.word),
        };
        hit != self.negate
    }
}

impl Grep {
    pub fn parse(spec: &str) -> Self {
        let mut rest = spec.trim();
        let mut grep = Grep::default();

        if let Some(stripped) = rest.strip_suffix('?') {
            if !stripped.ends_with('\\') {
                grep.count = true;
                rest = stripped;
            }
        }

        if let Some(colon) = rest.rfind(':') {
            if let Ok(n) = rest[colon + 1..].parse::<i64>() {
                grep.line = Some(n);
                rest = &rest[..colon];
            }
        }

        if rest.ends_with(']') {
            if let Some(open) = rest.rfind('[') {
                if let Ok(n) = rest[open + 1..rest.len() - 1].parse::<usize>() {
                    grep.column = Some(n);
                    rest = &rest[..open];
                }
            }
        }

        for group in rest.split(',') {
            let terms: Vec<Term> = group
                .split('&')
                .filter(|w| !w.is_empty())
                .map(parse_term)
                .collect();
            if !terms.is_empty() {
                grep.groups.push(terms);
            }
        }
        grep
    }

    fn matches(&self, line: &str) -> bool {
        self.groups.is_empty()
            || self
                .groups
                .iter()
                .any(|group| group.iter().all(|t| t.matches(line)))
    }

    /// Filter captured output
    pub fn apply(&self, text: &str) -> String {
        let mut lines: Vec<&str> = text.lines().filter(|l| self.matches(l)).collect();

        if let Some(n) = self.line {
            let idx = if n < 0 { lines.len() as i64 + n } else { n };
            lines = match usize::try_from(idx).ok().and_then(|i| lines.get(i)) {
                Some(line) => vec![*line],
                None => Vec::new(),
            };
        }

        if self.count {
            return format!("{}\n", lines.len());
        }

        let mut out = String::new();
        for line in lines {
            match self.column {
                Some(col) => {
                    if let Some(word) = line.split_whitespace().nth(col) {
                        out.push_str(word);
                        out.push('\n');
                    }
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out
    }
}

fn parse_term(word: &str) -> Term {
    let (negate, word) = match word.strip_prefix('!') {
        Some(w) => (true, w),
        None => (false, word),
    };
    let (begin, word) = match word.strip_prefix('^') {
        Some(w) => (true, w),
        None => (false, word),
    };
    let (end, word) = match word.strip_suffix('$') {
        Some(w) => (true, w),
        None => (false, word),
    };
    Term {
        word: word.to_string(),
        negate,
        begin,
        end,
    }
}

pub const GREP_HELP: &str = "\
Usage: [command]~[modifier][word,word][&word][column][:line][?]
| ~word      lines containing word
| ~a,b       lines containing a or b
| ~a&b       lines containing a and b
| ~!word     lines not containing word
| ~^word     lines starting with word
| ~word$     lines ending with word
| ~word[n]   print column n of matching lines
| ~word:n    print the nth matching line (negative counts from the end)
| ~word?     count matching lines
";
