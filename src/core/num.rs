//! Num - Numeric expression evaluation
//!
//! Evaluates the math expressions accepted wherever a command takes an
//! address or a size. Symbols (flags, registers, `$$`...) are looked up
//! through a [`Resolver`].

use thiserror::Error;

/// Expression evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumError {
    #[error("Empty expression")]
    Empty,

    #[error("Invalid number '{0}'")]
    BadLiteral(String),

    #[error("Unknown symbol '{0}'")]
    Unknown(String),

    #[error("Syntax error in '{expr}': {reason}")]
    Syntax { expr: String, reason: String },

    #[error("Division by zero")]
    DivisionByZero,
}

/// Symbol lookup used by [`eval`]
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<u64>;
}

/// Resolver that knows no symbols
pub struct NoSymbols;

impl Resolver for NoSymbols {
    fn resolve(&self, _name: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(u64),
    Sym(String),
    Op(&'static str),
    Open,
    Close,
}

const OPERATORS: &[&str] = &[
    "<<", ">>", "+", "-", "*", "/", "%", "&", "|", "^", "~",
];

fn tokenize(expr: &str) -> Result<Vec<Token>, NumError> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'(' {
            tokens.push(Token::Open);
            i += 1;
            continue;
        }
        if c == b')' {
            tokens.push(Token::Close);
            i += 1;
            continue;
        }
        if c == b'\'' {
            // 'c' character literal
            match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(ch), Some(b'\'')) => {
                    tokens.push(Token::Num(u64::from(*ch)));
                    i += 3;
                    continue;
                }
                _ => {
                    return Err(NumError::Syntax {
                        expr: expr.to_string(),
                        reason: "unterminated character literal".into(),
                    })
                }
            }
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                i += 1;
            }
            tokens.push(Token::Num(parse_literal(&expr[start..i])?));
            continue;
        }
        if c == b'$' && matches!(bytes.get(i + 1), Some(b'$') | Some(b'?')) {
            tokens.push(Token::Sym(expr[i..i + 2].to_string()));
            i += 2;
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c == b'.' {
            let start = i;
            i += 1;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.' | b'$'))
            {
                i += 1;
            }
            tokens.push(Token::Sym(expr[start..i].to_string()));
            continue;
        }
        match OPERATORS.iter().find(|op| expr[i..].starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(op));
                i += op.len();
            }
            None => {
                return Err(NumError::Syntax {
                    expr: expr.to_string(),
                    reason: format!("unexpected '{}'", c as char),
                })
            }
        }
    }
    Ok(tokens)
}

/// Parse a single literal: `0x10`, `0o17`, `0b101`, `10h`, `42`
pub fn parse_literal(text: &str) -> Result<u64, NumError> {
    let bad = || NumError::BadLiteral(text.to_string());
    let lower = text.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map_err(|_| bad())
    } else if let Some(oct) = lower.strip_prefix("0o") {
        u64::from_str_radix(oct, 8).map_err(|_| bad())
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).map_err(|_| bad())
    } else if let Some(hex) = lower.strip_suffix('h') {
        u64::from_str_radix(hex, 16).map_err(|_| bad())
    } else {
        lower.parse::<u64>().map_err(|_| bad())
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    expr: &'a str,
    resolver: &'a dyn Resolver,
}

// Binary operators from loosest to tightest
const LEVELS: &[&[&str]] = &[&["|"], &["^"], &["&"], &["<<", ">>"], &["+", "-"], &["*", "/", "%"]];

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn binary(&mut self, level: usize) -> Result<u64, NumError> {
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !LEVELS[level].contains(&op) {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = match op {
                "|" => lhs | rhs,
                "^" => lhs ^ rhs,
                "&" => lhs & rhs,
                "<<" => lhs.wrapping_shl(rhs as u32),
                ">>" => lhs.wrapping_shr(rhs as u32),
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" => lhs.checked_div(rhs).ok_or(NumError::DivisionByZero)?,
                _ => lhs.checked_rem(rhs).ok_or(NumError::DivisionByZero)?,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<u64, NumError> {
        match self.peek() {
            Some(Token::Op("-")) => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            Some(Token::Op("~")) => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            Some(Token::Op("+")) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<u64, NumError> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Sym(name)) => self
                .resolver
                .resolve(&name)
                .ok_or(NumError::Unknown(name)),
            Some(Token::Open) => {
                let value = self.binary(0)?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(self.syntax("missing ')'")),
                }
            }
            Some(other) => Err(self.syntax(&format!("unexpected {:?}", other))),
            None => Err(self.syntax("unexpected end of expression")),
        }
    }

    fn syntax(&self, reason: &str) -> NumError {
        NumError::Syntax {
            expr: self.expr.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Evaluate `expr`
pub fn eval(expr: &str, resolver: &dyn Resolver) -> Result<u64, NumError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(NumError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        expr,
        resolver,
    };
    let value = parser.binary(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.syntax("trailing tokens"));
    }
    Ok(value)
}

/// Replace the low nibbles of `base` with the hex digits in `digits`
pub fn tail(base: u64, digits: &str) -> Result<u64, NumError> {
    let digits = digits.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    if digits.is_empty() {
        return Err(NumError::Empty);
    }
    let value =
        u64::from_str_radix(digits, 16).map_err(|_| NumError::BadLiteral(digits.to_string()))?;
    if digits.len() >= 16 {
        return Ok(value);
    }
    let mask = (1u64 << (digits.len() * 4)) - 1;
    Ok((base & !mask) | value)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Resolver for Fixed {
        fn resolve(&self, name: &str) -> Option<u64> {
            match name {
                "$$" => Some(0x1000),
                "sym.main" => Some(0x400),
                _ => None,
            }
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("0x10", &NoSymbols), Ok(16));
        assert_eq!(eval("10h", &NoSymbols), Ok(16));
        assert_eq!(eval("0b101", &NoSymbols), Ok(5));
        assert_eq!(eval("'A'", &NoSymbols), Ok(65));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1+2*3", &NoSymbols), Ok(7));
        assert_eq!(eval("(1+2)*3", &NoSymbols), Ok(9));
        assert_eq!(eval("1<<4|1", &NoSymbols), Ok(17));
        assert_eq!(eval("-1", &NoSymbols), Ok(u64::MAX));
        assert_eq!(eval("4/0", &NoSymbols), Err(NumError::DivisionByZero));
    }

    #[test]
    fn test_symbols() {
        assert_eq!(eval("$$+4", &Fixed), Ok(0x1004));
        assert_eq!(eval("sym.main + 0x10", &Fixed), Ok(0x410));
        assert_eq!(eval("nope", &Fixed), Err(NumError::Unknown("nope".into())));
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail(0x8048000, "123"), Ok(0x8048123));
        assert_eq!(tail(0x8048000, "ff"), Ok(0x80480ff));
    }
}
