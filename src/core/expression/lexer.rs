//! Expression tokenizer.
//!
//! Converts an expression source string into a flat token stream in a
//! single left-to-right pass. Numbers, quoted strings (with escape
//! decoding), identifiers, punctuation, and operators each become one
//! token; anything else is a lex error.

use std::collections::HashSet;

use lazy_static::lazy_static;

use super::error::{EvalResult, ExprError};
use super::value::Value;

lazy_static! {
    /// Operator lexemes, longest match wins.
    static ref OPERATORS: HashSet<&'static str> = [
        "+", "-", "*", "/", "%", "!", "=", "==", "!=", "===", "!==", "<", ">", "<=", ">=", "&&",
        "||", "|",
    ]
    .into_iter()
    .collect();
}

/// A single lexeme.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Character index into the source where the token starts.
    pub index: usize,
    /// The raw spelling of the token.
    pub text: String,
    /// Decoded value for number and string literals.
    pub value: Option<Value>,
    /// Whether the token is a bare name.
    pub identifier: bool,
}

impl Token {
    fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            value: None,
            identifier: false,
        }
    }

    fn with_value(index: usize, text: impl Into<String>, value: Value) -> Self {
        Self {
            index,
            text: text.into(),
            value: Some(value),
            identifier: false,
        }
    }

    fn ident(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            value: None,
            identifier: true,
        }
    }
}

/// Tokenize an expression source string.
pub fn lex(text: &str) -> EvalResult<Vec<Token>> {
    Lexer::new(text).tokenize()
}

/// The expression lexer.
pub struct Lexer {
    chars: Vec<char>,
    index: usize,
}

impl Lexer {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            index: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    /// The source text spanning `len` characters from the current index.
    fn slice(&self, len: usize) -> Option<String> {
        if self.index + len <= self.chars.len() {
            Some(self.chars[self.index..self.index + len].iter().collect())
        } else {
            None
        }
    }

    /// Tokenize the entire input.
    pub fn tokenize(mut self) -> EvalResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            if is_whitespace(ch) {
                self.index += 1;
            } else if ch.is_ascii_digit() || (ch == '.' && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()))
            {
                tokens.push(self.read_number()?);
            } else if is_ident_start(ch) {
                tokens.push(self.read_identifier());
            } else if ch == '\'' || ch == '"' {
                tokens.push(self.read_string(ch)?);
            } else if is_punctuation(ch) {
                tokens.push(Token::new(self.index, ch.to_string()));
                self.index += 1;
            } else if let Some(op) = self.match_operator() {
                tokens.push(Token::new(self.index, op.clone()));
                self.index += op.chars().count();
            } else {
                return Err(ExprError::lex(
                    format!("unexpected character '{}'", ch),
                    self.index,
                ));
            }
        }
        Ok(tokens)
    }

    /// Greedy longest-match operator lookup: three characters, then two,
    /// then one.
    fn match_operator(&self) -> Option<String> {
        for len in (1..=3).rev() {
            if let Some(candidate) = self.slice(len) {
                if OPERATORS.contains(candidate.as_str()) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn read_number(&mut self) -> EvalResult<Token> {
        let start = self.index;
        let mut number = String::new();
        while let Some(ch) = self.peek() {
            let lower = ch.to_ascii_lowercase();
            if lower == '.' || lower.is_ascii_digit() {
                number.push(lower);
            } else {
                let peek = self.peek_at(1);
                let last_is_e = number.ends_with('e');
                if lower == 'e' && peek.map(is_exp_operator).unwrap_or(false) {
                    number.push(lower);
                } else if is_exp_operator(lower)
                    && peek.map(|c| c.is_ascii_digit()).unwrap_or(false)
                    && last_is_e
                {
                    number.push(lower);
                } else if is_exp_operator(lower)
                    && !peek.map(|c| c.is_ascii_digit()).unwrap_or(false)
                    && last_is_e
                {
                    return Err(ExprError::lex("invalid exponent", self.index));
                } else {
                    break;
                }
            }
            self.index += 1;
        }

        let parsed: f64 = number
            .parse()
            .map_err(|_| ExprError::lex(format!("invalid number '{}'", number), start))?;
        Ok(Token::with_value(start, number, Value::Number(parsed)))
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.index;
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                name.push(ch);
                self.index += 1;
            } else {
                break;
            }
        }
        Token::ident(start, name)
    }

    fn read_string(&mut self, quote: char) -> EvalResult<Token> {
        let start = self.index;
        let mut raw = String::from(quote);
        let mut decoded = String::new();
        self.index += 1;

        while let Some(ch) = self.peek() {
            raw.push(ch);
            self.index += 1;
            if ch == '\\' {
                let escape = self.peek().ok_or_else(|| {
                    ExprError::lex("unterminated string escape", self.index)
                })?;
                raw.push(escape);
                self.index += 1;
                if escape == 'u' {
                    let hex = self.slice(4).ok_or_else(|| {
                        ExprError::lex("invalid unicode escape", self.index)
                    })?;
                    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(ExprError::lex("invalid unicode escape", self.index));
                    }
                    let code = u32::from_str_radix(&hex, 16).expect("hex digits");
                    let ch = char::from_u32(code).ok_or_else(|| {
                        ExprError::lex("invalid unicode escape", self.index)
                    })?;
                    raw.push_str(&hex);
                    decoded.push(ch);
                    self.index += 4;
                } else {
                    decoded.push(match escape {
                        'n' => '\n',
                        'f' => '\u{c}',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\u{b}',
                        '\'' => '\'',
                        '"' => '"',
                        other => other,
                    });
                }
            } else if ch == quote {
                return Ok(Token::with_value(start, raw, Value::Str(decoded)));
            } else {
                decoded.push(ch);
            }
        }

        Err(ExprError::lex("unterminated string", start))
    }
}

fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | '\n' | '\u{b}' | '\u{a0}')
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

fn is_punctuation(ch: char) -> bool {
    matches!(ch, '[' | ']' | '{' | '}' | '(' | ')' | '.' | ',' | ':' | ';' | '?')
}

fn is_exp_operator(ch: char) -> bool {
    ch == '+' || ch == '-' || ch.is_ascii_digit()
}
