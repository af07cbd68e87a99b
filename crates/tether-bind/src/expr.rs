#![forbid(unsafe_code)]

//! Binding expression parser.
//!
//! Grammar, informally:
//!
//! ```text
//! expr      := target (" | " formatter)* (" < " watchedPath+)?
//! formatter := name target*
//! target    := undefined | null | true | false
//!            | -?digits(.digits)?
//!            | 'text' | "text"
//!            | path
//! ```
//!
//! Tokenization is a single whitespace-delimited pass with one character
//! of lookahead; quoting is flat (no nesting, no escapes). Parsing is pure:
//! it depends only on the input string, never on any bound data.
//!
//! # Failure Modes
//!
//! | Failure | Cause |
//! |---------|-------|
//! | `EmptyTarget` | nothing before the first `\|` or `<` |
//! | `UnterminatedString` | quote never closed |
//! | `MalformedNumber` | token starts numeric but is not `-?\d+(\.\d+)?` |
//! | `MissingFormatterName` | `\|` not followed by a path-shaped name |
//! | `EmptyWatch` | `<` with no paths after it |
//! | `UnexpectedToken` | literal in the watch clause, `\|` after `<`, … |

use std::fmt;

use tether_observe::Value;

/// Errors from expression parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    EmptyTarget,
    UnterminatedString { at: usize },
    MalformedNumber { text: String },
    MissingFormatterName,
    EmptyWatch,
    UnexpectedToken { text: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTarget => write!(f, "expression has no target"),
            Self::UnterminatedString { at } => {
                write!(f, "unterminated string starting at offset {at}")
            }
            Self::MalformedNumber { text } => write!(f, "malformed number '{text}'"),
            Self::MissingFormatterName => write!(f, "'|' must be followed by a formatter name"),
            Self::EmptyWatch => write!(f, "'<' must be followed by at least one path"),
            Self::UnexpectedToken { text } => write!(f, "unexpected token '{text}'"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A parsed expression operand: a property path, or a primitive constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Path(String),
    Literal(Value),
}

impl Target {
    #[must_use]
    pub fn is_path(&self) -> bool {
        matches!(self, Self::Path(_))
    }
}

/// One formatter application: a name and its argument targets.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatterInvocation {
    pub name: String,
    pub args: Vec<Target>,
}

/// A fully parsed binding expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub target: Target,
    pub formatters: Vec<FormatterInvocation>,
    /// Extra paths that re-evaluate the expression without being its value.
    pub watch: Vec<String>,
}

/// Raw lexer output.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    Watch,
    Str(String),
    Num(f64),
    Bare(String),
}

/// Lexer state: what kind of token the current character run belongs to.
enum Run {
    Number,
    Bare,
}

fn lex(input: &str) -> Result<Vec<Token>, ParseError> {
    let bytes: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '<' => {
                tokens.push(Token::Watch);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let from = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i == bytes.len() {
                    return Err(ParseError::UnterminatedString { at: start });
                }
                tokens.push(Token::Str(bytes[from..i].iter().collect()));
                i += 1;
            }
            _ => {
                // One character of lookahead decides the run: a digit, or a
                // minus sign directly before a digit, starts a number run.
                let run = if c.is_ascii_digit()
                    || (c == '-'
                        && bytes
                            .get(i + 1)
                            .is_some_and(|next| next.is_ascii_digit()))
                {
                    Run::Number
                } else {
                    Run::Bare
                };
                let from = i;
                while i < bytes.len()
                    && !bytes[i].is_whitespace()
                    && !matches!(bytes[i], '|' | '<' | '\'' | '"')
                {
                    i += 1;
                }
                let text: String = bytes[from..i].iter().collect();
                match run {
                    Run::Number => {
                        let value = parse_number(&text)
                            .ok_or(ParseError::MalformedNumber { text: text.clone() })?;
                        tokens.push(Token::Num(value));
                    }
                    Run::Bare => tokens.push(Token::Bare(text)),
                }
            }
        }
    }
    Ok(tokens)
}

/// Strict `-?\d+(\.\d+)?` parse; anything looser is rejected.
fn parse_number(text: &str) -> Option<f64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (digits, None),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    text.parse().ok()
}

/// Classify a non-delimiter token as an expression operand.
fn classify(token: Token) -> Target {
    match token {
        Token::Str(s) => Target::Literal(Value::str(s)),
        Token::Num(n) => Target::Literal(Value::Number(n)),
        Token::Bare(word) => match word.as_str() {
            "undefined" => Target::Literal(Value::Undefined),
            "null" => Target::Literal(Value::Null),
            "true" => Target::Literal(Value::Bool(true)),
            "false" => Target::Literal(Value::Bool(false)),
            _ => Target::Path(word),
        },
        Token::Pipe | Token::Watch => unreachable!("delimiters are not operands"),
    }
}

/// Parse a binding expression.
pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let mut tokens = lex(input)?.into_iter().peekable();

    let target = match tokens.next() {
        Some(Token::Pipe) | Some(Token::Watch) | None => return Err(ParseError::EmptyTarget),
        Some(token) => classify(token),
    };

    let mut formatters = Vec::new();
    let mut watch = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            Token::Pipe => {
                let name = match tokens.next() {
                    Some(Token::Bare(word)) => match classify(Token::Bare(word)) {
                        Target::Path(name) => name,
                        Target::Literal(_) => return Err(ParseError::MissingFormatterName),
                    },
                    _ => return Err(ParseError::MissingFormatterName),
                };
                let mut args = Vec::new();
                while let Some(next) = tokens.peek() {
                    if matches!(next, Token::Pipe | Token::Watch) {
                        break;
                    }
                    args.push(classify(tokens.next().expect("peeked")));
                }
                formatters.push(FormatterInvocation { name, args });
            }
            Token::Watch => {
                for token in tokens.by_ref() {
                    match token {
                        Token::Bare(word) => match classify(Token::Bare(word)) {
                            Target::Path(path) => watch.push(path),
                            Target::Literal(v) => {
                                return Err(ParseError::UnexpectedToken {
                                    text: v.to_string(),
                                });
                            }
                        },
                        Token::Str(s) => {
                            return Err(ParseError::UnexpectedToken { text: s });
                        }
                        Token::Num(n) => {
                            return Err(ParseError::UnexpectedToken {
                                text: Value::Number(n).to_string(),
                            });
                        }
                        Token::Pipe => {
                            return Err(ParseError::UnexpectedToken {
                                text: "|".to_string(),
                            });
                        }
                        Token::Watch => {
                            return Err(ParseError::UnexpectedToken {
                                text: "<".to_string(),
                            });
                        }
                    }
                }
                if watch.is_empty() {
                    return Err(ParseError::EmptyWatch);
                }
                break;
            }
            other => {
                let text = match other {
                    Token::Str(s) => s,
                    Token::Num(n) => Value::Number(n).to_string(),
                    Token::Bare(w) => w,
                    Token::Pipe | Token::Watch => unreachable!("handled above"),
                };
                return Err(ParseError::UnexpectedToken { text });
            }
        }
    }

    Ok(Expression {
        target,
        formatters,
        watch,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
