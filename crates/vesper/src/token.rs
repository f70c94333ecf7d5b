//! Hand-written lexer for Vesper source text.
//!
//! Produces a flat token vector consumed by the parser. Every token carries
//! its source range so diagnostics can point at a line and column. String
//! literals are segmented here: plain text runs and `{...}` interpolation
//! holes are split apart, and the parser later re-parses each hole as an
//! expression.

use std::fmt;

/// A single source position (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    pub(crate) fn start() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.column)
    }
}

/// Source span of a token or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CodeRange {
    pub start: CodeLoc,
    pub end: CodeLoc,
}

impl CodeRange {
    pub fn at(loc: CodeLoc) -> Self {
        Self { start: loc, end: loc }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn to(self, other: Self) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }
}

/// One piece of a (possibly interpolated) string literal.
///
/// `"a {b} c"` lexes to `[Text("a "), Hole{..}, Text(" c")]`. The hole keeps
/// its raw source and start location so the parser can re-lex it with
/// diagnostics that still point into the original file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StringSegment {
    Text(String),
    Hole { source: String, loc: CodeLoc },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Int(i64),
    Float(f64),
    Str(Vec<StringSegment>),
    Ident(String),

    // keywords
    Let,
    Funct,
    Async,
    Await,
    Show,
    Blueprint,
    Inherits,
    SuperKw,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    Try,
    Catch,
    Finally,
    Raise,
    Not,
    And,
    Or,
    True,
    False,
    Null,

    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,

    Newline,
    Eof,
}

impl TokenKind {
    /// Short human-readable name used in "unexpected token" diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Int(v) => format!("integer `{v}`"),
            Self::Float(v) => format!("float `{v}`"),
            Self::Str(_) => "string literal".to_owned(),
            Self::Ident(name) => format!("`{name}`"),
            Self::Newline => "end of line".to_owned(),
            Self::Eof => "end of input".to_owned(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Let => "let",
            Self::Funct => "funct",
            Self::Async => "async",
            Self::Await => "await",
            Self::Show => "show",
            Self::Blueprint => "blueprint",
            Self::Inherits => "inherits",
            Self::SuperKw => "super",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::In => "in",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Return => "return",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::Raise => "raise",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::Question => "?",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Caret => "^",
            Self::Assign => "=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Int(_) | Self::Float(_) | Self::Str(_) | Self::Ident(_) | Self::Newline | Self::Eof => "",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub range: CodeRange,
}

/// Error produced by the lexer or parser.
#[derive(Debug, Clone)]
pub(crate) struct ParseError {
    pub message: String,
    pub loc: CodeLoc,
}

impl ParseError {
    pub fn new(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "let" => TokenKind::Let,
        "funct" => TokenKind::Funct,
        "async" => TokenKind::Async,
        "await" => TokenKind::Await,
        "show" => TokenKind::Show,
        "blueprint" => TokenKind::Blueprint,
        "inherits" => TokenKind::Inherits,
        "super" => TokenKind::SuperKw,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "return" => TokenKind::Return,
        "try" => TokenKind::Try,
        "catch" => TokenKind::Catch,
        "finally" => TokenKind::Finally,
        "raise" => TokenKind::Raise,
        "not" => TokenKind::Not,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => return None,
    };
    Some(kind)
}

pub(crate) struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Lexes the whole source, collapsing consecutive newlines into one token.
    pub fn lex(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_spaces_and_comments();
            let loc = self.loc();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    range: CodeRange::at(loc),
                });
                return Ok(tokens);
            };
            if c == '\n' {
                self.bump();
                if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Newline) | None) {
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        range: CodeRange::at(loc),
                    });
                }
                continue;
            }
            let token = self.next_token(loc)?;
            tokens.push(token);
        }
    }

    fn next_token(&mut self, start: CodeLoc) -> Result<Token, ParseError> {
        let c = self.bump().expect("next_token called at end of input");
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '=' => {
                if self.eat_char('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat_char('=') {
                    TokenKind::NotEq
                } else {
                    return Err(ParseError::new("unexpected `!`, use `not` or `!=`", start));
                }
            }
            '<' => {
                if self.eat_char('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat_char('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '"' => self.lex_string(start)?,
            c if c.is_ascii_digit() => self.lex_number(c, start)?,
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                ident.push(c);
                while let Some(n) = self.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        ident.push(n);
                        self.bump();
                    } else {
                        break;
                    }
                }
                keyword(&ident).unwrap_or(TokenKind::Ident(ident))
            }
            other => return Err(ParseError::new(format!("unexpected character `{other}`"), start)),
        };
        let end = self.prev_loc();
        Ok(Token {
            kind,
            range: CodeRange { start, end },
        })
    }

    fn lex_number(&mut self, first: char, start: CodeLoc) -> Result<TokenKind, ParseError> {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // a dot is part of the number only when a digit follows, so `1.len` stays an attribute access
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| ParseError::new(format!("invalid float literal `{text}`"), start))?;
            Ok(TokenKind::Float(value))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| ParseError::new(format!("integer literal `{text}` is too large"), start))?;
            Ok(TokenKind::Int(value))
        }
    }

    fn lex_string(&mut self, start: CodeLoc) -> Result<TokenKind, ParseError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        loop {
            let loc = self.loc();
            let Some(c) = self.bump() else {
                return Err(ParseError::new("unterminated string literal", start));
            };
            match c {
                '"' => break,
                '\n' => return Err(ParseError::new("unterminated string literal", start)),
                '\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(ParseError::new("unterminated string literal", start));
                    };
                    match esc {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        '\\' => text.push('\\'),
                        '"' => text.push('"'),
                        '{' => text.push('{'),
                        '}' => text.push('}'),
                        other => {
                            return Err(ParseError::new(format!("unknown escape `\\{other}`"), loc));
                        }
                    }
                }
                '{' => {
                    if !text.is_empty() {
                        segments.push(StringSegment::Text(std::mem::take(&mut text)));
                    }
                    let hole_loc = self.loc();
                    let mut depth = 1usize;
                    let mut source = String::new();
                    loop {
                        let Some(inner) = self.bump() else {
                            return Err(ParseError::new("unterminated `{` in string interpolation", hole_loc));
                        };
                        match inner {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            '\n' => {
                                return Err(ParseError::new(
                                    "string interpolation may not span lines",
                                    hole_loc,
                                ));
                            }
                            _ => {}
                        }
                        source.push(inner);
                    }
                    if source.trim().is_empty() {
                        return Err(ParseError::new("empty interpolation in string literal", hole_loc));
                    }
                    segments.push(StringSegment::Hole { source, loc: hole_loc });
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() || segments.is_empty() {
            segments.push(StringSegment::Text(text));
        }
        Ok(TokenKind::Str(segments))
    }

    fn skip_spaces_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn loc(&self) -> CodeLoc {
        CodeLoc {
            line: self.line,
            column: self.column,
        }
    }

    /// Location of the character just consumed.
    fn prev_loc(&self) -> CodeLoc {
        CodeLoc {
            line: self.line,
            column: self.column.saturating_sub(1).max(1),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source).lex().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_numbers_and_ops() {
        assert_eq!(
            kinds("1 + 2.5 ^ 3"),
            vec![
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Float(2.5),
                TokenKind::Caret,
                TokenKind::Int(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dot_after_int_is_attribute() {
        assert_eq!(
            kinds("xs.len"),
            vec![
                TokenKind::Ident("xs".to_owned()),
                TokenKind::Dot,
                TokenKind::Ident("len".to_owned()),
                TokenKind::Eof,
            ]
        );
        // no digit after the dot: the dot is punctuation, not a float
        assert_eq!(
            kinds("1.len"),
            vec![
                TokenKind::Int(1),
                TokenKind::Dot,
                TokenKind::Ident("len".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_collapse() {
        assert_eq!(
            kinds("a\n\n\nb"),
            vec![
                TokenKind::Ident("a".to_owned()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_interpolation_segments() {
        let tokens = kinds("\"x is {x + 1}!\"");
        let TokenKind::Str(segments) = &tokens[0] else {
            panic!("expected string token");
        };
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], StringSegment::Text("x is ".to_owned()));
        assert!(matches!(&segments[1], StringSegment::Hole { source, .. } if source == "x + 1"));
        assert_eq!(segments[2], StringSegment::Text("!".to_owned()));
    }

    #[test]
    fn escaped_braces_stay_text() {
        let tokens = kinds(r#""\{literal\}""#);
        let TokenKind::Str(segments) = &tokens[0] else {
            panic!("expected string token");
        };
        assert_eq!(segments, &[StringSegment::Text("{literal}".to_owned())]);
    }

    #[test]
    fn bad_bang_is_an_error() {
        let err = Lexer::new("a ! b").lex().unwrap_err();
        assert!(err.message.contains("unexpected `!`"));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a # trailing\nb"),
            vec![
                TokenKind::Ident("a".to_owned()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_owned()),
                TokenKind::Eof,
            ]
        );
    }
}
