//! SQL tokenizer for the query gateway.
//!
//! Produces byte-offset tokens annotated with their parenthesis depth so the
//! classifier and injector can reason about SELECT scopes without a full
//! grammar. String literals and quoted identifiers are single tokens, which
//! keeps keywords inside them from being mistaken for clauses. Comments are
//! reported separately so they can be stripped before analysis.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or bare identifier
    Word,
    /// `"ident"`, `` `ident` `` or `[ident]`
    QuotedIdent,
    /// `'text'`
    StringLit,
    Number,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    /// Operators and any other punctuation
    Symbol,
}

/// A token as a byte span into the lexed text.
///
/// `depth` is the number of enclosing parentheses. A `(` carries the depth
/// outside it and its matching `)` carries the same depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub depth: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    /// Case-insensitive keyword test; only bare words can be keywords.
    pub fn is_keyword(&self, src: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(src).eq_ignore_ascii_case(keyword)
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),
    #[error("unterminated quoted identifier starting at offset {0}")]
    UnterminatedIdentifier(usize),
    #[error("unterminated block comment starting at offset {0}")]
    UnterminatedComment(usize),
    #[error("backslash inside string literal at offset {0} is not allowed")]
    BackslashInString(usize),
    #[error("unbalanced closing parenthesis at offset {0}")]
    UnbalancedClose(usize),
    #[error("{0} parenthesis group(s) left open")]
    UnclosedParen(usize),
}

/// Output of [`tokenize`].
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    /// Byte spans of line and block comments, in order
    pub comments: Vec<(usize, usize)>,
}

pub fn tokenize(src: &str) -> Result<Lexed, LexError> {
    let bytes = src.as_bytes();
    let mut lexed = Lexed::default();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;
        let kind = match b {
            _ if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = line_end(bytes, i);
                lexed.comments.push((start, i));
                continue;
            }
            b'#' => {
                i = line_end(bytes, i);
                lexed.comments.push((start, i));
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = find_subslice(bytes, i + 2, b"*/")
                    .ok_or(LexError::UnterminatedComment(start))?;
                i = close + 2;
                lexed.comments.push((start, i));
                continue;
            }
            b'\'' => {
                i = scan_string(bytes, i)?;
                TokenKind::StringLit
            }
            b'"' | b'`' => {
                i = scan_quoted(bytes, i, b)?;
                TokenKind::QuotedIdent
            }
            b'[' => {
                let close = bytes[i + 1..]
                    .iter()
                    .position(|&c| c == b']')
                    .ok_or(LexError::UnterminatedIdentifier(start))?;
                i = i + 1 + close + 1;
                TokenKind::QuotedIdent
            }
            b'(' => {
                lexed.tokens.push(Token {
                    kind: TokenKind::LParen,
                    start,
                    end: i + 1,
                    depth,
                });
                depth += 1;
                i += 1;
                continue;
            }
            b')' => {
                if depth == 0 {
                    return Err(LexError::UnbalancedClose(start));
                }
                depth -= 1;
                i += 1;
                TokenKind::RParen
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b';' => {
                i += 1;
                TokenKind::Semicolon
            }
            b'.' => {
                i += 1;
                TokenKind::Dot
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            _ if is_word_start(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                i += 1;
                TokenKind::Symbol
            }
        };

        lexed.tokens.push(Token {
            kind,
            start,
            end: i,
            depth,
        });
    }

    if depth > 0 {
        return Err(LexError::UnclosedParen(depth));
    }

    Ok(lexed)
}

/// Replace every comment span with a single space.
pub fn strip_comments(src: &str, comments: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(src.len());
    let mut last = 0;
    for &(start, end) in comments {
        out.push_str(&src[last..start]);
        out.push(' ');
        last = end;
    }
    out.push_str(&src[last..]);
    out
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&c| c == b'\n')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Scan a `'...'` literal with `''` escapes, returning the end offset.
fn scan_string(bytes: &[u8], start: usize) -> Result<usize, LexError> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => return Err(LexError::BackslashInString(i)),
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(LexError::UnterminatedString(start))
}

/// Scan an identifier quoted with `delim`, where a doubled delimiter escapes it.
fn scan_quoted(bytes: &[u8], start: usize, delim: u8) -> Result<usize, LexError> {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == delim {
            if bytes.get(i + 1) == Some(&delim) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(LexError::UnterminatedIdentifier(start))
}

fn scan_number(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
        let exponent = matches!(bytes[i], b'e' | b'E')
            && matches!(bytes.get(i + 1), Some(b'+') | Some(b'-'));
        i += if exponent { 2 } else { 1 };
    }
    i
}
