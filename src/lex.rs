use std::fmt::{self, Display};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// The lexer could not match any rule at `offset`.
#[derive(Error, Debug, Diagnostic)]
#[error(
    "[{line}:{column}] unexpected character {token:?}",
    line = location(.src.inner(), .bad_bit.offset()).0,
    column = location(.src.inner(), .bad_bit.offset()).1
)]
#[diagnostic(help("remove or correct the character: `{token:?}`"))]
pub struct TokenizeError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this character")]
    bad_bit: SourceSpan,

    pub token: char,
}

impl TokenizeError {
    /// Byte offset of the offending character in the original source.
    pub fn offset(&self) -> usize {
        self.bad_bit.offset()
    }

    pub fn line(&self) -> usize {
        self.location().0
    }

    pub fn column(&self) -> usize {
        self.location().1
    }

    pub fn location(&self) -> (usize, usize) {
        location(self.src.inner(), self.offset())
    }
}

/// 1-based `(line, column)` of byte `offset`, resolved by scanning `source` for newlines.
fn location(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(newline) => before[newline + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
    pub offset: usize,
}

impl Token<'_> {
    pub fn span(&self) -> SourceSpan {
        SourceSpan::from(self.offset..self.offset + self.literal.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comment,
    Float,
    Integer,
    String,
    Punctuation,
    Whitespace,
    Identifier,
}

impl TokenKind {
    /// Comments and whitespace are matched but never emitted.
    pub fn is_discarded(self) -> bool {
        matches!(self, TokenKind::Comment | TokenKind::Whitespace)
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Comment => "comment",
            TokenKind::Float => "float",
            TokenKind::Integer => "integer",
            TokenKind::String => "string",
            TokenKind::Punctuation => "punctuation",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Identifier => "identifier",
        };
        f.write_str(name)
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lit = self.literal;
        match self.kind {
            TokenKind::Comment => write!(f, "COMMENT {lit}"),
            TokenKind::Float => write!(f, "FLOAT {lit}"),
            TokenKind::Integer => write!(f, "INTEGER {lit}"),
            TokenKind::String => write!(f, "STRING {lit}"),
            TokenKind::Punctuation => write!(f, "PUNCTUATION {lit}"),
            TokenKind::Whitespace => write!(f, "WHITESPACE {lit:?}"),
            TokenKind::Identifier => write!(f, "IDENTIFIER {lit}"),
        }
    }
}

pub const PUNCTUATION: &[char] = &['#', '$', '.', '(', ')', '[', ']', '{', '}'];

fn is_punctuation(c: char) -> bool {
    PUNCTUATION.contains(&c)
}

struct Rule {
    kind: TokenKind,
    /// Length in bytes of the match anchored at the start of the input, if any.
    matcher: fn(&str) -> Option<usize>,
}

// Order is precedence: the first rule that matches wins, not the longest.
const RULES: [Rule; 7] = [
    Rule {
        kind: TokenKind::Comment,
        matcher: match_comment,
    },
    Rule {
        kind: TokenKind::Float,
        matcher: match_float,
    },
    Rule {
        kind: TokenKind::Integer,
        matcher: match_integer,
    },
    Rule {
        kind: TokenKind::String,
        matcher: match_string,
    },
    Rule {
        kind: TokenKind::Punctuation,
        matcher: match_punctuation,
    },
    Rule {
        kind: TokenKind::Whitespace,
        matcher: match_whitespace,
    },
    Rule {
        kind: TokenKind::Identifier,
        matcher: match_identifier,
    },
];

fn non_empty(len: usize) -> Option<usize> {
    (len > 0).then_some(len)
}

fn digits(input: &str) -> usize {
    input.bytes().take_while(u8::is_ascii_digit).count()
}

fn match_comment(input: &str) -> Option<usize> {
    input
        .starts_with("//")
        .then(|| input.find('\n').unwrap_or(input.len()))
}

fn match_float(input: &str) -> Option<usize> {
    let whole = non_empty(digits(input))?;
    let rest = input[whole..].strip_prefix('.')?;
    let fraction = non_empty(digits(rest))?;
    Some(whole + 1 + fraction)
}

fn match_integer(input: &str) -> Option<usize> {
    non_empty(digits(input))
}

fn match_string(input: &str) -> Option<usize> {
    let body = input.strip_prefix('"')?;
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some(i + 2),
            '\\' => {
                chars.next()?;
            }
            _ => {}
        }
    }
    None
}

fn match_punctuation(input: &str) -> Option<usize> {
    input.chars().next().filter(|&c| is_punctuation(c)).map(|_| 1)
}

fn match_whitespace(input: &str) -> Option<usize> {
    non_empty(
        input
            .bytes()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
            .count(),
    )
}

fn match_identifier(input: &str) -> Option<usize> {
    non_empty(
        input
            .find(|c: char| c.is_ascii_whitespace() || is_punctuation(c))
            .unwrap_or(input.len()),
    )
}

pub struct Lexer<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    rest: &'de str,
    pub byte: usize,
}

impl<'de> Lexer<'de> {
    pub fn new(filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            filename,
            whole: input,
            rest: input,
            byte: 0,
        }
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Result<Token<'de>, TokenizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let c = self.rest.chars().next()?;

            let matched = RULES
                .iter()
                .find_map(|rule| (rule.matcher)(self.rest).map(|len| (rule.kind, len)));

            let Some((kind, len)) = matched else {
                let error = TokenizeError {
                    src: NamedSource::new(
                        self.filename.unwrap_or("<input>"),
                        self.whole.to_string(),
                    ),
                    bad_bit: SourceSpan::from(self.byte..self.byte + c.len_utf8()),
                    token: c,
                };
                // Nothing after an unmatched character is meaningful.
                self.rest = "";
                return Some(Err(error));
            };

            let token = Token {
                kind,
                literal: &self.rest[..len],
                offset: self.byte,
            };
            self.rest = &self.rest[len..];
            self.byte += len;

            if !kind.is_discarded() {
                return Some(Ok(token));
            }
        }
    }
}

/// Splits `source` into its significant tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token<'_>>, TokenizeError> {
    Lexer::new(None, source).collect()
}
