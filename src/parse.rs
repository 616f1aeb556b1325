use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::{
    MAX_PARSE_DEPTH,
    lex::{Token, TokenKind},
    value::Value,
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} but got {found}")]
    Unexpected {
        expected: String,
        found: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("expected {expected} but got end of input")]
    #[diagnostic(help("the input ended early, possibly a missing closing bracket"))]
    UnexpectedEof {
        expected: String,
        #[label("input ends here")]
        span: SourceSpan,
    },

    #[error("invalid number literal `{literal}`: {reason}")]
    InvalidNumber {
        literal: String,
        reason: String,
        #[label("this numeric literal")]
        span: SourceSpan,
    },

    #[error("expression nested deeper than {limit} levels")]
    TooDeeplyNested {
        limit: usize,
        #[label("limit reached here")]
        span: SourceSpan,
    },
}

/// Predictive parser: every alternative is picked from a single token of lookahead.
pub struct Parser<'a, 'de> {
    tokens: &'a [Token<'de>],
    cursor: usize,
    depth: usize,
}

impl<'a, 'de> Parser<'a, 'de> {
    pub fn new(tokens: &'a [Token<'de>]) -> Self {
        Parser {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    fn done(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token<'de>> {
        self.tokens.get(self.cursor)
    }

    fn peek_punctuation(&self, punctuation: &str) -> bool {
        self.peek().is_some_and(|token| {
            token.kind == TokenKind::Punctuation && token.literal == punctuation
        })
    }

    fn advance(&mut self) -> Option<Token<'de>> {
        let token = self.tokens.get(self.cursor).copied();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn end_span(&self) -> SourceSpan {
        let end = self
            .tokens
            .last()
            .map_or(0, |token| token.offset + token.literal.len());
        SourceSpan::from(end..end)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::Unexpected {
                expected: expected.to_string(),
                found: format!("{} {:?}", token.kind, token.literal),
                span: token.span(),
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
                span: self.end_span(),
            },
        }
    }

    fn expect_punctuation(&mut self, punctuation: &str) -> Result<Token<'de>, ParseError> {
        if self.peek_punctuation(punctuation) {
            if let Some(token) = self.advance() {
                return Ok(token);
            }
        }
        Err(self.unexpected(&format!("{punctuation:?}")))
    }

    /// `program := expression* EOF`, wrapped as `(do ...)`.
    pub fn parse_program(&mut self) -> Result<Value, ParseError> {
        let mut statements = vec![Value::symbol("do")];
        while !self.done() {
            statements.push(self.parse_expression()?);
        }
        Ok(Value::Apply(statements))
    }

    /// `expression := value ('.' accessor)*`
    pub fn parse_expression(&mut self) -> Result<Value, ParseError> {
        self.depth += 1;
        let result = if self.depth > MAX_PARSE_DEPTH {
            Err(ParseError::TooDeeplyNested {
                limit: MAX_PARSE_DEPTH,
                span: self.peek().map_or_else(|| self.end_span(), Token::span),
            })
        } else {
            self.parse_chain()
        };
        self.depth -= 1;
        result
    }

    fn parse_chain(&mut self) -> Result<Value, ParseError> {
        let value = self.parse_value()?;
        if !self.peek_punctuation(".") {
            return Ok(value);
        }

        let mut chain = vec![value];
        while self.peek_punctuation(".") {
            self.advance();
            chain.push(self.parse_accessor()?);
        }
        Ok(Value::Drill(chain))
    }

    fn parse_accessor(&mut self) -> Result<Value, ParseError> {
        match self.peek().map(|token| token.kind) {
            Some(TokenKind::Identifier | TokenKind::Integer | TokenKind::String) => {
                self.parse_value()
            }
            _ => Err(self.unexpected("accessor")),
        }
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        let Some(&token) = self.peek() else {
            return Err(self.unexpected("value"));
        };

        match (token.kind, token.literal) {
            (TokenKind::Punctuation, "(") => {
                Ok(Value::Apply(self.parse_items("(", ")", Self::parse_expression)?))
            }
            (TokenKind::Punctuation, "[") => {
                Ok(Value::List(self.parse_items("[", "]", Self::parse_expression)?))
            }
            (TokenKind::Punctuation, "{") => {
                Ok(Value::Map(self.parse_items("{", "}", Self::parse_entry)?))
            }
            (TokenKind::Punctuation, "#") => {
                self.advance();
                Ok(Value::quote(self.parse_expression()?))
            }
            (TokenKind::Punctuation, "$") => {
                self.advance();
                Ok(Value::unquote(self.parse_expression()?))
            }
            (TokenKind::Identifier, name) => {
                self.advance();
                Ok(Value::symbol(name))
            }
            (TokenKind::Integer, literal) => {
                self.advance();
                literal
                    .parse()
                    .map(Value::Integer)
                    .map_err(|e: std::num::ParseIntError| ParseError::InvalidNumber {
                        literal: literal.to_string(),
                        reason: e.to_string(),
                        span: token.span(),
                    })
            }
            (TokenKind::Float, literal) => {
                self.advance();
                literal
                    .parse()
                    .map(Value::Float)
                    .map_err(|e: std::num::ParseFloatError| ParseError::InvalidNumber {
                        literal: literal.to_string(),
                        reason: e.to_string(),
                        span: token.span(),
                    })
            }
            (TokenKind::String, literal) => {
                self.advance();
                Ok(Value::Str(unescape(&literal[1..literal.len() - 1])))
            }
            _ => Err(self.unexpected("value")),
        }
    }

    /// A map entry is exactly two expressions: key, then value.
    fn parse_entry(&mut self) -> Result<(Value, Value), ParseError> {
        let key = self.parse_expression()?;
        if self.peek_punctuation("}") {
            return Err(self.unexpected(&format!("value for map key `{key}`")));
        }
        let value = self.parse_expression()?;
        Ok((key, value))
    }

    fn parse_items<T>(
        &mut self,
        open: &str,
        close: &str,
        item: fn(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.expect_punctuation(open)?;

        let mut items = Vec::new();
        while !self.done() && !self.peek_punctuation(close) {
            items.push(item(self)?);
        }

        self.expect_punctuation(close)?;
        Ok(items)
    }
}

/// Decodes `\n` and `\t`; any other backslash pair is kept as written.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parses a whole program into `(do stmt...)`.
pub fn parse_program(tokens: &[Token<'_>]) -> Result<Value, ParseError> {
    let value = Parser::new(tokens).parse_program()?;
    log::trace!("parsed program: {value}");
    Ok(value)
}

/// Parses a single expression from the front of `tokens`; anything after it is ignored.
pub fn parse_expression(tokens: &[Token<'_>]) -> Result<Value, ParseError> {
    Parser::new(tokens).parse_expression()
}
