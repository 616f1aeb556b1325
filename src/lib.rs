//! A small Lisp whose programs call into natively implemented host functions.
//!
//! Source text goes through three stages:
//!
//! - [`lex`] splits it into tokens with ordered, first-match rules,
//! - [`parse`] builds one [`Value`] for the whole program, `(do stmt...)`,
//! - [`eval`] walks that value against a persistent [`Environment`].
//!
//! ```
//! use hostlisp::{Interpreter, show};
//!
//! let mut interpreter = Interpreter::with_output(std::io::sink());
//! interpreter.execute("(set! a [1 2 3])").unwrap();
//! assert_eq!(show(&interpreter.eval("(+ a.0 a.2)").unwrap()), "4");
//! ```

use miette::Diagnostic;
use thiserror::Error;

pub mod eval;
pub mod lex;
pub mod parse;
pub mod system;
pub mod value;

pub use eval::{Environment, EvalError, Interpreter};
pub use lex::{Lexer, TokenizeError};
pub use parse::{ParseError, Parser};
pub use value::{Value, show};

/// Deepest nesting the parser accepts.
pub const MAX_PARSE_DEPTH: usize = 128;

/// Deepest recursion the evaluator accepts.
pub const MAX_EVAL_DEPTH: usize = 256;

/// The first failure of a pipeline run, tagged with the stage that produced it.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}
