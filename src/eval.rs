use std::{
    cell::Cell,
    collections::HashMap,
    io::Write,
    panic::{self, AssertUnwindSafe},
    sync::Once,
};

use miette::Diagnostic;
use thiserror::Error;

use crate::{
    MAX_EVAL_DEPTH,
    lex::tokenize,
    parse::parse_program,
    system,
    value::{HostFunction, Value},
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum EvalError {
    #[error("`+` expects integer operands, got {operand}")]
    NotAnInteger { operand: String },

    #[error("integer overflow in `+`")]
    Overflow,

    #[error("`set!` target must be a symbol, got {target}")]
    InvalidTarget { target: String },

    #[error("`{form}` expects {expected} operands, got {got}")]
    MalformedForm {
        form: &'static str,
        expected: String,
        got: usize,
    },

    #[error("cannot access {accessor} on {value}")]
    InvalidAccessor { accessor: String, value: String },

    #[error("index {index} out of range for {value} of length {len}")]
    IndexOutOfRange {
        index: i64,
        len: usize,
        value: String,
    },

    #[error("no entry {key} in {value}")]
    MissingKey { key: String, value: String },

    #[error("{callee} is not callable")]
    NotCallable { callee: String },

    #[error("`{function}` expects {expected} arguments, got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("argument {position} of `{function}` must be {expected}, got {got}")]
    ArgumentType {
        function: String,
        position: usize,
        expected: String,
        got: String,
    },

    #[error("`{function}` returned {got} values, declared {expected}")]
    ReturnArity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("`{function}` failed: {message}")]
    Host { function: String, message: String },

    #[error("evaluation nested deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("internal error: {0}")]
    #[diagnostic(help(
        "this is a bug in a host function or the evaluator; the interpreter is still usable"
    ))]
    Internal(String),
}

type Frame = HashMap<String, Value>;

/// The scope chain. Only the root frame exists unless an embedder pushes more.
#[derive(Debug)]
pub struct Environment {
    stack: Stack,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            stack: Stack {
                values: vec![Frame::new()],
            },
        }
    }

    /// Looks `name` up from the innermost frame outwards.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.stack.iter().find_map(|frame| frame.get(name))
    }

    /// Binds `name` in the innermost frame, never in an enclosing one.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.stack.current_mut().insert(name.into(), value);
    }

    pub fn push(&mut self) {
        self.stack.push();
    }

    /// Drops the innermost frame; the root frame is never removed.
    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.stack.values.len()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Stack {
    values: Vec<Frame>,
}

impl Stack {
    pub fn push(&mut self) {
        self.values.push(Frame::new());
    }

    pub fn pop(&mut self) {
        if self.values.len() > 1 {
            self.values.pop();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.values.iter().rev()
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        let last = self.values.len() - 1;
        &mut self.values[last]
    }
}

/// Evaluates `value` against `environment`.
pub fn evaluate(environment: &mut Environment, value: &Value) -> Result<Value, EvalError> {
    eval_at(environment, value, 0)
}

fn eval_at(
    environment: &mut Environment,
    value: &Value,
    depth: usize,
) -> Result<Value, EvalError> {
    if depth > MAX_EVAL_DEPTH {
        return Err(EvalError::TooDeep {
            limit: MAX_EVAL_DEPTH,
        });
    }
    let depth = depth + 1;

    match value {
        Value::Apply(items) => eval_apply(environment, items, depth),
        Value::Symbol(name) => Ok(environment.get(name).cloned().unwrap_or(Value::Nil)),
        Value::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval_at(environment, item, depth))
                .collect::<Result<_, _>>()?,
        )),
        Value::Map(entries) => Ok(Value::Map(
            entries
                .iter()
                .map(|(key, value)| -> Result<_, EvalError> {
                    Ok((
                        eval_at(environment, key, depth)?,
                        eval_at(environment, value, depth)?,
                    ))
                })
                .collect::<Result<_, _>>()?,
        )),
        Value::Drill(chain) => {
            let (base, keys) = chain.split_first().ok_or_else(|| {
                EvalError::Internal("drill chain without a base expression".to_string())
            })?;
            let base = eval_at(environment, base, depth)?;
            drill(base, keys)
        }
        // TODO: splice `$x` inside quoted templates; until then Unquote is as inert as Quote.
        Value::Quote(_)
        | Value::Unquote(_)
        | Value::Nil
        | Value::Integer(_)
        | Value::Float(_)
        | Value::Str(_)
        | Value::Function(_)
        | Value::Table(_) => Ok(value.clone()),
    }
}

fn eval_apply(
    environment: &mut Environment,
    items: &[Value],
    depth: usize,
) -> Result<Value, EvalError> {
    let Some((callee, args)) = items.split_first() else {
        return Ok(Value::Nil);
    };

    if let Value::Symbol(name) = callee {
        match name.as_str() {
            "do" => {
                let mut result = Value::Nil;
                for statement in args {
                    result = eval_at(environment, statement, depth)?;
                }
                return Ok(result);
            }
            "+" => {
                let mut total: i64 = 0;
                for arg in args {
                    match eval_at(environment, arg, depth)? {
                        Value::Integer(n) => {
                            total = total.checked_add(n).ok_or(EvalError::Overflow)?;
                        }
                        other => {
                            return Err(EvalError::NotAnInteger {
                                operand: other.to_string(),
                            });
                        }
                    }
                }
                return Ok(Value::Integer(total));
            }
            "set!" => {
                let [target, value] = args else {
                    return Err(EvalError::MalformedForm {
                        form: "set!",
                        expected: "2".to_string(),
                        got: args.len(),
                    });
                };
                let Value::Symbol(variable) = target else {
                    return Err(EvalError::InvalidTarget {
                        target: target.to_string(),
                    });
                };
                let value = eval_at(environment, value, depth)?;
                environment.define(variable.as_str(), value);
                return Ok(Value::Nil);
            }
            "get" => {
                let Some((base, keys)) = args.split_first() else {
                    return Err(EvalError::MalformedForm {
                        form: "get",
                        expected: "at least 1".to_string(),
                        got: 0,
                    });
                };
                let base = eval_at(environment, base, depth)?;
                return drill(base, keys);
            }
            _ => {}
        }
    }

    let callee = eval_at(environment, callee, depth)?;
    let args = args
        .iter()
        .map(|arg| eval_at(environment, arg, depth))
        .collect::<Result<Vec<_>, _>>()?;

    let Value::Function(function) = callee else {
        return Err(EvalError::NotCallable {
            callee: callee.to_string(),
        });
    };

    let mut outputs = call(&function, args)?;
    if outputs.len() == 1 {
        Ok(outputs.remove(0))
    } else {
        Ok(Value::Apply(outputs))
    }
}

/// Calls a host function with already-evaluated arguments.
///
/// A nil argument is replaced by the zero value of the parameter type at its position, the
/// variadic element type covering every position past the fixed parameters.
pub fn call(function: &HostFunction, mut args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
    let signature = &function.signature;
    if !signature.accepts_count(args.len()) {
        return Err(EvalError::Arity {
            function: function.name.clone(),
            expected: signature.to_string(),
            got: args.len(),
        });
    }

    for (position, arg) in args.iter_mut().enumerate() {
        let Some(expected) = signature.param(position) else {
            continue;
        };
        if arg.is_nil() {
            *arg = expected.zero();
        } else if !expected.accepts(arg) {
            return Err(EvalError::ArgumentType {
                function: function.name.clone(),
                position,
                expected: expected.to_string(),
                got: arg.type_name().to_string(),
            });
        }
    }

    log::trace!("calling host function `{}` with {} arguments", function.name, args.len());

    let outputs = function.call(&args).map_err(|e| EvalError::Host {
        function: function.name.clone(),
        message: e.to_string(),
    })?;

    if outputs.len() != signature.returns {
        return Err(EvalError::ReturnArity {
            function: function.name.clone(),
            expected: signature.returns,
            got: outputs.len(),
        });
    }
    Ok(outputs)
}

/// Folds accessor `keys` over `value`, left to right.
fn drill(value: Value, keys: &[Value]) -> Result<Value, EvalError> {
    keys.iter().try_fold(value, access)
}

fn access(value: Value, key: &Value) -> Result<Value, EvalError> {
    let invalid = |value: &Value| EvalError::InvalidAccessor {
        accessor: key.to_string(),
        value: value.to_string(),
    };

    match (&value, key) {
        (Value::Apply(items) | Value::List(items), Value::Integer(index)) => {
            index_into(items, *index, &value).cloned()
        }
        (Value::Map(entries), Value::Integer(index)) => {
            let (key, value) = index_into(entries, *index, &value)?;
            Ok(Value::Apply(vec![key.clone(), value.clone()]))
        }
        (Value::Map(entries), Value::Str(_) | Value::Symbol(_)) => entries
            .iter()
            .find(|(entry, _)| key_matches(entry, key))
            .map(|(_, found)| found.clone())
            .ok_or_else(|| EvalError::MissingKey {
                key: key.to_string(),
                value: value.to_string(),
            }),
        (Value::Table(table), Value::Str(name) | Value::Symbol(name)) => {
            table.get(name).cloned().ok_or_else(|| EvalError::MissingKey {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        _ => Err(invalid(&value)),
    }
}

fn index_into<'v, T>(items: &'v [T], index: i64, value: &Value) -> Result<&'v T, EvalError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .ok_or_else(|| EvalError::IndexOutOfRange {
            index,
            len: items.len(),
            value: value.to_string(),
        })
}

/// A string accessor matches a string key; a symbol accessor matches the symbol, bare or quoted.
fn key_matches(entry: &Value, key: &Value) -> bool {
    match (entry, key) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Quote(inner), Value::Symbol(b)) => {
            matches!(inner.as_ref(), Value::Symbol(a) if a == b)
        }
        _ => false,
    }
}

/// Owns the root scope and runs whole programs against it.
pub struct Interpreter {
    environment: Environment,
}

impl Interpreter {
    /// An interpreter whose printing built-ins write to stdout.
    pub fn new() -> Self {
        Self::with_output(std::io::stdout())
    }

    /// An interpreter whose printing built-ins write to `output`.
    pub fn with_output(output: impl Write + 'static) -> Self {
        let mut environment = Environment::new();
        system::install(&mut environment, output);
        Interpreter { environment }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.environment
    }

    /// Tokenizes, parses and evaluates `source`, returning the value of its last expression.
    pub fn eval(&mut self, source: &str) -> Result<Value, crate::Error> {
        log::debug!("tokenizing {} bytes", source.len());
        let tokens = tokenize(source)?;
        log::debug!("parsing {} tokens", tokens.len());
        let program = parse_program(&tokens)?;
        log::debug!("evaluating program");
        Ok(self.evaluate(&program)?)
    }

    /// Like [`Interpreter::eval`], for programs run only for their effects.
    pub fn execute(&mut self, source: &str) -> Result<(), crate::Error> {
        self.eval(source).map(|_| ())
    }

    /// Evaluates an already-parsed value in the root scope.
    ///
    /// A panic raised while evaluating, including inside a host function, is caught here and
    /// reported as [`EvalError::Internal`]. Bindings made before the panic are kept.
    ///
    /// Contained panics are not reported by the panic hook; panics elsewhere still are.
    pub fn evaluate(&mut self, value: &Value) -> Result<Value, EvalError> {
        let environment = &mut self.environment;
        contain(|| evaluate(environment, value)).unwrap_or_else(|payload| {
            let detail = if let Some(msg) = payload.downcast_ref::<&str>() {
                msg.to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            };
            log::debug!("evaluation panicked: {detail}");
            Err(EvalError::Internal(detail))
        })
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CONTAINING: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Runs `f` under `catch_unwind` with the panic hook muted for this thread.
fn contain<T>(f: impl FnOnce() -> T) -> std::thread::Result<T> {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !CONTAINING.with(Cell::get) {
                previous(info);
            }
        }));
    });

    let outer = CONTAINING.with(|containing| containing.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CONTAINING.with(|containing| containing.set(outer));
    result
}
