//! The runtime value model shared by the parser and the evaluator.
//!
//! Parsed programs and evaluation results live in the same closed sum type, so a quoted
//! form is nothing more than a `Value` that the evaluator declines to look inside.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    rc::Rc,
};

use thiserror::Error;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Integer(i64),
    Float(f64),
    Str(String),
    Symbol(String),
    /// A call form before evaluation, or the carrier of several return values after it.
    Apply(Vec<Value>),
    List(Vec<Value>),
    /// Entries in source order; keys may repeat.
    Map(Vec<(Value, Value)>),
    /// `chain[0]` is the base expression, the rest are accessors.
    Drill(Vec<Value>),
    Quote(Box<Value>),
    Unquote(Box<Value>),
    Function(HostFunction),
    Table(Rc<Table>),
}

impl Value {
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn quote(inner: Value) -> Self {
        Value::Quote(Box::new(inner))
    }

    pub fn unquote(inner: Value) -> Self {
        Value::Unquote(Box::new(inner))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Apply(_) => "apply",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Drill(_) => "drill",
            Value::Quote(_) => "quote",
            Value::Unquote(_) => "unquote",
            Value::Function(_) => "function",
            Value::Table(_) => "table",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Apply(a), Value::Apply(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Drill(a), Value::Drill(b)) => a == b,
            (Value::Quote(a), Value::Quote(b)) => a == b,
            (Value::Unquote(a), Value::Unquote(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.func, &b.func),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<HostFunction> for Value {
    fn from(value: HostFunction) -> Self {
        Value::Function(value)
    }
}

impl From<Table> for Value {
    fn from(value: Table) -> Self {
        Value::Table(Rc::new(value))
    }
}

/// Declared type of one host-function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Any,
    Int,
    Float,
    Str,
}

impl ParamType {
    /// What a nil argument turns into when passed in this position.
    pub fn zero(self) -> Value {
        match self {
            ParamType::Any => Value::Nil,
            ParamType::Int => Value::Integer(0),
            ParamType::Float => Value::Float(0.0),
            ParamType::Str => Value::Str(String::new()),
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Int => matches!(value, Value::Integer(_)),
            ParamType::Float => matches!(value, Value::Float(_)),
            ParamType::Str => matches!(value, Value::Str(_)),
        }
    }
}

impl Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Any => "any",
            ParamType::Int => "integer",
            ParamType::Float => "float",
            ParamType::Str => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamType>,
    /// Element type of a trailing repeated parameter.
    pub variadic: Option<ParamType>,
    pub returns: usize,
}

impl Signature {
    pub fn fixed(params: &[ParamType], returns: usize) -> Self {
        Signature {
            params: params.to_vec(),
            variadic: None,
            returns,
        }
    }

    pub fn variadic(params: &[ParamType], rest: ParamType, returns: usize) -> Self {
        Signature {
            params: params.to_vec(),
            variadic: Some(rest),
            returns,
        }
    }

    /// Expected type at argument `position`, or `None` past the end of a fixed signature.
    pub fn param(&self, position: usize) -> Option<ParamType> {
        self.params.get(position).copied().or(self.variadic)
    }

    pub fn accepts_count(&self, count: usize) -> bool {
        match self.variadic {
            Some(_) => count >= self.params.len(),
            None => count == self.params.len(),
        }
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variadic {
            Some(_) => write!(f, "at least {}", self.params.len()),
            None => write!(f, "{}", self.params.len()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct HostError(pub String);

pub type HostResult = Result<Vec<Value>, HostError>;

type HostFn = dyn Fn(&[Value]) -> HostResult;

/// A natively implemented callable together with its declared signature.
#[derive(Clone)]
pub struct HostFunction {
    pub name: String,
    pub signature: Signature,
    func: Rc<HostFn>,
}

impl HostFunction {
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        func: impl Fn(&[Value]) -> HostResult + 'static,
    ) -> Self {
        HostFunction {
            name: name.into(),
            signature,
            func: Rc::new(func),
        }
    }

    /// Invokes the function with arguments that already match the signature.
    pub fn call(&self, args: &[Value]) -> HostResult {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<host fn {}>", self.name)
    }
}

/// A named record of host values, such as the `fmt` namespace.
#[derive(Debug, Default)]
pub struct Table {
    pub name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Renders a value back as surface syntax.
pub fn show(value: &Value) -> String {
    value.to_string()
}

struct Spaced<'a, T>(&'a [T], fn(&T, &mut fmt::Formatter<'_>) -> fmt::Result);

impl<T> Display for Spaced<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            (self.1)(item, f)?;
        }
        Ok(())
    }
}

fn show_item(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{value}")
}

fn show_entry((key, value): &(Value, Value), f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{key} {value}")
}

fn show_string(value: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            '\n' if !escaped => f.write_str("\\n")?,
            '\t' if !escaped => f.write_str("\\t")?,
            '"' if !escaped => f.write_str("\\\"")?,
            c => write!(f, "{c}")?,
        }
        escaped = c == '\\' && !escaped;
    }
    f.write_str("\"")
}

fn show_float(value: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        write!(f, "{text}.0")
    } else {
        f.write_str(&text)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("()"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => show_float(*n, f),
            Value::Str(s) => show_string(s, f),
            Value::Symbol(name) => f.write_str(name),
            Value::Drill(chain) => {
                for (i, link) in chain.iter().enumerate() {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    write!(f, "{link}")?;
                }
                Ok(())
            }
            Value::Quote(inner) => write!(f, "#{inner}"),
            Value::Unquote(inner) => write!(f, "${inner}"),
            Value::Apply(items) => write!(f, "({})", Spaced(items, show_item)),
            Value::List(items) => write!(f, "[{}]", Spaced(items, show_item)),
            Value::Map(entries) => write!(f, "{{{}}}", Spaced(entries, show_entry)),
            Value::Function(function) => write!(f, "{function:?}"),
            Value::Table(table) => write!(f, "<host table {}>", table.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_and_empty_apply_render_alike() {
        assert_eq!(show(&Value::Nil), "()");
        assert_eq!(show(&Value::Apply(vec![])), "()");
    }

    #[test]
    fn containers_render_with_their_brackets() {
        let value = Value::Apply(vec![
            Value::symbol("do"),
            Value::List(vec![Value::Integer(1), Value::Float(2.5)]),
            Value::Map(vec![(Value::quote(Value::symbol("a")), "x".into())]),
        ]);
        assert_eq!(show(&value), r#"(do [1 2.5] {#a "x"})"#);
    }

    #[test]
    fn drill_joins_its_chain_with_dots() {
        let value = Value::Drill(vec![Value::symbol("fmt"), Value::symbol("Println")]);
        assert_eq!(show(&value), "fmt.Println");
        let value = Value::Drill(vec![Value::symbol("a"), Value::Integer(0), "key".into()]);
        assert_eq!(show(&value), r#"a.0."key""#);
    }

    #[test]
    fn unquote_renders_with_dollar() {
        assert_eq!(show(&Value::unquote(Value::symbol("x"))), "$x");
    }

    #[test]
    fn floats_keep_a_fractional_part() {
        assert_eq!(show(&Value::Float(1.0)), "1.0");
        assert_eq!(show(&Value::Float(3.14)), "3.14");
        assert_eq!(show(&Value::Float(1e21)), "1000000000000000000000.0");
    }

    #[test]
    fn strings_escape_newlines_tabs_and_bare_quotes() {
        assert_eq!(show(&"a\nb\tc".into()), r#""a\nb\tc""#);
        assert_eq!(show(&"say \"hi\"".into()), r#""say \"hi\"""#);
        assert_eq!(show(&r#"already \" escaped"#.into()), r#""already \" escaped""#);
    }

    #[test]
    fn backslashed_newlines_and_tabs_stay_raw() {
        assert_eq!(show(&"a\\\nb".into()), "\"a\\\nb\"");
        assert_eq!(show(&"a\\\tb".into()), "\"a\\\tb\"");
        assert_eq!(show(&"a\\\\\nb".into()), r#""a\\\nb""#);
    }

    #[test]
    fn host_values_use_a_debug_rendering() {
        let function = HostFunction::new("id", Signature::fixed(&[ParamType::Any], 1), |args| {
            Ok(args.to_vec())
        });
        assert_eq!(show(&function.into()), "<host fn id>");
        assert_eq!(show(&Table::new("fmt").into()), "<host table fmt>");
    }

    #[test]
    fn signature_positions_fall_back_to_the_variadic_type() {
        let signature = Signature::variadic(&[ParamType::Str], ParamType::Any, 2);
        assert_eq!(signature.param(0), Some(ParamType::Str));
        assert_eq!(signature.param(5), Some(ParamType::Any));
        assert!(signature.accepts_count(1));
        assert!(!signature.accepts_count(0));

        let fixed = Signature::fixed(&[ParamType::Int], 0);
        assert_eq!(fixed.param(1), None);
        assert!(!fixed.accepts_count(2));
    }

    #[test]
    fn host_functions_compare_by_identity() {
        let a = HostFunction::new("f", Signature::fixed(&[], 0), |_| Ok(vec![]));
        let b = HostFunction::new("f", Signature::fixed(&[], 0), |_| Ok(vec![]));
        assert_eq!(Value::from(a.clone()), Value::from(a));
        assert_ne!(
            Value::from(b),
            Value::from(HostFunction::new("f", Signature::fixed(&[], 0), |_| Ok(vec![])))
        );
    }
}
