use std::{cell::RefCell, fmt::Write as _, io::Write, rc::Rc};

use crate::{
    eval::Environment,
    value::{HostError, HostFunction, HostResult, ParamType, Signature, Table, Value, show},
};

type Output = Rc<RefCell<dyn Write>>;

/// Installs every built-in binding into the root frame of `environment`.
pub fn install(environment: &mut Environment, output: impl Write + 'static) {
    let output: Output = Rc::new(RefCell::new(output));

    environment.define(
        "fmt",
        Table::new("fmt")
            .with(
                "Print",
                printer(
                    &output,
                    "fmt.Print",
                    Signature::variadic(&[], ParamType::Any, 2),
                    sprint,
                ),
            )
            .with(
                "Printf",
                printer(
                    &output,
                    "fmt.Printf",
                    Signature::variadic(&[ParamType::Str], ParamType::Any, 2),
                    sprintf,
                ),
            )
            .with(
                "Println",
                printer(
                    &output,
                    "fmt.Println",
                    Signature::variadic(&[], ParamType::Any, 2),
                    sprintln,
                ),
            )
            .into(),
    );
    environment.define("os", Table::new("os").with("Exit", exit()).into());

    environment.define("int", integer("int", |n| n));
    environment.define("int64", integer("int64", |n| n));
    environment.define("int32", integer("int32", |n| i64::from(n as i32)));
    environment.define("int16", integer("int16", |n| i64::from(n as i16)));
    environment.define("int8", integer("int8", |n| i64::from(n as i8)));
    environment.define(
        "float64",
        HostFunction::new("float64", Signature::fixed(&[ParamType::Any], 1), |args| {
            match &args[0] {
                Value::Integer(n) => Ok(vec![Value::Float(*n as f64)]),
                Value::Float(n) => Ok(vec![Value::Float(*n)]),
                other => Err(cannot_convert(other, "float64")),
            }
        })
        .into(),
    );

    environment.define(
        "quote",
        HostFunction::new("quote", Signature::fixed(&[ParamType::Any], 1), |args| {
            Ok(vec![Value::quote(args[0].clone())])
        })
        .into(),
    );
    environment.define(
        "symbol",
        HostFunction::new("symbol", Signature::fixed(&[ParamType::Str], 1), |args| match &args[0] {
            Value::Str(name) => Ok(vec![Value::symbol(name.as_str())]),
            other => Err(cannot_convert(other, "symbol")),
        })
        .into(),
    );
    environment.define(
        "list",
        HostFunction::new("list", Signature::variadic(&[], ParamType::Any, 1), |args| {
            Ok(vec![Value::List(args.to_vec())])
        })
        .into(),
    );
}

fn cannot_convert(value: &Value, target: &str) -> HostError {
    HostError(format!("cannot convert {} {value} to {target}", value.type_name()))
}

fn integer(name: &'static str, narrow: fn(i64) -> i64) -> Value {
    HostFunction::new(name, Signature::fixed(&[ParamType::Any], 1), move |args| {
        match &args[0] {
            Value::Integer(n) => Ok(vec![Value::Integer(narrow(*n))]),
            other => Err(cannot_convert(other, name)),
        }
    })
    .into()
}

fn exit() -> HostFunction {
    HostFunction::new("os.Exit", Signature::fixed(&[ParamType::Int], 0), |args| {
        let code = match args[0] {
            Value::Integer(code) => code,
            _ => 1,
        };
        log::debug!("exiting with status {code}");
        std::process::exit(code as i32)
    })
}

/// A printing function returns the number of bytes written and nil or an error message.
fn printer(
    output: &Output,
    name: &'static str,
    signature: Signature,
    render: fn(&[Value]) -> String,
) -> HostFunction {
    let output = Rc::clone(output);
    HostFunction::new(name, signature, move |args| -> HostResult {
        let text = render(args);
        let mut out = output.borrow_mut();
        let written = out.write_all(text.as_bytes()).and_then(|()| out.flush());
        Ok(match written {
            Ok(()) => vec![Value::Integer(text.len() as i64), Value::Nil],
            Err(e) => vec![Value::Integer(0), Value::Str(e.to_string())],
        })
    })
}

/// Strings print raw; everything else prints as its surface syntax.
fn display(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => show(other),
    }
}

/// Operands are separated by a space when neither side is a string.
fn sprint(args: &[Value]) -> String {
    let is_str = |v: &Value| matches!(v, Value::Str(_));
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !is_str(arg) && !is_str(&args[i - 1]) {
            out.push(' ');
        }
        out.push_str(&display(arg));
    }
    out
}

fn sprintln(args: &[Value]) -> String {
    let mut out = args.iter().map(display).collect::<Vec<_>>().join(" ");
    out.push('\n');
    out
}

/// Supports `%v`, `%d`, `%s`, `%q` and `%%`.
///
/// `%d` only takes integers and `%s` only strings; any other operand renders as `%!d(type=value)`.
fn sprintf(args: &[Value]) -> String {
    let Some((Value::Str(format), operands)) = args.split_first() else {
        return String::new();
    };

    let mut out = String::new();
    let mut operands = operands.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('v' | 'd' | 's' | 'q')) => match operands.next() {
                Some(operand) => format_verb(&mut out, verb, operand),
                None => {
                    let _ = write!(out, "%!{verb}(MISSING)");
                }
            },
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push_str("%!(NOVERB)"),
        }
    }
    for extra in operands {
        let _ = write!(out, "%!(EXTRA {})", show(extra));
    }
    out
}

fn format_verb(out: &mut String, verb: char, operand: &Value) {
    match (verb, operand) {
        ('q', _) => out.push_str(&show(operand)),
        ('v', _) | ('d', Value::Integer(_)) | ('s', Value::Str(_)) => {
            out.push_str(&display(operand));
        }
        _ => {
            let _ = write!(out, "%!{verb}({}={})", operand.type_name(), display(operand));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Interpreter;

    #[derive(Clone, Default)]
    struct Buffer(Rc<RefCell<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).expect("utf-8 output")
        }
    }

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn interpreter() -> (Interpreter, Buffer) {
        let buffer = Buffer::default();
        (Interpreter::with_output(buffer.clone()), buffer)
    }

    #[test]
    fn println_returns_count_and_nil_error() {
        let (mut interpreter, buffer) = interpreter();
        let result = interpreter.eval(r#"(fmt.Println "Hello, World!")"#).unwrap();
        assert_eq!(buffer.contents(), "Hello, World!\n");
        assert_eq!(show(&result), "(14 ())");
    }

    #[test]
    fn println_separates_and_shows_operands() {
        let (mut interpreter, buffer) = interpreter();
        interpreter
            .execute(r#"(fmt.Println "n:" 1 2.5 [1 "b"] #x)"#)
            .unwrap();
        assert_eq!(buffer.contents(), "n: 1 2.5 [1 \"b\"] #x\n");
    }

    #[test]
    fn print_only_spaces_between_non_strings() {
        let (mut interpreter, buffer) = interpreter();
        interpreter.execute(r#"(fmt.Print "a" "b" 1 2 "c")"#).unwrap();
        assert_eq!(buffer.contents(), "ab1 2c");
    }

    #[test]
    fn printf_substitutes_verbs() {
        let (mut interpreter, buffer) = interpreter();
        interpreter
            .execute(r#"(fmt.Printf "%s=%d %q 100%% %v" "x" 3 "y")"#)
            .unwrap();
        assert_eq!(buffer.contents(), "x=3 \"y\" 100% %!v(MISSING)");
    }

    #[test]
    fn printf_flags_operands_of_the_wrong_type() {
        assert_eq!(
            sprintf(&[
                Value::string("%d|%s|%d"),
                Value::string("x"),
                Value::Integer(7),
                Value::Float(1.5),
            ]),
            "%!d(string=x)|%!s(integer=7)|%!d(float=1.5)"
        );
    }

    #[test]
    fn printf_reports_extra_operands() {
        assert_eq!(
            sprintf(&[Value::string("%v"), Value::Integer(1), Value::Integer(2)]),
            "1%!(EXTRA 2)"
        );
    }

    #[test]
    fn nil_format_becomes_the_empty_string() {
        let (mut interpreter, buffer) = interpreter();
        let result = interpreter.eval("(fmt.Printf ())").unwrap();
        assert_eq!(buffer.contents(), "");
        assert_eq!(
            result,
            Value::Apply(vec![Value::Integer(0), Value::Nil])
        );
    }

    #[test]
    fn nil_variadic_operand_prints_as_nil() {
        let (mut interpreter, buffer) = interpreter();
        interpreter.execute("(fmt.Println 1 ())").unwrap();
        assert_eq!(buffer.contents(), "1 ()\n");
    }

    #[test]
    fn integer_conversions_wrap_to_width() {
        let (mut interpreter, _) = interpreter();
        assert_eq!(interpreter.eval("(int8 300)").unwrap(), Value::Integer(44));
        assert_eq!(interpreter.eval("(int16 70000)").unwrap(), Value::Integer(4464));
        assert_eq!(
            interpreter.eval("(int32 4294967297)").unwrap(),
            Value::Integer(1)
        );
        assert_eq!(interpreter.eval("(int64 5)").unwrap(), Value::Integer(5));
        assert_eq!(interpreter.eval("(int 5)").unwrap(), Value::Integer(5));
        assert_eq!(interpreter.eval("(float64 2)").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn conversions_reject_non_integers() {
        let (mut interpreter, _) = interpreter();
        let error = interpreter.eval(r#"(int8 "x")"#).unwrap_err();
        assert_eq!(
            error.to_string(),
            "`int8` failed: cannot convert string \"x\" to int8"
        );
    }

    #[test]
    fn constructors() {
        let (mut interpreter, _) = interpreter();
        assert_eq!(
            interpreter.eval(r#"(symbol "abc")"#).unwrap(),
            Value::symbol("abc")
        );
        assert_eq!(
            interpreter.eval("(quote (+ 1 2))").unwrap(),
            Value::quote(Value::Integer(3))
        );
        assert_eq!(
            interpreter.eval("(list 1 (+ 1 1))").unwrap(),
            Value::List(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn namespaces_are_reachable_by_name_or_string() {
        let (mut interpreter, buffer) = interpreter();
        interpreter.execute(r#"(fmt."Print" "ok")"#).unwrap();
        assert_eq!(buffer.contents(), "ok");
        assert!(matches!(
            interpreter.eval("os.Exit").unwrap(),
            Value::Function(ref function) if function.name == "os.Exit"
        ));
    }
}
