//! End-to-end checks of the `Interpreter` entry points.

use std::{cell::RefCell, io::Write, rc::Rc};

use hostlisp::{
    Error, EvalError, Interpreter, ParseError, Value,
    lex::{TokenKind, tokenize},
    parse::parse_expression,
    show,
};

#[derive(Clone, Default)]
struct Captured(Rc<RefCell<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn quiet() -> Interpreter {
    Interpreter::with_output(std::io::sink())
}

fn eval_shown(interpreter: &mut Interpreter, source: &str) -> String {
    show(&interpreter.eval(source).expect("evaluates"))
}

#[test]
fn strings_evaluate_to_themselves() {
    assert_eq!(eval_shown(&mut quiet(), r#""example""#), r#""example""#);
}

#[test]
fn quoted_forms_come_back_unevaluated() {
    let mut interpreter = quiet();
    assert_eq!(eval_shown(&mut interpreter, r#"#"example""#), r#"#"example""#);
    assert_eq!(eval_shown(&mut interpreter, "#(+ 1 2 3)"), "#(+ 1 2 3)");
}

#[test]
fn quoting_has_no_side_effects() {
    let captured = Captured::default();
    let mut interpreter = Interpreter::with_output(captured.clone());
    let value = interpreter
        .eval(r#"#(do (set! a 1) (fmt.Println "loud"))"#)
        .unwrap();
    assert!(matches!(value, Value::Quote(_)));
    assert_eq!(captured.text(), "");
    assert_eq!(interpreter.eval("a").unwrap(), Value::Nil);
}

#[test]
fn arithmetic() {
    let mut interpreter = quiet();
    assert_eq!(interpreter.eval("(+ 1 2 3)").unwrap(), Value::Integer(6));
    assert_eq!(interpreter.eval("(+)").unwrap(), Value::Integer(0));
}

#[test]
fn empty_programs_are_nil() {
    let mut interpreter = quiet();
    assert_eq!(interpreter.eval("").unwrap(), Value::Nil);
    assert_eq!(interpreter.eval("()").unwrap(), Value::Nil);
}

#[test]
fn bindings_persist_between_calls() {
    let mut interpreter = quiet();
    interpreter.execute("(set! a 5)").unwrap();
    assert_eq!(interpreter.eval("a").unwrap(), Value::Integer(5));
    assert_eq!(interpreter.eval("(+ a a)").unwrap(), Value::Integer(10));
}

#[test]
fn accessor_chains() {
    let mut interpreter = quiet();
    interpreter.execute("(set! a [1 2 3])").unwrap();
    assert_eq!(interpreter.eval("a.0").unwrap(), Value::Integer(1));
    assert_eq!(interpreter.eval("a.1").unwrap(), Value::Integer(2));
    assert_eq!(interpreter.eval("a.2").unwrap(), Value::Integer(3));

    interpreter.execute("(set! v {#a 1 #b 2})").unwrap();
    assert_eq!(eval_shown(&mut interpreter, "v.0"), "(#a 1)");
    assert_eq!(eval_shown(&mut interpreter, "v.1"), "(#b 2)");
}

#[test]
fn failed_evaluation_leaves_bindings_usable() {
    let mut interpreter = quiet();
    interpreter.execute("(set! keep 41)").unwrap();

    let error = interpreter.eval(r#"(+ "x" 1)"#).unwrap_err();
    assert!(matches!(error, Error::Eval(EvalError::NotAnInteger { .. })));

    assert_eq!(interpreter.eval("(+ keep 1)").unwrap(), Value::Integer(42));
}

#[test]
fn errors_are_tagged_with_their_stage() {
    let mut interpreter = quiet();
    assert!(matches!(
        interpreter.eval("(+ 1 \u{c})"),
        Err(Error::Tokenize(_))
    ));
    assert!(matches!(
        interpreter.eval("(+ 1"),
        Err(Error::Parse(ParseError::UnexpectedEof { .. }))
    ));
    assert!(matches!(
        interpreter.execute("(set! 1 2)"),
        Err(Error::Eval(EvalError::InvalidTarget { .. }))
    ));
}

#[test]
fn lexing_errors_render_line_and_column() {
    let error = quiet().eval("(+ 1 2)\n(+ \u{c} 3)").unwrap_err();
    assert_eq!(error.to_string(), "[2:4] unexpected character '\\u{c}'");
}

#[test]
fn tokenizer_precedence() {
    let tokens = tokenize("3.14").unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Float);

    let kinds: Vec<_> = tokenize("a.0").unwrap().iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Identifier,
            TokenKind::Punctuation,
            TokenKind::Integer
        ]
    );
}

#[test]
fn println_reports_bytes_written() {
    let captured = Captured::default();
    let mut interpreter = Interpreter::with_output(captured.clone());
    assert_eq!(
        eval_shown(&mut interpreter, r#"(fmt.Println "Hello, World!")"#),
        "(14 ())"
    );
    assert_eq!(captured.text(), "Hello, World!\n");
}

#[test]
fn nil_arguments_take_the_parameter_zero_value() {
    let captured = Captured::default();
    let mut interpreter = Interpreter::with_output(captured.clone());
    interpreter
        .execute(r#"(fmt.Printf () "ignored") (fmt.Printf "[%v]" ())"#)
        .unwrap();
    assert_eq!(captured.text(), "%!(EXTRA \"ignored\")[()]");
}

#[test]
fn host_argument_mismatches_are_errors() {
    let mut interpreter = quiet();
    assert!(matches!(
        interpreter.eval("(os.Exit \"now\")"),
        Err(Error::Eval(EvalError::ArgumentType { .. }))
    ));
    assert!(matches!(
        interpreter.eval("(quote 1 2)"),
        Err(Error::Eval(EvalError::Arity { .. }))
    ));
}

#[test]
fn multiple_return_values_can_be_drilled() {
    let mut interpreter = quiet();
    interpreter
        .execute(r#"(set! r (fmt.Print "x"))"#)
        .unwrap();
    assert_eq!(interpreter.eval("r.0").unwrap(), Value::Integer(1));
    assert_eq!(interpreter.eval("r.1").unwrap(), Value::Nil);
}

#[test]
fn get_form_matches_drill() {
    let mut interpreter = quiet();
    interpreter.execute(r#"(set! m {"k" [10 20]})"#).unwrap();
    assert_eq!(
        interpreter.eval(r#"(get m "k" 1)"#).unwrap(),
        interpreter.eval(r#"m."k".1"#).unwrap()
    );
}

#[test]
fn shown_programs_reparse_to_the_same_value() {
    let sources = [
        "(do (set! a [1 2 3]) a.0)",
        "{#a 1 \"b\" [2.5 $c]}",
        "#(fmt.Println \"line\\n\" x.\"y\".0)",
        "\"a\\\nb\"",
        "[\"tab\\\t\" \"both\\\\\t\"]",
    ];
    for source in sources {
        let parsed = parse_expression(&tokenize(source).unwrap()).unwrap();
        let shown = show(&parsed);
        let reparsed = parse_expression(&tokenize(&shown).unwrap()).unwrap();
        assert_eq!(reparsed, parsed, "{source} shown as {shown}");
    }
}
