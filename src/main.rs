use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use clap::Subcommand;
use hostlisp::lex::{Lexer, TokenizeError};
use hostlisp::{Error, Interpreter, show};
use miette::{IntoDiagnostic, NamedSource, Report, WrapErr};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the significant tokens of a file.
    Tokenize { filename: PathBuf },
    /// Print a file's program as parsed, in canonical form.
    Parse { filename: PathBuf },
    /// Evaluate a file and print the value of its last expression.
    Run { filename: PathBuf },
    /// Read, evaluate and print one line at a time.
    Repl,
}

fn read(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

fn report_lex_error(e: TokenizeError) -> ! {
    let (line, column) = e.location();
    eprintln!("[{line}:{column}] Error: Unexpected character: {:?}", e.token);
    eprintln!("{:?}", Report::new(e));
    std::process::exit(65);
}

fn report(filename: &str, source: &str, e: Error) -> Report {
    match e {
        Error::Tokenize(e) => report_lex_error(e),
        e => Report::new(e).with_source_code(NamedSource::new(filename, source.to_string())),
    }
}

fn main() -> miette::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = read(&filename)?;
            for token in Lexer::new(filename.to_str(), &file_contents) {
                match token {
                    Ok(token) => println!("{token}"),
                    Err(e) => report_lex_error(e),
                }
            }
            println!("EOF");
        }
        Commands::Parse { filename } => {
            let file_contents = read(&filename)?;
            let name = filename.display().to_string();
            let tokens: Vec<_> = Lexer::new(filename.to_str(), &file_contents)
                .collect::<Result<_, _>>()
                .unwrap_or_else(|e| report_lex_error(e));
            let program = hostlisp::parse::parse_program(&tokens)
                .map_err(|e| report(&name, &file_contents, e.into()))?;
            println!("{}", show(&program));
        }
        Commands::Run { filename } => {
            let file_contents = read(&filename)?;
            let name = filename.display().to_string();
            let mut interpreter = Interpreter::new();
            let value = interpreter
                .eval(&file_contents)
                .map_err(|e| report(&name, &file_contents, e))?;
            println!("{}", show(&value));
        }
        Commands::Repl => repl()?,
    }
    Ok(())
}

fn repl() -> miette::Result<()> {
    let mut rl = DefaultEditor::new().into_diagnostic()?;
    let mut interpreter = Interpreter::new();

    loop {
        let line = match rl.readline("=> ") {
            Ok(line) => line,
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(e) => return Err(e).into_diagnostic(),
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        match interpreter.eval(&line) {
            Ok(value) => println!("{}", show(&value)),
            Err(e) => {
                let e = Report::new(e).with_source_code(NamedSource::new("<repl>", line.clone()));
                eprintln!("{e:?}");
            }
        }
    }
    Ok(())
}
