// ABOUTME: Interactive REPL with line editing and non-fatal error recovery

use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor};

use crate::error::ErrorKind;
use crate::interpreter::Interpreter;
use crate::parser;

const HISTORY_FILE: &str = ".numfu_history";

/// Evaluating REPL: each line is parsed and run against a persistent
/// interpreter; errors are reported and the loop continues.
pub fn start(interp: &mut Interpreter) -> rustyline::Result<()> {
    let mut rl = editor()?;
    println!(
        "NumFu {} — type exit or press Ctrl+D to quit.",
        env!("CARGO_PKG_VERSION")
    );
    loop {
        match rl.readline("numfu> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" || trimmed == "quit" {
                    break;
                }
                match interp.run_source(&line, "REPL", false) {
                    Ok(results) => {
                        for result in results {
                            println!("{result}");
                        }
                    }
                    Err(e) if e.kind == ErrorKind::Exit => break,
                    Err(e) => eprintln!("{}", interp.format_error(&e, "REPL", &line)),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }
    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}

/// AST REPL: parse each line and pretty-print the tree.
pub fn start_ast() -> rustyline::Result<()> {
    let mut rl = editor()?;
    println!("NumFu AST REPL. Type exit or press Ctrl+D to quit.");
    loop {
        match rl.readline("ast> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" || trimmed == "quit" {
                    break;
                }
                match parser::parse(&line) {
                    Ok(tree) => println!("{tree:#?}"),
                    Err(e) => eprintln!("{}", crate::error::report(&e, "REPL", &line)),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }
    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}

fn editor() -> rustyline::Result<DefaultEditor> {
    let config = Config::builder().auto_add_history(true).build();
    let mut rl = DefaultEditor::with_config(config)?;
    let _ = rl.load_history(HISTORY_FILE);
    Ok(rl)
}
