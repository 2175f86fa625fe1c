// ABOUTME: Command-line entry point: run files, parse to tree files, start the REPL

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use numfu::ast::Expr;
use numfu::error::ErrorKind;
use numfu::interpreter::Interpreter;
use numfu::modules::{encode_tree_file, TREE_MAGIC};
use numfu::{parser, repl};

/// The NumFu programming language
#[derive(Parser, Debug)]
#[command(name = "numfu")]
#[command(version)]
#[command(about = "An expression-oriented functional language for arbitrary-precision arithmetic")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Source file to run
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    #[command(flatten)]
    opts: RunOpts,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct RunOpts {
    /// Decimal digits of numeric precision
    #[arg(short, long, default_value_t = 15)]
    precision: u32,

    /// Maximum host recursion depth during evaluation
    #[arg(short, long = "rec-depth", default_value_t = 10000)]
    rec_depth: usize,

    /// Maximum tail-call iterations (unbounded when omitted)
    #[arg(long = "iter-depth", value_name = "N")]
    iter_depth: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a source file and save or pretty-print the result
    Parse {
        /// Source file to parse
        source: PathBuf,

        /// Output path for the serialized parse tree
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the AST instead of saving it
        #[arg(short = 'p', long)]
        pretty: bool,
    },
    /// Start an interactive REPL
    Repl {
        /// `ast` prints parse trees instead of evaluating
        #[arg(value_parser = ["ast"])]
        mode: Option<String>,

        #[command(flatten)]
        opts: RunOpts,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Parse {
            source,
            output,
            pretty,
        }) => run_parse(&source, output, pretty),
        Some(Command::Repl { mode, opts }) => {
            let result = if mode.as_deref() == Some("ast") {
                repl::start_ast()
            } else {
                let mut interp =
                    Interpreter::new(opts.precision, opts.rec_depth, opts.iter_depth);
                repl::start(&mut interp)
            };
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Failed to run the REPL: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        None => match cli.source {
            Some(path) => run_file(&path, &cli.opts),
            None => {
                eprintln!("Usage: numfu <SOURCE> | numfu parse <SOURCE> | numfu repl");
                ExitCode::FAILURE
            }
        },
    }
}

fn run_file(path: &PathBuf, opts: &RunOpts) -> ExitCode {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };
    let path_str = path.display().to_string();
    let mut interp = Interpreter::new(opts.precision, opts.rec_depth, opts.iter_depth);

    let (result, code) = if bytes.starts_with(TREE_MAGIC) {
        let tree: Vec<Expr> = match serde_json::from_slice(&bytes[TREE_MAGIC.len()..]) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Corrupt parse-tree file {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        };
        (interp.run_tree(tree, &path_str, "", true), String::new())
    } else {
        let code = String::from_utf8_lossy(&bytes).to_string();
        (interp.run_source(&code, &path_str, true), code)
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) if e.kind == ErrorKind::Exit => {
            let status: u8 = e.message.parse().unwrap_or(0);
            ExitCode::from(status)
        }
        Err(e) => {
            eprintln!("{}", interp.format_error(&e, &path_str, &code));
            ExitCode::FAILURE
        }
    }
}

fn run_parse(source: &PathBuf, output: Option<PathBuf>, pretty: bool) -> ExitCode {
    let code = match std::fs::read_to_string(source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", source.display());
            return ExitCode::FAILURE;
        }
    };
    let tree = match parser::parse(&code) {
        Ok(t) => t,
        Err(e) => {
            eprintln!(
                "{}",
                numfu::error::report(&e, &source.display().to_string(), &code)
            );
            return ExitCode::FAILURE;
        }
    };
    if pretty {
        println!("{tree:#?}");
        return ExitCode::SUCCESS;
    }
    let out_path = output.unwrap_or_else(|| source.with_extension("nfut"));
    let encoded = match encode_tree_file(&tree) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match std::fs::write(&out_path, encoded) {
        Ok(()) => {
            println!("Parsed file saved to {}", out_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error saving parsed file: {e}");
            ExitCode::FAILURE
        }
    }
}
