use clap::Parser;
use log::LevelFilter;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use snoc::ast::Term;
use snoc::reader::ParseConfig;
use snoc::repl::LineBuffer;
use snoc::{Error, Interpreter};
use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "snoc", version, about = "A small lexically-scoped Lisp")]
struct Cli {
    /// Source file to run; reads stdin when omitted
    file: Option<PathBuf>,

    /// Log more (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Read `;`, `//` and `/*` as ordinary symbol characters
    #[arg(long)]
    no_comments: bool,

    /// Skip the banner in interactive mode
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let interp = Interpreter::with_config(ParseConfig {
        handle_comments: !cli.no_comments,
    });

    let outcome = match &cli.file {
        Some(path) => File::open(path).and_then(|file| run_batch(&interp, BufReader::new(file))),
        None if !io::stdin().is_terminal() => run_batch(&interp, io::stdin().lock()),
        None => run_repl(&interp, cli.quiet),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("snoc: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run every form from `input`, echoing each outcome.
/// Returns false if any form failed.
fn run_batch<R: BufRead>(interp: &Interpreter, input: R) -> io::Result<bool> {
    let mut all_ok = true;
    for outcome in interp.run_lines(input)? {
        all_ok &= report(&outcome);
    }
    Ok(all_ok)
}

fn report(outcome: &Result<Term, Error>) -> bool {
    match outcome {
        Ok(value) => {
            println!("{value}");
            true
        }
        Err(e) => {
            eprintln!("Error: {e}");
            false
        }
    }
}

fn run_repl(interp: &Interpreter, quiet: bool) -> io::Result<bool> {
    if !quiet {
        println!("snoc - a small lexically-scoped Lisp");
        println!("Enter expressions like: (defun sq (x) (* x x)) (sq 7)");
        println!("Type :help for more commands, or Ctrl+D to exit.");
        println!();
    }

    let mut rl = DefaultEditor::new().map_err(|e| io::Error::other(e.to_string()))?;
    let mut buffer = LineBuffer::new(interp.config());

    loop {
        let prompt = if buffer.is_empty() { "snoc> " } else { "  ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(interp);
                            continue;
                        }
                        ":quit" | ":exit" => break,
                        _ => {}
                    }
                }

                let _ = rl.add_history_entry(line.as_str());

                if let Some(chunk) = buffer.push_line(&line) {
                    for outcome in interp.run_chunk(chunk) {
                        report(&outcome);
                    }
                }
            }
            // Ctrl+C abandons a partial expression, or exits at the prompt
            Err(ReadlineError::Interrupted) if !buffer.is_empty() => {
                buffer.finish();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    println!("Goodbye!");
    Ok(true)
}

fn print_help() {
    println!("snoc commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show global bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Definitions:");
    println!("  (def name expr)");
    println!("  (defun name (params) body)");
    println!();
    println!("Forms:");
    println!("  (fn (params) body)");
    println!("  (let name1 expr1 name2 expr2 ... body)");
    println!("  (if test1 then1 test2 then2 ... else)");
    println!("  and, or, all, any, quote ('x)");
    println!();
    println!("Examples:");
    println!("  (list (list 1 2 3) (list 4 5 6))");
    println!("  (let x (fn (a b) (- a b)) y (list 100 4) (apply x y))");
    println!("  (call/cc (fn (k) (+ 1 (k 42))))");
    println!();
}

fn print_environment(interp: &Interpreter) {
    let bindings = interp.globals().bindings();

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Term::Primitive(_) | Term::Special(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-ins ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("Definitions ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
