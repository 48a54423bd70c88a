//! Top-level driver.
//!
//! The driver owns the global table and is its only writer. It recognizes
//! the two defining forms before evaluation:
//!
//! ```text
//! (def name expr)               ; evaluate expr, bind it globally
//! (defun name (params) body)    ; resolve a top-level function, bind it
//! ```
//!
//! Both yield `nil`. Every other form is evaluated against a fresh, empty
//! top frame. Each form is its own error boundary: a failing form reports
//! its error and definitions made by earlier forms stay in place.

use crate::ast::{DEF, DEFUN, Primitive, Term, intern};
use crate::builtinops::name_arity_error;
use crate::evaluator::intooperation::IntoOperation;
use crate::evaluator::{Env, Globals, eval};
use crate::reader::{ParseConfig, parse_with_config};
use crate::resolver::{ScopeChain, param_list, resolve};
use crate::{EVAL_STACK_SIZE, Error};
use log::debug;
use std::io::BufRead;
use std::sync::Arc;
use std::{panic, thread};

/// A global table plus the reader options used for source text
#[derive(Clone)]
pub struct Interpreter {
    globals: Globals,
    config: ParseConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter seeded with the built-ins
    pub fn new() -> Self {
        Self::with_config(ParseConfig::default())
    }

    pub fn with_config(config: ParseConfig) -> Self {
        Interpreter {
            globals: Globals::with_builtins(),
            config,
        }
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn config(&self) -> ParseConfig {
        self.config
    }

    /// Bind a typed Rust function as a global primitive.
    ///
    /// ```
    /// use snoc::Interpreter;
    ///
    /// fn double(x: f64) -> f64 {
    ///     x * 2.0
    /// }
    ///
    /// let interp = Interpreter::new();
    /// interp.register_primitive::<(f64,), _>("double", double);
    /// assert_eq!(interp.run_source("(double 21)").unwrap().to_string(), "42");
    /// ```
    pub fn register_primitive<Args, F>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        let op = func.into_operation();
        let owned = name.to_owned();
        let primitive = Primitive {
            name: owned.clone(),
            func: Box::new(move |args: Vec<Term>, _env: &Env| {
                op(args).map_err(|e| name_arity_error(&owned, e))
            }),
        };
        debug!("register primitive {name}");
        self.globals
            .define(intern(name), Term::Primitive(Arc::new(primitive)));
    }

    fn top_env(&self) -> Env {
        Env::new(self.globals.clone())
    }

    /// Run one top-level form.
    ///
    /// Evaluation recurses on the native stack, so the form runs on its own
    /// thread with [`EVAL_STACK_SIZE`] bytes of stack. Any caller thread can
    /// run deep programs up to [`MAX_EVAL_DEPTH`](crate::MAX_EVAL_DEPTH).
    pub fn run_form(&self, form: &Term) -> Result<Term, Error> {
        let result = thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name("snoc-eval".to_owned())
                .stack_size(EVAL_STACK_SIZE)
                .spawn_scoped(scope, || self.run_form_here(form))
                .map_err(|e| Error::EvalError(format!("cannot start evaluation thread: {e}")))?;
            handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
        });

        result.map_err(|err| match err {
            Error::Escape => Error::EvalError("continuation escaped to top level".into()),
            other => other,
        })
    }

    fn run_form_here(&self, form: &Term) -> Result<Term, Error> {
        match form {
            Term::Pair(pair) if pair.head.is_symbol(&DEF) => self.define(&pair.tail),
            Term::Pair(pair) if pair.head.is_symbol(&DEFUN) => self.defun(&pair.tail),
            _ => eval(form, &self.top_env()),
        }
    }

    fn define(&self, args: &Term) -> Result<Term, Error> {
        match args.to_vec().as_deref() {
            Some([Term::Symbol(name), expr]) => {
                let value = eval(expr, &self.top_env())?;
                debug!("def {} = {value}", name.name());
                self.globals.define(name.clone(), value);
                Ok(Term::Nil)
            }
            _ => Err(Error::MalformedForm(format!(
                "expected (def name expr), got (def . {args})"
            ))),
        }
    }

    fn defun(&self, args: &Term) -> Result<Term, Error> {
        match args.to_vec().as_deref() {
            Some([Term::Symbol(name), params, body]) => {
                let params = param_list(params, name.name())?;
                let descriptor = resolve(name.name(), params, body, &ScopeChain::empty())?;
                debug!("defun {} as {}", name.name(), descriptor.id());
                // A top-level prototype captures no frame
                let closure = eval(&Term::Prototype(descriptor), &self.top_env())?;
                self.globals.define(name.clone(), closure);
                Ok(Term::Nil)
            }
            _ => Err(Error::MalformedForm(format!(
                "expected (defun name (params) body), got (defun . {args})"
            ))),
        }
    }

    /// Parse `text` and run every form in order, stopping at the first
    /// failure. Returns the last form's value, `nil` for empty input.
    pub fn run_source(&self, text: &str) -> Result<Term, Error> {
        let forms = parse_with_config(text, self.config)?;
        let mut last = Term::Nil;
        for form in &forms {
            last = self.run_form(form)?;
        }
        Ok(last)
    }

    /// Outcomes of one complete chunk: one per form, or the parse error
    pub fn run_chunk(&self, chunk: Result<Vec<Term>, Error>) -> Vec<Result<Term, Error>> {
        match chunk {
            Ok(forms) => forms.iter().map(|form| self.run_form(form)).collect(),
            Err(err) => vec![Err(err)],
        }
    }

    /// Read `input` line by line, running each chunk as soon as it parses.
    /// A form may span several lines. Input that ends inside an unfinished
    /// form yields a final incomplete-input error.
    pub fn run_lines<R: BufRead>(&self, input: R) -> std::io::Result<Vec<Result<Term, Error>>> {
        let mut buffer = LineBuffer::new(self.config);
        let mut outcomes = Vec::new();

        for line in input.lines() {
            if let Some(chunk) = buffer.push_line(&line?) {
                outcomes.extend(self.run_chunk(chunk));
            }
        }
        if let Some(err) = buffer.finish() {
            outcomes.push(Err(err));
        }

        Ok(outcomes)
    }
}

/// Accumulates input lines until they form complete expressions
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
    config: ParseConfig,
}

impl LineBuffer {
    pub fn new(config: ParseConfig) -> Self {
        LineBuffer {
            pending: String::new(),
            config,
        }
    }

    /// True when no partial expression is waiting for more lines
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Add a line. Returns `None` while the buffered text is an unfinished
    /// expression; otherwise the parsed forms (or a syntax error) and the
    /// buffer starts over.
    pub fn push_line(&mut self, line: &str) -> Option<Result<Vec<Term>, Error>> {
        self.pending.push_str(line);
        self.pending.push('\n');

        match parse_with_config(&self.pending, self.config) {
            Err(Error::ParseError(e)) if e.is_incomplete() => None,
            result => {
                self.pending.clear();
                Some(result)
            }
        }
    }

    /// Drop any partial expression, returning the error it would raise
    pub fn finish(&mut self) -> Option<Error> {
        if self.pending.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        parse_with_config(&text, self.config).err()
    }
}
