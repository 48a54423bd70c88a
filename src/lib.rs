//! snoc - a small lexically-scoped Lisp
//!
//! This crate reads parenthesized symbolic expressions, rewrites function
//! bodies so that every bound variable becomes a resolved frame slot, and
//! evaluates the result against a chain of runtime frames.
//!
//! ```text
//! (defun triangle (x) (if (< x 1) 0 (+ x (triangle (- x 1)))))
//! (triangle 6)                            ; 21
//! (let x (fn (a b) (- a b)) y (list 100 4) (apply x y))   ; 96
//! (call/cc (fn (k) (+ 1 (k 42))))         ; 42
//! ```
//!
//! ## Evaluation pipeline
//!
//! 1. The reader turns text into [`ast::Term`] values. Code and data share
//!    this representation.
//! 2. The resolver walks a `fn`/`defun`/`let` body once and replaces every
//!    reference to a parameter of the current or an enclosing scope with a
//!    slot reference (descriptor handle + index).
//! 3. The evaluator runs terms against a runtime frame. A slot reference is
//!    read by walking the lexical frame chain until the frame built from the
//!    matching descriptor is found.
//!
//! ## Modules
//!
//! - `ast`: terms, symbol interning and rendering
//! - `reader`: S-expression parsing from text
//! - `resolver`: static variable resolution into frame descriptors
//! - `evaluator`: the Eval/Apply engine and the special forms
//! - `builtinops`: built-in primitives and special forms registry
//! - `continuation`: escape-only `call/cc`
//! - `repl`: top-level driver (`def`/`defun`, per-form error boundary)

use std::fmt;

/// Maximum parsing depth to prevent stack overflow on hostile input
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum evaluation depth.
/// Every nested compound form counts one level, so a user-level recursion
/// costs a few levels per call. Sized to fit [`EVAL_STACK_SIZE`] in
/// unoptimized builds.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Native stack given to every thread that evaluates: the driver's
/// per-form evaluation thread and each `call/cc` context.
pub const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray `)`, bad escape, ...)
    InvalidSyntax,
    /// Input ended before the expression was complete (unclosed list, string or comment)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, context: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None)
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Show a little of what came before the error
        let context_start = error_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context))
    }

    /// True when more input could complete the expression
    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Incomplete
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The reader rejected the input
    ParseError(ParseError),
    /// A structurally invalid special form (`fn`, `let`, `if`, `def`, ...)
    MalformedForm(String),
    /// A callable received the wrong number of arguments
    ArityMismatch {
        expected: usize,
        got: usize,
        expression: Option<String>, // Optional expression context
    },
    /// A free symbol with no global binding
    UnboundSymbol(String),
    /// A slot reference whose frame is not on the current chain, or a `let`
    /// slot read before its initializer ran
    UnresolvedSlot(String),
    /// The head of a call evaluated to something that cannot be applied
    NotCallable(String),
    /// An operand had the wrong tag for a primitive
    TypeMismatch(String),
    /// Runtime limits and dead continuations
    EvalError(String),
    /// Internal unwinding signal raised by an invoked continuation.
    /// It travels up the private context of a `call/cc` and never reaches
    /// the driver in a correct program.
    #[doc(hidden)]
    Escape,
}

impl Error {
    /// Create an ArityMismatch without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityMismatch {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityMismatch with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityMismatch {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::MalformedForm(msg) => write!(f, "MalformedForm: {msg}"),
            Error::ArityMismatch {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityMismatch: {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityMismatch: expected {expected} arguments but got {got}"
                ),
            },
            Error::UnboundSymbol(name) => write!(f, "UnboundSymbol: {name}"),
            Error::UnresolvedSlot(msg) => write!(f, "UnresolvedSlot: {msg}"),
            Error::NotCallable(what) => write!(f, "NotCallable: {what}"),
            Error::TypeMismatch(msg) => write!(f, "TypeMismatch: {msg}"),
            Error::EvalError(msg) => write!(f, "EvalError: {msg}"),
            Error::Escape => write!(f, "continuation escaped past its context"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod continuation;
pub mod evaluator;
pub mod reader;
pub mod repl;
pub mod resolver;

pub use ast::Term;
pub use repl::Interpreter;
