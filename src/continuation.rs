//! Escape-only continuations.
//!
//! `(call/cc receiver)` opens a private context: a dedicated thread that
//! applies `receiver` to a fresh continuation primitive while the caller
//! blocks on a rendezvous channel. The first value delivered on that
//! channel, either by invoking the continuation or by the receiver
//! returning, becomes the value of the `call/cc` form.
//!
//! Invoking a continuation delivers its argument and then unwinds the
//! invoking thread with [`Error::Escape`]. A continuation is one-shot: once
//! its context has delivered a value or ended, invoking it fails with a
//! "dead continuation" error. Re-entry is not supported.
//!
//! An error other than `Escape` inside a context has no caller left to
//! report to, so it is logged and the process exits with
//! [`FATAL_EXIT_CODE`].

use crate::{EVAL_STACK_SIZE, Error};
use crate::ast::{Primitive, Term};
use crate::evaluator::{Env, apply_values};
use crossbeam_channel::{Sender, bounded};
use log::{debug, error};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Exit status after a failure inside a continuation context
pub const FATAL_EXIT_CODE: i32 = 70;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

/// One-shot delivery state shared by a context and its continuation
type Slot = Arc<Mutex<Option<Sender<Term>>>>;

fn take_sender(slot: &Slot) -> Option<Sender<Term>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Closes the channel when the context thread ends, however it ends.
/// A continuation that outlives its context then finds no sender.
struct ContextGuard(Slot);

impl Drop for ContextGuard {
    fn drop(&mut self) {
        take_sender(&self.0);
    }
}

fn dead_continuation(id: u64) -> Error {
    Error::EvalError(format!("dead continuation #{id}"))
}

/// The primitive handed to the receiver
fn make_continuation(id: u64, slot: Slot) -> Term {
    let name = format!("continuation#{id}");
    Term::Primitive(Arc::new(Primitive {
        name: name.clone(),
        func: Box::new(move |args: Vec<Term>, _env: &Env| {
            let [value] = <[Term; 1]>::try_from(args)
                .map_err(|args| Error::arity_error_with_expr(1, args.len(), name.clone()))?;
            let sender = take_sender(&slot).ok_or_else(|| dead_continuation(id))?;
            debug!("call/cc#{id}: continuation invoked with {value}");
            sender.send(value).map_err(|_| dead_continuation(id))?;
            Err(Error::Escape)
        }),
    }))
}

/// Body of the context thread
fn run_context(id: u64, slot: Slot, receiver: &Term, continuation: Term, env: &Env) {
    let guard = ContextGuard(slot);

    match apply_values(receiver, vec![continuation], env) {
        Ok(value) => {
            if let Some(sender) = take_sender(&guard.0) {
                debug!("call/cc#{id}: receiver returned {value}");
                if sender.send(value).is_err() {
                    debug!("call/cc#{id}: initiator no longer waiting");
                }
            }
        }
        Err(Error::Escape) => debug!("call/cc#{id}: context unwound by a continuation"),
        Err(err) => {
            error!("call/cc#{id}: fatal error inside continuation context: {err}");
            std::process::exit(FATAL_EXIT_CODE);
        }
    }
}

/// Apply `receiver` to the current continuation.
///
/// Returns the value delivered to the continuation, or the receiver's own
/// result if it returns normally. If the context ends without delivering
/// (a continuation of an enclosing context escaped through it), this
/// returns [`Error::Escape`] so the caller unwinds too.
pub fn call_with_current_continuation(receiver: &Term, env: &Env) -> Result<Term, Error> {
    if !receiver.is_callable() {
        return Err(Error::NotCallable(format!(
            "call/cc receiver must be callable, got {} {receiver}",
            receiver.type_name()
        )));
    }

    let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
    let (sender, delivery) = bounded::<Term>(0);
    let slot: Slot = Arc::new(Mutex::new(Some(sender)));
    let continuation = make_continuation(id, Arc::clone(&slot));

    let thread_receiver = receiver.clone();
    let thread_env = env.clone();
    debug!("call/cc#{id}: entering context");

    let handle = thread::Builder::new()
        .name(format!("call/cc#{id}"))
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run_context(id, slot, &thread_receiver, continuation, &thread_env))
        .map_err(|e| Error::EvalError(format!("cannot start continuation context: {e}")))?;

    let delivered = delivery.recv();

    if handle.join().is_err() {
        error!("call/cc#{id}: context thread panicked");
        std::process::exit(FATAL_EXIT_CODE);
    }

    match delivered {
        Ok(value) => {
            debug!("call/cc#{id}: resumed with {value}");
            Ok(value)
        }
        Err(_) => {
            debug!("call/cc#{id}: no value delivered, escaping outward");
            Err(Error::Escape)
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use crate::Error;
    use crate::Interpreter;

    fn run(input: &str) -> Result<String, Error> {
        Interpreter::new().run_source(input).map(|t| t.to_string())
    }

    #[test]
    fn test_escape_and_normal_return() {
        let test_cases = vec![
            // Escaping skips the pending addition
            ("(call/cc (fn (k) (+ 1 (k 42))))", "42"),
            // Normal return delivers the receiver's value
            ("(call/cc (fn (k) 7))", "7"),
            // The delivered value continues the enclosing computation
            ("(+ 1 (call/cc (fn (k) (* 10 (k 2)))))", "3"),
            // Outer escape through an inner context
            (
                "(call/cc (fn (outer) (+ 1 (call/cc (fn (inner) (outer 5))))))",
                "5",
            ),
            // Inner escape stays inside the outer context
            (
                "(call/cc (fn (outer) (+ 1 (call/cc (fn (inner) (inner 5))))))",
                "6",
            ),
            ("(call-with-current-continuation (fn (k) (k 'done)))", "done"),
            ("(call/cc (fn (k) (apply k (list 9))))", "9"),
            // Data values pass through untouched
            ("(call/cc (fn (k) (k (list 1 2))))", "(1 2)"),
            // Escape from inside a let initializer
            ("(call/cc (fn (k) (let a (k 3) b 4 (+ a b))))", "3"),
        ];

        for (input, expected) in test_cases {
            assert_eq!(run(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_escape_from_recursion() {
        let interp = Interpreter::new();
        interp
            .run_source(
                "(defun find-neg (xs k)
                   (if (null? xs) nil
                       (< (head xs) 0) (k (head xs))
                       (find-neg (tail xs) k)))",
            )
            .unwrap();
        let result = interp
            .run_source("(call/cc (fn (k) (find-neg (list 3 1 -4 1 -5) k)))")
            .unwrap();
        assert_eq!(result.to_string(), "-4");
        let result = interp
            .run_source("(call/cc (fn (k) (find-neg (list 3 1 4) k)))")
            .unwrap();
        assert_eq!(result.to_string(), "nil");
    }

    #[test]
    fn test_dead_continuation() {
        let interp = Interpreter::new();
        interp.run_source("(def saved (call/cc (fn (k) k)))").unwrap();
        let saved = interp.run_source("saved").unwrap().to_string();
        assert!(saved.starts_with("#<primitive:continuation#"), "{saved}");

        match interp.run_source("(saved 1)") {
            Err(Error::EvalError(msg)) => assert!(msg.contains("dead continuation"), "{msg}"),
            other => panic!("expected dead continuation error, got {other:?}"),
        }
    }

    #[test]
    fn test_receiver_must_be_callable() {
        assert!(matches!(run("(call/cc 5)"), Err(Error::NotCallable(_))));
        assert!(matches!(
            run("(call/cc)"),
            Err(Error::ArityMismatch { .. })
        ));
    }
}
