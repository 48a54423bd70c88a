//! The Eval/Apply engine.
//!
//! [`eval`] dispatches on the term tag; [`apply`] dispatches on the callee
//! tag. Closures get a fresh [`RuntimeFrame`] per call whose parent is the
//! frame the closure captured, never the caller's frame. Slot references
//! written by the resolver are read by walking that lexical chain and
//! comparing descriptor handles.

pub mod intooperation;

use crate::ast::{FN, Pair, SlotRef, Symbol, TRUE, Term, intern};
use crate::builtinops::builtin_bindings;
use crate::resolver::{self, FrameDescriptor, ScopeChain, ScopeKind};
use crate::{Error, MAX_EVAL_DEPTH};
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// One live activation of a [`FrameDescriptor`].
pub struct RuntimeFrame {
    descriptor: Arc<FrameDescriptor>,
    /// Lexical parent, captured when the closure was created
    parent: Option<Arc<RuntimeFrame>>,
    /// Write-once cells, one per descriptor parameter
    slots: Vec<OnceLock<Term>>,
}

impl RuntimeFrame {
    fn new(descriptor: Arc<FrameDescriptor>, parent: Option<Arc<RuntimeFrame>>) -> Self {
        let slots = descriptor.params().iter().map(|_| OnceLock::new()).collect();
        RuntimeFrame {
            descriptor,
            parent,
            slots,
        }
    }

    /// An empty frame for evaluating a top-level form
    pub(crate) fn top_level() -> Arc<Self> {
        Arc::new(RuntimeFrame::new(FrameDescriptor::top_level(), None))
    }

    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    fn bind(&self, index: usize, value: Term) -> Result<(), Error> {
        let slot = self.slots.get(index).ok_or_else(|| {
            Error::UnresolvedSlot(format!(
                "slot {index} out of range for {}",
                self.descriptor.name()
            ))
        })?;
        slot.set(value).map_err(|_| {
            Error::EvalError(format!(
                "slot {index} of {} bound twice",
                self.descriptor.name()
            ))
        })
    }

    /// Walk the lexical chain to the frame built from the slot's descriptor
    fn read(&self, slot: &SlotRef) -> Result<Term, Error> {
        let mut frame = Some(self);
        while let Some(current) = frame {
            if current.descriptor.id() == slot.descriptor {
                return current
                    .slots
                    .get(slot.index)
                    .and_then(OnceLock::get)
                    .cloned()
                    .ok_or_else(|| {
                        Error::UnresolvedSlot(format!(
                            "{} read before it was bound",
                            slot.symbol.name()
                        ))
                    });
            }
            frame = current.parent.as_deref();
        }
        Err(Error::UnresolvedSlot(format!(
            "no frame for {} ({}) on the current chain",
            slot.symbol.name(),
            slot.descriptor
        )))
    }
}

impl std::fmt::Debug for RuntimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Slots may hold closures that capture this frame, so only names are shown
        write!(f, "RuntimeFrame({:?})", self.descriptor)
    }
}

/// A frame descriptor paired with the frame active when it was evaluated
pub struct Closure {
    descriptor: Arc<FrameDescriptor>,
    env: Option<Arc<RuntimeFrame>>,
}

impl Closure {
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    /// Number of arguments accepted: `let` scopes take none
    pub fn arity(&self) -> usize {
        match self.descriptor.kind() {
            ScopeKind::Function => self.descriptor.params().len(),
            ScopeKind::Let => 0,
        }
    }
}

/// The process-wide table of top-level bindings.
///
/// Cloning the handle shares the table. Evaluation only reads it; the
/// driver writes it between top-level forms.
#[derive(Clone, Default)]
pub struct Globals(Arc<RwLock<HashMap<Symbol, Term>>>);

impl Globals {
    /// A table with no bindings at all
    pub fn new() -> Self {
        Globals::default()
    }

    /// A table seeded with the built-ins and `true`
    pub fn with_builtins() -> Self {
        let globals = Globals::new();
        for (name, term) in builtin_bindings() {
            globals.define(intern(name), term);
        }
        globals.define(TRUE.clone(), Term::Symbol(TRUE.clone()));
        globals
    }

    pub fn lookup(&self, symbol: &Symbol) -> Option<Term> {
        let table = self.0.read().unwrap_or_else(PoisonError::into_inner);
        table.get(symbol).cloned()
    }

    pub(crate) fn define(&self, symbol: Symbol, value: Term) {
        let mut table = self.0.write().unwrap_or_else(PoisonError::into_inner);
        table.insert(symbol, value);
    }

    /// All bindings, sorted by name
    pub fn bindings(&self) -> Vec<(String, Term)> {
        let table = self.0.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = table
            .iter()
            .map(|(symbol, value)| (symbol.name().to_owned(), value.clone()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

/// Evaluation context: global table, current frame and nesting depth
#[derive(Clone)]
pub struct Env {
    globals: Globals,
    frame: Arc<RuntimeFrame>,
    depth: usize,
}

impl Env {
    /// A context for one top-level form: fresh empty frame, depth zero
    pub fn new(globals: Globals) -> Self {
        Env {
            globals,
            frame: RuntimeFrame::top_level(),
            depth: 0,
        }
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn descend(&self) -> Result<Env, Error> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
            )));
        }
        Ok(Env {
            depth: self.depth + 1,
            ..self.clone()
        })
    }

    fn with_frame(&self, frame: Arc<RuntimeFrame>) -> Env {
        Env {
            globals: self.globals.clone(),
            frame,
            depth: self.depth,
        }
    }

    /// The resolver's view of the live frame chain
    pub(crate) fn scope_chain(&self) -> ScopeChain {
        let mut descriptors = Vec::new();
        let mut frame = Some(self.frame.as_ref());
        while let Some(current) = frame {
            descriptors.push(current.descriptor());
            frame = current.parent.as_deref();
        }
        let mut chain = ScopeChain::empty();
        for descriptor in descriptors.into_iter().rev() {
            chain.push_descriptor(descriptor);
        }
        chain
    }
}

/// Evaluate a term against `env`
pub fn eval(term: &Term, env: &Env) -> Result<Term, Error> {
    trace!("eval[{}] {term}", env.depth);
    match term {
        Term::Nil
        | Term::Number(_)
        | Term::String(_)
        | Term::Primitive(_)
        | Term::Special(_)
        | Term::Closure(_) => Ok(term.clone()),

        Term::Prototype(descriptor) => Ok(materialize(descriptor, env)),

        Term::Symbol(symbol) => env
            .globals
            .lookup(symbol)
            .ok_or_else(|| Error::UnboundSymbol(symbol.name().to_owned())),

        Term::SlotRef(slot) => env.frame.read(slot),

        Term::Pair(pair) => eval_pair(pair, env).map_err(|err| add_context(err, term)),
    }
}

fn eval_pair(pair: &Pair, env: &Env) -> Result<Term, Error> {
    let inner = env.descend()?;

    if pair.head.is_symbol(&FN) {
        let descriptor = resolver::resolve_fn(&pair.tail, &env.scope_chain())?;
        return Ok(materialize(&descriptor, env));
    }

    let callee = eval(&pair.head, &inner)?;
    let args = pair.tail.to_vec().ok_or_else(|| {
        Error::MalformedForm(format!("improper argument list: {}", pair.tail))
    })?;
    apply(&callee, &args, &inner)
}

/// Bind a prototype to the current frame. Prototypes with no enclosing
/// scope capture nothing.
fn materialize(descriptor: &Arc<FrameDescriptor>, env: &Env) -> Term {
    let captured = descriptor.enclosing().map(|_| Arc::clone(&env.frame));
    Term::Closure(Arc::new(Closure {
        descriptor: Arc::clone(descriptor),
        env: captured,
    }))
}

/// Errors from inside a compound form carry the innermost form that failed
fn add_context(error: Error, expr: &Term) -> Error {
    let with_context = |msg: String| {
        if msg.contains("Context:") {
            msg
        } else {
            format!("{msg}\n  Context: while evaluating: {expr}")
        }
    };
    match error {
        Error::EvalError(msg) => Error::EvalError(with_context(msg)),
        Error::TypeMismatch(msg) => Error::TypeMismatch(with_context(msg)),
        // Other kinds carry their own context; Escape must pass through untouched
        other => other,
    }
}

fn eval_args(args: &[Term], env: &Env) -> Result<Vec<Term>, Error> {
    args.iter().map(|arg| eval(arg, env)).collect()
}

/// Apply `callee` to raw argument terms, evaluating them in `env` unless
/// the callee is a special form.
pub fn apply(callee: &Term, args: &[Term], env: &Env) -> Result<Term, Error> {
    trace!("apply {callee} to {} args", args.len());
    match callee {
        Term::Closure(closure) => {
            check_arity(closure, args.len())?;
            let values = eval_args(args, env)?;
            invoke(closure, values, env)
        }
        Term::Primitive(primitive) => {
            let values = eval_args(args, env)?;
            (primitive.func)(values, env)
        }
        Term::Special(special) => (special.func)(args, env),
        other => Err(Error::NotCallable(format!("{} {other}", other.type_name()))),
    }
}

/// Apply `callee` to arguments that are already values. Special forms
/// receive them as their raw argument terms.
pub fn apply_values(callee: &Term, values: Vec<Term>, env: &Env) -> Result<Term, Error> {
    trace!("apply {callee} to {} values", values.len());
    match callee {
        Term::Closure(closure) => {
            check_arity(closure, values.len())?;
            invoke(closure, values, env)
        }
        Term::Primitive(primitive) => (primitive.func)(values, env),
        Term::Special(special) => (special.func)(&values, env),
        other => Err(Error::NotCallable(format!("{} {other}", other.type_name()))),
    }
}

fn check_arity(closure: &Closure, got: usize) -> Result<(), Error> {
    let expected = closure.arity();
    if expected == got {
        Ok(())
    } else {
        Err(Error::arity_error_with_expr(
            expected,
            got,
            closure.descriptor.name().to_owned(),
        ))
    }
}

fn invoke(closure: &Closure, values: Vec<Term>, env: &Env) -> Result<Term, Error> {
    let descriptor = &closure.descriptor;
    let frame = Arc::new(RuntimeFrame::new(
        Arc::clone(descriptor),
        closure.env.clone(),
    ));
    let inner = env.with_frame(Arc::clone(&frame));

    match descriptor.kind() {
        ScopeKind::Function => {
            for (index, value) in values.into_iter().enumerate() {
                frame.bind(index, value)?;
            }
            eval(descriptor.body(), &inner)
        }
        ScopeKind::Let => {
            // Declaration order; later initializers see earlier slots
            for (index, initializer) in descriptor.initializers().iter().enumerate() {
                let value = force(eval(initializer, &inner)?, &inner)?;
                frame.bind(index, value)?;
            }
            force(eval(descriptor.body(), &inner)?, &inner)
        }
    }
}

/// The implicit zero-argument application of a `let` value
fn force(value: Term, env: &Env) -> Result<Term, Error> {
    if value.is_callable() {
        apply_values(&value, Vec::new(), env)
    } else {
        Ok(value)
    }
}

//
// Special forms: raw argument terms plus the caller's env
//

/// `(if p1 c1 p2 c2 ... else)`
pub(crate) fn eval_if(args: &[Term], env: &Env) -> Result<Term, Error> {
    let Some((otherwise, clauses)) = args.split_last() else {
        return Err(Error::MalformedForm("if needs at least 3 arguments, got 0".to_owned()));
    };
    if clauses.is_empty() || clauses.len() % 2 != 0 {
        return Err(Error::MalformedForm(format!(
            "if needs predicate/consequent pairs and a final else, got {} arguments",
            args.len()
        )));
    }
    for clause in clauses.chunks(2) {
        if eval(&clause[0], env)?.is_truthy() {
            return eval(&clause[1], env);
        }
    }
    eval(otherwise, env)
}

/// Last value if all are truthy, else `nil`
pub(crate) fn eval_and(args: &[Term], env: &Env) -> Result<Term, Error> {
    let mut last = Term::truth(true);
    for arg in args {
        last = eval(arg, env)?;
        if last.is_nil() {
            return Ok(Term::Nil);
        }
    }
    Ok(last)
}

/// First truthy value, else `nil`
pub(crate) fn eval_or(args: &[Term], env: &Env) -> Result<Term, Error> {
    for arg in args {
        let value = eval(arg, env)?;
        if value.is_truthy() {
            return Ok(value);
        }
    }
    Ok(Term::Nil)
}

pub(crate) fn eval_all(args: &[Term], env: &Env) -> Result<Term, Error> {
    for arg in args {
        if eval(arg, env)?.is_nil() {
            return Ok(Term::Nil);
        }
    }
    Ok(Term::truth(true))
}

pub(crate) fn eval_any(args: &[Term], env: &Env) -> Result<Term, Error> {
    for arg in args {
        if eval(arg, env)?.is_truthy() {
            return Ok(Term::truth(true));
        }
    }
    Ok(Term::Nil)
}

pub(crate) fn eval_quote(args: &[Term], _env: &Env) -> Result<Term, Error> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(Error::MalformedForm(format!(
            "quote takes exactly one argument, got {}",
            args.len()
        ))),
    }
}

/// A `let` met at evaluation time (top level, or inside `eval`'d data) is
/// resolved against the live frame chain, then run.
pub(crate) fn eval_let(args: &[Term], env: &Env) -> Result<Term, Error> {
    let form = resolver::resolve_let(args, &env.scope_chain())?;
    eval(&form, env)
}
