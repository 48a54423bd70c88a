//! Static variable resolution.
//!
//! A `fn`/`defun` body is walked once, when the function is defined, and
//! every symbol naming a parameter of the current or an enclosing scope is
//! replaced by a [`SlotRef`] (descriptor handle + slot index). The result is a
//! [`FrameDescriptor`]: the static shape of one scope, from which the
//! evaluator allocates a runtime frame per invocation.
//!
//! `let` is desugared here as well. `(let a 1 b (f a) body)` becomes a call
//! with no arguments of a `Let` descriptor whose slots are `a` and `b`; each
//! initializer and the body become zero-parameter thunk descriptors nested
//! inside it. An initializer sees its sibling bindings but not its own name,
//! so `(let x (+ x 1) x)` reads the `x` of the enclosing scope.
//!
//! Quoted data is never rewritten.

use crate::Error;
use crate::ast::{FN, LET, QUOTE, SlotRef, Symbol, Term};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable integer handle naming a frame descriptor. Slot lookups compare
/// handles, never addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(u64);

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

impl DescriptorId {
    fn next() -> Self {
        DescriptorId(NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Distinguishes parameter-binding scopes from internal `let` scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Ordinary function: slots are filled from call arguments
    Function,
    /// `let` scope: takes no arguments, slots are filled by running the initializers
    Let,
}

/// Static description of one scope, built once by the resolver.
pub struct FrameDescriptor {
    id: DescriptorId,
    name: String,
    params: Vec<Symbol>,
    /// Resolved thunk prototypes, one per slot; empty unless `kind` is `Let`
    initializers: Vec<Term>,
    body: Term,
    enclosing: Option<DescriptorId>,
    kind: ScopeKind,
}

impl FrameDescriptor {
    /// The descriptor of the empty frame top-level forms are evaluated in
    pub(crate) fn top_level() -> Arc<Self> {
        let id = DescriptorId::next();
        Arc::new(FrameDescriptor {
            id,
            name: format!("top{id}"),
            params: Vec::new(),
            initializers: Vec::new(),
            body: Term::Nil,
            enclosing: None,
            kind: ScopeKind::Function,
        })
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Symbol] {
        &self.params
    }

    pub fn initializers(&self) -> &[Term] {
        &self.initializers
    }

    pub fn body(&self) -> &Term {
        &self.body
    }

    pub fn enclosing(&self) -> Option<DescriptorId> {
        self.enclosing
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }
}

impl std::fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.id, self.params)?;
        if self.kind == ScopeKind::Let {
            write!(f, " let")?;
        }
        Ok(())
    }
}

/// One scope visible during resolution
#[derive(Debug, Clone)]
struct Scope {
    id: DescriptorId,
    params: Vec<Symbol>,
    /// Slot that must not be visible (a `let` initializer's own binding)
    hidden: Option<usize>,
}

/// The chain of enclosing scopes, outermost first.
///
/// Built while the resolver descends, or from a live frame chain when a
/// `fn`/`let` form is met lazily at evaluation time.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl ScopeChain {
    pub fn empty() -> Self {
        ScopeChain::default()
    }

    /// Add the scope of `descriptor` as the new innermost scope
    pub(crate) fn push_descriptor(&mut self, descriptor: &FrameDescriptor) {
        self.push(descriptor.id, descriptor.params.clone(), None);
    }

    fn push(&mut self, id: DescriptorId, params: Vec<Symbol>, hidden: Option<usize>) {
        self.scopes.push(Scope { id, params, hidden });
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn innermost_id(&self) -> Option<DescriptorId> {
        self.scopes.last().map(|scope| scope.id)
    }

    /// Innermost scope binding `symbol` wins
    fn lookup(&self, symbol: &Symbol) -> Option<(DescriptorId, usize)> {
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .params
                .iter()
                .position(|param| param == symbol)
                .filter(|index| scope.hidden != Some(*index))
                .map(|index| (scope.id, index))
        })
    }
}

/// Resolve a function body against `enclosing`, producing its descriptor.
///
/// This is what `defun` and every `fn` form go through.
pub fn resolve(
    name: &str,
    params: Vec<Symbol>,
    body: &Term,
    enclosing: &ScopeChain,
) -> Result<Arc<FrameDescriptor>, Error> {
    let mut resolver = Resolver {
        chain: enclosing.clone(),
    };
    resolver.function(Some(name.to_owned()), params, body)
}

/// Resolve the tail of a `(fn params body)` form met at evaluation time.
pub fn resolve_fn(tail: &Term, enclosing: &ScopeChain) -> Result<Arc<FrameDescriptor>, Error> {
    let (params, body) = fn_parts(tail)?;
    let mut resolver = Resolver {
        chain: enclosing.clone(),
    };
    resolver.function(None, params, &body)
}

/// Resolve the arguments of a `(let ...)` form met at evaluation time.
/// Returns the rewritten form: a zero-argument call of the `let` prototype.
pub fn resolve_let(args: &[Term], enclosing: &ScopeChain) -> Result<Term, Error> {
    let mut resolver = Resolver {
        chain: enclosing.clone(),
    };
    let scope = resolver.let_scope(args)?;
    Ok(Term::list([Term::Prototype(scope)]))
}

/// Parse a parameter list: a proper list of distinct symbols
pub(crate) fn param_list(params: &Term, form: &str) -> Result<Vec<Symbol>, Error> {
    let items = params.to_vec().ok_or_else(|| {
        Error::MalformedForm(format!("{form} parameters must be a list, got {params}"))
    })?;
    let mut symbols = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Term::Symbol(symbol) => symbols.push(symbol),
            other => {
                return Err(Error::MalformedForm(format!(
                    "{form} parameters must be symbols, got {other}"
                )));
            }
        }
    }
    check_distinct(&symbols, form)?;
    Ok(symbols)
}

fn check_distinct(names: &[Symbol], form: &str) -> Result<(), Error> {
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(Error::MalformedForm(format!(
                "duplicate name {} in {form}",
                name.name()
            )));
        }
    }
    Ok(())
}

/// Split `(params body)` out of the tail of a `fn` form
fn fn_parts(tail: &Term) -> Result<(Vec<Symbol>, Term), Error> {
    match tail.to_vec().as_deref() {
        Some([params, body]) => Ok((param_list(params, "fn")?, body.clone())),
        _ => Err(Error::MalformedForm(format!(
            "fn needs a parameter list and a body: (fn {})",
            tail.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        ))),
    }
}

/// Split `n1 e1 n2 e2 ... body` into bindings and body
fn let_parts(args: &[Term]) -> Result<(Vec<(Symbol, &Term)>, &Term), Error> {
    let Some((body, pairs)) = args.split_last() else {
        return Err(Error::MalformedForm("let needs a body".to_owned()));
    };
    if pairs.len() % 2 != 0 {
        return Err(Error::MalformedForm(
            "let needs name/value pairs followed by a single body".to_owned(),
        ));
    }
    let mut bindings = Vec::with_capacity(pairs.len() / 2);
    for chunk in pairs.chunks(2) {
        match &chunk[0] {
            Term::Symbol(name) => bindings.push((name.clone(), &chunk[1])),
            other => {
                return Err(Error::MalformedForm(format!(
                    "let binding name must be a symbol, got {other}"
                )));
            }
        }
    }
    Ok((bindings, body))
}

struct Resolver {
    chain: ScopeChain,
}

impl Resolver {
    fn function(
        &mut self,
        name: Option<String>,
        params: Vec<Symbol>,
        body: &Term,
    ) -> Result<Arc<FrameDescriptor>, Error> {
        let id = DescriptorId::next();
        let name = name.unwrap_or_else(|| format!("fn{id}"));
        check_distinct(&params, &name)?;
        let enclosing = self.chain.innermost_id();

        self.chain.push(id, params.clone(), None);
        let body = self.form(body);
        self.chain.pop();
        let body = body?;

        debug!("resolved {name}{id} {params:?} -> {body}");
        Ok(Arc::new(FrameDescriptor {
            id,
            name,
            params,
            initializers: Vec::new(),
            body,
            enclosing,
            kind: ScopeKind::Function,
        }))
    }

    fn let_scope(&mut self, args: &[Term]) -> Result<Arc<FrameDescriptor>, Error> {
        let (bindings, body) = let_parts(args)?;
        let names: Vec<Symbol> = bindings.iter().map(|(name, _)| name.clone()).collect();
        check_distinct(&names, "let")?;

        let id = DescriptorId::next();
        let enclosing = self.chain.innermost_id();

        let mut initializers = Vec::with_capacity(bindings.len());
        for (index, (name, init)) in bindings.iter().enumerate() {
            self.chain.push(id, names.clone(), Some(index));
            let thunk = self.function(Some(format!("let:{}", name.name())), Vec::new(), init);
            self.chain.pop();
            initializers.push(Term::Prototype(thunk?));
        }

        self.chain.push(id, names.clone(), None);
        let body = self.function(Some("let:body".to_owned()), Vec::new(), body);
        self.chain.pop();
        let body = body?;

        debug!("resolved let{id} {names:?}");
        Ok(Arc::new(FrameDescriptor {
            id,
            name: format!("let{id}"),
            params: names,
            initializers,
            body: Term::Prototype(body),
            enclosing,
            kind: ScopeKind::Let,
        }))
    }

    fn form(&mut self, term: &Term) -> Result<Term, Error> {
        match term {
            Term::Symbol(symbol) => Ok(match self.chain.lookup(symbol) {
                Some((descriptor, index)) => Term::SlotRef(Arc::new(SlotRef {
                    descriptor,
                    index,
                    symbol: symbol.clone(),
                })),
                None => term.clone(),
            }),
            Term::Pair(pair) if pair.head.is_symbol(&FN) => {
                let (params, body) = fn_parts(&pair.tail)?;
                Ok(Term::Prototype(self.function(None, params, &body)?))
            }
            Term::Pair(pair) if pair.head.is_symbol(&LET) => {
                let args = pair
                    .tail
                    .to_vec()
                    .ok_or_else(|| Error::MalformedForm(format!("improper let form: {term}")))?;
                let scope = self.let_scope(&args)?;
                Ok(Term::list([Term::Prototype(scope)]))
            }
            Term::Pair(pair) if pair.head.is_symbol(&QUOTE) => Ok(term.clone()),
            Term::Pair(_) => self.elements(term),
            _ => Ok(term.clone()),
        }
    }

    /// Rebuild a list cell by cell, resolving each element
    fn elements(&mut self, list: &Term) -> Result<Term, Error> {
        match list {
            Term::Pair(pair) => Ok(Term::cons(
                self.form(&pair.head)?,
                self.elements(&pair.tail)?,
            )),
            other => self.form(other),
        }
    }
}
