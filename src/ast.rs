//! This module defines the term representation shared by code and data.
//! The main enum, [`Term`], covers every value kind the interpreter knows
//! about: numbers, strings, interned symbols, pair cells (the only composite,
//! chains of pairs ending in [`Term::Nil`] are proper lists), built-in
//! primitives and special forms, closure prototypes and closures, and the
//! resolved slot references produced by the resolver. Helper functions such as
//! [`val`], [`sym`] and [`nil`] keep construction short in code and tests.
//! Display renders the canonical text form used for REPL echo and test
//! comparison.

use crate::Error;
use crate::evaluator::{Closure, Env};
use crate::resolver::{DescriptorId, FrameDescriptor};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// Type alias for number values in interpreter
pub(crate) type NumberType = f64;

/// An interned symbol. Two symbols are equal exactly when they are the same
/// entry of the process-wide intern table.
#[derive(Clone)]
pub struct Symbol(Arc<str>);

static INTERN_TABLE: LazyLock<Mutex<HashMap<String, Symbol>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Return the canonical symbol for `name`, creating it on first use.
pub fn intern(name: &str) -> Symbol {
    let mut table = INTERN_TABLE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = table.get(name) {
        return existing.clone();
    }
    let symbol = Symbol(Arc::from(name));
    table.insert(name.to_owned(), symbol.clone());
    symbol
}

impl Symbol {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Names the evaluator and the driver recognize by identity.
pub(crate) static FN: LazyLock<Symbol> = LazyLock::new(|| intern("fn"));
pub(crate) static LET: LazyLock<Symbol> = LazyLock::new(|| intern("let"));
pub(crate) static QUOTE: LazyLock<Symbol> = LazyLock::new(|| intern("quote"));
pub(crate) static DEF: LazyLock<Symbol> = LazyLock::new(|| intern("def"));
pub(crate) static DEFUN: LazyLock<Symbol> = LazyLock::new(|| intern("defun"));
pub(crate) static TRUE: LazyLock<Symbol> = LazyLock::new(|| intern("true"));

/// A list cell.
pub struct Pair {
    pub head: Term,
    pub tail: Term,
}

/// Native function behind a [`Term::Primitive`]: receives evaluated
/// arguments and the caller's environment.
pub type PrimitiveFn = dyn Fn(Vec<Term>, &Env) -> Result<Term, Error> + Send + Sync;

/// Native function behind a [`Term::Special`]: receives the raw,
/// unevaluated argument terms and decides itself what to evaluate.
pub type SpecialFn = fn(&[Term], &Env) -> Result<Term, Error>;

pub struct Primitive {
    pub name: String,
    pub func: Box<PrimitiveFn>,
}

pub struct Special {
    pub name: &'static str,
    pub func: SpecialFn,
}

/// A variable reference resolved to a slot of the frame built from
/// `descriptor`. Only the resolver creates these.
#[derive(Debug)]
pub struct SlotRef {
    pub descriptor: DescriptorId,
    pub index: usize,
    /// Original name, kept for diagnostics and rendering
    pub symbol: Symbol,
}

/// Core term type in interpreter
///
/// Note: `Prototype` and `SlotRef` only appear inside resolved code.
/// Evaluation never returns a `Prototype`; it is materialized into a
/// `Closure` bound to the frame it was evaluated in.
#[derive(Clone)]
pub enum Term {
    /// The empty list, also the only false value
    Nil,
    /// Numbers (double precision only)
    Number(NumberType),
    /// String literals
    String(Arc<str>),
    /// Interned symbols
    Symbol(Symbol),
    /// List cells
    Pair(Arc<Pair>),
    /// Built-in functions taking evaluated arguments
    Primitive(Arc<Primitive>),
    /// Built-in forms taking unevaluated arguments
    Special(Arc<Special>),
    /// A resolved `fn`/`defun`/`let` scope not yet bound to a frame
    Prototype(Arc<FrameDescriptor>),
    /// A prototype paired with the frame it was created in
    Closure(Arc<Closure>),
    /// A resolved local variable
    SlotRef(Arc<SlotRef>),
}

impl Term {
    /// Build a single list cell
    pub fn cons(head: Term, tail: Term) -> Term {
        Term::Pair(Arc::new(Pair { head, tail }))
    }

    /// Build a proper list from the given items
    pub fn list<I>(items: I) -> Term
    where
        I: IntoIterator<Item = Term>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Term::Nil, |tail, head| Term::cons(head, tail))
    }

    /// The canonical truth value: `true` or `nil`
    pub fn truth(b: bool) -> Term {
        if b {
            Term::Symbol(TRUE.clone())
        } else {
            Term::Nil
        }
    }

    pub fn symbol(name: &str) -> Term {
        Term::Symbol(intern(name))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Term::Nil)
    }

    /// Anything but `nil` counts as true
    pub fn is_truthy(&self) -> bool {
        !self.is_nil()
    }

    /// `nil` or a pair (the tail of the chain is not inspected)
    pub fn is_list(&self) -> bool {
        matches!(self, Term::Nil | Term::Pair(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Term::Closure(_) | Term::Primitive(_) | Term::Special(_)
        )
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Term::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Term::Pair(p) => Some(p),
            _ => None,
        }
    }

    /// True if this term is the given symbol
    pub(crate) fn is_symbol(&self, symbol: &Symbol) -> bool {
        matches!(self, Term::Symbol(s) if s == symbol)
    }

    /// Iterate over the elements of a list. Stops at the first non-pair tail.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collect a proper list into a vector, `None` if the chain does not end in `nil`
    pub fn to_vec(&self) -> Option<Vec<Term>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Term::Nil => return Some(items),
                Term::Pair(p) => {
                    items.push(p.head.clone());
                    current = &p.tail;
                }
                _ => return None,
            }
        }
    }

    /// Identity comparison used by the `eq` primitive: symbols and composite
    /// values compare by identity, numbers and strings by value.
    pub fn is_identical(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Nil, Term::Nil) => true,
            (Term::Number(a), Term::Number(b)) => a == b,
            (Term::String(a), Term::String(b)) => a == b,
            (Term::Symbol(a), Term::Symbol(b)) => a == b,
            (Term::Pair(a), Term::Pair(b)) => Arc::ptr_eq(a, b),
            (Term::Primitive(a), Term::Primitive(b)) => Arc::ptr_eq(a, b),
            (Term::Special(a), Term::Special(b)) => Arc::ptr_eq(a, b),
            (Term::Prototype(a), Term::Prototype(b)) => a.id() == b.id(),
            (Term::Closure(a), Term::Closure(b)) => Arc::ptr_eq(a, b),
            (Term::SlotRef(a), Term::SlotRef(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short tag name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Term::Nil => "nil",
            Term::Number(_) => "number",
            Term::String(_) => "string",
            Term::Symbol(_) => "symbol",
            Term::Pair(_) => "pair",
            Term::Primitive(_) => "primitive",
            Term::Special(_) => "special",
            Term::Prototype(_) => "prototype",
            Term::Closure(_) => "closure",
            Term::SlotRef(_) => "slot",
        }
    }
}

/// Borrowing iterator over the elements of a list
#[derive(Clone)]
pub struct ListIter<'a> {
    current: &'a Term,
}

impl<'a> ListIter<'a> {
    /// Start iterating at a list term; rejects anything that is not a list
    pub(crate) fn new(list: &'a Term) -> Result<Self, Error> {
        if list.is_list() {
            Ok(ListIter { current: list })
        } else {
            Err(Error::TypeMismatch(format!(
                "expected list, got {} {list}",
                list.type_name()
            )))
        }
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Term;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Term::Pair(p) => {
                self.current = &p.tail;
                Some(&p.head)
            }
            _ => None,
        }
    }
}

impl FusedIterator for ListIter<'_> {}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Nil => write!(f, "Nil"),
            Term::Number(n) => write!(f, "Number({n})"),
            Term::String(s) => write!(f, "String(\"{s}\")"),
            Term::Symbol(s) => write!(f, "Symbol({})", s.name()),
            Term::Pair(p) => write!(f, "Pair({:?}, {:?})", p.head, p.tail),
            Term::Primitive(p) => write!(f, "Primitive({})", p.name),
            Term::Special(s) => write!(f, "Special({})", s.name),
            Term::Prototype(d) => write!(f, "Prototype({d:?})"),
            Term::Closure(c) => write!(f, "Closure({})", c.descriptor().name()),
            Term::SlotRef(r) => write!(
                f,
                "SlotRef({}[{}]@{:?})",
                r.symbol.name(),
                r.index,
                r.descriptor
            ),
        }
    }
}

// From trait implementations for Term - enables .into() conversion
impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::String(Arc::from(s))
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::String(Arc::from(s))
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::truth(b)
    }
}

impl From<Symbol> for Term {
    fn from(s: Symbol) -> Self {
        Term::Symbol(s)
    }
}

impl From<NumberType> for Term {
    fn from(n: NumberType) -> Self {
        Term::Number(n)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Term {
            fn from(n: $int_type) -> Self {
                Term::Number(NumberType::from(n))
            }
        }
    };
}

// Every integer type that converts to f64 without loss
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Term>> From<Vec<T>> for Term {
    fn from(v: Vec<T>) -> Self {
        Term::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Term>, const N: usize> From<[T; N]> for Term {
    fn from(arr: [T; N]) -> Self {
        Term::list(arr.into_iter().map(Into::into))
    }
}

// Fallible conversions from `Term` back into primitive Rust types.

impl std::convert::TryInto<NumberType> for Term {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        if let Term::Number(n) = self {
            Ok(n)
        } else {
            Err(Error::TypeMismatch(format!(
                "expected number, got {} {self}",
                self.type_name()
            )))
        }
    }
}

///   Helper function for creating symbols - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Term {
    Term::symbol(name.as_ref())
}

/// Helper function for creating Terms - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Term>>(value: T) -> Term {
    value.into()
}

/// Helper function for the empty list
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Term {
    Term::Nil
}

/// Shortest round-tripping digits. Very large and very small magnitudes
/// switch to exponent notation, which the reader also accepts.
fn write_number(f: &mut std::fmt::Formatter<'_>, n: NumberType) -> std::fmt::Result {
    let magnitude = n.abs();
    if n.is_finite() && magnitude != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        write!(f, "{n:e}")
    } else {
        write!(f, "{n}")
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Nil => write!(f, "nil"),
            Term::Number(n) => write_number(f, *n),
            Term::Symbol(s) => write!(f, "{}", s.name()),
            Term::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Term::Pair(_) => {
                write!(f, "(")?;
                let mut current = self;
                let mut first = true;
                loop {
                    match current {
                        Term::Pair(p) => {
                            if !first {
                                write!(f, " ")?;
                            }
                            write!(f, "{}", p.head)?;
                            first = false;
                            current = &p.tail;
                        }
                        Term::Nil => break,
                        improper => {
                            write!(f, " . {improper}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Term::Primitive(p) => write!(f, "#<primitive:{}>", p.name),
            Term::Special(s) => write!(f, "#<special:{}>", s.name),
            Term::Prototype(d) => write!(f, "#<prototype:{}>", d.name()),
            Term::Closure(c) => write!(f, "#<closure:{}>", c.descriptor().name()),
            Term::SlotRef(r) => write!(f, "{}", r.symbol.name()),
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Pair(a), Term::Pair(b)) => {
                Arc::ptr_eq(a, b) || (a.head == b.head && a.tail == b.tail)
            }
            (Term::Primitive(a), Term::Primitive(b)) => a.name == b.name,
            (Term::Special(a), Term::Special(b)) => a.name == b.name,
            (Term::SlotRef(a), Term::SlotRef(b)) => {
                a.descriptor == b.descriptor && a.index == b.index
            }
            _ => self.is_identical(other),
        }
    }
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        let test_cases = vec![
            (val(42), Term::Number(42.0)),
            (val(-17), Term::Number(-17.0)),
            (val(2.5), Term::Number(2.5)),
            (val(255u8), Term::Number(255.0)),
            (val(true), Term::Symbol(intern("true"))),
            (val(false), Term::Nil),
            (val("hello"), Term::String(Arc::from("hello"))),
            (sym("foo-bar?"), Term::Symbol(intern("foo-bar?"))),
            (nil(), Term::Nil),
            (
                val([1, 2, 3]),
                Term::cons(
                    val(1),
                    Term::cons(val(2), Term::cons(val(3), Term::Nil)),
                ),
            ),
            (
                val(vec![sym("op"), val(42), val("result")]),
                Term::list([sym("op"), val(42), val("result")]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_interning_is_identity() {
        let a = intern("interned-name");
        let b = intern("interned-name");
        assert_eq!(a, b);
        assert_ne!(a, intern("other-name"));
        assert!(sym("x").is_identical(&sym("x")));
    }

    #[test]
    fn test_display_canonical_forms() {
        let cases = vec![
            (val([1, 2, 3]), "(1 2 3)"),
            (val(vec![val([1, 2, 3]), val([4, 5, 6])]), "((1 2 3) (4 5 6))"),
            (nil(), "nil"),
            (val(21), "21"),
            (val(0.1), "0.1"),
            (val(-2.5), "-2.5"),
            (val(0.0), "0"),
            (val(123456.0), "123456"),
            (val(1e20), "100000000000000000000"),
            (val(1e21), "1e21"),
            (val(-2.5e22), "-2.5e22"),
            (val(0.000001), "0.000001"),
            (val(1e-7), "1e-7"),
            (sym("abc"), "abc"),
            (val("a\"b"), "\"a\\\"b\""),
            (val(vec![sym("quote"), nil()]), "(quote nil)"),
        ];
        for (term, expected) in cases {
            assert_eq!(term.to_string(), expected);
        }
    }

    #[test]
    fn test_eq_identity_vs_structural_equality() {
        let a = val([1, 2]);
        let b = val([1, 2]);
        assert_eq!(a, b);
        assert!(!a.is_identical(&b));
        assert!(a.is_identical(&a.clone()));
        assert!(val(3).is_identical(&val(3)));
        assert!(val("s").is_identical(&val("s")));
    }

    #[test]
    fn test_list_helpers() {
        let list = val([1, 2, 3]);
        assert_eq!(list.to_vec().map(|v| v.len()), Some(3));
        assert_eq!(list.iter().count(), 3);
        assert!(Term::cons(val(1), val(2)).to_vec().is_none());
        assert!(ListIter::new(&val(1)).is_err());
        assert_eq!(Term::cons(val(1), val(2)).to_string(), "(1 . 2)");
    }
}
