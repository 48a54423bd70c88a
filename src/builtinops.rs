//! Built-in operations registry.
//!
//! Every name the global table is seeded with (apart from `nil` and
//! `true`) comes from this registry. Each entry is one of three kinds:
//!
//! - **Primitives** receive evaluated arguments and never see the
//!   environment (`+`, `cons`, `head`, ...). They are written as ordinary
//!   typed Rust functions and wrapped by the adapters in
//!   [`crate::evaluator::intooperation`].
//! - **Reflective primitives** also receive evaluated arguments but need the
//!   caller's environment to re-enter the evaluator (`eval`, `apply`,
//!   `call/cc`).
//! - **Special forms** receive their argument terms unevaluated (`if`,
//!   `and`, `let`, `quote`, ...). They live in the evaluator; this module
//!   only names them.
//!
//! ```text
//! (cons 1 (list 2 3))     ; (1 2 3)
//! (snoc (list 2 3) 1)     ; (1 2 3)
//! (mod -7 3)              ; -1
//! (apply + (list 1 2))    ; 3
//! ```
//!
//! ## Error Handling
//!
//! - **Type Safety**: an operand with the wrong tag fails with
//!   `TypeMismatch` (`(+ 1 "a")`, `(head 5)`).
//! - **Arity Checking**: every primitive has a declared arity; a call with
//!   the wrong number of arguments fails with `ArityMismatch` naming the
//!   primitive.
//! - **Booleans**: predicates answer `true` or `nil`.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`NumberType`,
//!    `Term`, `&str`, `ListIter`, or a trailing `NumIter`/`TermIter`)
//! 2. **Add to BUILTIN_OPS** with its name and arity
//! 3. **Add tests** to the table below

use crate::Error;
use crate::ast::{ListIter, NumberType, Primitive, Special, SpecialFn, Term};
use crate::continuation::call_with_current_continuation;
use crate::evaluator::intooperation::{
    IntoOperation, IntoVariadicOperation, NumIter, OperationFn, TermIter,
};
use crate::evaluator::{
    Env, apply_values, eval, eval_all, eval_and, eval_any, eval_if, eval_let, eval_or,
    eval_quote,
};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Declared argument count of a built-in operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// Any number, including none
    Any,
}

impl Arity {
    /// Check an argument count against this arity
    pub fn validate(&self, got: usize) -> Result<(), Error> {
        match *self {
            Arity::Exact(expected) if got != expected => Err(Error::arity_error(expected, got)),
            _ => Ok(()),
        }
    }
}

/// Native signature of a primitive that re-enters the evaluator
pub type ReflectiveFn = fn(Vec<Term>, &Env) -> Result<Term, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone)]
pub enum OpKind {
    /// Typed function over evaluated arguments, erased through the adapter layer
    Primitive(Arc<OperationFn>),
    /// Evaluated arguments plus the caller's environment
    Reflective(ReflectiveFn),
    /// Unevaluated argument terms plus the caller's environment
    Special(SpecialFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Primitive(_) => write!(f, "Primitive(<fn>)"),
            OpKind::Reflective(_) => write!(f, "Reflective(<fn>)"),
            OpKind::Special(_) => write!(f, "Special(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The global name this operation is bound to
    pub name: &'static str,
    /// The implementation of this operation
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl BuiltinOp {
    /// Check if this operation is a special form
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::Special(_))
    }

    /// The runtime value bound to this operation's name in the global table
    pub fn to_term(&self) -> Term {
        let name = self.name;
        let arity = self.arity;
        match &self.op_kind {
            OpKind::Special(func) => Term::Special(Arc::new(Special { name, func: *func })),
            OpKind::Primitive(func) => {
                let func = Arc::clone(func);
                Term::Primitive(Arc::new(Primitive {
                    name: name.to_owned(),
                    func: Box::new(move |args: Vec<Term>, _env: &Env| {
                        arity
                            .validate(args.len())
                            .and_then(|()| func(args))
                            .map_err(|e| name_arity_error(name, e))
                    }),
                }))
            }
            OpKind::Reflective(func) => {
                let func = *func;
                Term::Primitive(Arc::new(Primitive {
                    name: name.to_owned(),
                    func: Box::new(move |args: Vec<Term>, env: &Env| {
                        arity
                            .validate(args.len())
                            .map_err(|e| name_arity_error(name, e))?;
                        func(args, env)
                    }),
                }))
            }
        }
    }
}

/// Attach the primitive's name to an arity error raised without one
pub(crate) fn name_arity_error(name: &str, error: Error) -> Error {
    match error {
        Error::ArityMismatch {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, name.to_owned()),
        other => other,
    }
}

fn type_error(op: &str, expected: &str, got: &Term) -> Error {
    Error::TypeMismatch(format!(
        "{op} expected {expected}, got {} {got}",
        got.type_name()
    ))
}

//
// List primitives
//

fn builtin_list(args: TermIter<'_>) -> Term {
    Term::list(args.cloned())
}

fn builtin_cons(item: Term, list: Term) -> Result<Term, Error> {
    if list.is_list() {
        Ok(Term::cons(item, list))
    } else {
        Err(type_error("cons", "a list as its second argument", &list))
    }
}

/// `cons` with the arguments swapped: the list comes first
fn builtin_snoc(list: Term, item: Term) -> Result<Term, Error> {
    if list.is_list() {
        Ok(Term::cons(item, list))
    } else {
        Err(type_error("snoc", "a list as its first argument", &list))
    }
}

fn builtin_head(list: Term) -> Result<Term, Error> {
    match list {
        Term::Pair(p) => Ok(p.head.clone()),
        other => Err(type_error("head", "a non-empty list", &other)),
    }
}

fn builtin_tail(list: Term) -> Result<Term, Error> {
    match list {
        Term::Pair(p) => Ok(p.tail.clone()),
        other => Err(type_error("tail", "a non-empty list", &other)),
    }
}

macro_rules! nth_element {
    ($name:ident, $index:expr, $op_str:expr) => {
        fn $name(mut list: ListIter<'_>) -> Result<Term, Error> {
            list.nth($index).cloned().ok_or_else(|| {
                Error::TypeMismatch(format!(
                    "{} expected a list of at least {} elements",
                    $op_str,
                    $index + 1
                ))
            })
        }
    };
}

nth_element!(builtin_1st, 0, "1st");
nth_element!(builtin_2nd, 1, "2nd");
nth_element!(builtin_3rd, 2, "3rd");
nth_element!(builtin_4th, 3, "4th");
nth_element!(builtin_5th, 4, "5th");

//
// Predicates
//

fn builtin_null(value: Term) -> bool {
    value.is_nil()
}

fn builtin_atom(value: Term) -> bool {
    !matches!(value, Term::Pair(_))
}

fn builtin_eq(a: Term, b: Term) -> bool {
    a.is_identical(&b)
}

//
// Arithmetic and comparison
//

macro_rules! numeric_binary {
    ($name:ident, $op:tt) => {
        fn $name(a: NumberType, b: NumberType) -> NumberType {
            a $op b
        }
    };
}

numeric_binary!(builtin_add, +);
numeric_binary!(builtin_sub, -);
numeric_binary!(builtin_mul, *);
numeric_binary!(builtin_div, /);
// Floating remainder: the sign follows the dividend
numeric_binary!(builtin_mod, %);

macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(a: NumberType, b: NumberType) -> bool {
            a $op b
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_num_eq, ==);
numeric_comparison!(builtin_num_ne, !=);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_ge, >=);

fn builtin_sum(args: NumIter<'_>) -> NumberType {
    args.sum()
}

fn builtin_product(args: NumIter<'_>) -> NumberType {
    args.product()
}

//
// Reflective primitives
//

fn builtin_eval(args: Vec<Term>, env: &Env) -> Result<Term, Error> {
    match args.as_slice() {
        [term] => eval(term, env),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

fn builtin_apply(args: Vec<Term>, env: &Env) -> Result<Term, Error> {
    let [callee, list] = args.as_slice() else {
        return Err(Error::arity_error(2, args.len()));
    };
    let values = list
        .to_vec()
        .ok_or_else(|| type_error("apply", "a list of arguments", list))?;
    apply_values(callee, values, env)
}

fn builtin_call_cc(args: Vec<Term>, env: &Env) -> Result<Term, Error> {
    match args.as_slice() {
        [receiver] => call_with_current_continuation(receiver, env),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

/// Global registry of all built-in operations.
///
/// Typed primitives are wired through the same adapter layer that
/// `Interpreter::register_primitive` uses. This is done once at
/// initialization time via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> OpKind
    where
        F: IntoOperation<Args>,
    {
        OpKind::Primitive(<F as IntoOperation<Args>>::into_operation(f))
    }

    fn builtin_variadic<Args, F>(f: F) -> OpKind
    where
        F: IntoVariadicOperation<Args>,
    {
        OpKind::Primitive(<F as IntoVariadicOperation<Args>>::into_variadic_operation(f))
    }

    type Binary = (NumberType, NumberType);

    vec![
        // List operations
        BuiltinOp {
            name: "list",
            op_kind: builtin_variadic::<(TermIter<'static>,), _>(builtin_list),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "cons",
            op_kind: builtin_fixed::<(Term, Term), _>(builtin_cons),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "snoc",
            op_kind: builtin_fixed::<(Term, Term), _>(builtin_snoc),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "head",
            op_kind: builtin_fixed::<(Term,), _>(builtin_head),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "tail",
            op_kind: builtin_fixed::<(Term,), _>(builtin_tail),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "1st",
            op_kind: builtin_fixed::<(ListIter<'static>,), _>(builtin_1st),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "2nd",
            op_kind: builtin_fixed::<(ListIter<'static>,), _>(builtin_2nd),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "3rd",
            op_kind: builtin_fixed::<(ListIter<'static>,), _>(builtin_3rd),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "4th",
            op_kind: builtin_fixed::<(ListIter<'static>,), _>(builtin_4th),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "5th",
            op_kind: builtin_fixed::<(ListIter<'static>,), _>(builtin_5th),
            arity: Arity::Exact(1),
        },
        // Predicates
        BuiltinOp {
            name: "null?",
            op_kind: builtin_fixed::<(Term,), _>(builtin_null),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "atom?",
            op_kind: builtin_fixed::<(Term,), _>(builtin_atom),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "eq",
            op_kind: builtin_fixed::<(Term, Term), _>(builtin_eq),
            arity: Arity::Exact(2),
        },
        // Arithmetic operations
        BuiltinOp {
            name: "+",
            op_kind: builtin_fixed::<Binary, _>(builtin_add),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "-",
            op_kind: builtin_fixed::<Binary, _>(builtin_sub),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "*",
            op_kind: builtin_fixed::<Binary, _>(builtin_mul),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "div",
            op_kind: builtin_fixed::<Binary, _>(builtin_div),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "mod",
            op_kind: builtin_fixed::<Binary, _>(builtin_mod),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "sum",
            op_kind: builtin_variadic::<(NumIter<'static>,), _>(builtin_sum),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "product",
            op_kind: builtin_variadic::<(NumIter<'static>,), _>(builtin_product),
            arity: Arity::Any,
        },
        // Comparison operations
        BuiltinOp {
            name: "<",
            op_kind: builtin_fixed::<Binary, _>(builtin_lt),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "<=",
            op_kind: builtin_fixed::<Binary, _>(builtin_le),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "==",
            op_kind: builtin_fixed::<Binary, _>(builtin_num_eq),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "!=",
            op_kind: builtin_fixed::<Binary, _>(builtin_num_ne),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: ">",
            op_kind: builtin_fixed::<Binary, _>(builtin_gt),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: ">=",
            op_kind: builtin_fixed::<Binary, _>(builtin_ge),
            arity: Arity::Exact(2),
        },
        // Reflection
        BuiltinOp {
            name: "eval",
            op_kind: OpKind::Reflective(builtin_eval),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "apply",
            op_kind: OpKind::Reflective(builtin_apply),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "call/cc",
            op_kind: OpKind::Reflective(builtin_call_cc),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "call-with-current-continuation",
            op_kind: OpKind::Reflective(builtin_call_cc),
            arity: Arity::Exact(1),
        },
        // Special forms: structure is checked by the forms themselves
        BuiltinOp {
            name: "if",
            op_kind: OpKind::Special(eval_if),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "and",
            op_kind: OpKind::Special(eval_and),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "or",
            op_kind: OpKind::Special(eval_or),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "all",
            op_kind: OpKind::Special(eval_all),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "any",
            op_kind: OpKind::Special(eval_any),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "let",
            op_kind: OpKind::Special(eval_let),
            arity: Arity::Any,
        },
        BuiltinOp {
            name: "quote",
            op_kind: OpKind::Special(eval_quote),
            arity: Arity::Any,
        },
    ]
});

/// Lazy static map from name to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_NAME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter().map(|op| (op.name, op)).collect()
    });

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by name
pub fn find_builtin_op(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_NAME.get(name).copied()
}

/// Name/value pairs used to seed a fresh global table
pub(crate) fn builtin_bindings() -> impl Iterator<Item = (&'static str, Term)> {
    get_builtin_ops().iter().map(|op| (op.name, op.to_term()))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::evaluator::Globals;

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Term>>(value: T) -> Option<Term> {
        Some(val(value))
    }

    fn test_env() -> Env {
        Env::new(Globals::with_builtins())
    }

    /// Invoke a builtin through the same value the global table binds,
    /// so arity checks and the adapter layer are both exercised.
    fn call_builtin(name: &str, args: &[Term]) -> Result<Term, Error> {
        let op = find_builtin_op(name).unwrap();
        match op.to_term() {
            Term::Primitive(p) => (p.func)(args.to_vec(), &test_env()),
            other => panic!("expected primitive builtin in tests, got {other}"),
        }
    }

    #[test]
    fn test_builtin_ops_registry() {
        let cons_op = find_builtin_op("cons").unwrap();
        assert_eq!(cons_op.arity, Arity::Exact(2));
        assert!(!cons_op.is_special_form());
        assert!(matches!(cons_op.op_kind, OpKind::Primitive(_)));

        let if_op = find_builtin_op("if").unwrap();
        assert!(if_op.is_special_form());
        assert!(matches!(if_op.to_term(), Term::Special(s) if s.name == "if"));

        let eval_op = find_builtin_op("eval").unwrap();
        assert!(matches!(eval_op.op_kind, OpKind::Reflective(_)));
        assert!(!eval_op.is_special_form());

        // Both spellings of call/cc are registered
        assert!(find_builtin_op("call/cc").is_some());
        assert!(find_builtin_op("call-with-current-continuation").is_some());

        // Names are unique
        let all_ops = get_builtin_ops();
        assert_eq!(all_ops.len(), BUILTIN_BY_NAME.len());

        for name in ["quote", "let", "and", "or", "all", "any"] {
            assert!(find_builtin_op(name).unwrap().is_special_form(), "{name}");
        }

        assert!(find_builtin_op("unknown").is_none());
        assert!(find_builtin_op("car").is_none());
    }

    #[test]
    fn test_builtin_values_render() {
        assert_eq!(find_builtin_op("+").unwrap().to_term().to_string(), "#<primitive:+>");
        assert_eq!(
            find_builtin_op("quote").unwrap().to_term().to_string(),
            "#<special:quote>"
        );
        assert_eq!(builtin_bindings().count(), get_builtin_ops().len());
    }

    #[test]
    fn test_arity_validation() {
        assert!(Arity::Exact(2).validate(2).is_ok());
        assert!(Arity::Exact(2).validate(1).is_err());
        assert!(Arity::Exact(2).validate(3).is_err());
        assert!(Arity::Any.validate(0).is_ok());
        assert!(Arity::Any.validate(100).is_ok());

        match Arity::Exact(2).validate(3) {
            Err(Error::ArityMismatch { expected, got, .. }) => {
                assert_eq!((expected, got), (2, 3));
            }
            other => panic!("expected ArityMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_error_names_the_primitive() {
        match call_builtin("head", &[]) {
            Err(Error::ArityMismatch {
                expected: 1,
                got: 0,
                expression: Some(expr),
            }) => assert_eq!(expr, "head"),
            other => panic!("expected named ArityMismatch, got {other:?}"),
        }
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Term, Error>, Option<Term>);

        let int_list = val([1, 2, 3]);
        let five = val([1, 2, 3, 4, 5]);
        let many_twos: Vec<Term> = (0..10).map(|_| val(2)).collect();

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[val(1), val(2)], success(3)),
            test!("+", &[val(-5), val(10)], success(5)),
            test!("+", &[val(0.5), val(0.25)], success(0.75)),
            test!("+", &[val(1)], None),                 // Binary only
            test!("+", &[val(1), val(2), val(3)], None), // Binary only
            test!("+", &[val(1), val("2")], None),       // Wrong type
            test!("-", &[val(10), val(3)], success(7)),
            test!("-", &[val(3), val(10)], success(-7)),
            test!("-", &[val(5)], None),
            test!("*", &[val(6), val(7)], success(42)),
            test!("*", &[val(-2), val(3)], success(-6)),
            test!("*", &[val(2), nil()], None),
            test!("div", &[val(7), val(2)], success(3.5)),
            test!("div", &[val(1), val(0)], success(f64::INFINITY)),
            test!("div", &[sym("a"), val(2)], None),
            test!("mod", &[val(7), val(3)], success(1)),
            test!("mod", &[val(-7), val(3)], success(-1)),
            test!("mod", &[val(7.5), val(2)], success(1.5)),
            test!("mod", &[val(7)], None),
            test!("sum", &[], success(0)),
            test!("sum", &[val(1), val(2), val(3), val(4)], success(10)),
            test!("sum", &[val(1), val("x")], None),
            test!("product", &[], success(1)),
            test!("product", &[val(2), val(3), val(4)], success(24)),
            test!("product", &many_twos, success(1024)),
            test!("product", &[int_list.clone()], None),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("<", &[val(1), val(2)], success(true)),
            test!("<", &[val(2), val(1)], success(false)),
            test!("<", &[val(2), val(2)], success(false)),
            test!("<=", &[val(2), val(2)], success(true)),
            test!("<=", &[val(3), val(2)], success(false)),
            test!(">", &[val(3), val(2)], success(true)),
            test!(">", &[val(-1), val(-2)], success(true)),
            test!(">=", &[val(2), val(2)], success(true)),
            test!(">=", &[val(1), val(2)], success(false)),
            test!("==", &[val(4), val(4)], success(true)),
            test!("==", &[val(4), val(5)], success(false)),
            test!("!=", &[val(4), val(5)], success(true)),
            test!("!=", &[val(4), val(4)], success(false)),
            test!("<", &[val(1), sym("a")], None),
            test!("==", &[val("a"), val("a")], None), // Numbers only
            test!("<", &[val(1), val(2), val(3)], None),
            // =================================================================
            // LIST OPERATIONS
            // =================================================================
            test!("list", &[], Some(nil())),
            test!("list", &[val(1)], success([1])),
            test!(
                "list",
                &[val(1), val("hello"), sym("x")],
                success([val(1), val("hello"), sym("x")])
            ),
            test!("list", &[val([1]), val(2)], success([val([1]), val(2)])),
            test!("cons", &[val(0), val([1, 2])], success([0, 1, 2])),
            test!("cons", &[val("first"), nil()], success(["first"])),
            test!("cons", &[val([1]), val([2])], success([val([1]), val(2)])),
            test!("cons", &[val(1), val(2)], None), // Tail must be a list
            test!("cons", &[val(1)], None),
            test!("snoc", &[val([2, 3]), val(1)], success([1, 2, 3])),
            test!("snoc", &[nil(), val(1)], success([1])),
            test!("snoc", &[val(1), val(2)], None),
            test!("head", &[int_list.clone()], success(1)),
            test!("head", &[val([val([1]), val(2)])], success([1])),
            test!("head", &[nil()], None),
            test!("head", &[val(42)], None),
            test!("head", &[int_list.clone(), int_list.clone()], None),
            test!("tail", &[int_list.clone()], success([2, 3])),
            test!("tail", &[val(["only"])], Some(nil())),
            test!("tail", &[nil()], None),
            test!("tail", &[val("abc")], None),
            test!("1st", &[five.clone()], success(1)),
            test!("2nd", &[five.clone()], success(2)),
            test!("3rd", &[five.clone()], success(3)),
            test!("4th", &[five.clone()], success(4)),
            test!("5th", &[five.clone()], success(5)),
            test!("4th", &[int_list.clone()], None), // Too short
            test!("1st", &[nil()], None),
            test!("1st", &[val(7)], None),
            // =================================================================
            // PREDICATES
            // =================================================================
            test!("null?", &[nil()], success(true)),
            test!("null?", &[val(0)], success(false)),
            test!("null?", &[val("")], success(false)),
            test!("null?", &[val([1])], success(false)),
            test!("null?", &[], None),
            test!("atom?", &[sym("a")], success(true)),
            test!("atom?", &[val(1)], success(true)),
            test!("atom?", &[nil()], success(true)),
            test!("atom?", &[int_list.clone()], success(false)),
            test!("eq", &[sym("a"), sym("a")], success(true)),
            test!("eq", &[sym("a"), sym("b")], success(false)),
            test!("eq", &[val(2), val(2)], success(true)),
            test!("eq", &[val("s"), val("s")], success(true)),
            test!("eq", &[nil(), nil()], success(true)),
            test!("eq", &[int_list.clone(), int_list], success(true)), // Same cell
            test!("eq", &[val([1]), val([1])], success(false)),        // Distinct cells
            test!("eq", &[val(1), val("1")], success(false)),
        ];

        for (i, (name, result, expected)) in test_cases.into_iter().enumerate() {
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "case #{} ({name})", i + 1);
                }
                (Err(_), None) => {}
                (Ok(actual), None) => {
                    panic!("case #{} ({name}): expected error, got {actual}", i + 1)
                }
                (Err(err), Some(expected)) => {
                    panic!("case #{} ({name}): expected {expected}, got {err}", i + 1)
                }
            }
        }
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            call_builtin("+", &[val(1), val("2")]),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            call_builtin("head", &[val(1)]),
            Err(Error::TypeMismatch(_))
        ));
        // An empty or short list lacks the pair the operation needs
        for (name, arg) in [
            ("head", nil()),
            ("tail", nil()),
            ("1st", nil()),
            ("4th", val(vec![val(1), val(2)])),
            ("5th", val(vec![val(1), val(2), val(3), val(4)])),
        ] {
            assert!(
                matches!(call_builtin(name, &[arg]), Err(Error::TypeMismatch(_))),
                "{name}"
            );
        }
        assert!(matches!(
            call_builtin("cons", &[val(1), val(2)]),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            call_builtin("mod", &[val(1)]),
            Err(Error::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_reflective_builtins() {
        let plus = find_builtin_op("+").unwrap().to_term();
        let quoted_sum = val([sym("+"), val(20), val(3)]);

        assert_eq!(call_builtin("eval", &[quoted_sum]).unwrap(), val(23));
        assert_eq!(call_builtin("eval", &[val(5)]).unwrap(), val(5));
        assert_eq!(
            call_builtin("apply", &[plus.clone(), val([1, 2])]).unwrap(),
            val(3)
        );
        assert!(matches!(
            call_builtin("apply", &[plus.clone(), val(1)]),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            call_builtin("apply", &[val(1), val([1, 2])]),
            Err(Error::NotCallable(_))
        ));
        assert!(matches!(
            call_builtin("apply", &[plus]),
            Err(Error::ArityMismatch { .. })
        ));

        // A receiver that returns normally yields its value
        let list_op = find_builtin_op("list").unwrap().to_term();
        let result = call_builtin("call/cc", &[list_op]).unwrap();
        let items = result.to_vec().unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Term::Primitive(k) => assert!(k.name.starts_with("continuation#"), "{}", k.name),
            other => panic!("expected a continuation, got {other}"),
        }
    }
}
