use crate::Error;
use crate::ast::{ListIter, NumberType, Term};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

// NOTE: This module is plumbing for the evaluator.
// It defines the adapter layer that turns strongly-typed Rust
// functions into the erased `OperationFn` stored in a primitive.
//
// Embedders reach it through `Interpreter::register_primitive`; the
// built-in registry uses the same adapters.

/// Canonical erased primitive function type.
///
/// Primitives receive ownership of their evaluated argument vector, so an
/// implementation can move a `Term` out instead of cloning it.
pub type OperationFn = dyn Fn(Vec<Term>) -> Result<Term, Error> + Send + Sync;

// =====================================================================
// Fixed-arity argument conversion
// =====================================================================

/// Turns one evaluated argument into a strongly-typed parameter.
///
/// `Param<'a>` is the parameter type as seen by the primitive for the
/// lifetime of the local argument slot used during conversion.
pub trait FromParam {
    type Param<'a>;

    /// Either borrow from the slot (`&str`, list iterators) or move the
    /// term out of it (`Term` itself, numbers).
    fn from_arg<'a>(value: &'a mut Term) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Term {
    type Param<'a> = Term;

    fn from_arg<'a>(value: &'a mut Term) -> Result<Self::Param<'a>, Error> {
        Ok(std::mem::replace(value, Term::Nil))
    }
}

// By-value scalars obtained through `impl TryInto<T> for Term` in `ast.rs`.
impl<T> FromParam for T
where
    Term: std::convert::TryInto<T, Error = Error>,
{
    type Param<'a> = T;

    fn from_arg<'a>(value: &'a mut Term) -> Result<Self::Param<'a>, Error> {
        let owned = std::mem::replace(value, Term::Nil);
        <Term as std::convert::TryInto<T>>::try_into(owned)
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Term) -> Result<Self::Param<'a>, Error> {
        match &*value {
            Term::String(s) => Ok(&**s),
            other => Err(Error::TypeMismatch(format!(
                "expected string, got {} {other}",
                other.type_name()
            ))),
        }
    }
}

// A list argument: `nil` or a chain of pairs, walked without copying.
impl<'b> FromParam for ListIter<'b> {
    type Param<'a> = ListIter<'a>;

    fn from_arg<'a>(value: &'a mut Term) -> Result<Self::Param<'a>, Error> {
        ListIter::new(value)
    }
}

// =====================================================================
// Typed iterator over the trailing arguments of a variadic primitive
// =====================================================================

/// Describes how to view a slice of arguments as a typed iterator.
/// `precheck` validates every element up front so `project` cannot fail.
#[doc(hidden)]
pub trait TermElementKind {
    type Item<'a>;

    fn precheck(slice: &[Term]) -> Result<(), Error>;
    fn project<'a>(t: &'a Term) -> Self::Item<'a>;
}

#[doc(hidden)]
pub struct TypedTermIter<'a, K: TermElementKind> {
    inner: std::slice::Iter<'a, Term>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedTermIter<'a, K>
where
    K: TermElementKind,
{
    pub(crate) fn new(terms: &'a [Term]) -> Result<Self, Error> {
        K::precheck(terms)?;
        Ok(TypedTermIter {
            inner: terms.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K> Iterator for TypedTermIter<'a, K>
where
    K: TermElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let t = self.inner.next()?;
        Some(K::project(t))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> DoubleEndedIterator for TypedTermIter<'_, K>
where
    K: TermElementKind,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        let t = self.inner.next_back()?;
        Some(K::project(t))
    }
}

impl<K> ExactSizeIterator for TypedTermIter<'_, K> where K: TermElementKind {}
impl<K> FusedIterator for TypedTermIter<'_, K> where K: TermElementKind {}

/// Each element as a borrowed term
#[doc(hidden)]
pub struct AnyKind;

impl TermElementKind for AnyKind {
    type Item<'a> = &'a Term;

    fn precheck(_slice: &[Term]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(t: &'a Term) -> Self::Item<'a> {
        t
    }
}

/// Each element as a number; any other tag is rejected before the call
#[doc(hidden)]
pub struct NumberKind;

impl TermElementKind for NumberKind {
    type Item<'a> = NumberType;

    fn precheck(slice: &[Term]) -> Result<(), Error> {
        for t in slice {
            if !matches!(t, Term::Number(_)) {
                return Err(Error::TypeMismatch(format!(
                    "expected number, got {} {t}",
                    t.type_name()
                )));
            }
        }
        Ok(())
    }

    fn project<'a>(t: &'a Term) -> Self::Item<'a> {
        if let Term::Number(n) = t {
            *n
        } else {
            debug_assert!(false, "NumberKind::project saw non-number after precheck");
            NumberType::NAN
        }
    }
}

/// Borrowed iterator over the remaining arguments as terms
pub type TermIter<'a> = TypedTermIter<'a, AnyKind>;

/// Borrowed iterator over the remaining arguments as numbers
pub type NumIter<'a> = TypedTermIter<'a, NumberKind>;

// =====================================================================
// Rest-parameter support for variadic operations
// =====================================================================

/// Builds the rest parameter from the trailing slice of arguments
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Term]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedTermIter<'static, K>
where
    K: TermElementKind,
{
    type Param<'a> = TypedTermIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Term]) -> Result<Self::Param<'a>, Error> {
        TypedTermIter::<K>::new(slice)
    }
}

// =====================================================================
// Return-type adaptation
// =====================================================================

/// Normalizes primitive return types to `Result<Term, Error>`
pub trait IntoTermResult {
    fn into_term_result(self) -> Result<Term, Error>;
}

impl<T> IntoTermResult for Result<T, Error>
where
    T: Into<Term>,
{
    fn into_term_result(self) -> Result<Term, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoTermResult for T
where
    T: Into<Term>,
{
    fn into_term_result(self) -> Result<Term, Error> {
        Ok(self.into())
    }
}

/// Converts a strongly-typed Rust function into the erased
/// [`OperationFn`], parameterized by its argument tuple type.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Like [`IntoOperation`] for functions taking only a rest parameter
/// (`TermIter<'a>` or `NumIter<'a>`). Any argument count is accepted.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

// =====================================================================
// Variadic adapters
// =====================================================================

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoTermResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Term>| {
            let rest_param: <I as FromRest>::Param<'_> = <I as FromRest>::from_rest(&args[..])?;
            let result: R = (self)(rest_param);
            result.into_term_result()
        })
    }
}

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Implements `IntoOperation` for one arity: the argument count is checked
/// up front, then the owned `Vec<Term>` is destructured into local slots
/// that `FromParam` borrows from or moves out of.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromParam, )+
            R: IntoTermResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Term>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let result: R = (self)( $( $p ),+ );
                            result.into_term_result()
                        }
                        _ => Err(Error::arity_error($arity, len)),
                    }
                })
            }
        }
    };
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoTermResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Term>| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }

            let result: R = (self)();
            result.into_term_result()
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_into_operation_for_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn fixed<Args, F: IntoOperation<Args>>(f: F) -> Arc<OperationFn> {
        f.into_operation()
    }

    fn variadic<Args, F: IntoVariadicOperation<Args>>(f: F) -> Arc<OperationFn> {
        f.into_variadic_operation()
    }

    #[test]
    fn test_fixed_arity_conversion() {
        fn add(a: NumberType, b: NumberType) -> NumberType {
            a + b
        }
        fn shout(s: &str) -> String {
            s.to_uppercase()
        }
        fn count(items: ListIter<'_>) -> NumberType {
            items.count() as NumberType
        }
        fn forty_two() -> NumberType {
            42.0
        }

        let add = fixed::<(NumberType, NumberType), _>(add);
        assert_eq!(add(vec![val(7), val(5)]).unwrap(), val(12));
        assert!(matches!(
            add(vec![val(7)]),
            Err(Error::ArityMismatch {
                expected: 2,
                got: 1,
                ..
            })
        ));
        assert!(matches!(
            add(vec![val(7), val("x")]),
            Err(Error::TypeMismatch(_))
        ));

        let shout = fixed::<(&str,), _>(shout);
        assert_eq!(shout(vec![val("hi")]).unwrap(), val("HI"));
        assert!(matches!(shout(vec![sym("hi")]), Err(Error::TypeMismatch(_))));

        let count = fixed::<(ListIter<'static>,), _>(count);
        assert_eq!(count(vec![val([1, 2, 3])]).unwrap(), val(3));
        assert_eq!(count(vec![Term::Nil]).unwrap(), val(0));
        assert!(matches!(count(vec![val(1)]), Err(Error::TypeMismatch(_))));

        let forty_two = fixed::<(), _>(forty_two);
        assert_eq!(forty_two(vec![]).unwrap(), val(42));
        assert!(forty_two(vec![val(1)]).is_err());
    }

    #[test]
    fn test_rest_parameters() {
        fn total(nums: NumIter<'_>) -> NumberType {
            nums.sum()
        }
        fn arg_count(rest: TermIter<'_>) -> NumberType {
            rest.len() as NumberType
        }

        let total = variadic::<(NumIter<'static>,), _>(total);
        assert_eq!(total(vec![val(1), val(2), val(3)]).unwrap(), val(6));
        assert_eq!(total(vec![]).unwrap(), val(0));
        assert!(matches!(
            total(vec![val(1), val("2")]),
            Err(Error::TypeMismatch(_))
        ));

        let arg_count = variadic::<(TermIter<'static>,), _>(arg_count);
        assert_eq!(
            arg_count(vec![sym("a"), val(1), val("b")]).unwrap(),
            val(3)
        );
        assert_eq!(arg_count(vec![]).unwrap(), val(0));
    }
}
