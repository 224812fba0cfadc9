//! The implicit numeric-coercion decision table.
//!
//! Fortran permits cross-type numeric operations by implicit widening.
//! Given a source and a destination type, the rule table yields one of:
//! no conversion, a specific cast kind, or an illegal coercion.

use crate::errors::{ErrorKind, SemanticError};
use crate::sir::{CastKind, Expr, Family, Type};
use crate::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Default,
    Error,
    Cast(CastKind),
}

fn rule(source: Family, dest: Family) -> Action {
    use CastKind::*;
    use Family::*;
    match (source, dest) {
        (Integer, Integer) => Action::Cast(IntegerToInteger),
        (Integer, Real) => Action::Cast(IntegerToReal),
        (Integer, Complex) => Action::Cast(IntegerToComplex),
        (Integer, Logical) => Action::Cast(IntegerToLogical),
        (Integer, Character) | (Integer, Derived) => Action::Error,
        (Real, Integer) => Action::Cast(RealToInteger),
        (Real, Real) => Action::Cast(RealToReal),
        (Real, Complex) => Action::Cast(RealToComplex),
        (Complex, Complex) => Action::Cast(ComplexToComplex),
        _ => Action::Default,
    }
}

/// Priority used to pick which operand of a binary operation is cast.
/// Families outside the numeric tower have none.
pub(crate) fn priority(family: Family) -> i32 {
    match family {
        Family::Integer => 4,
        Family::Real => 5,
        Family::Complex => 6,
        Family::Character | Family::Logical | Family::Derived => -1,
    }
}

/// Wraps `expr` in an `ImplicitCast` to `dest` where the rules require one.
///
/// Same-family pairs (including a plain/pointer pair) convert only when
/// their kinds differ; the pointer side counts as the source for the kind
/// comparison.
pub(crate) fn coerce(
    span: &Span,
    expr: Expr,
    source: &Type,
    dest: &Type,
) -> Result<Expr, SemanticError> {
    let (sf, df) = (source.family(), dest.family());
    if sf == df {
        let (mut s, mut d) = (source, dest);
        if d.is_pointer() && !s.is_pointer() {
            std::mem::swap(&mut s, &mut d);
        }
        if s.kind() == d.kind() {
            return Ok(expr);
        }
    }
    match rule(sf, df) {
        Action::Default => Ok(expr),
        Action::Error => Err(SemanticError::new(
            ErrorKind::IllegalCoercion,
            format!("Implicit conversion from {} to {} is not allowed", sf, df),
            span.clone(),
        )),
        Action::Cast(cast) => Ok(Expr::ImplicitCast {
            arg: Box::new(expr),
            cast,
            ty: dest.clone(),
        }),
    }
}
