//! Operator lowering shared by both passes.
//!
//! Each helper takes already-lowered operands, casts one side where the
//! coercion rules require it, and assembles the typed node. After cast
//! insertion both operand types are equal.

use crate::ast::{BinOp, BoolOp, CmpOp, StrOp, UnaryOp};
use crate::errors::{ErrorKind, SemanticError};
use crate::sema::{cast, parse_real_literal, real_literal_kind};
use crate::sir::{expr_value, Expr, Family, Type};
use crate::symtab::SymbolTable;
use crate::Span;

const MAX_INT_LITERAL: i128 = (1 << 62) - 1;

pub(crate) fn int_literal(n: i128, span: &Span) -> Result<Expr, SemanticError> {
    if n > MAX_INT_LITERAL {
        return Err(SemanticError::new(
            ErrorKind::IntegerLiteralTooLarge,
            "Integer constants larger than 2^62-1 are not supported",
            span.clone(),
        ));
    }
    Ok(Expr::ConstantInteger {
        n: n as i64,
        ty: Type::integer(4),
    })
}

pub(crate) fn real_literal(text: &str) -> Expr {
    Expr::ConstantReal {
        r: parse_real_literal(text),
        ty: Type::real(real_literal_kind(text)),
    }
}

pub(crate) fn str_literal(s: &str) -> Expr {
    Expr::ConstantString {
        s: s.to_string(),
        ty: Type::character(8),
    }
}

pub(crate) fn logical_literal(b: bool) -> Expr {
    Expr::ConstantLogical {
        b,
        ty: Type::logical(4),
    }
}

/// Complex constants take the wider kind of their two parts.
pub(crate) fn complex_literal(table: &SymbolTable, re: Expr, im: Expr) -> Expr {
    let kind = table.expr_type(&re).kind().max(table.expr_type(&im).kind());
    Expr::ConstantComplex {
        re: Box::new(re),
        im: Box::new(im),
        ty: Type::complex(kind),
    }
}

/// Casts the lower-priority operand toward the higher-priority one and
/// returns the operands together with the resulting type. Equal priorities
/// keep the right-hand type as the destination.
fn balance(
    table: &SymbolTable,
    span: &Span,
    left: Expr,
    right: Expr,
) -> Result<(Expr, Expr, Type), SemanticError> {
    let lt = table.expr_type(&left);
    let rt = table.expr_type(&right);
    if cast::priority(lt.family()) > cast::priority(rt.family()) {
        let right = cast::coerce(span, right, &rt, &lt)?;
        Ok((left, right, lt))
    } else {
        let left = cast::coerce(span, left, &lt, &rt)?;
        Ok((left, right, rt))
    }
}

fn fold(op: BinOp, a: i64, b: i64) -> Option<i64> {
    match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => a.checked_div(b),
        BinOp::Pow => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
    }
}

pub(crate) fn bin_op(
    table: &SymbolTable,
    span: &Span,
    op: BinOp,
    left: Expr,
    right: Expr,
) -> Result<Expr, SemanticError> {
    let (left, right, ty) = balance(table, span, left, right)?;
    let value = if ty.family() == Family::Integer {
        match (expr_value(&left), expr_value(&right)) {
            (Some(a), Some(b)) => fold(op, a, b),
            _ => None,
        }
    } else {
        None
    };
    Ok(Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty,
        value,
    })
}

pub(crate) fn compare(
    table: &SymbolTable,
    span: &Span,
    op: CmpOp,
    left: Expr,
    right: Expr,
) -> Result<Expr, SemanticError> {
    let lf = table.expr_type(&left).family();
    let rf = table.expr_type(&right).family();
    let numeric = |f: Family| matches!(f, Family::Integer | Family::Real);
    let complex_eq = lf == Family::Complex
        && rf == Family::Complex
        && matches!(op, CmpOp::Eq | CmpOp::NotEq);
    if !numeric(lf) && !numeric(rf) && !complex_eq {
        return Err(SemanticError::new(
            ErrorKind::TypeMismatch,
            "Compare: only Integer or Real can be on the LHS and RHS. \
             If operator is .eq. or .neq. then Complex type is also acceptable",
            span.clone(),
        ));
    }
    let (left, right, _) = balance(table, span, left, right)?;
    Ok(Expr::Compare {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty: Type::logical(4),
    })
}

pub(crate) fn bool_op(
    table: &SymbolTable,
    span: &Span,
    op: BoolOp,
    left: Expr,
    right: Expr,
) -> Result<Expr, SemanticError> {
    let (left, right, ty) = balance(table, span, left, right)?;
    Ok(Expr::BoolOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty,
    })
}

pub(crate) fn unary_op(table: &SymbolTable, op: UnaryOp, operand: Expr) -> Expr {
    let ty = table.expr_type(&operand);
    Expr::UnaryOp {
        op,
        operand: Box::new(operand),
        ty,
    }
}

pub(crate) fn str_op(table: &SymbolTable, op: StrOp, left: Expr, right: Expr) -> Expr {
    let ty = table.expr_type(&right);
    Expr::StrOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        ty,
    }
}
