//! Semantic analysis: two sequential passes over one AST.
//!
//! Pass 1 ([`collect`]) builds the symbol tables and resolves every
//! declaration; pass 2 ([`body`]) lowers executable statements into typed
//! SIR, leaning on the tables pass 1 produced. The split is required:
//! a procedure may call another procedure defined later in the same module.

pub mod cast;
pub mod common;

mod body;
mod collect;

use log::debug;

use crate::ast;
use crate::errors::SemanticError;
use crate::loader::{ModuleLoader, INTRINSIC_ARRAY_MODULE, INTRINSIC_KIND_MODULE};
use crate::sir::{expr_value, Sir, Symbol};
use crate::symtab::SymbolTable;
use crate::Span;

use body::BodyLowerer;
use collect::SymbolCollector;

/// Analyzes one translation unit. `table` is the root symbol table (usually
/// empty, possibly pre-populated with a compile-unit-global scope).
pub fn ast_to_sir(
    unit: &ast::TranslationUnit,
    table: SymbolTable,
    loader: &mut dyn ModuleLoader,
) -> Result<Sir, SemanticError> {
    let mut table = table;
    let global_scope = table.root();

    debug!("pass 1: collecting symbols");
    let items = SymbolCollector::new(&mut table, loader, global_scope).walk_unit(unit)?;

    debug!("pass 2: lowering bodies");
    BodyLowerer::new(&mut table, loader, global_scope).walk_unit(unit)?;

    Ok(Sir {
        table,
        global_scope,
        items,
    })
}

/// Procedures resolved on demand by loading their owning intrinsic module.
pub(crate) fn intrinsic_module_of(name: &str) -> Option<&'static str> {
    match name {
        "kind" | "selected_int_kind" | "selected_real_kind" => Some(INTRINSIC_KIND_MODULE),
        "size" | "lbound" | "ubound" | "min" | "max" | "allocated" | "minval" | "maxval"
        | "real" | "sum" | "abs" => Some(INTRINSIC_ARRAY_MODULE),
        _ => None,
    }
}

/// Elementary math intrinsics synthesized into the global scope on first
/// use, all with signature `(real(4)) -> real(4)`.
pub(crate) const MATH_INTRINSICS: &[&str] = &[
    "sin", "cos", "tan", "sinh", "cosh", "tanh", "asin", "acos", "atan", "asinh", "acosh", "atanh",
];

/// Evaluates a kind specifier down to a byte width. The expression must
/// fold to a constant integer, either directly or through a parameter.
pub(crate) fn extract_kind(
    table: &SymbolTable,
    e: &crate::sir::Expr,
    span: &Span,
) -> Result<u8, SemanticError> {
    let n = match expr_value(e) {
        Some(n) => Some(n),
        None => match e {
            crate::sir::Expr::Var { sym } => match table.symbol(table.get_past_external(*sym)) {
                Symbol::Variable(v) => v.value,
                _ => None,
            },
            _ => None,
        },
    };
    match n {
        Some(n @ (1 | 2 | 4 | 8 | 16)) => Ok(n as u8),
        Some(n) => Err(SemanticError::unsupported(
            format!("Invalid kind {} (allowed: 1, 2, 4, 8, 16)", n),
            span.clone(),
        )),
        None => Err(SemanticError::unsupported(
            "Kind specifier must be a constant integer",
            span.clone(),
        )),
    }
}

/// Kind of a real literal: a `d` exponent means double precision.
pub(crate) fn real_literal_kind(text: &str) -> u8 {
    if text.contains('d') || text.contains('D') {
        8
    } else {
        4
    }
}

pub(crate) fn parse_real_literal(text: &str) -> f64 {
    text.replace(['d', 'D'], "e").parse().unwrap_or(0.0)
}
