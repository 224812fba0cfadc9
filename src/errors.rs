use thiserror::Error;

use crate::Span;

/// Classification of a semantic diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SymbolNotFound,
    AlreadyDefined,
    NotAModule,
    NotADerivedType,
    NoSuchMember,
    IllegalCoercion,
    TypeMismatch,
    DuplicateReturnType,
    InvalidAssignmentTarget,
    InvalidKeywordArgument,
    DuplicateArgument,
    MissingRequiredArgument,
    NoGenericMatch,
    UnsupportedConstruct,
    IntegerLiteralTooLarge,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct SemanticError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    pub fn symbol_not_found(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::SymbolNotFound,
            format!("Symbol '{}' not declared", name),
            span,
        )
    }

    pub fn already_defined(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::AlreadyDefined,
            format!("Symbol '{}' already defined", name),
            span,
        )
    }

    pub fn unsupported(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::UnsupportedConstruct, message, span)
    }
}
