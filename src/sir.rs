//! The typed IR produced by semantic analysis.
//!
//! Expressions and statements are owned enum trees; symbols and scopes live
//! in the [`crate::symtab::SymbolTable`] arena and are referenced by id, so
//! cyclic references (a module's procedures referencing the module, a
//! derived type's methods referencing the type) never form owning cycles.

use crate::ast::{BinOp, BoolOp, CmpOp, StrOp, UnaryOp};
use crate::symtab::{ScopeId, SymbolId, SymbolTable};

/// A fully analyzed translation unit. Owns the symbol arena.
#[derive(Debug)]
pub struct Sir {
    pub table: SymbolTable,
    pub global_scope: ScopeId,
    /// Top-level program units, in source order.
    pub items: Vec<SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Integer,
    Real,
    Complex,
    Character,
    Logical,
    Derived,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Family::Integer => "Integer",
            Family::Real => "Real",
            Family::Complex => "Complex",
            Family::Character => "Character",
            Family::Logical => "Logical",
            Family::Derived => "Derived",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Integer { kind: u8, dims: Vec<Dimension> },
    Real { kind: u8, dims: Vec<Dimension> },
    Complex { kind: u8, dims: Vec<Dimension> },
    Character { kind: u8, dims: Vec<Dimension> },
    Logical { kind: u8, dims: Vec<Dimension> },
    Derived { def: SymbolId, dims: Vec<Dimension> },
    Class { def: SymbolId, dims: Vec<Dimension> },
    IntegerPointer { kind: u8, dims: Vec<Dimension> },
    RealPointer { kind: u8, dims: Vec<Dimension> },
    ComplexPointer { kind: u8, dims: Vec<Dimension> },
    CharacterPointer { kind: u8, dims: Vec<Dimension> },
    LogicalPointer { kind: u8, dims: Vec<Dimension> },
    DerivedPointer { def: SymbolId, dims: Vec<Dimension> },
}

impl Type {
    pub fn integer(kind: u8) -> Type {
        Type::Integer {
            kind,
            dims: Vec::new(),
        }
    }
    pub fn real(kind: u8) -> Type {
        Type::Real {
            kind,
            dims: Vec::new(),
        }
    }
    pub fn complex(kind: u8) -> Type {
        Type::Complex {
            kind,
            dims: Vec::new(),
        }
    }
    pub fn character(kind: u8) -> Type {
        Type::Character {
            kind,
            dims: Vec::new(),
        }
    }
    pub fn logical(kind: u8) -> Type {
        Type::Logical {
            kind,
            dims: Vec::new(),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Type::Integer { .. } | Type::IntegerPointer { .. } => Family::Integer,
            Type::Real { .. } | Type::RealPointer { .. } => Family::Real,
            Type::Complex { .. } | Type::ComplexPointer { .. } => Family::Complex,
            Type::Character { .. } | Type::CharacterPointer { .. } => Family::Character,
            Type::Logical { .. } | Type::LogicalPointer { .. } => Family::Logical,
            Type::Derived { .. } | Type::Class { .. } | Type::DerivedPointer { .. } => {
                Family::Derived
            }
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            Type::IntegerPointer { .. }
                | Type::RealPointer { .. }
                | Type::ComplexPointer { .. }
                | Type::CharacterPointer { .. }
                | Type::LogicalPointer { .. }
                | Type::DerivedPointer { .. }
        )
    }

    /// Byte width of the type. Derived types report the default width.
    pub fn kind(&self) -> u8 {
        match self {
            Type::Integer { kind, .. }
            | Type::Real { kind, .. }
            | Type::Complex { kind, .. }
            | Type::Character { kind, .. }
            | Type::Logical { kind, .. }
            | Type::IntegerPointer { kind, .. }
            | Type::RealPointer { kind, .. }
            | Type::ComplexPointer { kind, .. }
            | Type::CharacterPointer { kind, .. }
            | Type::LogicalPointer { kind, .. } => *kind,
            Type::Derived { .. } | Type::Class { .. } | Type::DerivedPointer { .. } => 4,
        }
    }

    pub fn dims(&self) -> &[Dimension] {
        match self {
            Type::Integer { dims, .. }
            | Type::Real { dims, .. }
            | Type::Complex { dims, .. }
            | Type::Character { dims, .. }
            | Type::Logical { dims, .. }
            | Type::Derived { dims, .. }
            | Type::Class { dims, .. }
            | Type::IntegerPointer { dims, .. }
            | Type::RealPointer { dims, .. }
            | Type::ComplexPointer { dims, .. }
            | Type::CharacterPointer { dims, .. }
            | Type::LogicalPointer { dims, .. }
            | Type::DerivedPointer { dims, .. } => dims,
        }
    }

    pub fn is_array(&self) -> bool {
        !self.dims().is_empty()
    }

    /// True when the two types are the plain and pointer rendition of the
    /// same family.
    pub fn is_same_type_pointer(&self, other: &Type) -> bool {
        self.family() == other.family() && self.is_pointer() != other.is_pointer()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    IntegerToReal,
    IntegerToInteger,
    RealToInteger,
    RealToComplex,
    IntegerToComplex,
    IntegerToLogical,
    ComplexToComplex,
    RealToReal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayIndex {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
    pub step: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    ConstantInteger {
        n: i64,
        ty: Type,
    },
    ConstantReal {
        r: f64,
        ty: Type,
    },
    ConstantString {
        s: String,
        ty: Type,
    },
    ConstantLogical {
        b: bool,
        ty: Type,
    },
    ConstantComplex {
        re: Box<Expr>,
        im: Box<Expr>,
        ty: Type,
    },
    ConstantArray {
        elements: Vec<Expr>,
        ty: Type,
    },
    /// Reference to a variable symbol; its type lives on the symbol.
    Var {
        sym: SymbolId,
    },
    ArrayRef {
        sym: SymbolId,
        args: Vec<ArrayIndex>,
        ty: Type,
    },
    DerivedRef {
        base: Box<Expr>,
        member: SymbolId,
        ty: Type,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        ty: Type,
        /// Folded constant value, integer operations only.
        value: Option<i64>,
    },
    Compare {
        left: Box<Expr>,
        op: CmpOp,
        right: Box<Expr>,
        ty: Type,
    },
    BoolOp {
        left: Box<Expr>,
        op: BoolOp,
        right: Box<Expr>,
        ty: Type,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: Type,
    },
    StrOp {
        left: Box<Expr>,
        op: StrOp,
        right: Box<Expr>,
        ty: Type,
    },
    ImplicitCast {
        arg: Box<Expr>,
        cast: CastKind,
        ty: Type,
    },
    FunctionCall {
        /// Final callee, possibly an external symbol.
        sym: SymbolId,
        /// The symbol the call site named when dispatch went through a
        /// generic or an external.
        original: Option<SymbolId>,
        args: Vec<Expr>,
        ty: Type,
    },
    ImpliedDoLoop {
        values: Vec<Expr>,
        var: Box<Expr>,
        start: Box<Expr>,
        end: Box<Expr>,
        increment: Option<Box<Expr>>,
        ty: Type,
    },
}

impl Expr {
    /// The type stored directly on the node; `Var` types live on the symbol
    /// and are read through [`SymbolTable::expr_type`].
    pub fn local_type(&self) -> Option<&Type> {
        match self {
            Expr::ConstantInteger { ty, .. }
            | Expr::ConstantReal { ty, .. }
            | Expr::ConstantString { ty, .. }
            | Expr::ConstantLogical { ty, .. }
            | Expr::ConstantComplex { ty, .. }
            | Expr::ConstantArray { ty, .. }
            | Expr::ArrayRef { ty, .. }
            | Expr::DerivedRef { ty, .. }
            | Expr::BinOp { ty, .. }
            | Expr::Compare { ty, .. }
            | Expr::BoolOp { ty, .. }
            | Expr::UnaryOp { ty, .. }
            | Expr::StrOp { ty, .. }
            | Expr::ImplicitCast { ty, .. }
            | Expr::FunctionCall { ty, .. }
            | Expr::ImpliedDoLoop { ty, .. } => Some(ty),
            Expr::Var { .. } => None,
        }
    }
}

/// Folded compile-time value of an expression, if any.
pub fn expr_value(e: &Expr) -> Option<i64> {
    match e {
        Expr::ConstantInteger { n, .. } => Some(*n),
        Expr::BinOp { value, .. } => *value,
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoLoopHead {
    pub var: Expr,
    pub start: Expr,
    pub end: Expr,
    pub increment: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocArg {
    pub sym: SymbolId,
    pub dims: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseStmt {
    Values { tests: Vec<Expr>, body: Vec<Stmt> },
    Range {
        start: Option<Expr>,
        end: Option<Expr>,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assignment {
        target: Expr,
        value: Expr,
    },
    Associate {
        target: Expr,
        value: Expr,
    },
    SubroutineCall {
        sym: SymbolId,
        original: Option<SymbolId>,
        args: Vec<Expr>,
    },
    Allocate {
        args: Vec<AllocArg>,
        stat: Option<Expr>,
    },
    ExplicitDeallocate {
        vars: Vec<SymbolId>,
    },
    ImplicitDeallocate {
        vars: Vec<SymbolId>,
    },
    Open {
        unit: Expr,
        file: Option<Expr>,
        status: Option<Expr>,
    },
    Close {
        unit: Expr,
        iostat: Option<Expr>,
        iomsg: Option<Expr>,
        err: Option<Expr>,
        status: Option<Expr>,
    },
    Read {
        unit: Option<Expr>,
        fmt: Option<Expr>,
        iomsg: Option<Expr>,
        iostat: Option<Expr>,
        id: Option<Expr>,
        values: Vec<Expr>,
    },
    Write {
        unit: Option<Expr>,
        fmt: Option<Expr>,
        iomsg: Option<Expr>,
        iostat: Option<Expr>,
        id: Option<Expr>,
        values: Vec<Expr>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    WhileLoop {
        test: Expr,
        body: Vec<Stmt>,
    },
    DoLoop {
        head: DoLoopHead,
        body: Vec<Stmt>,
    },
    DoConcurrentLoop {
        head: DoLoopHead,
        body: Vec<Stmt>,
    },
    Select {
        test: Expr,
        cases: Vec<CaseStmt>,
        default: Vec<Stmt>,
    },
    Print {
        values: Vec<Expr>,
    },
    Exit,
    Cycle,
    Return,
    Stop {
        code: Option<Expr>,
    },
    ErrorStop {
        code: Option<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Unspecified,
    Local,
    In,
    Out,
    InOut,
    ReturnVar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Default,
    Parameter,
    Allocatable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    Source,
    Intrinsic,
    /// Procedures declared interactively; a later declaration shadows them.
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deftype {
    Implementation,
    Interface,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub scope: ScopeId,
    pub intent: Intent,
    pub storage: Storage,
    pub ty: Type,
    pub access: Access,
    pub presence: Presence,
    pub initializer: Option<Expr>,
    /// Folded initializer value for parameters.
    pub value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub scope: ScopeId,
    pub args: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub return_var: SymbolId,
    pub abi: Abi,
    pub access: Access,
    pub deftype: Deftype,
}

#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: String,
    pub scope: ScopeId,
    pub args: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub abi: Abi,
    pub access: Access,
    pub deftype: Deftype,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub scope: ScopeId,
    pub dependencies: Vec<String>,
    pub intrinsic: bool,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub scope: ScopeId,
    pub dependencies: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct DerivedType {
    pub name: String,
    pub scope: ScopeId,
    pub abi: Abi,
    pub access: Access,
}

#[derive(Debug, Clone)]
pub struct GenericProcedure {
    pub name: String,
    pub scope: ScopeId,
    pub procs: Vec<SymbolId>,
    pub access: Access,
}

#[derive(Debug, Clone)]
pub struct ClassProcedure {
    pub name: String,
    pub proc_name: String,
    pub proc: SymbolId,
    pub abi: Abi,
}

/// Local alias forwarding to a symbol defined in another module. Must point
/// at the ultimate target; externals never chain.
#[derive(Debug, Clone)]
pub struct ExternalSymbol {
    pub name: String,
    pub scope: ScopeId,
    pub target: SymbolId,
    pub module_name: String,
    pub original_name: String,
    pub access: Access,
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Variable(Variable),
    Function(Function),
    Subroutine(Subroutine),
    Module(Module),
    Program(Program),
    DerivedType(DerivedType),
    Generic(GenericProcedure),
    ClassProcedure(ClassProcedure),
    External(ExternalSymbol),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Variable(v) => &v.name,
            Symbol::Function(f) => &f.name,
            Symbol::Subroutine(s) => &s.name,
            Symbol::Module(m) => &m.name,
            Symbol::Program(p) => &p.name,
            Symbol::DerivedType(d) => &d.name,
            Symbol::Generic(g) => &g.name,
            Symbol::ClassProcedure(c) => &c.name,
            Symbol::External(e) => &e.name,
        }
    }
}
