//! The AST consumed by semantic analysis, as handed over by the parser.
//!
//! The tree is immutable during analysis. Constructor helpers on [`Expr`]
//! keep tests and embedders from spelling out boxed nodes by hand.

use crate::Span;

#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub items: Vec<ProgramUnit>,
}

#[derive(Debug, Clone)]
pub enum ProgramUnit {
    Program(Program),
    Module(Module),
    Subroutine(Subroutine),
    Function(Function),
}

#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub uses: Vec<Use>,
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<ProgramUnit>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub uses: Vec<Use>,
    pub decls: Vec<Decl>,
    pub contains: Vec<ProgramUnit>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: String,
    pub args: Vec<String>,
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<ProgramUnit>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub args: Vec<String>,
    /// Type spelled in the function prefix, e.g. `integer function f()`.
    pub prefix: Option<TypeSpec>,
    /// Explicit `result(name)` identifier.
    pub result: Option<String>,
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
    pub contains: Vec<ProgramUnit>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Use {
    pub module: String,
    /// Empty means `use m` (import everything public).
    pub only: Vec<UseSymbol>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UseSymbol {
    pub remote: String,
    /// `remote => local` rename.
    pub local: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Declaration(Declaration),
    DerivedType(DerivedType),
    Interface(Interface),
}

#[derive(Debug, Clone)]
pub struct Declaration {
    /// None for attribute-only declarations like `private :: a, b`.
    pub type_spec: Option<TypeSpec>,
    pub attributes: Vec<Attr>,
    pub entities: Vec<Entity>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub base: BaseType,
    pub kind: Option<Expr>,
    /// Type name for `type(t)` / `class(t)`.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Integer,
    Real,
    Complex,
    Character,
    Logical,
    Type,
    Class,
}

#[derive(Debug, Clone)]
pub enum Attr {
    Public,
    Private,
    Parameter,
    Allocatable,
    Pointer,
    Optional,
    Target,
    Save,
    Intent(IntentAttr),
    Dimension(Vec<Dim>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentAttr {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone)]
pub struct Dim {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub dims: Vec<Dim>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct DerivedType {
    pub name: String,
    pub decls: Vec<Declaration>,
    pub bound: Vec<BoundProcedure>,
    pub span: Span,
}

/// A type-bound procedure: `procedure :: name => proc`.
#[derive(Debug, Clone)]
pub struct BoundProcedure {
    pub name: String,
    pub proc: String,
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub header: InterfaceHeader,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum InterfaceHeader {
    /// `interface name` collecting `module procedure` lists.
    Generic {
        name: String,
        procedures: Vec<String>,
    },
    /// A bare interface block declaring external procedures.
    Block { units: Vec<ProgramUnit> },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Assignment {
        target: Expr,
        value: Expr,
    },
    /// Pointer association, `p => x`.
    Associate {
        target: Expr,
        value: Expr,
    },
    SubroutineCall {
        name: String,
        /// Receiver for a type-bound call, `call obj%method(...)`.
        member: Option<String>,
        args: Vec<IndexArg>,
    },
    Allocate {
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Deallocate {
        args: Vec<Expr>,
    },
    Open {
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Close {
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    /// `None` in `args` is a `*` placeholder.
    Read {
        args: Vec<Option<Expr>>,
        keywords: Vec<Keyword>,
        values: Vec<Expr>,
    },
    Write {
        args: Vec<Option<Expr>>,
        keywords: Vec<Keyword>,
        values: Vec<Expr>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    DoLoop {
        var: Option<String>,
        start: Option<Expr>,
        end: Option<Expr>,
        increment: Option<Expr>,
        body: Vec<Stmt>,
    },
    DoConcurrent {
        controls: Vec<ConcurrentControl>,
        body: Vec<Stmt>,
    },
    Select {
        test: Expr,
        cases: Vec<Case>,
    },
    Print {
        values: Vec<Expr>,
    },
    Exit,
    Cycle,
    Continue,
    Return,
    Stop {
        code: Option<Expr>,
    },
    ErrorStop {
        code: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct ConcurrentControl {
    pub var: Option<String>,
    pub start: Option<Expr>,
    pub end: Option<Expr>,
    pub increment: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Case {
    Values {
        tests: Vec<Expr>,
        body: Vec<Stmt>,
        span: Span,
    },
    Range {
        start: Option<Expr>,
        end: Option<Expr>,
        body: Vec<Stmt>,
        span: Span,
    },
    Default {
        body: Vec<Stmt>,
        span: Span,
    },
}

#[derive(Debug, Clone)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Num(i128),
    /// Real literal text, e.g. `"3.0"` or `"1.5d0"`.
    Real(String),
    Str(String),
    Logical(bool),
    Complex {
        re: Box<Expr>,
        im: Box<Expr>,
    },
    /// `a` or a member chain `a%b%c`.
    Name(Vec<String>),
    /// Syntactically ambiguous between a call and array indexing.
    FuncCallOrArray {
        name: String,
        args: Vec<IndexArg>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    StrOp {
        op: StrOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    ArrayInitializer(Vec<Expr>),
    ImpliedDoLoop {
        values: Vec<Expr>,
        var: String,
        start: Box<Expr>,
        end: Box<Expr>,
        increment: Option<Box<Expr>>,
    },
}

/// One call/index argument slot; plain arguments live in `end`, ranges use
/// `start:end:step`.
#[derive(Debug, Clone)]
pub struct IndexArg {
    pub start: Option<Expr>,
    pub end: Option<Expr>,
    pub step: Option<Expr>,
}

impl IndexArg {
    pub fn plain(e: Expr) -> IndexArg {
        IndexArg {
            start: None,
            end: Some(e),
            step: None,
        }
    }

    pub fn range(start: Option<Expr>, end: Option<Expr>) -> IndexArg {
        IndexArg {
            start,
            end,
            step: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    Eqv,
    NEqv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Concat,
}

impl Expr {
    fn new(kind: ExprKind) -> Expr {
        Expr { kind, span: 0..0 }
    }

    pub fn num(n: i128) -> Expr {
        Expr::new(ExprKind::Num(n))
    }
    pub fn real(text: &str) -> Expr {
        Expr::new(ExprKind::Real(text.to_string()))
    }
    pub fn str(s: &str) -> Expr {
        Expr::new(ExprKind::Str(s.to_string()))
    }
    pub fn logical(b: bool) -> Expr {
        Expr::new(ExprKind::Logical(b))
    }
    pub fn name(id: &str) -> Expr {
        Expr::new(ExprKind::Name(vec![id.to_string()]))
    }
    pub fn path(parts: &[&str]) -> Expr {
        Expr::new(ExprKind::Name(
            parts.iter().map(|p| p.to_string()).collect(),
        ))
    }
    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::FuncCallOrArray {
            name: name.to_string(),
            args: args.into_iter().map(IndexArg::plain).collect(),
        })
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::new(ExprKind::BinOp {
            op,
            left: Box::new(l),
            right: Box::new(r),
        })
    }
    pub fn add(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOp::Add, l, r)
    }
    pub fn sub(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOp::Sub, l, r)
    }
    pub fn mul(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOp::Mul, l, r)
    }
    pub fn div(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOp::Div, l, r)
    }
    pub fn pow(l: Expr, r: Expr) -> Expr {
        Expr::bin(BinOp::Pow, l, r)
    }

    fn cmp(op: CmpOp, l: Expr, r: Expr) -> Expr {
        Expr::new(ExprKind::Compare {
            op,
            left: Box::new(l),
            right: Box::new(r),
        })
    }
    pub fn eq(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOp::Eq, l, r)
    }
    pub fn ne(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOp::NotEq, l, r)
    }
    pub fn lt(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOp::Lt, l, r)
    }
    pub fn le(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOp::LtE, l, r)
    }
    pub fn gt(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOp::Gt, l, r)
    }
    pub fn ge(l: Expr, r: Expr) -> Expr {
        Expr::cmp(CmpOp::GtE, l, r)
    }

    fn boolean(op: BoolOp, l: Expr, r: Expr) -> Expr {
        Expr::new(ExprKind::BoolOp {
            op,
            left: Box::new(l),
            right: Box::new(r),
        })
    }
    pub fn and(l: Expr, r: Expr) -> Expr {
        Expr::boolean(BoolOp::And, l, r)
    }
    pub fn or(l: Expr, r: Expr) -> Expr {
        Expr::boolean(BoolOp::Or, l, r)
    }
    pub fn eqv(l: Expr, r: Expr) -> Expr {
        Expr::boolean(BoolOp::Eqv, l, r)
    }
    pub fn neqv(l: Expr, r: Expr) -> Expr {
        Expr::boolean(BoolOp::NEqv, l, r)
    }

    pub fn concat(l: Expr, r: Expr) -> Expr {
        Expr::new(ExprKind::StrOp {
            op: StrOp::Concat,
            left: Box::new(l),
            right: Box::new(r),
        })
    }
    pub fn neg(e: Expr) -> Expr {
        Expr::new(ExprKind::UnaryOp {
            op: UnaryOp::Neg,
            operand: Box::new(e),
        })
    }
    pub fn not(e: Expr) -> Expr {
        Expr::new(ExprKind::UnaryOp {
            op: UnaryOp::Not,
            operand: Box::new(e),
        })
    }
}

impl TypeSpec {
    fn base(base: BaseType) -> TypeSpec {
        TypeSpec {
            base,
            kind: None,
            name: None,
        }
    }

    pub fn integer() -> TypeSpec {
        TypeSpec::base(BaseType::Integer)
    }
    pub fn real() -> TypeSpec {
        TypeSpec::base(BaseType::Real)
    }
    pub fn complex() -> TypeSpec {
        TypeSpec::base(BaseType::Complex)
    }
    pub fn character() -> TypeSpec {
        TypeSpec::base(BaseType::Character)
    }
    pub fn logical() -> TypeSpec {
        TypeSpec::base(BaseType::Logical)
    }
    pub fn derived(name: &str) -> TypeSpec {
        TypeSpec {
            base: BaseType::Type,
            kind: None,
            name: Some(name.to_string()),
        }
    }
    pub fn class_of(name: &str) -> TypeSpec {
        TypeSpec {
            base: BaseType::Class,
            kind: None,
            name: Some(name.to_string()),
        }
    }
    pub fn with_kind(mut self, kind: Expr) -> TypeSpec {
        self.kind = Some(kind);
        self
    }
}

impl Entity {
    pub fn named(name: &str) -> Entity {
        Entity {
            name: name.to_string(),
            dims: Vec::new(),
            initializer: None,
        }
    }
    pub fn with_dims(mut self, dims: Vec<Dim>) -> Entity {
        self.dims = dims;
        self
    }
    pub fn with_init(mut self, init: Expr) -> Entity {
        self.initializer = Some(init);
        self
    }
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Stmt {
        Stmt { kind, span: 0..0 }
    }
}

impl Declaration {
    pub fn typed(type_spec: TypeSpec, entities: Vec<Entity>) -> Declaration {
        Declaration {
            type_spec: Some(type_spec),
            attributes: Vec::new(),
            entities,
            span: 0..0,
        }
    }
    pub fn with_attrs(mut self, attributes: Vec<Attr>) -> Declaration {
        self.attributes = attributes;
        self
    }
}
