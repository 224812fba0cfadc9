//! Pass 2: re-walks the program units and lowers executable statements
//! into typed SIR, leaning on the symbol tables built by pass 1.
//!
//! The lowerer also synthesizes implicit deallocation: every unit body ends
//! with an `ImplicitDeallocate` over its local allocatables, and each call
//! whose intent-out formals receive allocatable actuals is preceded by one.

use log::trace;

use crate::ast;
use crate::errors::{ErrorKind, SemanticError};
use crate::loader::ModuleLoader;
use crate::sema::{cast, common, intrinsic_module_of, MATH_INTRINSICS};
use crate::sir::{
    AllocArg, ArrayIndex, CaseStmt, Deftype, Dimension, DoLoopHead, Expr, ExternalSymbol, Family,
    Intent, Presence, Stmt, Storage, Symbol, Type, Variable,
};
use crate::sir::{Abi, Access, Function};
use crate::symtab::{ScopeId, SymbolId, SymbolTable};
use crate::Span;

pub(crate) struct BodyLowerer<'a> {
    table: &'a mut SymbolTable,
    loader: &'a mut dyn ModuleLoader,
    current_scope: ScopeId,
    global_scope: ScopeId,
    current_module: Option<SymbolId>,
}

impl<'a> BodyLowerer<'a> {
    pub(crate) fn new(
        table: &'a mut SymbolTable,
        loader: &'a mut dyn ModuleLoader,
        global_scope: ScopeId,
    ) -> Self {
        Self {
            table,
            loader,
            current_scope: global_scope,
            global_scope,
            current_module: None,
        }
    }

    pub(crate) fn walk_unit(mut self, unit: &ast::TranslationUnit) -> Result<(), SemanticError> {
        for item in &unit.items {
            self.visit_unit(item)?;
        }
        Ok(())
    }

    fn visit_unit(&mut self, u: &ast::ProgramUnit) -> Result<(), SemanticError> {
        match u {
            ast::ProgramUnit::Program(p) => self.visit_program(p),
            ast::ProgramUnit::Module(m) => self.visit_module(m),
            ast::ProgramUnit::Subroutine(s) => self.visit_subroutine(s),
            ast::ProgramUnit::Function(f) => self.visit_function(f),
        }
    }

    fn unit_symbol(&self, name: &str, span: &Span) -> Result<SymbolId, SemanticError> {
        self.table
            .lookup_local(self.current_scope, name)
            .ok_or_else(|| SemanticError::symbol_not_found(name, span.clone()))
    }

    fn visit_module(&mut self, m: &ast::Module) -> Result<(), SemanticError> {
        trace!("lowering module {}", m.name);
        let mid = self.unit_symbol(&m.name, &m.span)?;
        let scope = match self.table.symbol(mid) {
            Symbol::Module(module) => module.scope,
            _ => return Err(SemanticError::symbol_not_found(&m.name, m.span.clone())),
        };
        let old_scope = std::mem::replace(&mut self.current_scope, scope);
        self.current_module = Some(mid);
        for c in &m.contains {
            self.visit_unit(c)?;
        }
        self.current_scope = old_scope;
        self.current_module = None;
        Ok(())
    }

    fn visit_program(&mut self, p: &ast::Program) -> Result<(), SemanticError> {
        trace!("lowering program {}", p.name);
        let pid = self.unit_symbol(&p.name, &p.span)?;
        let scope = match self.table.symbol(pid) {
            Symbol::Program(prog) => prog.scope,
            _ => return Err(SemanticError::symbol_not_found(&p.name, p.span.clone())),
        };
        let old_scope = std::mem::replace(&mut self.current_scope, scope);
        let body = self.lower_unit_body(&p.body)?;
        if let Symbol::Program(prog) = self.table.symbol_mut(pid) {
            prog.body = body;
        }
        for c in &p.contains {
            self.visit_unit(c)?;
        }
        self.current_scope = old_scope;
        Ok(())
    }

    fn visit_subroutine(&mut self, s: &ast::Subroutine) -> Result<(), SemanticError> {
        let sid = self.unit_symbol(&s.name, &s.span)?;
        let scope = match self.table.symbol(sid) {
            Symbol::Subroutine(sub) => sub.scope,
            _ => return Err(SemanticError::symbol_not_found(&s.name, s.span.clone())),
        };
        let old_scope = std::mem::replace(&mut self.current_scope, scope);
        let body = self.lower_unit_body(&s.body)?;
        if let Symbol::Subroutine(sub) = self.table.symbol_mut(sid) {
            sub.body = body;
        }
        for c in &s.contains {
            self.visit_unit(c)?;
        }
        self.current_scope = old_scope;
        Ok(())
    }

    fn visit_function(&mut self, f: &ast::Function) -> Result<(), SemanticError> {
        let fid = self.unit_symbol(&f.name, &f.span)?;
        let scope = match self.table.symbol(fid) {
            Symbol::Function(func) => func.scope,
            _ => return Err(SemanticError::symbol_not_found(&f.name, f.span.clone())),
        };
        let old_scope = std::mem::replace(&mut self.current_scope, scope);
        let body = self.lower_unit_body(&f.body)?;
        if let Symbol::Function(func) = self.table.symbol_mut(fid) {
            func.body = body;
        }
        for c in &f.contains {
            self.visit_unit(c)?;
        }
        self.current_scope = old_scope;
        Ok(())
    }

    /// Lowers a unit body, prepending an implicit deallocation before each
    /// call that passes allocatable actuals to intent-out formals and
    /// appending one for the scope's local allocatables.
    fn lower_unit_body(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<Stmt>, SemanticError> {
        let mut out = Vec::with_capacity(stmts.len() + 1);
        for s in stmts {
            if let Some(st) = self.lower_stmt(s)? {
                if matches!(st, Stmt::SubroutineCall { .. }) {
                    if let Some(dealloc) = self.implicit_deallocate_for_call(&st) {
                        out.push(dealloc);
                    }
                }
                out.push(st);
            }
        }
        if let Some(dealloc) = self.implicit_deallocate_for_scope() {
            out.push(dealloc);
        }
        Ok(out)
    }

    /// Nested bodies (branches, loops, cases) lower without deallocation
    /// synthesis; they share the enclosing unit's scope.
    fn lower_block(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<Stmt>, SemanticError> {
        let mut out = Vec::with_capacity(stmts.len());
        for s in stmts {
            if let Some(st) = self.lower_stmt(s)? {
                out.push(st);
            }
        }
        Ok(out)
    }

    /// Local allocatables of the current scope, in declaration order.
    fn implicit_deallocate_for_scope(&self) -> Option<Stmt> {
        let mut vars = Vec::new();
        for (_, sid) in self.table.entries(self.current_scope) {
            if let Symbol::Variable(v) = self.table.symbol(sid) {
                if v.storage == Storage::Allocatable && v.intent == Intent::Local {
                    vars.push(sid);
                }
            }
        }
        if vars.is_empty() {
            None
        } else {
            Some(Stmt::ImplicitDeallocate { vars })
        }
    }

    /// Allocatable actual arguments whose formal parameter is intent-out
    /// must be deallocated before the call.
    fn implicit_deallocate_for_call(&self, call: &Stmt) -> Option<Stmt> {
        let Stmt::SubroutineCall { sym, args, .. } = call else {
            return None;
        };
        let Symbol::Subroutine(sub) = self.table.symbol(self.table.get_past_external(*sym)) else {
            return None;
        };
        let mut vars = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let Expr::Var { sym: actual } = arg else {
                continue;
            };
            let Symbol::Variable(v) = self.table.symbol(self.table.get_past_external(*actual))
            else {
                continue;
            };
            let Some(Expr::Var { sym: formal }) = sub.args.get(i) else {
                continue;
            };
            let Symbol::Variable(fv) = self.table.symbol(self.table.get_past_external(*formal))
            else {
                continue;
            };
            if v.storage == Storage::Allocatable && fv.intent == Intent::Out {
                vars.push(*actual);
            }
        }
        if vars.is_empty() {
            None
        } else {
            Some(Stmt::ImplicitDeallocate { vars })
        }
    }

    fn lower_stmt(&mut self, s: &ast::Stmt) -> Result<Option<Stmt>, SemanticError> {
        let span = &s.span;
        let lowered = match &s.kind {
            ast::StmtKind::Assignment { target, value } => {
                Some(self.lower_assignment(target, value, span)?)
            }
            ast::StmtKind::Associate { target, value } => {
                Some(self.lower_associate(target, value, span)?)
            }
            ast::StmtKind::SubroutineCall { name, member, args } => {
                Some(self.resolve_call(name, member.as_deref(), args, span)?)
            }
            ast::StmtKind::Allocate { args, keywords } => {
                Some(self.lower_allocate(args, keywords, span)?)
            }
            ast::StmtKind::Deallocate { args } => Some(self.lower_deallocate(args)?),
            ast::StmtKind::Open { args, keywords } => Some(self.lower_open(args, keywords, span)?),
            ast::StmtKind::Close { args, keywords } => {
                Some(self.lower_close(args, keywords, span)?)
            }
            ast::StmtKind::Read {
                args,
                keywords,
                values,
            } => Some(self.lower_read_write(args, keywords, values, span, false)?),
            ast::StmtKind::Write {
                args,
                keywords,
                values,
            } => Some(self.lower_read_write(args, keywords, values, span, true)?),
            ast::StmtKind::If { test, body, orelse } => {
                let test = self.lower_expr(test)?;
                let body = self.lower_block(body)?;
                let orelse = self.lower_block(orelse)?;
                Some(Stmt::If { test, body, orelse })
            }
            ast::StmtKind::While { test, body } => {
                let test = self.lower_expr(test)?;
                let body = self.lower_block(body)?;
                Some(Stmt::WhileLoop { test, body })
            }
            ast::StmtKind::DoLoop {
                var,
                start,
                end,
                increment,
                body,
            } => {
                let head = self.lower_loop_head(
                    var.as_deref(),
                    start.as_ref(),
                    end.as_ref(),
                    increment.as_ref(),
                    span,
                )?;
                let body = self.lower_block(body)?;
                Some(Stmt::DoLoop { head, body })
            }
            ast::StmtKind::DoConcurrent { controls, body } => {
                if controls.len() != 1 {
                    return Err(SemanticError::unsupported(
                        "Do concurrent: exactly one concurrent-control clause is required",
                        span.clone(),
                    ));
                }
                let c = &controls[0];
                let head = self.lower_loop_head(
                    c.var.as_deref(),
                    c.start.as_ref(),
                    c.end.as_ref(),
                    c.increment.as_ref(),
                    span,
                )?;
                let body = self.lower_block(body)?;
                Some(Stmt::DoConcurrentLoop { head, body })
            }
            ast::StmtKind::Select { test, cases } => Some(self.lower_select(test, cases)?),
            ast::StmtKind::Print { values } => {
                let values = values
                    .iter()
                    .map(|v| self.lower_expr(v))
                    .collect::<Result<_, _>>()?;
                Some(Stmt::Print { values })
            }
            ast::StmtKind::Exit => Some(Stmt::Exit),
            ast::StmtKind::Cycle => Some(Stmt::Cycle),
            ast::StmtKind::Continue => None,
            ast::StmtKind::Return => Some(Stmt::Return),
            ast::StmtKind::Stop { code } => {
                let code = code.as_ref().map(|e| self.lower_expr(e)).transpose()?;
                Some(Stmt::Stop { code })
            }
            ast::StmtKind::ErrorStop { code } => {
                let code = code.as_ref().map(|e| self.lower_expr(e)).transpose()?;
                Some(Stmt::ErrorStop { code })
            }
        };
        Ok(lowered)
    }

    fn lower_assignment(
        &mut self,
        target: &ast::Expr,
        value: &ast::Expr,
        span: &Span,
    ) -> Result<Stmt, SemanticError> {
        let target = self.lower_expr(target)?;
        if !matches!(
            target,
            Expr::Var { .. } | Expr::ArrayRef { .. } | Expr::DerivedRef { .. }
        ) {
            return Err(SemanticError::new(
                ErrorKind::InvalidAssignmentTarget,
                "The LHS of assignment can only be a variable or an array reference",
                span.clone(),
            ));
        }
        let target_ty = self.table.expr_type(&target);
        let value = self.lower_expr(value)?;
        if matches!(target, Expr::Var { .. })
            && !target_ty.is_array()
            && matches!(value, Expr::ConstantArray { .. })
        {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Array initializer expressions can only be assigned to array references",
                span.clone(),
            ));
        }
        let value = if matches!(target, Expr::Var { .. } | Expr::ArrayRef { .. }) {
            let value_ty = self.table.expr_type(&value);
            cast::coerce(span, value, &value_ty, &target_ty)?
        } else {
            value
        };
        Ok(Stmt::Assignment { target, value })
    }

    fn lower_associate(
        &mut self,
        target: &ast::Expr,
        value: &ast::Expr,
        span: &Span,
    ) -> Result<Stmt, SemanticError> {
        let target = self.lower_expr(target)?;
        let value = self.lower_expr(value)?;
        let target_ty = self.table.expr_type(&target);
        let value_ty = self.table.expr_type(&value);
        if !(target_ty.is_pointer() && !value_ty.is_pointer()) {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Only a pointer variable can be associated with a non-pointer variable",
                span.clone(),
            ));
        }
        if !target_ty.is_same_type_pointer(&value_ty) {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Pointer and target must have the same base type",
                span.clone(),
            ));
        }
        Ok(Stmt::Associate { target, value })
    }

    /// Each allocate argument reads as an array reference whose index list
    /// supplies the bounds; a missing lower bound defaults to 1.
    fn lower_allocate(
        &mut self,
        args: &[ast::Expr],
        keywords: &[ast::Keyword],
        span: &Span,
    ) -> Result<Stmt, SemanticError> {
        let one = Expr::ConstantInteger {
            n: 1,
            ty: Type::integer(4),
        };
        let mut alloc_args = Vec::with_capacity(args.len());
        for arg in args {
            let lowered = self.lower_expr(arg)?;
            let Expr::ArrayRef { sym, args, .. } = lowered else {
                return Err(SemanticError::unsupported(
                    "`allocate` arguments must be array references",
                    arg.span.clone(),
                ));
            };
            let dims = args
                .into_iter()
                .map(|ai| Dimension {
                    start: ai.start.or_else(|| Some(one.clone())),
                    end: ai.end,
                })
                .collect();
            alloc_args.push(AllocArg { sym, dims });
        }
        if keywords.len() > 1 || keywords.iter().any(|kw| kw.name != "stat") {
            return Err(SemanticError::new(
                ErrorKind::InvalidKeywordArgument,
                "`allocate` statement only accepts one keyword argument, `stat`",
                span.clone(),
            ));
        }
        let stat = keywords
            .first()
            .map(|kw| self.lower_expr(&kw.value))
            .transpose()?;
        Ok(Stmt::Allocate {
            args: alloc_args,
            stat,
        })
    }

    fn lower_deallocate(&mut self, args: &[ast::Expr]) -> Result<Stmt, SemanticError> {
        let mut vars = Vec::with_capacity(args.len());
        for arg in args {
            let lowered = self.lower_expr(arg)?;
            let not_allocatable = || {
                SemanticError::new(
                    ErrorKind::TypeMismatch,
                    "Only an allocatable variable symbol can be deallocated",
                    arg.span.clone(),
                )
            };
            let Expr::Var { sym } = lowered else {
                return Err(not_allocatable());
            };
            match self.table.symbol(self.table.get_past_external(sym)) {
                Symbol::Variable(v) if v.storage == Storage::Allocatable => vars.push(sym),
                _ => return Err(not_allocatable()),
            }
        }
        Ok(Stmt::ExplicitDeallocate { vars })
    }

    fn duplicate_argument(name: &str, span: &Span) -> SemanticError {
        SemanticError::new(
            ErrorKind::DuplicateArgument,
            format!(
                "Duplicate value of `{}` found; it has already been specified \
                 via argument or keyword arguments",
                name
            ),
            span.clone(),
        )
    }

    fn expect_family(
        &self,
        e: &Expr,
        family: Family,
        what: &str,
        span: &Span,
    ) -> Result<(), SemanticError> {
        if self.table.expr_type(e).family() != family {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                format!(
                    "`{}` must be of type {} or {}Pointer",
                    what, family, family
                ),
                span.clone(),
            ));
        }
        Ok(())
    }

    fn expect_variable(e: &Expr, what: &str, span: &Span) -> Result<(), SemanticError> {
        if !matches!(e, Expr::Var { .. }) {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                format!("`{}` must be a variable", what),
                span.clone(),
            ));
        }
        Ok(())
    }

    fn lower_open(
        &mut self,
        args: &[ast::Expr],
        keywords: &[ast::Keyword],
        span: &Span,
    ) -> Result<Stmt, SemanticError> {
        if args.len() > 1 {
            return Err(SemanticError::unsupported(
                "Number of arguments cannot be more than 1 in open statement",
                span.clone(),
            ));
        }
        let mut unit = args.first().map(|e| self.lower_expr(e)).transpose()?;
        let mut file = None;
        let mut status = None;
        for kw in keywords {
            match kw.name.as_str() {
                "unit" | "newunit" => {
                    if unit.is_some() {
                        return Err(Self::duplicate_argument("unit", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    if kw.name == "newunit" {
                        Self::expect_variable(&e, "newunit", span)?;
                    }
                    self.expect_family(&e, Family::Integer, &kw.name, span)?;
                    unit = Some(e);
                }
                "file" => {
                    if file.is_some() {
                        return Err(Self::duplicate_argument("file", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    self.expect_family(&e, Family::Character, "file", span)?;
                    file = Some(e);
                }
                "status" => {
                    if status.is_some() {
                        return Err(Self::duplicate_argument("status", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    self.expect_family(&e, Family::Character, "status", span)?;
                    status = Some(e);
                }
                other => {
                    return Err(SemanticError::new(
                        ErrorKind::InvalidKeywordArgument,
                        format!("Invalid keyword argument `{}` in open statement", other),
                        span.clone(),
                    ))
                }
            }
        }
        let unit = unit.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::MissingRequiredArgument,
                "`newunit` or `unit` must be specified either in argument or keyword arguments",
                span.clone(),
            )
        })?;
        Ok(Stmt::Open { unit, file, status })
    }

    fn lower_close(
        &mut self,
        args: &[ast::Expr],
        keywords: &[ast::Keyword],
        span: &Span,
    ) -> Result<Stmt, SemanticError> {
        if args.len() > 1 {
            return Err(SemanticError::unsupported(
                "Number of arguments cannot be more than 1 in close statement",
                span.clone(),
            ));
        }
        let mut unit = args.first().map(|e| self.lower_expr(e)).transpose()?;
        let mut iostat = None;
        let mut iomsg = None;
        let mut err = None;
        let mut status = None;
        for kw in keywords {
            match kw.name.as_str() {
                "unit" => {
                    if unit.is_some() {
                        return Err(Self::duplicate_argument("unit", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    self.expect_family(&e, Family::Integer, "unit", span)?;
                    unit = Some(e);
                }
                "iostat" => {
                    if iostat.is_some() {
                        return Err(Self::duplicate_argument("iostat", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    Self::expect_variable(&e, "iostat", span)?;
                    self.expect_family(&e, Family::Integer, "iostat", span)?;
                    iostat = Some(e);
                }
                "iomsg" => {
                    if iomsg.is_some() {
                        return Err(Self::duplicate_argument("iomsg", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    Self::expect_variable(&e, "iomsg", span)?;
                    self.expect_family(&e, Family::Character, "iomsg", span)?;
                    iomsg = Some(e);
                }
                "err" => {
                    if err.is_some() {
                        return Err(Self::duplicate_argument("err", span));
                    }
                    if !matches!(kw.value.kind, ast::ExprKind::Num(_)) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "`err` must be a literal integer",
                            span.clone(),
                        ));
                    }
                    err = Some(self.lower_expr(&kw.value)?);
                }
                "status" => {
                    if status.is_some() {
                        return Err(Self::duplicate_argument("status", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    self.expect_family(&e, Family::Character, "status", span)?;
                    status = Some(e);
                }
                other => {
                    return Err(SemanticError::new(
                        ErrorKind::InvalidKeywordArgument,
                        format!("Invalid keyword argument `{}` in close statement", other),
                        span.clone(),
                    ))
                }
            }
        }
        let unit = unit.ok_or_else(|| {
            SemanticError::new(
                ErrorKind::MissingRequiredArgument,
                "`unit` must be specified either in argument or keyword arguments",
                span.clone(),
            )
        })?;
        Ok(Stmt::Close {
            unit,
            iostat,
            iomsg,
            err,
            status,
        })
    }

    /// Read and write share one shape: two positional slots (`unit`, `fmt`,
    /// either may be `*`) plus keyword arguments.
    fn lower_read_write(
        &mut self,
        args: &[Option<ast::Expr>],
        keywords: &[ast::Keyword],
        values: &[ast::Expr],
        span: &Span,
        is_write: bool,
    ) -> Result<Stmt, SemanticError> {
        if args.len() > 2 {
            return Err(SemanticError::unsupported(
                "Number of arguments cannot be more than 2 in read/write statement",
                span.clone(),
            ));
        }
        let mut unit = match args.first() {
            Some(Some(e)) => Some(self.lower_expr(e)?),
            _ => None,
        };
        let fmt = match args.get(1) {
            Some(Some(e)) => Some(self.lower_expr(e)?),
            _ => None,
        };
        let mut iostat = None;
        let mut iomsg = None;
        let mut id = None;
        for kw in keywords {
            match kw.name.as_str() {
                "unit" => {
                    if unit.is_some() {
                        return Err(Self::duplicate_argument("unit", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    self.expect_family(&e, Family::Integer, "unit", span)?;
                    unit = Some(e);
                }
                "iostat" => {
                    if iostat.is_some() {
                        return Err(Self::duplicate_argument("iostat", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    Self::expect_variable(&e, "iostat", span)?;
                    self.expect_family(&e, Family::Integer, "iostat", span)?;
                    iostat = Some(e);
                }
                "iomsg" => {
                    if iomsg.is_some() {
                        return Err(Self::duplicate_argument("iomsg", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    Self::expect_variable(&e, "iomsg", span)?;
                    self.expect_family(&e, Family::Character, "iomsg", span)?;
                    iomsg = Some(e);
                }
                "id" => {
                    if id.is_some() {
                        return Err(Self::duplicate_argument("id", span));
                    }
                    let e = self.lower_expr(&kw.value)?;
                    self.expect_family(&e, Family::Character, "id", span)?;
                    id = Some(e);
                }
                other => {
                    return Err(SemanticError::new(
                        ErrorKind::InvalidKeywordArgument,
                        format!("Invalid keyword argument `{}` in read/write statement", other),
                        span.clone(),
                    ))
                }
            }
        }
        if unit.is_none() && args.is_empty() {
            return Err(SemanticError::new(
                ErrorKind::MissingRequiredArgument,
                "`unit` must be specified either in arguments or keyword arguments",
                span.clone(),
            ));
        }
        if fmt.is_none() && args.len() < 2 {
            return Err(SemanticError::new(
                ErrorKind::MissingRequiredArgument,
                "`fmt` must be specified either in arguments or keyword arguments",
                span.clone(),
            ));
        }
        let values = values
            .iter()
            .map(|v| self.lower_expr(v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if is_write {
            Stmt::Write {
                unit,
                fmt,
                iomsg,
                iostat,
                id,
                values,
            }
        } else {
            Stmt::Read {
                unit,
                fmt,
                iomsg,
                iostat,
                id,
                values,
            }
        })
    }

    fn lower_loop_head(
        &mut self,
        var: Option<&str>,
        start: Option<&ast::Expr>,
        end: Option<&ast::Expr>,
        increment: Option<&ast::Expr>,
        span: &Span,
    ) -> Result<DoLoopHead, SemanticError> {
        let missing = |what: &str| {
            SemanticError::new(
                ErrorKind::MissingRequiredArgument,
                format!("Do loop: {} is required", what),
                span.clone(),
            )
        };
        let var = var.ok_or_else(|| missing("loop variable"))?;
        let var = self.resolve_variable(var, span)?;
        let start = self.lower_expr(start.ok_or_else(|| missing("start condition"))?)?;
        let end = self.lower_expr(end.ok_or_else(|| missing("end condition"))?)?;
        let increment = increment.map(|e| self.lower_expr(e)).transpose()?;
        Ok(DoLoopHead {
            var,
            start,
            end,
            increment,
        })
    }

    fn integer_case_expr(&mut self, e: &ast::Expr) -> Result<Expr, SemanticError> {
        let lowered = self.lower_expr(e)?;
        if self.table.expr_type(&lowered).family() != Family::Integer {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                "Expression in case selector can only be an Integer",
                e.span.clone(),
            ));
        }
        Ok(lowered)
    }

    fn lower_select(
        &mut self,
        test: &ast::Expr,
        cases: &[ast::Case],
    ) -> Result<Stmt, SemanticError> {
        let test = self.integer_case_expr(test)?;
        let mut lowered_cases = Vec::new();
        let mut default: Option<Vec<Stmt>> = None;
        for case in cases {
            match case {
                ast::Case::Values { tests, body, span } => {
                    if tests.is_empty() {
                        return Err(SemanticError::new(
                            ErrorKind::MissingRequiredArgument,
                            "Case statement must have at least one condition",
                            span.clone(),
                        ));
                    }
                    let tests = tests
                        .iter()
                        .map(|t| self.integer_case_expr(t))
                        .collect::<Result<Vec<_>, _>>()?;
                    let body = self.lower_block(body)?;
                    lowered_cases.push(CaseStmt::Values { tests, body });
                }
                ast::Case::Range {
                    start,
                    end,
                    body,
                    span: _,
                } => {
                    let start = start
                        .as_ref()
                        .map(|e| self.integer_case_expr(e))
                        .transpose()?;
                    let end = end.as_ref().map(|e| self.integer_case_expr(e)).transpose()?;
                    let body = self.lower_block(body)?;
                    lowered_cases.push(CaseStmt::Range { start, end, body });
                }
                ast::Case::Default { body, span } => {
                    if default.is_some() {
                        return Err(SemanticError::new(
                            ErrorKind::DuplicateArgument,
                            "Default case present more than once",
                            span.clone(),
                        ));
                    }
                    default = Some(self.lower_block(body)?);
                }
            }
        }
        Ok(Stmt::Select {
            test,
            cases: lowered_cases,
            default: default.unwrap_or_default(),
        })
    }

    fn resolve_variable(&self, name: &str, span: &Span) -> Result<Expr, SemanticError> {
        let sym = self
            .table
            .resolve(self.current_scope, name)
            .ok_or_else(|| SemanticError::symbol_not_found(name, span.clone()))?;
        Ok(Expr::Var { sym })
    }

    fn expr_list(
        &mut self,
        args: &[ast::IndexArg],
        span: &Span,
    ) -> Result<Vec<Expr>, SemanticError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let value = a.end.as_ref().ok_or_else(|| {
                SemanticError::unsupported("Argument value missing", span.clone())
            })?;
            out.push(self.lower_expr(value)?);
        }
        Ok(out)
    }

    fn lower_array_indices(
        &mut self,
        args: &[ast::IndexArg],
    ) -> Result<Vec<ArrayIndex>, SemanticError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let start = a.start.as_ref().map(|e| self.lower_expr(e)).transpose()?;
            let end = a.end.as_ref().map(|e| self.lower_expr(e)).transpose()?;
            let step = a.step.as_ref().map(|e| self.lower_expr(e)).transpose()?;
            out.push(ArrayIndex { start, end, step });
        }
        Ok(out)
    }

    fn lower_expr(&mut self, e: &ast::Expr) -> Result<Expr, SemanticError> {
        match &e.kind {
            ast::ExprKind::Num(n) => common::int_literal(*n, &e.span),
            ast::ExprKind::Real(text) => Ok(common::real_literal(text)),
            ast::ExprKind::Str(s) => Ok(common::str_literal(s)),
            ast::ExprKind::Logical(b) => Ok(common::logical_literal(*b)),
            ast::ExprKind::Complex { re, im } => {
                let re = self.lower_expr(re)?;
                let im = self.lower_expr(im)?;
                Ok(common::complex_literal(self.table, re, im))
            }
            ast::ExprKind::Name(path) => self.lower_name(path, &e.span),
            ast::ExprKind::FuncCallOrArray { name, args } => {
                self.lower_func_call_or_array(name, args, &e.span)
            }
            ast::ExprKind::BinOp { op, left, right } => {
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                common::bin_op(self.table, &e.span, *op, left, right)
            }
            ast::ExprKind::Compare { op, left, right } => {
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                common::compare(self.table, &e.span, *op, left, right)
            }
            ast::ExprKind::BoolOp { op, left, right } => {
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                common::bool_op(self.table, &e.span, *op, left, right)
            }
            ast::ExprKind::UnaryOp { op, operand } => {
                let operand = self.lower_expr(operand)?;
                Ok(common::unary_op(self.table, *op, operand))
            }
            ast::ExprKind::StrOp { op, left, right } => {
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                Ok(common::str_op(self.table, *op, left, right))
            }
            ast::ExprKind::ArrayInitializer(elements) => {
                self.lower_array_initializer(elements, &e.span)
            }
            ast::ExprKind::ImpliedDoLoop {
                values,
                var,
                start,
                end,
                increment,
            } => self.lower_implied_do_loop(values, var, start, end, increment.as_deref(), &e.span),
        }
    }

    fn lower_array_initializer(
        &mut self,
        elements: &[ast::Expr],
        span: &Span,
    ) -> Result<Expr, SemanticError> {
        let mut lowered = Vec::with_capacity(elements.len());
        let mut ty: Option<Type> = None;
        for e in elements {
            let el = self.lower_expr(e)?;
            let el_ty = self.table.expr_type(&el);
            match &ty {
                None => ty = Some(el_ty),
                Some(first) => {
                    if first.family() != el_ty.family() {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            "Type mismatch in array initializer",
                            e.span.clone(),
                        ));
                    }
                }
            }
            lowered.push(el);
        }
        let ty = ty.ok_or_else(|| {
            SemanticError::unsupported("Empty array initializer", span.clone())
        })?;
        Ok(Expr::ConstantArray {
            elements: lowered,
            ty,
        })
    }

    fn lower_implied_do_loop(
        &mut self,
        values: &[ast::Expr],
        var: &str,
        start: &ast::Expr,
        end: &ast::Expr,
        increment: Option<&ast::Expr>,
        span: &Span,
    ) -> Result<Expr, SemanticError> {
        let values = values
            .iter()
            .map(|v| self.lower_expr(v))
            .collect::<Result<Vec<_>, _>>()?;
        // The loop variable must already be declared in the scope.
        let var = self.resolve_variable(var, span)?;
        let start = self.lower_expr(start)?;
        let end = self.lower_expr(end)?;
        let increment = increment.map(|e| self.lower_expr(e)).transpose()?;
        let ty = self.table.expr_type(&start);
        Ok(Expr::ImpliedDoLoop {
            values,
            var: Box::new(var),
            start: Box::new(start),
            end: Box::new(end),
            increment: increment.map(Box::new),
            ty,
        })
    }

    /// Member-access chains `a%b%c` lower left to right, each step carrying
    /// the member's type.
    fn lower_name(&mut self, path: &[String], span: &Span) -> Result<Expr, SemanticError> {
        let first = self
            .table
            .resolve(self.current_scope, &path[0])
            .ok_or_else(|| SemanticError::symbol_not_found(&path[0], span.clone()))?;
        let mut expr = Expr::Var { sym: first };
        if path.len() > 1
            && !matches!(
                self.table.symbol(self.table.get_past_external(first)),
                Symbol::Variable(_)
            )
        {
            return Err(SemanticError::new(
                ErrorKind::NotADerivedType,
                format!("'{}' is not a derived-type variable", path[0]),
                span.clone(),
            ));
        }
        for part in &path[1..] {
            let base_ty = self.table.expr_type(&expr);
            let (member, ty) = self.resolve_member(&base_ty, part, span)?;
            expr = Expr::DerivedRef {
                base: Box::new(expr),
                member,
                ty,
            };
        }
        Ok(expr)
    }

    /// Resolves one member-access step and rewrites the member type when
    /// the member's derived type is only reachable through an external
    /// symbol: the rewrite points it at a cached local external named
    /// `1_<module>_<type>`.
    fn resolve_member(
        &mut self,
        base_ty: &Type,
        member_name: &str,
        span: &Span,
    ) -> Result<(SymbolId, Type), SemanticError> {
        let def = match base_ty {
            Type::Derived { def, .. } | Type::DerivedPointer { def, .. } | Type::Class { def, .. } => {
                *def
            }
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NotADerivedType,
                    "Member access requires a derived-type variable",
                    span.clone(),
                ))
            }
        };
        let dt_id = self.table.get_past_external(def);
        let (dt_scope, dt_name) = match self.table.symbol(dt_id) {
            Symbol::DerivedType(dt) => (dt.scope, dt.name.clone()),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NotADerivedType,
                    "Member access requires a derived-type variable",
                    span.clone(),
                ))
            }
        };
        let member = self.table.lookup_local(dt_scope, member_name).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NoSuchMember,
                format!(
                    "Derived type '{}' has no member named '{}'",
                    dt_name, member_name
                ),
                span.clone(),
            )
        })?;
        let member_ty = match self.table.symbol(member) {
            Symbol::Variable(v) => v.ty.clone(),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NoSuchMember,
                    format!("'{}' is not a data member", member_name),
                    span.clone(),
                ))
            }
        };
        let member_ty = self.retarget_member_type(member_ty);
        Ok((member, member_ty))
    }

    fn retarget_member_type(&mut self, ty: Type) -> Type {
        let Type::Derived { def, dims } = ty else {
            return ty;
        };
        let Symbol::External(es) = self.table.symbol(def) else {
            return Type::Derived { def, dims };
        };
        let target = es.target;
        let module_name = es.module_name.clone();
        let type_name = self.table.symbol_name(target).to_string();
        let mangled = format!("1_{}_{}", module_name, type_name);
        let local = match self.table.lookup_local(self.current_scope, &mangled) {
            Some(id) => id,
            None => {
                // A plain import of the type that already forwards to the
                // same definition is good enough.
                let reuse = self
                    .table
                    .lookup_local(self.current_scope, &type_name)
                    .filter(|&cand| {
                        matches!(self.table.symbol(cand), Symbol::External(e) if e.target == target)
                    });
                match reuse {
                    Some(id) => id,
                    None => {
                        let id = self.table.add_symbol(Symbol::External(ExternalSymbol {
                            name: mangled.clone(),
                            scope: self.current_scope,
                            target,
                            module_name,
                            original_name: type_name,
                            access: Access::Public,
                        }));
                        self.table.bind(self.current_scope, &mangled, id);
                        id
                    }
                }
            }
        };
        Type::Derived { def: local, dims }
    }

    fn function_return_type(&self, sym: SymbolId, span: &Span) -> Result<Type, SemanticError> {
        match self.table.symbol(self.table.get_past_external(sym)) {
            Symbol::Function(f) => match self.table.symbol(f.return_var) {
                Symbol::Variable(v) => Ok(v.ty.clone()),
                _ => Err(SemanticError::unsupported(
                    "Function has no return variable",
                    span.clone(),
                )),
            },
            _ => Err(SemanticError::unsupported(
                "Symbol is not a function",
                span.clone(),
            )),
        }
    }

    /// Call-or-index ambiguity resolves by what the name is bound to:
    /// a function becomes a call, a variable becomes an array reference.
    fn lower_func_call_or_array(
        &mut self,
        name: &str,
        args: &[ast::IndexArg],
        span: &Span,
    ) -> Result<Expr, SemanticError> {
        let sym = match self.table.resolve(self.current_scope, name) {
            Some(v) => v,
            None => self.resolve_unknown_function(name, span)?,
        };
        enum Callee {
            Function,
            ArrayVar(Type),
        }
        let callee = match self.table.symbol(self.table.get_past_external(sym)) {
            Symbol::Function(_) => Callee::Function,
            Symbol::Variable(v) => Callee::ArrayVar(v.ty.clone()),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    format!("Symbol '{}' is not a function or an array", name),
                    span.clone(),
                ))
            }
        };
        match callee {
            Callee::Function => {
                let ty = self.function_return_type(sym, span)?;
                let args = self.expr_list(args, span)?;
                Ok(Expr::FunctionCall {
                    sym,
                    original: None,
                    args,
                    ty,
                })
            }
            Callee::ArrayVar(ty) => {
                let args = self.lower_array_indices(args)?;
                Ok(Expr::ArrayRef { sym, args, ty })
            }
        }
    }

    /// An undeclared identifier in call position falls back to the
    /// intrinsic tables: the intrinsic-procedures map loads its owning
    /// module on demand; `present` and the elementary math functions are
    /// synthesized straight into the global scope.
    fn resolve_unknown_function(
        &mut self,
        name: &str,
        span: &Span,
    ) -> Result<SymbolId, SemanticError> {
        let folded = name.to_ascii_lowercase();
        if let Some(module_name) = intrinsic_module_of(&folded) {
            return self.load_intrinsic_function(&folded, module_name, span);
        }
        if folded == "present" {
            return Ok(self.synthesize_intrinsic(&folded, None, Type::logical(4), Abi::Source));
        }
        if MATH_INTRINSICS.contains(&folded.as_str()) {
            return Ok(self.synthesize_intrinsic(
                &folded,
                Some(Type::real(4)),
                Type::real(4),
                Abi::Intrinsic,
            ));
        }
        Err(SemanticError::new(
            ErrorKind::SymbolNotFound,
            format!("Function or array '{}' not declared", name),
            span.clone(),
        ))
    }

    fn load_intrinsic_function(
        &mut self,
        remote: &str,
        module_name: &'static str,
        span: &Span,
    ) -> Result<SymbolId, SemanticError> {
        let mid = self
            .loader
            .load(self.table, self.global_scope, module_name, span, true)?;
        let module_scope = match self.table.symbol(mid) {
            Symbol::Module(m) => m.scope,
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NotAModule,
                    format!("'{}' is not a module", module_name),
                    span.clone(),
                ))
            }
        };
        let target = self
            .table
            .lookup_local(module_scope, remote)
            .ok_or_else(|| {
                SemanticError::new(
                    ErrorKind::SymbolNotFound,
                    format!(
                        "The symbol '{}' not found in the module '{}'",
                        remote, module_name
                    ),
                    span.clone(),
                )
            })?;
        let ext = self.table.add_symbol(Symbol::External(ExternalSymbol {
            name: remote.to_string(),
            scope: self.current_scope,
            target,
            module_name: module_name.to_string(),
            original_name: remote.to_string(),
            access: Access::Private,
        }));
        self.table.bind(self.current_scope, remote, ext);
        if let Some(mid) = self.current_module {
            if let Symbol::Module(m) = self.table.symbol_mut(mid) {
                if !m.dependencies.iter().any(|d| d == module_name) {
                    m.dependencies.push(module_name.to_string());
                }
            }
        }
        Ok(ext)
    }

    fn synthesize_intrinsic(
        &mut self,
        name: &str,
        arg_ty: Option<Type>,
        ret_ty: Type,
        abi: Abi,
    ) -> SymbolId {
        let fn_scope = self.table.new_scope(self.global_scope);
        let mut args = Vec::new();
        if let Some(arg_ty) = arg_ty {
            let arg = self.table.add_symbol(Symbol::Variable(Variable {
                name: "x".to_string(),
                scope: fn_scope,
                intent: Intent::In,
                storage: Storage::Default,
                ty: arg_ty,
                access: Access::Public,
                presence: Presence::Required,
                initializer: None,
                value: None,
            }));
            self.table.bind(fn_scope, "x", arg);
            args.push(Expr::Var { sym: arg });
        }
        let ret = self.table.add_symbol(Symbol::Variable(Variable {
            name: name.to_string(),
            scope: fn_scope,
            intent: Intent::ReturnVar,
            storage: Storage::Default,
            ty: ret_ty,
            access: Access::Public,
            presence: Presence::Required,
            initializer: None,
            value: None,
        }));
        self.table.bind(fn_scope, name, ret);
        let f = self.table.add_symbol(Symbol::Function(Function {
            name: name.to_string(),
            scope: fn_scope,
            args,
            body: Vec::new(),
            return_var: ret,
            abi,
            access: Access::Public,
            deftype: Deftype::Implementation,
        }));
        self.table.bind(self.global_scope, name, f);
        f
    }

    /// Subroutine-call resolution: dispatch on the resolved symbol variant,
    /// selecting the specific procedure for generics and materializing a
    /// cached local external when dispatch goes through an imported
    /// generic.
    fn resolve_call(
        &mut self,
        name: &str,
        member: Option<&str>,
        args: &[ast::IndexArg],
        span: &Span,
    ) -> Result<Stmt, SemanticError> {
        let original_sym = match member {
            Some(obj) => self.resolve_derived_type_proc(obj, name, span)?,
            None => self.table.resolve(self.current_scope, name).ok_or_else(|| {
                SemanticError::new(
                    ErrorKind::SymbolNotFound,
                    format!("Subroutine '{}' not declared", name),
                    span.clone(),
                )
            })?,
        };
        let args = self.expr_list(args, span)?;
        let (sym, original) = match self.table.symbol(original_sym) {
            Symbol::Subroutine(_) => (original_sym, None),
            Symbol::Generic(g) => {
                let procs = g.procs.clone();
                let idx = self.select_generic_procedure(&args, &procs, span)?;
                (procs[idx], Some(original_sym))
            }
            Symbol::ClassProcedure(cp) => {
                let proc_name = cp.proc_name.clone();
                let f = self
                    .table
                    .resolve(self.current_scope, &proc_name)
                    .ok_or_else(|| SemanticError::symbol_not_found(&proc_name, span.clone()))?;
                (f, Some(original_sym))
            }
            Symbol::External(es) => {
                let target = es.target;
                let local_name = es.name.clone();
                let ext_module = es.module_name.clone();
                match self.table.symbol(target) {
                    Symbol::Generic(g) => {
                        let procs = g.procs.clone();
                        let idx = self.select_generic_procedure(&args, &procs, span)?;
                        let specific = procs[idx];
                        if !matches!(self.table.symbol(specific), Symbol::Subroutine(_)) {
                            return Err(SemanticError::unsupported(
                                "ExternalSymbol must point to a subroutine",
                                span.clone(),
                            ));
                        }
                        let specific_name = self.table.symbol_name(specific).to_string();
                        let mangled = format!("{}@{}", local_name, specific_name);
                        let final_sym =
                            match self.table.lookup_local(self.current_scope, &mangled) {
                                Some(cached) => cached,
                                None => {
                                    let id = self.table.add_symbol(Symbol::External(
                                        ExternalSymbol {
                                            name: mangled.clone(),
                                            scope: self.current_scope,
                                            target: specific,
                                            module_name: ext_module,
                                            original_name: specific_name,
                                            access: Access::Private,
                                        },
                                    ));
                                    self.table.bind(self.current_scope, &mangled, id);
                                    id
                                }
                            };
                        (final_sym, Some(original_sym))
                    }
                    Symbol::Subroutine(_) => (original_sym, None),
                    _ => {
                        return Err(SemanticError::unsupported(
                            "ExternalSymbol must point to a subroutine",
                            span.clone(),
                        ))
                    }
                }
            }
            _ => {
                return Err(SemanticError::unsupported(
                    format!("'{}' is not a subroutine", name),
                    span.clone(),
                ))
            }
        };
        Ok(Stmt::SubroutineCall {
            sym,
            original,
            args,
        })
    }

    /// Generic dispatch matches the actual argument types against each
    /// specific procedure's formals pairwise by type family only. Kinds do
    /// not participate in the selection.
    fn select_generic_procedure(
        &self,
        args: &[Expr],
        procs: &[SymbolId],
        span: &Span,
    ) -> Result<usize, SemanticError> {
        for (i, &p) in procs.iter().enumerate() {
            match self.table.symbol(self.table.get_past_external(p)) {
                Symbol::Subroutine(sub) => {
                    if self.argument_families_match(args, &sub.args) {
                        return Ok(i);
                    }
                }
                _ => {
                    return Err(SemanticError::unsupported(
                        "Only subroutines are supported in a generic procedure",
                        span.clone(),
                    ))
                }
            }
        }
        Err(SemanticError::new(
            ErrorKind::NoGenericMatch,
            "Arguments do not match any specific procedure",
            span.clone(),
        ))
    }

    fn argument_families_match(&self, actual: &[Expr], formal: &[Expr]) -> bool {
        actual.len() == formal.len()
            && actual.iter().zip(formal).all(|(a, f)| {
                self.table.expr_type(a).family() == self.table.expr_type(f).family()
            })
    }

    /// Resolves `obj%proc` for a call statement: the receiver must be a
    /// derived-type variable and the bound name is looked up in the type's
    /// scope.
    fn resolve_derived_type_proc(
        &self,
        obj: &str,
        proc: &str,
        span: &Span,
    ) -> Result<SymbolId, SemanticError> {
        let v = self
            .table
            .resolve(self.current_scope, obj)
            .ok_or_else(|| SemanticError::symbol_not_found(obj, span.clone()))?;
        let not_derived = || {
            SemanticError::new(
                ErrorKind::NotADerivedType,
                format!("Variable '{}' is not a derived type", obj),
                span.clone(),
            )
        };
        let Symbol::Variable(var) = self.table.symbol(self.table.get_past_external(v)) else {
            return Err(not_derived());
        };
        let def = match &var.ty {
            Type::Derived { def, .. } | Type::DerivedPointer { def, .. } | Type::Class { def, .. } => {
                *def
            }
            _ => return Err(not_derived()),
        };
        let dt_scope = match self.table.symbol(self.table.get_past_external(def)) {
            Symbol::DerivedType(dt) => dt.scope,
            _ => return Err(not_derived()),
        };
        self.table.lookup_local(dt_scope, proc).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NoSuchMember,
                format!("Variable '{}' has no member named '{}'", obj, proc),
                span.clone(),
            )
        })
    }
}
