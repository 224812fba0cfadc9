//! Pass 1: walks program units and builds the symbol tables.
//!
//! Statement bodies are not lowered here; only declarations, dummy
//! arguments, return variables, `use` imports and the deferred generic and
//! type-bound procedure sets. Initializer and kind expressions are lowered
//! because declared types may depend on named constants.

use std::collections::HashMap;

use indexmap::IndexMap;
use log::trace;

use crate::ast;
use crate::errors::{ErrorKind, SemanticError};
use crate::loader::ModuleLoader;
use crate::sema::{cast, common, extract_kind, intrinsic_module_of};
use crate::sir::ClassProcedure;
use crate::sir::{
    expr_value, Abi, Access, Deftype, DerivedType, Dimension, Expr, Function, GenericProcedure,
    Intent, Module, Presence, Program, Storage, Subroutine, Symbol, Type, Variable,
};
use crate::symtab::{ScopeId, SymbolId, SymbolTable};
use crate::Span;

pub(crate) struct SymbolCollector<'a> {
    table: &'a mut SymbolTable,
    loader: &'a mut dyn ModuleLoader,
    current_scope: ScopeId,
    generic_procedures: IndexMap<String, Vec<String>>,
    class_procedures: IndexMap<String, IndexMap<String, String>>,
    default_access: Access,
    assigned_access: HashMap<String, Access>,
    assigned_presence: HashMap<String, Presence>,
    module_dependencies: Vec<String>,
    in_module: bool,
    in_interface: bool,
    procedure_args: Vec<String>,
}

impl<'a> SymbolCollector<'a> {
    pub(crate) fn new(
        table: &'a mut SymbolTable,
        loader: &'a mut dyn ModuleLoader,
        global_scope: ScopeId,
    ) -> Self {
        Self {
            table,
            loader,
            current_scope: global_scope,
            generic_procedures: IndexMap::new(),
            class_procedures: IndexMap::new(),
            default_access: Access::Public,
            assigned_access: HashMap::new(),
            assigned_presence: HashMap::new(),
            module_dependencies: Vec::new(),
            in_module: false,
            in_interface: false,
            procedure_args: Vec::new(),
        }
    }

    pub(crate) fn walk_unit(
        mut self,
        unit: &ast::TranslationUnit,
    ) -> Result<Vec<SymbolId>, SemanticError> {
        let mut items = Vec::with_capacity(unit.items.len());
        for item in &unit.items {
            items.push(self.visit_unit(item)?);
        }
        Ok(items)
    }

    fn visit_unit(&mut self, u: &ast::ProgramUnit) -> Result<SymbolId, SemanticError> {
        match u {
            ast::ProgramUnit::Program(p) => self.visit_program(p),
            ast::ProgramUnit::Module(m) => self.visit_module(m),
            ast::ProgramUnit::Subroutine(s) => self.visit_subroutine(s),
            ast::ProgramUnit::Function(f) => self.visit_function(f),
        }
    }

    fn visit_module(&mut self, m: &ast::Module) -> Result<SymbolId, SemanticError> {
        trace!("collecting module {}", m.name);
        let parent = self.current_scope;
        self.current_scope = self.table.new_scope(parent);
        self.module_dependencies.clear();
        self.generic_procedures.clear();
        self.default_access = Access::Public;
        self.assigned_access.clear();
        self.assigned_presence.clear();
        self.in_module = true;
        for u in &m.uses {
            self.visit_use(u)?;
        }
        for d in &m.decls {
            self.visit_decl(d)?;
        }
        for c in &m.contains {
            self.visit_unit(c)?;
        }
        self.materialize_generic_procedures(&m.span)?;
        self.materialize_class_procedures(&m.span)?;
        let id = self.table.add_symbol(Symbol::Module(Module {
            name: m.name.clone(),
            scope: self.current_scope,
            dependencies: std::mem::take(&mut self.module_dependencies),
            intrinsic: false,
        }));
        self.table.insert(parent, &m.name, id, &m.span)?;
        self.current_scope = parent;
        self.in_module = false;
        Ok(id)
    }

    fn visit_program(&mut self, p: &ast::Program) -> Result<SymbolId, SemanticError> {
        trace!("collecting program {}", p.name);
        let parent = self.current_scope;
        self.current_scope = self.table.new_scope(parent);
        self.module_dependencies.clear();
        self.default_access = Access::Public;
        self.assigned_access.clear();
        self.assigned_presence.clear();
        for u in &p.uses {
            self.visit_use(u)?;
        }
        for d in &p.decls {
            self.visit_decl(d)?;
        }
        for c in &p.contains {
            self.visit_unit(c)?;
        }
        let id = self.table.add_symbol(Symbol::Program(Program {
            name: p.name.clone(),
            scope: self.current_scope,
            dependencies: std::mem::take(&mut self.module_dependencies),
            body: Vec::new(),
        }));
        self.table.insert(parent, &p.name, id, &p.span)?;
        self.current_scope = parent;
        Ok(id)
    }

    fn visit_subroutine(&mut self, s: &ast::Subroutine) -> Result<SymbolId, SemanticError> {
        let parent = self.current_scope;
        self.current_scope = self.table.new_scope(parent);
        let saved_args = std::mem::replace(&mut self.procedure_args, s.args.clone());
        for d in &s.decls {
            self.visit_decl(d)?;
        }
        for c in &s.contains {
            self.visit_unit(c)?;
        }
        let args = self.resolve_dummy_args(&s.args, &s.span)?;
        let access = self.declared_access(&s.name);
        let deftype = if self.in_interface {
            Deftype::Interface
        } else {
            Deftype::Implementation
        };
        let id = self.table.add_symbol(Symbol::Subroutine(Subroutine {
            name: s.name.clone(),
            scope: self.current_scope,
            args,
            body: Vec::new(),
            abi: Abi::Source,
            access,
            deftype,
        }));
        self.table.insert(parent, &s.name, id, &s.span)?;
        self.current_scope = parent;
        self.procedure_args = saved_args;
        Ok(id)
    }

    fn visit_function(&mut self, f: &ast::Function) -> Result<SymbolId, SemanticError> {
        let parent = self.current_scope;
        self.current_scope = self.table.new_scope(parent);
        let saved_args = std::mem::replace(&mut self.procedure_args, f.args.clone());
        for d in &f.decls {
            self.visit_decl(d)?;
        }
        for c in &f.contains {
            self.visit_unit(c)?;
        }
        let args = self.resolve_dummy_args(&f.args, &f.span)?;

        // The result variable is either the explicit result(...) name or the
        // function name itself; its type comes from the prefix or from a
        // local declaration, never both.
        let return_var_name = f.result.clone().unwrap_or_else(|| f.name.clone());
        let return_var = match self.table.lookup_local(self.current_scope, &return_var_name) {
            None => {
                let prefix = f.prefix.as_ref().ok_or_else(|| {
                    SemanticError::unsupported("Return type not specified", f.span.clone())
                })?;
                let ty = self.build_type(prefix, Vec::new(), false, &f.span)?;
                if !matches!(
                    ty.family(),
                    crate::sir::Family::Integer
                        | crate::sir::Family::Real
                        | crate::sir::Family::Complex
                        | crate::sir::Family::Logical
                ) {
                    return Err(SemanticError::unsupported(
                        "Return type not supported",
                        f.span.clone(),
                    ));
                }
                let id = self.table.add_symbol(Symbol::Variable(Variable {
                    name: return_var_name.clone(),
                    scope: self.current_scope,
                    intent: Intent::ReturnVar,
                    storage: Storage::Default,
                    ty,
                    access: Access::Public,
                    presence: Presence::Required,
                    initializer: None,
                    value: None,
                }));
                self.table.bind(self.current_scope, &return_var_name, id);
                id
            }
            Some(id) => {
                if f.prefix.is_some() {
                    return Err(SemanticError::new(
                        ErrorKind::DuplicateReturnType,
                        "Cannot specify the return type twice",
                        f.span.clone(),
                    ));
                }
                match self.table.symbol_mut(id) {
                    Symbol::Variable(v) => v.intent = Intent::ReturnVar,
                    _ => {
                        return Err(SemanticError::unsupported(
                            format!("Result name '{}' is not a variable", return_var_name),
                            f.span.clone(),
                        ))
                    }
                }
                id
            }
        };

        let access = self.declared_access(&f.name);
        let deftype = if self.in_interface {
            Deftype::Interface
        } else {
            Deftype::Implementation
        };
        let id = self.table.add_symbol(Symbol::Function(Function {
            name: f.name.clone(),
            scope: self.current_scope,
            args,
            body: Vec::new(),
            return_var,
            abi: Abi::Source,
            access,
            deftype,
        }));
        self.table.insert(parent, &f.name, id, &f.span)?;
        self.current_scope = parent;
        self.procedure_args = saved_args;
        Ok(id)
    }

    fn resolve_dummy_args(
        &self,
        names: &[String],
        span: &Span,
    ) -> Result<Vec<Expr>, SemanticError> {
        let mut args = Vec::with_capacity(names.len());
        for name in names {
            let sym = self
                .table
                .lookup_local(self.current_scope, name)
                .ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::SymbolNotFound,
                        format!("Dummy argument '{}' not defined", name),
                        span.clone(),
                    )
                })?;
            args.push(Expr::Var { sym });
        }
        Ok(args)
    }

    fn declared_access(&self, name: &str) -> Access {
        self.assigned_access
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_access)
    }

    fn visit_decl(&mut self, d: &ast::Decl) -> Result<(), SemanticError> {
        match d {
            ast::Decl::Declaration(decl) => self.visit_declaration(decl),
            ast::Decl::DerivedType(dt) => self.visit_derived_type(dt),
            ast::Decl::Interface(i) => self.visit_interface(i),
        }
    }

    fn visit_derived_type(&mut self, dt: &ast::DerivedType) -> Result<(), SemanticError> {
        let parent = self.current_scope;
        self.current_scope = self.table.new_scope(parent);
        for d in &dt.decls {
            self.visit_declaration(d)?;
        }
        for bp in &dt.bound {
            self.class_procedures
                .entry(dt.name.clone())
                .or_default()
                .insert(bp.name.clone(), bp.proc.clone());
        }
        let id = self.table.add_symbol(Symbol::DerivedType(DerivedType {
            name: dt.name.clone(),
            scope: self.current_scope,
            abi: Abi::Source,
            access: self.default_access,
        }));
        self.current_scope = parent;
        self.table.insert(parent, &dt.name, id, &dt.span)?;
        Ok(())
    }

    fn visit_interface(&mut self, i: &ast::Interface) -> Result<(), SemanticError> {
        match &i.header {
            ast::InterfaceHeader::Generic { name, procedures } => {
                self.generic_procedures
                    .insert(name.clone(), procedures.clone());
                Ok(())
            }
            ast::InterfaceHeader::Block { units } => {
                self.in_interface = true;
                let result = units.iter().try_for_each(|u| self.visit_unit(u).map(drop));
                self.in_interface = false;
                result
            }
        }
    }

    /// Deferred generic sets collected from interface blocks become
    /// GenericProcedure symbols once every specific procedure exists.
    fn materialize_generic_procedures(&mut self, span: &Span) -> Result<(), SemanticError> {
        let generics = std::mem::take(&mut self.generic_procedures);
        for (name, proc_names) in generics {
            let mut procs = Vec::with_capacity(proc_names.len());
            for pname in &proc_names {
                let id = self
                    .table
                    .resolve(self.current_scope, pname)
                    .ok_or_else(|| SemanticError::symbol_not_found(pname, span.clone()))?;
                procs.push(id);
            }
            let id = self.table.add_symbol(Symbol::Generic(GenericProcedure {
                name: name.clone(),
                scope: self.current_scope,
                procs,
                access: Access::Public,
            }));
            self.table.bind(self.current_scope, &name, id);
        }
        Ok(())
    }

    /// Type-bound procedures recorded while visiting derived types are
    /// attached into the type's own scope.
    fn materialize_class_procedures(&mut self, span: &Span) -> Result<(), SemanticError> {
        let class_procs = std::mem::take(&mut self.class_procedures);
        for (type_name, bindings) in class_procs {
            let dt_id = self
                .table
                .lookup_local(self.current_scope, &type_name)
                .ok_or_else(|| SemanticError::symbol_not_found(&type_name, span.clone()))?;
            let dt_scope = match self.table.symbol(dt_id) {
                Symbol::DerivedType(dt) => dt.scope,
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::NotADerivedType,
                        format!("'{}' is not a derived type", type_name),
                        span.clone(),
                    ))
                }
            };
            for (bound_name, proc_name) in bindings {
                let proc = self
                    .table
                    .lookup_local(self.current_scope, &proc_name)
                    .ok_or_else(|| SemanticError::symbol_not_found(&proc_name, span.clone()))?;
                let id = self
                    .table
                    .add_symbol(Symbol::ClassProcedure(ClassProcedure {
                        name: bound_name.clone(),
                        proc_name,
                        proc,
                        abi: Abi::Source,
                    }));
                self.table.bind(dt_scope, &bound_name, id);
            }
        }
        Ok(())
    }

    fn visit_use(&mut self, u: &ast::Use) -> Result<(), SemanticError> {
        if !self.module_dependencies.contains(&u.module) {
            self.module_dependencies.push(u.module.clone());
        }
        let lookup_scope = self
            .table
            .scope(self.current_scope)
            .parent
            .unwrap_or(self.current_scope);
        let mid = match self.table.resolve(lookup_scope, &u.module) {
            Some(id) => id,
            None => self
                .loader
                .load(self.table, lookup_scope, &u.module, &u.span, false)?,
        };
        let (module_scope, module_name) = match self.table.symbol(mid) {
            Symbol::Module(m) => (m.scope, m.name.clone()),
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::NotAModule,
                    format!("The symbol '{}' must be a module", u.module),
                    u.span.clone(),
                ))
            }
        };

        if u.only.is_empty() {
            // use m: import every public symbol. Externals found in the
            // module are repacked so the import points at the ultimate
            // target rather than forming a chain.
            for (bound_name, sid) in self.table.entries(module_scope) {
                let ext = match self.table.symbol(sid) {
                    Symbol::External(es) => crate::sir::ExternalSymbol {
                        name: bound_name.clone(),
                        scope: self.current_scope,
                        target: es.target,
                        module_name: es.module_name.clone(),
                        original_name: es.original_name.clone(),
                        access: es.access,
                    },
                    Symbol::Variable(v) if v.access == Access::Private => continue,
                    Symbol::Function(f) if f.access == Access::Private => continue,
                    Symbol::Subroutine(s) if s.access == Access::Private => continue,
                    Symbol::DerivedType(d) if d.access == Access::Private => continue,
                    Symbol::Generic(g) if g.access == Access::Private => continue,
                    Symbol::Variable(_)
                    | Symbol::Function(_)
                    | Symbol::Subroutine(_)
                    | Symbol::DerivedType(_)
                    | Symbol::Generic(_) => crate::sir::ExternalSymbol {
                        name: bound_name.clone(),
                        scope: self.current_scope,
                        target: sid,
                        module_name: module_name.clone(),
                        original_name: self.table.symbol_name(sid).to_string(),
                        access: self.default_access,
                    },
                    _ => continue,
                };
                let ext_id = self.table.add_symbol(Symbol::External(ext));
                self.table.bind(self.current_scope, &bound_name, ext_id);
            }
        } else {
            // use m, only: x, y => z
            for us in &u.only {
                let local = us.local.clone().unwrap_or_else(|| us.remote.clone());
                let sid = self
                    .table
                    .lookup_local(module_scope, &us.remote)
                    .ok_or_else(|| {
                        SemanticError::new(
                            ErrorKind::SymbolNotFound,
                            format!(
                                "The symbol '{}' not found in the module '{}'",
                                us.remote, u.module
                            ),
                            u.span.clone(),
                        )
                    })?;
                let ext = match self.table.symbol(sid) {
                    Symbol::External(es) => crate::sir::ExternalSymbol {
                        name: local.clone(),
                        scope: self.current_scope,
                        target: es.target,
                        module_name: es.module_name.clone(),
                        original_name: es.original_name.clone(),
                        access: es.access,
                    },
                    Symbol::Variable(_)
                    | Symbol::Function(_)
                    | Symbol::Subroutine(_)
                    | Symbol::DerivedType(_)
                    | Symbol::Generic(_) => crate::sir::ExternalSymbol {
                        name: local.clone(),
                        scope: self.current_scope,
                        target: sid,
                        module_name: module_name.clone(),
                        original_name: self.table.symbol_name(sid).to_string(),
                        access: self.default_access,
                    },
                    _ => {
                        return Err(SemanticError::unsupported(
                            format!("'{}' cannot be imported with 'use'", us.remote),
                            u.span.clone(),
                        ))
                    }
                };
                let ext_id = self.table.add_symbol(Symbol::External(ext));
                self.table.insert(self.current_scope, &local, ext_id, &u.span)?;
            }
        }
        Ok(())
    }

    fn visit_declaration(&mut self, d: &ast::Declaration) -> Result<(), SemanticError> {
        let Some(type_spec) = &d.type_spec else {
            return self.visit_attribute_declaration(d);
        };

        for entity in &d.entities {
            if self
                .table
                .lookup_local(self.current_scope, &entity.name)
                .is_some()
                && self.table.scope(self.current_scope).parent.is_some()
            {
                // Re-declaring a global-scope symbol is allowed; anywhere
                // else it is an error.
                return Err(SemanticError::already_defined(&entity.name, d.span.clone()));
            }

            let mut access = self.declared_access(&entity.name);
            let mut presence = self
                .assigned_presence
                .get(&entity.name.to_ascii_lowercase())
                .copied()
                .unwrap_or(Presence::Required);
            let mut storage = Storage::Default;
            let mut pointer = false;
            let mut intent = if self
                .procedure_args
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&entity.name))
            {
                Intent::Unspecified
            } else {
                Intent::Local
            };
            let mut dims: Option<Vec<Dimension>> = None;

            for attr in &d.attributes {
                match attr {
                    ast::Attr::Private => access = Access::Private,
                    ast::Attr::Public => access = Access::Public,
                    ast::Attr::Parameter => storage = Storage::Parameter,
                    ast::Attr::Allocatable => storage = Storage::Allocatable,
                    ast::Attr::Pointer => pointer = true,
                    ast::Attr::Optional => presence = Presence::Optional,
                    ast::Attr::Target => {}
                    ast::Attr::Intent(i) => {
                        intent = match i {
                            ast::IntentAttr::In => Intent::In,
                            ast::IntentAttr::Out => Intent::Out,
                            ast::IntentAttr::InOut => Intent::InOut,
                        }
                    }
                    ast::Attr::Dimension(ds) => {
                        if dims.is_some() {
                            return Err(SemanticError::new(
                                ErrorKind::DuplicateArgument,
                                "Dimensions specified twice",
                                d.span.clone(),
                            ));
                        }
                        dims = Some(self.lower_dims(ds)?);
                    }
                    ast::Attr::Save => {
                        return Err(SemanticError::unsupported(
                            "Attribute type not implemented yet",
                            d.span.clone(),
                        ))
                    }
                }
            }

            if !entity.dims.is_empty() {
                if dims.is_some() {
                    return Err(SemanticError::new(
                        ErrorKind::DuplicateArgument,
                        "Cannot specify dimensions both ways",
                        d.span.clone(),
                    ));
                }
                dims = Some(self.lower_dims(&entity.dims)?);
            }

            let ty = self.build_type(type_spec, dims.unwrap_or_default(), pointer, &d.span)?;

            let (initializer, value) = match &entity.initializer {
                Some(init) => {
                    let lowered = self.lower_expr(init)?;
                    let init_ty = self.table.expr_type(&lowered);
                    let lowered = cast::coerce(&init.span, lowered, &init_ty, &ty)?;
                    let value = expr_value(&lowered);
                    (Some(lowered), value)
                }
                None => (None, None),
            };

            let id = self.table.add_symbol(Symbol::Variable(Variable {
                name: entity.name.clone(),
                scope: self.current_scope,
                intent,
                storage,
                ty,
                access,
                presence,
                initializer,
                value,
            }));
            self.table.bind(self.current_scope, &entity.name, id);
        }
        Ok(())
    }

    /// Attribute-only declarations either flip scope defaults (`private`)
    /// or tag the listed names for when their typed declaration arrives.
    fn visit_attribute_declaration(&mut self, d: &ast::Declaration) -> Result<(), SemanticError> {
        if d.attributes.is_empty() {
            return Err(SemanticError::unsupported(
                "No attribute specified",
                d.span.clone(),
            ));
        }
        if d.attributes.len() > 1 {
            return Err(SemanticError::unsupported(
                "Only one attribute can be specified if type is missing",
                d.span.clone(),
            ));
        }
        let attr = &d.attributes[0];
        if d.entities.is_empty() {
            match attr {
                ast::Attr::Private => self.default_access = Access::Private,
                ast::Attr::Public => {}
                ast::Attr::Save if self.in_module => {
                    // Module variables implicitly carry save already.
                }
                _ => {
                    return Err(SemanticError::unsupported(
                        "Attribute declaration not supported yet",
                        d.span.clone(),
                    ))
                }
            }
        } else {
            for entity in &d.entities {
                let folded = entity.name.to_ascii_lowercase();
                match attr {
                    ast::Attr::Private => {
                        self.assigned_access.insert(folded, Access::Private);
                    }
                    ast::Attr::Public => {
                        self.assigned_access.insert(folded, Access::Public);
                    }
                    ast::Attr::Optional => {
                        self.assigned_presence.insert(folded, Presence::Optional);
                    }
                    _ => {
                        return Err(SemanticError::unsupported(
                            "Attribute declaration not supported",
                            d.span.clone(),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn lower_dims(&mut self, dims: &[ast::Dim]) -> Result<Vec<Dimension>, SemanticError> {
        let mut out = Vec::with_capacity(dims.len());
        for d in dims {
            let start = d.start.as_ref().map(|e| self.lower_expr(e)).transpose()?;
            let end = d.end.as_ref().map(|e| self.lower_expr(e)).transpose()?;
            out.push(Dimension { start, end });
        }
        Ok(out)
    }

    fn build_type(
        &mut self,
        spec: &ast::TypeSpec,
        dims: Vec<Dimension>,
        pointer: bool,
        span: &Span,
    ) -> Result<Type, SemanticError> {
        let kind = match &spec.kind {
            Some(e) => {
                let lowered = self.lower_expr(e)?;
                Some(extract_kind(self.table, &lowered, span)?)
            }
            None => None,
        };
        let ty = match spec.base {
            ast::BaseType::Integer => {
                let kind = kind.unwrap_or(4);
                if pointer {
                    Type::IntegerPointer { kind, dims }
                } else {
                    Type::Integer { kind, dims }
                }
            }
            ast::BaseType::Real => {
                let kind = kind.unwrap_or(4);
                if pointer {
                    Type::RealPointer { kind, dims }
                } else {
                    Type::Real { kind, dims }
                }
            }
            ast::BaseType::Complex => {
                let kind = kind.unwrap_or(4);
                if pointer {
                    Type::ComplexPointer { kind, dims }
                } else {
                    Type::Complex { kind, dims }
                }
            }
            ast::BaseType::Logical => {
                if pointer {
                    Type::LogicalPointer { kind: 4, dims }
                } else {
                    Type::Logical { kind: 4, dims }
                }
            }
            ast::BaseType::Character => {
                let kind = kind.unwrap_or(8);
                if pointer {
                    Type::CharacterPointer { kind, dims }
                } else {
                    Type::Character { kind, dims }
                }
            }
            ast::BaseType::Type | ast::BaseType::Class => {
                let name = spec.name.as_deref().ok_or_else(|| {
                    SemanticError::unsupported("Derived type name missing", span.clone())
                })?;
                let def = self.table.resolve(self.current_scope, name).ok_or_else(|| {
                    SemanticError::new(
                        ErrorKind::SymbolNotFound,
                        format!("Derived type '{}' not declared", name),
                        span.clone(),
                    )
                })?;
                if !matches!(
                    self.table.symbol(self.table.get_past_external(def)),
                    Symbol::DerivedType(_)
                ) {
                    return Err(SemanticError::new(
                        ErrorKind::NotADerivedType,
                        format!("'{}' is not a derived type", name),
                        span.clone(),
                    ));
                }
                match spec.base {
                    ast::BaseType::Class => Type::Class { def, dims },
                    _ if pointer => Type::DerivedPointer { def, dims },
                    _ => Type::Derived { def, dims },
                }
            }
        };
        Ok(ty)
    }

    /// Expression lowering for pass 1: initializers and kind specifiers.
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
            ast::ExprKind::Name(path) => {
                if path.len() != 1 {
                    return Err(SemanticError::unsupported(
                        "Member access is not supported in this context",
                        e.span.clone(),
                    ));
                }
                let sym = self
                    .table
                    .resolve(self.current_scope, &path[0])
                    .ok_or_else(|| SemanticError::symbol_not_found(&path[0], e.span.clone()))?;
                Ok(Expr::Var { sym })
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
            ast::ExprKind::FuncCallOrArray { name, args } => {
                self.lower_func_call(name, args, &e.span)
            }
            ast::ExprKind::ArrayInitializer(_) | ast::ExprKind::ImpliedDoLoop { .. } => Err(
                SemanticError::unsupported(
                    "Expression is not supported in a declaration",
                    e.span.clone(),
                ),
            ),
        }
    }

    fn lower_func_call(
        &mut self,
        name: &str,
        args: &[ast::IndexArg],
        span: &Span,
    ) -> Result<Expr, SemanticError> {
        let sym = match self.table.resolve(self.current_scope, name) {
            Some(v) => v,
            None => self.load_intrinsic_function(name, span)?,
        };
        let target = self.table.get_past_external(sym);
        let ty = match self.table.symbol(target) {
            Symbol::Function(f) => match self.table.symbol(f.return_var) {
                Symbol::Variable(v) => v.ty.clone(),
                _ => {
                    return Err(SemanticError::unsupported(
                        format!("Function '{}' has no return variable", name),
                        span.clone(),
                    ))
                }
            },
            _ => {
                return Err(SemanticError::unsupported(
                    format!("'{}' is not a function", name),
                    span.clone(),
                ))
            }
        };
        let args = self.expr_list(args, span)?;
        Ok(Expr::FunctionCall {
            sym,
            original: None,
            args,
            ty,
        })
    }

    /// An unknown identifier that appears in the intrinsic-procedures table
    /// resolves by loading its owning intrinsic module on demand.
    fn load_intrinsic_function(
        &mut self,
        name: &str,
        span: &Span,
    ) -> Result<SymbolId, SemanticError> {
        let remote = name.to_ascii_lowercase();
        let module_name = intrinsic_module_of(&remote).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::SymbolNotFound,
                format!("Function '{}' not found or not implemented yet", name),
                span.clone(),
            )
        })?;
        let lookup_scope = self
            .table
            .scope(self.current_scope)
            .parent
            .unwrap_or(self.current_scope);
        let mid = self
            .loader
            .load(self.table, lookup_scope, module_name, span, true)?;
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
            .lookup_local(module_scope, &remote)
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
        let ext = self
            .table
            .add_symbol(Symbol::External(crate::sir::ExternalSymbol {
                name: remote.clone(),
                scope: self.current_scope,
                target,
                module_name: module_name.to_string(),
                original_name: remote.clone(),
                access: Access::Private,
            }));
        self.table.bind(self.current_scope, &remote, ext);
        if !self
            .module_dependencies
            .iter()
            .any(|m| m.eq_ignore_ascii_case(module_name))
        {
            self.module_dependencies.push(module_name.to_string());
        }
        Ok(ext)
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
}
