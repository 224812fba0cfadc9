//! On-demand module loading.
//!
//! The analyzer consults a [`ModuleLoader`] whenever a `use` names a module
//! that is not in scope, or an identifier resolves through the intrinsic
//! procedures table. Loads are memoized: repeated loads of the same module
//! must return the same `Module` symbol, which is what lets the analyzer
//! deduplicate dependency entries by name.

use std::collections::HashMap;

use crate::errors::{ErrorKind, SemanticError};
use crate::sir::{
    Abi, Access, Deftype, Function, Intent, Module, Presence, Storage, Symbol, Type, Variable,
};
use crate::symtab::{ScopeId, SymbolId, SymbolTable};
use crate::Span;

pub const INTRINSIC_KIND_MODULE: &str = "f90_intrinsic_kind";
pub const INTRINSIC_ARRAY_MODULE: &str = "f90_intrinsic_array";

pub trait ModuleLoader {
    /// Materializes `module_name` into a `Module` symbol bound under
    /// `parent`, or returns the previously loaded one.
    fn load(
        &mut self,
        table: &mut SymbolTable,
        parent: ScopeId,
        module_name: &str,
        span: &Span,
        intrinsic: bool,
    ) -> Result<SymbolId, SemanticError>;
}

/// Memoizing loader for the built-in intrinsic modules. Modules produced by
/// earlier analyses can be pre-registered so later units resolve them by
/// name. One loader instance serves one symbol table.
#[derive(Default)]
pub struct IntrinsicModules {
    loaded: HashMap<String, SymbolId>,
}

impl IntrinsicModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, module: SymbolId) {
        self.loaded.insert(name.to_ascii_lowercase(), module);
    }

    fn build_function(
        table: &mut SymbolTable,
        module_scope: ScopeId,
        name: &str,
        arg_ty: Type,
        ret_ty: Type,
    ) -> SymbolId {
        let fn_scope = table.new_scope(module_scope);
        let arg = table.add_symbol(Symbol::Variable(Variable {
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
        table.bind(fn_scope, "x", arg);
        let ret = table.add_symbol(Symbol::Variable(Variable {
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
        table.bind(fn_scope, name, ret);
        let f = table.add_symbol(Symbol::Function(Function {
            name: name.to_string(),
            scope: fn_scope,
            args: vec![crate::sir::Expr::Var { sym: arg }],
            body: Vec::new(),
            return_var: ret,
            abi: Abi::Intrinsic,
            access: Access::Public,
            deftype: Deftype::Interface,
        }));
        table.bind(module_scope, name, f);
        f
    }

    fn build_module(
        table: &mut SymbolTable,
        parent: ScopeId,
        name: &str,
        procs: &[(&str, Type, Type)],
    ) -> SymbolId {
        let scope = table.new_scope(parent);
        for (proc, arg_ty, ret_ty) in procs {
            Self::build_function(table, scope, proc, arg_ty.clone(), ret_ty.clone());
        }
        let id = table.add_symbol(Symbol::Module(Module {
            name: name.to_string(),
            scope,
            dependencies: Vec::new(),
            intrinsic: true,
        }));
        table.bind(parent, name, id);
        id
    }
}

impl ModuleLoader for IntrinsicModules {
    fn load(
        &mut self,
        table: &mut SymbolTable,
        parent: ScopeId,
        module_name: &str,
        span: &Span,
        intrinsic: bool,
    ) -> Result<SymbolId, SemanticError> {
        let folded = module_name.to_ascii_lowercase();
        if let Some(&id) = self.loaded.get(&folded) {
            return Ok(id);
        }
        let id = match (intrinsic, folded.as_str()) {
            (true, INTRINSIC_KIND_MODULE) => {
                let i4 = Type::integer(4);
                Self::build_module(
                    table,
                    parent,
                    INTRINSIC_KIND_MODULE,
                    &[
                        ("kind", i4.clone(), i4.clone()),
                        ("selected_int_kind", i4.clone(), i4.clone()),
                        ("selected_real_kind", i4.clone(), i4),
                    ],
                )
            }
            (true, INTRINSIC_ARRAY_MODULE) => {
                let i4 = Type::integer(4);
                let r4 = Type::real(4);
                let l4 = Type::logical(4);
                Self::build_module(
                    table,
                    parent,
                    INTRINSIC_ARRAY_MODULE,
                    &[
                        ("size", r4.clone(), i4.clone()),
                        ("lbound", r4.clone(), i4.clone()),
                        ("ubound", r4.clone(), i4.clone()),
                        ("min", i4.clone(), i4.clone()),
                        ("max", i4.clone(), i4.clone()),
                        ("allocated", r4.clone(), l4),
                        ("minval", r4.clone(), r4.clone()),
                        ("maxval", r4.clone(), r4.clone()),
                        ("real", i4, r4.clone()),
                        ("sum", r4.clone(), r4.clone()),
                        ("abs", r4.clone(), r4),
                    ],
                )
            }
            _ => {
                return Err(SemanticError::new(
                    ErrorKind::SymbolNotFound,
                    format!("Module '{}' not found", module_name),
                    span.clone(),
                ))
            }
        };
        self.loaded.insert(folded, id);
        Ok(id)
    }
}
