//! Scoped symbol tables.
//!
//! Scopes and symbols live in one index arena owned by the analyzed unit,
//! so back-references (a contained procedure referencing its module, a
//! derived type's methods referencing the type) are plain ids. `ScopeId`
//! doubles as the stable per-unit scope counter. Name lookups are
//! case-folded; Fortran is case-insensitive.

use indexmap::IndexMap;

use crate::errors::SemanticError;
use crate::sir::{Abi, Symbol, Type};
use crate::{sir, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    names: IndexMap<String, SymbolId>,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A fresh table holding only the root (compile-unit-global) scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
            symbols: Vec::new(),
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            names: IndexMap::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.symbol(id).name()
    }

    /// Allocates a symbol in the arena without binding a name to it.
    pub fn add_symbol(&mut self, sym: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(sym);
        id
    }

    /// Looks `name` up in `scope` alone.
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scope(scope)
            .names
            .get(&name.to_ascii_lowercase())
            .copied()
    }

    /// Searches the scope chain up to the root.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let folded = name.to_ascii_lowercase();
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if let Some(&id) = self.scope(s).names.get(&folded) {
                return Some(id);
            }
            cur = self.scope(s).parent;
        }
        None
    }

    /// Binds `name` unconditionally, replacing any existing binding. Used
    /// for cached/mangled entries and import repacking.
    pub fn bind(&mut self, scope: ScopeId, name: &str, id: SymbolId) {
        self.scopes[scope.0 as usize]
            .names
            .insert(name.to_ascii_lowercase(), id);
    }

    /// Binds `name` in `scope`, enforcing the redeclaration rules: the root
    /// scope permits overwriting, elsewhere a clash is an error unless the
    /// existing symbol is a procedure with interactive ABI.
    pub fn insert(
        &mut self,
        scope: ScopeId,
        name: &str,
        id: SymbolId,
        span: &Span,
    ) -> Result<(), SemanticError> {
        if let Some(existing) = self.lookup_local(scope, name) {
            let at_root = self.scope(scope).parent.is_none();
            if !at_root && !self.shadows_interactive(existing) {
                return Err(SemanticError::already_defined(name, span.clone()));
            }
        }
        self.bind(scope, name, id);
        Ok(())
    }

    fn shadows_interactive(&self, id: SymbolId) -> bool {
        match self.symbol(id) {
            Symbol::Function(f) => f.abi == Abi::Interactive,
            Symbol::Subroutine(s) => s.abi == Abi::Interactive,
            _ => false,
        }
    }

    /// Snapshot of the scope's bindings in insertion order. Callers iterate
    /// the buffer, not the live map, so the scope may gain entries while
    /// they visit.
    pub fn entries(&self, scope: ScopeId) -> Vec<(String, SymbolId)> {
        self.scope(scope)
            .names
            .iter()
            .map(|(n, &id)| (n.clone(), id))
            .collect()
    }

    /// Follows an external symbol to its target. Externals never chain, so
    /// one hop suffices.
    pub fn get_past_external(&self, id: SymbolId) -> SymbolId {
        match self.symbol(id) {
            Symbol::External(e) => {
                debug_assert!(!matches!(self.symbol(e.target), Symbol::External(_)));
                e.target
            }
            _ => id,
        }
    }

    /// Type of an expression. Stored on the node for everything except
    /// variable references, whose type lives on the symbol.
    pub fn expr_type(&self, e: &sir::Expr) -> Type {
        match e {
            sir::Expr::Var { sym } => self.var_type(*sym),
            _ => e
                .local_type()
                .cloned()
                .unwrap_or_else(|| unreachable!("expression node without a type")),
        }
    }

    fn var_type(&self, sym: SymbolId) -> Type {
        match self.symbol(sym) {
            Symbol::Variable(v) => v.ty.clone(),
            Symbol::External(e) => self.var_type(e.target),
            Symbol::Function(f) => self.var_type(f.return_var),
            other => unreachable!("Var refers to non-variable symbol '{}'", other.name()),
        }
    }
}
