//! External collaborator interfaces.
//!
//! The engine consumes a symbol resolver, an optional type checker, and a
//! module loader as opaque traits; null implementations are provided so the
//! expander works stand-alone. Behavior toggles are construction-time
//! booleans on [`ExpanderOptions`], never environment state.

use std::rc::Rc;

use crate::ast::{Expr, Module, Stmt, Type};

/// Classification a resolver gives for a free name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// An ordinary runtime value binding.
    Value,
    /// A type-only binding (erased from output).
    TypeOnly,
    Unknown,
}

/// Name → declaration resolver collaborator.
pub trait SymbolResolver {
    fn resolve(&self, name: &str) -> BindingKind;
}

/// Resolver that knows nothing; every name is an ordinary unknown.
#[derive(Debug, Default)]
pub struct NullResolver;

impl SymbolResolver for NullResolver {
    fn resolve(&self, _name: &str) -> BindingKind {
        BindingKind::Unknown
    }
}

/// Type-checking collaborator. The engine performs no inference of its own;
/// the type-level intrinsics and overload dispatch delegate here.
pub trait TypeChecker {
    /// Type at the location of an expression node.
    fn type_of(&self, expr: &Expr) -> Option<Type>;
    /// Property names of a type.
    fn props_of(&self, ty: &Type) -> Vec<String>;
    /// Whether `from` is assignable to `to`.
    fn assignable(&self, from: &Type, to: &Type) -> bool;
    /// Human-readable text for a type.
    fn display(&self, ty: &Type) -> String;
}

/// Module-source loader collaborator: existence checks and module loading for
/// external macro libraries (conventional sibling-file name), plus raw text
/// reads backing the environment-loading intrinsic.
pub trait ModuleLoader {
    fn exists(&self, path: &str) -> bool;
    fn load_module(&self, path: &str) -> Option<Module>;
    fn read_source(&self, path: &str) -> Option<String>;
}

/// Loader that finds nothing.
#[derive(Debug, Default)]
pub struct NullLoader;

impl ModuleLoader for NullLoader {
    fn exists(&self, _path: &str) -> bool {
        false
    }

    fn load_module(&self, _path: &str) -> Option<Module> {
        None
    }

    fn read_source(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Live context handed to a raw-splice hook alongside the substituted
/// argument nodes. The tree factory is the `ast::builder` module, which the
/// hook reaches directly.
pub struct RawContext<'a> {
    pub checker: Option<&'a dyn TypeChecker>,
    pub resolver: &'a dyn SymbolResolver,
}

/// A host callback for the raw-splice intrinsic: receives the context and the
/// already-substituted argument nodes, returns statements to splice back.
/// This is the sole unconstrained code-generation escape hatch.
pub type RawHook = Rc<dyn Fn(&RawContext<'_>, &[Expr]) -> Result<Vec<Stmt>, String>>;

/// Construction-time behavior toggles.
#[derive(Debug, Clone, Copy)]
pub struct ExpanderOptions {
    /// Permit the raw-splice intrinsic.
    pub allow_raw: bool,
    /// Permit eager comptime function invocation.
    pub allow_comptime: bool,
}

impl Default for ExpanderOptions {
    fn default() -> Self {
        ExpanderOptions {
            allow_raw: true,
            allow_comptime: true,
        }
    }
}
