//! Macro registry: scoped storage and lookup of macro definitions.
//!
//! Scopes form an arena of frames addressed by index, with an explicit parent
//! link per frame — no ambient global state. The root frame is created with
//! the registry; `extend` pushes a child frame (one per nested namespace) and
//! `exit` returns to its parent. Lookup walks the parent chain, nearest
//! definition wins.
//!
//! # Redefinition
//! Registering a definition whose name, origin module, and namespace match an
//! existing entry *replaces* that entry in place rather than shadowing it.
//! Same-name definitions from other origins coexist as overload candidates
//! and are disambiguated at the call site.
//!
//! # Watch mode
//! `evict_origin` removes exactly the definitions a module previously
//! contributed (keyed by origin module + namespace), so re-processing a
//! changed module re-registers without unbounded growth.
//!
//! # Thread safety
//! Not thread-safe; expansion is per-module and sequential.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Stmt;
use crate::definition::{MacroDefinition, MacroRc};
use crate::eval::Lit;

/// A host function invoked eagerly at expansion time for side effects only.
pub type ComptimeFn = Rc<dyn Fn(&[Lit])>;

#[derive(Debug, Default)]
struct ScopeFrame {
    parent: Option<usize>,
    namespace: Option<String>,
    macros: IndexMap<String, Vec<MacroRc>>,
}

/// Macro registry with parent-chained scopes.
pub struct MacroRegistry {
    scopes: Vec<ScopeFrame>,
    current: usize,
    /// Shared escape-statement queue attached at the root scope, used by the
    /// escape intrinsic in decorator position. Deliberately a single flat
    /// stack rather than one level per macro nesting.
    escaped: Vec<Stmt>,
    comptime: IndexMap<String, ComptimeFn>,
}

impl Default for MacroRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacroRegistry")
            .field("scopes", &self.scopes)
            .field("current", &self.current)
            .field("escaped", &self.escaped.len())
            .field("comptime", &self.comptime.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MacroRegistry {
    /// Creates a registry with a single root scope.
    pub fn new() -> Self {
        MacroRegistry {
            scopes: vec![ScopeFrame::default()],
            current: 0,
            escaped: Vec::new(),
            comptime: IndexMap::new(),
        }
    }

    /// Registers a definition into the current scope.
    ///
    /// Replaces an existing candidate with the same name, origin, and
    /// namespace anywhere on the parent chain; otherwise appends to the
    /// current scope's candidate list for that name.
    pub fn set(&mut self, def: MacroDefinition) -> MacroRc {
        let name = def.name.clone();
        let mut scope = Some(self.current);
        while let Some(idx) = scope {
            let frame = &mut self.scopes[idx];
            if let Some(candidates) = frame.macros.get_mut(&name) {
                for slot in candidates.iter_mut() {
                    let same = {
                        let existing = slot.borrow();
                        existing.origin == def.origin && existing.namespace == def.namespace
                    };
                    if same {
                        *slot.borrow_mut() = def;
                        return Rc::clone(slot);
                    }
                }
            }
            scope = frame.parent;
        }
        let handle: MacroRc = Rc::new(RefCell::new(def));
        self.scopes[self.current]
            .macros
            .entry(name)
            .or_default()
            .push(Rc::clone(&handle));
        handle
    }

    /// Looks a name up along the parent chain; the nearest scope that has it
    /// wins. Returns the full candidate list for overload dispatch.
    pub fn get(&self, name: &str) -> Option<Vec<MacroRc>> {
        let mut scope = Some(self.current);
        while let Some(idx) = scope {
            let frame = &self.scopes[idx];
            if let Some(candidates) = frame.macros.get(name) {
                if !candidates.is_empty() {
                    return Some(candidates.clone());
                }
            }
            scope = frame.parent;
        }
        None
    }

    /// Looks a name up inside scopes owned by the given namespace.
    pub fn get_namespaced(&self, namespace: &str, name: &str) -> Option<Vec<MacroRc>> {
        for frame in self.scopes.iter().rev() {
            if frame.namespace.as_deref() != Some(namespace) {
                continue;
            }
            if let Some(candidates) = frame.macros.get(name) {
                if !candidates.is_empty() {
                    return Some(candidates.clone());
                }
            }
        }
        None
    }

    /// True if the current scope itself holds the name (no chain walk).
    pub fn shallow_has(&self, name: &str) -> bool {
        self.scopes[self.current]
            .macros
            .get(name)
            .is_some_and(|c| !c.is_empty())
    }

    /// True if any scope resolves the name.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Pushes a child scope of the current one and enters it.
    pub fn extend(&mut self, namespace: Option<&str>) -> usize {
        let frame = ScopeFrame {
            parent: Some(self.current),
            namespace: namespace.map(str::to_string),
            macros: IndexMap::new(),
        };
        self.scopes.push(frame);
        self.current = self.scopes.len() - 1;
        self.current
    }

    /// Returns to the parent of the current scope. Leaving the root is a
    /// no-op; frames stay in the arena so namespaced lookups keep working.
    pub fn exit(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    /// Namespace owning the current scope, when there is one.
    pub fn current_namespace(&self) -> Option<&str> {
        self.scopes[self.current].namespace.as_deref()
    }

    /// Removes every definition the given module contributed, across all
    /// scopes and namespaces.
    pub fn evict_origin(&mut self, origin: &str) {
        for frame in &mut self.scopes {
            for candidates in frame.macros.values_mut() {
                candidates.retain(|def| def.borrow().origin != origin);
            }
            frame.macros.retain(|_, candidates| !candidates.is_empty());
        }
    }

    /// Total number of registered definitions across all scopes.
    pub fn len(&self) -> usize {
        self.scopes
            .iter()
            .flat_map(|f| f.macros.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the names registered in the current scope.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.scopes[self.current].macros.keys()
    }

    // --- Root escape queue ---

    pub fn push_escaped(&mut self, stmt: Stmt) {
        self.escaped.push(stmt);
    }

    pub fn take_escaped(&mut self) -> Vec<Stmt> {
        std::mem::take(&mut self.escaped)
    }

    // --- Comptime function table ---

    /// Registers a comptime function under the given name.
    pub fn register_comptime(&mut self, name: &str, func: ComptimeFn) {
        self.comptime.insert(name.to_string(), func);
    }

    pub fn comptime(&self, name: &str) -> Option<ComptimeFn> {
        self.comptime.get(name).cloned()
    }
}
