//! # Expansion Orchestrator
//!
//! Top-level engine that walks a module's syntax tree, recognizes macro
//! invocations (marked calls, labels, decorators), and expands them.
//!
//! ## Core principles
//!
//! - **Syntactic only**: expansion is a tree-to-tree transformation. The only
//!   evaluation performed is partial evaluation of provably literal-valued
//!   expressions.
//! - **Source order**: visitation is depth-first, left-to-right, matching
//!   source order. Call frames, repetition frames, and escape scopes are
//!   strict LIFO stacks.
//! - **Per-module boundary**: a raised diagnostic aborts the current module
//!   only. `run` records it and returns the partially transformed tree; the
//!   caller chooses whether to keep or discard it.
//!
//! ## Expansion order per scope
//!
//! 1. Macro declarations are recognized by naming convention and registered,
//!    not emitted.
//! 2. Imports referring only to macros are elided; external macro libraries
//!    load by conventional sibling-file name.
//! 3. Every remaining statement is visited; statements escaped during its
//!    expansion are flushed immediately before it, ahead of the next sibling.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    Declarator, Expr, FnDecl, ForInit, Ident, MemberKey, Module, Pat, Prop, PropKey, Span, Stmt,
    Type, VarDecl,
};
use crate::ast::{BinOp, DeclKind, UnaryOp};
use crate::definition::{
    is_intrinsic_name, is_macro_definition, is_macro_name, parse_macro_definition, MacroRc,
    ParamMarker,
};
use crate::diagnostics::MantraError;
use crate::eval::{fold_binary, fold_unary, literal, Lit};
use crate::host::{
    BindingKind, ExpanderOptions, ModuleLoader, NullLoader, NullResolver, RawHook, SymbolResolver,
    TypeChecker,
};
use crate::hygiene::FreshNames;
use crate::labels;
use crate::macro_err;
use crate::registry::{ComptimeFn, MacroRegistry};
use crate::repetition::{self, RepetitionFrame, Separator};

/// Expansion recursion limit: bounds self-expanding macros and pathological
/// substitution chains.
const MAX_EXPANSION_DEPTH: usize = 128;

/// One recorded expansion, for traceability.
#[derive(Debug, Clone)]
pub struct ExpansionStep {
    pub macro_name: String,
    pub span: Span,
    pub produced: usize,
}

/// State of one active macro invocation.
#[derive(Debug)]
struct CallFrame {
    def: MacroRc,
    /// Parameter name → resolved argument (or materialized fresh binding).
    params: IndexMap<String, Expr>,
    /// Transient bindings created inside the body (`const $x = ...`).
    store: IndexMap<String, Expr>,
    /// Hygienic renames of locals the expansion introduces.
    defined: IndexMap<String, Ident>,
    /// Decorated declaration, when invoked in decorator position.
    #[allow(dead_code)]
    target: Option<Stmt>,
    /// Whether results inject into a scope foreign to the body's own nesting.
    hygiene: bool,
    /// Depth of nested blocks below the body's top level.
    block_depth: usize,
}

/// The expansion engine. One instance lives for a compilation or watch
/// session; `run` is invoked once per module.
pub struct Expander {
    registry: MacroRegistry,
    options: ExpanderOptions,
    resolver: Rc<dyn SymbolResolver>,
    checker: Option<Rc<dyn TypeChecker>>,
    loader: Rc<dyn ModuleLoader>,
    raw_hooks: IndexMap<String, RawHook>,
    frames: Vec<CallFrame>,
    reps: Vec<RepetitionFrame>,
    escapes: Vec<Vec<Stmt>>,
    decorator_depth: usize,
    expansion_depth: usize,
    /// Non-zero while visiting substituted (caller-provided) content, where
    /// hygiene must not rename declarations the macro did not introduce.
    substitution_depth: usize,
    fresh: FreshNames,
    env: IndexMap<String, String>,
    trace: Vec<ExpansionStep>,
    diagnostics: Vec<MantraError>,
    origin: String,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new(ExpanderOptions::default())
    }
}

impl Expander {
    pub fn new(options: ExpanderOptions) -> Self {
        Expander {
            registry: MacroRegistry::new(),
            options,
            resolver: Rc::new(NullResolver),
            checker: None,
            loader: Rc::new(NullLoader),
            raw_hooks: IndexMap::new(),
            frames: Vec::new(),
            reps: Vec::new(),
            escapes: Vec::new(),
            decorator_depth: 0,
            expansion_depth: 0,
            substitution_depth: 0,
            fresh: FreshNames::new(),
            env: IndexMap::new(),
            trace: Vec::new(),
            diagnostics: Vec::new(),
            origin: String::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Rc<dyn SymbolResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_checker(mut self, checker: Rc<dyn TypeChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_loader(mut self, loader: Rc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Registers a host callback for the raw-splice intrinsic.
    pub fn register_raw_hook(&mut self, name: &str, hook: RawHook) {
        self.raw_hooks.insert(name.to_string(), hook);
    }

    /// Registers a comptime function invoked eagerly at expansion time.
    pub fn register_comptime(&mut self, name: &str, func: ComptimeFn) {
        self.registry.register_comptime(name, func);
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MacroRegistry {
        &mut self.registry
    }

    pub fn diagnostics(&self) -> &[MantraError] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<MantraError> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn trace(&self) -> &[ExpansionStep] {
        &self.trace
    }

    /// Expands one module. Macros the module contributed in a previous run
    /// are evicted first, so re-processing a changed module redefines cleanly.
    ///
    /// A diagnostic raised anywhere inside aborts this module only: it is
    /// recorded, the statements processed so far are kept, and the remaining
    /// statements pass through untransformed.
    pub fn run(&mut self, module: Module) -> Module {
        let Module { id, body, span } = module;
        self.registry.evict_origin(&id);
        self.origin = id.clone();
        self.escapes.push(Vec::new());

        let mut out = Vec::new();
        let mut body_iter = body.into_iter();
        let mut failed = false;
        while let Some(stmt) = body_iter.next() {
            match self.visit_stmt(stmt) {
                Ok(results) => {
                    let pending = std::mem::take(self.escapes.last_mut().expect("module scope"));
                    out.extend(pending);
                    out.extend(results);
                }
                Err(err) => {
                    log::debug!("module '{}' aborted: {}", id, err);
                    self.diagnostics.push(err);
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            out.extend(body_iter);
            self.frames.clear();
            self.reps.clear();
            self.decorator_depth = 0;
            self.expansion_depth = 0;
        }
        self.escapes.pop();
        Module { id, body: out, span }
    }

    // ========================================================================
    // STATEMENT VISITATION
    // ========================================================================

    fn visit_stmt(&mut self, stmt: Stmt) -> Result<Vec<Stmt>, MantraError> {
        match stmt {
            Stmt::Expr(expr, span) => self.visit_expr_stmt(expr, span),
            Stmt::Var(decl) => match self.visit_var_decl(decl)? {
                Some(decl) => Ok(vec![Stmt::Var(decl)]),
                // Every declarator was a compile-time store binding.
                None => Ok(vec![]),
            },
            Stmt::Fn(decl) => self.visit_fn_decl(decl),
            Stmt::Return(expr, span) => {
                let expr = expr.map(|e| self.visit_expr(e)).transpose()?;
                Ok(vec![Stmt::Return(expr, span)])
            }
            Stmt::If {
                test,
                cons,
                alt,
                span,
            } => self.visit_if(test, cons, alt, span),
            Stmt::Block(stmts, span) => {
                let stmts = self.visit_nested_block(stmts)?;
                Ok(vec![Stmt::Block(stmts, span)])
            }
            Stmt::Labeled { label, body, span } => self.visit_labeled(label, *body, span),
            Stmt::For {
                init,
                test,
                update,
                body,
                span,
            } => {
                let init = match init {
                    Some(ForInit::Var(decl)) => {
                        self.visit_var_decl(decl)?.map(ForInit::Var)
                    }
                    Some(ForInit::Expr(e)) => Some(ForInit::Expr(self.visit_expr(e)?)),
                    None => None,
                };
                let test = test.map(|e| self.visit_expr(e)).transpose()?;
                let update = update.map(|e| self.visit_expr(e)).transpose()?;
                let body = self.visit_boxed_stmt(*body)?;
                Ok(vec![Stmt::For {
                    init,
                    test,
                    update,
                    body,
                    span,
                }])
            }
            Stmt::ForEach {
                mode,
                binding,
                object,
                body,
                span,
            } => {
                let object = self.visit_expr(object)?;
                let body = self.visit_boxed_stmt(*body)?;
                Ok(vec![Stmt::ForEach {
                    mode,
                    binding,
                    object,
                    body,
                    span,
                }])
            }
            Stmt::While {
                test,
                body,
                do_while,
                span,
            } => {
                let test = self.visit_expr(test)?;
                let body = self.visit_boxed_stmt(*body)?;
                Ok(vec![Stmt::While {
                    test,
                    body,
                    do_while,
                    span,
                }])
            }
            Stmt::Import {
                specifiers,
                module,
                span,
            } => self.visit_import(specifiers, module, span),
            Stmt::Namespace { name, body, span } => {
                self.registry.extend(Some(&name.name));
                let body = self.visit_scope_body(body);
                self.registry.exit();
                Ok(vec![Stmt::Namespace {
                    name,
                    body: body?,
                    span,
                }])
            }
            Stmt::Empty(span) => Ok(vec![Stmt::Empty(span)]),
        }
    }

    // Expression statements carry the call/statement duality: a macro call
    // here splices statements with hygiene; a comptime call runs for side
    // effects and leaves nothing behind.
    fn visit_expr_stmt(&mut self, expr: Expr, span: Span) -> Result<Vec<Stmt>, MantraError> {
        if let Expr::Call {
            callee,
            type_args,
            args,
            marked: true,
            span: call_span,
        } = &expr
        {
            if let Some(candidates) = self.resolve_macro_callee(callee) {
                return self.exec_macro(
                    candidates,
                    args.clone(),
                    type_args.clone(),
                    *call_span,
                    None,
                    true,
                );
            }
        }
        if self.options.allow_comptime {
            if let Expr::Call {
                callee,
                args,
                marked: false,
                ..
            } = &expr
            {
                if let Expr::Ident(id) = &**callee {
                    if let Some(func) = self.registry.comptime(&id.name) {
                        let mut lits = Vec::with_capacity(args.len());
                        for arg in args {
                            let visited = self.visit_expr(arg.clone())?;
                            lits.push(literal(&visited));
                        }
                        func(&lits);
                        return Ok(vec![]);
                    }
                }
            }
        }
        let visited = self.visit_expr(expr)?;
        match visited {
            Expr::Splice(stmts, _) => Ok(stmts),
            // Expansion no-ops leave no statement behind.
            Expr::Undefined(_) => Ok(vec![]),
            other => Ok(vec![Stmt::Expr(other, span)]),
        }
    }

    fn visit_var_decl(&mut self, decl: VarDecl) -> Result<Option<VarDecl>, MantraError> {
        let in_frame = !self.frames.is_empty();
        let rename = self.substitution_depth == 0
            && self
                .frames
                .last()
                .map(|f| f.hygiene && f.block_depth == 0)
                .unwrap_or(false);

        let mut decls_out = Vec::with_capacity(decl.decls.len());
        for declarator in decl.decls {
            let init = declarator.init.map(|e| self.visit_expr(e)).transpose()?;
            match declarator.name {
                // A macro-convention name declared inside a body is a
                // compile-time store binding: recorded, not emitted.
                Pat::Ident(id) if in_frame && is_macro_name(&id.name) => {
                    let value = init.unwrap_or(Expr::Undefined(id.span));
                    let frame = self.frames.last_mut().expect("active frame");
                    frame.store.insert(id.name, value);
                }
                Pat::Ident(id) if rename => {
                    let fresh = self.fresh.fresh(&id.name);
                    let frame = self.frames.last_mut().expect("active frame");
                    frame.defined.insert(
                        id.name.clone(),
                        Ident {
                            name: fresh.clone(),
                            span: id.span,
                        },
                    );
                    decls_out.push(Declarator {
                        name: Pat::Ident(Ident {
                            name: fresh,
                            span: id.span,
                        }),
                        init,
                    });
                }
                name => decls_out.push(Declarator { name, init }),
            }
        }
        if decls_out.is_empty() {
            return Ok(None);
        }
        Ok(Some(VarDecl {
            kind: decl.kind,
            decls: decls_out,
            span: decl.span,
        }))
    }

    fn visit_fn_decl(&mut self, decl: FnDecl) -> Result<Vec<Stmt>, MantraError> {
        if is_macro_definition(&decl) {
            let namespace = self.registry.current_namespace().map(str::to_string);
            let def = parse_macro_definition(&decl, &self.origin, namespace.as_deref())?;
            log::trace!("registered macro '{}'", def.name);
            self.registry.set(def);
            return Ok(vec![]);
        }
        if !decl.decorators.is_empty() {
            return self.expand_decorators(decl);
        }

        let mut decl = decl;
        let rename = self.substitution_depth == 0
            && self
                .frames
                .last()
                .map(|f| f.hygiene && f.block_depth == 0)
                .unwrap_or(false);
        if rename {
            let fresh = self.fresh.fresh(&decl.name.name);
            let frame = self.frames.last_mut().expect("active frame");
            frame.defined.insert(
                decl.name.name.clone(),
                Ident {
                    name: fresh.clone(),
                    span: decl.name.span,
                },
            );
            decl.name.name = fresh;
        }
        decl.body = self.visit_nested_block(decl.body)?;
        Ok(vec![Stmt::Fn(decl)])
    }

    fn visit_if(
        &mut self,
        test: Expr,
        cons: Box<Stmt>,
        alt: Option<Box<Stmt>>,
        span: Span,
    ) -> Result<Vec<Stmt>, MantraError> {
        let test = self.visit_expr(test)?;
        if self.in_frame() {
            let lit = literal(&test);
            if lit.is_lit() {
                // Collapse to the taken branch's statements; the test and the
                // untaken branch leave no trace.
                let taken = if lit.truthy() {
                    Some(*cons)
                } else {
                    alt.map(|s| *s)
                };
                return match taken {
                    Some(Stmt::Block(stmts, _)) => {
                        let mut out = Vec::new();
                        for stmt in stmts {
                            out.extend(self.visit_stmt(stmt)?);
                        }
                        Ok(out)
                    }
                    Some(stmt) => self.visit_stmt(stmt),
                    None => Ok(vec![]),
                };
            }
        }
        let cons = self.visit_boxed_stmt(*cons)?;
        let alt = match alt {
            Some(stmt) => Some(self.visit_boxed_stmt(*stmt)?),
            None => None,
        };
        Ok(vec![Stmt::If {
            test,
            cons,
            alt,
            span,
        }])
    }

    fn visit_labeled(
        &mut self,
        label: Ident,
        body: Stmt,
        span: Span,
    ) -> Result<Vec<Stmt>, MantraError> {
        let label_macro = is_macro_name(&label.name)
            .then(|| self.registry.get(&label.name))
            .flatten();
        let Some(candidates) = label_macro else {
            let body = self.visit_boxed_stmt(body)?;
            return Ok(vec![Stmt::Labeled { label, body, span }]);
        };

        // Nested labels resolve innermost-first.
        if let Stmt::Labeled {
            label: inner_label, ..
        } = &body
        {
            if is_macro_name(&inner_label.name) && self.registry.has(&inner_label.name) {
                let inner_results = self.visit_stmt(body)?;
                return match labels::find_recognized(&inner_results) {
                    Some(pos) => {
                        let mut out: Vec<Stmt> = inner_results[..pos].to_vec();
                        out.extend(self.exec_label_macro(
                            candidates,
                            &inner_results[pos],
                            span,
                        )?);
                        out.extend_from_slice(&inner_results[pos + 1..]);
                        Ok(out)
                    }
                    // No recognizable construct: the outer label degrades to
                    // a plain (non-macro) label.
                    None => Ok(vec![Stmt::Labeled {
                        label,
                        body: Box::new(Stmt::Block(inner_results, span)),
                        span,
                    }]),
                };
            }
        }

        self.exec_label_macro(candidates, &body, span)
    }

    fn exec_label_macro(
        &mut self,
        candidates: Vec<MacroRc>,
        construct: &Stmt,
        span: Span,
    ) -> Result<Vec<Stmt>, MantraError> {
        let descriptor = labels::normalize(construct).ok_or_else(|| {
            macro_err!(
                construct.span(),
                "label macro applied to an unrecognized construct shape"
            )
        })?;
        self.exec_macro(candidates, vec![descriptor], vec![], span, None, true)
    }

    fn visit_import(
        &mut self,
        specifiers: Vec<Ident>,
        module: String,
        span: Span,
    ) -> Result<Vec<Stmt>, MantraError> {
        // External macro libraries load by conventional sibling-file name.
        let library = format!("{}.macros", module);
        if self.loader.exists(&library) {
            if let Some(lib) = self.loader.load_module(&library) {
                self.registry.evict_origin(&lib.id);
                let origin = lib.id.clone();
                self.register_library(&origin, lib.body)?;
            }
        }
        // Specifiers naming macros/intrinsics elide by convention; the
        // resolver collaborator additionally drops type-only bindings.
        let kept: Vec<Ident> = specifiers
            .into_iter()
            .filter(|s| {
                !s.name.starts_with('$')
                    && self.resolver.resolve(&s.name) != BindingKind::TypeOnly
            })
            .collect();
        if kept.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![Stmt::Import {
            specifiers: kept,
            module,
            span,
        }])
    }

    fn register_library(&mut self, origin: &str, stmts: Vec<Stmt>) -> Result<(), MantraError> {
        for stmt in stmts {
            match stmt {
                Stmt::Fn(decl) if is_macro_definition(&decl) => {
                    let namespace = self.registry.current_namespace().map(str::to_string);
                    let def = parse_macro_definition(&decl, origin, namespace.as_deref())?;
                    self.registry.set(def);
                }
                Stmt::Namespace { name, body, .. } => {
                    self.registry.extend(Some(&name.name));
                    let result = self.register_library(origin, body);
                    self.registry.exit();
                    result?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn visit_boxed_stmt(&mut self, stmt: Stmt) -> Result<Box<Stmt>, MantraError> {
        let span = stmt.span();
        let mut results = self.visit_stmt(stmt)?;
        Ok(match results.len() {
            0 => Box::new(Stmt::Empty(span)),
            1 => Box::new(results.pop().expect("one statement")),
            _ => Box::new(Stmt::Block(results, span)),
        })
    }

    /// Visits the statements of a block nested below the current level:
    /// hygiene does not rename inside it, and it gets its own escape scope.
    fn visit_nested_block(&mut self, stmts: Vec<Stmt>) -> Result<Vec<Stmt>, MantraError> {
        if let Some(frame) = self.frames.last_mut() {
            frame.block_depth += 1;
        }
        let result = self.visit_scope_body(stmts);
        if let Some(frame) = self.frames.last_mut() {
            frame.block_depth -= 1;
        }
        result
    }

    // One lexical scope: push an escape scope, visit each statement, flush
    // pending escaped statements ahead of the statement that produced them.
    fn visit_scope_body(&mut self, stmts: Vec<Stmt>) -> Result<Vec<Stmt>, MantraError> {
        self.escapes.push(Vec::new());
        let mut out = Vec::new();
        let mut error = None;
        for stmt in stmts {
            match self.visit_stmt(stmt) {
                Ok(results) => {
                    let pending = std::mem::take(self.escapes.last_mut().expect("scope"));
                    out.extend(pending);
                    out.extend(results);
                }
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        self.escapes.pop();
        match error {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    // ========================================================================
    // EXPRESSION VISITATION
    // ========================================================================

    fn visit_expr(&mut self, expr: Expr) -> Result<Expr, MantraError> {
        match expr {
            Expr::Ident(id) => self.visit_ident(id),
            // Literal nodes pass through; substitution clones them with
            // fresh identity at the substitution site.
            Expr::Str(..) | Expr::Num(..) | Expr::Bool(..) | Expr::Null(_) | Expr::Undefined(_) => {
                Ok(expr)
            }
            Expr::Array(items, span) => self.visit_array(items, span),
            Expr::Object(props, span) => {
                let mut out = Vec::with_capacity(props.len());
                for prop in props {
                    let key = match prop.key {
                        PropKey::Computed(e) => PropKey::Computed(Box::new(self.visit_expr(*e)?)),
                        other => other,
                    };
                    let value = self.visit_expr(prop.value)?;
                    out.push(Prop { key, value });
                }
                Ok(Expr::Object(out, span))
            }
            Expr::Spread(inner, span) => {
                let inner = self.visit_expr(*inner)?;
                Ok(Expr::Spread(Box::new(inner), span))
            }
            Expr::Member { object, key, span } => self.visit_member(*object, key, span),
            Expr::Call {
                callee,
                type_args,
                args,
                marked,
                span,
            } => self.visit_call(*callee, type_args, args, marked, span),
            Expr::Unary { op, operand, span } => self.visit_unary(op, *operand, span),
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => self.visit_binary(op, *left, *right, span),
            Expr::Assign {
                target,
                op,
                value,
                span,
            } => {
                let target = Box::new(self.visit_expr(*target)?);
                let value = Box::new(self.visit_expr(*value)?);
                Ok(Expr::Assign {
                    target,
                    op,
                    value,
                    span,
                })
            }
            Expr::Conditional {
                test,
                cons,
                alt,
                span,
            } => self.visit_conditional(*test, *cons, *alt, span),
            Expr::Closure { params, body, span } => {
                let body = self.visit_nested_block(body)?;
                Ok(Expr::Closure { params, body, span })
            }
            Expr::Seq(items, span) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.visit_expr(item)?);
                }
                Ok(Expr::Seq(out, span))
            }
            Expr::Splice(stmts, span) => {
                let mut out = Vec::with_capacity(stmts.len());
                for stmt in stmts {
                    out.extend(self.visit_stmt(stmt)?);
                }
                Ok(Expr::Splice(out, span))
            }
        }
    }

    // Identifier substitution: repetition loop variables first (innermost
    // repetition wins), then call frames innermost-first through their
    // parameter, store, and rename maps.
    fn visit_ident(&mut self, id: Ident) -> Result<Expr, MantraError> {
        let mut rep_element: Option<Expr> = None;
        for frame in self.reps.iter().rev() {
            if frame.binds(&id.name) {
                rep_element = frame.element(&id.name);
                break;
            }
        }
        if let Some(element) = rep_element {
            return self.guarded_revisit(element, id.span);
        }
        let mut substituted: Option<Expr> = None;
        let mut renamed: Option<Ident> = None;
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.params.get(&id.name).or_else(|| frame.store.get(&id.name)) {
                substituted = Some(value.clone());
                break;
            }
            if let Some(fresh) = frame.defined.get(&id.name) {
                renamed = Some(fresh.clone());
                break;
            }
        }
        if let Some(value) = substituted {
            // Substituted arguments are recursively re-visited.
            return self.guarded_revisit(value, id.span);
        }
        if let Some(fresh) = renamed {
            return Ok(Expr::Ident(fresh));
        }
        Ok(Expr::Ident(id))
    }

    // Re-visiting substituted content is where runaway recursion can hide;
    // it counts against the same expansion depth limit as macro calls.
    fn guarded_revisit(&mut self, expr: Expr, span: Span) -> Result<Expr, MantraError> {
        if self.expansion_depth >= MAX_EXPANSION_DEPTH {
            return Err(macro_err!(
                span,
                "expansion recursion limit ({}) exceeded",
                MAX_EXPANSION_DEPTH
            ));
        }
        self.expansion_depth += 1;
        self.substitution_depth += 1;
        let result = self.visit_expr(expr);
        self.substitution_depth -= 1;
        self.expansion_depth -= 1;
        result
    }

    fn visit_array(&mut self, items: Vec<Expr>, span: Span) -> Result<Expr, MantraError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Spread(inner, spread_span) => {
                    let inner = self.visit_expr(*inner)?;
                    match inner {
                        // A spread of a statically known array splices its
                        // elements in place.
                        Expr::Array(elements, _) => out.extend(elements),
                        other => out.push(Expr::Spread(Box::new(other), spread_span)),
                    }
                }
                other => out.push(self.visit_expr(other)?),
            }
        }
        Ok(Expr::Array(out, span))
    }

    fn visit_member(
        &mut self,
        object: Expr,
        key: MemberKey,
        span: Span,
    ) -> Result<Expr, MantraError> {
        let object = self.visit_expr(object)?;
        let key = match key {
            MemberKey::Index(e) => MemberKey::Index(Box::new(self.visit_expr(*e)?)),
            prop => prop,
        };
        if self.in_frame() {
            if let Some(folded) = fold_member(&object, &key) {
                return Ok(folded);
            }
        }
        Ok(Expr::Member {
            object: Box::new(object),
            key,
            span,
        })
    }

    fn visit_call(
        &mut self,
        callee: Expr,
        type_args: Vec<Type>,
        args: Vec<Expr>,
        marked: bool,
        span: Span,
    ) -> Result<Expr, MantraError> {
        if marked {
            if let Expr::Ident(id) = &callee {
                if is_intrinsic_name(&id.name) {
                    let mut visited = Vec::with_capacity(args.len());
                    for arg in args {
                        visited.push(self.visit_expr(arg)?);
                    }
                    return self.run_intrinsic(&id.name, visited, type_args, span);
                }
            }
            if let Some(candidates) = self.resolve_macro_callee(&callee) {
                let stmts = self.exec_macro(candidates, args, type_args, span, None, false)?;
                return Ok(self.stmts_to_expr(stmts, span));
            }
            return Err(macro_err!(
                span,
                "'{}' does not resolve to a registered macro",
                callee.pretty()
            ));
        }
        let callee = Box::new(self.visit_expr(callee)?);
        let mut out_args = Vec::with_capacity(args.len());
        for arg in args {
            out_args.push(self.visit_expr(arg)?);
        }
        Ok(Expr::Call {
            callee,
            type_args,
            args: out_args,
            marked,
            span,
        })
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: Expr, span: Span) -> Result<Expr, MantraError> {
        // The repetition trigger: a unary-plus-prefixed array literal.
        if op == UnaryOp::Plus && self.in_frame() {
            if let Expr::Array(elements, _) = &operand {
                return self.expand_repetition(elements.clone(), span);
            }
        }
        let operand = self.visit_expr(operand)?;
        if self.in_frame() {
            let folded = fold_unary(op, &literal(&operand));
            if folded.is_lit() {
                return Ok(folded.to_expr(span));
            }
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn visit_binary(
        &mut self,
        op: BinOp,
        left: Expr,
        right: Expr,
        span: Span,
    ) -> Result<Expr, MantraError> {
        let left = self.visit_expr(left)?;
        if self.in_frame() {
            // Short-circuit forms return the taken operand subtree itself so
            // side-effecting subexpressions survive.
            if matches!(op, BinOp::And | BinOp::Or | BinOp::Nullish) {
                let lit = literal(&left);
                if lit.is_lit() {
                    let take_right = match op {
                        BinOp::And => lit.truthy(),
                        BinOp::Or => !lit.truthy(),
                        BinOp::Nullish => matches!(lit, Lit::Null | Lit::Undefined),
                        _ => unreachable!(),
                    };
                    return if take_right {
                        self.visit_expr(right)
                    } else {
                        Ok(left)
                    };
                }
                let right = self.visit_expr(right)?;
                return Ok(Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                });
            }
            let right = self.visit_expr(right)?;
            let folded = fold_binary(op, &literal(&left), &literal(&right));
            if folded.is_lit() {
                return Ok(folded.to_expr(span));
            }
            return Ok(Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        let right = self.visit_expr(right)?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        })
    }

    fn visit_conditional(
        &mut self,
        test: Expr,
        cons: Expr,
        alt: Expr,
        span: Span,
    ) -> Result<Expr, MantraError> {
        let test = self.visit_expr(test)?;
        if self.in_frame() {
            let lit = literal(&test);
            if lit.is_lit() {
                return if lit.truthy() {
                    self.visit_expr(cons)
                } else {
                    self.visit_expr(alt)
                };
            }
        }
        let cons = self.visit_expr(cons)?;
        let alt = self.visit_expr(alt)?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            cons: Box::new(cons),
            alt: Box::new(alt),
            span,
        })
    }

    // ========================================================================
    // MACRO EXECUTION
    // ========================================================================

    fn resolve_macro_callee(&self, callee: &Expr) -> Option<Vec<MacroRc>> {
        match callee {
            Expr::Ident(id) if is_macro_name(&id.name) => self.registry.get(&id.name),
            Expr::Member {
                object,
                key: MemberKey::Prop(prop),
                ..
            } => match &**object {
                Expr::Ident(ns) if is_macro_name(&prop.name) => {
                    self.registry.get_namespaced(&ns.name, &prop.name)
                }
                _ => None,
            },
            _ => None,
        }
    }

    // Overload-style dispatch: a single candidate wins outright; several
    // disambiguate through the first parameter's declared type constraint.
    fn select_candidate(
        &self,
        mut candidates: Vec<MacroRc>,
        args: &[Expr],
        span: Span,
    ) -> Result<MacroRc, MantraError> {
        if candidates.len() == 1 {
            return Ok(candidates.pop().expect("one candidate"));
        }
        let name = candidates
            .first()
            .map(|c| c.borrow().name.clone())
            .unwrap_or_default();
        let mut matched = Vec::new();
        let mut unconstrained = Vec::new();
        for candidate in candidates {
            let constraint = candidate.borrow().constraint().cloned();
            match constraint {
                None => unconstrained.push(candidate),
                Some(ty) => {
                    let Some(checker) = &self.checker else { continue };
                    let Some(first) = args.first() else { continue };
                    let Some(arg_ty) = checker.type_of(first) else {
                        continue;
                    };
                    if checker.assignable(&arg_ty, &ty) {
                        matched.push(candidate);
                    }
                }
            }
        }
        match (matched.len(), unconstrained.len()) {
            (1, _) => Ok(matched.pop().expect("one match")),
            (0, 1) => Ok(unconstrained.pop().expect("one fallback")),
            (0, 0) => Err(macro_err!(
                span,
                "no candidate for macro '{}' satisfies its type constraints",
                name
            )),
            _ => Err(macro_err!(
                span,
                "ambiguous call: more than one candidate for macro '{}' matches",
                name
            )),
        }
    }

    fn exec_macro(
        &mut self,
        candidates: Vec<MacroRc>,
        args: Vec<Expr>,
        type_args: Vec<Type>,
        span: Span,
        target: Option<Stmt>,
        hygiene: bool,
    ) -> Result<Vec<Stmt>, MantraError> {
        let _ = type_args;
        let def = self.select_candidate(candidates, &args, span)?;
        if self.expansion_depth >= MAX_EXPANSION_DEPTH {
            return Err(macro_err!(
                span,
                "expansion recursion limit ({}) exceeded",
                MAX_EXPANSION_DEPTH
            ));
        }
        self.expansion_depth += 1;
        let result = self.exec_macro_inner(def, args, span, target, hygiene);
        self.expansion_depth -= 1;
        result
    }

    fn exec_macro_inner(
        &mut self,
        def: MacroRc,
        args: Vec<Expr>,
        span: Span,
        target: Option<Stmt>,
        hygiene: bool,
    ) -> Result<Vec<Stmt>, MantraError> {
        let (name, params, body) = {
            let borrowed = def.borrow();
            (
                borrowed.name.clone(),
                borrowed.params.clone(),
                borrowed.body.clone(),
            )
        };

        // Arguments resolve in the caller's context first.
        let mut resolved = Vec::with_capacity(args.len() + 1);
        if let Some(decl) = &target {
            resolved.push(Expr::Splice(vec![decl.clone()], span));
        }
        for arg in args {
            resolved.push(self.visit_expr(arg)?);
        }

        let positional = params.iter().filter(|p| !p.spread).count();
        if resolved.len() > positional && !params.iter().any(|p| p.spread) {
            return Err(macro_err!(
                span,
                "macro '{}' expects at most {} argument{}, got {}",
                name,
                positional,
                if positional == 1 { "" } else { "s" },
                resolved.len()
            ));
        }

        let mut bindings: IndexMap<String, Expr> = IndexMap::new();
        let mut next_arg = 0usize;
        for param in &params {
            if param.spread {
                let rest: Vec<Expr> = resolved[next_arg.min(resolved.len())..].to_vec();
                next_arg = resolved.len();
                let value = match rest.as_slice() {
                    // A single spread argument passes its underlying
                    // collection through unchanged.
                    [Expr::Spread(inner, _)] => (**inner).clone(),
                    _ => Expr::Array(rest, span),
                };
                bindings.insert(param.name.clone(), value);
                continue;
            }
            let mut value = if param.marker == ParamMarker::Accumulator {
                param.default.clone().unwrap_or(Expr::Undefined(span))
            } else if next_arg < resolved.len() {
                let v = resolved[next_arg].clone();
                next_arg += 1;
                v
            } else if let Some(default) = &param.default {
                default.clone()
            } else {
                return Err(macro_err!(
                    span,
                    "macro '{}' is missing an argument for parameter '{}'",
                    name,
                    param.name
                ));
            };
            // A Save-marked argument materializes into a temporary binding so
            // it evaluates exactly once however often the body uses it.
            if param.marker == ParamMarker::Save && !matches!(value, Expr::Ident(_)) {
                let fresh = self.fresh.fresh(&param.name);
                let binding = Ident { name: fresh, span };
                self.push_escape(Stmt::Var(VarDecl {
                    kind: DeclKind::Let,
                    decls: vec![Declarator {
                        name: Pat::Ident(binding.clone()),
                        init: Some(value),
                    }],
                    span,
                }));
                value = Expr::Ident(binding);
            }
            bindings.insert(param.name.clone(), value);
        }

        self.frames.push(CallFrame {
            def: Rc::clone(&def),
            params: bindings,
            store: IndexMap::new(),
            defined: IndexMap::new(),
            target,
            hygiene,
            block_depth: 0,
        });
        let mut out = Vec::new();
        let mut error = None;
        for stmt in body {
            match self.visit_stmt(stmt) {
                Ok(results) => out.extend(results),
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        self.frames.pop();
        def.borrow_mut().bump_accumulators();
        if let Some(err) = error {
            return Err(err);
        }

        // A trailing explicit return is the macro's result expression.
        match out.pop() {
            Some(Stmt::Return(Some(expr), stmt_span)) => out.push(Stmt::Expr(expr, stmt_span)),
            Some(Stmt::Return(None, _)) => {}
            Some(other) => out.push(other),
            None => {}
        }
        // Statement bundles produced by descriptor fields or intrinsics
        // splice into the result here.
        let mut flat = Vec::with_capacity(out.len());
        for stmt in out {
            match stmt {
                Stmt::Expr(Expr::Splice(stmts, _), _) => flat.extend(stmts),
                other => flat.push(other),
            }
        }
        let out = flat;

        log::trace!("expanded '{}' into {} statement(s)", name, out.len());
        self.trace.push(ExpansionStep {
            macro_name: name,
            span,
            produced: out.len(),
        });
        Ok(out)
    }

    // Decorators process in reverse declaration order; each macro may replace
    // the decorated declaration. The final surviving declaration plus any
    // emitted extra statements are spliced together, behind whatever the
    // shared root escape queue accumulated.
    fn expand_decorators(&mut self, mut decl: FnDecl) -> Result<Vec<Stmt>, MantraError> {
        let decorators = std::mem::take(&mut decl.decorators);
        let mut surviving: Option<Stmt> = Some(Stmt::Fn(decl));
        let mut extras: Vec<Stmt> = Vec::new();
        let mut kept: Vec<Expr> = Vec::new();

        for decorator in decorators.into_iter().rev() {
            let Some((candidates, args, type_args, dec_span)) =
                self.classify_decorator(&decorator)
            else {
                kept.push(decorator);
                continue;
            };
            self.decorator_depth += 1;
            let result = self.exec_macro(
                candidates,
                args,
                type_args,
                dec_span,
                surviving.take(),
                true,
            );
            self.decorator_depth -= 1;
            for stmt in result? {
                if surviving.is_none() && matches!(stmt, Stmt::Fn(_)) {
                    surviving = Some(stmt);
                } else {
                    extras.push(stmt);
                }
            }
        }

        let mut out = self.registry.take_escaped();
        out.extend(extras);
        match surviving {
            Some(Stmt::Fn(mut decl)) => {
                kept.reverse();
                decl.decorators = kept;
                decl.body = self.visit_nested_block(decl.body)?;
                out.push(Stmt::Fn(decl));
            }
            Some(other) => out.push(other),
            None => {}
        }
        Ok(out)
    }

    // A decorator invokes a macro either as a marked call or as a bare
    // macro-named identifier; anything else stays attached to the declaration.
    fn classify_decorator(
        &self,
        decorator: &Expr,
    ) -> Option<(Vec<MacroRc>, Vec<Expr>, Vec<Type>, Span)> {
        match decorator {
            Expr::Call {
                callee,
                type_args,
                args,
                marked: true,
                span,
            } => {
                let candidates = self.resolve_macro_callee(callee)?;
                Some((candidates, args.clone(), type_args.clone(), *span))
            }
            Expr::Ident(id) if is_macro_name(&id.name) => {
                let candidates = self.registry.get(&id.name)?;
                Some((candidates, vec![], vec![], id.span))
            }
            _ => None,
        }
    }

    // ========================================================================
    // REPETITION
    // ========================================================================

    fn expand_repetition(
        &mut self,
        elements: Vec<Expr>,
        span: Span,
    ) -> Result<Expr, MantraError> {
        if elements.len() > 3 {
            return Err(macro_err!(
                span,
                "repetition accepts at most three elements (separator, inputs, transform)"
            ));
        }
        let mut separator = None;
        let mut inputs: Vec<Expr> = Vec::new();
        let mut transform: Option<(Vec<String>, Vec<Stmt>)> = None;
        for element in elements {
            // The transform body stays unvisited here: it runs once per
            // iteration with the loop variables bound. Everything else is
            // visited first so parameters substitute into position.
            if let Expr::Closure { params, body, .. } = element {
                let mut vars = Vec::with_capacity(params.len());
                for param in &params {
                    match param.pat.ident() {
                        Some(id) => vars.push(id.name.clone()),
                        None => {
                            return Err(macro_err!(
                                span,
                                "repetition transform parameters must be plain identifiers"
                            ));
                        }
                    }
                }
                transform = Some((vars, body));
                continue;
            }
            match self.visit_expr(element)? {
                Expr::Str(text, str_span) => {
                    separator = Some(Separator::parse(&text).ok_or_else(|| {
                        macro_err!(str_span, "unknown repetition separator '{}'", text)
                    })?);
                }
                Expr::Array(items, _) => inputs.extend(items),
                other => {
                    return Err(macro_err!(
                        other.span(),
                        "repetition elements must be a separator string, an input list, or a transform function"
                    ));
                }
            }
        }
        let Some((vars, body)) = transform else {
            return Err(macro_err!(span, "repetition requires a transform function"));
        };

        // Only inputs that resolve to array literals contribute iterations.
        let collections: Vec<Vec<Expr>> = inputs
            .into_iter()
            .map(|input| match input {
                Expr::Array(items, _) => items,
                _ => Vec::new(),
            })
            .collect();
        let count = collections.iter().map(Vec::len).max().unwrap_or(0);
        if count == 0 {
            return Ok(Expr::Undefined(span));
        }

        self.reps.push(RepetitionFrame::new(vars, collections));
        let mut parts = Vec::new();
        let mut all_stmts = Vec::new();
        let mut error = None;
        'iterations: for index in 0..count {
            self.reps.last_mut().expect("repetition frame").index = index;
            let mut iteration = Vec::new();
            for stmt in body.clone() {
                match self.visit_stmt(stmt) {
                    Ok(results) => iteration.extend(results),
                    Err(err) => {
                        error = Some(err);
                        break 'iterations;
                    }
                }
            }
            match separator {
                Some(_) => parts.push(self.stmts_to_expr(iteration, span)),
                None => all_stmts.extend(iteration),
            }
        }
        self.reps.pop();
        if let Some(err) = error {
            return Err(err);
        }
        match separator {
            Some(sep) => {
                // The combinator builds the chain; one more in-frame visit
                // folds it down when every part turned out literal.
                let combined = repetition::combine(sep, parts, span)?;
                self.guarded_revisit(combined, span)
            }
            None => Ok(Expr::Splice(all_stmts, span)),
        }
    }

    // ========================================================================
    // CALL/EXPRESSION DUALITY
    // ========================================================================

    /// Coerces an expansion's statement list into a single expression: a lone
    /// trailing expression is used directly, anything more wraps into an
    /// immediately invoked closure.
    pub(crate) fn stmts_to_expr(&mut self, mut stmts: Vec<Stmt>, span: Span) -> Expr {
        if stmts.is_empty() {
            return Expr::Undefined(span);
        }
        if stmts.len() == 1 {
            match stmts.pop().expect("one statement") {
                Stmt::Expr(Expr::Splice(inner, _), _) | Stmt::Return(Some(Expr::Splice(inner, _)), _) => {
                    return self.stmts_to_expr(inner, span);
                }
                Stmt::Expr(expr, _) => return expr,
                Stmt::Return(Some(expr), _) => return expr,
                other => stmts.push(other),
            }
        }
        match stmts.pop() {
            Some(Stmt::Expr(expr, stmt_span)) => {
                stmts.push(Stmt::Return(Some(expr), stmt_span));
            }
            Some(other) => stmts.push(other),
            None => {}
        }
        Expr::Call {
            callee: Box::new(Expr::Closure {
                params: vec![],
                body: stmts,
                span,
            }),
            type_args: vec![],
            args: vec![],
            marked: false,
            span,
        }
    }

    // ========================================================================
    // INTRINSIC SUPPORT SURFACE
    // ========================================================================

    fn run_intrinsic(
        &mut self,
        name: &str,
        args: Vec<Expr>,
        type_args: Vec<Type>,
        span: Span,
    ) -> Result<Expr, MantraError> {
        let intrinsic = crate::intrinsics::lookup(name)
            .ok_or_else(|| macro_err!(span, "unknown intrinsic '{}'", name))?;
        (intrinsic.run)(
            self,
            crate::intrinsics::IntrinsicCall {
                span,
                args,
                type_args,
            },
        )
    }

    pub(crate) fn in_frame(&self) -> bool {
        !self.frames.is_empty() || !self.reps.is_empty()
    }

    /// Current repetition index, innermost frame.
    pub(crate) fn current_rep_index(&self) -> Option<usize> {
        self.reps.last().map(|f| f.index)
    }

    /// Routes an escaped statement to the nearest escape scope, or to the
    /// registry's shared root queue when expanding in decorator position.
    pub(crate) fn push_escape(&mut self, stmt: Stmt) {
        if self.decorator_depth > 0 {
            self.registry.push_escaped(stmt);
            return;
        }
        match self.escapes.last_mut() {
            Some(scope) => scope.push(stmt),
            None => self.registry.push_escaped(stmt),
        }
    }

    pub(crate) fn options(&self) -> &ExpanderOptions {
        &self.options
    }

    pub(crate) fn checker_ref(&self) -> Option<&dyn TypeChecker> {
        self.checker.as_deref()
    }

    pub(crate) fn resolver_ref(&self) -> &dyn SymbolResolver {
        &*self.resolver
    }

    pub(crate) fn loader_ref(&self) -> &dyn ModuleLoader {
        &*self.loader
    }

    pub(crate) fn raw_hook(&self, name: &str) -> Option<RawHook> {
        self.raw_hooks.get(name).cloned()
    }

    pub(crate) fn env_set(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    pub(crate) fn env_get(&self, key: &str) -> Option<&String> {
        self.env.get(key)
    }
}

// ============================================================================
// STATIC FOLDING HELPERS
// ============================================================================

// Property/element access on a statically known object, array, or string
// literal resolves to the referenced member when the key itself folds.
fn fold_member(object: &Expr, key: &MemberKey) -> Option<Expr> {
    let key_lit = match key {
        MemberKey::Prop(id) => Lit::Str(id.name.clone()),
        MemberKey::Index(e) => literal(e),
    };
    if !key_lit.is_lit() {
        return None;
    }
    match object {
        Expr::Object(props, _) => {
            let wanted = key_lit.to_text();
            props
                .iter()
                .find(|p| p.key.as_static().as_deref() == Some(wanted.as_str()))
                .map(|p| p.value.clone())
        }
        Expr::Array(items, span) => match key_lit {
            Lit::Num(n) if n >= 0.0 && n.fract() == 0.0 => Some(
                items
                    .get(n as usize)
                    .cloned()
                    .unwrap_or(Expr::Undefined(*span)),
            ),
            Lit::Str(s) if s == "length" => Some(Expr::Num(items.len() as f64, *span)),
            _ => None,
        },
        Expr::Str(text, span) => match key_lit {
            Lit::Num(n) if n >= 0.0 && n.fract() == 0.0 => {
                let ch = text.chars().nth(n as usize)?;
                Some(Expr::Str(ch.to_string(), *span))
            }
            Lit::Str(s) if s == "length" => {
                Some(Expr::Num(text.chars().count() as f64, *span))
            }
            _ => None,
        },
        _ => None,
    }
}
