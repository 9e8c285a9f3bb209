//! Label-macro normalizer.
//!
//! A label resolving to a macro does not receive the raw labeled statement:
//! the construct is first normalized into one structured descriptor value —
//! an object literal — passed as the macro's sole argument. Statement-valued
//! fields are wrapped in the engine's spliceable statement bundle so a macro
//! can re-emit them verbatim.
//!
//! Recognized construct shapes and their descriptor fields:
//!
//! | construct | fields |
//! |---|---|
//! | if | `condition`, `then`, `else` (null when absent) |
//! | for-of / for-in | `mode`, `binding`, `iterable`, `body` |
//! | classic for | `initializer`, `condition`, `increment`, `body` |
//! | while / do-while | `doWhile`, `condition`, `body` |
//! | block | `body` |
//! | variable declaration | `identifiers`, `initializers`, `kind` |
//!
//! Anything else is an unrecognized shape: the caller raises the macro-error
//! diagnostic, or for nested labels falls back to a plain label.

use crate::ast::builder;
use crate::ast::{Expr, ForInit, IterMode, Stmt};

/// Normalizes a labeled construct into its descriptor, or `None` when the
/// statement matches none of the recognized shapes.
pub fn normalize(stmt: &Stmt) -> Option<Expr> {
    match stmt {
        Stmt::If {
            test, cons, alt, ..
        } => Some(builder::object(vec![
            ("condition", test.clone()),
            ("then", embed_branch(cons)),
            (
                "else",
                alt.as_ref()
                    .map(|s| embed_branch(s))
                    .unwrap_or_else(builder::null),
            ),
        ])),
        Stmt::ForEach {
            mode,
            binding,
            object,
            body,
            ..
        } => {
            let mode = match mode {
                IterMode::Of => "of",
                IterMode::In => "in",
            };
            Some(builder::object(vec![
                ("mode", builder::str_(mode)),
                ("binding", Expr::Ident(binding.name.clone())),
                ("iterable", object.clone()),
                ("body", embed(body)),
            ]))
        }
        Stmt::For {
            init,
            test,
            update,
            body,
            ..
        } => Some(builder::object(vec![
            ("initializer", normalize_for_init(init)),
            ("condition", opt_expr(test)),
            ("increment", opt_expr(update)),
            ("body", embed(body)),
        ])),
        Stmt::While {
            test,
            body,
            do_while,
            ..
        } => Some(builder::object(vec![
            ("doWhile", builder::bool_(*do_while)),
            ("condition", test.clone()),
            ("body", embed(body)),
        ])),
        Stmt::Block(stmts, span) => Some(builder::object(vec![(
            "body",
            Expr::Splice(stmts.clone(), *span),
        )])),
        Stmt::Var(decl) => {
            let mut identifiers = Vec::new();
            let mut initializers = Vec::new();
            for declarator in &decl.decls {
                let name = declarator.name.ident()?;
                identifiers.push(builder::str_(name.name.clone()));
                initializers.push(
                    declarator
                        .init
                        .clone()
                        .unwrap_or_else(builder::undefined),
                );
            }
            Some(builder::object(vec![
                ("identifiers", builder::array(identifiers)),
                ("initializers", builder::array(initializers)),
                ("kind", builder::str_(decl.kind.keyword())),
            ]))
        }
        _ => None,
    }
}

/// True when the statement matches one of the recognized construct shapes.
pub fn is_recognized_shape(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::If { .. }
            | Stmt::ForEach { .. }
            | Stmt::For { .. }
            | Stmt::While { .. }
            | Stmt::Block(..)
            | Stmt::Var(_)
    )
}

/// Index of the first recognized construct in an expansion result, used when
/// resolving nested labels innermost-first.
pub fn find_recognized(stmts: &[Stmt]) -> Option<usize> {
    stmts.iter().position(is_recognized_shape)
}

// Classic-for initializers come in two flavors: declared variables or a bare
// expression.
fn normalize_for_init(init: &Option<ForInit>) -> Expr {
    match init {
        Some(ForInit::Var(decl)) => {
            let pairs = decl
                .decls
                .iter()
                .map(|d| {
                    builder::array(vec![
                        builder::str_(d.name.pretty()),
                        d.init.clone().unwrap_or_else(builder::undefined),
                    ])
                })
                .collect();
            builder::object(vec![("variables", builder::array(pairs))])
        }
        Some(ForInit::Expr(e)) => builder::object(vec![("expression", e.clone())]),
        None => builder::null(),
    }
}

fn opt_expr(expr: &Option<Expr>) -> Expr {
    expr.clone().unwrap_or_else(builder::null)
}

fn embed(stmt: &Stmt) -> Expr {
    Expr::Splice(vec![stmt.clone()], stmt.span())
}

// If branches unwrap their braces: a macro that re-emits only `then` gets
// the branch's statements, not a residual block.
fn embed_branch(stmt: &Stmt) -> Expr {
    match stmt {
        Stmt::Block(stmts, span) => Expr::Splice(stmts.clone(), *span),
        other => embed(other),
    }
}
