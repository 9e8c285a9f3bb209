//! Shared helpers for the expansion test suite.
#![allow(dead_code)]

use mantra::ast::builder::*;
use mantra::ast::{Module, Stmt};
use mantra::Expander;

/// Runs one module through a fresh expander and asserts a clean expansion.
pub fn expand_ok(stmts: Vec<Stmt>) -> Module {
    let mut exp = Expander::default();
    let out = exp.run(module("test.src", stmts));
    assert!(
        exp.diagnostics().is_empty(),
        "unexpected diagnostics: {:?}",
        exp.diagnostics()
    );
    out
}

/// Runs one module and returns the expander for diagnostic inspection.
pub fn expand(stmts: Vec<Stmt>) -> (Module, Expander) {
    let mut exp = Expander::default();
    let out = exp.run(module("test.src", stmts));
    (out, exp)
}

/// Renders a module body the way the tests compare it: one line, statements
/// separated by single spaces.
pub fn rendered(module: &Module) -> String {
    module
        .body
        .iter()
        .map(|s| s.pretty())
        .collect::<Vec<_>>()
        .join(" ")
}
