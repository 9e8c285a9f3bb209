//! Session-level behavior: watch-mode redefinition, external macro
//! libraries, namespaces, overload dispatch, and decorators.

mod common;

use std::rc::Rc;

use common::rendered;
use mantra::ast::builder::*;
use mantra::ast::{Expr, FnDecl, Ident, Module, Span, Stmt, Type};
use mantra::host::{ModuleLoader, TypeChecker};
use mantra::Expander;

fn namespace(name: &str, body: Vec<Stmt>) -> Stmt {
    Stmt::Namespace {
        name: ident(name),
        body,
        span: Span::default(),
    }
}

fn namespaced_macro_call(ns: &str, name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(member(id(ns), name)),
        type_args: vec![],
        args,
        marked: true,
        span: Span::default(),
    }
}

#[test]
fn reprocessing_a_module_replaces_its_macros() {
    let mut exp = Expander::default();

    let first = exp.run(module(
        "app.src",
        vec![
            fn_decl("$greet", vec![], vec![ret(str_("hi"))]),
            const_decl("g", macro_call("$greet", vec![])),
        ],
    ));
    assert_eq!(rendered(&first), "const g = \"hi\";");

    // Same module id, changed definition: the old registration is evicted,
    // not shadowed.
    let second = exp.run(module(
        "app.src",
        vec![
            fn_decl("$greet", vec![], vec![ret(str_("hello"))]),
            const_decl("g", macro_call("$greet", vec![])),
        ],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&second), "const g = \"hello\";");
    assert_eq!(exp.registry().len(), 1);
}

#[test]
fn one_failing_module_does_not_abort_its_siblings() {
    let mut exp = Expander::default();
    exp.run(module(
        "bad.src",
        vec![expr_stmt(macro_call("$missing", vec![]))],
    ));
    assert_eq!(exp.diagnostics().len(), 1);

    let ok = exp.run(module(
        "good.src",
        vec![
            fn_decl("$one", vec![], vec![ret(num(1.0))]),
            const_decl("x", macro_call("$one", vec![])),
        ],
    ));
    assert_eq!(exp.diagnostics().len(), 1);
    assert_eq!(rendered(&ok), "const x = 1;");
}

struct LibraryLoader;

impl ModuleLoader for LibraryLoader {
    fn exists(&self, path: &str) -> bool {
        path == "macrolib.macros"
    }

    fn load_module(&self, path: &str) -> Option<Module> {
        (path == "macrolib.macros").then(|| {
            module(
                "macrolib.macros",
                vec![fn_decl(
                    "$inc",
                    vec![param("$x")],
                    vec![ret(binary(mantra::ast::BinOp::Add, id("$x"), num(1.0)))],
                )],
            )
        })
    }

    fn read_source(&self, _path: &str) -> Option<String> {
        None
    }
}

#[test]
fn macro_only_imports_load_the_library_and_are_elided() {
    let mut exp = Expander::default().with_loader(Rc::new(LibraryLoader));
    let out = exp.run(module(
        "app.src",
        vec![
            import(vec!["$inc"], "macrolib"),
            const_decl("n", macro_call("$inc", vec![num(41.0)])),
        ],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&out), "const n = 42;");
}

struct TypeAwareResolver;

impl mantra::host::SymbolResolver for TypeAwareResolver {
    fn resolve(&self, name: &str) -> mantra::host::BindingKind {
        if name == "Shape" {
            mantra::host::BindingKind::TypeOnly
        } else {
            mantra::host::BindingKind::Unknown
        }
    }
}

#[test]
fn resolver_elides_type_only_import_specifiers() {
    let mut exp = Expander::default().with_resolver(Rc::new(TypeAwareResolver));
    let out = exp.run(module(
        "app.src",
        vec![import(vec!["Shape", "helper"], "geometry")],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&out), "import { helper } from \"geometry\";");
}

#[test]
fn mixed_imports_keep_their_value_specifiers() {
    let mut exp = Expander::default().with_loader(Rc::new(LibraryLoader));
    let out = exp.run(module(
        "app.src",
        vec![import(vec!["$inc", "helper"], "macrolib")],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&out), "import { helper } from \"macrolib\";");
}

#[test]
fn namespaced_macros_resolve_through_the_scope_chain() {
    let mut exp = Expander::default();
    let out = exp.run(module(
        "ns.src",
        vec![
            namespace(
                "util",
                vec![fn_decl(
                    "$dbl",
                    vec![param("$x")],
                    vec![ret(binary(mantra::ast::BinOp::Mul, id("$x"), num(2.0)))],
                )],
            ),
            const_decl("d", namespaced_macro_call("util", "$dbl", vec![num(21.0)])),
        ],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&out), "namespace util {  } const d = 42;");
}

// Checker used by overload dispatch: literal shape -> type name.
struct ShapeChecker;

impl TypeChecker for ShapeChecker {
    fn type_of(&self, expr: &Expr) -> Option<Type> {
        let name = match expr {
            Expr::Str(..) => "string",
            Expr::Num(..) => "number",
            Expr::Bool(..) => "boolean",
            _ => return None,
        };
        Some(ty(name))
    }

    fn props_of(&self, _ty: &Type) -> Vec<String> {
        vec![]
    }

    fn assignable(&self, from: &Type, to: &Type) -> bool {
        from.name == to.name
    }

    fn display(&self, ty: &Type) -> String {
        ty.name.clone()
    }
}

fn overload_def(name: &str, constraint: &str, result: &str) -> Stmt {
    fn_decl(
        name,
        vec![typed_param("$x", ty(constraint))],
        vec![ret(str_(result))],
    )
}

#[test]
fn overloads_dispatch_on_the_first_parameter_type() {
    let mut exp = Expander::default().with_checker(Rc::new(ShapeChecker));
    exp.run(module(
        "a.src",
        vec![overload_def("$fmt", "number", "num")],
    ));
    exp.run(module(
        "b.src",
        vec![overload_def("$fmt", "string", "str")],
    ));
    let out = exp.run(module(
        "c.src",
        vec![
            const_decl("s", macro_call("$fmt", vec![str_("hi")])),
            const_decl("n", macro_call("$fmt", vec![num(3.0)])),
        ],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&out), "const s = \"str\"; const n = \"num\";");
}

#[test]
fn ambiguous_overloads_are_a_diagnostic() {
    let mut exp = Expander::default().with_checker(Rc::new(ShapeChecker));
    exp.run(module("a.src", vec![overload_def("$fmt", "string", "one")]));
    exp.run(module("b.src", vec![overload_def("$fmt", "string", "two")]));
    exp.run(module(
        "c.src",
        vec![const_decl("s", macro_call("$fmt", vec![str_("hi")]))],
    ));
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("ambiguous"));
}

#[test]
fn unsatisfied_type_constraints_are_a_diagnostic() {
    let mut exp = Expander::default().with_checker(Rc::new(ShapeChecker));
    exp.run(module("a.src", vec![overload_def("$fmt", "string", "one")]));
    exp.run(module("b.src", vec![overload_def("$fmt", "boolean", "two")]));
    exp.run(module(
        "c.src",
        vec![const_decl("s", macro_call("$fmt", vec![num(5.0)]))],
    ));
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("no candidate"));
}

fn decorated_fn(name: &str, decorators: Vec<Expr>) -> Stmt {
    Stmt::Fn(FnDecl {
        name: Ident {
            name: name.to_string(),
            span: Span::default(),
        },
        type_params: vec![],
        params: vec![],
        body: vec![expr_stmt(call(id("work"), vec![]))],
        decorators,
        span: Span::default(),
    })
}

#[test]
fn decorator_macro_keeps_the_declaration_and_adds_statements() {
    // function $audited($fn) { audit(); $fn; }
    let def = fn_decl(
        "$audited",
        vec![param("$fn")],
        vec![
            expr_stmt(call(id("audit"), vec![])),
            expr_stmt(id("$fn")),
        ],
    );
    let mut exp = Expander::default();
    let out = exp.run(module(
        "dec.src",
        vec![def, decorated_fn("greet", vec![macro_call("$audited", vec![])])],
    ));
    assert!(exp.diagnostics().is_empty(), "{:?}", exp.diagnostics());
    assert_eq!(
        rendered(&out),
        "audit(); function greet() { work(); }"
    );
}

#[test]
fn decorator_macro_can_consume_the_declaration() {
    // function $erase($fn) { tombstone(); }
    let def = fn_decl(
        "$erase",
        vec![param("$fn")],
        vec![expr_stmt(call(id("tombstone"), vec![]))],
    );
    let mut exp = Expander::default();
    let out = exp.run(module(
        "dec.src",
        vec![def, decorated_fn("gone", vec![macro_call("$erase", vec![])])],
    ));
    assert!(exp.diagnostics().is_empty());
    assert_eq!(rendered(&out), "tombstone();");
}

#[test]
fn non_macro_decorators_stay_attached() {
    let mut exp = Expander::default();
    let out = exp.run(module(
        "dec.src",
        vec![decorated_fn("kept", vec![id("framework")])],
    ));
    assert!(exp.diagnostics().is_empty());
    assert!(matches!(
        out.body.as_slice(),
        [Stmt::Fn(f)] if f.decorators.len() == 1
    ));
}

#[test]
fn destructuring_macro_parameters_are_rejected() {
    let mut decl = match fn_decl("$bad", vec![param("$x")], vec![]) {
        Stmt::Fn(f) => f,
        _ => unreachable!(),
    };
    decl.params[0].pat = mantra::ast::Pat::Destructured(Span::default());
    let mut exp = Expander::default();
    exp.run(module("bad.src", vec![Stmt::Fn(decl)]));
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("destructuring"));
}
