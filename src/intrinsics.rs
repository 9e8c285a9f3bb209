//! Native intrinsic table.
//!
//! A fixed set of host-implemented compile-time operations, referenced with
//! the `$$` naming convention and dispatched from the orchestrator. Each
//! intrinsic validates the syntactic shape of its (already substituted and
//! visited) arguments and raises the macro-error diagnostic on mismatch.
//!
//! The raw-splice intrinsic is the sole unconstrained code-generation escape
//! hatch: it hands the substituted argument nodes plus live checker/resolver
//! context to a registered host callback and splices back whatever the
//! callback returns. It and comptime invocation can be disabled through
//! construction-time options.

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::ast::{DeclKind, Declarator, Expr, Ident, Pat, Span, Stmt, Type, VarDecl};
use crate::diagnostics::MantraError;
use crate::eval::{fold_binary, literal, Lit};
use crate::expander::Expander;
use crate::host::RawContext;
use crate::macro_err;

/// One intrinsic invocation: span plus substituted argument nodes.
pub struct IntrinsicCall {
    pub span: Span,
    pub args: Vec<Expr>,
    pub type_args: Vec<Type>,
}

pub type IntrinsicFn = fn(&mut Expander, IntrinsicCall) -> Result<Expr, MantraError>;

pub struct Intrinsic {
    pub name: &'static str,
    pub run: IntrinsicFn,
}

static TABLE: Lazy<IndexMap<&'static str, Intrinsic>> = Lazy::new(|| {
    let entries = [
        Intrinsic { name: "$$define", run: define },
        Intrinsic { name: "$$ident", run: ident_of },
        Intrinsic { name: "$$slice", run: slice },
        Intrinsic { name: "$$includes", run: includes },
        Intrinsic { name: "$$length", run: length },
        Intrinsic { name: "$$i", run: current_index },
        Intrinsic { name: "$$err", run: raise },
        Intrinsic { name: "$$escape", run: escape },
        Intrinsic { name: "$$raw", run: raw },
        Intrinsic { name: "$$typeToString", run: type_to_string },
        Intrinsic { name: "$$propsOfType", run: props_of_type },
        Intrinsic { name: "$$typeAssignableTo", run: type_assignable_to },
        Intrinsic { name: "$$loadEnv", run: load_env },
        Intrinsic { name: "$$env", run: env_var },
    ];
    entries.into_iter().map(|i| (i.name, i)).collect()
});

pub fn lookup(name: &str) -> Option<&'static Intrinsic> {
    TABLE.get(name)
}

/// Names of all registered intrinsics, in table order.
pub fn names() -> impl Iterator<Item = &'static str> {
    TABLE.keys().copied()
}

// ============================================================================
// INTRINSIC IMPLEMENTATIONS
// ============================================================================

// $$define("name", value, useLet?) -> variable statement
fn define(_exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$define", 2, 3)?;
    let name = expect_str(&call.args[0], "$$define", "a string literal name")?;
    let value = call.args[1].clone();
    let use_let = call
        .args
        .get(2)
        .map(|arg| literal(arg).truthy())
        .unwrap_or(false);
    let kind = if use_let { DeclKind::Let } else { DeclKind::Const };
    Ok(Expr::Splice(
        vec![Stmt::Var(VarDecl {
            kind,
            decls: vec![Declarator {
                name: Pat::Ident(Ident {
                    name,
                    span: call.span,
                }),
                init: Some(value),
            }],
            span: call.span,
        })],
        call.span,
    ))
}

// $$ident("name") -> identifier node
fn ident_of(_exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$ident", 1, 1)?;
    let name = expect_str(&call.args[0], "$$ident", "a string literal")?;
    Ok(Expr::Ident(Ident {
        name,
        span: call.span,
    }))
}

// $$slice(target, start?, end?) -> sliced string or array literal
fn slice(_exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$slice", 1, 3)?;
    let start = call.args.get(1).map(|a| expect_num(a, "$$slice", "a numeric start index")).transpose()?;
    let end = call.args.get(2).map(|a| expect_num(a, "$$slice", "a numeric end index")).transpose()?;
    match &call.args[0] {
        Expr::Str(text, _) => {
            let chars: Vec<char> = text.chars().collect();
            let (from, to) = slice_bounds(chars.len(), start, end);
            Ok(Expr::Str(chars[from..to].iter().collect(), call.span))
        }
        Expr::Array(items, _) => {
            let (from, to) = slice_bounds(items.len(), start, end);
            Ok(Expr::Array(items[from..to].to_vec(), call.span))
        }
        other => Err(macro_err!(
            other.span(),
            "$$slice expects a string or array literal, got {}",
            other.pretty()
        )),
    }
}

// $$includes(target, item) -> boolean literal
fn includes(_exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$includes", 2, 2)?;
    match &call.args[0] {
        Expr::Str(text, _) => {
            let needle = expect_str(&call.args[1], "$$includes", "a string literal to search for")?;
            Ok(Expr::Bool(text.contains(&needle), call.span))
        }
        Expr::Array(items, _) => {
            let wanted = literal(&call.args[1]);
            if !wanted.is_lit() {
                return Err(macro_err!(
                    call.args[1].span(),
                    "$$includes over an array requires a literal search value"
                ));
            }
            let found = items.iter().any(|item| {
                fold_binary(crate::ast::BinOp::EqStrict, &literal(item), &wanted)
                    == Lit::Bool(true)
            });
            Ok(Expr::Bool(found, call.span))
        }
        other => Err(macro_err!(
            other.span(),
            "$$includes expects a string or array literal, got {}",
            other.pretty()
        )),
    }
}

// $$length(target) -> numeric literal
fn length(_exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$length", 1, 1)?;
    match &call.args[0] {
        Expr::Str(text, _) => Ok(Expr::Num(text.chars().count() as f64, call.span)),
        Expr::Array(items, _) => Ok(Expr::Num(items.len() as f64, call.span)),
        other => Err(macro_err!(
            other.span(),
            "$$length expects a string or array literal, got {}",
            other.pretty()
        )),
    }
}

// $$i() -> current repetition index, or -1 outside a repetition
fn current_index(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$i", 0, 0)?;
    let index = exp
        .current_rep_index()
        .map(|i| i as f64)
        .unwrap_or(-1.0);
    Ok(Expr::Num(index, call.span))
}

// $$err("message") -> raises the diagnostic
fn raise(_exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$err", 1, 1)?;
    let message = expect_str(&call.args[0], "$$err", "a string literal message")?;
    Err(MantraError::new(message, call.span))
}

// $$escape(() => { ... }) -> splices the closure body into the enclosing
// block; a trailing expression stays behind as the value at the call site.
fn escape(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$escape", 1, 1)?;
    let Some(Expr::Closure { body, .. }) = call.args.into_iter().next() else {
        return Err(macro_err!(
            call.span,
            "$$escape expects a closure whose body escapes into the enclosing block"
        ));
    };
    let mut body = body;
    // Only an explicit trailing return stays behind as the call-site value;
    // everything else escapes.
    let result = match body.pop() {
        Some(Stmt::Return(expr, _)) => expr,
        Some(other) => {
            body.push(other);
            None
        }
        None => None,
    };
    for stmt in body {
        exp.push_escape(stmt);
    }
    Ok(result.unwrap_or(Expr::Undefined(call.span)))
}

// $$raw("hook", ...args) -> hands the substituted nodes to a registered host
// callback and splices back whatever it returns.
fn raw(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    if !exp.options().allow_raw {
        return Err(macro_err!(
            call.span,
            "$$raw is disabled in this expansion session"
        ));
    }
    if call.args.is_empty() {
        return Err(macro_err!(
            call.span,
            "$$raw expects a hook name followed by its arguments"
        ));
    }
    let hook_name = expect_str(&call.args[0], "$$raw", "a string literal hook name")?;
    let hook = exp.raw_hook(&hook_name).ok_or_else(|| {
        macro_err!(call.span, "no raw hook registered under '{}'", hook_name)
    })?;
    let ctx = RawContext {
        checker: exp.checker_ref(),
        resolver: exp.resolver_ref(),
    };
    let stmts = hook(&ctx, &call.args[1..])
        .map_err(|message| MantraError::new(message, call.span))?;
    Ok(Expr::Splice(stmts, call.span))
}

// $$typeToString<T>() -> string literal of the checker's rendering of T
fn type_to_string(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    let checker = require_checker(exp, call.span)?;
    let ty = require_type_arg(&call, "$$typeToString", 0)?;
    Ok(Expr::Str(checker.display(ty), call.span))
}

// $$propsOfType<T>() -> array literal of property name strings
fn props_of_type(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    let checker = require_checker(exp, call.span)?;
    let ty = require_type_arg(&call, "$$propsOfType", 0)?;
    let props = checker
        .props_of(ty)
        .into_iter()
        .map(|name| Expr::Str(name, call.span))
        .collect();
    Ok(Expr::Array(props, call.span))
}

// $$typeAssignableTo<A, B>() -> boolean literal
fn type_assignable_to(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    let checker = require_checker(exp, call.span)?;
    let from = require_type_arg(&call, "$$typeAssignableTo", 0)?;
    let to = require_type_arg(&call, "$$typeAssignableTo", 1)?;
    Ok(Expr::Bool(checker.assignable(from, to), call.span))
}

// $$loadEnv("path") -> loads KEY=VALUE pairs into the expansion environment
fn load_env(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$loadEnv", 0, 1)?;
    let path = match call.args.first() {
        Some(arg) => expect_str(arg, "$$loadEnv", "a string literal path")?,
        None => ".env".to_string(),
    };
    let source = exp.loader_ref().read_source(&path).ok_or_else(|| {
        macro_err!(call.span, "environment file '{}' could not be read", path)
    })?;
    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        exp.env_set(key.trim().to_string(), value);
    }
    Ok(Expr::Undefined(call.span))
}

// $$env("NAME") -> string literal from the loaded environment
fn env_var(exp: &mut Expander, call: IntrinsicCall) -> Result<Expr, MantraError> {
    check_arity(&call, "$$env", 1, 1)?;
    let name = expect_str(&call.args[0], "$$env", "a string literal variable name")?;
    match exp.env_get(&name) {
        Some(value) => Ok(Expr::Str(value.clone(), call.span)),
        None => Ok(Expr::Undefined(call.span)),
    }
}

// ============================================================================
// SHAPE VALIDATION HELPERS
// ============================================================================

fn check_arity(
    call: &IntrinsicCall,
    name: &str,
    min: usize,
    max: usize,
) -> Result<(), MantraError> {
    let got = call.args.len();
    if got < min || got > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(macro_err!(
            call.span,
            "{} expects {} argument(s), got {}",
            name,
            expected,
            got
        ));
    }
    Ok(())
}

fn expect_str(arg: &Expr, name: &str, what: &str) -> Result<String, MantraError> {
    match literal(arg) {
        Lit::Str(s) => Ok(s),
        _ => Err(macro_err!(arg.span(), "{} expects {}", name, what)),
    }
}

fn expect_num(arg: &Expr, name: &str, what: &str) -> Result<f64, MantraError> {
    match literal(arg) {
        Lit::Num(n) => Ok(n),
        _ => Err(macro_err!(arg.span(), "{} expects {}", name, what)),
    }
}

fn require_checker<'a>(
    exp: &'a Expander,
    span: Span,
) -> Result<&'a dyn crate::host::TypeChecker, MantraError> {
    exp.checker_ref().ok_or_else(|| {
        macro_err!(span, "the type checker collaborator is not available")
    })
}

fn require_type_arg<'a>(
    call: &'a IntrinsicCall,
    name: &str,
    index: usize,
) -> Result<&'a Type, MantraError> {
    call.type_args.get(index).ok_or_else(|| {
        macro_err!(
            call.span,
            "{} expects a type argument in position {}",
            name,
            index + 1
        )
    })
}

// ECMAScript slice index semantics: negative offsets count back from the
// end, results clamp into range.
fn slice_bounds(len: usize, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
    let resolve = |index: Option<f64>, default: usize| -> usize {
        match index {
            None => default,
            Some(i) if i < 0.0 => len.saturating_sub((-i) as usize),
            Some(i) => (i as usize).min(len),
        }
    };
    let from = resolve(start, 0);
    let to = resolve(end, len).max(from);
    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_fixed_and_complete() {
        let expected = [
            "$$define",
            "$$ident",
            "$$slice",
            "$$includes",
            "$$length",
            "$$i",
            "$$err",
            "$$escape",
            "$$raw",
            "$$typeToString",
            "$$propsOfType",
            "$$typeAssignableTo",
            "$$loadEnv",
            "$$env",
        ];
        let actual: Vec<_> = names().collect();
        assert_eq!(actual, expected);
        assert!(lookup("$$nope").is_none());
    }

    #[test]
    fn slice_bounds_follow_script_semantics() {
        assert_eq!(slice_bounds(5, None, None), (0, 5));
        assert_eq!(slice_bounds(5, Some(1.0), Some(3.0)), (1, 3));
        assert_eq!(slice_bounds(5, Some(-2.0), None), (3, 5));
        assert_eq!(slice_bounds(5, Some(4.0), Some(2.0)), (4, 4));
        assert_eq!(slice_bounds(3, Some(10.0), None), (3, 3));
    }
}
