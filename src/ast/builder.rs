//! # Tree Factory
//!
//! Ergonomic constructors for syntax nodes. The expansion engine builds every
//! node it synthesizes through these helpers, and `$$raw` hooks receive the
//! same factory surface, so generated trees stay uniform.
//!
//! All constructors take or default to `Span::default()`; synthesized nodes
//! have no meaningful source location of their own.

use super::{
    BinOp, DeclKind, Declarator, Expr, FnDecl, ForBinding, Ident, IterMode, MemberKey, Module,
    Param, Pat, Prop, PropKey, Span, Stmt, Type, UnaryOp, VarDecl,
};

pub fn ident(name: impl Into<String>) -> Ident {
    Ident {
        name: name.into(),
        span: Span::default(),
    }
}

pub fn ident_at(name: impl Into<String>, span: Span) -> Ident {
    Ident {
        name: name.into(),
        span,
    }
}

pub fn id(name: impl Into<String>) -> Expr {
    Expr::Ident(ident(name))
}

pub fn str_(value: impl Into<String>) -> Expr {
    Expr::Str(value.into(), Span::default())
}

pub fn num(value: f64) -> Expr {
    Expr::Num(value, Span::default())
}

pub fn bool_(value: bool) -> Expr {
    Expr::Bool(value, Span::default())
}

pub fn null() -> Expr {
    Expr::Null(Span::default())
}

pub fn undefined() -> Expr {
    Expr::Undefined(Span::default())
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::Array(items, Span::default())
}

pub fn object(props: Vec<(&str, Expr)>) -> Expr {
    let props = props
        .into_iter()
        .map(|(key, value)| Prop {
            key: PropKey::Ident(key.to_string()),
            value,
        })
        .collect();
    Expr::Object(props, Span::default())
}

pub fn spread(inner: Expr) -> Expr {
    let span = inner.span();
    Expr::Spread(Box::new(inner), span)
}

pub fn member(object: Expr, prop: impl Into<String>) -> Expr {
    let span = object.span();
    Expr::Member {
        object: Box::new(object),
        key: MemberKey::Prop(ident(prop)),
        span,
    }
}

pub fn index(object: Expr, key: Expr) -> Expr {
    let span = object.span();
    Expr::Member {
        object: Box::new(object),
        key: MemberKey::Index(Box::new(key)),
        span,
    }
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    let span = callee.span();
    Expr::Call {
        callee: Box::new(callee),
        type_args: vec![],
        args,
        marked: false,
        span,
    }
}

/// A marker-carrying call: the surface `name!(args)` form.
pub fn macro_call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(id(name)),
        type_args: vec![],
        args,
        marked: true,
        span: Span::default(),
    }
}

pub fn macro_call_typed(name: impl Into<String>, type_args: Vec<Type>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(id(name)),
        type_args,
        args,
        marked: true,
        span: Span::default(),
    }
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    let span = operand.span();
    Expr::Unary {
        op,
        operand: Box::new(operand),
        span,
    }
}

pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span();
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}

pub fn cond(test: Expr, cons: Expr, alt: Expr) -> Expr {
    let span = test.span();
    Expr::Conditional {
        test: Box::new(test),
        cons: Box::new(cons),
        alt: Box::new(alt),
        span,
    }
}

pub fn closure(param_names: Vec<&str>, body: Vec<Stmt>) -> Expr {
    let params = param_names.into_iter().map(param).collect();
    Expr::Closure {
        params,
        body,
        span: Span::default(),
    }
}

pub fn seq(items: Vec<Expr>) -> Expr {
    Expr::Seq(items, Span::default())
}

pub fn splice(stmts: Vec<Stmt>) -> Expr {
    Expr::Splice(stmts, Span::default())
}

pub fn ty(name: impl Into<String>) -> Type {
    Type {
        name: name.into(),
        args: vec![],
        span: Span::default(),
    }
}

pub fn param(name: &str) -> Param {
    Param {
        pat: Pat::Ident(ident(name)),
        spread: false,
        default: None,
        ty: None,
    }
}

pub fn spread_param(name: &str) -> Param {
    Param {
        pat: Pat::Ident(ident(name)),
        spread: true,
        default: None,
        ty: None,
    }
}

pub fn typed_param(name: &str, t: Type) -> Param {
    Param {
        pat: Pat::Ident(ident(name)),
        spread: false,
        default: None,
        ty: Some(t),
    }
}

pub fn defaulted_param(name: &str, t: Type, default: Expr) -> Param {
    Param {
        pat: Pat::Ident(ident(name)),
        spread: false,
        default: Some(default),
        ty: Some(t),
    }
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    let span = expr.span();
    Stmt::Expr(expr, span)
}

pub fn ret(expr: Expr) -> Stmt {
    let span = expr.span();
    Stmt::Return(Some(expr), span)
}

pub fn var_decl(kind: DeclKind, name: impl Into<String>, init: Expr) -> Stmt {
    Stmt::Var(VarDecl {
        kind,
        decls: vec![Declarator {
            name: Pat::Ident(ident(name)),
            init: Some(init),
        }],
        span: Span::default(),
    })
}

pub fn let_decl(name: impl Into<String>, init: Expr) -> Stmt {
    var_decl(DeclKind::Let, name, init)
}

pub fn const_decl(name: impl Into<String>, init: Expr) -> Stmt {
    var_decl(DeclKind::Const, name, init)
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(stmts, Span::default())
}

pub fn if_stmt(test: Expr, cons: Stmt, alt: Option<Stmt>) -> Stmt {
    let span = test.span();
    Stmt::If {
        test,
        cons: Box::new(cons),
        alt: alt.map(Box::new),
        span,
    }
}

pub fn labeled(label: impl Into<String>, body: Stmt) -> Stmt {
    Stmt::Labeled {
        label: ident(label),
        body: Box::new(body),
        span: Span::default(),
    }
}

pub fn while_stmt(test: Expr, body: Stmt) -> Stmt {
    let span = test.span();
    Stmt::While {
        test,
        body: Box::new(body),
        do_while: false,
        span,
    }
}

pub fn for_of(name: impl Into<String>, object: Expr, body: Stmt) -> Stmt {
    Stmt::ForEach {
        mode: IterMode::Of,
        binding: ForBinding {
            decl: Some(DeclKind::Const),
            name: ident(name),
        },
        object,
        body: Box::new(body),
        span: Span::default(),
    }
}

pub fn fn_decl(name: impl Into<String>, params: Vec<Param>, body: Vec<Stmt>) -> Stmt {
    Stmt::Fn(FnDecl {
        name: ident(name),
        type_params: vec![],
        params,
        body,
        decorators: vec![],
        span: Span::default(),
    })
}

pub fn import(specifiers: Vec<&str>, module: impl Into<String>) -> Stmt {
    Stmt::Import {
        specifiers: specifiers.into_iter().map(ident).collect(),
        module: module.into(),
        span: Span::default(),
    }
}

pub fn module(id: impl Into<String>, body: Vec<Stmt>) -> Module {
    Module {
        id: id.into(),
        body,
        span: Span::default(),
    }
}
