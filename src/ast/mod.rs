//! AST module for the Mantra engine.
//!
//! This module provides the core syntax-tree types the expansion engine
//! operates on, with source location tracking on every node. The node set is
//! a closed tagged union: the orchestrator dispatches over it exhaustively,
//! so adding a variant forces every visitor arm to be revisited.
//!
//! **INVARIANT:** Every node carries a `Span`. Nodes produced by macro
//! substitution are cloned with fresh identity but keep the span of the
//! source they were written at, so diagnostics point at user code.

use serde::{Deserialize, Serialize};

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// Represents a span in the source code.
///
/// All AST nodes carry a span for source tracking; enables better errors and
/// explainability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// Binary operators, including the logical and nullish forms that the
/// expander short-circuits instead of folding through the operator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    EqLoose,
    EqStrict,
    NeLoose,
    NeStrict,
    And,
    Or,
    Nullish,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    TypeOf,
}

/// A type reference, kept deliberately shallow: the engine never interprets
/// types itself, it hands them to the type-checker collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub name: String,
    pub args: Vec<Type>,
    pub span: Span,
}

/// Object literal property key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropKey {
    Ident(String),
    Str(String),
    Num(f64),
    Computed(Box<Expr>),
}

/// One object literal property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prop {
    pub key: PropKey,
    pub value: Expr,
}

/// Member access key: `a.b` or `a[b]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberKey {
    Prop(Ident),
    Index(Box<Expr>),
}

/// A binding pattern. Destructuring patterns are representable so the engine
/// can reject them in macro signatures with a proper diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pat {
    Ident(Ident),
    Destructured(Span),
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub pat: Pat,
    pub spread: bool,
    pub default: Option<Expr>,
    pub ty: Option<Type>,
}

/// The core expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(Ident),
    Str(String, Span),
    Num(f64, Span),
    Bool(bool, Span),
    Null(Span),
    Undefined(Span),
    Array(Vec<Expr>, Span),
    Object(Vec<Prop>, Span),
    /// Spread element (`...xs`) in array or call-argument position.
    Spread(Box<Expr>, Span),
    Member {
        object: Box<Expr>,
        key: MemberKey,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        type_args: Vec<Type>,
        args: Vec<Expr>,
        /// Carries the macro-call marker (the surface `!`).
        marked: bool,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Assign {
        target: Box<Expr>,
        op: Option<BinOp>,
        value: Box<Expr>,
        span: Span,
    },
    Conditional {
        test: Box<Expr>,
        cons: Box<Expr>,
        alt: Box<Expr>,
        span: Span,
    },
    Closure {
        params: Vec<Param>,
        body: Vec<Stmt>,
        span: Span,
    },
    /// Comma sequence (`(a, b, c)`).
    Seq(Vec<Expr>, Span),
    /// Engine-internal spliceable statement bundle. Produced by the label
    /// normalizer and splice-producing intrinsics; statement position splices
    /// it verbatim, expression position collapses it through the duality rule.
    Splice(Vec<Stmt>, Span),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declarator {
    pub name: Pat,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub kind: DeclKind,
    pub decls: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDecl {
    pub name: Ident,
    pub type_params: Vec<Ident>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    Var(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterMode {
    Of,
    In,
}

/// Loop binding of a `for-of`/`for-in` head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForBinding {
    pub decl: Option<DeclKind>,
    pub name: Ident,
}

/// The core statement node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr, Span),
    Var(VarDecl),
    Fn(FnDecl),
    Return(Option<Expr>, Span),
    If {
        test: Expr,
        cons: Box<Stmt>,
        alt: Option<Box<Stmt>>,
        span: Span,
    },
    Block(Vec<Stmt>, Span),
    Labeled {
        label: Ident,
        body: Box<Stmt>,
        span: Span,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    ForEach {
        mode: IterMode,
        binding: ForBinding,
        object: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        do_while: bool,
        span: Span,
    },
    Import {
        specifiers: Vec<Ident>,
        module: String,
        span: Span,
    },
    Namespace {
        name: Ident,
        body: Vec<Stmt>,
        span: Span,
    },
    Empty(Span),
}

/// One source module: the unit `run` transforms and the unit diagnostics are
/// collected for. `id` keys the macros the module contributes to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub body: Vec<Stmt>,
    pub span: Span,
}

// ============================================================================
// PUBLIC API IMPLEMENTATION
// ============================================================================

impl Expr {
    /// Returns the span of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::Ident(id) => id.span,
            Expr::Str(_, span)
            | Expr::Num(_, span)
            | Expr::Bool(_, span)
            | Expr::Null(span)
            | Expr::Undefined(span)
            | Expr::Array(_, span)
            | Expr::Object(_, span)
            | Expr::Spread(_, span)
            | Expr::Seq(_, span)
            | Expr::Splice(_, span) => *span,
            Expr::Member { span, .. }
            | Expr::Call { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Closure { span, .. } => *span,
        }
    }

    /// True for the node kinds the evaluator can extract a literal from
    /// without visiting anything.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Str(..) | Expr::Num(..) | Expr::Bool(..) | Expr::Null(_) | Expr::Undefined(_)
        )
    }

    /// Pretty-prints the expression as compact source-like text.
    pub fn pretty(&self) -> String {
        match self {
            Expr::Ident(id) => id.name.clone(),
            Expr::Str(s, _) => format!("\"{}\"", s),
            Expr::Num(n, _) => fmt_num(*n),
            Expr::Bool(b, _) => b.to_string(),
            Expr::Null(_) => "null".into(),
            Expr::Undefined(_) => "undefined".into(),
            Expr::Array(items, _) => format!("[{}]", join_pretty(items)),
            Expr::Object(props, _) => {
                let inner = props
                    .iter()
                    .map(|p| format!("{}: {}", p.key.pretty(), p.value.pretty()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", inner)
            }
            Expr::Spread(inner, _) => format!("...{}", inner.pretty()),
            Expr::Member { object, key, .. } => match key {
                MemberKey::Prop(id) => format!("{}.{}", object.pretty(), id.name),
                MemberKey::Index(e) => format!("{}[{}]", object.pretty(), e.pretty()),
            },
            Expr::Call {
                callee,
                args,
                marked,
                ..
            } => {
                let bang = if *marked { "!" } else { "" };
                format!("{}{}({})", callee.pretty(), bang, join_pretty(args))
            }
            Expr::Unary { op, operand, .. } => {
                format!("{}{}", op.pretty(), operand.pretty())
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                format!("({} {} {})", left.pretty(), op.pretty(), right.pretty())
            }
            Expr::Assign {
                target, op, value, ..
            } => {
                let eq = match op {
                    Some(op) => format!("{}=", op.pretty()),
                    None => "=".into(),
                };
                format!("{} {} {}", target.pretty(), eq, value.pretty())
            }
            Expr::Conditional {
                test, cons, alt, ..
            } => {
                format!("({} ? {} : {})", test.pretty(), cons.pretty(), alt.pretty())
            }
            Expr::Closure { params, body, .. } => {
                let ps = params
                    .iter()
                    .map(|p| p.pretty())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({}) => {{ {} }}", ps, join_stmts(body))
            }
            Expr::Seq(items, _) => format!("({})", join_pretty(items)),
            Expr::Splice(stmts, _) => format!("@splice{{ {} }}", join_stmts(stmts)),
        }
    }
}

impl Stmt {
    /// Returns the span of this statement.
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(_, span)
            | Stmt::Return(_, span)
            | Stmt::Block(_, span)
            | Stmt::Empty(span) => *span,
            Stmt::Var(v) => v.span,
            Stmt::Fn(f) => f.span,
            Stmt::If { span, .. }
            | Stmt::Labeled { span, .. }
            | Stmt::For { span, .. }
            | Stmt::ForEach { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::Namespace { span, .. } => *span,
        }
    }

    pub fn pretty(&self) -> String {
        match self {
            Stmt::Expr(e, _) => format!("{};", e.pretty()),
            Stmt::Var(v) => v.pretty(),
            Stmt::Fn(f) => {
                let ps = f
                    .params
                    .iter()
                    .map(|p| p.pretty())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "function {}({}) {{ {} }}",
                    f.name.name,
                    ps,
                    join_stmts(&f.body)
                )
            }
            Stmt::Return(Some(e), _) => format!("return {};", e.pretty()),
            Stmt::Return(None, _) => "return;".into(),
            Stmt::If {
                test, cons, alt, ..
            } => match alt {
                Some(alt) => format!(
                    "if ({}) {} else {}",
                    test.pretty(),
                    cons.pretty(),
                    alt.pretty()
                ),
                None => format!("if ({}) {}", test.pretty(), cons.pretty()),
            },
            Stmt::Block(stmts, _) => format!("{{ {} }}", join_stmts(stmts)),
            Stmt::Labeled { label, body, .. } => format!("{}: {}", label.name, body.pretty()),
            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                let init = match init {
                    Some(ForInit::Var(v)) => v.pretty_head(),
                    Some(ForInit::Expr(e)) => e.pretty(),
                    None => String::new(),
                };
                let test = test.as_ref().map(|e| e.pretty()).unwrap_or_default();
                let update = update.as_ref().map(|e| e.pretty()).unwrap_or_default();
                format!("for ({}; {}; {}) {}", init, test, update, body.pretty())
            }
            Stmt::ForEach {
                mode,
                binding,
                object,
                body,
                ..
            } => {
                let kw = match mode {
                    IterMode::Of => "of",
                    IterMode::In => "in",
                };
                let decl = match binding.decl {
                    Some(kind) => format!("{} ", kind.keyword()),
                    None => String::new(),
                };
                format!(
                    "for ({}{} {} {}) {}",
                    decl,
                    binding.name.name,
                    kw,
                    object.pretty(),
                    body.pretty()
                )
            }
            Stmt::While {
                test,
                body,
                do_while,
                ..
            } => {
                if *do_while {
                    format!("do {} while ({});", body.pretty(), test.pretty())
                } else {
                    format!("while ({}) {}", test.pretty(), body.pretty())
                }
            }
            Stmt::Import {
                specifiers, module, ..
            } => {
                let names = specifiers
                    .iter()
                    .map(|s| s.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("import {{ {} }} from \"{}\";", names, module)
            }
            Stmt::Namespace { name, body, .. } => {
                format!("namespace {} {{ {} }}", name.name, join_stmts(body))
            }
            Stmt::Empty(_) => ";".into(),
        }
    }
}

impl VarDecl {
    fn pretty_head(&self) -> String {
        let decls = self
            .decls
            .iter()
            .map(|d| match &d.init {
                Some(init) => format!("{} = {}", d.name.pretty(), init.pretty()),
                None => d.name.pretty(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} {}", self.kind.keyword(), decls)
    }

    pub fn pretty(&self) -> String {
        format!("{};", self.pretty_head())
    }
}

impl DeclKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            DeclKind::Const => "const",
            DeclKind::Let => "let",
            DeclKind::Var => "var",
        }
    }
}

impl Pat {
    pub fn pretty(&self) -> String {
        match self {
            Pat::Ident(id) => id.name.clone(),
            Pat::Destructured(_) => "{..}".into(),
        }
    }

    /// Identifier of this pattern, when it is one.
    pub fn ident(&self) -> Option<&Ident> {
        match self {
            Pat::Ident(id) => Some(id),
            Pat::Destructured(_) => None,
        }
    }
}

impl Param {
    fn pretty(&self) -> String {
        let dots = if self.spread { "..." } else { "" };
        format!("{}{}", dots, self.pat.pretty())
    }
}

impl PropKey {
    pub fn pretty(&self) -> String {
        match self {
            PropKey::Ident(s) => s.clone(),
            PropKey::Str(s) => format!("\"{}\"", s),
            PropKey::Num(n) => fmt_num(*n),
            PropKey::Computed(e) => format!("[{}]", e.pretty()),
        }
    }

    /// The key as a plain string, when statically known.
    pub fn as_static(&self) -> Option<String> {
        match self {
            PropKey::Ident(s) | PropKey::Str(s) => Some(s.clone()),
            PropKey::Num(n) => Some(fmt_num(*n)),
            PropKey::Computed(_) => None,
        }
    }
}

impl BinOp {
    pub fn pretty(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::EqLoose => "==",
            BinOp::EqStrict => "===",
            BinOp::NeLoose => "!=",
            BinOp::NeStrict => "!==",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Nullish => "??",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::UShr => ">>>",
        }
    }
}

impl UnaryOp {
    pub fn pretty(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::BitNot => "~",
            UnaryOp::TypeOf => "typeof ",
        }
    }
}

/// Formats a number the way folded output prints it: integral values without
/// a trailing `.0`.
pub fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn join_pretty(items: &[Expr]) -> String {
    items
        .iter()
        .map(|e| e.pretty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_stmts(stmts: &[Stmt]) -> String {
    stmts
        .iter()
        .map(|s| s.pretty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// MODULE EXPORTS
// ============================================================================

pub mod builder;
