//! Macro definition model and recognition.
//!
//! Macros are declared with ordinary function syntax and recognized purely by
//! naming convention: definition and parameter names begin with `$`, native
//! intrinsics with `$$`. Parameter markers are carried by the declared type
//! name (`Accumulator`, `Save`); everything else about a parameter is plain
//! function-parameter syntax.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{Expr, FnDecl, Pat, Stmt, Type};
use crate::diagnostics::MantraError;
use crate::macro_err;

/// Names beginning with this prefix declare or reference macros.
pub const MACRO_PREFIX: &str = "$";
/// Names beginning with this prefix reference native intrinsics.
pub const INTRINSIC_PREFIX: &str = "$$";

/// Marker carried by a macro parameter, derived from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamMarker {
    None,
    /// The parameter's default literal increments by one after every
    /// invocation of the owning definition.
    Accumulator,
    /// The argument is materialized into a temporary binding so it evaluates
    /// exactly once however often the body references it.
    Save,
}

/// One macro parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroParam {
    pub name: String,
    pub spread: bool,
    pub marker: ParamMarker,
    pub default: Option<Expr>,
    pub ty: Option<Type>,
}

/// A user macro definition: the unit stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<MacroParam>,
    pub body: Vec<Stmt>,
    pub namespace: Option<String>,
    /// Module id that contributed this definition; keys watch-mode eviction
    /// and the replace-on-redefinition rule.
    pub origin: String,
}

/// Shared handle to a definition. Accumulator bumps mutate the definition in
/// place across invocations, so registry entries hand out `Rc<RefCell<..>>`.
pub type MacroRc = Rc<RefCell<MacroDefinition>>;

impl MacroDefinition {
    /// The type constraint used for overload dispatch: the first parameter's
    /// declared type, when it is not a marker type.
    pub fn constraint(&self) -> Option<&Type> {
        let first = self.params.first()?;
        if first.marker != ParamMarker::None {
            return None;
        }
        first.ty.as_ref()
    }

    /// Increments the default literal of every Accumulator parameter by one.
    /// Called once per invocation, after the frame pops.
    pub fn bump_accumulators(&mut self) {
        for param in &mut self.params {
            if param.marker != ParamMarker::Accumulator {
                continue;
            }
            if let Some(Expr::Num(n, _)) = &mut param.default {
                *n += 1.0;
            }
        }
    }
}

/// Returns true if the given name follows the macro naming convention
/// (begins with `$` but is not an intrinsic reference).
pub fn is_macro_name(name: &str) -> bool {
    name.starts_with(MACRO_PREFIX) && !name.starts_with(INTRINSIC_PREFIX)
}

pub fn is_intrinsic_name(name: &str) -> bool {
    name.starts_with(INTRINSIC_PREFIX)
}

/// Returns true if the given function declaration is a macro definition.
pub fn is_macro_definition(decl: &FnDecl) -> bool {
    is_macro_name(&decl.name.name)
}

/// Parses a function declaration into a macro definition.
///
/// # Errors
/// Destructuring parameter patterns are explicitly disallowed; an Accumulator
/// marker requires a numeric default literal.
pub fn parse_macro_definition(
    decl: &FnDecl,
    origin: &str,
    namespace: Option<&str>,
) -> Result<MacroDefinition, MantraError> {
    let mut params = Vec::with_capacity(decl.params.len());
    for param in &decl.params {
        let name = match &param.pat {
            Pat::Ident(id) => id.name.clone(),
            Pat::Destructured(span) => {
                return Err(macro_err!(
                    *span,
                    "macro '{}' uses a destructuring parameter pattern, which is not allowed in macro signatures",
                    decl.name.name
                ));
            }
        };
        let marker = marker_of(&param.ty);
        if marker == ParamMarker::Accumulator
            && !matches!(param.default, Some(Expr::Num(..)))
        {
            return Err(macro_err!(
                decl.span,
                "accumulator parameter '{}' of macro '{}' requires a numeric default",
                name,
                decl.name.name
            ));
        }
        params.push(MacroParam {
            name,
            spread: param.spread,
            marker,
            default: param.default.clone(),
            ty: param.ty.clone(),
        });
    }

    Ok(MacroDefinition {
        name: decl.name.name.clone(),
        type_params: decl.type_params.iter().map(|t| t.name.clone()).collect(),
        params,
        body: decl.body.clone(),
        namespace: namespace.map(str::to_string),
        origin: origin.to_string(),
    })
}

fn marker_of(ty: &Option<Type>) -> ParamMarker {
    match ty {
        Some(t) if t.name == "Accumulator" => ParamMarker::Accumulator,
        Some(t) if t.name == "Save" => ParamMarker::Save,
        _ => ParamMarker::None,
    }
}
