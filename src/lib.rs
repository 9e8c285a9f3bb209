//! # Mantra
//!
//! A compile-time macro expansion engine for ECMAScript-style syntax trees.
//!
//! Macros are ordinary function declarations tagged by naming convention
//! (`$name`); call sites invoke them with a call marker, as labels on
//! loops/blocks/ifs, or as decorators. [`Expander::run`] rewrites a module by
//! expanding every invocation: partial evaluation, constant folding, loop
//! unrolling, hygienic renaming, and a fixed table of `$$` intrinsics.
//!
//! Expansion is purely syntactic: the engine folds only expressions it can
//! prove literal-valued and delegates every type-level question to the
//! type-checker collaborator.

pub use crate::diagnostics::MantraError;
pub use crate::expander::{Expander, ExpansionStep};
pub use crate::host::ExpanderOptions;

pub mod ast;
pub mod definition;
pub mod diagnostics;
pub mod eval;
pub mod expander;
pub mod host;
pub mod hygiene;
pub mod intrinsics;
pub mod labels;
pub mod registry;
pub mod repetition;
