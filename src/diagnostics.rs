//! Unified diagnostic system for the Mantra engine.
//!
//! There is exactly one diagnostic kind — the macro error — carrying a source
//! span and a message. Construct it with the [`macro_err!`] macro:
//!
//! ```rust
//! use mantra::{macro_err, ast::Span};
//! let err = mantra::diagnostics::MantraError::new("bad shape", Span::new(3, 9));
//! let err2 = macro_err!(Span::new(3, 9), "expected {} arguments", 2);
//! assert_eq!(err.span, err2.span);
//! ```
//!
//! Errors propagate with `?` from the detection point and are caught at the
//! single per-module boundary in `Expander::run`; one module's failure does
//! not abort sibling modules.

use miette::{Diagnostic, LabeledSpan};
use thiserror::Error;

use crate::ast::Span;

/// The single "macro error" diagnostic: a source span plus a message.
#[derive(Debug, Clone, Error)]
#[error("macro error: {message}")]
pub struct MantraError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl MantraError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        MantraError {
            message: message.into(),
            span,
            help: None,
        }
    }

    /// Attaches an optional help message for the report renderer.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl Diagnostic for MantraError {
    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|h| Box::new(h.clone()) as Box<dyn std::fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let label = LabeledSpan::at(self.span.start..self.span.end, self.message.clone());
        Some(Box::new(std::iter::once(label)))
    }
}

/// Constructs a [`MantraError`] from a span and a format string.
///
/// The span comes first so the message can use format arguments freely:
/// `macro_err!(span, "macro '{}' expects {} arguments", name, n)`.
#[macro_export]
macro_rules! macro_err {
    ($span:expr, $($arg:tt)*) => {
        $crate::diagnostics::MantraError::new(format!($($arg)*), $span)
    };
}
