//! Repetition (loop-unrolling) frames and separator combinators.
//!
//! The trigger form is a unary-plus-prefixed array literal carrying, in any
//! order: an optional separator string, an optional array of per-iteration
//! input collections, and the mandatory transform function whose parameter
//! list names the loop variables. The orchestrator drives iteration; this
//! module owns the pure pieces: element bucketing and result combination.

use indexmap::IndexMap;

use crate::ast::{builder, BinOp, Expr, Ident, MemberKey, Prop, PropKey, Span};
use crate::diagnostics::MantraError;
use crate::macro_err;

/// State of one active repetition construct.
#[derive(Debug)]
pub struct RepetitionFrame {
    pub index: usize,
    pub vars: Vec<String>,
    buckets: IndexMap<String, Vec<Expr>>,
}

impl RepetitionFrame {
    /// Buckets collection elements one-per-declared-loop-variable, cycling
    /// round-robin when there are more collections than names.
    pub fn new(vars: Vec<String>, collections: Vec<Vec<Expr>>) -> Self {
        let mut buckets: IndexMap<String, Vec<Expr>> =
            vars.iter().map(|v| (v.clone(), Vec::new())).collect();
        if !vars.is_empty() {
            for (i, collection) in collections.into_iter().enumerate() {
                let var = &vars[i % vars.len()];
                buckets.get_mut(var).expect("declared var").extend(collection);
            }
        }
        RepetitionFrame {
            index: 0,
            vars,
            buckets,
        }
    }

    /// True when `name` is one of this frame's loop variables.
    pub fn binds(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    /// The element bound to a loop variable at the current index: the bucket
    /// entry, or null once the bucket is exhausted.
    pub fn element(&self, name: &str) -> Option<Expr> {
        let bucket = self.buckets.get(name)?;
        Some(
            bucket
                .get(self.index)
                .cloned()
                .unwrap_or_else(builder::null),
        )
    }
}

/// How accumulated iteration results combine into one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// `"[]"` — array-literal join.
    Array,
    /// `"+"`, `"-"`, `"*"`, `"||"`, `"&&"` — left-fold binary operator chain.
    Fold(BinOp),
    /// `"()"` — comma sequence.
    Comma,
    /// `"."` — member-access chain.
    Access,
    /// `"{}"` — object-literal assembly from `[key, value]` pairs.
    Object,
}

impl Separator {
    pub fn parse(text: &str) -> Option<Separator> {
        match text {
            "[]" => Some(Separator::Array),
            "+" => Some(Separator::Fold(BinOp::Add)),
            "-" => Some(Separator::Fold(BinOp::Sub)),
            "*" => Some(Separator::Fold(BinOp::Mul)),
            "||" => Some(Separator::Fold(BinOp::Or)),
            "&&" => Some(Separator::Fold(BinOp::And)),
            "()" => Some(Separator::Comma),
            "." => Some(Separator::Access),
            "{}" => Some(Separator::Object),
            _ => None,
        }
    }
}

/// Combines per-iteration results through the separator's combinator.
pub fn combine(sep: Separator, parts: Vec<Expr>, span: Span) -> Result<Expr, MantraError> {
    match sep {
        Separator::Array => Ok(Expr::Array(parts, span)),
        Separator::Comma => {
            if parts.is_empty() {
                Ok(Expr::Undefined(span))
            } else if parts.len() == 1 {
                Ok(parts.into_iter().next().expect("one part"))
            } else {
                Ok(Expr::Seq(parts, span))
            }
        }
        Separator::Fold(op) => {
            let mut iter = parts.into_iter();
            let Some(first) = iter.next() else {
                return Ok(Expr::Undefined(span));
            };
            Ok(iter.fold(first, |acc, part| Expr::Binary {
                op,
                left: Box::new(acc),
                right: Box::new(part),
                span,
            }))
        }
        Separator::Access => {
            let mut iter = parts.into_iter();
            let Some(first) = iter.next() else {
                return Ok(Expr::Undefined(span));
            };
            Ok(iter.fold(first, |acc, part| Expr::Member {
                object: Box::new(acc),
                key: access_key(part),
                span,
            }))
        }
        Separator::Object => {
            let mut props = Vec::with_capacity(parts.len());
            for part in parts {
                let Expr::Array(mut pair, pair_span) = part else {
                    return Err(macro_err!(
                        span,
                        "object-assembling repetition requires each iteration to produce a [key, value] pair"
                    ));
                };
                if pair.len() != 2 {
                    return Err(macro_err!(
                        pair_span,
                        "object-assembling repetition requires [key, value] pairs, got {} elements",
                        pair.len()
                    ));
                }
                let value = pair.pop().expect("value");
                let key = pair.pop().expect("key");
                props.push(Prop {
                    key: object_key(key),
                    value,
                });
            }
            Ok(Expr::Object(props, span))
        }
    }
}

// Member-chain links prefer plain property access when the part names one.
fn access_key(part: Expr) -> MemberKey {
    match part {
        Expr::Ident(id) => MemberKey::Prop(id),
        Expr::Str(s, span) => MemberKey::Prop(Ident { name: s, span }),
        other => MemberKey::Index(Box::new(other)),
    }
}

fn object_key(key: Expr) -> PropKey {
    match key {
        Expr::Str(s, _) => PropKey::Str(s),
        Expr::Num(n, _) => PropKey::Num(n),
        Expr::Ident(id) => PropKey::Computed(Box::new(Expr::Ident(id))),
        other => PropKey::Computed(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;

    #[test]
    fn round_robin_bucketing() {
        let frame = RepetitionFrame::new(
            vec!["a".into(), "b".into()],
            vec![
                vec![num(1.0)],
                vec![num(2.0)],
                vec![num(3.0)],
            ],
        );
        // Third collection wraps around onto "a".
        assert_eq!(frame.element("a"), Some(num(1.0)));
        assert_eq!(frame.element("b"), Some(num(2.0)));
    }

    #[test]
    fn exhausted_bucket_yields_null() {
        let mut frame = RepetitionFrame::new(
            vec!["a".into(), "b".into()],
            vec![vec![num(1.0), num(2.0)], vec![num(10.0)]],
        );
        frame.index = 1;
        assert_eq!(frame.element("a"), Some(num(2.0)));
        assert_eq!(frame.element("b"), Some(null()));
        assert_eq!(frame.element("missing"), None);
    }

    #[test]
    fn fold_combinator_builds_left_chain() {
        let combined = combine(
            Separator::Fold(BinOp::Add),
            vec![num(1.0), num(2.0), num(3.0)],
            Span::default(),
        )
        .unwrap();
        assert_eq!(combined.pretty(), "((1 + 2) + 3)");
    }

    #[test]
    fn access_combinator_builds_member_chain() {
        let combined = combine(
            Separator::Access,
            vec![id("config"), str_("server"), num(0.0)],
            Span::default(),
        )
        .unwrap();
        assert_eq!(combined.pretty(), "config.server[0]");
    }

    #[test]
    fn object_combinator_requires_pairs() {
        let ok = combine(
            Separator::Object,
            vec![array(vec![str_("a"), num(1.0)])],
            Span::default(),
        )
        .unwrap();
        assert_eq!(ok.pretty(), "{\"a\": 1}");
        assert!(combine(Separator::Object, vec![num(1.0)], Span::default()).is_err());
    }

    #[test]
    fn empty_fold_reduces_to_noop() {
        let combined = combine(Separator::Fold(BinOp::Add), vec![], Span::default()).unwrap();
        assert!(matches!(combined, Expr::Undefined(_)));
    }
}
