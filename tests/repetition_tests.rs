//! Repetition (loop-unrolling) behavior: iteration counts, bucketing,
//! separator combinators, and the statement/expression duality.

mod common;

use common::{expand, expand_ok, rendered};
use mantra::ast::builder::*;
use mantra::ast::{Stmt, UnaryOp};

// +[sep?, [collections...], transform]
fn repetition(elements: Vec<mantra::ast::Expr>) -> mantra::ast::Expr {
    unary(UnaryOp::Plus, array(elements))
}

#[test]
fn add_macro_folds_to_a_literal() {
    // function $add(...$nums) { return +["+", [$nums], ($n) => $n]; }
    let def = fn_decl(
        "$add",
        vec![spread_param("$nums")],
        vec![ret(repetition(vec![
            str_("+"),
            array(vec![id("$nums")]),
            closure(vec!["$n"], vec![ret(id("$n"))]),
        ]))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("s", macro_call("$add", vec![num(1.0), num(2.0), num(3.0)])),
    ]);
    assert_eq!(rendered(&out), "const s = 6;");
}

#[test]
fn zero_length_input_reduces_to_the_noop_literal() {
    let def = fn_decl(
        "$add",
        vec![spread_param("$nums")],
        vec![ret(repetition(vec![
            str_("+"),
            array(vec![id("$nums")]),
            closure(vec!["$n"], vec![ret(id("$n"))]),
        ]))],
    );
    let out = expand_ok(vec![def, const_decl("z", macro_call("$add", vec![]))]);
    assert_eq!(rendered(&out), "const z = undefined;");
}

#[test]
fn unequal_inputs_pad_exhausted_buckets_with_null() {
    // function $zip() { return +["[]", [[1,2,3], ["a"]], ($x, $y) => [$x, $y]]; }
    let def = fn_decl(
        "$zip",
        vec![],
        vec![ret(repetition(vec![
            str_("[]"),
            array(vec![
                array(vec![num(1.0), num(2.0), num(3.0)]),
                array(vec![str_("a")]),
            ]),
            closure(vec!["$x", "$y"], vec![ret(array(vec![id("$x"), id("$y")]))]),
        ]))],
    );
    let out = expand_ok(vec![def, const_decl("z", macro_call("$zip", vec![]))]);
    assert_eq!(
        rendered(&out),
        "const z = [[1, \"a\"], [2, null], [3, null]];"
    );
}

#[test]
fn current_index_intrinsic_tracks_iterations() {
    // function $tag(...$vals) { return +["[]", [$vals], ($v) => $v + $$i!()]; }
    let def = fn_decl(
        "$tag",
        vec![spread_param("$vals")],
        vec![ret(repetition(vec![
            str_("[]"),
            array(vec![id("$vals")]),
            closure(
                vec!["$v"],
                vec![ret(binary(
                    mantra::ast::BinOp::Add,
                    id("$v"),
                    macro_call("$$i", vec![]),
                ))],
            ),
        ]))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("t", macro_call("$tag", vec![str_("a"), str_("b")])),
    ]);
    assert_eq!(rendered(&out), "const t = [\"a0\", \"b1\"];");
}

#[test]
fn current_index_is_negative_one_outside_repetition() {
    let def = fn_decl("$where", vec![], vec![ret(macro_call("$$i", vec![]))]);
    let out = expand_ok(vec![def, const_decl("w", macro_call("$where", vec![]))]);
    assert_eq!(rendered(&out), "const w = -1;");
}

#[test]
fn comma_separator_builds_a_sequence() {
    let def = fn_decl(
        "$all",
        vec![spread_param("$fs")],
        vec![ret(repetition(vec![
            str_("()"),
            array(vec![id("$fs")]),
            closure(vec!["$f"], vec![ret(call(id("$f"), vec![]))]),
        ]))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("r", macro_call("$all", vec![id("a"), id("b")])),
    ]);
    assert_eq!(rendered(&out), "const r = (a(), b());");
}

#[test]
fn access_separator_builds_a_member_chain() {
    let def = fn_decl(
        "$dig",
        vec![spread_param("$path")],
        vec![ret(repetition(vec![
            str_("."),
            array(vec![id("$path")]),
            closure(vec!["$p"], vec![ret(id("$p"))]),
        ]))],
    );
    let out = expand_ok(vec![
        def,
        const_decl(
            "v",
            macro_call("$dig", vec![id("config"), str_("server"), num(0.0)]),
        ),
    ]);
    assert_eq!(rendered(&out), "const v = config.server[0];");
}

#[test]
fn object_separator_assembles_pairs() {
    let def = fn_decl(
        "$obj",
        vec![],
        vec![ret(repetition(vec![
            str_("{}"),
            array(vec![array(vec![
                array(vec![str_("a"), num(1.0)]),
                array(vec![str_("b"), num(2.0)]),
            ])]),
            closure(vec!["$pair"], vec![ret(id("$pair"))]),
        ]))],
    );
    let out = expand_ok(vec![def, const_decl("o", macro_call("$obj", vec![]))]);
    assert_eq!(rendered(&out), "const o = {\"a\": 1, \"b\": 2};");
}

#[test]
fn no_separator_splices_statements_in_statement_position() {
    // function $emit(...$names) { +[[$names], ($n) => { log($n); }]; }
    let def = fn_decl(
        "$emit",
        vec![spread_param("$names")],
        vec![expr_stmt(repetition(vec![
            array(vec![id("$names")]),
            closure(vec!["$n"], vec![expr_stmt(call(id("log"), vec![id("$n")]))]),
        ]))],
    );
    let out = expand_ok(vec![
        def,
        expr_stmt(macro_call("$emit", vec![str_("a"), str_("b")])),
    ]);
    assert_eq!(rendered(&out), "log(\"a\"); log(\"b\");");
}

#[test]
fn no_separator_wraps_in_an_iife_in_expression_position() {
    let def = fn_decl(
        "$run",
        vec![],
        vec![ret(repetition(vec![
            array(vec![array(vec![str_("x"), str_("y")])]),
            closure(vec!["$n"], vec![expr_stmt(call(id("log"), vec![id("$n")]))]),
        ]))],
    );
    let out = expand_ok(vec![def, const_decl("r", macro_call("$run", vec![]))]);
    assert_eq!(
        rendered(&out),
        "const r = () => { log(\"x\"); log(\"y\"); }();"
    );
}

#[test]
fn unknown_separator_is_a_diagnostic() {
    let def = fn_decl(
        "$bad",
        vec![],
        vec![ret(repetition(vec![
            str_("@@"),
            array(vec![array(vec![num(1.0)])]),
            closure(vec!["$n"], vec![ret(id("$n"))]),
        ]))],
    );
    let (_, exp) = expand(vec![def, expr_stmt(macro_call("$bad", vec![]))]);
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("separator"));
}

#[test]
fn missing_transform_is_a_diagnostic() {
    let def = fn_decl(
        "$bad",
        vec![],
        vec![ret(repetition(vec![array(vec![array(vec![num(1.0)])])]))],
    );
    let (out, exp) = expand(vec![def, expr_stmt(macro_call("$bad", vec![]))]);
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("transform"));
    assert!(matches!(out.body.as_slice(), [] | [Stmt::Empty(_)]));
}
