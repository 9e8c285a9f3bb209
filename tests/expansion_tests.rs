//! Core expansion behavior: substitution, partial evaluation, Save and
//! Accumulator parameters, hygiene, and the call/expression duality.

mod common;

use common::{expand, expand_ok, rendered};
use mantra::ast::builder::*;
use mantra::ast::{BinOp, UnaryOp};

#[test]
fn parameter_substitutes_and_folds() {
    // function $double($x) { return $x * 2; }
    let def = fn_decl(
        "$double",
        vec![param("$x")],
        vec![ret(binary(BinOp::Mul, id("$x"), num(2.0)))],
    );
    let out = expand_ok(vec![def, const_decl("y", macro_call("$double", vec![num(4.0)]))]);
    assert_eq!(rendered(&out), "const y = 8;");
}

#[test]
fn macro_definition_is_registered_not_emitted() {
    let def = fn_decl("$noop", vec![], vec![]);
    let out = expand_ok(vec![def, expr_stmt(call(id("keep"), vec![]))]);
    assert_eq!(rendered(&out), "keep();");
}

#[test]
fn non_literal_arguments_rebuild_the_generic_form() {
    let def = fn_decl(
        "$double",
        vec![param("$x")],
        vec![ret(binary(BinOp::Mul, id("$x"), num(2.0)))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("y", macro_call("$double", vec![id("n")])),
    ]);
    assert_eq!(rendered(&out), "const y = (n * 2);");
}

#[test]
fn string_concat_folds_when_either_side_is_string() {
    let def = fn_decl(
        "$tag",
        vec![param("$x")],
        vec![ret(binary(BinOp::Add, str_("id-"), id("$x")))],
    );
    let out = expand_ok(vec![def, const_decl("t", macro_call("$tag", vec![num(7.0)]))]);
    assert_eq!(rendered(&out), "const t = \"id-7\";");
}

#[test]
fn short_circuit_returns_the_taken_operand_subtree() {
    // function $guard($flag) { return $flag && effect(); }
    let def = fn_decl(
        "$guard",
        vec![param("$flag")],
        vec![ret(binary(BinOp::And, id("$flag"), call(id("effect"), vec![])))],
    );
    let out = expand_ok(vec![
        def.clone(),
        const_decl("t", macro_call("$guard", vec![bool_(true)])),
        const_decl("f", macro_call("$guard", vec![bool_(false)])),
    ]);
    // Truthy keeps the side-effecting right subtree; falsy keeps the left.
    assert_eq!(rendered(&out), "const t = effect(); const f = false;");
}

#[test]
fn ternary_collapses_to_the_taken_branch() {
    let def = fn_decl(
        "$pick",
        vec![param("$c")],
        vec![ret(cond(id("$c"), str_("yes"), str_("no")))],
    );
    let out = expand_ok(vec![
        def,
        const_decl(
            "p",
            macro_call("$pick", vec![binary(BinOp::Gt, num(1.0), num(0.0))]),
        ),
    ]);
    assert_eq!(rendered(&out), "const p = \"yes\";");
}

#[test]
fn known_object_member_access_resolves_at_compile_time() {
    let def = fn_decl(
        "$port",
        vec![param("$cfg")],
        vec![ret(member(id("$cfg"), "port"))],
    );
    let out = expand_ok(vec![
        def,
        const_decl(
            "p",
            macro_call(
                "$port",
                vec![object(vec![("port", num(8080.0)), ("host", str_("lo"))])],
            ),
        ),
    ]);
    assert_eq!(rendered(&out), "const p = 8080;");
}

#[test]
fn known_array_index_resolves_and_out_of_range_is_undefined() {
    let def = fn_decl(
        "$nth",
        vec![param("$arr"), param("$i")],
        vec![ret(index(id("$arr"), id("$i")))],
    );
    let items = array(vec![str_("a"), str_("b")]);
    let out = expand_ok(vec![
        def,
        const_decl("hit", macro_call("$nth", vec![items.clone(), num(1.0)])),
        const_decl("miss", macro_call("$nth", vec![items, num(5.0)])),
    ]);
    assert_eq!(rendered(&out), "const hit = \"b\"; const miss = undefined;");
}

#[test]
fn typeof_folds_over_literals() {
    let def = fn_decl(
        "$kind",
        vec![param("$v")],
        vec![ret(unary(UnaryOp::TypeOf, id("$v")))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("k", macro_call("$kind", vec![num(3.0)])),
    ]);
    assert_eq!(rendered(&out), "const k = \"number\";");
}

#[test]
fn spread_parameter_collects_remaining_arguments() {
    // function $list(...$items) { return $items; }
    let def = fn_decl("$list", vec![spread_param("$items")], vec![ret(id("$items"))]);
    let out = expand_ok(vec![
        def,
        const_decl("l", macro_call("$list", vec![num(1.0), num(2.0), num(3.0)])),
    ]);
    assert_eq!(rendered(&out), "const l = [1, 2, 3];");
}

#[test]
fn single_spread_argument_passes_its_collection_through() {
    let def = fn_decl("$list", vec![spread_param("$items")], vec![ret(id("$items"))]);
    let out = expand_ok(vec![
        def,
        const_decl(
            "l",
            macro_call("$list", vec![spread(array(vec![num(4.0), num(5.0)]))]),
        ),
    ]);
    assert_eq!(rendered(&out), "const l = [4, 5];");
}

#[test]
fn save_parameter_materializes_a_single_evaluation() {
    // function $twice($v: Save) { return $v + $v; }
    let def = fn_decl(
        "$twice",
        vec![typed_param("$v", ty("Save"))],
        vec![ret(binary(BinOp::Add, id("$v"), id("$v")))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("r", macro_call("$twice", vec![call(id("next"), vec![])])),
    ]);
    // The argument expression appears exactly once, in the escaped binding.
    assert_eq!(
        rendered(&out),
        "let v_1 = next(); const r = (v_1 + v_1);"
    );
}

#[test]
fn save_parameter_leaves_bare_identifiers_alone() {
    let def = fn_decl(
        "$twice",
        vec![typed_param("$v", ty("Save"))],
        vec![ret(binary(BinOp::Add, id("$v"), id("$v")))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("r", macro_call("$twice", vec![id("x")])),
    ]);
    assert_eq!(rendered(&out), "const r = (x + x);");
}

#[test]
fn accumulator_default_increments_across_calls() {
    // function $uid($n: Accumulator = 10) { return $n; }
    let def = fn_decl(
        "$uid",
        vec![defaulted_param("$n", ty("Accumulator"), num(10.0))],
        vec![ret(id("$n"))],
    );
    let out = expand_ok(vec![
        def,
        const_decl("a", macro_call("$uid", vec![])),
        const_decl("b", macro_call("$uid", vec![])),
        const_decl("c", macro_call("$uid", vec![])),
    ]);
    assert_eq!(rendered(&out), "const a = 10; const b = 11; const c = 12;");
}

#[test]
fn hygiene_renames_locals_per_expansion() {
    // function $counter() { const state = 0; emit(state); }
    let def = fn_decl(
        "$counter",
        vec![],
        vec![
            const_decl("state", num(0.0)),
            expr_stmt(call(id("emit"), vec![id("state")])),
        ],
    );
    let out = expand_ok(vec![
        def,
        expr_stmt(macro_call("$counter", vec![])),
        expr_stmt(macro_call("$counter", vec![])),
    ]);
    assert_eq!(
        rendered(&out),
        "const state_1 = 0; emit(state_1); const state_2 = 0; emit(state_2);"
    );
}

#[test]
fn store_bindings_fold_without_reaching_the_output() {
    // function $area($w) { const $sq = $w * $w; return $sq + $sq; }
    let def = fn_decl(
        "$area",
        vec![param("$w")],
        vec![
            const_decl("$sq", binary(BinOp::Mul, id("$w"), id("$w"))),
            ret(binary(BinOp::Add, id("$sq"), id("$sq"))),
        ],
    );
    let out = expand_ok(vec![
        def,
        const_decl("a", macro_call("$area", vec![num(3.0)])),
    ]);
    assert_eq!(rendered(&out), "const a = 18;");
}

#[test]
fn expression_position_wraps_multiple_statements_in_an_iife() {
    // function $pair() { work(); return 9; }
    let def = fn_decl(
        "$pair",
        vec![],
        vec![expr_stmt(call(id("work"), vec![])), ret(num(9.0))],
    );
    let out = expand_ok(vec![def, const_decl("v", macro_call("$pair", vec![]))]);
    assert_eq!(
        rendered(&out),
        "const v = () => { work(); return 9; }();"
    );
}

#[test]
fn statement_position_splices_multiple_statements() {
    let def = fn_decl(
        "$pair",
        vec![],
        vec![
            expr_stmt(call(id("first"), vec![])),
            expr_stmt(call(id("second"), vec![])),
        ],
    );
    let out = expand_ok(vec![def, expr_stmt(macro_call("$pair", vec![]))]);
    assert_eq!(rendered(&out), "first(); second();");
}

#[test]
fn if_collapse_drops_the_untaken_branch_inside_a_frame() {
    // function $sel($flag) { if ($flag) { yes(); } else { no(); } }
    let def = fn_decl(
        "$sel",
        vec![param("$flag")],
        vec![if_stmt(
            id("$flag"),
            block(vec![expr_stmt(call(id("yes"), vec![]))]),
            Some(block(vec![expr_stmt(call(id("no"), vec![]))])),
        )],
    );
    let out = expand_ok(vec![
        def,
        expr_stmt(macro_call("$sel", vec![bool_(false)])),
    ]);
    assert_eq!(rendered(&out), "no();");
}

#[test]
fn marked_call_to_unknown_macro_raises_a_diagnostic() {
    let (_, exp) = expand(vec![expr_stmt(macro_call("$missing", vec![]))]);
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("$missing"));
}

#[test]
fn self_expanding_macro_hits_the_recursion_limit() {
    // function $loop() { $loop!(); }
    let def = fn_decl(
        "$loop",
        vec![],
        vec![expr_stmt(macro_call("$loop", vec![]))],
    );
    let (_, exp) = expand(vec![def, expr_stmt(macro_call("$loop", vec![]))]);
    assert_eq!(exp.diagnostics().len(), 1);
    assert!(exp.diagnostics()[0].message.contains("recursion limit"));
}

#[test]
fn failure_keeps_prior_statements_and_passes_the_rest_through() {
    let out_stmt = expr_stmt(call(id("before"), vec![]));
    let bad = expr_stmt(macro_call("$missing", vec![]));
    let after = expr_stmt(call(id("after"), vec![]));
    let (out, exp) = expand(vec![out_stmt, bad, after]);
    assert_eq!(exp.diagnostics().len(), 1);
    assert_eq!(rendered(&out), "before(); after();");
}

#[test]
fn expansion_trace_records_each_invocation() {
    let def = fn_decl("$one", vec![], vec![ret(num(1.0))]);
    let (_, exp) = expand(vec![
        def,
        const_decl("a", macro_call("$one", vec![])),
        const_decl("b", macro_call("$one", vec![])),
    ]);
    let names: Vec<_> = exp.trace().iter().map(|s| s.macro_name.as_str()).collect();
    assert_eq!(names, ["$one", "$one"]);
}
