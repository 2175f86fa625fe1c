// ABOUTME: End-to-end scenarios driving the interpreter through full programs

use numfu::error::ErrorKind;
use numfu::Interpreter;

/// Run a program and return its rendered top-level results.
fn run(code: &str) -> Vec<String> {
    let mut interp = Interpreter::with_capture(15, 10000, None);
    interp
        .run_source(code, "test.nfu", false)
        .unwrap_or_else(|e| panic!("program failed: {e}\n{code}"))
}

/// Run a program with echoing enabled and return everything written to
/// the output stream.
fn run_output(code: &str) -> String {
    let mut interp = Interpreter::with_capture(15, 10000, None);
    interp
        .run_source(code, "test.nfu", true)
        .unwrap_or_else(|e| panic!("program failed: {e}\n{code}"));
    interp.captured_output().unwrap()
}

fn run_err(code: &str) -> numfu::NumFuError {
    let mut interp = Interpreter::with_capture(15, 10000, None);
    interp
        .run_source(code, "test.nfu", false)
        .expect_err("expected failure")
}

// ----------------------------------------------------------------------
// The documented end-to-end scenarios
// ----------------------------------------------------------------------

#[test]
fn scenario_factorial() {
    assert_eq!(
        run("let fact = {n -> if n <= 1 then 1 else n * fact(n - 1)} in fact(10)"),
        vec!["3628800"]
    );
}

#[test]
fn scenario_grouped_arithmetic() {
    assert_eq!(run("(1 + 2) * 3"), vec!["9"]);
}

#[test]
fn scenario_pipe_map_sum() {
    assert_eq!(run("[1,2,3,4] |> map({x -> x*x}) |> sum"), vec!["30"]);
}

#[test]
fn scenario_placeholder_partial() {
    assert_eq!(run("let add = {a,b -> a+b} in add(_,5)(3)"), vec!["8"]);
}

#[test]
fn scenario_chained_comparison() {
    assert_eq!(run("if 0 == 0 < 1 then \"ok\" else \"no\""), vec!["ok"]);
}

#[test]
fn scenario_tail_loop() {
    assert_eq!(
        run("let loop = {n,acc -> if n == 0 then acc else loop(n-1, acc+n)} in loop(100000, 0)"),
        vec!["5000050000"]
    );
}

#[test]
fn scenario_print_then_value() {
    assert_eq!(run_output("print(\"hi\"); 2+2"), "hi\n4\n");
}

// ----------------------------------------------------------------------
// Universal properties
// ----------------------------------------------------------------------

#[test]
fn placeholder_subsets_match_direct_application() {
    let direct = run("{a, b, c -> a * 100 + b * 10 + c}(7, 8, 9)");
    for partial in [
        "{a, b, c -> a * 100 + b * 10 + c}(_, 8, 9)(7)",
        "{a, b, c -> a * 100 + b * 10 + c}(7, _, 9)(8)",
        "{a, b, c -> a * 100 + b * 10 + c}(_, _, 9)(7, 8)",
        "{a, b, c -> a * 100 + b * 10 + c}(_, _, _)(7, 8, 9)",
    ] {
        assert_eq!(run(partial), direct, "{partial}");
    }
}

#[test]
fn negative_indices_mirror_positive() {
    assert_eq!(run("[1, 2, 3][-1]"), run("[1, 2, 3][2]"));
    assert_eq!(run("[1, 2, 3][-3]"), run("[1, 2, 3][0]"));
    assert_eq!(run_err("[1, 2, 3][-4]").kind, ErrorKind::Index);
}

#[test]
fn list_elements_use_capture_environment() {
    // The element expressions close over the let-bound x.
    assert_eq!(run("let x = 10 in [x, x * 2][1]"), vec!["20"]);
    assert_eq!(
        run("let mk = {x -> [x, x + 1]} in let xs = mk(5) in xs[0] + xs[1]"),
        vec!["11"]
    );
}

#[test]
fn evaluation_is_deterministic() {
    let program = "let f = {n -> if n == 0 then 1 else n * f(n - 1)} in [f(5), f(6)] |> sum";
    assert_eq!(run(program), run(program));
}

#[test]
fn tail_calls_do_not_grow_host_stack() {
    // Mutual recursion through tail position, far deeper than the
    // native stack could take.
    let program = "
        let even = {n -> if n == 0 then true else odd(n - 1)},
            odd = {n -> if n == 0 then false else even(n - 1)}
        in even(200000)
    ";
    assert_eq!(run(program), vec!["true"]);
}

#[test]
fn short_circuit_skips_right_operand() {
    assert_eq!(run("false && error(\"unreachable\")"), vec!["false"]);
    assert_eq!(run("true || error(\"unreachable\")"), vec!["true"]);
}

#[test]
fn spread_with_placeholder_is_rejected() {
    let err = run_err("let f = {a, b, c -> a} in f(_, ...[1, 2])");
    assert_eq!(err.kind, ErrorKind::Type);
}

// ----------------------------------------------------------------------
// Language surface
// ----------------------------------------------------------------------

#[test]
fn test_multi_binding_let() {
    assert_eq!(run("let a = 2, b = 3 in a * b"), vec!["6"]);
}

#[test]
fn test_nested_closures_capture() {
    assert_eq!(
        run("let mkAdder = {n -> {x -> x + n}} in mkAdder(5)(10)"),
        vec!["15"]
    );
}

#[test]
fn test_curried_application_chain() {
    assert_eq!(
        run("let add3 = {a, b, c -> a + b + c} in add3(1)(2)(3)"),
        vec!["6"]
    );
}

#[test]
fn test_rest_parameter_collects() {
    assert_eq!(run("{first, ...rest -> first + sum(rest)}(1, 2, 3, 4)"), vec!["10"]);
}

#[test]
fn test_spread_in_list_literals() {
    assert_eq!(run("let xs = [2, 3] in [1, ...xs, 4]"), vec!["[1, 2, 3, 4]"]);
}

#[test]
fn test_string_operations() {
    assert_eq!(run("\"foo\" + \"bar\""), vec!["foobar"]);
    assert_eq!(run("\"ab\" * 3"), vec!["ababab"]);
    assert_eq!(run("length(\"hello\")"), vec!["5"]);
    assert_eq!(run("split(\"a,b,c\", \",\")"), vec!["[\"a\", \"b\", \"c\"]"]);
    assert_eq!(run("join([\"a\", \"b\"], \"-\")"), vec!["a-b"]);
    assert_eq!(run("slice(\"hello\", 1, 3)"), vec!["ell"]);
}

#[test]
fn test_list_operations() {
    assert_eq!(run("append([1, 2], 3)"), vec!["[1, 2, 3]"]);
    assert_eq!(run("member(2, [1, 2, 3])"), vec!["true"]);
    assert_eq!(run("member(9, [1, 2, 3])"), vec!["false"]);
    assert_eq!(run("[1, 2] + [3]"), vec!["[1, 2, 3]"]);
    assert_eq!(run("[0] * 3"), vec!["[0, 0, 0]"]);
    assert_eq!(run("slice([1, 2, 3, 4], 1, 2)"), vec!["[2, 3]"]);
}

#[test]
fn test_precision_flag_effect() {
    let mut narrow = Interpreter::with_capture(5, 10000, None);
    let out = narrow.run_source("1 / 3", "t.nfu", false).unwrap();
    assert_eq!(out, vec!["0.33333"]);

    let mut wide = Interpreter::with_capture(25, 10000, None);
    let out = wide.run_source("1 / 3", "t.nfu", false).unwrap();
    assert_eq!(out, vec!["0.3333333333333333333333333"]);
}

#[test]
fn test_math_module_values() {
    assert_eq!(run("import math\nmath.sqrt(144)"), vec!["12"]);
    assert_eq!(run("from math import exp\nexp(0)"), vec!["1"]);
    // sin of the rounded pi constant leaves only a residue at the
    // working precision, the same way mpmath behaves.
    assert_eq!(
        run("from math import sin\nabs(sin(pi)) < 1e-14"),
        vec!["true"]
    );
}

#[test]
fn test_number_tower() {
    assert_eq!(run("2 ^ 100"), vec!["1.26765060022823e+30"]);
    assert_eq!(run("10 % 3"), vec!["1"]);
    assert_eq!(run("abs(-5)"), vec!["5"]);
    assert_eq!(run("floor(2.9) + ceil(2.1)"), vec!["5"]);
    assert_eq!(run("round(2.567, 1)"), vec!["2.6"]);
}

#[test]
fn test_special_values() {
    assert_eq!(run("1 / 0"), vec!["inf"]);
    assert_eq!(run("inf + 1"), vec!["inf"]);
    assert_eq!(run("inf - inf"), vec!["nan"]);
    assert_eq!(run("nan == nan"), vec!["false"]);
}

#[test]
fn test_closures_render_as_source() {
    assert_eq!(run("{x -> x * 2}"), vec!["{x -> x * 2}"]);
    assert_eq!(
        run("let add = {a, b -> a + b} in add(2, _)"),
        vec!["{b -> 2 + b}"]
    );
}

#[test]
fn test_multiple_statements_stream_results() {
    assert_eq!(run("1 + 1; 2 + 2; 3 + 3"), vec!["2", "4", "6"]);
}

#[test]
fn test_constants_across_statements() {
    assert_eq!(run("let base = 10\nbase * 2; base * 3"), vec!["20", "30"]);
}

#[test]
fn test_deep_non_tail_recursion_is_bounded() {
    let mut interp = Interpreter::with_capture(15, 500, None);
    let err = interp
        .run_source(
            "let f = {n -> if n == 0 then 0 else 1 + f(n - 1)} in f(1000000)",
            "t.nfu",
            false,
        )
        .expect_err("recursion bound");
    assert_eq!(err.kind, ErrorKind::Recursion);
    assert!(err.message.contains("maximum recursion depth"));
}

#[test]
fn test_iter_depth_bound_distinguished() {
    let mut interp = Interpreter::with_capture(15, 10000, Some(100));
    let err = interp
        .run_source(
            "let loop = {n -> if n == 0 then 0 else loop(n - 1)} in loop(1000)",
            "t.nfu",
            false,
        )
        .expect_err("iteration bound");
    assert_eq!(err.kind, ErrorKind::Recursion);
    assert!(err.message.contains("tail-call recursion limit"));
}

#[test]
fn test_error_spans_point_at_source() {
    let err = run_err("1 + nosuch");
    let rendered = numfu::error::report(&err, "test.nfu", "1 + nosuch");
    assert!(rendered.contains("test.nfu:1:5"), "{rendered}");
    assert!(rendered.contains("NameError"), "{rendered}");
}

#[test]
fn test_assert_failure_stops_program() {
    let err = run_err("assert(false); 42");
    assert_eq!(err.kind, ErrorKind::Assertion);
}

#[test]
fn test_print_inside_expression() {
    let output = run_output("let x = println(\"traced\") in 5");
    assert_eq!(output, "traced\n5\n");
}

#[test]
fn test_lazy_list_elements_not_evaluated_until_indexed() {
    // The failing element is never forced.
    assert_eq!(run("[1, error(\"boom\"), 3][0]"), vec!["1"]);
    let err = run_err("[1, error(\"boom\"), 3][1]");
    assert_eq!(err.kind, ErrorKind::Runtime);
}
