//! Scalar semantics: arithmetic promotion, strings, booleans, control flow.

use pretty_assertions::assert_eq;
use vesper::{CollectStringPrint, ExcType, Exception, NoPrint, Object, Runner};

fn run(code: &str) -> Object {
    Runner::new(code, "test.vsp").unwrap().run(&mut NoPrint).unwrap()
}

fn run_show(code: &str) -> String {
    let mut out = CollectStringPrint::new();
    Runner::new(code, "test.vsp").unwrap().run(&mut out).unwrap();
    out.into_output()
}

fn run_err(code: &str) -> Exception {
    Runner::new(code, "test.vsp").unwrap().run(&mut NoPrint).unwrap_err()
}

// === numeric promotion ===

#[test]
fn int_plus_float_promotes() {
    assert_eq!(run("2 + 3.0"), Object::Float(5.0));
    assert_eq!(run("2.0 + 3"), Object::Float(5.0));
}

#[test]
fn int_arithmetic_stays_int() {
    assert_eq!(run("2 + 3"), Object::Int(5));
    assert_eq!(run("2 - 3"), Object::Int(-1));
    assert_eq!(run("6 * 7"), Object::Int(42));
}

#[test]
fn division_always_yields_float() {
    assert_eq!(run("7 / 2"), Object::Float(3.5));
    assert_eq!(run("6 / 3"), Object::Float(2.0));
}

#[test]
fn modulo_is_int_only() {
    assert_eq!(run("7 % 3"), Object::Int(1));
    assert_eq!(run_err("7.0 % 3").exc_type, ExcType::TypeError);
}

#[test]
fn power_always_yields_float() {
    assert_eq!(run("2 ^ 3"), Object::Float(8.0));
    assert_eq!(run("2 ^ -1"), Object::Float(0.5));
}

#[test]
fn unary_minus_binds_looser_than_power() {
    assert_eq!(run("-2 ^ 2"), Object::Float(-4.0));
}

#[test]
fn division_by_zero_raises() {
    assert_eq!(run_err("1 / 0").exc_type, ExcType::ZeroDivisionError);
    assert_eq!(run_err("1.0 / 0.0").exc_type, ExcType::ZeroDivisionError);
    assert_eq!(run_err("1 % 0").exc_type, ExcType::ZeroDivisionError);
}

#[test]
fn integer_overflow_raises() {
    assert_eq!(run_err("9223372036854775807 + 1").exc_type, ExcType::OverflowError);
}

#[test]
fn arithmetic_rejects_bools() {
    assert_eq!(run_err("true + 1").exc_type, ExcType::TypeError);
}

// === strings ===

#[test]
fn string_concat_stringifies_partners() {
    assert_eq!(run("\"a\" + 1"), Object::Str("a1".to_owned()));
    assert_eq!(run("1.5 + \"s\""), Object::Str("1.5s".to_owned()));
    assert_eq!(run("\"v\" + true"), Object::Str("vtrue".to_owned()));
    assert_eq!(run("\"n\" + null"), Object::Str("nnull".to_owned()));
}

#[test]
fn string_repeat() {
    assert_eq!(run("\"ab\" * 3"), Object::Str("ababab".to_owned()));
    assert_eq!(run("3 * \"ab\""), Object::Str("ababab".to_owned()));
    assert_eq!(run("\"ab\" * 0"), Object::Str(String::new()));
}

#[test]
fn string_repeat_length_scales() {
    assert_eq!(run("(\"abc\" * 4).len"), Object::Int(12));
}

#[test]
fn negative_repeat_raises() {
    assert_eq!(run_err("\"x\" * -1").exc_type, ExcType::ValueError);
}

#[test]
fn string_index_yields_one_char_string() {
    assert_eq!(run("\"hey\"[1]"), Object::Str("e".to_owned()));
    assert_eq!(run("\"hey\"[-1]"), Object::Str("y".to_owned()));
    assert_eq!(run_err("\"hey\"[3]").exc_type, ExcType::IndexError);
}

#[test]
fn string_interpolation() {
    assert_eq!(run_show("let x = 4\nshow: \"x is {x + 1}!\""), "x is 5!\n");
    assert_eq!(run_show("show: \"{1.0} and {\"in\" + \"ner\"}\""), "1.0 and inner\n");
}

// === booleans ===

#[test]
fn and_or_short_circuit() {
    assert_eq!(run("false and (1 / 0) == 1.0"), Object::Bool(false));
    assert_eq!(run("true or (1 / 0) == 1.0"), Object::Bool(true));
    assert_eq!(run("true and false"), Object::Bool(false));
    assert_eq!(run("false or true"), Object::Bool(true));
}

#[test]
fn bool_operands_are_required() {
    assert_eq!(run_err("1 and true").exc_type, ExcType::TypeError);
    assert_eq!(run_err("true and 1").exc_type, ExcType::TypeError);
}

#[test]
fn not_requires_bool() {
    assert_eq!(run("not false"), Object::Bool(true));
    assert_eq!(run_err("not 1").exc_type, ExcType::TypeError);
}

#[test]
fn ternary_picks_branch() {
    assert_eq!(run("true ? 1 : 2"), Object::Int(1));
    assert_eq!(run("false ? 1 : 2"), Object::Int(2));
    assert_eq!(run_err("1 ? 2 : 3").exc_type, ExcType::TypeError);
}

// === comparisons ===

#[test]
fn numeric_comparisons_coerce() {
    assert_eq!(run("1 < 2.5"), Object::Bool(true));
    assert_eq!(run("true > 0"), Object::Bool(true));
    assert_eq!(run("2 <= 2"), Object::Bool(true));
    assert_eq!(run("2 >= 3"), Object::Bool(false));
}

#[test]
fn ordering_is_numbers_only() {
    assert_eq!(run_err("\"a\" < \"b\"").exc_type, ExcType::TypeError);
}

#[test]
fn equality_rules() {
    assert_eq!(run("1 == 1.0"), Object::Bool(true));
    assert_eq!(run("true == 1"), Object::Bool(true));
    assert_eq!(run("\"a\" == \"a\""), Object::Bool(true));
    assert_eq!(run("1 == \"1\""), Object::Bool(false));
    assert_eq!(run("null == null"), Object::Bool(true));
    assert_eq!(run("1 != 2"), Object::Bool(true));
}

// === variables and control flow ===

#[test]
fn let_binds_and_assignment_walks_scopes() {
    assert_eq!(run("let x = 1\nx = x + 2\nx"), Object::Int(3));
}

#[test]
fn assignment_to_undeclared_name_raises() {
    assert_eq!(run_err("y = 1").exc_type, ExcType::NameError);
}

#[test]
fn unknown_name_raises() {
    assert_eq!(run_err("nope").exc_type, ExcType::NameError);
}

#[test]
fn while_loop_with_break_and_continue() {
    let code = "\
let total = 0
let i = 0
while true {
    i = i + 1
    if i > 10 { break }
    if i % 2 == 0 { continue }
    total = total + i
}
total";
    assert_eq!(run(code), Object::Int(25));
}

#[test]
fn for_loop_over_array() {
    assert_eq!(run("let total = 0\nfor x in [1, 2, 3, 4] { total = total + x }\ntotal"), Object::Int(10));
}

#[test]
fn for_loop_over_string_chars() {
    assert_eq!(run_show("for c in \"abc\" { show: c }"), "a\nb\nc\n");
}

#[test]
fn else_if_chain() {
    let code = "\
funct grade(n) {
    if n >= 90 { return \"A\" }
    else if n >= 80 { return \"B\" }
    else { return \"C\" }
}
grade(85)";
    assert_eq!(run(code), Object::Str("B".to_owned()));
}

#[test]
fn show_prints_float_form() {
    assert_eq!(run_show("show: 2 + 3.0"), "5.0\n");
    assert_eq!(run_show("show: 5"), "5\n");
    assert_eq!(run_show("show: [1, \"two\"]"), "[1, \"two\"]\n");
}

#[test]
fn error_location_points_at_the_failing_line() {
    let err = run_err("let a = 1\nlet b = a / 0");
    assert_eq!(err.exc_type, ExcType::ZeroDivisionError);
    assert_eq!(err.loc.line, 2);
}
