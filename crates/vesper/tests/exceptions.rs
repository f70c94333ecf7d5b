//! try/catch/finally, raise, and unhandled exception surfacing.

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

#[test]
fn catch_binds_the_raised_value() {
    assert_eq!(run_show("try { raise \"boom\" } catch (e) { show: e }"), "boom\n");
}

#[test]
fn raised_values_are_not_limited_to_strings() {
    let code = "\
let caught = null
try { raise [1, 2] } catch (e) { caught = e }
caught";
    assert_eq!(run(code), Object::Array(vec![Object::Int(1), Object::Int(2)]));
}

#[test]
fn engine_errors_bind_as_describing_strings() {
    assert_eq!(
        run_show("try { let x = {}[\"k\"] } catch (e) { show: e }"),
        "KeyError: key `k` not found\n"
    );
}

#[test]
fn finally_runs_on_success_and_failure() {
    assert_eq!(
        run_show("try { show: \"body\" } finally { show: \"fin\" }"),
        "body\nfin\n"
    );
    assert_eq!(
        run_show("try { raise \"x\" } catch (e) { show: \"caught\" } finally { show: \"fin\" }"),
        "caught\nfin\n"
    );
}

#[test]
fn finally_runs_even_when_nothing_catches() {
    let code = "\
funct f() {
    try { raise \"x\" } finally { show: \"fin\" }
}
try { f() } catch (e) { show: e }";
    assert_eq!(run_show(code), "fin\nx\n");
}

#[test]
fn finally_may_override_a_return() {
    let code = "\
funct f() {
    try { return 1 } finally { return 2 }
}
f()";
    assert_eq!(run(code), Object::Int(2));
}

#[test]
fn exception_in_finally_replaces_the_pending_one() {
    let code = "\
try {
    try { raise \"first\" } finally { raise \"second\" }
} catch (e) { show: e }";
    assert_eq!(run_show(code), "second\n");
}

#[test]
fn exceptions_unwind_through_calls() {
    let code = "\
funct inner() { raise \"deep\" }
funct outer() { inner() }
try { outer() } catch (e) { show: e }";
    assert_eq!(run_show(code), "deep\n");
}

#[test]
fn catch_may_rethrow() {
    let code = "\
try {
    try { raise \"x\" } catch (e) { raise e + \"!\" }
} catch (e2) { show: e2 }";
    assert_eq!(run_show(code), "x!\n");
}

#[test]
fn try_inside_a_loop_keeps_iterating() {
    let code = "\
let hits = 0
for k in [\"a\", \"missing\", \"b\"] {
    try {
        let v = {\"a\": 1, \"b\": 2}[k]
        hits = hits + v
    } catch (e) { continue }
}
hits";
    assert_eq!(run(code), Object::Int(3));
}

#[test]
fn runtime_errors_are_catchable() {
    assert_eq!(
        run("let ok = true\ntry { let x = 1 / 0 } catch (e) { ok = false }\nok"),
        Object::Bool(false)
    );
}

#[test]
fn unhandled_raise_surfaces_with_the_payload_text() {
    let err = run_err("raise \"kaput\"");
    assert_eq!(err.exc_type, ExcType::Error);
    assert_eq!(err.message, "kaput");
    let rendered = err.to_string();
    assert!(rendered.starts_with("[Unhandled Exception] in test.vsp at line 1"), "{rendered}");
    assert!(rendered.ends_with("kaput"), "{rendered}");
}

#[test]
fn syntax_errors_render_with_their_own_tag() {
    let err = Runner::new("let = 3", "bad.vsp").unwrap_err();
    assert_eq!(err.exc_type, ExcType::SyntaxError);
    assert!(err.to_string().starts_with("[Syntax Error] in bad.vsp"), "{err}");
}
