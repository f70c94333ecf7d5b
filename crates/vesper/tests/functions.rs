//! Functions: arity, defaults, closures, recursion.

use pretty_assertions::assert_eq;
use vesper::{ExcType, Exception, NoPrint, Object, Runner};

fn run(code: &str) -> Object {
    Runner::new(code, "test.vsp").unwrap().run(&mut NoPrint).unwrap()
}

fn run_err(code: &str) -> Exception {
    Runner::new(code, "test.vsp").unwrap().run(&mut NoPrint).unwrap_err()
}

#[test]
fn basic_call_and_return() {
    assert_eq!(run("funct add(a, b) { return a + b }\nadd(2, 3)"), Object::Int(5));
}

#[test]
fn falling_off_the_body_returns_null() {
    assert_eq!(run("funct f() { let x = 1 }\nf()"), Object::Null);
    assert_eq!(run("funct f() { return }\nf()"), Object::Null);
}

#[test]
fn default_arguments_fill_missing_positions() {
    let code = "funct add(a, b = 2) { return a + b }\n";
    assert_eq!(run(&format!("{code}add(1)")), Object::Int(3));
    assert_eq!(run(&format!("{code}add(1, 10)")), Object::Int(11));
}

#[test]
fn defaults_may_reference_earlier_parameters() {
    assert_eq!(run("funct f(a, b = a + 1) { return b }\nf(1)"), Object::Int(2));
}

#[test]
fn arity_is_checked() {
    let code = "funct add(a, b = 2) { return a + b }\n";
    assert_eq!(run_err(&format!("{code}add()")).exc_type, ExcType::ArityError);
    assert_eq!(run_err(&format!("{code}add(1, 2, 3)")).exc_type, ExcType::ArityError);
}

#[test]
fn functions_are_first_class() {
    let code = "\
funct double(x) { return x * 2 }
funct apply(f, x) { return f(x) }
apply(double, 21)";
    assert_eq!(run(code), Object::Int(42));
}

#[test]
fn closures_capture_their_definition_scope() {
    let code = "\
funct make() {
    let n = 0
    funct inc() {
        n = n + 1
        return n
    }
    return inc
}
let c = make()
c()
c()";
    assert_eq!(run(code), Object::Int(2));
}

#[test]
fn each_closure_gets_its_own_captured_scope() {
    let code = "\
funct make() {
    let n = 0
    funct inc() {
        n = n + 1
        return n
    }
    return inc
}
let a = make()
let b = make()
a()
a()
b()";
    assert_eq!(run(code), Object::Int(1));
}

#[test]
fn recursion() {
    let code = "\
funct fib(n) {
    if n < 2 { return n }
    return fib(n - 1) + fib(n - 2)
}
fib(10)";
    assert_eq!(run(code), Object::Int(55));
}

#[test]
fn runaway_recursion_is_caught() {
    assert_eq!(run_err("funct f() { return f() }\nf()").exc_type, ExcType::RecursionError);
}

#[test]
fn arguments_are_copied_in() {
    let code = "\
funct grow(xs) {
    xs.append(0)
    return xs.len
}
let a = [1]
grow(a)
a.len";
    assert_eq!(run(code), Object::Int(1));
}

#[test]
fn later_definition_shadows_earlier() {
    let code = "\
funct f() { return 1 }
funct f() { return 2 }
f()";
    assert_eq!(run(code), Object::Int(2));
}

#[test]
fn non_callable_values_raise() {
    assert_eq!(run_err("let x = 3\nx()").exc_type, ExcType::TypeError);
    assert_eq!(run_err("\"s\"()").exc_type, ExcType::TypeError);
}
