//! Coroutines, the event loop, gather, sleep, and cancellation.

use std::time::{Duration, Instant};

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
fn await_runs_a_new_coroutine() {
    assert_eq!(run("async funct one() { return 1 }\nawait one()"), Object::Int(1));
}

#[test]
fn async_call_returns_without_executing() {
    let code = "\
async funct noisy() { show: \"ran\" }
let c = noisy()
show: \"before\"
await c";
    assert_eq!(run_show(code), "before\nran\n");
}

#[test]
fn async_functions_take_defaults() {
    assert_eq!(run("async funct f(a, b = 2) { return a + b }\nawait f(1)"), Object::Int(3));
}

#[test]
fn await_rejects_non_coroutines() {
    assert_eq!(run_err("await 5").exc_type, ExcType::AwaitError);
}

#[test]
fn sleep_completes_with_null() {
    assert_eq!(run("await async_sleep(0.005)"), Object::Null);
}

#[test]
fn negative_sleep_raises() {
    assert_eq!(run_err("await async_sleep(-1)").exc_type, ExcType::ValueError);
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let code = "\
async funct tag(name, delay) {
    await async_sleep(delay)
    show: name
}
await gather([tag(\"slow\", 0.03), tag(\"fast\", 0.01)])";
    assert_eq!(run_show(code), "fast\nslow\n");
}

#[test]
fn gather_runs_concurrently() {
    let code = "await gather([async_sleep(0.05), async_sleep(0.05)])";
    let started = Instant::now();
    let result = run(code);
    let elapsed = started.elapsed();
    assert_eq!(result, Object::Array(vec![Object::Null, Object::Null]));
    assert!(elapsed >= Duration::from_millis(45), "finished too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(90), "sleeps did not overlap: {elapsed:?}");
}

#[test]
fn gather_keeps_results_in_input_order() {
    let code = "\
async funct late(v, delay) {
    await async_sleep(delay)
    return v
}
await gather([late(1, 0.03), late(2, 0.01), late(3, 0.02)])";
    assert_eq!(
        run(code),
        Object::Array(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
}

#[test]
fn gather_propagates_the_first_exception_after_all_settle() {
    let code = "\
async funct ok(delay) {
    await async_sleep(delay)
    show: \"ok done\"
    return 1
}
async funct bad() { raise \"broken\" }
try { await gather([ok(0.03), bad()]) } catch (e) { show: e }";
    // the failing child reports first, yet the sibling still runs to
    // completion before the exception propagates
    assert_eq!(run_show(code), "ok done\nbroken\n");
}

#[test]
fn cancelling_a_fresh_coroutine_delivers_at_await() {
    let code = "\
async funct slow() { await async_sleep(10) }
let c = slow()
cancel(c)
try { await c } catch (e) { show: e }";
    let started = Instant::now();
    let output = run_show(code);
    assert!(started.elapsed() < Duration::from_secs(1), "cancelled coroutine still slept");
    assert_eq!(output, "CancelledError: coroutine was cancelled\n");
}

#[test]
fn cancelling_a_sleeping_coroutine_wakes_it_with_the_error() {
    let code = "\
async funct slow() {
    await async_sleep(0.2)
    return 1
}
async funct canceller(target) {
    await async_sleep(0.01)
    cancel(target)
}
let c = slow()
let k = canceller(c)
try { await gather([c, k]) } catch (e) { show: e }";
    assert_eq!(run_show(code), "CancelledError: coroutine was cancelled\n");
}

#[test]
fn cancel_is_idempotent() {
    let code = "\
async funct slow() { await async_sleep(5) }
let c = slow()
cancel(c)
cancel(c)
try { await c } catch (e) { show: e }";
    assert_eq!(run_show(code), "CancelledError: coroutine was cancelled\n");
}

#[test]
fn every_waiter_is_resumed_exactly_once() {
    let code = "\
async funct src() {
    await async_sleep(0.01)
    return 7
}
async funct reader(c) { return await c }
let s = src()
await gather([reader(s), reader(s), reader(s)])";
    assert_eq!(
        run(code),
        Object::Array(vec![Object::Int(7), Object::Int(7), Object::Int(7)])
    );
}

#[test]
fn awaiting_a_finished_coroutine_yields_its_result_again() {
    let code = "\
async funct src() { return [1, 2] }
let s = src()
let first = await s
first.append(3)
await s";
    // each await hands out an independent copy of the stored result
    assert_eq!(run(code), Object::Array(vec![Object::Int(1), Object::Int(2)]));
}

#[test]
fn exceptions_surface_through_await() {
    let code = "\
async funct boom() { raise \"bad\" }
try { await boom() } catch (e) { show: e }";
    assert_eq!(run_show(code), "bad\n");
}

#[test]
fn unhandled_async_exception_reaches_the_top() {
    let err = run_err("async funct boom() { raise \"bad\" }\nawait boom()");
    assert_eq!(err.exc_type, ExcType::Error);
    assert_eq!(err.message, "bad");
}

#[test]
fn a_coroutine_cannot_await_itself() {
    let code = "\
blueprint Box { }
let holder = Box()
async funct f(b) { await b.c }
let c = f(holder)
holder.c = c
try { await c } catch (e) { show: e }";
    assert_eq!(run_show(code), "AwaitError: a coroutine cannot await itself\n");
}

#[test]
fn awaits_resume_inside_loops() {
    let code = "\
async funct count() {
    let total = 0
    let i = 0
    while i < 3 {
        await async_sleep(0.001)
        total = total + 1
        i = i + 1
    }
    return total
}
await count()";
    assert_eq!(run(code), Object::Int(3));
}

#[test]
fn awaits_resume_inside_for_loops() {
    let code = "\
async funct twice(x) {
    await async_sleep(0.001)
    return x * 2
}
async funct run_all() {
    let out = []
    for x in [1, 2, 3] {
        let v = await twice(x)
        out.append(v)
    }
    return out
}
await run_all()";
    assert_eq!(
        run(code),
        Object::Array(vec![Object::Int(2), Object::Int(4), Object::Int(6)])
    );
}

#[test]
fn awaits_resume_inside_try_catch_finally() {
    let code = "\
async funct f() {
    let log = \"\"
    try {
        await async_sleep(0.001)
        raise \"x\"
    } catch (e) {
        await async_sleep(0.001)
        log = log + \"caught \" + e
    } finally {
        log = log + \"|fin\"
    }
    return log
}
await f()";
    assert_eq!(run(code), Object::Str("caught x|fin".to_owned()));
}

#[test]
fn awaits_resume_inside_branches() {
    let code = "\
async funct pick(flag) {
    if flag {
        await async_sleep(0.001)
        return \"yes\"
    } else {
        await async_sleep(0.001)
        return \"no\"
    }
}
let a = await pick(true)
let b = await pick(false)
a + b";
    assert_eq!(run(code), Object::Str("yesno".to_owned()));
}

#[test]
fn coroutine_repr() {
    assert_eq!(
        run_show("async funct job() { return 1 }\nshow: job()"),
        "<coroutine job>\n"
    );
}
