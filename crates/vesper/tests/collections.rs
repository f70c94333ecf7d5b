//! Arrays, tuples, dictionaries: copy-on-read, in-place mutation, slicing.

use indexmap::IndexMap;
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

// === dictionaries ===

#[test]
fn dict_literal_round_trip() {
    assert_eq!(run_show("let d = {\"a\": 1, \"b\": 2}\nshow: d[\"b\"]"), "2\n");
    assert_eq!(run("let d = {\"a\": 1, \"b\": 2}\nd[\"b\"]"), Object::Int(2));
}

#[test]
fn dict_missing_key_raises() {
    assert_eq!(run_err("let d = {}\nd[\"k\"]").exc_type, ExcType::KeyError);
}

#[test]
fn dict_dot_access_is_key_lookup() {
    assert_eq!(run("let d = {\"a\": 7}\nd.a"), Object::Int(7));
    assert_eq!(run_err("let d = {}\nd.missing").exc_type, ExcType::KeyError);
}

#[test]
fn dict_len_wins_over_key_lookup() {
    assert_eq!(run("let d = {\"a\": 1, \"b\": 2}\nd.len"), Object::Int(2));
}

#[test]
fn dict_key_assignment_inserts_and_replaces() {
    assert_eq!(run("let d = {\"a\": 1}\nd[\"b\"] = 2\nd.len"), Object::Int(2));
    assert_eq!(run("let d = {\"a\": 1}\nd[\"a\"] = 9\nd[\"a\"]"), Object::Int(9));
}

#[test]
fn dict_keys_must_be_strings() {
    assert_eq!(run_err("let d = {\"a\": 1}\nd[1]").exc_type, ExcType::TypeError);
}

#[test]
fn for_over_dict_walks_keys_in_insertion_order() {
    assert_eq!(
        run_show("let d = {\"b\": 1, \"a\": 2}\nfor k in d { show: k }"),
        "b\na\n"
    );
}

#[test]
fn dict_result_converts_structurally() {
    let mut expected = IndexMap::new();
    expected.insert("a".to_owned(), Object::Int(1));
    expected.insert("b".to_owned(), Object::Str("two".to_owned()));
    assert_eq!(run("{\"a\": 1, \"b\": \"two\"}"), Object::Dict(expected));
}

// === arrays ===

#[test]
fn reading_a_variable_copies_containers() {
    let code = "\
let a = [1]
let b = a
b.append(2)
a.len";
    assert_eq!(run(code), Object::Int(1));
    let code = "\
let a = [1]
let b = a
b.append(2)
b.len";
    assert_eq!(run(code), Object::Int(2));
}

#[test]
fn append_mutates_in_place() {
    assert_eq!(run("let a = [1]\na.append(2)\na.len"), Object::Int(2));
}

#[test]
fn nested_containers_mutate_in_place() {
    assert_eq!(run("let grid = [[1], [2]]\ngrid[0].append(9)\ngrid[0].len"), Object::Int(2));
    assert_eq!(run("let d = {\"xs\": [1]}\nd[\"xs\"].append(2)\nd[\"xs\"].len"), Object::Int(2));
}

#[test]
fn deep_copy_extends_into_nested_values() {
    let code = "\
let d = {\"xs\": [1]}
let e = d
e[\"xs\"].append(2)
d[\"xs\"].len";
    assert_eq!(run(code), Object::Int(1));
}

#[test]
fn index_assignment() {
    assert_eq!(run("let a = [1, 2, 3]\na[0] = 9\na[0]"), Object::Int(9));
    assert_eq!(run("let a = [1, 2, 3]\na[-1] = 9\na[2]"), Object::Int(9));
}

#[test]
fn negative_index_wraps_once() {
    assert_eq!(run("[1, 2, 3][-1]"), Object::Int(3));
    assert_eq!(run_err("[1, 2, 3][-4]").exc_type, ExcType::IndexError);
    assert_eq!(run_err("[1, 2, 3][3]").exc_type, ExcType::IndexError);
}

#[test]
fn array_len_and_result_conversion() {
    assert_eq!(run("[1, 2, 3].len"), Object::Int(3));
    assert_eq!(
        run("[1, \"two\", 3.0]"),
        Object::Array(vec![
            Object::Int(1),
            Object::Str("two".to_owned()),
            Object::Float(3.0)
        ])
    );
}

#[test]
fn append_on_fresh_array_is_allowed() {
    // the temporary is mutated and then discarded
    assert_eq!(run("[1, 2].append(3)"), Object::Null);
}

// === tuples ===

#[test]
fn tuple_indexing_and_len() {
    assert_eq!(run("(1, 2)[0]"), Object::Int(1));
    assert_eq!(run("(1, 2, 3).len"), Object::Int(3));
    assert_eq!(run("(1,).len"), Object::Int(1));
}

#[test]
fn tuples_reject_item_assignment() {
    assert_eq!(run_err("let t = (1, 2)\nt[0] = 9").exc_type, ExcType::TypeError);
}

#[test]
fn tuple_result_conversion() {
    assert_eq!(
        run("(1, \"a\")"),
        Object::Tuple(vec![Object::Int(1), Object::Str("a".to_owned())])
    );
}

// === slice ===

#[test]
fn slice_arrays_tuples_strings() {
    assert_eq!(
        run("slice([1, 2, 3, 4], 1, 3)"),
        Object::Array(vec![Object::Int(2), Object::Int(3)])
    );
    assert_eq!(
        run("slice((1, 2, 3), 0, 2)"),
        Object::Tuple(vec![Object::Int(1), Object::Int(2)])
    );
    assert_eq!(run("slice(\"hello\", 1)"), Object::Str("ello".to_owned()));
}

#[test]
fn slice_wraps_and_clamps() {
    assert_eq!(run("slice([1, 2, 3], -2)"), Object::Array(vec![Object::Int(2), Object::Int(3)]));
    assert_eq!(run("slice([1, 2, 3], 0, 99).len"), Object::Int(3));
    assert_eq!(run("slice([1, 2, 3], 2, 1).len"), Object::Int(0));
}

#[test]
fn slice_copies_its_elements() {
    let code = "\
let a = [[1], [2], [3]]
let s = slice(a, 0, 2)
s[0].append(9)
a[0].len";
    assert_eq!(run(code), Object::Int(1));
}

// === structural equality ===

#[test]
fn container_equality_is_structural() {
    assert_eq!(run("[1, 2] == [1, 2]"), Object::Bool(true));
    assert_eq!(run("[1, 2] == [2, 1]"), Object::Bool(false));
    assert_eq!(run("(1, 2) == (1, 2)"), Object::Bool(true));
    assert_eq!(run("{\"a\": 1} == {\"a\": 1}"), Object::Bool(true));
    assert_eq!(run("{\"a\": 1} == {\"a\": 2}"), Object::Bool(false));
    assert_eq!(run("let a = [1]\nlet b = a\na == b"), Object::Bool(true));
}

#[test]
fn deep_copy_preserves_equality() {
    assert_eq!(
        run("let a = [[1, 2], {\"k\": \"v\"}]\nlet b = a\na == b"),
        Object::Bool(true)
    );
}
