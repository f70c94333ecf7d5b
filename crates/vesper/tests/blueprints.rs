//! Blueprints: instantiation, attribute lookup, inheritance, super,
//! operator overloading.

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
fn init_binds_instance_attributes() {
    let code = "\
blueprint Point {
    funct init(self, x, y) {
        self.x = x
        self.y = y
    }
}
let p = Point(3, 4)
p.x + p.y";
    assert_eq!(run(code), Object::Int(7));
}

#[test]
fn instantiation_without_init_rejects_arguments() {
    let code = "blueprint Empty { }\nEmpty(1)";
    assert_eq!(run_err(code).exc_type, ExcType::ArityError);
    assert_eq!(run("blueprint Empty { }\nEmpty()\nnull"), Object::Null);
}

#[test]
fn init_arity_is_checked_without_counting_self() {
    let code = "\
blueprint Point {
    funct init(self, x, y) {
        self.x = x
        self.y = y
    }
}
Point(1)";
    assert_eq!(run_err(code).exc_type, ExcType::ArityError);
}

#[test]
fn methods_mutate_the_receiver() {
    let code = "\
blueprint Counter {
    funct init(self) { self.n = 0 }
    funct bump(self) { self.n = self.n + 1 }
}
let c = Counter()
c.bump()
c.bump()
c.n";
    assert_eq!(run(code), Object::Int(2));
}

#[test]
fn instance_attributes_shadow_class_attributes() {
    let code = "\
blueprint Conf {
    let level = 1
}
let c = Conf()
let before = c.level
c.level = 5
before + c.level";
    assert_eq!(run(code), Object::Int(6));
}

#[test]
fn inheritance_with_super_call() {
    let code = "\
blueprint A {
    funct greet(self) { return \"hi A\" }
}
blueprint B inherits A {
    funct greet(self) { return super.greet() + \" via B\" }
}
let b = B()
b.greet()";
    assert_eq!(run(code), Object::Str("hi A via B".to_owned()));
}

#[test]
fn inherited_methods_and_init() {
    let code = "\
blueprint A {
    funct init(self, n) { self.n = n }
    funct get(self) { return self.n }
}
blueprint B inherits A { }
let b = B(5)
b.get()";
    assert_eq!(run(code), Object::Int(5));
}

#[test]
fn super_outside_a_method_raises() {
    assert_eq!(run_err("super.x").exc_type, ExcType::TypeError);
}

#[test]
fn super_without_a_parent_raises() {
    let code = "\
blueprint A {
    funct f(self) { return super.f() }
}
A().f()";
    assert_eq!(run_err(code).exc_type, ExcType::TypeError);
}

#[test]
fn operator_overload_op_add() {
    let code = "\
blueprint Vec2 {
    funct init(self, x, y) {
        self.x = x
        self.y = y
    }
    funct op_add(self, other) {
        return Vec2(self.x + other.x, self.y + other.y)
    }
}
let v = Vec2(1, 2) + Vec2(3, 4)
show: \"{v.x},{v.y}\"";
    assert_eq!(run_show(code), "4,6\n");
}

#[test]
fn add_without_op_add_raises() {
    assert_eq!(run_err("blueprint P { }\nP() + 1").exc_type, ExcType::TypeError);
}

#[test]
fn blueprint_attribute_returns_the_blueprint() {
    let code = "blueprint P { }\nlet p = P()\np.blueprint.name";
    assert_eq!(run(code), Object::Str("P".to_owned()));
}

#[test]
fn blueprint_name_attribute() {
    assert_eq!(run("blueprint Widget { }\nWidget.name"), Object::Str("Widget".to_owned()));
}

#[test]
fn missing_attribute_raises() {
    assert_eq!(run_err("blueprint P { }\nP().nope").exc_type, ExcType::AttributeError);
}

#[test]
fn objects_share_by_reference() {
    let code = "\
blueprint Box { }
let a = Box()
let b = a
b.tag = 7
a.tag";
    assert_eq!(run(code), Object::Int(7));
}

#[test]
fn object_equality_is_identity() {
    let code = "blueprint P { }\nlet a = P()\nlet b = a\na == b";
    assert_eq!(run(code), Object::Bool(true));
    assert_eq!(run("blueprint P { }\nP() == P()"), Object::Bool(false));
}

#[test]
fn objects_may_define_their_own_len() {
    let code = "\
blueprint Bag {
    funct init(self) { self.items = [] }
    funct len(self) { return self.items.len }
}
let b = Bag()
b.items.append(1)
b.len()";
    assert_eq!(run(code), Object::Int(1));
}

#[test]
fn async_methods_bind_self() {
    let code = "\
blueprint Ticker {
    funct init(self, n) { self.n = n }
    async funct tick(self) {
        await async_sleep(0.001)
        return self.n * 2
    }
}
let t = Ticker(21)
await t.tick()";
    assert_eq!(run(code), Object::Int(42));
}

#[test]
fn async_init_is_a_syntax_error() {
    let err = Runner::new("blueprint A { async funct init(self) { } }", "test.vsp").unwrap_err();
    assert_eq!(err.exc_type, ExcType::SyntaxError);
}

#[test]
fn instance_repr() {
    assert_eq!(run_show("blueprint P { }\nshow: P()"), "<P instance>\n");
}
